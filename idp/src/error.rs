//! Error types for the challenge-consent protocol.

use crate::state::ChallengeState;
use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, IdpError>;

/// Error taxonomy for the challenge-consent protocol.
///
/// Variants are grouped by who can do something about them: the browser
/// (restart the flow), the caller (retry), or the operator (fix config).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdpError {
    // ═══════════════════════════════════════════════════════════
    // Challenge Errors
    // ═══════════════════════════════════════════════════════════

    /// No live challenge for this token in this session.
    ///
    /// Also returned for tokens that were already resolved, and for tokens
    /// presented from a different browser session.
    #[error("Challenge not found")]
    NotFound,

    /// The challenge's validity window has passed.
    #[error("Challenge has expired")]
    Expired,

    /// Malformed or tampered token, record or cookie.
    #[error("Invalid challenge token")]
    Invalid,

    /// The requested operation is not legal in the challenge's current state.
    #[error("Operation `{operation}` is not allowed in state {state:?}")]
    InvalidState {
        /// State the challenge was in
        state: ChallengeState,
        /// Operation that was attempted
        operation: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Hub Errors
    // ═══════════════════════════════════════════════════════════

    /// The hub could not be reached, timed out, or is temporarily failing.
    #[error("Authorization hub unreachable: {0}")]
    HubUnreachable(String),

    /// The hub answered and refused the request.
    #[error("Authorization hub rejected the request: {0}")]
    HubRejected(String),

    // ═══════════════════════════════════════════════════════════
    // Authentication Errors
    // ═══════════════════════════════════════════════════════════

    /// The delegate could not establish an identity; the user may try again.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The delegate established that this identity must never be admitted.
    #[error("Identity rejected: {0}")]
    IdentityRejected(String),

    // ═══════════════════════════════════════════════════════════
    // System Errors
    // ═══════════════════════════════════════════════════════════

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage backend or other internal failure (should not be exposed to users).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IdpError {
    /// Returns `true` if retrying the same call may succeed.
    ///
    /// # Examples
    ///
    /// ```
    /// # use idp_bridge::IdpError;
    /// assert!(IdpError::HubUnreachable("timeout".into()).is_retryable());
    /// assert!(!IdpError::HubRejected("unknown client".into()).is_retryable());
    /// ```
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::HubUnreachable(_))
    }

    /// Returns `true` if the browser has to start over from the entry point.
    ///
    /// # Examples
    ///
    /// ```
    /// # use idp_bridge::IdpError;
    /// assert!(IdpError::Expired.requires_restart());
    /// assert!(!IdpError::AuthenticationFailed.requires_restart());
    /// ```
    #[must_use]
    pub const fn requires_restart(&self) -> bool {
        matches!(
            self,
            Self::NotFound
                | Self::Expired
                | Self::Invalid
                | Self::HubRejected(_)
                | Self::IdentityRejected(_)
        )
    }

    /// Returns `true` if this error moves a challenge to a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Expired | Self::HubRejected(_) | Self::IdentityRejected(_)
        )
    }

    /// Short machine-readable label, used for metrics and error pages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
            Self::InvalidState { .. } => "invalid_state",
            Self::HubUnreachable(_) => "hub_unreachable",
            Self::HubRejected(_) => "hub_rejected",
            Self::AuthenticationFailed => "authentication_failed",
            Self::IdentityRejected(_) => "identity_rejected",
            Self::Configuration(_) => "configuration",
            Self::Serialization(_) => "serialization",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<bincode::Error> for IdpError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<redis::RedisError> for IdpError {
    fn from(err: redis::RedisError) -> Self {
        Self::Internal(format!("redis: {err}"))
    }
}
