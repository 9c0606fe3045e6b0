//! Challenge state types.
//!
//! This module defines the data the challenge-consent protocol moves around:
//! the token that names an in-flight challenge, the challenge record itself,
//! and the framework-agnostic request snapshot handed to collaborators.
//! All types are `Clone` so transitions can produce new values instead of
//! mutating shared ones.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ═══════════════════════════════════════════════════════════════════════
// ID Types
// ═══════════════════════════════════════════════════════════════════════

/// Opaque, URL-safe identifier of one in-flight challenge.
///
/// 256 random bits, base64url without padding. Carries no identity or scope
/// data and is never reused.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChallengeToken(String);

impl ChallengeToken {
    /// Mint a fresh token from the OS CSPRNG.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Rebuild a token from its string form (used by the codec after the MAC
    /// has been verified).
    #[must_use]
    pub(crate) const fn from_verified(value: String) -> Self {
        Self(value)
    }

    /// The token as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First few characters, for log lines.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }
}

// Keep full tokens out of `{:?}` output, and therefore out of logs.
impl std::fmt::Debug for ChallengeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ChallengeToken({}…)", self.prefix())
    }
}

/// The tamper-evident blob handed to the browser in `?challenge=`.
///
/// Produced and checked only by [`crate::codec::TokenCodec`]; anything else
/// treats it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SignedToken(String);

impl SignedToken {
    /// Wrap a string received from the browser. No validation happens here.
    #[must_use]
    pub const fn new(value: String) -> Self {
        Self(value)
    }

    /// The blob as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SignedToken {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SignedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Browser session namespace for stored challenges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    /// Generate a new random `SessionId`.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Challenge Lifecycle
// ═══════════════════════════════════════════════════════════════════════

/// Where a challenge is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeState {
    /// Registered with the hub, user not yet authenticated.
    Pending,
    /// User identity established.
    Authenticated,
    /// Consent answer recorded, not yet reported to the hub.
    Decided,
    /// Decision reported to the hub.
    Resolved,
    /// Validity window passed.
    Expired,
    /// Unrecoverable error.
    Failed,
}

impl ChallengeState {
    /// Returns `true` for states no transition leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Expired | Self::Failed)
    }

    /// Lower-case label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Authenticated => "authenticated",
            Self::Decided => "decided",
            Self::Resolved => "resolved",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

/// The user's consent answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    /// The user agreed to grant the requested scopes.
    Granted,
    /// The user refused.
    Denied,
}

impl Decision {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied => "denied",
        }
    }
}

impl From<bool> for Decision {
    fn from(granted: bool) -> Self {
        if granted { Self::Granted } else { Self::Denied }
    }
}

/// One in-flight challenge.
///
/// `revision` is bumped on every transition and is the compare-and-swap key
/// the stores use, so two writers racing from the same snapshot cannot both
/// win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Token naming this challenge.
    pub token: ChallengeToken,
    /// The hub's own identifier for the consent request.
    pub hub_ref: String,
    /// Authenticated user, empty until authentication.
    pub user: Option<String>,
    /// Client asking for access.
    pub client: String,
    /// Requested scopes, in the order the hub listed them.
    pub scopes: Vec<String>,
    /// Lifecycle state as last stored.
    pub state: ChallengeState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// End of the validity window.
    pub expires_at: DateTime<Utc>,
    /// Consent answer, set at most once.
    pub decision: Option<Decision>,
    /// Where the hub wants the browser sent after resolution.
    pub return_to: Option<String>,
    /// Start of the in-flight resolve lease, if a resolve holds one.
    pub resolving_since: Option<DateTime<Utc>>,
    /// How many resolve rounds ended with the hub unreachable.
    pub resolve_rounds: u32,
    /// Transition counter.
    pub revision: u64,
}

impl Challenge {
    /// A freshly registered challenge.
    #[must_use]
    pub fn pending(
        hub_ref: impl Into<String>,
        client: impl Into<String>,
        scopes: Vec<String>,
        validity: Validity,
    ) -> Self {
        Self {
            token: ChallengeToken::generate(),
            hub_ref: hub_ref.into(),
            user: None,
            client: client.into(),
            scopes,
            state: ChallengeState::Pending,
            created_at: validity.issued_at,
            expires_at: validity.expires_at,
            decision: None,
            return_to: None,
            resolving_since: None,
            resolve_rounds: 0,
            revision: 0,
        }
    }

    /// Set the post-resolution redirect target.
    #[must_use]
    pub fn with_return_to(mut self, return_to: impl Into<String>) -> Self {
        self.return_to = Some(return_to.into());
        self
    }

    /// Whether the validity window has closed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether a resolve lease taken at `resolving_since` is still held at `now`.
    #[must_use]
    pub fn lease_held_at(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        self.resolving_since
            .is_some_and(|since| now < since + lease)
    }

    /// What to report to the hub for this challenge, once decided.
    ///
    /// A grant carries the identity and every requested scope; a deny carries
    /// neither.
    #[must_use]
    pub fn resolution(&self) -> Option<Resolution> {
        match self.decision? {
            Decision::Granted => Some(Resolution::Grant {
                subject: self.user.clone()?,
                scopes: self.scopes.clone(),
            }),
            Decision::Denied => Some(Resolution::Deny {
                reason: DENIED_BY_USER.to_string(),
            }),
        }
    }

    /// What the presentation layer needs to ask the question.
    #[must_use]
    pub fn prompt(&self) -> ConsentPrompt {
        ConsentPrompt {
            client: self.client.clone(),
            user: self.user.clone().unwrap_or_default(),
            scopes: self.scopes.clone(),
        }
    }
}

/// Reason sent to the hub when the user says no.
pub const DENIED_BY_USER: &str = "The resource owner denied the request";

/// Validity window of a challenge, computed by the machine at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// Registration time.
    pub issued_at: DateTime<Utc>,
    /// End of the window.
    pub expires_at: DateTime<Utc>,
}

impl Validity {
    /// A window of `ttl` starting at `now`.
    #[must_use]
    pub fn starting_at(now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            issued_at: now,
            expires_at: now + ttl,
        }
    }
}

/// A decision as reported to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    /// Grant `scopes` to the client on behalf of `subject`.
    Grant {
        /// Authenticated user.
        subject: String,
        /// Approved scopes.
        scopes: Vec<String>,
    },
    /// Refuse the request.
    Deny {
        /// Human-readable reason for the hub's error page.
        reason: String,
    },
}

impl Resolution {
    /// The decision this resolution carries.
    #[must_use]
    pub const fn decision(&self) -> Decision {
        match self {
            Self::Grant { .. } => Decision::Granted,
            Self::Deny { .. } => Decision::Denied,
        }
    }
}

/// What the presentation layer renders on the consent page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentPrompt {
    /// Client asking for access.
    pub client: String,
    /// Authenticated user.
    pub user: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
}

// ═══════════════════════════════════════════════════════════════════════
// Inbound Request Snapshot
// ═══════════════════════════════════════════════════════════════════════

/// Framework-agnostic snapshot of an inbound HTTP request.
///
/// Header names are stored lower-cased; lookups are case-insensitive.
///
/// # Examples
///
/// ```
/// # use idp_bridge::RawRequest;
/// let req = RawRequest::default()
///     .with_query("challenge", "abc")
///     .with_header("X-Remote-User", "alice");
/// assert_eq!(req.query("challenge"), Some("abc"));
/// assert_eq!(req.header("x-remote-user"), Some("alice"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRequest {
    query: HashMap<String, String>,
    headers: HashMap<String, String>,
    form: HashMap<String, String>,
}

impl RawRequest {
    /// Build a snapshot from already-split parts.
    #[must_use]
    pub fn from_parts(
        query: HashMap<String, String>,
        headers: impl IntoIterator<Item = (String, String)>,
        form: HashMap<String, String>,
    ) -> Self {
        Self {
            query,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.to_ascii_lowercase(), value))
                .collect(),
            form,
        }
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Add a form field.
    #[must_use]
    pub fn with_form(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.form.insert(name.into(), value.into());
        self
    }

    /// Query parameter by name.
    #[must_use]
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Header by case-insensitive name.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Form field by name.
    #[must_use]
    pub fn form(&self, name: &str) -> Option<&str> {
        self.form.get(name).map(String::as_str)
    }

    /// Form field, falling back to the query string.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form(name).or_else(|| self.query(name))
    }
}
