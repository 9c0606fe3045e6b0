//! Authentication delegate trait.
//!
//! The bridge never verifies credentials itself. A delegate inspects the raw
//! request (a gateway header, a session cookie, a client certificate) and
//! either names the user or declines.

use crate::error::Result;
use crate::state::RawRequest;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Subject identifier reported to the hub on grant.
    pub subject: String,
}

impl Identity {
    /// Identity for `subject`.
    #[must_use]
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
        }
    }
}

/// Establishes who the user is.
pub trait AuthenticationDelegate: Send + Sync {
    /// Authenticate the user behind `request`.
    ///
    /// # Errors
    ///
    /// - [`crate::IdpError::AuthenticationFailed`]: no identity yet; the user
    ///   may try again (the web layer shows the login page)
    /// - [`crate::IdpError::IdentityRejected`]: this identity must never be
    ///   admitted; the challenge fails
    fn authenticate(
        &self,
        request: &RawRequest,
    ) -> impl std::future::Future<Output = Result<Identity>> + Send;
}
