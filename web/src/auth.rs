//! Trusted-header authentication delegate.
//!
//! For deployments behind a gateway that has already authenticated the user
//! (SSO proxy, mTLS terminator, ...) and forwards the user name in a header.
//! No credentials are checked here: the gateway must strip the header from
//! client requests.

use idp_bridge::providers::{AuthenticationDelegate, Identity};
use idp_bridge::{IdpError, RawRequest, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Reads the authenticated user from a request header.
#[derive(Debug, Clone)]
pub struct TrustedHeaderAuthenticator {
    header: String,
    blocked: Arc<HashSet<String>>,
}

impl TrustedHeaderAuthenticator {
    /// Trust the user name in `header`.
    #[must_use]
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            blocked: Arc::new(HashSet::new()),
        }
    }

    /// Refuse these users outright.
    #[must_use]
    pub fn with_blocked<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked = Arc::new(users.into_iter().map(Into::into).collect());
        self
    }
}

impl AuthenticationDelegate for TrustedHeaderAuthenticator {
    async fn authenticate(&self, request: &RawRequest) -> Result<Identity> {
        let user = request
            .header(&self.header)
            .map(str::trim)
            .filter(|user| !user.is_empty())
            .ok_or(IdpError::AuthenticationFailed)?;

        if self.blocked.contains(user) {
            return Err(IdpError::IdentityRejected(format!("{user} is blocked")));
        }
        Ok(Identity::new(user))
    }
}
