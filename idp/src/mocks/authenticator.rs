//! Mock authentication delegate for testing.

use crate::error::{IdpError, Result};
use crate::providers::{AuthenticationDelegate, Identity};
use crate::state::RawRequest;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Mock authentication delegate.
///
/// Plays back queued outcomes first, then repeats its default outcome.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone)]
pub struct MockAuthenticator {
    default: Result<Identity>,
    queued: Arc<Mutex<VecDeque<Result<Identity>>>>,
    calls: Arc<AtomicUsize>,
}

impl MockAuthenticator {
    fn with_default(default: Result<Identity>) -> Self {
        Self {
            default,
            queued: Arc::new(Mutex::new(VecDeque::new())),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Authenticates everyone as `user`.
    #[must_use]
    pub fn accepting(user: &str) -> Self {
        Self::with_default(Ok(Identity::new(user)))
    }

    /// Never establishes an identity (the user may retry).
    #[must_use]
    pub fn failing() -> Self {
        Self::with_default(Err(IdpError::AuthenticationFailed))
    }

    /// Permanently rejects every identity.
    #[must_use]
    pub fn rejecting(reason: &str) -> Self {
        Self::with_default(Err(IdpError::IdentityRejected(reason.to_string())))
    }

    /// Queue `outcome` ahead of the default.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn then(self, outcome: Result<Identity>) -> Self {
        self.queued.lock().unwrap().push_back(outcome);
        self
    }

    /// Number of `authenticate` calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AuthenticationDelegate for MockAuthenticator {
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn authenticate(&self, _request: &RawRequest) -> Result<Identity> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let queued = self.queued.lock().unwrap().pop_front();
        queued.unwrap_or_else(|| self.default.clone())
    }
}
