//! Mock challenge store for testing.

use crate::error::{IdpError, Result};
use crate::providers::{ChallengeStore, HubRefBinding};
use crate::state::{Challenge, ChallengeState, ChallengeToken, SessionId};
use crate::stores::InMemoryChallengeStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Mock challenge store.
///
/// Delegates to an [`InMemoryChallengeStore`], but can yield between a read
/// and the caller's next step, fail chosen writes, and counts lost
/// compare-and-swaps. Clones share state.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone)]
pub struct MockChallengeStore {
    inner: InMemoryChallengeStore,
    yield_after_get: bool,
    fail_swaps_into: Option<ChallengeState>,
    lost_swaps: Arc<AtomicUsize>,
    failed_swaps: Arc<AtomicUsize>,
}

impl MockChallengeStore {
    /// Wrap `inner` with no faults configured.
    #[must_use]
    pub fn new(inner: InMemoryChallengeStore) -> Self {
        Self {
            inner,
            yield_after_get: false,
            fail_swaps_into: None,
            lost_swaps: Arc::new(AtomicUsize::new(0)),
            failed_swaps: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Yield to the scheduler after every read, so concurrent operations on
    /// one record all read it before any of them writes.
    #[must_use]
    pub const fn yielding_after_get(mut self) -> Self {
        self.yield_after_get = true;
        self
    }

    /// Fail every swap that would move a record into `state`.
    #[must_use]
    pub const fn failing_swaps_into(mut self, state: ChallengeState) -> Self {
        self.fail_swaps_into = Some(state);
        self
    }

    /// Swaps that found the record changed or missing.
    #[must_use]
    pub fn lost_swaps(&self) -> usize {
        self.lost_swaps.load(Ordering::SeqCst)
    }

    /// Swaps failed on purpose.
    #[must_use]
    pub fn failed_swaps(&self) -> usize {
        self.failed_swaps.load(Ordering::SeqCst)
    }

    /// The wrapped store.
    #[must_use]
    pub const fn inner(&self) -> &InMemoryChallengeStore {
        &self.inner
    }
}

impl ChallengeStore for MockChallengeStore {
    async fn put(&self, session: SessionId, challenge: &Challenge) -> Result<()> {
        self.inner.put(session, challenge).await
    }

    async fn get(&self, session: SessionId, token: &ChallengeToken) -> Result<Challenge> {
        let found = self.inner.get(session, token).await;
        if self.yield_after_get {
            tokio::task::yield_now().await;
        }
        found
    }

    async fn swap(
        &self,
        session: SessionId,
        expected_revision: u64,
        challenge: &Challenge,
    ) -> Result<bool> {
        if self.fail_swaps_into == Some(challenge.state) {
            self.failed_swaps.fetch_add(1, Ordering::SeqCst);
            return Err(IdpError::Internal("mock store write failure".to_string()));
        }

        let swapped = self.inner.swap(session, expected_revision, challenge).await?;
        if !swapped {
            self.lost_swaps.fetch_add(1, Ordering::SeqCst);
        }
        Ok(swapped)
    }

    async fn delete(&self, session: SessionId, token: &ChallengeToken) -> Result<()> {
        self.inner.delete(session, token).await
    }

    async fn bind_hub_ref(
        &self,
        hub_ref: &str,
        session: SessionId,
        token: &ChallengeToken,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<HubRefBinding>> {
        self.inner.bind_hub_ref(hub_ref, session, token, expires_at).await
    }
}
