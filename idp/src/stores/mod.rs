//! Storage implementations for challenge records.
//!
//! - **In-memory** (`DashMap`): single-instance deployments and tests
//! - **Redis**: shared storage for several bridge instances
//!
//! [`ChallengeBackend`] selects one of them at runtime so the rest of the
//! bridge can stay generic over a single concrete store type.

pub mod challenge_memory;
pub mod challenge_redis;

// Re-exports
pub use challenge_memory::InMemoryChallengeStore;
pub use challenge_redis::RedisChallengeStore;

use crate::error::Result;
use crate::providers::{ChallengeStore, HubRefBinding};
use crate::state::{Challenge, ChallengeToken, SessionId};
use chrono::{DateTime, Utc};

/// A challenge store chosen by configuration.
#[derive(Debug, Clone)]
pub enum ChallengeBackend {
    /// Process-local storage.
    Memory(InMemoryChallengeStore),
    /// Redis-backed storage.
    Redis(RedisChallengeStore),
}

impl ChallengeBackend {
    /// Label for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Redis(_) => "redis",
        }
    }
}

impl From<InMemoryChallengeStore> for ChallengeBackend {
    fn from(store: InMemoryChallengeStore) -> Self {
        Self::Memory(store)
    }
}

impl From<RedisChallengeStore> for ChallengeBackend {
    fn from(store: RedisChallengeStore) -> Self {
        Self::Redis(store)
    }
}

impl ChallengeStore for ChallengeBackend {
    async fn put(&self, session: SessionId, challenge: &Challenge) -> Result<()> {
        match self {
            Self::Memory(store) => store.put(session, challenge).await,
            Self::Redis(store) => store.put(session, challenge).await,
        }
    }

    async fn get(&self, session: SessionId, token: &ChallengeToken) -> Result<Challenge> {
        match self {
            Self::Memory(store) => store.get(session, token).await,
            Self::Redis(store) => store.get(session, token).await,
        }
    }

    async fn swap(
        &self,
        session: SessionId,
        expected_revision: u64,
        challenge: &Challenge,
    ) -> Result<bool> {
        match self {
            Self::Memory(store) => store.swap(session, expected_revision, challenge).await,
            Self::Redis(store) => store.swap(session, expected_revision, challenge).await,
        }
    }

    async fn delete(&self, session: SessionId, token: &ChallengeToken) -> Result<()> {
        match self {
            Self::Memory(store) => store.delete(session, token).await,
            Self::Redis(store) => store.delete(session, token).await,
        }
    }

    async fn bind_hub_ref(
        &self,
        hub_ref: &str,
        session: SessionId,
        token: &ChallengeToken,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<HubRefBinding>> {
        match self {
            Self::Memory(store) => store.bind_hub_ref(hub_ref, session, token, expires_at).await,
            Self::Redis(store) => store.bind_hub_ref(hub_ref, session, token, expires_at).await,
        }
    }
}
