//! In-process challenge store.
//!
//! Records live in a [`DashMap`] keyed by `(SessionId, ChallengeToken)`. Each
//! entry keeps the revision and expiry in the clear next to the sealed blob,
//! so compare-and-swap and expiry checks never need to decrypt. Hub reference
//! bindings live in a second map keyed by the hub's reference.
//!
//! Suitable for a single bridge instance; use
//! [`super::RedisChallengeStore`] when several instances share traffic.

use crate::codec::TokenCodec;
use crate::error::{IdpError, Result};
use crate::providers::{ChallengeStore, HubRefBinding};
use crate::state::{Challenge, ChallengeToken, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use idp_bridge_core::environment::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

type Key = (SessionId, ChallengeToken);

#[derive(Debug, Clone)]
struct Entry {
    revision: u64,
    expires_at: DateTime<Utc>,
    sealed: String,
}

#[derive(Debug, Clone)]
struct Bound {
    binding: HubRefBinding,
    expires_at: DateTime<Utc>,
}

/// `DashMap`-backed challenge store.
///
/// Clones share the same map.
#[derive(Clone)]
pub struct InMemoryChallengeStore {
    entries: Arc<DashMap<Key, Entry>>,
    hub_refs: Arc<DashMap<String, Bound>>,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for InMemoryChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryChallengeStore")
            .field("entries", &self.entries.len())
            .field("hub_refs", &self.hub_refs.len())
            .finish_non_exhaustive()
    }
}

impl InMemoryChallengeStore {
    /// Create an empty store sealing records with `codec`.
    #[must_use]
    pub fn new(codec: TokenCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            hub_refs: Arc::new(DashMap::new()),
            codec,
            clock,
        }
    }

    fn entry_for(&self, challenge: &Challenge) -> Result<Entry> {
        Ok(Entry {
            revision: challenge.revision,
            expires_at: challenge.expires_at,
            sealed: self.codec.seal(challenge)?,
        })
    }

    /// Number of records currently held, expired or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every record and hub reference binding past its expiry. Returns
    /// how many records were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.hub_refs.retain(|_, bound| bound.expires_at > now);
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, "Purged expired challenges");
        }
        removed
    }

    /// Run [`Self::purge_expired`] every `every` until the handle is aborted.
    #[must_use]
    pub fn spawn_purge_task(&self, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.purge_expired();
            }
        })
    }
}

impl ChallengeStore for InMemoryChallengeStore {
    async fn put(&self, session: SessionId, challenge: &Challenge) -> Result<()> {
        let entry = self.entry_for(challenge)?;
        self.entries
            .insert((session, challenge.token.clone()), entry);

        tracing::debug!(
            session = %session,
            token = challenge.token.prefix(),
            state = challenge.state.as_str(),
            "Stored challenge"
        );
        Ok(())
    }

    async fn get(&self, session: SessionId, token: &ChallengeToken) -> Result<Challenge> {
        let key = (session, token.clone());
        let now = self.clock.now();

        // Copy out and release the shard lock before any removal.
        let found = self
            .entries
            .get(&key)
            .map(|entry| (entry.expires_at > now, entry.sealed.clone()));

        let sealed = match found {
            Some((true, sealed)) => sealed,
            Some((false, _)) => {
                self.entries.remove_if(&key, |_, entry| entry.expires_at <= now);
                return Err(IdpError::NotFound);
            }
            None => return Err(IdpError::NotFound),
        };

        let challenge = self.codec.open(&sealed)?;
        if challenge.token != *token {
            tracing::error!(session = %session, "Stored challenge does not match its key");
            return Err(IdpError::Invalid);
        }
        Ok(challenge)
    }

    async fn swap(
        &self,
        session: SessionId,
        expected_revision: u64,
        challenge: &Challenge,
    ) -> Result<bool> {
        let replacement = self.entry_for(challenge)?;
        let now = self.clock.now();

        // The shard write lock is held for the whole compare-and-set.
        let Some(mut entry) = self.entries.get_mut(&(session, challenge.token.clone())) else {
            return Ok(false);
        };
        if entry.revision != expected_revision || entry.expires_at <= now {
            return Ok(false);
        }
        *entry = replacement;
        Ok(true)
    }

    async fn delete(&self, session: SessionId, token: &ChallengeToken) -> Result<()> {
        self.entries.remove(&(session, token.clone()));
        Ok(())
    }

    async fn bind_hub_ref(
        &self,
        hub_ref: &str,
        session: SessionId,
        token: &ChallengeToken,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<HubRefBinding>> {
        let now = self.clock.now();
        let bound = Bound {
            binding: HubRefBinding {
                session,
                token: token.clone(),
            },
            expires_at,
        };

        // The shard write lock is held from lookup to insert.
        match self.hub_refs.entry(hub_ref.to_string()) {
            MapEntry::Occupied(mut held) if held.get().expires_at <= now => {
                held.insert(bound);
                Ok(None)
            }
            MapEntry::Occupied(held) => Ok(Some(held.get().binding.clone())),
            MapEntry::Vacant(slot) => {
                slot.insert(bound);
                Ok(None)
            }
        }
    }
}
