//! Redis-based challenge store implementation.
//!
//! # Architecture
//!
//! Challenges are stored in Redis as hashes:
//! - **Key**: `idp_challenge:{session_id}:{token}`
//! - **Fields**: `rev` (revision, in the clear) and `blob` (sealed record)
//! - **Expiry**: `PEXPIREAT` at the challenge's `expires_at`
//!
//! Hub reference bindings are plain strings:
//! - **Key**: `idp_hub_ref:{hub_ref}`
//! - **Value**: `{session_id}:{token}`
//! - **Expiry**: `PEXPIREAT` at the bound challenge's `expires_at`
//!
//! # Concurrency
//!
//! `swap` is a Lua script that compares `rev` and writes the new fields in one
//! server-side step, so of any number of concurrent writers holding the same
//! revision exactly one succeeds. Binding a hub reference is a script too, so
//! only one of several concurrent registrations of the same reference wins.
//!
//! # Example
//!
//! ```no_run
//! use idp_bridge::codec::TokenCodec;
//! use idp_bridge::stores::RedisChallengeStore;
//! use idp_bridge_core::environment::SystemClock;
//! use std::sync::Arc;
//!
//! # async fn example() -> idp_bridge::Result<()> {
//! let codec = TokenCodec::new(b"0123456789abcdef0123456789abcdef")?;
//! let store = RedisChallengeStore::new("redis://127.0.0.1:6379", codec, Arc::new(SystemClock)).await?;
//! # Ok(())
//! # }
//! ```

use crate::codec::TokenCodec;
use crate::error::{IdpError, Result};
use crate::providers::{ChallengeStore, HubRefBinding};
use crate::state::{Challenge, ChallengeToken, SessionId};
use chrono::{DateTime, Utc};
use idp_bridge_core::environment::Clock;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::sync::Arc;

const SWAP_SCRIPT: &str = r"
local rev = redis.call('HGET', KEYS[1], 'rev')
if not rev or rev ~= ARGV[1] then
  return 0
end
redis.call('HSET', KEYS[1], 'rev', ARGV[2], 'blob', ARGV[3])
redis.call('PEXPIREAT', KEYS[1], ARGV[4])
return 1
";

const BIND_SCRIPT: &str = r"
local held = redis.call('GET', KEYS[1])
if held then
  return held
end
redis.call('SET', KEYS[1], ARGV[1])
redis.call('PEXPIREAT', KEYS[1], ARGV[2])
return false
";

/// `Redis`-backed challenge store.
///
/// Provides:
/// - Session isolation (records keyed by session and token)
/// - Optimistic concurrency via a compare-and-set script
/// - Automatic expiry via `PEXPIREAT`
/// - Connection pooling via `ConnectionManager`
#[derive(Clone)]
pub struct RedisChallengeStore {
    /// Connection manager for connection pooling.
    conn_manager: ConnectionManager,
    codec: TokenCodec,
    clock: Arc<dyn Clock>,
    swap_script: Arc<Script>,
    bind_script: Arc<Script>,
}

impl std::fmt::Debug for RedisChallengeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisChallengeStore").finish_non_exhaustive()
    }
}

impl RedisChallengeStore {
    /// Create a new `Redis` challenge store.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - `Redis` connection URL (e.g., "<redis://127.0.0.1:6379>")
    /// * `codec` - seals records before they leave the process
    /// * `clock` - used for the read-side expiry double-check
    ///
    /// # Errors
    ///
    /// Returns error if connection to `Redis` fails.
    pub async fn new(redis_url: &str, codec: TokenCodec, clock: Arc<dyn Clock>) -> Result<Self> {
        let client = Client::open(redis_url).map_err(|e| {
            IdpError::Configuration(format!("Failed to create Redis client: {e}"))
        })?;

        let conn_manager = ConnectionManager::new(client).await.map_err(|e| {
            IdpError::Internal(format!("Failed to create Redis connection manager: {e}"))
        })?;

        Ok(Self {
            conn_manager,
            codec,
            clock,
            swap_script: Arc::new(Script::new(SWAP_SCRIPT)),
            bind_script: Arc::new(Script::new(BIND_SCRIPT)),
        })
    }

    /// Get the `Redis` key for a challenge.
    fn challenge_key(session: SessionId, token: &ChallengeToken) -> String {
        format!("idp_challenge:{}:{}", session.0, token.as_str())
    }

    fn hub_ref_key(hub_ref: &str) -> String {
        format!("idp_hub_ref:{hub_ref}")
    }

    fn parse_binding(value: &str) -> Result<HubRefBinding> {
        let (session, token) = value
            .split_once(':')
            .ok_or_else(|| IdpError::Internal("Malformed hub reference binding".to_string()))?;
        let session = uuid::Uuid::parse_str(session).map_err(|e| {
            IdpError::Internal(format!("Malformed session in hub reference binding: {e}"))
        })?;
        Ok(HubRefBinding {
            session: SessionId(session),
            token: ChallengeToken::from_verified(token.to_string()),
        })
    }
}

impl ChallengeStore for RedisChallengeStore {
    async fn put(&self, session: SessionId, challenge: &Challenge) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::challenge_key(session, &challenge.token);
        let sealed = self.codec.seal(challenge)?;

        let () = redis::pipe()
            .atomic()
            .cmd("HSET")
            .arg(&key)
            .arg("rev")
            .arg(challenge.revision)
            .arg("blob")
            .arg(sealed)
            .ignore()
            .cmd("PEXPIREAT")
            .arg(&key)
            .arg(challenge.expires_at.timestamp_millis())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| IdpError::Internal(format!("Failed to store challenge: {e}")))?;

        tracing::debug!(
            session = %session,
            token = challenge.token.prefix(),
            state = challenge.state.as_str(),
            "Stored challenge in Redis"
        );
        Ok(())
    }

    async fn get(&self, session: SessionId, token: &ChallengeToken) -> Result<Challenge> {
        let mut conn = self.conn_manager.clone();
        let key = Self::challenge_key(session, token);

        let sealed: Option<String> = conn
            .hget(&key, "blob")
            .await
            .map_err(|e| IdpError::Internal(format!("Failed to load challenge: {e}")))?;
        let Some(sealed) = sealed else {
            return Err(IdpError::NotFound);
        };

        let challenge = self.codec.open(&sealed)?;
        if challenge.token != *token {
            tracing::error!(session = %session, "Stored challenge does not match its key");
            return Err(IdpError::Invalid);
        }

        // Double-check: key expiry is driven by the Redis server's clock.
        if challenge.is_expired_at(self.clock.now()) {
            let _: () = conn.del(&key).await.map_err(|e| {
                IdpError::Internal(format!("Failed to delete expired challenge: {e}"))
            })?;
            return Err(IdpError::NotFound);
        }

        Ok(challenge)
    }

    async fn swap(
        &self,
        session: SessionId,
        expected_revision: u64,
        challenge: &Challenge,
    ) -> Result<bool> {
        let mut conn = self.conn_manager.clone();
        let key = Self::challenge_key(session, &challenge.token);
        let sealed = self.codec.seal(challenge)?;

        let swapped: i64 = self
            .swap_script
            .key(&key)
            .arg(expected_revision)
            .arg(challenge.revision)
            .arg(sealed)
            .arg(challenge.expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| IdpError::Internal(format!("Failed to swap challenge: {e}")))?;

        Ok(swapped == 1)
    }

    async fn delete(&self, session: SessionId, token: &ChallengeToken) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        let key = Self::challenge_key(session, token);

        let _: () = conn.del(&key).await.map_err(|e| {
            IdpError::Internal(format!("Failed to delete challenge from Redis: {e}"))
        })?;

        tracing::debug!(session = %session, token = token.prefix(), "Deleted challenge from Redis");
        Ok(())
    }

    async fn bind_hub_ref(
        &self,
        hub_ref: &str,
        session: SessionId,
        token: &ChallengeToken,
        expires_at: DateTime<Utc>,
    ) -> Result<Option<HubRefBinding>> {
        let mut conn = self.conn_manager.clone();

        let held: Option<String> = self
            .bind_script
            .key(Self::hub_ref_key(hub_ref))
            .arg(format!("{}:{}", session.0, token.as_str()))
            .arg(expires_at.timestamp_millis())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| IdpError::Internal(format!("Failed to bind hub reference: {e}")))?;

        held.as_deref().map(Self::parse_binding).transpose()
    }
}
