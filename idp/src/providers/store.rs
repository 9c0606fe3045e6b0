//! Challenge storage trait.
//!
//! Stores challenge records scoped to a browser session, with optimistic
//! concurrency on the record's `revision`.
//!
//! # Security
//!
//! Records must be:
//! - **Session-scoped**: keyed by `(SessionId, ChallengeToken)`, so a token
//!   presented from another browser is simply not found
//! - **Sealed**: stored only as [`crate::codec::TokenCodec::seal`] output
//! - **Ephemeral**: absent once `expires_at` has passed, whether or not the
//!   backend has physically removed them yet
//!
//! A hub reference is bound to the first challenge that registered it, so the
//! same hub request can never be resolved through two challenges.
//!
//! # Example
//!
//! ```ignore
//! let current = store.get(session, &token).await?;
//! let next = lifecycle::apply(&current, event, now)?;
//! if !store.swap(session, current.revision, &next).await? {
//!     // Someone else moved the challenge first.
//! }
//! ```

use crate::error::Result;
use crate::state::{Challenge, ChallengeToken, SessionId};
use chrono::{DateTime, Utc};

/// The challenge a hub reference is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubRefBinding {
    /// Browser session that began the challenge.
    pub session: SessionId,
    /// The bound challenge.
    pub token: ChallengeToken,
}

/// Session-scoped challenge persistence.
///
/// # Implementation Notes
///
/// **Production** (`Redis`):
/// ```ignore
/// // put:  HSET key rev <n> blob <sealed>; PEXPIREAT key <expires_at>
/// // swap: Lua script comparing `rev` before HSET
/// // bind: Lua script, GET or SET + PEXPIREAT on the hub reference key
/// ```
///
/// **In-process** (`DashMap`): the swap runs under the entry's shard lock.
pub trait ChallengeStore: Send + Sync {
    /// Insert or overwrite the record for `challenge.token`.
    ///
    /// # Errors
    ///
    /// Returns error if sealing or the backend fails.
    fn put(
        &self,
        session: SessionId,
        challenge: &Challenge,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Load a live record.
    ///
    /// # Errors
    ///
    /// - [`crate::IdpError::NotFound`] if there is no record for this session
    ///   and token, or it has passed `expires_at`
    /// - [`crate::IdpError::Invalid`] if the stored blob fails to open
    fn get(
        &self,
        session: SessionId,
        token: &ChallengeToken,
    ) -> impl std::future::Future<Output = Result<Challenge>> + Send;

    /// Replace the record only if its stored revision is `expected_revision`.
    ///
    /// Returns `false` (and changes nothing) if the record is missing or was
    /// modified since it was read. Of any number of concurrent swaps from the
    /// same revision, at most one returns `true`.
    ///
    /// # Errors
    ///
    /// Returns error only on sealing or backend failures.
    fn swap(
        &self,
        session: SessionId,
        expected_revision: u64,
        challenge: &Challenge,
    ) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Remove the record. Missing records are not an error.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn delete(
        &self,
        session: SessionId,
        token: &ChallengeToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Bind `hub_ref` to `(session, token)` unless it is already bound.
    ///
    /// Returns `None` when this call made the binding, or the existing
    /// binding otherwise. Of any number of concurrent calls for one
    /// `hub_ref`, at most one returns `None`. A binding outlives the deletion
    /// of its record and lapses at `expires_at`.
    ///
    /// # Errors
    ///
    /// Returns error if the backend fails.
    fn bind_hub_ref(
        &self,
        hub_ref: &str,
        session: SessionId,
        token: &ChallengeToken,
        expires_at: DateTime<Utc>,
    ) -> impl std::future::Future<Output = Result<Option<HubRefBinding>>> + Send;
}
