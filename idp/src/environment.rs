//! Bridge environment.
//!
//! This module defines the environment type for dependency injection into
//! [`crate::machine::ChallengeMachine`].

use crate::codec::TokenCodec;
use crate::config::ChallengeConfig;
use crate::providers::{AuthenticationDelegate, ChallengeStore, HubClient};
use idp_bridge_core::environment::Clock;
use std::sync::Arc;

/// Everything the challenge machine talks to.
///
/// # Type Parameters
///
/// - `H`: Hub client
/// - `S`: Challenge store
/// - `A`: Authentication delegate
#[derive(Clone)]
pub struct IdpEnvironment<H, S, A>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    /// Authorization hub (Hydra in production).
    pub hub: H,

    /// Challenge store (in-memory or `Redis`).
    pub store: S,

    /// Authentication delegate.
    pub authenticator: A,

    /// Signs browser tokens.
    pub codec: TokenCodec,

    /// Time source for every expiry decision.
    pub clock: Arc<dyn Clock>,

    /// Lifecycle settings.
    pub config: ChallengeConfig,
}

impl<H, S, A> IdpEnvironment<H, S, A>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    /// Create a new environment with default [`ChallengeConfig`].
    #[must_use]
    pub fn new(hub: H, store: S, authenticator: A, codec: TokenCodec, clock: Arc<dyn Clock>) -> Self {
        Self {
            hub,
            store,
            authenticator,
            codec,
            clock,
            config: ChallengeConfig::default(),
        }
    }

    /// Replace the lifecycle settings.
    #[must_use]
    pub fn with_config(mut self, config: ChallengeConfig) -> Self {
        self.config = config;
        self
    }
}
