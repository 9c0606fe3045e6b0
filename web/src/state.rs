//! Application state for Axum handlers.

use crate::presentation::ConsentPresenter;
use crate::session::SessionKeys;
use axum::extract::FromRef;
use idp_bridge::ChallengeMachine;
use idp_bridge::providers::{AuthenticationDelegate, ChallengeStore, HubClient};
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Generic over the machine's collaborators so tests can run the router
/// against mocks.
pub struct AppState<H, S, A>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    /// The challenge-consent state machine.
    pub machine: Arc<ChallengeMachine<H, S, A>>,
    /// Page rendering and answer parsing.
    pub presenter: Arc<dyn ConsentPresenter>,
    /// Session cookie signing.
    pub sessions: SessionKeys,
}

impl<H, S, A> AppState<H, S, A>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    /// Create a new application state.
    #[must_use]
    pub fn new(
        machine: ChallengeMachine<H, S, A>,
        presenter: Arc<dyn ConsentPresenter>,
        sessions: SessionKeys,
    ) -> Self {
        Self {
            machine: Arc::new(machine),
            presenter,
            sessions,
        }
    }
}

// Manual impl: the collaborators themselves need not be `Clone`.
impl<H, S, A> Clone for AppState<H, S, A>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    fn clone(&self) -> Self {
        Self {
            machine: Arc::clone(&self.machine),
            presenter: Arc::clone(&self.presenter),
            sessions: self.sessions.clone(),
        }
    }
}

impl<H, S, A> FromRef<AppState<H, S, A>> for SessionKeys
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    fn from_ref(state: &AppState<H, S, A>) -> Self {
        state.sessions.clone()
    }
}
