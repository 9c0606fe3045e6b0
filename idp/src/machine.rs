//! The challenge-consent state machine.
//!
//! [`ChallengeMachine`] owns every transition of a challenge. It loads records
//! through the codec and the store, computes the next state with
//! [`crate::lifecycle::apply`], persists it with a compare-and-swap, and talks
//! to the hub with bounded retries.
//!
//! # Load Path
//!
//! Every operation that takes a [`SignedToken`] goes through the same checks,
//! in order:
//!
//! 1. The blob's MAC ([`IdpError::Invalid`]) and embedded expiry
//!    ([`IdpError::Expired`])
//! 2. The session-scoped store lookup ([`IdpError::NotFound`])
//!
//! The blob carries the record's `expires_at`, so an expired challenge is
//! reported at step 1 and its record deleted. Stores treat expired records as
//! absent. Records left behind in a terminal state read as
//! [`IdpError::NotFound`].
//!
//! # Registration
//!
//! A hub reference belongs to the first challenge that registered it. Another
//! registration from the same browser gets that challenge's token back; one
//! from any other browser is refused. The binding outlives the challenge, so a
//! hub request is never resolved twice.
//!
//! # Resolution
//!
//! `resolve` first claims the challenge with a lease (a CAS write), so two
//! concurrent resolves cannot both report to the hub. If the hub stays
//! unreachable through every retry, the claim is released and the caller may
//! try again later; after `max_resolve_rounds` such rounds the challenge is
//! failed.

use crate::environment::IdpEnvironment;
use crate::error::{IdpError, Result};
use crate::lifecycle::{self, ChallengeEvent};
use crate::providers::{AuthenticationDelegate, ChallengeStore, HubClient, HubRefBinding};
use crate::state::{
    Challenge, ChallengeState, ChallengeToken, ConsentPrompt, Decision, RawRequest, SessionId,
    SignedToken, Validity,
};
use chrono::{DateTime, Utc};
use idp_bridge_runtime::deadline::with_deadline;
use idp_bridge_runtime::retry::retry_with_predicate;
use std::future::Future;

/// Challenge-consent protocol core.
///
/// # Example
///
/// ```
/// use idp_bridge::codec::TokenCodec;
/// use idp_bridge::environment::IdpEnvironment;
/// use idp_bridge::machine::ChallengeMachine;
/// use idp_bridge::mocks::{MockAuthenticator, MockHubClient};
/// use idp_bridge::stores::InMemoryChallengeStore;
/// use idp_bridge::{Decision, RawRequest, SessionId};
/// use idp_bridge_core::environment::SystemClock;
/// use std::sync::Arc;
///
/// # async fn example() -> idp_bridge::Result<()> {
/// let codec = TokenCodec::new(b"0123456789abcdef0123456789abcdef")?;
/// let clock = Arc::new(SystemClock);
/// let machine = ChallengeMachine::new(IdpEnvironment::new(
///     MockHubClient::new("C", &["read"]),
///     InMemoryChallengeStore::new(codec.clone(), clock.clone()),
///     MockAuthenticator::accepting("alice"),
///     codec,
///     clock,
/// ));
///
/// let session = SessionId::new();
/// let request = RawRequest::default();
/// let token = machine.begin_challenge(session, &request).await?;
/// machine.authenticate(session, &token, &request).await?;
/// machine.record_consent(session, &token, Decision::Granted).await?;
/// let resolved = machine.resolve(session, &token).await?;
/// assert_eq!(resolved.state, idp_bridge::ChallengeState::Resolved);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ChallengeMachine<H, S, A>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    env: IdpEnvironment<H, S, A>,
}

impl<H, S, A> ChallengeMachine<H, S, A>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    /// Create a machine over `env`.
    #[must_use]
    pub const fn new(env: IdpEnvironment<H, S, A>) -> Self {
        Self { env }
    }

    /// The injected collaborators.
    #[must_use]
    pub const fn environment(&self) -> &IdpEnvironment<H, S, A> {
        &self.env
    }

    // ═══════════════════════════════════════════════════════════
    // Operations
    // ═══════════════════════════════════════════════════════════

    /// Register a challenge with the hub and store it as Pending.
    ///
    /// If the hub reference is already bound to a live challenge of this
    /// session, that challenge's token is returned instead.
    ///
    /// # Errors
    ///
    /// Hub errors surface as the hub client reported them, after retries
    /// for `HubUnreachable`. Store errors surface immediately. A hub reference
    /// already used up reads as `NotFound`; one held by another session's
    /// live challenge is `InvalidState`.
    pub async fn begin_challenge(&self, session: SessionId, request: &RawRequest) -> Result<SignedToken> {
        let now = self.env.clock.now();
        let validity = Validity::starting_at(now, self.env.config.ttl);

        let challenge = self
            .call_hub("register_challenge", || {
                self.env.hub.register_challenge(request, validity)
            })
            .await?;

        if challenge.state != ChallengeState::Pending {
            return Err(IdpError::Internal(format!(
                "hub client registered a challenge in state {:?}",
                challenge.state
            )));
        }

        if let Some(held) = self
            .env
            .store
            .bind_hub_ref(&challenge.hub_ref, session, &challenge.token, challenge.expires_at)
            .await?
        {
            return self.rejoin(session, &challenge.hub_ref, held).await;
        }

        self.env.store.put(session, &challenge).await?;
        let token = self.env.codec.encode_token(&challenge)?;

        metrics::counter!("idp_challenges_begun_total").increment(1);
        tracing::info!(
            session = %session,
            token = challenge.token.prefix(),
            hub_ref = %challenge.hub_ref,
            client = %challenge.client,
            "Challenge registered"
        );

        Ok(token)
    }

    /// Establish the user's identity through the authentication delegate.
    ///
    /// # Errors
    ///
    /// - Load errors (`Invalid`, `Expired`, `NotFound`)
    /// - `InvalidState` unless the challenge is Pending
    /// - `AuthenticationFailed`: state unchanged, the user may retry
    /// - `IdentityRejected`: the challenge is failed and deleted
    pub async fn authenticate(
        &self,
        session: SessionId,
        blob: &SignedToken,
        request: &RawRequest,
    ) -> Result<Challenge> {
        let now = self.env.clock.now();
        let challenge = self.load(session, blob, now).await?;

        if challenge.state != ChallengeState::Pending {
            return Err(IdpError::InvalidState {
                state: challenge.state,
                operation: "authenticate",
            });
        }

        match self.env.authenticator.authenticate(request).await {
            Ok(identity) => {
                let next = self
                    .transition(
                        session,
                        &challenge,
                        ChallengeEvent::Authenticated {
                            user: identity.subject,
                        },
                        now,
                    )
                    .await?;
                tracing::info!(
                    session = %session,
                    token = next.token.prefix(),
                    user = next.user.as_deref().unwrap_or_default(),
                    "Challenge authenticated"
                );
                Ok(next)
            }
            Err(IdpError::IdentityRejected(reason)) => {
                let failed = self
                    .transition(session, &challenge, ChallengeEvent::IdentityRejected, now)
                    .await?;
                self.discard(session, &failed.token, "identity_rejected").await;
                Err(IdpError::IdentityRejected(reason))
            }
            Err(err) => {
                tracing::debug!(
                    session = %session,
                    token = challenge.token.prefix(),
                    error = %err,
                    "Authentication did not complete"
                );
                Err(err)
            }
        }
    }

    /// What to ask the user.
    ///
    /// # Errors
    ///
    /// Load errors, or `InvalidState` unless the challenge is Authenticated.
    pub async fn consent_prompt(&self, session: SessionId, blob: &SignedToken) -> Result<ConsentPrompt> {
        let challenge = self.load(session, blob, self.env.clock.now()).await?;
        if challenge.state != ChallengeState::Authenticated {
            return Err(IdpError::InvalidState {
                state: challenge.state,
                operation: "consent_prompt",
            });
        }
        Ok(challenge.prompt())
    }

    /// Record the user's consent answer.
    ///
    /// # Errors
    ///
    /// Load errors, or `InvalidState` unless the challenge is Authenticated
    /// and undecided. Of two concurrent calls at most one succeeds.
    pub async fn record_consent(
        &self,
        session: SessionId,
        blob: &SignedToken,
        decision: Decision,
    ) -> Result<Challenge> {
        let now = self.env.clock.now();
        let challenge = self.load(session, blob, now).await?;
        let next = self
            .transition(session, &challenge, ChallengeEvent::ConsentRecorded(decision), now)
            .await?;

        tracing::info!(
            session = %session,
            token = next.token.prefix(),
            decision = decision.as_str(),
            "Consent recorded"
        );
        Ok(next)
    }

    /// Report the recorded decision to the hub.
    ///
    /// Returns the Resolved snapshot; its `return_to` says where the browser
    /// goes next. The record is deleted.
    ///
    /// # Errors
    ///
    /// - Load errors; a second resolve of a resolved challenge is `NotFound`
    /// - `InvalidState` unless Decided, or while another resolve holds the claim
    /// - `HubUnreachable` after retries: the challenge stays Decided, or is
    ///   failed and deleted once `max_resolve_rounds` is reached
    /// - `HubRejected`: the challenge is failed and deleted
    pub async fn resolve(&self, session: SessionId, blob: &SignedToken) -> Result<Challenge> {
        let now = self.env.clock.now();
        let challenge = self.load(session, blob, now).await?;

        let claimed = self
            .transition(
                session,
                &challenge,
                ChallengeEvent::ResolutionStarted {
                    lease: self.env.config.resolve_lease,
                },
                now,
            )
            .await?;

        let Some(resolution) = claimed.resolution() else {
            self.release(session, &claimed, now).await;
            return Err(IdpError::Internal(
                "decided challenge carries no reportable decision".to_string(),
            ));
        };

        let outcome = self
            .call_hub("resolve", || self.env.hub.resolve(&claimed, &resolution))
            .await;

        match outcome {
            Ok(()) => {
                // The hub has accepted. Store trouble is logged, not returned.
                let resolved = lifecycle::apply(&claimed, ChallengeEvent::Resolved, now)?;
                match self.env.store.swap(session, claimed.revision, &resolved).await {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!(
                        session = %session,
                        token = claimed.token.prefix(),
                        "Resolve claim was lost while the hub call was in flight"
                    ),
                    Err(err) => tracing::warn!(
                        session = %session,
                        token = claimed.token.prefix(),
                        error = %err,
                        "Failed to record resolution, deleting the record"
                    ),
                }
                self.delete_quietly(session, &resolved.token).await;

                let decision = resolution.decision();
                metrics::counter!("idp_challenges_resolved_total", "decision" => decision.as_str())
                    .increment(1);
                tracing::info!(
                    session = %session,
                    token = resolved.token.prefix(),
                    hub_ref = %resolved.hub_ref,
                    decision = decision.as_str(),
                    "Challenge resolved"
                );
                Ok(resolved)
            }
            Err(err @ IdpError::HubRejected(_)) => {
                self.fail(session, &claimed, ChallengeEvent::ResolutionRejected, now, "hub_rejected")
                    .await;
                Err(err)
            }
            Err(err) if err.is_retryable() => {
                let rounds = claimed.resolve_rounds.saturating_add(1);
                if rounds >= self.env.config.max_resolve_rounds {
                    self.fail(session, &claimed, ChallengeEvent::ResolutionAbandoned, now, "hub_unreachable")
                        .await;
                } else {
                    self.release(session, &claimed, now).await;
                }
                Err(err)
            }
            Err(err) => {
                self.release(session, &claimed, now).await;
                Err(err)
            }
        }
    }

    /// Release the hub client's resources. Idempotent.
    pub async fn close(&self) {
        self.env.hub.close().await;
    }

    // ═══════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════

    async fn load(&self, session: SessionId, blob: &SignedToken, now: DateTime<Utc>) -> Result<Challenge> {
        let (token, expires_at) = self.env.codec.verify_token(blob)?;
        if expires_at <= now {
            self.discard(session, &token, "expired").await;
            return Err(IdpError::Expired);
        }

        let challenge = self.env.store.get(session, &token).await?;
        if challenge.state.is_terminal() {
            self.delete_quietly(session, &token).await;
            return Err(IdpError::NotFound);
        }

        Ok(challenge)
    }

    /// Answer a registration whose hub reference is already bound.
    async fn rejoin(
        &self,
        session: SessionId,
        hub_ref: &str,
        held: HubRefBinding,
    ) -> Result<SignedToken> {
        let existing = match self.env.store.get(held.session, &held.token).await {
            Ok(existing) if !existing.state.is_terminal() => existing,
            Ok(_) | Err(IdpError::NotFound) => {
                tracing::info!(session = %session, hub_ref, "Hub reference already used");
                return Err(IdpError::NotFound);
            }
            Err(err) => return Err(err),
        };

        if held.session != session {
            tracing::warn!(
                session = %session,
                hub_ref,
                token = held.token.prefix(),
                "Hub reference is bound to another session"
            );
            return Err(IdpError::InvalidState {
                state: existing.state,
                operation: "begin_challenge",
            });
        }

        tracing::debug!(
            session = %session,
            hub_ref,
            token = held.token.prefix(),
            "Registration rejoined a live challenge"
        );
        self.env.codec.encode_token(&existing)
    }

    /// Apply `event` and persist the result, or explain why it lost the race.
    async fn transition(
        &self,
        session: SessionId,
        current: &Challenge,
        event: ChallengeEvent,
        now: DateTime<Utc>,
    ) -> Result<Challenge> {
        let operation = event.operation();
        let next = lifecycle::apply(current, event, now)?;

        if self.env.store.swap(session, current.revision, &next).await? {
            return Ok(next);
        }

        tracing::debug!(
            session = %session,
            token = current.token.prefix(),
            operation,
            "Concurrent update won the race"
        );
        match self.env.store.get(session, &current.token).await {
            Ok(latest) => Err(IdpError::InvalidState {
                state: latest.state,
                operation,
            }),
            Err(err) => Err(err),
        }
    }

    /// Give back a resolve claim after an unreachable hub.
    async fn release(&self, session: SessionId, claimed: &Challenge, now: DateTime<Utc>) {
        if let Err(err) = self
            .transition(session, claimed, ChallengeEvent::ResolutionDeferred, now)
            .await
        {
            tracing::warn!(
                session = %session,
                token = claimed.token.prefix(),
                error = %err,
                "Failed to release resolve claim"
            );
        } else {
            tracing::warn!(
                session = %session,
                token = claimed.token.prefix(),
                rounds = claimed.resolve_rounds.saturating_add(1),
                "Hub unreachable, resolution deferred"
            );
        }
    }

    /// Move a claimed challenge to Failed and delete it.
    async fn fail(
        &self,
        session: SessionId,
        claimed: &Challenge,
        event: ChallengeEvent,
        now: DateTime<Utc>,
        reason: &'static str,
    ) {
        if let Err(err) = self.transition(session, claimed, event, now).await {
            tracing::warn!(
                session = %session,
                token = claimed.token.prefix(),
                error = %err,
                "Failed to record challenge failure"
            );
        }
        self.discard(session, &claimed.token, reason).await;
    }

    /// Delete a record that ended badly, counting why.
    async fn discard(&self, session: SessionId, token: &ChallengeToken, reason: &'static str) {
        metrics::counter!("idp_challenges_failed_total", "reason" => reason).increment(1);
        tracing::info!(
            session = %session,
            token = token.prefix(),
            reason,
            "Challenge discarded"
        );
        self.delete_quietly(session, token).await;
    }

    async fn delete_quietly(&self, session: SessionId, token: &ChallengeToken) {
        if let Err(err) = self.env.store.delete(session, token).await {
            tracing::warn!(
                session = %session,
                token = token.prefix(),
                error = %err,
                "Failed to delete challenge record"
            );
        }
    }

    /// Run a hub call under the per-attempt deadline, retrying while the hub
    /// is unreachable.
    async fn call_hub<T, F, Fut>(&self, what: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.env.config.hub_timeout;
        retry_with_predicate(
            self.env.config.retry.clone(),
            || {
                let attempt = call();
                async move {
                    with_deadline(limit, attempt).await.unwrap_or_else(|elapsed| {
                        Err(IdpError::HubUnreachable(format!("{what}: {elapsed}")))
                    })
                }
            },
            IdpError::is_retryable,
        )
        .await
    }
}
