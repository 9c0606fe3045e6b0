//! Challenge lifecycle transitions.
//!
//! [`apply`] is a pure function from (challenge, event, now) to the next
//! challenge. It performs no I/O; the machine persists whatever it returns
//! through the store's compare-and-swap.
//!
//! ```text
//! Pending --Authenticated--> Authenticated --ConsentRecorded--> Decided
//! Pending --IdentityRejected--> Failed
//! Decided --ResolutionStarted/Deferred--> Decided (lease taken/released)
//! Decided --Resolved--> Resolved
//! Decided --ResolutionRejected/Abandoned--> Failed
//! any non-terminal --Expired--> Expired
//! ```

use crate::error::{IdpError, Result};
use crate::state::{Challenge, ChallengeState, Decision};
use chrono::{DateTime, Duration, Utc};

/// Something that happened to a challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeEvent {
    /// The authentication delegate established an identity.
    Authenticated {
        /// The authenticated user.
        user: String,
    },
    /// The delegate permanently refused the identity.
    IdentityRejected,
    /// The user answered the consent prompt.
    ConsentRecorded(Decision),
    /// A resolve claimed the challenge; `lease` bounds how long the claim holds.
    ResolutionStarted {
        /// How long the claim stays exclusive.
        lease: Duration,
    },
    /// The resolve gave up with the hub unreachable and released its claim.
    ResolutionDeferred,
    /// The hub accepted the decision.
    Resolved,
    /// The hub refused the decision.
    ResolutionRejected,
    /// Too many resolve rounds ended with the hub unreachable.
    ResolutionAbandoned,
    /// The validity window closed.
    Expired,
}

impl ChallengeEvent {
    /// The operation name reported in [`IdpError::InvalidState`].
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticate",
            Self::IdentityRejected => "reject_identity",
            Self::ConsentRecorded(_) => "record_consent",
            Self::ResolutionStarted { .. } => "resolve",
            Self::ResolutionDeferred => "defer_resolution",
            Self::Resolved => "complete_resolution",
            Self::ResolutionRejected => "reject_resolution",
            Self::ResolutionAbandoned => "abandon_resolution",
            Self::Expired => "expire",
        }
    }
}

/// Compute the challenge that results from `event` at `now`.
///
/// The input is never modified. Every successful transition bumps
/// `revision`.
///
/// # Errors
///
/// - [`IdpError::Expired`] if the challenge is past its window (for every
///   event except [`ChallengeEvent::Expired`])
/// - [`IdpError::InvalidState`] if the event is not legal in the current state,
///   including a second consent answer and a resolve while another resolve
///   holds an unexpired lease
pub fn apply(challenge: &Challenge, event: ChallengeEvent, now: DateTime<Utc>) -> Result<Challenge> {
    use ChallengeState::{Authenticated, Decided, Pending};

    let invalid = |event: &ChallengeEvent| IdpError::InvalidState {
        state: challenge.state,
        operation: event.operation(),
    };

    if let ChallengeEvent::Expired = event {
        if challenge.state.is_terminal() {
            return Err(invalid(&event));
        }
        return Ok(transition(challenge, |next| {
            next.state = ChallengeState::Expired;
            next.resolving_since = None;
        }));
    }

    if challenge.state == ChallengeState::Expired || challenge.is_expired_at(now) {
        return Err(IdpError::Expired);
    }

    let next = match (&event, challenge.state) {
        (ChallengeEvent::Authenticated { user }, Pending) => transition(challenge, |next| {
            next.user = Some(user.clone());
            next.state = Authenticated;
        }),

        (ChallengeEvent::IdentityRejected, Pending) => transition(challenge, |next| {
            next.state = ChallengeState::Failed;
        }),

        (ChallengeEvent::ConsentRecorded(decision), Authenticated)
            if challenge.decision.is_none() =>
        {
            transition(challenge, |next| {
                next.decision = Some(*decision);
                next.state = Decided;
            })
        }

        (ChallengeEvent::ResolutionStarted { lease }, Decided)
            if !challenge.lease_held_at(now, *lease) =>
        {
            transition(challenge, |next| {
                next.resolving_since = Some(now);
            })
        }

        (ChallengeEvent::ResolutionDeferred, Decided) if challenge.resolving_since.is_some() => {
            transition(challenge, |next| {
                next.resolving_since = None;
                next.resolve_rounds = next.resolve_rounds.saturating_add(1);
            })
        }

        (ChallengeEvent::Resolved, Decided) if challenge.resolving_since.is_some() => {
            transition(challenge, |next| {
                next.resolving_since = None;
                next.state = ChallengeState::Resolved;
            })
        }

        (ChallengeEvent::ResolutionRejected | ChallengeEvent::ResolutionAbandoned, Decided) => {
            transition(challenge, |next| {
                next.resolving_since = None;
                next.state = ChallengeState::Failed;
            })
        }

        _ => return Err(invalid(&event)),
    };

    Ok(next)
}

fn transition(challenge: &Challenge, change: impl FnOnce(&mut Challenge)) -> Challenge {
    let mut next = challenge.clone();
    change(&mut next);
    next.revision = challenge.revision.wrapping_add(1);
    next
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::state::Validity;
    use idp_bridge_testing::test_clock;
    use idp_bridge_core::environment::Clock;

    fn now() -> DateTime<Utc> {
        test_clock().now()
    }

    fn pending() -> Challenge {
        Challenge::pending(
            "ref",
            "C",
            vec!["read".into()],
            Validity::starting_at(now(), Duration::minutes(10)),
        )
    }

    fn authenticated() -> Challenge {
        apply(
            &pending(),
            ChallengeEvent::Authenticated { user: "alice".into() },
            now(),
        )
        .unwrap()
    }

    fn decided(decision: Decision) -> Challenge {
        apply(&authenticated(), ChallengeEvent::ConsentRecorded(decision), now()).unwrap()
    }

    fn started(decision: Decision) -> Challenge {
        apply(
            &decided(decision),
            ChallengeEvent::ResolutionStarted { lease: Duration::seconds(30) },
            now(),
        )
        .unwrap()
    }

    #[test]
    fn happy_path_bumps_revision_each_step() {
        let challenge = pending();
        assert_eq!(challenge.revision, 0);

        let challenge = authenticated();
        assert_eq!(challenge.state, ChallengeState::Authenticated);
        assert_eq!(challenge.user.as_deref(), Some("alice"));
        assert_eq!(challenge.revision, 1);

        let challenge = started(Decision::Granted);
        assert_eq!(challenge.state, ChallengeState::Decided);
        assert_eq!(challenge.revision, 3);

        let challenge = apply(&challenge, ChallengeEvent::Resolved, now()).unwrap();
        assert_eq!(challenge.state, ChallengeState::Resolved);
        assert_eq!(challenge.resolving_since, None);
        assert_eq!(challenge.revision, 4);
    }

    #[test]
    fn consent_before_authentication_is_invalid_state() {
        let err = apply(
            &pending(),
            ChallengeEvent::ConsentRecorded(Decision::Granted),
            now(),
        )
        .unwrap_err();

        assert_eq!(
            err,
            IdpError::InvalidState {
                state: ChallengeState::Pending,
                operation: "record_consent",
            }
        );
    }

    #[test]
    fn second_consent_is_rejected_not_overwritten() {
        let challenge = decided(Decision::Granted);
        let err = apply(&challenge, ChallengeEvent::ConsentRecorded(Decision::Denied), now())
            .unwrap_err();

        assert!(matches!(err, IdpError::InvalidState { state: ChallengeState::Decided, .. }));
        assert_eq!(challenge.decision, Some(Decision::Granted));
    }

    #[test]
    fn identity_rejection_fails_pending_challenge() {
        let failed = apply(&pending(), ChallengeEvent::IdentityRejected, now()).unwrap();
        assert_eq!(failed.state, ChallengeState::Failed);
        assert!(apply(&failed, ChallengeEvent::Authenticated { user: "a".into() }, now()).is_err());
    }

    #[test]
    fn lease_blocks_concurrent_resolution() {
        let challenge = started(Decision::Granted);
        let lease = Duration::seconds(30);

        let err = apply(&challenge, ChallengeEvent::ResolutionStarted { lease }, now()).unwrap_err();
        assert!(matches!(err, IdpError::InvalidState { operation: "resolve", .. }));

        // An abandoned lease can be taken over once it lapses.
        let later = now() + Duration::seconds(31);
        let retaken = apply(&challenge, ChallengeEvent::ResolutionStarted { lease }, later).unwrap();
        assert_eq!(retaken.resolving_since, Some(later));
    }

    #[test]
    fn deferral_releases_lease_and_counts_round() {
        let deferred = apply(&started(Decision::Denied), ChallengeEvent::ResolutionDeferred, now())
            .unwrap();

        assert_eq!(deferred.state, ChallengeState::Decided);
        assert_eq!(deferred.resolving_since, None);
        assert_eq!(deferred.resolve_rounds, 1);
    }

    #[test]
    fn resolved_requires_a_claim() {
        let err = apply(&decided(Decision::Granted), ChallengeEvent::Resolved, now()).unwrap_err();
        assert!(matches!(err, IdpError::InvalidState { .. }));
    }

    #[test]
    fn hub_rejection_fails_the_challenge() {
        let failed =
            apply(&started(Decision::Granted), ChallengeEvent::ResolutionRejected, now()).unwrap();
        assert_eq!(failed.state, ChallengeState::Failed);

        let abandoned =
            apply(&started(Decision::Granted), ChallengeEvent::ResolutionAbandoned, now()).unwrap();
        assert_eq!(abandoned.state, ChallengeState::Failed);
    }

    #[test]
    fn every_event_after_expiry_fails_expired() {
        let challenge = authenticated();
        let late = challenge.expires_at;

        for event in [
            ChallengeEvent::Authenticated { user: "bob".into() },
            ChallengeEvent::ConsentRecorded(Decision::Granted),
            ChallengeEvent::ResolutionStarted { lease: Duration::seconds(30) },
            ChallengeEvent::Resolved,
        ] {
            assert_eq!(apply(&challenge, event, late).unwrap_err(), IdpError::Expired);
        }

        let expired = apply(&challenge, ChallengeEvent::Expired, late).unwrap();
        assert_eq!(expired.state, ChallengeState::Expired);
        assert_eq!(
            apply(&expired, ChallengeEvent::Resolved, now()).unwrap_err(),
            IdpError::Expired
        );
    }

    #[test]
    fn terminal_challenges_do_not_expire_again() {
        let resolved = apply(&started(Decision::Granted), ChallengeEvent::Resolved, now()).unwrap();
        assert!(apply(&resolved, ChallengeEvent::Expired, now()).is_err());
    }
}
