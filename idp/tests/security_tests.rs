//! Security-focused integration tests.
//!
//! This module verifies the protections the challenge-consent protocol relies on:
//!
//! - Replay prevention (a challenge resolves at most once)
//! - Expiry is enforced on every operation
//! - Tampered tokens are rejected before any lookup
//! - Challenges are bound to the browser session that began them
//! - A hub request is answered through one challenge only

use chrono::Duration;
use idp_bridge::{
    ChallengeConfig, ChallengeMachine, ChallengeState, Decision, IdpEnvironment, IdpError,
    RawRequest, SessionId, SignedToken, TokenCodec,
    mocks::{MockAuthenticator, MockChallengeStore, MockHubClient},
    providers::ChallengeStore,
    stores::InMemoryChallengeStore,
};
use idp_bridge_core::environment::Clock;
use idp_bridge_runtime::retry::RetryPolicy;
use idp_bridge_testing::{MockClock, test_clock};
use std::sync::Arc;

type Machine = ChallengeMachine<MockHubClient, InMemoryChallengeStore, MockAuthenticator>;

struct Fixture {
    machine: Arc<Machine>,
    hub: MockHubClient,
    store: InMemoryChallengeStore,
    clock: MockClock,
    session: SessionId,
    request: RawRequest,
}

fn fixture(hub: MockHubClient) -> Fixture {
    let clock = MockClock::new(test_clock().now());
    let codec = TokenCodec::new(b"security-test-secret-0123456789abcdef").unwrap();
    let store = InMemoryChallengeStore::new(codec.clone(), Arc::new(clock.clone()));
    let config = ChallengeConfig::default().with_retry(
        RetryPolicy::builder()
            .initial_delay(std::time::Duration::from_millis(1))
            .build(),
    );
    let env = IdpEnvironment::new(
        hub.clone(),
        store.clone(),
        MockAuthenticator::accepting("alice"),
        codec,
        Arc::new(clock.clone()),
    )
    .with_config(config);

    Fixture {
        machine: Arc::new(ChallengeMachine::new(env)),
        hub,
        store,
        clock,
        session: SessionId::new(),
        request: RawRequest::default().with_query("challenge", "hub-ref"),
    }
}

async fn decided(f: &Fixture, decision: Decision) -> SignedToken {
    let token = f.machine.begin_challenge(f.session, &f.request).await.unwrap();
    f.machine.authenticate(f.session, &token, &f.request).await.unwrap();
    f.machine.record_consent(f.session, &token, decision).await.unwrap();
    token
}

/// A resolved challenge is gone: replaying the resolve never reaches the hub
/// a second time.
#[tokio::test]
async fn test_resolve_succeeds_at_most_once() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let token = decided(&f, Decision::Granted).await;

    f.machine.resolve(f.session, &token).await.unwrap();
    let replay = f.machine.resolve(f.session, &token).await.unwrap_err();

    assert_eq!(replay, IdpError::NotFound);
    assert_eq!(f.hub.resolve_calls(), 1);
    assert!(f.store.is_empty());
}

/// Concurrent resolves of one decided challenge report to the hub once.
#[tokio::test]
async fn test_concurrent_resolves_report_once() {
    let hub = MockHubClient::new("C", &["read"])
        .with_resolve_delay(std::time::Duration::from_millis(50));
    let f = fixture(hub);
    let token = decided(&f, Decision::Granted).await;

    let attempts = (0..4).map(|_| f.machine.resolve(f.session, &token));
    let outcomes = futures::future::join_all(attempts).await;

    let mut successes = 0;
    for outcome in outcomes {
        match outcome {
            Ok(_) => successes += 1,
            Err(err) => assert!(
                matches!(
                    err,
                    IdpError::NotFound
                        | IdpError::InvalidState {
                            state: ChallengeState::Decided,
                            operation: "resolve"
                        }
                ),
                "unexpected error: {err}"
            ),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(f.hub.resolve_calls(), 1);
    assert_eq!(f.hub.resolutions().len(), 1);
}

/// The hub accepted the answer but the store failed to record it: the caller
/// still sees success and nothing is left to resolve again.
#[tokio::test]
async fn test_store_failure_after_hub_accepts_is_not_an_error() {
    let hub = MockHubClient::new("C", &["read"]);
    let clock = MockClock::new(test_clock().now());
    let codec = TokenCodec::new(b"security-test-secret-0123456789abcdef").unwrap();
    let store = MockChallengeStore::new(InMemoryChallengeStore::new(
        codec.clone(),
        Arc::new(clock.clone()),
    ))
    .failing_swaps_into(ChallengeState::Resolved);
    let machine = ChallengeMachine::new(IdpEnvironment::new(
        hub.clone(),
        store.clone(),
        MockAuthenticator::accepting("alice"),
        codec,
        Arc::new(clock.clone()),
    ));
    let session = SessionId::new();
    let request = RawRequest::default().with_query("challenge", "hub-ref");

    let token = machine.begin_challenge(session, &request).await.unwrap();
    machine.authenticate(session, &token, &request).await.unwrap();
    machine.record_consent(session, &token, Decision::Granted).await.unwrap();

    let resolved = machine.resolve(session, &token).await.unwrap();
    assert_eq!(resolved.state, ChallengeState::Resolved);
    assert_eq!(store.failed_swaps(), 1);
    assert!(store.inner().is_empty());

    // Past the resolve lease a replay still finds nothing to report.
    clock.advance(Duration::minutes(1));
    assert_eq!(
        machine.resolve(session, &token).await.unwrap_err(),
        IdpError::NotFound
    );
    assert_eq!(hub.resolutions().len(), 1);
}

/// Registering one hub request twice never yields two answers to the hub.
#[tokio::test]
async fn test_hub_reference_is_resolved_once() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let token = f.machine.begin_challenge(f.session, &f.request).await.unwrap();

    // A reload in the same browser resumes the same challenge.
    let reloaded = f.machine.begin_challenge(f.session, &f.request).await.unwrap();
    assert_eq!(reloaded, token);
    assert_eq!(f.store.len(), 1);

    // Another browser cannot take it over.
    let intruder = SessionId::new();
    assert!(matches!(
        f.machine.begin_challenge(intruder, &f.request).await.unwrap_err(),
        IdpError::InvalidState {
            state: ChallengeState::Pending,
            operation: "begin_challenge"
        }
    ));

    f.machine.authenticate(f.session, &token, &f.request).await.unwrap();
    f.machine.record_consent(f.session, &token, Decision::Granted).await.unwrap();
    f.machine.resolve(f.session, &token).await.unwrap();

    // Once answered the hub request is used up for everyone.
    for session in [f.session, intruder] {
        assert_eq!(
            f.machine.begin_challenge(session, &f.request).await.unwrap_err(),
            IdpError::NotFound
        );
    }
    assert!(f.store.is_empty());
    assert_eq!(f.hub.resolutions().len(), 1);
}

/// Of several browsers registering one hub request at once, one owns it.
#[tokio::test]
async fn test_concurrent_registrations_have_one_owner() {
    let f = fixture(MockHubClient::new("C", &["read"]));

    let attempts = (0..8).map(|_| f.machine.begin_challenge(SessionId::new(), &f.request));
    let outcomes = futures::future::join_all(attempts).await;

    assert_eq!(outcomes.iter().filter(|outcome| outcome.is_ok()).count(), 1);
    assert_eq!(f.store.len(), 1);
}

/// After the validity window closes every operation reports `Expired`,
/// including ones that succeeded before.
#[tokio::test]
async fn test_every_operation_fails_expired_after_window() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let token = decided(&f, Decision::Granted).await;

    f.clock.advance(Duration::minutes(10));

    assert_eq!(
        f.machine.authenticate(f.session, &token, &f.request).await.unwrap_err(),
        IdpError::Expired
    );
    assert_eq!(
        f.machine.consent_prompt(f.session, &token).await.unwrap_err(),
        IdpError::Expired
    );
    assert_eq!(
        f.machine.record_consent(f.session, &token, Decision::Denied).await.unwrap_err(),
        IdpError::Expired
    );
    assert_eq!(
        f.machine.resolve(f.session, &token).await.unwrap_err(),
        IdpError::Expired
    );

    // Never reported, and the record was cleaned up.
    assert_eq!(f.hub.resolve_calls(), 0);
    assert!(f.store.is_empty());
}

/// A record past its own expiry is gone, even while the blob still looks valid.
#[tokio::test]
async fn test_record_past_its_expiry_is_absent() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let token = f.machine.begin_challenge(f.session, &f.request).await.unwrap();
    let mut challenge = f.store.get(f.session, &verify(&token)).await.unwrap();

    // Shorten the live record while the blob still claims ten minutes.
    challenge.expires_at = f.clock.now() + Duration::minutes(1);
    challenge.revision += 1;
    assert!(f.store.swap(f.session, 0, &challenge).await.unwrap());
    f.clock.advance(Duration::minutes(2));

    assert_eq!(
        f.machine.authenticate(f.session, &token, &f.request).await.unwrap_err(),
        IdpError::NotFound
    );
    assert!(f.store.is_empty());
    assert_eq!(f.hub.resolve_calls(), 0);
}

/// Altering any character of the browser blob is detected.
#[tokio::test]
async fn test_tampered_token_is_invalid() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let token = f.machine.begin_challenge(f.session, &f.request).await.unwrap();
    let original = token.as_str().to_string();

    for index in [0, original.len() / 2, original.len() - 1] {
        let mut bytes = original.clone().into_bytes();
        bytes[index] = if bytes[index] == b'A' { b'B' } else { b'A' };
        let forged = SignedToken::new(String::from_utf8(bytes).unwrap());

        assert_eq!(
            f.machine.authenticate(f.session, &forged, &f.request).await.unwrap_err(),
            IdpError::Invalid,
            "tampering at {index} went unnoticed"
        );
    }

    // The genuine token still works.
    f.machine.authenticate(f.session, &token, &f.request).await.unwrap();
}

/// A token stolen into another browser session finds nothing.
#[tokio::test]
async fn test_token_is_bound_to_its_session() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let token = decided(&f, Decision::Granted).await;
    let intruder = SessionId::new();

    assert_eq!(
        f.machine.consent_prompt(intruder, &token).await.unwrap_err(),
        IdpError::NotFound
    );
    assert_eq!(
        f.machine.resolve(intruder, &token).await.unwrap_err(),
        IdpError::NotFound
    );
    assert_eq!(f.hub.resolve_calls(), 0);

    // The owner is unaffected.
    f.machine.resolve(f.session, &token).await.unwrap();
}

/// A second answer never overwrites the first.
#[tokio::test]
async fn test_duplicate_consent_is_rejected() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let token = decided(&f, Decision::Denied).await;

    let err = f
        .machine
        .record_consent(f.session, &token, Decision::Granted)
        .await
        .unwrap_err();
    assert!(matches!(err, IdpError::InvalidState { state: ChallengeState::Decided, .. }));

    let resolved = f.machine.resolve(f.session, &token).await.unwrap();
    assert_eq!(resolved.decision, Some(Decision::Denied));
}

/// Tokens are signed per deployment secret.
#[tokio::test]
async fn test_token_from_other_deployment_is_invalid() {
    let f = fixture(MockHubClient::new("C", &["read"]));
    let foreign = TokenCodec::new(b"some-other-deployment-secret-0123456")
        .unwrap()
        .encode_token(&idp_bridge::Challenge::pending(
            "hub-ref",
            "C",
            vec![],
            idp_bridge::Validity::starting_at(f.clock.now(), Duration::minutes(10)),
        ))
        .unwrap();

    assert_eq!(
        f.machine.consent_prompt(f.session, &foreign).await.unwrap_err(),
        IdpError::Invalid
    );
}

fn verify(token: &SignedToken) -> idp_bridge::ChallengeToken {
    // Same secret as the fixture.
    TokenCodec::new(b"security-test-secret-0123456789abcdef")
        .unwrap()
        .verify_token(token)
        .unwrap()
        .0
}
