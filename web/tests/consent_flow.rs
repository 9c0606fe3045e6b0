//! End-to-end browser flows through the router, with a mock hub.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use idp_bridge::mocks::MockHubClient;
use idp_bridge::state::DENIED_BY_USER;
use idp_bridge::stores::InMemoryChallengeStore;
use idp_bridge::{ChallengeMachine, IdpEnvironment, IdpError, Resolution, TokenCodec};
use idp_bridge_testing::test_clock;
use idp_bridge_web::{
    AppState, HtmlPresenter, SessionKeys, TrustedHeaderAuthenticator, bridge_router,
};
use std::sync::Arc;
use tower::ServiceExt;

const USER_HEADER: &str = "X-Remote-User";
const RETURN_TO: &str = "https://hub.example/oauth2/auth?consent_verifier=v1";

fn app(hub: &MockHubClient) -> Router {
    idp_bridge_testing::helpers::init_test_tracing();
    let codec = TokenCodec::new(&[9u8; 32]).unwrap();
    let clock = Arc::new(test_clock());
    let env = IdpEnvironment::new(
        hub.clone(),
        InMemoryChallengeStore::new(codec.clone(), clock.clone()),
        TrustedHeaderAuthenticator::new(USER_HEADER).with_blocked(["mallory"]),
        codec.clone(),
        clock,
    );
    bridge_router(AppState::new(
        ChallengeMachine::new(env),
        Arc::new(HtmlPresenter),
        SessionKeys::new(codec, false),
    ))
}

fn hub() -> MockHubClient {
    MockHubClient::new("Photo Printer", &["photos.read", "profile"]).with_return_to(RETURN_TO)
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn location(response: &Response<Body>) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .expect("redirect carries a location")
        .to_str()
        .unwrap()
}

/// `name=value` part of the response's session cookie.
fn session_cookie(response: &Response<Body>) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("new session sets a cookie")
        .to_str()
        .unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

fn form_post(uri: &str, cookie: &str, body: String) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::COOKIE, cookie)
        .body(Body::from(body))
        .unwrap()
}

/// Run the entry step as `user`; returns the session cookie and signed token.
async fn enter(app: &Router, user: &str) -> (String, String) {
    enter_with(app, user, "hydra-123").await
}

async fn enter_with(app: &Router, user: &str, hub_challenge: &str) -> (String, String) {
    let response = send(
        app,
        Request::get(format!("/?challenge={hub_challenge}"))
            .header(USER_HEADER, user)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    let token = location(&response)
        .strip_prefix("/consent?challenge=")
        .expect("redirect to the consent page")
        .to_string();
    (session_cookie(&response), token)
}

#[tokio::test]
async fn grant_redirects_to_the_hub() {
    let hub = hub();
    let app = app(&hub);
    let (cookie, token) = enter(&app, "alice").await;

    let page = send(
        &app,
        Request::get(format!("/consent?challenge={token}"))
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(page.status(), StatusCode::OK);
    assert_eq!(page.headers().get(header::CACHE_CONTROL).unwrap(), "no-store");
    let html = body_text(page).await;
    assert!(html.contains("Hi alice! Do you agree to grant Photo Printer access to those scopes?"));
    assert!(html.contains("<li>photos.read</li>"));

    let response = send(
        &app,
        form_post("/consent", &cookie, format!("challenge={token}&answer=y")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(location(&response), RETURN_TO);
    let resolutions = hub.resolutions();
    assert_eq!(resolutions.len(), 1);
    assert_eq!(resolutions[0].hub_ref, "hydra-123");
    assert_eq!(
        resolutions[0].resolution,
        Resolution::Grant {
            subject: "alice".to_string(),
            scopes: vec!["photos.read".to_string(), "profile".to_string()],
        }
    );
}

#[tokio::test]
async fn deny_without_return_to_shows_completion_page() {
    let hub = MockHubClient::new("Photo Printer", &["photos.read"]);
    let app = app(&hub);
    let (cookie, token) = enter(&app, "alice").await;

    let response = send(
        &app,
        form_post("/consent", &cookie, format!("challenge={token}&answer=n")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Access denied"));
    assert_eq!(
        hub.resolutions()[0].resolution,
        Resolution::Deny {
            reason: DENIED_BY_USER.to_string()
        }
    );
}

#[tokio::test]
async fn missing_identity_shows_login_page_and_retry_succeeds() {
    let hub = hub();
    let app = app(&hub);

    let response = send(
        &app,
        Request::get("/?challenge=hydra-123").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let cookie = session_cookie(&response);
    let html = body_text(response).await;
    let token = html
        .split(r#"name="token" value=""#)
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .expect("login page carries the token")
        .to_string();

    let retry = send(
        &app,
        Request::post("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::COOKIE, &cookie)
            .header(USER_HEADER, "alice")
            .body(Body::from(format!("token={token}")))
            .unwrap(),
    )
    .await;

    assert_eq!(retry.status(), StatusCode::FOUND);
    assert_eq!(location(&retry), format!("/consent?challenge={token}"));
    assert_eq!(hub.register_calls(), 1);
}

#[tokio::test]
async fn blocked_user_is_forbidden() {
    let hub = hub();
    let app = app(&hub);

    let response = send(
        &app,
        Request::get("/")
            .header(USER_HEADER, "mallory")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("Start over"));
}

#[tokio::test]
async fn answer_other_than_yes_or_no_is_rejected() {
    let hub = hub();
    let app = app(&hub);
    let (cookie, token) = enter(&app, "alice").await;

    let response = send(
        &app,
        form_post("/consent", &cookie, format!("challenge={token}&answer=maybe")),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(hub.resolutions().is_empty());
}

#[tokio::test]
async fn replayed_submission_asks_to_start_over() {
    let hub = hub();
    let app = app(&hub);
    let (cookie, token) = enter(&app, "alice").await;
    let body = format!("challenge={token}&answer=y");

    let first = send(&app, form_post("/consent", &cookie, body.clone())).await;
    assert_eq!(first.status(), StatusCode::FOUND);

    let replay = send(&app, form_post("/consent", &cookie, body)).await;
    assert_eq!(replay.status(), StatusCode::NOT_FOUND);
    assert!(body_text(replay).await.contains("Start over"));
    assert_eq!(hub.resolutions().len(), 1);
}

#[tokio::test]
async fn token_from_another_browser_is_not_found() {
    let hub = hub();
    let app = app(&hub);
    let (_, token) = enter(&app, "alice").await;
    let (other_cookie, _) = enter_with(&app, "bob", "hydra-456").await;

    let response = send(
        &app,
        Request::get(format!("/consent?challenge={token}"))
            .header(header::COOKIE, &other_cookie)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reentry_resumes_the_challenge_only_in_its_browser() {
    let hub = hub();
    let app = app(&hub);
    let (cookie, token) = enter(&app, "alice").await;

    // Same browser, same hub request: back to the same question.
    let reload = send(
        &app,
        Request::get("/?challenge=hydra-123")
            .header(header::COOKIE, &cookie)
            .header(USER_HEADER, "alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(reload.status(), StatusCode::FOUND);
    assert_eq!(location(&reload), format!("/consent?challenge={token}"));

    // Another browser cannot open a second challenge for it.
    let other = send(
        &app,
        Request::get("/?challenge=hydra-123")
            .header(USER_HEADER, "bob")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(other.status(), StatusCode::CONFLICT);

    let response = send(
        &app,
        form_post("/consent", &cookie, format!("challenge={token}&answer=y")),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(hub.resolutions().len(), 1);
}

#[tokio::test]
async fn tampered_token_is_bad_request() {
    let hub = hub();
    let app = app(&hub);
    let (cookie, token) = enter(&app, "alice").await;
    let first = if token.starts_with('A') { 'B' } else { 'A' };
    let tampered = format!("{first}{}", &token[1..]);

    let response = send(
        &app,
        Request::get(format!("/consent?challenge={tampered}"))
            .header(header::COOKIE, &cookie)
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn missing_challenge_parameter_is_bad_request() {
    let app = app(&hub());

    let response = send(&app, Request::get("/consent").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().contains_key(header::SET_COOKIE));
}

#[tokio::test]
async fn hub_outage_offers_a_retry_of_the_resolution() {
    let hub = hub().fail_resolve(IdpError::HubUnreachable("connection refused".into()), 3);
    let app = app(&hub);
    let (cookie, token) = enter(&app, "alice").await;

    let outage = send(
        &app,
        form_post("/consent", &cookie, format!("challenge={token}&answer=y")),
    )
    .await;
    assert_eq!(outage.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(outage.headers().contains_key(header::RETRY_AFTER));
    let html = body_text(outage).await;
    assert!(html.contains(r#"action="/consent/resolve""#));
    assert!(html.contains(&format!(r#"name="challenge" value="{token}""#)));

    let retry = send(
        &app,
        form_post("/consent/resolve", &cookie, format!("challenge={token}")),
    )
    .await;

    assert_eq!(retry.status(), StatusCode::FOUND);
    assert_eq!(location(&retry), RETURN_TO);
    assert_eq!(hub.resolutions().len(), 1);
}

#[tokio::test]
async fn registration_failure_is_reported() {
    let hub = hub().fail_register(IdpError::HubRejected("unknown consent request".into()), 1);
    let app = app(&hub);

    let response = send(
        &app,
        Request::get("/?challenge=stale")
            .header(USER_HEADER, "alice")
            .body(Body::empty())
            .unwrap(),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn health_is_ok() {
    let app = app(&hub());

    let response = send(&app, Request::get("/health").body(Body::empty()).unwrap()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "ok");
}
