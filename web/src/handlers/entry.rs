//! Entry point: begin a challenge and authenticate the user.

use super::{found, respond};
use crate::WebResult;
use crate::extractors::{BrowserSession, raw_request};
use crate::state::AppState;
use axum::{
    extract::{Form, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use idp_bridge::providers::{AuthenticationDelegate, ChallengeStore, HubClient};
use idp_bridge::{ChallengeState, IdpError, SignedToken};
use std::collections::HashMap;

/// Field the login page resubmits to retry authentication.
pub const TOKEN_FIELD: &str = "token";

/// Begin (or resume) a challenge and authenticate the user.
///
/// # Endpoint
///
/// ```text
/// GET  /?challenge=<hub challenge>
/// POST /            (token=<signed token>, from the login page)
/// ```
///
/// # Flow
///
/// 1. Reuse the `token` field if the login form is being resubmitted,
///    otherwise register a new challenge with the hub
/// 2. Ask the authentication delegate who the user is
/// 3. Redirect to `/consent?challenge=<token>`
///
/// # Response
///
/// - 302 to the consent page
/// - 401 with the login page when the delegate cannot identify the user
pub async fn entry<H, S, A>(
    State(state): State<AppState<H, S, A>>,
    session: BrowserSession,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    form: Option<Form<HashMap<String, String>>>,
) -> Response
where
    H: HubClient + 'static,
    S: ChallengeStore + 'static,
    A: AuthenticationDelegate + 'static,
{
    let request = raw_request(query, &headers, form.map(|Form(fields)| fields));
    let result = begin_and_authenticate(&state, &session, &request).await;
    respond(&state, &session, result)
}

async fn begin_and_authenticate<H, S, A>(
    state: &AppState<H, S, A>,
    session: &BrowserSession,
    request: &idp_bridge::RawRequest,
) -> WebResult<Response>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    let token = match request.field(TOKEN_FIELD).filter(|value| !value.is_empty()) {
        Some(token) => SignedToken::new(token.to_string()),
        None => state.machine.begin_challenge(session.id, request).await?,
    };

    match state.machine.authenticate(session.id, &token, request).await {
        // A reload after authentication goes straight back to the question.
        Ok(_)
        | Err(IdpError::InvalidState {
            state: ChallengeState::Authenticated,
            ..
        }) => found(&format!("/consent?{}={token}", super::CHALLENGE_FIELD)),
        Err(IdpError::AuthenticationFailed) => {
            tracing::debug!(session = %session.id, "Authentication delegate declined");
            Ok((
                StatusCode::UNAUTHORIZED,
                Html(state.presenter.login_page(Some(&token))),
            )
                .into_response())
        }
        Err(err) => Err(err.into()),
    }
}
