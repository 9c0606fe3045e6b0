//! Consent page, answer submission and resolution retry.

use super::{CHALLENGE_FIELD, found, respond, token_field};
use crate::{WebResult, error::AppError};
use crate::extractors::BrowserSession;
use crate::state::AppState;
use axum::{
    extract::{Form, Query, State},
    response::{Html, IntoResponse, Response},
};
use idp_bridge::providers::{AuthenticationDelegate, ChallengeStore, HubClient};
use idp_bridge::{IdpError, SignedToken};
use std::collections::HashMap;

/// Show the consent question.
///
/// # Endpoint
///
/// ```text
/// GET /consent?challenge=<signed token>
/// ```
pub async fn consent_page<H, S, A>(
    State(state): State<AppState<H, S, A>>,
    session: BrowserSession,
    Query(query): Query<HashMap<String, String>>,
) -> Response
where
    H: HubClient + 'static,
    S: ChallengeStore + 'static,
    A: AuthenticationDelegate + 'static,
{
    let result = show_prompt(&state, &session, &query).await;
    respond(&state, &session, result)
}

/// Record the user's answer and report it to the hub.
///
/// # Endpoint
///
/// ```text
/// POST /consent      (challenge=<signed token>, answer=y|n)
/// ```
///
/// # Response
///
/// - 302 to the hub's `return_to`, or the completion page if it gave none
/// - 400 when the answer is neither yes nor no
/// - 503 with a retry form when the hub could not be reached
pub async fn submit_consent<H, S, A>(
    State(state): State<AppState<H, S, A>>,
    session: BrowserSession,
    Form(form): Form<HashMap<String, String>>,
) -> Response
where
    H: HubClient + 'static,
    S: ChallengeStore + 'static,
    A: AuthenticationDelegate + 'static,
{
    let result = decide_and_resolve(&state, &session, &form).await;
    respond(&state, &session, result)
}

/// Retry reporting a recorded decision after a hub outage.
///
/// # Endpoint
///
/// ```text
/// POST /consent/resolve      (challenge=<signed token>)
/// ```
pub async fn retry_resolve<H, S, A>(
    State(state): State<AppState<H, S, A>>,
    session: BrowserSession,
    Form(form): Form<HashMap<String, String>>,
) -> Response
where
    H: HubClient + 'static,
    S: ChallengeStore + 'static,
    A: AuthenticationDelegate + 'static,
{
    let result = match token_field(&form, CHALLENGE_FIELD) {
        Ok(token) => resolve(&state, &session, token).await,
        Err(err) => Err(err),
    };
    respond(&state, &session, result)
}

async fn show_prompt<H, S, A>(
    state: &AppState<H, S, A>,
    session: &BrowserSession,
    query: &HashMap<String, String>,
) -> WebResult<Response>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    let token = token_field(query, CHALLENGE_FIELD)?;
    let prompt = state.machine.consent_prompt(session.id, &token).await?;
    Ok(Html(state.presenter.consent_page(&prompt, &token)).into_response())
}

async fn decide_and_resolve<H, S, A>(
    state: &AppState<H, S, A>,
    session: &BrowserSession,
    form: &HashMap<String, String>,
) -> WebResult<Response>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    let token = token_field(form, CHALLENGE_FIELD)?;
    let decision = form
        .get("answer")
        .and_then(|answer| state.presenter.parse_answer(answer))
        .ok_or_else(|| AppError::bad_request("Please answer yes or no."))?;

    state
        .machine
        .record_consent(session.id, &token, decision)
        .await?;
    resolve(state, session, token).await
}

async fn resolve<H, S, A>(
    state: &AppState<H, S, A>,
    session: &BrowserSession,
    token: SignedToken,
) -> WebResult<Response>
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    match state.machine.resolve(session.id, &token).await {
        Ok(resolved) => match resolved.return_to.as_deref() {
            Some(location) => found(location),
            None => {
                let decision = resolved
                    .decision
                    .ok_or_else(|| AppError::internal("Resolved challenge has no decision"))?;
                Ok(Html(state.presenter.completed_page(decision)).into_response())
            }
        },
        Err(err @ IdpError::HubUnreachable(_)) => Err(AppError::from(err).with_retry(token)),
        Err(err) => Err(err.into()),
    }
}
