//! HTTP request handlers.
//!
//! Handlers return a [`Response`] rather than `Result<_, AppError>`: errors
//! are rendered through the state's presenter, and the session cookie has to
//! reach the browser on error pages too.

pub mod consent;
pub mod entry;
pub mod health;

pub use consent::{consent_page, retry_resolve, submit_consent};
pub use entry::entry;
pub use health::health_check;

use crate::{WebResult, error::AppError};
use crate::extractors::BrowserSession;
use crate::state::AppState;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use idp_bridge::SignedToken;
use idp_bridge::providers::{AuthenticationDelegate, ChallengeStore, HubClient};
use std::collections::HashMap;

/// Name of the field carrying the signed challenge token on consent routes.
pub const CHALLENGE_FIELD: &str = "challenge";

/// `302 Found` to `location`.
pub(crate) fn found(location: &str) -> WebResult<Response> {
    let location = HeaderValue::from_str(location)
        .map_err(|_| AppError::internal("Invalid redirect target"))?;
    Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response())
}

/// The signed token named by `name` in `fields`.
pub(crate) fn token_field(
    fields: &HashMap<String, String>,
    name: &str,
) -> WebResult<SignedToken> {
    fields
        .get(name)
        .filter(|value| !value.is_empty())
        .map(|value| SignedToken::new(value.clone()))
        .ok_or_else(|| AppError::bad_request(format!("Missing {name} parameter")))
}

/// Render `result` and attach the session cookie.
pub(crate) fn respond<H, S, A>(
    state: &AppState<H, S, A>,
    session: &BrowserSession,
    result: WebResult<Response>,
) -> Response
where
    H: HubClient,
    S: ChallengeStore,
    A: AuthenticationDelegate,
{
    let response = result.unwrap_or_else(|err| err.render(state.presenter.as_ref()));
    session.attach(response)
}
