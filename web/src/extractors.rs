//! Custom Axum extractors.
//!
//! - `BrowserSession`: the signed session cookie, or a fresh session
//! - [`raw_request`]: turns axum's pieces into the bridge's [`RawRequest`]
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(session: BrowserSession) -> Response {
//!     tracing::info!(session = %session.id, "Processing request");
//!     session.attach(Redirect::to("/consent").into_response())
//! }
//! ```

use crate::session::SessionKeys;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, HeaderValue, header, request::Parts},
    response::Response,
};
use idp_bridge::{RawRequest, SessionId};
use std::collections::HashMap;

/// The browser's session.
///
/// Taken from the `idp_session` cookie when it carries a valid signature;
/// otherwise a new session is started and `set_cookie` holds the cookie to
/// send back.
#[derive(Debug, Clone)]
pub struct BrowserSession {
    /// Session namespace for challenge records.
    pub id: SessionId,
    /// Cookie to set on the response, for new sessions.
    pub set_cookie: Option<HeaderValue>,
}

impl BrowserSession {
    /// Add the session cookie to `response` if this session is new.
    #[must_use]
    pub fn attach(&self, mut response: Response) -> Response {
        if let Some(cookie) = &self.set_cookie {
            response
                .headers_mut()
                .append(header::SET_COOKIE, cookie.clone());
        }
        response
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for BrowserSession
where
    SessionKeys: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = crate::error::AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);

        if let Some(id) = keys.from_headers(&parts.headers) {
            return Ok(Self {
                id,
                set_cookie: None,
            });
        }

        let id = SessionId::new();
        let set_cookie = keys.set_cookie(id)?;
        tracing::debug!(session = %id, "Started browser session");
        Ok(Self {
            id,
            set_cookie: Some(set_cookie),
        })
    }
}

/// Snapshot the parts of a request the bridge's collaborators look at.
///
/// Headers that are not valid UTF-8 are skipped.
#[must_use]
pub fn raw_request(
    query: HashMap<String, String>,
    headers: &HeaderMap,
    form: Option<HashMap<String, String>>,
) -> RawRequest {
    let headers = headers.iter().filter_map(|(name, value)| {
        value
            .to_str()
            .ok()
            .map(|value| (name.as_str().to_string(), value.to_string()))
    });
    RawRequest::from_parts(query, headers, form.unwrap_or_default())
}
