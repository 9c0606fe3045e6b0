//! Error types for web handlers.
//!
//! This module bridges [`IdpError`] and HTTP responses. Every error is shown
//! to the browser as an HTML page with a generic message; details stay in the
//! logs.

use crate::presentation::{ConsentPresenter, HtmlPresenter};
use axum::{
    http::{StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use idp_bridge::{IdpError, SignedToken};
use std::fmt;

/// Application error type for web handlers.
///
/// # Examples
///
/// ```
/// use axum::http::StatusCode;
/// use idp_bridge::IdpError;
/// use idp_bridge_web::AppError;
///
/// let err = AppError::from(IdpError::Expired);
/// assert_eq!(err.status(), StatusCode::GONE);
/// assert!(err.requires_restart());
/// ```
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for logs and metrics)
    code: &'static str,
    /// The browser has to begin again at the entry point
    restart: bool,
    /// Challenge whose resolution may be retried
    retry: Option<SignedToken>,
    /// Internal error (for logging, not exposed to client)
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>, code: &'static str) -> Self {
        Self {
            status,
            message: message.into(),
            code,
            restart: false,
            retry: None,
            source: None,
        }
    }

    /// Create a new error with a source error.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Offer the user a retry of the resolution of `token`.
    #[must_use]
    pub fn with_retry(mut self, token: SignedToken) -> Self {
        self.retry = Some(token);
        self
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message, "bad_request")
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message, "internal")
    }

    fn restarting(mut self) -> Self {
        self.restart = true;
        self
    }

    /// HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// User-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Whether the page should send the user back to the entry point.
    #[must_use]
    pub const fn requires_restart(&self) -> bool {
        self.restart
    }

    /// Challenge whose resolution the page should offer to retry.
    #[must_use]
    pub const fn retry_token(&self) -> Option<&SignedToken> {
        self.retry.as_ref()
    }

    /// Render with `presenter`.
    #[must_use]
    pub fn render(self, presenter: &dyn ConsentPresenter) -> Response {
        self.log();
        let page = presenter.error_page(&self);
        let mut response = (self.status, Html(page)).into_response();
        if self.status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("5"));
        }
        response
    }

    fn log(&self) {
        metrics::counter!("idp_http_errors_total", "code" => self.code).increment(1);
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = self.code,
                    error = %source,
                    "Request failed"
                ),
                None => tracing::error!(status = %self.status, code = self.code, "Request failed"),
            }
        } else {
            tracing::info!(status = %self.status, code = self.code, "Request rejected");
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.render(&HtmlPresenter)
    }
}

const START_AGAIN: &str = "This sign-in request is no longer valid. Please start again.";

impl From<IdpError> for AppError {
    fn from(err: IdpError) -> Self {
        let code = err.kind();
        let mapped = match &err {
            IdpError::NotFound => Self::new(StatusCode::NOT_FOUND, START_AGAIN, code),
            IdpError::Expired => Self::new(StatusCode::GONE, START_AGAIN, code),
            IdpError::Invalid => Self::new(StatusCode::BAD_REQUEST, START_AGAIN, code),
            IdpError::InvalidState { .. } => Self::new(
                StatusCode::CONFLICT,
                "This request has already been answered.",
                code,
            ),
            IdpError::HubUnreachable(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "The authorization service is temporarily unavailable. Please try again shortly.",
                code,
            ),
            IdpError::HubRejected(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                "The authorization service did not accept this request.",
                code,
            ),
            IdpError::AuthenticationFailed => Self::new(
                StatusCode::UNAUTHORIZED,
                "We could not tell who you are.",
                code,
            ),
            IdpError::IdentityRejected(_) => Self::new(
                StatusCode::FORBIDDEN,
                "This account may not sign in here.",
                code,
            ),
            IdpError::Configuration(_) | IdpError::Serialization(_) | IdpError::Internal(_) => {
                Self::internal("An internal error occurred")
            }
        };

        let mapped = if err.requires_restart() || matches!(err, IdpError::InvalidState { .. }) {
            mapped.restarting()
        } else {
            mapped
        };
        mapped.with_source(anyhow::Error::new(err))
    }
}

/// Convert `anyhow::Error` to `AppError`.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal("An internal error occurred").with_source(err)
    }
}
