//! Hydra consent API client.
//!
//! Talks to an ORY Hydra style hub:
//!
//! - `POST {hub}/oauth2/token`: client-credentials token for the bridge itself
//!   (HTTP basic auth, scope `hydra.consent`), cached until shortly before it
//!   expires
//! - `GET {hub}/oauth2/consent/requests/{ref}`: client and requested scopes
//! - `PATCH {hub}/oauth2/consent/requests/{ref}/accept`: grant
//! - `PATCH {hub}/oauth2/consent/requests/{ref}/reject`: deny
//!
//! # Error Mapping
//!
//! | failure | error |
//! |---|---|
//! | connect, timeout, other transport errors | `HubUnreachable` |
//! | HTTP 5xx, HTTP 429 | `HubUnreachable` |
//! | other HTTP 4xx | `HubRejected` |
//! | malformed response body | `HubRejected` |
//!
//! # Example
//!
//! ```no_run
//! use idp_bridge::config::HubConfig;
//! use idp_bridge::providers::HydraHubClient;
//!
//! # fn example() -> idp_bridge::Result<()> {
//! let hub = HydraHubClient::new(HubConfig::new(
//!     "https://hydra:4444",
//!     "idp".to_string(),
//!     "secret".to_string(),
//! ))?;
//! # Ok(())
//! # }
//! ```

use crate::config::{CONSENT_SCOPE, HubConfig};
use crate::error::{IdpError, Result};
use crate::providers::HubClient;
use crate::state::{Challenge, RawRequest, Resolution, Validity};
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Query parameter carrying the hub's challenge reference.
pub const CHALLENGE_PARAM: &str = "challenge";

/// Refresh the cached access token this long before the hub says it expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Assumed lifetime when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Hydra hub client.
///
/// Cheap to clone; clones share the HTTP connection pool, the cached access
/// token and the closed flag.
#[derive(Clone)]
pub struct HydraHubClient {
    config: Arc<HubConfig>,
    base: Url,
    http_client: Client,
    token: Arc<Mutex<Option<CachedToken>>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for HydraHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HydraHubClient")
            .field("base", &self.base.as_str())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

struct CachedToken {
    access_token: String,
    refresh_at: Instant,
}

/// Consent request as returned by the hub.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsentRequest {
    id: String,
    client_id: String,
    #[serde(default)]
    requested_scopes: Vec<String>,
    #[serde(default)]
    redirect_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcceptConsent<'a> {
    subject: &'a str,
    grant_scopes: &'a [String],
}

#[derive(Debug, Serialize)]
struct RejectConsent<'a> {
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl HydraHubClient {
    /// Create a client for the hub described by `config`.
    ///
    /// No network traffic happens until the first call.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Configuration`] if the base URL does not parse or
    /// the HTTP client cannot be built.
    pub fn new(config: HubConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| {
            IdpError::Configuration(format!("invalid hub URL {}: {e}", config.base_url))
        })?;
        if base.cannot_be_a_base() {
            return Err(IdpError::Configuration(format!(
                "hub URL {} cannot be a base",
                config.base_url
            )));
        }

        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| IdpError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config: Arc::new(config),
            base,
            http_client,
            token: Arc::new(Mutex::new(None)),
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(IdpError::HubUnreachable("hub client is closed".to_string()));
        }
        Ok(())
    }

    /// `{base}/seg/seg/...`, with every segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| IdpError::Configuration("hub URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn consent_url(&self, hub_ref: &str, action: Option<&str>) -> Result<Url> {
        let mut segments = vec!["oauth2", "consent", "requests", hub_ref];
        segments.extend(action);
        self.endpoint(&segments)
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .http_client
            .post(self.endpoint(&["oauth2", "token"])?)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", CONSENT_SCOPE),
            ])
            .send()
            .await
            .map_err(transport_error)?;
        let response = check_status(response, "token request").await?;
        let body: TokenResponse = response.json().await.map_err(body_error)?;

        let lifetime = body
            .expires_in
            .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);
        let refresh_at = Instant::now() + lifetime.saturating_sub(TOKEN_REFRESH_MARGIN);

        tracing::debug!(lifetime_secs = lifetime.as_secs(), "Obtained hub access token");

        *cached = Some(CachedToken {
            access_token: body.access_token.clone(),
            refresh_at,
        });
        Ok(body.access_token)
    }

    async fn forget_token(&self) {
        *self.token.lock().await = None;
    }

    /// Send an authorized request, refreshing the access token once if the
    /// hub says it is no longer valid.
    async fn send_authorized<B: Serialize + Sync>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
        what: &str,
    ) -> Result<reqwest::Response> {
        let mut refreshed = false;
        loop {
            let token = self.access_token().await?;
            let mut request = self
                .http_client
                .request(method.clone(), url.clone())
                .bearer_auth(token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await.map_err(transport_error)?;
            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                tracing::debug!(what, "Hub refused access token, refreshing");
                self.forget_token().await;
                refreshed = true;
                continue;
            }
            return check_status(response, what).await;
        }
    }
}

impl HubClient for HydraHubClient {
    async fn register_challenge(&self, request: &RawRequest, validity: Validity) -> Result<Challenge> {
        self.ensure_open()?;

        let hub_ref = request
            .query(CHALLENGE_PARAM)
            .filter(|r| !r.is_empty())
            .ok_or_else(|| {
                IdpError::HubRejected("request carries no hub challenge reference".to_string())
            })?;

        let response = self
            .send_authorized::<()>(
                Method::GET,
                self.consent_url(hub_ref, None)?,
                None,
                "consent request lookup",
            )
            .await?;
        let consent: ConsentRequest = response.json().await.map_err(body_error)?;

        if consent.id != hub_ref {
            return Err(IdpError::HubRejected(format!(
                "hub answered for consent request {} instead of {hub_ref}",
                consent.id
            )));
        }

        tracing::info!(
            hub_ref = %consent.id,
            client = %consent.client_id,
            scopes = ?consent.requested_scopes,
            "Fetched consent request from hub"
        );

        let challenge = Challenge::pending(
            consent.id,
            consent.client_id,
            consent.requested_scopes,
            validity,
        );
        Ok(match consent.redirect_url.filter(|u| !u.is_empty()) {
            Some(url) => challenge.with_return_to(url),
            None => challenge,
        })
    }

    async fn resolve(&self, challenge: &Challenge, resolution: &Resolution) -> Result<()> {
        self.ensure_open()?;

        match resolution {
            Resolution::Grant { subject, scopes } => {
                let body = AcceptConsent {
                    subject,
                    grant_scopes: scopes,
                };
                self.send_authorized(
                    Method::PATCH,
                    self.consent_url(&challenge.hub_ref, Some("accept"))?,
                    Some(&body),
                    "consent accept",
                )
                .await?;
            }
            Resolution::Deny { reason } => {
                let body = RejectConsent { reason };
                self.send_authorized(
                    Method::PATCH,
                    self.consent_url(&challenge.hub_ref, Some("reject"))?,
                    Some(&body),
                    "consent reject",
                )
                .await?;
            }
        }

        tracing::info!(
            hub_ref = %challenge.hub_ref,
            decision = resolution.decision().as_str(),
            "Reported consent decision to hub"
        );
        Ok(())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.forget_token().await;
            tracing::debug!("Hub client closed");
        }
    }
}

fn transport_error(err: reqwest::Error) -> IdpError {
    if err.is_decode() {
        IdpError::HubRejected(format!("malformed hub response: {err}"))
    } else {
        IdpError::HubUnreachable(err.to_string())
    }
}

fn body_error(err: reqwest::Error) -> IdpError {
    if err.is_timeout() {
        IdpError::HubUnreachable(err.to_string())
    } else {
        IdpError::HubRejected(format!("malformed hub response: {err}"))
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = format!("{what} returned {status}: {}", body.chars().take(200).collect::<String>());

    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        tracing::warn!(%status, what, "Hub temporarily unavailable");
        Err(IdpError::HubUnreachable(detail))
    } else {
        tracing::warn!(%status, what, "Hub rejected request");
        Err(IdpError::HubRejected(detail))
    }
}
