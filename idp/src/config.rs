//! Bridge configuration.
//!
//! Values are supplied by the application (see the web crate's `ServerConfig`
//! for the environment-variable loader); nothing here reads process state
//! except [`HubCredentials::from_yaml_file`].

use crate::error::{IdpError, Result};
use chrono::Duration;
use idp_bridge_runtime::retry::RetryPolicy;
use serde::Deserialize;
use std::path::Path;

/// Challenge lifecycle configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeConfig {
    /// How long a challenge stays valid after registration.
    ///
    /// Default: 10 minutes
    pub ttl: Duration,

    /// Backoff for hub calls that fail with the hub unreachable.
    ///
    /// Default: 3 attempts, 100ms initial delay, doubling, capped at 2s
    pub retry: RetryPolicy,

    /// Deadline for a single hub call attempt.
    ///
    /// Default: 10 seconds
    pub hub_timeout: std::time::Duration,

    /// How long a resolve claim stays exclusive.
    ///
    /// Must exceed the worst-case duration of one resolve round
    /// (`max_attempts * hub_timeout` plus backoff). Default: 45 seconds
    pub resolve_lease: Duration,

    /// Resolve rounds that may end with the hub unreachable before the
    /// challenge is failed.
    ///
    /// Default: 3
    pub max_resolve_rounds: u32,
}

impl ChallengeConfig {
    /// Create configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ttl: Duration::minutes(10),
            retry: RetryPolicy::default(),
            hub_timeout: std::time::Duration::from_secs(10),
            resolve_lease: Duration::seconds(45),
            max_resolve_rounds: 3,
        }
    }

    /// Set challenge time-to-live.
    #[must_use]
    pub const fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the hub retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the per-attempt hub deadline.
    #[must_use]
    pub const fn with_hub_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.hub_timeout = timeout;
        self
    }

    /// Set the resolve claim lease.
    #[must_use]
    pub const fn with_resolve_lease(mut self, lease: Duration) -> Self {
        self.resolve_lease = lease;
        self
    }

    /// Set the number of unreachable resolve rounds tolerated.
    #[must_use]
    pub const fn with_max_resolve_rounds(mut self, rounds: u32) -> Self {
        self.max_resolve_rounds = rounds;
        self
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Default hub address, as used by the reference Hydra deployment.
pub const DEFAULT_HUB_URL: &str = "https://hydra:4444";

/// Scope the bridge requests for its own client-credentials token.
pub const CONSENT_SCOPE: &str = "hydra.consent";

/// Connection settings for the authorization hub.
#[derive(Clone)]
pub struct HubConfig {
    /// Hub base URL, without trailing slash.
    pub base_url: String,

    /// The bridge's own OAuth2 client id at the hub.
    pub client_id: String,

    /// The bridge's own OAuth2 client secret at the hub.
    pub client_secret: String,

    /// HTTP request timeout.
    ///
    /// Default: 10 seconds
    pub timeout: std::time::Duration,
}

impl std::fmt::Debug for HubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubConfig")
            .field("base_url", &self.base_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HubConfig {
    /// Create hub configuration.
    #[must_use]
    pub fn new(base_url: &str, client_id: String, client_secret: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            client_secret,
            timeout: std::time::Duration::from_secs(10),
        }
    }

    /// Set request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build from a credentials file, letting an explicit URL win over the
    /// file's `cluster_url`.
    #[must_use]
    pub fn from_credentials(credentials: HubCredentials, base_url: Option<&str>) -> Self {
        let url = base_url
            .map(str::to_string)
            .or(credentials.cluster_url)
            .unwrap_or_else(|| DEFAULT_HUB_URL.to_string());
        Self::new(&url, credentials.client_id, credentials.client_secret)
    }
}

/// Contents of a Hydra-style `.hydra.yml` credentials file.
///
/// ```yaml
/// cluster_url: https://hydra:4444
/// client_id: idp
/// client_secret: s3cret
/// ```
#[derive(Clone, Deserialize)]
pub struct HubCredentials {
    /// Hub address, if the file names one.
    #[serde(default)]
    pub cluster_url: Option<String>,
    /// Client id.
    pub client_id: String,
    /// Client secret.
    pub client_secret: String,
}

impl std::fmt::Debug for HubCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubCredentials")
            .field("cluster_url", &self.cluster_url)
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

impl HubCredentials {
    /// Parse credentials from YAML text.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Configuration`] if the text is not valid YAML or
    /// lacks `client_id`/`client_secret`.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text)
            .map_err(|e| IdpError::Configuration(format!("invalid hub credentials: {e}")))
    }

    /// Read credentials from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns [`IdpError::Configuration`] if the file cannot be read or parsed.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            IdpError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn challenge_defaults() {
        let config = ChallengeConfig::default();
        assert_eq!(config.ttl, Duration::minutes(10));
        assert_eq!(config.retry.max_attempts(), 3);
        assert_eq!(config.hub_timeout, std::time::Duration::from_secs(10));
        assert_eq!(config.max_resolve_rounds, 3);
    }

    #[test]
    fn credentials_from_yaml() {
        let creds = HubCredentials::from_yaml_str(
            "cluster_url: https://hub.example:4444/\nclient_id: idp\nclient_secret: s3cret\n",
        )
        .unwrap();

        let config = HubConfig::from_credentials(creds, None);
        assert_eq!(config.base_url, "https://hub.example:4444");
        assert_eq!(config.client_id, "idp");
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn explicit_url_wins_and_default_applies() {
        let creds = HubCredentials::from_yaml_str("client_id: a\nclient_secret: b\n").unwrap();
        assert_eq!(HubConfig::from_credentials(creds.clone(), None).base_url, DEFAULT_HUB_URL);
        assert_eq!(
            HubConfig::from_credentials(creds, Some("http://localhost:4444")).base_url,
            "http://localhost:4444"
        );
    }

    #[test]
    fn missing_secret_is_configuration_error() {
        let err = HubCredentials::from_yaml_str("client_id: a\n").unwrap_err();
        assert!(matches!(err, IdpError::Configuration(_)));
    }
}
