//! Server configuration loaded from the environment.
//!
//! | variable | default |
//! |---|---|
//! | `IDP_LISTEN` | `0.0.0.0:3000` |
//! | `IDP_HUB_URL` | the credentials file's `cluster_url`, else `https://hydra:4444` |
//! | `IDP_HUB_CONFIG` | `.hydra.yml` |
//! | `IDP_SECRET` | required, at least 32 bytes |
//! | `IDP_REDIS_URL` | unset (in-memory store) |
//! | `IDP_AUTH_HEADER` | `X-Remote-User` |
//! | `IDP_CHALLENGE_TTL_SECS` | `600` |
//! | `IDP_HUB_TIMEOUT_SECS` | `10` |
//! | `IDP_SECURE_COOKIES` | `false` |
//!
//! The binary loads a `.env` file with `dotenvy` before reading these.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_LISTEN: &str = "0.0.0.0:3000";

/// Default path of the hub credentials file.
pub const DEFAULT_HUB_CONFIG: &str = ".hydra.yml";

/// Default header carrying the upstream-authenticated user.
pub const DEFAULT_AUTH_HEADER: &str = "X-Remote-User";

/// Minimum length of `IDP_SECRET`.
pub const MIN_SECRET_LEN: usize = 32;

/// Configuration problems found at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("{0} must be set")]
    Missing(&'static str),

    /// A variable is set to something unusable.
    #[error("{name} is invalid: {reason}")]
    Invalid {
        /// Variable name
        name: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Everything the server binary needs to start.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen: SocketAddr,
    /// Hub URL override.
    pub hub_url: Option<String>,
    /// Hub credentials file.
    pub hub_config_path: PathBuf,
    /// Signing and sealing secret.
    pub secret: String,
    /// Redis URL; the in-memory store is used when unset.
    pub redis_url: Option<String>,
    /// Header the trusted gateway puts the user name in.
    pub auth_header: String,
    /// Challenge time-to-live.
    pub challenge_ttl: Duration,
    /// Per-attempt hub deadline.
    pub hub_timeout: Duration,
    /// Mark the session cookie `Secure`.
    pub secure_cookies: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field("hub_url", &self.hub_url)
            .field("hub_config_path", &self.hub_config_path)
            .field("secret", &"<redacted>")
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<set>"))
            .field("auth_header", &self.auth_header)
            .field("challenge_ttl", &self.challenge_ttl)
            .field("hub_timeout", &self.hub_timeout)
            .field("secure_cookies", &self.secure_cookies)
            .finish()
    }
}

impl ServerConfig {
    /// Read configuration from process environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `IDP_SECRET` is missing or short, or any
    /// variable does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`.
    ///
    /// Empty values count as unset.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let secret = get("IDP_SECRET").ok_or(ConfigError::Missing("IDP_SECRET"))?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid {
                name: "IDP_SECRET",
                reason: format!("must be at least {MIN_SECRET_LEN} bytes"),
            });
        }

        let listen = get("IDP_LISTEN")
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
            .parse()
            .map_err(|e| ConfigError::Invalid {
                name: "IDP_LISTEN",
                reason: format!("{e}"),
            })?;

        Ok(Self {
            listen,
            hub_url: get("IDP_HUB_URL"),
            hub_config_path: get("IDP_HUB_CONFIG")
                .map_or_else(|| PathBuf::from(DEFAULT_HUB_CONFIG), PathBuf::from),
            secret,
            redis_url: get("IDP_REDIS_URL"),
            auth_header: get("IDP_AUTH_HEADER").unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string()),
            challenge_ttl: seconds(get("IDP_CHALLENGE_TTL_SECS"), "IDP_CHALLENGE_TTL_SECS", 600)?,
            hub_timeout: seconds(get("IDP_HUB_TIMEOUT_SECS"), "IDP_HUB_TIMEOUT_SECS", 10)?,
            secure_cookies: flag(get("IDP_SECURE_COOKIES"), "IDP_SECURE_COOKIES")?,
        })
    }
}

fn seconds(value: Option<String>, name: &'static str, default: u64) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(Duration::from_secs(default));
    };
    match value.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::Invalid {
            name,
            reason: "must be positive".to_string(),
        }),
        Ok(secs) => Ok(Duration::from_secs(secs)),
        Err(e) => Err(ConfigError::Invalid {
            name,
            reason: e.to_string(),
        }),
    }
}

fn flag(value: Option<String>, name: &'static str) -> Result<bool, ConfigError> {
    match value.as_deref().map(str::trim) {
        None => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(ConfigError::Invalid {
            name,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}
