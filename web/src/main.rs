//! IdP bridge server.
//!
//! Fronts a Hydra-style authorization hub: registers consent challenges,
//! authenticates users through a trusted gateway header, asks for consent
//! and reports the answer back to the hub.
//!
//! Run with: `IDP_SECRET=... cargo run --bin idp-bridge`
//! Health: <http://localhost:3000/health>
//!
//! See [`idp_bridge_web::config`] for the environment variables.

use anyhow::Context;
use idp_bridge::providers::HydraHubClient;
use idp_bridge::stores::{ChallengeBackend, InMemoryChallengeStore, RedisChallengeStore};
use idp_bridge::{
    ChallengeConfig, ChallengeMachine, HubConfig, HubCredentials, IdpEnvironment, TokenCodec,
};
use idp_bridge_core::environment::{Clock, SystemClock};
use idp_bridge_web::{
    AppState, HtmlPresenter, ServerConfig, SessionKeys, TrustedHeaderAuthenticator, bridge_router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the in-memory store drops expired records.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if present)
    let _ = dotenvy::dotenv();

    init_tracing();

    let config = ServerConfig::from_env()?;
    info!(?config, "Starting IdP bridge");

    let codec = TokenCodec::new(config.secret.as_bytes())?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Hub client
    let credentials = HubCredentials::from_yaml_file(&config.hub_config_path).with_context(|| {
        format!(
            "reading hub credentials from {}",
            config.hub_config_path.display()
        )
    })?;
    let hub_config = HubConfig::from_credentials(credentials, config.hub_url.as_deref())
        .with_timeout(config.hub_timeout);
    info!(hub = %hub_config.base_url, "Hub configured");
    let hub = HydraHubClient::new(hub_config)?;

    // Challenge store
    let mut purge_task = None;
    let store: ChallengeBackend = match &config.redis_url {
        Some(url) => RedisChallengeStore::new(url, codec.clone(), Arc::clone(&clock))
            .await?
            .into(),
        None => {
            let store = InMemoryChallengeStore::new(codec.clone(), Arc::clone(&clock));
            purge_task = Some(store.spawn_purge_task(PURGE_INTERVAL));
            store.into()
        }
    };
    info!(store = store.kind(), "Challenge store ready");

    let authenticator = TrustedHeaderAuthenticator::new(config.auth_header.clone());

    let ttl = chrono::Duration::from_std(config.challenge_ttl)
        .context("IDP_CHALLENGE_TTL_SECS is out of range")?;
    let challenge_config = ChallengeConfig::new()
        .with_ttl(ttl)
        .with_hub_timeout(config.hub_timeout);

    let env = IdpEnvironment::new(hub, store, authenticator, codec.clone(), clock)
        .with_config(challenge_config);
    let machine = ChallengeMachine::new(env);

    let state = AppState::new(
        machine,
        Arc::new(HtmlPresenter),
        SessionKeys::new(codec, config.secure_cookies),
    );
    let machine = Arc::clone(&state.machine);
    let app = bridge_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(listen = %config.listen, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = purge_task {
        task.abort();
    }
    machine.close().await;

    info!("Server stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "idp_bridge=info,idp_bridge_web=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received, draining connections");
}
