//! Router composition.

use crate::handlers::{self, consent, entry};
use crate::state::AppState;
use axum::{
    Router,
    http::{HeaderValue, header},
    routing::{get, post},
};
use idp_bridge::providers::{AuthenticationDelegate, ChallengeStore, HubClient};
use tower::ServiceBuilder;
use tower_http::{set_header::SetResponseHeaderLayer, trace::TraceLayer};

/// Create the bridge's router.
///
/// # Routes
///
/// - `GET /`, `POST /` - Begin a challenge and authenticate
/// - `GET /consent` - Ask the consent question
/// - `POST /consent` - Record the answer and report it to the hub
/// - `POST /consent/resolve` - Retry reporting after a hub outage
/// - `GET /health` - Liveness
///
/// Every response carries `Cache-Control: no-store`: pages embed single-use
/// tokens.
///
/// # Example
///
/// ```rust,ignore
/// let app = bridge_router(AppState::new(machine, Arc::new(HtmlPresenter), sessions));
/// axum::serve(listener, app).await?;
/// ```
pub fn bridge_router<H, S, A>(state: AppState<H, S, A>) -> Router
where
    H: HubClient + 'static,
    S: ChallengeStore + 'static,
    A: AuthenticationDelegate + 'static,
{
    Router::new()
        .route("/", get(entry::entry::<H, S, A>).post(entry::entry::<H, S, A>))
        .route(
            "/consent",
            get(consent::consent_page::<H, S, A>).post(consent::submit_consent::<H, S, A>),
        )
        .route("/consent/resolve", post(consent::retry_resolve::<H, S, A>))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(SetResponseHeaderLayer::overriding(
                    header::CACHE_CONTROL,
                    HeaderValue::from_static("no-store"),
                )),
        )
}
