//! Axum HTTP surface of the IdP bridge.
//!
//! This crate is the imperative shell around [`idp_bridge::ChallengeMachine`]:
//! it turns browser requests into machine operations and machine outcomes
//! into pages and redirects.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │         Imperative Shell (Axum)         │  ← HTTP, forms, cookies
//! │  - Request parsing (RawRequest)         │  ← Session cookie
//! │  - Page rendering (ConsentPresenter)    │  ← Logging, metrics
//! ├─────────────────────────────────────────┤
//! │         ChallengeMachine                │
//! │  - Lifecycle transitions                │  ← Pure, tested without I/O
//! │  - Store compare-and-swap               │  ← One winner per transition
//! │  - Hub calls with retry and deadline    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Request Flow
//!
//! 1. **`GET /`** registers a challenge with the hub and authenticates the
//!    user through the configured delegate
//! 2. **`GET /consent`** shows the client and the requested scopes
//! 3. **`POST /consent`** records the answer and reports it to the hub
//! 4. The browser is sent to the hub's `return_to`
//!
//! # Example
//!
//! ```ignore
//! use idp_bridge_web::{AppState, HtmlPresenter, SessionKeys, bridge_router};
//!
//! let state = AppState::new(machine, Arc::new(HtmlPresenter), SessionKeys::new(codec, true));
//! let app = bridge_router(state);
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod presentation;
pub mod router;
pub mod session;
pub mod state;

// Re-export key types for convenience
pub use auth::TrustedHeaderAuthenticator;
pub use config::{ConfigError, ServerConfig};
pub use error::AppError;
pub use extractors::BrowserSession;
pub use presentation::{ConsentPresenter, HtmlPresenter};
pub use router::bridge_router;
pub use session::{SESSION_COOKIE, SessionKeys};
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
