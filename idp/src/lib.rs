//! # IdP Bridge
//!
//! The challenge-consent protocol between an OAuth2 authorization hub
//! (ORY Hydra) and the user's browser.
//!
//! ## Features
//!
//! - **Explicit lifecycle**: `Pending → Authenticated → Decided → Resolved`,
//!   with `Expired` and `Failed` as the only other ends
//! - **Tamper-evident tokens**: HMAC-signed browser blobs, AES-GCM sealed records
//! - **Session-scoped storage**: a token is only valid in the session that began it
//! - **Pluggable collaborators**: hub, store and authentication delegate are traits
//! - **Testable**: every collaborator has an in-memory implementation
//!
//! ## Architecture
//!
//! ```text
//! browser ──► web handler ──► ChallengeMachine ──► HubClient (Hydra)
//!                                  │    │
//!                                  │    └──► AuthenticationDelegate
//!                                  └──► ChallengeStore (memory / Redis)
//! ```
//!
//! [`lifecycle::apply`] computes transitions without I/O;
//! [`machine::ChallengeMachine`] loads, applies, persists with a
//! compare-and-swap, and calls the hub with bounded retries.

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

// Public modules
pub mod codec;
pub mod config;
pub mod environment;
pub mod error;
pub mod lifecycle;
pub mod machine;
pub mod providers;
pub mod state;
pub mod stores;

#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use codec::TokenCodec;
pub use config::{ChallengeConfig, HubConfig, HubCredentials};
pub use environment::IdpEnvironment;
pub use error::{IdpError, Result};
pub use machine::ChallengeMachine;
pub use state::{
    Challenge, ChallengeState, ChallengeToken, ConsentPrompt, Decision, RawRequest, Resolution,
    SessionId, SignedToken, Validity,
};
