//! Collaborator traits of the challenge-consent protocol.
//!
//! The machine depends on these traits only; concrete implementations are
//! constructed by whoever assembles the bridge and injected through
//! [`crate::environment::IdpEnvironment`].
//!
//! ```text
//!             ┌────────────────────┐
//!  RawRequest │  ChallengeMachine  │  Resolution
//! ───────────►│                    ├────────────► HubClient (Hydra)
//!             └──┬──────────────┬──┘
//!                │              │
//!                ▼              ▼
//!   AuthenticationDelegate   ChallengeStore (memory / Redis)
//! ```
//!
//! This enables:
//! - **Testing**: mocks from [`crate::mocks`] (scripted, deterministic)
//! - **Production**: [`HydraHubClient`] and [`crate::stores::RedisChallengeStore`]

pub mod authenticator;
pub mod hub;
pub mod hydra;
pub mod store;

// Re-export provider traits
pub use authenticator::{AuthenticationDelegate, Identity};
pub use hub::HubClient;
pub use hydra::HydraHubClient;
pub use store::{ChallengeStore, HubRefBinding};
