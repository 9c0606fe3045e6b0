//! Mock provider implementations for testing.
//!
//! This module provides simple, in-memory implementations of the hub and
//! authentication traits for use in unit and integration tests, and a store
//! wrapper that injects interleavings and write failures.

pub mod authenticator;
pub mod hub;
pub mod store;

pub use authenticator::MockAuthenticator;
pub use hub::{MockHubClient, RecordedResolution};
pub use store::MockChallengeStore;
