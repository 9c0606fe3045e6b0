//! # IdP Bridge Testing
//!
//! Testing utilities and helpers for the IdP bridge.
//!
//! This crate provides:
//! - Deterministic clocks (frozen and manually advanced)
//! - Tracing setup for tests that want log output
//! - proptest strategies for the values the bridge handles
//!
//! ## Example
//!
//! ```
//! use idp_bridge_testing::{MockClock, test_clock};
//! use idp_bridge_core::environment::Clock;
//! use chrono::Duration;
//!
//! let clock = MockClock::new(test_clock().now());
//! let start = clock.now();
//! clock.advance(Duration::minutes(11));
//! assert_eq!(clock.now() - start, Duration::minutes(11));
//! ```

use chrono::{DateTime, Utc};
use idp_bridge_core::environment::Clock;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use idp_bridge_testing::mocks::FixedClock;
    /// use idp_bridge_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// A clock tests can move forward.
    ///
    /// Clones share the same underlying instant, so a test can hand one clone
    /// to the component under test and keep another to advance time.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl MockClock {
        /// Create a clock starting at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Jump to an absolute instant.
        pub fn set(&self, time: DateTime<Utc>) {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner) = time;
        }

        /// Move the clock forward by `by`.
        pub fn advance(&self, by: chrono::Duration) {
            let mut guard = self.time.lock().unwrap_or_else(PoisonError::into_inner);
            *guard += by;
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap_or_else(PoisonError::into_inner)
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities.
pub mod helpers {
    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs anything.
    /// Honors `RUST_LOG`.
    pub fn init_test_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// OAuth-style scope names such as `openid` or `photos.read`.
    pub fn scope() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,11}(\\.[a-z]{1,8})?"
    }

    /// A requested scope list, possibly empty.
    pub fn scope_list() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(scope(), 0..6)
    }

    /// A user name as an authentication delegate might report it.
    pub fn user_name() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9._-]{0,31}"
    }

    /// Arbitrary text, used to feed decoders garbage.
    pub fn garbage() -> impl Strategy<Value = String> {
        ".{0,128}"
    }
}

// Re-export commonly used items
pub use mocks::{FixedClock, MockClock, test_clock};
