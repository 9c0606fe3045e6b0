//! # IdP Bridge Core
//!
//! Environment seams shared by every crate in the IdP bridge workspace.
//!
//! The protocol core never reads ambient process state directly. Anything that
//! varies between production and tests (currently: the wall clock) is reached
//! through a trait defined here and injected by whoever assembles the
//! components.
//!
//! ## Example
//!
//! ```
//! use idp_bridge_core::environment::{Clock, SystemClock};
//! use std::sync::Arc;
//!
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//! let _now = clock.now();
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment traits - injected dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// Every expiry decision in the bridge (token blobs, stored challenges,
    /// resolve leases) is taken against a `Clock`, so tests can move time
    /// forward without sleeping.
    ///
    /// # Examples
    ///
    /// ```
    /// use idp_bridge_core::environment::Clock;
    /// use chrono::{DateTime, Utc};
    ///
    /// struct FrozenClock(DateTime<Utc>);
    ///
    /// impl Clock for FrozenClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.0
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
