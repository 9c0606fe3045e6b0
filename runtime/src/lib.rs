//! # IdP Bridge Runtime
//!
//! Runtime utilities for calls that leave the process.
//!
//! Every request the bridge makes to the authorization hub is bounded twice:
//! each attempt runs under a deadline ([`deadline`]), and transient failures
//! are retried with capped exponential backoff up to a small ceiling
//! ([`retry`]). Nothing here knows about challenges or hubs; callers supply the
//! operation and decide which errors are transient.
//!
//! ## Example
//!
//! ```rust
//! use idp_bridge_runtime::deadline::with_deadline;
//! use idp_bridge_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder().max_retries(2).build();
//!
//! let value = retry_with_predicate(
//!     policy,
//!     || async {
//!         with_deadline(Duration::from_secs(1), async { Ok::<_, String>(7) })
//!             .await
//!             .map_err(|e| e.to_string())?
//!     },
//!     |err: &String| err.contains("deadline"),
//! )
//! .await?;
//! assert_eq!(value, 7);
//! # Ok(())
//! # }
//! ```

/// Per-attempt deadlines
pub mod deadline;

/// Retry logic with exponential backoff
pub mod retry;
