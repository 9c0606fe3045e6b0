//! Mock authorization hub for testing.

use crate::error::{IdpError, Result};
use crate::providers::HubClient;
use crate::state::{Challenge, RawRequest, Resolution, Validity};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A resolution as the mock hub received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedResolution {
    /// The hub's reference of the resolved challenge.
    pub hub_ref: String,
    /// What was reported.
    pub resolution: Resolution,
}

#[derive(Debug, Default)]
struct Script {
    register_failures: VecDeque<IdpError>,
    resolve_failures: VecDeque<IdpError>,
    resolutions: Vec<RecordedResolution>,
}

/// Mock hub client.
///
/// Serves one client name and scope list, fails calls according to a script,
/// and records every attempted call. Clones share state.
///
/// **WARNING**: Do NOT use in production. This is for testing only!
#[derive(Debug, Clone)]
pub struct MockHubClient {
    client: String,
    scopes: Vec<String>,
    return_to: Option<String>,
    resolve_delay: Option<Duration>,
    script: Arc<Mutex<Script>>,
    register_calls: Arc<AtomicUsize>,
    resolve_calls: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl MockHubClient {
    /// A hub that registers every challenge for `client` asking for `scopes`.
    #[must_use]
    pub fn new(client: &str, scopes: &[&str]) -> Self {
        Self {
            client: client.to_string(),
            scopes: scopes.iter().map(ToString::to_string).collect(),
            return_to: None,
            resolve_delay: None,
            script: Arc::new(Mutex::new(Script::default())),
            register_calls: Arc::new(AtomicUsize::new(0)),
            resolve_calls: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hand out `url` as the post-resolution redirect.
    #[must_use]
    pub fn with_return_to(mut self, url: &str) -> Self {
        self.return_to = Some(url.to_string());
        self
    }

    /// Make every resolve call take `delay` before answering.
    #[must_use]
    pub const fn with_resolve_delay(mut self, delay: Duration) -> Self {
        self.resolve_delay = Some(delay);
        self
    }

    /// Fail the next `times` registrations with `error`.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn fail_register(self, error: IdpError, times: usize) -> Self {
        self.script
            .lock()
            .unwrap()
            .register_failures
            .extend(std::iter::repeat_n(error, times));
        self
    }

    /// Fail the next `times` resolve calls with `error`.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn fail_resolve(self, error: IdpError, times: usize) -> Self {
        self.script
            .lock()
            .unwrap()
            .resolve_failures
            .extend(std::iter::repeat_n(error, times));
        self
    }

    /// Registration attempts so far, failed ones included.
    #[must_use]
    pub fn register_calls(&self) -> usize {
        self.register_calls.load(Ordering::SeqCst)
    }

    /// Resolve attempts so far, failed ones included.
    #[must_use]
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// Resolutions the hub accepted, in arrival order.
    #[must_use]
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    pub fn resolutions(&self) -> Vec<RecordedResolution> {
        self.script.lock().unwrap().resolutions.clone()
    }

    /// Whether `close` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl HubClient for MockHubClient {
    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn register_challenge(&self, request: &RawRequest, validity: Validity) -> Result<Challenge> {
        let call = self.register_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(IdpError::HubUnreachable("hub client is closed".to_string()));
        }
        if let Some(error) = self.script.lock().unwrap().register_failures.pop_front() {
            return Err(error);
        }

        let hub_ref = request
            .query("challenge")
            .map_or_else(|| format!("hub-ref-{call}"), str::to_string);
        let challenge = Challenge::pending(hub_ref, self.client.clone(), self.scopes.clone(), validity);

        Ok(match &self.return_to {
            Some(url) => challenge.with_return_to(url.clone()),
            None => challenge,
        })
    }

    #[allow(clippy::unwrap_used)] // Test mock: mutex poisoning is a test failure
    async fn resolve(&self, challenge: &Challenge, resolution: &Resolution) -> Result<()> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.resolve_delay {
            tokio::time::sleep(delay).await;
        }
        if self.is_closed() {
            return Err(IdpError::HubUnreachable("hub client is closed".to_string()));
        }

        let mut script = self.script.lock().unwrap();
        if let Some(error) = script.resolve_failures.pop_front() {
            return Err(error);
        }
        script.resolutions.push(RecordedResolution {
            hub_ref: challenge.hub_ref.clone(),
            resolution: resolution.clone(),
        });
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
