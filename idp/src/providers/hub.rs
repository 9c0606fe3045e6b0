//! Authorization hub client trait.

use crate::error::Result;
use crate::state::{Challenge, RawRequest, Resolution, Validity};

/// Outbound adapter to the authorization service that delegated the decision.
///
/// Failures are classified for the caller:
/// - [`crate::IdpError::HubUnreachable`]: transport failure, timeout or
///   temporary hub error; the machine retries with bounded backoff
/// - [`crate::IdpError::HubRejected`]: the hub answered and refused; never
///   retried
pub trait HubClient: Send + Sync {
    /// Read the hub's challenge reference from `request`, fetch the client and
    /// requested scopes, and return a Pending challenge with a fresh token
    /// valid for `validity`.
    ///
    /// # Errors
    ///
    /// Returns `HubRejected` if the request carries no reference or the hub
    /// does not know it, `HubUnreachable` if the hub cannot be reached.
    fn register_challenge(
        &self,
        request: &RawRequest,
        validity: Validity,
    ) -> impl std::future::Future<Output = Result<Challenge>> + Send;

    /// Report the final decision for `challenge`.
    ///
    /// The machine calls this at most once per challenge.
    ///
    /// # Errors
    ///
    /// Returns `HubRejected` or `HubUnreachable` as above.
    fn resolve(
        &self,
        challenge: &Challenge,
        resolution: &Resolution,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Release connection resources. Idempotent.
    fn close(&self) -> impl std::future::Future<Output = ()> + Send;
}
