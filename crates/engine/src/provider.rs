//! Push provider contract. One instance per configured endpoint.

use async_trait::async_trait;

use nudge_common::types::{Outcome, SilentPayload};

/// Opaque "send and get accepted / rejected / error" capability.
///
/// Implementations never return `Err`: anything that prevents a provider
/// response is reported as [`Outcome::TransportError`].
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn send(&self, token: &str, payload: &SilentPayload) -> Outcome;
}
