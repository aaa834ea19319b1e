use async_trait::async_trait;

use crate::{domain::Destination, Result};

/// Port for delivering relayed text into a chat channel.
///
/// The relay treats `emit` as best-effort once a request has authenticated:
/// failures are logged, never reported back to the peer.
#[async_trait]
pub trait RelaySink: Send + Sync {
    async fn emit(&self, destination: &Destination, text: &str) -> Result<()>;
}
