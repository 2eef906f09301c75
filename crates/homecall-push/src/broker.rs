use async_trait::async_trait;
use homecall_common::error::Result;

/// Destination of serialized metrics messages.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn deliver(&self, key: &str, payload: &[u8]) -> Result<()>;

    /// Where records go, for logs.
    fn describe(&self) -> String;
}
