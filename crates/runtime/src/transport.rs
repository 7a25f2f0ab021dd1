use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport request failed: {0}")]
    Http(String),

    #[error("transport rejected the message: {0}")]
    Api(String),
}

/// Outgoing side of the chat channel.  Delivery is best effort: callers log
/// failures and rely on their own retry cadence.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(&self, text: &str) -> Result<(), TransportError>;
}
