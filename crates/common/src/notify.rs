use async_trait::async_trait;
use tracing::info;

use crate::Result;

/// Delivery channel for trigger notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Sink used when no delivery channel is configured. Writes the message to the log.
#[derive(Debug, Default, Clone)]
pub struct LoggingSink;

#[async_trait]
impl NotificationSink for LoggingSink {
    async fn send(&self, text: &str) -> Result<()> {
        info!(message = %text, "Notification (delivery disabled)");
        Ok(())
    }
}
