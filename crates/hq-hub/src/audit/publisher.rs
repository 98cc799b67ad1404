//! Best-effort audit emission. Each publish opens its own broker session and
//! closes it before returning; nothing is pooled.

use crate::broker::{Broker, BrokerChannel, BrokerError};
use hq_core::AuditRecord;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("could not encode audit record: {0}")]
    Encode(#[from] serde_json::Error),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("audit publish timed out after {0:?}")]
    Timeout(Duration),
}

pub struct AuditPublisher {
    broker: Arc<dyn Broker>,
    queue: String,
    timeout: Duration,
}

impl AuditPublisher {
    pub fn new(broker: Arc<dyn Broker>, queue: impl Into<String>, timeout: Duration) -> Self {
        Self {
            broker,
            queue: queue.into(),
            timeout,
        }
    }

    /// Open a session, declare the queue, publish persistently, close.
    pub async fn publish(&self, record: &AuditRecord) -> Result<(), PublishError> {
        let body = record.to_json()?;
        tokio::time::timeout(self.timeout, self.send(body))
            .await
            .map_err(|_| PublishError::Timeout(self.timeout))??;
        tracing::debug!("Published audit record for '{}' to {}", record.username(), self.queue);
        Ok(())
    }

    async fn send(&self, body: Vec<u8>) -> Result<(), BrokerError> {
        let mut channel = self.broker.connect().await?;
        let result = declare_and_publish(channel.as_mut(), &self.queue, body).await;
        channel.close().await;
        result
    }
}

async fn declare_and_publish(
    channel: &mut dyn BrokerChannel,
    queue: &str,
    body: Vec<u8>,
) -> Result<(), BrokerError> {
    channel.declare_queue(queue).await?;
    channel.publish(queue, body, true).await
}
