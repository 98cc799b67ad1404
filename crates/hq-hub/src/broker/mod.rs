//! # Message Broker
//!
//! The durable queue the audit trail travels through. Producers and the
//! consumer only see [`Broker`] (opens a session) and [`BrokerChannel`]
//! (one session: declare, publish, consume, ack). [`nats::NatsBroker`] is the
//! production implementation.

pub mod nats;

#[cfg(test)]
pub mod memory;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    /// Could not reach the broker or the connection dropped.
    #[error("broker connection error: {0}")]
    Connection(String),
    /// The connection is up but a queue/channel operation failed.
    #[error("broker channel error: {0}")]
    Channel(String),
}

/// One message handed to a consumer. `tag` identifies it for ack/nack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    /// Open a fresh connection and channel.
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;
}

/// A single broker session. Not shared between tasks.
#[async_trait::async_trait]
pub trait BrokerChannel: Send {
    /// Declare a durable queue. Declaring an existing queue is a no-op.
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError>;

    async fn publish(&mut self, queue: &str, body: Vec<u8>, persistent: bool)
        -> Result<(), BrokerError>;

    /// Cap the number of unacknowledged deliveries in flight.
    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError>;

    /// Start a durable subscription on `queue`.
    async fn consume(&mut self, queue: &str) -> Result<(), BrokerError>;

    /// Wait for the next delivery. `Ok(None)` means the broker ended the subscription.
    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError>;

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError>;

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError>;

    /// Release the session. Unacknowledged deliveries go back to the queue.
    async fn close(&mut self);
}
