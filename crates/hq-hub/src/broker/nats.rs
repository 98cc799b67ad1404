//! # NATS JetStream Broker
//!
//! Maps the queue model onto JetStream:
//!
//! - a queue is a file-backed stream whose only subject is the queue name,
//! - publishing with `persistent` waits for the server's storage ack,
//! - consuming is a durable pull consumer with explicit acks and
//!   `max_ack_pending` as the prefetch limit,
//! - nack-with-requeue is `Nak` (redeliver), nack-without-requeue is `Term`.

use super::{Broker, BrokerChannel, BrokerError, Delivery};
use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, stream, AckKind};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::collections::HashMap;

pub struct NatsBroker {
    url: String,
}

impl NatsBroker {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl Broker for NatsBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let client = async_nats::connect(self.url.as_str())
            .await
            .map_err(|e| BrokerError::Connection(format!("{}: {}", self.url, e)))?;
        let jetstream = jetstream::new(client.clone());
        Ok(Box::new(NatsChannel {
            client,
            jetstream,
            stream: None,
            prefetch: 1,
            messages: None,
            in_flight: HashMap::new(),
            next_tag: 0,
        }))
    }
}

type MessageStream = BoxStream<'static, Result<jetstream::Message, String>>;

pub struct NatsChannel {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    stream: Option<jetstream::stream::Stream>,
    prefetch: u16,
    messages: Option<MessageStream>,
    in_flight: HashMap<u64, jetstream::Message>,
    next_tag: u64,
}

impl NatsChannel {
    fn take_in_flight(&mut self, tag: u64) -> Result<jetstream::Message, BrokerError> {
        self.in_flight
            .remove(&tag)
            .ok_or_else(|| BrokerError::Channel(format!("unknown delivery tag {}", tag)))
    }
}

#[async_trait::async_trait]
impl BrokerChannel for NatsChannel {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        let stream = self
            .jetstream
            .get_or_create_stream(stream::Config {
                name: queue.to_string(),
                subjects: vec![queue.to_string()],
                storage: stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Channel(format!("declare {}: {}", queue, e)))?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn publish(
        &mut self,
        queue: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BrokerError> {
        if !persistent {
            return self
                .client
                .publish(queue.to_string(), body.into())
                .await
                .map_err(|e| BrokerError::Channel(format!("publish {}: {}", queue, e)));
        }

        let ack = self
            .jetstream
            .publish(queue.to_string(), body.into())
            .await
            .map_err(|e| BrokerError::Channel(format!("publish {}: {}", queue, e)))?;
        ack.await
            .map_err(|e| BrokerError::Channel(format!("publish ack {}: {}", queue, e)))?;
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        if count == 0 {
            return Err(BrokerError::Channel("prefetch must be at least 1".into()));
        }
        self.prefetch = count;
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> Result<(), BrokerError> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| BrokerError::Channel(format!("queue {} not declared", queue)))?;

        let durable = format!("{}-receiver", queue);
        let consumer = stream
            .get_or_create_consumer(
                &durable,
                pull::Config {
                    durable_name: Some(durable.clone()),
                    ack_policy: AckPolicy::Explicit,
                    max_ack_pending: i64::from(self.prefetch),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Channel(format!("consumer {}: {}", durable, e)))?;

        let messages = consumer
            .messages()
            .await
            .map_err(|e| BrokerError::Channel(format!("subscribe {}: {}", durable, e)))?;
        self.messages = Some(messages.map(|m| m.map_err(|e| e.to_string())).boxed());
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let messages = self
            .messages
            .as_mut()
            .ok_or_else(|| BrokerError::Channel("not consuming".into()))?;

        match messages.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(BrokerError::Connection(e)),
            Some(Ok(message)) => {
                self.next_tag += 1;
                let tag = self.next_tag;
                let body = message.payload.to_vec();
                self.in_flight.insert(tag, message);
                Ok(Some(Delivery { tag, body }))
            }
        }
    }

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError> {
        let message = self.take_in_flight(tag)?;
        message
            .ack()
            .await
            .map_err(|e| BrokerError::Channel(format!("ack {}: {}", tag, e)))
    }

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        let message = self.take_in_flight(tag)?;
        let kind = if requeue { AckKind::Nak(None) } else { AckKind::Term };
        message
            .ack_with(kind)
            .await
            .map_err(|e| BrokerError::Channel(format!("nack {}: {}", tag, e)))
    }

    async fn close(&mut self) {
        self.messages = None;
        // Unacked messages are redelivered by the server once their ack wait expires.
        self.in_flight.clear();
        if let Err(e) = self.client.flush().await {
            tracing::debug!("Flush on close failed: {}", e);
        }
    }
}
