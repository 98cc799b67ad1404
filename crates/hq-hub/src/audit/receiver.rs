//! # Audit Receiver
//!
//! A single long-lived consumer that moves audit records from the broker
//! queue into the audit index.
//!
//! ```text
//! Disconnected ──▶ Connecting ──▶ Connected ──▶ Consuming
//!      ▲               │              │             │
//!      └───── backoff ◀┴──────────────┴─────────────┘
//! ```
//!
//! Failures never end the loop. The delay before retry `n` is
//! `base * 2^n` plus up to one second of jitter; after `max_attempts`
//! consecutive failures the counter starts over. Only [`AuditReceiver::stop`]
//! ends it, and the receiver then settles in [`ReceiverState::Stopped`].

use crate::backend::DocumentIndex;
use crate::broker::{Broker, BrokerChannel, BrokerError, Delivery};
use crate::config::Config;
use hq_core::AuditRecord;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Disconnected,
    Connecting,
    Connected,
    Consuming,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReceiverError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("channel error: {0}")]
    Channel(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl From<BrokerError> for ReceiverError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Connection(msg) => ReceiverError::Connection(msg),
            BrokerError::Channel(msg) => ReceiverError::Channel(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    pub queue: String,
    pub index: String,
    pub prefetch: u16,
    pub backoff_base: Duration,
    pub max_attempts: u32,
}

impl ReceiverConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue: config.broker.queue.clone(),
            index: config.search.audit_index.clone(),
            prefetch: config.broker.prefetch,
            backoff_base: Duration::from_secs(config.receiver.backoff_base_secs),
            max_attempts: config.receiver.max_attempts,
        }
    }
}

pub struct AuditReceiver {
    broker: Arc<dyn Broker>,
    index: Arc<dyn DocumentIndex>,
    config: ReceiverConfig,
    running: AtomicBool,
    shutdown: Notify,
    state: watch::Sender<ReceiverState>,
}

impl AuditReceiver {
    pub fn new(
        broker: Arc<dyn Broker>,
        index: Arc<dyn DocumentIndex>,
        config: ReceiverConfig,
    ) -> Self {
        let (state, _) = watch::channel(ReceiverState::Disconnected);
        Self {
            broker,
            index,
            config,
            running: AtomicBool::new(true),
            shutdown: Notify::new(),
            state,
        }
    }

    pub fn state(&self) -> ReceiverState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReceiverState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the consume loop to finish. Returns immediately; safe to call
    /// from any task, any number of times.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("Audit receiver stopping");
            self.shutdown.notify_one();
        }
    }

    fn set_state(&self, next: ReceiverState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!("Audit receiver {:?} -> {:?}", previous, next);
        }
    }

    /// Run until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        tracing::info!(
            "Audit receiver starting on queue '{}' -> index '{}'",
            self.config.queue,
            self.config.index
        );

        let mut attempt: u32 = 0;
        while self.is_running() {
            self.set_state(ReceiverState::Connecting);
            let err = match self.connect_and_consume(&mut attempt).await {
                Ok(()) => break,
                Err(err) => err,
            };
            if !self.is_running() {
                break;
            }
            self.set_state(ReceiverState::Disconnected);

            if attempt >= self.config.max_attempts {
                tracing::warn!(
                    "Audit receiver failed {} times in a row, starting a new retry cycle",
                    attempt
                );
                attempt = 0;
            }
            let jitter = rand::thread_rng().gen::<f64>();
            let delay = backoff_delay(self.config.backoff_base, attempt, jitter);
            self.handle_failure(&err, attempt, delay);
            attempt += 1;

            if !self.sleep_or_stop(delay).await {
                break;
            }
        }

        self.set_state(ReceiverState::Stopped);
        tracing::info!("Audit receiver stopped");
    }

    async fn connect_and_consume(&self, attempt: &mut u32) -> Result<(), ReceiverError> {
        let mut channel = self
            .broker
            .connect()
            .await
            .map_err(|e| ReceiverError::Connection(e.to_string()))?;
        self.set_state(ReceiverState::Connected);

        let result = self.consume(channel.as_mut(), attempt).await;
        channel.close().await;
        result
    }

    async fn consume(
        &self,
        channel: &mut dyn BrokerChannel,
        attempt: &mut u32,
    ) -> Result<(), ReceiverError> {
        channel.declare_queue(&self.config.queue).await?;
        channel.set_prefetch(self.config.prefetch).await?;
        channel.consume(&self.config.queue).await?;

        self.set_state(ReceiverState::Consuming);
        *attempt = 0;
        tracing::info!(
            "Audit receiver consuming '{}' (prefetch {})",
            self.config.queue,
            self.config.prefetch
        );

        while self.is_running() {
            let next = tokio::select! {
                _ = self.shutdown.notified() => return Ok(()),
                next = channel.next_delivery() => next?,
            };

            let Some(delivery) = next else {
                if !self.is_running() {
                    return Ok(());
                }
                return Err(ReceiverError::Unexpected("delivery stream closed".into()));
            };
            self.handle_delivery(channel, delivery).await?;
        }
        Ok(())
    }

    /// Index one delivery. Ack only after the write succeeds; anything else
    /// goes back on the queue.
    async fn handle_delivery(
        &self,
        channel: &mut dyn BrokerChannel,
        delivery: Delivery,
    ) -> Result<(), ReceiverError> {
        let record = match AuditRecord::from_json(&delivery.body) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("Malformed audit message {}: {}", delivery.tag, e);
                channel.nack(delivery.tag, true).await?;
                return Ok(());
            }
        };

        let document =
            serde_json::to_value(&record).map_err(|e| ReceiverError::Unexpected(e.to_string()))?;

        match self.index.index(&self.config.index, &document).await {
            Ok(id) => {
                channel.ack(delivery.tag).await?;
                tracing::info!(
                    "Indexed audit record {} ({} searched '{}')",
                    id,
                    record.username(),
                    record.query()
                );
            }
            Err(e) => {
                tracing::error!(
                    "Failed to index audit message {} into '{}': {}",
                    delivery.tag,
                    self.config.index,
                    e
                );
                channel.nack(delivery.tag, true).await?;
            }
        }
        Ok(())
    }

    fn handle_failure(&self, err: &ReceiverError, attempt: u32, delay: Duration) {
        let retry = attempt + 1;
        let max = self.config.max_attempts;
        let secs = delay.as_secs_f64();
        match err {
            ReceiverError::Connection(e) => tracing::error!(
                "Audit receiver connection error: {} (attempt {}/{}, retrying in {:.1}s)",
                e,
                retry,
                max,
                secs
            ),
            ReceiverError::Channel(e) => tracing::error!(
                "Audit receiver channel error: {} (attempt {}/{}, retrying in {:.1}s)",
                e,
                retry,
                max,
                secs
            ),
            ReceiverError::Unexpected(e) => tracing::error!(
                "Audit receiver unexpected error: {} (attempt {}/{}, retrying in {:.1}s)",
                e,
                retry,
                max,
                secs
            ),
        }
    }

    /// Sleep for `delay`. Returns `false` if stopped before or during the wait.
    async fn sleep_or_stop(&self, delay: Duration) -> bool {
        if !self.is_running() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => self.is_running(),
            _ = self.shutdown.notified() => false,
        }
    }
}

/// `base * 2^attempt + jitter` seconds, with `jitter` clamped to `[0, 1]`.
pub fn backoff_delay(base: Duration, attempt: u32, jitter: f64) -> Duration {
    let factor = 2u32.saturating_pow(attempt);
    base.saturating_mul(factor) + Duration::from_secs_f64(jitter.clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::RecordingIndex;
    use crate::broker::memory::MemoryBroker;
    use tokio::task::JoinHandle;

    const QUEUE: &str = "search_query_queue";

    fn config() -> ReceiverConfig {
        ReceiverConfig {
            queue: QUEUE.into(),
            index: "search_query_logs".into(),
            prefetch: 10,
            backoff_base: Duration::from_secs(1),
            max_attempts: 5,
        }
    }

    fn audit_body(query: &str) -> Vec<u8> {
        AuditRecord::new("10.1.1.1", "analyst", query)
            .to_json()
            .unwrap()
    }

    fn start(
        broker: &MemoryBroker,
        index: Arc<RecordingIndex>,
    ) -> (Arc<AuditReceiver>, JoinHandle<()>) {
        let receiver = Arc::new(AuditReceiver::new(Arc::new(broker.clone()), index, config()));
        let runner = receiver.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        (receiver, handle)
    }

    async fn eventually(what: &str, check: impl Fn() -> bool) {
        for _ in 0..100_000 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never held: {}", what);
    }

    async fn shutdown(receiver: Arc<AuditReceiver>, handle: JoinHandle<()>) {
        receiver.stop();
        handle.await.unwrap();
        assert_eq!(receiver.state(), ReceiverState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connects_after_initial_failure_and_indexes() {
        let broker = MemoryBroker::new().fail_connects(1);
        broker.push(QUEUE, audit_body("Hostname = octoxlabs*"));
        let index = Arc::new(RecordingIndex::default());
        let (receiver, handle) = start(&broker, index.clone());

        eventually("message acked", || broker.log().acked.len() == 1).await;
        assert_eq!(receiver.state(), ReceiverState::Consuming);

        let log = broker.log();
        assert_eq!(log.connects, 2);
        assert_eq!(log.declared, vec![QUEUE.to_string()]);
        assert_eq!(log.prefetch, Some(10));
        assert!(log.nacked.is_empty());

        let documents = index.documents();
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].0, "search_query_logs");
        assert_eq!(documents[0].1["query"], "Hostname = octoxlabs*");
        assert_eq!(documents[0].1["username"], "analyst");

        shutdown(receiver, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_index_failure_is_requeued() {
        let broker = MemoryBroker::new();
        broker.push(QUEUE, audit_body("ip = 10.0.0.1"));
        let index = Arc::new(RecordingIndex::failing_first(1));
        let (receiver, handle) = start(&broker, index.clone());

        eventually("redelivery acked", || broker.log().acked.len() == 1).await;
        let log = broker.log();
        assert_eq!(log.nacked, vec![(1, true)]);
        assert_eq!(log.acked, vec![2]);
        assert_eq!(index.documents().len(), 1);

        shutdown(receiver, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_message_is_nacked_with_requeue() {
        let broker = MemoryBroker::new().no_redelivery();
        broker.push(QUEUE, b"not json".to_vec());
        broker.push(QUEUE, audit_body("ip = 10.0.0.2"));
        let index = Arc::new(RecordingIndex::default());
        let (receiver, handle) = start(&broker, index.clone());

        eventually("second message acked", || broker.log().acked.len() == 1).await;
        let log = broker.log();
        assert_eq!(log.nacked, vec![(1, true)]);
        assert_eq!(log.acked, vec![2]);
        assert_eq!(index.documents().len(), 1);

        shutdown(receiver, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_declare_failure_closes_and_retries() {
        let broker = MemoryBroker::new().fail_declares(1);
        let index = Arc::new(RecordingIndex::default());
        let (receiver, handle) = start(&broker, index);

        let mut states = receiver.subscribe();
        states
            .wait_for(|s| *s == ReceiverState::Consuming)
            .await
            .unwrap();
        let log = broker.log();
        assert_eq!(log.connects, 2);
        assert_eq!(log.closed, 1);

        shutdown(receiver, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_stream_reconnects() {
        let broker = MemoryBroker::new();
        let index = Arc::new(RecordingIndex::default());
        let (receiver, handle) = start(&broker, index.clone());

        eventually("consuming", || receiver.state() == ReceiverState::Consuming).await;
        broker.close_streams();
        eventually("reconnected", || broker.log().connects == 2).await;
        eventually("consuming again", || receiver.state() == ReceiverState::Consuming).await;

        broker.push(QUEUE, audit_body("ip = 10.0.0.3"));
        eventually("message indexed", || index.documents().len() == 1).await;

        shutdown(receiver, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_cycle_restarts_after_max_attempts() {
        let broker = MemoryBroker::new().fail_connects(6);
        let index = Arc::new(RecordingIndex::default());
        let started = tokio::time::Instant::now();
        let (receiver, handle) = start(&broker, index);

        eventually("consuming", || receiver.state() == ReceiverState::Consuming).await;
        let elapsed = started.elapsed();
        assert_eq!(broker.log().connects, 7);
        // 1+2+4+8+16, then the cycle restarts at 1s, plus up to 1s of jitter each.
        assert!(elapsed >= Duration::from_secs(32), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(40), "elapsed {:?}", elapsed);

        shutdown(receiver, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff() {
        let broker = MemoryBroker::new().fail_connects(usize::MAX);
        let index = Arc::new(RecordingIndex::default());
        let (receiver, handle) = start(&broker, index);

        eventually("first failure", || broker.log().connects >= 1).await;
        let before = tokio::time::Instant::now();
        shutdown(receiver, handle).await;
        assert!(before.elapsed() < Duration::from_secs(1));
        assert_eq!(broker.log().connects, 1);
    }

    #[tokio::test]
    async fn test_stop_before_run_is_idempotent() {
        let broker = MemoryBroker::new();
        let receiver = AuditReceiver::new(
            Arc::new(broker.clone()),
            Arc::new(RecordingIndex::default()),
            config(),
        );
        receiver.stop();
        receiver.stop();
        receiver.run().await;
        assert_eq!(receiver.state(), ReceiverState::Stopped);
        assert_eq!(broker.log().connects, 0);
    }

    #[test]
    fn test_backoff_delay() {
        let base = Duration::from_secs(5);
        assert_eq!(backoff_delay(base, 0, 0.0), Duration::from_secs(5));
        assert_eq!(backoff_delay(base, 1, 0.0), Duration::from_secs(10));
        assert_eq!(backoff_delay(base, 3, 0.5), Duration::from_millis(40_500));
        assert_eq!(backoff_delay(base, 4, 7.0), Duration::from_secs(81));
        // saturates instead of overflowing
        assert!(backoff_delay(base, 64, 0.0) >= Duration::from_secs(u64::from(u32::MAX)));
    }
}
