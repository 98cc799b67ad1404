//! In-process broker for tests. Queues are shared through an `Arc`, so a
//! publisher and a receiver built from clones see the same messages.

use super::{Broker, BrokerChannel, BrokerError, Delivery};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

#[derive(Debug, Default, Clone)]
pub struct BrokerLog {
    pub connects: usize,
    pub declared: Vec<String>,
    pub published: Vec<(String, Vec<u8>, bool)>,
    pub prefetch: Option<u16>,
    pub acked: Vec<u64>,
    pub nacked: Vec<(u64, bool)>,
    pub closed: usize,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, VecDeque<Vec<u8>>>,
    // tag -> (queue, body) awaiting ack
    unacked: HashMap<u64, (String, Vec<u8>)>,
    next_tag: u64,
    fail_connects: usize,
    fail_declares: usize,
    fail_publishes: bool,
    no_redelivery: bool,
    closed_sessions: HashSet<u64>,
    sessions: u64,
    log: BrokerLog,
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<Inner>>,
    notify: Arc<Notify>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connection attempts.
    pub fn fail_connects(self, n: usize) -> Self {
        self.inner.lock().unwrap().fail_connects = n;
        self
    }

    /// Fail the next `n` queue declarations.
    pub fn fail_declares(self, n: usize) -> Self {
        self.inner.lock().unwrap().fail_declares = n;
        self
    }

    pub fn fail_publishes(self) -> Self {
        self.inner.lock().unwrap().fail_publishes = true;
        self
    }

    /// Drop nacked messages even when requeue is requested.
    pub fn no_redelivery(self) -> Self {
        self.inner.lock().unwrap().no_redelivery = true;
        self
    }

    pub fn push(&self, queue: &str, body: impl Into<Vec<u8>>) {
        self.inner
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(body.into());
        self.notify.notify_one();
    }

    /// End every open subscription, as if the server went away.
    pub fn close_streams(&self) {
        let mut inner = self.inner.lock().unwrap();
        let sessions = inner.sessions;
        inner.closed_sessions.extend(1..=sessions);
        drop(inner);
        self.notify.notify_one();
    }

    pub fn pending(&self, queue: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    pub fn log(&self) -> BrokerLog {
        self.inner.lock().unwrap().log.clone()
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let mut inner = self.inner.lock().unwrap();
        inner.log.connects += 1;
        if inner.fail_connects > 0 {
            inner.fail_connects -= 1;
            return Err(BrokerError::Connection("connection refused".into()));
        }
        inner.sessions += 1;
        Ok(Box::new(MemoryChannel {
            broker: self.clone(),
            session: inner.sessions,
            consuming: None,
        }))
    }
}

pub struct MemoryChannel {
    broker: MemoryBroker,
    session: u64,
    consuming: Option<String>,
}

#[async_trait::async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_queue(&mut self, queue: &str) -> Result<(), BrokerError> {
        let mut inner = self.broker.inner.lock().unwrap();
        if inner.fail_declares > 0 {
            inner.fail_declares -= 1;
            return Err(BrokerError::Channel(format!("declare {} rejected", queue)));
        }
        inner.queues.entry(queue.to_string()).or_default();
        inner.log.declared.push(queue.to_string());
        Ok(())
    }

    async fn publish(
        &mut self,
        queue: &str,
        body: Vec<u8>,
        persistent: bool,
    ) -> Result<(), BrokerError> {
        {
            let mut inner = self.broker.inner.lock().unwrap();
            if inner.fail_publishes {
                return Err(BrokerError::Channel(format!("publish {} rejected", queue)));
            }
            inner
                .log
                .published
                .push((queue.to_string(), body.clone(), persistent));
            inner
                .queues
                .entry(queue.to_string())
                .or_default()
                .push_back(body);
        }
        self.broker.notify.notify_one();
        Ok(())
    }

    async fn set_prefetch(&mut self, count: u16) -> Result<(), BrokerError> {
        self.broker.inner.lock().unwrap().log.prefetch = Some(count);
        Ok(())
    }

    async fn consume(&mut self, queue: &str) -> Result<(), BrokerError> {
        self.consuming = Some(queue.to_string());
        Ok(())
    }

    async fn next_delivery(&mut self) -> Result<Option<Delivery>, BrokerError> {
        let queue = self
            .consuming
            .clone()
            .ok_or_else(|| BrokerError::Channel("not consuming".into()))?;
        // Give other tasks a turn between redeliveries.
        tokio::task::yield_now().await;
        loop {
            {
                let mut inner = self.broker.inner.lock().unwrap();
                if inner.closed_sessions.contains(&self.session) {
                    return Ok(None);
                }
                if let Some(body) = inner.queues.get_mut(&queue).and_then(VecDeque::pop_front) {
                    inner.next_tag += 1;
                    let tag = inner.next_tag;
                    inner.unacked.insert(tag, (queue.clone(), body.clone()));
                    return Ok(Some(Delivery { tag, body }));
                }
            }
            self.broker.notify.notified().await;
        }
    }

    async fn ack(&mut self, tag: u64) -> Result<(), BrokerError> {
        let mut inner = self.broker.inner.lock().unwrap();
        inner.unacked.remove(&tag);
        inner.log.acked.push(tag);
        Ok(())
    }

    async fn nack(&mut self, tag: u64, requeue: bool) -> Result<(), BrokerError> {
        {
            let mut inner = self.broker.inner.lock().unwrap();
            inner.log.nacked.push((tag, requeue));
            let entry = inner.unacked.remove(&tag);
            if let Some((queue, body)) = entry {
                if requeue && !inner.no_redelivery {
                    inner.queues.entry(queue).or_default().push_back(body);
                }
            }
        }
        self.broker.notify.notify_one();
        Ok(())
    }

    async fn close(&mut self) {
        let mut inner = self.broker.inner.lock().unwrap();
        inner.log.closed += 1;
        let tags: Vec<u64> = inner.unacked.keys().copied().collect();
        for tag in tags {
            if let Some((queue, body)) = inner.unacked.remove(&tag) {
                inner.queues.entry(queue).or_default().push_front(body);
            }
        }
        self.consuming = None;
    }
}
