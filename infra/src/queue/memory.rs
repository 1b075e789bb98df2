//! In-process broker
//!
//! Durable queues, per-channel prefetch and unacknowledged delivery tracking
//! without a broker process. Connection failures and link drops can be
//! scripted, which makes it the broker of choice for tests and local runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use super::broker::{Broker, BrokerChannel, Delivery, DeliveryStream, Envelope};
use super::error::QueueError;

#[derive(Debug, Clone)]
struct Stored {
    envelope: Envelope,
    redelivered: bool,
}

struct Link {
    id: u64,
    closed: watch::Sender<bool>,
    prefetch: AtomicU16,
    unacked: Mutex<HashMap<u64, (String, Stored)>>,
}

impl Link {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

struct BrokerState {
    queues: Mutex<HashMap<String, VecDeque<Stored>>>,
    links: Mutex<Vec<Arc<Link>>>,
    rejecting: Mutex<HashSet<String>>,
    pending_failures: AtomicU32,
    open_attempts: AtomicU32,
    next_id: AtomicU64,
    acks: AtomicU64,
    nacks: AtomicU64,
    changed: watch::Sender<u64>,
}

impl BrokerState {
    fn notify(&self) {
        self.changed.send_modify(|version| *version = version.wrapping_add(1));
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Mark a link closed and return its unacknowledged messages to their queues
    async fn shut_link(&self, link: &Arc<Link>) {
        link.closed.send_replace(true);

        let mut returned: Vec<(u64, (String, Stored))> =
            link.unacked.lock().await.drain().collect();
        returned.sort_by_key(|(tag, _)| std::cmp::Reverse(*tag));

        if !returned.is_empty() {
            let mut queues = self.queues.lock().await;
            for (_, (queue, mut stored)) in returned {
                stored.redelivered = true;
                queues.entry(queue).or_default().push_front(stored);
            }
        }

        self.links.lock().await.retain(|l| l.id != link.id);
        self.notify();
    }
}

/// Broker living inside the current process
///
/// Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);

        Self {
            state: Arc::new(BrokerState {
                queues: Mutex::new(HashMap::new()),
                links: Mutex::new(Vec::new()),
                rejecting: Mutex::new(HashSet::new()),
                pending_failures: AtomicU32::new(0),
                open_attempts: AtomicU32::new(0),
                next_id: AtomicU64::new(0),
                acks: AtomicU64::new(0),
                nacks: AtomicU64::new(0),
                changed,
            }),
        }
    }

    /// Make the next `count` connection attempts fail
    pub fn fail_next_opens(&self, count: u32) {
        self.state.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Make every publish to `queue` fail until further notice
    pub async fn reject_publishes_to(&self, queue: &str) {
        self.state.rejecting.lock().await.insert(queue.to_string());
    }

    /// Connection attempts made so far, failed ones included
    pub fn open_attempts(&self) -> u32 {
        self.state.open_attempts.load(Ordering::SeqCst)
    }

    /// Number of links currently open
    pub async fn open_links(&self) -> usize {
        self.state.links.lock().await.len()
    }

    /// Drop every open link from the broker side
    ///
    /// Unacknowledged deliveries go back to the front of their queues, flagged
    /// as redelivered.
    pub async fn drop_links(&self) {
        let links: Vec<Arc<Link>> = self.state.links.lock().await.clone();
        for link in &links {
            self.state.shut_link(link).await;
        }
        debug!(links = links.len(), "Dropped broker links");
    }

    /// Whether a queue has been declared
    pub async fn has_queue(&self, queue: &str) -> bool {
        self.state.queues.lock().await.contains_key(queue)
    }

    /// Messages waiting in a queue, in delivery order
    pub async fn messages(&self, queue: &str) -> Vec<Envelope> {
        self.state
            .queues
            .lock()
            .await
            .get(queue)
            .map(|stored| stored.iter().map(|s| s.envelope.clone()).collect())
            .unwrap_or_default()
    }

    /// Put a message on a queue directly, declaring the queue if needed
    pub async fn inject(&self, queue: &str, envelope: Envelope) {
        self.state
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default()
            .push_back(Stored {
                envelope,
                redelivered: false,
            });
        self.state.notify();
    }

    /// Deliveries acknowledged so far
    pub fn ack_count(&self) -> u64 {
        self.state.acks.load(Ordering::SeqCst)
    }

    /// Deliveries rejected so far
    pub fn nack_count(&self) -> u64 {
        self.state.nacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn open(&self) -> Result<Arc<dyn BrokerChannel>, QueueError> {
        self.state.open_attempts.fetch_add(1, Ordering::SeqCst);

        let failed = self
            .state
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(QueueError::Connection(String::from(
                "scripted connection failure",
            )));
        }

        let (closed, _) = watch::channel(false);
        let link = Arc::new(Link {
            id: self.state.next_id(),
            closed,
            prefetch: AtomicU16::new(0),
            unacked: Mutex::new(HashMap::new()),
        });
        self.state.links.lock().await.push(Arc::clone(&link));

        Ok(Arc::new(MemoryChannel {
            state: Arc::clone(&self.state),
            link,
        }))
    }

    fn address(&self) -> String {
        String::from("memory://")
    }
}

struct MemoryChannel {
    state: Arc<BrokerState>,
    link: Arc<Link>,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.link.is_closed() {
            Err(QueueError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn declare_durable_queue(&self, queue: &str) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.state
            .queues
            .lock()
            .await
            .entry(queue.to_string())
            .or_default();
        Ok(())
    }

    async fn set_prefetch(&self, count: u16) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.link.prefetch.store(count, Ordering::SeqCst);
        Ok(())
    }

    async fn publish(&self, queue: &str, envelope: Envelope) -> Result<(), QueueError> {
        self.ensure_open()?;
        if self.state.rejecting.lock().await.contains(queue) {
            return Err(QueueError::Publish(format!("{} rejected the message", queue)));
        }
        {
            let mut queues = self.state.queues.lock().await;
            let target = queues
                .get_mut(queue)
                .ok_or_else(|| QueueError::Publish(format!("no queue named {}", queue)))?;
            target.push_back(Stored {
                envelope,
                redelivered: false,
            });
        }
        self.state.notify();
        Ok(())
    }

    async fn consume(&self, queue: &str, _consumer_tag: &str) -> Result<DeliveryStream, QueueError> {
        self.ensure_open()?;
        if !self.state.queues.lock().await.contains_key(queue) {
            return Err(QueueError::Consume(format!("no queue named {}", queue)));
        }

        let consumer = Consumer {
            state: Arc::clone(&self.state),
            link: Arc::clone(&self.link),
            queue: queue.to_string(),
            changes: self.state.changed.subscribe(),
        };

        let deliveries = stream::unfold(consumer, |mut consumer| async move {
            let delivery = consumer.next_delivery().await?;
            Some((Ok::<_, QueueError>(delivery), consumer))
        });

        Ok(deliveries.boxed())
    }

    async fn closed(&self) {
        let mut closed = self.link.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    async fn close(&self) -> Result<(), QueueError> {
        if !self.link.is_closed() {
            self.state.shut_link(&self.link).await;
        }
        Ok(())
    }
}

struct Consumer {
    state: Arc<BrokerState>,
    link: Arc<Link>,
    queue: String,
    changes: watch::Receiver<u64>,
}

impl Consumer {
    async fn next_delivery(&mut self) -> Option<Box<dyn Delivery>> {
        loop {
            self.changes.borrow_and_update();
            if self.link.is_closed() {
                return None;
            }

            {
                let mut unacked = self.link.unacked.lock().await;
                let limit = usize::from(self.link.prefetch.load(Ordering::SeqCst));

                if limit == 0 || unacked.len() < limit {
                    let mut queues = self.state.queues.lock().await;
                    if let Some(stored) = queues.get_mut(&self.queue).and_then(VecDeque::pop_front) {
                        let tag = self.state.next_id();
                        unacked.insert(tag, (self.queue.clone(), stored.clone()));

                        let delivery: Box<dyn Delivery> = Box::new(MemoryDelivery {
                            tag,
                            stored,
                            state: Arc::clone(&self.state),
                            link: Arc::clone(&self.link),
                        });
                        return Some(delivery);
                    }
                }
            }

            if self.changes.changed().await.is_err() {
                return None;
            }
        }
    }
}

struct MemoryDelivery {
    tag: u64,
    stored: Stored,
    state: Arc<BrokerState>,
    link: Arc<Link>,
}

impl MemoryDelivery {
    async fn settle(&self) -> Result<(String, Stored), QueueError> {
        if self.link.is_closed() {
            return Err(QueueError::Closed);
        }
        self.link
            .unacked
            .lock()
            .await
            .remove(&self.tag)
            .ok_or_else(|| QueueError::Consume(format!("unknown delivery tag {}", self.tag)))
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn envelope(&self) -> &Envelope {
        &self.stored.envelope
    }

    fn redelivered(&self) -> bool {
        self.stored.redelivered
    }

    async fn ack(&self) -> Result<(), QueueError> {
        self.settle().await?;
        self.state.acks.fetch_add(1, Ordering::SeqCst);
        self.state.notify();
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        let (queue, mut stored) = self.settle().await?;
        if requeue {
            stored.redelivered = true;
            self.state
                .queues
                .lock()
                .await
                .entry(queue)
                .or_default()
                .push_front(stored);
        }
        self.state.nacks.fetch_add(1, Ordering::SeqCst);
        self.state.notify();
        Ok(())
    }
}
