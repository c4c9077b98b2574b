//! PriorityChannel - pollable channel ordered by the priority header
//!
//! Higher priority first; FIFO among equal priorities. Messages without a
//! priority header rank at zero.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use fx_common::{Message, MessageTarget, PollableSource, Result};

struct Prioritized {
    priority: i64,
    seq: u64,
    message: Message,
}

impl PartialEq for Prioritized {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Prioritized {}

impl PartialOrd for Prioritized {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prioritized {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Max-heap: highest priority wins, earliest sequence breaks ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Pollable channel delivering the highest-priority message first.
pub struct PriorityChannel {
    name: String,
    capacity: Option<usize>,
    heap: Mutex<BinaryHeap<Prioritized>>,
    seq: AtomicU64,
    receivers: Notify,
    senders: Notify,
}

impl PriorityChannel {
    pub fn new(name: impl Into<String>, capacity: Option<usize>) -> Self {
        Self {
            name: name.into(),
            capacity,
            heap: Mutex::new(BinaryHeap::new()),
            seq: AtomicU64::new(0),
            receivers: Notify::new(),
            senders: Notify::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    async fn wait(notify: &Notify, deadline: Option<Instant>) -> bool {
        match deadline {
            None => {
                notify.notified().await;
                true
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                tokio::time::timeout(deadline - now, notify.notified())
                    .await
                    .is_ok()
            }
        }
    }
}

#[async_trait]
impl MessageTarget for PriorityChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, message: Message, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            {
                let mut heap = self.heap.lock();
                if self.capacity.map_or(true, |capacity| heap.len() < capacity) {
                    let priority = message.headers().priority().unwrap_or(0);
                    let seq = self.seq.fetch_add(1, Ordering::SeqCst);
                    heap.push(Prioritized {
                        priority,
                        seq,
                        message,
                    });
                    self.receivers.notify_one();
                    return Ok(true);
                }
            }
            if !Self::wait(&self.senders, deadline).await {
                return Ok(false);
            }
        }
    }
}

#[async_trait]
impl PollableSource for PriorityChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Message>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            {
                let mut heap = self.heap.lock();
                if let Some(entry) = heap.pop() {
                    self.senders.notify_one();
                    return Ok(Some(entry.message));
                }
            }
            if !Self::wait(&self.receivers, deadline).await {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fx_common::MessageBuilder;

    fn with_priority(payload: &str, priority: i64) -> Message {
        MessageBuilder::with_payload(payload)
            .set_priority(priority)
            .build()
    }

    #[tokio::test]
    async fn highest_priority_first() {
        let channel = PriorityChannel::new("p", None);
        channel.send(with_priority("low", 1), None).await.unwrap();
        channel.send(with_priority("high", 9), None).await.unwrap();
        channel.send(with_priority("mid", 5), None).await.unwrap();

        let order: Vec<String> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                let message = channel
                    .receive(Some(Duration::from_millis(50)))
                    .await
                    .unwrap()
                    .expect("message");
                out.push(message.payload().as_str().unwrap_or_default().to_string());
            }
            out
        };
        assert_eq!(order, vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn fifo_within_equal_priority() {
        let channel = PriorityChannel::new("p", None);
        channel.send(with_priority("first", 3), None).await.unwrap();
        channel.send(with_priority("second", 3), None).await.unwrap();

        let first = channel
            .receive(Some(Duration::from_millis(50)))
            .await
            .unwrap()
            .expect("message");
        assert_eq!(first.payload().as_str(), Some("first"));
    }

    #[tokio::test]
    async fn missing_priority_ranks_at_zero() {
        let channel = PriorityChannel::new("p", None);
        channel.send(Message::new("plain"), None).await.unwrap();
        channel.send(with_priority("urgent", 2), None).await.unwrap();

        let first = channel
            .receive(Some(Duration::from_millis(50)))
            .await
            .unwrap()
            .expect("message");
        assert_eq!(first.payload().as_str(), Some("urgent"));
    }

    #[tokio::test]
    async fn bounded_send_reports_false_on_timeout() {
        let channel = PriorityChannel::new("p", Some(1));
        assert!(channel.send(Message::new("first"), None).await.unwrap());
        let sent = channel
            .send(Message::new("second"), Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(!sent);
    }
}
