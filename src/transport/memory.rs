//! In-memory transport for tests and embedded use.
//!
//! Per-address FIFO with pgmq-style visibility: a fetched message stays
//! in flight until acked, and reappears once its visibility timeout lapses.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::{Address, AddressPattern, Labels, Message, Transport};
use crate::error::{Error, Result};

/// Thread-safe in-memory transport.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    state: Arc<Mutex<TransportState>>,
    published: Arc<Notify>,
    visibility_timeout: Duration,
}

#[derive(Debug, Default)]
struct TransportState {
    next_id: i64,
    queues: HashMap<Address, VecDeque<Message>>,
    in_flight: HashMap<i64, (Message, Instant)>,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl InMemoryTransport {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
            published: Arc::new(Notify::new()),
            visibility_timeout,
        }
    }

    /// Visible messages waiting at `address`.
    pub fn depth(&self, address: &Address) -> usize {
        self.lock()
            .map(|state| state.queues.get(address).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }

    /// Visible messages across every address matching `pattern`.
    pub fn depth_matching(&self, pattern: &AddressPattern) -> usize {
        self.lock()
            .map(|state| {
                state
                    .queues
                    .iter()
                    .filter(|(address, _)| pattern.matches(address))
                    .map(|(_, queue)| queue.len())
                    .sum()
            })
            .unwrap_or(0)
    }

    /// Messages fetched but not yet acked.
    pub fn in_flight(&self) -> usize {
        self.lock().map(|state| state.in_flight.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, TransportState>> {
        self.state
            .lock()
            .map_err(|e| Error::Other(format!("transport lock poisoned: {e}")))
    }

    fn try_take(&self, address: &Address) -> Result<Option<Message>> {
        let mut state = self.lock()?;
        let now = Instant::now();

        // Expired in-flight messages go back to the front of their queue.
        let expired: Vec<i64> = state
            .in_flight
            .iter()
            .filter(|(_, (msg, deadline))| msg.address == *address && *deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some((msg, _)) = state.in_flight.remove(&id) {
                state.queues.entry(msg.address).or_default().push_front(msg);
            }
        }

        let Some(mut msg) = state.queues.get_mut(address).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };
        msg.read_count += 1;
        state
            .in_flight
            .insert(msg.id, (msg.clone(), now + self.visibility_timeout));
        Ok(Some(msg))
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn publish(
        &self,
        address: &Address,
        payload: &serde_json::Value,
        labels: &Labels,
    ) -> Result<i64> {
        let id = {
            let mut state = self.lock()?;
            state.next_id += 1;
            let id = state.next_id;
            state.queues.entry(*address).or_default().push_back(Message {
                id,
                address: *address,
                read_count: 0,
                enqueued_at: Utc::now(),
                labels: labels.clone(),
                payload: payload.clone(),
            });
            id
        };
        self.published.notify_waiters();
        Ok(id)
    }

    async fn fetch_one(&self, address: &Address, wait: Duration) -> Result<Option<Message>> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(msg) = self.try_take(address)? {
                return Ok(Some(msg));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Either a publish or the deadline; both re-check the queue.
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn ack(&self, message: &Message) -> Result<()> {
        self.lock()?.in_flight.remove(&message.id);
        Ok(())
    }
}
