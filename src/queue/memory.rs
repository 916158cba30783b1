use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::{Delivery, JobQueue, QueueError, QueuedJob};
use crate::models::JobId;

#[derive(Default)]
struct State {
    pending: VecDeque<String>,
    /// Claimed entries per consumer.
    in_flight: HashMap<String, Vec<String>>,
    /// Lease expiry per consumer.
    leases: HashMap<String, Instant>,
}

impl State {
    fn take_in_flight(&mut self, consumer: &str, payload: &str) -> bool {
        let Some(held) = self.in_flight.get_mut(consumer) else {
            return false;
        };
        match held.iter().position(|p| p == payload) {
            Some(idx) => {
                held.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Move everything `consumer` holds back to pending.
    fn release(&mut self, consumer: &str) -> usize {
        self.leases.remove(consumer);
        let held = self.in_flight.remove(consumer).unwrap_or_default();
        let released = held.len();
        self.pending.extend(held);
        released
    }
}

/// In-process queue with the same delivery contract as [`super::RedisQueue`]:
/// dequeued entries stay claimed by their consumer until acked, requeued,
/// retired, or recovered after the consumer's lease lapses.
///
/// All bookkeeping sits behind one lock, so an entry is never between the
/// pending list and a consumer's in-flight set.
pub struct MemoryQueue {
    state: Mutex<State>,
    notify: Notify,
    available: AtomicBool,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the broker going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub async fn pending_len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn in_flight_len(&self) -> usize {
        self.state.lock().await.in_flight.values().map(Vec::len).sum()
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable("broker offline".to_string()))
        }
    }

    fn wake(&self, count: usize) {
        for _ in 0..count {
            self.notify.notify_one();
        }
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn probe(&self) -> Result<(), QueueError> {
        self.check_available()
    }

    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        self.check_available()?;
        let payload = QueuedJob::new(job_id).encode()?;
        self.state.lock().await.pending.push_back(payload);
        self.wake(1);
        Ok(())
    }

    async fn dequeue(&self, consumer: &str, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;
        loop {
            self.check_available()?;
            {
                let mut state = self.state.lock().await;
                if let Some(payload) = state.pending.pop_front() {
                    state
                        .in_flight
                        .entry(consumer.to_string())
                        .or_default()
                        .push(payload.clone());
                    return Ok(Some(Delivery::new(payload, consumer)));
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            // A permit left by an earlier notify_one wakes us immediately.
            let _ = tokio::time::timeout(remaining, self.notify.notified()).await;
        }
    }

    async fn heartbeat(&self, consumer: &str, lease: Duration) -> Result<(), QueueError> {
        self.check_available()?;
        let mut state = self.state.lock().await;
        state
            .leases
            .insert(consumer.to_string(), Instant::now() + lease);
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.state
            .lock()
            .await
            .take_in_flight(&delivery.consumer, &delivery.payload);
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.check_available()?;
        {
            let mut state = self.state.lock().await;
            state.take_in_flight(&delivery.consumer, &delivery.payload);
            state.pending.push_back(delivery.payload.clone());
        }
        self.wake(1);
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        self.check_available()?;
        let now = Instant::now();
        let recovered = {
            let mut state = self.state.lock().await;
            let lapsed: Vec<String> = state
                .in_flight
                .keys()
                .filter(|consumer| !state.leases.get(*consumer).is_some_and(|expiry| *expiry > now))
                .cloned()
                .collect();
            lapsed
                .iter()
                .map(|consumer| state.release(consumer))
                .sum::<usize>()
        };
        self.wake(recovered);
        Ok(recovered)
    }

    async fn retire(&self, consumer: &str) -> Result<usize, QueueError> {
        let released = self.state.lock().await.release(consumer);
        self.wake(released);
        Ok(released)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
