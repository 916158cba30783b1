// Redis-backed job queue (reliable list pattern)
//
// <name>:pending               LPUSH on enqueue, consumed from the right
// <name>:processing:<consumer> entries claimed by one consumer, removed on ack
// <name>:lease:<consumer>      heartbeat key, expires with the lease
// <name>:consumers             every consumer that may hold entries

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Delivery, JobQueue, QueueError, QueuedJob};
use crate::models::JobId;

pub struct RedisQueue {
    client: redis::Client,
    manager: ConnectionManager,
    /// Dedicated connection for blocking pops so they never stall the
    /// shared manager connection.
    blocking: Mutex<Option<MultiplexedConnection>>,
    name: String,
    pending_key: String,
    consumers_key: String,
}

impl RedisQueue {
    pub async fn connect(url: &str, name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client.clone()).await?;

        Ok(Self {
            client,
            manager,
            blocking: Mutex::new(None),
            name: name.to_string(),
            pending_key: format!("{name}:pending"),
            consumers_key: format!("{name}:consumers"),
        })
    }

    fn processing_key(&self, consumer: &str) -> String {
        format!("{}:processing:{consumer}", self.name)
    }

    fn lease_key(&self, consumer: &str) -> String {
        format!("{}:lease:{consumer}", self.name)
    }

    /// Move every entry `consumer` holds back to pending and forget it.
    async fn release(&self, consumer: &str) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let processing_key = self.processing_key(consumer);
        let mut released = 0;
        loop {
            let moved: Option<String> = conn.rpoplpush(&processing_key, &self.pending_key).await?;
            if moved.is_none() {
                break;
            }
            released += 1;
        }
        let _: () = redis::pipe()
            .atomic()
            .del(self.lease_key(consumer))
            .ignore()
            .srem(&self.consumers_key, consumer)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(released)
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn probe(&self) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(QueueError::Unavailable(format!("unexpected PING reply: {pong}")))
        }
    }

    async fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        let payload = QueuedJob::new(job_id).encode()?;
        let mut conn = self.manager.clone();
        let _: () = conn.lpush(&self.pending_key, payload).await?;
        debug!(job_id = %job_id, queue = %self.name, "Job enqueued");
        Ok(())
    }

    async fn dequeue(&self, consumer: &str, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        // Registered before claiming anything, so a crash leaves a
        // recoverable trail.
        let mut manager = self.manager.clone();
        let _: () = manager.sadd(&self.consumers_key, consumer).await?;

        let mut guard = self.blocking.lock().await;
        if guard.is_none() {
            *guard = Some(self.client.get_multiplexed_async_connection().await?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(QueueError::Unavailable("no blocking connection".to_string()));
        };

        let timeout_secs = wait.as_secs().max(1);
        let popped: Result<Option<String>, redis::RedisError> = redis::cmd("BRPOPLPUSH")
            .arg(&self.pending_key)
            .arg(self.processing_key(consumer))
            .arg(timeout_secs)
            .query_async(conn)
            .await;

        match popped {
            Ok(payload) => Ok(payload.map(|payload| Delivery::new(payload, consumer))),
            Err(e) => {
                // Reconnect on the next call.
                *guard = None;
                Err(e.into())
            }
        }
    }

    async fn heartbeat(&self, consumer: &str, lease: Duration) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let lease_ms = u64::try_from(lease.as_millis()).unwrap_or(u64::MAX).max(1);
        let _: () = redis::pipe()
            .sadd(&self.consumers_key, consumer)
            .ignore()
            .cmd("SET")
            .arg(self.lease_key(consumer))
            .arg(1)
            .arg("PX")
            .arg(lease_ms)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: i64 = conn
            .lrem(self.processing_key(&delivery.consumer), 1, &delivery.payload)
            .await?;
        Ok(())
    }

    async fn requeue(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.manager.clone();
        let _: () = redis::pipe()
            .atomic()
            .lrem(self.processing_key(&delivery.consumer), 1, &delivery.payload)
            .ignore()
            .lpush(&self.pending_key, &delivery.payload)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let mut conn = self.manager.clone();
        let consumers: Vec<String> = conn.smembers(&self.consumers_key).await?;

        let mut recovered = 0;
        for consumer in consumers {
            let alive: bool = conn.exists(self.lease_key(&consumer)).await?;
            if alive {
                continue;
            }
            let released = self.release(&consumer).await?;
            if released > 0 {
                info!(queue = %self.name, %consumer, released, "Recovered deliveries from lapsed consumer");
            }
            recovered += released;
        }
        Ok(recovered)
    }

    async fn retire(&self, consumer: &str) -> Result<usize, QueueError> {
        self.release(consumer).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
