//! Durable work queue carrying [`ValidationUnit`] messages.
//!
//! Delivery is at-least-once: a received message stays in the consumer's
//! processing list until it is acknowledged or dead-lettered. Each consumer
//! keeps a heartbeat alive while it runs; [`UnitQueue::recover`] and
//! [`UnitQueue::reclaim_orphans`] hand whatever a dead consumer left in its
//! processing list back to the queue.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::{DEFAULT_HEARTBEAT_TTL, Settings};
use crate::error::QueueError;
use crate::models::ValidationUnit;

/// One received message. The payload is kept raw so a message that does not
/// decode can still be acknowledged or dead-lettered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub payload: String,
}

impl Delivery {
    pub fn decode(&self) -> Result<ValidationUnit, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }

    fn label(&self) -> String {
        self.payload.chars().take(64).collect()
    }
}

#[async_trait]
pub trait UnitQueue: Send + Sync {
    async fn publish(&self, unit: &ValidationUnit) -> Result<(), QueueError>;

    /// Next message, or `None` when the queue is empty. At most one message
    /// is taken per call.
    async fn receive(&self) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Moves the message to the dead-letter queue. It is never redelivered.
    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError>;

    /// Marks this consumer alive for one heartbeat TTL.
    async fn heartbeat(&self) -> Result<(), QueueError>;

    /// Startup recovery: requeues this consumer's own unacknowledged
    /// messages plus those of every consumer whose heartbeat expired.
    async fn recover(&self) -> Result<usize, QueueError>;

    /// Requeues the unacknowledged messages of consumers whose heartbeat
    /// expired. Safe to call while this consumer has work in flight.
    async fn reclaim_orphans(&self) -> Result<usize, QueueError>;
}

fn processing_list(queue: &str, worker_id: &str) -> String {
    format!("{queue}:processing:{worker_id}")
}

fn heartbeat_key(queue: &str, worker_id: &str) -> String {
    format!("{queue}:heartbeat:{worker_id}")
}

/// Reliable queue on Redis lists: `LPUSH` to publish, `RPOPLPUSH` into a
/// per-consumer processing list to receive.
#[derive(Clone)]
pub struct RedisUnitQueue {
    conn: ConnectionManager,
    queue: String,
    dead_letter: String,
    processing: String,
    heartbeat: String,
    heartbeat_ttl_secs: u64,
}

impl RedisUnitQueue {
    pub async fn connect(settings: &Settings) -> Result<Self, QueueError> {
        let client = Client::open(settings.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::with_connection(conn, settings))
    }

    pub fn with_connection(conn: ConnectionManager, settings: &Settings) -> Self {
        Self {
            conn,
            queue: settings.queue_name.clone(),
            dead_letter: settings.dead_letter_queue.clone(),
            processing: processing_list(&settings.queue_name, &settings.worker_id),
            heartbeat: heartbeat_key(&settings.queue_name, &settings.worker_id),
            heartbeat_ttl_secs: settings.worker_heartbeat_ttl.as_secs().max(1),
        }
    }

    async fn drain(&self, conn: &mut ConnectionManager, list: &str) -> Result<usize, QueueError> {
        let mut moved = 0;
        loop {
            let payload: Option<String> = conn.rpoplpush(list, &self.queue).await?;
            if payload.is_none() {
                return Ok(moved);
            }
            moved += 1;
        }
    }
}

#[async_trait]
impl UnitQueue for RedisUnitQueue {
    async fn publish(&self, unit: &ValidationUnit) -> Result<(), QueueError> {
        let payload = serde_json::to_string(unit)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.queue, payload).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.rpoplpush(&self.queue, &self.processing).await?;
        Ok(payload.map(|payload| Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.lrem(&self.processing, 1, &delivery.payload).await?;
        if removed == 0 {
            return Err(QueueError::UnknownDelivery(delivery.label()));
        }
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let (removed, _): (i64, i64) = redis::pipe()
            .atomic()
            .lrem(&self.processing, 1, &delivery.payload)
            .lpush(&self.dead_letter, &delivery.payload)
            .query_async(&mut conn)
            .await?;
        if removed == 0 {
            warn!(queue = %self.processing, "dead-lettered a message that was not in flight");
        }
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(&self.heartbeat, "1", self.heartbeat_ttl_secs)
            .await?;
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let own = self.drain(&mut conn, &self.processing).await?;
        if own > 0 {
            info!(recovered = own, queue = %self.queue, "requeued unacknowledged units");
        }
        Ok(own + self.reclaim_orphans().await?)
    }

    async fn reclaim_orphans(&self) -> Result<usize, QueueError> {
        let mut conn = self.conn.clone();
        let prefix = processing_list(&self.queue, "");
        let lists: Vec<String> = conn.keys(format!("{prefix}*")).await?;

        let mut reclaimed = 0;
        for list in lists {
            if list == self.processing {
                continue;
            }
            let Some(owner) = list.strip_prefix(prefix.as_str()) else {
                continue;
            };
            let alive: bool = conn.exists(heartbeat_key(&self.queue, owner)).await?;
            if alive {
                continue;
            }
            let moved = self.drain(&mut conn, &list).await?;
            if moved > 0 {
                warn!(owner, moved, queue = %self.queue, "requeued units of a stopped worker");
            }
            reclaimed += moved;
        }
        Ok(reclaimed)
    }
}

#[derive(Default)]
struct MemoryQueueState {
    pending: VecDeque<String>,
    in_flight: HashMap<String, Vec<String>>,
    heartbeats: HashMap<String, Instant>,
    dead_letters: Vec<String>,
}

impl MemoryQueueState {
    fn take_in_flight(&mut self, consumer: &str, delivery: &Delivery) -> bool {
        let Some(held) = self.in_flight.get_mut(consumer) else {
            return false;
        };
        match held.iter().position(|p| *p == delivery.payload) {
            Some(index) => {
                held.remove(index);
                true
            }
            None => false,
        }
    }

    fn requeue_held_by(&mut self, consumer: &str) -> usize {
        let held = self.in_flight.remove(consumer).unwrap_or_default();
        let moved = held.len();
        self.pending.extend(held);
        moved
    }
}

/// In-process [`UnitQueue`] with the same delivery semantics. Handles made
/// with [`MemoryQueue::consumer`] share one queue, each with its own
/// processing list and heartbeat.
pub struct MemoryQueue {
    state: Arc<Mutex<MemoryQueueState>>,
    consumer: String,
    heartbeat_ttl: Duration,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self {
            state: Arc::default(),
            consumer: "memory".to_string(),
            heartbeat_ttl: DEFAULT_HEARTBEAT_TTL,
        }
    }
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Another consumer of the same queue.
    pub fn consumer(&self, id: impl Into<String>) -> Self {
        Self {
            state: self.state.clone(),
            consumer: id.into(),
            heartbeat_ttl: self.heartbeat_ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryQueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pushes a raw payload, bypassing serialization.
    pub fn push_raw(&self, payload: impl Into<String>) {
        self.lock().pending.push_back(payload.into());
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Received but not yet settled, across all consumers.
    pub fn in_flight_len(&self) -> usize {
        self.lock().in_flight.values().map(Vec::len).sum()
    }

    pub fn dead_letters(&self) -> Vec<String> {
        self.lock().dead_letters.clone()
    }

    /// Decoded pending units, oldest first.
    pub fn pending_units(&self) -> Vec<ValidationUnit> {
        self.lock()
            .pending
            .iter()
            .filter_map(|payload| serde_json::from_str(payload).ok())
            .collect()
    }
}

#[async_trait]
impl UnitQueue for MemoryQueue {
    async fn publish(&self, unit: &ValidationUnit) -> Result<(), QueueError> {
        let payload = serde_json::to_string(unit)?;
        self.lock().pending.push_back(payload);
        Ok(())
    }

    async fn receive(&self) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.lock();
        let Some(payload) = state.pending.pop_front() else {
            return Ok(None);
        };
        state
            .in_flight
            .entry(self.consumer.clone())
            .or_default()
            .push(payload.clone());
        Ok(Some(Delivery { payload }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        if self.lock().take_in_flight(&self.consumer, delivery) {
            Ok(())
        } else {
            Err(QueueError::UnknownDelivery(delivery.label()))
        }
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut state = self.lock();
        state.take_in_flight(&self.consumer, delivery);
        state.dead_letters.push(delivery.payload.clone());
        Ok(())
    }

    async fn heartbeat(&self) -> Result<(), QueueError> {
        let deadline = Instant::now() + self.heartbeat_ttl;
        self.lock().heartbeats.insert(self.consumer.clone(), deadline);
        Ok(())
    }

    async fn recover(&self) -> Result<usize, QueueError> {
        let own = self.lock().requeue_held_by(&self.consumer);
        Ok(own + self.reclaim_orphans().await?)
    }

    async fn reclaim_orphans(&self) -> Result<usize, QueueError> {
        let now = Instant::now();
        let mut state = self.lock();
        let orphaned: Vec<String> = state
            .in_flight
            .keys()
            .filter(|owner| **owner != self.consumer)
            .filter(|owner| !state.heartbeats.get(*owner).is_some_and(|deadline| *deadline > now))
            .cloned()
            .collect();
        Ok(orphaned
            .iter()
            .map(|owner| state.requeue_held_by(owner))
            .sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings_from_map;
    use crate::models::ValidationFlags;
    use std::collections::HashMap;

    fn unit(id: &str) -> ValidationUnit {
        ValidationUnit {
            unit_id: id.into(),
            emails: vec![format!("{id}@corp.io")],
            validation_flags: ValidationFlags::default(),
        }
    }

    #[tokio::test]
    async fn test_fifo_and_ack() {
        let queue = MemoryQueue::new();
        queue.publish(&unit("a")).await.unwrap();
        queue.publish(&unit("b")).await.unwrap();

        let first = queue.receive().await.unwrap().unwrap();
        assert_eq!(first.decode().unwrap().unit_id, "a");
        assert_eq!(queue.in_flight_len(), 1);

        queue.ack(&first).await.unwrap();
        assert_eq!(queue.in_flight_len(), 0);
        assert!(matches!(
            queue.ack(&first).await,
            Err(QueueError::UnknownDelivery(_))
        ));

        let second = queue.receive().await.unwrap().unwrap();
        assert_eq!(second.decode().unwrap().unit_id, "b");
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reject_dead_letters_without_redelivery() {
        let queue = MemoryQueue::new();
        queue.push_raw("{not json");
        let delivery = queue.receive().await.unwrap().unwrap();
        assert!(delivery.decode().is_err());

        queue.reject(&delivery).await.unwrap();
        assert_eq!(queue.dead_letters(), vec!["{not json".to_string()]);
        assert_eq!(queue.recover().await.unwrap(), 0);
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_recover_requeues_unacked() {
        let queue = MemoryQueue::new();
        queue.publish(&unit("a")).await.unwrap();
        let _lost = queue.receive().await.unwrap().unwrap();

        assert_eq!(queue.recover().await.unwrap(), 1);
        assert_eq!(queue.pending_len(), 1);
        let again = queue.receive().await.unwrap().unwrap();
        assert_eq!(again.decode().unwrap(), unit("a"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_units_of_a_stopped_consumer_are_reclaimed() {
        let crashed = MemoryQueue::new().consumer("worker-a");
        let survivor = crashed.consumer("worker-b");
        crashed.heartbeat().await.unwrap();
        survivor.heartbeat().await.unwrap();

        crashed.publish(&unit("a")).await.unwrap();
        let _abandoned = crashed.receive().await.unwrap().unwrap();

        // still within worker-a's heartbeat
        assert_eq!(survivor.recover().await.unwrap(), 0);
        assert_eq!(survivor.in_flight_len(), 1);

        tokio::time::advance(DEFAULT_HEARTBEAT_TTL + Duration::from_secs(1)).await;
        survivor.heartbeat().await.unwrap();
        assert_eq!(survivor.reclaim_orphans().await.unwrap(), 1);
        assert_eq!(survivor.in_flight_len(), 0);

        let again = survivor.receive().await.unwrap().unwrap();
        assert_eq!(again.decode().unwrap(), unit("a"));
        survivor.ack(&again).await.unwrap();
        assert!(matches!(
            crashed.ack(&again).await,
            Err(QueueError::UnknownDelivery(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_consumers_keep_their_in_flight_units() {
        let first = MemoryQueue::new().consumer("worker-a");
        let second = first.consumer("worker-b");
        first.publish(&unit("a")).await.unwrap();
        first.heartbeat().await.unwrap();
        let held = first.receive().await.unwrap().unwrap();

        for _ in 0..3 {
            tokio::time::advance(DEFAULT_HEARTBEAT_TTL / 2).await;
            first.heartbeat().await.unwrap();
            assert_eq!(second.reclaim_orphans().await.unwrap(), 0);
        }
        // a consumer never reclaims its own list while running
        tokio::time::advance(DEFAULT_HEARTBEAT_TTL * 2).await;
        assert_eq!(first.reclaim_orphans().await.unwrap(), 0);
        first.ack(&held).await.unwrap();
    }

    #[tokio::test]
    async fn test_redis_queue_round_trip() {
        let settings = settings_from_map(&HashMap::from([
            ("QUEUE_NAME", "email_validation_test"),
            ("DEAD_LETTER_QUEUE", "email_validation_test_dlq"),
            ("WORKER_ID", "test-worker"),
        ]))
        .unwrap();
        // Skip quietly when no local Redis is running.
        let Ok(queue) = RedisUnitQueue::connect(&settings).await else {
            return;
        };
        if queue.heartbeat().await.is_err() {
            return;
        }
        queue.recover().await.unwrap();
        while let Some(stale) = queue.receive().await.unwrap() {
            queue.ack(&stale).await.unwrap();
        }

        queue.publish(&unit("redis-a")).await.unwrap();
        let delivery = queue.receive().await.unwrap().unwrap();
        assert_eq!(delivery.decode().unwrap().unit_id, "redis-a");
        queue.ack(&delivery).await.unwrap();
        assert!(queue.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_redis_reclaims_list_without_heartbeat() {
        let settings_for = |worker: &'static str| {
            settings_from_map(&HashMap::from([
                ("QUEUE_NAME", "email_validation_reclaim_test"),
                ("WORKER_ID", worker),
            ]))
            .unwrap()
        };
        let Ok(crashed) = RedisUnitQueue::connect(&settings_for("crashed")).await else {
            return;
        };
        let Ok(survivor) = RedisUnitQueue::connect(&settings_for("survivor")).await else {
            return;
        };
        if survivor.heartbeat().await.is_err() {
            return;
        }
        survivor.recover().await.unwrap();
        while let Some(stale) = survivor.receive().await.unwrap() {
            survivor.ack(&stale).await.unwrap();
        }

        // "crashed" takes a unit and never beats
        crashed.publish(&unit("redis-orphan")).await.unwrap();
        let _abandoned = crashed.receive().await.unwrap().unwrap();

        assert_eq!(survivor.reclaim_orphans().await.unwrap(), 1);
        let again = survivor.receive().await.unwrap().unwrap();
        assert_eq!(again.decode().unwrap().unit_id, "redis-orphan");
        survivor.ack(&again).await.unwrap();
    }
}
