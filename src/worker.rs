//! Queue consumer: validates one unit at a time in fixed-size chunks and
//! reports progress after every chunk.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, error, info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::config::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::job_queue::{Delivery, UnitQueue};
use crate::models::{ProgressEvent, ProgressSnapshot, UnitStatus, ValidationUnit};
use crate::store::{CoordinationStore, parent_key, progress_key, set_json};
use crate::validation::EmailValidator;

const ERROR_BACKOFF: Duration = Duration::from_secs(5);
const MIN_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(100);

pub struct ValidationWorker {
    store: Arc<dyn CoordinationStore>,
    queue: Arc<dyn UnitQueue>,
    validator: Arc<EmailValidator>,
    breaker: CircuitBreaker,
    chunk_size: usize,
    result_expiry_secs: u64,
    progress_channel: String,
    poll_interval: Duration,
    heartbeat_interval: Duration,
}

impl ValidationWorker {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn CoordinationStore>,
        queue: Arc<dyn UnitQueue>,
        validator: Arc<EmailValidator>,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            store,
            queue,
            validator,
            breaker,
            chunk_size: settings.chunk_size.max(1),
            result_expiry_secs: settings.result_expiry_secs,
            progress_channel: settings.progress_channel.clone(),
            poll_interval: settings.queue_poll_interval,
            heartbeat_interval: (settings.worker_heartbeat_ttl / 3).max(MIN_HEARTBEAT_INTERVAL),
        }
    }

    /// Consumes the queue until the task is dropped.
    pub async fn run(&self) {
        self.beat().await;
        match self.queue.recover().await {
            Ok(recovered) if recovered > 0 => info!(recovered, "recovered in-flight units"),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "could not recover in-flight units"),
        }

        tokio::join!(self.keep_alive(), self.consume());
    }

    async fn consume(&self) {
        loop {
            match self.poll_once().await {
                Ok(true) => {}
                Ok(false) => sleep(self.poll_interval).await,
                Err(err) => {
                    error!(error = %err, "queue poll failed");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Refreshes this worker's heartbeat, also while a unit is in progress,
    /// and requeues the units of workers that stopped beating.
    async fn keep_alive(&self) {
        let mut ticker = interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.beat().await;
            match self.queue.reclaim_orphans().await {
                Ok(reclaimed) if reclaimed > 0 => {
                    info!(reclaimed, "requeued units of a stopped worker")
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "could not reclaim orphaned units"),
            }
        }
    }

    async fn beat(&self) {
        if let Err(err) = self.queue.heartbeat().await {
            warn!(error = %err, "heartbeat failed");
        }
    }

    /// Takes and handles at most one message. Returns whether there was one.
    pub async fn poll_once(&self) -> ServiceResult<bool> {
        match self.queue.receive().await? {
            Some(delivery) => {
                self.handle_delivery(&delivery).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Processes one message and settles it: acknowledged on success,
    /// dead-lettered when it is malformed or processing fails.
    pub async fn handle_delivery(&self, delivery: &Delivery) -> ServiceResult<()> {
        let unit = match Self::decode(delivery) {
            Ok(unit) => unit,
            Err(err) => {
                warn!(error = %err, "dead-lettering malformed unit message");
                self.queue.reject(delivery).await?;
                return Ok(());
            }
        };

        info!(unit_id = %unit.unit_id, emails = unit.total_count(), "unit received");
        let mut snapshot = ProgressSnapshot::started(&unit);
        match self.run_chunks(&unit, &mut snapshot).await {
            Ok(()) => {
                self.queue.ack(delivery).await?;
                info!(unit_id = %unit.unit_id, "unit acknowledged");
            }
            Err(err) => {
                error!(unit_id = %unit.unit_id, error = %err, "unit failed, dead-lettering");
                self.mark_failed(&mut snapshot).await;
                self.queue.reject(delivery).await?;
            }
        }
        Ok(())
    }

    fn decode(delivery: &Delivery) -> ServiceResult<ValidationUnit> {
        let unit = delivery
            .decode()
            .map_err(|err| ServiceError::MalformedMessage(err.to_string()))?;
        if unit.unit_id.trim().is_empty() {
            return Err(ServiceError::MalformedMessage("empty unitId".into()));
        }
        if unit.emails.is_empty() {
            return Err(ServiceError::MalformedMessage(format!(
                "unit {} has no emails",
                unit.unit_id
            )));
        }
        Ok(unit)
    }

    /// Validates every email of `unit`, chunk by chunk. Snapshot writes are
    /// whole-value upserts, so running a unit twice ends in the same state.
    pub async fn process_unit(&self, unit: &ValidationUnit) -> ServiceResult<ProgressSnapshot> {
        let mut snapshot = ProgressSnapshot::started(unit);
        self.run_chunks(unit, &mut snapshot).await?;
        Ok(snapshot)
    }

    /// Fills `snapshot` as chunks finish, so on error it still holds every
    /// result validated so far.
    async fn run_chunks(
        &self,
        unit: &ValidationUnit,
        snapshot: &mut ProgressSnapshot,
    ) -> ServiceResult<()> {
        let request_id = self.store.get(&parent_key(&unit.unit_id)).await?;
        let total = snapshot.total_emails;

        for (index, chunk) in unit.emails.chunks(self.chunk_size).enumerate() {
            let results = self
                .validator
                .validate_many(chunk, &unit.validation_flags)
                .await;
            snapshot.results.extend(results);
            snapshot.processed_emails = snapshot.results.len();
            snapshot.last_updated = Utc::now();

            self.save(snapshot).await?;
            self.notify(snapshot, request_id.as_deref()).await;
            debug!(
                unit_id = %unit.unit_id,
                chunk = index + 1,
                processed = snapshot.processed_emails,
                total,
                "chunk complete"
            );
        }

        snapshot.status = UnitStatus::Completed;
        snapshot.last_updated = Utc::now();
        self.save(snapshot).await?;
        self.notify(snapshot, request_id.as_deref()).await;

        if let Err(err) = self.breaker.reset_consecutive().await {
            warn!(error = %err, "could not reset smtp timeout streak");
        }

        info!(unit_id = %unit.unit_id, total, "unit completed");
        Ok(())
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> ServiceResult<()> {
        set_json(
            self.store.as_ref(),
            &progress_key(&snapshot.unit_id),
            snapshot,
            self.result_expiry_secs,
        )
        .await?;
        Ok(())
    }

    async fn notify(&self, snapshot: &ProgressSnapshot, request_id: Option<&str>) {
        let event = ProgressEvent {
            unit_id: snapshot.unit_id.clone(),
            request_id: request_id.map(str::to_string),
            processed_count: snapshot.processed_emails,
            total_count: snapshot.total_emails,
            is_complete: snapshot.is_complete(),
        };
        let message = match serde_json::to_string(&event) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "could not encode progress event");
                return;
            }
        };
        if let Err(err) = self.store.publish(&self.progress_channel, &message).await {
            warn!(unit_id = %snapshot.unit_id, error = %err, "progress notification failed");
        }
    }

    /// Best effort: the store may be what failed in the first place. Results
    /// already validated stay in the snapshot.
    async fn mark_failed(&self, snapshot: &mut ProgressSnapshot) {
        snapshot.status = UnitStatus::Failed;
        snapshot.last_updated = Utc::now();
        if let Err(err) = self.save(snapshot).await {
            warn!(unit_id = %snapshot.unit_id, error = %err, "could not record unit failure");
        }
    }
}
