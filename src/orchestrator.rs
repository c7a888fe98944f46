//! Accepts submissions, splits them into queue units and answers status
//! queries over the snapshots the workers write.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::cache::{CacheKind, CacheScope, CacheView, DomainCache};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerState};
use crate::config::Settings;
use crate::error::{ServiceError, ServiceResult};
use crate::job_queue::UnitQueue;
use crate::models::{
    ProgressSnapshot, StatusView, SubmissionStatus, SubmissionTracker, SubmitOutcome,
    UnitProgress, UnitStatus, ValidationFlags, ValidationUnit,
};
use crate::store::{CoordinationStore, get_json, parent_key, progress_key, set_json, tracker_key};
use crate::validation::EmailValidator;

/// Splits `emails` into consecutive units sized by the tier table.
pub fn split_into_units(emails: &[String]) -> Vec<Vec<String>> {
    if emails.is_empty() {
        return Vec::new();
    }
    let size = Settings::unit_size_for(emails.len());
    emails.chunks(size).map(<[String]>::to_vec).collect()
}

pub struct Orchestrator {
    store: Arc<dyn CoordinationStore>,
    queue: Arc<dyn UnitQueue>,
    validator: Arc<EmailValidator>,
    breaker: CircuitBreaker,
    cache: Arc<DomainCache>,
    inline_threshold: usize,
    max_submission_emails: usize,
    result_expiry_secs: u64,
}

impl Orchestrator {
    pub fn new(
        settings: &Settings,
        store: Arc<dyn CoordinationStore>,
        queue: Arc<dyn UnitQueue>,
        validator: Arc<EmailValidator>,
        breaker: CircuitBreaker,
        cache: Arc<DomainCache>,
    ) -> Self {
        Self {
            store,
            queue,
            validator,
            breaker,
            cache,
            inline_threshold: settings.inline_threshold,
            max_submission_emails: settings.max_submission_emails,
            result_expiry_secs: settings.result_expiry_secs,
        }
    }

    /// Validates small submissions inline; queues larger ones and returns
    /// immediately with the ids to poll.
    pub async fn submit(
        &self,
        emails: Vec<String>,
        flags: ValidationFlags,
    ) -> ServiceResult<SubmitOutcome> {
        let total = emails.len();
        if total == 0 {
            return Err(ServiceError::EmptySubmission);
        }
        if total > self.max_submission_emails {
            return Err(ServiceError::SubmissionTooLarge {
                size: total,
                limit: self.max_submission_emails,
            });
        }

        if total <= self.inline_threshold {
            let results = self.validator.validate_many(&emails, &flags).await;
            return Ok(SubmitOutcome::Inline { results });
        }

        let units: Vec<ValidationUnit> = split_into_units(&emails)
            .into_iter()
            .map(|emails| ValidationUnit {
                unit_id: Uuid::new_v4().to_string(),
                emails,
                validation_flags: flags,
            })
            .collect();
        let unit_ids: Vec<String> = units.iter().map(|unit| unit.unit_id.clone()).collect();

        if let [unit] = units.as_slice() {
            self.queue.publish(unit).await?;
            info!(unit_id = %unit.unit_id, total, "submission queued as one unit");
            return Ok(SubmitOutcome::Unit {
                unit_id: unit.unit_id.clone(),
                total_emails: total,
            });
        }

        let request_id = Uuid::new_v4().to_string();
        self.track(&request_id, &unit_ids, total).await?;

        for (published, unit) in units.iter().enumerate() {
            if let Err(err) = self.queue.publish(unit).await {
                warn!(
                    request_id = %request_id,
                    published,
                    units = units.len(),
                    error = %err,
                    "publish failed mid-submission"
                );
                self.untrack(&request_id, &unit_ids).await;
                return Err(err.into());
            }
        }

        info!(request_id = %request_id, units = units.len(), total, "submission split and queued");
        Ok(SubmitOutcome::Submission {
            request_id,
            unit_ids,
            total_emails: total,
        })
    }

    /// Tracker and reverse lookups go in before any unit is published, so a
    /// worker always finds the parent of the unit it picks up.
    async fn track(&self, request_id: &str, unit_ids: &[String], total: usize) -> ServiceResult<()> {
        let tracker = SubmissionTracker::new(request_id.to_string(), unit_ids.to_vec(), total);
        set_json(
            self.store.as_ref(),
            &tracker_key(request_id),
            &tracker,
            self.result_expiry_secs,
        )
        .await?;
        for unit_id in unit_ids {
            self.store
                .set_ex(&parent_key(unit_id), request_id, self.result_expiry_secs)
                .await?;
        }
        Ok(())
    }

    async fn untrack(&self, request_id: &str, unit_ids: &[String]) {
        let mut keys: Vec<String> = unit_ids.iter().map(|id| parent_key(id)).collect();
        keys.push(tracker_key(request_id));
        if let Err(err) = self.store.delete(&keys).await {
            warn!(request_id, error = %err, "could not clean up tracking for failed submission");
        }
    }

    /// Latest snapshot of a unit. Ids of units that belong to a multi-unit
    /// submission (and the submission id itself) fall back to the aggregate
    /// while the unit has not reported yet.
    pub async fn get_status(&self, id: &str) -> ServiceResult<StatusView> {
        if let Some(snapshot) =
            get_json::<ProgressSnapshot>(self.store.as_ref(), &progress_key(id)).await?
        {
            return Ok(StatusView::Unit(snapshot));
        }

        let request_id = match self.store.get(&parent_key(id)).await? {
            Some(parent) => Some(parent),
            None => self
                .store
                .get(&tracker_key(id))
                .await?
                .map(|_| id.to_string()),
        };

        match request_id {
            Some(request_id) => Ok(StatusView::Submission(
                self.get_multi_status(&request_id).await?,
            )),
            None => Ok(StatusView::Pending {
                unit_id: id.to_string(),
            }),
        }
    }

    /// Aggregates the child snapshots of a submission and writes the
    /// recomputed tracker back, which also refreshes its TTL.
    pub async fn get_multi_status(&self, request_id: &str) -> ServiceResult<SubmissionStatus> {
        let key = tracker_key(request_id);
        let mut tracker = get_json::<SubmissionTracker>(self.store.as_ref(), &key)
            .await?
            .ok_or_else(|| ServiceError::SubmissionNotFound(request_id.to_string()))?;

        let mut units = Vec::with_capacity(tracker.unit_ids.len());
        let mut results = Vec::new();
        for unit_id in &tracker.unit_ids {
            match get_json::<ProgressSnapshot>(self.store.as_ref(), &progress_key(unit_id)).await? {
                Some(snapshot) => {
                    units.push(UnitProgress {
                        unit_id: unit_id.clone(),
                        status: snapshot.status,
                        processed_emails: snapshot.processed_emails,
                        total_emails: snapshot.total_emails,
                    });
                    results.extend(snapshot.results);
                }
                None => units.push(UnitProgress {
                    unit_id: unit_id.clone(),
                    status: UnitStatus::Processing,
                    processed_emails: 0,
                    total_emails: 0,
                }),
            }
        }

        let processed: usize = units.iter().map(|unit| unit.processed_emails).sum();
        tracker.processed_emails = processed.min(tracker.total_emails);
        tracker.status = if units.iter().all(|unit| unit.status == UnitStatus::Completed) {
            UnitStatus::Completed
        } else if units.iter().any(|unit| unit.status == UnitStatus::Failed) {
            UnitStatus::Failed
        } else {
            UnitStatus::Processing
        };
        tracker.last_updated = Utc::now();
        set_json(self.store.as_ref(), &key, &tracker, self.result_expiry_secs).await?;

        let progress = if tracker.total_emails == 0 {
            0.0
        } else {
            (tracker.processed_emails as f64 / tracker.total_emails as f64 * 100.0).min(100.0)
        };

        Ok(SubmissionStatus {
            request_id: tracker.request_id,
            status: tracker.status,
            total_emails: tracker.total_emails,
            processed_emails: tracker.processed_emails,
            progress,
            units,
            results,
            created_at: tracker.created_at,
            last_updated: tracker.last_updated,
        })
    }

    pub async fn circuit_breaker_status(&self) -> ServiceResult<CircuitBreakerState> {
        Ok(self.breaker.state().await?)
    }

    pub async fn reset_circuit_breaker(&self) -> ServiceResult<CircuitBreakerState> {
        self.breaker.reset().await?;
        self.circuit_breaker_status().await
    }

    pub async fn view_cache(&self, cache_type: &str) -> ServiceResult<CacheView> {
        let kind: CacheKind = cache_type.parse()?;
        self.cache.view(kind).await
    }

    /// Clears one cache type, or every type for `"all"`.
    pub async fn clear_cache(&self, cache_type: &str) -> ServiceResult<u64> {
        let scope: CacheScope = cache_type.parse()?;
        self.cache.clear(scope).await
    }
}
