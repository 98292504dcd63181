//! Job persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use windledger_core::TenantId;

use super::types::{DeadLetterEntry, DeliveryJob, JobId, JobStatus};

pub trait JobStore: Send + Sync {
    fn enqueue(&self, job: DeliveryJob) -> Result<JobId, JobStoreError>;

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<DeliveryJob>, JobStoreError>;

    fn update(&self, job: &DeliveryJob) -> Result<(), JobStoreError>;

    /// Claim the oldest due job (any tenant) and mark it running.
    fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<DeliveryJob>, JobStoreError>;

    fn list(&self, tenant_id: TenantId) -> Result<Vec<DeliveryJob>, JobStoreError>;

    fn dead_letter(&self, job: DeliveryJob, reason: String) -> Result<(), JobStoreError>;

    fn list_dead_letters(&self, tenant_id: TenantId) -> Result<Vec<DeadLetterEntry>, JobStoreError>;

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError>;
}

impl<S> JobStore for Arc<S>
where
    S: JobStore + ?Sized,
{
    fn enqueue(&self, job: DeliveryJob) -> Result<JobId, JobStoreError> {
        (**self).enqueue(job)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<DeliveryJob>, JobStoreError> {
        (**self).get(tenant_id, job_id)
    }

    fn update(&self, job: &DeliveryJob) -> Result<(), JobStoreError> {
        (**self).update(job)
    }

    fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<DeliveryJob>, JobStoreError> {
        (**self).claim_due(now)
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<DeliveryJob>, JobStoreError> {
        (**self).list(tenant_id)
    }

    fn dead_letter(&self, job: DeliveryJob, reason: String) -> Result<(), JobStoreError> {
        (**self).dead_letter(job, reason)
    }

    fn list_dead_letters(&self, tenant_id: TenantId) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        (**self).list_dead_letters(tenant_id)
    }

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError> {
        (**self).stats(tenant_id)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("tenant isolation violation")]
    TenantIsolation,
    #[error("job already exists: {0}")]
    AlreadyExists(JobId),
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct JobStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

fn poisoned<T>(_: T) -> JobStoreError {
    JobStoreError::Storage("lock poisoned".to_string())
}

/// In-memory job store for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, DeliveryJob>>,
    dead_letters: RwLock<Vec<DeadLetterEntry>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for InMemoryJobStore {
    fn enqueue(&self, job: DeliveryJob) -> Result<JobId, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        let id = job.id;
        jobs.insert(id, job);
        Ok(id)
    }

    fn get(&self, tenant_id: TenantId, job_id: JobId) -> Result<Option<DeliveryJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        match jobs.get(&job_id) {
            Some(job) if job.tenant_id == tenant_id => Ok(Some(job.clone())),
            Some(_) => Err(JobStoreError::TenantIsolation),
            None => Ok(None),
        }
    }

    fn update(&self, job: &DeliveryJob) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        match jobs.get_mut(&job.id) {
            Some(existing) if existing.tenant_id != job.tenant_id => {
                Err(JobStoreError::TenantIsolation)
            }
            Some(existing) => {
                *existing = job.clone();
                Ok(())
            }
            None => Err(JobStoreError::NotFound(job.id)),
        }
    }

    fn claim_due(&self, now: DateTime<Utc>) -> Result<Option<DeliveryJob>, JobStoreError> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;

        // FIFO by creation time.
        let next = jobs
            .values()
            .filter(|j| j.is_due(now))
            .min_by_key(|j| (j.created_at, j.id.0))
            .map(|j| j.id);

        Ok(next.and_then(|id| {
            jobs.get_mut(&id).map(|job| {
                job.mark_running(now);
                job.clone()
            })
        }))
    }

    fn list(&self, tenant_id: TenantId) -> Result<Vec<DeliveryJob>, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut result: Vec<_> = jobs
            .values()
            .filter(|j| j.tenant_id == tenant_id)
            .cloned()
            .collect();
        result.sort_by_key(|j| j.created_at);
        Ok(result)
    }

    fn dead_letter(&self, job: DeliveryJob, reason: String) -> Result<(), JobStoreError> {
        let mut dead = self.dead_letters.write().map_err(poisoned)?;
        dead.push(DeadLetterEntry {
            job,
            dead_lettered_at: Utc::now(),
            reason,
        });
        Ok(())
    }

    fn list_dead_letters(&self, tenant_id: TenantId) -> Result<Vec<DeadLetterEntry>, JobStoreError> {
        let dead = self.dead_letters.read().map_err(poisoned)?;
        Ok(dead
            .iter()
            .filter(|d| d.job.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    fn stats(&self, tenant_id: TenantId) -> Result<JobStats, JobStoreError> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut stats = JobStats::default();
        for job in jobs.values().filter(|j| j.tenant_id == tenant_id) {
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed { .. } => stats.failed += 1,
                JobStatus::DeadLettered { .. } => stats.dead_lettered += 1,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::DeliveryKind;
    use uuid::Uuid;

    fn webhook(tenant_id: TenantId) -> DeliveryJob {
        DeliveryJob::new(
            tenant_id,
            DeliveryKind::DispatchWebhook {
                event_type: "settlement.approved".into(),
            },
            Uuid::now_v7(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn claim_marks_running_and_skips_claimed_jobs() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        store.enqueue(webhook(tenant)).unwrap();

        let claimed = store.claim_due(Utc::now()).unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempt, 1);
        assert!(store.claim_due(Utc::now()).unwrap().is_none());
    }

    #[test]
    fn jobs_are_tenant_scoped() {
        let store = InMemoryJobStore::new();
        let tenant = TenantId::new();
        let id = store.enqueue(webhook(tenant)).unwrap();

        assert!(matches!(
            store.get(TenantId::new(), id),
            Err(JobStoreError::TenantIsolation)
        ));
        assert_eq!(store.stats(tenant).unwrap().pending, 1);
        assert!(store.list(TenantId::new()).unwrap().is_empty());
    }
}
