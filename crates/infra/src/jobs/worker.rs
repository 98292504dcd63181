//! Executes due delivery jobs with retry and dead-lettering.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::store::{JobStore, JobStoreError};
use super::types::{DeliveryJob, JobResult, JobStatus};

/// Counts from one `run_due` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RunSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub rescheduled: usize,
    pub dead_lettered: usize,
}

pub struct DeliveryWorker<S> {
    store: S,
}

impl<S: JobStore> DeliveryWorker<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run every job that is due now, once each.
    ///
    /// Jobs rescheduled during this pass are not due again until their backoff
    /// elapses, so the loop terminates.
    pub fn run_due<F>(&self, handler: F) -> Result<RunSummary, JobStoreError>
    where
        F: Fn(&DeliveryJob) -> JobResult,
    {
        let mut summary = RunSummary::default();
        while let Some(mut job) = self.store.claim_due(Utc::now())? {
            summary.processed += 1;
            let started = Utc::now();

            match handler(&job) {
                JobResult::Success => {
                    job.mark_completed(started, Utc::now());
                    self.store.update(&job)?;
                    summary.succeeded += 1;
                    debug!(job_id = %job.id, kind = job.kind.name(), "delivery completed");
                }
                JobResult::Failure(reason) => {
                    job.mark_failed(reason, None, started, Utc::now());
                    self.settle_failure(&job, &mut summary)?;
                }
                JobResult::RetryAfter(delay) => {
                    job.mark_failed("retry requested".to_string(), Some(delay), started, Utc::now());
                    self.settle_failure(&job, &mut summary)?;
                }
            }
        }
        Ok(summary)
    }

    fn settle_failure(&self, job: &DeliveryJob, summary: &mut RunSummary) -> Result<(), JobStoreError> {
        self.store.update(job)?;
        match &job.status {
            JobStatus::DeadLettered { error, attempts } => {
                warn!(
                    job_id = %job.id,
                    tenant_id = %job.tenant_id,
                    kind = job.kind.name(),
                    attempts,
                    error = %error,
                    "delivery dead-lettered"
                );
                self.store.dead_letter(job.clone(), error.clone())?;
                summary.dead_lettered += 1;
            }
            status => {
                debug!(job_id = %job.id, ?status, "delivery rescheduled");
                summary.rescheduled += 1;
            }
        }
        Ok(())
    }
}

/// Handle to a background polling thread.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl<S: JobStore + 'static> DeliveryWorker<S> {
    /// Poll for due jobs on a dedicated thread until the handle is shut down.
    pub fn spawn<F>(self, poll_interval: Duration, handler: F) -> std::io::Result<WorkerHandle>
    where
        F: Fn(&DeliveryJob) -> JobResult + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let join = thread::Builder::new()
            .name("delivery-worker".to_string())
            .spawn(move || {
                info!("delivery worker started");
                loop {
                    if let Err(e) = self.run_due(&handler) {
                        error!(error = %e, "delivery pass failed");
                    }
                    match shutdown_rx.recv_timeout(poll_interval) {
                        Err(mpsc::RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                info!("delivery worker stopped");
            })?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}
