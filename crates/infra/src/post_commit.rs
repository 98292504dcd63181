//! Side effects that run after a unit of work has committed.
//!
//! Order per commit: read models, then the event bus, then delivery jobs.
//! Every step is best-effort. A failure is logged and counted; the committed
//! financial state is never touched again.

use std::sync::Arc;

use serde_json::{Value as JsonValue, json};
use tracing::{debug, error, warn};

use windledger_events::{EventBus, EventEnvelope};

use crate::event_store::StoredEvent;
use crate::jobs::{DeliveryJob, DeliveryKind, JobStore, RetryPolicy};
use crate::read_model::InvoiceDirectory;

/// Committed event types tenants can subscribe to with webhooks.
pub const WEBHOOK_EVENT_TYPES: &[&str] = &[
    "settlement.approved",
    "settlement.settled",
    "allocation.invoiced",
    "invoicing.invoice.sent",
    "invoicing.invoice.cancelled",
    "invoicing.invoice.positions_cancelled",
];

const INVOICE_SENT: &str = "invoicing.invoice.sent";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostCommitReport {
    pub projected: usize,
    pub published: usize,
    pub jobs_enqueued: usize,
    pub failures: usize,
}

pub struct PostCommit<B> {
    bus: B,
    directory: Arc<InvoiceDirectory>,
    jobs: Arc<dyn JobStore>,
    retry_policy: RetryPolicy,
}

impl<B> PostCommit<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(bus: B, directory: Arc<InvoiceDirectory>, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            bus,
            directory,
            jobs,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn directory(&self) -> &Arc<InvoiceDirectory> {
        &self.directory
    }

    pub fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub fn after_commit(&self, committed: &[StoredEvent]) -> PostCommitReport {
        let envelopes: Vec<EventEnvelope<JsonValue>> =
            committed.iter().map(StoredEvent::to_envelope).collect();
        let mut report = PostCommitReport::default();

        for envelope in &envelopes {
            match self.directory.apply_envelope(envelope) {
                Ok(()) => report.projected += 1,
                Err(e) => {
                    report.failures += 1;
                    error!(
                        tenant_id = %envelope.tenant_id(),
                        aggregate_id = %envelope.aggregate_id(),
                        sequence = envelope.sequence_number(),
                        error = %e,
                        "invoice directory update failed"
                    );
                }
            }
        }

        for envelope in &envelopes {
            match self.bus.publish(envelope.clone()) {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failures += 1;
                    warn!(event_id = %envelope.event_id(), error = ?e, "event publication failed");
                }
            }
        }

        for envelope in &envelopes {
            for job in self.jobs_for(envelope) {
                let kind = job.kind.name();
                match self.jobs.enqueue(job) {
                    Ok(job_id) => {
                        report.jobs_enqueued += 1;
                        debug!(%job_id, kind, "delivery job enqueued");
                    }
                    Err(e) => {
                        report.failures += 1;
                        error!(kind, error = %e, "failed to enqueue delivery job");
                    }
                }
            }
        }

        report
    }

    fn jobs_for(&self, envelope: &EventEnvelope<JsonValue>) -> Vec<DeliveryJob> {
        let tenant_id = envelope.tenant_id();
        let source = envelope.event_id();
        let mut jobs = Vec::new();

        if envelope.event_type() == INVOICE_SENT {
            let document_id = envelope.aggregate_id();
            match self.directory.get(tenant_id, document_id) {
                Some(summary) => {
                    let payload = json!({
                        "number": summary.number,
                        "document_type": summary.document_type,
                        "gross_amount": summary.gross_amount,
                    });
                    jobs.push(DeliveryJob::new(
                        tenant_id,
                        DeliveryKind::RenderPdf { document_id },
                        source,
                        payload.clone(),
                    ));
                    if let Some(recipient) = summary.recipient_email {
                        jobs.push(DeliveryJob::new(
                            tenant_id,
                            DeliveryKind::SendEmail {
                                document_id,
                                recipient,
                            },
                            source,
                            payload,
                        ));
                    }
                }
                None => warn!(%document_id, "sent document missing from directory, no delivery"),
            }
        }

        if WEBHOOK_EVENT_TYPES.contains(&envelope.event_type()) {
            jobs.push(DeliveryJob::new(
                tenant_id,
                DeliveryKind::DispatchWebhook {
                    event_type: envelope.event_type().to_string(),
                },
                source,
                json!({
                    "event_id": envelope.event_id(),
                    "aggregate_id": envelope.aggregate_id(),
                    "aggregate_type": envelope.aggregate_type(),
                    "occurred_at": envelope.occurred_at(),
                    "payload": envelope.payload(),
                }),
            ));
        }

        jobs.into_iter()
            .map(|job| job.with_retry_policy(self.retry_policy.clone()))
            .collect()
    }
}
