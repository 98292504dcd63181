//! Infrastructure wiring for the HTTP process.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::info;

use windledger_events::{EventEnvelope, InMemoryEventBus};
use windledger_infra::jobs::{DeliveryJob, DeliveryKind, InMemoryJobStore, JobResult};
use windledger_infra::read_model::{InMemoryTenantStore, InvoiceDirectory};
use windledger_infra::{BillingServices, InMemoryEventStore, PostCommit};

use crate::config::ApiConfig;

pub type AppEventBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
pub type Billing = BillingServices<InMemoryEventStore, AppEventBus>;

/// Shared state behind every handler.
pub struct AppServices {
    pub billing: Billing,
    pub jobs: Arc<InMemoryJobStore>,
    pub config: ApiConfig,
}

pub fn build_services(config: ApiConfig) -> AppServices {
    let bus: AppEventBus = Arc::new(InMemoryEventBus::new());
    let directory = Arc::new(InvoiceDirectory::new(Arc::new(InMemoryTenantStore::new())));
    let jobs = Arc::new(InMemoryJobStore::new());
    let post_commit = PostCommit::new(bus, directory, jobs.clone());

    let billing = BillingServices::new(
        InMemoryEventStore::new(),
        post_commit,
        config.services.clone(),
    );

    AppServices {
        billing,
        jobs,
        config,
    }
}

/// Delivery transports are external; this process records the hand-off.
pub fn log_delivery(job: &DeliveryJob) -> JobResult {
    match &job.kind {
        DeliveryKind::RenderPdf { document_id } => {
            info!(tenant_id = %job.tenant_id, %document_id, "document queued for rendering");
        }
        DeliveryKind::SendEmail {
            document_id,
            recipient,
        } => {
            info!(tenant_id = %job.tenant_id, %document_id, recipient = %recipient, "document queued for email");
        }
        DeliveryKind::DispatchWebhook { event_type } => {
            info!(tenant_id = %job.tenant_id, event_type = %event_type, "webhook queued");
        }
    }
    JobResult::Success
}
