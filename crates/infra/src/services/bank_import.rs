use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use windledger_core::TenantId;
use windledger_events::{EventBus, EventEnvelope};
use windledger_reconciliation::{MatchConfidence, ReconciliationReport, reconcile};

use crate::error::ServiceResult;
use crate::event_store::EventStore;
use crate::services::BillingServices;

impl<S, B> BillingServices<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Parse a bank statement and propose matches against the tenant's open
    /// invoices. Nothing is booked.
    #[instrument(skip(self, statement), fields(tenant_id = %tenant_id, bytes = statement.len()))]
    pub fn import_bank_statement(
        &self,
        tenant_id: TenantId,
        statement: &str,
    ) -> ServiceResult<ReconciliationReport> {
        let open = self.directory().open_invoices(tenant_id);
        let report = reconcile(statement, &open)?;

        if report.skipped_records > 0 {
            warn!(
                skipped = report.skipped_records,
                format = report.format.as_str(),
                "bank statement records skipped"
            );
        }
        info!(
            format = report.format.as_str(),
            transactions = report.transaction_count,
            open_invoices = open.len(),
            high = report.count(MatchConfidence::High),
            medium = report.count(MatchConfidence::Medium),
            low = report.count(MatchConfidence::Low),
            "bank statement reconciled"
        );
        Ok(report)
    }
}
