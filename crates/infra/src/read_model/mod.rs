//! Disposable, tenant-isolated read models fed from committed envelopes.

pub mod invoice_directory;
pub mod tenant_store;

pub use invoice_directory::{InvoiceDirectory, InvoiceDirectoryError, InvoiceSummary};
pub use tenant_store::{InMemoryTenantStore, TenantStore};
