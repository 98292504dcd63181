use chrono::{DateTime, Utc};

/// A domain event (an immutable, versioned fact).
///
/// Every settlement, allocation, invoice and sequence change is recorded as
/// one of these; the `event_type` string is the stable name used on the wire.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name (e.g. "settlement.approved").
    fn event_type(&self) -> &'static str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
