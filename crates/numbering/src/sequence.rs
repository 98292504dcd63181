use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use windledger_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use windledger_events::Event;

use crate::format::{DEFAULT_DIGITS, NumberFormat};

/// Kind of financial document a sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    Invoice,
    CreditNote,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Invoice => "INVOICE",
            DocumentType::CreditNote => "CREDIT_NOTE",
        }
    }

    /// Built-in template used when a tenant has not configured one.
    pub fn default_format(self) -> NumberFormat {
        let template = match self {
            DocumentType::Invoice => "RG-{YYYY}-{NUMBER}",
            DocumentType::CreditNote => "GS-{YYYY}-{NUMBER}",
        };
        NumberFormat::builtin(template, DEFAULT_DIGITS)
    }
}

impl core::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sequence stream identifier; one per (tenant, document type).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub AggregateId);

impl SequenceId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }

    /// Deterministic stream id, so the sequence needs no lookup table.
    pub fn for_document(tenant_id: TenantId, document_type: DocumentType) -> Self {
        Self(AggregateId::derived(
            tenant_id,
            &format!("number-sequence:{}", document_type.as_str()),
        ))
    }
}

impl core::fmt::Display for SequenceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Aggregate root: NumberSequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumberSequence {
    id: SequenceId,
    tenant_id: Option<TenantId>,
    document_type: Option<DocumentType>,
    format: Option<NumberFormat>,
    current_year: Option<i32>,
    next_number: u64,
    version: u64,
    created: bool,
}

impl NumberSequence {
    pub fn empty(id: SequenceId) -> Self {
        Self {
            id,
            tenant_id: None,
            document_type: None,
            format: None,
            current_year: None,
            next_number: 1,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn document_type(&self) -> Option<DocumentType> {
        self.document_type
    }

    pub fn format(&self) -> Option<&NumberFormat> {
        self.format.as_ref()
    }

    pub fn current_year(&self) -> Option<i32> {
        self.current_year
    }

    /// The counter value the next reservation in `current_year` starts at.
    pub fn next_number(&self) -> u64 {
        self.next_number
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for NumberSequence {
    type Id = SequenceId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ConfigureSequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureSequence {
    pub tenant_id: TenantId,
    pub sequence_id: SequenceId,
    pub document_type: DocumentType,
    pub format: NumberFormat,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveNumbers.
///
/// Creates the sequence with `default_format` on first use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveNumbers {
    pub tenant_id: TenantId,
    pub sequence_id: SequenceId,
    pub document_type: DocumentType,
    pub count: u32,
    /// Issue date deciding the year (and `{MM}`) of the numbers.
    pub on_date: NaiveDate,
    pub default_format: NumberFormat,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceCommand {
    Configure(ConfigureSequence),
    Reserve(ReserveNumbers),
}

/// Event: SequenceConfigured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfigured {
    pub tenant_id: TenantId,
    pub sequence_id: SequenceId,
    pub document_type: DocumentType,
    pub format: NumberFormat,
    pub occurred_at: DateTime<Utc>,
}

/// Event: NumbersReserved.
///
/// `first..first + count` are issued for `year`; `numbers` holds them rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumbersReserved {
    pub tenant_id: TenantId,
    pub sequence_id: SequenceId,
    pub document_type: DocumentType,
    pub year: i32,
    pub month: u32,
    pub first: u64,
    pub count: u32,
    pub numbers: Vec<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceEvent {
    SequenceConfigured(SequenceConfigured),
    NumbersReserved(NumbersReserved),
}

impl Event for SequenceEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SequenceEvent::SequenceConfigured(_) => "numbering.sequence.configured",
            SequenceEvent::NumbersReserved(_) => "numbering.sequence.numbers_reserved",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SequenceEvent::SequenceConfigured(e) => e.occurred_at,
            SequenceEvent::NumbersReserved(e) => e.occurred_at,
        }
    }
}

impl Aggregate for NumberSequence {
    type Command = SequenceCommand;
    type Event = SequenceEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SequenceEvent::SequenceConfigured(e) => {
                self.id = e.sequence_id;
                self.tenant_id = Some(e.tenant_id);
                self.document_type = Some(e.document_type);
                self.format = Some(e.format.clone());
                self.created = true;
            }
            SequenceEvent::NumbersReserved(e) => {
                self.current_year = Some(e.year);
                self.next_number = e.first + u64::from(e.count);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SequenceCommand::Configure(cmd) => self.handle_configure(cmd),
            SequenceCommand::Reserve(cmd) => self.handle_reserve(cmd),
        }
    }
}

impl NumberSequence {
    fn ensure_scope(
        &self,
        tenant_id: TenantId,
        sequence_id: SequenceId,
        document_type: DocumentType,
    ) -> Result<(), DomainError> {
        if self.id != sequence_id {
            return Err(DomainError::invariant("sequence_id mismatch"));
        }
        if !self.created {
            return Ok(());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.document_type != Some(document_type) {
            return Err(DomainError::invariant("document type mismatch"));
        }
        Ok(())
    }

    fn handle_configure(&self, cmd: &ConfigureSequence) -> Result<Vec<SequenceEvent>, DomainError> {
        self.ensure_scope(cmd.tenant_id, cmd.sequence_id, cmd.document_type)?;

        Ok(vec![SequenceEvent::SequenceConfigured(SequenceConfigured {
            tenant_id: cmd.tenant_id,
            sequence_id: cmd.sequence_id,
            document_type: cmd.document_type,
            format: cmd.format.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveNumbers) -> Result<Vec<SequenceEvent>, DomainError> {
        self.ensure_scope(cmd.tenant_id, cmd.sequence_id, cmd.document_type)?;

        if cmd.count == 0 {
            return Err(DomainError::validation("count must be at least 1"));
        }

        let year = cmd.on_date.year();
        let month = cmd.on_date.month();

        let mut events = Vec::with_capacity(2);
        let format = match &self.format {
            Some(format) if self.created => format.clone(),
            _ => {
                events.push(SequenceEvent::SequenceConfigured(SequenceConfigured {
                    tenant_id: cmd.tenant_id,
                    sequence_id: cmd.sequence_id,
                    document_type: cmd.document_type,
                    format: cmd.default_format.clone(),
                    occurred_at: cmd.occurred_at,
                }));
                cmd.default_format.clone()
            }
        };

        // Counters only reset forward; going back a year would re-issue numbers.
        let first = match self.current_year {
            Some(current) if year < current => {
                return Err(DomainError::validation(format!(
                    "reservation year {year} precedes the sequence year {current}"
                )));
            }
            Some(current) if year == current => self.next_number,
            _ => 1,
        };

        let numbers = (0..u64::from(cmd.count))
            .map(|offset| format.render(year, month, first + offset))
            .collect();

        events.push(SequenceEvent::NumbersReserved(NumbersReserved {
            tenant_id: cmd.tenant_id,
            sequence_id: cmd.sequence_id,
            document_type: cmd.document_type,
            year,
            month,
            first,
            count: cmd.count,
            numbers,
            occurred_at: cmd.occurred_at,
        }));

        Ok(events)
    }
}
