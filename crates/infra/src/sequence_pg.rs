//! Relational sequence allocator.
//!
//! For deployments that keep document numbering in Postgres next to other
//! relational data. The counter row is locked with `SELECT ... FOR UPDATE`
//! inside the caller's transaction, so numbers are only consumed if that
//! transaction commits.

use std::sync::Arc;

use chrono::Datelike;
use sqlx::{PgConnection, PgPool, Row};
use tracing::{debug, info};

use windledger_core::{DomainError, TenantId};
use windledger_numbering::{DocumentType, NumberFormat};

use crate::clock::{Clock, SystemClock};
use crate::error::ServiceResult;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS document_sequences (
    tenant_id     UUID        NOT NULL,
    document_type TEXT        NOT NULL,
    template      TEXT        NOT NULL,
    digits        SMALLINT    NOT NULL,
    current_year  INTEGER     NOT NULL,
    next_number   BIGINT      NOT NULL,
    updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (tenant_id, document_type)
)
"#;

pub struct PgSequenceAllocator {
    invoice_format: NumberFormat,
    credit_note_format: NumberFormat,
    clock: Arc<dyn Clock>,
}

impl Default for PgSequenceAllocator {
    fn default() -> Self {
        Self::new(
            DocumentType::Invoice.default_format(),
            DocumentType::CreditNote.default_format(),
        )
    }
}

impl PgSequenceAllocator {
    /// Formats apply to rows created on first use; existing rows keep theirs.
    pub fn new(invoice_format: NumberFormat, credit_note_format: NumberFormat) -> Self {
        Self {
            invoice_format,
            credit_note_format,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn ensure_schema(pool: &PgPool) -> ServiceResult<()> {
        sqlx::query(CREATE_TABLE).execute(pool).await?;
        Ok(())
    }

    /// Reserve `count` consecutive numbers on `conn`, which should be inside
    /// an open transaction.
    pub async fn next_numbers(
        &self,
        conn: &mut PgConnection,
        tenant_id: TenantId,
        document_type: DocumentType,
        count: u32,
    ) -> ServiceResult<Vec<String>> {
        if count == 0 {
            return Err(DomainError::validation("count must be at least 1").into());
        }
        let today = self.clock.today();
        let year = today.year();
        let month = today.month();
        let default_format = match document_type {
            DocumentType::Invoice => &self.invoice_format,
            DocumentType::CreditNote => &self.credit_note_format,
        };

        sqlx::query(
            r#"
            INSERT INTO document_sequences (
                tenant_id, document_type, template, digits, current_year, next_number
            )
            VALUES ($1, $2, $3, $4, $5, 1)
            ON CONFLICT (tenant_id, document_type) DO NOTHING
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(document_type.as_str())
        .bind(default_format.template())
        .bind(i16::from(default_format.digits()))
        .bind(year)
        .execute(&mut *conn)
        .await?;

        let row = sqlx::query(
            r#"
            SELECT template, digits, current_year, next_number
            FROM document_sequences
            WHERE tenant_id = $1 AND document_type = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(document_type.as_str())
        .fetch_one(&mut *conn)
        .await?;

        let template: String = row.try_get("template")?;
        let digits: i16 = row.try_get("digits")?;
        let current_year: i32 = row.try_get("current_year")?;
        let stored_next: i64 = row.try_get("next_number")?;

        let digits = u8::try_from(digits)
            .map_err(|_| DomainError::invariant(format!("stored digit count {digits} out of range")))?;
        let format = NumberFormat::new(template, digits)?;

        let first = if year < current_year {
            return Err(DomainError::validation(format!(
                "reservation year {year} precedes the sequence year {current_year}"
            ))
            .into());
        } else if year > current_year {
            debug!(from = current_year, to = year, "sequence year rollover");
            1
        } else {
            u64::try_from(stored_next)
                .map_err(|_| DomainError::invariant("stored counter is negative"))?
        };

        let next = first + u64::from(count);
        let next = i64::try_from(next).map_err(|_| DomainError::invariant("counter overflow"))?;
        sqlx::query(
            r#"
            UPDATE document_sequences
            SET current_year = $3, next_number = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND document_type = $2
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(document_type.as_str())
        .bind(year)
        .bind(next)
        .execute(&mut *conn)
        .await?;

        let numbers: Vec<String> = (0..u64::from(count))
            .map(|offset| format.render(year, month, first + offset))
            .collect();
        info!(
            tenant_id = %tenant_id,
            document_type = %document_type,
            count,
            first = numbers.first().map(String::as_str),
            "numbers allocated"
        );
        Ok(numbers)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::clock::FixedClock;

    async fn pool() -> Option<PgPool> {
        let url = std::env::var("DATABASE_URL").ok()?;
        PgPool::connect(&url).await.ok()
    }

    fn on(y: i32, m: u32, d: u32) -> PgSequenceAllocator {
        PgSequenceAllocator::default().with_clock(Arc::new(FixedClock(
            NaiveDate::from_ymd_opt(y, m, d).unwrap(),
        )))
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn allocates_in_transaction_and_discards_on_rollback() {
        let Some(pool) = pool().await else {
            return;
        };
        PgSequenceAllocator::ensure_schema(&pool).await.unwrap();
        let allocator = on(2026, 3, 1);
        let tenant = TenantId::new();

        let mut tx = pool.begin().await.unwrap();
        let numbers = allocator
            .next_numbers(&mut tx, tenant, DocumentType::Invoice, 2)
            .await
            .unwrap();
        assert_eq!(numbers, vec!["RG-2026-0001", "RG-2026-0002"]);
        tx.rollback().await.unwrap();

        let mut tx = pool.begin().await.unwrap();
        let numbers = allocator
            .next_numbers(&mut tx, tenant, DocumentType::Invoice, 1)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(numbers, vec!["RG-2026-0001"]);

        let mut tx = pool.begin().await.unwrap();
        let numbers = on(2027, 1, 1)
            .next_numbers(&mut tx, tenant, DocumentType::Invoice, 1)
            .await
            .unwrap();
        tx.commit().await.unwrap();
        assert_eq!(numbers, vec!["RG-2027-0001"]);
    }
}
