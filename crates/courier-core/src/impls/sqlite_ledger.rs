//! SqliteLedger - `webhook_deliveries` table on SQLite.
//!
//! One row per (lead_id, partner_id). Every write is a single
//! `INSERT ... ON CONFLICT DO UPDATE`, so concurrent attempts for the same pair
//! never produce duplicate rows; the last statement to commit wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;

use crate::domain::{DeliveryRecord, DeliveryStatus, LedgerError, LedgerSummary, RecordAttempt};
use crate::ports::{Clock, DeliveryLedger, SystemClock};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS webhook_deliveries (
    id                    INTEGER PRIMARY KEY AUTOINCREMENT,
    lead_id               TEXT    NOT NULL,
    partner_id            TEXT    NOT NULL,
    target_url            TEXT    NOT NULL,
    payload_snapshot      TEXT    NOT NULL,
    response_code         INTEGER,
    response_status       TEXT,
    response_body_snippet TEXT,
    response_time_ms      INTEGER,
    error_message         TEXT,
    status                TEXT    NOT NULL,
    delivered_at          TEXT    NOT NULL,
    attempts              INTEGER NOT NULL DEFAULT 0,
    created_at            TEXT    NOT NULL,
    updated_at            TEXT    NOT NULL,
    UNIQUE (lead_id, partner_id)
)
"#;

const UPSERT_ATTEMPT: &str = r#"
INSERT INTO webhook_deliveries (
    lead_id, partner_id, target_url, payload_snapshot,
    response_code, response_status, response_body_snippet, response_time_ms,
    error_message, status, delivered_at, attempts, created_at, updated_at
)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 1, ?11, ?11)
ON CONFLICT (lead_id, partner_id) DO UPDATE SET
    target_url            = excluded.target_url,
    payload_snapshot      = excluded.payload_snapshot,
    response_code         = excluded.response_code,
    response_status       = excluded.response_status,
    response_body_snippet = excluded.response_body_snippet,
    response_time_ms      = excluded.response_time_ms,
    error_message         = excluded.error_message,
    status                = excluded.status,
    delivered_at          = excluded.delivered_at,
    attempts              = webhook_deliveries.attempts + 1,
    updated_at            = excluded.updated_at
"#;

const UPSERT_TERMINAL: &str = r#"
INSERT INTO webhook_deliveries (
    lead_id, partner_id, target_url, payload_snapshot,
    error_message, status, delivered_at, attempts, created_at, updated_at
)
VALUES (?1, ?2, '', 'null', ?3, 'permanently_failed', ?4, 0, ?4, ?4)
ON CONFLICT (lead_id, partner_id) DO UPDATE SET
    status        = 'permanently_failed',
    error_message = excluded.error_message,
    updated_at    = excluded.updated_at
"#;

const SELECT_COLUMNS: &str = "lead_id, partner_id, target_url, payload_snapshot, \
    response_code, response_status, response_body_snippet, response_time_ms, \
    error_message, status, delivered_at, attempts";

pub struct SqliteLedger<C = SystemClock> {
    pool: SqlitePool,
    clock: C,
}

impl SqliteLedger {
    /// Open (creating the file if needed) and ensure the table exists.
    ///
    /// In-memory URLs get a single long-lived connection; each SQLite memory
    /// connection is a separate database.
    pub async fn connect(url: &str) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(options).await?;

        let ledger = Self::with_pool(pool, SystemClock);
        ledger.ensure_schema().await?;
        Ok(ledger)
    }
}

impl<C: Clock> SqliteLedger<C> {
    pub fn with_pool(pool: SqlitePool, clock: C) -> Self {
        Self { pool, clock }
    }

    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn find(
        &self,
        lead_id: &str,
        partner_id: &str,
    ) -> Result<Option<DeliveryRecord>, LedgerError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM webhook_deliveries WHERE lead_id = ?1 AND partner_id = ?2"
        );
        let row = sqlx::query(&sql)
            .bind(lead_id)
            .bind(partner_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(decode_record).transpose()
    }

    /// Record counts by status across all partners.
    pub async fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS cnt FROM webhook_deliveries GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        fold_summary(&rows)
    }

    pub async fn partner_summary(&self, partner_id: &str) -> Result<LedgerSummary, LedgerError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS cnt FROM webhook_deliveries \
             WHERE partner_id = ?1 GROUP BY status",
        )
        .bind(partner_id)
        .fetch_all(&self.pool)
        .await?;
        fold_summary(&rows)
    }

    async fn try_record(&self, attempt: &RecordAttempt) -> Result<(), LedgerError> {
        let now = self.clock.now();
        let snapshot = serde_json::to_string(&attempt.payload)?;
        let response = attempt.response.as_ref();

        sqlx::query(UPSERT_ATTEMPT)
            .bind(&attempt.lead_id)
            .bind(&attempt.partner_id)
            .bind(&attempt.target_url)
            .bind(snapshot)
            .bind(response.map(|r| i64::from(r.status_code)))
            .bind(response.map(|r| r.status_text.as_str()))
            .bind(response.map(|r| r.body_snippet.as_str()))
            .bind(i64::try_from(attempt.response_time_ms).unwrap_or(i64::MAX))
            .bind(attempt.error_message.as_deref())
            .bind(attempt.status.as_str())
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn try_mark_terminal(
        &self,
        lead_id: &str,
        partner_id: &str,
        error_message: &str,
    ) -> Result<(), LedgerError> {
        sqlx::query(UPSERT_TERMINAL)
            .bind(lead_id)
            .bind(partner_id)
            .bind(error_message)
            .bind(self.clock.now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn decode_record(row: &SqliteRow) -> Result<DeliveryRecord, LedgerError> {
    let status: String = row.try_get("status")?;
    let status = DeliveryStatus::parse(&status).ok_or(LedgerError::UnknownStatus(status))?;
    let snapshot: String = row.try_get("payload_snapshot")?;
    let response_code: Option<i64> = row.try_get("response_code")?;
    let response_time_ms: Option<i64> = row.try_get("response_time_ms")?;
    let attempts: i64 = row.try_get("attempts")?;
    let delivered_at: DateTime<Utc> = row.try_get("delivered_at")?;

    Ok(DeliveryRecord {
        lead_id: row.try_get("lead_id")?,
        partner_id: row.try_get("partner_id")?,
        target_url: row.try_get("target_url")?,
        payload_snapshot: serde_json::from_str(&snapshot)?,
        response_code: response_code.and_then(|c| u16::try_from(c).ok()),
        response_status: row.try_get("response_status")?,
        response_body_snippet: row.try_get("response_body_snippet")?,
        response_time_ms: response_time_ms.and_then(|ms| u64::try_from(ms).ok()),
        error_message: row.try_get("error_message")?,
        status,
        delivered_at,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
    })
}

fn fold_summary(rows: &[SqliteRow]) -> Result<LedgerSummary, LedgerError> {
    let mut summary = LedgerSummary::default();
    for row in rows {
        let status: String = row.try_get("status")?;
        let count: i64 = row.try_get("cnt")?;
        let status = DeliveryStatus::parse(&status).ok_or(LedgerError::UnknownStatus(status))?;
        summary.add(status, count.max(0) as u64);
    }
    Ok(summary)
}

#[async_trait]
impl<C: Clock> DeliveryLedger for SqliteLedger<C> {
    async fn record(&self, attempt: RecordAttempt) {
        if let Err(err) = self.try_record(&attempt).await {
            tracing::error!(
                target: "courier::ledger",
                lead_id = %attempt.lead_id,
                partner_id = %attempt.partner_id,
                status = attempt.status.as_str(),
                error = %err,
                "failed to record delivery attempt"
            );
        }
    }

    async fn mark_terminal(&self, lead_id: &str, partner_id: &str, error_message: &str) {
        if let Err(err) = self.try_mark_terminal(lead_id, partner_id, error_message).await {
            tracing::error!(
                target: "courier::ledger",
                lead_id,
                partner_id,
                error = %err,
                "failed to mark delivery permanently failed"
            );
        }
    }
}
