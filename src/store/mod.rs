//! Persistence layer: libSQL-backed storage for batches, blocklist,
//! warm-up counters, and contact history.
//!
//! The store is the single source of truth for all state transitions. Every
//! transition is a single guarded statement so that two overlapping runs
//! cannot double-send a batch or double-count warm-up usage.

pub mod migrations;

use std::path::Path;

use chrono::{DateTime, Local, NaiveDate, Utc};
use libsql::{Connection, params};
use tracing::{debug, info};

use crate::batch::BatchDraft;
use crate::error::DatabaseError;
use crate::model::{BatchStatus, BlocklistEntry, OutreachBatch, WarmupStats};

/// Pipeline counters for the operator status surface.
#[derive(Debug, Clone, Default)]
pub struct PipelineStats {
    pub queued: u32,
    pub approved: u32,
    pub sent: u32,
    pub replied: u32,
    pub closed: u32,
    pub awaiting_reply: u32,
    pub sent_today: u32,
    pub replied_today: u32,
    /// Replies as a percentage of batches that reached `sent`.
    pub response_rate: f64,
}

/// libSQL-backed outreach store.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct Store {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: Connection,
}

const BATCH_COLUMNS: &str = "id, organization, status, recipients, opportunities, subject, body, \
     created_at, approved_at, sent_at, replied_at, follow_up_count, next_follow_up_date, notes";

impl Store {
    /// Open (or create) a local database file and run migrations.
    pub async fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Open(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to open database: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        info!(path = %path.display(), "Outreach store opened");
        Ok(Self { db, conn })
    }

    /// Create an in-memory store (for tests and dry experiments).
    pub async fn open_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| DatabaseError::Open(format!("Failed to create in-memory db: {e}")))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Open(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;
        Ok(Self { db, conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Batches ─────────────────────────────────────────────────────

    /// Persist a new batch as `queued`. The batch row and its
    /// per-opportunity detail rows are written in one transaction;
    /// created together or not at all.
    pub async fn create_batch(
        &self,
        draft: &BatchDraft,
        subject: &str,
        body: &str,
    ) -> Result<i64, DatabaseError> {
        let recipients_json = serde_json::to_string(&draft.recipients)
            .map_err(|e| DatabaseError::Serialization(format!("recipients: {e}")))?;
        let opportunities_json = serde_json::to_string(&draft.opportunities)
            .map_err(|e| DatabaseError::Serialization(format!("opportunities: {e}")))?;

        let tx = self
            .conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_batch begin: {e}")))?;

        tx.execute(
            "INSERT INTO batches (organization, status, recipients, opportunities, subject, body, created_at)
             VALUES (?1, 'queued', ?2, ?3, ?4, ?5, ?6)",
            params![
                draft.organization.as_str(),
                recipients_json,
                opportunities_json,
                subject,
                body,
                Utc::now().to_rfc3339(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("create_batch: {e}")))?;

        let batch_id = tx.last_insert_rowid();

        for opp in &draft.opportunities {
            tx.execute(
                "INSERT OR IGNORE INTO batch_opportunities
                 (batch_id, opportunity_id, organization_name, registration_id, score)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    batch_id,
                    opp.id.as_str(),
                    opp.organization_name.as_str(),
                    opp.registration_id.as_str(),
                    opp.score,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_batch detail: {e}")))?;
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("create_batch commit: {e}")))?;

        debug!(batch_id, organization = %draft.organization, "Batch created");
        Ok(batch_id)
    }

    /// Fetch a single batch by id.
    pub async fn batch(&self, id: i64) -> Result<Option<OutreachBatch>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("batch: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("batch: {e}")))?
        {
            Some(row) => Ok(Some(row_to_batch(&row)?)),
            None => Ok(None),
        }
    }

    /// All batches with the given status, oldest first.
    pub async fn batches_by_status(
        &self,
        status: BatchStatus,
    ) -> Result<Vec<OutreachBatch>, DatabaseError> {
        self.query_batches(
            &format!("SELECT {BATCH_COLUMNS} FROM batches WHERE status = ?1 ORDER BY created_at"),
            params![status.as_str()],
        )
        .await
    }

    /// Queued and approved batches, oldest first.
    pub async fn pending_batches(&self) -> Result<Vec<OutreachBatch>, DatabaseError> {
        self.query_batches(
            &format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE status IN ('queued', 'approved') ORDER BY created_at"
            ),
            (),
        )
        .await
    }

    /// Batches that received replies, most recent reply first.
    pub async fn recent_replies(&self, limit: u32) -> Result<Vec<OutreachBatch>, DatabaseError> {
        self.query_batches(
            &format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE replied_at IS NOT NULL ORDER BY replied_at DESC LIMIT ?1"
            ),
            params![i64::from(limit)],
        )
        .await
    }

    /// All batches, most recent first.
    pub async fn all_batches(&self, limit: u32) -> Result<Vec<OutreachBatch>, DatabaseError> {
        self.query_batches(
            &format!("SELECT {BATCH_COLUMNS} FROM batches ORDER BY created_at DESC LIMIT ?1"),
            params![i64::from(limit)],
        )
        .await
    }

    /// Guarded forward transition. Updates status (and its timestamp column,
    /// first write only) in a single statement gated on the current status;
    /// returns false when the batch was not in one of `expected`.
    pub async fn transition(
        &self,
        id: i64,
        expected: &[BatchStatus],
        to: BatchStatus,
        note: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let ts_set = match to {
            BatchStatus::Approved => ", approved_at = COALESCE(approved_at, ?2)",
            BatchStatus::Sent => ", sent_at = COALESCE(sent_at, ?2)",
            BatchStatus::Replied => ", replied_at = COALESCE(replied_at, ?2)",
            BatchStatus::Queued | BatchStatus::Closed => "",
        };
        let expected_list = expected
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            "UPDATE batches SET status = ?1{ts_set},
                 notes = CASE WHEN ?3 = '' THEN notes
                              WHEN notes = '' THEN ?3
                              ELSE notes || char(10) || ?3 END
             WHERE id = ?4 AND status IN ({expected_list})"
        );

        let affected = self
            .conn
            .execute(
                &sql,
                params![
                    to.as_str(),
                    Utc::now().to_rfc3339(),
                    note.unwrap_or(""),
                    id
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("transition: {e}")))?;

        if affected > 0 {
            debug!(batch_id = id, to = %to, "Batch transitioned");
        }
        Ok(affected > 0)
    }

    // ── Follow-ups ──────────────────────────────────────────────────

    /// Sent, unanswered batches with exactly `follow_up_count` follow-ups so
    /// far whose original send is at least `interval_days` old.
    pub async fn followups_due(
        &self,
        follow_up_count: u32,
        interval_days: i64,
    ) -> Result<Vec<OutreachBatch>, DatabaseError> {
        self.query_batches(
            &format!(
                "SELECT {BATCH_COLUMNS} FROM batches
                 WHERE status = 'sent'
                   AND replied_at IS NULL
                   AND follow_up_count = ?1
                   AND date(sent_at) <= date('now', ?2)
                 ORDER BY sent_at"
            ),
            params![i64::from(follow_up_count), format!("-{interval_days} days")],
        )
        .await
    }

    /// Record a sent follow-up: increment the count and set (or clear) the
    /// next due date. Guarded on the expected count so overlapping runs
    /// cannot double-record the same follow-up.
    pub async fn increment_followup(
        &self,
        id: i64,
        expected_count: u32,
        next_date: Option<NaiveDate>,
    ) -> Result<bool, DatabaseError> {
        let affected = self
            .conn
            .execute(
                "UPDATE batches
                 SET follow_up_count = follow_up_count + 1, next_follow_up_date = ?1
                 WHERE id = ?2 AND status = 'sent' AND follow_up_count = ?3",
                params![
                    opt_text(next_date.map(|d| d.to_string()).as_deref()),
                    id,
                    i64::from(expected_count)
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_followup: {e}")))?;
        Ok(affected > 0)
    }

    // ── Blocklist ───────────────────────────────────────────────────

    /// Case-insensitive blocklist check.
    pub async fn is_blocked(&self, email: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM blocklist WHERE email = LOWER(?1) LIMIT 1",
                params![email.trim()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_blocked: {e}")))?;
        Ok(rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("is_blocked: {e}")))?
            .is_some())
    }

    /// Add an address to the blocklist. Idempotent.
    pub async fn block(&self, email: &str, reason: &str) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO blocklist (email, reason, added_at) VALUES (LOWER(?1), ?2, ?3)",
                params![email.trim(), reason, Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("block: {e}")))?;
        info!(email = %email.trim().to_lowercase(), reason, "Address blocklisted");
        Ok(())
    }

    /// Remove an address from the blocklist. Returns false when absent.
    pub async fn unblock(&self, email: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn
            .execute(
                "DELETE FROM blocklist WHERE email = LOWER(?1)",
                params![email.trim()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("unblock: {e}")))?;
        Ok(affected > 0)
    }

    /// All blocklist entries, most recent first.
    pub async fn blocklist(&self) -> Result<Vec<BlocklistEntry>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT email, reason, added_at FROM blocklist ORDER BY added_at DESC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("blocklist: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let added_str: String = row
                .get(2)
                .map_err(|e| DatabaseError::Query(format!("blocklist row: {e}")))?;
            entries.push(BlocklistEntry {
                email: row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("blocklist row: {e}")))?,
                reason: row
                    .get(1)
                    .map_err(|e| DatabaseError::Query(format!("blocklist row: {e}")))?,
                added_at: parse_datetime(&added_str),
            });
        }
        Ok(entries)
    }

    // ── Warm-up ─────────────────────────────────────────────────────

    /// Atomically claim one send slot for today against the given daily cap.
    ///
    /// The increment and the cap comparison are a single upsert so that two
    /// overlapping runs can never both pass the check before either
    /// increments. Returns today's new count, or `None` when the cap is
    /// already reached (the caller defers, it does not fail). The first ever
    /// reservation also fixes `first_send_date`.
    pub async fn reserve_send_slot(&self, cap: Option<u32>) -> Result<Option<u32>, DatabaseError> {
        let today = Local::now().date_naive().to_string();
        let cap_value: i64 = cap.map(i64::from).unwrap_or(i64::MAX);

        let mut rows = self
            .conn
            .query(
                "INSERT INTO warmup_counters (date, emails_sent, first_send_date)
                 VALUES (?1, 1, COALESCE((SELECT MIN(first_send_date) FROM warmup_counters), ?1))
                 ON CONFLICT(date) DO UPDATE SET emails_sent = emails_sent + 1
                 WHERE emails_sent < ?2
                 RETURNING emails_sent",
                params![today, cap_value],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("reserve_send_slot: {e}")))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("reserve_send_slot: {e}")))?
        {
            Some(row) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("reserve_send_slot: {e}")))?;
                Ok(Some(count as u32))
            }
            None => Ok(None),
        }
    }

    /// Warm-up state: first send date, sender age, today's count.
    pub async fn warmup_stats(&self) -> Result<WarmupStats, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT MIN(first_send_date) FROM warmup_counters WHERE first_send_date IS NOT NULL",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("warmup_stats: {e}")))?;

        let first_send_date: Option<NaiveDate> = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("warmup_stats: {e}")))?
        {
            Some(row) => {
                let s: Option<String> = row.get(0).ok();
                s.and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok())
            }
            None => None,
        };

        let today = Local::now().date_naive();
        let mut rows = self
            .conn
            .query(
                "SELECT emails_sent FROM warmup_counters WHERE date = ?1",
                params![today.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("warmup_stats: {e}")))?;

        let sent_today: u32 = match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("warmup_stats: {e}")))?
        {
            Some(row) => row.get::<i64>(0).unwrap_or(0) as u32,
            None => 0,
        };

        Ok(WarmupStats {
            first_send_date,
            age_days: first_send_date.map(|first| (today - first).num_days()),
            sent_today,
        })
    }

    // ── Contact history ─────────────────────────────────────────────

    /// Whether the organization behind `registration_id` was contacted
    /// within the last `days` days.
    pub async fn was_contacted_within(
        &self,
        registration_id: &str,
        days: i64,
    ) -> Result<bool, DatabaseError> {
        if registration_id.is_empty() {
            return Ok(false);
        }
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM contact_history
                 WHERE registration_id = ?1
                   AND datetime(contacted_at) >= datetime('now', ?2)
                 LIMIT 1",
                params![registration_id, format!("-{days} days")],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("was_contacted_within: {e}")))?;
        Ok(rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("was_contacted_within: {e}")))?
            .is_some())
    }

    /// Append a contact event. Never updated or deleted.
    pub async fn record_contact(
        &self,
        registration_id: &str,
        batch_id: i64,
    ) -> Result<(), DatabaseError> {
        if registration_id.is_empty() {
            return Ok(());
        }
        self.conn
            .execute(
                "INSERT INTO contact_history (registration_id, contacted_at, batch_id)
                 VALUES (?1, ?2, ?3)",
                params![registration_id, Utc::now().to_rfc3339(), batch_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_contact: {e}")))?;
        Ok(())
    }

    // ── Statistics ──────────────────────────────────────────────────

    /// Pipeline counters for status/stats projections.
    pub async fn pipeline_stats(&self) -> Result<PipelineStats, DatabaseError> {
        let mut stats = PipelineStats::default();

        let mut rows = self
            .conn
            .query("SELECT status, COUNT(*) FROM batches GROUP BY status", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("pipeline_stats: {e}")))?;
        while let Ok(Some(row)) = rows.next().await {
            let status: String = row.get(0).unwrap_or_default();
            let count = row.get::<i64>(1).unwrap_or(0) as u32;
            match status.as_str() {
                "queued" => stats.queued = count,
                "approved" => stats.approved = count,
                "sent" => stats.sent = count,
                "replied" => stats.replied = count,
                "closed" => stats.closed = count,
                _ => {}
            }
        }

        stats.awaiting_reply = self
            .count("SELECT COUNT(*) FROM batches WHERE status = 'sent' AND replied_at IS NULL")
            .await?;
        stats.sent_today = self
            .count("SELECT COUNT(*) FROM batches WHERE date(sent_at) = date('now')")
            .await?;
        stats.replied_today = self
            .count("SELECT COUNT(*) FROM batches WHERE date(replied_at) = date('now')")
            .await?;

        let total_sent = self
            .count("SELECT COUNT(*) FROM batches WHERE status IN ('sent', 'replied', 'closed') AND sent_at IS NOT NULL")
            .await?;
        let total_replied = self
            .count("SELECT COUNT(*) FROM batches WHERE replied_at IS NOT NULL")
            .await?;
        stats.response_rate = if total_sent > 0 {
            f64::from(total_replied) / f64::from(total_sent) * 100.0
        } else {
            0.0
        };

        Ok(stats)
    }

    async fn count(&self, sql: &str) -> Result<u32, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?
        {
            Some(row) => Ok(row.get::<i64>(0).unwrap_or(0) as u32),
            None => Ok(0),
        }
    }

    async fn query_batches(
        &self,
        sql: &str,
        query_params: impl libsql::params::IntoParams,
    ) -> Result<Vec<OutreachBatch>, DatabaseError> {
        let mut rows = self
            .conn
            .query(sql, query_params)
            .await
            .map_err(|e| DatabaseError::Query(format!("query_batches: {e}")))?;

        let mut batches = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_batch(&row) {
                Ok(batch) => batches.push(batch),
                Err(e) => tracing::warn!("Skipping batch row: {e}"),
            }
        }
        Ok(batches)
    }
}

// ── Row mapping helpers ─────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to a libsql value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Map a batches row to the aggregate. Column order matches BATCH_COLUMNS.
///
/// The recipients/opportunities JSON columns are the explicit
/// serialize/deserialize boundary; everywhere else they are typed lists.
fn row_to_batch(row: &libsql::Row) -> Result<OutreachBatch, DatabaseError> {
    let get_err = |e: libsql::Error| DatabaseError::Query(format!("batch row: {e}"));

    let status_str: String = row.get(2).map_err(get_err)?;
    let recipients_json: String = row.get(3).map_err(get_err)?;
    let opportunities_json: String = row.get(4).map_err(get_err)?;
    let created_str: String = row.get(7).map_err(get_err)?;
    let approved_str: Option<String> = row.get(8).ok();
    let sent_str: Option<String> = row.get(9).ok();
    let replied_str: Option<String> = row.get(10).ok();
    let next_date_str: Option<String> = row.get(12).ok();

    Ok(OutreachBatch {
        id: row.get(0).map_err(get_err)?,
        organization: row.get(1).map_err(get_err)?,
        status: status_str.parse().unwrap_or(BatchStatus::Queued),
        recipients: serde_json::from_str(&recipients_json)
            .map_err(|e| DatabaseError::Serialization(format!("recipients: {e}")))?,
        opportunities: serde_json::from_str(&opportunities_json)
            .map_err(|e| DatabaseError::Serialization(format!("opportunities: {e}")))?,
        subject: row.get(5).map_err(get_err)?,
        body: row.get(6).map_err(get_err)?,
        created_at: parse_datetime(&created_str),
        approved_at: parse_optional_datetime(&approved_str),
        sent_at: parse_optional_datetime(&sent_str),
        replied_at: parse_optional_datetime(&replied_str),
        follow_up_count: row.get::<i64>(11).map_err(get_err)? as u32,
        next_follow_up_date: next_date_str
            .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()),
        notes: row.get(13).unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OpportunitySummary, Recipient};

    fn draft(organization: &str, emails: &[&str], scores: &[i64]) -> BatchDraft {
        BatchDraft {
            organization: organization.to_string(),
            recipients: emails
                .iter()
                .map(|e| Recipient {
                    name: "Pat Smith".to_string(),
                    email: (*e).to_string(),
                    role: "Partner".to_string(),
                    organization: organization.to_string(),
                })
                .collect(),
            opportunities: scores
                .iter()
                .enumerate()
                .map(|(i, score)| OpportunitySummary {
                    id: format!("opp-{i}"),
                    organization_name: format!("Company {i}"),
                    registration_id: format!("0{i}"),
                    category: "Winding-up order".to_string(),
                    sector: "Retail".to_string(),
                    estimated_assets: vec!["Stock".to_string(), "Plant & machinery".to_string()],
                    score: *score,
                    website_url: Some(format!("https://company{i}.example")),
                })
                .collect(),
        }
    }

    async fn store() -> Store {
        Store::open_memory().await.unwrap()
    }

    #[tokio::test]
    async fn create_and_fetch_round_trips_exactly() {
        let store = store().await;
        let d = draft("Bloggs & Co", &["a@bloggs.co", "b@bloggs.co"], &[55, 72]);
        let id = store.create_batch(&d, "Subject line", "Body text").await.unwrap();

        let batch = store.batch(id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Queued);
        assert_eq!(batch.organization, "Bloggs & Co");
        assert_eq!(batch.subject, "Subject line");
        assert_eq!(batch.body, "Body text");
        // The persisted JSON lists reproduce the original structures exactly.
        assert_eq!(batch.recipients, d.recipients);
        assert_eq!(batch.opportunities, d.opportunities);
        assert_eq!(batch.follow_up_count, 0);
        assert!(batch.sent_at.is_none());
        assert!(batch.next_follow_up_date.is_none());
    }

    #[tokio::test]
    async fn open_creates_directories_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outreach.db");
        {
            let store = Store::open(&path).await.unwrap();
            store.block("pat@smith.co", "manual").await.unwrap();
        }
        assert!(path.exists());

        let store = Store::open(&path).await.unwrap();
        assert!(store.is_blocked("pat@smith.co").await.unwrap());
    }

    #[tokio::test]
    async fn missing_batch_is_none() {
        let store = store().await;
        assert!(store.batch(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transitions_are_guarded_and_forward_only() {
        let store = store().await;
        let id = store
            .create_batch(&draft("Firm", &["x@firm.com"], &[50]), "s", "b")
            .await
            .unwrap();

        // queued → approved
        assert!(store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Approved, None)
            .await
            .unwrap());
        // A second identical attempt fails the guard.
        assert!(!store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Approved, None)
            .await
            .unwrap());

        // approved → sent
        assert!(store
            .transition(id, &[BatchStatus::Approved], BatchStatus::Sent, None)
            .await
            .unwrap());
        // No way back to approved.
        assert!(!store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Approved, None)
            .await
            .unwrap());

        let batch = store.batch(id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Sent);
        assert!(batch.approved_at.is_some());
        assert!(batch.sent_at.is_some());
        assert!(batch.approved_at.unwrap() <= batch.sent_at.unwrap());
    }

    #[tokio::test]
    async fn close_records_note_and_blocks_further_transitions() {
        let store = store().await;
        let id = store
            .create_batch(&draft("Firm", &["x@firm.com"], &[50]), "s", "b")
            .await
            .unwrap();

        assert!(store
            .transition(
                id,
                &[BatchStatus::Queued, BatchStatus::Approved, BatchStatus::Sent],
                BatchStatus::Closed,
                Some("Skipped: stale opportunity"),
            )
            .await
            .unwrap());

        let batch = store.batch(id).await.unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Closed);
        assert!(batch.notes.contains("stale opportunity"));

        // Closed is terminal.
        assert!(!store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Approved, None)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn notes_accumulate_with_newlines() {
        let store = store().await;
        let id = store
            .create_batch(&draft("Firm", &["x@firm.com"], &[50]), "s", "b")
            .await
            .unwrap();
        store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Approved, Some("first note"))
            .await
            .unwrap();
        store
            .transition(id, &[BatchStatus::Approved], BatchStatus::Sent, Some("second note"))
            .await
            .unwrap();
        let batch = store.batch(id).await.unwrap().unwrap();
        assert_eq!(batch.notes, "first note\nsecond note");
    }

    #[tokio::test]
    async fn blocklist_is_case_insensitive_and_idempotent() {
        let store = store().await;
        store.block("Pat.Smith@Example.COM", "bounce").await.unwrap();
        store.block("pat.smith@example.com", "manual").await.unwrap();

        assert!(store.is_blocked("PAT.SMITH@example.com").await.unwrap());
        let entries = store.blocklist().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].email, "pat.smith@example.com");
        assert_eq!(entries[0].reason, "bounce");

        assert!(store.unblock("pat.smith@EXAMPLE.com").await.unwrap());
        assert!(!store.is_blocked("pat.smith@example.com").await.unwrap());
        assert!(!store.unblock("pat.smith@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn reserve_send_slot_counts_up_and_stops_at_cap() {
        let store = store().await;
        assert_eq!(store.reserve_send_slot(Some(3)).await.unwrap(), Some(1));
        assert_eq!(store.reserve_send_slot(Some(3)).await.unwrap(), Some(2));
        assert_eq!(store.reserve_send_slot(Some(3)).await.unwrap(), Some(3));
        // At the cap the reservation is denied without incrementing.
        assert_eq!(store.reserve_send_slot(Some(3)).await.unwrap(), None);
        assert_eq!(store.warmup_stats().await.unwrap().sent_today, 3);
    }

    #[tokio::test]
    async fn reserve_send_slot_unlimited_never_denies() {
        let store = store().await;
        for expected in 1..=60u32 {
            assert_eq!(store.reserve_send_slot(None).await.unwrap(), Some(expected));
        }
    }

    #[tokio::test]
    async fn first_send_date_is_fixed_by_first_reservation() {
        let store = store().await;
        assert!(store.warmup_stats().await.unwrap().first_send_date.is_none());

        store.reserve_send_slot(None).await.unwrap();
        let stats = store.warmup_stats().await.unwrap();
        assert_eq!(stats.first_send_date, Some(Local::now().date_naive()));
        assert_eq!(stats.age_days, Some(0));
        assert_eq!(stats.sent_today, 1);
    }

    #[tokio::test]
    async fn warmup_age_counts_from_seeded_first_send() {
        let store = store().await;
        let first = Local::now().date_naive() - chrono::Duration::days(10);
        store
            .conn()
            .execute(
                "INSERT INTO warmup_counters (date, emails_sent, first_send_date) VALUES (?1, 4, ?1)",
                params![first.to_string()],
            )
            .await
            .unwrap();

        let stats = store.warmup_stats().await.unwrap();
        assert_eq!(stats.age_days, Some(10));
        assert_eq!(stats.sent_today, 0);
    }

    #[tokio::test]
    async fn contact_history_cooldown_edges() {
        let store = store().await;

        // Contacted 10 days ago: inside a 30-day window, outside a 9-day one.
        let ten_days_ago = (Utc::now() - chrono::Duration::days(10)).to_rfc3339();
        store
            .conn()
            .execute(
                "INSERT INTO contact_history (registration_id, contacted_at, batch_id) VALUES ('12345678', ?1, 1)",
                params![ten_days_ago],
            )
            .await
            .unwrap();

        assert!(store.was_contacted_within("12345678", 30).await.unwrap());
        assert!(!store.was_contacted_within("12345678", 9).await.unwrap());
        assert!(!store.was_contacted_within("99999999", 30).await.unwrap());
        assert!(!store.was_contacted_within("", 30).await.unwrap());
    }

    #[tokio::test]
    async fn contact_at_31_days_is_eligible_again() {
        let store = store().await;
        let old = (Utc::now() - chrono::Duration::days(31)).to_rfc3339();
        store
            .conn()
            .execute(
                "INSERT INTO contact_history (registration_id, contacted_at, batch_id) VALUES ('555', ?1, 1)",
                params![old],
            )
            .await
            .unwrap();
        assert!(!store.was_contacted_within("555", 30).await.unwrap());
    }

    #[tokio::test]
    async fn followups_due_honors_count_and_age() {
        let store = store().await;
        let id = store
            .create_batch(&draft("Firm", &["x@firm.com"], &[50]), "s", "b")
            .await
            .unwrap();
        store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Sent, None)
            .await
            .unwrap();

        // Just sent: not yet due for a 7-day follow-up, due for a 0-day one.
        assert!(store.followups_due(0, 7).await.unwrap().is_empty());
        assert_eq!(store.followups_due(0, 0).await.unwrap().len(), 1);

        // Backdate the send by 8 days: first follow-up due.
        let old = (Utc::now() - chrono::Duration::days(8)).to_rfc3339();
        store
            .conn()
            .execute("UPDATE batches SET sent_at = ?1 WHERE id = ?2", params![old, id])
            .await
            .unwrap();
        assert_eq!(store.followups_due(0, 7).await.unwrap().len(), 1);
        // Wrong expected count: nothing due.
        assert!(store.followups_due(1, 7).await.unwrap().is_empty());

        // After the first follow-up is recorded it needs count=1 and 14 days.
        assert!(store.increment_followup(id, 0, None).await.unwrap());
        assert!(store.followups_due(0, 7).await.unwrap().is_empty());
        assert!(store.followups_due(1, 14).await.unwrap().is_empty());

        let older = (Utc::now() - chrono::Duration::days(15)).to_rfc3339();
        store
            .conn()
            .execute("UPDATE batches SET sent_at = ?1 WHERE id = ?2", params![older, id])
            .await
            .unwrap();
        assert_eq!(store.followups_due(1, 14).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn replied_batches_are_never_due() {
        let store = store().await;
        let id = store
            .create_batch(&draft("Firm", &["x@firm.com"], &[50]), "s", "b")
            .await
            .unwrap();
        store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Sent, None)
            .await
            .unwrap();
        store
            .transition(id, &[BatchStatus::Sent], BatchStatus::Replied, None)
            .await
            .unwrap();
        assert!(store.followups_due(0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn increment_followup_guard_rejects_stale_count() {
        let store = store().await;
        let id = store
            .create_batch(&draft("Firm", &["x@firm.com"], &[50]), "s", "b")
            .await
            .unwrap();
        store
            .transition(id, &[BatchStatus::Queued], BatchStatus::Sent, None)
            .await
            .unwrap();

        let next = Local::now().date_naive() + chrono::Duration::days(14);
        assert!(store.increment_followup(id, 0, Some(next)).await.unwrap());
        // Overlapping run with the stale count loses the race.
        assert!(!store.increment_followup(id, 0, Some(next)).await.unwrap());

        let batch = store.batch(id).await.unwrap().unwrap();
        assert_eq!(batch.follow_up_count, 1);
        assert_eq!(batch.next_follow_up_date, Some(next));

        // Final follow-up clears the due date.
        assert!(store.increment_followup(id, 1, None).await.unwrap());
        let batch = store.batch(id).await.unwrap().unwrap();
        assert_eq!(batch.follow_up_count, 2);
        assert!(batch.next_follow_up_date.is_none());
    }

    #[tokio::test]
    async fn pipeline_stats_counts_by_status() {
        let store = store().await;
        for i in 0..3 {
            store
                .create_batch(&draft(&format!("Firm {i}"), &["x@firm.com"], &[50]), "s", "b")
                .await
                .unwrap();
        }
        let b2 = store.pending_batches().await.unwrap()[1].id;
        store
            .transition(b2, &[BatchStatus::Queued], BatchStatus::Sent, None)
            .await
            .unwrap();

        let stats = store.pipeline_stats().await.unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.awaiting_reply, 1);
        assert_eq!(stats.sent_today, 1);
        assert_eq!(stats.response_rate, 0.0);
    }
}
