//! libSQL backend implementing every persistence trait against one database.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};

use crate::error::DatabaseError;
use crate::pipeline::types::{Category, Importance};
use crate::store::migrations;
use crate::store::traits::{
    ClarificationLookup, ClarificationStatus, ConversationLedger, NotFoundRefund, OrderRegistry,
    OrderStatus, OutcomeLog, PendingClarification, ProcessedEmailRecord, ProcessedStore,
    UnhandledEmail,
};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

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

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn limit_value(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn query_err(op: &str) -> impl Fn(libsql::Error) -> DatabaseError + '_ {
    move |e| DatabaseError::Query(format!("{op}: {e}"))
}

/// Map a libsql Row to a PendingClarification.
///
/// Column order: 0:email_id, 1:reply_correlation_id, 2:order_id, 3:created_at
fn row_to_clarification(row: &libsql::Row) -> Result<PendingClarification, libsql::Error> {
    let created_str: String = row.get(3)?;
    Ok(PendingClarification {
        email_id: row.get(0)?,
        reply_id: row.get(1)?,
        offered_order_id: row.get::<String>(2).ok(),
        status: ClarificationStatus::Asked,
        created_at: parse_datetime(&created_str),
    })
}

/// Column order: 0:email_id, 1:subject, 2:content, 3:category, 4:importance, 5:processed_at
fn row_to_processed(row: &libsql::Row) -> Result<ProcessedEmailRecord, libsql::Error> {
    let category: String = row.get(3)?;
    let importance: String = row.get(4)?;
    let processed_str: String = row.get(5)?;
    Ok(ProcessedEmailRecord {
        email_id: row.get(0)?,
        subject: row.get(1)?,
        content: row.get(2)?,
        category: Category::parse(&category),
        importance: Importance::parse(&importance),
        processed_at: parse_datetime(&processed_str),
    })
}

/// Column order: 0:email_id, 1:subject, 2:content, 3:invalid_order_id, 4:received_at
fn row_to_not_found(row: &libsql::Row) -> Result<NotFoundRefund, libsql::Error> {
    let received_str: String = row.get(4)?;
    Ok(NotFoundRefund {
        email_id: row.get(0)?,
        subject: row.get(1)?,
        content: row.get(2)?,
        invalid_order_id: row.get(3)?,
        received_at: parse_datetime(&received_str),
    })
}

/// Column order: 0:email_id, 1:subject, 2:content, 3:importance, 4:received_at
fn row_to_unhandled(row: &libsql::Row) -> Result<UnhandledEmail, libsql::Error> {
    let importance: String = row.get(3)?;
    let received_str: String = row.get(4)?;
    Ok(UnhandledEmail {
        email_id: row.get(0)?,
        subject: row.get(1)?,
        content: row.get(2)?,
        importance: Importance::parse(&importance),
        received_at: parse_datetime(&received_str),
    })
}

/// Drain a row set. Rows that fail to map are skipped; a failing cursor
/// aborts the whole read.
async fn collect_rows<T>(
    mut rows: libsql::Rows,
    op: &str,
    map: fn(&libsql::Row) -> Result<T, libsql::Error>,
) -> Result<Vec<T>, DatabaseError> {
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(query_err(op))? {
        match map(&row) {
            Ok(item) => out.push(item),
            Err(e) => tracing::warn!(op, "Skipping row: {e}"),
        }
    }
    Ok(out)
}

// ── Orders ──────────────────────────────────────────────────────────

#[async_trait]
impl OrderRegistry for LibSqlBackend {
    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT status FROM orders WHERE order_id = ?1",
                params![order_id],
            )
            .await
            .map_err(query_err("order_status"))?;

        match rows.next().await.map_err(query_err("order_status"))? {
            Some(row) => {
                let status: String = row.get(0).map_err(query_err("order_status row"))?;
                Ok(Some(OrderStatus::parse(&status)))
            }
            None => Ok(None),
        }
    }

    async fn set_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE orders SET status = ?1 WHERE order_id = ?2",
                params![status.as_str(), order_id],
            )
            .await
            .map_err(query_err("set_order_status"))?;

        if updated == 0 {
            return Err(DatabaseError::NotFound {
                entity: "order".into(),
                id: order_id.to_string(),
            });
        }
        debug!(order_id, status = status.as_str(), "Order status updated");
        Ok(())
    }

    async fn seed_orders(&self, orders: &[(&str, OrderStatus)]) -> Result<usize, DatabaseError> {
        let mut inserted = 0;
        for (order_id, status) in orders {
            inserted += self
                .conn()
                .execute(
                    "INSERT OR IGNORE INTO orders (order_id, status) VALUES (?1, ?2)",
                    params![*order_id, status.as_str()],
                )
                .await
                .map_err(query_err("seed_orders"))?;
        }
        if inserted > 0 {
            info!(count = inserted, "Seeded order registry");
        }
        Ok(inserted as usize)
    }
}

// ── Conversation ledger ─────────────────────────────────────────────

#[async_trait]
impl ConversationLedger for LibSqlBackend {
    async fn put_clarification(&self, record: &PendingClarification) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO pending_refunds
                    (email_id, reply_correlation_id, order_id, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.email_id.as_str(),
                    record.reply_id.trim(),
                    opt_text(record.offered_order_id.as_deref()),
                    record.status.as_str(),
                    record.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("put_clarification"))?;

        debug!(
            email_id = %record.email_id,
            reply_id = %record.reply_id,
            "Pending clarification stored"
        );
        Ok(())
    }

    async fn clarification_by_reply_id(
        &self,
        reply_id: &str,
    ) -> Result<ClarificationLookup, DatabaseError> {
        let reply_id = reply_id.trim();
        if reply_id.is_empty() {
            return Ok(ClarificationLookup::Absent);
        }

        let mut rows = self
            .conn()
            .query(
                "SELECT email_id, reply_correlation_id, order_id, created_at
                 FROM pending_refunds
                 WHERE reply_correlation_id = ?1 AND status = 'asked'
                 ORDER BY created_at DESC LIMIT 1",
                params![reply_id],
            )
            .await
            .map_err(query_err("clarification_by_reply_id"))?;

        match rows
            .next()
            .await
            .map_err(query_err("clarification_by_reply_id"))?
        {
            Some(row) => {
                let record = row_to_clarification(&row)
                    .map_err(|e| DatabaseError::Query(format!("row parse: {e}")))?;
                Ok(ClarificationLookup::Asked(record))
            }
            None => Ok(ClarificationLookup::Absent),
        }
    }

    async fn delete_clarification(&self, email_id: &str) -> Result<bool, DatabaseError> {
        let deleted = self
            .conn()
            .execute(
                "DELETE FROM pending_refunds WHERE email_id = ?1",
                params![email_id],
            )
            .await
            .map_err(query_err("delete_clarification"))?;
        Ok(deleted > 0)
    }
}

// ── Processed set ───────────────────────────────────────────────────

#[async_trait]
impl ProcessedStore for LibSqlBackend {
    async fn is_processed(&self, email_id: &str) -> Result<bool, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM processed_emails WHERE email_id = ?1",
                params![email_id],
            )
            .await
            .map_err(query_err("is_processed"))?;
        Ok(rows
            .next()
            .await
            .map_err(query_err("is_processed"))?
            .is_some())
    }

    async fn mark_processed(&self, record: &ProcessedEmailRecord) -> Result<bool, DatabaseError> {
        let inserted = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO processed_emails
                    (email_id, subject, content, category, importance, processed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.email_id.as_str(),
                    record.subject.as_str(),
                    record.content.as_str(),
                    record.category.as_str(),
                    record.importance.as_str(),
                    record.processed_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("mark_processed"))?;
        Ok(inserted > 0)
    }

    async fn recent_processed(
        &self,
        limit: usize,
    ) -> Result<Vec<ProcessedEmailRecord>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT email_id, subject, content, category, importance, processed_at
                 FROM processed_emails ORDER BY processed_at DESC LIMIT ?1",
                params![limit_value(limit)],
            )
            .await
            .map_err(query_err("recent_processed"))?;
        collect_rows(rows, "recent_processed", row_to_processed).await
    }
}

// ── Outcome sinks ───────────────────────────────────────────────────

#[async_trait]
impl OutcomeLog for LibSqlBackend {
    async fn record_not_found_refund(&self, record: &NotFoundRefund) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO not_found_refunds
                    (email_id, subject, content, invalid_order_id, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.email_id.as_str(),
                    record.subject.as_str(),
                    record.content.as_str(),
                    record.invalid_order_id.as_str(),
                    record.received_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("record_not_found_refund"))?;
        Ok(())
    }

    async fn record_unhandled(&self, record: &UnhandledEmail) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT OR IGNORE INTO unhandled_emails
                    (email_id, subject, content, importance, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.email_id.as_str(),
                    record.subject.as_str(),
                    record.content.as_str(),
                    record.importance.as_str(),
                    record.received_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err("record_unhandled"))?;
        Ok(())
    }

    async fn recent_not_found_refunds(
        &self,
        limit: usize,
    ) -> Result<Vec<NotFoundRefund>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT email_id, subject, content, invalid_order_id, received_at
                 FROM not_found_refunds ORDER BY received_at DESC LIMIT ?1",
                params![limit_value(limit)],
            )
            .await
            .map_err(query_err("recent_not_found_refunds"))?;
        collect_rows(rows, "recent_not_found_refunds", row_to_not_found).await
    }

    async fn recent_unhandled(&self, limit: usize) -> Result<Vec<UnhandledEmail>, DatabaseError> {
        let rows = self
            .conn()
            .query(
                "SELECT email_id, subject, content, importance, received_at
                 FROM unhandled_emails ORDER BY received_at DESC LIMIT ?1",
                params![limit_value(limit)],
            )
            .await
            .map_err(query_err("recent_unhandled"))?;
        collect_rows(rows, "recent_unhandled", row_to_unhandled).await
    }
}
