//! Persistence capability traits and the records they exchange.
//!
//! The resolver only sees these traits; `LibSqlBackend` implements all of
//! them against one database so a single handle can be shared.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::DatabaseError;
use crate::pipeline::types::{Category, Importance};

// ── Orders ──────────────────────────────────────────────────────────

/// Status of an order in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    RefundRequested,
    /// Any status this service does not manage, kept verbatim.
    Other(String),
}

impl OrderStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Active => "active",
            Self::RefundRequested => "refund_requested",
            Self::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "refund_requested" => Self::RefundRequested,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Demo orders seeded into a fresh registry.
pub const DEMO_ORDERS: &[&str] = &["12345-ABC", "67890-DEF", "11111-XYZ", "22222-PQR", "33333-STU"];

/// Order identifiers and their status.
#[async_trait]
pub trait OrderRegistry: Send + Sync {
    /// Status of an order, or `None` when the identifier is unknown.
    async fn order_status(&self, order_id: &str) -> Result<Option<OrderStatus>, DatabaseError>;

    /// Set the status of an existing order. Errors with `NotFound` otherwise.
    async fn set_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<(), DatabaseError>;

    /// Insert orders that do not exist yet; existing rows are left alone.
    /// Returns how many were inserted.
    async fn seed_orders(&self, orders: &[(&str, OrderStatus)]) -> Result<usize, DatabaseError>;
}

// ── Conversation ledger ─────────────────────────────────────────────

/// Status of a pending clarification. `Asked` is the only live status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClarificationStatus {
    Asked,
}

impl ClarificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asked => "asked",
        }
    }
}

/// An open request for an order id, keyed by the reply we sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingClarification {
    /// Inbound email that triggered the ask.
    pub email_id: String,
    /// Message id of our outbound ask; the customer's reply echoes it.
    pub reply_id: String,
    /// Order id the customer offered at ask time, if any.
    pub offered_order_id: Option<String>,
    pub status: ClarificationStatus,
    pub created_at: DateTime<Utc>,
}

impl PendingClarification {
    pub fn asked(
        email_id: impl Into<String>,
        reply_id: impl Into<String>,
        offered_order_id: Option<String>,
    ) -> Self {
        Self {
            email_id: email_id.into(),
            reply_id: reply_id.into(),
            offered_order_id,
            status: ClarificationStatus::Asked,
            created_at: Utc::now(),
        }
    }
}

/// Result of looking up a reply id in the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClarificationLookup {
    Absent,
    Asked(PendingClarification),
}

/// Pending clarifications, one per outbound reply id.
#[async_trait]
pub trait ConversationLedger: Send + Sync {
    /// Record a clarification. Replaces any row with the same email id or
    /// reply id, keeping at most one live record per reply id.
    async fn put_clarification(&self, record: &PendingClarification) -> Result<(), DatabaseError>;

    /// Find the live clarification a reply points at.
    async fn clarification_by_reply_id(
        &self,
        reply_id: &str,
    ) -> Result<ClarificationLookup, DatabaseError>;

    /// Remove the clarification created for `email_id`. Returns whether a row
    /// was deleted.
    async fn delete_clarification(&self, email_id: &str) -> Result<bool, DatabaseError>;
}

// ── Processed set ───────────────────────────────────────────────────

/// Snapshot written once an email has been handled.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedEmailRecord {
    pub email_id: String,
    pub subject: String,
    pub content: String,
    pub category: Category,
    pub importance: Importance,
    pub processed_at: DateTime<Utc>,
}

/// Idempotence guard over inbound email ids.
#[async_trait]
pub trait ProcessedStore: Send + Sync {
    async fn is_processed(&self, email_id: &str) -> Result<bool, DatabaseError>;

    /// Write-once: a second call for the same id is a no-op returning `false`.
    async fn mark_processed(&self, record: &ProcessedEmailRecord) -> Result<bool, DatabaseError>;

    /// Most recently processed emails, newest first.
    async fn recent_processed(&self, limit: usize)
    -> Result<Vec<ProcessedEmailRecord>, DatabaseError>;
}

// ── Outcome sinks ───────────────────────────────────────────────────

/// A refund thread closed without a valid order id.
#[derive(Debug, Clone, Serialize)]
pub struct NotFoundRefund {
    pub email_id: String,
    pub subject: String,
    pub content: String,
    pub invalid_order_id: String,
    pub received_at: DateTime<Utc>,
}

/// An email nobody could answer automatically.
#[derive(Debug, Clone, Serialize)]
pub struct UnhandledEmail {
    pub email_id: String,
    pub subject: String,
    pub content: String,
    pub importance: Importance,
    pub received_at: DateTime<Utc>,
}

/// Permanent failure records and the unhandled sink.
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    /// Write-once per email id.
    async fn record_not_found_refund(&self, record: &NotFoundRefund) -> Result<(), DatabaseError>;

    /// Write-once per email id.
    async fn record_unhandled(&self, record: &UnhandledEmail) -> Result<(), DatabaseError>;

    async fn recent_not_found_refunds(
        &self,
        limit: usize,
    ) -> Result<Vec<NotFoundRefund>, DatabaseError>;

    async fn recent_unhandled(&self, limit: usize) -> Result<Vec<UnhandledEmail>, DatabaseError>;
}

/// Everything the pipeline persists, behind one handle.
pub trait Database: OrderRegistry + ConversationLedger + ProcessedStore + OutcomeLog {}

impl<T> Database for T where T: OrderRegistry + ConversationLedger + ProcessedStore + OutcomeLog {}
