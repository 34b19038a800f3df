//! Persistence layer: libSQL-backed orders, conversation ledger, processed set and sinks.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    ClarificationLookup, ClarificationStatus, ConversationLedger, DEMO_ORDERS, Database,
    NotFoundRefund, OrderRegistry, OrderStatus, OutcomeLog, PendingClarification,
    ProcessedEmailRecord, ProcessedStore, UnhandledEmail,
};
