//! Support email triage pipeline.
//!
//! Every inbound email flows through:
//! 1. `IngestionLoop`: list and fetch unread mail, skip what is already handled
//! 2. `Classifier`: Refund / Question / Other plus importance
//! 3. `EmailRouter`: Refund → `RefundResolver`, Question → `Answerer`,
//!    everything else → unhandled sink
//! 4. Processed set: written for every routed email, whatever the outcome

pub mod answerer;
pub mod classifier;
pub mod extractor;
pub mod ingest;
pub mod resolver;
pub mod router;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use answerer::{Answer, Answerer, KnowledgeBase, LlmAnswerer};
pub use classifier::{Classifier, LlmClassifier};
pub use ingest::{IngestStats, IngestionLoop, spawn_ingestion};
pub use resolver::RefundResolver;
pub use router::EmailRouter;
pub use types::{Category, Classification, Importance, RefundOutcome, RouteOutcome, Routed};
