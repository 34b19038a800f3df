//! Background ingestion loop: poll every mailbox, route each unread email.
//!
//! One worker task processes mailboxes and emails strictly in sequence.
//! The stop signal is checked before each mailbox and before each email, so
//! cancellation never interrupts an email that is already being handled.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channels::{EmailRef, MailTransport, UnreadQuery};
use crate::config::PollConfig;
use crate::pipeline::router::EmailRouter;
use crate::pipeline::types::RouteOutcome;
use crate::store::ProcessedStore;

/// Running totals, streamed after every cycle and returned on shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    pub cycles: u64,
    /// Emails routed without a handling failure.
    pub processed: u64,
    /// Already processed or too short.
    pub skipped: u64,
    /// Fetch, persistence or handling failures.
    pub failed: u64,
    /// Routed emails per category.
    pub by_category: BTreeMap<String, u64>,
}

pub struct IngestionLoop {
    router: Arc<EmailRouter>,
    mailboxes: Vec<Arc<dyn MailTransport>>,
    config: PollConfig,
}

impl IngestionLoop {
    pub fn new(
        router: Arc<EmailRouter>,
        mailboxes: Vec<Arc<dyn MailTransport>>,
        config: PollConfig,
    ) -> Self {
        Self {
            router,
            mailboxes,
            config,
        }
    }

    fn query(&self) -> UnreadQuery {
        if self.config.latest_only {
            UnreadQuery::LatestOnly
        } else {
            UnreadQuery::All
        }
    }

    /// One pass over every mailbox. Returns early once `cancel` fires.
    pub async fn run_cycle(&self, cancel: &CancellationToken, stats: &mut IngestStats) {
        for transport in &self.mailboxes {
            if cancel.is_cancelled() {
                return;
            }
            self.poll_mailbox(transport.as_ref(), cancel, stats).await;
        }
    }

    async fn poll_mailbox(
        &self,
        transport: &dyn MailTransport,
        cancel: &CancellationToken,
        stats: &mut IngestStats,
    ) {
        let refs = match transport
            .list_unread(self.query(), self.config.max_per_mailbox)
            .await
        {
            Ok(refs) => refs,
            Err(e) => {
                error!(mailbox = transport.name(), error = %e, "Failed to list unread emails");
                return;
            }
        };

        if refs.is_empty() {
            debug!(mailbox = transport.name(), "No unread emails");
            return;
        }
        info!(mailbox = transport.name(), count = refs.len(), "Processing unread emails");

        for email_ref in refs {
            if cancel.is_cancelled() {
                info!(mailbox = transport.name(), "Stop requested, leaving remaining emails");
                return;
            }
            self.process_one(transport, &email_ref, stats).await;
        }
    }

    async fn process_one(
        &self,
        transport: &dyn MailTransport,
        email_ref: &EmailRef,
        stats: &mut IngestStats,
    ) {
        let email = match transport.fetch(email_ref).await {
            Ok(email) => email,
            Err(e) => {
                // Left unread; retried next cycle
                error!(mailbox = %email_ref.mailbox, uid = %email_ref.uid, error = %e, "Failed to fetch email");
                stats.failed += 1;
                return;
            }
        };

        match self.router.db().is_processed(&email.id).await {
            Ok(true) => {
                debug!(email_id = %email.id, "Already processed, marking read");
                stats.skipped += 1;
                mark_read(transport, email_ref).await;
                return;
            }
            Ok(false) => {}
            Err(e) => {
                error!(email_id = %email.id, error = %e, "Processed-set lookup failed");
                stats.failed += 1;
                return;
            }
        }

        if email.body_text.trim().chars().count() < self.config.min_body_chars {
            debug!(email_id = %email.id, "Body too short, skipping");
            stats.skipped += 1;
            mark_read(transport, email_ref).await;
            return;
        }

        match self.router.handle(&email, transport).await {
            Ok(routed) => {
                match routed.outcome {
                    RouteOutcome::AlreadyProcessed => stats.skipped += 1,
                    RouteOutcome::Failed { .. } => stats.failed += 1,
                    _ => stats.processed += 1,
                }
                if let Some(classification) = routed.classification {
                    *stats
                        .by_category
                        .entry(classification.category.as_str().to_string())
                        .or_default() += 1;
                }
                info!(email_id = %email.id, outcome = routed.outcome.label(), "Email handled");
                mark_read(transport, email_ref).await;
            }
            Err(e) => {
                // Not in the processed set, so the next cycle retries it
                error!(email_id = %email.id, error = %e, "Failed to record email as processed");
                stats.failed += 1;
            }
        }
    }
}

async fn mark_read(transport: &dyn MailTransport, email_ref: &EmailRef) {
    if let Err(e) = transport.mark_read(email_ref).await {
        warn!(mailbox = %email_ref.mailbox, uid = %email_ref.uid, error = %e, "Failed to mark email read");
    }
}

/// Spawn the ingestion worker.
///
/// Returns the task handle, which yields the final statistics once `cancel`
/// fires, and a receiver that sees the statistics after every cycle.
pub fn spawn_ingestion(
    ingest: IngestionLoop,
    cancel: CancellationToken,
) -> (JoinHandle<IngestStats>, watch::Receiver<IngestStats>) {
    let (tx, rx) = watch::channel(IngestStats::default());

    let handle = tokio::spawn(async move {
        let interval = ingest.config.interval;
        info!(
            mailboxes = ingest.mailboxes.len(),
            "Ingestion loop started, polling every {}s",
            interval.as_secs()
        );

        let mut stats = IngestStats::default();
        while !cancel.is_cancelled() {
            ingest.run_cycle(&cancel, &mut stats).await;
            stats.cycles += 1;
            tx.send_replace(stats.clone());

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!(
            cycles = stats.cycles,
            processed = stats.processed,
            "Ingestion loop stopped"
        );
        stats
    });

    (handle, rx)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::classifier::Classifier;
    use crate::pipeline::testing::{FixedClassifier, RecordingTransport, email};
    use crate::pipeline::types::{Category, Classification, Importance};
    use crate::store::{LibSqlBackend, OrderRegistry, OrderStatus};

    async fn setup(
        transport: Arc<RecordingTransport>,
        config: PollConfig,
    ) -> (IngestionLoop, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.seed_orders(&[("12345-ABC", OrderStatus::Active)])
            .await
            .unwrap();
        let classifier = Arc::new(FixedClassifier(Some(Classification::new(
            Category::Refund,
            Importance::Medium,
        ))));
        let router = Arc::new(EmailRouter::new(db.clone(), classifier, None));
        (
            IngestionLoop::new(router, vec![transport as Arc<dyn MailTransport>], config),
            db,
        )
    }

    #[tokio::test]
    async fn cycle_routes_and_marks_read() {
        let transport = Arc::new(RecordingTransport::new());
        transport.deliver("1", email("E1", None, "refund please, Order ID: 12345-ABC"));
        transport.deliver("2", email("E2", None, "hi"));
        let (ingest, db) = setup(transport.clone(), PollConfig::default()).await;

        let mut stats = IngestStats::default();
        ingest.run_cycle(&CancellationToken::new(), &mut stats).await;

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(stats.by_category.get("Refund"), Some(&1));
        assert!(transport.is_read("1"));
        assert!(transport.is_read("2"));
        assert!(db.is_processed("E1").await.unwrap());
        // Short bodies never reach the processed set
        assert!(!db.is_processed("E2").await.unwrap());
        assert_eq!(
            db.order_status("12345-ABC").await.unwrap(),
            Some(OrderStatus::RefundRequested)
        );
    }

    #[tokio::test]
    async fn listing_limit_applies_per_cycle() {
        let transport = Arc::new(RecordingTransport::new());
        for i in 1..=5 {
            transport.deliver(
                &i.to_string(),
                email(&format!("E{i}"), None, "I would like a refund please"),
            );
        }
        let (ingest, _db) = setup(transport.clone(), PollConfig::default()).await;

        let mut stats = IngestStats::default();
        ingest.run_cycle(&CancellationToken::new(), &mut stats).await;
        assert_eq!(stats.processed, 3);

        ingest.run_cycle(&CancellationToken::new(), &mut stats).await;
        assert_eq!(stats.processed, 5);
        assert_eq!(transport.sent().len(), 5);
    }

    #[tokio::test]
    async fn processed_email_seen_again_is_skipped() {
        let transport = Arc::new(RecordingTransport::new());
        transport.deliver("1", email("E1", None, "I would like a refund please"));
        let (ingest, db) = setup(transport.clone(), PollConfig::default()).await;

        let mut stats = IngestStats::default();
        ingest.run_cycle(&CancellationToken::new(), &mut stats).await;

        // Same message delivered again under a new UID
        transport.deliver("2", email("E1", None, "I would like a refund please"));
        ingest.run_cycle(&CancellationToken::new(), &mut stats).await;

        assert_eq!(stats.processed, 1);
        assert_eq!(stats.skipped, 1);
        assert!(transport.is_read("2"));
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(db.recent_processed(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_cycle_touches_nothing() {
        let transport = Arc::new(RecordingTransport::new());
        transport.deliver("1", email("E1", None, "I would like a refund please"));
        let (ingest, _db) = setup(transport.clone(), PollConfig::default()).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut stats = IngestStats::default();
        ingest.run_cycle(&cancel, &mut stats).await;

        assert_eq!(stats, IngestStats::default());
        assert!(!transport.is_read("1"));
    }

    /// Fires the stop signal while the first email is being classified.
    struct CancelOnClassify(CancellationToken);

    #[async_trait]
    impl Classifier for CancelOnClassify {
        async fn classify(&self, _body: &str) -> Result<Classification, PipelineError> {
            self.0.cancel();
            Ok(Classification::new(Category::Other, Importance::Low))
        }
    }

    #[tokio::test]
    async fn stop_between_emails_finishes_current_one() {
        let transport = Arc::new(RecordingTransport::new());
        transport.deliver("1", email("E1", None, "Where is my parcel today?"));
        transport.deliver("2", email("E2", None, "Another message waiting here"));

        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let cancel = CancellationToken::new();
        let router = Arc::new(EmailRouter::new(
            db.clone(),
            Arc::new(CancelOnClassify(cancel.clone())),
            None,
        ));
        let ingest = IngestionLoop::new(
            router,
            vec![transport.clone() as Arc<dyn MailTransport>],
            PollConfig::default(),
        );

        let mut stats = IngestStats::default();
        ingest.run_cycle(&cancel, &mut stats).await;

        assert_eq!(stats.processed, 1);
        assert!(transport.is_read("1"));
        assert!(!transport.is_read("2"));
        assert!(db.is_processed("E1").await.unwrap());
        assert!(!db.is_processed("E2").await.unwrap());
    }

    #[tokio::test]
    async fn spawned_loop_streams_stats_and_stops() {
        let transport = Arc::new(RecordingTransport::new());
        transport.deliver("1", email("E1", None, "I would like a refund please"));
        let config = PollConfig {
            interval: Duration::from_secs(3600),
            ..PollConfig::default()
        };
        let (ingest, _db) = setup(transport.clone(), config).await;

        let cancel = CancellationToken::new();
        let (handle, mut rx) = spawn_ingestion(ingest, cancel.clone());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().cycles, 1);
        assert_eq!(rx.borrow().processed, 1);

        cancel.cancel();
        let stats = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.processed, 1);
    }
}
