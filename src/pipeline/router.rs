//! Triage router: classify an email and hand it to the matching handler.
//!
//! `Refund` → `RefundResolver`, `Question` → `Answerer` (unhandled sink when
//! it cannot answer or is not configured), anything else → unhandled sink.
//! Every routed email is marked processed, including failed ones.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::channels::{FetchedEmail, MailTransport, OutgoingReply};
use crate::error::PipelineError;
use crate::pipeline::answerer::{Answer, Answerer};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::resolver::RefundResolver;
use crate::pipeline::types::{Category, Classification, RouteOutcome, Routed};
use crate::store::{Database, OutcomeLog, ProcessedEmailRecord, ProcessedStore, UnhandledEmail};

pub struct EmailRouter {
    db: Arc<dyn Database>,
    classifier: Arc<dyn Classifier>,
    answerer: Option<Arc<dyn Answerer>>,
    /// Serializes handling across mailboxes so registry and ledger
    /// read-then-write sequences never interleave.
    mutation_lock: Mutex<()>,
}

impl EmailRouter {
    pub fn new(
        db: Arc<dyn Database>,
        classifier: Arc<dyn Classifier>,
        answerer: Option<Arc<dyn Answerer>>,
    ) -> Self {
        Self {
            db,
            classifier,
            answerer,
            mutation_lock: Mutex::new(()),
        }
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    /// Handle one fetched email end to end.
    ///
    /// Returns an error only when the processed-set itself cannot be read or
    /// written; the email is then left for the next cycle.
    pub async fn handle(
        &self,
        email: &FetchedEmail,
        transport: &dyn MailTransport,
    ) -> Result<Routed, PipelineError> {
        let _guard = self.mutation_lock.lock().await;

        if self.db.is_processed(&email.id).await? {
            debug!(email_id = %email.id, "Email already processed, skipping");
            return Ok(Routed {
                classification: None,
                outcome: RouteOutcome::AlreadyProcessed,
            });
        }

        let classification = match self.classifier.classify(&email.body_text).await {
            Ok(c) => c,
            Err(e) => {
                warn!(email_id = %email.id, error = %e, "Classification failed, treating as Other/low");
                Classification::fallback()
            }
        };

        info!(
            email_id = %email.id,
            category = classification.category.as_str(),
            importance = classification.importance.as_str(),
            "Email classified"
        );

        let outcome = match self.route(email, &classification, transport).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(email_id = %email.id, error = %e, "Email handling failed");
                RouteOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        self.db
            .mark_processed(&ProcessedEmailRecord {
                email_id: email.id.clone(),
                subject: email.subject.clone(),
                content: email.body_text.clone(),
                category: classification.category,
                importance: classification.importance,
                processed_at: Utc::now(),
            })
            .await?;

        Ok(Routed {
            classification: Some(classification),
            outcome,
        })
    }

    async fn route(
        &self,
        email: &FetchedEmail,
        classification: &Classification,
        transport: &dyn MailTransport,
    ) -> Result<RouteOutcome, PipelineError> {
        match classification.category {
            Category::Refund => RefundResolver::new(self.db.as_ref(), transport)
                .resolve(email)
                .await
                .map(RouteOutcome::Refund),
            Category::Question => self.answer_question(email, classification, transport).await,
            Category::Other => self.store_unhandled(email, classification).await,
        }
    }

    async fn answer_question(
        &self,
        email: &FetchedEmail,
        classification: &Classification,
        transport: &dyn MailTransport,
    ) -> Result<RouteOutcome, PipelineError> {
        let Some(answerer) = &self.answerer else {
            return self.store_unhandled(email, classification).await;
        };

        match answerer.answer(&email.body_text).await {
            Ok(Answer::Answered(text)) => {
                transport
                    .send(&OutgoingReply::to_email(email, text))
                    .await?;
                Ok(RouteOutcome::Answered)
            }
            Ok(Answer::CannotAnswer) => self.store_unhandled(email, classification).await,
            Err(e) => {
                warn!(email_id = %email.id, error = %e, "Answerer unavailable, storing as unhandled");
                self.store_unhandled(email, classification).await
            }
        }
    }

    async fn store_unhandled(
        &self,
        email: &FetchedEmail,
        classification: &Classification,
    ) -> Result<RouteOutcome, PipelineError> {
        self.db
            .record_unhandled(&UnhandledEmail {
                email_id: email.id.clone(),
                subject: email.subject.clone(),
                content: email.body_text.clone(),
                importance: classification.importance,
                received_at: Utc::now(),
            })
            .await?;
        Ok(RouteOutcome::Unhandled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{FixedAnswerer, FixedClassifier, RecordingTransport, email};
    use crate::pipeline::types::{Importance, RefundOutcome};
    use crate::store::{LibSqlBackend, OrderRegistry, OrderStatus};

    async fn router(
        category: Option<Category>,
        answerer: Option<FixedAnswerer>,
    ) -> (EmailRouter, Arc<LibSqlBackend>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        db.seed_orders(&[("12345-ABC", OrderStatus::Active)])
            .await
            .unwrap();
        let classifier = Arc::new(FixedClassifier(
            category.map(|c| Classification::new(c, Importance::High)),
        ));
        let answerer = answerer.map(|a| Arc::new(a) as Arc<dyn Answerer>);
        (
            EmailRouter::new(db.clone(), classifier, answerer),
            db,
        )
    }

    #[tokio::test]
    async fn refund_is_resolved_and_marked_processed() {
        let (router, db) = router(Some(Category::Refund), None).await;
        let transport = RecordingTransport::new();

        let routed = router
            .handle(&email("E1", None, "Order ID: 12345-ABC"), &transport)
            .await
            .unwrap();

        assert_eq!(
            routed.outcome,
            RouteOutcome::Refund(RefundOutcome::RefundAccepted {
                order_id: "12345-ABC".into()
            })
        );
        assert!(db.is_processed("E1").await.unwrap());
        let records = db.recent_processed(10).await.unwrap();
        assert_eq!(records[0].category, Category::Refund);
        assert_eq!(records[0].importance, Importance::High);
    }

    #[tokio::test]
    async fn second_pass_is_a_no_op() {
        let (router, db) = router(Some(Category::Refund), None).await;
        let transport = RecordingTransport::new();
        let inbound = email("E1", None, "refund please, Order ID: 99999-ZZZ");

        router.handle(&inbound, &transport).await.unwrap();
        let again = router.handle(&inbound, &transport).await.unwrap();

        assert_eq!(again.outcome, RouteOutcome::AlreadyProcessed);
        assert_eq!(again.classification, None);
        assert_eq!(transport.sent().len(), 1);
        assert_eq!(db.order_status("99999-ZZZ").await.unwrap(), None);
    }

    #[tokio::test]
    async fn classifier_failure_degrades_to_unhandled() {
        let (router, db) = router(None, None).await;
        let transport = RecordingTransport::new();

        let routed = router
            .handle(&email("E1", None, "Order ID: 12345-ABC"), &transport)
            .await
            .unwrap();

        assert_eq!(routed.outcome, RouteOutcome::Unhandled);
        assert_eq!(routed.classification, Some(Classification::fallback()));
        let unhandled = db.recent_unhandled(10).await.unwrap();
        assert_eq!(unhandled[0].importance, Importance::Low);
        // Refund path never ran
        assert_eq!(
            db.order_status("12345-ABC").await.unwrap(),
            Some(OrderStatus::Active)
        );
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn question_is_answered() {
        let answerer = FixedAnswerer(Ok(Answer::Answered("3-5 days".into())));
        let (router, db) = router(Some(Category::Question), Some(answerer)).await;
        let transport = RecordingTransport::new();

        let routed = router
            .handle(&email("E1", None, "How long is delivery?"), &transport)
            .await
            .unwrap();

        assert_eq!(routed.outcome, RouteOutcome::Answered);
        assert_eq!(transport.sent()[0].body, "3-5 days");
        assert!(db.recent_unhandled(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unanswerable_question_goes_to_unhandled() {
        for answerer in [
            Some(FixedAnswerer(Ok(Answer::CannotAnswer))),
            Some(FixedAnswerer(Err(()))),
            None,
        ] {
            let (router, db) = router(Some(Category::Question), answerer).await;
            let transport = RecordingTransport::new();

            let routed = router
                .handle(&email("E1", None, "Do you ship to Mars?"), &transport)
                .await
                .unwrap();

            assert_eq!(routed.outcome, RouteOutcome::Unhandled);
            assert_eq!(db.recent_unhandled(10).await.unwrap().len(), 1);
            assert!(transport.sent().is_empty());
        }
    }

    #[tokio::test]
    async fn other_goes_to_unhandled() {
        let (router, db) = router(Some(Category::Other), None).await;
        let transport = RecordingTransport::new();

        let routed = router
            .handle(&email("E1", None, "Great newsletter!"), &transport)
            .await
            .unwrap();

        assert_eq!(routed.outcome, RouteOutcome::Unhandled);
        assert_eq!(db.recent_unhandled(10).await.unwrap()[0].email_id, "E1");
    }

    #[tokio::test]
    async fn failed_handling_is_still_marked_processed() {
        let answerer = FixedAnswerer(Ok(Answer::Answered("3-5 days".into())));
        let (router, db) = router(Some(Category::Question), Some(answerer)).await;
        let transport = RecordingTransport::new();
        transport.set_fail_sends(true);

        let routed = router
            .handle(&email("E1", None, "How long is delivery?"), &transport)
            .await
            .unwrap();

        assert!(matches!(routed.outcome, RouteOutcome::Failed { .. }));
        assert!(db.is_processed("E1").await.unwrap());
    }
}
