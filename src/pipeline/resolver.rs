//! Refund conversation resolver.
//!
//! Each Refund email is evaluated once against two inputs: the ledger entry
//! its `In-Reply-To` points at (`Absent` or `Asked`), and the order id the
//! extractor finds in its body. A clarification lives for exactly one round
//! trip; every follow-up either closes the thread, accepts the refund, or
//! replaces the clarification with a fresh one under the new reply id.
//!
//! Callers must serialize invocations (see `EmailRouter`): the registry
//! check-then-update and ledger delete-then-insert are not atomic.

use chrono::Utc;
use tracing::{error, info, warn};

use crate::channels::{FetchedEmail, MailTransport, OutgoingReply};
use crate::error::PipelineError;
use crate::pipeline::extractor::extract_order_id;
use crate::pipeline::types::RefundOutcome;
use crate::store::{
    ClarificationLookup, ConversationLedger, Database, NotFoundRefund, OrderRegistry, OrderStatus,
    OutcomeLog, PendingClarification,
};

/// Invalid id recorded when the customer never offered one.
pub const NO_ID_SENTINEL: &str = "no_id_provided";

// ── Reply texts ─────────────────────────────────────────────────────

pub const ASK_FOR_ORDER_ID: &str =
    "Please provide the Order ID in the format 'Order ID: XXXXX' (e.g., Order ID: 12345-ABCDE).";

pub const CLOSED_NO_ID: &str = "We couldn't process your refund request as no valid Order ID was provided. If you have a valid order, please start a new conversation.";

pub fn invalid_order_id(order_id: &str) -> String {
    format!(
        "Invalid Order ID: {order_id}. Please verify and reply with a valid one using format like 'Order ID: XXXXX'. Please keep this conversation in your reply."
    )
}

pub fn invalid_order_id_again(order_id: &str) -> String {
    format!("Invalid Order ID: {order_id}. Please verify and reply with a valid one.")
}

pub fn refund_confirmed(order_id: &str) -> String {
    format!("Your refund request for Order ID {order_id} will be processed within 3 days.")
}

pub fn closed_same_id(order_id: &str) -> String {
    format!("Invalid Order ID {order_id} provided again. Refund request closed.")
}

/// Fixed fragments of the reply texts above. Every reply contains at least
/// one, so the extractor can drop our own lines from unprefixed quotes.
pub const REPLY_MARKERS: &[&str] = &[
    "Please provide the Order ID",
    "Invalid Order ID",
    "no valid Order ID was provided",
    "Your refund request for Order ID",
    "Refund request closed",
];

// ── Resolver ────────────────────────────────────────────────────────

/// Drives one Refund email through the clarification state machine.
pub struct RefundResolver<'a> {
    db: &'a dyn Database,
    transport: &'a dyn MailTransport,
}

impl<'a> RefundResolver<'a> {
    pub fn new(db: &'a dyn Database, transport: &'a dyn MailTransport) -> Self {
        Self { db, transport }
    }

    /// Resolve one Refund email. Persistence failures abort with an error;
    /// dispatch failures are logged and reflected in the outcome.
    pub async fn resolve(&self, email: &FetchedEmail) -> Result<RefundOutcome, PipelineError> {
        let offered = extract_order_id(&email.body_text);

        let prior = match email.in_reply_to.as_deref() {
            Some(reply_id) => self.db.clarification_by_reply_id(reply_id).await?,
            None => ClarificationLookup::Absent,
        };

        let outcome = match prior {
            ClarificationLookup::Absent => self.first_contact(email, offered).await?,
            ClarificationLookup::Asked(pending) => {
                self.follow_up(email, pending, offered).await?
            }
        };

        info!(
            email_id = %email.id,
            outcome = outcome.label(),
            "Refund email resolved"
        );
        Ok(outcome)
    }

    /// No clarification is open for this email.
    async fn first_contact(
        &self,
        email: &FetchedEmail,
        offered: Option<String>,
    ) -> Result<RefundOutcome, PipelineError> {
        let Some(order_id) = offered else {
            return self.ask(email, None, ASK_FOR_ORDER_ID.to_string()).await;
        };

        match self.db.order_status(&order_id).await? {
            Some(status) => self.accept(email, order_id, status).await,
            None => {
                let body = invalid_order_id(&order_id);
                self.ask(email, Some(order_id), body).await
            }
        }
    }

    /// The customer answered one of our clarifications.
    async fn follow_up(
        &self,
        email: &FetchedEmail,
        pending: PendingClarification,
        offered: Option<String>,
    ) -> Result<RefundOutcome, PipelineError> {
        match offered {
            None => {
                let invalid = pending
                    .offered_order_id
                    .clone()
                    .unwrap_or_else(|| NO_ID_SENTINEL.to_string());
                self.close(email, &pending, invalid, CLOSED_NO_ID.to_string())
                    .await
            }
            // Already known invalid; the registry is not consulted again
            Some(order_id) if pending.offered_order_id.as_deref() == Some(order_id.as_str()) => {
                let body = closed_same_id(&order_id);
                self.close(email, &pending, order_id, body).await
            }
            Some(order_id) => {
                let status = self.db.order_status(&order_id).await?;
                self.db.delete_clarification(&pending.email_id).await?;
                match status {
                    Some(status) => self.accept(email, order_id, status).await,
                    None => {
                        let body = invalid_order_id_again(&order_id);
                        self.ask(email, Some(order_id), body).await
                    }
                }
            }
        }
    }

    /// Move the order to `refund_requested` and confirm.
    async fn accept(
        &self,
        email: &FetchedEmail,
        order_id: String,
        status: OrderStatus,
    ) -> Result<RefundOutcome, PipelineError> {
        if status == OrderStatus::RefundRequested {
            info!(order_id = %order_id, "Refund already requested for order, confirming again");
        } else {
            self.db
                .set_order_status(&order_id, OrderStatus::RefundRequested)
                .await?;
            info!(order_id = %order_id, "Order moved to refund_requested");
        }

        if let Err(e) = self.reply(email, refund_confirmed(&order_id)).await {
            error!(email_id = %email.id, order_id = %order_id, error = %e, "Refund confirmation not delivered");
        }
        Ok(RefundOutcome::RefundAccepted { order_id })
    }

    /// Send a clarification and record it under the reply's id.
    async fn ask(
        &self,
        email: &FetchedEmail,
        offered: Option<String>,
        body: String,
    ) -> Result<RefundOutcome, PipelineError> {
        let reply_id = match self.reply(email, body).await {
            Ok(reply_id) => reply_id,
            Err(e) => {
                error!(
                    email_id = %email.id,
                    error = %e,
                    "Clarification not sent, no conversation state recorded"
                );
                return Ok(RefundOutcome::ClarificationNotSent {
                    offered_order_id: offered,
                });
            }
        };

        self.db
            .put_clarification(&PendingClarification::asked(
                email.id.clone(),
                reply_id.clone(),
                offered.clone(),
            ))
            .await?;

        Ok(match offered {
            Some(order_id) => RefundOutcome::RejectedOrderId { order_id, reply_id },
            None => RefundOutcome::AskedForOrderId { reply_id },
        })
    }

    /// Record a permanent failure, drop the clarification, tell the customer.
    async fn close(
        &self,
        email: &FetchedEmail,
        pending: &PendingClarification,
        invalid_order_id: String,
        body: String,
    ) -> Result<RefundOutcome, PipelineError> {
        self.db
            .record_not_found_refund(&NotFoundRefund {
                email_id: email.id.clone(),
                subject: email.subject.clone(),
                content: email.body_text.clone(),
                invalid_order_id: invalid_order_id.clone(),
                received_at: Utc::now(),
            })
            .await?;
        self.db.delete_clarification(&pending.email_id).await?;

        if let Err(e) = self.reply(email, body).await {
            warn!(email_id = %email.id, error = %e, "Closing message not delivered");
        }
        Ok(RefundOutcome::Closed { invalid_order_id })
    }

    async fn reply(&self, email: &FetchedEmail, body: String) -> Result<String, PipelineError> {
        let reply = OutgoingReply::to_email(email, body);
        Ok(self.transport.send(&reply).await?)
    }
}
