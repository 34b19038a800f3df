//! Shared types for the triage pipeline.

use serde::{Deserialize, Serialize};

// ── Triage labels ───────────────────────────────────────────────────

/// Category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Refund,
    Question,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Refund => "Refund",
            Self::Question => "Question",
            Self::Other => "Other",
        }
    }

    /// Case-insensitive parse; anything unrecognised is `Other`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "refund" => Self::Refund,
            "question" => Self::Question,
            _ => Self::Other,
        }
    }
}

/// Importance assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Medium,
    High,
}

impl Importance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Case-insensitive parse; anything unrecognised is `Low`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub category: Category,
    pub importance: Importance,
}

impl Classification {
    pub fn new(category: Category, importance: Importance) -> Self {
        Self {
            category,
            importance,
        }
    }

    /// What a failed classification degrades to.
    pub fn fallback() -> Self {
        Self::new(Category::Other, Importance::Low)
    }
}

// ── Outcomes ────────────────────────────────────────────────────────

/// What the refund resolver did with one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundOutcome {
    /// No order id given; asked for one.
    AskedForOrderId { reply_id: String },
    /// Unknown order id; told the customer and asked again.
    RejectedOrderId { order_id: String, reply_id: String },
    /// Order found and moved to `refund_requested`.
    RefundAccepted { order_id: String },
    /// Follow-up still had no valid id; thread closed and recorded.
    Closed { invalid_order_id: String },
    /// A clarification should have been sent but dispatch failed, so
    /// nothing was recorded.
    ClarificationNotSent { offered_order_id: Option<String> },
}

impl RefundOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::AskedForOrderId { .. } => "asked_for_order_id",
            Self::RejectedOrderId { .. } => "rejected_order_id",
            Self::RefundAccepted { .. } => "refund_accepted",
            Self::Closed { .. } => "closed",
            Self::ClarificationNotSent { .. } => "clarification_not_sent",
        }
    }
}

/// What the router did with one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Refund(RefundOutcome),
    /// Question answered from the knowledge base.
    Answered,
    /// Stored in the unhandled sink for a human.
    Unhandled,
    /// Already in the processed set; nothing done.
    AlreadyProcessed,
    /// Handling aborted; the email is still marked processed.
    Failed { reason: String },
}

impl RouteOutcome {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Refund(outcome) => outcome.label(),
            Self::Answered => "answered",
            Self::Unhandled => "unhandled",
            Self::AlreadyProcessed => "already_processed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Router result for one email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routed {
    /// `None` when the email was skipped before classification.
    pub classification: Option<Classification>,
    pub outcome: RouteOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_parse_is_case_insensitive() {
        assert_eq!(Category::parse("refund"), Category::Refund);
        assert_eq!(Category::parse(" QUESTION "), Category::Question);
        assert_eq!(Category::parse("Spam"), Category::Other);
        assert_eq!(Category::parse(""), Category::Other);
    }

    #[test]
    fn importance_parse_defaults_to_low() {
        assert_eq!(Importance::parse("High"), Importance::High);
        assert_eq!(Importance::parse("medium"), Importance::Medium);
        assert_eq!(Importance::parse("urgent"), Importance::Low);
    }

    #[test]
    fn fallback_is_other_low() {
        let c = Classification::fallback();
        assert_eq!(c.category, Category::Other);
        assert_eq!(c.importance, Importance::Low);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(
            RouteOutcome::Refund(RefundOutcome::RefundAccepted {
                order_id: "X".into()
            })
            .label(),
            "refund_accepted"
        );
        assert_eq!(RouteOutcome::Unhandled.label(), "unhandled");
        assert_eq!(
            RouteOutcome::Failed {
                reason: "db down".into()
            }
            .label(),
            "failed"
        );
    }

    #[test]
    fn importance_serializes_lowercase() {
        let json = serde_json::to_value(Importance::Medium).unwrap();
        assert_eq!(json, "medium");
    }
}
