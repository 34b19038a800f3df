//! LLM triage classifier: email text → category + importance.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::warn;

use crate::error::PipelineError;
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};
use crate::pipeline::types::{Category, Classification, Importance};

const CLASSIFY_TEMPERATURE: f32 = 0.0;
const CLASSIFY_MAX_TOKENS: u32 = 300;

/// Bodies longer than this are truncated before prompting.
const MAX_PROMPT_CHARS: usize = 6000;

static CATEGORY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Category:\s*(\w+)").expect("valid category pattern"));

static IMPORTANCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Importance:\s*(\w+)").expect("valid importance pattern"));

/// Maps raw email text to a triage label.
///
/// Errors are degraded to `Classification::fallback()` by the router.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, body: &str) -> Result<Classification, PipelineError>;
}

/// Classifier backed by an `LlmProvider`.
pub struct LlmClassifier {
    llm: Arc<dyn LlmProvider>,
}

impl LlmClassifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, body: &str) -> Result<Classification, PipelineError> {
        let request = CompletionRequest::new(vec![
            ChatMessage::system(build_classify_system_prompt()),
            ChatMessage::user(build_classify_user_prompt(body)),
        ])
        .with_temperature(CLASSIFY_TEMPERATURE)
        .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = self.llm.complete(request).await?;

        parse_classification(&response.content).ok_or_else(|| {
            warn!(raw_response = %response.content, "Unparseable classification response");
            PipelineError::Classification("missing Category or Importance line".into())
        })
    }
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_classify_system_prompt() -> String {
    "You are an email assistant of a logistics company. Read the whole email thread, \
     including quotes and previous responses, and categorize it as 'Refund', 'Question' or 'Other'.\n\n\
     - Refund: the email mentions a refund or a return, quotes an 'Invalid Order ID' \
     response, or continues a refund thread (for example, supplies an order id after being asked).\n\
     - Question: the email asks for information or clarification about the company or its services.\n\
     - Other: anything else.\n\n\
     Also give a one-sentence explanation and an importance level (low, medium, high).\n\n\
     Respond in exactly this format:\n\
     Category: <category>\n\
     Explanation: <explanation>\n\
     Importance: <importance>"
        .to_string()
}

fn build_classify_user_prompt(body: &str) -> String {
    let mut content: String = body.chars().take(MAX_PROMPT_CHARS).collect();
    if content.len() < body.len() {
        content.push_str("\n[truncated]");
    }
    format!("Email content:\n{content}")
}

/// Parse `Category:` / `Importance:` lines. Both must be present.
fn parse_classification(raw: &str) -> Option<Classification> {
    let category = CATEGORY_RE.captures(raw)?.get(1)?.as_str();
    let importance = IMPORTANCE_RE.captures(raw)?.get(1)?.as_str();
    Some(Classification::new(
        Category::parse(category),
        Importance::parse(importance),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::ScriptedLlm;

    #[test]
    fn parse_well_formed_response() {
        let raw = "Category: Refund\nExplanation: asks for money back\nImportance: High";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.category, Category::Refund);
        assert_eq!(c.importance, Importance::High);
    }

    #[test]
    fn parse_is_case_insensitive() {
        let raw = "category: question\nimportance: MEDIUM";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c.category, Category::Question);
        assert_eq!(c.importance, Importance::Medium);
    }

    #[test]
    fn parse_unknown_labels_degrade() {
        let raw = "Category: Complaint\nImportance: urgent";
        let c = parse_classification(raw).unwrap();
        assert_eq!(c, Classification::new(Category::Other, Importance::Low));
    }

    #[test]
    fn parse_missing_importance_fails() {
        assert!(parse_classification("Category: Refund").is_none());
        assert!(parse_classification("I don't have enough information").is_none());
    }

    #[test]
    fn user_prompt_truncates_long_bodies() {
        let body = "x".repeat(MAX_PROMPT_CHARS + 50);
        let prompt = build_classify_user_prompt(&body);
        assert!(prompt.ends_with("[truncated]"));
        assert!(!build_classify_user_prompt("short").contains("[truncated]"));
    }

    #[tokio::test]
    async fn classifier_sends_body_and_parses() {
        let llm = Arc::new(ScriptedLlm::replying(
            "Category: Refund\nExplanation: refund\nImportance: medium",
        ));
        let classifier = LlmClassifier::new(llm.clone());

        let c = classifier.classify("I want a refund").await.unwrap();
        assert_eq!(c, Classification::new(Category::Refund, Importance::Medium));

        let requests = llm.requests.lock().unwrap();
        assert!(requests[0].user_text().contains("I want a refund"));
        assert!(requests[0].system_text().contains("Category: <category>"));
    }

    #[tokio::test]
    async fn classifier_reports_llm_failure() {
        let classifier = LlmClassifier::new(Arc::new(ScriptedLlm::failing()));
        assert!(matches!(
            classifier.classify("hello").await,
            Err(PipelineError::Llm(_))
        ));
    }

    #[tokio::test]
    async fn classifier_reports_garbage_response() {
        let classifier = LlmClassifier::new(Arc::new(ScriptedLlm::replying("no idea")));
        assert!(matches!(
            classifier.classify("hello").await,
            Err(PipelineError::Classification(_))
        ));
    }
}
