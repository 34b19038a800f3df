//! Knowledge-base question answering.
//!
//! The knowledge base is a plain text file where `# <category>` lines start
//! a section and the non-empty lines below it form one document. Retrieval
//! is a shared-term score; the best documents are handed to the LLM as the
//! only context it may answer from.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{ConfigError, PipelineError};
use crate::llm::provider::{ChatMessage, CompletionRequest, LlmProvider};

/// Phrase the model uses when the context does not cover the question.
pub const CANNOT_ANSWER: &str = "I don't have enough information";

const DEFAULT_TOP_K: usize = 3;
const ANSWER_TEMPERATURE: f32 = 0.2;
const ANSWER_MAX_TOKENS: u32 = 800;

/// Result of trying to answer a question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Answered(String),
    /// Context did not cover the question; goes to the unhandled sink.
    CannotAnswer,
}

#[async_trait]
pub trait Answerer: Send + Sync {
    async fn answer(&self, question: &str) -> Result<Answer, PipelineError>;
}

// ── Knowledge base ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KbDocument {
    pub category: Option<String>,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeBase {
    documents: Vec<KbDocument>,
}

impl KnowledgeBase {
    /// Read and parse a knowledge base file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let kb = Self::parse(&text);
        info!(path = %path.display(), documents = kb.len(), "Knowledge base loaded");
        Ok(kb)
    }

    pub fn parse(text: &str) -> Self {
        let mut documents = Vec::new();
        let mut category: Option<String> = None;
        let mut lines: Vec<&str> = Vec::new();

        for line in text.lines() {
            if let Some(heading) = line.strip_prefix("# ") {
                push_document(&mut documents, category.take(), &lines);
                lines.clear();
                category = Some(heading.trim().to_string());
            } else if !line.trim().is_empty() {
                lines.push(line);
            }
        }
        push_document(&mut documents, category, &lines);

        Self { documents }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Up to `k` documents sharing the most terms with `question`, best first.
    /// Documents sharing no term are never returned.
    pub fn retrieve(&self, question: &str, k: usize) -> Vec<&KbDocument> {
        let wanted = terms(question);
        let mut scored: Vec<(usize, &KbDocument)> = self
            .documents
            .iter()
            .map(|doc| {
                let have = terms(&doc.content);
                (wanted.intersection(&have).count(), doc)
            })
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored.into_iter().take(k).map(|(_, doc)| doc).collect()
    }
}

fn push_document(documents: &mut Vec<KbDocument>, category: Option<String>, lines: &[&str]) {
    let content = lines.join("\n").trim().to_string();
    if !content.is_empty() {
        documents.push(KbDocument { category, content });
    }
}

/// Lowercased alphanumeric words longer than two characters.
fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

/// Whether a model answer is the cannot-answer phrase, in either apostrophe
/// form and any casing.
pub fn is_cannot_answer(answer: &str) -> bool {
    answer
        .to_lowercase()
        .replace('\u{2019}', "'")
        .contains(&CANNOT_ANSWER.to_lowercase())
}

// ── LLM answerer ────────────────────────────────────────────────────

/// Answers questions from the knowledge base through an LLM.
pub struct LlmAnswerer {
    llm: Arc<dyn LlmProvider>,
    kb: KnowledgeBase,
    top_k: usize,
}

impl LlmAnswerer {
    pub fn new(llm: Arc<dyn LlmProvider>, kb: KnowledgeBase) -> Self {
        Self {
            llm,
            kb,
            top_k: DEFAULT_TOP_K,
        }
    }
}

#[async_trait]
impl Answerer for LlmAnswerer {
    async fn answer(&self, question: &str) -> Result<Answer, PipelineError> {
        let context = self.kb.retrieve(question, self.top_k);
        if context.is_empty() {
            debug!("No knowledge base document matches the question");
            return Ok(Answer::CannotAnswer);
        }

        let context_text = context
            .iter()
            .map(|doc| doc.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let request = CompletionRequest::new(vec![
            ChatMessage::system(format!(
                "You are an email assistant of a logistics company. Answer the question based \
                 only on the provided context from the knowledge base. If the context does not \
                 contain enough information to answer, respond only with '{CANNOT_ANSWER}' and \
                 nothing else."
            )),
            ChatMessage::user(format!(
                "Context:\n{context_text}\n\nQuestion:\n{question}\n\nAnswer:"
            )),
        ])
        .with_temperature(ANSWER_TEMPERATURE)
        .with_max_tokens(ANSWER_MAX_TOKENS);

        let response = self.llm.complete(request).await?;
        let answer = response.content.trim();

        if answer.is_empty() {
            return Err(PipelineError::Answer("empty answer".into()));
        }
        if is_cannot_answer(answer) {
            return Ok(Answer::CannotAnswer);
        }
        Ok(Answer::Answered(answer.to_string()))
    }
}
