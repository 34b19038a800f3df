//! Recording mocks shared by the pipeline unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::channels::{EmailRef, FetchedEmail, MailTransport, OutgoingReply, UnreadQuery};
use crate::error::{LlmError, PipelineError, TransportError};
use crate::llm::provider::{CompletionRequest, CompletionResponse, LlmProvider};
use crate::pipeline::answerer::{Answer, Answerer};
use crate::pipeline::classifier::Classifier;
use crate::pipeline::types::Classification;

/// In-memory mailbox: serves `inbox`, records sends and read flags.
#[derive(Default)]
pub struct RecordingTransport {
    pub inbox: Mutex<Vec<(EmailRef, FetchedEmail)>>,
    pub sent: Mutex<Vec<OutgoingReply>>,
    pub read: Mutex<HashSet<EmailRef>>,
    pub fail_sends: Mutex<bool>,
    next_reply: Mutex<u32>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliver(&self, uid: &str, email: FetchedEmail) {
        self.inbox
            .lock()
            .unwrap()
            .push((EmailRef::new("test", uid), email));
    }

    pub fn set_fail_sends(&self, fail: bool) {
        *self.fail_sends.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<OutgoingReply> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_read(&self, uid: &str) -> bool {
        self.read.lock().unwrap().contains(&EmailRef::new("test", uid))
    }
}

#[async_trait]
impl MailTransport for RecordingTransport {
    fn name(&self) -> &str {
        "test"
    }

    async fn list_unread(
        &self,
        _query: UnreadQuery,
        limit: usize,
    ) -> Result<Vec<EmailRef>, TransportError> {
        let read = self.read.lock().unwrap();
        Ok(self
            .inbox
            .lock()
            .unwrap()
            .iter()
            .map(|(r, _)| r.clone())
            .filter(|r| !read.contains(r))
            .take(limit)
            .collect())
    }

    async fn fetch(&self, email: &EmailRef) -> Result<FetchedEmail, TransportError> {
        self.inbox
            .lock()
            .unwrap()
            .iter()
            .find(|(r, _)| r == email)
            .map(|(_, e)| e.clone())
            .ok_or_else(|| TransportError::FetchFailed {
                mailbox: "test".into(),
                uid: email.uid.clone(),
                reason: "no such message".into(),
            })
    }

    async fn send(&self, reply: &OutgoingReply) -> Result<String, TransportError> {
        if *self.fail_sends.lock().unwrap() {
            return Err(TransportError::SendFailed {
                mailbox: "test".into(),
                reason: "smtp down".into(),
            });
        }
        let mut next = self.next_reply.lock().unwrap();
        *next += 1;
        self.sent.lock().unwrap().push(reply.clone());
        Ok(format!("R{}@shop.test", *next))
    }

    async fn mark_read(&self, email: &EmailRef) -> Result<(), TransportError> {
        self.read.lock().unwrap().insert(email.clone());
        Ok(())
    }
}

/// LLM returning a canned reply (or an error when `None`).
pub struct ScriptedLlm {
    pub reply: Option<String>,
    pub requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request);
        match &self.reply {
            Some(content) => Ok(CompletionResponse {
                content: content.clone(),
            }),
            None => Err(LlmError::RequestFailed {
                provider: "scripted".into(),
                reason: "offline".into(),
            }),
        }
    }
}

/// Classifier returning a fixed label (or an error when `None`).
pub struct FixedClassifier(pub Option<Classification>);

#[async_trait]
impl Classifier for FixedClassifier {
    async fn classify(&self, _body: &str) -> Result<Classification, PipelineError> {
        self.0
            .clone()
            .ok_or_else(|| PipelineError::Classification("offline".into()))
    }
}

/// Answerer returning a fixed answer (or an error when `Err`).
pub struct FixedAnswerer(pub Result<Answer, ()>);

#[async_trait]
impl Answerer for FixedAnswerer {
    async fn answer(&self, _question: &str) -> Result<Answer, PipelineError> {
        self.0
            .clone()
            .map_err(|_| PipelineError::Answer("offline".into()))
    }
}

/// Inbound email with the given id, optional reply link and body.
pub fn email(id: &str, in_reply_to: Option<&str>, body: &str) -> FetchedEmail {
    FetchedEmail {
        id: id.to_string(),
        subject: "Refund".to_string(),
        from_address: "alice@example.com".to_string(),
        in_reply_to: in_reply_to.map(str::to_string),
        body_text: body.to_string(),
    }
}
