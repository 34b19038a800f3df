//! Email value types and parsing helpers shared by transports and the pipeline.

use mail_parser::{HeaderValue, MessageParser, MimeHeaders};
use serde::{Deserialize, Serialize};

/// Handle to a message inside one mailbox account, as returned by listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailRef {
    /// Mailbox account name.
    pub mailbox: String,
    /// Transport-native identifier (IMAP UID).
    pub uid: String,
}

impl EmailRef {
    pub fn new(mailbox: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            mailbox: mailbox.into(),
            uid: uid.into(),
        }
    }
}

/// Which unread messages to list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadQuery {
    /// Every unread message.
    All,
    /// Unread messages received within the last day.
    LatestOnly,
}

/// A fetched inbound email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedEmail {
    /// Stable inbound id (normalized Message-ID), the processed-set key.
    pub id: String,
    pub subject: String,
    pub from_address: String,
    /// Normalized `In-Reply-To`, the reply correlation back-pointer.
    pub in_reply_to: Option<String>,
    pub body_text: String,
}

/// An outbound reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingReply {
    pub to: String,
    pub in_reply_to: Option<String>,
    pub subject: String,
    pub body: String,
}

impl OutgoingReply {
    /// Reply to `email` in the same thread.
    pub fn to_email(email: &FetchedEmail, body: impl Into<String>) -> Self {
        Self {
            to: email.from_address.clone(),
            in_reply_to: Some(email.id.clone()),
            subject: reply_subject(&email.subject),
            body: body.into(),
        }
    }
}

/// Normalize a Message-ID style header: trim whitespace and angle brackets.
///
/// Returns `None` for blank input.
pub fn normalize_message_id(raw: &str) -> Option<String> {
    let id = raw.trim().trim_start_matches('<').trim_end_matches('>').trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// `Re:`-prefixed subject, without doubling an existing prefix.
pub fn reply_subject(subject: &str) -> String {
    let trimmed = subject.trim();
    if trimmed.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("re:")) {
        trimmed.to_string()
    } else {
        format!("Re: {trimmed}")
    }
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a raw RFC 822 message.
///
/// `fallback_id` is used when the message carries no Message-ID.
pub fn parse_raw_email(raw: &[u8], fallback_id: &str) -> Option<FetchedEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let id = parsed
        .message_id()
        .and_then(normalize_message_id)
        .unwrap_or_else(|| fallback_id.to_string());

    let in_reply_to = match parsed.in_reply_to() {
        HeaderValue::Text(text) => normalize_message_id(text),
        HeaderValue::TextList(list) => list.first().and_then(|t| normalize_message_id(t)),
        _ => None,
    };

    Some(FetchedEmail {
        id,
        subject: parsed.subject().unwrap_or_default().to_string(),
        from_address: extract_sender(&parsed),
        in_reply_to,
        body_text: extract_text(&parsed),
    })
}

/// Extract the sender address from a parsed email.
fn extract_sender(parsed: &mail_parser::Message) -> String {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown@example.com".into())
}

/// Extract readable text from a parsed email. Empty when there is none.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.to_string();
        }
    }
    String::new()
}
