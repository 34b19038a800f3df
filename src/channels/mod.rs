//! Mailbox access.
//!
//! `MailTransport` is the capability the pipeline consumes; `ImapSmtpTransport`
//! is the production implementation (one instance per mailbox account).

pub mod email;
pub mod email_types;

use async_trait::async_trait;

pub use email::{EmailConfig, ImapSmtpTransport};
pub use email_types::{EmailRef, FetchedEmail, OutgoingReply, UnreadQuery};

use crate::error::TransportError;

/// One mailbox account: list, fetch, reply, flag.
///
/// Reply correlation relies on the customer's mail client echoing the id
/// returned by `send` in its `In-Reply-To` header. Clients that drop or
/// rewrite that header make follow-ups look like fresh conversations.
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Account name, for logging and `EmailRef::mailbox`.
    fn name(&self) -> &str;

    /// Unread messages in listing order, at most `limit`.
    async fn list_unread(
        &self,
        query: UnreadQuery,
        limit: usize,
    ) -> Result<Vec<EmailRef>, TransportError>;

    /// Fetch a message without marking it read.
    async fn fetch(&self, email: &EmailRef) -> Result<FetchedEmail, TransportError>;

    /// Send a reply. Returns the reply correlation id (the normalized
    /// Message-ID of the sent message).
    async fn send(&self, reply: &OutgoingReply) -> Result<String, TransportError>;

    async fn mark_read(&self, email: &EmailRef) -> Result<(), TransportError>;
}
