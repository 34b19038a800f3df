//! IMAP (over rustls) for inbound, SMTP via lettre for outbound.
//!
//! Every operation opens its own short IMAP session on a blocking thread.
//! Fetches use `BODY.PEEK[]` so a message only becomes \Seen through
//! `mark_read`, after the pipeline has finished with it.

use std::io::{Read as IoRead, Write as IoWrite};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rustls_pki_types::ServerName;
use secrecy::{ExposeSecret, SecretString};
use uuid::Uuid;

use crate::channels::MailTransport;
use crate::channels::email_types::{
    EmailRef, FetchedEmail, OutgoingReply, UnreadQuery, parse_raw_email,
};
use crate::error::TransportError;

const IMAP_TIMEOUT: Duration = Duration::from_secs(30);

// ── Configuration ───────────────────────────────────────────────────

/// One mailbox account, built from environment variables.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// Account name used in logs and `EmailRef::mailbox`.
    pub name: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl EmailConfig {
    /// Build one account from variables starting with `prefix`
    /// (`{prefix}IMAP_HOST`, `{prefix}USERNAME`, ...).
    /// Returns `None` if `{prefix}IMAP_HOST` is not set.
    pub fn from_env_prefixed(name: &str, prefix: &str) -> Option<Self> {
        let var = |key: &str| std::env::var(format!("{prefix}{key}")).ok();

        let imap_host = var("IMAP_HOST")?;
        let imap_port: u16 = var("IMAP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(993);
        let smtp_host = var("SMTP_HOST").unwrap_or_else(|| imap_host.replace("imap", "smtp"));
        let smtp_port: u16 = var("SMTP_PORT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(587);
        let username = var("USERNAME").unwrap_or_default();
        let password = SecretString::from(var("PASSWORD").unwrap_or_default());
        let from_address = var("FROM_ADDRESS").unwrap_or_else(|| username.clone());

        Some(Self {
            name: name.to_string(),
            imap_host,
            imap_port,
            smtp_host,
            smtp_port,
            username,
            password,
            from_address,
        })
    }

    /// All configured accounts.
    ///
    /// `EMAIL_ACCOUNTS=support,billing` reads `EMAIL_SUPPORT_*` and
    /// `EMAIL_BILLING_*`; without it a single `default` account is read from
    /// the unprefixed `EMAIL_*` variables.
    pub fn all_from_env() -> Vec<Self> {
        match std::env::var("EMAIL_ACCOUNTS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .filter_map(|name| {
                    let prefix = format!("EMAIL_{}_", name.to_ascii_uppercase());
                    let config = Self::from_env_prefixed(name, &prefix);
                    if config.is_none() {
                        tracing::warn!(account = name, "Mailbox account has no {prefix}IMAP_HOST, skipping");
                    }
                    config
                })
                .collect(),
            Err(_) => Self::from_env_prefixed("default", "EMAIL_")
                .into_iter()
                .collect(),
        }
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// IMAP + SMTP mailbox transport.
pub struct ImapSmtpTransport {
    config: EmailConfig,
}

impl ImapSmtpTransport {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    fn mailbox(&self) -> String {
        self.config.name.clone()
    }
}

fn task_failed(e: tokio::task::JoinError) -> TransportError {
    TransportError::TaskFailed(e.to_string())
}

#[async_trait]
impl MailTransport for ImapSmtpTransport {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn list_unread(
        &self,
        query: UnreadQuery,
        limit: usize,
    ) -> Result<Vec<EmailRef>, TransportError> {
        let cfg = self.config.clone();
        let uids = tokio::task::spawn_blocking(move || search_unread(&cfg, query, limit))
            .await
            .map_err(task_failed)?
            .map_err(|e| TransportError::ListFailed {
                mailbox: self.mailbox(),
                reason: e.to_string(),
            })?;

        tracing::debug!(mailbox = %self.config.name, count = uids.len(), "Listed unread emails");
        Ok(uids
            .into_iter()
            .map(|uid| EmailRef::new(self.config.name.clone(), uid))
            .collect())
    }

    async fn fetch(&self, email: &EmailRef) -> Result<FetchedEmail, TransportError> {
        let cfg = self.config.clone();
        let uid = email.uid.clone();
        let raw = tokio::task::spawn_blocking(move || fetch_raw(&cfg, &uid))
            .await
            .map_err(task_failed)?
            .map_err(|e| TransportError::FetchFailed {
                mailbox: self.mailbox(),
                uid: email.uid.clone(),
                reason: e.to_string(),
            })?;

        let fallback_id = format!("{}:{}", email.mailbox, email.uid);
        parse_raw_email(&raw, &fallback_id).ok_or_else(|| TransportError::FetchFailed {
            mailbox: self.mailbox(),
            uid: email.uid.clone(),
            reason: "unparseable message".into(),
        })
    }

    async fn send(&self, reply: &OutgoingReply) -> Result<String, TransportError> {
        let cfg = self.config.clone();
        let outgoing = reply.clone();
        let reply_id = tokio::task::spawn_blocking(move || send_smtp(&cfg, &outgoing))
            .await
            .map_err(task_failed)?
            .map_err(|reason| TransportError::SendFailed {
                mailbox: self.mailbox(),
                reason,
            })?;

        tracing::info!(to = %reply.to, reply_id = %reply_id, "Email sent");
        Ok(reply_id)
    }

    async fn mark_read(&self, email: &EmailRef) -> Result<(), TransportError> {
        let cfg = self.config.clone();
        let uid = email.uid.clone();
        tokio::task::spawn_blocking(move || store_seen(&cfg, &uid))
            .await
            .map_err(task_failed)?
            .map_err(|e| TransportError::MarkReadFailed {
                mailbox: self.mailbox(),
                uid: email.uid.clone(),
                reason: e.to_string(),
            })
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Send a reply and return its Message-ID without angle brackets.
fn send_smtp(config: &EmailConfig, reply: &OutgoingReply) -> Result<String, String> {
    let message_id = generate_message_id(&config.from_address);

    let mut builder = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| format!("Invalid from address: {e}"))?,
        )
        .to(reply
            .to
            .parse()
            .map_err(|e| format!("Invalid to address: {e}"))?)
        .subject(reply.subject.clone())
        .message_id(Some(format!("<{message_id}>")));

    if let Some(parent) = &reply.in_reply_to {
        let parent = format!("<{parent}>");
        builder = builder.in_reply_to(parent.clone()).references(parent);
    }

    let email = builder
        .header(ContentType::TEXT_PLAIN)
        .body(reply.body.clone())
        .map_err(|e| format!("Failed to build email: {e}"))?;

    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );

    // 465 is implicit TLS; anything else upgrades with STARTTLS
    let relay = if config.smtp_port == 465 {
        SmtpTransport::relay(&config.smtp_host)
    } else {
        SmtpTransport::starttls_relay(&config.smtp_host)
    };
    let transport = relay
        .map_err(|e| format!("SMTP relay error: {e}"))?
        .port(config.smtp_port)
        .credentials(creds)
        .build();

    transport
        .send(&email)
        .map_err(|e| format!("SMTP send failed: {e}"))?;

    Ok(message_id)
}

/// Fresh `uuid@domain` message id, domain taken from the sender address.
pub fn generate_message_id(from_address: &str) -> String {
    let domain = from_address
        .rsplit_once('@')
        .map(|(_, d)| d.trim().trim_end_matches('>'))
        .filter(|d| !d.is_empty())
        .unwrap_or("localhost");
    format!("{}@{}", Uuid::new_v4().simple(), domain)
}

// ── IMAP ────────────────────────────────────────────────────────────

/// Error type for IMAP operations.
type ImapError = Box<dyn std::error::Error + Send + Sync>;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Untagged lines and literal payloads of one completed command.
#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// A logged-in IMAP session with INBOX selected.
struct ImapSession {
    tls: TlsStream,
    next_tag: u32,
}

impl ImapSession {
    fn open(config: &EmailConfig) -> Result<Self, ImapError> {
        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))?;
        tcp.set_read_timeout(Some(IMAP_TIMEOUT))?;
        tcp.set_write_timeout(Some(IMAP_TIMEOUT))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name = ServerName::try_from(config.imap_host.clone())?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)?;

        let mut session = Self {
            tls: rustls::StreamOwned::new(conn, tcp),
            next_tag: 1,
        };

        let greeting = session.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(format!("unexpected IMAP greeting: {}", greeting.trim()).into());
        }

        session.command(&format!(
            "LOGIN {} {}",
            quote_imap(&config.username),
            quote_imap(config.password.expose_secret())
        ))?;
        session.command("SELECT \"INBOX\"")?;
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, ImapError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match IoRead::read(&mut self.tls, &mut byte) {
                Ok(0) => return Err("IMAP connection closed".into()),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Send a tagged command and read until its tagged completion.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ImapError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        IoWrite::write_all(&mut self.tls, format!("{tag} {cmd}\r\n").as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let verb = cmd.split_whitespace().take(2).collect::<Vec<_>>().join(" ");
        let tagged = format!("{tag} ");
        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if let Some(size) = literal_size(&line) {
                let mut literal = vec![0u8; size];
                IoRead::read_exact(&mut self.tls, &mut literal)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if let Some(status) = line.strip_prefix(&tagged) {
                if status.starts_with("OK") {
                    return Ok(response);
                }
                // Never echo the command itself: LOGIN carries the password
                return Err(format!("IMAP {verb} failed: {}", status.trim()).into());
            }
            response.lines.push(line);
        }
    }

    fn logout(mut self) {
        let _ = self.command("LOGOUT");
    }
}

/// UIDs of unread messages in server order, at most `limit`.
fn search_unread(
    config: &EmailConfig,
    query: UnreadQuery,
    limit: usize,
) -> Result<Vec<String>, ImapError> {
    let criteria = match query {
        UnreadQuery::All => "UNSEEN".to_string(),
        UnreadQuery::LatestOnly => {
            format!("UNSEEN SINCE {}", imap_date(Utc::now() - chrono::Duration::days(1)))
        }
    };

    let mut session = ImapSession::open(config)?;
    let response = session.command(&format!("UID SEARCH {criteria}"))?;
    session.logout();
    Ok(parse_search_response(&response.lines, limit))
}

fn fetch_raw(config: &EmailConfig, uid: &str) -> Result<Vec<u8>, ImapError> {
    check_uid(uid)?;
    let mut session = ImapSession::open(config)?;
    let response = session.command(&format!("UID FETCH {uid} BODY.PEEK[]"))?;
    session.logout();
    response
        .literals
        .into_iter()
        .next()
        .ok_or_else(|| format!("no message with UID {uid}").into())
}

fn store_seen(config: &EmailConfig, uid: &str) -> Result<(), ImapError> {
    check_uid(uid)?;
    let mut session = ImapSession::open(config)?;
    session.command(&format!("UID STORE {uid} +FLAGS (\\Seen)"))?;
    session.logout();
    Ok(())
}

fn check_uid(uid: &str) -> Result<(), ImapError> {
    if !uid.is_empty() && uid.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(format!("invalid IMAP UID '{uid}'").into())
    }
}

/// Size of a `{n}` literal announced at the end of a response line.
fn literal_size(line: &str) -> Option<usize> {
    let trimmed = line.trim_end();
    let body = trimmed.strip_suffix('}')?;
    let open = body.rfind('{')?;
    body[open + 1..].parse().ok()
}

/// UIDs from `* SEARCH` lines.
fn parse_search_response(lines: &[String], limit: usize) -> Vec<String> {
    lines
        .iter()
        .filter(|line| line.starts_with("* SEARCH"))
        .flat_map(|line| line.split_whitespace().skip(2))
        .take(limit)
        .map(str::to_string)
        .collect()
}

/// IMAP quoted string.
fn quote_imap(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

/// IMAP `SINCE` date, e.g. `18-Oct-2026`.
fn imap_date(at: DateTime<Utc>) -> String {
    at.format("%d-%b-%Y").to_string()
}
