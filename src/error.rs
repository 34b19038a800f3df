//! Error types for the support triage service.

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Database-related errors. Any of these aborts the current email.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Mail transport errors (listing, fetching, sending, flagging).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Listing unread messages in {mailbox} failed: {reason}")]
    ListFailed { mailbox: String, reason: String },

    #[error("Fetching message {uid} from {mailbox} failed: {reason}")]
    FetchFailed {
        mailbox: String,
        uid: String,
        reason: String,
    },

    #[error("Sending reply from {mailbox} failed: {reason}")]
    SendFailed { mailbox: String, reason: String },

    #[error("Marking message {uid} in {mailbox} as read failed: {reason}")]
    MarkReadFailed {
        mailbox: String,
        uid: String,
        reason: String,
    },

    #[error("Transport task panicked: {0}")]
    TaskFailed(String),
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Classification failed: {0}")]
    Classification(String),

    #[error("Answer generation failed: {0}")]
    Answer(String),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] DatabaseError),

    #[error("Transport failed: {0}")]
    Transport(#[from] TransportError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),
}
