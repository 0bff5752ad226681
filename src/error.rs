//! Error types for the outbox worker.

/// Message-store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Failed to open store: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors raised while processing a single message.
///
/// `MissingRecipient` and `NoSmtpConfiguration` are terminal: they write a
/// `failed` status directly and never reach the retry handler. `Transport`
/// errors always flow into the retry handler.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Missing recipient")]
    MissingRecipient,

    #[error("No SMTP configuration")]
    NoSmtpConfiguration,

    #[error("Send failed: {reason}")]
    Transport { reason: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
