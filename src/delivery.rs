//! Per-message delivery pipeline: claim, validate, resolve, send, finalize.
//!
//! State machine: `queued`/`pending` → `sending` (claimed) → `sent`, back to
//! `queued` (re-queued for another pass), or `failed` (terminal). `cancelled`
//! is operator-set only; this pipeline never writes it.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::DeliveryError;
use crate::resolver::ChannelResolver;
use crate::store::model::{Conversation, Message, MessageStatus};
use crate::store::traits::MessageStore;
use crate::transport::{MailerFactory, OutboundEmail};

/// Attempts at or above this count make a failure terminal.
pub const MAX_ATTEMPTS: i64 = 3;

/// Subject used when the conversation carries none.
pub const DEFAULT_SUBJECT: &str = "New message";

/// What happened to one message in one worker pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Not claimable (already claimed, terminal, or gone); not an error.
    Skipped,
    /// Delivered; the provider id was recorded on the row.
    Sent { external_id: String },
    /// Failed below the attempt threshold; eligible for a future poll.
    Requeued,
    /// Terminal failure.
    Failed,
}

/// Runs the delivery pipeline for single messages.
pub struct DeliveryExecutor {
    store: Arc<dyn MessageStore>,
    resolver: ChannelResolver,
    mailers: Arc<dyn MailerFactory>,
    default_from: String,
}

impl DeliveryExecutor {
    pub fn new(
        store: Arc<dyn MessageStore>,
        resolver: ChannelResolver,
        mailers: Arc<dyn MailerFactory>,
        default_from: String,
    ) -> Self {
        Self {
            store,
            resolver,
            mailers,
            default_from,
        }
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Process one message through the full pipeline.
    pub async fn process(&self, message: &Message) -> DeliveryOutcome {
        let claimed = match self.store.claim_message(&message.id).await {
            Ok(Some(m)) => m,
            Ok(None) => {
                debug!(id = %message.id, "Message not claimable, skipping");
                return DeliveryOutcome::Skipped;
            }
            Err(e) => {
                warn!(id = %message.id, "Claim failed: {e}");
                return DeliveryOutcome::Skipped;
            }
        };

        let Some(to) = claimed.recipient().map(str::to_string) else {
            warn!(id = %claimed.id, "Message has no recipient");
            self.write_terminal_failure(&claimed.id, &DeliveryError::MissingRecipient)
                .await;
            return DeliveryOutcome::Failed;
        };

        let conversation = self.load_conversation(&claimed).await;
        let channel = self.resolver.resolve_for_message(conversation.as_ref()).await;

        let Some(mailer) = channel.as_ref().and_then(|ch| self.mailers.build(ch)) else {
            warn!(id = %claimed.id, "No transport available");
            self.write_terminal_failure(&claimed.id, &DeliveryError::NoSmtpConfiguration)
                .await;
            return DeliveryOutcome::Failed;
        };

        let from = channel
            .and_then(|ch| ch.from_email)
            .unwrap_or_else(|| self.default_from.clone());
        let subject = conversation
            .and_then(|c| c.subject)
            .unwrap_or_else(|| DEFAULT_SUBJECT.to_string());

        let mail = OutboundEmail {
            to,
            from,
            subject,
            body: claimed.body_text(),
        };

        debug!(id = %claimed.id, to = %mail.to, from = %mail.from, "Sending");
        match mailer.send(&mail).await {
            Ok(external_id) => {
                if let Err(e) = self.store.mark_sent(&claimed.id, &external_id).await {
                    error!(id = %claimed.id, "Failed to record sent status: {e}");
                }
                info!(id = %claimed.id, external_id = %external_id, "Message sent");
                DeliveryOutcome::Sent { external_id }
            }
            Err(e) => {
                warn!(id = %claimed.id, "Delivery failed: {e}");
                self.handle_failure(&claimed.id, &e).await
            }
        }
    }

    /// Load the message's conversation; a load error degrades to "no
    /// conversation" rather than failing the message.
    async fn load_conversation(&self, message: &Message) -> Option<Conversation> {
        let conversation_id = message.conversation_id.as_deref()?;
        match self.store.get_conversation(conversation_id).await {
            Ok(conv) => conv,
            Err(e) => {
                warn!(id = %message.id, conversation = %conversation_id, "Error loading conversation: {e}");
                None
            }
        }
    }

    /// Non-retryable validation failure: terminal `failed` status, bypassing
    /// the attempt threshold. Write errors are logged, best-effort.
    async fn write_terminal_failure(&self, id: &str, error: &DeliveryError) {
        if let Err(e) = self.store.mark_failed(id, &error.to_string()).await {
            error!(id = %id, "Failed to record failure: {e}");
        }
    }

    /// Retry/backoff handling for a failed send attempt.
    ///
    /// The claim already counted this attempt, so the counter is re-read
    /// fresh from the store (not taken from the in-memory row, to tolerate
    /// interleaving) and used as-is: re-queue below the threshold, terminal
    /// `failed` at it. A failed read is logged and leaves the row untouched
    /// for this cycle.
    pub async fn handle_failure(&self, id: &str, error: &DeliveryError) -> DeliveryOutcome {
        let attempts = match self.store.read_attempts(id).await {
            Ok(Some(a)) => a,
            Ok(None) => {
                error!(id = %id, "Message vanished while handling failure");
                return DeliveryOutcome::Failed;
            }
            Err(e) => {
                error!(id = %id, "Error reading attempts: {e}");
                return DeliveryOutcome::Failed;
            }
        };

        let status = if attempts >= MAX_ATTEMPTS {
            MessageStatus::Failed
        } else {
            MessageStatus::Queued
        };

        if let Err(e) = self
            .store
            .record_failure(id, attempts, &error.to_string(), status)
            .await
        {
            error!(id = %id, "Failed to record attempt {attempts}: {e}");
        } else {
            debug!(id = %id, attempts, status = status.as_str(), "Attempt recorded");
        }

        match status {
            MessageStatus::Failed => DeliveryOutcome::Failed,
            _ => DeliveryOutcome::Requeued,
        }
    }
}
