//! Row types shared by the store, resolver, and delivery pipeline.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Delivery status of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Waiting for a worker pass.
    Queued,
    /// Equivalent initial state to `Queued` (written by some collaborators).
    Pending,
    /// Claimed by a worker pass (transient).
    Sending,
    /// Delivered; `sent_at` and `external_id` are set.
    Sent,
    /// Terminal failure.
    Failed,
    /// Terminal, operator-set only. The pipeline never writes this.
    Cancelled,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Pending => "pending",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether a message in this status can be claimed for delivery.
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Queued | Self::Pending)
    }
}

impl FromStr for MessageStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "pending" => Ok(Self::Pending),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(()),
        }
    }
}

/// One outbound-email task row.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: Option<String>,
    /// Plain text, or a serialized JSON object whose `text` field is the body.
    pub content: String,
    /// JSON map carrying at least `to` / `from` addresses.
    pub metadata: Value,
    pub status: MessageStatus,
    pub attempts: i64,
    /// Last failure description.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    /// Provider-assigned id, set only on successful send.
    pub external_id: Option<String>,
    /// The worker only touches rows where this is `"email"`.
    pub message_type: String,
}

impl Message {
    /// A fresh queued email message (what the collaborator UI inserts).
    pub fn new_queued(id: impl Into<String>, content: impl Into<String>, metadata: Value) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            conversation_id: None,
            content: content.into(),
            metadata,
            status: MessageStatus::Queued,
            attempts: 0,
            error: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            external_id: None,
            message_type: "email".to_string(),
        }
    }

    /// Recipient address: `metadata.to`, falling back to `metadata.from`.
    pub fn recipient(&self) -> Option<&str> {
        self.metadata
            .get("to")
            .and_then(Value::as_str)
            .or_else(|| self.metadata.get("from").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    }

    /// Body text: the content as-is when it is plain text, the `.text` field
    /// when it is a JSON object, or the serialized object as a last resort.
    pub fn body_text(&self) -> String {
        match serde_json::from_str::<Value>(&self.content) {
            Ok(Value::Object(map)) => map
                .get("text")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(map).to_string()),
            _ => self.content.clone(),
        }
    }
}

/// A conversation row with its channel joined in.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub subject: Option<String>,
    pub channel: Option<ChannelRow>,
}

/// Current-schema channel row. Either of the two JSON config columns may
/// carry the SMTP settings.
#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: String,
    pub name: String,
    pub channel_type: String,
    pub is_active: bool,
    pub config: Option<Value>,
    pub configuration: Option<Value>,
}

impl ChannelRow {
    /// The effective config object: `config`, else `configuration`, else empty.
    pub fn effective_config(&self) -> Value {
        self.config
            .clone()
            .or_else(|| self.configuration.clone())
            .unwrap_or_else(|| Value::Object(serde_json::Map::new()))
    }
}

/// The normalized delivery configuration produced from any channel schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalChannel {
    pub host: Option<String>,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub secure: bool,
    pub from_email: Option<String>,
}

impl Default for CanonicalChannel {
    fn default() -> Self {
        Self {
            host: None,
            port: 587,
            username: None,
            password: None,
            secure: false,
            from_email: None,
        }
    }
}
