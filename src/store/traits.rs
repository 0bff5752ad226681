//! Backend-agnostic `MessageStore` trait, the seam between the delivery
//! pipeline and the persistence layer.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::store::model::{ChannelRow, Conversation, Message, MessageStatus};

/// Typed access to the messages, conversations, and channel collections.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), StoreError>;

    // ── Messages ────────────────────────────────────────────────────

    /// Insert a message row (done by the collaborator UI; used here by tests).
    async fn insert_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Get a message by id.
    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// Fetch up to `limit` due email messages: `message_type = 'email'`,
    /// status in {queued, pending}, ordered by `created_at` ascending.
    async fn fetch_due_messages(&self, limit: u32) -> Result<Vec<Message>, StoreError>;

    /// Claim a message for delivery with a single conditional update:
    /// status becomes `sending` and attempts increments by one, but only if
    /// the row is still in a claimable status. Returns the updated row, or
    /// `None` when the row is missing or already claimed.
    async fn claim_message(&self, id: &str) -> Result<Option<Message>, StoreError>;

    /// Record a successful send: status `sent`, `sent_at`, provider id.
    async fn mark_sent(&self, id: &str, external_id: &str) -> Result<(), StoreError>;

    /// Record a terminal validation failure: status `failed` plus the error.
    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), StoreError>;

    /// Read the current attempts counter fresh from the store.
    async fn read_attempts(&self, id: &str) -> Result<Option<i64>, StoreError>;

    /// Write the outcome of a failed delivery attempt: the attempt counter
    /// (already incremented by the claim), the error text, and the next
    /// status.
    async fn record_failure(
        &self,
        id: &str,
        attempts: i64,
        error: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError>;

    /// Make a terminally-failed message claimable again (manual retry only;
    /// the pipeline itself never un-fails a row). Returns rows affected.
    async fn requeue_message(&self, id: &str) -> Result<u64, StoreError>;

    /// Delete a message row. Returns the number of rows affected.
    async fn delete_message(&self, id: &str) -> Result<u64, StoreError>;

    // ── Conversations ───────────────────────────────────────────────

    /// Load a conversation with its channel row joined in.
    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    // ── Channels ────────────────────────────────────────────────────

    /// Look up a current-schema channel by id.
    async fn get_channel_by_id(&self, id: &str) -> Result<Option<ChannelRow>, StoreError>;

    /// Look up a current-schema channel by name.
    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelRow>, StoreError>;

    /// Look up a legacy-schema channel by id, as a raw JSON map so divergent
    /// column names survive the read.
    async fn get_legacy_channel_by_id(&self, id: &str) -> Result<Option<Value>, StoreError>;

    /// Look up a legacy-schema channel by name.
    async fn get_legacy_channel_by_name(&self, name: &str) -> Result<Option<Value>, StoreError>;
}
