//! libSQL-backed `MessageStore` implementation.
//!
//! Supports local file and in-memory databases. The claim operation is a
//! single conditional UPDATE checked by affected-row count, so a message can
//! only be claimed by one caller even when a manual retry races the poll loop.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database, params};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::store::migrations;
use crate::store::model::{ChannelRow, Conversation, Message, MessageStatus};
use crate::store::traits::MessageStore;

/// libSQL message store.
///
/// Holds a single connection reused for all operations. `libsql::Connection`
/// is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Open(format!("Failed to create database directory: {e}")))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        tracing::info!(path = %path.display(), "Message store opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, StoreError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| StoreError::Open(format!("Failed to create in-memory database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| StoreError::Open(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Raw connection access, for row seeding and maintenance tasks that
    /// belong to the collaborator side of the store.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Parse a TEXT column holding JSON; malformed data falls back to an empty map.
fn parse_json_or_empty(s: &str) -> Value {
    serde_json::from_str(s).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

/// Convert `Option<&str>` to a libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, content, metadata, status, attempts, error, \
     created_at, updated_at, sent_at, external_id, message_type";

/// Map a libsql row to a Message. Column order matches MESSAGE_COLUMNS.
fn row_to_message(row: &libsql::Row) -> Result<Message, libsql::Error> {
    let metadata_str: String = row.get(3)?;
    let status_str: String = row.get(4)?;
    let created_str: String = row.get(7)?;
    let updated_str: String = row.get(8)?;
    let sent_str: Option<String> = row.get(9).ok();

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1).ok(),
        content: row.get(2)?,
        metadata: parse_json_or_empty(&metadata_str),
        status: status_str.parse().unwrap_or(MessageStatus::Queued),
        attempts: row.get(5)?,
        error: row.get(6).ok(),
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
        sent_at: parse_optional_datetime(&sent_str),
        external_id: row.get(10).ok(),
        message_type: row.get(11)?,
    })
}

const CHANNEL_COLUMNS: &str = "id, name, type, is_active, config, configuration";

/// Map a libsql row to a current-schema ChannelRow.
fn row_to_channel(row: &libsql::Row) -> Result<ChannelRow, libsql::Error> {
    let is_active: i64 = row.get(3)?;
    let config_str: Option<String> = row.get(4).ok();
    let configuration_str: Option<String> = row.get(5).ok();

    Ok(ChannelRow {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type: row.get(2)?,
        is_active: is_active != 0,
        config: config_str.as_deref().map(parse_json_or_empty),
        configuration: configuration_str.as_deref().map(parse_json_or_empty),
    })
}

const LEGACY_COLUMNS: &str =
    "id, name, channel_type, smtp_host, smtp_port, smtp_username, smtp_password, use_tls, email";

/// Map a legacy email_channels row to a JSON map, keyed by column name, so
/// the resolver's legacy normalizer can apply its field-name fallbacks.
fn row_to_legacy_map(row: &libsql::Row) -> Result<Value, libsql::Error> {
    let mut map = serde_json::Map::new();
    map.insert("id".into(), Value::String(row.get::<String>(0)?));
    map.insert("name".into(), Value::String(row.get::<String>(1)?));
    map.insert("channel_type".into(), Value::String(row.get::<String>(2)?));
    if let Ok(host) = row.get::<String>(3) {
        map.insert("smtp_host".into(), Value::String(host));
    }
    if let Ok(port) = row.get::<i64>(4) {
        map.insert("smtp_port".into(), Value::from(port));
    }
    if let Ok(user) = row.get::<String>(5) {
        map.insert("smtp_username".into(), Value::String(user));
    }
    if let Ok(pass) = row.get::<String>(6) {
        map.insert("smtp_password".into(), Value::String(pass));
    }
    if let Ok(tls) = row.get::<i64>(7) {
        map.insert("use_tls".into(), Value::Bool(tls != 0));
    }
    if let Ok(email) = row.get::<String>(8) {
        map.insert("email".into(), Value::String(email));
    }
    Ok(Value::Object(map))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl MessageStore for LibSqlStore {
    async fn init_schema(&self) -> Result<(), StoreError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ),
            params![
                message.id.clone(),
                opt_text(message.conversation_id.as_deref()),
                message.content.clone(),
                message.metadata.to_string(),
                message.status.as_str(),
                message.attempts,
                opt_text(message.error.as_deref()),
                message.created_at.to_rfc3339(),
                message.updated_at.to_rfc3339(),
                opt_text(message.sent_at.map(|t| t.to_rfc3339()).as_deref()),
                opt_text(message.external_id.as_deref()),
                message.message_type.clone(),
            ],
        )
        .await
        .map_err(|e| StoreError::Query(format!("insert_message: {e}")))?;

        debug!(id = %message.id, "Message inserted");
        Ok(())
    }

    async fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let msg = row_to_message(&row)
                    .map_err(|e| StoreError::Query(format!("get_message row parse: {e}")))?;
                Ok(Some(msg))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_message: {e}"))),
        }
    }

    async fn fetch_due_messages(&self, limit: u32) -> Result<Vec<Message>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE message_type = 'email' AND status IN ('queued', 'pending') \
                     ORDER BY created_at ASC LIMIT ?1"
                ),
                params![i64::from(limit)],
            )
            .await
            .map_err(|e| StoreError::Query(format!("fetch_due_messages: {e}")))?;

        let mut messages = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_message(&row) {
                Ok(msg) => messages.push(msg),
                Err(e) => warn!("Skipping message row: {e}"),
            }
        }
        Ok(messages)
    }

    async fn claim_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE messages \
                 SET status = 'sending', attempts = attempts + 1, updated_at = ?2 \
                 WHERE id = ?1 AND status IN ('queued', 'pending')",
                params![id, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("claim_message: {e}")))?;

        if affected == 0 {
            return Ok(None);
        }
        self.get_message(id).await
    }

    async fn mark_sent(&self, id: &str, external_id: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE messages SET status = 'sent', sent_at = ?2, external_id = ?3, \
                 updated_at = ?2 WHERE id = ?1",
                params![id, now, external_id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_sent: {e}")))?;

        debug!(id = %id, external_id = %external_id, "Message marked sent");
        Ok(())
    }

    async fn mark_failed(&self, id: &str, error: &str) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE messages SET status = 'failed', error = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, error, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("mark_failed: {e}")))?;

        debug!(id = %id, error = %error, "Message marked failed");
        Ok(())
    }

    async fn read_attempts(&self, id: &str) -> Result<Option<i64>, StoreError> {
        let mut rows = self
            .conn()
            .query("SELECT attempts FROM messages WHERE id = ?1", params![id])
            .await
            .map_err(|e| StoreError::Query(format!("read_attempts: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let attempts: i64 = row
                    .get(0)
                    .map_err(|e| StoreError::Query(format!("read_attempts row parse: {e}")))?;
                Ok(Some(attempts))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("read_attempts: {e}"))),
        }
    }

    async fn record_failure(
        &self,
        id: &str,
        attempts: i64,
        error: &str,
        status: MessageStatus,
    ) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "UPDATE messages SET attempts = ?2, error = ?3, status = ?4, updated_at = ?5 \
                 WHERE id = ?1",
                params![id, attempts, error, status.as_str(), now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("record_failure: {e}")))?;

        debug!(id = %id, attempts, status = status.as_str(), "Failure recorded");
        Ok(())
    }

    async fn requeue_message(&self, id: &str) -> Result<u64, StoreError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE messages SET status = 'queued', updated_at = ?2 \
                 WHERE id = ?1 AND status = 'failed'",
                params![id, now],
            )
            .await
            .map_err(|e| StoreError::Query(format!("requeue_message: {e}")))?;

        if affected > 0 {
            debug!(id = %id, "Message re-queued for manual retry");
        }
        Ok(affected)
    }

    async fn delete_message(&self, id: &str) -> Result<u64, StoreError> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id])
            .await
            .map_err(|e| StoreError::Query(format!("delete_message: {e}")))?;
        Ok(affected)
    }

    async fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, subject, channel_id FROM conversations WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_conversation: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => return Err(StoreError::Query(format!("get_conversation: {e}"))),
        };

        let conv_id: String = row
            .get(0)
            .map_err(|e| StoreError::Query(format!("get_conversation row parse: {e}")))?;
        let subject: Option<String> = row.get(1).ok();
        let channel_id: Option<String> = row.get(2).ok();

        // A broken channel reference degrades to "no channel", never an error.
        let channel = match channel_id {
            Some(ref cid) => match self.get_channel_by_id(cid).await {
                Ok(ch) => ch,
                Err(e) => {
                    warn!(conversation = %conv_id, channel = %cid, "Failed to load channel: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(Some(Conversation {
            id: conv_id,
            subject,
            channel,
        }))
    }

    async fn get_channel_by_id(&self, id: &str) -> Result<Option<ChannelRow>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_channel_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let channel = row_to_channel(&row)
                    .map_err(|e| StoreError::Query(format!("get_channel_by_id row parse: {e}")))?;
                Ok(Some(channel))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_channel_by_id: {e}"))),
        }
    }

    async fn get_channel_by_name(&self, name: &str) -> Result<Option<ChannelRow>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE name = ?1 LIMIT 1"),
                params![name],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_channel_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let channel = row_to_channel(&row).map_err(|e| {
                    StoreError::Query(format!("get_channel_by_name row parse: {e}"))
                })?;
                Ok(Some(channel))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_channel_by_name: {e}"))),
        }
    }

    async fn get_legacy_channel_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEGACY_COLUMNS} FROM email_channels WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_legacy_channel_by_id: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let map = row_to_legacy_map(&row).map_err(|e| {
                    StoreError::Query(format!("get_legacy_channel_by_id row parse: {e}"))
                })?;
                Ok(Some(map))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_legacy_channel_by_id: {e}"))),
        }
    }

    async fn get_legacy_channel_by_name(&self, name: &str) -> Result<Option<Value>, StoreError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {LEGACY_COLUMNS} FROM email_channels WHERE name = ?1 LIMIT 1"),
                params![name],
            )
            .await
            .map_err(|e| StoreError::Query(format!("get_legacy_channel_by_name: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let map = row_to_legacy_map(&row).map_err(|e| {
                    StoreError::Query(format!("get_legacy_channel_by_name row parse: {e}"))
                })?;
                Ok(Some(map))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(StoreError::Query(format!("get_legacy_channel_by_name: {e}"))),
        }
    }
}

#[cfg(test)]
impl LibSqlStore {
    /// Insert a current-schema channel row (test fixtures only).
    pub async fn insert_current_for_test(&self, name: &str, host: &str) {
        self.conn()
            .execute(
                "INSERT INTO channels (id, name, type, is_active, config) \
                 VALUES (?1, ?2, 'email', 1, ?3)",
                params![
                    format!("{name}-current-id"),
                    name,
                    format!(r#"{{"smtp_host":"{host}"}}"#),
                ],
            )
            .await
            .unwrap();
    }

    /// Insert a legacy-schema channel row (test fixtures only).
    pub async fn insert_legacy_for_test(&self, name: &str, host: &str) {
        self.conn()
            .execute(
                "INSERT INTO email_channels (id, name, channel_type, smtp_host) \
                 VALUES (?1, ?2, 'email', ?3)",
                params![format!("{name}-id"), name, host],
            )
            .await
            .unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_message(status: &str) -> LibSqlStore {
        let store = LibSqlStore::new_memory().await.unwrap();
        let mut msg = Message::new_queued("m1", "Hi", json!({"to": "p@x.com"}));
        msg.status = status.parse().unwrap();
        store.insert_message(&msg).await.unwrap();
        store
    }

    #[tokio::test]
    async fn claim_increments_attempts_and_sets_sending() {
        let store = store_with_message("queued").await;

        let claimed = store.claim_message("m1").await.unwrap().unwrap();
        assert_eq!(claimed.status, MessageStatus::Sending);
        assert_eq!(claimed.attempts, 1);
    }

    #[tokio::test]
    async fn claim_works_from_pending() {
        let store = store_with_message("pending").await;
        let claimed = store.claim_message("m1").await.unwrap().unwrap();
        assert_eq!(claimed.status, MessageStatus::Sending);
    }

    #[tokio::test]
    async fn claim_refuses_non_claimable_statuses() {
        for status in ["sending", "sent", "failed", "cancelled"] {
            let store = store_with_message(status).await;
            assert!(store.claim_message("m1").await.unwrap().is_none());

            // The row must be untouched.
            let msg = store.get_message("m1").await.unwrap().unwrap();
            assert_eq!(msg.status.as_str(), status);
            assert_eq!(msg.attempts, 0);
        }
    }

    #[tokio::test]
    async fn claim_missing_message_returns_none() {
        let store = LibSqlStore::new_memory().await.unwrap();
        assert!(store.claim_message("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_claim_loses() {
        let store = store_with_message("queued").await;
        assert!(store.claim_message("m1").await.unwrap().is_some());
        assert!(store.claim_message("m1").await.unwrap().is_none());

        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.attempts, 1);
    }

    #[tokio::test]
    async fn fetch_due_filters_and_orders() {
        let store = LibSqlStore::new_memory().await.unwrap();

        let mut older = Message::new_queued("old", "a", json!({}));
        older.created_at = Utc::now() - chrono::Duration::minutes(5);
        store.insert_message(&older).await.unwrap();

        store
            .insert_message(&Message::new_queued("new", "b", json!({})))
            .await
            .unwrap();

        let mut sent = Message::new_queued("done", "c", json!({}));
        sent.status = MessageStatus::Sent;
        store.insert_message(&sent).await.unwrap();

        let mut chat = Message::new_queued("chat", "d", json!({}));
        chat.message_type = "chat".into();
        store.insert_message(&chat).await.unwrap();

        let due = store.fetch_due_messages(50).await.unwrap();
        let ids: Vec<&str> = due.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["old", "new"]);
    }

    #[tokio::test]
    async fn fetch_due_respects_limit() {
        let store = LibSqlStore::new_memory().await.unwrap();
        for i in 0..5 {
            store
                .insert_message(&Message::new_queued(format!("m{i}"), "x", json!({})))
                .await
                .unwrap();
        }
        let due = store.fetch_due_messages(3).await.unwrap();
        assert_eq!(due.len(), 3);
    }

    #[tokio::test]
    async fn mark_sent_sets_terminal_fields() {
        let store = store_with_message("queued").await;
        store.mark_sent("m1", "abc123").await.unwrap();

        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.external_id.as_deref(), Some("abc123"));
        assert!(msg.sent_at.is_some());
    }

    #[tokio::test]
    async fn mark_sent_leaves_last_error_in_place() {
        let store = store_with_message("queued").await;
        store
            .record_failure("m1", 1, "boom", MessageStatus::Queued)
            .await
            .unwrap();
        store.mark_sent("m1", "abc123").await.unwrap();

        // The failure description from the earlier attempt stays on the row.
        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Sent);
        assert_eq!(msg.error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn record_failure_writes_all_fields() {
        let store = store_with_message("queued").await;
        store
            .record_failure("m1", 2, "boom", MessageStatus::Queued)
            .await
            .unwrap();

        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.attempts, 2);
        assert_eq!(msg.error.as_deref(), Some("boom"));
        assert_eq!(msg.status, MessageStatus::Queued);
    }

    #[tokio::test]
    async fn local_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.db");

        let store = LibSqlStore::new_local(&path).await.unwrap();
        store
            .insert_message(&Message::new_queued("m1", "Hi", json!({"to": "p@x.com"})))
            .await
            .unwrap();
        drop(store);

        let store = LibSqlStore::new_local(&path).await.unwrap();
        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.content, "Hi");
    }

    #[tokio::test]
    async fn requeue_only_moves_failed_rows() {
        let store = store_with_message("failed").await;
        assert_eq!(store.requeue_message("m1").await.unwrap(), 1);

        let msg = store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(msg.status, MessageStatus::Queued);

        // Anything not failed stays put.
        assert_eq!(store.requeue_message("m1").await.unwrap(), 0);
        assert_eq!(store.requeue_message("nope").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_reports_affected_rows() {
        let store = store_with_message("queued").await;
        assert_eq!(store.delete_message("m1").await.unwrap(), 1);
        assert_eq!(store.delete_message("m1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn conversation_join_and_missing_channel() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO channels (id, name, type, is_active, config) \
                 VALUES ('c1', 'main', 'email', 1, '{\"smtp_host\":\"smtp.example.com\"}')",
                (),
            )
            .await
            .unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO conversations (id, subject, channel_id) \
                 VALUES ('v1', 'Hello', 'c1'), ('v2', NULL, 'missing')",
                (),
            )
            .await
            .unwrap();

        let conv = store.get_conversation("v1").await.unwrap().unwrap();
        assert_eq!(conv.subject.as_deref(), Some("Hello"));
        let channel = conv.channel.unwrap();
        assert_eq!(channel.name, "main");
        assert_eq!(channel.effective_config()["smtp_host"], "smtp.example.com");

        // Dangling channel reference degrades to no channel.
        let conv = store.get_conversation("v2").await.unwrap().unwrap();
        assert!(conv.channel.is_none());

        assert!(store.get_conversation("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn legacy_lookup_returns_column_map() {
        let store = LibSqlStore::new_memory().await.unwrap();
        store
            .conn()
            .execute(
                "INSERT INTO email_channels \
                 (id, name, channel_type, smtp_host, smtp_port, smtp_username, smtp_password, use_tls, email) \
                 VALUES ('e1', 'legacy', 'email', 'mail.old.com', 465, 'u', 'p', 1, 'old@x.com')",
                (),
            )
            .await
            .unwrap();

        let map = store.get_legacy_channel_by_name("legacy").await.unwrap().unwrap();
        assert_eq!(map["smtp_host"], "mail.old.com");
        assert_eq!(map["smtp_port"], 465);
        assert_eq!(map["use_tls"], true);
        assert_eq!(map["email"], "old@x.com");

        assert!(store.get_legacy_channel_by_id("e9").await.unwrap().is_none());
    }
}
