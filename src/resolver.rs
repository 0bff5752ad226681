//! Channel resolution: normalizes divergent channel schemas into one
//! canonical shape and picks the delivery configuration for a message.
//!
//! Resolution walks an explicit ordered strategy list; the first strategy
//! that yields a result wins:
//! 1. global SMTP override (environment-level, bypasses channels entirely)
//! 2. inline config on the conversation's joined channel
//! 3. channel lookup by the joined channel's name

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::config::SmtpOverride;
use crate::store::model::{CanonicalChannel, Conversation};
use crate::store::traits::MessageStore;

// ── Normalization ───────────────────────────────────────────────────

/// First non-empty string value among `keys`.
fn str_field(cfg: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| cfg.get(k))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// First usable port value among `keys`; accepts numbers and numeric
/// strings, defaults to 587.
fn port_field(cfg: &Value, keys: &[&str]) -> u16 {
    keys.iter()
        .filter_map(|k| cfg.get(k))
        .find_map(|v| match v {
            Value::Number(n) => n.as_u64().and_then(|n| u16::try_from(n).ok()),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
        .unwrap_or(587)
}

/// TLS flag: `use_tls` wins when present (bool or `"true"`), else a
/// boolean-coerced `secure`.
fn secure_field(cfg: &Value) -> bool {
    match cfg.get("use_tls") {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s == "true",
        Some(_) | None => match cfg.get("secure") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s == "true",
            _ => false,
        },
    }
}

/// Normalize a current-schema config object (the `config`/`configuration`
/// JSON on a `channels` row, including the inline case).
pub fn normalize_current(cfg: &Value) -> CanonicalChannel {
    CanonicalChannel {
        host: str_field(cfg, &["smtp_host", "smtp_server", "host"]),
        port: port_field(cfg, &["smtp_port", "port"]),
        username: str_field(cfg, &["smtp_username", "username", "user"]),
        password: str_field(cfg, &["smtp_password", "password"]),
        secure: secure_field(cfg),
        from_email: str_field(cfg, &["from_email", "email", "from"]),
    }
}

/// Normalize a legacy `email_channels` row (read back as a column map).
/// The legacy host chain adds `server`, and the from-address historically
/// lived in `email` first.
pub fn normalize_legacy(row: &Value) -> CanonicalChannel {
    CanonicalChannel {
        host: str_field(row, &["smtp_host", "host", "server"]),
        port: port_field(row, &["smtp_port", "port"]),
        username: str_field(row, &["smtp_username", "username", "user"]),
        password: str_field(row, &["smtp_password", "password"]),
        secure: secure_field(row),
        from_email: str_field(row, &["email", "from_email", "from"]),
    }
}

/// Whether an inline config object carries enough SMTP-like fields to be
/// used directly, without a named-channel lookup.
fn has_inline_smtp_fields(cfg: &Value) -> bool {
    ["smtp_host", "smtp_server", "host", "smtp_username", "smtp_password"]
        .iter()
        .any(|k| cfg.get(k).and_then(Value::as_str).is_some_and(|s| !s.is_empty()))
}

impl From<&SmtpOverride> for CanonicalChannel {
    fn from(ov: &SmtpOverride) -> Self {
        Self {
            host: Some(ov.host.clone()),
            port: ov.port,
            username: ov.username.clone(),
            password: ov.password.clone(),
            secure: ov.secure,
            from_email: None,
        }
    }
}

// ── Resolver ────────────────────────────────────────────────────────

/// One step of the per-message resolution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    GlobalOverride,
    InlineChannelConfig,
    ChannelByName,
}

/// Evaluated top to bottom; the first non-empty result wins.
const RESOLUTION_ORDER: &[Strategy] = &[
    Strategy::GlobalOverride,
    Strategy::InlineChannelConfig,
    Strategy::ChannelByName,
];

/// Resolves delivery configuration from the channel tables.
pub struct ChannelResolver {
    store: Arc<dyn MessageStore>,
    smtp_override: Option<SmtpOverride>,
}

impl ChannelResolver {
    pub fn new(store: Arc<dyn MessageStore>, smtp_override: Option<SmtpOverride>) -> Self {
        Self {
            store,
            smtp_override,
        }
    }

    /// Look up a channel by id: current table first, legacy table only on
    /// miss or error. A found current row is final even when it normalizes
    /// to no host; that surfaces downstream as "no SMTP configuration".
    pub async fn resolve_channel_by_id(&self, id: &str) -> Option<CanonicalChannel> {
        match self.store.get_channel_by_id(id).await {
            Ok(Some(row)) => return Some(normalize_current(&row.effective_config())),
            Ok(None) => {}
            Err(e) => warn!(channel = %id, "Error loading channel: {e}"),
        }

        match self.store.get_legacy_channel_by_id(id).await {
            Ok(Some(row)) => Some(normalize_legacy(&row)),
            Ok(None) => None,
            Err(e) => {
                warn!(channel = %id, "Error loading legacy channel: {e}");
                None
            }
        }
    }

    /// Look up a channel by name: current table first, legacy table only on
    /// miss or error.
    pub async fn resolve_channel_by_name(&self, name: &str) -> Option<CanonicalChannel> {
        match self.store.get_channel_by_name(name).await {
            Ok(Some(row)) => return Some(normalize_current(&row.effective_config())),
            Ok(None) => {}
            Err(e) => warn!(channel = %name, "Error loading channel: {e}"),
        }

        match self.store.get_legacy_channel_by_name(name).await {
            Ok(Some(row)) => Some(normalize_legacy(&row)),
            Ok(None) => None,
            Err(e) => {
                warn!(channel = %name, "Error loading legacy channel: {e}");
                None
            }
        }
    }

    /// Resolve the delivery configuration for one message, given its
    /// (optionally joined) conversation.
    pub async fn resolve_for_message(
        &self,
        conversation: Option<&Conversation>,
    ) -> Option<CanonicalChannel> {
        for strategy in RESOLUTION_ORDER {
            if let Some(channel) = self.apply(*strategy, conversation).await {
                debug!(?strategy, "Channel resolved");
                return Some(channel);
            }
        }
        None
    }

    async fn apply(
        &self,
        strategy: Strategy,
        conversation: Option<&Conversation>,
    ) -> Option<CanonicalChannel> {
        match strategy {
            Strategy::GlobalOverride => {
                self.smtp_override.as_ref().map(CanonicalChannel::from)
            }
            Strategy::InlineChannelConfig => {
                let channel = conversation?.channel.as_ref()?;
                let cfg = channel.effective_config();
                if has_inline_smtp_fields(&cfg) {
                    Some(normalize_current(&cfg))
                } else {
                    None
                }
            }
            Strategy::ChannelByName => {
                let channel = conversation?.channel.as_ref()?;
                self.resolve_channel_by_name(&channel.name).await
            }
        }
    }
}
