//! End-to-end delivery pipeline tests against an in-memory store and a
//! recording mailer, no real SMTP traffic.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use outbox_worker::config::SmtpOverride;
use outbox_worker::delivery::{DEFAULT_SUBJECT, DeliveryExecutor, DeliveryOutcome};
use outbox_worker::error::DeliveryError;
use outbox_worker::resolver::ChannelResolver;
use outbox_worker::store::model::CanonicalChannel;
use outbox_worker::store::{LibSqlStore, Message, MessageStatus, MessageStore};
use outbox_worker::transport::{Mailer, MailerFactory, OutboundEmail};

/// Everything a test wants to inspect about the send path.
#[derive(Default)]
struct SendLog {
    /// Channels handed to the factory.
    channels: Vec<CanonicalChannel>,
    /// Mails that were sent.
    mails: Vec<OutboundEmail>,
}

struct RecordingMailer {
    log: Arc<Mutex<SendLog>>,
    provider_id: String,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, mail: &OutboundEmail) -> Result<String, DeliveryError> {
        self.log.lock().unwrap().mails.push(mail.clone());
        Ok(self.provider_id.clone())
    }
}

struct RecordingFactory {
    log: Arc<Mutex<SendLog>>,
    provider_id: String,
}

impl MailerFactory for RecordingFactory {
    fn build(&self, channel: &CanonicalChannel) -> Option<Arc<dyn Mailer>> {
        channel.host.as_ref()?;
        self.log.lock().unwrap().channels.push(channel.clone());
        Some(Arc::new(RecordingMailer {
            log: Arc::clone(&self.log),
            provider_id: self.provider_id.clone(),
        }))
    }
}

struct Harness {
    store: Arc<LibSqlStore>,
    executor: DeliveryExecutor,
    log: Arc<Mutex<SendLog>>,
}

async fn harness(smtp_override: Option<SmtpOverride>, provider_id: &str) -> Harness {
    let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
    let log = Arc::new(Mutex::new(SendLog::default()));
    let resolver = ChannelResolver::new(
        Arc::clone(&store) as Arc<dyn MessageStore>,
        smtp_override,
    );
    let executor = DeliveryExecutor::new(
        Arc::clone(&store) as Arc<dyn MessageStore>,
        resolver,
        Arc::new(RecordingFactory {
            log: Arc::clone(&log),
            provider_id: provider_id.to_string(),
        }),
        "no-reply@example.com".into(),
    );
    Harness {
        store,
        executor,
        log,
    }
}

/// Seed a conversation joined to a current-schema channel.
async fn seed_conversation(store: &LibSqlStore, subject: Option<&str>, config: &str) {
    store
        .conn()
        .execute(
            "INSERT INTO channels (id, name, type, is_active, config) \
             VALUES ('c1', 'main', 'email', 1, ?1)",
            libsql::params![config],
        )
        .await
        .unwrap();
    store
        .conn()
        .execute(
            "INSERT INTO conversations (id, subject, channel_id) VALUES ('v1', ?1, 'c1')",
            libsql::params![match subject {
                Some(s) => libsql::Value::Text(s.to_string()),
                None => libsql::Value::Null,
            }],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn end_to_end_queued_message_becomes_sent() {
    let h = harness(None, "abc123").await;
    seed_conversation(
        &h.store,
        Some("Hello"),
        r#"{"smtp_host":"smtp.example.com","from_email":"team@example.com"}"#,
    )
    .await;

    let mut msg = Message::new_queued("m1", "Hi", json!({"to": "p@x.com"}));
    msg.conversation_id = Some("v1".into());
    h.store.insert_message(&msg).await.unwrap();

    let outcome = h.executor.process(&msg).await;
    assert_eq!(
        outcome,
        DeliveryOutcome::Sent {
            external_id: "abc123".into()
        }
    );

    let row = h.store.get_message("m1").await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Sent);
    assert_eq!(row.external_id.as_deref(), Some("abc123"));
    assert!(row.sent_at.is_some());
    assert_eq!(row.attempts, 1);

    let log = h.log.lock().unwrap();
    let mail = &log.mails[0];
    assert_eq!(mail.to, "p@x.com");
    assert_eq!(mail.from, "team@example.com");
    assert_eq!(mail.subject, "Hello");
    assert_eq!(mail.body, "Hi");
}

#[tokio::test]
async fn global_override_beats_resolvable_channel() {
    let h = harness(
        Some(SmtpOverride {
            host: "override.example.com".into(),
            port: 2525,
            secure: true,
            username: Some("ov-user".into()),
            password: Some("ov-pass".into()),
        }),
        "id-1",
    )
    .await;
    // A perfectly resolvable channel that must nonetheless be ignored.
    seed_conversation(
        &h.store,
        Some("Hello"),
        r#"{"smtp_host":"channel.example.com","from_email":"team@example.com"}"#,
    )
    .await;

    let mut msg = Message::new_queued("m1", "Hi", json!({"to": "p@x.com"}));
    msg.conversation_id = Some("v1".into());
    h.store.insert_message(&msg).await.unwrap();

    assert!(matches!(
        h.executor.process(&msg).await,
        DeliveryOutcome::Sent { .. }
    ));

    let log = h.log.lock().unwrap();
    let channel = &log.channels[0];
    assert_eq!(channel.host.as_deref(), Some("override.example.com"));
    assert_eq!(channel.port, 2525);
    // The override carries no from-address, so the configured default applies.
    assert_eq!(log.mails[0].from, "no-reply@example.com");
}

#[tokio::test]
async fn defaults_apply_without_conversation() {
    let h = harness(
        Some(SmtpOverride {
            host: "smtp.example.com".into(),
            port: 587,
            secure: false,
            username: None,
            password: None,
        }),
        "id-2",
    )
    .await;

    let msg = Message::new_queued("m1", "Hi", json!({"to": "p@x.com"}));
    h.store.insert_message(&msg).await.unwrap();

    assert!(matches!(
        h.executor.process(&msg).await,
        DeliveryOutcome::Sent { .. }
    ));

    let log = h.log.lock().unwrap();
    assert_eq!(log.mails[0].from, "no-reply@example.com");
    assert_eq!(log.mails[0].subject, DEFAULT_SUBJECT);
}

#[tokio::test]
async fn structured_content_uses_text_field() {
    let h = harness(
        Some(SmtpOverride {
            host: "smtp.example.com".into(),
            port: 587,
            secure: false,
            username: None,
            password: None,
        }),
        "id-3",
    )
    .await;

    let msg = Message::new_queued(
        "m1",
        r#"{"text":"Structured body","html":"<p>ignored</p>"}"#,
        json!({"to": "p@x.com"}),
    );
    h.store.insert_message(&msg).await.unwrap();

    assert!(matches!(
        h.executor.process(&msg).await,
        DeliveryOutcome::Sent { .. }
    ));
    assert_eq!(h.log.lock().unwrap().mails[0].body, "Structured body");
}

#[tokio::test]
async fn recipient_falls_back_to_from_address() {
    let h = harness(
        Some(SmtpOverride {
            host: "smtp.example.com".into(),
            port: 587,
            secure: false,
            username: None,
            password: None,
        }),
        "id-4",
    )
    .await;

    let msg = Message::new_queued("m1", "Hi", json!({"from": "sender@x.com"}));
    h.store.insert_message(&msg).await.unwrap();

    assert!(matches!(
        h.executor.process(&msg).await,
        DeliveryOutcome::Sent { .. }
    ));
    assert_eq!(h.log.lock().unwrap().mails[0].to, "sender@x.com");
}

#[tokio::test]
async fn found_channel_without_smtp_config_fails_delivery() {
    let h = harness(None, "id-5").await;
    // Current-schema channel row whose config carries no SMTP settings. A
    // legacy row under the same name exists but is never consulted: the
    // found current row is final.
    seed_conversation(&h.store, None, r#"{"theme":"dark"}"#).await;
    h.store
        .conn()
        .execute(
            "INSERT INTO email_channels (id, name, channel_type, smtp_host, smtp_port, use_tls, email) \
             VALUES ('e1', 'main', 'email', 'legacy.example.com', 465, 1, 'legacy@example.com')",
            (),
        )
        .await
        .unwrap();

    let mut msg = Message::new_queued("m1", "Hi", json!({"to": "p@x.com"}));
    msg.conversation_id = Some("v1".into());
    h.store.insert_message(&msg).await.unwrap();

    assert_eq!(h.executor.process(&msg).await, DeliveryOutcome::Failed);

    let row = h.store.get_message("m1").await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Failed);
    assert_eq!(row.error.as_deref(), Some("No SMTP configuration"));
    assert!(h.log.lock().unwrap().mails.is_empty());
}

#[tokio::test]
async fn unresolvable_channel_fails_terminally() {
    let h = harness(None, "id-6").await;

    let msg = Message::new_queued("m1", "Hi", json!({"to": "p@x.com"}));
    h.store.insert_message(&msg).await.unwrap();

    assert_eq!(h.executor.process(&msg).await, DeliveryOutcome::Failed);

    let row = h.store.get_message("m1").await.unwrap().unwrap();
    assert_eq!(row.status, MessageStatus::Failed);
    assert_eq!(row.error.as_deref(), Some("No SMTP configuration"));
    assert!(h.log.lock().unwrap().mails.is_empty());
}
