//! Mail transport: SMTP sending via lettre behind a `Mailer` seam.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use tracing::warn;
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::store::model::CanonicalChannel;

/// One outbound email, fully composed.
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// A reusable mail-sending handle. Returns the provider-assigned message id.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, mail: &OutboundEmail) -> Result<String, DeliveryError>;
}

/// Builds a `Mailer` from a canonical channel record.
///
/// `None` means no usable transport; callers must treat that as a hard
/// failure for the message, not an exception.
pub trait MailerFactory: Send + Sync {
    fn build(&self, channel: &CanonicalChannel) -> Option<Arc<dyn Mailer>>;
}

// ── SMTP implementation ─────────────────────────────────────────────

/// lettre-backed mailer.
pub struct SmtpMailer {
    transport: SmtpTransport,
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, mail: &OutboundEmail) -> Result<String, DeliveryError> {
        let message_id = format!("<{}@outbox-worker>", Uuid::new_v4());

        let email = Message::builder()
            .from(mail.from.parse().map_err(|e| DeliveryError::Transport {
                reason: format!("Invalid from address: {e}"),
            })?)
            .to(mail.to.parse().map_err(|e| DeliveryError::Transport {
                reason: format!("Invalid to address: {e}"),
            })?)
            .subject(&mail.subject)
            .message_id(Some(message_id.clone()))
            .body(mail.body.clone())
            .map_err(|e| DeliveryError::Transport {
                reason: format!("Failed to build email: {e}"),
            })?;

        self.transport
            .send(&email)
            .map_err(|e| DeliveryError::Transport {
                reason: format!("SMTP send failed: {e}"),
            })?;

        Ok(message_id)
    }
}

/// Factory producing lettre SMTP mailers from canonical channel records.
pub struct SmtpMailerFactory;

impl MailerFactory for SmtpMailerFactory {
    fn build(&self, channel: &CanonicalChannel) -> Option<Arc<dyn Mailer>> {
        let host = channel.host.as_deref()?;

        // secure ⇒ implicit TLS; otherwise STARTTLS on the submission port.
        let builder = if channel.secure {
            SmtpTransport::relay(host)
        } else {
            SmtpTransport::starttls_relay(host)
        };

        let mut builder = match builder {
            Ok(b) => b,
            Err(e) => {
                warn!(host = %host, "SMTP relay setup failed: {e}");
                return None;
            }
        };

        builder = builder.port(channel.port);

        if let Some(username) = channel.username.as_deref().filter(|u| !u.is_empty()) {
            builder = builder.credentials(Credentials::new(
                username.to_string(),
                channel.password.clone().unwrap_or_default(),
            ));
        }

        Some(Arc::new(SmtpMailer {
            transport: builder.build(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_requires_host() {
        let factory = SmtpMailerFactory;
        assert!(factory.build(&CanonicalChannel::default()).is_none());
    }

    #[test]
    fn build_with_host_succeeds() {
        let factory = SmtpMailerFactory;
        let channel = CanonicalChannel {
            host: Some("smtp.example.com".into()),
            port: 587,
            username: Some("user".into()),
            password: Some("pass".into()),
            secure: false,
            from_email: Some("x@example.com".into()),
        };
        assert!(factory.build(&channel).is_some());
    }

    #[test]
    fn build_with_secure_flag_succeeds() {
        let factory = SmtpMailerFactory;
        let channel = CanonicalChannel {
            host: Some("smtp.example.com".into()),
            secure: true,
            ..CanonicalChannel::default()
        };
        assert!(factory.build(&channel).is_some());
    }
}
