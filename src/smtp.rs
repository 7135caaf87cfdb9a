//! Mail delivery over SMTP
//!
//! [`MailSender`] is the outgoing seam used by `send_email` and the reply
//! composer. Every failure is reported as a failed [`DeliveryResult`] rather
//! than an error: the caller always gets a renderable outcome.

use std::future::Future;
use std::time::Duration;

use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MessageBuilder};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use secrecy::ExposeSecret;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::errors::{AppError, AppResult};
use crate::models::{DeliveryResult, OutgoingMessage};

/// Outgoing mail collaborator
pub trait MailSender: Send + Sync {
    /// Deliver a message; failures are encoded in the result
    fn send(&self, message: OutgoingMessage) -> impl Future<Output = DeliveryResult> + Send;
}

/// [`MailSender`] over an authenticated SMTP relay
pub struct SmtpSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl std::fmt::Debug for SmtpSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSender")
            .field("from", &"[REDACTED]")
            .finish()
    }
}

impl SmtpSender {
    /// Build the transport from config
    ///
    /// Port 465 uses implicit TLS; any other port negotiates STARTTLS.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the SMTP host or the From address is invalid
    pub fn from_config(config: &ServerConfig) -> AppResult<Self> {
        let builder = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        }
        .map_err(|e| AppError::InvalidInput(format!("invalid SMTP host '{}': {e}", config.smtp_host)))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.user.clone(),
                config.pass.expose_secret().to_owned(),
            ))
            .timeout(Some(Duration::from_millis(config.socket_timeout_ms)))
            .build();

        let address: Address = config
            .user
            .parse()
            .map_err(|e| AppError::InvalidInput(format!("MAIL_USER is not an email address: {e}")))?;

        Ok(Self {
            transport,
            from: Mailbox::new(config.from_name.clone(), address),
        })
    }

    fn build(&self, message: &OutgoingMessage, message_id: &str) -> Result<lettre::Message, String> {
        let builder = lettre::Message::builder()
            .from(self.from.clone())
            .message_id(Some(message_id.to_owned()));
        let builder = add_recipients(builder, message)?;
        let builder = apply_threading(builder, message)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN);
        builder
            .body(message.body.clone())
            .map_err(|e| format!("failed to build email: {e}"))
    }
}

impl MailSender for SmtpSender {
    async fn send(&self, message: OutgoingMessage) -> DeliveryResult {
        let message_id = new_message_id(&self.from.email);
        let email = match self.build(&message, &message_id) {
            Ok(email) => email,
            Err(reason) => return DeliveryResult::failure(reason),
        };

        match self.transport.send(email).await {
            Ok(_) => {
                tracing::info!(
                    recipients = message.to.len(),
                    reply = message.in_reply_to.is_some(),
                    "email sent"
                );
                let status = if message.in_reply_to.is_some() {
                    format!("Reply sent to {}", message.to.join(", "))
                } else {
                    format!("Email sent to {}", message.to.join(", "))
                };
                DeliveryResult::sent(message_id, status)
            }
            Err(e) => {
                tracing::warn!(error = %e, "SMTP delivery failed");
                DeliveryResult::failure(format!("SMTP delivery failed: {e}"))
            }
        }
    }
}

fn add_recipients(
    mut builder: MessageBuilder,
    message: &OutgoingMessage,
) -> Result<MessageBuilder, String> {
    if message.to.is_empty() {
        return Err("at least one recipient is required".to_owned());
    }
    for addr in &message.to {
        builder = builder.to(parse_mailbox(addr)?);
    }
    for addr in &message.cc {
        builder = builder.cc(parse_mailbox(addr)?);
    }
    for addr in &message.bcc {
        builder = builder.bcc(parse_mailbox(addr)?);
    }
    Ok(builder)
}

/// Set `In-Reply-To` and a single space-joined `References` header
fn apply_threading(mut builder: MessageBuilder, message: &OutgoingMessage) -> MessageBuilder {
    if let Some(in_reply_to) = &message.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
    }
    if !message.references.is_empty() {
        builder = builder.references(message.references.join(" "));
    }
    builder
}

fn parse_mailbox(value: &str) -> Result<Mailbox, String> {
    value
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| format!("invalid address '{value}': {e}"))
}

/// Fresh `<uuid@domain>` Message-ID in the sender's domain
fn new_message_id(from: &Address) -> String {
    format!("<{}@{}>", Uuid::new_v4(), from.domain())
}

#[cfg(test)]
mod tests {
    use lettre::Address;

    use super::{new_message_id, parse_mailbox};

    #[test]
    fn message_id_uses_sender_domain() {
        let from: Address = "me@example.com".parse().expect("valid address");
        let id = new_message_id(&from);
        assert!(id.starts_with('<'));
        assert!(id.ends_with("@example.com>"));
    }

    #[test]
    fn parses_named_and_bare_addresses() {
        assert_eq!(
            parse_mailbox("Jane <jane@example.com>")
                .expect("valid")
                .email
                .to_string(),
            "jane@example.com"
        );
        assert!(parse_mailbox("not an address").is_err());
    }
}
