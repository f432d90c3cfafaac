//! Email notification delivery via SMTP.
//!
//! [`EmailDelivery`] composes notification and batch emails from the
//! [`TemplateRegistry`] and hands them to a [`MailTransport`]. Production
//! uses [`SmtpMailTransport`] (the `lettre` async SMTP transport); tests
//! substitute a recording transport. If `SMTP_HOST` is not set,
//! [`EmailConfig::from_env`] returns `None` and no mailer is constructed.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use tidings_core::config::ActivityConfig;

use super::template::{MailKind, TemplateError, TemplateRegistry};
use super::ChannelMessage;

/// Subject used for batch emails.
pub const BATCH_SUBJECT: &str = "Batch notification";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Error type for email delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// SMTP connection settings.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    /// SMTP server hostname.
    pub smtp_host: String,
    /// SMTP server port (defaults to 587).
    pub smtp_port: u16,
    /// Optional SMTP username.
    pub smtp_user: Option<String>,
    /// Optional SMTP password.
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set, signalling that email
    /// delivery is not configured and should be skipped. Sender and
    /// reply-to addresses come from [`ActivityConfig`].
    ///
    /// | Variable        | Required | Default |
    /// |-----------------|----------|---------|
    /// | `SMTP_HOST`     | yes      | -       |
    /// | `SMTP_PORT`     | no       | `587`   |
    /// | `SMTP_USER`     | no       | -       |
    /// | `SMTP_PASSWORD` | no       | -       |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
        })
    }
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Sends a fully composed message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), EmailError>;
}

/// STARTTLS SMTP relay.
pub struct SmtpMailTransport {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailTransport {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port);

        if let (Some(user), Some(pass)) = (&config.smtp_user, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        Ok(Self {
            mailer: builder.build(),
        })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: Message) -> Result<(), EmailError> {
        self.mailer.send(message).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Batch payload
// ---------------------------------------------------------------------------

/// Template data for one batch email.
#[derive(Debug, Clone, Serialize)]
pub struct BatchMail {
    pub target_type: String,
    pub target_name: String,
    pub key: String,
    pub count: usize,
    pub notifications: Vec<ChannelMessage>,
}

// ---------------------------------------------------------------------------
// EmailDelivery
// ---------------------------------------------------------------------------

/// Composes and sends notification emails.
pub struct EmailDelivery {
    transport: Arc<dyn MailTransport>,
    templates: Arc<TemplateRegistry>,
    sender: String,
    reply_to: Option<String>,
}

impl EmailDelivery {
    pub fn new(
        transport: Arc<dyn MailTransport>,
        templates: Arc<TemplateRegistry>,
        config: &ActivityConfig,
    ) -> Self {
        Self {
            transport,
            templates,
            sender: config.mailer_sender.clone(),
            reply_to: config.mailer_reply_to.clone(),
        }
    }

    /// Subject for a single notification: the `subject` parameter when
    /// present, otherwise `Notification of <printable notifiable type>`.
    pub fn subject_for(message: &ChannelMessage) -> String {
        message
            .parameters
            .get("subject")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| {
                format!(
                    "Notification of {}",
                    message.notifiable_type.to_lowercase()
                )
            })
    }

    /// Build a plain-text message with the configured headers.
    pub fn compose(&self, to: &str, subject: &str, body: String) -> Result<Message, EmailError> {
        let mut builder = Message::builder()
            .from(self.sender.parse::<Mailbox>()?)
            .to(to.parse::<Mailbox>()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        if let Some(reply_to) = &self.reply_to {
            builder = builder.reply_to(reply_to.parse::<Mailbox>()?);
        }
        builder.body(body).map_err(|e| EmailError::Build(e.to_string()))
    }

    /// Send the email for one notification.
    pub async fn deliver(&self, to: &str, message: &ChannelMessage) -> Result<(), EmailError> {
        let body = self.templates.render(
            MailKind::Notification,
            &message.target.entity_type,
            &message.key,
            message,
        )?;
        let subject = Self::subject_for(message);
        let email = self.compose(to, &subject, body)?;
        self.transport.send(email).await?;

        tracing::info!(
            to,
            notification_id = message.notification_id,
            key = %message.key,
            "Notification email sent"
        );
        Ok(())
    }

    /// Send one email summarizing several notifications.
    pub async fn deliver_batch(&self, to: &str, batch: &BatchMail) -> Result<(), EmailError> {
        let body = self
            .templates
            .render(MailKind::Batch, &batch.target_type, &batch.key, batch)?;
        let email = self.compose(to, BATCH_SUBJECT, body)?;
        self.transport.send(email).await?;

        tracing::info!(to, key = %batch.key, count = batch.count, "Batch email sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
