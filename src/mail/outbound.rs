//! Outbound mail: message building, transports, and the dispatcher.
//!
//! Every message is built and validated. It only reaches a transport when
//! sending is enabled for the deployment.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MessageBuilder};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, Message, SmtpTransport, Transport};
use secrecy::ExposeSecret;

use crate::config::{MailSettings, SmtpConfig};
use crate::error::MailError;
use crate::mail::address::{self, Recipients};

/// Message body; HTML for notifications, plain text for escalations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MailBody {
    Html(String),
    Text(String),
}

/// An email as requested by the application, before address rewriting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub subject: String,
    pub body: MailBody,
    /// Message-Id of the mail this one follows up on.
    pub references: Option<String>,
    pub reply_to: Option<String>,
    /// Person on whose behalf the mail is sent.
    pub from_user: Option<String>,
}

impl OutboundEmail {
    pub fn new(to: impl Into<String>, subject: impl Into<String>, body: MailBody) -> Self {
        Self {
            to: vec![to.into()],
            cc: Vec::new(),
            subject: subject.into(),
            body,
            references: None,
            reply_to: None,
            from_user: None,
        }
    }
}

/// Outcome of a dispatch.
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub recipients: Recipients,
    pub message: Message,
    /// Whether the message was handed to the transport.
    pub sent: bool,
}

fn parse_mailbox(addr: &str) -> Result<Mailbox, MailError> {
    addr.trim()
        .parse::<Mailbox>()
        .map_err(|e| MailError::InvalidAddress {
            address: addr.to_string(),
            reason: e.to_string(),
        })
}

/// Sender mailbox, optionally "on behalf of" `from_user`.
pub fn sender_mailbox(settings: &MailSettings, from_user: Option<&str>) -> Result<Mailbox, MailError> {
    let (name, addr) = match from_user {
        Some(user) => {
            let local = user.split('@').next().unwrap_or(user);
            (
                format!("{user} via {}", settings.sender_name),
                format!("admin+{local}@{}.{}", settings.app_id, settings.mail_domain),
            )
        }
        None => (settings.sender_name.clone(), settings.sender_address()),
    };

    let address: Address = addr.parse().map_err(|e: lettre::address::AddressError| {
        MailError::InvalidAddress {
            address: addr.clone(),
            reason: e.to_string(),
        }
    })?;
    Ok(Mailbox::new(Some(name), address))
}

/// Build the lettre message for `email` addressed to `recipients`.
pub fn build_message(
    email: &OutboundEmail,
    recipients: &Recipients,
    settings: &MailSettings,
) -> Result<Message, MailError> {
    let mut builder: MessageBuilder = Message::builder()
        .from(sender_mailbox(settings, email.from_user.as_deref())?)
        .subject(email.subject.clone());

    for to in &recipients.to {
        builder = builder.to(parse_mailbox(to)?);
    }
    for cc in &recipients.cc {
        builder = builder.cc(parse_mailbox(cc)?);
    }
    if let Some(reply_to) = &email.reply_to {
        builder = builder.reply_to(parse_mailbox(reply_to)?);
    }
    if let Some(refs) = &email.references {
        builder = builder.in_reply_to(refs.clone()).references(refs.clone());
    }

    let (content_type, body) = match &email.body {
        MailBody::Html(html) => (ContentType::TEXT_HTML, html.clone()),
        MailBody::Text(text) => (ContentType::TEXT_PLAIN, text.clone()),
    };

    builder
        .header(content_type)
        .body(body)
        .map_err(|e| MailError::Build(e.to_string()))
}

/// Something that can transmit a built message.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// SMTP relay transport. lettre's transport blocks, so each send runs on the
/// blocking pool.
pub struct SmtpMailTransport {
    transport: SmtpTransport,
}

impl SmtpMailTransport {
    pub fn new(config: &SmtpConfig) -> Result<Self, MailError> {
        let creds = Credentials::new(
            config.username.clone(),
            config.password.expose_secret().to_string(),
        );

        let transport = SmtpTransport::relay(&config.host)
            .map_err(|e| MailError::SendFailed(format!("SMTP relay error: {e}")))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { transport })
    }
}

#[async_trait]
impl MailTransport for SmtpMailTransport {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        let transport = self.transport.clone();
        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| MailError::SendFailed(format!("SMTP task panicked: {e}")))?
            .map_err(|e| MailError::SendFailed(format!("SMTP send failed: {e}")))?;
        Ok(())
    }
}

/// Logs each message's envelope instead of sending it.
pub struct LoggingMailTransport;

#[async_trait]
impl MailTransport for LoggingMailTransport {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        let to: Vec<String> = message.envelope().to().iter().map(|a| a.to_string()).collect();
        tracing::info!(to = ?to, "No SMTP relay configured; mail not transmitted");
        Ok(())
    }
}

/// Keeps transmitted messages in memory instead of sending them.
#[derive(Default)]
pub struct MemoryMailTransport {
    sent: Mutex<Vec<Message>>,
}

impl MemoryMailTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MailTransport for MemoryMailTransport {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        self.sent
            .lock()
            .map_err(|e| MailError::SendFailed(e.to_string()))?
            .push(message);
        Ok(())
    }
}

/// Builds, rewrites, and (when enabled) transmits outbound mail.
#[derive(Clone)]
pub struct MailDispatcher {
    settings: MailSettings,
    transport: Arc<dyn MailTransport>,
}

impl MailDispatcher {
    pub fn new(settings: MailSettings, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            settings,
            transport,
        }
    }

    pub fn settings(&self) -> &MailSettings {
        &self.settings
    }

    /// Send with recipients rewritten for the current deployment.
    pub async fn send(&self, email: &OutboundEmail) -> Result<Dispatched, MailError> {
        let recipients = address::resolve(&email.to, &email.cc, &self.settings);
        self.dispatch(email, recipients).await
    }

    /// Send to exactly the given recipients, with no rewriting.
    pub async fn send_direct(&self, email: &OutboundEmail) -> Result<Dispatched, MailError> {
        let recipients = Recipients {
            to: email.to.clone(),
            cc: email.cc.clone(),
        };
        self.dispatch(email, recipients).await
    }

    async fn dispatch(
        &self,
        email: &OutboundEmail,
        recipients: Recipients,
    ) -> Result<Dispatched, MailError> {
        let message = build_message(email, &recipients, &self.settings)?;

        let sent = if self.settings.send_email {
            self.transport.send(message.clone()).await?;
            true
        } else {
            false
        };

        tracing::info!(
            to = ?recipients.to,
            cc = ?recipients.cc,
            subject = %email.subject,
            sent,
            "Outbound email dispatched"
        );

        Ok(Dispatched {
            recipients,
            message,
            sent,
        })
    }
}
