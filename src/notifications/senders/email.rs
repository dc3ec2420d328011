//! SMTP delivery with a connection-strategy fallback ladder.
//!
//! The configured host/port/TLS mode is tried first, followed by the usual
//! STARTTLS/587 and implicit TLS/465 endpoints. Authentication failures stop
//! the ladder immediately; any other failure moves on to the next candidate.
use async_trait::async_trait;
use chrono::Local;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::{Category, Severity};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{NotificationSender, SenderError};
use crate::notifications::models::AlertMessage;
use crate::server::config::EmailSettings;

pub const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// TLS from the first byte (SMTPS, usually port 465).
    ImplicitTls,
    /// Plain connection upgraded with STARTTLS (usually port 587).
    StartTls,
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::ImplicitTls => write!(f, "SSL"),
            TransportMode::StartTls => write!(f, "TLS"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpCandidate {
    pub mode: TransportMode,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct EmailEnvelope {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    /// RFC 2822 date in local time.
    pub date: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmtpFailure {
    /// Credentials were rejected; no other endpoint will accept them either.
    Authentication(String),
    /// Timeout, refused connection or dropped session.
    Connection(String),
    Transport(String),
}

impl fmt::Display for SmtpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtpFailure::Authentication(msg) => write!(f, "authentication failed: {msg}"),
            SmtpFailure::Connection(msg) => write!(f, "connection failed: {msg}"),
            SmtpFailure::Transport(msg) => write!(f, "{msg}"),
        }
    }
}

/// Performs one delivery attempt against one candidate endpoint.
#[async_trait]
pub trait SmtpConnector: Send + Sync {
    async fn deliver(
        &self,
        candidate: &SmtpCandidate,
        envelope: &EmailEnvelope,
        timeout: Duration,
    ) -> Result<(), SmtpFailure>;
}

/// Builds the ordered attempt list: the configured endpoint, then STARTTLS/587
/// and implicit TLS/465 unless an attempt with that mode and port already exists.
pub fn build_candidates(settings: &EmailSettings) -> Vec<SmtpCandidate> {
    let host = if settings.smtp_host.trim().is_empty() {
        DEFAULT_SMTP_HOST.to_string()
    } else {
        settings.smtp_host.trim().to_string()
    };
    let mode = if settings.use_ssl {
        TransportMode::ImplicitTls
    } else {
        TransportMode::StartTls
    };

    let mut candidates = vec![SmtpCandidate {
        mode,
        host: host.clone(),
        port: settings.smtp_port,
    }];
    for (mode, port) in [(TransportMode::StartTls, 587), (TransportMode::ImplicitTls, 465)] {
        if !candidates.iter().any(|c| c.mode == mode && c.port == port) {
            candidates.push(SmtpCandidate {
                mode,
                host: host.clone(),
                port,
            });
        }
    }
    candidates
}

pub struct EmailSender {
    settings: EmailSettings,
    connector: Arc<dyn SmtpConnector>,
    attempt_timeout: Duration,
}

impl EmailSender {
    pub fn new(settings: EmailSettings) -> Self {
        let connector = Arc::new(LettreConnector {
            user: settings.smtp_user.clone(),
            password: settings.smtp_password.clone(),
        });
        Self::with_connector(settings, connector)
    }

    pub fn with_connector(settings: EmailSettings, connector: Arc<dyn SmtpConnector>) -> Self {
        Self {
            settings,
            connector,
            attempt_timeout: ATTEMPT_TIMEOUT,
        }
    }

    fn envelope(&self, message: &AlertMessage) -> EmailEnvelope {
        EmailEnvelope {
            from: self.settings.sender.clone(),
            to: self.settings.recipients.clone(),
            subject: message.plain_title(),
            body: message.plain_body(),
            date: Local::now().to_rfc2822(),
        }
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    fn name(&self) -> &str {
        "email"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), SenderError> {
        if self.settings.recipients.is_empty() {
            return Err(SenderError::InvalidConfiguration("no mail recipients configured".to_string()));
        }

        let envelope = self.envelope(message);
        let mut last_failure: Option<SmtpFailure> = None;

        for candidate in build_candidates(&self.settings) {
            info!(mode = %candidate.mode, host = %candidate.host, port = candidate.port, "Trying SMTP endpoint.");

            let attempt = tokio::time::timeout(
                self.attempt_timeout,
                self.connector.deliver(&candidate, &envelope, self.attempt_timeout),
            )
            .await
            .unwrap_or_else(|_| Err(SmtpFailure::Connection(format!("timed out after {:?}", self.attempt_timeout))));

            match attempt {
                Ok(()) => {
                    info!(recipients = ?envelope.to, host = %candidate.host, port = candidate.port, "Email alert sent.");
                    return Ok(());
                }
                Err(SmtpFailure::Authentication(reason)) => {
                    return Err(SenderError::Authentication {
                        host: candidate.host,
                        port: candidate.port,
                        reason,
                    });
                }
                Err(failure) => {
                    warn!(
                        mode = %candidate.mode,
                        host = %candidate.host,
                        port = candidate.port,
                        error = %failure,
                        "SMTP attempt failed, trying next endpoint."
                    );
                    last_failure = Some(failure);
                }
            }
        }

        let detail = match last_failure {
            Some(failure) => format!("Last error: {failure}"),
            None => "Unknown error".to_string(),
        };
        Err(SenderError::AllAttemptsFailed(detail))
    }
}

/// Real SMTP delivery through lettre's tokio transport.
pub struct LettreConnector {
    user: String,
    password: String,
}

impl LettreConnector {
    fn build_message(envelope: &EmailEnvelope) -> Result<Message, SmtpFailure> {
        let from: Mailbox = envelope
            .from
            .parse()
            .map_err(|e| SmtpFailure::Transport(format!("invalid sender '{}': {e}", envelope.from)))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(envelope.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .raw_header(HeaderValue::new(HeaderName::new_from_ascii_str("Date"), envelope.date.clone()));
        for recipient in &envelope.to {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| SmtpFailure::Transport(format!("invalid recipient '{recipient}': {e}")))?;
            builder = builder.to(mailbox);
        }

        builder
            .body(envelope.body.clone())
            .map_err(|e| SmtpFailure::Transport(format!("failed to build message: {e}")))
    }
}

fn classify(err: lettre::transport::smtp::Error) -> SmtpFailure {
    if let Some(code) = err.status() {
        // 530/534/535: authentication required, too weak or credentials rejected.
        if code.severity == Severity::PermanentNegativeCompletion && code.category == Category::Unspecified3 {
            return SmtpFailure::Authentication(err.to_string());
        }
        return SmtpFailure::Transport(err.to_string());
    }
    if err.is_timeout() || !(err.is_client() || err.is_response()) {
        return SmtpFailure::Connection(err.to_string());
    }
    SmtpFailure::Transport(err.to_string())
}

#[async_trait]
impl SmtpConnector for LettreConnector {
    async fn deliver(
        &self,
        candidate: &SmtpCandidate,
        envelope: &EmailEnvelope,
        timeout: Duration,
    ) -> Result<(), SmtpFailure> {
        let message = Self::build_message(envelope)?;

        let builder = match candidate.mode {
            TransportMode::ImplicitTls => AsyncSmtpTransport::<Tokio1Executor>::relay(&candidate.host),
            TransportMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&candidate.host),
        }
        .map_err(classify)?;

        let mut builder = builder.port(candidate.port).timeout(Some(timeout));
        if !self.user.is_empty() {
            builder = builder.credentials(Credentials::new(self.user.clone(), self.password.clone()));
        }

        builder.build().send(message).await.map(|_| ()).map_err(classify)
    }
}
