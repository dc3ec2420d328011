use async_trait::async_trait;
use thiserror::Error;

use super::models::AlertMessage;

pub mod email;
pub mod teams;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Failed to send notification: {0}")]
    SendFailed(String),
    #[error("Invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
    #[error("SMTP authentication failed on {host}:{port}: {reason}")]
    Authentication { host: String, port: u16, reason: String },
    #[error("SMTP connection failed for all attempts. {0}")]
    AllAttemptsFailed(String),
}

/// A single delivery channel for alerts.
/// The Notifier Chain holds these in priority order and stops at the first success.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    /// Short channel name used in logs.
    fn name(&self) -> &str;

    async fn send(&self, message: &AlertMessage) -> Result<(), SenderError>;
}
