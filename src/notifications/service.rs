use std::time::Duration;
use tracing::{error, info, warn};

use super::models::AlertMessage;
use super::senders::{email::EmailSender, teams::TeamsSender, NotificationSender, SenderError};
use crate::server::config::MonitorConfig;

/// What happened to one dispatch. Informational only; callers never treat a
/// failed delivery as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { channel: String },
    Failed { attempted: Vec<String> },
    NoChannels,
}

/// Ordered list of channels tried until one accepts the alert.
pub struct NotificationService {
    senders: Vec<Box<dyn NotificationSender>>,
}

impl NotificationService {
    pub fn new(senders: Vec<Box<dyn NotificationSender>>) -> Self {
        Self { senders }
    }

    /// Teams first (when enabled and a webhook URL is set), then email (when enabled).
    pub fn from_config(config: &MonitorConfig) -> Result<Self, SenderError> {
        let mut senders: Vec<Box<dyn NotificationSender>> = Vec::new();

        if config.teams.enabled && !config.teams.webhook_url.trim().is_empty() {
            info!("Adding Teams notification channel");
            senders.push(Box::new(TeamsSender::new(
                config.teams.webhook_url.clone(),
                Duration::from_secs(config.teams.timeout_seconds),
                config.app_name.clone(),
                config.check_now_url.clone(),
            )?));
        }

        if config.email.enabled {
            info!("Adding email notification channel");
            senders.push(Box::new(EmailSender::new(config.email.clone())));
        }

        Ok(Self::new(senders))
    }

    pub fn channel_names(&self) -> Vec<&str> {
        self.senders.iter().map(|s| s.name()).collect()
    }

    /// Best-effort delivery: failures are logged and the next channel is tried.
    pub async fn dispatch(&self, message: &AlertMessage) -> DispatchOutcome {
        if self.senders.is_empty() {
            warn!(title = %message.title, "Both Teams and email notifications are disabled; no alert was sent.");
            return DispatchOutcome::NoChannels;
        }

        let mut attempted = Vec::with_capacity(self.senders.len());
        for sender in &self.senders {
            attempted.push(sender.name().to_string());
            match sender.send(message).await {
                Ok(()) => {
                    info!(channel = sender.name(), "Alert notification sent successfully.");
                    return DispatchOutcome::Delivered {
                        channel: sender.name().to_string(),
                    };
                }
                Err(e) => {
                    error!(channel = sender.name(), error = %e, "Failed to send alert notification.");
                }
            }
        }

        DispatchOutcome::Failed { attempted }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts calls and either accepts or rejects every alert.
    pub(crate) struct RecordingSender {
        name: &'static str,
        succeed: bool,
        delay: Option<std::time::Duration>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl RecordingSender {
        pub(crate) fn new(name: &'static str, succeed: bool) -> (Self, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Self {
                    name,
                    succeed,
                    delay: None,
                    calls: calls.clone(),
                },
                calls,
            )
        }

        /// Counts the call, then waits before answering, like a slow webhook.
        pub(crate) fn with_delay(mut self, delay: std::time::Duration) -> Self {
            self.delay = Some(delay);
            self
        }
    }

    #[async_trait]
    impl NotificationSender for RecordingSender {
        fn name(&self) -> &str {
            self.name
        }

        async fn send(&self, _message: &AlertMessage) -> Result<(), SenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.succeed {
                Ok(())
            } else {
                Err(SenderError::SendFailed(format!("{} is down", self.name)))
            }
        }
    }

    fn alert() -> AlertMessage {
        AlertMessage::new("title", "body")
    }

    #[tokio::test]
    async fn test_primary_success_skips_secondary() {
        let (teams, teams_calls) = RecordingSender::new("teams", true);
        let (email, email_calls) = RecordingSender::new("email", true);
        let service = NotificationService::new(vec![Box::new(teams), Box::new(email)]);

        let outcome = service.dispatch(&alert()).await;
        assert_eq!(outcome, DispatchOutcome::Delivered { channel: "teams".to_string() });
        assert_eq!(teams_calls.load(Ordering::SeqCst), 1);
        assert_eq!(email_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_primary_failure_falls_back() {
        let (teams, _) = RecordingSender::new("teams", false);
        let (email, email_calls) = RecordingSender::new("email", true);
        let service = NotificationService::new(vec![Box::new(teams), Box::new(email)]);

        let outcome = service.dispatch(&alert()).await;
        assert_eq!(outcome, DispatchOutcome::Delivered { channel: "email".to_string() });
        assert_eq!(email_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_channels_fail() {
        let (teams, _) = RecordingSender::new("teams", false);
        let (email, _) = RecordingSender::new("email", false);
        let service = NotificationService::new(vec![Box::new(teams), Box::new(email)]);

        let outcome = service.dispatch(&alert()).await;
        assert_eq!(
            outcome,
            DispatchOutcome::Failed {
                attempted: vec!["teams".to_string(), "email".to_string()]
            }
        );
    }

    #[tokio::test]
    async fn test_no_channels() {
        let service = NotificationService::new(Vec::new());
        assert_eq!(service.dispatch(&alert()).await, DispatchOutcome::NoChannels);
    }
}
