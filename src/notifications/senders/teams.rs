use async_trait::async_trait;
use chrono::Local;
use reqwest::{header, Client};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::{NotificationSender, SenderError};
use crate::notifications::models::AlertMessage;

/// Posts alerts to a Microsoft Teams incoming webhook as a `MessageCard`.
pub struct TeamsSender {
    client: Client,
    webhook_url: String,
    app_name: String,
    check_now_url: String,
}

impl TeamsSender {
    pub fn new(
        webhook_url: impl Into<String>,
        timeout: Duration,
        app_name: impl Into<String>,
        check_now_url: impl Into<String>,
    ) -> Result<Self, SenderError> {
        let webhook_url = webhook_url.into();
        if webhook_url.trim().is_empty() {
            return Err(SenderError::InvalidConfiguration(
                "Teams webhook URL not configured".to_string(),
            ));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SenderError::InvalidConfiguration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            webhook_url,
            app_name: app_name.into(),
            check_now_url: check_now_url.into(),
        })
    }

    fn build_card(&self, message: &AlertMessage) -> Value {
        let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        let mut facts: Vec<Value> = message
            .facts
            .iter()
            .map(|f| json!({ "name": f.name, "value": f.value }))
            .collect();
        facts.push(json!({ "name": "Time", "value": now }));

        json!({
            "@type": "MessageCard",
            "@context": "http://schema.org/extensions",
            "themeColor": "0076D7",
            "summary": message.title,
            "sections": [{
                "activityTitle": message.title,
                "activitySubtitle": format!("{} - {}", self.app_name, now),
                "text": message.body,
                "facts": facts,
            }],
            "potentialAction": [{
                "@type": "OpenUri",
                "name": "Check Database",
                "targets": [{ "os": "default", "uri": self.check_now_url }],
            }],
        })
    }
}

#[async_trait]
impl NotificationSender for TeamsSender {
    fn name(&self) -> &str {
        "teams"
    }

    async fn send(&self, message: &AlertMessage) -> Result<(), SenderError> {
        let card = self.build_card(message);
        let response = self
            .client
            .post(&self.webhook_url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&card)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(SenderError::SendFailed(format!(
                "Teams webhook returned non-success status: {}. Body: {}",
                status, error_body
            )));
        }

        debug!(%status, "Teams webhook accepted the alert.");
        Ok(())
    }
}
