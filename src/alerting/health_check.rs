//! The two interchangeable health predicates the monitor can run.
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::debug;

use crate::db::probe::{ProcedureSource, TimestampSource};
use crate::notifications::models::AlertMessage;
use crate::server::config::{ProcedureTarget, TimestampTarget};

use super::alert_text;
use super::models::{CheckDetails, CheckError, HealthOutcome};
use super::status_resolver;
use super::timestamp;

#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Probes the database and returns the verdict for `now`.
    async fn evaluate(&self, now: DateTime<Utc>) -> Result<HealthOutcome, CheckError>;

    /// Builds the alert for an unhealthy verdict.
    fn build_alert(&self, details: &CheckDetails) -> Result<AlertMessage, CheckError>;
}

/// Alerts when the newest activity timestamp is older than the threshold.
pub struct InactivityCheck {
    source: Arc<dyn TimestampSource>,
    target: TimestampTarget,
    threshold: Duration,
}

impl InactivityCheck {
    pub fn new(source: Arc<dyn TimestampSource>, target: TimestampTarget, threshold: Duration) -> Self {
        Self {
            source,
            target,
            threshold,
        }
    }
}

#[async_trait]
impl HealthCheck for InactivityCheck {
    async fn evaluate(&self, now: DateTime<Utc>) -> Result<HealthOutcome, CheckError> {
        let Some(raw) = self.source.fetch_latest_timestamp().await? else {
            return Ok(HealthOutcome::NoRows);
        };

        let last_update = timestamp::normalize(&raw)?;
        let inactive_for = now - last_update;
        debug!(%last_update, inactive_seconds = inactive_for.num_seconds(), "Latest activity resolved.");

        let details = CheckDetails::Inactivity {
            last_update,
            inactive_seconds: inactive_for.num_seconds(),
            threshold_seconds: self.threshold.num_seconds(),
        };
        if inactive_for < self.threshold {
            Ok(HealthOutcome::Healthy(details))
        } else {
            Ok(HealthOutcome::Unhealthy(details))
        }
    }

    fn build_alert(&self, details: &CheckDetails) -> Result<AlertMessage, CheckError> {
        match details {
            CheckDetails::Inactivity {
                last_update,
                inactive_seconds,
                ..
            } => alert_text::inactivity_alert(
                &self.target,
                *last_update,
                *inactive_seconds,
                self.threshold.num_minutes(),
            ),
            CheckDetails::Procedures { .. } => Err(CheckError::Render(
                "inactivity check received procedure details".to_string(),
            )),
        }
    }
}

/// Alerts when any configured procedure status differs from the OK sentinel.
pub struct ProcedureStatusCheck {
    source: Arc<dyn ProcedureSource>,
    target: ProcedureTarget,
}

impl ProcedureStatusCheck {
    pub fn new(source: Arc<dyn ProcedureSource>, target: ProcedureTarget) -> Self {
        Self { source, target }
    }
}

#[async_trait]
impl HealthCheck for ProcedureStatusCheck {
    async fn evaluate(&self, _now: DateTime<Utc>) -> Result<HealthOutcome, CheckError> {
        let runs = self.source.run_procedures(&self.target.procedures).await?;
        let statuses = status_resolver::resolve_snapshot(&self.target.procedures, &runs);
        debug!(?statuses, "Stored procedure statuses resolved.");

        let all_ok = statuses.values().all(|status| *status == self.target.ok_value);
        let details = CheckDetails::Procedures { statuses };
        if all_ok {
            Ok(HealthOutcome::Healthy(details))
        } else {
            Ok(HealthOutcome::Unhealthy(details))
        }
    }

    fn build_alert(&self, details: &CheckDetails) -> Result<AlertMessage, CheckError> {
        match details {
            CheckDetails::Procedures { statuses } => alert_text::procedure_alert(&self.target, statuses),
            CheckDetails::Inactivity { .. } => Err(CheckError::Render(
                "procedure check received inactivity details".to_string(),
            )),
        }
    }
}
