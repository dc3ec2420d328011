use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::db::probe::ProbeError;

/// Expected column name -> resolved status string, one entry per configured column.
pub type StatusSnapshot = BTreeMap<String, String>;

#[derive(Error, Debug)]
pub enum CheckError {
    #[error("{0}")]
    Probe(#[from] ProbeError),
    #[error("Failed to parse timestamp: {0}")]
    Parse(String),
    #[error("Failed to render alert: {0}")]
    Render(String),
}

/// Named facts gathered by a health check, reported back to the caller and
/// used to compose alert text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CheckDetails {
    Inactivity {
        last_update: DateTime<Utc>,
        inactive_seconds: i64,
        threshold_seconds: i64,
    },
    Procedures {
        statuses: StatusSnapshot,
    },
}

/// The policy-specific verdict fed into the shared cooldown/dispatch logic.
#[derive(Debug, Clone, PartialEq)]
pub enum HealthOutcome {
    NoRows,
    Healthy(CheckDetails),
    Unhealthy(CheckDetails),
}

/// Result of one `check_and_alert` invocation, serialized as the JSON payload
/// of the check endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckResult {
    Ok {
        #[serde(flatten)]
        details: CheckDetails,
    },
    NoRows {
        checked_at: DateTime<Utc>,
    },
    AlertSent {
        #[serde(flatten)]
        details: CheckDetails,
    },
    Cooldown {
        cooldown_until: DateTime<Utc>,
        #[serde(flatten)]
        details: CheckDetails,
    },
    Error {
        error: String,
    },
}

impl CheckResult {
    pub fn status(&self) -> &'static str {
        match self {
            CheckResult::Ok { .. } => "ok",
            CheckResult::NoRows { .. } => "no_rows",
            CheckResult::AlertSent { .. } => "alert_sent",
            CheckResult::Cooldown { .. } => "cooldown",
            CheckResult::Error { .. } => "error",
        }
    }
}
