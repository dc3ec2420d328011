//! Renders [`AlertMessage`]s from check details and static configuration.
use chrono::{DateTime, Utc};
use serde::Serialize;
use tera::{Context, Tera};

use crate::notifications::models::AlertMessage;
use crate::server::config::{ProcedureTarget, TimestampTarget};

use super::models::{CheckError, StatusSnapshot};

pub const INACTIVITY_TITLE: &str = "⚠️ Database Inactivity Alert";
pub const PROCEDURE_TITLE: &str = "⚠️ Database Update Health Check Failed";

const INACTIVITY_TEMPLATE: &str = "No database activity detected for {{ inactive_minutes }} minutes.

**Table:** {{ table }}
**Timestamp Column:** {{ column }}
**Last Update (UTC):** {{ last_update }}
**Threshold:** {{ threshold_minutes }} minutes

Please check the processes that write to this table.";

const PROCEDURE_TEMPLATE: &str = "Database update health check failed.

**Stored Procedures:** {{ procedures }}
**Expected OK Value:** {{ ok_value }}

**Status Results:**
{% for s in statuses %}**{{ s.name }}:** {% if s.ok %}✅{% else %}❌{% endif %} {{ s.value }}
{% endfor %}
Please check the database update processes for any issues.";

#[derive(Serialize)]
struct StatusLine<'a> {
    name: &'a str,
    value: &'a str,
    ok: bool,
}

fn render(template: &str, context: &Context) -> Result<String, CheckError> {
    Tera::one_off(template, context, false).map_err(|e| CheckError::Render(e.to_string()))
}

pub fn inactivity_alert(
    target: &TimestampTarget,
    last_update: DateTime<Utc>,
    inactive_seconds: i64,
    threshold_minutes: i64,
) -> Result<AlertMessage, CheckError> {
    let mut context = Context::new();
    context.insert("inactive_minutes", &(inactive_seconds / 60));
    context.insert("table", &target.table);
    context.insert("column", &target.column);
    context.insert("last_update", &last_update.to_rfc3339());
    context.insert("threshold_minutes", &threshold_minutes);

    let body = render(INACTIVITY_TEMPLATE, &context)?;
    Ok(AlertMessage::new(INACTIVITY_TITLE, body)
        .with_fact("Status", INACTIVITY_TITLE)
        .with_fact("Threshold", format!("{threshold_minutes} minutes")))
}

pub fn procedure_alert(target: &ProcedureTarget, statuses: &StatusSnapshot) -> Result<AlertMessage, CheckError> {
    let procedures: Vec<&str> = target.procedures.iter().map(|p| p.procedure.as_str()).collect();
    let procedures_text = if procedures.is_empty() {
        "No procedures configured".to_string()
    } else {
        procedures.join(", ")
    };
    let lines: Vec<StatusLine> = statuses
        .iter()
        .map(|(name, value)| StatusLine {
            name,
            value,
            ok: *value == target.ok_value,
        })
        .collect();

    let mut context = Context::new();
    context.insert("procedures", &procedures_text);
    context.insert("ok_value", &target.ok_value);
    context.insert("statuses", &lines);

    let body = render(PROCEDURE_TEMPLATE, &context)?;
    Ok(AlertMessage::new(PROCEDURE_TITLE, body)
        .with_fact("Status", PROCEDURE_TITLE)
        .with_fact("Threshold", format!("every status = {}", target.ok_value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::config::ProcedureSpec;
    use chrono::TimeZone;

    #[test]
    fn test_inactivity_alert_body() {
        let target = TimestampTarget {
            table: "orders".to_string(),
            column: "updated_at".to_string(),
        };
        let last_update = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let message = inactivity_alert(&target, last_update, 15 * 60, 10).unwrap();

        assert_eq!(message.title, INACTIVITY_TITLE);
        assert!(message.body.starts_with("No database activity detected for 15 minutes."));
        assert!(message.body.contains("**Table:** orders"));
        assert!(message.body.contains("**Last Update (UTC):** 2024-02-01T09:00:00+00:00"));
        assert!(message.facts.iter().any(|f| f.name == "Threshold" && f.value == "10 minutes"));
    }

    #[test]
    fn test_procedure_alert_marks_each_status() {
        let target = ProcedureTarget {
            procedures: vec![
                ProcedureSpec { procedure: "usp_Hotels".to_string(), expected_columns: vec!["HotelStatus".to_string()] },
                ProcedureSpec { procedure: "usp_Rates".to_string(), expected_columns: vec!["RateStatus".to_string()] },
            ],
            ok_value: "OK".to_string(),
            call_template: "SELECT * FROM {procedure}()".to_string(),
        };
        let mut statuses = StatusSnapshot::new();
        statuses.insert("HotelStatus".to_string(), "OK".to_string());
        statuses.insert("RateStatus".to_string(), "STALE".to_string());

        let message = procedure_alert(&target, &statuses).unwrap();
        assert_eq!(message.title, PROCEDURE_TITLE);
        assert!(message.body.contains("**Stored Procedures:** usp_Hotels, usp_Rates"));
        assert!(message.body.contains("**HotelStatus:** ✅ OK"));
        assert!(message.body.contains("**RateStatus:** ❌ STALE"));
        assert!(message.plain_body().contains("RateStatus: ❌ STALE"));
        assert!(message.facts.iter().any(|f| f.name == "Threshold" && f.value == "every status = OK"));
    }
}
