use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Duration as TokioDuration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::cooldown::CooldownGate;
use super::health_check::HealthCheck;
use super::models::{CheckError, CheckResult, HealthOutcome};
use crate::notifications::service::NotificationService;

/// Ties the health check, cooldown gate and notifier chain into one decision per tick.
pub struct ActivityMonitor {
    health_check: Box<dyn HealthCheck>,
    notification_service: Arc<NotificationService>,
    // Held for the whole check, so concurrent callers are serialized.
    cooldown: Mutex<CooldownGate>,
}

impl ActivityMonitor {
    pub fn new(
        health_check: Box<dyn HealthCheck>,
        notification_service: Arc<NotificationService>,
        cooldown: ChronoDuration,
    ) -> Self {
        Self {
            health_check,
            notification_service,
            cooldown: Mutex::new(CooldownGate::new(cooldown)),
        }
    }

    pub async fn start_periodic_evaluation(self: Arc<Self>, period_seconds: u64) {
        info!(interval_seconds = period_seconds, "Database activity check started.");
        let period = TokioDuration::from_secs(period_seconds);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let result = self.check_and_alert().await;
            info!(status = result.status(), "Scheduled database check finished.");
        }
    }

    pub async fn check_and_alert(&self) -> CheckResult {
        self.check_and_alert_at(Utc::now()).await
    }

    /// Runs one check as of `now`. Never fails: any error becomes `CheckResult::Error`
    /// and leaves the cooldown state untouched.
    pub async fn check_and_alert_at(&self, now: DateTime<Utc>) -> CheckResult {
        let mut gate = self.cooldown.lock().await;
        match self.run_check(&mut gate, now).await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Error during database check.");
                CheckResult::Error { error: e.to_string() }
            }
        }
    }

    async fn run_check(&self, gate: &mut CooldownGate, now: DateTime<Utc>) -> Result<CheckResult, CheckError> {
        let details = match self.health_check.evaluate(now).await? {
            HealthOutcome::NoRows => {
                warn!("Activity table returned no rows.");
                return Ok(CheckResult::NoRows { checked_at: now });
            }
            HealthOutcome::Healthy(details) => return Ok(CheckResult::Ok { details }),
            HealthOutcome::Unhealthy(details) => details,
        };

        if let Some(until) = gate.cooldown_until().filter(|_| gate.is_in_cooldown(now)) {
            info!(cooldown_until = %until, "Alert suppressed, still in cooldown.");
            return Ok(CheckResult::Cooldown {
                cooldown_until: until,
                details,
            });
        }

        let message = self.health_check.build_alert(&details)?;
        // Stamped before dispatch: a check dropped mid-send still holds the cooldown.
        gate.record_alert(now);
        warn!(title = %message.title, "Database check failed, sending alert.");
        let outcome = self.notification_service.dispatch(&message).await;
        info!(?outcome, "Alert dispatch finished.");
        Ok(CheckResult::AlertSent { details })
    }

    pub async fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        self.cooldown.lock().await.last_alert_at()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerting::health_check::tests::{
        procedure_target, timestamp_target, FakeProcedures, FakeTimestamps,
    };
    use crate::alerting::health_check::{InactivityCheck, ProcedureStatusCheck};
    use crate::alerting::models::CheckDetails;
    use crate::db::probe::RawTimestamp;
    use crate::notifications::service::tests::RecordingSender;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn inactivity_monitor(answers: Vec<Result<Option<RawTimestamp>, String>>) -> (ActivityMonitor, Arc<AtomicUsize>) {
        let (sender, calls) = RecordingSender::new("teams", true);
        let check = InactivityCheck::new(
            Arc::new(FakeTimestamps::new(answers)),
            timestamp_target(),
            ChronoDuration::minutes(10),
        );
        let monitor = ActivityMonitor::new(
            Box::new(check),
            Arc::new(NotificationService::new(vec![Box::new(sender)])),
            ChronoDuration::minutes(30),
        );
        (monitor, calls)
    }

    #[tokio::test]
    async fn test_alert_then_cooldown() {
        let last_update = RawTimestamp::Utc(t0() - ChronoDuration::minutes(15));
        let (monitor, calls) = inactivity_monitor(vec![Ok(Some(last_update))]);

        let first = monitor.check_and_alert_at(t0()).await;
        assert_eq!(first.status(), "alert_sent");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let second_at = t0() + ChronoDuration::minutes(2);
        match monitor.check_and_alert_at(second_at).await {
            CheckResult::Cooldown { cooldown_until, .. } => {
                assert_eq!(cooldown_until - second_at, ChronoDuration::minutes(28));
            }
            other => panic!("expected cooldown, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Window elapsed: the gate re-arms by itself.
        let third = monitor.check_and_alert_at(t0() + ChronoDuration::minutes(30)).await;
        assert_eq!(third.status(), "alert_sent");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ok_checks_never_touch_cooldown() {
        let fresh = RawTimestamp::Utc(t0() - ChronoDuration::minutes(1));
        let (monitor, calls) = inactivity_monitor(vec![Ok(Some(fresh))]);

        for offset in 0..3 {
            let result = monitor.check_and_alert_at(t0() + ChronoDuration::seconds(offset)).await;
            assert_eq!(result.status(), "ok");
        }
        assert_eq!(monitor.last_alert_at().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_errors_are_reported_not_raised() {
        let (monitor, calls) = inactivity_monitor(vec![
            Err("connection refused".to_string()),
            Ok(Some(RawTimestamp::Text("garbage".to_string()))),
        ]);

        match monitor.check_and_alert_at(t0()).await {
            CheckResult::Error { error } => assert!(error.contains("connection refused")),
            other => panic!("expected error, got {other:?}"),
        }
        assert_eq!(monitor.check_and_alert_at(t0()).await.status(), "error");
        assert_eq!(monitor.last_alert_at().await, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_table_reports_no_rows() {
        let (monitor, calls) = inactivity_monitor(vec![Ok(None)]);
        assert_eq!(monitor.check_and_alert_at(t0()).await, CheckResult::NoRows { checked_at: t0() });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_delivery_still_starts_cooldown() {
        let (teams, teams_calls) = RecordingSender::new("teams", false);
        let (email, email_calls) = RecordingSender::new("email", false);
        let check = InactivityCheck::new(
            Arc::new(FakeTimestamps::new(vec![Ok(Some(RawTimestamp::Utc(t0() - ChronoDuration::hours(1))))])),
            timestamp_target(),
            ChronoDuration::minutes(10),
        );
        let monitor = ActivityMonitor::new(
            Box::new(check),
            Arc::new(NotificationService::new(vec![Box::new(teams), Box::new(email)])),
            ChronoDuration::minutes(30),
        );

        assert_eq!(monitor.check_and_alert_at(t0()).await.status(), "alert_sent");
        assert_eq!(monitor.last_alert_at().await, Some(t0()));
        assert_eq!(teams_calls.load(Ordering::SeqCst), 1);
        assert_eq!(email_calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.check_and_alert_at(t0() + ChronoDuration::minutes(5)).await.status(), "cooldown");
    }

    #[tokio::test]
    async fn test_dropped_check_keeps_cooldown() {
        let (sender, calls) = RecordingSender::new("teams", true);
        let check = InactivityCheck::new(
            Arc::new(FakeTimestamps::new(vec![Ok(Some(RawTimestamp::Utc(t0() - ChronoDuration::hours(1))))])),
            timestamp_target(),
            ChronoDuration::minutes(10),
        );
        let monitor = ActivityMonitor::new(
            Box::new(check),
            Arc::new(NotificationService::new(vec![Box::new(
                sender.with_delay(TokioDuration::from_millis(200)),
            )])),
            ChronoDuration::minutes(30),
        );

        // The caller gives up while the webhook is still in flight.
        let abandoned = tokio::time::timeout(TokioDuration::from_millis(50), monitor.check_and_alert_at(t0())).await;
        assert!(abandoned.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.last_alert_at().await, Some(t0()));

        let next = monitor.check_and_alert_at(t0() + ChronoDuration::minutes(1)).await;
        assert_eq!(next.status(), "cooldown");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_procedures_ok() {
        let row = vec![
            ("HotelUpdateStatus".to_string(), "OK".to_string()),
            ("ChannelStatsStatus".to_string(), "OK".to_string()),
        ];
        let (sender, calls) = RecordingSender::new("teams", true);
        let check = ProcedureStatusCheck::new(Arc::new(FakeProcedures { runs: vec![Ok(Some(row))] }), procedure_target());
        let monitor = ActivityMonitor::new(
            Box::new(check),
            Arc::new(NotificationService::new(vec![Box::new(sender)])),
            ChronoDuration::minutes(30),
        );

        match monitor.check_and_alert_at(t0()).await {
            CheckResult::Ok {
                details: CheckDetails::Procedures { statuses },
            } => {
                assert_eq!(statuses.len(), 2);
                assert!(statuses.values().all(|s| s == "OK"));
            }
            other => panic!("expected ok with snapshot, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_procedure_failure_alerts_once() {
        let (sender, calls) = RecordingSender::new("teams", true);
        let check = ProcedureStatusCheck::new(Arc::new(FakeProcedures { runs: vec![Ok(None)] }), procedure_target());
        let monitor = ActivityMonitor::new(
            Box::new(check),
            Arc::new(NotificationService::new(vec![Box::new(sender)])),
            ChronoDuration::minutes(30),
        );

        match monitor.check_and_alert_at(t0()).await {
            CheckResult::AlertSent {
                details: CheckDetails::Procedures { statuses },
            } => {
                assert_eq!(statuses["HotelUpdateStatus"], "ERROR: No result from usp_Health");
            }
            other => panic!("expected alert, got {other:?}"),
        }
        assert_eq!(monitor.check_and_alert_at(t0() + ChronoDuration::minutes(1)).await.status(), "cooldown");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
