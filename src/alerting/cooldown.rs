use chrono::{DateTime, Duration, Utc};

/// Single-slot alert suppression window.
///
/// The gate is Armed until an alert is recorded, then Suppressed until
/// `last_alert_at + duration`. Re-arming happens purely by wall-clock elapse;
/// nothing ever clears the recorded timestamp.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    duration: Duration,
    last_alert_at: Option<DateTime<Utc>>,
}

impl CooldownGate {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            last_alert_at: None,
        }
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until().is_some_and(|until| now < until)
    }

    /// Saturates at the latest representable instant instead of overflowing.
    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.last_alert_at
            .map(|at| at.checked_add_signed(self.duration).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    pub fn record_alert(&mut self, at: DateTime<Utc>) {
        self.last_alert_at = Some(at);
    }

    pub fn last_alert_at(&self) -> Option<DateTime<Utc>> {
        self.last_alert_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn test_armed_without_prior_alert() {
        let gate = CooldownGate::new(Duration::minutes(30));
        assert!(!gate.is_in_cooldown(t0()));
        assert_eq!(gate.cooldown_until(), None);
    }

    #[test]
    fn test_window_is_half_open() {
        let mut gate = CooldownGate::new(Duration::minutes(30));
        gate.record_alert(t0());

        assert!(gate.is_in_cooldown(t0()));
        assert!(gate.is_in_cooldown(t0() + Duration::minutes(29)));
        assert!(!gate.is_in_cooldown(t0() + Duration::minutes(30)));
        assert!(!gate.is_in_cooldown(t0() + Duration::hours(5)));
        assert_eq!(gate.cooldown_until(), Some(t0() + Duration::minutes(30)));
    }

    #[test]
    fn test_huge_window_saturates() {
        let mut gate = CooldownGate::new(Duration::minutes(1_000_000_000_000));
        gate.record_alert(t0());

        assert!(gate.is_in_cooldown(t0()));
        assert!(gate.is_in_cooldown(t0() + Duration::days(10_000)));
        assert_eq!(gate.cooldown_until(), Some(DateTime::<Utc>::MAX_UTC));
    }

    #[test]
    fn test_latest_alert_restarts_window() {
        let mut gate = CooldownGate::new(Duration::minutes(10));
        gate.record_alert(t0());
        gate.record_alert(t0() + Duration::minutes(15));

        assert_eq!(gate.last_alert_at(), Some(t0() + Duration::minutes(15)));
        assert!(gate.is_in_cooldown(t0() + Duration::minutes(20)));
    }
}
