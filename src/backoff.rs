//! Consecutive-failure tracking for the poll loop
//!
//! A single failure only degrades the display. The second consecutive failure
//! suspends regular polling for [`COOLDOWN_DURATION`] and shows a countdown
//! instead. Any success ends the cooldown immediately.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// Consecutive failures before polling is suspended.
pub const COOLDOWN_THRESHOLD: u32 = 2;

/// Length of the polling suspension.
pub const COOLDOWN_DURATION: Duration = Duration::minutes(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum BackoffState {
    Normal,
    Degraded,
    Cooldown { started_at: DateTime<Utc> },
}

/// What a failure did to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureTransition {
    Degraded,
    CooldownStarted,
    CooldownRestarted,
}

/// Countdown state reported on each timer tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CooldownTick {
    Inactive,
    Remaining(Duration),
    Expired,
}

#[derive(Debug, Clone)]
pub struct ErrorBackoffController {
    error_count: u32,
    cooldown_started_at: Option<DateTime<Utc>>,
    cooldown: Duration,
}

impl ErrorBackoffController {
    pub fn new() -> Self {
        Self::with_cooldown(COOLDOWN_DURATION)
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            error_count: 0,
            cooldown_started_at: None,
            cooldown,
        }
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn state(&self) -> BackoffState {
        match (self.error_count, self.cooldown_started_at) {
            (_, Some(started_at)) => BackoffState::Cooldown { started_at },
            (0, None) => BackoffState::Normal,
            (_, None) => BackoffState::Degraded,
        }
    }

    pub fn in_cooldown(&self) -> bool {
        self.cooldown_started_at.is_some()
    }

    /// Register a failed fetch.
    ///
    /// Every failure past the threshold restarts the cooldown window, so the
    /// suspension never lapses while failures keep arriving.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> FailureTransition {
        self.error_count = self.error_count.saturating_add(1);

        if self.error_count < COOLDOWN_THRESHOLD {
            return FailureTransition::Degraded;
        }

        let restarted = self.cooldown_started_at.is_some();
        self.cooldown_started_at = Some(now);
        if restarted {
            tracing::debug!(errors = self.error_count, "Cooldown window restarted");
            FailureTransition::CooldownRestarted
        } else {
            tracing::info!(
                errors = self.error_count,
                minutes = self.cooldown.num_minutes(),
                "Entering cooldown after consecutive failures"
            );
            FailureTransition::CooldownStarted
        }
    }

    /// Register a successful fetch. Returns `true` when an active cooldown was
    /// cut short.
    pub fn record_success(&mut self) -> bool {
        let was_cooling = self.cooldown_started_at.take().is_some();
        if self.error_count > 0 {
            tracing::debug!(errors = self.error_count, "Fetch recovered, resetting error count");
        }
        self.error_count = 0;
        was_cooling
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let started_at = self.cooldown_started_at?;
        let elapsed = now.signed_duration_since(started_at);
        Some((self.cooldown - elapsed).max(Duration::zero()))
    }

    /// Advance the countdown. On expiry the controller returns to Normal.
    pub fn tick(&mut self, now: DateTime<Utc>) -> CooldownTick {
        let Some(started_at) = self.cooldown_started_at else {
            return CooldownTick::Inactive;
        };

        if now.signed_duration_since(started_at) >= self.cooldown {
            self.cooldown_started_at = None;
            self.error_count = 0;
            tracing::info!("Cooldown elapsed, resuming polling");
            CooldownTick::Expired
        } else {
            CooldownTick::Remaining(self.remaining(now).unwrap_or_else(Duration::zero))
        }
    }

    /// `m:ss` until polling resumes, only while cooling down.
    pub fn countdown_text(&self, now: DateTime<Utc>) -> Option<String> {
        self.remaining(now).map(format_countdown)
    }
}

impl Default for ErrorBackoffController {
    fn default() -> Self {
        Self::new()
    }
}

pub fn format_countdown(remaining: Duration) -> String {
    let secs = remaining.num_seconds().max(0);
    format!("{}:{:02}", secs / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 5, 12, 0, 0).unwrap() + Duration::seconds(secs)
    }

    #[test]
    fn single_failure_degrades_without_countdown() {
        let mut backoff = ErrorBackoffController::new();
        assert_eq!(backoff.record_failure(at(0)), FailureTransition::Degraded);
        assert_eq!(backoff.state(), BackoffState::Degraded);
        assert!(backoff.countdown_text(at(1)).is_none());
    }

    #[test]
    fn second_failure_starts_cooldown() {
        let mut backoff = ErrorBackoffController::new();
        backoff.record_failure(at(0));
        assert_eq!(backoff.record_failure(at(5)), FailureTransition::CooldownStarted);
        assert_eq!(backoff.state(), BackoffState::Cooldown { started_at: at(5) });
        assert_eq!(backoff.countdown_text(at(5)).as_deref(), Some("10:00"));
        assert_eq!(backoff.countdown_text(at(65)).as_deref(), Some("9:00"));
    }

    #[test]
    fn success_clears_cooldown_immediately() {
        let mut backoff = ErrorBackoffController::new();
        backoff.record_failure(at(0));
        backoff.record_failure(at(1));
        assert!(backoff.record_success());
        assert_eq!(backoff.error_count(), 0);
        assert_eq!(backoff.state(), BackoffState::Normal);
        assert!(backoff.countdown_text(at(2)).is_none());
        assert!(!backoff.record_success());
    }

    #[test]
    fn failures_during_cooldown_restart_window() {
        let mut backoff = ErrorBackoffController::new();
        backoff.record_failure(at(0));
        backoff.record_failure(at(0));
        assert_eq!(backoff.record_failure(at(300)), FailureTransition::CooldownRestarted);
        assert_eq!(backoff.error_count(), 3);

        // Ten minutes after the first cooldown start the window is still open.
        assert_eq!(backoff.tick(at(600)), CooldownTick::Remaining(Duration::seconds(300)));
        assert_eq!(backoff.tick(at(900)), CooldownTick::Expired);
        assert_eq!(backoff.state(), BackoffState::Normal);
        assert_eq!(backoff.error_count(), 0);
    }

    #[test]
    fn tick_without_cooldown_is_inactive() {
        let mut backoff = ErrorBackoffController::new();
        assert_eq!(backoff.tick(at(0)), CooldownTick::Inactive);
        backoff.record_failure(at(0));
        assert_eq!(backoff.tick(at(1)), CooldownTick::Inactive);
    }

    #[test]
    fn countdown_formats_minutes_and_seconds() {
        assert_eq!(format_countdown(Duration::seconds(59)), "0:59");
        assert_eq!(format_countdown(Duration::seconds(61)), "1:01");
        assert_eq!(format_countdown(Duration::seconds(-3)), "0:00");
    }
}
