//! Billing-cycle arithmetic
//!
//! Usage-based pricing is invoiced against a fixed billing day rather than the
//! calendar month, while premium requests reset on the account's own
//! `startOfMonth` anchor. Both periods are derived here and never persisted.

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use serde::Serialize;

/// Day of month that anchors the usage-based pricing period.
pub const BILLING_DAY: u32 = 3;

/// A billing cycle identified by the calendar month it starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BillingMonth {
    pub month: u32,
    pub year: i32,
}

/// Concrete, inclusive date range of a billing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingPeriod {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingMonth {
    pub fn new(month: u32, year: i32) -> Self {
        Self { month, year }
    }

    pub fn previous(self) -> Self {
        if self.month == 1 {
            Self::new(12, self.year - 1)
        } else {
            Self::new(self.month - 1, self.year)
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self::new(1, self.year + 1)
        } else {
            Self::new(self.month + 1, self.year)
        }
    }

    /// Date range running from `billing_day` of this month up to the day
    /// before `billing_day` of the following month.
    pub fn period(self, billing_day: u32) -> BillingPeriod {
        let start = clamped_date(self.year, self.month, billing_day);
        let next = self.next();
        let next_start = clamped_date(next.year, next.month, billing_day);
        let end = next_start.pred_opt().unwrap_or(next_start);

        BillingPeriod { start, end }
    }
}

/// Billing month that contains `now`.
///
/// Before the billing day the previous calendar month's cycle is still open.
pub fn current_billing_period<D: Datelike>(now: &D, billing_day: u32) -> BillingMonth {
    let calendar = BillingMonth::new(now.month(), now.year());
    if now.day() < billing_day {
        calendar.previous()
    } else {
        calendar
    }
}

/// The cycle immediately before [`current_billing_period`].
pub fn previous_billing_period<D: Datelike>(now: &D, billing_day: u32) -> BillingMonth {
    current_billing_period(now, billing_day).previous()
}

/// Premium request period, anchored on the account's own month start.
pub fn premium_period(start_of_month: DateTime<Utc>) -> BillingPeriod {
    let start = start_of_month.date_naive();
    let end = start
        .checked_add_months(Months::new(1))
        .unwrap_or_else(|| start + chrono::Duration::days(30));

    BillingPeriod { start, end }
}

impl BillingPeriod {
    /// Percentage of the period already elapsed, clamped to `0..=100`.
    pub fn progress(&self, today: NaiveDate) -> f64 {
        let total = (self.end - self.start).num_days() + 1;
        if total <= 0 {
            return 0.0;
        }
        let elapsed = (today - self.start).num_days();
        ((elapsed as f64 / total as f64) * 100.0).clamp(0.0, 100.0)
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        day >= self.start && day <= self.end
    }

    pub fn label(&self) -> String {
        format!("{} - {}", self.start.format("%b %-d"), self.end.format("%b %-d"))
    }
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let next = BillingMonth::new(month, year).next();
    NaiveDate::from_ymd_opt(next.year, next.month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

fn clamped_date(year: i32, month: u32, day: u32) -> NaiveDate {
    let day = day.clamp(1, days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn before_billing_day_uses_previous_month() {
        let period = current_billing_period(&date(2024, 3, 1), BILLING_DAY);
        assert_eq!(period, BillingMonth::new(2, 2024));
    }

    #[test]
    fn on_or_after_billing_day_uses_current_month() {
        assert_eq!(
            current_billing_period(&date(2024, 3, 5), BILLING_DAY),
            BillingMonth::new(3, 2024)
        );
        assert_eq!(
            current_billing_period(&date(2024, 3, 3), BILLING_DAY),
            BillingMonth::new(3, 2024)
        );
    }

    #[test]
    fn january_before_billing_day_wraps_to_december() {
        let period = current_billing_period(&date(2025, 1, 2), BILLING_DAY);
        assert_eq!(period, BillingMonth::new(12, 2024));
        assert_eq!(
            previous_billing_period(&date(2025, 1, 2), BILLING_DAY),
            BillingMonth::new(11, 2024)
        );
    }

    #[test]
    fn previous_period_wraps_year() {
        assert_eq!(
            previous_billing_period(&date(2025, 1, 10), BILLING_DAY),
            BillingMonth::new(12, 2024)
        );
    }

    #[test]
    fn accepts_datetimes() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 23, 59, 0).unwrap();
        assert_eq!(current_billing_period(&now, BILLING_DAY), BillingMonth::new(2, 2024));
    }

    #[test]
    fn december_period_ends_in_next_year() {
        let period = BillingMonth::new(12, 2024).period(BILLING_DAY);
        assert_eq!(period.start, date(2024, 12, 3));
        assert_eq!(period.end, date(2025, 1, 2));
        assert!(period.end > period.start);
    }

    #[test]
    fn billing_day_is_clamped_to_short_months() {
        let period = BillingMonth::new(1, 2023).period(31);
        assert_eq!(period.start, date(2023, 1, 31));
        assert_eq!(period.end, date(2023, 2, 27));
    }

    #[test]
    fn premium_period_follows_account_anchor() {
        let anchor = Utc.with_ymd_and_hms(2024, 1, 17, 8, 30, 0).unwrap();
        let period = premium_period(anchor);
        assert_eq!(period.start, date(2024, 1, 17));
        assert_eq!(period.end, date(2024, 2, 17));

        let usage = current_billing_period(&date(2024, 1, 20), BILLING_DAY).period(BILLING_DAY);
        assert_ne!(period, usage);
    }

    #[test]
    fn progress_is_clamped() {
        let period = BillingMonth::new(3, 2024).period(BILLING_DAY);
        assert_eq!(period.progress(date(2024, 2, 1)), 0.0);
        assert_eq!(period.progress(date(2024, 5, 1)), 100.0);
        let mid = period.progress(date(2024, 3, 18));
        assert!(mid > 40.0 && mid < 60.0, "progress {mid}");
        assert!(period.contains(date(2024, 4, 2)));
        assert!(!period.contains(date(2024, 4, 3)));
    }

    #[test]
    fn label_formats_short_dates() {
        let period = BillingMonth::new(3, 2024).period(BILLING_DAY);
        assert_eq!(period.label(), "Mar 3 - Apr 2");
    }
}
