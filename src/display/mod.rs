//! Status view-model and the displays that render it

mod status_line;

pub use status_line::{LineFormat, StatusLineDisplay};

use chrono::{DateTime, Local, Utc};
use serde::Serialize;

use crate::billing::{self, BillingPeriod};
use crate::providers::{UsageItem, UsageLimitStatus, UsageSnapshot};

/// Overall state of the last poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Ok,
    NoToken,
    Degraded,
    Cooldown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageLevel {
    Low,
    Elevated,
    High,
}

impl UsageLevel {
    pub fn from_percent(percent: f64) -> Self {
        if percent < 50.0 {
            UsageLevel::Low
        } else if percent < 80.0 {
            UsageLevel::Elevated
        } else {
            UsageLevel::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PremiumView {
    pub current: u32,
    pub limit: u32,
    pub percent: f64,
    pub period: BillingPeriod,
    pub period_progress: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageBasedView {
    pub enabled: bool,
    pub total_dollars: f64,
    pub unpaid_dollars: f64,
    pub mid_month_payment: f64,
    pub has_unpaid_invoice: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    pub period: BillingPeriod,
    pub period_progress: f64,
    pub items: Vec<UsageItem>,
}

/// Everything a display needs to draw one status update.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub kind: StatusKind,
    pub text: String,
    pub tooltip: Vec<String>,
    pub level: UsageLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub premium: Option<PremiumView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage_based: Option<UsageBasedView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown: Option<String>,
    pub updated_at: String,
}

/// Trait for drawing the status
pub trait StatusDisplay: Send + Sync {
    /// Replace whatever is shown with `view`; calling twice with the same view
    /// must be harmless
    fn render(&self, view: &StatusView);
}

impl StatusView {
    pub fn no_token(now: DateTime<Utc>) -> Self {
        Self::problem(
            StatusKind::NoToken,
            "⚠ Cursor: not signed in".to_string(),
            vec![format!(
                "No Cursor session found. Set {} or run `cursorbar login <token>`.",
                crate::providers::cursor::SESSION_TOKEN_ENV
            )],
            None,
            now,
        )
    }

    pub fn degraded(error: &str, now: DateTime<Utc>) -> Self {
        Self::problem(
            StatusKind::Degraded,
            "⚠ Cursor: API error".to_string(),
            vec![format!("Last refresh failed: {error}")],
            None,
            now,
        )
    }

    pub fn cooldown(error: &str, countdown: String, now: DateTime<Utc>) -> Self {
        Self::problem(
            StatusKind::Cooldown,
            format!("⚠ Cursor: API unavailable · retry in {countdown}"),
            vec![
                format!("Last refresh failed: {error}"),
                format!("Polling paused, retrying in {countdown}."),
            ],
            Some(countdown),
            now,
        )
    }

    fn problem(
        kind: StatusKind,
        text: String,
        tooltip: Vec<String>,
        countdown: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            text,
            tooltip,
            level: UsageLevel::High,
            premium: None,
            usage_based: None,
            countdown,
            updated_at: now.to_rfc3339(),
        }
    }
}

/// Build the view for a successful poll. Pure: the same inputs always give
/// the same view.
pub fn build_view(
    snapshot: &UsageSnapshot,
    limit_status: Option<UsageLimitStatus>,
    now: DateTime<Utc>,
    billing_day: u32,
) -> StatusView {
    let today = now.with_timezone(&Local).date_naive();

    let premium_period = billing::premium_period(snapshot.period_start);
    let premium = PremiumView {
        current: snapshot.premium_current,
        limit: snapshot.premium_limit,
        percent: snapshot.premium_percent(),
        period: premium_period,
        period_progress: premium_period.progress(today),
    };

    let limit_status = limit_status.unwrap_or_default();
    let usage_period = billing::current_billing_period(&today, billing_day).period(billing_day);
    let total_dollars = snapshot.usage_total();
    let usage_based = (limit_status.enabled || total_dollars > 0.0).then(|| UsageBasedView {
        enabled: limit_status.enabled,
        total_dollars,
        unpaid_dollars: snapshot.unpaid_total(),
        mid_month_payment: snapshot.mid_month_payment,
        has_unpaid_invoice: snapshot.has_unpaid_invoice,
        limit: limit_status.limit,
        percent: limit_status
            .limit
            .filter(|limit| *limit > 0.0)
            .map(|limit| total_dollars / limit * 100.0),
        period: usage_period,
        period_progress: usage_period.progress(today),
        items: snapshot.usage_items.clone(),
    });

    let peak = usage_based
        .as_ref()
        .and_then(|usage| usage.percent)
        .filter(|_| premium.percent >= 100.0)
        .unwrap_or(premium.percent);

    StatusView {
        kind: StatusKind::Ok,
        text: status_text(&premium, usage_based.as_ref()),
        tooltip: tooltip_lines(&premium, usage_based.as_ref()),
        level: UsageLevel::from_percent(peak),
        premium: Some(premium),
        usage_based,
        countdown: None,
        updated_at: now.to_rfc3339(),
    }
}

fn status_text(premium: &PremiumView, usage_based: Option<&UsageBasedView>) -> String {
    let mut text = format!(
        "⚡ {}/{} ({:.0}%)",
        premium.current, premium.limit, premium.percent
    );
    if let Some(usage) = usage_based.filter(|usage| usage.total_dollars > 0.0) {
        match usage.limit {
            Some(limit) => text.push_str(&format!(" · ${:.2}/${:.0}", usage.total_dollars, limit)),
            None => text.push_str(&format!(" · ${:.2}", usage.total_dollars)),
        }
    }
    text
}

fn tooltip_lines(premium: &PremiumView, usage_based: Option<&UsageBasedView>) -> Vec<String> {
    let mut lines = vec![
        format!(
            "Premium requests: {}/{} ({:.1}%)",
            premium.current, premium.limit, premium.percent
        ),
        format!(
            "Premium period: {} ({:.0}% elapsed)",
            premium.period.label(),
            premium.period_progress
        ),
    ];

    let Some(usage) = usage_based else {
        return lines;
    };

    lines.push(format!(
        "Usage-based period: {} ({:.0}% elapsed)",
        usage.period.label(),
        usage.period_progress
    ));
    match (usage.limit, usage.percent) {
        (Some(limit), Some(percent)) => lines.push(format!(
            "Usage-based spending: ${:.2} of ${:.2} ({:.1}%)",
            usage.total_dollars, limit, percent
        )),
        _ => lines.push(format!("Usage-based spending: ${:.2}", usage.total_dollars)),
    }
    if !usage.enabled {
        lines.push("Usage-based pricing is disabled".to_string());
    }
    for item in &usage.items {
        if item.request_count > 0 {
            lines.push(format!(
                "  {} req × {}¢ = ${:.2}",
                item.request_count, item.unit_cost_cents, item.total_dollars
            ));
        } else {
            lines.push(format!("  {} = ${:.2}", item.description, item.total_dollars));
        }
    }
    if usage.mid_month_payment > 0.0 {
        lines.push(format!(
            "Mid-month payment: ${:.2} (unpaid ${:.2})",
            usage.mid_month_payment, usage.unpaid_dollars
        ));
    }
    if usage.has_unpaid_invoice {
        lines.push("Unpaid mid-month invoice".to_string());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn snapshot(current: u32, items: Vec<f64>) -> UsageSnapshot {
        UsageSnapshot {
            premium_current: current,
            premium_limit: 500,
            period_start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            usage_items: items
                .into_iter()
                .map(|total| UsageItem {
                    request_count: (total * 25.0) as u32,
                    unit_cost_cents: 4.0,
                    total_dollars: total,
                    description: "requests".to_string(),
                })
                .collect(),
            mid_month_payment: 0.0,
            has_unpaid_invoice: false,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn premium_only_view() {
        let view = build_view(&snapshot(250, vec![]), None, now(), billing::BILLING_DAY);
        assert_eq!(view.kind, StatusKind::Ok);
        assert_eq!(view.text, "⚡ 250/500 (50%)");
        assert_eq!(view.level, UsageLevel::Elevated);
        assert!(view.usage_based.is_none());
        let premium = view.premium.unwrap();
        assert_eq!(premium.percent, 50.0);
        assert_eq!(premium.period.label(), "Mar 1 - Apr 1");
    }

    #[test]
    fn usage_based_view_includes_limit_percentage() {
        let status = UsageLimitStatus {
            enabled: true,
            limit: Some(50.0),
        };
        let view = build_view(&snapshot(500, vec![10.0, 2.5]), Some(status), now(), billing::BILLING_DAY);
        assert_eq!(view.text, "⚡ 500/500 (100%) · $12.50/$50");
        let usage = view.usage_based.unwrap();
        assert_eq!(usage.percent, Some(25.0));
        assert_eq!(usage.period.label(), "Mar 3 - Apr 2");
        assert_eq!(view.level, UsageLevel::Low);
    }

    #[test]
    fn same_snapshot_renders_identically() {
        let snap = snapshot(480, vec![1.0]);
        let status = Some(UsageLimitStatus {
            enabled: true,
            limit: None,
        });
        let first = build_view(&snap, status, now(), billing::BILLING_DAY);
        let second = build_view(&snap, status, now(), billing::BILLING_DAY);
        assert_eq!(first, second);
    }

    #[test]
    fn cooldown_view_carries_countdown() {
        let view = StatusView::cooldown("status 500", "9:42".to_string(), now());
        assert_eq!(view.kind, StatusKind::Cooldown);
        assert_eq!(view.countdown.as_deref(), Some("9:42"));
        assert!(view.text.contains("retry in 9:42"));

        let degraded = StatusView::degraded("status 500", now());
        assert!(degraded.countdown.is_none());
    }
}
