//! Usage data model and the collaborators that produce it

mod traits;
pub mod cursor;

pub use traits::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One invoice line of usage-based pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageItem {
    pub request_count: u32,
    /// Fractional cents are common, e.g. "4.5 cents per request".
    pub unit_cost_cents: f64,
    pub total_dollars: f64,
    pub description: String,
}

/// Everything one poll cycle learns about the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub premium_current: u32,
    pub premium_limit: u32,
    /// The account's own month anchor for premium requests.
    pub period_start: DateTime<Utc>,
    pub usage_items: Vec<UsageItem>,
    pub mid_month_payment: f64,
    pub has_unpaid_invoice: bool,
}

impl UsageSnapshot {
    pub fn premium_percent(&self) -> f64 {
        if self.premium_limit == 0 {
            return 0.0;
        }
        f64::from(self.premium_current) / f64::from(self.premium_limit) * 100.0
    }

    pub fn usage_total(&self) -> f64 {
        self.usage_items.iter().map(|item| item.total_dollars).sum()
    }

    /// Spending not yet covered by a mid-month payment.
    pub fn unpaid_total(&self) -> f64 {
        (self.usage_total() - self.mid_month_payment).max(0.0)
    }
}

/// Whether usage-based pricing is switched on, and its dollar cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageLimitStatus {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(total: f64) -> UsageItem {
        UsageItem {
            request_count: 0,
            unit_cost_cents: 0.0,
            total_dollars: total,
            description: String::new(),
        }
    }

    #[test]
    fn premium_percent_handles_zero_limit() {
        let mut snapshot = UsageSnapshot {
            premium_current: 125,
            premium_limit: 500,
            period_start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            usage_items: vec![],
            mid_month_payment: 0.0,
            has_unpaid_invoice: false,
        };
        assert_eq!(snapshot.premium_percent(), 25.0);
        snapshot.premium_limit = 0;
        assert_eq!(snapshot.premium_percent(), 0.0);
    }

    #[test]
    fn unpaid_total_subtracts_mid_month_payment() {
        let snapshot = UsageSnapshot {
            premium_current: 500,
            premium_limit: 500,
            period_start: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            usage_items: vec![item(12.5), item(7.5)],
            mid_month_payment: 15.0,
            has_unpaid_invoice: true,
        };
        assert_eq!(snapshot.usage_total(), 20.0);
        assert_eq!(snapshot.unpaid_total(), 5.0);
    }
}
