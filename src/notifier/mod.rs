//! Threshold alerts for premium requests and usage-based spending
//!
//! Each category keeps the set of thresholds already announced this session.
//! Crossing several thresholds at once produces a single alert for the highest
//! one and marks the lower ones as seen. A threshold is re-armed as soon as the
//! observed value drops back below it.

mod prompt;

pub use prompt::*;

use std::collections::BTreeSet;

use serde::Serialize;

pub const DEFAULT_USAGE_THRESHOLDS: [u32; 6] = [10, 30, 50, 75, 90, 100];
pub const DEFAULT_SPENDING_INCREMENT: f64 = 1.0;

const EPSILON: f64 = 1e-9;

/// Percentage-based categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    Premium,
    UsageBased,
}

/// Category an alert was raised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCategory {
    Premium,
    UsageBased,
    Spending,
}

impl From<UsageCategory> for AlertCategory {
    fn from(category: UsageCategory) -> Self {
        match category {
            UsageCategory::Premium => AlertCategory::Premium,
            UsageCategory::UsageBased => AlertCategory::UsageBased,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationAction {
    ViewUsage,
    ManageLimit,
    EnableUsageBased,
    DisableAlerts,
}

impl NotificationAction {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationAction::ViewUsage => "View Usage",
            NotificationAction::ManageLimit => "Manage Limit",
            NotificationAction::EnableUsageBased => "Enable Usage-Based Pricing",
            NotificationAction::DisableAlerts => "Disable Alerts",
        }
    }
}

/// A single alert to show to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDecision {
    pub category: AlertCategory,
    /// Percent for usage categories, dollars for spending.
    pub threshold: f64,
    /// Observed percentage or dollar total.
    pub value: f64,
    pub message: String,
    pub actions: Vec<NotificationAction>,
}

impl NotificationDecision {
    /// Rewrites an exhausted-premium alert depending on whether overage is
    /// billed or blocked.
    pub fn with_usage_based_hint(mut self, usage_based_enabled: bool) -> Self {
        if self.category != AlertCategory::Premium || self.threshold < 100.0 {
            return self;
        }
        if usage_based_enabled {
            self.message = "Premium requests exhausted. Further requests are billed as usage-based pricing.".to_string();
            self.actions = vec![NotificationAction::ManageLimit, NotificationAction::ViewUsage];
        } else {
            self.message = "Premium requests exhausted. Enable usage-based pricing to keep using premium models.".to_string();
            self.actions = vec![NotificationAction::EnableUsageBased, NotificationAction::ViewUsage];
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct ThresholdNotifier {
    /// Sorted descending.
    thresholds: Vec<u32>,
    spending_increment: f64,
    enabled: bool,
    premium: BTreeSet<u32>,
    usage_based: BTreeSet<u32>,
    /// Multiples of `spending_increment` already announced.
    spending: BTreeSet<u64>,
    in_flight: bool,
}

impl ThresholdNotifier {
    pub fn new(thresholds: &[u32], spending_increment: f64, enabled: bool) -> Self {
        Self {
            thresholds: normalize_thresholds(thresholds),
            spending_increment: spending_increment.max(0.0),
            enabled,
            premium: BTreeSet::new(),
            usage_based: BTreeSet::new(),
            spending: BTreeSet::new(),
            in_flight: false,
        }
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    pub fn notified(&self, category: UsageCategory) -> &BTreeSet<u32> {
        match category {
            UsageCategory::Premium => &self.premium,
            UsageCategory::UsageBased => &self.usage_based,
        }
    }

    pub fn notified_spending(&self) -> &BTreeSet<u64> {
        &self.spending
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Clears every notified set and the in-flight guard.
    pub fn reset(&mut self) {
        self.premium.clear();
        self.usage_based.clear();
        self.spending.clear();
        self.in_flight = false;
        tracing::debug!("Threshold notifications reset");
    }

    /// Marks the pending prompt as answered so new alerts may fire.
    pub fn resolve(&mut self) {
        self.in_flight = false;
    }

    pub fn reconfigure(&mut self, thresholds: &[u32], spending_increment: f64, enabled: bool) {
        self.thresholds = normalize_thresholds(thresholds);
        let configured = &self.thresholds;
        self.premium.retain(|t| configured.contains(t));
        self.usage_based.retain(|t| configured.contains(t));

        let increment = spending_increment.max(0.0);
        if (increment - self.spending_increment).abs() > EPSILON {
            self.spending.clear();
        }
        self.spending_increment = increment;
        self.enabled = enabled;
    }

    fn notified_mut(&mut self, category: UsageCategory) -> &mut BTreeSet<u32> {
        match category {
            UsageCategory::Premium => &mut self.premium,
            UsageCategory::UsageBased => &mut self.usage_based,
        }
    }

    /// Evaluate a percentage for one category.
    ///
    /// `limit` is the dollar limit for usage-based pricing and only feeds the
    /// alert text.
    pub fn evaluate(
        &mut self,
        percentage: f64,
        category: UsageCategory,
        limit: Option<f64>,
    ) -> Option<NotificationDecision> {
        if !self.enabled || self.in_flight || !percentage.is_finite() {
            return None;
        }

        let thresholds = self.thresholds.clone();
        let notified = self.notified_mut(category);

        let crossed = thresholds
            .iter()
            .copied()
            .find(|t| f64::from(*t) <= percentage + EPSILON && !notified.contains(t));

        if let Some(threshold) = crossed {
            notified.extend(thresholds.iter().copied().filter(|t| *t <= threshold));
        }

        // Re-arm anything the value has fallen back below.
        notified.retain(|t| f64::from(*t) <= percentage + EPSILON);

        let threshold = crossed?;
        self.in_flight = true;
        tracing::info!(?category, threshold, percentage, "Usage threshold crossed");

        Some(percentage_decision(category, threshold, percentage, limit))
    }

    /// Usage-based alerts only apply once the premium quota is exhausted.
    pub fn evaluate_usage_based(
        &mut self,
        usage_percentage: f64,
        premium_percentage: f64,
        limit: Option<f64>,
    ) -> Option<NotificationDecision> {
        if premium_percentage < 100.0 {
            tracing::trace!(premium_percentage, "Premium quota not exhausted, skipping usage-based alerts");
            return None;
        }
        self.evaluate(usage_percentage, UsageCategory::UsageBased, limit)
    }

    /// Alert on every multiple of the spending increment.
    pub fn evaluate_spending(&mut self, total_dollars: f64) -> Option<NotificationDecision> {
        let increment = self.spending_increment;
        if !self.enabled || self.in_flight || increment <= 0.0 || !total_dollars.is_finite() {
            return None;
        }

        let reached = ((total_dollars + EPSILON) / increment).floor().max(0.0) as u64;
        let fire = reached >= 1 && !self.spending.contains(&reached);
        if fire {
            self.spending.extend(1..=reached);
        }
        self.spending.retain(|m| *m <= reached);

        if !fire {
            return None;
        }
        self.in_flight = true;

        let amount = reached as f64 * increment;
        tracing::info!(amount, total_dollars, "Spending threshold crossed");

        Some(NotificationDecision {
            category: AlertCategory::Spending,
            threshold: amount,
            value: total_dollars,
            message: format!(
                "Usage-based spending has passed ${:.2} (currently ${:.2}).",
                amount, total_dollars
            ),
            actions: vec![NotificationAction::ViewUsage, NotificationAction::ManageLimit],
        })
    }
}

fn percentage_decision(
    category: UsageCategory,
    threshold: u32,
    percentage: f64,
    limit: Option<f64>,
) -> NotificationDecision {
    let (message, actions) = match category {
        UsageCategory::Premium => (
            format!("Premium request usage has reached {:.1}%.", percentage),
            vec![NotificationAction::ViewUsage, NotificationAction::DisableAlerts],
        ),
        UsageCategory::UsageBased => {
            let message = match limit {
                Some(limit) => format!(
                    "Usage-based spending has reached {:.1}% of your ${:.2} limit.",
                    percentage, limit
                ),
                None => format!("Usage-based spending has reached {:.1}%.", percentage),
            };
            (message, vec![NotificationAction::ManageLimit, NotificationAction::ViewUsage])
        }
    };

    NotificationDecision {
        category: category.into(),
        threshold: f64::from(threshold),
        value: percentage,
        message,
        actions,
    }
}

/// Positive, unique, sorted descending.
pub fn normalize_thresholds(thresholds: &[u32]) -> Vec<u32> {
    let mut sorted: Vec<u32> = thresholds.iter().copied().filter(|t| *t > 0).collect();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    sorted.dedup();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> ThresholdNotifier {
        ThresholdNotifier::new(&DEFAULT_USAGE_THRESHOLDS, DEFAULT_SPENDING_INCREMENT, true)
    }

    fn fire(notifier: &mut ThresholdNotifier, pct: f64) -> Option<f64> {
        let decision = notifier.evaluate(pct, UsageCategory::Premium, None);
        notifier.resolve();
        decision.map(|d| d.threshold)
    }

    #[test]
    fn thresholds_are_sorted_descending() {
        assert_eq!(normalize_thresholds(&[50, 10, 0, 90, 50]), vec![90, 50, 10]);
    }

    #[test]
    fn big_jump_fires_once_and_marks_lower_thresholds() {
        let mut notifier = notifier();
        assert_eq!(fire(&mut notifier, 5.0), None);
        assert_eq!(fire(&mut notifier, 100.0), Some(100.0));
        let notified: Vec<u32> = notifier.notified(UsageCategory::Premium).iter().copied().collect();
        assert_eq!(notified, vec![10, 30, 50, 75, 90, 100]);
        assert_eq!(fire(&mut notifier, 100.0), None);
    }

    #[test]
    fn no_duplicate_until_value_drops_and_recrosses() {
        let mut notifier = notifier();
        let sequence = [12.0, 14.0, 31.0, 33.0, 29.0, 30.0, 31.0, 55.0, 49.0, 52.0];
        let fired: Vec<Option<f64>> = sequence.iter().map(|p| fire(&mut notifier, *p)).collect();
        assert_eq!(
            fired,
            vec![
                Some(10.0),
                None,
                Some(30.0),
                None,
                None,
                Some(30.0),
                None,
                Some(50.0),
                None,
                Some(50.0),
            ]
        );
    }

    #[test]
    fn notified_set_stays_within_configured_thresholds() {
        let mut notifier = notifier();
        for pct in [3.0, 47.0, 88.0, 12.0, 101.0, 64.0, 99.9] {
            fire(&mut notifier, pct);
            for t in notifier.notified(UsageCategory::Premium) {
                assert!(DEFAULT_USAGE_THRESHOLDS.contains(t));
                assert!(f64::from(*t) <= pct);
            }
        }
    }

    #[test]
    fn in_flight_prompt_blocks_new_alerts() {
        let mut notifier = notifier();
        assert!(notifier.evaluate(35.0, UsageCategory::Premium, None).is_some());
        assert!(notifier.is_in_flight());
        assert!(notifier.evaluate(95.0, UsageCategory::Premium, None).is_none());
        assert!(notifier.evaluate_spending(5.0).is_none());
        // The blocked evaluation left no trace.
        assert!(!notifier.notified(UsageCategory::Premium).contains(&90));

        notifier.resolve();
        let decision = notifier.evaluate(95.0, UsageCategory::Premium, None).unwrap();
        assert_eq!(decision.threshold, 90.0);
    }

    #[test]
    fn usage_based_requires_exhausted_premium() {
        let mut notifier = notifier();
        assert!(notifier.evaluate_usage_based(80.0, 99.0, Some(50.0)).is_none());
        assert!(notifier.notified(UsageCategory::UsageBased).is_empty());

        let decision = notifier.evaluate_usage_based(80.0, 100.0, Some(50.0)).unwrap();
        assert_eq!(decision.category, AlertCategory::UsageBased);
        assert_eq!(decision.threshold, 75.0);
        assert!(decision.message.contains("$50.00"));
    }

    #[test]
    fn categories_are_tracked_independently() {
        let mut notifier = notifier();
        assert!(notifier.evaluate(60.0, UsageCategory::Premium, None).is_some());
        notifier.resolve();
        let decision = notifier.evaluate(60.0, UsageCategory::UsageBased, None).unwrap();
        assert_eq!(decision.threshold, 50.0);
    }

    #[test]
    fn spending_fires_on_each_increment() {
        let mut notifier = notifier();
        let mut fired = Vec::new();
        for total in [0.5, 1.2, 1.9, 2.3] {
            if let Some(decision) = notifier.evaluate_spending(total) {
                fired.push((total, decision.threshold));
            }
            notifier.resolve();
        }
        assert_eq!(fired, vec![(1.2, 1.0), (2.3, 2.0)]);
    }

    #[test]
    fn spending_jump_announces_highest_multiple_only() {
        let mut notifier = notifier();
        let decision = notifier.evaluate_spending(4.75).unwrap();
        assert_eq!(decision.threshold, 4.0);
        notifier.resolve();
        assert!(notifier.evaluate_spending(4.9).is_none());
        let multiples: Vec<u64> = notifier.notified_spending().iter().copied().collect();
        assert_eq!(multiples, vec![1, 2, 3, 4]);
    }

    #[test]
    fn spending_rearms_after_new_period() {
        let mut notifier = notifier();
        assert!(notifier.evaluate_spending(3.0).is_some());
        notifier.resolve();
        assert!(notifier.evaluate_spending(0.2).is_none());
        assert!(notifier.notified_spending().is_empty());
        assert!(notifier.evaluate_spending(1.1).is_some());
    }

    #[test]
    fn zero_increment_disables_spending_alerts() {
        let mut notifier = ThresholdNotifier::new(&DEFAULT_USAGE_THRESHOLDS, 0.0, true);
        assert!(notifier.evaluate_spending(25.0).is_none());
    }

    #[test]
    fn disabled_alerts_never_fire() {
        let mut notifier = ThresholdNotifier::new(&DEFAULT_USAGE_THRESHOLDS, 1.0, false);
        assert!(notifier.evaluate(100.0, UsageCategory::Premium, None).is_none());
        assert!(notifier.evaluate_spending(10.0).is_none());
    }

    #[test]
    fn reset_clears_everything() {
        let mut notifier = notifier();
        notifier.evaluate(100.0, UsageCategory::Premium, None);
        notifier.reset();
        assert!(!notifier.is_in_flight());
        assert!(notifier.notified(UsageCategory::Premium).is_empty());
        assert!(notifier.evaluate(100.0, UsageCategory::Premium, None).is_some());
    }

    #[test]
    fn reconfigure_drops_unknown_thresholds() {
        let mut notifier = notifier();
        fire(&mut notifier, 80.0);
        notifier.reconfigure(&[50, 80], 1.0, true);
        let notified: Vec<u32> = notifier.notified(UsageCategory::Premium).iter().copied().collect();
        assert_eq!(notified, vec![50]);
        assert_eq!(fire(&mut notifier, 81.0), Some(80.0));
    }

    #[test]
    fn exhausted_premium_hint_depends_on_usage_based() {
        let mut notifier = notifier();
        let decision = notifier.evaluate(100.0, UsageCategory::Premium, None).unwrap();
        let blocked = decision.clone().with_usage_based_hint(false);
        assert_eq!(blocked.actions[0], NotificationAction::EnableUsageBased);
        let billed = decision.with_usage_based_hint(true);
        assert_eq!(billed.actions[0], NotificationAction::ManageLimit);
    }
}
