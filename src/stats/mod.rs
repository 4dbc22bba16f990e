//! The poll loop
//!
//! One task owns every piece of mutable state: backoff counters, notified
//! thresholds, and which timer is active. Focus changes, manual refreshes
//! and settings updates arrive as [`StatsEvent`]s; answered prompts come back
//! over an internal channel so a pending prompt never blocks polling.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::backoff::{format_countdown, CooldownTick, ErrorBackoffController, FailureTransition};
use crate::billing::BILLING_DAY;
use crate::display::{build_view, StatusDisplay, StatusView};
use crate::notifier::{
    NotificationAction, NotificationDecision, NotificationPrompt, PromptOutcome, PromptResolved,
    ThresholdNotifier, UsageCategory,
};
use crate::providers::{Credential, CredentialSource, FetchError, UsageFetcher, UsageLimitStatus, UsageSnapshot};
use crate::settings::AppSettings;

const COUNTDOWN_TICK: StdDuration = StdDuration::from_secs(1);
const DASHBOARD_URL: &str = "https://cursor.com/settings";

/// Inputs the loop reacts to besides its own timers.
#[derive(Debug, Clone, PartialEq)]
pub enum StatsEvent {
    FocusLost,
    FocusGained,
    RefreshRequested,
    SettingsChanged(AppSettings),
    ResetNotifications,
    Shutdown,
}

/// Which timer drives the loop. The refresh and countdown timers are never
/// active together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollMode {
    Refresh,
    Countdown,
    Paused,
}

#[derive(Debug, PartialEq)]
pub enum CycleOutcome {
    NoCredential,
    Updated {
        notification: Option<NotificationDecision>,
    },
    Failed {
        transition: FailureTransition,
    },
}

pub struct StatsOrchestrator {
    settings: AppSettings,
    fetcher: Box<dyn UsageFetcher>,
    credentials: Box<dyn CredentialSource>,
    display: Box<dyn StatusDisplay>,
    prompt: Arc<dyn NotificationPrompt>,
    backoff: ErrorBackoffController,
    notifier: ThresholdNotifier,
    mode: PollMode,
    focused: bool,
    last_error: Option<String>,
    prompt_tx: mpsc::UnboundedSender<PromptResolved>,
    prompt_rx: mpsc::UnboundedReceiver<PromptResolved>,
}

impl StatsOrchestrator {
    pub fn new(
        settings: AppSettings,
        fetcher: Box<dyn UsageFetcher>,
        credentials: Box<dyn CredentialSource>,
        display: Box<dyn StatusDisplay>,
        prompt: Arc<dyn NotificationPrompt>,
    ) -> Self {
        let settings = settings.sanitized();
        let notifier = ThresholdNotifier::new(
            &settings.usage_alert_thresholds,
            settings.spending_alert_threshold,
            settings.enable_alerts,
        );
        let (prompt_tx, prompt_rx) = mpsc::unbounded_channel();

        Self {
            settings,
            fetcher,
            credentials,
            display,
            prompt,
            backoff: ErrorBackoffController::new(),
            notifier,
            mode: PollMode::Refresh,
            focused: true,
            last_error: None,
            prompt_tx,
            prompt_rx,
        }
    }

    pub fn with_backoff(mut self, backoff: ErrorBackoffController) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn mode(&self) -> PollMode {
        self.mode
    }

    pub fn backoff(&self) -> &ErrorBackoffController {
        &self.backoff
    }

    pub fn notifier(&self) -> &ThresholdNotifier {
        &self.notifier
    }

    pub fn settings(&self) -> &AppSettings {
        &self.settings
    }

    /// Mode to fall back to once no cooldown is running.
    fn idle_mode(&self) -> PollMode {
        if self.focused {
            PollMode::Refresh
        } else {
            PollMode::Paused
        }
    }

    /// Run one credential → fetch → alert → render cycle.
    pub async fn poll_cycle(&mut self, now: DateTime<Utc>) -> CycleOutcome {
        let Some(credential) = self.credentials.get_credential().await else {
            tracing::info!("No Cursor session available, skipping refresh");
            self.display.render(&StatusView::no_token(now));
            return CycleOutcome::NoCredential;
        };

        match self.fetch_all(credential).await {
            Ok((snapshot, limit_status)) => self.on_success(&snapshot, limit_status, now),
            Err(error) => self.on_failure(error, now),
        }
    }

    async fn fetch_all(
        &self,
        credential: Credential,
    ) -> Result<(UsageSnapshot, Option<UsageLimitStatus>), FetchError> {
        match self.fetch_with(&credential).await {
            Err(error) if error.is_auth() => {
                tracing::info!("Cursor session rejected ({}), retrying with a fresh credential", error);
                let Some(fresh) = self.credentials.get_credential().await else {
                    return Err(error);
                };
                self.fetch_with(&fresh).await
            }
            other => other,
        }
    }

    async fn fetch_with(
        &self,
        credential: &Credential,
    ) -> Result<(UsageSnapshot, Option<UsageLimitStatus>), FetchError> {
        let limit_status = match self.fetcher.fetch_usage_limit_status(credential).await {
            Ok(status) => Some(status),
            Err(error) if error.is_auth() => return Err(error),
            Err(error) => {
                tracing::warn!(operation = "fetch usage limit", "Treating usage-based pricing as disabled: {}", error);
                None
            }
        };
        let snapshot = self.fetcher.fetch_usage_snapshot(credential).await?;
        Ok((snapshot, limit_status))
    }

    fn on_success(
        &mut self,
        snapshot: &UsageSnapshot,
        limit_status: Option<UsageLimitStatus>,
        now: DateTime<Utc>,
    ) -> CycleOutcome {
        if self.backoff.record_success() {
            tracing::info!("Refresh succeeded during cooldown, resuming regular polling");
        }
        if self.mode == PollMode::Countdown {
            self.mode = self.idle_mode();
        }
        self.last_error = None;

        let view = build_view(snapshot, limit_status, now, BILLING_DAY);
        self.display.render(&view);

        let notification = self.evaluate_alerts(snapshot, limit_status);
        if let Some(decision) = notification.as_ref() {
            self.dispatch_prompt(decision.clone());
        }
        CycleOutcome::Updated { notification }
    }

    fn evaluate_alerts(
        &mut self,
        snapshot: &UsageSnapshot,
        limit_status: Option<UsageLimitStatus>,
    ) -> Option<NotificationDecision> {
        let limit_status = limit_status.unwrap_or_default();
        let premium_percent = snapshot.premium_percent();

        if let Some(decision) = self.notifier.evaluate(premium_percent, UsageCategory::Premium, None) {
            return Some(decision.with_usage_based_hint(limit_status.enabled));
        }

        let total = snapshot.usage_total();
        if let Some(limit) = limit_status.limit.filter(|limit| *limit > 0.0) {
            let usage_percent = total / limit * 100.0;
            if let Some(decision) =
                self.notifier
                    .evaluate_usage_based(usage_percent, premium_percent, Some(limit))
            {
                return Some(decision);
            }
        }

        self.notifier.evaluate_spending(total)
    }

    fn dispatch_prompt(&self, decision: NotificationDecision) {
        let prompt = Arc::clone(&self.prompt);
        let tx = self.prompt_tx.clone();
        tokio::spawn(async move {
            let outcome = prompt.prompt(&decision).await;
            let _ = tx.send(PromptResolved {
                category: decision.category,
                outcome,
            });
        });
    }

    fn on_failure(&mut self, error: FetchError, now: DateTime<Utc>) -> CycleOutcome {
        tracing::warn!(
            operation = "fetch usage",
            errors = self.backoff.error_count() + 1,
            "Failed to refresh Cursor usage: {}",
            error
        );

        let transition = self.backoff.record_failure(now);
        if transition == FailureTransition::CooldownStarted {
            self.mode = PollMode::Countdown;
        }

        let message = error.to_string();
        let view = match self.backoff.countdown_text(now) {
            Some(countdown) => StatusView::cooldown(&message, countdown, now),
            None => StatusView::degraded(&message, now),
        };
        self.last_error = Some(message);
        self.display.render(&view);

        CycleOutcome::Failed { transition }
    }

    /// One-second countdown tick while cooling down.
    pub async fn on_countdown_tick(&mut self, now: DateTime<Utc>) {
        match self.backoff.tick(now) {
            CooldownTick::Remaining(remaining) => {
                let error = self.last_error.as_deref().unwrap_or("unknown error");
                self.display
                    .render(&StatusView::cooldown(error, format_countdown(remaining), now));
            }
            CooldownTick::Expired => {
                self.mode = self.idle_mode();
                self.poll_cycle(now).await;
            }
            CooldownTick::Inactive => {
                self.mode = self.idle_mode();
            }
        }
    }

    pub fn on_prompt_resolved(&mut self, resolved: PromptResolved) {
        self.notifier.resolve();
        match resolved.outcome {
            PromptOutcome::Selected(NotificationAction::DisableAlerts) => {
                tracing::info!("Alerts disabled from notification");
                self.settings.enable_alerts = false;
                self.apply_alert_settings();
            }
            PromptOutcome::Selected(action) => {
                tracing::info!(
                    category = ?resolved.category,
                    ?action,
                    "Alert action selected, manage usage at {}",
                    DASHBOARD_URL
                );
            }
            PromptOutcome::Dismissed => {
                tracing::debug!(category = ?resolved.category, "Alert dismissed");
            }
        }
    }

    fn apply_alert_settings(&mut self) {
        self.notifier.reconfigure(
            &self.settings.usage_alert_thresholds,
            self.settings.spending_alert_threshold,
            self.settings.enable_alerts,
        );
    }

    /// Returns `false` once the loop should stop.
    pub async fn handle_event(&mut self, event: StatsEvent, now: DateTime<Utc>) -> bool {
        tracing::debug!(?event, "Stats event");
        match event {
            StatsEvent::FocusLost => {
                self.focused = false;
                if self.mode == PollMode::Refresh {
                    self.mode = PollMode::Paused;
                }
            }
            StatsEvent::FocusGained => {
                self.focused = true;
                if self.mode != PollMode::Countdown {
                    self.mode = PollMode::Refresh;
                    self.poll_cycle(now).await;
                }
            }
            StatsEvent::RefreshRequested => {
                self.poll_cycle(now).await;
            }
            StatsEvent::SettingsChanged(settings) => {
                self.settings = settings.sanitized();
                self.apply_alert_settings();
                debug_settings_changed(&self.settings);
            }
            StatsEvent::ResetNotifications => self.notifier.reset(),
            StatsEvent::Shutdown => return false,
        }
        true
    }

    fn active_timer(&self) -> Option<(PollMode, StdDuration)> {
        match self.mode {
            PollMode::Refresh => Some((PollMode::Refresh, self.settings.refresh_interval())),
            PollMode::Countdown => Some((PollMode::Countdown, COUNTDOWN_TICK)),
            PollMode::Paused => None,
        }
    }

    /// Drive the loop until [`StatsEvent::Shutdown`] or the event channel
    /// closes.
    pub async fn run(mut self, mut events: mpsc::Receiver<StatsEvent>) {
        self.notifier.reset();
        tracing::info!(
            interval_secs = self.settings.refresh_interval_seconds,
            "Starting Cursor usage polling"
        );
        self.poll_cycle(Utc::now()).await;

        let mut active = None;
        let mut ticker: Option<Interval> = None;

        loop {
            let wanted = self.active_timer();
            if wanted != active {
                ticker = wanted.map(|(_, period)| make_interval(period));
                active = wanted;
            }

            tokio::select! {
                _ = next_tick(&mut ticker) => {
                    let now = Utc::now();
                    match self.mode {
                        PollMode::Refresh => {
                            self.poll_cycle(now).await;
                        }
                        PollMode::Countdown => self.on_countdown_tick(now).await,
                        PollMode::Paused => {}
                    }
                }
                event = events.recv() => {
                    let keep_running = match event {
                        Some(event) => self.handle_event(event, Utc::now()).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                Some(resolved) = self.prompt_rx.recv() => self.on_prompt_resolved(resolved),
            }
        }

        tracing::info!("Stopped Cursor usage polling");
    }
}

fn debug_settings_changed(settings: &AppSettings) {
    crate::debug_settings::set_file_logging(settings.debug_logging);
    tracing::info!(
        interval_secs = settings.refresh_interval_seconds,
        alerts = settings.enable_alerts,
        "Settings updated"
    );
}

fn make_interval(period: StdDuration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
