//! Notification prompt trait definition

use async_trait::async_trait;

use super::{AlertCategory, NotificationAction, NotificationDecision};

/// How the user answered a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptOutcome {
    Selected(NotificationAction),
    Dismissed,
}

/// Sent back to the poll loop once a prompt has been answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptResolved {
    pub category: AlertCategory,
    pub outcome: PromptOutcome,
}

/// Trait for showing an alert to the user
#[async_trait]
pub trait NotificationPrompt: Send + Sync {
    /// Show the alert and wait until it is answered or dismissed
    async fn prompt(&self, decision: &NotificationDecision) -> PromptOutcome;
}

/// Writes alerts to the log and stderr; never waits for an answer.
pub struct LogPrompt;

#[async_trait]
impl NotificationPrompt for LogPrompt {
    async fn prompt(&self, decision: &NotificationDecision) -> PromptOutcome {
        let actions: Vec<&str> = decision.actions.iter().map(|a| a.label()).collect();
        tracing::warn!(category = ?decision.category, "{}", decision.message);
        eprintln!("\n[cursorbar] {} ({})", decision.message, actions.join(" | "));
        PromptOutcome::Dismissed
    }
}
