use std::io::{IsTerminal, Write};
use std::path::PathBuf;

use super::{StatusDisplay, StatusView, UsageLevel};
use crate::storage::status_snapshot;

/// Prints one status line per update and mirrors the view to a JSON snapshot
/// that widgets and scripts can read.
pub struct StatusLineDisplay {
    snapshot_path: Option<PathBuf>,
    show_tooltip: bool,
    color: bool,
    format: LineFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    Text,
    Json,
    PrettyJson,
}

impl StatusLineDisplay {
    pub fn new() -> Self {
        Self {
            snapshot_path: status_snapshot::snapshot_path().ok(),
            show_tooltip: false,
            color: std::io::stdout().is_terminal(),
            format: LineFormat::Text,
        }
    }

    pub fn with_format(mut self, format: LineFormat) -> Self {
        self.format = format;
        if format != LineFormat::Text {
            self.color = false;
        }
        self
    }

    pub fn with_tooltip(mut self, show_tooltip: bool) -> Self {
        self.show_tooltip = show_tooltip;
        self
    }

    pub fn with_snapshot_path(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot_path = path;
        self
    }

    pub fn format(&self, view: &StatusView) -> String {
        let json = match self.format {
            LineFormat::Text => None,
            LineFormat::Json => Some(serde_json::to_string(view)),
            LineFormat::PrettyJson => Some(serde_json::to_string_pretty(view)),
        };
        if let Some(json) = json {
            return json.unwrap_or_else(|e| format!(r#"{{"error":"{e}"}}"#));
        }

        let mut out = if self.color {
            format!("{}{}\x1b[0m", level_color(view.level), view.text)
        } else {
            view.text.clone()
        };
        if self.show_tooltip {
            for line in &view.tooltip {
                out.push_str("\n  ");
                out.push_str(line);
            }
        }
        out
    }
}

impl Default for StatusLineDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusDisplay for StatusLineDisplay {
    fn render(&self, view: &StatusView) {
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", self.format(view)).and_then(|_| stdout.flush()) {
            tracing::debug!("Failed to write status line: {}", e);
        }

        if let Some(path) = self.snapshot_path.as_ref() {
            if let Err(e) = status_snapshot::write_status_snapshot(path, view) {
                tracing::warn!("Failed to write status snapshot: {:#}", e);
            }
        }
    }
}

fn level_color(level: UsageLevel) -> &'static str {
    match level {
        UsageLevel::Low => "\x1b[32m",
        UsageLevel::Elevated => "\x1b[33m",
        UsageLevel::High => "\x1b[31m",
    }
}
