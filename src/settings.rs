//! User settings
//!
//! Stored as camelCase JSON in the app data directory. A missing file means
//! defaults; a malformed one is reported and replaced by defaults so the poll
//! loop always starts.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::notifier::{normalize_thresholds, DEFAULT_SPENDING_INCREMENT, DEFAULT_USAGE_THRESHOLDS};

const SETTINGS_FILENAME: &str = "settings.json";

/// Polling faster than this gets the session rate limited.
pub const MIN_REFRESH_INTERVAL_SECS: u64 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppSettings {
    pub refresh_interval_seconds: u64,
    pub enable_alerts: bool,
    pub usage_alert_thresholds: Vec<u32>,
    /// Dollar increment for spending alerts, 0 disables them.
    pub spending_alert_threshold: f64,
    pub debug_logging: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            refresh_interval_seconds: 60,
            enable_alerts: true,
            usage_alert_thresholds: DEFAULT_USAGE_THRESHOLDS.to_vec(),
            spending_alert_threshold: DEFAULT_SPENDING_INCREMENT,
            debug_logging: false,
        }
    }
}

impl AppSettings {
    /// Clamp values into their supported ranges.
    pub fn sanitized(mut self) -> Self {
        self.refresh_interval_seconds = self.refresh_interval_seconds.max(MIN_REFRESH_INTERVAL_SECS);
        self.usage_alert_thresholds = normalize_thresholds(&self.usage_alert_thresholds);
        if !self.spending_alert_threshold.is_finite() || self.spending_alert_threshold < 0.0 {
            self.spending_alert_threshold = 0.0;
        }
        self
    }

    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_seconds.max(MIN_REFRESH_INTERVAL_SECS))
    }

    pub fn load() -> Self {
        match settings_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                tracing::warn!("Using default settings: {}", e);
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read settings {}: {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings.sanitized(),
            Err(e) => {
                tracing::warn!("Ignoring malformed settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }
        let payload = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, payload).context("Failed to write settings")?;
        tracing::debug!("Saved settings to {}", path.display());
        Ok(())
    }
}

pub fn settings_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data_dir.join(crate::APP_DIR_NAME).join(SETTINGS_FILENAME))
}
