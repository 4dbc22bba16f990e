use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::display::StatusView;

const STATUS_SNAPSHOT_FILENAME: &str = "status-snapshot.json";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusSnapshot<'a> {
    written_at: String,
    status: &'a StatusView,
}

/// Last persisted status, read back without a network round trip.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedStatus {
    pub written_at: String,
    pub status: CachedView,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedView {
    pub kind: String,
    pub text: String,
    #[serde(default)]
    pub tooltip: Vec<String>,
}

pub fn snapshot_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().context("Could not determine data directory")?;
    Ok(data_dir.join(crate::APP_DIR_NAME).join(STATUS_SNAPSHOT_FILENAME))
}

pub fn read_status_snapshot(path: &Path) -> Option<CachedStatus> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

pub fn write_status_snapshot(path: &Path, view: &StatusView) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create status snapshot directory")?;
    }

    let snapshot = StatusSnapshot {
        written_at: Utc::now().to_rfc3339(),
        status: view,
    };
    let payload =
        serde_json::to_string_pretty(&snapshot).context("Failed to serialize status snapshot")?;
    fs::write(path, payload).context("Failed to write status snapshot")?;
    Ok(())
}
