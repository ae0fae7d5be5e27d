//! Device lifecycle event log
//!
//! Append-only JSONL record of devices appearing, vanishing, reappearing and
//! getting stuck mid-scan. Kept separate from the per-device health history
//! so inventory churn is auditable even for devices that never produced a
//! single SMART record.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::device::DeviceIdentity;

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleEventKind {
    DeviceAdded,
    DeviceRemoved,
    DeviceReconnected,
    StuckScan,
}

/// One lifecycle event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub event: LifecycleEventKind,
    pub os_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<DeviceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Append-only writer for lifecycle events
pub struct LifecycleLog {
    file: PathBuf,
    write_lock: Mutex<()>,
}

impl LifecycleLog {
    pub fn new(events_dir: impl Into<PathBuf>) -> Self {
        Self {
            file: events_dir.into().join("lifecycle.jsonl"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn record(
        &self,
        event: LifecycleEventKind,
        os_name: &str,
        identity: Option<&DeviceIdentity>,
        detail: Option<String>,
    ) {
        let entry = LifecycleEvent {
            timestamp: Utc::now(),
            event,
            os_name: os_name.to_string(),
            identity: identity.cloned(),
            detail,
        };
        if let Err(e) = self.append(&entry) {
            // Lifecycle logging is best-effort; losing an event must never
            // disturb scanning.
            warn!(error = %e, "failed to write lifecycle event");
        }
    }

    fn append(&self, entry: &LifecycleEvent) -> std::io::Result<()> {
        let _guard = self.write_lock.lock();
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file)?;
        f.write_all(line.as_bytes())
    }

    /// All recorded events, oldest first. Unparseable lines are skipped.
    pub fn events(&self) -> Vec<LifecycleEvent> {
        let Ok(text) = fs::read_to_string(&self.file) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }
}
