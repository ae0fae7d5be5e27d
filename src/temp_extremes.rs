//! Observed maximum temperature tracker
//!
//! Not every drive reports a lifetime-max temperature, and some that do reset
//! it on power cycles. This tracker keeps the highest temperature ever seen
//! per identity across daemon restarts, persisted as one small JSON file per
//! device, and merges it with whatever the drive itself claims.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::device::DeviceIdentity;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TempExtreme {
    identity: DeviceIdentity,
    max_temperature: i32,
}

/// Persistent per-identity maximum observed temperature
pub struct TempExtremes {
    dir: PathBuf,
    cache: Mutex<HashMap<DeviceIdentity, i32>>,
}

impl TempExtremes {
    /// Create the tracker, loading any previously persisted extremes.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let mut cache = HashMap::new();
        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.filter_map(|e| e.ok()) {
                match fs::read_to_string(entry.path())
                    .map_err(|e| e.to_string())
                    .and_then(|text| {
                        serde_json::from_str::<TempExtreme>(&text).map_err(|e| e.to_string())
                    }) {
                    Ok(state) => {
                        cache.insert(state.identity, state.max_temperature);
                    }
                    Err(e) => {
                        warn!(file = %entry.path().display(), error = %e,
                            "skipping unreadable temperature state");
                    }
                }
            }
        }
        Self {
            dir,
            cache: Mutex::new(cache),
        }
    }

    /// Record an observation and return the all-time maximum for the
    /// identity. `drive_reported_max` folds in the drive's own lifetime-max
    /// figure when it has one.
    pub fn observe(
        &self,
        identity: &DeviceIdentity,
        current: Option<i32>,
        drive_reported_max: Option<i32>,
    ) -> Option<i32> {
        let candidate = current.max(drive_reported_max)?;

        let mut cache = self.cache.lock();
        let known = cache.get(identity).copied();
        let max = known.map_or(candidate, |k| k.max(candidate));
        if known != Some(max) {
            cache.insert(identity.clone(), max);
            self.persist(identity, max);
        }
        Some(max)
    }

    /// All-time maximum without recording a new observation.
    pub fn max_for(&self, identity: &DeviceIdentity) -> Option<i32> {
        self.cache.lock().get(identity).copied()
    }

    fn persist(&self, identity: &DeviceIdentity, max: i32) {
        let state = TempExtreme {
            identity: identity.clone(),
            max_temperature: max,
        };
        let path = self.dir.join(format!("{}.json", identity.sanitized()));
        let result = fs::create_dir_all(&self.dir).and_then(|_| {
            let text = serde_json::to_string_pretty(&state)?;
            fs::write(&path, text)
        });
        if let Err(e) = result {
            warn!(identity = %identity, error = %e, "failed to persist temperature state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("TestDisk", "T-1")
    }

    #[test]
    fn test_observe_keeps_maximum() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = TempExtremes::new(dir.path());

        assert_eq!(tracker.observe(&identity(), Some(38), None), Some(38));
        assert_eq!(tracker.observe(&identity(), Some(45), None), Some(45));
        assert_eq!(tracker.observe(&identity(), Some(40), None), Some(45));
    }

    #[test]
    fn test_drive_reported_max_merged() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = TempExtremes::new(dir.path());

        assert_eq!(tracker.observe(&identity(), Some(35), Some(52)), Some(52));
        assert_eq!(tracker.max_for(&identity()), Some(52));
    }

    #[test]
    fn test_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let tracker = TempExtremes::new(dir.path());
            tracker.observe(&identity(), Some(47), None);
        }
        let reloaded = TempExtremes::new(dir.path());
        assert_eq!(reloaded.max_for(&identity()), Some(47));
    }

    #[test]
    fn test_no_temperature_no_state() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = TempExtremes::new(dir.path());
        assert_eq!(tracker.observe(&identity(), None, None), None);
        assert_eq!(tracker.max_for(&identity()), None);
    }
}
