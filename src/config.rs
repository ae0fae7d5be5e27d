//! Configuration management
//!
//! Settings are loaded from `/etc/smartsentry/settings.json`, then
//! `~/.smartsentry/settings.json`; the first file found wins. Every key is
//! optional. A missing, unreadable, or syntactically invalid file leaves the
//! daemon running on full defaults, which in particular forces the emergency
//! unmount mode back to PASSIVE.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::decision::DecisionThresholds;
use crate::error::{Error, Result};

/// Allowed range for the scan cadence
const POLLING_INTERVAL_RANGE: std::ops::RangeInclusive<u64> = 10..=3600;

/// Temperature emergency cut-offs sit this far above the critical ones
const TEMP_EMERGENCY_MARGIN: i32 = 5;

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// UI locale; carried for collaborators, unused by the core
    pub language: String,
    pub polling_interval_s: u64,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            polling_interval_s: 60,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskSelection {
    /// Per-device opt-out; absent means monitored
    pub monitored_devices: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartThresholds {
    pub reallocated: u64,
    pub pending: u64,
    pub uncorrectable: u64,
    pub timeout: u64,
}

impl Default for SmartThresholds {
    fn default() -> Self {
        Self {
            reallocated: 5,
            pending: 1,
            uncorrectable: 1,
            timeout: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemperatureThresholds {
    pub hdd_warning: i32,
    pub hdd_critical: i32,
    pub ssd_warning: i32,
    pub ssd_critical: i32,
}

impl Default for TemperatureThresholds {
    fn default() -> Self {
        Self {
            hdd_warning: 50,
            hdd_critical: 60,
            ssd_warning: 60,
            ssd_critical: 70,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub smart: SmartThresholds,
    pub temperature: TemperatureThresholds,
}

/// Emergency unmount operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnmountMode {
    /// Evaluate but never act
    #[default]
    Passive,
    /// Act when all safety gates pass
    Active,
}

impl<'de> Deserialize<'de> for UnmountMode {
    // Anything that is not exactly ACTIVE stays PASSIVE; an unrecognized
    // mode string must never arm the executor.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if raw.eq_ignore_ascii_case("active") {
            Ok(UnmountMode::Active)
        } else {
            Ok(UnmountMode::Passive)
        }
    }
}

impl std::fmt::Display for UnmountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnmountMode::Passive => write!(f, "PASSIVE"),
            UnmountMode::Active => write!(f, "ACTIVE"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmergencyUnmountSettings {
    pub mode: UnmountMode,
    pub cooldown_s: u64,
}

impl Default for EmergencyUnmountSettings {
    fn default() -> Self {
        Self {
            mode: UnmountMode::Passive,
            cooldown_s: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GdcSettings {
    pub enabled: bool,
}

impl Default for GdcSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Per-device history cap in KiB
    pub retention_size_kb: u64,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            retention_size_kb: 1024,
        }
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Complete daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub disk_selection: DiskSelection,
    pub alert_thresholds: AlertThresholds,
    pub emergency_unmount: EmergencyUnmountSettings,
    pub gdc: GdcSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Candidate configuration files, first match wins.
    pub fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/smartsentry/settings.json")];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(PathBuf::from(home).join(".smartsentry/settings.json"));
        }
        paths
    }

    /// Load from the default path chain. Never fails: any problem is logged
    /// and the defaults (PASSIVE mode included) are used instead.
    pub fn load() -> Self {
        for path in Self::default_paths() {
            if !path.exists() {
                continue;
            }
            match Self::from_file(&path) {
                Ok(settings) => return settings,
                Err(e) => {
                    warn!(path = %path.display(), error = %e,
                        "configuration unusable, continuing with defaults (PASSIVE)");
                    return Self::default();
                }
            }
        }
        Self::default()
    }

    /// Load an explicitly named file. Unlike [`Settings::load`] this
    /// propagates the error so the CLI can exit with a config failure.
    pub fn load_from(path: &Path) -> Result<Self> {
        Self::from_file(path)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::ConfigInvalid {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Scan cadence, clamped to the supported range.
    pub fn polling_interval(&self) -> Duration {
        let secs = self
            .general
            .polling_interval_s
            .clamp(*POLLING_INTERVAL_RANGE.start(), *POLLING_INTERVAL_RANGE.end());
        Duration::from_secs(secs)
    }

    /// Per-identity unmount cooldown.
    pub fn unmount_cooldown(&self) -> Duration {
        Duration::from_secs(self.emergency_unmount.cooldown_s)
    }

    /// Whether a device is included in scans. Devices absent from the map
    /// are monitored.
    pub fn is_monitored(&self, os_name: &str) -> bool {
        self.disk_selection
            .monitored_devices
            .get(os_name)
            .copied()
            .unwrap_or(true)
    }

    /// Decision thresholds with the configured overrides applied.
    pub fn decision_thresholds(&self) -> DecisionThresholds {
        let smart = &self.alert_thresholds.smart;
        let temp = &self.alert_thresholds.temperature;
        DecisionThresholds {
            reallocated_warning: smart.reallocated,
            pending_warning: smart.pending,
            uncorrectable_warning: smart.uncorrectable,
            timeout_warning: smart.timeout,
            hdd_temp_warning: temp.hdd_warning,
            hdd_temp_critical: temp.hdd_critical,
            hdd_temp_emergency: temp.hdd_critical + TEMP_EMERGENCY_MARGIN,
            ssd_temp_warning: temp.ssd_warning,
            ssd_temp_critical: temp.ssd_critical,
            ssd_temp_emergency: temp.ssd_critical + TEMP_EMERGENCY_MARGIN,
            ..DecisionThresholds::default()
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = Settings::default();
        assert_eq!(s.general.polling_interval_s, 60);
        assert_eq!(s.general.language, "en");
        assert_eq!(s.emergency_unmount.mode, UnmountMode::Passive);
        assert_eq!(s.emergency_unmount.cooldown_s, 1800);
        assert!(s.gdc.enabled);
        assert_eq!(s.logging.retention_size_kb, 1024);
        assert!(s.is_monitored("sda"));
    }

    #[test]
    fn test_partial_file_merges_with_defaults() {
        let s: Settings = serde_json::from_str(
            r#"{
                "general": { "polling_interval_s": 120 },
                "emergency_unmount": { "mode": "ACTIVE" }
            }"#,
        )
        .unwrap();
        assert_eq!(s.general.polling_interval_s, 120);
        assert_eq!(s.general.language, "en");
        assert_eq!(s.emergency_unmount.mode, UnmountMode::Active);
        assert_eq!(s.emergency_unmount.cooldown_s, 1800);
    }

    #[test]
    fn test_unknown_mode_string_stays_passive() {
        let s: Settings = serde_json::from_str(
            r#"{ "emergency_unmount": { "mode": "AGGRESSIVE" } }"#,
        )
        .unwrap();
        assert_eq!(s.emergency_unmount.mode, UnmountMode::Passive);

        let s: Settings =
            serde_json::from_str(r#"{ "emergency_unmount": { "mode": "active" } }"#).unwrap();
        assert_eq!(s.emergency_unmount.mode, UnmountMode::Active);
    }

    #[test]
    fn test_polling_interval_clamped() {
        let mut s = Settings::default();
        s.general.polling_interval_s = 2;
        assert_eq!(s.polling_interval(), Duration::from_secs(10));
        s.general.polling_interval_s = 100_000;
        assert_eq!(s.polling_interval(), Duration::from_secs(3600));
    }

    #[test]
    fn test_monitored_devices_opt_out() {
        let s: Settings = serde_json::from_str(
            r#"{ "disk_selection": { "monitored_devices": { "sdb": false, "sdc": true } } }"#,
        )
        .unwrap();
        assert!(s.is_monitored("sda"));
        assert!(!s.is_monitored("sdb"));
        assert!(s.is_monitored("sdc"));
    }

    #[test]
    fn test_threshold_overrides_flow_into_decisions() {
        let s: Settings = serde_json::from_str(
            r#"{
                "alert_thresholds": {
                    "smart": { "reallocated": 10 },
                    "temperature": { "hdd_critical": 55 }
                }
            }"#,
        )
        .unwrap();
        let t = s.decision_thresholds();
        assert_eq!(t.reallocated_warning, 10);
        assert_eq!(t.hdd_temp_critical, 55);
        assert_eq!(t.hdd_temp_emergency, 60);
        assert_eq!(t.pending_warning, 1);
    }

    #[test]
    fn test_invalid_file_reports_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = Settings::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid { .. }));
    }
}
