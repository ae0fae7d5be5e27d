//! Smart logger
//!
//! Persists per-device health history as JSONL, one self-contained object
//! per line, under `<history_root>/<sanitized_model>_<serial>/YYYY-MM-DD.jsonl`.
//! Entries are committed under a deterministic trigger set: first sighting,
//! hourly boundary, a change in a critical attribute / GDC state / score,
//! or an explicit operator force. Nothing else logs.
//!
//! The logger owns all mutable logging state (the last-logged map lives
//! here, created at daemon start and dropped at shutdown) and serializes
//! writes, so two commits can never interleave inside one file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::decision::Decision;
use crate::device::{DeviceIdentity, DeviceRecord, ScanOutcome};
use crate::error::Result;
use crate::gdc::GdcState;
use crate::scoring::{ComponentScore, HealthState};
use crate::smart::ids;

/// A score moving at least this much since the last committed record is a
/// change worth logging on its own.
const SCORE_DELTA_TRIGGER: i32 = 5;

// =============================================================================
// Record Types
// =============================================================================

/// Why a history entry was committed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogReason {
    FirstScan,
    Hourly,
    SmartChange,
    Manual,
}

/// The critical attribute values tracked for trend analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalAttributes {
    pub reallocated: Option<u64>,
    pub pending: Option<u64>,
    pub uncorrectable: Option<u64>,
    pub timeout: Option<u64>,
    pub temperature: Option<i32>,
}

impl CriticalAttributes {
    pub fn from_record(record: &DeviceRecord) -> Self {
        Self {
            reallocated: record.attributes.raw_value(ids::REALLOCATED_SECTORS),
            pending: record.attributes.raw_value(ids::PENDING_SECTORS),
            uncorrectable: record.attributes.raw_value(ids::REPORTED_UNCORRECTABLE),
            timeout: record.attributes.raw_value(ids::COMMAND_TIMEOUT),
            temperature: record.temperature,
        }
    }
}

/// One committed history line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    pub identity: DeviceIdentity,
    pub scan_outcome: ScanOutcome,
    pub health_score: Option<i32>,
    pub health_state: HealthState,
    pub component_breakdown: BTreeMap<String, ComponentScore>,
    pub decision: Option<Decision>,
    pub gdc_state: GdcState,
    pub log_reason: LogReason,
    pub attributes_critical: CriticalAttributes,
}

impl HistoryRecord {
    /// Build a committable record from a completed snapshot entry. Returns
    /// `None` for placeholders and entries without identity; history is
    /// keyed by identity, never by OS name.
    pub fn from_device_record(record: &DeviceRecord, now: DateTime<Utc>) -> Option<Self> {
        let identity = record.identity.clone()?;
        let scan_outcome = record.scan_outcome?;
        Some(Self {
            timestamp: now,
            identity,
            scan_outcome,
            health_score: record.health_score,
            health_state: record.health_state,
            component_breakdown: record.component_breakdown.clone(),
            decision: record.decision.clone(),
            gdc_state: record.gdc_state,
            log_reason: LogReason::FirstScan,
            attributes_critical: CriticalAttributes::from_record(record),
        })
    }
}

// =============================================================================
// Logger
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct LastLogged {
    /// (year, ordinal day, hour) of the last commit
    hour_stamp: (i32, u32, u32),
    critical: CriticalAttributes,
    gdc_state: GdcState,
    health_score: Option<i32>,
}

/// Per-device history writer with change- and time-triggered commits
pub struct HistoryLogger {
    root: PathBuf,
    retention_bytes: u64,
    state: Mutex<HashMap<DeviceIdentity, LastLogged>>,
}

impl HistoryLogger {
    pub fn new(root: impl Into<PathBuf>, retention_size_kb: u64) -> Self {
        Self {
            root: root.into(),
            retention_bytes: retention_size_kb * 1024,
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn device_dir(&self, identity: &DeviceIdentity) -> PathBuf {
        self.root.join(identity.sanitized())
    }

    /// Evaluate the trigger set and commit the record when one fires.
    /// Returns the reason used, or `None` when the record was skipped.
    pub fn commit(&self, mut record: HistoryRecord, force: bool) -> Result<Option<LogReason>> {
        let mut state = self.state.lock();

        let stamp = hour_stamp(record.timestamp);
        let reason = {
            let previous = state.get(&record.identity);
            decide_reason(previous, &record, stamp, force)
        };

        let Some(reason) = reason else {
            return Ok(None);
        };
        record.log_reason = reason;

        state.insert(
            record.identity.clone(),
            LastLogged {
                hour_stamp: stamp,
                critical: record.attributes_critical.clone(),
                gdc_state: record.gdc_state,
                health_score: record.health_score,
            },
        );

        // Write while still holding the lock: commits for one identity (and
        // one file) never interleave.
        self.append(&record)?;
        self.enforce_retention(&record.identity);
        Ok(Some(reason))
    }

    fn append(&self, record: &HistoryRecord) -> Result<()> {
        let dir = self.device_dir(&record.identity);
        fs::create_dir_all(&dir)?;
        let file = dir.join(format!("{}.jsonl", record.timestamp.format("%Y-%m-%d")));
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut f = fs::OpenOptions::new().create(true).append(true).open(&file)?;
        f.write_all(line.as_bytes())?;
        debug!(identity = %record.identity, reason = ?record.log_reason,
            file = %file.display(), "history entry committed");
        Ok(())
    }

    /// Most recent committed record for an identity, used for trend inputs.
    pub fn previous_record(&self, identity: &DeviceIdentity) -> Option<HistoryRecord> {
        let dir = self.device_dir(identity);
        let mut files = day_files(&dir);
        files.sort();
        while let Some(file) = files.pop() {
            let Ok(text) = fs::read_to_string(&file) else {
                continue;
            };
            for line in text.lines().rev() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<HistoryRecord>(line) {
                    Ok(record) => return Some(record),
                    Err(e) => {
                        warn!(file = %file.display(), error = %e, "skipping corrupt history line");
                    }
                }
            }
        }
        None
    }

    /// Full history for an identity in chronological order.
    pub fn history(&self, identity: &DeviceIdentity) -> Vec<HistoryRecord> {
        let dir = self.device_dir(identity);
        let mut files = day_files(&dir);
        files.sort();
        let mut records = Vec::new();
        for file in files {
            let Ok(text) = fs::read_to_string(&file) else {
                continue;
            };
            for line in text.lines() {
                if let Ok(record) = serde_json::from_str::<HistoryRecord>(line) {
                    records.push(record);
                }
            }
        }
        records
    }

    /// Evict oldest day files until the per-device directory fits the cap.
    /// The newest file always survives.
    fn enforce_retention(&self, identity: &DeviceIdentity) {
        let dir = self.device_dir(identity);
        let mut files = day_files(&dir);
        files.sort();

        let mut total: u64 = files
            .iter()
            .filter_map(|f| fs::metadata(f).ok())
            .map(|m| m.len())
            .sum();

        let mut idx = 0;
        while total > self.retention_bytes && files.len() - idx > 1 {
            let oldest = &files[idx];
            let size = fs::metadata(oldest).map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(oldest) {
                Ok(()) => {
                    debug!(file = %oldest.display(), "evicted old history file");
                    total = total.saturating_sub(size);
                }
                Err(e) => {
                    warn!(file = %oldest.display(), error = %e, "failed to evict history file");
                }
            }
            idx += 1;
        }
    }

    /// Forget trigger state for an identity (used after eviction so a
    /// returning device logs a fresh `first_scan`).
    pub fn forget(&self, identity: &DeviceIdentity) {
        self.state.lock().remove(identity);
    }
}

fn hour_stamp(ts: DateTime<Utc>) -> (i32, u32, u32) {
    (ts.year(), ts.ordinal(), ts.hour())
}

fn decide_reason(
    previous: Option<&LastLogged>,
    record: &HistoryRecord,
    stamp: (i32, u32, u32),
    force: bool,
) -> Option<LogReason> {
    if force {
        return Some(LogReason::Manual);
    }
    let Some(previous) = previous else {
        return Some(LogReason::FirstScan);
    };
    if previous.hour_stamp != stamp {
        return Some(LogReason::Hourly);
    }

    let changed = previous.critical.reallocated != record.attributes_critical.reallocated
        || previous.critical.pending != record.attributes_critical.pending
        || previous.critical.uncorrectable != record.attributes_critical.uncorrectable
        || previous.critical.timeout != record.attributes_critical.timeout
        || previous.gdc_state != record.gdc_state;
    let score_moved = match (previous.health_score, record.health_score) {
        (Some(a), Some(b)) => (a - b).abs() >= SCORE_DELTA_TRIGGER,
        (a, b) => a != b,
    };
    if changed || score_moved {
        return Some(LogReason::SmartChange);
    }
    None
}

fn day_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "jsonl"))
        .collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn identity() -> DeviceIdentity {
        DeviceIdentity::new("TestDisk 4000", "TD-0001")
    }

    fn record_at(ts: DateTime<Utc>, reallocated: u64, score: i32) -> HistoryRecord {
        HistoryRecord {
            timestamp: ts,
            identity: identity(),
            scan_outcome: ScanOutcome::Success,
            health_score: Some(score),
            health_state: HealthState::Good,
            component_breakdown: BTreeMap::new(),
            decision: None,
            gdc_state: GdcState::Ok,
            log_reason: LogReason::FirstScan,
            attributes_critical: CriticalAttributes {
                reallocated: Some(reallocated),
                pending: Some(0),
                uncorrectable: Some(0),
                timeout: Some(0),
                temperature: Some(35),
            },
        }
    }

    fn ts(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, minute, 0).unwrap()
    }

    #[test]
    fn test_first_scan_then_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        let reason = logger.commit(record_at(ts(9, 0), 0, 100), false).unwrap();
        assert_eq!(reason, Some(LogReason::FirstScan));

        // Same hour, nothing changed: skipped.
        let reason = logger.commit(record_at(ts(9, 10), 0, 100), false).unwrap();
        assert_eq!(reason, None);
    }

    #[test]
    fn test_hourly_boundary_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        logger.commit(record_at(ts(9, 59), 0, 100), false).unwrap();
        let reason = logger.commit(record_at(ts(10, 0), 0, 100), false).unwrap();
        assert_eq!(reason, Some(LogReason::Hourly));
    }

    #[test]
    fn test_attribute_change_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        logger.commit(record_at(ts(9, 0), 0, 100), false).unwrap();
        let reason = logger.commit(record_at(ts(9, 5), 3, 100), false).unwrap();
        assert_eq!(reason, Some(LogReason::SmartChange));
    }

    #[test]
    fn test_score_delta_triggers_at_five() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        logger.commit(record_at(ts(9, 0), 0, 100), false).unwrap();
        assert_eq!(logger.commit(record_at(ts(9, 5), 0, 97), false).unwrap(), None);
        assert_eq!(
            logger.commit(record_at(ts(9, 10), 0, 95), false).unwrap(),
            Some(LogReason::SmartChange)
        );
    }

    #[test]
    fn test_gdc_change_triggers() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        logger.commit(record_at(ts(9, 0), 0, 100), false).unwrap();
        let mut rec = record_at(ts(9, 5), 0, 100);
        rec.gdc_state = GdcState::Suspect;
        assert_eq!(
            logger.commit(rec, false).unwrap(),
            Some(LogReason::SmartChange)
        );
    }

    #[test]
    fn test_force_always_logs_as_manual() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        logger.commit(record_at(ts(9, 0), 0, 100), false).unwrap();
        assert_eq!(
            logger.commit(record_at(ts(9, 1), 0, 100), true).unwrap(),
            Some(LogReason::Manual)
        );
    }

    #[test]
    fn test_round_trip_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        let original = record_at(ts(9, 0), 17, 88);
        logger.commit(original.clone(), true).unwrap();

        let back = logger.previous_record(&identity()).expect("record");
        assert_eq!(back.attributes_critical, original.attributes_critical);
        assert_eq!(back.health_score, Some(88));
        assert_eq!(back.identity, identity());
        assert_eq!(back.log_reason, LogReason::Manual);
    }

    #[test]
    fn test_history_grows_monotonically() {
        let dir = tempfile::tempdir().unwrap();
        let logger = HistoryLogger::new(dir.path(), 1024);

        for i in 0..5 {
            logger.commit(record_at(ts(9, i), i as u64, 100), true).unwrap();
        }
        let history = logger.history(&identity());
        assert_eq!(history.len(), 5);
        for pair in history.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_retention_evicts_oldest_but_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        // 1 KiB cap fills quickly.
        let logger = HistoryLogger::new(dir.path(), 1);

        for day in 1..=6 {
            let ts = Utc.with_ymd_and_hms(2026, 3, day, 9, 0, 0).unwrap();
            logger.commit(record_at(ts, 0, 100), true).unwrap();
        }

        let files = day_files(&dir.path().join(identity().sanitized()));
        assert!(!files.is_empty());
        let mut names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        // The newest day always survives retention.
        assert_eq!(names.last().unwrap(), "2026-03-06.jsonl");
    }
}
