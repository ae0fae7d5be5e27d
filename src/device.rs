//! Device domain types
//!
//! A device is identified by `(model, serial)`; the OS-level name (`sda`,
//! `nvme0n1`) is ephemeral and only used to address the device node. All
//! history is keyed by identity.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::Decision;
use crate::gdc::GdcState;
use crate::scoring::{ComponentScore, EscalatedAttribute, HealthState};
use crate::smart::AttributeMap;

// =============================================================================
// Identity
// =============================================================================

/// Stable device identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub model: String,
    pub serial: String,
}

impl DeviceIdentity {
    pub fn new(model: impl Into<String>, serial: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            serial: serial.into(),
        }
    }

    /// Filesystem-safe identifier used as the per-device history directory.
    pub fn sanitized(&self) -> String {
        format!("{}_{}", self.model, self.serial)
            .replace(' ', "_")
            .replace('/', "-")
    }
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.model, self.serial)
    }
}

// =============================================================================
// Bus
// =============================================================================

/// How the device is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bus {
    Ata,
    /// SCSI-to-ATA translation (typically a USB-SATA bridge that passes
    /// SMART through)
    Sat,
    Nvme,
    Usb,
    Unknown,
}

impl Bus {
    /// smartctl `-d` argument for this bus, when one helps
    pub fn smartctl_hint(&self) -> Option<&'static str> {
        match self {
            Bus::Ata => Some("ata"),
            Bus::Sat => Some("sat"),
            Bus::Nvme => Some("nvme"),
            Bus::Usb | Bus::Unknown => None,
        }
    }

    pub fn is_usb(&self) -> bool {
        matches!(self, Bus::Usb)
    }
}

impl std::fmt::Display for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Bus::Ata => "ata",
            Bus::Sat => "sat",
            Bus::Nvme => "nvme",
            Bus::Usb => "usb",
            Bus::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Scan Outcome
// =============================================================================

/// Outcome of the most recent completed poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Success,
    Timeout,
    ParseError,
    NoSupport,
    Vanished,
}

impl ScanOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ScanOutcome::Success)
    }
}

impl std::fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanOutcome::Success => "success",
            ScanOutcome::Timeout => "timeout",
            ScanOutcome::ParseError => "parse_error",
            ScanOutcome::NoSupport => "no_support",
            ScanOutcome::Vanished => "vanished",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Device Record
// =============================================================================

/// One entry in the scan snapshot.
///
/// A record is either a fresh placeholder (`scanning_in_progress` with no
/// outcome and no attributes) or a completed entry. A placeholder installed
/// over a known device keeps the previous data so readers still see
/// last-known values while the poll runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Current OS device name (ephemeral)
    pub os_name: String,
    /// Stable identity; absent until the first successful identify
    pub identity: Option<DeviceIdentity>,
    pub capacity_bytes: Option<u64>,
    /// True for spinning disks; absent until known
    pub rotational: Option<bool>,
    pub bus: Bus,
    /// Attribute map from the last successful read (empty when unreadable)
    pub attributes: AttributeMap,
    /// Outcome of the last completed poll; absent only on a fresh placeholder
    pub scan_outcome: Option<ScanOutcome>,
    pub health_score: Option<i32>,
    pub health_state: HealthState,
    pub component_breakdown: BTreeMap<String, ComponentScore>,
    pub escalated_attributes: Vec<EscalatedAttribute>,
    pub gdc_state: GdcState,
    pub decision: Option<Decision>,
    /// Whether this device is included in future scans
    pub monitored: bool,
    /// True between placeholder install and result publication
    pub scanning_in_progress: bool,
    /// Current temperature in °C
    pub temperature: Option<i32>,
    /// Highest temperature ever observed for this identity
    pub temperature_max: Option<i32>,
    /// Duration of the last poll
    pub last_smart_response_time: Option<Duration>,
    pub last_updated: DateTime<Utc>,
    /// Dispatch instant of the poll that produced this entry. Used to apply
    /// results in dispatch order; not part of the serialized record.
    #[serde(skip)]
    pub dispatched_at: Option<Instant>,
}

impl DeviceRecord {
    /// A brand-new placeholder for a device seen for the first time.
    pub fn placeholder(os_name: impl Into<String>, bus: Bus, now: DateTime<Utc>) -> Self {
        Self {
            os_name: os_name.into(),
            identity: None,
            capacity_bytes: None,
            rotational: None,
            bus,
            attributes: AttributeMap::new(),
            scan_outcome: None,
            health_score: None,
            health_state: HealthState::Unknown,
            component_breakdown: BTreeMap::new(),
            escalated_attributes: Vec::new(),
            gdc_state: GdcState::Ok,
            decision: None,
            monitored: true,
            scanning_in_progress: true,
            temperature: None,
            temperature_max: None,
            last_smart_response_time: None,
            last_updated: now,
            dispatched_at: None,
        }
    }

    /// A fresh placeholder carries no data at all.
    pub fn is_placeholder(&self) -> bool {
        self.scanning_in_progress && self.scan_outcome.is_none()
    }

    /// Whether a result dispatched at `dispatched` may replace this entry.
    ///
    /// A placeholder always accepts. Otherwise `Success` beats any
    /// non-`Success`; among results of equal standing the newest dispatch
    /// wins and stale dispatches are rejected.
    pub fn accepts(&self, outcome: ScanOutcome, dispatched: Instant) -> bool {
        if self.is_placeholder() || self.scanning_in_progress {
            return true;
        }
        let stored_success = self.scan_outcome.is_some_and(|o| o.is_success());
        match (outcome.is_success(), stored_success) {
            (true, false) => true,
            (false, true) => false,
            _ => self
                .dispatched_at
                .map_or(true, |stored| dispatched > stored),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_sanitized() {
        let id = DeviceIdentity::new("WDC WD40EFRX-68N", "WD-WCC7K1234567");
        assert_eq!(id.sanitized(), "WDC_WD40EFRX-68N_WD-WCC7K1234567");

        let slashed = DeviceIdentity::new("Some/Model", "S/N 1");
        assert!(!slashed.sanitized().contains('/'));
        assert!(!slashed.sanitized().contains(' '));
    }

    #[test]
    fn test_fresh_placeholder_shape() {
        let rec = DeviceRecord::placeholder("sda", Bus::Ata, Utc::now());
        assert!(rec.is_placeholder());
        assert!(rec.attributes.is_empty());
        assert!(rec.scan_outcome.is_none());
        assert_eq!(rec.health_state, HealthState::Unknown);
    }

    #[test]
    fn test_placeholder_accepts_anything() {
        let rec = DeviceRecord::placeholder("sda", Bus::Ata, Utc::now());
        assert!(rec.accepts(ScanOutcome::Timeout, Instant::now()));
        assert!(rec.accepts(ScanOutcome::Success, Instant::now()));
    }

    #[test]
    fn test_success_beats_failure_and_stale_rejected() {
        let early = Instant::now();
        let late = early + Duration::from_secs(1);

        let mut rec = DeviceRecord::placeholder("sda", Bus::Ata, Utc::now());
        rec.scanning_in_progress = false;
        rec.scan_outcome = Some(ScanOutcome::Success);
        rec.dispatched_at = Some(late);

        // A failure never overwrites a stored success.
        assert!(!rec.accepts(ScanOutcome::Timeout, late + Duration::from_secs(1)));
        // A success dispatched before the stored one is stale.
        assert!(!rec.accepts(ScanOutcome::Success, early));
        // A newer success wins.
        assert!(rec.accepts(ScanOutcome::Success, late + Duration::from_secs(1)));

        // A success always replaces a stored failure, even an "older" one.
        rec.scan_outcome = Some(ScanOutcome::Timeout);
        assert!(rec.accepts(ScanOutcome::Success, early));
    }

    #[test]
    fn test_serde_skips_dispatch_instant() {
        let mut rec = DeviceRecord::placeholder("sdb", Bus::Usb, Utc::now());
        rec.dispatched_at = Some(Instant::now());
        let json = serde_json::to_string(&rec).unwrap();
        let back: DeviceRecord = serde_json::from_str(&json).unwrap();
        assert!(back.dispatched_at.is_none());
        assert_eq!(back.os_name, "sdb");
    }
}
