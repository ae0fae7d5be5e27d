//! SMART reader
//!
//! Wraps an external `smartctl` invocation and classifies the result. The
//! reader never infers health from a failure; it only reports what kind of
//! failure occurred and leaves aggregation to the GDC manager.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::device::{Bus, DeviceIdentity};
use crate::smart::{ids, AttributeMap, SmartAttribute};

/// Default per-call deadline for the smartctl subprocess
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(15);

// =============================================================================
// Outcome
// =============================================================================

/// Everything a successful read yields
#[derive(Debug, Clone)]
pub struct SmartPayload {
    pub identity: Option<DeviceIdentity>,
    pub attributes: AttributeMap,
    pub capacity_bytes: Option<u64>,
    pub rotational: Option<bool>,
    pub bus: Bus,
    pub temperature: Option<i32>,
    /// Drive-reported lifetime maximum temperature
    pub temperature_max_lifetime: Option<i32>,
    pub elapsed: Duration,
}

/// Classified result of one reader call
#[derive(Debug, Clone)]
pub enum ReadOutcome {
    Success(Box<SmartPayload>),
    /// No response within the deadline
    Timeout { elapsed: Duration },
    /// No JSON, invalid JSON, or inconsistent fields
    ParseError { reason: String },
    /// Device reports no SMART capability (USB bridge without pass-through)
    NoSupport,
    /// Device node was gone at the start of the call
    Vanished,
}

// =============================================================================
// Port
// =============================================================================

/// Reader abstraction so the scan engine can be exercised without hardware.
#[async_trait]
pub trait SmartReader: Send + Sync {
    async fn read(&self, os_name: &str, bus_hint: Bus) -> ReadOutcome;
}

// =============================================================================
// smartctl Adapter
// =============================================================================

/// Production reader invoking smartmontools
#[derive(Debug, Clone)]
pub struct SmartctlReader {
    deadline: Duration,
}

impl SmartctlReader {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    /// Check that smartmontools is installed and answers.
    pub fn is_available() -> bool {
        std::process::Command::new("smartctl")
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }
}

impl Default for SmartctlReader {
    fn default() -> Self {
        Self::new(DEFAULT_DEADLINE)
    }
}

#[async_trait]
impl SmartReader for SmartctlReader {
    async fn read(&self, os_name: &str, bus_hint: Bus) -> ReadOutcome {
        let dev_path = format!("/dev/{os_name}");
        if !Path::new(&dev_path).exists() {
            return ReadOutcome::Vanished;
        }

        let mut cmd = tokio::process::Command::new("smartctl");
        cmd.arg("-a").arg("-j");
        if let Some(hint) = bus_hint.smartctl_hint() {
            cmd.arg("-d").arg(hint);
        }
        cmd.arg(&dev_path);
        cmd.kill_on_drop(true);

        let started = Instant::now();
        let output = match tokio::time::timeout(self.deadline, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(device = os_name, error = %e, "failed to launch smartctl");
                return ReadOutcome::ParseError {
                    reason: format!("failed to launch smartctl: {e}"),
                };
            }
            Err(_) => {
                let elapsed = started.elapsed();
                debug!(device = os_name, ?elapsed, "smartctl deadline exceeded");
                return ReadOutcome::Timeout { elapsed };
            }
        };
        let elapsed = started.elapsed();

        // smartctl sets exit bits for all sorts of warnings while still
        // emitting complete JSON; classify from the payload, not the status.
        let json: Value = match serde_json::from_slice(&output.stdout) {
            Ok(json) => json,
            Err(e) => {
                return ReadOutcome::ParseError {
                    reason: format!("smartctl produced no usable JSON: {e}"),
                };
            }
        };

        classify(os_name, &json, bus_hint, elapsed)
    }
}

// =============================================================================
// Classification
// =============================================================================

/// Classify a parsed smartctl JSON document. Pure, so the whole decision
/// table is testable with canned output.
pub fn classify(os_name: &str, json: &Value, bus_hint: Bus, elapsed: Duration) -> ReadOutcome {
    if json["smart_support"]["available"] == Value::Bool(false) {
        return ReadOutcome::NoSupport;
    }
    if let Some(messages) = json["smartctl"]["messages"].as_array() {
        for msg in messages {
            let text = msg["string"].as_str().unwrap_or_default();
            if text.contains("Unknown USB bridge") || text.contains("Unsupported") {
                return ReadOutcome::NoSupport;
            }
        }
    }

    // Inconsistent fields mean the bridge is mangling the protocol.
    if let Some(hours) = json["power_on_time"]["hours"].as_i64() {
        if hours < 0 {
            return ReadOutcome::ParseError {
                reason: format!("negative power-on hours: {hours}"),
            };
        }
    }

    let mut attributes = AttributeMap::new();
    if let Some(table) = json["ata_smart_attributes"]["table"].as_array() {
        for entry in table {
            if let Some(attr) = parse_ata_attribute(entry) {
                attributes.insert(attr);
            }
        }
    } else if let Some(nvme) = json["nvme_smart_health_information_log"].as_object() {
        synthesize_nvme_attributes(&mut attributes, nvme);
    }

    if attributes.is_empty() {
        debug!(device = os_name, "device answered without any SMART table");
        return ReadOutcome::NoSupport;
    }

    let model = json["model_name"]
        .as_str()
        .or_else(|| json["model_family"].as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let serial = json["serial_number"]
        .as_str()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    let identity = match (model, serial) {
        (Some(model), Some(serial)) => Some(DeviceIdentity { model, serial }),
        _ => None,
    };

    let bus = match json["device"]["type"].as_str() {
        Some("sat") => Bus::Sat,
        Some("nvme") => Bus::Nvme,
        Some(t) if t.starts_with("usb") => Bus::Usb,
        Some("ata") | Some("scsi") => Bus::Ata,
        _ => bus_hint,
    };

    let rotational = match json["rotation_rate"].as_u64() {
        Some(0) => Some(false),
        Some(_) => Some(true),
        None if bus == Bus::Nvme => Some(false),
        None => None,
    };

    ReadOutcome::Success(Box::new(SmartPayload {
        identity,
        attributes,
        capacity_bytes: json["user_capacity"]["bytes"].as_u64(),
        rotational,
        bus,
        temperature: json["temperature"]["current"].as_i64().map(|t| t as i32),
        temperature_max_lifetime: json["temperature"]["lifetime_max"]
            .as_i64()
            .map(|t| t as i32),
        elapsed,
    }))
}

fn parse_ata_attribute(entry: &Value) -> Option<SmartAttribute> {
    Some(SmartAttribute {
        id: u8::try_from(entry["id"].as_u64()?).ok()?,
        name: entry["name"].as_str().unwrap_or_default().to_string(),
        raw_value: entry["raw"]["value"].as_u64().unwrap_or(0),
        normalized: entry["value"].as_u64().unwrap_or(0) as u8,
        worst: entry["worst"].as_u64().unwrap_or(0) as u8,
        threshold: entry["thresh"].as_u64().unwrap_or(0) as u8,
        flags: entry["flags"]["value"].as_u64().unwrap_or(0) as u16,
    })
}

/// NVMe drives publish a health log instead of an ATA attribute table; map
/// the fields this daemon interprets onto their ATA equivalents. One NVMe
/// data unit is 1000 512-byte sectors.
fn synthesize_nvme_attributes(
    attributes: &mut AttributeMap,
    nvme: &serde_json::Map<String, Value>,
) {
    let mut add = |id: u8, name: &str, raw: u64| {
        attributes.insert(SmartAttribute {
            id,
            name: name.to_string(),
            raw_value: raw,
            normalized: 100,
            worst: 100,
            threshold: 0,
            flags: 0,
        });
    };

    if let Some(hours) = nvme.get("power_on_hours").and_then(Value::as_u64) {
        add(ids::POWER_ON_HOURS, "Power_On_Hours", hours);
    }
    if let Some(cycles) = nvme.get("power_cycles").and_then(Value::as_u64) {
        add(ids::POWER_CYCLE_COUNT, "Power_Cycle_Count", cycles);
    }
    if let Some(used) = nvme.get("percentage_used").and_then(Value::as_u64) {
        add(
            ids::PERCENT_LIFETIME_REMAINING,
            "Percent_Lifetime_Remain",
            100u64.saturating_sub(used),
        );
    }
    if let Some(written) = nvme.get("data_units_written").and_then(Value::as_u64) {
        add(
            ids::TOTAL_LBAS_WRITTEN,
            "Total_LBAs_Written",
            written.saturating_mul(1000),
        );
    }
    if let Some(errors) = nvme.get("media_errors").and_then(Value::as_u64) {
        add(ids::REPORTED_UNCORRECTABLE, "Media_Errors", errors);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const ELAPSED: Duration = Duration::from_millis(120);

    fn ata_json() -> Value {
        serde_json::json!({
            "model_name": "WDC WD40EFRX-68N32N0",
            "serial_number": "WD-WCC7K3BL",
            "rotation_rate": 5400,
            "user_capacity": { "bytes": 4_000_787_030_016u64 },
            "device": { "type": "ata" },
            "temperature": { "current": 34, "lifetime_max": 51 },
            "smart_support": { "available": true, "enabled": true },
            "ata_smart_attributes": {
                "table": [
                    { "id": 5, "name": "Reallocated_Sector_Ct", "value": 200,
                      "worst": 200, "thresh": 140, "flags": { "value": 51 },
                      "raw": { "value": 0, "string": "0" } },
                    { "id": 197, "name": "Current_Pending_Sector", "value": 200,
                      "worst": 200, "thresh": 0, "flags": { "value": 50 },
                      "raw": { "value": 2, "string": "2" } }
                ]
            }
        })
    }

    #[test]
    fn test_classify_ata_success() {
        let outcome = classify("sda", &ata_json(), Bus::Ata, ELAPSED);
        let payload = match outcome {
            ReadOutcome::Success(p) => p,
            other => panic!("expected success, got {other:?}"),
        };

        let identity = payload.identity.expect("identity");
        assert_eq!(identity.model, "WDC WD40EFRX-68N32N0");
        assert_eq!(payload.rotational, Some(true));
        assert_eq!(payload.temperature, Some(34));
        assert_eq!(payload.temperature_max_lifetime, Some(51));
        assert_eq!(payload.attributes.raw_value(ids::PENDING_SECTORS), Some(2));
        assert_eq!(
            payload.attributes.raw_value(ids::REALLOCATED_SECTORS),
            Some(0)
        );
    }

    #[test]
    fn test_classify_no_support() {
        let json = serde_json::json!({
            "smart_support": { "available": false },
            "device": { "type": "scsi" }
        });
        assert!(matches!(
            classify("sdb", &json, Bus::Usb, ELAPSED),
            ReadOutcome::NoSupport
        ));
    }

    #[test]
    fn test_classify_usb_bridge_message() {
        let json = serde_json::json!({
            "smartctl": {
                "messages": [ { "string": "Unknown USB bridge [0x1234:0x5678]", "severity": "error" } ]
            }
        });
        assert!(matches!(
            classify("sdc", &json, Bus::Usb, ELAPSED),
            ReadOutcome::NoSupport
        ));
    }

    #[test]
    fn test_classify_negative_power_on_is_parse_error() {
        let mut json = ata_json();
        json["power_on_time"] = serde_json::json!({ "hours": -4 });
        assert!(matches!(
            classify("sda", &json, Bus::Ata, ELAPSED),
            ReadOutcome::ParseError { .. }
        ));
    }

    #[test]
    fn test_classify_empty_table_is_no_support() {
        let json = serde_json::json!({
            "model_name": "Generic Flash Reader",
            "serial_number": "0000",
            "smart_support": { "available": true }
        });
        assert!(matches!(
            classify("sdd", &json, Bus::Usb, ELAPSED),
            ReadOutcome::NoSupport
        ));
    }

    #[test]
    fn test_classify_missing_identity() {
        let json = serde_json::json!({
            "device": { "type": "sat" },
            "ata_smart_attributes": {
                "table": [
                    { "id": 9, "name": "Power_On_Hours", "value": 98,
                      "worst": 98, "thresh": 0, "flags": { "value": 50 },
                      "raw": { "value": 1200, "string": "1200" } }
                ]
            }
        });
        match classify("sde", &json, Bus::Usb, ELAPSED) {
            ReadOutcome::Success(payload) => {
                assert!(payload.identity.is_none());
                assert_eq!(payload.bus, Bus::Sat);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn test_classify_nvme_health_log() {
        let json = serde_json::json!({
            "model_name": "Samsung SSD 980 PRO 1TB",
            "serial_number": "S5GXNX0T",
            "device": { "type": "nvme" },
            "temperature": { "current": 42 },
            "nvme_smart_health_information_log": {
                "power_on_hours": 4300,
                "power_cycles": 220,
                "percentage_used": 3,
                "data_units_written": 18_000_000,
                "media_errors": 0
            }
        });

        match classify("nvme0n1", &json, Bus::Nvme, ELAPSED) {
            ReadOutcome::Success(payload) => {
                assert_eq!(payload.rotational, Some(false));
                assert_eq!(
                    payload.attributes.percent_lifetime_remaining(),
                    Some(97)
                );
                assert_eq!(
                    payload.attributes.raw_value(ids::POWER_ON_HOURS),
                    Some(4300)
                );
                // 18M data units x 1000 LBAs x 512 bytes
                assert_eq!(
                    payload.attributes.bytes_written(),
                    Some(18_000_000u64 * 1000 * 512)
                );
            }
            other => panic!("expected success, got {other:?}"),
        }
    }
}
