//! SMART attribute model
//!
//! Raw attribute storage plus the handful of well-known attribute IDs the
//! scoring and decision layers interpret by name. Every other attribute is
//! carried opaquely so history records stay complete.

pub mod reader;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use reader::{ReadOutcome, SmartPayload, SmartReader, SmartctlReader};

// =============================================================================
// Well-Known Attribute IDs
// =============================================================================

/// SMART attribute IDs interpreted by name
pub mod ids {
    /// Sectors already remapped
    pub const REALLOCATED_SECTORS: u8 = 5;
    /// Operating hours (some drives report seconds or minutes)
    pub const POWER_ON_HOURS: u8 = 9;
    /// Power-on cycle count
    pub const POWER_CYCLE_COUNT: u8 = 12;
    /// Uncorrectable read errors reported to the host
    pub const REPORTED_UNCORRECTABLE: u8 = 187;
    /// Controller command timeouts
    pub const COMMAND_TIMEOUT: u8 = 188;
    /// Current temperature (raw also carries lifetime max on some drives)
    pub const TEMPERATURE: u8 = 194;
    /// Sectors awaiting remap
    pub const PENDING_SECTORS: u8 = 197;
    /// Offline-scan unrecoverable sectors
    pub const OFFLINE_UNCORRECTABLE: u8 = 198;
    /// SSD endurance remaining (100 = new, 0 = exhausted)
    pub const PERCENT_LIFETIME_REMAINING: u8 = 202;
    /// Host writes in LBA units
    pub const TOTAL_LBAS_WRITTEN: u8 = 241;
}

/// Raw values at or above this are sentinel garbage from USB bridges and
/// broken firmware, not real measurements.
pub const SENTINEL_RAW: u64 = u32::MAX as u64;

// =============================================================================
// Attribute Types
// =============================================================================

/// A single SMART attribute as reported by the drive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmartAttribute {
    /// Attribute ID
    pub id: u8,
    /// Attribute name as reported by smartctl
    pub name: String,
    /// Raw value
    pub raw_value: u64,
    /// Normalized current value
    pub normalized: u8,
    /// Worst normalized value seen by the drive
    pub worst: u8,
    /// Failure threshold (0 = informational)
    pub threshold: u8,
    /// Attribute flags word
    pub flags: u16,
}

impl SmartAttribute {
    /// Whether the normalized value has crossed the drive's own threshold.
    pub fn failing(&self) -> bool {
        self.threshold > 0 && self.normalized < self.threshold
    }
}

/// Attribute map keyed by SMART attribute ID
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap(pub BTreeMap<u8, SmartAttribute>);

impl AttributeMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, attr: SmartAttribute) {
        self.0.insert(attr.id, attr);
    }

    pub fn get(&self, id: u8) -> Option<&SmartAttribute> {
        self.0.get(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Raw value for an attribute, with sentinel filtering.
    ///
    /// Returns `None` when the attribute is absent or its raw value is a
    /// known sentinel (>= `u32::MAX`). Absent and sentinel values contribute
    /// to neither escalation nor scoring; a real zero does.
    pub fn raw_value(&self, id: u8) -> Option<u64> {
        self.0
            .get(&id)
            .map(|a| a.raw_value)
            .filter(|&v| v < SENTINEL_RAW)
    }

    /// Power-on hours, normalizing drives that report seconds or minutes.
    pub fn power_on_hours(&self) -> Option<u64> {
        let attr = self.0.get(&ids::POWER_ON_HOURS)?;
        if attr.raw_value >= SENTINEL_RAW {
            return None;
        }
        let name = attr.name.to_ascii_lowercase();
        if name.contains("second") {
            Some(attr.raw_value / 3600)
        } else if name.contains("minut") {
            Some(attr.raw_value / 60)
        } else {
            Some(attr.raw_value)
        }
    }

    /// Total bytes written by the host, derived from attribute 241 (LBAs of
    /// 512 bytes each).
    pub fn bytes_written(&self) -> Option<u64> {
        self.raw_value(ids::TOTAL_LBAS_WRITTEN)
            .map(|lbas| lbas.saturating_mul(512))
    }

    /// Remaining SSD endurance in percent, clamped to 0..=100.
    ///
    /// Some firmware exposes ID 202 as "percent used" rather than
    /// "percent remaining"; the attribute name disambiguates.
    pub fn percent_lifetime_remaining(&self) -> Option<u8> {
        let attr = self.0.get(&ids::PERCENT_LIFETIME_REMAINING)?;
        if attr.raw_value >= SENTINEL_RAW {
            return None;
        }
        let raw = attr.raw_value.min(100) as u8;
        if attr.name.to_ascii_lowercase().contains("percent_used") {
            Some(100 - raw)
        } else {
            Some(raw)
        }
    }

    /// Iterate over all attributes in ID order.
    pub fn iter(&self) -> impl Iterator<Item = &SmartAttribute> {
        self.0.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attr(id: u8, name: &str, raw: u64) -> SmartAttribute {
        SmartAttribute {
            id,
            name: name.to_string(),
            raw_value: raw,
            normalized: 100,
            worst: 100,
            threshold: 0,
            flags: 0,
        }
    }

    #[test]
    fn test_sentinel_values_are_absent() {
        let mut map = AttributeMap::new();
        map.insert(attr(ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 7));
        map.insert(attr(ids::PENDING_SECTORS, "Current_Pending_Sector", u32::MAX as u64));

        assert_eq!(map.raw_value(ids::REALLOCATED_SECTORS), Some(7));
        assert_eq!(map.raw_value(ids::PENDING_SECTORS), None);
        assert_eq!(map.raw_value(ids::COMMAND_TIMEOUT), None);
    }

    #[test]
    fn test_power_on_seconds_normalized_to_hours() {
        let mut map = AttributeMap::new();
        map.insert(attr(ids::POWER_ON_HOURS, "Power_On_Seconds", 7_200));
        assert_eq!(map.power_on_hours(), Some(2));

        let mut map = AttributeMap::new();
        map.insert(attr(ids::POWER_ON_HOURS, "Power_On_Hours", 17_000));
        assert_eq!(map.power_on_hours(), Some(17_000));

        let mut map = AttributeMap::new();
        map.insert(attr(ids::POWER_ON_HOURS, "Power_On_Minutes", 600));
        assert_eq!(map.power_on_hours(), Some(10));
    }

    #[test]
    fn test_percent_used_flipped_to_remaining() {
        let mut map = AttributeMap::new();
        map.insert(attr(ids::PERCENT_LIFETIME_REMAINING, "Percent_Used", 12));
        assert_eq!(map.percent_lifetime_remaining(), Some(88));

        let mut map = AttributeMap::new();
        map.insert(attr(
            ids::PERCENT_LIFETIME_REMAINING,
            "Percent_Lifetime_Remain",
            88,
        ));
        assert_eq!(map.percent_lifetime_remaining(), Some(88));
    }

    #[test]
    fn test_bytes_written_from_lbas() {
        let mut map = AttributeMap::new();
        map.insert(attr(ids::TOTAL_LBAS_WRITTEN, "Total_LBAs_Written", 1_000));
        assert_eq!(map.bytes_written(), Some(512_000));
    }

    #[test]
    fn test_zero_is_a_real_value() {
        let mut map = AttributeMap::new();
        map.insert(attr(ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 0));
        assert_eq!(map.raw_value(ids::REALLOCATED_SECTORS), Some(0));
    }

    #[test]
    fn test_serde_round_trip() {
        let mut map = AttributeMap::new();
        map.insert(attr(ids::TEMPERATURE, "Temperature_Celsius", 34));
        let json = serde_json::to_string(&map).unwrap();
        let back: AttributeMap = serde_json::from_str(&json).unwrap();
        assert_eq!(map, back);
    }
}
