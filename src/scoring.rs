//! Health scoring model
//!
//! Pure, referentially transparent conversion of raw SMART attributes into a
//! bounded health score with a component breakdown and a list of escalated
//! attributes. No I/O and no clock access; identical inputs always produce
//! identical output.
//!
//! Attributes the drive does not report contribute to neither escalation nor
//! the score: the weighted total is the weighted mean over the components
//! that are present, which redistributes the missing weight proportionally.
//! A reported zero is a real measurement and scores its full sub-score.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::smart::{ids, AttributeMap};

/// Conservative endurance rating for drives that do not publish one:
/// 200 TBW per TB of capacity, typical for budget SSDs.
const RATED_TBW_PER_TB: u64 = 200;

// =============================================================================
// Inputs
// =============================================================================

/// Everything the scoring model is allowed to look at.
#[derive(Debug, Clone)]
pub struct DeviceFacts {
    /// Raw attribute map from the last successful read
    pub attributes: AttributeMap,
    /// Spinning rust or solid state
    pub rotational: bool,
    /// Current temperature in °C, if the drive reports one
    pub temperature: Option<i32>,
    /// Rated write endurance in bytes, if known
    pub rated_endurance_bytes: Option<u64>,
}

impl DeviceFacts {
    /// Estimate rated endurance from capacity when the drive does not
    /// publish one.
    pub fn rated_endurance_estimate(capacity_bytes: u64) -> Option<u64> {
        if capacity_bytes == 0 {
            return None;
        }
        Some((capacity_bytes / (1 << 40)).max(1) * RATED_TBW_PER_TB * (1 << 40))
    }
}

// =============================================================================
// Outputs
// =============================================================================

/// Discrete label derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Excellent,
    Good,
    Acceptable,
    Warning,
    Poor,
    Critical,
    Dead,
    Unknown,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthState::Excellent => "excellent",
            HealthState::Good => "good",
            HealthState::Acceptable => "acceptable",
            HealthState::Warning => "warning",
            HealthState::Poor => "poor",
            HealthState::Critical => "critical",
            HealthState::Dead => "dead",
            HealthState::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Severity of an escalated attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationSeverity {
    Warning,
    Critical,
}

/// An attribute whose individual value forces operator attention regardless
/// of the weighted total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalatedAttribute {
    pub name: String,
    pub value: u64,
    pub severity: EscalationSeverity,
}

/// One weighted component of the health score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScore {
    /// Raw value the sub-score was derived from (absent for penalties)
    pub value: Option<i64>,
    /// Weight in the weighted mean (0 for additive penalties)
    pub weight: f64,
    /// Sub-score on the 100-point curve, negative in the zombie tier
    pub partial_score: f64,
}

/// Result of scoring one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringResult {
    /// Health score in [-100, 100]; `None` when nothing was scorable
    pub health_score: Option<i32>,
    pub health_state: HealthState,
    /// Component name -> weighted contribution
    pub components: BTreeMap<String, ComponentScore>,
    /// Ordered by severity, then value descending
    pub escalated: Vec<EscalatedAttribute>,
}

impl ScoringResult {
    fn unknown() -> Self {
        Self {
            health_score: None,
            health_state: HealthState::Unknown,
            components: BTreeMap::new(),
            escalated: Vec::new(),
        }
    }
}

// =============================================================================
// Per-Attribute Curves
// =============================================================================

fn score_reallocated(count: u64) -> f64 {
    match count {
        0 => 100.0,
        1..=10 => 90.0,
        11..=100 => 70.0,
        101..=500 => 40.0,
        501..=1000 => 20.0,
        1001..=5000 => 5.0,
        5001..=10000 => -10.0,
        10001..=20000 => -50.0,
        _ => -100.0,
    }
}

fn score_pending(count: u64) -> f64 {
    match count {
        0 => 100.0,
        1 => 85.0,
        2..=5 => 60.0,
        6..=20 => 30.0,
        21..=100 => 10.0,
        101..=300 => -30.0,
        301..=500 => -70.0,
        _ => -100.0,
    }
}

fn score_uncorrectable(count: u64) -> f64 {
    match count {
        0 => 100.0,
        1 => 60.0,
        2..=5 => 20.0,
        6..=10 => -30.0,
        11..=20 => -70.0,
        _ => -100.0,
    }
}

fn score_timeout(count: u64) -> f64 {
    match count {
        0 => 100.0,
        1..=5 => 70.0,
        6..=50 => 40.0,
        51..=200 => 20.0,
        _ => 0.0,
    }
}

fn score_power_cycles(cycles: u64) -> f64 {
    match cycles {
        0..=999 => 100.0,
        1000..=5000 => 90.0,
        5001..=10000 => 80.0,
        10001..=20000 => 70.0,
        20001..=50000 => 50.0,
        _ => 30.0,
    }
}

fn score_age(hours: u64) -> f64 {
    let years = hours as f64 / 8760.0;
    if years < 2.0 {
        100.0
    } else if years < 3.0 {
        90.0
    } else if years < 5.0 {
        70.0
    } else if years < 7.0 {
        50.0
    } else if years < 10.0 {
        30.0
    } else {
        10.0
    }
}

fn score_temperature(temp: i32, rotational: bool) -> f64 {
    if rotational {
        match temp {
            t if t < 35 => 100.0,
            t if t < 40 => 90.0,
            t if t < 45 => 70.0,
            t if t < 50 => 40.0,
            _ => 10.0,
        }
    } else if temp < 50 {
        100.0
    } else if temp <= 70 {
        // Linear from 100 at 50°C down to 0 at 70°C
        (70 - temp) as f64 * 5.0
    } else {
        10.0
    }
}

fn score_wear(bytes_written: u64, rated_endurance: u64) -> f64 {
    if rated_endurance == 0 {
        return 100.0;
    }
    let wear_pct = bytes_written as f64 / rated_endurance as f64 * 100.0;
    if wear_pct < 10.0 {
        100.0
    } else {
        (100.0 - wear_pct * 1.5).max(0.0)
    }
}

/// Additive penalty for SMART ID 202 (percent lifetime remaining), applied
/// after the weighted sum.
fn lifetime_penalty(percent_remaining: u8) -> f64 {
    match percent_remaining {
        0..=5 => 35.0,
        6 => 20.0,
        7 => 17.0,
        8 => 14.0,
        9 => 11.0,
        10 => 10.0,
        11..=20 => (20 - percent_remaining) as f64 / 9.0 * 10.0,
        _ => 0.0,
    }
}

// =============================================================================
// Escalation
// =============================================================================

fn escalation(value: u64, warning_at: u64, critical_at: u64) -> Option<EscalationSeverity> {
    if value >= critical_at {
        Some(EscalationSeverity::Critical)
    } else if value >= warning_at {
        Some(EscalationSeverity::Warning)
    } else {
        None
    }
}

/// Collect attributes whose individual value crosses a severity threshold,
/// ordered by severity then by value descending.
fn escalated_attributes(attributes: &AttributeMap) -> Vec<EscalatedAttribute> {
    let rules: [(&str, u8, u64, u64); 4] = [
        ("reallocated_sectors", ids::REALLOCATED_SECTORS, 1, 50),
        ("pending_sectors", ids::PENDING_SECTORS, 1, 50),
        ("reported_uncorrectable", ids::REPORTED_UNCORRECTABLE, 1, 2),
        ("command_timeout", ids::COMMAND_TIMEOUT, 6, 50),
    ];

    let mut escalated: Vec<EscalatedAttribute> = rules
        .iter()
        .filter_map(|&(name, id, warn, crit)| {
            let value = attributes.raw_value(id)?;
            let severity = escalation(value, warn, crit)?;
            Some(EscalatedAttribute {
                name: name.to_string(),
                value,
                severity,
            })
        })
        .collect();

    escalated.sort_by(|a, b| b.severity.cmp(&a.severity).then(b.value.cmp(&a.value)));
    escalated
}

// =============================================================================
// Weight Tables
// =============================================================================

struct WeightTable {
    reallocated: f64,
    pending: f64,
    uncorrectable: f64,
    timeout: f64,
    power_cycles: f64,
    age: f64,
    temperature: f64,
    wear: f64,
}

const HDD_WEIGHTS: WeightTable = WeightTable {
    reallocated: 0.35,
    pending: 0.25,
    power_cycles: 0.10,
    uncorrectable: 0.10,
    timeout: 0.10,
    age: 0.05,
    temperature: 0.05,
    wear: 0.0,
};

const SSD_WEIGHTS: WeightTable = WeightTable {
    reallocated: 0.40,
    pending: 0.25,
    temperature: 0.10,
    uncorrectable: 0.10,
    timeout: 0.10,
    age: 0.05,
    power_cycles: 0.0,
    wear: 0.0,
};

const SSD_WEAR_WEIGHTS: WeightTable = WeightTable {
    reallocated: 0.35,
    pending: 0.25,
    wear: 0.15,
    temperature: 0.10,
    uncorrectable: 0.08,
    timeout: 0.05,
    age: 0.02,
    power_cycles: 0.0,
};

// =============================================================================
// Scoring
// =============================================================================

/// Score a device.
///
/// Deterministic: depends only on `facts`.
pub fn score(facts: &DeviceFacts) -> ScoringResult {
    let attrs = &facts.attributes;
    if attrs.is_empty() {
        return ScoringResult::unknown();
    }

    let bytes_written = attrs.bytes_written();
    let has_wear_data = !facts.rotational
        && bytes_written.is_some()
        && facts.rated_endurance_bytes.is_some();

    let weights = if facts.rotational {
        &HDD_WEIGHTS
    } else if has_wear_data {
        &SSD_WEAR_WEIGHTS
    } else {
        &SSD_WEIGHTS
    };

    let mut components: BTreeMap<String, ComponentScore> = BTreeMap::new();
    let mut push = |name: &str, value: Option<i64>, weight: f64, partial: f64| {
        if weight > 0.0 {
            components.insert(
                name.to_string(),
                ComponentScore {
                    value,
                    weight,
                    partial_score: partial,
                },
            );
        }
    };

    if let Some(v) = attrs.raw_value(ids::REALLOCATED_SECTORS) {
        push(
            "reallocated_sectors",
            Some(v as i64),
            weights.reallocated,
            score_reallocated(v),
        );
    }
    if let Some(v) = attrs.raw_value(ids::PENDING_SECTORS) {
        push(
            "pending_sectors",
            Some(v as i64),
            weights.pending,
            score_pending(v),
        );
    }
    if let Some(v) = attrs.raw_value(ids::REPORTED_UNCORRECTABLE) {
        push(
            "reported_uncorrectable",
            Some(v as i64),
            weights.uncorrectable,
            score_uncorrectable(v),
        );
    }
    if let Some(v) = attrs.raw_value(ids::COMMAND_TIMEOUT) {
        push(
            "command_timeout",
            Some(v as i64),
            weights.timeout,
            score_timeout(v),
        );
    }
    if let Some(v) = attrs.raw_value(ids::POWER_CYCLE_COUNT) {
        push(
            "power_cycle_count",
            Some(v as i64),
            weights.power_cycles,
            score_power_cycles(v),
        );
    }
    if let Some(hours) = attrs.power_on_hours() {
        push("age", Some(hours as i64), weights.age, score_age(hours));
    }
    if let Some(temp) = facts.temperature {
        push(
            "temperature",
            Some(temp as i64),
            weights.temperature,
            score_temperature(temp, facts.rotational),
        );
    }
    if has_wear_data {
        let written = bytes_written.unwrap_or(0);
        let rated = facts.rated_endurance_bytes.unwrap_or(0);
        push(
            "wear",
            Some(written as i64),
            weights.wear,
            score_wear(written, rated),
        );
    }

    if components.is_empty() {
        let escalated = escalated_attributes(attrs);
        let mut result = ScoringResult::unknown();
        result.escalated = escalated;
        return result;
    }

    // Weighted mean over present components: missing attributes contribute
    // nothing and their weight is redistributed proportionally.
    let weight_sum: f64 = components.values().map(|c| c.weight).sum();
    let weighted: f64 = components
        .values()
        .map(|c| c.partial_score * c.weight)
        .sum::<f64>()
        / weight_sum;

    let mut total = weighted;
    if !facts.rotational {
        if let Some(remaining) = attrs.percent_lifetime_remaining() {
            let penalty = lifetime_penalty(remaining);
            if penalty > 0.0 {
                components.insert(
                    "lifetime_penalty".to_string(),
                    ComponentScore {
                        value: Some(remaining as i64),
                        weight: 0.0,
                        partial_score: -penalty,
                    },
                );
            }
            total -= penalty;
        }
    }

    // A negative total must be backed by a zombie-tier attribute value; the
    // additive penalty alone cannot take a defect-free drive below zero.
    let has_zombie = components.values().any(|c| c.partial_score < 0.0 && c.weight > 0.0);
    if total < 0.0 && !has_zombie {
        total = 0.0;
    }

    let health_score = total.round().clamp(-100.0, 100.0) as i32;
    let escalated = escalated_attributes(attrs);
    let health_state = classify(health_score, &escalated);

    ScoringResult {
        health_score: Some(health_score),
        health_state,
        components,
        escalated,
    }
}

fn classify(score: i32, escalated: &[EscalatedAttribute]) -> HealthState {
    match score {
        s if s < 0 => HealthState::Dead,
        0..=19 => HealthState::Critical,
        20..=39 => HealthState::Poor,
        40..=59 => HealthState::Warning,
        60..=79 => HealthState::Acceptable,
        80..=94 => HealthState::Good,
        // Excellent demands zero defects; a pristine score with escalations
        // is still only good.
        _ if escalated.is_empty() => HealthState::Excellent,
        _ => HealthState::Good,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart::SmartAttribute;

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

    fn map(entries: &[(u8, &str, u64)]) -> AttributeMap {
        let mut m = AttributeMap::new();
        for &(id, name, raw) in entries {
            m.insert(attr(id, name, raw));
        }
        m
    }

    #[test]
    fn test_pristine_ssd_scores_100() {
        // Fresh SSD: zero defects, cool, young, barely worn, 99% life left.
        let facts = DeviceFacts {
            attributes: map(&[
                (ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 0),
                (ids::PENDING_SECTORS, "Current_Pending_Sector", 0),
                (ids::TEMPERATURE, "Temperature_Celsius", 31),
                (ids::POWER_ON_HOURS, "Power_On_Hours", 100),
                (ids::TOTAL_LBAS_WRITTEN, "Total_LBAs_Written", 7_000_000_000_000 / 512),
                (ids::PERCENT_LIFETIME_REMAINING, "Percent_Lifetime_Remain", 99),
            ]),
            rotational: false,
            temperature: Some(31),
            rated_endurance_bytes: Some(96_000_000_000_000),
        };

        let result = score(&facts);
        assert_eq!(result.health_score, Some(100));
        assert_eq!(result.health_state, HealthState::Excellent);
        assert!(result.escalated.is_empty());
    }

    #[test]
    fn test_zombie_hdd_goes_negative() {
        let facts = DeviceFacts {
            attributes: map(&[
                (ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 25_000),
                (ids::PENDING_SECTORS, "Current_Pending_Sector", 600),
                (ids::REPORTED_UNCORRECTABLE, "Reported_Uncorrect", 40),
                (ids::COMMAND_TIMEOUT, "Command_Timeout", 300),
                (ids::POWER_CYCLE_COUNT, "Power_Cycle_Count", 4_000),
                (ids::POWER_ON_HOURS, "Power_On_Hours", 40_000),
            ]),
            rotational: true,
            temperature: Some(44),
            rated_endurance_bytes: None,
        };

        let result = score(&facts);
        let total = result.health_score.unwrap();
        assert!(total < 0, "zombie drive should score negative, got {total}");
        assert_eq!(result.health_state, HealthState::Dead);
        // A negative score requires a zombie-tier component
        assert!(result
            .components
            .values()
            .any(|c| c.partial_score < 0.0 && c.weight > 0.0));
    }

    #[test]
    fn test_penalty_alone_cannot_go_negative() {
        // 0% lifetime remaining gives a -35 penalty, but zero defects: the
        // floor keeps the total at or above zero.
        let facts = DeviceFacts {
            attributes: map(&[
                (ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 120),
                (ids::PENDING_SECTORS, "Current_Pending_Sector", 18),
                (ids::PERCENT_LIFETIME_REMAINING, "Percent_Lifetime_Remain", 0),
                (ids::TEMPERATURE, "Temperature_Celsius", 68),
            ]),
            rotational: false,
            temperature: Some(68),
            rated_endurance_bytes: None,
        };

        let result = score(&facts);
        assert!(result.health_score.unwrap() >= 0);
    }

    #[test]
    fn test_absent_weight_redistributed() {
        // Only reallocated + pending present, both perfect: weighted mean
        // over the present weights must still be 100.
        let facts = DeviceFacts {
            attributes: map(&[
                (ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 0),
                (ids::PENDING_SECTORS, "Current_Pending_Sector", 0),
            ]),
            rotational: true,
            temperature: None,
            rated_endurance_bytes: None,
        };

        let result = score(&facts);
        assert_eq!(result.health_score, Some(100));
        assert_eq!(result.components.len(), 2);
    }

    #[test]
    fn test_zero_scores_full_subscore_but_sentinel_is_absent() {
        let zero = DeviceFacts {
            attributes: map(&[(ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 0)]),
            rotational: true,
            temperature: None,
            rated_endurance_bytes: None,
        };
        let sentinel = DeviceFacts {
            attributes: map(&[(ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", u32::MAX as u64)]),
            rotational: true,
            temperature: None,
            rated_endurance_bytes: None,
        };

        assert_eq!(score(&zero).health_score, Some(100));
        assert_eq!(score(&sentinel).health_score, None);
        assert_eq!(score(&sentinel).health_state, HealthState::Unknown);
    }

    #[test]
    fn test_escalation_ordering() {
        let facts = DeviceFacts {
            attributes: map(&[
                (ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 60),
                (ids::PENDING_SECTORS, "Current_Pending_Sector", 3),
                (ids::REPORTED_UNCORRECTABLE, "Reported_Uncorrect", 5),
                (ids::COMMAND_TIMEOUT, "Command_Timeout", 10),
            ]),
            rotational: true,
            temperature: None,
            rated_endurance_bytes: None,
        };

        let result = score(&facts);
        let names: Vec<&str> = result.escalated.iter().map(|e| e.name.as_str()).collect();
        // Critical first (realloc 60, uncorr 5), then warnings by value desc
        // (timeout 10, pending 3).
        assert_eq!(
            names,
            vec![
                "reallocated_sectors",
                "reported_uncorrectable",
                "command_timeout",
                "pending_sectors"
            ]
        );
        assert_eq!(result.escalated[0].severity, EscalationSeverity::Critical);
        assert_eq!(result.escalated[1].severity, EscalationSeverity::Critical);
        assert_eq!(result.escalated[2].severity, EscalationSeverity::Warning);
    }

    #[test]
    fn test_wear_weights_selected_only_with_endurance() {
        let attrs = map(&[
            (ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", 0),
            (ids::TOTAL_LBAS_WRITTEN, "Total_LBAs_Written", 1_000_000),
        ]);
        let with = DeviceFacts {
            attributes: attrs.clone(),
            rotational: false,
            temperature: None,
            rated_endurance_bytes: Some(200 * (1 << 40)),
        };
        let without = DeviceFacts {
            attributes: attrs,
            rotational: false,
            temperature: None,
            rated_endurance_bytes: None,
        };

        assert!(score(&with).components.contains_key("wear"));
        assert!(!score(&without).components.contains_key("wear"));
    }

    #[test]
    fn test_lifetime_penalty_curve() {
        assert_eq!(lifetime_penalty(0), 35.0);
        assert_eq!(lifetime_penalty(5), 35.0);
        assert_eq!(lifetime_penalty(6), 20.0);
        assert_eq!(lifetime_penalty(10), 10.0);
        assert!((lifetime_penalty(11) - 10.0).abs() < f64::EPSILON);
        assert_eq!(lifetime_penalty(20), 0.0);
        assert_eq!(lifetime_penalty(21), 0.0);
        assert_eq!(lifetime_penalty(100), 0.0);
    }

    #[test]
    fn test_ssd_temperature_curve_is_linear_past_50() {
        assert_eq!(score_temperature(49, false), 100.0);
        assert_eq!(score_temperature(50, false), 100.0);
        assert_eq!(score_temperature(60, false), 50.0);
        assert_eq!(score_temperature(70, false), 0.0);
        assert_eq!(score_temperature(75, false), 10.0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_facts() -> impl Strategy<Value = DeviceFacts> {
            (
                proptest::option::of(0u64..100_000),
                proptest::option::of(0u64..2_000),
                proptest::option::of(0u64..100),
                proptest::option::of(0u64..500),
                proptest::option::of(0u64..120_000),
                proptest::option::of(0i32..90),
                any::<bool>(),
            )
                .prop_map(|(realloc, pending, uncorr, timeout, hours, temp, rotational)| {
                    let mut attributes = AttributeMap::new();
                    let mut add = |id: u8, name: &str, raw: Option<u64>| {
                        if let Some(raw) = raw {
                            attributes.insert(SmartAttribute {
                                id,
                                name: name.to_string(),
                                raw_value: raw,
                                normalized: 100,
                                worst: 100,
                                threshold: 0,
                                flags: 0,
                            });
                        }
                    };
                    add(ids::REALLOCATED_SECTORS, "Reallocated_Sector_Ct", realloc);
                    add(ids::PENDING_SECTORS, "Current_Pending_Sector", pending);
                    add(ids::REPORTED_UNCORRECTABLE, "Reported_Uncorrect", uncorr);
                    add(ids::COMMAND_TIMEOUT, "Command_Timeout", timeout);
                    add(ids::POWER_ON_HOURS, "Power_On_Hours", hours);
                    DeviceFacts {
                        attributes,
                        rotational,
                        temperature: temp,
                        rated_endurance_bytes: None,
                    }
                })
        }

        proptest! {
            #[test]
            fn score_is_deterministic(facts in arb_facts()) {
                prop_assert_eq!(score(&facts), score(&facts));
            }

            #[test]
            fn score_is_bounded(facts in arb_facts()) {
                if let Some(total) = score(&facts).health_score {
                    prop_assert!((-100..=100).contains(&total));
                }
            }

            #[test]
            fn negative_score_implies_zombie_component(facts in arb_facts()) {
                let result = score(&facts);
                if matches!(result.health_score, Some(s) if s < 0) {
                    prop_assert!(result
                        .components
                        .values()
                        .any(|c| c.partial_score < 0.0 && c.weight > 0.0));
                }
            }
        }
    }
}
