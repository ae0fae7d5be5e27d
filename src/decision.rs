//! Disk health decision engine
//!
//! Deterministic evaluation of one device snapshot into a severity ladder
//! (OK / WARNING / CRITICAL / EMERGENCY) with structured reasons. Pure: it
//! performs no actions and reads no external state; trend signals come from
//! the previous committed history record passed in by the caller.

use serde::{Deserialize, Serialize};

use crate::gdc::GdcState;

// =============================================================================
// Status
// =============================================================================

/// Decision severity ladder
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionStatus {
    Ok,
    Warning,
    Critical,
    Emergency,
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionStatus::Ok => "OK",
            DecisionStatus::Warning => "WARNING",
            DecisionStatus::Critical => "CRITICAL",
            DecisionStatus::Emergency => "EMERGENCY",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Thresholds
// =============================================================================

/// Decision thresholds, overridable from `alert_thresholds.*` in the
/// configuration. Critical and emergency cut-offs are fixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionThresholds {
    pub reallocated_warning: u64,
    pub reallocated_critical: u64,
    pub reallocated_emergency: u64,
    pub pending_warning: u64,
    pub pending_critical: u64,
    pub uncorrectable_warning: u64,
    pub timeout_warning: u64,
    pub hdd_temp_warning: i32,
    pub hdd_temp_critical: i32,
    pub hdd_temp_emergency: i32,
    pub ssd_temp_warning: i32,
    pub ssd_temp_critical: i32,
    pub ssd_temp_emergency: i32,
    /// A health-score drop beyond this adds an informational reason
    pub score_drop_note: i32,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            reallocated_warning: 5,
            reallocated_critical: 50,
            reallocated_emergency: 500,
            pending_warning: 1,
            pending_critical: 50,
            uncorrectable_warning: 1,
            timeout_warning: 5,
            hdd_temp_warning: 50,
            hdd_temp_critical: 60,
            hdd_temp_emergency: 65,
            ssd_temp_warning: 60,
            ssd_temp_critical: 70,
            ssd_temp_emergency: 75,
            score_drop_note: 3,
        }
    }
}

// =============================================================================
// Input / Output
// =============================================================================

/// Everything the decision engine looks at for one device
#[derive(Debug, Clone, Default)]
pub struct DecisionInput {
    pub reallocated: Option<u64>,
    pub previous_reallocated: Option<u64>,
    pub pending: Option<u64>,
    pub previous_pending: Option<u64>,
    pub uncorrectable: Option<u64>,
    pub command_timeouts: Option<u64>,
    pub temperature: Option<i32>,
    pub rotational: bool,
    pub health_score: Option<i32>,
    pub previous_health_score: Option<i32>,
    pub gdc_state: Option<GdcState>,
}

/// Structured recommendation for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub status: DecisionStatus,
    pub reasons: Vec<String>,
    pub can_emergency_unmount: bool,
    pub notes: Vec<String>,
}

impl Decision {
    pub fn ok() -> Self {
        Self {
            status: DecisionStatus::Ok,
            reasons: Vec::new(),
            can_emergency_unmount: false,
            notes: Vec::new(),
        }
    }
}

// =============================================================================
// Evaluation
// =============================================================================

struct SignalEval {
    severity: DecisionStatus,
    is_emergency_candidate: bool,
    message: Option<String>,
}

impl SignalEval {
    fn quiet() -> Self {
        Self {
            severity: DecisionStatus::Ok,
            is_emergency_candidate: false,
            message: None,
        }
    }
}

fn evaluate_reallocated(current: u64, thresholds: &DecisionThresholds) -> SignalEval {
    if current >= thresholds.reallocated_emergency {
        SignalEval {
            severity: DecisionStatus::Emergency,
            is_emergency_candidate: true,
            message: Some(format!("Reallocated sectors critically high: {current}")),
        }
    } else if current >= thresholds.reallocated_critical {
        SignalEval {
            severity: DecisionStatus::Critical,
            is_emergency_candidate: false,
            message: Some(format!("Reallocated sectors high: {current}")),
        }
    } else if current >= thresholds.reallocated_warning {
        SignalEval {
            severity: DecisionStatus::Warning,
            is_emergency_candidate: false,
            message: Some(format!("Reallocated sectors detected: {current}")),
        }
    } else {
        SignalEval::quiet()
    }
}

fn evaluate_pending(current: u64, thresholds: &DecisionThresholds) -> SignalEval {
    if current >= thresholds.pending_critical {
        SignalEval {
            severity: DecisionStatus::Critical,
            is_emergency_candidate: false,
            message: Some(format!("Pending sectors critically high: {current}")),
        }
    } else if current >= thresholds.pending_warning {
        SignalEval {
            severity: DecisionStatus::Warning,
            is_emergency_candidate: false,
            message: Some(format!("Pending sectors detected: {current}")),
        }
    } else {
        SignalEval::quiet()
    }
}

fn evaluate_temperature(temp: i32, rotational: bool, t: &DecisionThresholds) -> SignalEval {
    let (warn, crit, emerg) = if rotational {
        (t.hdd_temp_warning, t.hdd_temp_critical, t.hdd_temp_emergency)
    } else {
        (t.ssd_temp_warning, t.ssd_temp_critical, t.ssd_temp_emergency)
    };

    if temp >= emerg {
        SignalEval {
            severity: DecisionStatus::Emergency,
            is_emergency_candidate: true,
            message: Some(format!("Temperature critical: {temp}°C (>={emerg}°C)")),
        }
    } else if temp >= crit {
        SignalEval {
            severity: DecisionStatus::Critical,
            is_emergency_candidate: false,
            message: Some(format!("Temperature high: {temp}°C (>={crit}°C)")),
        }
    } else if temp >= warn {
        SignalEval {
            severity: DecisionStatus::Warning,
            is_emergency_candidate: false,
            message: Some(format!("Temperature elevated: {temp}°C (>={warn}°C)")),
        }
    } else {
        SignalEval::quiet()
    }
}

fn strictly_increased(current: Option<u64>, previous: Option<u64>) -> bool {
    matches!((current, previous), (Some(c), Some(p)) if c > p)
}

/// Evaluate one device.
///
/// EMERGENCY requires at least two independent emergency signals at once, or
/// the combination signal (pending and reallocated both strictly increasing
/// since the previous record). A lone emergency candidate is downgraded to
/// CRITICAL with a note recording the near-miss.
pub fn evaluate(input: &DecisionInput, thresholds: &DecisionThresholds) -> Decision {
    let mut decision = Decision::ok();

    let realloc_eval = input
        .reallocated
        .map(|v| evaluate_reallocated(v, thresholds))
        .unwrap_or_else(SignalEval::quiet);
    let pending_eval = input
        .pending
        .map(|v| evaluate_pending(v, thresholds))
        .unwrap_or_else(SignalEval::quiet);
    let temp_eval = input
        .temperature
        .map(|t| evaluate_temperature(t, input.rotational, thresholds))
        .unwrap_or_else(SignalEval::quiet);

    let trending_up = strictly_increased(input.reallocated, input.previous_reallocated)
        && strictly_increased(input.pending, input.previous_pending);

    decision.status = realloc_eval
        .severity
        .max(pending_eval.severity)
        .max(temp_eval.severity);

    if trending_up {
        decision.status = DecisionStatus::Emergency;
        decision
            .reasons
            .push("Both reallocated and pending sectors increasing".to_string());
    }

    // Promotion gate: a single emergency candidate is not enough.
    if decision.status == DecisionStatus::Emergency {
        let candidates = [&realloc_eval, &temp_eval]
            .iter()
            .filter(|e| e.is_emergency_candidate)
            .count();
        if !trending_up && candidates < 2 {
            decision.status = DecisionStatus::Critical;
            decision
                .notes
                .push("Single emergency signal - downgraded to CRITICAL".to_string());
        }
    }

    for eval in [&realloc_eval, &pending_eval, &temp_eval] {
        if eval.severity >= DecisionStatus::Warning {
            if let Some(msg) = &eval.message {
                decision.reasons.push(msg.clone());
            }
        }
    }

    // Secondary warning signals from configuration.
    if let Some(uncorr) = input.uncorrectable {
        if uncorr >= thresholds.uncorrectable_warning {
            decision.status = decision.status.max(DecisionStatus::Warning);
            decision
                .reasons
                .push(format!("Uncorrectable errors reported: {uncorr}"));
        }
    }
    if let Some(timeouts) = input.command_timeouts {
        if timeouts >= thresholds.timeout_warning {
            decision.status = decision.status.max(DecisionStatus::Warning);
            decision
                .reasons
                .push(format!("Command timeouts reported: {timeouts}"));
        }
    }

    // Health score context: informational only, never changes the status.
    if let (Some(score), Some(prev)) = (input.health_score, input.previous_health_score) {
        let drop = prev - score;
        if drop > thresholds.score_drop_note {
            decision
                .reasons
                .push(format!("Health score dropped {drop} points (informational)"));
        }
    }

    match input.gdc_state {
        Some(GdcState::Unassessable) => {
            decision.notes.push("unassessable".to_string());
        }
        Some(state @ (GdcState::Confirmed | GdcState::Terminal)) => {
            decision
                .notes
                .push(format!("ghost drive condition: {state}"));
        }
        _ => {}
    }

    decision.can_emergency_unmount = decision.status == DecisionStatus::Emergency;
    decision
}

// =============================================================================
// Tests
// =============================================================================
