//! Emergency unmount executor
//!
//! Acts on EMERGENCY decisions when configured ACTIVE; in PASSIVE mode (the
//! default, and the forced fallback on any configuration problem) it
//! evaluates the same gates but never touches a mount.
//!
//! Five gates, checked in order, first failure aborts with a structured
//! reason:
//!
//! 1. the decision status is EMERGENCY
//! 2. the decision grants `can_emergency_unmount`
//! 3. the device currently has at least one mountpoint (read fresh from the
//!    OS, never cached)
//! 4. no mountpoint lies under `/`, `/boot`, `/home`, `/usr`, `/var`, and at
//!    least one mountpoint is under `/mnt/` or `/media/`
//! 5. no attempt on this identity within the cooldown window
//!
//! The cooldown arms at attempt time, not at success, so a failing device
//! cannot cause an unmount storm. A gate-5 refusal does not re-arm it.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::config::UnmountMode;
use crate::decision::{Decision, DecisionStatus};
use crate::device::DeviceIdentity;

/// Paths whose unmount is forbidden, exact or as a prefix
const CRITICAL_PATHS: [&str; 5] = ["/", "/boot", "/home", "/usr", "/var"];

/// Subtrees whose mountpoints are eligible for emergency unmount
const ELIGIBLE_ROOTS: [&str; 2] = ["/mnt", "/media"];

/// Deadline for one umount invocation
const UMOUNT_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Outcome
// =============================================================================

/// Result of one evaluation, recorded regardless of success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnmountOutcome {
    /// A gate failed; nothing was touched
    Refused { gate: u8, reason: String },
    /// All gates passed but the executor is PASSIVE
    PassiveOnly { eligible: Vec<String> },
    /// Every eligible mountpoint was unmounted
    Unmounted { mountpoints: Vec<String> },
    /// At least one umount invocation failed
    Failed {
        unmounted: Vec<String>,
        errors: Vec<String>,
    },
}

/// Journal entry for one attempt
#[derive(Debug, Clone)]
pub struct UnmountAttempt {
    pub timestamp: DateTime<Utc>,
    pub os_name: String,
    pub identity: DeviceIdentity,
    pub outcome: UnmountOutcome,
}

// =============================================================================
// Executor
// =============================================================================

/// Emergency unmount executor with per-identity cooldown
pub struct UnmountExecutor {
    mode: UnmountMode,
    cooldown: Duration,
    /// Mount table location; swappable for tests
    mounts_path: PathBuf,
    attempts: DashMap<DeviceIdentity, Instant>,
    journal: Mutex<Vec<UnmountAttempt>>,
}

impl UnmountExecutor {
    pub fn new(mode: UnmountMode, cooldown: Duration) -> Self {
        Self::with_mounts_path(mode, cooldown, "/proc/self/mounts")
    }

    pub fn with_mounts_path(
        mode: UnmountMode,
        cooldown: Duration,
        mounts_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            mode,
            cooldown,
            mounts_path: mounts_path.into(),
            attempts: DashMap::new(),
            journal: Mutex::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> UnmountMode {
        self.mode
    }

    /// Evaluate the gates for one device and, in ACTIVE mode, unmount every
    /// eligible mountpoint sequentially. The outcome is journaled either way.
    pub async fn evaluate(
        &self,
        os_name: &str,
        identity: &DeviceIdentity,
        decision: &Decision,
    ) -> UnmountOutcome {
        let outcome = self.run_gates(os_name, identity, decision).await;

        // Arm the cooldown on every real attempt, including refusals, so a
        // device stuck at a gate cannot hammer the mount table every scan.
        // A refusal at the cooldown gate itself must not extend the window.
        let is_cooldown_refusal = matches!(&outcome, UnmountOutcome::Refused { gate: 5, .. });
        if !is_cooldown_refusal {
            self.attempts.insert(identity.clone(), Instant::now());
        }

        match &outcome {
            UnmountOutcome::Refused { gate, reason } => {
                warn!(device = os_name, gate, reason, "emergency unmount refused");
            }
            UnmountOutcome::PassiveOnly { eligible } => {
                info!(device = os_name, ?eligible,
                    "PASSIVE mode: all gates passed, no action taken");
            }
            UnmountOutcome::Unmounted { mountpoints } => {
                error!(device = os_name, ?mountpoints,
                    "EMERGENCY: device unmounted");
            }
            UnmountOutcome::Failed { unmounted, errors } => {
                error!(device = os_name, ?unmounted, ?errors,
                    "emergency unmount partially failed");
            }
        }

        self.journal.lock().push(UnmountAttempt {
            timestamp: Utc::now(),
            os_name: os_name.to_string(),
            identity: identity.clone(),
            outcome: outcome.clone(),
        });
        outcome
    }

    async fn run_gates(
        &self,
        os_name: &str,
        identity: &DeviceIdentity,
        decision: &Decision,
    ) -> UnmountOutcome {
        // Gate 1: emergency status
        if decision.status != DecisionStatus::Emergency {
            return UnmountOutcome::Refused {
                gate: 1,
                reason: format!("status is {}, not EMERGENCY", decision.status),
            };
        }

        // Gate 2: decision-level permission
        if !decision.can_emergency_unmount {
            return UnmountOutcome::Refused {
                gate: 2,
                reason: "can_emergency_unmount is false".to_string(),
            };
        }

        // Gate 3: fresh mount lookup
        let mountpoints = self.mountpoints_for(os_name);
        if mountpoints.is_empty() {
            return UnmountOutcome::Refused {
                gate: 3,
                reason: "device is not mounted".to_string(),
            };
        }

        // Gate 4: critical path set and eligibility
        if let Some(critical) = mountpoints.iter().find(|m| is_critical_mountpoint(m)) {
            return UnmountOutcome::Refused {
                gate: 4,
                reason: format!("critical_path: {critical}"),
            };
        }
        let eligible: Vec<String> = mountpoints
            .iter()
            .filter(|m| is_eligible_mountpoint(m))
            .cloned()
            .collect();
        if eligible.is_empty() {
            return UnmountOutcome::Refused {
                gate: 4,
                reason: format!("no mountpoint under /mnt or /media: {mountpoints:?}"),
            };
        }

        // Gate 5: cooldown
        if let Some(last) = self.attempts.get(identity) {
            let elapsed = last.elapsed();
            if elapsed < self.cooldown {
                let remaining = self.cooldown - elapsed;
                return UnmountOutcome::Refused {
                    gate: 5,
                    reason: format!("cooldown active, {}s remaining", remaining.as_secs()),
                };
            }
        }

        if self.mode == UnmountMode::Passive {
            return UnmountOutcome::PassiveOnly { eligible };
        }

        let mut unmounted = Vec::new();
        let mut errors = Vec::new();
        for mountpoint in &eligible {
            match execute_umount(mountpoint, os_name).await {
                Ok(()) => unmounted.push(mountpoint.clone()),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            UnmountOutcome::Unmounted {
                mountpoints: unmounted,
            }
        } else {
            UnmountOutcome::Failed { unmounted, errors }
        }
    }

    /// Current mountpoints of a device and its partitions, read fresh from
    /// the mount table on every call.
    pub fn mountpoints_for(&self, os_name: &str) -> Vec<String> {
        let Ok(table) = std::fs::read_to_string(&self.mounts_path) else {
            return Vec::new();
        };
        let device_prefix = format!("/dev/{os_name}");
        table
            .lines()
            .filter_map(|line| {
                let mut parts = line.split_whitespace();
                let device = parts.next()?;
                let mountpoint = parts.next()?;
                if device_matches(device, &device_prefix) {
                    Some(mountpoint.to_string())
                } else {
                    None
                }
            })
            .collect()
    }

    /// Attempts recorded so far, oldest first.
    pub fn journal(&self) -> Vec<UnmountAttempt> {
        self.journal.lock().clone()
    }
}

/// `/dev/sda` matches itself and its partitions (`/dev/sda1`,
/// `/dev/nvme0n1p2`), never a longer device name (`/dev/sdaa`).
fn device_matches(mount_device: &str, device_prefix: &str) -> bool {
    if mount_device == device_prefix {
        return true;
    }
    mount_device
        .strip_prefix(device_prefix)
        .is_some_and(|rest| rest.chars().all(|c| c.is_ascii_digit()) && !rest.is_empty()
            || rest.starts_with('p') && rest[1..].chars().all(|c| c.is_ascii_digit()) && rest.len() > 1)
}

fn is_critical_mountpoint(mountpoint: &str) -> bool {
    CRITICAL_PATHS
        .iter()
        .any(|critical| mountpoint == *critical || mountpoint.starts_with(&format!("{critical}/")))
}

fn is_eligible_mountpoint(mountpoint: &str) -> bool {
    ELIGIBLE_ROOTS
        .iter()
        .any(|root| mountpoint == *root || mountpoint.starts_with(&format!("{root}/")))
}

async fn execute_umount(mountpoint: &str, os_name: &str) -> std::result::Result<(), String> {
    // Mountpoint first, device node as fallback.
    for target in [mountpoint.to_string(), format!("/dev/{os_name}")] {
        let mut cmd = tokio::process::Command::new("umount");
        cmd.arg(&target).kill_on_drop(true);
        match tokio::time::timeout(UMOUNT_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => return Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if target == format!("/dev/{os_name}") {
                    return Err(format!("umount {mountpoint} failed: {stderr}"));
                }
            }
            Ok(Err(e)) => return Err(format!("umount {target} could not start: {e}")),
            Err(_) => return Err(format!("umount {target} timed out after {UMOUNT_TIMEOUT:?}")),
        }
    }
    Err(format!("umount {mountpoint} failed"))
}

// =============================================================================
// Tests
// =============================================================================
