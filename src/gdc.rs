//! Ghost Drive Condition state machine
//!
//! GDC is the state in which a drive's controller has become unreliable at
//! delivering SMART telemetry, independent of whether its media is intact.
//! The machine is driven purely by reader outcomes; it never diagnoses
//! absence of data as failure. A device that has never produced a single
//! successful read is UNASSESSABLE, not broken.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Consecutive failures before OK escalates to SUSPECT
const SUSPECT_AFTER: u32 = 3;
/// Consecutive failures before SUSPECT escalates to CONFIRMED
const CONFIRMED_AFTER: u32 = 6;
/// Consecutive failures (without a single success ever) before TERMINAL
const TERMINAL_AFTER: u32 = 50;
/// Consecutive successes needed to leave CONFIRMED
const RECOVER_FROM_CONFIRMED: u32 = 3;
/// How long a force-scan freeze suspends failure accounting
pub const FREEZE_WINDOW: Duration = Duration::from_secs(5 * 60);
/// USB devices that present no identity for this many polls are unassessable
const USB_NO_IDENTITY_AFTER: u32 = 2;

// =============================================================================
// State
// =============================================================================

/// Ghost Drive Condition state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GdcState {
    Ok,
    Suspect,
    Confirmed,
    Terminal,
    Unassessable,
}

impl GdcState {
    /// Terminal states never transition again within the process lifetime.
    pub fn is_sticky(&self) -> bool {
        matches!(self, GdcState::Terminal | GdcState::Unassessable)
    }

    /// Whether the scan engine should keep polling a device in this state.
    pub fn schedulable(&self) -> bool {
        !self.is_sticky()
    }
}

impl std::fmt::Display for GdcState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GdcState::Ok => "OK",
            GdcState::Suspect => "SUSPECT",
            GdcState::Confirmed => "CONFIRMED",
            GdcState::Terminal => "TERMINAL",
            GdcState::Unassessable => "UNASSESSABLE",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Tracker
// =============================================================================

/// Per-device GDC tracker
#[derive(Debug, Clone)]
pub struct GdcTracker {
    state: GdcState,
    enabled: bool,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_failures: u64,
    total_successes: u64,
    has_ever_succeeded: bool,
    usb_no_identity_polls: u32,
    freeze_until: Option<Instant>,
}

impl GdcTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            state: GdcState::Ok,
            enabled,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_failures: 0,
            total_successes: 0,
            has_ever_succeeded: false,
            usb_no_identity_polls: 0,
            freeze_until: None,
        }
    }

    pub fn state(&self) -> GdcState {
        self.state
    }

    pub fn has_ever_succeeded(&self) -> bool {
        self.has_ever_succeeded
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn total_failures(&self) -> u64 {
        self.total_failures
    }

    pub fn total_successes(&self) -> u64 {
        self.total_successes
    }

    fn frozen(&self) -> bool {
        self.freeze_until.is_some_and(|until| Instant::now() < until)
    }

    /// Suspend failure accounting for `window`. Used by force-scan on
    /// devices currently in SUSPECT/CONFIRMED so one good poll can clear
    /// them without a failed poll deepening the hole.
    pub fn freeze_for(&mut self, window: Duration) {
        if matches!(self.state, GdcState::Suspect | GdcState::Confirmed) {
            self.freeze_until = Some(Instant::now() + window);
        }
    }

    /// A successful SMART read with valid attributes.
    pub fn record_success(&mut self) {
        if !self.enabled || self.state.is_sticky() {
            return;
        }
        self.total_successes += 1;
        self.has_ever_succeeded = true;
        self.usb_no_identity_polls = 0;

        if self.frozen() {
            // One success inside the freeze window clears the device.
            self.state = GdcState::Ok;
            self.freeze_until = None;
            self.consecutive_failures = 0;
            self.consecutive_successes = 1;
            return;
        }

        self.consecutive_failures = 0;
        self.consecutive_successes += 1;

        match self.state {
            GdcState::Suspect => self.state = GdcState::Ok,
            GdcState::Confirmed if self.consecutive_successes >= RECOVER_FROM_CONFIRMED => {
                self.state = GdcState::Ok;
            }
            _ => {}
        }
    }

    /// A timeout or parse failure from the reader.
    pub fn record_failure(&mut self) {
        if !self.enabled || self.state.is_sticky() {
            return;
        }
        if self.frozen() {
            // Counters resume untouched once the window expires.
            return;
        }
        self.total_failures += 1;
        self.consecutive_successes = 0;
        self.consecutive_failures += 1;

        match self.state {
            GdcState::Ok if self.consecutive_failures >= SUSPECT_AFTER => {
                self.state = GdcState::Suspect;
            }
            GdcState::Suspect if self.consecutive_failures >= CONFIRMED_AFTER => {
                self.state = GdcState::Confirmed;
            }
            GdcState::Confirmed
                if self.consecutive_failures >= TERMINAL_AFTER && !self.has_ever_succeeded =>
            {
                self.state = GdcState::Terminal;
            }
            _ => {}
        }
    }

    /// The device reported no SMART capability. Sticky: missing telemetry is
    /// never failure, and never becomes failure later.
    pub fn record_no_support(&mut self) {
        if !self.enabled || self.state == GdcState::Terminal {
            return;
        }
        self.state = GdcState::Unassessable;
        self.freeze_until = None;
    }

    /// A successful read on a USB-attached device that presented no usable
    /// identity. Two such polls in a row mark the bridge unassessable.
    pub fn record_usb_no_identity(&mut self) {
        if !self.enabled || self.state.is_sticky() {
            return;
        }
        self.usb_no_identity_polls += 1;
        if self.usb_no_identity_polls >= USB_NO_IDENTITY_AFTER {
            self.state = GdcState::Unassessable;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
