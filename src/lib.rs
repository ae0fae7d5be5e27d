//! smartsentry - SMART Disk Health Monitoring Daemon
//!
//! A long-running, root-privileged daemon that continuously polls the SMART
//! data of every attached block device, derives a health score and a
//! qualitative decision per device, detects drives whose controller has
//! become unreliable (Ghost Drive Condition), persists time-series health
//! history, and optionally unmounts filesystems on devices whose failure is
//! imminent.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          smartsentry                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌────────────┐   ┌──────────────────────────┐ │
//! │  │   SMART    │──▶│    Scan    │──▶│   Decision + Actions     │ │
//! │  │   Reader   │   │   Engine   │   │ (logger, unmount, score) │ │
//! │  │  (Eyes)    │   │  (Brain)   │   │         (Hands)          │ │
//! │  └────────────┘   └─────┬──────┘   └──────────────────────────┘ │
//! │                         │ per-device GDC state machine          │
//! └─────────────────────────┴───────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`] - layered settings with safe PASSIVE fallback
//! - [`decision`] - severity ladder with the EMERGENCY combination rule
//! - [`device`] - identity, record and outcome types
//! - [`engine`] - concurrent scan engine, inventory and watchdog
//! - [`error`] - error types
//! - [`gdc`] - Ghost Drive Condition state machine
//! - [`history`] - change/time-triggered per-device JSONL history
//! - [`lifecycle`] - device appearance/disappearance event log
//! - [`scoring`] - pure health scoring model
//! - [`smart`] - attribute model and the smartctl reader
//! - [`temp_extremes`] - persistent observed-max temperature tracker
//! - [`unmount`] - five-gate emergency unmount executor

pub mod config;
pub mod decision;
pub mod device;
pub mod engine;
pub mod error;
pub mod gdc;
pub mod history;
pub mod lifecycle;
pub mod scoring;
pub mod smart;
pub mod temp_extremes;
pub mod unmount;

// Re-export commonly used types
pub use config::{Settings, UnmountMode};
pub use decision::{Decision, DecisionStatus};
pub use device::{Bus, DeviceIdentity, DeviceRecord, ScanOutcome};
pub use engine::enumerate::{DeviceEnumerator, DiscoveredDevice, SysfsEnumerator};
pub use engine::{EngineConfig, ScanEngine};
pub use error::{Error, Result};
pub use gdc::{GdcState, GdcTracker};
pub use history::{HistoryLogger, HistoryRecord, LogReason};
pub use lifecycle::{LifecycleEvent, LifecycleEventKind, LifecycleLog};
pub use scoring::{score, DeviceFacts, HealthState, ScoringResult};
pub use smart::{AttributeMap, ReadOutcome, SmartReader, SmartctlReader};
pub use temp_extremes::TempExtremes;
pub use unmount::{UnmountExecutor, UnmountOutcome};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
