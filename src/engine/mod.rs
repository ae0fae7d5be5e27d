//! Scan engine
//!
//! Owns the device inventory and drives parallel SMART polls at a configured
//! cadence. One `parking_lot::Mutex` guards the whole inventory state
//! (records, GDC trackers, absence counters, monitoring toggles); critical
//! sections are O(1) per update and no lock is ever held across an await.
//!
//! Each tick enumerates block devices, reconciles the inventory, installs
//! placeholders (preserving last-known data for known devices), and
//! dispatches one bounded worker per device. Workers call the SMART reader,
//! update GDC state, score successful reads, and atomically replace their
//! inventory entry; results are applied in dispatch order and stale results
//! are rejected. After every snapshot update the decision/logging/unmount
//! layer runs synchronously on the new entry.

pub mod enumerate;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::decision::{self, DecisionInput, DecisionThresholds};
use crate::device::{Bus, DeviceIdentity, DeviceRecord, ScanOutcome};
use crate::gdc::{GdcState, GdcTracker, FREEZE_WINDOW};
use crate::history::{HistoryLogger, HistoryRecord};
use crate::lifecycle::{LifecycleEvent, LifecycleEventKind, LifecycleLog};
use crate::scoring::{self, DeviceFacts};
use crate::smart::{ids, ReadOutcome, SmartReader};
use crate::temp_extremes::TempExtremes;
use crate::unmount::UnmountExecutor;

use enumerate::{DeviceEnumerator, DiscoveredDevice};

// =============================================================================
// Configuration
// =============================================================================

/// Scan engine tuning
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub polling_interval: Duration,
    /// Upper bound for the worker pool; actual size is
    /// `min(num_devices, worker_pool_size)`
    pub worker_pool_size: usize,
    pub smart_deadline: Duration,
    pub watchdog_interval: Duration,
    pub watchdog_threshold: Duration,
    /// Consecutive enumeration misses before a device is evicted
    pub absence_evict_n: u32,
    pub gdc_enabled: bool,
    pub thresholds: DecisionThresholds,
    /// Per-device opt-out from configuration, keyed by OS name
    pub monitored_devices: std::collections::BTreeMap<String, bool>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_secs(60),
            worker_pool_size: 8,
            smart_deadline: Duration::from_secs(15),
            watchdog_interval: Duration::from_secs(60),
            watchdog_threshold: Duration::from_secs(30),
            absence_evict_n: 3,
            gdc_enabled: true,
            thresholds: DecisionThresholds::default(),
            monitored_devices: Default::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            polling_interval: settings.polling_interval(),
            gdc_enabled: settings.gdc.enabled,
            thresholds: settings.decision_thresholds(),
            monitored_devices: settings.disk_selection.monitored_devices.clone(),
            ..Self::default()
        }
    }
}

// =============================================================================
// Inventory State
// =============================================================================

/// Everything behind the single inventory mutex
#[derive(Default)]
struct InventoryState {
    records: HashMap<String, DeviceRecord>,
    trackers: HashMap<String, GdcTracker>,
    absences: HashMap<String, u32>,
    placeholder_since: HashMap<String, Instant>,
    /// Monitoring toggles keyed by identity; survives OS-name changes
    monitoring: HashMap<DeviceIdentity, bool>,
}

/// One device selected for scanning in a pass
#[derive(Debug, Clone)]
struct ScanTarget {
    os_name: String,
    bus: Bus,
    rotational: Option<bool>,
    capacity_bytes: Option<u64>,
}

// =============================================================================
// Engine
// =============================================================================

struct EngineInner {
    config: EngineConfig,
    reader: Arc<dyn SmartReader>,
    enumerator: Arc<dyn DeviceEnumerator>,
    history: Arc<HistoryLogger>,
    lifecycle: Arc<LifecycleLog>,
    temp_extremes: Arc<TempExtremes>,
    unmount: Arc<UnmountExecutor>,
    state: Mutex<InventoryState>,
    pass_in_flight: AtomicBool,
    last_tick: Mutex<Option<Instant>>,
}

/// Concurrent scanning engine; cheap to clone, all clones share state
#[derive(Clone)]
pub struct ScanEngine {
    inner: Arc<EngineInner>,
}

impl ScanEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        reader: Arc<dyn SmartReader>,
        enumerator: Arc<dyn DeviceEnumerator>,
        history: Arc<HistoryLogger>,
        lifecycle: Arc<LifecycleLog>,
        temp_extremes: Arc<TempExtremes>,
        unmount: Arc<UnmountExecutor>,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                config,
                reader,
                enumerator,
                history,
                lifecycle,
                temp_extremes,
                unmount,
                state: Mutex::new(InventoryState::default()),
                pass_in_flight: AtomicBool::new(false),
                last_tick: Mutex::new(None),
            }),
        }
    }

    pub fn history(&self) -> &HistoryLogger {
        &self.inner.history
    }

    pub fn unmount_executor(&self) -> &UnmountExecutor {
        &self.inner.unmount
    }

    // =========================================================================
    // Control Surface
    // =========================================================================

    /// Consistent copy of the inventory at an instant, ordered by OS name.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        let state = self.inner.state.lock();
        let mut records: Vec<DeviceRecord> = state.records.values().cloned().collect();
        records.sort_by(|a, b| a.os_name.cmp(&b.os_name));
        records
    }

    /// Advance the cadence. No-op while a pass is already in flight or when
    /// the polling interval has not elapsed since the last one.
    pub async fn tick(&self) {
        {
            let last = self.inner.last_tick.lock();
            if let Some(last) = *last {
                if last.elapsed() < self.inner.config.polling_interval {
                    debug!("tick skipped: interval not elapsed");
                    return;
                }
            }
        }
        if self
            .inner
            .pass_in_flight
            .swap(true, Ordering::AcqRel)
        {
            debug!("tick skipped: pass already in flight");
            return;
        }
        self.scan_pass(false).await;
        *self.inner.last_tick.lock() = Some(Instant::now());
        self.inner.pass_in_flight.store(false, Ordering::Release);
    }

    /// Immediate scan of all devices, including those deep in GDC trouble.
    /// Freezes failure accounting for SUSPECT/CONFIRMED devices so one good
    /// poll can clear them, and forces a history entry for every device.
    pub async fn force_scan(&self) {
        if self
            .inner
            .pass_in_flight
            .swap(true, Ordering::AcqRel)
        {
            warn!("force scan refused: a pass is already in flight");
            return;
        }
        {
            let mut state = self.inner.state.lock();
            for tracker in state.trackers.values_mut() {
                tracker.freeze_for(FREEZE_WINDOW);
            }
        }
        info!("force scan starting");
        self.scan_pass(true).await;
        self.inner.pass_in_flight.store(false, Ordering::Release);
    }

    /// Include or exclude a device from future scans without touching its
    /// history. Idempotent.
    pub fn toggle_monitoring(&self, identity: &DeviceIdentity, enabled: bool) {
        let mut state = self.inner.state.lock();
        state.monitoring.insert(identity.clone(), enabled);
        for record in state.records.values_mut() {
            if record.identity.as_ref() == Some(identity) {
                record.monitored = enabled;
            }
        }
    }

    /// One synchronous scan cycle; returns the resulting snapshot without
    /// starting any background work.
    pub async fn check_health_once(&self) -> Vec<DeviceRecord> {
        if !self.inner.pass_in_flight.swap(true, Ordering::AcqRel) {
            self.scan_pass(false).await;
            self.inner.pass_in_flight.store(false, Ordering::Release);
        }
        self.snapshot()
    }

    /// Cadence loop: interleaves ticks and watchdog sweeps in one driver
    /// task until shutdown. In-flight workers drain within a bounded grace
    /// (twice the SMART deadline) inside the running pass.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick_interval = tokio::time::interval(self.inner.config.polling_interval);
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut watchdog_interval = tokio::time::interval(self.inner.config.watchdog_interval);
        watchdog_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            interval = ?self.inner.config.polling_interval,
            "scan engine running"
        );
        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.tick().await;
                }
                _ = watchdog_interval.tick() => {
                    self.watchdog_sweep();
                }
                _ = shutdown.changed() => {
                    info!("scan engine shutting down");
                    break;
                }
            }
        }
    }

    // =========================================================================
    // Scan Pass
    // =========================================================================

    async fn scan_pass(&self, force: bool) {
        let discovered = match self.inner.enumerator.enumerate().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(error = %e, "device enumeration failed, pass skipped");
                return;
            }
        };

        let (targets, events, evicted) = self.reconcile(&discovered);
        for record in evicted {
            self.flush_eviction(record);
        }
        for event in events {
            self.inner.lifecycle.record(
                event.event,
                &event.os_name,
                event.identity.as_ref(),
                event.detail,
            );
        }

        if targets.is_empty() {
            debug!("nothing to scan");
            return;
        }

        let pool = targets.len().min(self.inner.config.worker_pool_size).max(1);
        let semaphore = Arc::new(Semaphore::new(pool));
        let mut workers = JoinSet::new();
        for target in targets {
            let engine = self.clone();
            let semaphore = Arc::clone(&semaphore);
            // Results are applied in dispatch order, so the timestamp is
            // taken here, not when the worker actually starts.
            let dispatched = Instant::now();
            workers.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                engine.scan_device(target, dispatched, force).await;
            });
        }

        // Workers past the grace window are abandoned; their placeholders
        // are cleared later by the watchdog.
        let grace = 2 * self.inner.config.smart_deadline;
        let drained = tokio::time::timeout(grace, async {
            while let Some(result) = workers.join_next().await {
                if let Err(e) = result {
                    if e.is_panic() {
                        warn!("scan worker panicked outside the reader");
                    }
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(?grace, "abandoning scan workers past drain deadline");
            workers.abort_all();
        }
    }

    /// Reconcile the inventory against a fresh enumeration and pick the
    /// devices to scan. Single lock acquisition; lifecycle I/O and history
    /// flushes are returned to the caller to run outside the lock.
    fn reconcile(
        &self,
        discovered: &[DiscoveredDevice],
    ) -> (Vec<ScanTarget>, Vec<LifecycleEvent>, Vec<DeviceRecord>) {
        let config = &self.inner.config;
        let mut events = Vec::new();
        let mut evicted = Vec::new();
        let mut targets = Vec::new();

        let mut state = self.inner.state.lock();
        let now = Utc::now();
        let seen: std::collections::HashSet<&str> =
            discovered.iter().map(|d| d.os_name.as_str()).collect();

        // New and returning devices.
        for device in discovered {
            let name = &device.os_name;
            if !state.records.contains_key(name) {
                state
                    .records
                    .insert(name.clone(), DeviceRecord::placeholder(name, device.bus, now));
                state
                    .trackers
                    .insert(name.clone(), GdcTracker::new(config.gdc_enabled));
                events.push(LifecycleEvent {
                    timestamp: now,
                    event: LifecycleEventKind::DeviceAdded,
                    os_name: name.clone(),
                    identity: None,
                    detail: None,
                });
            } else if state.absences.get(name).copied().unwrap_or(0) > 0 {
                let identity = state.records.get(name).and_then(|r| r.identity.clone());
                events.push(LifecycleEvent {
                    timestamp: now,
                    event: LifecycleEventKind::DeviceReconnected,
                    os_name: name.clone(),
                    identity,
                    detail: None,
                });
            }
            state.absences.insert(name.clone(), 0);
        }

        // Missing devices accumulate absences and are evicted at the limit,
        // with their last record flushed to history as Vanished.
        let missing: Vec<String> = state
            .records
            .keys()
            .filter(|name| !seen.contains(name.as_str()))
            .cloned()
            .collect();
        for name in missing {
            let count = state.absences.entry(name.clone()).or_insert(0);
            *count += 1;
            if *count < config.absence_evict_n {
                continue;
            }
            if let Some(mut record) = state.records.remove(&name) {
                record.scan_outcome = Some(ScanOutcome::Vanished);
                record.scanning_in_progress = false;
                record.last_updated = now;
                events.push(LifecycleEvent {
                    timestamp: now,
                    event: LifecycleEventKind::DeviceRemoved,
                    os_name: name.clone(),
                    identity: record.identity.clone(),
                    detail: Some(format!("absent for {} polls", config.absence_evict_n)),
                });
                evicted.push(record);
            }
            state.trackers.remove(&name);
            state.absences.remove(&name);
            state.placeholder_since.remove(&name);
        }

        // Placeholder install + target selection. Split the guard so the
        // record borrow can coexist with lookups in the sibling maps.
        let InventoryState {
            records,
            trackers,
            placeholder_since,
            monitoring,
            ..
        } = &mut *state;
        for device in discovered {
            let name = &device.os_name;
            let Some(record) = records.get_mut(name) else {
                continue;
            };
            let monitored = record
                .identity
                .as_ref()
                .and_then(|id| monitoring.get(id).copied())
                .unwrap_or_else(|| {
                    config
                        .monitored_devices
                        .get(name)
                        .copied()
                        .unwrap_or(true)
                });
            record.monitored = monitored;
            if !monitored {
                continue;
            }
            let schedulable = trackers
                .get(name)
                .map(|t| t.state().schedulable())
                .unwrap_or(true);
            if !schedulable {
                continue;
            }

            // Install the placeholder: readers keep seeing last-known data
            // while the fresh poll runs.
            record.scanning_in_progress = true;
            placeholder_since.insert(name.clone(), Instant::now());
            targets.push(ScanTarget {
                os_name: name.clone(),
                bus: device.bus,
                rotational: device.rotational,
                capacity_bytes: device.capacity_bytes,
            });
        }

        (targets, events, evicted)
    }

    // =========================================================================
    // Per-Device Worker
    // =========================================================================

    async fn scan_device(&self, target: ScanTarget, dispatched: Instant, force: bool) {
        // A panicking reader is contained and counted as a parse failure for
        // this device; the inventory is never poisoned.
        let outcome = std::panic::AssertUnwindSafe(
            self.inner.reader.read(&target.os_name, target.bus),
        )
        .catch_unwind()
        .await
        .unwrap_or_else(|_| ReadOutcome::ParseError {
            reason: "scan worker panicked".to_string(),
        });

        self.process_outcome(target, dispatched, outcome, force).await;
    }

    async fn process_outcome(
        &self,
        target: ScanTarget,
        dispatched: Instant,
        outcome: ReadOutcome,
        force: bool,
    ) {
        let os_name = target.os_name.clone();

        // Phase 1 (locked): update GDC, capture the prior record, and detect
        // identity changes.
        let (prior, gdc_state, identity_evicted) = {
            let mut state = self.inner.state.lock();
            let Some(prior) = state.records.get(&os_name).cloned() else {
                // Evicted while we were reading; result discarded.
                return;
            };

            let mut identity_evicted = None;
            if let ReadOutcome::Success(payload) = &outcome {
                if let (Some(old), Some(new)) = (&prior.identity, &payload.identity) {
                    if old != new {
                        // A different identity at the same OS path is a new
                        // device; the old one vanishes.
                        let mut old_record = prior.clone();
                        old_record.scan_outcome = Some(ScanOutcome::Vanished);
                        old_record.scanning_in_progress = false;
                        identity_evicted = Some(old_record);
                        state
                            .trackers
                            .insert(os_name.clone(), GdcTracker::new(self.inner.config.gdc_enabled));
                        let fresh =
                            DeviceRecord::placeholder(&os_name, payload.bus, Utc::now());
                        state.records.insert(os_name.clone(), fresh);
                    }
                }
            }

            let tracker = state
                .trackers
                .entry(os_name.clone())
                .or_insert_with(|| GdcTracker::new(self.inner.config.gdc_enabled));
            match &outcome {
                ReadOutcome::Success(payload) => {
                    if payload.identity.is_none() && payload.bus.is_usb() {
                        tracker.record_usb_no_identity();
                    } else {
                        tracker.record_success();
                    }
                }
                ReadOutcome::Timeout { .. } | ReadOutcome::ParseError { .. } => {
                    tracker.record_failure();
                }
                ReadOutcome::NoSupport => tracker.record_no_support(),
                ReadOutcome::Vanished => {}
            }
            let gdc_state = tracker.state();
            let prior = state.records.get(&os_name).cloned().unwrap_or(prior);
            (prior, gdc_state, identity_evicted)
        };

        if let Some(old_record) = identity_evicted {
            self.inner.lifecycle.record(
                LifecycleEventKind::DeviceRemoved,
                &os_name,
                old_record.identity.as_ref(),
                Some("identity changed at this path".to_string()),
            );
            self.flush_eviction(old_record);
        }

        // Phase 2 (unlocked): scoring, trend lookup, decision.
        let record = self.build_record(&target, prior, gdc_state, &outcome);
        let new_outcome = record.scan_outcome.unwrap_or(ScanOutcome::ParseError);

        // Phase 3 (locked): atomic replace, unless a fresher result already
        // landed.
        let published = {
            let mut state = self.inner.state.lock();
            match state.records.get(&os_name) {
                Some(stored) if stored.accepts(new_outcome, dispatched) => {
                    let mut record = record.clone();
                    record.dispatched_at = Some(dispatched);
                    state.records.insert(os_name.clone(), record);
                    state.placeholder_since.remove(&os_name);
                    true
                }
                Some(_) => {
                    debug!(device = %os_name, "stale scan result rejected");
                    false
                }
                None => false,
            }
        };
        if !published {
            return;
        }

        // Phase 4: decision + action layer, synchronously on the new entry.
        if let Some(history_record) = HistoryRecord::from_device_record(&record, Utc::now()) {
            if let Err(e) = self.inner.history.commit(history_record, force) {
                warn!(device = %os_name, error = %e, "history commit failed");
            }
        }

        let emergency = record
            .decision
            .as_ref()
            .is_some_and(|d| d.can_emergency_unmount);
        if emergency {
            if let (Some(identity), Some(decision)) = (&record.identity, &record.decision) {
                self.inner
                    .unmount
                    .evaluate(&os_name, identity, decision)
                    .await;
            }
        }
    }

    /// Compose the completed record for one outcome. Pure apart from history
    /// reads (previous record for trends) and the temperature tracker.
    fn build_record(
        &self,
        target: &ScanTarget,
        prior: DeviceRecord,
        gdc_state: GdcState,
        outcome: &ReadOutcome,
    ) -> DeviceRecord {
        let mut record = prior;
        record.scanning_in_progress = false;
        record.gdc_state = gdc_state;
        record.last_updated = Utc::now();

        match outcome {
            ReadOutcome::Success(payload) => {
                if payload.identity.is_some() {
                    record.identity = payload.identity.clone();
                }
                record.bus = payload.bus;
                record.rotational = payload.rotational.or(target.rotational);
                record.capacity_bytes = payload.capacity_bytes.or(target.capacity_bytes);
                record.attributes = payload.attributes.clone();
                record.temperature = payload.temperature;
                record.scan_outcome = Some(ScanOutcome::Success);
                record.last_smart_response_time = Some(payload.elapsed);

                if let Some(identity) = &record.identity {
                    record.temperature_max = self.inner.temp_extremes.observe(
                        identity,
                        payload.temperature,
                        payload.temperature_max_lifetime,
                    );
                }

                let rotational = record.rotational.unwrap_or(false);
                let facts = DeviceFacts {
                    attributes: record.attributes.clone(),
                    rotational,
                    temperature: record.temperature,
                    rated_endurance_bytes: if rotational {
                        None
                    } else {
                        record
                            .capacity_bytes
                            .and_then(DeviceFacts::rated_endurance_estimate)
                    },
                };
                let scored = scoring::score(&facts);
                record.health_state = scored.health_state;
                record.component_breakdown = scored.components;
                record.escalated_attributes = scored.escalated;

                let previous = record
                    .identity
                    .as_ref()
                    .and_then(|id| self.inner.history.previous_record(id));
                let input = DecisionInput {
                    reallocated: record.attributes.raw_value(ids::REALLOCATED_SECTORS),
                    previous_reallocated: previous
                        .as_ref()
                        .and_then(|p| p.attributes_critical.reallocated),
                    pending: record.attributes.raw_value(ids::PENDING_SECTORS),
                    previous_pending: previous
                        .as_ref()
                        .and_then(|p| p.attributes_critical.pending),
                    uncorrectable: record.attributes.raw_value(ids::REPORTED_UNCORRECTABLE),
                    command_timeouts: record.attributes.raw_value(ids::COMMAND_TIMEOUT),
                    temperature: record.temperature,
                    rotational,
                    health_score: scored.health_score,
                    previous_health_score: previous.as_ref().and_then(|p| p.health_score),
                    gdc_state: Some(gdc_state),
                };
                record.health_score = scored.health_score;
                record.decision = Some(decision::evaluate(&input, &self.inner.config.thresholds));
            }
            ReadOutcome::Timeout { elapsed } => {
                record.scan_outcome = Some(ScanOutcome::Timeout);
                record.last_smart_response_time = Some(*elapsed);
            }
            ReadOutcome::ParseError { reason } => {
                debug!(device = %target.os_name, reason, "SMART parse failure");
                record.scan_outcome = Some(ScanOutcome::ParseError);
            }
            ReadOutcome::NoSupport => {
                record.scan_outcome = Some(ScanOutcome::NoSupport);
                let input = DecisionInput {
                    gdc_state: Some(gdc_state),
                    ..Default::default()
                };
                record.decision = Some(decision::evaluate(&input, &self.inner.config.thresholds));
            }
            ReadOutcome::Vanished => {
                record.scan_outcome = Some(ScanOutcome::Vanished);
            }
        }
        record
    }

    // =========================================================================
    // Watchdog & Eviction
    // =========================================================================

    /// Clear placeholders older than the watchdog threshold. Never fabricates
    /// attribute data; the record simply stops claiming a scan is running.
    pub fn watchdog_sweep(&self) {
        let threshold = self.inner.config.watchdog_threshold;
        let mut stuck = Vec::new();
        {
            let mut state = self.inner.state.lock();
            let expired: Vec<String> = state
                .placeholder_since
                .iter()
                .filter(|(_, since)| since.elapsed() > threshold)
                .map(|(name, since)| {
                    stuck.push((name.clone(), since.elapsed()));
                    name.clone()
                })
                .collect();
            for name in expired {
                state.placeholder_since.remove(&name);
                if let Some(record) = state.records.get_mut(&name) {
                    record.scanning_in_progress = false;
                }
            }
        }
        for (name, elapsed) in stuck {
            warn!(device = %name, ?elapsed, "stuck device: clearing placeholder");
            let identity = {
                let state = self.inner.state.lock();
                state.records.get(&name).and_then(|r| r.identity.clone())
            };
            self.inner.lifecycle.record(
                LifecycleEventKind::StuckScan,
                &name,
                identity.as_ref(),
                Some(format!("placeholder older than {}s", elapsed.as_secs())),
            );
        }
    }

    /// Flush the final record of an evicted device to history.
    fn flush_eviction(&self, record: DeviceRecord) {
        let Some(history_record) = HistoryRecord::from_device_record(&record, Utc::now()) else {
            return;
        };
        let identity = history_record.identity.clone();
        if let Err(e) = self.inner.history.commit(history_record, true) {
            warn!(identity = %identity, error = %e, "final history flush failed");
        }
        self.inner.history.forget(&identity);
    }
}

// =============================================================================
// Tests
// =============================================================================
