//! # Replica Store
//!
//! Owns every [`DataPoint`] of the mirror and keeps the mirror in step with
//! the connection:
//!
//! - connected and empty: list the server keys and build the mirror
//! - disconnected and populated: tear the mirror down
//! - connected and populated: refresh rate statistics of a bounded batch of
//!   keys that are not receiving pushed reports
//!
//! [`ReplicaStore::maintain`] performs one such step and is meant to be called
//! periodically by a single maintenance task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::configs::settings::StoreConfig;
use crate::connections::gateway::Gateway;
use crate::core::datapoint::DataPoint;
use crate::core::stats_tracker::StatsTracker;
use crate::error::{FixNetError, Result};
use crate::protocol::flags::QualityFlag;
use crate::protocol::frame::DataUpdate;
use crate::protocol::report::Report;
use crate::protocol::value::Value;

const EVENT_CAPACITY: usize = 64;

/// Store wide lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    ConnectionChanged(bool),
    Initialized { points: usize },
    TornDown { points: usize },
}

#[derive(Default)]
struct Mirror {
    points: HashMap<String, Arc<DataPoint>>,
    order: Vec<String>,
}

pub struct ReplicaStore {
    gateway: Arc<dyn Gateway>,
    config: StoreConfig,
    mirror: RwLock<Mirror>,
    tracker: Arc<StatsTracker>,
    initialized: watch::Sender<bool>,
    events: broadcast::Sender<StoreEvent>,
    was_connected: AtomicBool,
    /// Connection epoch the current mirror was built on.
    mirror_epoch: AtomicU64,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ReplicaStore {
    pub fn new(gateway: Arc<dyn Gateway>, config: StoreConfig) -> Self {
        let (initialized, _) = watch::channel(false);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            gateway,
            config,
            mirror: RwLock::new(Mirror::default()),
            tracker: Arc::new(StatsTracker::new()),
            initialized,
            events,
            was_connected: AtomicBool::new(false),
            mirror_epoch: AtomicU64::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    // ---- consumer API ----

    pub fn get(&self, key: &str) -> Option<Arc<DataPoint>> {
        self.mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .points
            .get(key)
            .cloned()
    }

    /// Mirrored keys in server list order.
    pub fn keys(&self) -> Vec<String> {
        self.mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .clone()
    }

    pub fn len(&self) -> usize {
        self.mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .points
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_initialized(&self) -> bool {
        *self.initialized.borrow()
    }

    /// Waits for a completed initialization. Returns `false` on timeout.
    pub async fn wait_initialized(&self, timeout: Duration) -> bool {
        let mut rx = self.initialized.subscribe();
        let ready = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)).await,
            Ok(Ok(_))
        );
        ready
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn value(&self, key: &str) -> Option<Value> {
        self.get(key).map(|p| p.value())
    }

    pub async fn set_value(&self, key: &str, value: impl Into<Value>) -> Result<()> {
        let point = self
            .get(key)
            .ok_or_else(|| FixNetError::UnknownKey(key.to_string()))?;
        point.set_value(value).await
    }

    /// Sets the fail flag of every point.
    pub async fn mark_all_fail(&self) {
        let points: Vec<Arc<DataPoint>> = self
            .mirror
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .points
            .values()
            .cloned()
            .collect();
        for point in points {
            point.set_flag(QualityFlag::Fail, true).await;
        }
    }

    pub fn is_push_driven(&self, key: &str) -> bool {
        self.tracker.is_push_driven(key)
    }

    /// Keys waiting for a pull report refresh.
    pub fn pending_stats(&self) -> usize {
        self.tracker.dirty_len()
    }

    fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    // ---- inbound traffic ----

    /// Applies one queued data update. Never writes back.
    pub fn handle_update(&self, update: DataUpdate) {
        if let Some((base, aux)) = update.aux_target() {
            match self.get(base) {
                Some(point) => {
                    if let Err(e) = point.apply_aux(aux, &update.value) {
                        log::warn!("Dropping update of {}: {}", update.id, e);
                    }
                }
                None => log::debug!("Update for unknown key {}", update.id),
            }
            return;
        }

        match self.get(&update.id) {
            Some(point) => match point.apply_update(&update.value, update.flags) {
                Ok(()) => self.tracker.mark_dirty(&update.id),
                Err(e) => log::warn!("Dropping update of {}: {}", update.id, e),
            },
            None => log::debug!("Update for unknown key {}", update.id),
        }
    }

    /// Applies a pushed report payload.
    pub fn handle_report(&self, payload: &str) {
        let report = match Report::parse(payload) {
            Ok(report) => report,
            Err(e) => {
                log::warn!("Discarding pushed report: {}", e);
                return;
            }
        };
        if self.tracker.mark_push_driven(&report.key) {
            log::debug!("{} receives pushed reports, polling stopped", report.key);
        }
        match self.get(&report.key) {
            Some(point) => point.update_stats(&report.stats),
            None => log::debug!("Pushed report for unknown key {}", report.key),
        }
    }

    // ---- lifecycle ----

    /// One maintenance step.
    pub async fn maintain(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let connected = self.gateway.is_connected();
        if self.was_connected.swap(connected, Ordering::SeqCst) != connected {
            log::info!("Connection state changed: connected={}", connected);
            self.emit(StoreEvent::ConnectionChanged(connected));
        }

        let empty = self.is_empty();
        let built = !empty || self.is_initialized();
        let stale = self.gateway.connection_epoch() != self.mirror_epoch.load(Ordering::SeqCst);
        if connected && built && stale {
            // Reconnected between two ticks: the server forgot our subscriptions.
            log::warn!("Link reconnected since the replica was built, rebuilding");
            self.emit(StoreEvent::ConnectionChanged(false));
            self.teardown_locked().await;
            self.emit(StoreEvent::ConnectionChanged(true));
            self.initialize_locked().await;
        } else if connected && empty && !self.is_initialized() {
            self.initialize_locked().await;
        } else if !connected && built {
            self.teardown_locked().await;
        } else if connected && !empty {
            self.refresh_stats().await;
        }
    }

    /// Builds the mirror. A no-op when it is already populated.
    pub async fn initialize(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;
        if !self.is_empty() {
            log::warn!("Trying to initialize an already initialized replica");
            return Ok(());
        }
        self.try_initialize().await
    }

    async fn initialize_locked(&self) {
        if let Err(e) = self.try_initialize().await {
            log::error!("Replica initialization failed: {}", e);
        }
    }

    /// Populates the mirror; on failure tears down what was built.
    async fn try_initialize(&self) -> Result<()> {
        log::info!("Initializing replica");
        self.tracker.clear();

        let epoch = self.gateway.connection_epoch();
        let result = self.populate().await;
        match result {
            Ok(()) => {
                self.mirror_epoch.store(epoch, Ordering::SeqCst);
                let points = self.len();
                self.initialized.send_replace(true);
                log::info!("Replica initialized with {} points", points);
                self.emit(StoreEvent::Initialized { points });
                Ok(())
            }
            Err(e) => {
                self.teardown_locked().await;
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<()> {
        let keys = self.gateway.list().await?;
        for key in &keys {
            self.define_point(key).await?;
        }
        Ok(())
    }

    async fn define_point(&self, key: &str) -> Result<()> {
        let report = self.gateway.get_report(key).await?;

        let point = {
            let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
            match mirror.points.get(key) {
                Some(existing) => Arc::clone(existing),
                None => {
                    let point = Arc::new(DataPoint::new(
                        key,
                        report.dtype,
                        Arc::clone(&self.gateway),
                        Arc::clone(&self.tracker),
                    ));
                    mirror.points.insert(key.to_string(), Arc::clone(&point));
                    mirror.order.push(key.to_string());
                    point
                }
            }
        };
        point.define(&report);
        self.tracker.discard(key);

        let current = self.gateway.read(key).await?;
        if let Err(e) = point.apply_update(&current.value, current.flags) {
            log::warn!("Initial value of {} rejected: {}", key, e);
        }
        for aux in point.aux_names() {
            let id = format!("{}.{}", key, aux);
            match self.gateway.read(&id).await {
                Ok(res) => {
                    if let Err(e) = point.apply_aux(&aux, &res.value) {
                        log::warn!("Initial value of {} rejected: {}", id, e);
                    }
                }
                Err(e) if e.is_disconnect() => return Err(e),
                Err(e) => log::warn!("Unable to read {}: {}", id, e),
            }
        }

        self.gateway.subscribe(key).await?;
        if let Err(e) = self
            .gateway
            .subscribe_report(key, self.config.report_interval_ms)
            .await
        {
            log::debug!("Report subscription of {} failed: {}", key, e);
        }
        point.notify_report_received();
        Ok(())
    }

    async fn teardown_locked(&self) {
        let drained = {
            let mut mirror = self.mirror.write().unwrap_or_else(PoisonError::into_inner);
            let mut old = std::mem::take(&mut *mirror);
            old.order
                .iter()
                .filter_map(|k| old.points.remove(k).map(|p| (k.clone(), p)))
                .collect::<Vec<_>>()
        };
        let points = drained.len();
        log::info!("Tearing down replica ({} points)", points);

        for (key, point) in &drained {
            if let Err(e) = self.gateway.unsubscribe(key).await {
                log::debug!("Unsubscribe of {} failed: {}", key, e);
            }
            if let Err(e) = self.gateway.unsubscribe_report(key).await {
                log::debug!("Report unsubscribe of {} failed: {}", key, e);
            }
            point.notify_destroyed();
        }

        self.tracker.clear();
        self.initialized.send_replace(false);
        self.emit(StoreEvent::TornDown { points });
    }

    /// Pull-refreshes the stats of at most one batch of dirty keys.
    async fn refresh_stats(&self) {
        let batch = self.tracker.take_batch(self.config.stats_batch_size);
        for key in batch {
            let Some(point) = self.get(&key) else {
                continue;
            };
            match self.gateway.get_report(&key).await {
                Ok(report) => point.update_stats(&report.stats),
                Err(e) => {
                    log::debug!("Stats refresh of {} failed: {}", key, e);
                    self.tracker.mark_dirty(&key);
                }
            }
        }
    }
}
