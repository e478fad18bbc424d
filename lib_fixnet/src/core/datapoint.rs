//! # Data Point
//!
//! One mirrored server value with its quality flags, aux fields and rate
//! statistics.
//!
//! Local setters write through to the server unless writes are suppressed.
//! Updates coming from the server go through crate-internal `apply_*` paths
//! that never write back, so echo loops are impossible regardless of the
//! suppression flag.
//!
//! Write-through of a value is reconciled with the server echo: whatever the
//! server answers becomes the local value and flags. The echo is not
//! correlated with concurrent writers, so the last confirmed write wins.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::connections::gateway::Gateway;
use crate::core::stats_tracker::StatsTracker;
use crate::error::{FixNetError, Result};
use crate::protocol::flags::{parse_flag_bool, QualityFlag, QualityFlags};
use crate::protocol::frame::WriteEcho;
use crate::protocol::report::{RateStats, Report};
use crate::protocol::value::{DataType, Value};

pub type ListenerId = u64;

/// Called with the point key and the event, outside of the point lock.
pub type Listener = Arc<dyn Fn(&str, &PointEvent) + Send + Sync>;

/// A change notification of a single data point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointEvent {
    ValueChanged(Value),
    /// Fired on every value assignment, changed or not.
    ValueWrite(Value),
    FlagChanged(QualityFlag, bool),
    AuxChanged { name: String, value: Option<Value> },
    StatsChanged(RateStats),
    /// Initialization of the point finished.
    ReportReceived,
    /// The point left the mirror. Always the last event.
    Destroyed,
}

/// Copy of the mutable state of a point.
#[derive(Debug, Clone, PartialEq)]
pub struct PointState {
    pub dtype: DataType,
    pub value: Value,
    pub flags: QualityFlags,
    pub description: String,
    pub units: String,
    pub min: Value,
    pub max: Value,
    pub tolerance_ms: u64,
    pub aux: BTreeMap<String, Option<Value>>,
    pub timestamp: DateTime<Utc>,
    pub stats: RateStats,
}

impl PointState {
    fn new(dtype: DataType) -> Self {
        Self {
            dtype,
            value: dtype.default_value(),
            flags: QualityFlags {
                bad: true,
                fail: true,
                ..QualityFlags::default()
            },
            description: String::new(),
            units: String::new(),
            min: Value::Float(0.0),
            max: Value::Float(100.0),
            tolerance_ms: 100,
            aux: BTreeMap::new(),
            timestamp: Utc::now(),
            stats: RateStats::default(),
        }
    }

    fn convert(&self, key: &str, input: &Value) -> Result<Value> {
        self.dtype
            .coerce(input)
            .map(|v| v.clamp_to(&self.min, &self.max))
            .ok_or_else(|| FixNetError::Conversion {
                key: key.to_string(),
                input: input.to_string(),
                dtype: self.dtype.to_string(),
            })
    }

    fn diff_flags(&mut self, flags: QualityFlags, events: &mut Vec<PointEvent>) {
        for flag in QualityFlag::ALL {
            let on = flags.get(flag);
            if self.flags.get(flag) != on {
                self.flags.set(flag, on);
                events.push(PointEvent::FlagChanged(flag, on));
            }
        }
    }
}

pub struct DataPoint {
    key: String,
    state: Mutex<PointState>,
    suppress_write: AtomicBool,
    gateway: Arc<dyn Gateway>,
    tracker: Arc<StatsTracker>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

/// Restores the previous suppression setting when dropped.
pub struct WriteSuppression<'a> {
    point: &'a DataPoint,
    previous: bool,
}

impl Drop for WriteSuppression<'_> {
    fn drop(&mut self) {
        self.point.set_write_suppressed(self.previous);
    }
}

impl DataPoint {
    pub fn new(
        key: impl Into<String>,
        dtype: DataType,
        gateway: Arc<dyn Gateway>,
        tracker: Arc<StatsTracker>,
    ) -> Self {
        Self {
            key: key.into(),
            state: Mutex::new(PointState::new(dtype)),
            suppress_write: AtomicBool::new(false),
            gateway,
            tracker,
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn state(&self) -> MutexGuard<'_, PointState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> PointState {
        self.state().clone()
    }

    pub fn value(&self) -> Value {
        self.state().value.clone()
    }

    pub fn dtype(&self) -> DataType {
        self.state().dtype
    }

    pub fn flags(&self) -> QualityFlags {
        self.state().flags
    }

    pub fn flag(&self, flag: QualityFlag) -> bool {
        self.state().flags.get(flag)
    }

    pub fn min(&self) -> Value {
        self.state().min.clone()
    }

    pub fn max(&self) -> Value {
        self.state().max.clone()
    }

    pub fn tolerance_ms(&self) -> u64 {
        self.state().tolerance_ms
    }

    pub fn description(&self) -> String {
        self.state().description.clone()
    }

    pub fn units(&self) -> String {
        self.state().units.clone()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.state().timestamp
    }

    pub fn stats(&self) -> RateStats {
        self.state().stats.clone()
    }

    /// Value of aux `name`; `None` when unknown or unset.
    pub fn aux(&self, name: &str) -> Option<Value> {
        self.state().aux.get(name).cloned().flatten()
    }

    pub fn aux_names(&self) -> Vec<String> {
        self.state().aux.keys().cloned().collect()
    }

    /// Milliseconds since the last value assignment.
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp()).num_milliseconds()
    }

    pub fn is_stale(&self) -> bool {
        let st = self.state();
        (Utc::now() - st.timestamp).num_milliseconds() > st.tolerance_ms as i64
    }

    // ---- listeners ----

    pub fn subscribe(&self, listener: Listener) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    fn emit(&self, events: &[PointEvent]) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<Listener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for event in events {
            for listener in &listeners {
                listener(&self.key, event);
            }
        }
    }

    // ---- write suppression ----

    pub fn set_write_suppressed(&self, on: bool) {
        self.suppress_write.store(on, Ordering::SeqCst);
    }

    pub fn is_write_suppressed(&self) -> bool {
        self.suppress_write.load(Ordering::SeqCst)
    }

    /// Suppresses writes until the returned guard is dropped.
    pub fn suppress_writes(&self) -> WriteSuppression<'_> {
        let previous = self.suppress_write.swap(true, Ordering::SeqCst);
        WriteSuppression {
            point: self,
            previous,
        }
    }

    // ---- local setters ----

    /// Converts, clamps and assigns `input`, then writes it through.
    pub async fn set_value(&self, input: impl Into<Value>) -> Result<()> {
        let input = input.into();
        let (value, changed) = {
            let mut st = self.state();
            let value = match st.convert(&self.key, &input) {
                Ok(v) => v,
                Err(e) => {
                    log::error!("Bad value '{}' given for {}", input, self.key);
                    return Err(e);
                }
            };
            let changed = st.value != value;
            st.value = value.clone();
            st.timestamp = Utc::now();
            (value, changed)
        };

        let mut events = Vec::with_capacity(2);
        if changed {
            events.push(PointEvent::ValueChanged(value.clone()));
        }
        events.push(PointEvent::ValueWrite(value.clone()));
        self.emit(&events);

        if self.is_write_suppressed() {
            return Ok(());
        }
        match self.gateway.write_value(&self.key, &value.to_string()).await {
            Ok(echo) => {
                self.reconcile_echo(&echo);
                self.tracker.mark_dirty(&self.key);
                Ok(())
            }
            Err(e) => {
                log::error!("Write of {} failed: {}", self.key, e);
                Err(e)
            }
        }
    }

    fn reconcile_echo(&self, echo: &WriteEcho) {
        let mut events = Vec::new();
        {
            let mut st = self.state();
            match st.dtype.parse(&echo.value) {
                Some(v) => {
                    let v = v.clamp_to(&st.min, &st.max);
                    if st.value != v {
                        st.value = v.clone();
                        st.timestamp = Utc::now();
                        events.push(PointEvent::ValueChanged(v));
                    }
                }
                None => log::warn!("Unusable echo '{}' for {}", echo.value, self.key),
            }
            if let Some(flags) = echo.flags {
                st.diff_flags(flags, &mut events);
            }
        }
        self.emit(&events);
    }

    pub async fn set_flag(&self, flag: QualityFlag, on: bool) {
        let changed = {
            let mut st = self.state();
            let last = st.flags.get(flag);
            st.flags.set(flag, on);
            last != on
        };
        if !changed {
            return;
        }
        self.emit(&[PointEvent::FlagChanged(flag, on)]);

        if self.is_write_suppressed() {
            return;
        }
        if let Err(e) = self.gateway.flag(&self.key, flag, on).await {
            log::error!("Unable to send {} flag of {}: {}", flag, self.key, e);
        }
    }

    /// `set_flag` with textual input: `0`, `false`, `no` and `f` are false.
    pub async fn set_flag_text(&self, flag: QualityFlag, input: &str) {
        self.set_flag(flag, parse_flag_bool(input)).await
    }

    /// Sets aux `name`. `None` (or the text `None`) clears it locally only.
    pub async fn set_aux(&self, name: &str, value: Option<Value>) -> Result<()> {
        let (value, changed) = self.assign_aux(name, value.as_ref())?;
        if !changed {
            return Ok(());
        }
        self.emit(&[PointEvent::AuxChanged {
            name: name.to_string(),
            value: value.clone(),
        }]);

        if self.is_write_suppressed() {
            return Ok(());
        }
        if let Some(v) = value {
            let id = format!("{}.{}", self.key, name);
            if let Err(e) = self.gateway.write_value(&id, &v.to_string()).await {
                log::debug!("Unable to write aux {}: {}", id, e);
            }
        }
        Ok(())
    }

    fn assign_aux(&self, name: &str, value: Option<&Value>) -> Result<(Option<Value>, bool)> {
        let mut st = self.state();
        let converted = match value {
            None => None,
            Some(Value::Str(s)) if s == "None" => None,
            Some(v) => match st.dtype.coerce(v) {
                Some(c) => Some(c),
                None => {
                    log::error!("Bad aux value '{}' given for {}.{}", v, self.key, name);
                    return Err(FixNetError::Conversion {
                        key: format!("{}.{}", self.key, name),
                        input: v.to_string(),
                        dtype: st.dtype.to_string(),
                    });
                }
            },
        };
        let Some(slot) = st.aux.get_mut(name) else {
            return Err(FixNetError::UnknownAux {
                key: self.key.clone(),
                aux: name.to_string(),
            });
        };
        let changed = *slot != converted;
        *slot = converted.clone();
        Ok((converted, changed))
    }

    pub fn set_min(&self, input: &str) -> Result<()> {
        self.set_bound(input, true)
    }

    pub fn set_max(&self, input: &str) -> Result<()> {
        self.set_bound(input, false)
    }

    fn set_bound(&self, input: &str, lower: bool) -> Result<()> {
        let mut st = self.state();
        let Some(v) = st.dtype.parse(input) else {
            let which = if lower { "minimum" } else { "maximum" };
            log::error!("Bad {} value '{}' given for {}", which, input, self.key);
            return Err(FixNetError::Conversion {
                key: self.key.clone(),
                input: input.to_string(),
                dtype: st.dtype.to_string(),
            });
        };
        if lower {
            st.min = v;
        } else {
            st.max = v;
        }
        Ok(())
    }

    pub fn set_tolerance(&self, input: &str) -> Result<()> {
        match input.trim().parse::<u64>() {
            Ok(ms) => {
                self.state().tolerance_ms = ms;
                Ok(())
            }
            Err(_) => {
                log::error!("Bad tolerance value '{}' given for {}", input, self.key);
                Err(FixNetError::Conversion {
                    key: self.key.clone(),
                    input: input.to_string(),
                    dtype: "int".to_string(),
                })
            }
        }
    }

    /// Sends the current value and all flags in one unacknowledged write.
    pub async fn publish(&self) -> Result<()> {
        if self.is_write_suppressed() {
            return Ok(());
        }
        let (value, flags) = {
            let st = self.state();
            (st.value.to_string(), st.flags)
        };
        self.gateway.write(&self.key, &value, flags).await
    }

    // ---- server side paths, never written back ----

    /// Applies a value (and flags) received from the server.
    pub(crate) fn apply_update(&self, raw: &str, flags: Option<QualityFlags>) -> Result<()> {
        let mut events = Vec::new();
        {
            let mut st = self.state();
            let value = st.convert(&self.key, &Value::Str(raw.to_string()))?;
            if st.value != value {
                events.push(PointEvent::ValueChanged(value.clone()));
            }
            st.value = value.clone();
            st.timestamp = Utc::now();
            events.push(PointEvent::ValueWrite(value));
            if let Some(flags) = flags {
                st.diff_flags(flags, &mut events);
            }
        }
        self.emit(&events);
        Ok(())
    }

    /// Applies an aux value received from the server.
    pub(crate) fn apply_aux(&self, name: &str, raw: &str) -> Result<()> {
        let (value, changed) = self.assign_aux(name, Some(&Value::Str(raw.to_string())))?;
        if changed {
            self.emit(&[PointEvent::AuxChanged {
                name: name.to_string(),
                value,
            }]);
        }
        Ok(())
    }

    /// Replaces the descriptor fields from a report. Bad bounds keep their
    /// previous value.
    pub(crate) fn define(&self, report: &Report) {
        {
            let mut st = self.state();
            if st.dtype != report.dtype {
                st.dtype = report.dtype;
                st.value = report.dtype.default_value();
            }
            st.description = report.desc.clone();
            st.units = report.units.replace("deg", "\u{b0}");
            match report.dtype.parse(&report.min) {
                Some(v) => st.min = v,
                None => log::warn!("Bad minimum '{}' in report of {}", report.min, self.key),
            }
            match report.dtype.parse(&report.max) {
                Some(v) => st.max = v,
                None => log::warn!("Bad maximum '{}' in report of {}", report.max, self.key),
            }
            match report.tolerance.trim().parse::<u64>() {
                Ok(ms) => st.tolerance_ms = ms,
                Err(_) => log::warn!(
                    "Bad tolerance '{}' in report of {}",
                    report.tolerance,
                    self.key
                ),
            }
            let aux: BTreeMap<String, Option<Value>> = report
                .aux
                .iter()
                .map(|name| (name.clone(), st.aux.get(name).cloned().flatten()))
                .collect();
            st.aux = aux;
        }
        self.update_stats(&report.stats);
    }

    pub(crate) fn update_stats(&self, stats: &RateStats) {
        let changed = {
            let mut st = self.state();
            if st.stats == *stats {
                false
            } else {
                st.stats = stats.clone();
                true
            }
        };
        if changed {
            self.emit(&[PointEvent::StatsChanged(stats.clone())]);
        }
    }

    pub(crate) fn notify_report_received(&self) {
        self.emit(&[PointEvent::ReportReceived]);
    }

    pub(crate) fn notify_destroyed(&self) {
        self.emit(&[PointEvent::Destroyed]);
    }
}

impl std::fmt::Debug for DataPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let st = self.state();
        f.debug_struct("DataPoint")
            .field("key", &self.key)
            .field("dtype", &st.dtype)
            .field("value", &st.value)
            .field("flags", &st.flags.letters())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingGateway;

    fn point(gw: &Arc<RecordingGateway>) -> DataPoint {
        let p = DataPoint::new(
            "AOA",
            DataType::Float,
            Arc::clone(gw) as Arc<dyn Gateway>,
            Arc::new(StatsTracker::new()),
        );
        let report = Report::parse("AOA;Angle of Attack;float;-20;40;deg;200;Warn,Stall").unwrap();
        p.define(&report);
        p
    }

    fn record(p: &DataPoint) -> Arc<Mutex<Vec<PointEvent>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        p.subscribe(Arc::new(move |_key: &str, e: &PointEvent| {
            sink.lock().unwrap().push(e.clone());
        }));
        events
    }

    #[test]
    fn fresh_point_defaults() {
        let gw = RecordingGateway::connected();
        let p = DataPoint::new("X", DataType::Int, gw, Arc::new(StatsTracker::new()));
        assert_eq!(p.value(), Value::Int(0));
        assert_eq!(p.flags().letters(), "bf");
        assert_eq!(p.tolerance_ms(), 100);
    }

    #[test]
    fn define_converts_descriptor() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        assert_eq!(p.min(), Value::Float(-20.0));
        assert_eq!(p.max(), Value::Float(40.0));
        assert_eq!(p.units(), "\u{b0}");
        assert_eq!(p.aux_names(), vec!["Stall", "Warn"]);
        assert_eq!(p.aux("Warn"), None);
    }

    #[tokio::test]
    async fn value_write_is_clamped_and_reconciled_with_echo() {
        let gw = RecordingGateway::connected();
        gw.set_echo("38.5;00000");
        let p = point(&gw);
        let events = record(&p);

        p.set_value(150.0).await.unwrap();
        assert_eq!(gw.calls(), vec!["write_value AOA 40"]);
        assert_eq!(p.value(), Value::Float(38.5));
        assert!(!p.flag(QualityFlag::Bad));

        let events = events.lock().unwrap().clone();
        assert_eq!(events[0], PointEvent::ValueChanged(Value::Float(40.0)));
        assert_eq!(events[1], PointEvent::ValueWrite(Value::Float(40.0)));
        assert_eq!(events[2], PointEvent::ValueChanged(Value::Float(38.5)));
        assert!(events.contains(&PointEvent::FlagChanged(QualityFlag::Fail, false)));
    }

    #[tokio::test]
    async fn bad_value_leaves_state_untouched() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        p.set_value(10.0).await.unwrap();
        let before = p.snapshot();

        let err = p.set_value("ten").await.unwrap_err();
        assert!(matches!(err, FixNetError::Conversion { .. }));
        assert_eq!(p.snapshot(), before);
        assert_eq!(gw.calls().len(), 1);
    }

    #[tokio::test]
    async fn suppressed_setters_send_nothing() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        {
            let _quiet = p.suppress_writes();
            p.set_value(12.0).await.unwrap();
            p.set_flag(QualityFlag::Old, true).await;
            p.set_aux("Warn", Some(Value::Float(30.0))).await.unwrap();
            p.publish().await.unwrap();
        }
        assert!(!p.is_write_suppressed());
        assert!(gw.calls().is_empty());
        assert_eq!(p.value(), Value::Float(12.0));
        assert_eq!(p.aux("Warn"), Some(Value::Float(30.0)));
    }

    #[tokio::test]
    async fn flags_are_sent_only_on_change() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        p.set_flag(QualityFlag::Bad, true).await;
        assert!(gw.calls().is_empty());
        p.set_flag_text(QualityFlag::Bad, "no").await;
        assert_eq!(gw.calls(), vec!["flag AOA b 0"]);
    }

    #[tokio::test]
    async fn aux_rules() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        assert!(matches!(
            p.set_aux("Missing", Some(Value::Float(1.0))).await,
            Err(FixNetError::UnknownAux { .. })
        ));
        p.set_aux("Stall", Some("35".into())).await.unwrap();
        p.set_aux("Stall", Some("None".into())).await.unwrap();
        assert_eq!(p.aux("Stall"), None);
        assert_eq!(gw.calls(), vec!["write_value AOA.Stall 35"]);
    }

    #[test]
    fn bounds_reject_bad_input() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        assert!(p.set_min("low").is_err());
        assert_eq!(p.min(), Value::Float(-20.0));
        assert!(p.set_tolerance("fast").is_err());
        p.set_tolerance("500").unwrap();
        assert_eq!(p.tolerance_ms(), 500);
    }

    #[test]
    fn server_update_decodes_flags_without_writing() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        let flags = QualityFlags::from_bits("10100").unwrap();
        p.apply_update("12.3", Some(flags)).unwrap();
        assert_eq!(p.value(), Value::Float(12.3));
        assert!(p.flag(QualityFlag::Annunciate));
        assert!(p.flag(QualityFlag::Bad));
        assert!(!p.flag(QualityFlag::Old));
        assert!(!p.flag(QualityFlag::Fail));
        assert!(!p.flag(QualityFlag::SecFail));
        assert!(gw.calls().is_empty());
    }

    #[test]
    fn listeners_run_in_order_and_can_leave() {
        let gw = RecordingGateway::connected();
        let p = point(&gw);
        let order = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&order);
        let b = Arc::clone(&order);
        let first = p.subscribe(Arc::new(move |_: &str, _: &PointEvent| a.lock().unwrap().push(1)));
        p.subscribe(Arc::new(move |_: &str, _: &PointEvent| b.lock().unwrap().push(2)));

        p.notify_report_received();
        assert!(p.unsubscribe(first));
        p.notify_destroyed();
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 2]);
    }
}
