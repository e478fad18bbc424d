//! In-memory `Gateway` for unit tests. Records every call as a short text line.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::connections::gateway::Gateway;
use crate::error::{FixNetError, Result};
use crate::protocol::flags::{QualityFlag, QualityFlags};
use crate::protocol::frame::{parse_sentence, ReadResult, WriteEcho};
use crate::protocol::report::Report;

#[derive(Default)]
pub(crate) struct RecordingGateway {
    connected: AtomicBool,
    epoch: AtomicU64,
    calls: Mutex<Vec<String>>,
    keys: Mutex<Vec<String>>,
    reports: Mutex<HashMap<String, String>>,
    values: Mutex<HashMap<String, String>>,
    echo: Mutex<Option<String>>,
}

impl RecordingGateway {
    pub(crate) fn connected() -> Arc<Self> {
        let gw = Self::default();
        gw.connected.store(true, Ordering::SeqCst);
        Arc::new(gw)
    }

    pub(crate) fn set_connected(&self, on: bool) {
        self.connected.store(on, Ordering::SeqCst);
    }

    /// Simulates a drop and reconnect that happened between two ticks.
    pub(crate) fn reconnect(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Serves `key` with `report` and the read answer `value` (`value[;bits]`).
    pub(crate) fn add_point(&self, key: &str, report: &str, value: &str) {
        self.keys.lock().unwrap().push(key.to_string());
        self.reports
            .lock()
            .unwrap()
            .insert(key.to_string(), report.to_string());
        self.values
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    pub(crate) fn set_value(&self, id: &str, value: &str) {
        self.values
            .lock()
            .unwrap()
            .insert(id.to_string(), value.to_string());
    }

    /// Answer every following `write_value` with `value[;bits]`.
    pub(crate) fn set_echo(&self, echo: &str) {
        *self.echo.lock().unwrap() = Some(echo.to_string());
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, op: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    pub(crate) fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: String) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FixNetError::NotConnected)
        }
    }
}

#[async_trait]
impl Gateway for RecordingGateway {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn connection_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.record("list".to_string())?;
        Ok(self.keys.lock().unwrap().clone())
    }

    async fn read(&self, id: &str) -> Result<ReadResult> {
        self.record(format!("read {}", id))?;
        let value = self.values.lock().unwrap().get(id).cloned();
        match value {
            Some(v) => Ok(parse_sentence(&format!("{};{}", id, v))?),
            None => Err(FixNetError::KeyNotFound(id.to_string())),
        }
    }

    async fn write(&self, id: &str, value: &str, flags: QualityFlags) -> Result<()> {
        self.record(format!("write {} {} {}", id, value, flags.to_bits()))
    }

    async fn write_value(&self, id: &str, value: &str) -> Result<WriteEcho> {
        self.record(format!("write_value {} {}", id, value))?;
        let echo = self.echo.lock().unwrap().clone();
        let sentence = format!("{};{}", id, echo.as_deref().unwrap_or(value));
        Ok(parse_sentence(&sentence)?)
    }

    async fn flag(&self, id: &str, flag: QualityFlag, setting: bool) -> Result<()> {
        self.record(format!("flag {} {} {}", id, flag.letter(), u8::from(setting)))
    }

    async fn subscribe(&self, id: &str) -> Result<()> {
        self.record(format!("subscribe {}", id))
    }

    async fn unsubscribe(&self, id: &str) -> Result<()> {
        self.record(format!("unsubscribe {}", id))
    }

    async fn subscribe_report(&self, id: &str, interval_ms: u64) -> Result<()> {
        self.record(format!("subscribe_report {} {}", id, interval_ms))
    }

    async fn unsubscribe_report(&self, id: &str) -> Result<()> {
        self.record(format!("unsubscribe_report {}", id))
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        self.record(format!("get_report {}", id))?;
        let report = self.reports.lock().unwrap().get(id).cloned();
        match report {
            Some(r) => Ok(Report::parse(&r)?),
            None => Err(FixNetError::KeyNotFound(id.to_string())),
        }
    }

    async fn get_status(&self) -> Result<String> {
        self.record("get_status".to_string())?;
        Ok("{}".to_string())
    }
}
