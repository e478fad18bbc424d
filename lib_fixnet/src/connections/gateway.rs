//! # Gateway Interface
//!
//! Every server operation the replica store and the data points need, as one
//! trait. [`RequestChannel`](super::request_channel::RequestChannel) is the
//! plain implementation; [`RoutedGateway`] splits report/status traffic onto a
//! second connection so that slow report polling never delays value requests.

use std::sync::Arc;

use async_trait::async_trait;

use crate::connections::request_channel::RequestChannel;
use crate::error::Result;
use crate::protocol::flags::{QualityFlag, QualityFlags};
use crate::protocol::frame::{ReadResult, WriteEcho};
use crate::protocol::report::Report;

#[async_trait]
pub trait Gateway: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Identifies the current connection. Subscriptions made under one epoch
    /// are gone once it changes.
    fn connection_epoch(&self) -> u64;

    /// All keys known to the server, in server order.
    async fn list(&self) -> Result<Vec<String>>;

    async fn read(&self, id: &str) -> Result<ReadResult>;

    /// Fire-and-forget value + flags write.
    async fn write(&self, id: &str, value: &str, flags: QualityFlags) -> Result<()>;

    /// Value write answered with the value and flags the server ended up with.
    async fn write_value(&self, id: &str, value: &str) -> Result<WriteEcho>;

    async fn flag(&self, id: &str, flag: QualityFlag, setting: bool) -> Result<()>;

    async fn subscribe(&self, id: &str) -> Result<()>;

    async fn unsubscribe(&self, id: &str) -> Result<()>;

    /// Best effort: a missing ack is not an error.
    async fn subscribe_report(&self, id: &str, interval_ms: u64) -> Result<()>;

    /// Best effort: a missing ack is not an error.
    async fn unsubscribe_report(&self, id: &str) -> Result<()>;

    async fn get_report(&self, id: &str) -> Result<Report>;

    async fn get_status(&self) -> Result<String>;
}

/// Sends `get_report` and `get_status` over a dedicated status connection.
pub struct RoutedGateway {
    main: Arc<RequestChannel>,
    status: Arc<RequestChannel>,
}

impl RoutedGateway {
    pub fn new(main: Arc<RequestChannel>, status: Arc<RequestChannel>) -> Self {
        Self { main, status }
    }

    pub fn main(&self) -> &Arc<RequestChannel> {
        &self.main
    }

    pub fn status(&self) -> &Arc<RequestChannel> {
        &self.status
    }
}

#[async_trait]
impl Gateway for RoutedGateway {
    fn is_connected(&self) -> bool {
        self.main.is_connected()
    }

    // Subscriptions live on the main link only.
    fn connection_epoch(&self) -> u64 {
        self.main.connection_epoch()
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.main.list().await
    }

    async fn read(&self, id: &str) -> Result<ReadResult> {
        self.main.read(id).await
    }

    async fn write(&self, id: &str, value: &str, flags: QualityFlags) -> Result<()> {
        self.main.write(id, value, flags).await
    }

    async fn write_value(&self, id: &str, value: &str) -> Result<WriteEcho> {
        self.main.write_value(id, value).await
    }

    async fn flag(&self, id: &str, flag: QualityFlag, setting: bool) -> Result<()> {
        self.main.flag(id, flag, setting).await
    }

    async fn subscribe(&self, id: &str) -> Result<()> {
        self.main.subscribe(id).await
    }

    async fn unsubscribe(&self, id: &str) -> Result<()> {
        self.main.unsubscribe(id).await
    }

    async fn subscribe_report(&self, id: &str, interval_ms: u64) -> Result<()> {
        self.main.subscribe_report(id, interval_ms).await
    }

    async fn unsubscribe_report(&self, id: &str) -> Result<()> {
        self.main.unsubscribe_report(id).await
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        self.status.get_report(id).await
    }

    async fn get_status(&self) -> Result<String> {
        self.status.get_status().await
    }
}
