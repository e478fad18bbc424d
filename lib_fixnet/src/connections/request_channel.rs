//! # Request Channel
//!
//! Typed request/response operations over a [`TransportLink`].
//!
//! Responses carry no request id, only the tag letter of the command, so at
//! most one request may be in flight per link. The channel enforces this with a
//! single async gate held from registration of the tag until the response (or
//! timeout). A response that arrives after its waiter gave up is dropped by the
//! link. If it arrives while a later request with the same tag waits, it is
//! taken for that answer; data responses name their key, so `read` and
//! `write_value` skip answers about another key. Acks of other commands give
//! no way to detect this.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::configs::settings::ChannelConfig;
use crate::connections::gateway::Gateway;
use crate::connections::link::TransportLink;
use crate::error::{FixNetError, ProtocolError, Result};
use crate::protocol::flags::{QualityFlag, QualityFlags};
use crate::protocol::frame::{
    decode_data_response, server_error, DataUpdate, ReadResult, Request, WriteEcho,
};
use crate::protocol::report::Report;

pub struct RequestChannel {
    link: Arc<TransportLink>,
    gate: tokio::sync::Mutex<()>,
    config: ChannelConfig,
}

impl RequestChannel {
    pub fn new(link: Arc<TransportLink>, config: ChannelConfig) -> Self {
        Self {
            link,
            gate: tokio::sync::Mutex::new(()),
            config,
        }
    }

    pub fn link(&self) -> &Arc<TransportLink> {
        &self.link
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.link.is_connected() {
            Ok(())
        } else {
            Err(FixNetError::NotConnected)
        }
    }

    /// Sends `request` and returns the payload of its tagged response.
    ///
    /// Fire-and-forget requests return an empty payload once written.
    pub async fn request(&self, request: Request<'_>, timeout: Duration) -> Result<String> {
        self.ensure_connected()?;
        let _gate = self.gate.lock().await;

        let Some(tag) = request.tag() else {
            self.link.send(&request.encode()).await?;
            return Ok(String::new());
        };
        let mut waiter = self.link.begin_request(tag);
        self.link.send(&request.encode()).await?;
        waiter.next(timeout).await
    }

    /// Sends a `read`/`write_value` request and returns the answer about `id`.
    ///
    /// An answer about another key is a leftover of an earlier request with
    /// the same tag that timed out; it is skipped and the wait goes on.
    async fn request_data(
        &self,
        request: Request<'_>,
        id: &str,
        timeout: Duration,
    ) -> Result<DataUpdate> {
        self.ensure_connected()?;
        let tag = request.tag().ok_or(ProtocolError::MissingTag)?;
        let _gate = self.gate.lock().await;

        let mut waiter = self.link.begin_request(tag);
        self.link.send(&request.encode()).await?;
        let deadline = Instant::now() + timeout;
        loop {
            let payload = waiter
                .next(deadline.saturating_duration_since(Instant::now()))
                .await?;
            let about = match server_error(&payload) {
                Some((subject, _)) => subject,
                None => payload.split(';').next().unwrap_or_default(),
            };
            if about == id {
                return decode_data_response(&payload);
            }
            log::debug!(
                "Skipping stale '{}' response about {} while waiting for {}",
                tag,
                about,
                id
            );
        }
    }

    /// `request` whose response timeout is ignored.
    async fn best_effort(&self, request: Request<'_>) -> Result<()> {
        match self.request(request, self.config.best_effort_timeout).await {
            Ok(_) | Err(FixNetError::ResponseTimeout { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reads `id` with a caller supplied timeout.
    pub async fn read_within(&self, id: &str, timeout: Duration) -> Result<ReadResult> {
        self.request_data(Request::Read(id), id, timeout).await
    }

    /// The server status, parsed as JSON.
    pub async fn get_status_json(&self) -> Result<serde_json::Value> {
        let status = Gateway::get_status(self).await?;
        serde_json::from_str(&status).map_err(|e| {
            log::debug!("Status payload is not JSON: {}", e);
            ProtocolError::UnexpectedPayload(status).into()
        })
    }

    /// Asks the server process to exit.
    pub async fn stop_server(&self) -> Result<()> {
        self.request(Request::Kill, self.config.request_timeout)
            .await
            .map(|_| ())
    }
}

/// Ids of one list fragment; they are always in the last `;` field.
fn fragment_ids(payload: &str) -> Vec<String> {
    if !payload.contains(';') {
        return Vec::new();
    }
    payload
        .rsplit(';')
        .next()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

/// Checks a `subject` or `subject!code` acknowledgement.
fn check_ack(payload: &str) -> Result<()> {
    match server_error(payload) {
        Some((subject, code)) => Err(FixNetError::from_server_code(subject, code)),
        None => Ok(()),
    }
}

#[async_trait]
impl Gateway for RequestChannel {
    fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    fn connection_epoch(&self) -> u64 {
        self.link.epoch()
    }

    async fn list(&self) -> Result<Vec<String>> {
        self.ensure_connected()?;
        let _gate = self.gate.lock().await;

        let mut waiter = self.link.begin_request('l');
        self.link.send(&Request::List.encode()).await?;

        let mut keys = Vec::new();
        loop {
            let payload = match waiter.next(self.config.list_fragment_timeout).await {
                Ok(payload) => payload,
                Err(FixNetError::ResponseTimeout { .. }) => {
                    log::debug!("List ended without terminator after {} keys", keys.len());
                    break;
                }
                Err(e) => return Err(e),
            };
            let ids = fragment_ids(&payload);
            if ids.is_empty() {
                break;
            }
            keys.extend(ids);
        }
        Ok(keys)
    }

    async fn read(&self, id: &str) -> Result<ReadResult> {
        self.read_within(id, self.config.request_timeout).await
    }

    async fn write(&self, id: &str, value: &str, flags: QualityFlags) -> Result<()> {
        self.request(Request::Write { id, value, flags }, self.config.request_timeout)
            .await
            .map(|_| ())
    }

    async fn write_value(&self, id: &str, value: &str) -> Result<WriteEcho> {
        self.request_data(Request::WriteValue { id, value }, id, self.config.request_timeout)
            .await
    }

    async fn flag(&self, id: &str, flag: QualityFlag, setting: bool) -> Result<()> {
        let payload = self
            .request(Request::Flag { id, flag, setting }, self.config.request_timeout)
            .await?;
        match server_error(&payload) {
            Some((_, "001")) => Err(FixNetError::KeyNotFound(id.to_string())),
            Some((_, "002")) => Err(FixNetError::UnknownFlag(flag.letter().to_string())),
            Some((_, code)) => Err(FixNetError::Server {
                key: id.to_string(),
                code: code.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn subscribe(&self, id: &str) -> Result<()> {
        let payload = self
            .request(Request::Subscribe(id), self.config.request_timeout)
            .await?;
        check_ack(&payload)
    }

    async fn unsubscribe(&self, id: &str) -> Result<()> {
        let payload = self
            .request(Request::Unsubscribe(id), self.config.request_timeout)
            .await?;
        check_ack(&payload)
    }

    async fn subscribe_report(&self, id: &str, interval_ms: u64) -> Result<()> {
        self.best_effort(Request::SubscribeReport { id, interval_ms })
            .await
    }

    async fn unsubscribe_report(&self, id: &str) -> Result<()> {
        self.best_effort(Request::UnsubscribeReport(id)).await
    }

    async fn get_report(&self, id: &str) -> Result<Report> {
        let payload = self
            .request(Request::Report(id), self.config.request_timeout)
            .await?;
        match server_error(&payload) {
            Some((_, "001")) => Err(FixNetError::KeyNotFound(id.to_string())),
            Some((_, code)) => Err(FixNetError::Server {
                key: id.to_string(),
                code: code.to_string(),
            }),
            None => Ok(Report::parse(&payload)?),
        }
    }

    async fn get_status(&self) -> Result<String> {
        let payload = self
            .request(Request::Status, self.config.request_timeout)
            .await?;
        let body = payload
            .strip_prefix("status;")
            .or_else(|| payload.strip_prefix("status"))
            .unwrap_or(&payload);
        Ok(body.to_string())
    }
}
