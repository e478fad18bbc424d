//! # Transport Link
//!
//! Owns one TCP connection to the gateway and keeps it alive.
//!
//! The receive task reads bytes, splits them into lines and routes every frame:
//! responses go to the single outstanding request, data sentences go to a
//! bounded update queue and report pushes go straight to the report handler.
//! A second task drains the update queue into the update handler, so a slow
//! consumer can never stall the socket reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::configs::settings::LinkConfig;
use crate::error::{FixNetError, Result};
use crate::protocol::frame::{decode_frame, DataUpdate, Frame};
use crate::protocol::line_buffer::LineBuffer;

const READ_CHUNK: usize = 4096;

/// Receives every queued data update, in wire order.
pub type UpdateHandler = Arc<dyn Fn(DataUpdate) + Send + Sync>;
/// Receives the payload of every `#q` frame, on the receive task.
pub type ReportHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Connection state published by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Stopping,
}

struct PendingRequest {
    seq: u64,
    tag: char,
    tx: mpsc::UnboundedSender<String>,
}

pub struct TransportLink {
    name: String,
    config: LinkConfig,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    state: watch::Sender<LinkState>,
    pending: Mutex<Option<PendingRequest>>,
    next_seq: AtomicU64,
    update_tx: mpsc::Sender<DataUpdate>,
    update_rx: Mutex<Option<mpsc::Receiver<DataUpdate>>>,
    update_handler: RwLock<Option<UpdateHandler>>,
    report_handler: RwLock<Option<ReportHandler>>,
    dropped: AtomicU64,
    epoch: AtomicU64,
    /// Child of `cancel` for the current connection; cancelled to force a reconnect.
    session: Mutex<Option<CancellationToken>>,
    cancel: CancellationToken,
}

impl TransportLink {
    /// Creates an idle link. Nothing happens until [`TransportLink::run`] is spawned.
    ///
    /// `name` only prefixes log lines, so several links can be told apart.
    pub fn new(name: impl Into<String>, config: LinkConfig, cancel: CancellationToken) -> Self {
        let (update_tx, update_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            name: name.into(),
            config,
            writer: tokio::sync::Mutex::new(None),
            state,
            pending: Mutex::new(None),
            next_seq: AtomicU64::new(1),
            update_tx,
            update_rx: Mutex::new(Some(update_rx)),
            update_handler: RwLock::new(None),
            report_handler: RwLock::new(None),
            dropped: AtomicU64::new(0),
            epoch: AtomicU64::new(0),
            session: Mutex::new(None),
            cancel,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    pub fn set_update_handler(&self, handler: UpdateHandler) {
        *self
            .update_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn set_report_handler(&self, handler: ReportHandler) {
        *self
            .report_handler
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Waits until the link is connected. Returns `false` on timeout.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.state.subscribe();
        let connected = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|s| *s == LinkState::Connected)).await,
            Ok(Ok(_))
        );
        connected
    }

    /// Updates dropped because the queue was full.
    pub fn dropped_updates(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Number of connections established so far. Changes on every reconnect,
    /// so state kept on the server side (subscriptions) belongs to one epoch.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Updates waiting for the dispatch task.
    pub fn queued_updates(&self) -> usize {
        self.update_tx.max_capacity() - self.update_tx.capacity()
    }

    fn set_state(&self, next: LinkState) {
        let prev = self.state.send_replace(next);
        if prev == LinkState::Connected && next != LinkState::Connected {
            log::warn!("[{}] Connection lost", self.name);
        }
    }

    /// Connect / read / reconnect until the cancellation token fires.
    pub async fn run(self: Arc<Self>) {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        log::debug!("[{}] Link task started for {}", self.name, addr);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.set_state(LinkState::Connecting);

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                res = tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(&addr)) => res,
            };

            match attempt {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::debug!("[{}] Unable to set TCP_NODELAY: {}", self.name, e);
                    }
                    let (reader, writer) = stream.into_split();
                    let session = self.cancel.child_token();
                    *self.writer.lock().await = Some(writer);
                    *self.session.lock().unwrap_or_else(PoisonError::into_inner) =
                        Some(session.clone());
                    let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                    log::info!("[{}] Connected to {} (epoch {})", self.name, addr, epoch);
                    self.set_state(LinkState::Connected);

                    self.read_loop(reader, &session).await;

                    self.session
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    self.writer.lock().await.take();
                    self.abandon_pending();
                    self.set_state(LinkState::Disconnected);
                }
                Ok(Err(e)) => {
                    log::debug!("[{}] Failed to connect to {}: {}", self.name, addr, e);
                    self.set_state(LinkState::Disconnected);
                }
                Err(_) => {
                    log::debug!("[{}] Connect to {} timed out", self.name, addr);
                    self.set_state(LinkState::Disconnected);
                }
            }

            if self.cancel.is_cancelled() {
                break;
            }
            log::debug!(
                "[{}] Reconnecting in {}ms",
                self.name,
                self.config.reconnect_delay.as_millis()
            );
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.reconnect_delay) => {}
            }
        }

        self.writer.lock().await.take();
        self.abandon_pending();
        self.set_state(LinkState::Stopping);
        log::debug!("[{}] Link task stopped", self.name);
    }

    async fn read_loop(&self, mut reader: OwnedReadHalf, session: &CancellationToken) {
        let mut lines = LineBuffer::new();
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            let read = tokio::select! {
                _ = session.cancelled() => {
                    if !self.cancel.is_cancelled() {
                        log::warn!("[{}] Dropping connection after a failed send", self.name);
                    }
                    return;
                }
                res = tokio::time::timeout(self.config.read_timeout, reader.read(&mut chunk)) => res,
            };

            match read {
                // Read timeout only bounds the wait; the connection is still fine.
                Err(_) => continue,
                Ok(Ok(0)) => {
                    log::info!("[{}] Connection closed by server", self.name);
                    return;
                }
                Ok(Ok(n)) => {
                    for line in lines.extend(&chunk[..n]) {
                        match line {
                            Ok(line) => self.route_line(&line),
                            Err(e) => log::warn!("[{}] Discarding input: {}", self.name, e),
                        }
                    }
                }
                Ok(Err(e)) => {
                    log::error!("[{}] Receive failure: {}", self.name, e);
                    return;
                }
            }
        }
    }

    /// Routes one received line. Never blocks.
    pub fn route_line(&self, line: &str) {
        match decode_frame(line) {
            Ok(Frame::PushReport(payload)) => {
                let handler = self
                    .report_handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(&payload),
                    None => log::debug!("[{}] No report handler for pushed report", self.name),
                }
            }
            Ok(Frame::Response { tag, payload }) => self.deliver_response(tag, payload),
            Ok(Frame::Data(update)) => self.enqueue(update),
            Err(e) => log::warn!("[{}] Discarding frame '{}': {}", self.name, line, e),
        }
    }

    fn deliver_response(&self, tag: char, payload: String) {
        let pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match pending.as_ref() {
            Some(req) if req.tag == tag => {
                if req.tx.send(payload).is_err() {
                    log::debug!("[{}] Waiter for '{}' already gone", self.name, tag);
                }
            }
            _ => log::debug!("[{}] Unmatched response '{}{}' dropped", self.name, tag, payload),
        }
    }

    fn enqueue(&self, update: DataUpdate) {
        match self.update_tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("[{}] Update queue full, dropping {}", self.name, update.id);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("[{}] Update queue closed", self.name);
            }
        }
    }

    fn abandon_pending(&self) {
        // Dropping the sender wakes the waiter with NotConnected.
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Registers the one outstanding request. The caller must hold the request gate.
    pub(crate) fn begin_request(&self, tag: char) -> ResponseWaiter<'_> {
        let (tx, rx) = mpsc::unbounded_channel();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(PendingRequest { seq, tag, tx });
        ResponseWaiter {
            link: self,
            seq,
            tag,
            rx,
        }
    }

    /// Writes one encoded command. Fails at once when there is no connection.
    ///
    /// A write that fails or does not finish within `write_timeout` gives up the
    /// connection; the run loop then reconnects.
    pub async fn send(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(FixNetError::NotConnected)?;
        let write = writer.write_all(line.as_bytes());
        let error = match tokio::time::timeout(self.config.write_timeout, write).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e,
            Err(_) => std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("write stalled for {}ms", self.config.write_timeout.as_millis()),
            ),
        };
        log::error!("[{}] Send failure: {}", self.name, error);
        guard.take();
        if let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            session.cancel();
        }
        Err(FixNetError::Io(error))
    }

    /// Spawns the task feeding queued updates to the update handler.
    ///
    /// Returns `None` if the dispatcher was already started.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let mut rx = self
            .update_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        let link = Arc::clone(self);

        Some(tokio::spawn(async move {
            loop {
                let next = tokio::select! {
                    _ = link.cancel.cancelled() => break,
                    res = tokio::time::timeout(link.config.dispatch_wait, rx.recv()) => res,
                };
                let update = match next {
                    Ok(Some(update)) => update,
                    Ok(None) => break,
                    Err(_) => continue,
                };
                let handler = link
                    .update_handler
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match handler {
                    Some(handler) => handler(update),
                    None => log::debug!("[{}] No update handler for {}", link.name, update.id),
                }
            }
            log::debug!("[{}] Dispatcher stopped", link.name);
        }))
    }

    /// Cancels the token shared with the run loop.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

/// Receives the response(s) of one registered request.
pub(crate) struct ResponseWaiter<'a> {
    link: &'a TransportLink,
    seq: u64,
    tag: char,
    rx: mpsc::UnboundedReceiver<String>,
}

impl ResponseWaiter<'_> {
    pub(crate) async fn next(&mut self, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(payload)) => Ok(payload),
            Ok(None) => Err(FixNetError::NotConnected),
            Err(_) => Err(FixNetError::ResponseTimeout { tag: self.tag }),
        }
    }
}

impl Drop for ResponseWaiter<'_> {
    fn drop(&mut self) {
        let mut pending = self
            .link
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if pending.as_ref().is_some_and(|p| p.seq == self.seq) {
            pending.take();
        }
    }
}
