//! # FixNet Client
//!
//! The context object tying a link, its request channel, the gateway and the
//! replica store together. It owns the background tasks:
//!
//! - the receive loop of each link
//! - the update dispatcher of the main link
//! - the store maintenance tick
//!
//! All of them share one cancellation token, so [`FixNetClient::shutdown`]
//! stops everything and waits for the tasks to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::configs::settings::FixNetSettings;
use crate::connections::gateway::{Gateway, RoutedGateway};
use crate::connections::link::TransportLink;
use crate::connections::request_channel::RequestChannel;
use crate::core::store::ReplicaStore;
use crate::protocol::frame::DataUpdate;

pub struct FixNetClient {
    settings: FixNetSettings,
    cancel: CancellationToken,
    channel: Arc<RequestChannel>,
    status_channel: Option<Arc<RequestChannel>>,
    gateway: Arc<dyn Gateway>,
    store: Arc<ReplicaStore>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FixNetClient {
    /// Wires all components. No task runs until [`FixNetClient::start`].
    pub fn new(settings: FixNetSettings) -> Self {
        let cancel = CancellationToken::new();

        let link = Arc::new(TransportLink::new(
            "main",
            settings.link.clone(),
            cancel.child_token(),
        ));
        let channel = Arc::new(RequestChannel::new(link, settings.channel.clone()));

        let (status_channel, gateway): (Option<Arc<RequestChannel>>, Arc<dyn Gateway>) =
            if settings.dedicated_status_link {
                let status_link = Arc::new(TransportLink::new(
                    "status",
                    settings.link.clone(),
                    cancel.child_token(),
                ));
                let status = Arc::new(RequestChannel::new(status_link, settings.channel.clone()));
                let routed = RoutedGateway::new(Arc::clone(&channel), Arc::clone(&status));
                (Some(status), Arc::new(routed))
            } else {
                (None, Arc::clone(&channel) as Arc<dyn Gateway>)
            };

        let store = Arc::new(ReplicaStore::new(Arc::clone(&gateway), settings.store.clone()));

        let weak: Weak<ReplicaStore> = Arc::downgrade(&store);
        channel.link().set_update_handler(Arc::new(move |update: DataUpdate| {
            if let Some(store) = weak.upgrade() {
                store.handle_update(update);
            }
        }));
        let weak: Weak<ReplicaStore> = Arc::downgrade(&store);
        channel.link().set_report_handler(Arc::new(move |payload: &str| {
            if let Some(store) = weak.upgrade() {
                store.handle_report(payload);
            }
        }));

        Self {
            settings,
            cancel,
            channel,
            status_channel,
            gateway,
            store,
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawns the background tasks. Calling it again does nothing.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("FixNet client already started");
            return;
        }
        log::info!(
            "Starting FixNet client for {}:{}",
            self.settings.link.host,
            self.settings.link.port
        );

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.push(tokio::spawn(Arc::clone(self.channel.link()).run()));
        if let Some(dispatcher) = self.channel.link().spawn_dispatcher() {
            tasks.push(dispatcher);
        }
        if let Some(status) = &self.status_channel {
            tasks.push(tokio::spawn(Arc::clone(status.link()).run()));
        }

        let store = Arc::clone(&self.store);
        let cancel = self.cancel.clone();
        let tick = self.settings.store.tick_interval;
        tasks.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => store.maintain().await,
                }
            }
            log::debug!("Maintenance task stopped");
        }));
    }

    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        self.channel.link().wait_connected(timeout).await
    }

    pub fn is_connected(&self) -> bool {
        self.gateway.is_connected()
    }

    pub fn store(&self) -> &Arc<ReplicaStore> {
        &self.store
    }

    pub fn gateway(&self) -> &Arc<dyn Gateway> {
        &self.gateway
    }

    /// The main request channel.
    pub fn channel(&self) -> &Arc<RequestChannel> {
        &self.channel
    }

    /// The request channel used for reports and status; the main one unless a
    /// dedicated status link is configured.
    pub fn status_channel(&self) -> &Arc<RequestChannel> {
        self.status_channel.as_ref().unwrap_or(&self.channel)
    }

    pub fn settings(&self) -> &FixNetSettings {
        &self.settings
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops every task and waits for it.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                log::error!("FixNet task ended abnormally: {}", e);
            }
        }
        log::info!("FixNet client stopped");
    }
}

impl Drop for FixNetClient {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
