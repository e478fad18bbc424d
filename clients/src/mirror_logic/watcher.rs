//! Logs every change of the replica.

use std::sync::Arc;

use lib_fixnet::{PointEvent, ReplicaStore, StoreEvent};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

fn log_point_event(key: &str, event: &PointEvent) {
    match event {
        PointEvent::ValueChanged(value) => log::debug!("{} = {}", key, value),
        PointEvent::FlagChanged(flag, on) => log::info!("{} {} -> {}", key, flag, on),
        PointEvent::AuxChanged { name, value } => match value {
            Some(v) => log::debug!("{}.{} = {}", key, name, v),
            None => log::debug!("{}.{} cleared", key, name),
        },
        PointEvent::StatsChanged(stats) => log::trace!(
            "{} rate avg {:?} over {} samples",
            key,
            stats.rate_avg,
            stats.sample_count
        ),
        PointEvent::Destroyed => log::debug!("{} removed from replica", key),
        PointEvent::ValueWrite(_) | PointEvent::ReportReceived => {}
    }
}

fn attach(store: &ReplicaStore) {
    let listener: lib_fixnet::Listener = Arc::new(log_point_event);
    for key in store.keys() {
        if let Some(point) = store.get(&key) {
            log::info!(
                "{} [{}] {} {} ({})",
                key,
                point.dtype(),
                point.value(),
                point.units(),
                point.description()
            );
            point.subscribe(Arc::clone(&listener));
        }
    }
}

pub async fn run(store: Arc<ReplicaStore>, cancel: CancellationToken) {
    let mut events = store.subscribe_events();
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(StoreEvent::ConnectionChanged(true)) => log::info!("Gateway connected"),
            Ok(StoreEvent::ConnectionChanged(false)) => log::warn!("Gateway disconnected"),
            Ok(StoreEvent::Initialized { points }) => {
                log::info!("Replica ready with {} points", points);
                attach(&store);
            }
            Ok(StoreEvent::TornDown { points }) => {
                log::warn!("Replica torn down, {} points dropped", points)
            }
            Err(RecvError::Lagged(n)) => log::warn!("Missed {} replica events", n),
            Err(RecvError::Closed) => break,
        }
    }
}
