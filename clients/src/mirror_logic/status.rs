//! Periodic server status logging.

use std::sync::Arc;
use std::time::Duration;

use lib_fixnet::RequestChannel;
use tokio_util::sync::CancellationToken;

pub async fn run(channel: Arc<RequestChannel>, interval_seconds: u64, cancel: CancellationToken) {
    if interval_seconds == 0 {
        return;
    }
    let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }
        if !channel.link().is_connected() {
            continue;
        }
        match channel.get_status_json().await {
            Ok(status) => log::info!("Server status: {}", status),
            Err(e) => log::debug!("Status request failed: {}", e),
        }
    }
}
