use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;

use lib_fixnet::FixNetClient;
use lib_fixnet::configs::client_config;
use lib_fixnet::loggers::logfile;

mod mirror_logic;
use mirror_logic::{status, watcher};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();

    let config = client_config::load_config()?;
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    logfile::setup_logging(&log_dir, &log_level, "fixnet_mirror")?;

    let status_interval = config.status_interval_seconds.unwrap_or(0);
    let client = FixNetClient::new(config.into_settings());
    client.start();

    let watcher_handle = tokio::spawn(watcher::run(
        Arc::clone(client.store()),
        client.cancel_token(),
    ));
    let status_handle = tokio::spawn(status::run(
        Arc::clone(client.status_channel()),
        status_interval,
        client.cancel_token(),
    ));

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::error!("Unable to listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {}
    }

    client.shutdown().await;
    let _ = tokio::try_join!(watcher_handle, status_handle);

    log::info!("Shutdown complete.");
    Ok(())
}
