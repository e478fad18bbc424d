use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::configs::settings::{ChannelConfig, FixNetSettings, LinkConfig, StoreConfig, DEFAULT_PORT};

/// Config file read when `--config-path` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "fixnet_mirror.conf";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "FIX-Net replica client", version)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    #[clap(long, env = "FIXNET_HOST", help = "Gateway host name or address.")]
    pub host: Option<String>,

    #[clap(long, env = "FIXNET_PORT", help = "Gateway FIX-Net port.")]
    pub port: Option<u16>,

    #[clap(long, env = "FIXNET_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FIXNET_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FIXNET_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "FIXNET_CONNECT_TIMEOUT_MS", help = "Timeout of one connection attempt in milliseconds.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "FIXNET_READ_TIMEOUT_MS", help = "Upper bound of one socket read in milliseconds.")]
    pub read_timeout_ms: Option<u64>,

    #[clap(long, env = "FIXNET_RECONNECT_DELAY_MS", help = "Delay between reconnect attempts in milliseconds.")]
    pub reconnect_delay_ms: Option<u64>,

    #[clap(long, env = "FIXNET_QUEUE_CAPACITY", help = "Capacity of the pushed update queue.")]
    pub queue_capacity: Option<usize>,

    #[clap(long, env = "FIXNET_REQUEST_TIMEOUT_MS", help = "Response timeout of a request in milliseconds.")]
    pub request_timeout_ms: Option<u64>,

    #[clap(long, env = "FIXNET_LIST_TIMEOUT_MS", help = "Wait for each key list fragment in milliseconds.")]
    pub list_timeout_ms: Option<u64>,

    #[clap(long, env = "FIXNET_TICK_INTERVAL_MS", help = "Replica maintenance interval in milliseconds.")]
    pub tick_interval_ms: Option<u64>,

    #[clap(long, env = "FIXNET_STATS_BATCH_SIZE", help = "Most report refreshes per maintenance tick.")]
    pub stats_batch_size: Option<usize>,

    #[clap(long, env = "FIXNET_REPORT_INTERVAL_MS", help = "Interval requested for pushed reports in milliseconds.")]
    pub report_interval_ms: Option<u64>,

    #[clap(long, env = "FIXNET_DEDICATED_STATUS_LINK", help = "Use a second connection for reports and status (true/false).")]
    pub dedicated_status_link: Option<bool>,

    #[clap(long, env = "FIXNET_STATUS_INTERVAL_SECONDS", help = "Log the server status every N seconds (0 disables).")]
    pub status_interval_seconds: Option<u64>,
}

impl ClientConfig {
    // 'other' overrides 'self' for Some values
    fn merge(self, other: ClientConfig) -> ClientConfig {
        ClientConfig {
            host: other.host.or(self.host),
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            read_timeout_ms: other.read_timeout_ms.or(self.read_timeout_ms),
            reconnect_delay_ms: other.reconnect_delay_ms.or(self.reconnect_delay_ms),
            queue_capacity: other.queue_capacity.or(self.queue_capacity),
            request_timeout_ms: other.request_timeout_ms.or(self.request_timeout_ms),
            list_timeout_ms: other.list_timeout_ms.or(self.list_timeout_ms),
            tick_interval_ms: other.tick_interval_ms.or(self.tick_interval_ms),
            stats_batch_size: other.stats_batch_size.or(self.stats_batch_size),
            report_interval_ms: other.report_interval_ms.or(self.report_interval_ms),
            dedicated_status_link: other.dedicated_status_link.or(self.dedicated_status_link),
            status_interval_seconds: other.status_interval_seconds.or(self.status_interval_seconds),
        }
    }

    /// Built-in defaults, the first layer of [`load_config`].
    pub fn defaults() -> ClientConfig {
        ClientConfig {
            host: Some("localhost".to_string()),
            port: Some(DEFAULT_PORT),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            dedicated_status_link: Some(false),
            status_interval_seconds: Some(0),
            ..Default::default()
        }
    }

    /// Runtime settings; unset options keep the library defaults.
    pub fn into_settings(self) -> FixNetSettings {
        let link_defaults = LinkConfig::default();
        let channel_defaults = ChannelConfig::default();
        let store_defaults = StoreConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);

        FixNetSettings {
            link: LinkConfig {
                host: self.host.unwrap_or(link_defaults.host),
                port: self.port.unwrap_or(link_defaults.port),
                connect_timeout: ms(self.connect_timeout_ms, link_defaults.connect_timeout),
                read_timeout: ms(self.read_timeout_ms, link_defaults.read_timeout),
                reconnect_delay: ms(self.reconnect_delay_ms, link_defaults.reconnect_delay),
                write_timeout: link_defaults.write_timeout,
                queue_capacity: self.queue_capacity.unwrap_or(link_defaults.queue_capacity),
                dispatch_wait: link_defaults.dispatch_wait,
            },
            channel: ChannelConfig {
                request_timeout: ms(self.request_timeout_ms, channel_defaults.request_timeout),
                best_effort_timeout: channel_defaults.best_effort_timeout,
                list_fragment_timeout: ms(self.list_timeout_ms, channel_defaults.list_fragment_timeout),
            },
            store: StoreConfig {
                tick_interval: ms(self.tick_interval_ms, store_defaults.tick_interval),
                stats_batch_size: self.stats_batch_size.unwrap_or(store_defaults.stats_batch_size),
                report_interval_ms: self.report_interval_ms.unwrap_or(store_defaults.report_interval_ms),
            },
            dedicated_status_link: self.dedicated_status_link.unwrap_or(false),
        }
    }
}

fn read_file(path: &Path) -> Result<ClientConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// `fixnet_mirror.conf` in the working directory, else in the user config dir.
fn default_config_file() -> PathBuf {
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(dir) => dir.join("fixnet").join(DEFAULT_CONFIG_FILE),
        None => local,
    }
}

/// Defaults, then the JSON config file, then environment and CLI.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from(ClientConfig::parse())
}

/// [`load_config`] with already parsed CLI/environment options.
pub fn load_config_from(cli: ClientConfig) -> Result<ClientConfig, ConfigError> {
    let config_file_path = cli.config_path.clone().unwrap_or_else(default_config_file);

    let mut current_config = ClientConfig::defaults();

    if config_file_path.exists() {
        current_config = current_config.merge(read_file(&config_file_path)?);
    } else {
        log::info!(
            "Config file not found at {}. Using defaults and environment/CLI variables.",
            config_file_path.display()
        );
    }

    Ok(current_config.merge(cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn file_overrides_defaults_and_cli_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"host": "gw.local", "port": 4000, "requestTimeoutMs": 2500, "dedicatedStatusLink": true}}"#
        )
        .unwrap();

        let cli = ClientConfig {
            config_path: Some(file.path().to_path_buf()),
            port: Some(4100),
            ..Default::default()
        };
        let config = load_config_from(cli).unwrap();
        assert_eq!(config.host.as_deref(), Some("gw.local"));
        assert_eq!(config.port, Some(4100));
        assert_eq!(config.log_level.as_deref(), Some("info"));

        let settings = config.into_settings();
        assert_eq!(settings.link.port, 4100);
        assert_eq!(settings.channel.request_timeout, Duration::from_millis(2500));
        assert_eq!(settings.link.reconnect_delay, Duration::from_secs(2));
        assert!(settings.dedicated_status_link);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cli = ClientConfig {
            config_path: Some(dir.path().join("absent.conf")),
            ..Default::default()
        };
        let config = load_config_from(cli).unwrap();
        assert_eq!(config.port, Some(DEFAULT_PORT));
        assert_eq!(config.into_settings().store.stats_batch_size, 50);
    }

    #[test]
    fn broken_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        let cli = ClientConfig {
            config_path: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        assert!(matches!(
            load_config_from(cli),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn cli_flags_parse() {
        let cli = ClientConfig::parse_from([
            "fixnet_mirror",
            "--host",
            "10.0.0.2",
            "--dedicated-status-link",
            "true",
        ]);
        assert_eq!(cli.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(cli.dedicated_status_link, Some(true));
    }
}
