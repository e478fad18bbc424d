//! Concrete runtime settings. Every field has a working default so a client
//! can be built with `FixNetSettings::default()` and a host/port override.

use std::time::Duration;

/// Default FIX-Net port of the gateway.
pub const DEFAULT_PORT: u16 = 3490;

/// Socket and framing settings of one `TransportLink`.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    /// Upper bound of a single socket read; the receive task checks for stop at least this often.
    pub read_timeout: Duration,
    pub reconnect_delay: Duration,
    /// Upper bound of one socket write; a peer that stops reading loses the connection.
    pub write_timeout: Duration,
    /// Capacity of the pushed-update queue; overflow drops the newest update.
    pub queue_capacity: usize,
    /// Upper bound of one wait of the dispatch task on the update queue.
    pub dispatch_wait: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            connect_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(1),
            reconnect_delay: Duration::from_secs(2),
            write_timeout: Duration::from_secs(1),
            queue_capacity: 5000,
            dispatch_wait: Duration::from_millis(500),
        }
    }
}

/// Timeouts of the request channel.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub request_timeout: Duration,
    /// Wait for acks of optional commands (report subscriptions).
    pub best_effort_timeout: Duration,
    /// Wait for each further fragment of a key list.
    pub list_fragment_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(1),
            best_effort_timeout: Duration::from_millis(50),
            list_fragment_timeout: Duration::from_secs(1),
        }
    }
}

/// Replica store maintenance settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub tick_interval: Duration,
    /// Most pull-report refreshes performed per tick.
    pub stats_batch_size: usize,
    /// Interval requested for pushed reports.
    pub report_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            stats_batch_size: 50,
            report_interval_ms: 1000,
        }
    }
}

/// Everything a `FixNetClient` needs.
#[derive(Debug, Clone, Default)]
pub struct FixNetSettings {
    pub link: LinkConfig,
    pub channel: ChannelConfig,
    pub store: StoreConfig,
    /// Route `get_report`/`get_status` over a second connection.
    pub dedicated_status_link: bool,
}

impl FixNetSettings {
    /// Defaults pointed at `host:port`.
    pub fn for_server(host: impl Into<String>, port: u16) -> Self {
        let mut settings = Self::default();
        settings.link.host = host.into();
        settings.link.port = port;
        settings
    }
}
