//! # Configuration Modules
//!
//! Runtime settings of the client, and (with the `configs` feature) the layered
//! loader used by binaries.

/// Concrete settings structs with defaults.
pub mod settings;

/// Defaults, JSON file, environment and CLI merged into one `ClientConfig`.
#[cfg(feature = "configs")]
pub mod client_config;

pub use settings::{ChannelConfig, FixNetSettings, LinkConfig, StoreConfig};
