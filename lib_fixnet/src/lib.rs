//! # lib_fixnet
//!
//! Client side of the FIX-Net protocol: keeps a live, two-way synchronized
//! replica of the data points published by a FIX Gateway.
//!
//! ```no_run
//! use std::time::Duration;
//! use lib_fixnet::{FixNetClient, FixNetSettings};
//!
//! # async fn run() {
//! let client = FixNetClient::new(FixNetSettings::for_server("127.0.0.1", 3490));
//! client.start();
//! if client.store().wait_initialized(Duration::from_secs(10)).await {
//!     println!("AOA = {:?}", client.store().value("AOA"));
//! }
//! client.shutdown().await;
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod configs;
pub mod connections;
pub mod core;
pub mod error;
#[cfg(feature = "loggers")]
pub mod loggers;
pub mod protocol;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::configs::{ChannelConfig, FixNetSettings, LinkConfig, StoreConfig};
pub use crate::connections::{Gateway, LinkState, RequestChannel, RoutedGateway, TransportLink};
pub use crate::core::{
    DataPoint, FixNetClient, Listener, ListenerId, PointEvent, PointState, ReplicaStore, StoreEvent,
};
pub use crate::error::{FixNetError, ProtocolError, Result};
pub use crate::protocol::{DataType, QualityFlag, QualityFlags, RateStats, Report, Value};
