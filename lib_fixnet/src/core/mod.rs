//! # Core Replica Module
//!
//! The live mirror of the gateway's data points.
//!
//! - **`datapoint`**: one mirrored value with flags, aux fields, statistics
//!   and change listeners.
//! - **`store`**: owner of all data points and of the initialize / teardown /
//!   stats refresh lifecycle.
//! - **`stats_tracker`**: the dirty and push-driven key sets behind the
//!   statistics refresh.
//! - **`client`**: the context object that wires a store to its links and runs
//!   the background tasks.

/// A single mirrored data point.
pub mod datapoint;
/// The replica store.
pub mod store;
/// Stats refresh bookkeeping.
pub mod stats_tracker;
/// `FixNetClient`, the owning context.
pub mod client;

pub use client::FixNetClient;
pub use datapoint::{DataPoint, Listener, ListenerId, PointEvent, PointState};
pub use store::{ReplicaStore, StoreEvent};
