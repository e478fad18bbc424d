//! # Connections Module
//!
//! Everything that talks to the gateway over the network.
//!
//! - **`link`**: one TCP connection with its reconnect loop, line framing and
//!   frame routing.
//! - **`request_channel`**: serialized request/response operations on a link.
//! - **`gateway`**: the `Gateway` trait the replica is written against, and a
//!   router that moves report/status traffic to a second link.

/// TCP connection, framing and routing of received frames.
pub mod link;
/// One-at-a-time typed requests over a link.
pub mod request_channel;
/// The `Gateway` trait and `RoutedGateway`.
pub mod gateway;

pub use gateway::{Gateway, RoutedGateway};
pub use link::{LinkState, TransportLink};
pub use request_channel::RequestChannel;
