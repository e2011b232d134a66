//! Tracking channel
//!
//! - [`SessionTransport`]: one logical auto-reconnecting link
//! - [`Connector`]: single connection attempts ([`WsConnector`], [`MemoryConnector`])
//! - [`Backoff`]: reconnect delay policy

pub mod backoff;
pub mod connection;
pub mod connector;
pub mod memory;
pub mod state;

pub use backoff::{Backoff, BackoffPolicy};
pub use connection::{Delivery, SessionTransport, TransportConfig};
pub use connector::{Connector, FrameSink, FrameStream, Link, WsConnector};
pub use memory::MemoryConnector;
pub use state::{TransportEvent, TransportState};
