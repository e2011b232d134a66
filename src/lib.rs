//! Wayguard - live tracking and duress alarm client for guided tours
//!
//! Wayguard samples a device's position on a cadence, keeps a resilient
//! bidirectional session with a tracking server, derives motion metrics,
//! reacts to remote commands, and verifies a PIN that doubles as a silent
//! alarm when entered under duress.
//!
//! ## Components
//!
//! - **Location**: position feed over a pluggable [`location::PositionSource`]
//! - **Metrics**: great-circle distance, speed and duration helpers
//! - **Transport**: auto-reconnecting tracking channel
//! - **Dispatch**: routing of analyses, alerts and remote commands
//! - **Session**: [`TrackingSessionEngine`] and its [`SessionEvent`] stream
//! - **Emergency**: SOS report submission
//! - **Duress**: [`DuressAuthModule`] and credential storage

pub mod config;
pub mod dispatch;
pub mod duress;
pub mod emergency;
pub mod location;
pub mod metrics;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use config::Args;
pub use duress::{DuressAuthModule, PinOutcome, PinResponse};
pub use session::{SessionEvent, TrackingSessionEngine};
pub use types::{Result, WayguardError};
