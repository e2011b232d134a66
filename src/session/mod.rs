//! Tracking sessions
//!
//! [`TrackingSessionEngine`] ties the position feed, the tracking channel and
//! the emergency sink into one session with an explicit lifecycle. Consumers
//! read [`SessionEvent`]s from the [`SessionEvents`] stream returned by
//! `start_tracking`.

pub mod config;
pub mod engine;
pub mod events;

pub use config::{EngineSettings, TrackingConfig, UserType};
pub use engine::{EngineState, TrackingSession, TrackingSessionEngine};
pub use events::{SessionEvent, SessionEvents, SessionStats, SosTrigger};
