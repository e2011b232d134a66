//! Shared types for Wayguard

pub mod error;

pub use error::{Result, WayguardError};
