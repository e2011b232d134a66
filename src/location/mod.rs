//! Device positioning
//!
//! Wraps the platform positioning capability behind [`PositionSource`] and
//! turns it into a periodic sample feed with [`watch_position`].

pub mod replay;
pub mod sample;
pub mod sampler;

pub use replay::ReplaySampler;
pub use sample::{LocationSample, TrackPoint};
pub use sampler::{watch_position, PositionSource, SampleCallback, SubscriptionHandle};
