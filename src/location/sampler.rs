//! Periodic position sampling
//!
//! [`watch_position`] polls a [`PositionSource`] on a minimum period and hands
//! every fix to a callback. Ticks where the source has no fix are skipped; the
//! next tick tries again. Hardware may deliver late, so consumers must not
//! assume regular spacing between samples.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::sample::LocationSample;
use crate::types::{Result, WayguardError};

/// Platform positioning capability
#[async_trait]
pub trait PositionSource: Send + Sync + 'static {
    /// Ask the platform for location access.
    ///
    /// Returns `WayguardError::PermissionDenied` when the user refuses.
    async fn request_permission(&self) -> Result<()>;

    /// Take one fix right now
    async fn current_position(&self) -> Result<LocationSample>;
}

/// Callback invoked for each sample.
///
/// Runs while the subscription gate is held, so it must not block.
pub type SampleCallback = Arc<dyn Fn(LocationSample) + Send + Sync>;

/// Handle to a running [`watch_position`] subscription
pub struct SubscriptionHandle {
    /// `true` while callbacks may still fire
    gate: Arc<Mutex<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionHandle {
    /// Stop the subscription.
    ///
    /// Idempotent. Once this returns, the callback is not running and will
    /// never be invoked again.
    pub fn cancel(&self) {
        {
            let mut live = self.gate.lock().unwrap_or_else(|e| e.into_inner());
            *live = false;
        }

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            task.abort();
            debug!("Position subscription cancelled");
        }
    }

    /// Whether the subscription is still delivering samples
    pub fn is_active(&self) -> bool {
        *self.gate.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start sampling `source` at most once per `interval`
pub fn watch_position(
    source: Arc<dyn PositionSource>,
    interval: Duration,
    on_sample: SampleCallback,
) -> SubscriptionHandle {
    let gate = Arc::new(Mutex::new(true));
    let task_gate = Arc::clone(&gate);

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let sample = match source.current_position().await {
                Ok(sample) => sample,
                Err(WayguardError::PermissionDenied) => {
                    warn!("Location permission revoked, skipping tick");
                    continue;
                }
                Err(e) => {
                    debug!("No position this tick: {}", e);
                    continue;
                }
            };

            let live = task_gate.lock().unwrap_or_else(|e| e.into_inner());
            if !*live {
                break;
            }
            on_sample(sample);
        }
    });

    SubscriptionHandle {
        gate,
        task: Mutex::new(Some(task)),
    }
}
