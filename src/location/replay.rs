//! Scripted position source
//!
//! Plays back a fixed sequence of fixes, one per request. Used by the `track`
//! command to drive a session from a recorded route, and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use super::sample::LocationSample;
use super::sampler::PositionSource;
use crate::types::{Result, WayguardError};

/// One entry of a replay file
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplayEntry {
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    speed: Option<f64>,
    accuracy: Option<f64>,
    captured_at: Option<DateTime<Utc>>,
}

/// Position source backed by a queue of scripted fixes.
///
/// `None` entries simulate ticks where the hardware has no fix.
pub struct ReplaySampler {
    steps: Mutex<VecDeque<Option<LocationSample>>>,
    permission_granted: bool,
    /// Replace recorded timestamps with the time of delivery
    restamp: bool,
}

impl ReplaySampler {
    pub fn new(samples: Vec<LocationSample>) -> Self {
        Self {
            steps: Mutex::new(samples.into_iter().map(Some).collect()),
            permission_granted: true,
            restamp: false,
        }
    }

    /// A source whose permission request is always refused
    pub fn denied() -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            permission_granted: false,
            restamp: false,
        }
    }

    /// Load a JSON array of fixes.
    ///
    /// Entries without `capturedAt` are stamped when delivered.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let entries: Vec<ReplayEntry> = serde_json::from_str(&raw)
            .map_err(|e| WayguardError::Config(format!("Invalid replay file: {}", e)))?;

        let restamp = entries.iter().any(|e| e.captured_at.is_none());
        let samples = entries
            .into_iter()
            .map(|e| LocationSample {
                latitude: e.latitude,
                longitude: e.longitude,
                altitude: e.altitude,
                speed: e.speed,
                accuracy: e.accuracy,
                captured_at: e.captured_at.unwrap_or_else(Utc::now),
            })
            .collect();

        Ok(Self {
            restamp,
            ..Self::new(samples)
        })
    }

    /// Stamp each fix with the delivery time instead of its recorded time
    pub fn restamped(mut self) -> Self {
        self.restamp = true;
        self
    }

    pub fn push(&self, sample: LocationSample) {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Some(sample));
    }

    /// Queue a tick with no fix
    pub fn push_gap(&self) {
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(None);
    }

    /// Fixes and gaps not yet delivered
    pub fn remaining(&self) -> usize {
        self.steps.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl PositionSource for ReplaySampler {
    async fn request_permission(&self) -> Result<()> {
        if self.permission_granted {
            Ok(())
        } else {
            Err(WayguardError::PermissionDenied)
        }
    }

    async fn current_position(&self) -> Result<LocationSample> {
        if !self.permission_granted {
            return Err(WayguardError::PermissionDenied);
        }

        let next = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(Some(sample)) if self.restamp => Ok(sample.captured_at(Utc::now())),
            Some(Some(sample)) => Ok(sample),
            Some(None) => Err(WayguardError::PositionUnavailable("no fix".into())),
            None => Err(WayguardError::PositionUnavailable("replay exhausted".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_replay_order_and_exhaustion() {
        let sampler = ReplaySampler::new(vec![
            LocationSample::new(1.0, 1.0),
            LocationSample::new(2.0, 2.0),
        ]);

        assert_eq!(sampler.current_position().await.unwrap().latitude, 1.0);
        assert_eq!(sampler.current_position().await.unwrap().latitude, 2.0);
        assert!(matches!(
            sampler.current_position().await,
            Err(WayguardError::PositionUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_denied_source() {
        let sampler = ReplaySampler::denied();
        assert!(matches!(
            sampler.request_permission().await,
            Err(WayguardError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn test_load_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"latitude": 41.9, "longitude": 12.5, "speed": 1.2}},
                {{"latitude": 41.901, "longitude": 12.5, "altitude": 20.0}}
            ]"#
        )
        .unwrap();

        let sampler = ReplaySampler::from_json_file(file.path()).unwrap();
        assert_eq!(sampler.remaining(), 2);

        let first = sampler.current_position().await.unwrap();
        assert_eq!(first.speed, Some(1.2));
        let second = sampler.current_position().await.unwrap();
        assert_eq!(second.altitude, Some(20.0));
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        let result = ReplaySampler::from_json_file(file.path());
        assert!(matches!(result, Err(WayguardError::Config(_))));
    }
}
