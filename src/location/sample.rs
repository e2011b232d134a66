//! Location samples and route history points

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single timestamped position fix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: Option<f64>,
    /// Ground speed in meters per second
    pub speed: Option<f64>,
    /// Horizontal accuracy radius in meters
    pub accuracy: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl LocationSample {
    /// Create a fix captured now with no accuracy metadata
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude: None,
            speed: None,
            accuracy: None,
            captured_at: Utc::now(),
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }

    pub fn with_speed(mut self, meters_per_second: f64) -> Self {
        self.speed = Some(meters_per_second);
        self
    }

    pub fn with_accuracy(mut self, meters: f64) -> Self {
        self.accuracy = Some(meters);
        self
    }

    pub fn captured_at(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    /// Project the fix into route history
    pub fn track_point(&self) -> TrackPoint {
        TrackPoint {
            latitude: self.latitude,
            longitude: self.longitude,
            captured_at: self.captured_at,
        }
    }
}

/// A point in the route history of one session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

impl From<&LocationSample> for TrackPoint {
    fn from(sample: &LocationSample) -> Self {
        sample.track_point()
    }
}
