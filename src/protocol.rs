//! Tracking channel wire format
//!
//! JSON text frames tagged by `type`:
//!
//! | Direction | `type` | Fields |
//! |-----------|--------|--------|
//! | out | `location` | `sessionId`, `latitude`, `longitude`, `speed`, `altitude`, `accuracy`, `capturedAt` |
//! | in | `analysis` | `riskLevel`, `riskScore` |
//! | in | `alert` | `title`, `message` |
//! | in | `command` | `command`, optional `data` |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location::LocationSample;
use crate::types::Result;

/// Server risk assessment attached to an acknowledged location update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafetyAnalysis {
    pub risk_level: String,
    pub risk_score: f64,
}

/// Frames sent to the tracking server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    #[serde(rename_all = "camelCase")]
    Location {
        session_id: String,
        latitude: f64,
        longitude: f64,
        speed: Option<f64>,
        altitude: Option<f64>,
        accuracy: Option<f64>,
        captured_at: DateTime<Utc>,
    },
}

impl OutboundFrame {
    pub fn location(session_id: &str, sample: &LocationSample) -> Self {
        Self::Location {
            session_id: session_id.to_string(),
            latitude: sample.latitude,
            longitude: sample.longitude,
            speed: sample.speed,
            altitude: sample.altitude,
            accuracy: sample.accuracy,
            captured_at: sample.captured_at,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Frames received from the tracking server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    #[serde(rename_all = "camelCase")]
    Analysis { risk_level: String, risk_score: f64 },
    Alert { title: String, message: String },
    Command {
        command: String,
        #[serde(default)]
        data: Option<serde_json::Value>,
    },
}

impl InboundFrame {
    pub fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
