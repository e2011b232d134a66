//! Session events and statistics

use serde::Serialize;
use tokio::sync::mpsc;

use super::engine::EngineState;
use crate::dispatch::RemoteCommand;
use crate::location::LocationSample;
use crate::protocol::SafetyAnalysis;

/// Origin of an emergency report raised by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SosTrigger {
    /// `ACTIVATE_SOS` received from the server
    Remote,
}

/// Everything a running session reports to its consumer
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// A sample was recorded. `analysis` is the server assessment received
    /// for the previous update, if one arrived.
    LocationUpdate {
        sample: LocationSample,
        analysis: Option<SafetyAnalysis>,
    },
    /// Link to the tracking server went up (`true`) or down (`false`)
    ConnectionChanged(bool),
    Alert {
        title: String,
        message: String,
    },
    Command(RemoteCommand),
    /// Result of a session-raised emergency report
    SosOutcome { trigger: SosTrigger, delivered: bool },
}

/// Ordered event stream of one session.
///
/// Ends (`recv` returns `None`) after the session is stopped and any
/// in-flight emergency submission has finished.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<SessionEvent>) -> Self {
        Self { rx }
    }

    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Next event if one is already waiting
    pub fn try_recv(&mut self) -> Option<SessionEvent> {
        self.rx.try_recv().ok()
    }

    /// Everything currently waiting, in order
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }
}

/// Snapshot of a session's motion metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub state: EngineState,
    pub session_id: Option<String>,
    pub distance_km: f64,
    pub point_count: usize,
    pub elapsed_secs: u64,
    /// `elapsed_secs` formatted for display
    pub duration: String,
    pub last_speed_kmh: f64,
    /// Whole meters
    pub last_altitude_m: f64,
    pub average_speed_kmh: f64,
}

impl SessionStats {
    pub(crate) fn idle() -> Self {
        Self {
            state: EngineState::Idle,
            session_id: None,
            distance_km: 0.0,
            point_count: 0,
            elapsed_secs: 0,
            duration: crate::metrics::format_duration(0),
            last_speed_kmh: 0.0,
            last_altitude_m: 0.0,
            average_speed_kmh: 0.0,
        }
    }
}
