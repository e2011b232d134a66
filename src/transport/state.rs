//! Transport lifecycle states and events

use serde::{Deserialize, Serialize};

/// Lifecycle of a [`SessionTransport`](super::SessionTransport)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Never connected, or the initial connect failed
    Disconnected,
    /// Initial handshake in flight
    Connecting,
    /// Link established
    Connected,
    /// Link dropped, backoff loop running
    Reconnecting,
    /// Terminal, never reused
    Closed,
}

impl TransportState {
    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(self, next: TransportState) -> bool {
        use TransportState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connecting, Disconnected)
                | (Connected, Reconnecting)
                | (Reconnecting, Connected)
                | (Disconnected, Closed)
                | (Connecting, Closed)
                | (Connected, Closed)
                | (Reconnecting, Closed)
        )
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Everything a transport reports to its subscriber, in order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged {
        from: TransportState,
        to: TransportState,
    },
    Message(String),
}
