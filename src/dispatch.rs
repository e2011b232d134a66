//! Inbound frame routing
//!
//! Turns raw server frames into typed [`Dispatch`] values for the session
//! engine. Unknown commands are delivered, not dropped; malformed frames are
//! counted and skipped.

use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::protocol::{InboundFrame, SafetyAnalysis};

/// Reserved command that raises an emergency report
pub const ACTIVATE_SOS: &str = "ACTIVATE_SOS";

const DEFAULT_SOS_REASON: &str = "Remote SOS activation";

/// A control message from the server
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCommand {
    ActivateSos { reason: String },
    /// Passed through to the consumer untouched
    Other {
        command: String,
        payload: Option<Value>,
    },
}

impl RemoteCommand {
    pub fn parse(command: String, data: Option<Value>) -> Self {
        if command == ACTIVATE_SOS {
            let reason = data
                .as_ref()
                .and_then(|d| d.get("reason"))
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SOS_REASON)
                .to_string();
            Self::ActivateSos { reason }
        } else {
            Self::Other {
                command,
                payload: data,
            }
        }
    }

    /// Command name as sent on the wire
    pub fn kind(&self) -> &str {
        match self {
            Self::ActivateSos { .. } => ACTIVATE_SOS,
            Self::Other { command, .. } => command,
        }
    }
}

/// Where an inbound frame goes
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    Analysis(SafetyAnalysis),
    Alert { title: String, message: String },
    Command(RemoteCommand),
}

/// Routes inbound frames
#[derive(Debug, Default)]
pub struct CommandDispatcher {
    malformed: AtomicU64,
}

impl CommandDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and route one frame. Returns `None` for frames that do not parse.
    pub fn dispatch(&self, raw: &str) -> Option<Dispatch> {
        let frame = match InboundFrame::decode(raw) {
            Ok(frame) => frame,
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                debug!("Ignoring unparseable frame: {}", e);
                return None;
            }
        };

        Some(match frame {
            InboundFrame::Analysis {
                risk_level,
                risk_score,
            } => Dispatch::Analysis(SafetyAnalysis {
                risk_level,
                risk_score,
            }),
            InboundFrame::Alert { title, message } => Dispatch::Alert { title, message },
            InboundFrame::Command { command, data } => {
                Dispatch::Command(RemoteCommand::parse(command, data))
            }
        })
    }

    /// Frames skipped because they did not parse
    pub fn malformed_count(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_activate_sos_with_reason() {
        let dispatcher = CommandDispatcher::new();
        let routed = dispatcher.dispatch(
            r#"{"type":"command","command":"ACTIVATE_SOS","data":{"reason":"Guide lost contact"}}"#,
        );

        assert_eq!(
            routed,
            Some(Dispatch::Command(RemoteCommand::ActivateSos {
                reason: "Guide lost contact".into()
            }))
        );
    }

    #[test]
    fn test_activate_sos_default_reason() {
        let command = RemoteCommand::parse(ACTIVATE_SOS.into(), None);
        assert_eq!(
            command,
            RemoteCommand::ActivateSos {
                reason: DEFAULT_SOS_REASON.into()
            }
        );
        assert_eq!(command.kind(), ACTIVATE_SOS);
    }

    #[test]
    fn test_unknown_command_passes_through() {
        let dispatcher = CommandDispatcher::new();
        let routed = dispatcher
            .dispatch(r#"{"type":"command","command":"REGROUP","data":{"at":"gate 3"}}"#)
            .unwrap();

        match routed {
            Dispatch::Command(command) => {
                assert_eq!(command.kind(), "REGROUP");
                assert_eq!(
                    command,
                    RemoteCommand::Other {
                        command: "REGROUP".into(),
                        payload: Some(json!({"at": "gate 3"}))
                    }
                );
            }
            other => panic!("unexpected dispatch: {:?}", other),
        }
    }

    #[test]
    fn test_alert_and_analysis() {
        let dispatcher = CommandDispatcher::new();
        assert_eq!(
            dispatcher.dispatch(r#"{"type":"alert","title":"Heat","message":"Drink water"}"#),
            Some(Dispatch::Alert {
                title: "Heat".into(),
                message: "Drink water".into()
            })
        );
        assert!(matches!(
            dispatcher.dispatch(r#"{"type":"analysis","riskLevel":"HIGH","riskScore":0.9}"#),
            Some(Dispatch::Analysis(_))
        ));
    }

    #[test]
    fn test_malformed_frames_counted() {
        let dispatcher = CommandDispatcher::new();
        assert!(dispatcher.dispatch("{").is_none());
        assert!(dispatcher.dispatch(r#"{"type":"nope"}"#).is_none());
        assert_eq!(dispatcher.malformed_count(), 2);
    }
}
