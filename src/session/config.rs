//! Session configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

use crate::emergency::RetryPolicy;
use crate::transport::TransportConfig;
use crate::types::WayguardError;

/// Default sampling period
pub const DEFAULT_TRACKING_INTERVAL: Duration = Duration::from_secs(5);

/// Who is carrying the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Guide,
    Tourist,
}

impl FromStr for UserType {
    type Err = WayguardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "guide" => Ok(Self::Guide),
            "tourist" => Ok(Self::Tourist),
            other => Err(WayguardError::Config(format!(
                "unknown user type '{}', expected guide or tourist",
                other
            ))),
        }
    }
}

impl std::fmt::Display for UserType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Guide => f.write_str("guide"),
            Self::Tourist => f.write_str("tourist"),
        }
    }
}

/// Per-session parameters passed to `start_tracking`
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Minimum period between samples
    pub interval: Duration,
    pub user_id: String,
    pub user_type: UserType,
}

impl TrackingConfig {
    pub fn new(user_id: impl Into<String>, user_type: UserType) -> Self {
        Self {
            interval: DEFAULT_TRACKING_INTERVAL,
            user_id: user_id.into(),
            user_type,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self::new(Uuid::new_v4().to_string(), UserType::Tourist)
    }
}

/// Engine-wide settings shared by every session it runs
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub transport: TransportConfig,
    /// Retry policy for explicit and remote SOS submissions
    pub sos_retry: RetryPolicy,
}

impl EngineSettings {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            sos_retry: RetryPolicy::default(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(TransportConfig::new("ws://localhost:8000/ws/tracking"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_type_parsing() {
        assert_eq!("guide".parse::<UserType>().unwrap(), UserType::Guide);
        assert_eq!("Tourist".parse::<UserType>().unwrap(), UserType::Tourist);
        assert!("pilot".parse::<UserType>().is_err());
        assert_eq!(UserType::Guide.to_string(), "guide");
    }

    #[test]
    fn test_defaults() {
        let config = TrackingConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.user_type, UserType::Tourist);
        assert!(!config.user_id.is_empty());

        let settings = EngineSettings::default();
        assert_eq!(settings.sos_retry.max_attempts, 3);
        assert_eq!(settings.transport.queue_capacity, 50);
    }
}
