//! Configuration for Wayguard
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::duress::DuressSettings;
use crate::session::{EngineSettings, TrackingConfig, UserType};
use crate::transport::TransportConfig;

/// Wayguard - live tour tracking with a duress-PIN silent alarm
#[derive(Parser, Debug, Clone)]
#[command(name = "wayguard")]
#[command(about = "Live tracking session engine and duress-PIN silent alarm")]
pub struct Args {
    /// Tracking server WebSocket endpoint
    #[arg(long, env = "TRACKING_URL", default_value = "ws://localhost:8000/ws/tracking")]
    pub tracking_url: String,

    /// Base URL of the alerting API (emergency reports go to /emergencies/sos)
    #[arg(long, env = "API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Bearer token for the tracking channel and the alerting API
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,

    /// Identity reported for the session
    #[arg(long, env = "USER_ID", default_value_t = Uuid::new_v4().to_string())]
    pub user_id: String,

    /// guide or tourist
    #[arg(long, env = "USER_TYPE", default_value = "tourist")]
    pub user_type: UserType,

    /// Minimum period between location samples
    #[arg(long, env = "TRACKING_INTERVAL_MS", default_value = "5000")]
    pub interval_ms: u64,

    /// Bound on the initial tracking handshake
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// Location frames kept while the tracking link is down
    #[arg(long, env = "OFFLINE_QUEUE_CAPACITY", default_value = "50")]
    pub queue_capacity: usize,

    /// Number of digits in a PIN
    #[arg(long, env = "PIN_LENGTH", default_value = "4")]
    pub pin_length: usize,

    /// Consecutive wrong PINs before lockout
    #[arg(long, env = "MAX_PIN_ATTEMPTS", default_value = "5")]
    pub max_pin_attempts: u32,

    /// Lockout duration in seconds
    #[arg(long, env = "PIN_LOCKOUT_SECS", default_value = "30")]
    pub lockout_secs: u64,

    /// File holding the PIN hashes
    #[arg(long, env = "SECRETS_PATH", default_value = "wayguard-secrets.json")]
    pub secrets_path: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a tracking session fed from a recorded route
    Track {
        /// JSON array of fixes ({latitude, longitude, speed?, altitude?, accuracy?, capturedAt?})
        #[arg(long)]
        replay: PathBuf,

        /// Keep emergency reports in memory instead of posting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Store the real and duress PINs
    Enroll {
        #[arg(long)]
        real: String,

        #[arg(long)]
        duress: String,
    },

    /// Check one PIN and show what the device would show
    Unlock {
        #[arg(long)]
        pin: String,
    },
}

impl Args {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::new(self.tracking_url.clone());
        config.auth_token = self.auth_token.clone();
        config.connect_timeout = Duration::from_millis(self.connect_timeout_ms);
        config.queue_capacity = self.queue_capacity;
        config
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings::new(self.transport_config())
    }

    pub fn tracking_config(&self) -> TrackingConfig {
        TrackingConfig::new(self.user_id.clone(), self.user_type).with_interval(self.interval())
    }

    pub fn duress_settings(&self) -> DuressSettings {
        DuressSettings {
            pin_length: self.pin_length,
            max_attempts: self.max_pin_attempts,
            lockout: Duration::from_secs(self.lockout_secs),
            ..DuressSettings::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.interval_ms == 0 {
            return Err("TRACKING_INTERVAL_MS must be greater than 0".to_string());
        }

        if self.queue_capacity == 0 {
            return Err("OFFLINE_QUEUE_CAPACITY must be greater than 0".to_string());
        }

        if !(4..=12).contains(&self.pin_length) {
            return Err("PIN_LENGTH must be between 4 and 12".to_string());
        }

        if self.max_pin_attempts == 0 {
            return Err("MAX_PIN_ATTEMPTS must be greater than 0".to_string());
        }

        if !(self.tracking_url.starts_with("ws://") || self.tracking_url.starts_with("wss://")) {
            return Err("TRACKING_URL must be a ws:// or wss:// URL".to_string());
        }

        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err("API_URL must be an http:// or https:// URL".to_string());
        }

        Ok(())
    }
}
