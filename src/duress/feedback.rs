//! What the person holding the device sees and feels

use std::time::Duration;

/// Text shown for every rejected PIN
pub const REJECTED_MESSAGE: &str = "Incorrect PIN. Please try again.";

/// Vibration patterns, as alternating on/off milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HapticPattern {
    Success,
    Error,
    Lockout,
}

impl HapticPattern {
    pub fn timings_ms(&self) -> &'static [u64] {
        match self {
            Self::Success => &[40],
            Self::Error => &[80, 60, 80],
            Self::Lockout => &[400],
        }
    }
}

/// Observable result of a PIN attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinResponse {
    Accepted,
    Rejected {
        message: &'static str,
        haptic: HapticPattern,
    },
    Locked {
        retry_after_secs: u64,
        haptic: HapticPattern,
    },
}

impl PinResponse {
    pub fn rejected() -> Self {
        Self::Rejected {
            message: REJECTED_MESSAGE,
            haptic: HapticPattern::Error,
        }
    }

    pub fn locked(retry_after: Duration) -> Self {
        // Round up so "0s" is never shown while still locked
        let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
        Self::Locked {
            retry_after_secs: secs,
            haptic: HapticPattern::Lockout,
        }
    }

    /// Text for the display
    pub fn message(&self) -> String {
        match self {
            Self::Accepted => "Unlocked".to_string(),
            Self::Rejected { message, .. } => message.to_string(),
            Self::Locked {
                retry_after_secs, ..
            } => format!("Too many attempts. Try again in {}s.", retry_after_secs),
        }
    }

    pub fn haptic(&self) -> HapticPattern {
        match self {
            Self::Accepted => HapticPattern::Success,
            Self::Rejected { haptic, .. } | Self::Locked { haptic, .. } => *haptic,
        }
    }
}

/// Renders a [`PinResponse`] (display text plus vibration).
///
/// Called synchronously on the verification path.
pub trait FeedbackPresenter: Send + Sync + 'static {
    fn present(&self, response: &PinResponse);
}

/// Presenter for headless use
#[derive(Debug, Default)]
pub struct NoopPresenter;

impl FeedbackPresenter for NoopPresenter {
    fn present(&self, _response: &PinResponse) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_is_generic() {
        let response = PinResponse::rejected();
        assert_eq!(response.message(), REJECTED_MESSAGE);
        assert_eq!(response.haptic(), HapticPattern::Error);
        assert!(!response.message().chars().any(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_locked_rounds_up() {
        assert_eq!(
            PinResponse::locked(Duration::from_millis(29_100)),
            PinResponse::Locked {
                retry_after_secs: 30,
                haptic: HapticPattern::Lockout
            }
        );
        assert_eq!(
            PinResponse::locked(Duration::from_secs(30)).message(),
            "Too many attempts. Try again in 30s."
        );
    }
}
