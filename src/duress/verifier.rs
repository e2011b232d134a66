//! Duress PIN verification
//!
//! Checks a PIN against two enrolled secrets. The duress secret answers
//! exactly like a wrong PIN to whoever is holding the device, and quietly
//! files a silent emergency report in the background.

use argon2::Params;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::info;
use zeroize::Zeroizing;

use super::feedback::{FeedbackPresenter, NoopPresenter, PinResponse};
use super::hasher::PinHasher;
use super::store::{SecretStore, COERCION_PIN_KEY, REAL_PIN_KEY};
use crate::emergency::{EmergencyReport, EmergencySink, ReportLocation};
use crate::location::PositionSource;
use crate::types::{Result, WayguardError};

/// Description attached to silent reports
const SILENT_REPORT_DESCRIPTION: &str = "Duress PIN entered";

/// Bound on the best-effort position fix taken for a silent report
const SILENT_FIX_TIMEOUT: Duration = Duration::from_secs(5);

/// Verification policy
#[derive(Debug, Clone)]
pub struct DuressSettings {
    pub pin_length: usize,
    /// Consecutive failures that trigger a lockout
    pub max_attempts: u32,
    pub lockout: Duration,
    pub hash_params: Params,
}

impl Default for DuressSettings {
    fn default() -> Self {
        Self {
            pin_length: 4,
            max_attempts: 5,
            lockout: Duration::from_secs(30),
            hash_params: Params::default(),
        }
    }
}

/// Failure counter and lockout deadline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuressAttemptState {
    pub consecutive_failures: u32,
    pub locked_until: Option<Instant>,
}

/// Result of one attempt.
///
/// `DuressTriggered` is for the application's own bookkeeping; what the user
/// sees comes from [`response`](Self::response), which is the same for it and
/// for `NoMatch`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOutcome {
    Authenticated,
    DuressTriggered,
    NoMatch { remaining_attempts: u32 },
    Locked { retry_after: Duration },
}

impl PinOutcome {
    /// Observable response for this outcome
    pub fn response(&self) -> PinResponse {
        match self {
            Self::Authenticated => PinResponse::Accepted,
            Self::DuressTriggered | Self::NoMatch { .. } => PinResponse::rejected(),
            Self::Locked { retry_after } => PinResponse::locked(*retry_after),
        }
    }
}

/// Verifies PINs against the real and duress secrets
pub struct DuressAuthModule {
    settings: DuressSettings,
    hasher: PinHasher,
    store: Arc<dyn SecretStore>,
    sink: Arc<dyn EmergencySink>,
    locator: Option<Arc<dyn PositionSource>>,
    presenter: Arc<dyn FeedbackPresenter>,
    attempts: Mutex<DuressAttemptState>,
    runtime: Option<Handle>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl DuressAuthModule {
    /// Create a verifier.
    ///
    /// Silent reports run on the Tokio runtime current at construction (or at
    /// verification time if there was none).
    pub fn new(
        store: Arc<dyn SecretStore>,
        sink: Arc<dyn EmergencySink>,
        settings: DuressSettings,
    ) -> Self {
        Self {
            hasher: PinHasher::new(settings.hash_params.clone()),
            settings,
            store,
            sink,
            locator: None,
            presenter: Arc::new(NoopPresenter),
            attempts: Mutex::new(DuressAttemptState::default()),
            runtime: Handle::try_current().ok(),
            background: Mutex::new(Vec::new()),
        }
    }

    /// Position source used to locate silent reports
    pub fn with_locator(mut self, locator: Arc<dyn PositionSource>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_presenter(mut self, presenter: Arc<dyn FeedbackPresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    pub fn settings(&self) -> &DuressSettings {
        &self.settings
    }

    pub fn attempt_state(&self) -> DuressAttemptState {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether both secrets are stored
    pub fn is_enrolled(&self) -> Result<bool> {
        Ok(self.store.get(REAL_PIN_KEY)?.is_some() && self.store.get(COERCION_PIN_KEY)?.is_some())
    }

    /// Store both secrets, replacing any previous enrollment
    pub fn enroll(&self, real: &str, duress: &str) -> Result<()> {
        let real = Zeroizing::new(real.to_string());
        let duress = Zeroizing::new(duress.to_string());

        self.check_format(&real)?;
        self.check_format(&duress)?;
        if *real == *duress {
            return Err(WayguardError::Credential(
                "duress PIN must differ from the real PIN".into(),
            ));
        }

        let real_hash = self.hasher.hash(&real)?;
        let duress_hash = self.hasher.hash(&duress)?;
        // One write, so a failure never leaves a mixed pair behind
        self.store.set_many(&[
            (REAL_PIN_KEY, real_hash.as_str()),
            (COERCION_PIN_KEY, duress_hash.as_str()),
        ])?;

        *self.attempts.lock().unwrap_or_else(|e| e.into_inner()) = DuressAttemptState::default();
        info!("PIN credentials enrolled");
        Ok(())
    }

    fn check_format(&self, pin: &str) -> Result<()> {
        if self.is_well_formed(pin) {
            Ok(())
        } else {
            Err(WayguardError::Credential(format!(
                "PIN must be exactly {} digits",
                self.settings.pin_length
            )))
        }
    }

    fn is_well_formed(&self, pin: &str) -> bool {
        pin.len() == self.settings.pin_length && pin.bytes().all(|b| b.is_ascii_digit())
    }

    /// Check one PIN attempt.
    ///
    /// The presenter receives the observable response before this returns.
    /// Errors only come from the credential store (e.g. nothing enrolled).
    pub fn verify(&self, pin: &str) -> Result<PinOutcome> {
        let pin = Zeroizing::new(pin.to_string());
        let mut state = self.attempts.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();

        if let Some(until) = state.locked_until {
            if now < until {
                let outcome = PinOutcome::Locked {
                    retry_after: until - now,
                };
                self.presenter.present(&outcome.response());
                return Ok(outcome);
            }
            *state = DuressAttemptState::default();
        }

        let real_hash = self.stored(REAL_PIN_KEY)?;
        let duress_hash = self.stored(COERCION_PIN_KEY)?;

        // Both hashes are always checked
        let well_formed = self.is_well_formed(&pin);
        let duress_match = self.hasher.verify(&pin, &duress_hash)?;
        let real_match = self.hasher.verify(&pin, &real_hash)?;

        let outcome = if well_formed && duress_match {
            state.consecutive_failures = 0;
            PinOutcome::DuressTriggered
        } else if well_formed && real_match {
            state.consecutive_failures = 0;
            PinOutcome::Authenticated
        } else {
            state.consecutive_failures += 1;
            if state.consecutive_failures >= self.settings.max_attempts {
                state.locked_until = Some(now + self.settings.lockout);
                PinOutcome::Locked {
                    retry_after: self.settings.lockout,
                }
            } else {
                PinOutcome::NoMatch {
                    remaining_attempts: self.settings.max_attempts - state.consecutive_failures,
                }
            }
        };
        drop(state);

        self.presenter.present(&outcome.response());
        if outcome == PinOutcome::DuressTriggered {
            self.raise_silent_alarm();
        }
        Ok(outcome)
    }

    fn stored(&self, key: &str) -> Result<String> {
        self.store
            .get(key)?
            .ok_or_else(|| WayguardError::Credential("PIN credentials are not enrolled".into()))
    }

    /// Fire-and-forget silent report. Never logs, never fails.
    fn raise_silent_alarm(&self) {
        let Some(runtime) = self.runtime.clone().or_else(|| Handle::try_current().ok()) else {
            return;
        };
        let sink = Arc::clone(&self.sink);
        let locator = self.locator.clone();

        let task = runtime.spawn(async move {
            let location = match locator {
                Some(locator) => {
                    tokio::time::timeout(SILENT_FIX_TIMEOUT, locator.current_position())
                        .await
                        .ok()
                        .and_then(|fix| fix.ok())
                        .map(|sample| ReportLocation::from(&sample))
                }
                None => None,
            };
            let report = EmergencyReport::silent(location, SILENT_REPORT_DESCRIPTION);
            let _ = sink.submit(&report).await;
        });

        let mut background = self.background.lock().unwrap_or_else(|e| e.into_inner());
        background.retain(|task| !task.is_finished());
        background.push(task);
    }

    /// Let background reports finish, then wait out the rest of `budget`.
    ///
    /// Always takes `budget` (unless a report outlives it), whatever the last
    /// outcome was. For short-lived processes that must not exit before a
    /// silent report has gone out.
    pub async fn settle(&self, budget: Duration) {
        let deadline = tokio::time::Instant::now() + budget;
        let pending = std::mem::take(&mut *self.background.lock().unwrap_or_else(|e| e.into_inner()));

        let _ = tokio::time::timeout_at(deadline, futures::future::join_all(pending)).await;
        tokio::time::sleep_until(deadline).await;
    }
}
