//! Duress PIN authentication
//!
//! Two PINs are enrolled: the real one unlocks, the duress one looks like a
//! mistyped PIN and raises a silent alarm.

pub mod feedback;
pub mod hasher;
pub mod store;
pub mod verifier;

pub use feedback::{FeedbackPresenter, HapticPattern, NoopPresenter, PinResponse, REJECTED_MESSAGE};
pub use hasher::PinHasher;
pub use store::{FileSecretStore, MemorySecretStore, SecretStore, COERCION_PIN_KEY, REAL_PIN_KEY};
pub use verifier::{DuressAttemptState, DuressAuthModule, DuressSettings, PinOutcome};
