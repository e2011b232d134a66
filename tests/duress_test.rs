//! Duress PIN integration tests
//!
//! Exercises `DuressAuthModule` through its public API:
//! - Duress and wrong-PIN responses are indistinguishable
//! - Lockout after repeated failures and recovery after expiry
//! - File-backed enrollment

use argon2::Params;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

use wayguard::duress::{
    DuressAuthModule, DuressSettings, FeedbackPresenter, FileSecretStore, MemorySecretStore,
    PinOutcome, PinResponse,
};
use wayguard::emergency::MemorySink;

const REAL: &str = "3141";
const DURESS: &str = "2718";

#[derive(Default)]
struct RecordingPresenter {
    seen: Mutex<Vec<PinResponse>>,
}

impl FeedbackPresenter for RecordingPresenter {
    fn present(&self, response: &PinResponse) {
        self.seen.lock().unwrap().push(response.clone());
    }
}

fn settings(lockout: Duration) -> DuressSettings {
    DuressSettings {
        lockout,
        hash_params: Params::new(8, 1, 1, None).unwrap(),
        ..DuressSettings::default()
    }
}

fn random_wrong_pin(rng: &mut impl Rng) -> String {
    loop {
        let pin = format!("{:04}", rng.gen_range(0..10_000));
        if pin != REAL && pin != DURESS {
            return pin;
        }
    }
}

fn median(mut samples: Vec<Duration>) -> Duration {
    samples.sort();
    samples[samples.len() / 2]
}

// =============================================================================
// Indistinguishability
// =============================================================================

#[tokio::test]
async fn test_duress_indistinguishable_from_wrong_pin() {
    let sink = Arc::new(MemorySink::new());
    let presenter = Arc::new(RecordingPresenter::default());
    let module = DuressAuthModule::new(
        Arc::new(MemorySecretStore::new()),
        sink.clone(),
        settings(Duration::from_secs(30)),
    )
    .with_presenter(presenter.clone());
    module.enroll(REAL, DURESS).unwrap();

    let mut rng = rand::thread_rng();
    let mut duress_times = Vec::new();
    let mut wrong_times = Vec::new();
    let mut duress_responses = Vec::new();
    let mut wrong_responses = Vec::new();

    // Alternating keeps the failure counter below the lockout threshold
    for _ in 0..500 {
        let started = Instant::now();
        let outcome = module.verify(DURESS).unwrap();
        duress_times.push(started.elapsed());
        assert_eq!(outcome, PinOutcome::DuressTriggered);
        duress_responses.push(outcome.response());

        let wrong = random_wrong_pin(&mut rng);
        let started = Instant::now();
        let outcome = module.verify(&wrong).unwrap();
        wrong_times.push(started.elapsed());
        assert!(matches!(outcome, PinOutcome::NoMatch { .. }));
        wrong_responses.push(outcome.response());
    }

    assert!(duress_responses.iter().all(|r| *r == PinResponse::rejected()));
    assert_eq!(duress_responses, wrong_responses);

    let seen = presenter.seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 1000);
    assert!(seen.iter().all(|r| *r == PinResponse::rejected()));

    let duress_median = median(duress_times).as_secs_f64();
    let wrong_median = median(wrong_times).as_secs_f64();
    let ratio = duress_median / wrong_median;
    assert!(
        (0.5..2.0).contains(&ratio),
        "duress median {:?}s vs wrong median {:?}s",
        duress_median,
        wrong_median
    );

    // The out-of-band reports exist
    module.settle(Duration::from_millis(200)).await;
    let reports = sink.reports();
    assert_eq!(reports.len(), 500);
    assert!(reports.iter().all(|r| r.is_silent));
}

// =============================================================================
// Lockout
// =============================================================================

#[tokio::test]
async fn test_lockout_blocks_real_pin_until_expiry() {
    let module = DuressAuthModule::new(
        Arc::new(MemorySecretStore::new()),
        Arc::new(MemorySink::new()),
        settings(Duration::from_millis(300)),
    );
    module.enroll(REAL, DURESS).unwrap();

    for expected_remaining in (1..=4).rev() {
        assert_eq!(
            module.verify("0000").unwrap(),
            PinOutcome::NoMatch {
                remaining_attempts: expected_remaining
            }
        );
    }
    let fifth = module.verify("0000").unwrap();
    assert!(matches!(fifth, PinOutcome::Locked { .. }));
    assert!(matches!(fifth.response(), PinResponse::Locked { .. }));

    // Even the real PIN is refused while locked
    assert!(matches!(module.verify(REAL).unwrap(), PinOutcome::Locked { .. }));
    assert!(matches!(module.verify(DURESS).unwrap(), PinOutcome::Locked { .. }));

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert_eq!(module.verify(REAL).unwrap(), PinOutcome::Authenticated);
    assert_eq!(module.attempt_state().consecutive_failures, 0);
}

// =============================================================================
// Enrollment
// =============================================================================

#[tokio::test]
async fn test_file_enrollment_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wayguard-secrets.json");

    {
        let module = DuressAuthModule::new(
            Arc::new(FileSecretStore::open(&path).unwrap()),
            Arc::new(MemorySink::new()),
            settings(Duration::from_secs(30)),
        );
        assert_err!(module.verify(REAL));
        assert_err!(module.enroll(REAL, REAL));
        assert_ok!(module.enroll(REAL, DURESS));
    }

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains(REAL));
    assert!(!raw.contains(DURESS));
    assert!(raw.contains("real_pin"));
    assert!(raw.contains("coercion_pin"));

    let module = DuressAuthModule::new(
        Arc::new(FileSecretStore::open(&path).unwrap()),
        Arc::new(MemorySink::new()),
        settings(Duration::from_secs(30)),
    );
    assert!(assert_ok!(module.is_enrolled()));
    assert_eq!(assert_ok!(module.verify(REAL)), PinOutcome::Authenticated);
}
