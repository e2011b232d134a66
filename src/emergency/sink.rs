//! Emergency report delivery

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::report::EmergencyReport;
use crate::transport::{Backoff, BackoffPolicy};
use crate::types::{Result, WayguardError};

/// Path of the SOS endpoint under the API base URL
pub const SOS_PATH: &str = "/emergencies/sos";

/// Destination for emergency reports
#[async_trait]
pub trait EmergencySink: Send + Sync + 'static {
    /// Deliver one report. One call, one attempt.
    async fn submit(&self, report: &EmergencyReport) -> Result<()>;
}

/// Posts reports to the alerting service
pub struct HttpEmergencySink {
    client: reqwest::Client,
    url: String,
    auth_token: Option<String>,
}

impl HttpEmergencySink {
    pub fn new(api_base: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WayguardError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}{}", api_base.trim_end_matches('/'), SOS_PATH),
            auth_token,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EmergencySink for HttpEmergencySink {
    async fn submit(&self, report: &EmergencyReport) -> Result<()> {
        let mut request = self.client.post(&self.url).json(&report.body());
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        // Resending the same body will not fix a client error
        if status.is_client_error()
            && status != reqwest::StatusCode::REQUEST_TIMEOUT
            && status != reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            return Err(WayguardError::Rejected(format!(
                "{} responded with {}",
                self.url, status
            )));
        }
        if !status.is_success() {
            return Err(WayguardError::Emergency(format!(
                "{} responded with {}",
                self.url, status
            )));
        }
        Ok(())
    }
}

/// Keeps reports in memory. Used for dry runs and tests.
#[derive(Default)]
pub struct MemorySink {
    reports: Mutex<Vec<EmergencyReport>>,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` submissions
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Delivered reports in arrival order
    pub fn reports(&self) -> Vec<EmergencyReport> {
        self.reports.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Submissions seen, failed ones included
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmergencySink for MemorySink {
    async fn submit(&self, report: &EmergencyReport) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(WayguardError::Emergency("simulated failure".into()));
        }

        self.reports
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(report.clone());
        Ok(())
    }
}

/// Bounded retry for explicit SOS submissions
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(500),
                max: Duration::from_secs(4),
                multiplier: 2.0,
                jitter: 0.0,
            },
        }
    }
}

/// Submit a report, retrying transient failures with short backoff.
///
/// Returns the number of attempts used, or the last error once the policy is
/// exhausted or the failure is not worth retrying.
pub async fn submit_with_retry(
    sink: &dyn EmergencySink,
    report: &EmergencyReport,
    policy: &RetryPolicy,
) -> Result<u32> {
    let mut backoff = Backoff::new(policy.backoff.clone());
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match sink.submit(report).await {
            Ok(()) => {
                info!(
                    report_id = %report.report_id,
                    attempts = attempt,
                    "Emergency report delivered"
                );
                return Ok(attempt);
            }
            Err(e) if attempt >= max_attempts || !e.is_transient() => {
                warn!(
                    report_id = %report.report_id,
                    attempts = attempt,
                    "Emergency report failed: {}",
                    e
                );
                return Err(WayguardError::Emergency(format!(
                    "not delivered after {} attempt(s): {}",
                    attempt, e
                )));
            }
            Err(e) => {
                let delay = backoff.next_delay();
                debug!("Emergency report attempt {} failed ({}), retrying in {:?}", attempt, e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: BackoffPolicy {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(4),
                multiplier: 2.0,
                jitter: 0.0,
            },
        }
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let sink = MemorySink::new();
        sink.fail_next(2);
        let report = EmergencyReport::explicit(None, None, "help");

        let attempts = submit_with_retry(&sink, &report, &quick_policy()).await.unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(sink.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted_surfaces_failure() {
        let sink = MemorySink::new();
        sink.fail_next(10);
        let report = EmergencyReport::explicit(None, None, "help");

        let result = submit_with_retry(&sink, &report, &quick_policy()).await;
        assert!(matches!(result, Err(WayguardError::Emergency(_))));
        assert_eq!(sink.attempts(), 3);
        assert!(sink.reports().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_reports_all_delivered() {
        let sink = std::sync::Arc::new(MemorySink::new());
        let a = EmergencyReport::explicit(Some("s".into()), None, "remote");
        let b = EmergencyReport::silent(None, "duress");

        let policy_a = quick_policy();
        let policy_b = quick_policy();
        let (ra, rb) = tokio::join!(
            submit_with_retry(sink.as_ref(), &a, &policy_a),
            submit_with_retry(sink.as_ref(), &b, &policy_b)
        );
        ra.unwrap();
        rb.unwrap();

        let reports = sink.reports();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().any(|r| r.is_silent));
        assert!(reports.iter().any(|r| !r.is_silent));
    }

    struct RejectingSink {
        attempts: AtomicU32,
    }

    #[async_trait]
    impl EmergencySink for RejectingSink {
        async fn submit(&self, _report: &EmergencyReport) -> Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(WayguardError::Rejected("400 Bad Request".into()))
        }
    }

    #[tokio::test]
    async fn test_rejected_report_is_not_retried() {
        let sink = RejectingSink {
            attempts: AtomicU32::new(0),
        };
        let report = EmergencyReport::explicit(None, None, "help");

        let result = submit_with_retry(&sink, &report, &quick_policy()).await;
        assert!(matches!(result, Err(WayguardError::Emergency(_))));
        assert_eq!(sink.attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_http_sink_url() {
        let sink =
            HttpEmergencySink::new("http://api.local/", None, Duration::from_secs(5)).unwrap();
        assert_eq!(sink.url(), "http://api.local/emergencies/sos");
    }
}
