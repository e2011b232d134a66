//! Emergency report model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::location::LocationSample;

/// Report severity as understood by the alerting service.
///
/// Every report this client raises is critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&LocationSample> for ReportLocation {
    fn from(sample: &LocationSample) -> Self {
        Self {
            latitude: sample.latitude,
            longitude: sample.longitude,
        }
    }
}

/// One emergency report, explicit or silent
#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyReport {
    pub report_id: Uuid,
    pub session_id: Option<String>,
    pub location: Option<ReportLocation>,
    pub description: String,
    pub severity: Severity,
    pub is_silent: bool,
    pub created_at: DateTime<Utc>,
}

impl EmergencyReport {
    /// Report raised knowingly by the user or the server
    pub fn explicit(
        session_id: Option<String>,
        location: Option<ReportLocation>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            report_id: Uuid::new_v4(),
            session_id,
            location,
            description: description.into(),
            severity: Severity::Critical,
            is_silent: false,
            created_at: Utc::now(),
        }
    }

    /// Report raised by the duress credential
    pub fn silent(location: Option<ReportLocation>, description: impl Into<String>) -> Self {
        Self {
            is_silent: true,
            ..Self::explicit(None, location, description)
        }
    }

    /// JSON body for `POST /emergencies/sos`
    pub fn body(&self) -> SosRequestBody<'_> {
        SosRequestBody {
            location: self.location,
            severity: self.severity,
            description: &self.description,
            is_silent: self.is_silent,
            session_id: self.session_id.as_deref(),
        }
    }
}

/// Wire body of an SOS submission
#[derive(Debug, Serialize)]
pub struct SosRequestBody<'a> {
    pub location: Option<ReportLocation>,
    pub severity: Severity,
    pub description: &'a str,
    pub is_silent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<&'a str>,
}
