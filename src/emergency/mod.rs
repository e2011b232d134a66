//! Emergency reporting
//!
//! Both the explicit SOS path and the duress path write to an
//! [`EmergencySink`]. Submissions are independent; concurrent reports are all
//! delivered.

pub mod report;
pub mod sink;

pub use report::{EmergencyReport, ReportLocation, Severity, SosRequestBody};
pub use sink::{submit_with_retry, EmergencySink, HttpEmergencySink, MemorySink, RetryPolicy};
