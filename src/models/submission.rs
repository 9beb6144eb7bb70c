use garde::Validate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::job::JobStatus;

/// Caller-supplied inputs forwarded to the yield-prediction stage.
///
/// Every field is optional; the orchestrator substitutes defaults for
/// anything absent or unparseable at submission time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, PartialEq)]
pub struct YieldInputs {
    /// Normalized difference vegetation index, 0.0 - 1.0.
    #[garde(range(min = 0.0, max = 1.0))]
    pub ndvi: Option<f64>,

    #[garde(length(min = 1, max = 64))]
    pub weather: Option<String>,

    #[garde(range(min = 0.0))]
    pub historical_yield: Option<f64>,
}

/// Response after accepting a job for asynchronous processing.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub message: String,
}

/// Response for querying job status.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobStatusResponse {
    pub job_id: Uuid,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
