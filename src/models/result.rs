use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// The three external inference calls that make up a pipeline run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageName {
    Segmentation,
    Classification,
    Yield,
}

/// Error recorded for a failed stage call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageError {
    pub message: String,
    /// Upstream HTTP status, when the failure came from a non-2xx response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
}

/// Exactly one of the two arms is populated for any stage attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Payload(serde_json::Value),
    Error(StageError),
}

/// The outcome of one external inference call.
///
/// Serializes as `{"stage": "...", "payload": {...}}` on success or
/// `{"stage": "...", "error": {...}}` on failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: StageName,
    #[serde(flatten)]
    pub outcome: StageOutcome,
}

impl StageResult {
    pub fn success(stage: StageName, payload: serde_json::Value) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Payload(payload),
        }
    }

    pub fn failure(
        stage: StageName,
        message: impl Into<String>,
        upstream_status: Option<u16>,
    ) -> Self {
        Self {
            stage,
            outcome: StageOutcome::Error(StageError {
                message: message.into(),
                upstream_status,
            }),
        }
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, StageOutcome::Payload(_))
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        match &self.outcome {
            StageOutcome::Payload(value) => Some(value),
            StageOutcome::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&StageError> {
        match &self.outcome {
            StageOutcome::Payload(_) => None,
            StageOutcome::Error(err) => Some(err),
        }
    }

    /// Numeric field from the success payload, if present.
    pub fn number_field(&self, key: &str) -> Option<f64> {
        self.payload()?.get(key)?.as_f64()
    }

    /// String field from the success payload, if present.
    pub fn string_field(&self, key: &str) -> Option<&str> {
        self.payload()?.get(key)?.as_str()
    }
}

/// Request body sent to the yield-prediction service.
///
/// Assembled from caller-supplied inputs plus the outputs of the
/// segmentation and classification stages (or their fallbacks).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct YieldRequest {
    pub crop_type: String,
    pub disease_class: String,
    pub ndvi: f64,
    pub weather: String,
    pub historical_yield: f64,
    pub healthy_area: f64,
    pub weed_area: f64,
    pub soil_area: f64,
}

/// Derived roll-up over the three stage outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateSummary {
    pub stages_attempted: u32,
    pub stages_failed: u32,
    /// Crop type the yield stage consumed (real or fallback).
    pub crop_type: String,
    /// Disease class the yield stage consumed (real or fallback).
    pub disease_class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicted_yield: Option<f64>,
}

/// The job's final result: all three stage outcomes plus the summary.
///
/// Error stages are carried verbatim; nothing is dropped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateResult {
    pub segmentation: StageResult,
    pub classification: StageResult,
    #[serde(rename = "yield")]
    pub yield_prediction: StageResult,
    pub summary: AggregateSummary,
}

impl AggregateResult {
    /// Build the aggregate once all three stages have been attempted.
    ///
    /// `consumed` is the request the yield stage was actually given, so
    /// the summary reflects the effective crop/disease values even when
    /// classification failed and fallbacks were used.
    pub fn from_stages(
        segmentation: StageResult,
        classification: StageResult,
        yield_prediction: StageResult,
        consumed: &YieldRequest,
    ) -> Self {
        let stages = [&segmentation, &classification, &yield_prediction];
        let stages_failed = stages.iter().filter(|s| !s.succeeded()).count() as u32;
        let predicted_yield = yield_prediction.number_field("predicted_yield");

        Self {
            segmentation,
            classification,
            yield_prediction,
            summary: AggregateSummary {
                stages_attempted: 3,
                stages_failed,
                crop_type: consumed.crop_type.clone(),
                disease_class: consumed.disease_class.clone(),
                predicted_yield,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn stage_result_serializes_payload_xor_error() {
        let ok = StageResult::success(StageName::Segmentation, json!({"healthy_area": 0.6}));
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["stage"], "segmentation");
        assert_eq!(value["payload"]["healthy_area"], 0.6);
        assert!(value.get("error").is_none());

        let failed = StageResult::failure(StageName::Yield, "upstream 502", Some(502));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["stage"], "yield");
        assert_eq!(value["error"]["upstream_status"], 502);
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn stage_result_roundtrips_through_json() {
        let original = StageResult::failure(StageName::Classification, "timed out", None);
        let back: StageResult =
            serde_json::from_value(serde_json::to_value(&original).unwrap()).unwrap();
        assert_eq!(back, original);
        assert!(!back.succeeded());
        assert_eq!(back.error().unwrap().upstream_status, None);
    }

    #[test]
    fn aggregate_counts_failed_stages_and_keeps_error_arms() {
        let seg = StageResult::success(
            StageName::Segmentation,
            json!({"healthy_area": 0.7, "weed_area": 0.2, "soil_area": 0.1}),
        );
        let cls = StageResult::failure(StageName::Classification, "bad gateway", Some(502));
        let yld = StageResult::success(StageName::Yield, json!({"predicted_yield": 812.5}));
        let consumed = YieldRequest {
            crop_type: "wheat".into(),
            disease_class: "blight".into(),
            ndvi: 0.8,
            weather: "moderate".into(),
            historical_yield: 1000.0,
            healthy_area: 0.7,
            weed_area: 0.2,
            soil_area: 0.1,
        };

        let aggregate = AggregateResult::from_stages(seg, cls, yld, &consumed);
        assert_eq!(aggregate.summary.stages_attempted, 3);
        assert_eq!(aggregate.summary.stages_failed, 1);
        assert_eq!(aggregate.summary.predicted_yield, Some(812.5));
        assert!(aggregate.classification.error().is_some());

        // The failed stage survives serialization alongside the successes.
        let value = serde_json::to_value(&aggregate).unwrap();
        assert_eq!(value["classification"]["error"]["upstream_status"], 502);
        assert_eq!(value["yield"]["payload"]["predicted_yield"], 812.5);
    }
}
