use reqwest::multipart;
use serde_json::Value;
use std::time::Duration;

use crate::models::result::{StageName, StageResult, YieldRequest};

/// Segmentation and yield models run full-image passes and can take
/// minutes; classification is a single forward pass.
const SEGMENTATION_TIMEOUT: Duration = Duration::from_secs(180);
const CLASSIFICATION_TIMEOUT: Duration = Duration::from_secs(30);
const YIELD_TIMEOUT: Duration = Duration::from_secs(180);

/// Longest upstream error body carried into a stage error message.
const ERROR_BODY_MAX_CHARS: usize = 200;

/// Alternate field spellings seen across deployments of the upstream
/// models, probed when the canonical key is absent.
const SEGMENTATION_ALIASES: &[(&str, &str)] = &[
    ("healthy_area", "healthyArea"),
    ("weed_area", "weedArea"),
    ("soil_area", "soilArea"),
];

const CLASSIFICATION_ALIASES: &[(&str, &str)] = &[
    ("crop_type", "cropType"),
    ("disease_class", "diseaseClass"),
];

const YIELD_ALIASES: &[(&str, &str)] = &[
    ("predicted_yield", "predictedYield"),
    ("predicted_yield", "prediction"),
];

/// The three stage calls the orchestrator drives.
///
/// Every expected failure mode (transport error, timeout, non-2xx,
/// unparseable body) comes back as the error arm of [`StageResult`],
/// never as an `Err`; the continue-on-stage-failure policy upstream
/// relies on that.
pub trait InferenceApi {
    fn segment(
        &self,
        plant_image: &[u8],
        mask_image: Option<&[u8]>,
    ) -> impl std::future::Future<Output = StageResult> + Send;

    fn classify(&self, plant_image: &[u8]) -> impl std::future::Future<Output = StageResult> + Send;

    fn predict_yield(
        &self,
        request: &YieldRequest,
    ) -> impl std::future::Future<Output = StageResult> + Send;
}

/// HTTP client for the three external inference services.
pub struct InferenceClient {
    http: reqwest::Client,
    segmentation_url: String,
    classification_url: String,
    yield_url: String,
}

impl InferenceClient {
    pub fn new(
        segmentation_url: String,
        classification_url: String,
        yield_url: String,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("agrisense-backend/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            segmentation_url,
            classification_url,
            yield_url,
        })
    }

    /// Send a prepared request and translate the response into a
    /// [`StageResult`], normalizing known field aliases on success.
    async fn execute(
        &self,
        stage: StageName,
        request: reqwest::RequestBuilder,
        aliases: &[(&str, &str)],
    ) -> StageResult {
        let response = match request.send().await {
            Ok(response) => response,
            Err(err) if err.is_timeout() => {
                return StageResult::failure(stage, format!("request timed out: {err}"), None);
            }
            Err(err) => {
                return StageResult::failure(stage, format!("transport error: {err}"), None);
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return StageResult::failure(
                stage,
                format!(
                    "upstream returned {status}: {}",
                    truncate_chars(&body, ERROR_BODY_MAX_CHARS)
                ),
                Some(status.as_u16()),
            );
        }

        match response.json::<Value>().await {
            Ok(mut body) => {
                normalize_fields(&mut body, aliases);
                StageResult::success(stage, body)
            }
            Err(err) => StageResult::failure(
                stage,
                format!("invalid JSON in upstream response: {err}"),
                Some(status.as_u16()),
            ),
        }
    }
}

impl InferenceApi for InferenceClient {
    /// Field segmentation over the primary image, with the auxiliary
    /// mask attached when the caller supplied one.
    async fn segment(&self, plant_image: &[u8], mask_image: Option<&[u8]>) -> StageResult {
        let mut form = multipart::Form::new().part(
            "plant_image",
            multipart::Part::bytes(plant_image.to_vec()).file_name("plant_image"),
        );
        if let Some(mask) = mask_image {
            form = form.part(
                "mask_image",
                multipart::Part::bytes(mask.to_vec()).file_name("mask_image"),
            );
        }

        let request = self
            .http
            .post(&self.segmentation_url)
            .multipart(form)
            .timeout(SEGMENTATION_TIMEOUT);

        self.execute(StageName::Segmentation, request, SEGMENTATION_ALIASES)
            .await
    }

    /// Disease classification over the primary image alone.
    async fn classify(&self, plant_image: &[u8]) -> StageResult {
        let form = multipart::Form::new().part(
            "file",
            multipart::Part::bytes(plant_image.to_vec()).file_name("plant_image"),
        );

        let request = self
            .http
            .post(&self.classification_url)
            .multipart(form)
            .timeout(CLASSIFICATION_TIMEOUT);

        self.execute(StageName::Classification, request, CLASSIFICATION_ALIASES)
            .await
    }

    /// Yield prediction from the assembled payload.
    async fn predict_yield(&self, request: &YieldRequest) -> StageResult {
        let request = self
            .http
            .post(&self.yield_url)
            .json(request)
            .timeout(YIELD_TIMEOUT);

        self.execute(StageName::Yield, request, YIELD_ALIASES).await
    }
}

/// Copy aliased keys onto their canonical names so orchestration only
/// ever reads one spelling. An existing canonical key always wins.
fn normalize_fields(body: &mut Value, aliases: &[(&str, &str)]) {
    let Some(map) = body.as_object_mut() else {
        return;
    };

    for (canonical, alias) in aliases {
        if !map.contains_key(*canonical) {
            if let Some(value) = map.get(*alias).cloned() {
                map.insert((*canonical).to_string(), value);
            }
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aliased_keys_are_copied_to_canonical_names() {
        let mut body = json!({"healthyArea": 0.6, "weedArea": 0.3, "soil_area": 0.1});
        normalize_fields(&mut body, SEGMENTATION_ALIASES);

        assert_eq!(body["healthy_area"], 0.6);
        assert_eq!(body["weed_area"], 0.3);
        assert_eq!(body["soil_area"], 0.1);
        // Aliases are left in place; the payload stays a faithful copy.
        assert_eq!(body["healthyArea"], 0.6);
    }

    #[test]
    fn canonical_key_wins_over_alias() {
        let mut body = json!({"crop_type": "potato", "cropType": "maize"});
        normalize_fields(&mut body, CLASSIFICATION_ALIASES);
        assert_eq!(body["crop_type"], "potato");
    }

    #[test]
    fn second_alias_is_probed_for_yield() {
        let mut body = json!({"prediction": 950.0});
        normalize_fields(&mut body, YIELD_ALIASES);
        assert_eq!(body["predicted_yield"], 950.0);
    }

    #[test]
    fn non_object_bodies_pass_through_unchanged() {
        let mut body = json!([1, 2, 3]);
        normalize_fields(&mut body, SEGMENTATION_ALIASES);
        assert_eq!(body, json!([1, 2, 3]));
    }

    #[test]
    fn error_bodies_are_truncated_on_char_boundaries() {
        let long = "é".repeat(500);
        let truncated = truncate_chars(&long, ERROR_BODY_MAX_CHARS);
        assert_eq!(truncated.chars().count(), ERROR_BODY_MAX_CHARS);
    }
}
