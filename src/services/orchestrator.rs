use sqlx::PgPool;
use std::time::Duration;
use tokio::time::sleep;

use crate::db::queries;
use crate::models::job::JobStatus;
use crate::models::result::{AggregateResult, StageResult, YieldRequest};
use crate::models::submission::YieldInputs;
use crate::services::inference::InferenceApi;
use crate::services::queue::QueuedJob;
use crate::services::storage::BlobStore;

/// Fallback classification consumed by the yield stage when the
/// classifier did not produce usable output.
const DEFAULT_CROP_TYPE: &str = "wheat";
const DEFAULT_DISEASE_CLASS: &str = "blight";

/// Defaults for caller-supplied yield inputs left absent at submission.
const DEFAULT_NDVI: f64 = 0.8;
const DEFAULT_WEATHER: &str = "moderate";
const DEFAULT_HISTORICAL_YIELD: f64 = 1000.0;

const STORE_RETRY_ATTEMPTS: u32 = 3;
const STORE_RETRY_BASE_MS: u64 = 200;

/// What the worker should do with the queue delivery afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The delivery is finished (successfully or redundantly); remove it.
    Ack,
    /// Infrastructure trouble; leave the work for redelivery.
    Retry,
}

/// Drive one queue delivery through the full pipeline.
///
/// Safe under at-least-once delivery: the conditional
/// `PENDING -> PROCESSING` claim ensures only one delivery ever drives
/// the stages, and a redelivered message for a job that is already
/// claimed or terminal is re-acked without side effects.
pub async fn handle_delivery<C: InferenceApi>(
    db: &PgPool,
    storage: &BlobStore,
    inference: &C,
    message: &QueuedJob,
) -> Disposition {
    // Claim the job. Losing the conditional update means another
    // delivery owns it or it already reached a terminal state.
    let claimed = match with_backoff("claim job", || {
        queries::try_advance_status(
            db,
            message.job_id,
            &[JobStatus::Pending],
            JobStatus::Processing,
        )
    })
    .await
    {
        Ok(claimed) => claimed,
        Err(err) => {
            tracing::error!(job_id = %message.job_id, error = %err, "Job store unavailable while claiming");
            return Disposition::Retry;
        }
    };

    if !claimed {
        match queries::get_job(db, message.job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => tracing::info!(
                job_id = %message.job_id,
                status = %job.status,
                "Redundant delivery for terminal job, acking without side effects"
            ),
            Ok(Some(job)) => tracing::info!(
                job_id = %message.job_id,
                status = %job.status,
                "Redundant delivery for already-claimed job, acking without side effects"
            ),
            Ok(None) => tracing::warn!(
                job_id = %message.job_id,
                "Delivery references a job that does not exist, discarding"
            ),
            Err(err) => tracing::warn!(
                job_id = %message.job_id,
                error = %err,
                "Could not read job after losing claim, discarding delivery"
            ),
        }
        return Disposition::Ack;
    }

    // Resolve image bytes. An unreadable primary image makes all three
    // stages meaningless: terminal FAILED, no partial result.
    let primary_image = match storage.download(&message.primary_image_key).await {
        Ok(bytes) => bytes,
        Err(err) => {
            let reason = format!(
                "primary image {} could not be resolved: {err}",
                message.primary_image_key
            );
            tracing::error!(job_id = %message.job_id, error = %err, "Pipeline setup failed");
            metrics::counter!("inference_jobs_failed").increment(1);

            return match with_backoff("mark job failed", || {
                queries::fail_job(db, message.job_id, &reason)
            })
            .await
            {
                Ok(_) => Disposition::Ack,
                Err(store_err) => {
                    tracing::error!(job_id = %message.job_id, error = %store_err, "Job store unavailable while failing job");
                    Disposition::Retry
                }
            };
        }
    };

    // A mask that cannot be fetched degrades to a mask-less call; the
    // segmentation service decides whether that is acceptable.
    let mask_image = match &message.mask_image_key {
        Some(key) => match storage.download(key).await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                tracing::warn!(
                    job_id = %message.job_id,
                    mask_image_key = %key,
                    error = %err,
                    "Mask image could not be resolved, continuing without it"
                );
                None
            }
        },
        None => None,
    };

    let aggregate = run_stages(
        inference,
        &primary_image,
        mask_image.as_deref(),
        &message.yield_inputs,
    )
    .await;

    let result = match serde_json::to_value(&aggregate) {
        Ok(value) => value,
        Err(err) => {
            tracing::error!(job_id = %message.job_id, error = %err, "Aggregate result failed to serialize");
            return Disposition::Retry;
        }
    };

    // Status and result land in one conditional write so a reader can
    // never observe COMPLETED without its aggregate.
    match with_backoff("persist result", || {
        queries::complete_job(db, message.job_id, &result)
    })
    .await
    {
        Ok(true) => {
            tracing::info!(
                job_id = %message.job_id,
                stages_failed = aggregate.summary.stages_failed,
                "Inference job completed"
            );
            metrics::counter!("inference_jobs_completed").increment(1);
            Disposition::Ack
        }
        Ok(false) => {
            tracing::warn!(
                job_id = %message.job_id,
                "Job left PROCESSING before completion could be recorded, acking"
            );
            Disposition::Ack
        }
        Err(err) => {
            tracing::error!(job_id = %message.job_id, error = %err, "Job store unavailable while persisting result");
            Disposition::Retry
        }
    }
}

/// Attempt all three stages and aggregate their outcomes.
///
/// Segmentation and classification are independent and issued
/// concurrently; yield runs last because it consumes both of their
/// outputs. Stage failures are recorded, never propagated.
pub async fn run_stages<C: InferenceApi>(
    inference: &C,
    primary_image: &[u8],
    mask_image: Option<&[u8]>,
    inputs: &YieldInputs,
) -> AggregateResult {
    let (segmentation, classification) = tokio::join!(
        inference.segment(primary_image, mask_image),
        inference.classify(primary_image),
    );

    let request = build_yield_request(&segmentation, &classification, inputs);
    let yield_prediction = inference.predict_yield(&request).await;

    for stage in [&segmentation, &classification, &yield_prediction] {
        if let Some(err) = stage.error() {
            tracing::warn!(
                stage = %stage.stage,
                error = %err.message,
                upstream_status = ?err.upstream_status,
                "Stage attempt failed"
            );
            metrics::counter!("inference_stage_failures", "stage" => stage.stage.to_string())
                .increment(1);
        }
    }

    AggregateResult::from_stages(segmentation, classification, yield_prediction, &request)
}

/// Assemble the yield-stage payload from the earlier stages' outputs
/// and the caller-supplied inputs, substituting defaults for anything
/// missing.
fn build_yield_request(
    segmentation: &StageResult,
    classification: &StageResult,
    inputs: &YieldInputs,
) -> YieldRequest {
    YieldRequest {
        crop_type: classification
            .string_field("crop_type")
            .unwrap_or(DEFAULT_CROP_TYPE)
            .to_string(),
        disease_class: classification
            .string_field("disease_class")
            .unwrap_or(DEFAULT_DISEASE_CLASS)
            .to_string(),
        ndvi: inputs.ndvi.unwrap_or(DEFAULT_NDVI),
        weather: inputs
            .weather
            .clone()
            .unwrap_or_else(|| DEFAULT_WEATHER.to_string()),
        historical_yield: inputs.historical_yield.unwrap_or(DEFAULT_HISTORICAL_YIELD),
        healthy_area: segmentation.number_field("healthy_area").unwrap_or(0.0),
        weed_area: segmentation.number_field("weed_area").unwrap_or(0.0),
        soil_area: segmentation.number_field("soil_area").unwrap_or(0.0),
    }
}

/// Retry a job-store call with exponential backoff before giving the
/// delivery back to the queue.
async fn with_backoff<T, F, Fut>(what: &str, op: F) -> Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut delay = Duration::from_millis(STORE_RETRY_BASE_MS);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < STORE_RETRY_ATTEMPTS => {
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "{what} failed, retrying"
                );
                sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
