use axum::extract::{Multipart, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use garde::Validate;
use image::ImageFormat;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::db::queries;
use crate::models::job::JobStatus;
use crate::models::submission::{JobStatusResponse, SubmitResponse, YieldInputs};
use crate::routes::error::{ApiError, ApiResult};
use crate::services::queue::QueuedJob;

/// Multipart fields accepted by the submission endpoint.
const FIELD_FARM_ID: &str = "farm_id";
const FIELD_PLANT_IMAGE: &str = "plant_image";
const FIELD_MASK_IMAGE: &str = "mask_image";
const FIELD_NDVI: &str = "ndvi";
const FIELD_WEATHER: &str = "weather";
const FIELD_HISTORICAL_YIELD: &str = "historical_yield";

fn content_type_for(data: &[u8]) -> ApiResult<&'static str> {
    let format = image::guess_format(data).map_err(|_| {
        ApiError::UnsupportedMediaType("uploaded file is not a recognized image".to_string())
    })?;

    match format {
        ImageFormat::Jpeg => Ok("image/jpeg"),
        ImageFormat::Png => Ok("image/png"),
        ImageFormat::WebP => Ok("image/webp"),
        other => Err(ApiError::UnsupportedMediaType(format!(
            "unsupported image format: {other:?}"
        ))),
    }
}

/// POST /api/v1/inference — accept an image-analysis job.
///
/// Uploads the image(s) to the blob store, creates a PENDING job row,
/// enqueues the work and answers 202 immediately; processing happens
/// asynchronously in the worker.
pub async fn submit_inference(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut farm_id: Option<Uuid> = None;
    let mut plant_image: Option<Vec<u8>> = None;
    let mut mask_image: Option<Vec<u8>> = None;
    let mut inputs = YieldInputs::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("malformed multipart body".to_string()))?
    {
        match field.name() {
            Some(FIELD_FARM_ID) => {
                let text = field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("unreadable farm_id field".to_string()))?;
                let parsed = text.trim().parse::<Uuid>().map_err(|_| {
                    ApiError::BadRequest("farm_id must be a valid UUID".to_string())
                })?;
                farm_id = Some(parsed);
            }
            Some(FIELD_PLANT_IMAGE) => {
                let data = field.bytes().await.map_err(|_| {
                    ApiError::BadRequest("unreadable plant_image upload".to_string())
                })?;
                plant_image = Some(data.to_vec());
            }
            Some(FIELD_MASK_IMAGE) => {
                let data = field.bytes().await.map_err(|_| {
                    ApiError::BadRequest("unreadable mask_image upload".to_string())
                })?;
                mask_image = Some(data.to_vec());
            }
            // Optional yield inputs: unparseable values fall back to
            // the pipeline defaults rather than rejecting the job.
            Some(FIELD_NDVI) => {
                inputs.ndvi = field.text().await.ok().and_then(|t| t.trim().parse().ok());
            }
            Some(FIELD_WEATHER) => {
                inputs.weather = field
                    .text()
                    .await
                    .ok()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty());
            }
            Some(FIELD_HISTORICAL_YIELD) => {
                inputs.historical_yield =
                    field.text().await.ok().and_then(|t| t.trim().parse().ok());
            }
            _ => {}
        }
    }

    let farm_id =
        farm_id.ok_or_else(|| ApiError::BadRequest("farm_id is required".to_string()))?;
    let plant_image = plant_image
        .ok_or_else(|| ApiError::BadRequest("plant_image file is required".to_string()))?;

    inputs
        .validate()
        .map_err(|report| ApiError::BadRequest(format!("invalid yield inputs: {report}")))?;

    let plant_content_type = content_type_for(&plant_image)?;
    let mask_content_type = mask_image.as_deref().map(content_type_for).transpose()?;

    // Identity comes from the auth layer in front of this service.
    let submitted_by = headers
        .get("x-user-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let primary = state
        .storage
        .upload_image(&plant_image, plant_content_type)
        .await?;

    let mask = match (mask_image, mask_content_type) {
        (Some(bytes), Some(content_type)) => {
            Some(state.storage.upload_image(&bytes, content_type).await?)
        }
        _ => None,
    };

    let job = queries::create_job(
        &state.db,
        farm_id,
        &submitted_by,
        &primary.key,
        mask.as_ref().map(|m| m.key.as_str()),
    )
    .await?;

    let message = QueuedJob::new(
        job.id,
        primary.key.clone(),
        mask.map(|m| m.key),
        inputs,
    );
    state.queue.enqueue(&message).await?;
    queries::set_queue_message(&state.db, job.id, message.message_id).await?;

    metrics::counter!("inference_jobs_submitted").increment(1);
    tracing::info!(
        job_id = %job.id,
        farm_id = %farm_id,
        submitted_by = %submitted_by,
        primary_url = %primary.url,
        has_mask = message.mask_image_key.is_some(),
        "Inference job accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: job.id,
            status: JobStatus::Pending,
            message: "Image submitted for processing. Poll the status endpoint for results."
                .to_string(),
        }),
    ))
}

/// GET /api/v1/inference/{job_id} — poll job status.
///
/// `result` is only ever populated for COMPLETED jobs.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job = queries::get_job(&state.db, job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("inference job not found".to_string()))?;

    let result = if job.status == JobStatus::Completed {
        job.result
    } else {
        None
    };

    Ok(Json(JobStatusResponse {
        job_id: job.id,
        status: job.status,
        result,
        error: job.error,
    }))
}
