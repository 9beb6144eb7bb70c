use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{InferenceJob, JobStatus};

const JOB_COLUMNS: &str = "id, farm_id, submitted_by, primary_image_key, mask_image_key, \
                           status, queue_message_id, result, error, created_at, updated_at";

fn parse_status(raw: &str) -> Result<JobStatus, sqlx::Error> {
    raw.parse()
        .map_err(|_| sqlx::Error::Decode(format!("unknown job status {raw:?}").into()))
}

fn map_job(row: &PgRow) -> Result<InferenceJob, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    Ok(InferenceJob {
        id: row.try_get("id")?,
        farm_id: row.try_get("farm_id")?,
        submitted_by: row.try_get("submitted_by")?,
        primary_image_key: row.try_get("primary_image_key")?,
        mask_image_key: row.try_get("mask_image_key")?,
        status: parse_status(&status_str)?,
        queue_message_id: row.try_get("queue_message_id")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

/// Insert a new inference job in `PENDING`.
pub async fn create_job(
    pool: &PgPool,
    farm_id: Uuid,
    submitted_by: &str,
    primary_image_key: &str,
    mask_image_key: Option<&str>,
) -> Result<InferenceJob, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO inference_jobs (farm_id, submitted_by, primary_image_key, mask_image_key)
        VALUES ($1, $2, $3, $4)
        RETURNING {JOB_COLUMNS}
        "#,
    ))
    .bind(farm_id)
    .bind(submitted_by)
    .bind(primary_image_key)
    .bind(mask_image_key)
    .fetch_one(pool)
    .await?;

    map_job(&row)
}

/// Get a job by ID.
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<InferenceJob>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {JOB_COLUMNS}
        FROM inference_jobs
        WHERE id = $1
        "#,
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(map_job).transpose()
}

/// Record the queue delivery correlated with this job.
///
/// The submission handler is the only caller, and only while the job
/// is still `PENDING`.
pub async fn set_queue_message(
    pool: &PgPool,
    job_id: Uuid,
    message_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE inference_jobs
        SET queue_message_id = $1, updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(message_id)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Conditional status advance: applies only if the job's current status
/// is one of `expected_prior`, and reports whether the update took
/// effect. Losing this race is how a redelivered message learns that
/// another delivery already owns (or finished) the job.
pub async fn try_advance_status(
    pool: &PgPool,
    job_id: Uuid,
    expected_prior: &[JobStatus],
    next: JobStatus,
) -> Result<bool, sqlx::Error> {
    let expected: Vec<String> = expected_prior.iter().map(|s| s.to_string()).collect();

    let outcome = sqlx::query(
        r#"
        UPDATE inference_jobs
        SET status = $1, updated_at = NOW()
        WHERE id = $2 AND status = ANY($3)
        "#,
    )
    .bind(next.to_string())
    .bind(job_id)
    .bind(&expected)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

/// Terminal success: status and result written in one statement, so a
/// reader can never observe `COMPLETED` with a missing result.
/// Conditional on the job still being `PROCESSING`.
pub async fn complete_job(
    pool: &PgPool,
    job_id: Uuid,
    result: &serde_json::Value,
) -> Result<bool, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        UPDATE inference_jobs
        SET status = 'COMPLETED', result = $1, updated_at = NOW()
        WHERE id = $2 AND status = 'PROCESSING'
        "#,
    )
    .bind(result)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}

/// Terminal failure for pipeline-setup errors. Conditional on the job
/// not already being terminal.
pub async fn fail_job(pool: &PgPool, job_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        UPDATE inference_jobs
        SET status = 'FAILED', error = $1, updated_at = NOW()
        WHERE id = $2 AND status IN ('PENDING', 'PROCESSING')
        "#,
    )
    .bind(error)
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}
