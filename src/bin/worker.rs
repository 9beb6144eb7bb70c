use agrisense_backend::{
    app_state::AppState,
    config::AppConfig,
    db,
    services::{
        inference::InferenceClient,
        orchestrator::{self, Disposition},
        queue::JobQueue,
        storage::BlobStore,
    },
};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting inference worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    // Initialize database
    tracing::info!("Connecting to PostgreSQL");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Initialize services
    tracing::info!("Initializing services");
    let storage = BlobStore::new(
        &config.blob_bucket,
        &config.blob_endpoint,
        &config.blob_access_key,
        &config.blob_secret_key,
    )
    .expect("Failed to initialize blob store client");

    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    let inference = InferenceClient::new(
        config.segmentation_api_url.clone(),
        config.classification_api_url.clone(),
        config.yield_api_url.clone(),
    )
    .expect("Failed to initialize inference client");

    let state = AppState::new(db_pool, storage, queue, inference);

    tracing::info!("Worker ready, starting job processing loop");

    // Main processing loop
    loop {
        match process_next_delivery(&state).await {
            Ok(true) => {
                // A delivery was handled, check for the next one immediately
                tracing::debug!("Delivery handled, checking for next job");
            }
            Ok(false) => {
                // No job available, sleep before next poll
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error talking to the queue, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}

/// Pull and handle the next queue delivery.
/// Returns Ok(true) if a delivery was handled, Ok(false) if the queue was empty.
async fn process_next_delivery(state: &AppState) -> Result<bool, Box<dyn std::error::Error>> {
    let message = match state.queue.dequeue().await? {
        Some(m) => m,
        None => return Ok(false),
    };

    tracing::info!(
        job_id = %message.job_id,
        message_id = %message.message_id,
        attempts = message.attempts,
        "Processing inference job delivery"
    );

    let started = Instant::now();
    let disposition = orchestrator::handle_delivery(
        &state.db,
        &state.storage,
        state.inference.as_ref(),
        &message,
    )
    .await;
    metrics::histogram!("inference_processing_seconds").record(started.elapsed().as_secs_f64());

    match disposition {
        Disposition::Ack => state.queue.ack(&message).await?,
        Disposition::Retry => {
            tracing::warn!(
                job_id = %message.job_id,
                message_id = %message.message_id,
                "Requesting redelivery"
            );
            state.queue.nack(&message).await?;
        }
    }

    if let Ok(depth) = state.queue.queue_depth().await {
        metrics::gauge!("inference_queue_depth").set(depth as f64);
    }

    Ok(true)
}
