mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;
use services::{inference::InferenceClient, queue::JobQueue, storage::BlobStore};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing agrisense-backend server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!(
        "inference_jobs_submitted",
        "Total inference jobs accepted for processing"
    );
    metrics::describe_counter!(
        "inference_jobs_completed",
        "Total inference jobs that reached COMPLETED"
    );
    metrics::describe_counter!(
        "inference_jobs_failed",
        "Total inference jobs that reached FAILED"
    );
    metrics::describe_counter!(
        "inference_stage_failures",
        "Total individual stage failures, labeled by stage"
    );
    metrics::describe_gauge!(
        "inference_queue_depth",
        "Current number of pending jobs in the queue"
    );
    metrics::describe_histogram!(
        "inference_processing_seconds",
        "Time to process one inference job delivery"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize blob store client
    tracing::info!("Initializing blob store client");
    let storage = BlobStore::new(
        &config.blob_bucket,
        &config.blob_endpoint,
        &config.blob_access_key,
        &config.blob_secret_key,
    )
    .expect("Failed to initialize blob store client");

    // Initialize Redis job queue
    tracing::info!("Connecting to Redis job queue");
    let queue = JobQueue::new(&config.redis_url).expect("Failed to initialize job queue");

    // Initialize inference service client
    tracing::info!("Initializing inference service client");
    let inference = InferenceClient::new(
        config.segmentation_api_url.clone(),
        config.classification_api_url.clone(),
        config.yield_api_url.clone(),
    )
    .expect("Failed to initialize inference client");

    // Create shared application state
    let state = AppState::new(db_pool, storage, queue, inference);

    // Build API routes
    let app = Router::new()
        .route("/", get(|| async { "agrisense-backend is running" }))
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/inference", post(routes::inference::submit_inference))
        .route(
            "/api/v1/inference/{job_id}",
            get(routes::inference::get_job_status),
        )
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(20 * 1024 * 1024)); // 20 MB: primary image + optional mask

    tracing::info!("Starting agrisense-backend on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
