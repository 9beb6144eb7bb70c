use sqlx::PgPool;
use std::sync::Arc;

use crate::services::{inference::InferenceClient, queue::JobQueue, storage::BlobStore};

/// Shared application state passed to route handlers and the worker.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub storage: Arc<BlobStore>,
    pub queue: Arc<JobQueue>,
    pub inference: Arc<InferenceClient>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        storage: BlobStore,
        queue: JobQueue,
        inference: InferenceClient,
    ) -> Self {
        Self {
            db,
            storage: Arc::new(storage),
            queue: Arc::new(queue),
            inference: Arc::new(inference),
        }
    }
}
