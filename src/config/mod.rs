use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string for job queue
    pub redis_url: String,

    /// Blob store bucket name
    pub blob_bucket: String,

    /// Blob store access key ID (S3-compatible)
    pub blob_access_key: String,

    /// Blob store secret access key (S3-compatible)
    pub blob_secret_key: String,

    /// Blob store endpoint URL
    pub blob_endpoint: String,

    /// Segmentation model endpoint
    pub segmentation_api_url: String,

    /// Disease classification model endpoint
    pub classification_api_url: String,

    /// Yield prediction model endpoint
    pub yield_api_url: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
