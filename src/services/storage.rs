use s3::creds::Credentials;
use s3::{Bucket, Region};
use uuid::Uuid;

/// A durable blob reference returned by an upload.
#[derive(Debug, Clone)]
pub struct StoredImage {
    pub key: String,
    pub url: String,
}

/// Client for the S3-compatible image blob store.
pub struct BlobStore {
    bucket: Box<Bucket>,
    public_base: String,
}

impl BlobStore {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials = Credentials::new(Some(access_key), Some(secret_key), None, None, None)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            bucket,
            public_base: format!("{}/{}", endpoint.trim_end_matches('/'), bucket_name),
        })
    }

    /// Upload raw image bytes under a freshly minted key.
    ///
    /// Non-image content types are rejected before touching the
    /// upstream store.
    pub async fn upload_image(
        &self,
        data: &[u8],
        content_type: &str,
    ) -> Result<StoredImage, StorageError> {
        let extension = match content_type {
            "image/jpeg" => "jpg",
            "image/png" => "png",
            "image/webp" => "webp",
            other => return Err(StorageError::UnsupportedContentType(other.to_string())),
        };

        let key = format!("uploads/{}.{extension}", Uuid::new_v4());

        self.bucket
            .put_object_with_content_type(&key, data, content_type)
            .await
            .map_err(StorageError::S3)?;

        let url = format!("{}/{key}", self.public_base);
        Ok(StoredImage { key, url })
    }

    /// Download image bytes by key.
    pub async fn download(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        Ok(response.to_vec())
    }

    /// Delete an object.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.bucket.delete_object(key).await.map_err(StorageError::S3)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Storage configuration error: {0}")]
    Config(String),

    #[error("Unsupported content type for image upload: {0}")]
    UnsupportedContentType(String),
}
