use std::sync::Arc;

use log::debug;
use url::Url;

use super::client::GcpClient;
use crate::error::{OcpciError, Result};

/// Cloud Storage JSON API client scoped to a single bucket.
pub struct StorageClient {
    gcp: Arc<GcpClient>,
    base_url: Url,
    bucket: String,
}

impl StorageClient {
    pub fn new(gcp: Arc<GcpClient>, base_url: &str, bucket: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| OcpciError::Config(format!("Invalid storage URL: {e}")))?;

        if base_url.cannot_be_a_base() {
            return Err(OcpciError::Config(format!(
                "Storage URL cannot be a base: {base_url}"
            )));
        }

        Ok(Self {
            gcp,
            base_url,
            bucket: bucket.to_string(),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// `.../storage/v1/b/{bucket}/o/{object}` with the object name encoded as
    /// a single path segment.
    fn object_url(&self, object: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "b", self.bucket.as_str(), "o", object]);
        }
        url
    }

    /// Returns whether `object` exists in the bucket.
    pub async fn exists(&self, object: &str) -> Result<bool> {
        let url = self.object_url(object);

        match self
            .gcp
            .execute(|c| c.get(url.clone()).query(&[("fields", "name")]))
            .await
        {
            Ok(_) => Ok(true),
            Err(OcpciError::NotFound(_)) => {
                debug!("gs://{}/{} does not exist", self.bucket, object);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Downloads the content of `object`.
    pub async fn download(&self, object: &str) -> Result<Vec<u8>> {
        let url = self.object_url(object);

        let response = self
            .gcp
            .execute(|c| c.get(url.clone()).query(&[("alt", "media")]))
            .await?;
        let bytes = response.bytes().await?;

        debug!(
            "Downloaded gs://{}/{} ({} bytes)",
            self.bucket,
            object,
            bytes.len()
        );

        Ok(bytes.to_vec())
    }

    /// Downloads `object` as text, replacing invalid UTF-8.
    pub async fn download_string(&self, object: &str) -> Result<String> {
        let bytes = self.download(object).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
