use crate::config::ObjectStoreConfig;
use crate::error::TelemetryError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Builder as S3ConfigBuilder, Credentials, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use axum::http::Uri;
use std::sync::Arc;
use tracing::debug;

/// Single-object write access to a bucketed object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `body` as `bucket/key`
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
        content_type: &str,
    ) -> Result<()>;
}

/// Builds a short-lived object store client per request
pub trait ClientFactory: Send + Sync {
    fn build(
        &self,
        endpoint: &str,
        access_id: &str,
        access_key: &str,
    ) -> Result<Arc<dyn ObjectStore>, TelemetryError>;
}

/// S3 API client bound to one endpoint and one static credential pair
pub struct S3ObjectStore {
    client: S3Client,
}

impl S3ObjectStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        content_length: u64,
        content_type: &str,
    ) -> Result<()> {
        let content_length =
            i64::try_from(content_length).context("Object too large for a single put")?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_length(content_length)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("{}", DisplayErrorContext(e)))?;

        Ok(())
    }
}

/// Client factory for S3-compatible stores (MinIO)
#[derive(Debug, Clone)]
pub struct S3ClientFactory {
    region: String,
    force_path_style: bool,
}

impl S3ClientFactory {
    pub fn new(config: &ObjectStoreConfig) -> Self {
        Self {
            region: config.region.clone(),
            force_path_style: config.force_path_style,
        }
    }

    /// Build the SDK client without touching the network
    pub fn build_client(
        &self,
        endpoint: &str,
        access_id: &str,
        access_key: &str,
    ) -> Result<S3Client, TelemetryError> {
        if access_id.is_empty() || access_key.is_empty() {
            return Err(TelemetryError::MissingCredentials);
        }

        let endpoint_url = normalize_endpoint(endpoint)?;
        let credentials = Credentials::new(access_id, access_key, None, None, "telemetry-secret");

        let s3_config = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .endpoint_url(&endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(self.force_path_style)
            // One attempt per upload, failures go straight back to the caller
            .retry_config(RetryConfig::disabled())
            .build();

        debug!(endpoint = %endpoint_url, region = %self.region, "Object store client created");

        Ok(S3Client::from_conf(s3_config))
    }
}

impl ClientFactory for S3ClientFactory {
    fn build(
        &self,
        endpoint: &str,
        access_id: &str,
        access_key: &str,
    ) -> Result<Arc<dyn ObjectStore>, TelemetryError> {
        let client = self.build_client(endpoint, access_id, access_key)?;
        Ok(Arc::new(S3ObjectStore::new(client)))
    }
}

/// Turn an endpoint into an absolute http(s) URL
///
/// Bare `host:port` endpoints are plain HTTP, like MinIO clients treat them.
fn normalize_endpoint(endpoint: &str) -> Result<String, TelemetryError> {
    let endpoint = endpoint.trim();
    let lower = endpoint.to_ascii_lowercase();
    let url = if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };

    let uri: Uri = url.parse().map_err(|e| {
        TelemetryError::ClientConstruction(format!("invalid endpoint {endpoint:?}: {e}"))
    })?;

    match uri.host() {
        Some(host) if !host.is_empty() => {}
        _ => {
            return Err(TelemetryError::ClientConstruction(format!(
                "invalid endpoint {endpoint:?}: missing host"
            )))
        }
    }

    if uri.path() != "/" && !uri.path().is_empty() {
        return Err(TelemetryError::ClientConstruction(format!(
            "invalid endpoint {endpoint:?}: endpoint must not contain a path"
        )));
    }

    Ok(url.trim_end_matches('/').to_string())
}
