use crate::config::ApiConfig;
use crate::credentials::CredentialInjector;
use crate::error::TelemetryError;
use crate::object_store::ClientFactory;
use crate::request::TelemetryRequest;
use crate::upload::UploadPipeline;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

/// Header naming the device a payload came from
pub const DEVICE_NAME_HEADER: &str = "device_name";

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub injector: CredentialInjector,
    pub client_factory: Arc<dyn ClientFactory>,
    pub pipeline: UploadPipeline,
}

/// Register descriptions for every metric the service emits
pub fn describe_metrics() {
    metrics::describe_counter!("telemetry.uploads.succeeded", "Telemetry payloads stored");
    metrics::describe_counter!(
        "telemetry.uploads.failed",
        "Telemetry requests rejected, by error kind"
    );
    metrics::describe_counter!(
        "telemetry.bytes.uploaded",
        metrics::Unit::Bytes,
        "Payload bytes written to the object store"
    );
    metrics::describe_histogram!(
        "telemetry.upload.duration_seconds",
        metrics::Unit::Seconds,
        "End to end latency of successful uploads"
    );
    metrics::describe_counter!(
        "telemetry.secrets.lookup_failed",
        "Credential secrets that could not be resolved"
    );
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/minio", post(upload_telemetry))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "telemetry-service"
    }))
}

/// Persist one telemetry payload to the object store
///
/// Every failure is a 400 whose body is the error message; success is an
/// empty 200.
#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn upload_telemetry(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, TelemetryError> {
    let started = Instant::now();

    match handle_upload(&state, &headers, &body).await {
        Ok(size) => {
            metrics::counter!("telemetry.uploads.succeeded").increment(1);
            metrics::counter!("telemetry.bytes.uploaded").increment(size);
            metrics::histogram!("telemetry.upload.duration_seconds")
                .record(started.elapsed().as_secs_f64());
            Ok(StatusCode::OK)
        }
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Telemetry upload failed");
            metrics::counter!("telemetry.uploads.failed", "kind" => e.kind()).increment(1);
            Err(e)
        }
    }
}

/// Received -> Parsed -> CredentialsInjected -> ClientBuilt -> Uploaded
async fn handle_upload(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<u64, TelemetryError> {
    debug!(size_bytes = body.len(), "Telemetry request received");

    let TelemetryRequest {
        minio_setting,
        raw_data,
    } = TelemetryRequest::from_slice(body)?;

    let mut settings = minio_setting.ok_or_else(TelemetryError::missing_settings)?;
    settings.target()?;

    state.injector.inject(Some(&mut settings)).await;

    let target = settings.target()?;
    let (access_id, access_key) = settings
        .credentials()
        .ok_or(TelemetryError::MissingCredentials)?;
    let store = state
        .client_factory
        .build(target.end_point, access_id, access_key)?;

    let device_name = headers
        .get(DEVICE_NAME_HEADER)
        .and_then(|v| v.to_str().ok());
    let key = settings.object_key(device_name, Utc::now())?;

    state
        .pipeline
        .upload_object(store.as_ref(), target.bucket, &key, &raw_data)
        .await
}

/// Start the telemetry API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting telemetry API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{PASSWORD_SECRET_FIELD, USERNAME_SECRET_FIELD};
    use crate::object_store::{ObjectStore, S3ClientFactory};
    use crate::secrets::{SecretResolver, StaticSecretStore};
    use async_trait::async_trait;
    use aws_sdk_s3::primitives::ByteStream;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[test]
    fn test_metrics_are_described() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            metrics::counter!("telemetry.uploads.succeeded").increment(1);
        });

        let rendered = handle.render();
        assert!(
            rendered.contains("# HELP telemetry_uploads_succeeded Telemetry payloads stored"),
            "{rendered}"
        );
    }

    #[derive(Default)]
    struct FakeStore {
        puts: Mutex<Vec<(String, String, Vec<u8>)>>,
        fail: bool,
    }

    #[async_trait]
    impl ObjectStore for FakeStore {
        async fn put_object(
            &self,
            bucket: &str,
            key: &str,
            body: ByteStream,
            _content_length: u64,
            _content_type: &str,
        ) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("upload object fail");
            }
            let body = body.collect().await?.into_bytes().to_vec();
            self.puts
                .lock()
                .unwrap()
                .push((bucket.to_string(), key.to_string(), body));
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeFactory {
        store: Arc<FakeStore>,
        built: Mutex<Vec<(String, String, String)>>,
    }

    impl ClientFactory for FakeFactory {
        fn build(
            &self,
            endpoint: &str,
            access_id: &str,
            access_key: &str,
        ) -> Result<Arc<dyn ObjectStore>, TelemetryError> {
            self.built.lock().unwrap().push((
                endpoint.to_string(),
                access_id.to_string(),
                access_key.to_string(),
            ));
            let store: Arc<dyn ObjectStore> = self.store.clone();
            Ok(store)
        }
    }

    struct Harness {
        router: Router,
        factory: Arc<FakeFactory>,
        staging: TempDir,
    }

    fn harness_with(store: FakeStore, factory: Option<Arc<dyn ClientFactory>>) -> Harness {
        let secrets = StaticSecretStore::default().with_secret(
            "minio-creds",
            [
                (USERNAME_SECRET_FIELD, "secret-id"),
                (PASSWORD_SECRET_FIELD, "secret-key"),
            ],
        );
        let fake = Arc::new(FakeFactory {
            store: Arc::new(store),
            ..Default::default()
        });
        let staging = TempDir::new().unwrap();
        let state = AppState {
            injector: CredentialInjector::new(SecretResolver::new(Arc::new(secrets))),
            client_factory: factory.unwrap_or_else(|| fake.clone() as Arc<dyn ClientFactory>),
            pipeline: UploadPipeline::new(staging.path()),
        };

        Harness {
            router: create_router(state, &ApiConfig::default()),
            factory: fake,
            staging,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeStore::default(), None)
    }

    async fn post(router: &Router, body: Body, device_name: Option<&str>) -> (StatusCode, String) {
        let mut request = Request::builder().method("POST").uri("/minio");
        if let Some(device) = device_name {
            request = request.header(DEVICE_NAME_HEADER, device);
        }
        let response = router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    fn json_body(value: serde_json::Value) -> Body {
        Body::from(serde_json::to_vec(&value).unwrap())
    }

    fn full_setting() -> serde_json::Value {
        serde_json::json!({
            "bucket": "test-bucket",
            "end_point": "test-end-point",
            "file_extension": "test-extension",
            "api_id": "APIId",
            "api_key": "APIKey"
        })
    }

    #[tokio::test]
    async fn test_body_is_not_json() {
        let h = harness();
        let (status, body) = post(&h.router, Body::empty(), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Unexpected end of JSON input\n");
    }

    #[tokio::test]
    async fn test_missing_parameter() {
        let h = harness();
        let request = serde_json::json!({ "minio_setting": { "bucket": "test-bucket" } });
        let (status, body) = post(&h.router, json_body(request), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Bucket or EndPoint or FileExtension cant be nil\n");
    }

    #[tokio::test]
    async fn test_missing_setting() {
        let h = harness();
        let request = serde_json::json!({ "raw_data": "dGVzdA==" });
        let (status, body) = post(&h.router, json_body(request), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Bucket or EndPoint or FileExtension cant be nil\n");
    }

    #[tokio::test]
    async fn test_no_secret() {
        let h = harness();
        let request = serde_json::json!({
            "minio_setting": {
                "bucket": "test-bucket",
                "end_point": "test-end-point",
                "file_extension": "test-extension"
            },
            "raw_data": "dGVzdA=="
        });
        let (status, body) = post(&h.router, json_body(request), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Fail to get APIId or APIKey\n");
        assert!(h.factory.built.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_secret_degrades_to_missing_credentials() {
        let h = harness();
        let mut setting = full_setting();
        setting["api_id"] = serde_json::Value::Null;
        setting["secret"] = "absent".into();
        let request = serde_json::json!({ "minio_setting": setting, "raw_data": "dGVzdA==" });
        let (status, body) = post(&h.router, json_body(request), Some("test-device")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Fail to get APIId or APIKey\n");
    }

    #[tokio::test]
    async fn test_no_device_name() {
        let h = harness();
        let request = serde_json::json!({ "minio_setting": full_setting(), "raw_data": "dGVzdA==" });
        let (status, body) = post(&h.router, json_body(request), None).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Fail to get device name from header\n");
    }

    #[tokio::test]
    async fn test_upload_failure_is_reported_verbatim() {
        let h = harness_with(
            FakeStore {
                fail: true,
                ..Default::default()
            },
            None,
        );
        let request = serde_json::json!({ "minio_setting": full_setting(), "raw_data": "dGVzdA==" });
        let (status, body) = post(&h.router, json_body(request), Some("test-device")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, "Upload object error: upload object fail\n");
        assert_eq!(std::fs::read_dir(h.staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_with_secret_credentials() {
        let h = harness();
        let request = serde_json::json!({
            "minio_setting": {
                "bucket": "test-bucket",
                "end_point": "minio:9000",
                "file_name": "reading",
                "file_extension": "bin",
                "api_id": "stale",
                "secret": "minio-creds"
            },
            "raw_data": "dGVzdA=="
        });
        let (status, body) = post(&h.router, json_body(request), None).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());
        assert_eq!(
            h.factory.built.lock().unwrap().as_slice(),
            &[(
                "minio:9000".to_string(),
                "secret-id".to_string(),
                "secret-key".to_string()
            )]
        );
        assert_eq!(
            h.factory.store.puts.lock().unwrap().as_slice(),
            &[(
                "test-bucket".to_string(),
                "reading.bin".to_string(),
                b"test".to_vec()
            )]
        );
        assert_eq!(std::fs::read_dir(h.staging.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_key_derived_from_device_name() {
        let h = harness();
        let request = serde_json::json!({ "minio_setting": full_setting() });
        let (status, _) = post(&h.router, json_body(request), Some("test-device")).await;

        assert_eq!(status, StatusCode::OK);
        let puts = h.factory.store.puts.lock().unwrap();
        assert_eq!(puts.len(), 1);
        assert!(puts[0].1.starts_with("test-device/"));
        assert!(puts[0].1.ends_with(".test-extension"));
        assert!(puts[0].2.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_endpoint_fails_client_construction() {
        let factory: Arc<dyn ClientFactory> =
            Arc::new(S3ClientFactory::new(&Default::default()));
        let h = harness_with(FakeStore::default(), Some(factory));
        let mut setting = full_setting();
        setting["end_point"] = "bad host:9000".into();
        let request = serde_json::json!({ "minio_setting": setting, "raw_data": "dGVzdA==" });
        let (status, body) = post(&h.router, json_body(request), Some("test-device")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.starts_with("Fail to create client"), "{body}");
        assert!(body.ends_with('\n'));
        assert_eq!(body.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = harness();
        let response = h
            .router
            .clone()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
