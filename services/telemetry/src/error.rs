//! Error types for the telemetry ingestion path.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can terminate a telemetry upload request
///
/// The `Display` output of each variant is exactly what the caller sees in the
/// response body.
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Unexpected end of JSON input")]
    RequestDecode(#[source] serde_json::Error),

    #[error("{0}")]
    Configuration(String),

    #[error("Fail to get APIId or APIKey")]
    MissingCredentials,

    #[error("Fail to create client: {0}")]
    ClientConstruction(String),

    #[error("{context}: {source}")]
    StagingIo {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Upload object error: {0}")]
    RemoteUpload(String),
}

impl TelemetryError {
    pub fn missing_settings() -> Self {
        Self::Configuration("Bucket or EndPoint or FileExtension cant be nil".to_string())
    }

    pub fn missing_device_name() -> Self {
        Self::Configuration("Fail to get device name from header".to_string())
    }

    pub(crate) fn staging(context: &'static str) -> impl FnOnce(std::io::Error) -> Self {
        move |source| Self::StagingIo { context, source }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RequestDecode(_) => "request_decode",
            Self::Configuration(_) => "configuration",
            Self::MissingCredentials | Self::ClientConstruction(_) => "client_construction",
            Self::StagingIo { .. } => "staging_io",
            Self::RemoteUpload(_) => "remote_upload",
        }
    }
}

impl IntoResponse for TelemetryError {
    fn into_response(self) -> Response {
        // Single line, newline terminated, never more than the message itself
        let message = self.to_string().replace('\n', " ");
        (StatusCode::BAD_REQUEST, format!("{message}\n")).into_response()
    }
}
