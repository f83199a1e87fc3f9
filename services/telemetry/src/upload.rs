use crate::error::TelemetryError;
use crate::object_store::ObjectStore;
use aws_sdk_s3::primitives::{ByteStream, Length};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

/// Content type of every uploaded telemetry object
pub const CONTENT_TYPE: &str = "application/octet-stream";

const STAGING_PREFIX: &str = "telemetry-";
const STAGING_SUFFIX: &str = ".staging";

/// Temporary file holding one payload for the duration of one upload
///
/// The file is removed when the guard drops, on every exit path.
struct StagingFile {
    file: Option<NamedTempFile>,
}

impl StagingFile {
    /// Create a randomly named file in `dir` on the blocking pool
    async fn create(dir: &Path) -> std::io::Result<Self> {
        let dir = dir.to_path_buf();
        let file = tokio::task::spawn_blocking(move || {
            tempfile::Builder::new()
                .prefix(STAGING_PREFIX)
                .suffix(STAGING_SUFFIX)
                .tempfile_in(dir)
        })
        .await
        .map_err(std::io::Error::other)??;
        Ok(Self { file: Some(file) })
    }

    fn path(&self) -> &Path {
        self.file
            .as_ref()
            .map(NamedTempFile::path)
            .unwrap_or_else(|| Path::new(""))
    }

    fn handle(&self) -> std::io::Result<tokio::fs::File> {
        match &self.file {
            Some(file) => Ok(tokio::fs::File::from_std(file.reopen()?)),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "staging file already released",
            )),
        }
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            // Single unlink, done inline so the file is gone once the guard drops
            match file.close() {
                Ok(()) => debug!(path = %path.display(), "Staging file removed"),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "Remove staging file fail"
                ),
            }
        }
    }
}

/// Stages payloads on local disk and uploads them as single objects
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    staging_dir: PathBuf,
}

impl UploadPipeline {
    pub fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
        }
    }

    /// Upload `content` to `bucket/key`
    ///
    /// The payload is written to a staging file first so the store receives a
    /// stream with an exact declared length.
    #[instrument(skip(self, store, content), fields(size_bytes = content.len()))]
    pub async fn upload_object(
        &self,
        store: &dyn ObjectStore,
        bucket: &str,
        key: &str,
        content: &[u8],
    ) -> Result<u64, TelemetryError> {
        let staging = StagingFile::create(&self.staging_dir)
            .await
            .map_err(TelemetryError::staging("Fail to create temp file"))?;

        let mut handle = staging
            .handle()
            .map_err(TelemetryError::staging("Fail to create temp file"))?;
        handle
            .write_all(content)
            .await
            .map_err(TelemetryError::staging("Fail to load file content"))?;
        handle
            .flush()
            .await
            .map_err(TelemetryError::staging("Fail to load file content"))?;

        let size = handle
            .metadata()
            .await
            .map_err(TelemetryError::staging("Fail to get file stat"))?
            .len();
        drop(handle);

        debug!(path = %staging.path().display(), size_bytes = size, "Payload staged");

        let body = ByteStream::read_from()
            .path(staging.path())
            .length(Length::Exact(size))
            .build()
            .await
            .map_err(|e| TelemetryError::StagingIo {
                context: "Fail to open staged file",
                source: std::io::Error::other(e),
            })?;

        store
            .put_object(bucket, key, body, size, CONTENT_TYPE)
            .await
            .map_err(|e| TelemetryError::RemoteUpload(format!("{e:#}")))?;

        info!(bucket = %bucket, key = %key, size_bytes = size, "Upload file success");

        Ok(size)
    }
}
