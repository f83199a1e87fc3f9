//! Nier Telemetry Service
//!
//! Telemetry ingestion service for the Nier device platform. Devices post
//! payloads over HTTP together with the object store settings they should land
//! in; the service resolves object store credentials from the secret store,
//! builds a short-lived client and persists the payload as a single object.
//!
//! ## Architecture
//!
//! ```text
//!  POST /minio            Secret Store
//! ┌──────────────┐       ┌──────────────┐
//! │ Telemetry    │       │ {namespace}/ │
//! │ API          │       │   {secret}/  │
//! └──────────────┘       └──────────────┘
//!        │                      ▲
//!        ▼                      │
//! ┌──────────────┐       ┌──────────────┐
//! │ Credential   │──────▶│ Secret       │
//! │ Injector     │       │ Resolver     │
//! └──────────────┘       └──────────────┘
//!        │
//!        ▼
//! ┌──────────────┐       ┌──────────────┐       ┌──────────────┐
//! │ Client       │──────▶│ Upload       │──────▶│ MinIO / S3   │
//! │ Factory      │       │ Pipeline     │       │ Bucket       │
//! └──────────────┘       └──────────────┘       └──────────────┘
//! ```
//!
//! Credential injection is best-effort: lookup problems are logged and the
//! request fails later with a clear "missing credentials" error instead.

pub mod config;
pub mod credentials;
pub mod error;
pub mod object_store;
pub mod request;
pub mod secrets;
pub mod telemetry_api;
pub mod upload;

pub use config::Config;
pub use credentials::{CredentialInjector, FieldResolution, InjectionReport};
pub use error::TelemetryError;
pub use object_store::{ClientFactory, ObjectStore, S3ClientFactory, S3ObjectStore};
pub use request::{TelemetryRequest, UploadSettings};
pub use secrets::{
    DirectorySecretStore, Secret, SecretError, SecretResolver, SecretStore, StaticSecretStore,
};
pub use telemetry_api::{create_router, describe_metrics, start_api_server, AppState};
pub use upload::UploadPipeline;
