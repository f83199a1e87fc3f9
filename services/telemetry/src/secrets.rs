//! Secret resolution for object store credentials.
//!
//! Secrets are looked up by name on every request and never cached. The store
//! itself is injected as a trait object so the same resolver works against
//! mounted secret volumes in production and an in-memory map in tests.

use crate::config::{Config, SecretBackend};
use async_trait::async_trait;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors returned by a secret store lookup
#[derive(Error, Debug)]
pub enum SecretError {
    #[error("secret {0} not found")]
    NotFound(String),

    #[error("invalid secret name {0:?}")]
    InvalidName(String),

    #[error("secret store unavailable: {0}")]
    Unavailable(String),
}

/// A resolved secret: field name to value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Secret {
    pub name: String,
    pub data: HashMap<String, String>,
}

impl Secret {
    pub fn new(name: impl Into<String>, data: HashMap<String, String>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// Get a single field of the secret
    pub fn field(&self, field: &str) -> Option<&str> {
        self.data.get(field).map(String::as_str)
    }
}

/// Read-only key/value secret store
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, name: &str) -> Result<HashMap<String, String>, SecretError>;
}

/// Resolves named secrets through an injected store
#[derive(Clone)]
pub struct SecretResolver {
    store: Arc<dyn SecretStore>,
}

impl SecretResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// Build a resolver for the configured backend
    pub fn from_config(config: &Config) -> Self {
        let store: Arc<dyn SecretStore> = match config.secret_store.backend {
            SecretBackend::Directory => {
                let dir = config.secret_dir();
                info!(dir = %dir.display(), "Using mounted secret store");
                Arc::new(DirectorySecretStore::new(dir))
            }
            SecretBackend::Static => {
                info!(
                    secrets = config.secret_store.secrets.len(),
                    "Using static secret store"
                );
                Arc::new(StaticSecretStore::new(config.secret_store.secrets.clone()))
            }
        };

        Self::new(store)
    }

    /// Resolve a secret by name
    pub async fn resolve(&self, name: &str) -> Result<Secret, SecretError> {
        let data = self.store.get_secret(name).await?;
        debug!(secret = %name, fields = data.len(), "Secret resolved");
        Ok(Secret::new(name, data))
    }
}

/// Secrets projected into a directory tree, one directory per secret and one
/// file per field
///
/// Entries starting with `..` are the bookkeeping links of projected volumes
/// and are skipped.
pub struct DirectorySecretStore {
    root: PathBuf,
}

impl DirectorySecretStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl SecretStore for DirectorySecretStore {
    async fn get_secret(&self, name: &str) -> Result<HashMap<String, String>, SecretError> {
        if !is_valid_secret_name(name) {
            return Err(SecretError::InvalidName(name.to_string()));
        }

        let dir = self.root.join(name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(SecretError::NotFound(name.to_string()))
            }
            Err(e) => return Err(SecretError::Unavailable(e.to_string())),
        };

        let mut data = HashMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SecretError::Unavailable(e.to_string()))?
        {
            let field = entry.file_name().to_string_lossy().into_owned();
            if field.starts_with("..") {
                continue;
            }

            // Follows symlinks, fields of projected volumes are links into ..data
            let path = entry.path();
            match tokio::fs::metadata(&path).await {
                Ok(metadata) if metadata.is_file() => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!(
                        secret = %name,
                        field = %field,
                        error = %e,
                        "Skipping unreadable secret field"
                    );
                    continue;
                }
            }

            let raw = tokio::fs::read(&path)
                .await
                .map_err(|e| SecretError::Unavailable(e.to_string()))?;
            match String::from_utf8(raw) {
                Ok(value) => {
                    data.insert(field, value.trim_end_matches(['\r', '\n']).to_string());
                }
                Err(_) => warn!(secret = %name, field = %field, "Skipping non UTF-8 secret field"),
            }
        }

        Ok(data)
    }
}

/// In-memory secrets, for development and tests
#[derive(Default)]
pub struct StaticSecretStore {
    secrets: HashMap<String, HashMap<String, String>>,
}

impl StaticSecretStore {
    pub fn new(secrets: HashMap<String, HashMap<String, String>>) -> Self {
        Self { secrets }
    }

    pub fn with_secret<K, V>(mut self, name: &str, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.secrets.insert(
            name.to_string(),
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, name: &str) -> Result<HashMap<String, String>, SecretError> {
        self.secrets
            .get(name)
            .cloned()
            .ok_or_else(|| SecretError::NotFound(name.to_string()))
    }
}

/// A secret name must be a single, non-hidden path component
fn is_valid_secret_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_static_store_lookup() {
        let store = StaticSecretStore::default().with_secret("minio", [("username", "id")]);
        let resolver = SecretResolver::new(Arc::new(store));

        let secret = resolver.resolve("minio").await.unwrap();
        assert_eq!(secret.name, "minio");
        assert_eq!(secret.field("username"), Some("id"));
        assert_eq!(secret.field("password"), None);

        let err = resolver.resolve("other").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound(name) if name == "other"));
    }

    #[tokio::test]
    async fn test_directory_store_reads_fields() {
        let root = TempDir::new().unwrap();
        let secret_dir = root.path().join("minio-creds");
        std::fs::create_dir(&secret_dir).unwrap();
        std::fs::write(secret_dir.join("username"), "access-id\n").unwrap();
        std::fs::write(secret_dir.join("password"), "access-key").unwrap();
        std::fs::create_dir(secret_dir.join("..data")).unwrap();

        let store = DirectorySecretStore::new(root.path());
        let data = store.get_secret("minio-creds").await.unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(data["username"], "access-id");
        assert_eq!(data["password"], "access-key");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_directory_store_skips_dangling_field_link() {
        let root = TempDir::new().unwrap();
        let secret_dir = root.path().join("minio-creds");
        std::fs::create_dir(&secret_dir).unwrap();
        std::fs::write(secret_dir.join("username"), "access-id").unwrap();
        std::os::unix::fs::symlink(
            secret_dir.join("..data/password"),
            secret_dir.join("password"),
        )
        .unwrap();

        let store = DirectorySecretStore::new(root.path());
        let data = store.get_secret("minio-creds").await.unwrap();

        assert_eq!(data.len(), 1);
        assert_eq!(data["username"], "access-id");
        assert!(!data.contains_key("password"));
    }

    #[tokio::test]
    async fn test_directory_store_secret_not_a_directory() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("minio-creds"), "username=id").unwrap();

        let store = DirectorySecretStore::new(root.path());
        let err = store.get_secret("minio-creds").await.unwrap_err();

        assert!(matches!(err, SecretError::Unavailable(_)), "{err}");
    }

    #[tokio::test]
    async fn test_directory_store_missing_secret() {
        let root = TempDir::new().unwrap();
        let store = DirectorySecretStore::new(root.path());

        let err = store.get_secret("absent").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_directory_store_rejects_traversal() {
        let root = TempDir::new().unwrap();
        let store = DirectorySecretStore::new(root.path());

        for name in ["../etc", "a/b", "", ".hidden"] {
            let err = store.get_secret(name).await.unwrap_err();
            assert!(matches!(err, SecretError::InvalidName(_)), "{name}");
        }
    }

    #[tokio::test]
    async fn test_resolver_from_static_config() {
        let mut config = Config::default();
        config.secret_store.backend = SecretBackend::Static;
        config.secret_store.secrets.insert(
            "creds".to_string(),
            HashMap::from([("password".to_string(), "key".to_string())]),
        );

        let resolver = SecretResolver::from_config(&config);
        let secret = resolver.resolve("creds").await.unwrap();
        assert_eq!(secret.field("password"), Some("key"));
    }
}
