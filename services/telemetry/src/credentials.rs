//! Best-effort credential injection.
//!
//! Fills the access id and key of [`UploadSettings`] from the secret it names.
//! Injection never fails a request: every problem is logged and leaves the
//! affected field untouched, so a missing credential surfaces later when the
//! object store client is built.

use crate::request::UploadSettings;
use crate::secrets::SecretResolver;
use tracing::{error, info, instrument, warn};

/// Secret field holding the access id
pub const USERNAME_SECRET_FIELD: &str = "username";
/// Secret field holding the access key
pub const PASSWORD_SECRET_FIELD: &str = "password";

/// What injection did for a single credential field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldResolution {
    /// No lookup was attempted (no settings or no secret reference)
    NotConfigured,
    /// The field was read from the secret and written to the settings
    Resolved,
    /// The secret exists but does not carry this field
    AbsentInSecret,
    /// The secret could not be resolved
    LookupFailed,
}

/// Per-field outcome of an injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectionReport {
    pub api_id: FieldResolution,
    pub api_key: FieldResolution,
}

impl InjectionReport {
    fn uniform(resolution: FieldResolution) -> Self {
        Self {
            api_id: resolution,
            api_key: resolution,
        }
    }

    pub fn fully_resolved(&self) -> bool {
        self.api_id == FieldResolution::Resolved && self.api_key == FieldResolution::Resolved
    }
}

/// Populates upload credentials from the secret store
#[derive(Clone)]
pub struct CredentialInjector {
    resolver: SecretResolver,
}

impl CredentialInjector {
    pub fn new(resolver: SecretResolver) -> Self {
        Self { resolver }
    }

    /// Inject the access id and key named by `settings.secret`
    #[instrument(skip_all)]
    pub async fn inject(&self, settings: Option<&mut UploadSettings>) -> InjectionReport {
        let Some(settings) = settings else {
            warn!("Empty MinIO service setting");
            return InjectionReport::uniform(FieldResolution::NotConfigured);
        };

        let Some(secret_name) = settings.secret.as_deref().filter(|s| !s.is_empty()) else {
            warn!("Empty MinIO secret setting");
            return InjectionReport::uniform(FieldResolution::NotConfigured);
        };

        let secret = match self.resolver.resolve(secret_name).await {
            Ok(secret) => secret,
            Err(e) => {
                error!(secret = %secret_name, error = %e, "Fail to get secret");
                metrics::counter!("telemetry.secrets.lookup_failed").increment(1);
                return InjectionReport::uniform(FieldResolution::LookupFailed);
            }
        };

        let api_id = match secret.field(USERNAME_SECRET_FIELD) {
            Some(id) => {
                settings.api_id = Some(id.to_string());
                FieldResolution::Resolved
            }
            None => {
                error!(secret = %secret.name, "Fail to get APIId from secret");
                FieldResolution::AbsentInSecret
            }
        };

        let api_key = match secret.field(PASSWORD_SECRET_FIELD) {
            Some(key) => {
                settings.api_key = Some(key.to_string());
                FieldResolution::Resolved
            }
            None => {
                error!(secret = %secret.name, "Fail to get APIKey from secret");
                FieldResolution::AbsentInSecret
            }
        };

        let report = InjectionReport { api_id, api_key };
        if report.fully_resolved() {
            info!(secret = %secret.name, "Loaded APIId & APIKey from secret");
        }
        report
    }
}
