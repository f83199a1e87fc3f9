use crate::error::TelemetryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Object store settings carried by each telemetry request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadSettings {
    /// Object store endpoint (`host:port` or full URL)
    #[serde(default)]
    pub end_point: Option<String>,
    /// Target bucket
    #[serde(default)]
    pub bucket: Option<String>,
    /// Object name, without extension
    #[serde(default)]
    pub file_name: Option<String>,
    /// Object extension
    #[serde(default)]
    pub file_extension: Option<String>,
    /// Access id, supplied directly or injected from `secret`
    #[serde(default)]
    pub api_id: Option<String>,
    /// Access key, supplied directly or injected from `secret`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Name of the secret holding the access id and key
    #[serde(default)]
    pub secret: Option<String>,
}

/// Required upload target, validated out of [`UploadSettings`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget<'a> {
    pub end_point: &'a str,
    pub bucket: &'a str,
    pub file_extension: &'a str,
}

impl UploadSettings {
    /// Check the fields every upload needs
    pub fn target(&self) -> Result<UploadTarget<'_>, TelemetryError> {
        match (
            non_empty(&self.end_point),
            non_empty(&self.bucket),
            non_empty(&self.file_extension),
        ) {
            (Some(end_point), Some(bucket), Some(file_extension)) => Ok(UploadTarget {
                end_point,
                bucket,
                file_extension,
            }),
            _ => Err(TelemetryError::missing_settings()),
        }
    }

    /// Access id and key, if both are populated
    pub fn credentials(&self) -> Option<(&str, &str)> {
        Some((non_empty(&self.api_id)?, non_empty(&self.api_key)?))
    }

    /// Object key for the upload
    ///
    /// Uses `file_name` when set, otherwise partitions by device and time:
    /// `{device}/{date}/{timestamp}.{extension}`.
    pub fn object_key(
        &self,
        device_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<String, TelemetryError> {
        let extension = non_empty(&self.file_extension)
            .ok_or_else(TelemetryError::missing_settings)?
            .trim_start_matches('.');

        if let Some(file_name) = non_empty(&self.file_name) {
            let suffix = format!(".{extension}");
            if file_name.ends_with(&suffix) {
                return Ok(file_name.to_string());
            }
            return Ok(format!("{file_name}{suffix}"));
        }

        let device = device_name
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .ok_or_else(TelemetryError::missing_device_name)?;

        Ok(format!(
            "{device}/{date}/{timestamp}.{extension}",
            device = sanitize_path_component(device),
            date = now.format("%Y-%m-%d"),
            timestamp = now.format("%H%M%S%3f"),
        ))
    }
}

/// Inbound telemetry upload request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryRequest {
    #[serde(default)]
    pub minio_setting: Option<UploadSettings>,
    /// Payload bytes, base64 encoded on the wire
    #[serde(default, with = "base64_serde")]
    pub raw_data: Vec<u8>,
}

impl TelemetryRequest {
    pub fn from_slice(body: &[u8]) -> Result<Self, TelemetryError> {
        serde_json::from_slice(body).map_err(TelemetryError::RequestDecode)
    }
}

/// Base64 serialization helper, `null` decodes to an empty payload
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            Some(s) => STANDARD.decode(s).map_err(serde::de::Error::custom),
            None => Ok(Vec::new()),
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Sanitize a path component to prevent path traversal
fn sanitize_path_component(component: &str) -> String {
    component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}
