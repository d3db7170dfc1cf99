use serde::{Deserialize, Serialize};

use crate::errors::SftpError;

/// Bytes reserved in a packet for the header fields around a data chunk
/// (length, type, id, handle string, offset, data length).
const PACKET_OVERHEAD: u32 = 64;

/// Upper bound for [`SessionConfig::transfer_concurrency`].
const MAX_CONCURRENCY: usize = 64;

/// Per-session client configuration.
///
/// All fields have defaults, so an empty JSON object is a valid config.
/// - `chunk_size`: bytes per READ/WRITE request (default 32 KiB).
/// - `transfer_concurrency`: files in flight during bulk transfers (default 4).
/// - `max_packet_len`: largest frame accepted from the server (default 256 KiB).
/// - `request_timeout_secs`: per-request timeout, `None` waits forever.
/// - `remote_cwd`: initial remote working directory; defaults to the home
///   directory reported by the server.
/// - `local_cwd`: base for relative local paths; defaults to the process cwd.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u32,
    #[serde(default = "default_transfer_concurrency")]
    pub transfer_concurrency: usize,
    #[serde(default = "default_max_packet_len")]
    pub max_packet_len: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_cwd: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            transfer_concurrency: default_transfer_concurrency(),
            max_packet_len: default_max_packet_len(),
            request_timeout_secs: None,
            remote_cwd: None,
            local_cwd: None,
        }
    }
}

/// A single validation error for a config field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// camelCase field name, as it appears in settings JSON.
    pub field: String,
    pub message: String,
}

impl SessionConfig {
    /// Parse settings JSON into a config and validate it.
    pub fn from_json(settings: &serde_json::Value) -> Result<Self, SftpError> {
        let config: Self = serde_json::from_value(settings.clone())
            .map_err(|e| SftpError::Config(format!("invalid settings: {e}")))?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Return every problem with this config. Empty means valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.max_packet_len < 4096 {
            errors.push(ValidationError {
                field: "maxPacketLen".to_string(),
                message: "Max packet length must be at least 4096".to_string(),
            });
        }

        let max_chunk = self.max_packet_len.saturating_sub(PACKET_OVERHEAD);
        if self.chunk_size == 0 || self.chunk_size > max_chunk {
            errors.push(ValidationError {
                field: "chunkSize".to_string(),
                message: format!("Chunk size must be between 1 and {max_chunk}"),
            });
        }

        if self.transfer_concurrency == 0 || self.transfer_concurrency > MAX_CONCURRENCY {
            errors.push(ValidationError {
                field: "transferConcurrency".to_string(),
                message: format!("Transfer concurrency must be between 1 and {MAX_CONCURRENCY}"),
            });
        }

        if self.request_timeout_secs == Some(0) {
            errors.push(ValidationError {
                field: "requestTimeoutSecs".to_string(),
                message: "Request timeout must be greater than 0".to_string(),
            });
        }

        if let Some(cwd) = &self.remote_cwd {
            if cwd.is_empty() {
                errors.push(ValidationError {
                    field: "remoteCwd".to_string(),
                    message: "Remote working directory must not be empty".to_string(),
                });
            }
        }

        errors
    }

    pub(crate) fn ensure_valid(&self) -> Result<(), SftpError> {
        let errors = self.validate();
        if errors.is_empty() {
            return Ok(());
        }
        let joined = errors
            .iter()
            .map(|e| format!("{}: {}", e.field, e.message))
            .collect::<Vec<_>>()
            .join("; ");
        Err(SftpError::Config(joined))
    }
}

// --- Default value functions ---

fn default_chunk_size() -> u32 {
    32 * 1024
}

fn default_transfer_concurrency() -> usize {
    4
}

fn default_max_packet_len() -> u32 {
    256 * 1024
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_json_uses_defaults() {
        let cfg = SessionConfig::from_json(&serde_json::json!({})).unwrap();
        assert_eq!(cfg, SessionConfig::default());
        assert_eq!(cfg.chunk_size, 32768);
        assert_eq!(cfg.transfer_concurrency, 4);
        assert_eq!(cfg.max_packet_len, 262_144);
        assert!(cfg.request_timeout_secs.is_none());
    }

    #[test]
    fn camel_case_fields_are_read() {
        let cfg = SessionConfig::from_json(&serde_json::json!({
            "chunkSize": 8192,
            "transferConcurrency": 2,
            "requestTimeoutSecs": 30,
            "remoteCwd": "/srv/data",
            "localCwd": "/tmp"
        }))
        .unwrap();
        assert_eq!(cfg.chunk_size, 8192);
        assert_eq!(cfg.transfer_concurrency, 2);
        assert_eq!(cfg.request_timeout_secs, Some(30));
        assert_eq!(cfg.remote_cwd.as_deref(), Some("/srv/data"));
        assert_eq!(cfg.local_cwd.as_deref(), Some("/tmp"));
    }

    #[test]
    fn default_config_is_valid() {
        assert!(SessionConfig::default().validate().is_empty());
    }

    #[test]
    fn chunk_larger_than_packet_is_rejected() {
        let cfg = SessionConfig {
            chunk_size: 300 * 1024,
            ..SessionConfig::default()
        };
        let errors = cfg.validate();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "chunkSize");
    }

    #[test]
    fn zero_concurrency_and_timeout_are_rejected() {
        let cfg = SessionConfig {
            transfer_concurrency: 0,
            request_timeout_secs: Some(0),
            ..SessionConfig::default()
        };
        let fields: Vec<_> = cfg.validate().into_iter().map(|e| e.field).collect();
        assert!(fields.contains(&"transferConcurrency".to_string()));
        assert!(fields.contains(&"requestTimeoutSecs".to_string()));
    }

    #[test]
    fn from_json_reports_invalid_values() {
        let err = SessionConfig::from_json(&serde_json::json!({"chunkSize": 0})).unwrap_err();
        assert!(matches!(err, SftpError::Config(_)));
        assert!(err.to_string().contains("chunkSize"));
    }

    #[test]
    fn from_json_reports_wrong_types() {
        let err =
            SessionConfig::from_json(&serde_json::json!({"chunkSize": "big"})).unwrap_err();
        assert!(err.to_string().starts_with("Config error: invalid settings"));
    }
}
