use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::directive::DirectiveType;
use crate::error::BarkError;

/// Top-level configuration. Every field has a default so an empty file, or
/// no file at all, yields a working setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarkConfig {
    pub operator_id: String,
    /// Dimensions this authority is permitted to act on.
    pub dimensions: BTreeSet<String>,
    pub directive: DirectiveConfig,
    pub audit: AuditConfig,
    pub keystore: KeyStoreConfig,
    /// File holding the nonce high-water mark; in-memory when unset. Without
    /// it, nonces issued by an earlier process can be replayed.
    pub nonce_state_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectiveConfig {
    pub max_expiration_secs: i64,
    pub allowed_directive_types: Vec<DirectiveType>,
    /// Snapshot file for the directive collection; in-memory when unset.
    /// Without it, revocations do not outlive the process.
    pub store_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub log_path: PathBuf,
    /// Active log size in bytes above which the log is rotated.
    pub max_log_size: u64,
    pub enable_remote_sync: bool,
    pub remote_audit_endpoint: String,
    pub remote_queue_size: usize,
    pub remote_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyStoreConfig {
    /// Root directory for the file-backed key store.
    pub path: PathBuf,
    pub service: String,
    pub private_key_name: String,
    pub public_key_name: String,
}

impl Default for BarkConfig {
    fn default() -> Self {
        Self {
            operator_id: "axiomhive:operator:default".to_string(),
            dimensions: [
                "technical",
                "regulatory",
                "ontological",
                "epistemological",
                "economic",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            directive: DirectiveConfig::default(),
            audit: AuditConfig::default(),
            keystore: KeyStoreConfig::default(),
            nonce_state_path: Some(PathBuf::from(".bark/nonce.state")),
        }
    }
}

impl Default for DirectiveConfig {
    fn default() -> Self {
        Self {
            max_expiration_secs: 3600,
            allowed_directive_types: DirectiveType::executable().to_vec(),
            store_path: Some(PathBuf::from(".bark/directives.json")),
        }
    }
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("bark_audit_log.jsonl"),
            max_log_size: 10_000_000,
            enable_remote_sync: false,
            remote_audit_endpoint: "https://audit.axiomhive.io".to_string(),
            remote_queue_size: 1024,
            remote_timeout_secs: 10,
        }
    }
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".bark/keys"),
            service: "com.axiomhive.bark".to_string(),
            private_key_name: "bark_private_key".to_string(),
            public_key_name: "bark_public_key".to_string(),
        }
    }
}

impl BarkConfig {
    /// Load configuration from an optional TOML file, then apply `BARK__*`
    /// environment overrides (e.g. `BARK__AUDIT__MAX_LOG_SIZE=1048576`).
    pub fn load(path: Option<&Path>) -> Result<Self, BarkError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(BarkError::ConfigError(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path));
        }

        let config: BarkConfig = builder
            .add_source(config::Environment::with_prefix("BARK").separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BarkError::ConfigError(e.to_string()))?;

        config.validate()?;
        info!("Configuration loaded for operator {}", config.operator_id);
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), BarkError> {
        if self.operator_id.trim().is_empty() {
            return Err(BarkError::ConfigError("operator_id must not be empty".to_string()));
        }
        if self.directive.max_expiration_secs <= 0 {
            return Err(BarkError::ConfigError(
                "directive.max_expiration_secs must be positive".to_string(),
            ));
        }
        if chrono::Duration::try_seconds(self.directive.max_expiration_secs).is_none() {
            return Err(BarkError::ConfigError(format!(
                "directive.max_expiration_secs {} is out of range",
                self.directive.max_expiration_secs
            )));
        }
        if self.directive.allowed_directive_types.contains(&DirectiveType::Raw) {
            return Err(BarkError::ConfigError(
                "RAW directives can never be allowed for execution".to_string(),
            ));
        }
        if self.audit.max_log_size == 0 {
            return Err(BarkError::ConfigError("audit.max_log_size must be positive".to_string()));
        }
        if self.audit.enable_remote_sync && self.audit.remote_audit_endpoint.is_empty() {
            return Err(BarkError::ConfigError(
                "audit.remote_audit_endpoint is required when remote sync is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
