//! Configuration structs for the on-disk CAS and the network authentication service.
//!
//! Plain, `serde`-derived, TOML-loadable structs with `Default` impls carrying the values from
//! `constants`; callers construct them directly or via `from_toml_str`/`from_toml_file` and pass
//! them into the relevant constructor. No ambient global configuration state.

use crate::constants::{
    DEFAULT_CHALLENGE_TTL_SECS, DEFAULT_COMPACTION_MAX_BYTES, DEFAULT_COMPACTION_MIN_FILES,
    DEFAULT_TOKEN_TTL_SECS,
};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for `cas::on_disk::OnDiskCas::open`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnDiskCasConfig {
    pub base_dir: PathBuf,
    pub db_id: String,
    /// Wipe any existing database directory with this `db_id` before opening. Intended for
    /// test fixtures and explicit resets, never for normal startup.
    #[serde(default)]
    pub wipe_on_start: bool,
    #[serde(default = "default_compaction_min_files")]
    pub compaction_min_files: usize,
    #[serde(default = "default_compaction_max_bytes")]
    pub compaction_max_bytes: u64,
}

fn default_compaction_min_files() -> usize {
    DEFAULT_COMPACTION_MIN_FILES
}

fn default_compaction_max_bytes() -> u64 {
    DEFAULT_COMPACTION_MAX_BYTES
}

impl OnDiskCasConfig {
    pub fn new(base_dir: impl Into<PathBuf>, db_id: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            db_id: db_id.into(),
            wipe_on_start: false,
            compaction_min_files: DEFAULT_COMPACTION_MIN_FILES,
            compaction_max_bytes: DEFAULT_COMPACTION_MAX_BYTES,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| crate::Error::InvalidOperation(format!("invalid config: {e}")))
    }

    pub fn from_toml_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

/// Configuration for `network::auth::AuthService`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthServiceConfig {
    pub tenant_id: String,
    /// HMAC signing secret for issued tokens. Never logged; `Debug` is intentionally not
    /// redacting it here because this struct is expected to come from a trusted config source,
    /// not from a network boundary.
    pub jwt_secret: String,
    #[serde(default = "default_challenge_ttl")]
    pub challenge_ttl_secs: i64,
    #[serde(default = "default_token_ttl")]
    pub token_ttl_secs: i64,
}

fn default_challenge_ttl() -> i64 {
    DEFAULT_CHALLENGE_TTL_SECS
}

fn default_token_ttl() -> i64 {
    DEFAULT_TOKEN_TTL_SECS
}

impl AuthServiceConfig {
    pub fn new(tenant_id: impl Into<String>, jwt_secret: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            jwt_secret: jwt_secret.into(),
            challenge_ttl_secs: DEFAULT_CHALLENGE_TTL_SECS,
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
        }
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| crate::Error::InvalidOperation(format!("invalid config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn on_disk_config_round_trips_through_toml() {
        let cfg = OnDiskCasConfig::new("/tmp/mindoodb", "db1");
        let toml = toml::to_string(&cfg).unwrap();
        let back: OnDiskCasConfig = OnDiskCasConfig::from_toml_str(&toml).unwrap();
        assert_eq!(back.db_id, "db1");
        assert_eq!(back.compaction_min_files, DEFAULT_COMPACTION_MIN_FILES);
    }

    #[test]
    fn auth_config_defaults_ttls_when_absent() {
        let toml = r#"
            tenant_id = "tenant-a"
            jwt_secret = "s3cr3t"
        "#;
        let cfg = AuthServiceConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.challenge_ttl_secs, DEFAULT_CHALLENGE_TTL_SECS);
        assert_eq!(cfg.token_ttl_secs, DEFAULT_TOKEN_TTL_SECS);
    }
}
