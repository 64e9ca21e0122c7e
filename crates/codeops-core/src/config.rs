//! Vault configuration
//!
//! Loaded from an optional TOML file with `CODEOPS_VAULT_*` environment
//! overrides on top. `validate` runs before any service is built; a config
//! that fails validation stops the process at startup.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, VaultError};

/// Smallest lease TTL the engine will grant.
pub const MIN_LEASE_TTL_SECONDS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Base input for HKDF. Must be at least 32 characters.
    pub master_key: String,
    /// When true the seal service starts unsealed.
    pub auto_unseal: bool,
    /// Shamir share count (n).
    pub total_shares: u8,
    /// Shamir reconstruction threshold (k).
    pub threshold: u8,

    /// When false, lease operations skip backend SQL entirely.
    pub execute_sql: bool,
    pub default_ttl_seconds: i64,
    pub max_ttl_seconds: i64,
    pub username_prefix: String,
    pub password_length: usize,

    /// Scheduler intervals.
    pub rotation_tick_seconds: u64,
    pub lease_tick_seconds: u64,
    /// Both periodic drivers are disabled when false (test mode).
    pub scheduler_enabled: bool,

    /// Shared HMAC secret for validating externally issued bearer tokens.
    pub token_signing_key: String,

    pub listen_addr: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            master_key: String::new(),
            auto_unseal: false,
            total_shares: 5,
            threshold: 3,
            execute_sql: false,
            default_ttl_seconds: 3600,
            max_ttl_seconds: 86_400,
            username_prefix: "cv_".to_string(),
            password_length: 32,
            rotation_tick_seconds: 60,
            lease_tick_seconds: 30,
            scheduler_enabled: true,
            token_signing_key: String::new(),
            listen_addr: "0.0.0.0:8200".to_string(),
        }
    }
}

impl VaultConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let contents = fs::read_to_string(path).map_err(VaultError::internal)?;
                toml::from_str(&contents).map_err(VaultError::internal)?
            }
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    /// Overlay `CODEOPS_VAULT_*` environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("CODEOPS_VAULT_MASTER_KEY") {
            self.master_key = v;
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_AUTO_UNSEAL") {
            self.auto_unseal = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_TOTAL_SHARES") {
            if let Ok(n) = v.parse() {
                self.total_shares = n;
            }
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_THRESHOLD") {
            if let Ok(k) = v.parse() {
                self.threshold = k;
            }
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_EXECUTE_SQL") {
            self.execute_sql = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_DEFAULT_TTL") {
            if let Ok(n) = v.parse() {
                self.default_ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_MAX_TTL") {
            if let Ok(n) = v.parse() {
                self.max_ttl_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_USERNAME_PREFIX") {
            self.username_prefix = v;
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_PASSWORD_LENGTH") {
            if let Ok(n) = v.parse() {
                self.password_length = n;
            }
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_ROTATION_TICK") {
            if let Ok(n) = v.parse() {
                self.rotation_tick_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_LEASE_TICK") {
            if let Ok(n) = v.parse() {
                self.lease_tick_seconds = n;
            }
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_SCHEDULER_ENABLED") {
            self.scheduler_enabled = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_TOKEN_SIGNING_KEY") {
            self.token_signing_key = v;
        }
        if let Ok(v) = std::env::var("CODEOPS_VAULT_LISTEN_ADDR") {
            self.listen_addr = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.master_key.len() < 32 {
            return Err(VaultError::InvalidInput(
                "master key must be at least 32 characters".into(),
            ));
        }
        if self.threshold == 0 || self.threshold > self.total_shares {
            return Err(VaultError::InvalidInput(format!(
                "threshold {} must lie in 1..={}",
                self.threshold, self.total_shares
            )));
        }
        if self.default_ttl_seconds < MIN_LEASE_TTL_SECONDS
            || self.default_ttl_seconds > self.max_ttl_seconds
        {
            return Err(VaultError::InvalidInput(format!(
                "default lease TTL must lie in {}..={}",
                MIN_LEASE_TTL_SECONDS, self.max_ttl_seconds
            )));
        }
        if self.password_length == 0 || self.password_length > 128 {
            return Err(VaultError::InvalidInput(
                "lease password length must lie in 1..=128".into(),
            ));
        }
        if self.token_signing_key.len() < 32 {
            return Err(VaultError::InvalidInput(
                "token signing key must be at least 32 bytes".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> VaultConfig {
        VaultConfig {
            master_key: "0123456789abcdef0123456789abcdef".into(),
            token_signing_key: "another-signing-key-of-enough-length".into(),
            ..VaultConfig::default()
        }
    }

    #[test]
    fn default_config_validates_once_keys_are_set() {
        assert!(VaultConfig::default().validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn rejects_bad_shamir_parameters() {
        let mut config = valid();
        config.threshold = 0;
        assert!(config.validate().is_err());

        config.threshold = 6;
        config.total_shares = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_order_ttls() {
        let mut config = valid();
        config.default_ttl_seconds = 30;
        assert!(config.validate().is_err());

        config.default_ttl_seconds = 90_000;
        config.max_ttl_seconds = 86_400;
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_round_trip() {
        let config = valid();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: VaultConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.master_key, config.master_key);
        assert_eq!(parsed.total_shares, 5);
    }
}
