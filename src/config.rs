//! TOML configuration support.
//!
//! This module provides the configuration file model and turns it into a
//! [`PolicySet`] or a ready-to-use [`GeoblockLayer`].
//!
//! # Example TOML Format
//!
//! ```toml
//! enabled = true
//! database_file_path = "/var/lib/geoip/GeoLite2-Country.mmdb"
//! allowed_countries = ["US", "DE"]
//! blocked_countries = []
//! allowed_ip_blocks = ["10.8.0.0/16"]
//! blocked_ip_blocks = []
//! allow_private = true
//! default_allow = false
//! http_status_code_denied_request = 403
//! forwarded_headers = ["X-Forwarded-For", "X-Real-IP"]
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use axum_geoblock::GeoblockConfig;
//!
//! let layer = GeoblockConfig::from_file("config/geoblock.toml")?.into_layer()?;
//! ```

use crate::engine::DecisionEngine;
use crate::extractor::{HeaderAddressExtractor, X_FORWARDED_FOR, X_REAL_IP};
use crate::geo::{GeoLookup, MaxMindLookup};
use crate::middleware::GeoblockLayer;
use crate::policy::{PolicySet, PolicySetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoblockConfig {
    /// Whether gating is active. A disabled gate forwards everything.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Path to the MaxMind country database. Required when enabled and no
    /// custom lookup is supplied.
    #[serde(default)]
    pub database_file_path: Option<PathBuf>,

    /// Country codes that are allowed.
    #[serde(default)]
    pub allowed_countries: Vec<String>,

    /// Country codes that are blocked.
    #[serde(default)]
    pub blocked_countries: Vec<String>,

    /// Networks (CIDR) that are allowed.
    #[serde(default)]
    pub allowed_ip_blocks: Vec<String>,

    /// Networks (CIDR) that are blocked.
    #[serde(default)]
    pub blocked_ip_blocks: Vec<String>,

    /// Verdict for private and unroutable addresses.
    #[serde(default)]
    pub allow_private: bool,

    /// Verdict when no rule matches.
    #[serde(default)]
    pub default_allow: bool,

    /// Status code written on denial.
    #[serde(default = "default_status")]
    pub http_status_code_denied_request: u16,

    /// Headers carrying candidate client addresses.
    #[serde(default = "default_forwarded_headers")]
    pub forwarded_headers: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_status() -> u16 {
    403
}

fn default_forwarded_headers() -> Vec<String> {
    vec![X_FORWARDED_FOR.to_string(), X_REAL_IP.to_string()]
}

impl Default for GeoblockConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            database_file_path: None,
            allowed_countries: Vec::new(),
            blocked_countries: Vec::new(),
            allowed_ip_blocks: Vec::new(),
            blocked_ip_blocks: Vec::new(),
            allow_private: false,
            default_allow: false,
            http_status_code_denied_request: default_status(),
            forwarded_headers: default_forwarded_headers(),
        }
    }
}

/// Error type for configuration and construction.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// File I/O error.
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Enabled without a database path.
    #[error("A database file path is required when geoblocking is enabled")]
    MissingDatabasePath,

    /// The database file does not exist.
    #[error("Database file not found: {0}")]
    DatabaseNotFound(String),

    /// The database could not be opened.
    #[error("Failed to open database '{0}': {1}")]
    Database(String, String),

    /// Invalid CIDR entry.
    #[error("Invalid network '{0}': {1}")]
    InvalidNetwork(String, String),

    /// Invalid denial status code.
    #[error("Invalid HTTP status code {0} for denied requests")]
    InvalidStatusCode(u16),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl GeoblockConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Example
    /// ```
    /// use axum_geoblock::GeoblockConfig;
    ///
    /// let toml = r#"
    /// enabled = false
    /// allowed_countries = ["US"]
    /// "#;
    ///
    /// let config = GeoblockConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.allowed_countries, vec!["US"]);
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: GeoblockConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Validate the configuration.
    ///
    /// The database path is checked here only for presence; whether it can
    /// be opened is checked by [`into_layer`](Self::into_layer).
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policy_builder().build()?;
        self.extractor()?;

        for code in self.allowed_countries.iter().chain(&self.blocked_countries) {
            let code = code.trim();
            if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
                return Err(ConfigError::Invalid(format!(
                    "country code '{}' must be two ASCII letters",
                    code
                )));
            }
        }
        Ok(())
    }

    /// Convert the configuration into a policy.
    ///
    /// Runs [`validate`](Self::validate) first, so configurations built in
    /// code get the same checks as parsed ones.
    pub fn into_policy(self) -> Result<PolicySet, ConfigError> {
        self.validate()?;
        self.policy_builder().build()
    }

    /// Build a layer, opening the configured MaxMind database.
    ///
    /// A disabled configuration yields a passthrough layer and never touches
    /// the database path.
    pub fn into_layer(self) -> Result<GeoblockLayer, ConfigError> {
        if !self.enabled {
            tracing::info!("Geoblocking disabled, requests pass through unchecked");
            return Ok(GeoblockLayer::passthrough());
        }
        let path = self
            .database_file_path
            .clone()
            .ok_or(ConfigError::MissingDatabasePath)?;
        let lookup = MaxMindLookup::open(&path)?;
        self.into_layer_with(lookup)
    }

    /// Build a layer using a caller-supplied lookup backend.
    pub fn into_layer_with(
        self,
        lookup: impl GeoLookup + 'static,
    ) -> Result<GeoblockLayer, ConfigError> {
        let extractor = self.extractor()?;
        let policy = self.into_policy()?;
        tracing::info!(
            enabled = policy.enabled(),
            allowed_countries = policy.allowed_countries().len(),
            blocked_countries = policy.blocked_countries().len(),
            allowed_networks = policy.allowed_networks().len(),
            blocked_networks = policy.blocked_networks().len(),
            allow_private = policy.allow_private(),
            default_allow = policy.default_allow(),
            reject_status = policy.reject_status().as_u16(),
            "Geoblock policy loaded"
        );
        Ok(GeoblockLayer::new(DecisionEngine::new(policy, lookup)).with_extractor(extractor))
    }

    fn policy_builder(&self) -> PolicySetBuilder {
        PolicySet::builder()
            .enabled(self.enabled)
            .allow_countries(self.allowed_countries.iter().cloned())
            .block_countries(self.blocked_countries.iter().cloned())
            .allow_networks(self.allowed_ip_blocks.iter().cloned())
            .block_networks(self.blocked_ip_blocks.iter().cloned())
            .allow_private(self.allow_private)
            .default_allow(self.default_allow)
            .reject_status_code(self.http_status_code_denied_request)
    }

    fn extractor(&self) -> Result<HeaderAddressExtractor, ConfigError> {
        if self.forwarded_headers.is_empty() {
            return Err(ConfigError::Invalid(
                "forwarded_headers must name at least one header".to_string(),
            ));
        }
        HeaderAddressExtractor::from_headers(&self.forwarded_headers)
            .map_err(|e| ConfigError::Invalid(format!("forwarded header name: {}", e)))
    }
}
