//! Configuration module for winrm-krb5
//!
//! Settings come from, in increasing order of precedence:
//! - Built-in defaults
//! - Configuration file (`$XDG_CONFIG_HOME/winrm-krb5/config.toml`, or `--config`)
//! - Environment variables and command-line flags (handled by the CLI)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::Parameters;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where and how to connect
    pub endpoint: EndpointConfig,

    /// WS-Management protocol settings
    pub client: ClientConfig,
}

/// Endpoint settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// WinRM server
    pub host: Option<String>,

    /// WinRM port
    pub port: Option<u16>,

    /// Use HTTPS
    pub https: bool,

    /// Skip certificate verification
    pub insecure: bool,

    /// Name to verify the server certificate against
    pub tls_server_name: Option<String>,

    /// PEM file with trusted CA certificates
    pub ca_cert: Option<PathBuf>,

    /// Request timeout, e.g. "90s" or "2m"; unset or "0s" disables it
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

/// Protocol settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Operation timeout, e.g. "60s"
    #[serde(with = "humantime_serde")]
    pub operation_timeout: Option<Duration>,

    /// Locale sent with every request
    pub locale: Option<String>,

    /// Maximum envelope size in bytes
    pub max_envelope_size: Option<u32>,

    /// Remote console code page
    pub codepage: Option<u32>,
}

impl Config {
    /// Load configuration from `explicit_path`, or the default location if present.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => Ok(Self::default()),
            },
        }
    }

    /// Default configuration file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("winrm-krb5").join("config.toml"))
    }

    /// Read and parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Protocol parameters with file values applied over the defaults
    pub fn parameters(&self) -> Parameters {
        let defaults = Parameters::default();
        Parameters {
            operation_timeout: self
                .client
                .operation_timeout
                .unwrap_or(defaults.operation_timeout),
            locale: self.client.locale.clone().unwrap_or(defaults.locale),
            max_envelope_size: self
                .client
                .max_envelope_size
                .unwrap_or(defaults.max_envelope_size),
            codepage: self.client.codepage.unwrap_or(defaults.codepage),
        }
    }
}
