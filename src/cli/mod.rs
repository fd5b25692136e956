//! CLI module for winrm-krb5
//!
//! Argument parsing and the mapping from flags, environment and the
//! configuration file onto an [`Endpoint`].

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use winrm_krb5::config::Config;
use winrm_krb5::connection::endpoint::DEFAULT_TIMEOUT;
use winrm_krb5::connection::{Endpoint, DEFAULT_WINRM_PORT, DEFAULT_WINRM_SSL_PORT};

/// Default WinRM server
pub const DEFAULT_HOST: &str = "localhost";

/// Exit status for bad command-line usage
pub const USAGE_EXIT_CODE: i32 = 1;

/// Run one command on a Windows host over WinRM, authenticating with Kerberos.
///
/// Credentials come from the Kerberos ticket cache (run `kinit` first).
#[derive(Parser, Debug, Clone)]
#[command(name = "winrm-krb5")]
#[command(version)]
#[command(about = "Run a command on a Windows host over WinRM with Kerberos authentication", long_about = None)]
pub struct Cli {
    /// Command to execute on the remote host
    pub command: String,

    /// WinRM server [default: localhost]
    #[arg(long, env = "WINRM_HOST")]
    pub host: Option<String>,

    /// WinRM port [default: 5985, or 5986 with --https]
    #[arg(long, env = "WINRM_PORT")]
    pub port: Option<u16>,

    /// Connect over HTTPS
    #[arg(long)]
    pub https: bool,

    /// Skip server certificate verification
    #[arg(long)]
    pub insecure: bool,

    /// Verify the server certificate against this name instead of the host
    #[arg(long, value_name = "NAME")]
    pub tls_server_name: Option<String>,

    /// PEM file with the CA certificates to trust
    #[arg(long, value_name = "PATH")]
    pub ca_cert: Option<PathBuf>,

    /// Request timeout in seconds, above the operation timeout [default: none]
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Treat COMMAND as a PowerShell script
    #[arg(long)]
    pub powershell: bool,

    /// Path to configuration file
    #[arg(short = 'c', long, env = "WINRM_KRB5_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Parse command-line arguments.
    ///
    /// Usage errors print the message and usage to stderr and exit with
    /// status 1. `--help` and `--version` exit normally.
    pub fn parse_args() -> Self {
        match Cli::try_parse() {
            Ok(cli) => cli,
            Err(e) => match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
                _ => {
                    let _ = e.print();
                    std::process::exit(USAGE_EXIT_CODE);
                }
            },
        }
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Build the endpoint: flags win over the configuration file.
    pub fn endpoint(&self, config: &Config) -> Result<Endpoint> {
        let file = &config.endpoint;

        let host = self
            .host
            .clone()
            .or_else(|| file.host.clone())
            .unwrap_or_else(|| DEFAULT_HOST.to_string());
        let https = self.https || file.https;
        let default_port = if https {
            DEFAULT_WINRM_SSL_PORT
        } else {
            DEFAULT_WINRM_PORT
        };
        let port = self.port.or(file.port).unwrap_or(default_port);
        let timeout = self
            .timeout
            .map(Duration::from_secs)
            .or(file.timeout)
            .unwrap_or(DEFAULT_TIMEOUT);

        let mut endpoint = Endpoint::new(host, port)
            .with_https(https)
            .with_insecure(self.insecure || file.insecure)
            .with_timeout(timeout);

        if let Some(name) = self.tls_server_name.as_ref().or(file.tls_server_name.as_ref()) {
            endpoint = endpoint.with_tls_server_name(name.clone());
        }

        if let Some(path) = self.ca_cert.as_ref().or(file.ca_cert.as_ref()) {
            let pem = std::fs::read(path)
                .with_context(|| format!("Failed to read CA cert: {}", path.display()))?;
            endpoint = endpoint.with_ca_cert(pem);
        }

        Ok(endpoint)
    }
}
