//! Connection layer for WinRM hosts.
//!
//! This module splits a WinRM session into two halves:
//!
//! - a **client** ([`WinRmClient`]) that knows the WinRS shell protocol and
//!   turns "run this command" into a sequence of SOAP messages, and
//! - a **transport** ([`Transporter`]) that moves those messages over HTTP and
//!   owns authentication and TLS.
//!
//! [`KerberosTransport`] is the transport this crate exists for. It answers
//! the server's `Negotiate` challenge with a Kerberos token, so no username or
//! password is ever configured; the caller's ticket cache is used instead.
//!
//! # Example
//!
//! ```rust,ignore
//! use winrm_krb5::connection::{Endpoint, KerberosTransport, Parameters, WinRmClient};
//!
//! let endpoint = Endpoint::new("windows-host.example.com", 5986).with_https(true);
//! let transport = KerberosTransport::with_default_credentials()?;
//! let client = WinRmClient::new(endpoint, Parameters::default(), transport)?;
//!
//! let result = client.run_with_output("whoami /all").await?;
//! println!("{}", result.combined_output());
//! ```

/// Endpoint (host, port, TLS) description.
pub mod endpoint;

/// SPNEGO authentication for HTTP.
pub mod negotiate;

/// SOAP message construction and parsing.
pub mod soap;

/// The pluggable transport contract and its Kerberos implementation.
pub mod transport;

/// Remote shell client.
pub mod winrm;

use thiserror::Error;

pub use endpoint::{Endpoint, DEFAULT_WINRM_PORT, DEFAULT_WINRM_SSL_PORT};
#[cfg(feature = "gssapi")]
pub use negotiate::GssapiNegotiator;
pub use negotiate::{NegotiateClient, NegotiateError, Negotiator, SecurityContext, TokenOnly};
pub use soap::SoapMessage;
pub use transport::{KerberosTransport, TransportError, TransportResult, Transporter};
pub use winrm::{Parameters, WinRmClient};

/// Errors that can occur while running a command on a WinRM host.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The transport failed to deliver a request or rejected the response.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Endpoint and session parameters contradict each other.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server answered, but not with what the shell protocol expects.
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// Writing command output locally failed.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Result of a command run with [`WinRmClient::run_with_output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 typically indicates success).
    pub exit_code: i32,
    /// Content written to standard output.
    pub stdout: String,
    /// Content written to standard error.
    pub stderr: String,
    /// Convenience flag: `true` if `exit_code == 0`.
    pub success: bool,
}

impl CommandResult {
    /// Create a new successful command result
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
        }
    }

    /// Create a new failed command result
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
        }
    }

    /// Get the combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}
