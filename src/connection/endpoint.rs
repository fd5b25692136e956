//! WinRM endpoint description.
//!
//! An [`Endpoint`] says how to reach a WinRM listener: where it is, whether to
//! speak HTTPS, and which TLS parameters to apply. It is handed to
//! [`Transporter::configure`](super::transport::Transporter::configure) once
//! per client session and is read-only from then on.

use std::fmt;
use std::time::Duration;

/// Default WinRM HTTP port
pub const DEFAULT_WINRM_PORT: u16 = 5985;

/// Default WinRM HTTPS port
pub const DEFAULT_WINRM_SSL_PORT: u16 = 5986;

/// Default request timeout: none.
///
/// A `Receive` is held open by the server for the whole operation timeout,
/// so a request timeout must stay above it or be disabled.
pub const DEFAULT_TIMEOUT: Duration = Duration::ZERO;

/// Path of the WS-Management service on the listener
pub const WSMAN_PATH: &str = "/wsman";

/// Network and TLS settings for a WinRM listener.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Target hostname or IP address
    pub host: String,
    /// Listener port
    pub port: u16,
    /// Use HTTPS instead of HTTP
    pub https: bool,
    /// Skip server certificate verification
    pub insecure: bool,
    /// Name to verify the server certificate against, instead of `host`
    pub tls_server_name: Option<String>,
    /// PEM-encoded CA certificates that replace the built-in trust roots
    pub ca_cert: Option<Vec<u8>>,
    /// Request timeout; zero disables it
    pub timeout: Duration,
}

impl Endpoint {
    /// Create an endpoint for `host:port` over plain HTTP with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            https: false,
            insecure: false,
            tls_server_name: None,
            ca_cert: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Enable or disable HTTPS
    pub fn with_https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    /// Skip (or enforce) certificate verification
    pub fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Verify the server certificate against `name`
    pub fn with_tls_server_name(mut self, name: impl Into<String>) -> Self {
        self.tls_server_name = Some(name.into());
        self
    }

    /// Trust only the CA certificates in this PEM bundle
    pub fn with_ca_cert(mut self, pem: impl Into<Vec<u8>>) -> Self {
        self.ca_cert = Some(pem.into());
        self
    }

    /// Set the request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL scheme implied by the HTTPS flag
    pub fn scheme(&self) -> &'static str {
        if self.https {
            "https"
        } else {
            "http"
        }
    }

    /// The WS-Management URL, e.g. `http://host:5985/wsman`.
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme(), self.host, self.port, WSMAN_PATH)
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_WINRM_PORT)
    }
}

// CA bytes can be large; keep Debug output readable.
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("https", &self.https)
            .field("insecure", &self.insecure)
            .field("tls_server_name", &self.tls_server_name)
            .field("ca_cert", &self.ca_cert.as_ref().map(|c| c.len()))
            .field("timeout", &self.timeout)
            .finish()
    }
}
