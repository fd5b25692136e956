//! Pluggable WinRM transport and its Kerberos implementation.
//!
//! A WinRM client talks to the server only through the [`Transporter`]
//! contract: configure once from an [`Endpoint`], then post SOAP messages and
//! get raw response bodies back. [`KerberosTransport`] implements it on top of
//! a [`NegotiateClient`], so requests are authenticated with Kerberos/SPNEGO
//! instead of Basic or NTLM.
//!
//! # Example
//!
//! ```rust,ignore
//! use winrm_krb5::connection::{Endpoint, KerberosTransport, Parameters, WinRmClient};
//!
//! let transport = KerberosTransport::with_default_credentials()?;
//! let endpoint = Endpoint::new("winserver.example.com", 5985);
//! let client = WinRmClient::new(endpoint, Parameters::default(), transport)?;
//! let exit_code = client
//!     .run("ipconfig /all", &mut tokio::io::stdout(), &mut tokio::io::stderr())
//!     .await?;
//! ```

use std::borrow::Cow;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Certificate, Client, StatusCode};
use thiserror::Error;
use tracing::{debug, trace};

use super::endpoint::{Endpoint, WSMAN_PATH};
use super::negotiate::{NegotiateClient, NegotiateError, Negotiator};
use super::soap::SoapMessage;

/// Media type WinRM speaks
pub const SOAP_XML: &str = "application/soap+xml";

/// Content type sent with every request
pub const SOAP_CONTENT_TYPE: &str = "application/soap+xml;charset=UTF-8";

/// Longest response body quoted in an error message, in characters
pub const ERROR_BODY_LIMIT: usize = 100;

/// Placeholder quoted for an empty response body
pub const NO_HTTP_CONTENT: &str = "<no http content>";

/// Errors produced by a [`Transporter`].
#[derive(Error, Debug)]
pub enum TransportError {
    /// Endpoint settings could not be applied.
    #[error("Invalid transport configuration: {0}")]
    InvalidConfig(String),

    /// `post` was called before a successful `configure`.
    #[error("Transport is not configured")]
    NotConfigured,

    /// The request did not complete (connection refused, TLS failure, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Kerberos token generation failed.
    #[error("Kerberos negotiation failed: {0}")]
    Negotiation(#[from] NegotiateError),

    /// The response body could not be read.
    #[error("reading http response body: {0}")]
    Body(#[source] reqwest::Error),

    /// The server answered with a status other than 200.
    #[error("http error {status}: {}", error_body(.body))]
    HttpStatus {
        /// HTTP status code
        status: u16,
        /// Full response body
        body: String,
    },

    /// The server answered 200 with a non-SOAP content type.
    #[error(
        "incorrect Content-Type \"{content_type}\" (expected {}): {}",
        SOAP_XML,
        error_body(.body)
    )]
    ContentType {
        /// Content type the server sent
        content_type: String,
        /// Full response body
        body: String,
    },
}

impl TransportError {
    /// Response body attached to a status or content-type failure.
    pub fn body(&self) -> Option<&str> {
        match self {
            TransportError::HttpStatus { body, .. } | TransportError::ContentType { body, .. } => {
                Some(body)
            }
            _ => None,
        }
    }

    /// HTTP status of a status failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Shorten a response body for an error message.
///
/// Bodies longer than [`ERROR_BODY_LIMIT`] characters are cut and suffixed
/// with `...`; an empty body becomes [`NO_HTTP_CONTENT`].
pub fn error_body(body: &str) -> Cow<'_, str> {
    if body.is_empty() {
        return Cow::Borrowed(NO_HTTP_CONTENT);
    }
    match body.char_indices().nth(ERROR_BODY_LIMIT) {
        Some((cut, _)) => Cow::Owned(format!("{}...", &body[..cut])),
        None => Cow::Borrowed(body),
    }
}

/// Contract between a WinRM client and the component that moves its bytes.
#[async_trait]
pub trait Transporter: Send + Sync {
    /// Apply endpoint settings. May be called again to re-apply new settings.
    fn configure(&mut self, endpoint: &Endpoint) -> TransportResult<()>;

    /// Send one SOAP request and return the response body.
    async fn post(&self, message: &SoapMessage) -> TransportResult<String>;

    /// WS-Management URL of the configured endpoint, `None` before `configure`.
    fn endpoint_url(&self) -> Option<String>;
}

/// State that exists only once `configure` has succeeded.
#[derive(Debug)]
struct Configured {
    endpoint: Endpoint,
    client: NegotiateClient,
    request_url: String,
}

/// WinRM transport that authenticates with Kerberos/SPNEGO.
#[derive(Debug)]
pub struct KerberosTransport {
    negotiator: Arc<dyn Negotiator>,
    state: Option<Configured>,
}

impl KerberosTransport {
    /// Create an unconfigured transport that obtains tokens from `negotiator`.
    pub fn new(negotiator: impl Negotiator + 'static) -> Self {
        Self::from_shared(Arc::new(negotiator))
    }

    /// Same as [`KerberosTransport::new`] for an already shared negotiator.
    pub fn from_shared(negotiator: Arc<dyn Negotiator>) -> Self {
        Self {
            negotiator,
            state: None,
        }
    }

    /// Transport using the system GSSAPI library and ambient credentials.
    #[cfg(feature = "gssapi")]
    pub fn with_default_credentials() -> TransportResult<Self> {
        Ok(Self::new(super::negotiate::GssapiNegotiator::new()))
    }

    /// Transport using the system GSSAPI library and ambient credentials.
    ///
    /// Always fails: this build has no GSSAPI support.
    #[cfg(not(feature = "gssapi"))]
    pub fn with_default_credentials() -> TransportResult<Self> {
        Err(TransportError::InvalidConfig(
            "Kerberos authentication requires GSSAPI support; \
             rebuild with the `gssapi` feature"
                .to_string(),
        ))
    }

    /// Whether `configure` has succeeded at least once.
    pub fn is_configured(&self) -> bool {
        self.state.is_some()
    }

    /// The endpoint applied by the last successful `configure`.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.state.as_ref().map(|s| &s.endpoint)
    }
}

#[async_trait]
impl Transporter for KerberosTransport {
    fn configure(&mut self, endpoint: &Endpoint) -> TransportResult<()> {
        let mut builder = Client::builder().danger_accept_invalid_certs(endpoint.insecure);

        if !endpoint.timeout.is_zero() {
            builder = builder.timeout(endpoint.timeout);
        }

        if let Some(pem) = endpoint.ca_cert.as_deref().filter(|pem| !pem.is_empty()) {
            builder = builder.tls_built_in_root_certs(false);
            for cert in parse_ca_bundle(pem)? {
                builder = builder.add_root_certificate(cert);
            }
        }

        // reqwest verifies against the URL host, so an override name becomes
        // the URL host and resolves to the real host's addresses.
        let mut request_url = endpoint.url();
        if let Some(server_name) = tls_server_name(endpoint) {
            builder = builder.dns_resolver(Arc::new(PinnedResolver {
                server_name: server_name.to_string(),
                host: endpoint.host.clone(),
            }));
            request_url = format!("https://{}:{}{}", server_name, endpoint.port, WSMAN_PATH);
        }

        let http = builder.build().map_err(|e| {
            TransportError::InvalidConfig(format!("Failed to create HTTP client: {}", e))
        })?;

        debug!(
            url = %request_url,
            insecure = endpoint.insecure,
            custom_ca = endpoint.ca_cert.is_some(),
            "Configured Kerberos transport"
        );

        self.state = Some(Configured {
            endpoint: endpoint.clone(),
            client: NegotiateClient::new(http, Arc::clone(&self.negotiator), &endpoint.host),
            request_url,
        });
        Ok(())
    }

    async fn post(&self, message: &SoapMessage) -> TransportResult<String> {
        let state = self.state.as_ref().ok_or(TransportError::NotConfigured)?;

        let response = state
            .client
            .post(&state.request_url, SOAP_CONTENT_TYPE, message.as_str())
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = response.text().await.map_err(TransportError::Body)?;

        trace!(
            status = status.as_u16(),
            content_type = %content_type,
            len = body.len(),
            "WinRM response"
        );

        if status != StatusCode::OK {
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        if !content_type.contains(SOAP_XML) {
            return Err(TransportError::ContentType { content_type, body });
        }

        Ok(body)
    }

    fn endpoint_url(&self) -> Option<String> {
        self.endpoint().map(Endpoint::url)
    }
}

/// Server-name override that actually changes what gets verified.
fn tls_server_name(endpoint: &Endpoint) -> Option<&str> {
    endpoint
        .tls_server_name
        .as_deref()
        .filter(|name| endpoint.https && !name.is_empty() && *name != endpoint.host)
}

/// Resolves the TLS server name to the configured host, at request time.
#[derive(Debug)]
struct PinnedResolver {
    server_name: String,
    host: String,
}

impl PinnedResolver {
    fn target<'a>(&'a self, name: &'a str) -> &'a str {
        if name.eq_ignore_ascii_case(&self.server_name) {
            &self.host
        } else {
            name
        }
    }
}

impl Resolve for PinnedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let target = self.target(name.as_str()).to_string();
        Box::pin(async move {
            // The connector replaces the port with the one from the URL.
            let addrs = tokio::net::lookup_host((target, 0)).await?;
            Ok::<Addrs, Box<dyn std::error::Error + Send + Sync>>(Box::new(addrs))
        })
    }
}

/// Parse every certificate in a PEM bundle; an input without any is an error.
fn parse_ca_bundle(pem: &[u8]) -> TransportResult<Vec<Certificate>> {
    let mut reader = pem;
    let ders = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::InvalidConfig(format!("unable to read certificates: {}", e)))?;

    if ders.is_empty() {
        return Err(TransportError::InvalidConfig(
            "unable to read certificates".to_string(),
        ));
    }

    ders.iter()
        .map(|der| {
            Certificate::from_der(der.as_ref()).map_err(|e| {
                TransportError::InvalidConfig(format!("unable to read certificates: {}", e))
            })
        })
        .collect()
}
