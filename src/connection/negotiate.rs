//! SPNEGO (HTTP `Negotiate`) authentication layer.
//!
//! [`NegotiateClient`] wraps a `reqwest::Client` and answers a
//! `401 Unauthorized` carrying `WWW-Authenticate: Negotiate` by asking a
//! [`Negotiator`] for a security context and replaying the request with
//! `Authorization: Negotiate <token>`. When the server answers with its own
//! `Negotiate <token>`, the context verifies it (mutual authentication).
//!
//! Token generation is delegated entirely to the [`Negotiator`]. The crate
//! ships [`GssapiNegotiator`] (feature `gssapi`) which uses the system
//! GSSAPI library and the caller's ambient Kerberos credentials, the same
//! ones `kinit` or a keytab (`KRB5_CLIENT_KTNAME`) provide.

use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, trace};

use super::transport::TransportResult;

/// HTTP authentication scheme name for SPNEGO
pub const NEGOTIATE_SCHEME: &str = "Negotiate";

/// Errors raised while producing or verifying a SPNEGO token.
#[derive(Error, Debug)]
pub enum NegotiateError {
    /// The GSSAPI library rejected the request.
    #[error("GSSAPI error: {0}")]
    Gssapi(String),

    /// The security context completed without producing a token.
    #[error("no initial token produced for {0}")]
    NoToken(String),

    /// The server could not prove its identity.
    #[error("mutual authentication failed: {0}")]
    MutualAuth(String),

    /// The blocking token task panicked or was cancelled.
    #[error("negotiation task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Client side of one SPNEGO exchange.
///
/// Created by a [`Negotiator`] for a single request. It owns the initial
/// token and checks the server's reply token, if any.
pub trait SecurityContext: Send {
    /// Token sent in the `Authorization` header.
    fn token(&self) -> &[u8];

    /// Feed the server's `WWW-Authenticate: Negotiate <token>` into the context.
    fn verify(&mut self, server_token: &[u8]) -> Result<(), NegotiateError>;

    /// Whether a successful response must carry a server token.
    fn requires_mutual_auth(&self) -> bool;
}

/// Produces SPNEGO security contexts for an HTTP service.
///
/// Implementations are called from the blocking thread pool, so they may
/// perform blocking library calls (GSSAPI talks to the KDC synchronously).
pub trait Negotiator: Send + Sync + fmt::Debug {
    /// Start a context for the `HTTP` service on `service_host`.
    fn init_context(&self, service_host: &str) -> Result<Box<dyn SecurityContext>, NegotiateError>;
}

/// A context that only carries a token and never asks for the server's proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenOnly(pub Vec<u8>);

impl SecurityContext for TokenOnly {
    fn token(&self) -> &[u8] {
        &self.0
    }

    fn verify(&mut self, _server_token: &[u8]) -> Result<(), NegotiateError> {
        Ok(())
    }

    fn requires_mutual_auth(&self) -> bool {
        false
    }
}

/// HTTP client that answers `Negotiate` challenges.
#[derive(Debug, Clone)]
pub struct NegotiateClient {
    http: Client,
    negotiator: Arc<dyn Negotiator>,
    service_host: String,
}

impl NegotiateClient {
    /// Wrap `http` so that 401 challenges are answered for `service_host`.
    pub fn new(
        http: Client,
        negotiator: Arc<dyn Negotiator>,
        service_host: impl Into<String>,
    ) -> Self {
        Self {
            http,
            negotiator,
            service_host: service_host.into(),
        }
    }

    /// POST `body` to `url`, performing one SPNEGO round trip if challenged.
    ///
    /// A response to the authenticated request is only returned once its
    /// server token, if any, has been verified. A success without a server
    /// token is rejected when the context requires mutual authentication.
    pub async fn post(
        &self,
        url: &str,
        content_type: &'static str,
        body: &str,
    ) -> TransportResult<Response> {
        let response = self.send(url, content_type, body, None).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }
        if !offers_negotiate(response.headers()) {
            debug!(url = %url, "401 without a Negotiate offer, not authenticating");
            return Ok(response);
        }

        debug!(service_host = %self.service_host, "Answering Negotiate challenge");
        let context = self.init_context().await?;
        let authorization = format!(
            "{} {}",
            NEGOTIATE_SCHEME,
            BASE64_STANDARD.encode(context.token())
        );
        let response = self
            .send(url, content_type, body, Some(authorization))
            .await?;

        // A rejected token is reported by the caller as a plain 401.
        if response.status() != StatusCode::UNAUTHORIZED {
            let server_token = negotiate_token(response.headers()).map(str::to_owned);
            verify_server(context, server_token, response.status().is_success()).await?;
        }

        Ok(response)
    }

    async fn send(
        &self,
        url: &str,
        content_type: &'static str,
        body: &str,
        authorization: Option<String>,
    ) -> TransportResult<Response> {
        let mut request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .body(body.to_owned());
        if let Some(value) = authorization {
            request = request.header(AUTHORIZATION, value);
        }
        Ok(request.send().await?)
    }

    async fn init_context(&self) -> Result<Box<dyn SecurityContext>, NegotiateError> {
        let negotiator = Arc::clone(&self.negotiator);
        let host = self.service_host.clone();
        tokio::task::spawn_blocking(move || negotiator.init_context(&host)).await?
    }
}

async fn verify_server(
    mut context: Box<dyn SecurityContext>,
    server_token: Option<String>,
    success: bool,
) -> Result<(), NegotiateError> {
    match server_token {
        Some(token) => {
            let token = BASE64_STANDARD.decode(token.as_bytes()).map_err(|e| {
                NegotiateError::MutualAuth(format!("malformed server token: {}", e))
            })?;
            trace!(len = token.len(), "Verifying server token");
            tokio::task::spawn_blocking(move || context.verify(&token)).await?
        }
        None if success && context.requires_mutual_auth() => Err(NegotiateError::MutualAuth(
            "server did not return a Negotiate token".to_string(),
        )),
        None => Ok(()),
    }
}

/// Whether any `WWW-Authenticate` challenge offers the Negotiate scheme.
pub fn offers_negotiate(headers: &HeaderMap) -> bool {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|challenge| challenge.split_whitespace().next())
        .any(|scheme| scheme.eq_ignore_ascii_case(NEGOTIATE_SCHEME))
}

/// Token carried by a `WWW-Authenticate: Negotiate <token>` header, if any.
fn negotiate_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| {
            let (scheme, token) = value.trim().split_once(' ')?;
            scheme
                .eq_ignore_ascii_case(NEGOTIATE_SCHEME)
                .then(|| token.trim())
        })
}

#[cfg(feature = "gssapi")]
pub use gssapi::GssapiNegotiator;

#[cfg(feature = "gssapi")]
mod gssapi {
    use libgssapi::context::{ClientCtx, CtxFlags, SecurityContext as _};
    use libgssapi::credential::{Cred, CredUsage};
    use libgssapi::error::Error as GssError;
    use libgssapi::name::Name;
    use libgssapi::oid::{OidSet, GSS_MECH_KRB5, GSS_NT_HOSTBASED_SERVICE};

    use super::{NegotiateError, Negotiator, SecurityContext};

    /// Service class of the target principal (`HTTP/host@REALM`)
    const SERVICE_CLASS: &str = "HTTP";

    /// Kerberos context provider backed by the system GSSAPI library.
    ///
    /// Credentials come from the default credential cache; nothing is
    /// acquired with a password. Contexts request mutual authentication, so
    /// the server must prove its identity in its response.
    #[derive(Debug, Clone, Default)]
    pub struct GssapiNegotiator;

    impl GssapiNegotiator {
        pub fn new() -> Self {
            Self
        }
    }

    fn gss(err: GssError) -> NegotiateError {
        NegotiateError::Gssapi(err.to_string())
    }

    struct GssapiContext {
        ctx: ClientCtx,
        token: Vec<u8>,
    }

    impl SecurityContext for GssapiContext {
        fn token(&self) -> &[u8] {
            &self.token
        }

        fn verify(&mut self, server_token: &[u8]) -> Result<(), NegotiateError> {
            if self.ctx.is_complete() {
                return Ok(());
            }
            match self.ctx.step(Some(server_token), None) {
                Ok(None) if self.ctx.is_complete() => Ok(()),
                Ok(_) => Err(NegotiateError::MutualAuth(
                    "security context incomplete after server token".to_string(),
                )),
                Err(e) => Err(NegotiateError::MutualAuth(e.to_string())),
            }
        }

        fn requires_mutual_auth(&self) -> bool {
            !self.ctx.is_complete()
        }
    }

    impl Negotiator for GssapiNegotiator {
        fn init_context(
            &self,
            service_host: &str,
        ) -> Result<Box<dyn SecurityContext>, NegotiateError> {
            let target = format!("{}@{}", SERVICE_CLASS, service_host);

            let mut mechs = OidSet::new().map_err(gss)?;
            mechs.add(&GSS_MECH_KRB5).map_err(gss)?;

            let name = Name::new(target.as_bytes(), Some(&GSS_NT_HOSTBASED_SERVICE))
                .and_then(|name| name.canonicalize(Some(&GSS_MECH_KRB5)))
                .map_err(gss)?;
            let cred =
                Cred::acquire(None, None, CredUsage::Initiate, Some(&mechs)).map_err(gss)?;

            let mut ctx = ClientCtx::new(
                Some(cred),
                name,
                CtxFlags::GSS_C_MUTUAL_FLAG,
                Some(&GSS_MECH_KRB5),
            );
            let token = ctx
                .step(None, None)
                .map_err(gss)?
                .ok_or(NegotiateError::NoToken(target))?
                .to_vec();

            Ok(Box::new(GssapiContext { ctx, token }))
        }
    }
}
