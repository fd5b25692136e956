//! Shared test utilities for the winrm-krb5 test suite.
//!
//! This module provides:
//! - Negotiator test doubles that count their calls
//! - Helpers to point a transport at a `wiremock` server
//! - Canned WinRM SOAP responses
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use wiremock::{MockServer, ResponseTemplate};

use winrm_krb5::connection::{
    Endpoint, KerberosTransport, NegotiateError, Negotiator, SecurityContext, Transporter,
};

/// Content type a WinRM listener answers with
pub const SOAP_RESPONSE_TYPE: &str = "application/soap+xml;charset=UTF-8";

// ============================================================================
// Negotiators
// ============================================================================

/// Negotiator that hands out a fixed token and records who asked.
///
/// Its contexts record the server tokens they are asked to verify. By
/// default they accept any server token and do not insist on one.
#[derive(Debug, Clone)]
pub struct StaticNegotiator {
    token: Vec<u8>,
    mutual: bool,
    accept_server: bool,
    calls: Arc<AtomicUsize>,
    hosts: Arc<Mutex<Vec<String>>>,
    server_tokens: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl StaticNegotiator {
    pub fn new(token: &[u8]) -> Self {
        Self {
            token: token.to_vec(),
            mutual: false,
            accept_server: true,
            calls: Arc::new(AtomicUsize::new(0)),
            hosts: Arc::new(Mutex::new(Vec::new())),
            server_tokens: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Contexts insist on a server token in successful responses.
    pub fn requiring_mutual_auth(mut self) -> Self {
        self.mutual = true;
        self
    }

    /// Contexts refuse every server token.
    pub fn rejecting_server_tokens(mut self) -> Self {
        self.accept_server = false;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }

    pub fn server_tokens(&self) -> Vec<Vec<u8>> {
        self.server_tokens.lock().unwrap().clone()
    }
}

impl Negotiator for StaticNegotiator {
    fn init_context(&self, service_host: &str) -> Result<Box<dyn SecurityContext>, NegotiateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.hosts.lock().unwrap().push(service_host.to_string());
        Ok(Box::new(StaticContext {
            token: self.token.clone(),
            mutual: self.mutual,
            accept_server: self.accept_server,
            server_tokens: Arc::clone(&self.server_tokens),
        }))
    }
}

struct StaticContext {
    token: Vec<u8>,
    mutual: bool,
    accept_server: bool,
    server_tokens: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl SecurityContext for StaticContext {
    fn token(&self) -> &[u8] {
        &self.token
    }

    fn verify(&mut self, server_token: &[u8]) -> Result<(), NegotiateError> {
        self.server_tokens.lock().unwrap().push(server_token.to_vec());
        if self.accept_server {
            Ok(())
        } else {
            Err(NegotiateError::MutualAuth("server token rejected".to_string()))
        }
    }

    fn requires_mutual_auth(&self) -> bool {
        self.mutual
    }
}

/// Negotiator that always fails, like a host without a ticket cache.
#[derive(Debug, Clone, Default)]
pub struct FailingNegotiator;

impl Negotiator for FailingNegotiator {
    fn init_context(&self, _service_host: &str) -> Result<Box<dyn SecurityContext>, NegotiateError> {
        Err(NegotiateError::Gssapi(
            "No Kerberos credentials available".to_string(),
        ))
    }
}

// ============================================================================
// Endpoints and transports
// ============================================================================

/// Plain HTTP endpoint for a mock server.
pub fn endpoint_for(server: &MockServer) -> Endpoint {
    let addr = server.address();
    Endpoint::new(addr.ip().to_string(), addr.port())
}

/// Kerberos transport already configured for a mock server.
pub fn transport_for(server: &MockServer, negotiator: impl Negotiator + 'static) -> KerberosTransport {
    let mut transport = KerberosTransport::new(negotiator);
    transport
        .configure(&endpoint_for(server))
        .expect("configure transport for mock server");
    transport
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// ============================================================================
// Canned responses
// ============================================================================

/// 200 response with a SOAP content type.
pub fn soap_ok(body: impl Into<String>) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(body.into(), SOAP_RESPONSE_TYPE)
}

/// 200 SOAP response that also carries the server's Negotiate token.
pub fn soap_ok_with_server_token(body: impl Into<String>, token_b64: &str) -> ResponseTemplate {
    soap_ok(body).insert_header("WWW-Authenticate", format!("Negotiate {}", token_b64).as_str())
}

/// Wrap `body` in a SOAP envelope.
pub fn envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<s:Envelope xmlns:s="http://www.w3.org/2003/05/soap-envelope" xmlns:rsp="http://schemas.microsoft.com/wbem/wsman/1/windows/shell">
  <s:Header/>
  <s:Body>{}</s:Body>
</s:Envelope>"#,
        body
    )
}

pub fn shell_created(shell_id: &str) -> String {
    envelope(&format!(
        "<rsp:Shell><rsp:ShellId>{}</rsp:ShellId></rsp:Shell>",
        shell_id
    ))
}

pub fn command_started(command_id: &str) -> String {
    envelope(&format!(
        "<rsp:CommandResponse><rsp:CommandId>{}</rsp:CommandId></rsp:CommandResponse>",
        command_id
    ))
}

/// Receive response carrying base64 stream chunks; `exit_code` marks it done.
pub fn received(command_id: &str, stdout_b64: &str, stderr_b64: &str, exit_code: Option<i32>) -> String {
    let state = match exit_code {
        Some(code) => format!(
            r#"<rsp:CommandState CommandId="{id}" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Done"><rsp:ExitCode>{code}</rsp:ExitCode></rsp:CommandState>"#,
            id = command_id,
            code = code
        ),
        None => format!(
            r#"<rsp:CommandState CommandId="{id}" State="http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState/Running"/>"#,
            id = command_id
        ),
    };
    envelope(&format!(
        r#"<rsp:ReceiveResponse><rsp:Stream Name="stdout" CommandId="{id}">{out}</rsp:Stream><rsp:Stream Name="stderr" CommandId="{id}">{err}</rsp:Stream>{state}</rsp:ReceiveResponse>"#,
        id = command_id,
        out = stdout_b64,
        err = stderr_b64,
        state = state
    ))
}

/// The fault a listener returns when a Receive outlives its operation timeout.
pub fn operation_timeout_fault() -> ResponseTemplate {
    ResponseTemplate::new(500).set_body_raw(
        envelope(
            r#"<s:Fault><s:Code><s:Value>s:Receiver</s:Value></s:Code><s:Detail><f:WSManFault xmlns:f="http://schemas.microsoft.com/wbem/wsman/1/wsmanfault" Code="2150858793" Machine="win01"/></s:Detail></s:Fault>"#,
        ),
        SOAP_RESPONSE_TYPE,
    )
}
