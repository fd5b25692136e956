//! # winrm-krb5 - Kerberos transport for WinRM
//!
//! WinRM (WS-Management over HTTP) servers in an Active Directory domain
//! usually accept Kerberos through the HTTP `Negotiate` scheme. This crate
//! provides a transport that speaks it, so a WinRM client can authenticate
//! with the caller's Kerberos tickets instead of Basic or NTLM credentials.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 WinRmClient                   │
//! │   (shell create / command / receive / ...)    │
//! └──────────────────────────────────────────────┘
//!                        │ SoapMessage
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │      Transporter (KerberosTransport)          │
//! │  endpoint URL, TLS, status / content checks   │
//! └──────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │   NegotiateClient (reqwest + Negotiator)      │
//! │      answers 401 Negotiate challenges         │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use winrm_krb5::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = WinRmClient::new(
//!         Endpoint::new("win01.corp.example.com", 5985),
//!         Parameters::default(),
//!         KerberosTransport::with_default_credentials()?,
//!     )?;
//!
//!     let result = client.run_with_output("hostname").await?;
//!     println!("{}", result.stdout);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `gssapi`: token generation through the system GSSAPI library
//!   ([`connection::GssapiNegotiator`]). Without it, supply your own
//!   [`connection::Negotiator`].

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod connection;

pub mod prelude {
    //! Convenient re-exports of commonly used types and traits.

    #[cfg(feature = "gssapi")]
    pub use crate::connection::GssapiNegotiator;
    pub use crate::connection::{
        CommandResult, ConnectionError, ConnectionResult, Endpoint, KerberosTransport,
        NegotiateError, Negotiator, Parameters, SecurityContext, SoapMessage, TokenOnly,
        TransportError, TransportResult, Transporter, WinRmClient,
    };
}
