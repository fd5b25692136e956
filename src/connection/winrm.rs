//! Minimal WinRM remote shell client.
//!
//! [`WinRmClient`] runs one command at a time in a WinRS cmd shell and
//! streams its output. It never touches the network itself: every request
//! goes through the [`Transporter`] it was built with, which is where
//! authentication happens.
//!
//! # Example
//!
//! ```rust,ignore
//! use winrm_krb5::connection::{Endpoint, KerberosTransport, Parameters, WinRmClient};
//!
//! let client = WinRmClient::new(
//!     Endpoint::new("windows-host.example.com", 5985),
//!     Parameters::default(),
//!     KerberosTransport::with_default_credentials()?,
//! )?;
//!
//! let result = client.run_with_output("hostname").await?;
//! println!("Output: {}", result.stdout);
//! ```

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::endpoint::Endpoint;
use super::soap::{self, MessageFactory};
use super::transport::{TransportError, Transporter};
use super::{CommandResult, ConnectionError, ConnectionResult};

/// Default WS-Management operation timeout
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum envelope size in bytes
pub const DEFAULT_MAX_ENVELOPE_SIZE: u32 = 153_600;

/// Default locale
pub const DEFAULT_LOCALE: &str = "en-US";

/// UTF-8 console code page
pub const DEFAULT_CODEPAGE: u32 = 65001;

// ============================================================================
// Parameters
// ============================================================================

/// Protocol parameters for a client session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameters {
    /// How long the server may hold a request (notably `Receive`) open
    pub operation_timeout: Duration,
    /// Locale for messages and data
    pub locale: String,
    /// Maximum envelope size the server may send back
    pub max_envelope_size: u32,
    /// Console code page for the remote shell
    pub codepage: u32,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            locale: DEFAULT_LOCALE.to_string(),
            max_envelope_size: DEFAULT_MAX_ENVELOPE_SIZE,
            codepage: DEFAULT_CODEPAGE,
        }
    }
}

impl Parameters {
    /// Operation timeout as an ISO 8601 duration, e.g. `PT60S`.
    pub fn operation_timeout_iso8601(&self) -> String {
        let millis = self.operation_timeout.subsec_millis();
        if millis == 0 {
            format!("PT{}S", self.operation_timeout.as_secs())
        } else {
            format!("PT{}.{:03}S", self.operation_timeout.as_secs(), millis)
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Runs commands on a Windows host through a pluggable transport.
#[derive(Debug)]
pub struct WinRmClient<T: Transporter> {
    endpoint: Endpoint,
    parameters: Parameters,
    transport: T,
    messages: MessageFactory,
}

impl<T: Transporter> WinRmClient<T> {
    /// Configure `transport` for `endpoint` and wrap it in a client.
    ///
    /// Fails when a non-zero request timeout does not exceed the operation
    /// timeout: the request would expire before the server's timeout fault.
    pub fn new(endpoint: Endpoint, parameters: Parameters, mut transport: T) -> ConnectionResult<Self> {
        check_timeouts(&endpoint, &parameters)?;
        transport.configure(&endpoint)?;

        let to = transport.endpoint_url().unwrap_or_else(|| endpoint.url());
        let messages = MessageFactory::new(
            to,
            parameters.max_envelope_size,
            parameters.operation_timeout_iso8601(),
            parameters.locale.clone(),
            parameters.codepage,
        );

        Ok(Self {
            endpoint,
            parameters,
            transport,
            messages,
        })
    }

    /// Endpoint this client talks to
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Session parameters
    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run `command` in a fresh cmd shell and return its exit code.
    ///
    /// Output is written to `stdout` and `stderr` as it arrives. The shell is
    /// deleted afterwards, also when the command fails.
    pub async fn run<O, E>(&self, command: &str, stdout: &mut O, stderr: &mut E) -> ConnectionResult<i32>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        debug!(host = %self.endpoint.host, command = %command, "Executing WinRM command");

        let shell_id = self.create_shell().await?;
        let result = self.run_in_shell(&shell_id, command, stdout, stderr).await;

        if let Err(e) = self.delete_shell(&shell_id).await {
            warn!(shell_id = %shell_id, error = %e, "Failed to delete shell");
        }

        if let Ok(exit_code) = &result {
            trace!(exit_code = %exit_code, "WinRM command completed");
        }
        result
    }

    /// Run `command` and collect its output in memory.
    pub async fn run_with_output(&self, command: &str) -> ConnectionResult<CommandResult> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let exit_code = self.run(command, &mut stdout, &mut stderr).await?;

        let stdout = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(&stderr).into_owned();
        if exit_code == 0 {
            Ok(CommandResult::success(stdout, stderr))
        } else {
            Ok(CommandResult::failure(exit_code, stdout, stderr))
        }
    }

    /// Run a PowerShell script and return its exit code.
    pub async fn run_powershell<O, E>(
        &self,
        script: &str,
        stdout: &mut O,
        stderr: &mut E,
    ) -> ConnectionResult<i32>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        self.run(&powershell_command(script), stdout, stderr).await
    }

    async fn run_in_shell<O, E>(
        &self,
        shell_id: &str,
        command: &str,
        stdout: &mut O,
        stderr: &mut E,
    ) -> ConnectionResult<i32>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let command_id = self.start_command(shell_id, command).await?;
        let result = self
            .receive_output(shell_id, &command_id, stdout, stderr)
            .await;

        if let Err(e) = self.signal_terminate(shell_id, &command_id).await {
            warn!(
                shell_id = %shell_id,
                command_id = %command_id,
                error = %e,
                "Failed to signal command termination"
            );
        }

        result
    }

    async fn create_shell(&self) -> ConnectionResult<String> {
        let body = self.transport.post(&self.messages.create_shell()).await?;
        let shell_id = soap::parse_shell_id(&body).ok_or_else(|| {
            ConnectionError::ExecutionFailed("Failed to parse shell ID from response".to_string())
        })?;

        debug!(shell_id = %shell_id, "Created WinRM shell");
        Ok(shell_id)
    }

    async fn start_command(&self, shell_id: &str, command: &str) -> ConnectionResult<String> {
        let body = self
            .transport
            .post(&self.messages.command(shell_id, command, &[]))
            .await?;
        soap::parse_command_id(&body).ok_or_else(|| {
            ConnectionError::ExecutionFailed("Failed to parse command ID from response".to_string())
        })
    }

    async fn receive_output<O, E>(
        &self,
        shell_id: &str,
        command_id: &str,
        stdout: &mut O,
        stderr: &mut E,
    ) -> ConnectionResult<i32>
    where
        O: AsyncWrite + Unpin + Send,
        E: AsyncWrite + Unpin + Send,
    {
        let mut exit_code = 0;

        loop {
            let message = self.messages.receive(shell_id, command_id);
            let body = match self.transport.post(&message).await {
                Ok(body) => body,
                Err(TransportError::HttpStatus { body, .. }) if soap::is_operation_timeout(&body) => {
                    trace!(command_id = %command_id, "Receive timed out, polling again");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let output = soap::parse_receive(&body);
            if !output.stdout.is_empty() {
                stdout.write_all(&output.stdout).await?;
                stdout.flush().await?;
            }
            if !output.stderr.is_empty() {
                stderr.write_all(&output.stderr).await?;
                stderr.flush().await?;
            }
            if let Some(code) = output.exit_code {
                exit_code = code;
            }
            if output.done {
                return Ok(exit_code);
            }
        }
    }

    async fn signal_terminate(&self, shell_id: &str, command_id: &str) -> ConnectionResult<()> {
        self.transport
            .post(&self.messages.signal_terminate(shell_id, command_id))
            .await?;
        Ok(())
    }

    async fn delete_shell(&self, shell_id: &str) -> ConnectionResult<()> {
        self.transport
            .post(&self.messages.delete_shell(shell_id))
            .await?;
        debug!(shell_id = %shell_id, "Deleted WinRM shell");
        Ok(())
    }
}

fn check_timeouts(endpoint: &Endpoint, parameters: &Parameters) -> ConnectionResult<()> {
    let request = endpoint.timeout;
    let operation = parameters.operation_timeout;
    if !request.is_zero() && !operation.is_zero() && request <= operation {
        return Err(ConnectionError::InvalidConfig(format!(
            "request timeout ({}s) must be greater than the operation timeout ({}s)",
            request.as_secs_f64(),
            operation.as_secs_f64()
        )));
    }
    Ok(())
}

/// Command line running `script` through `powershell.exe -EncodedCommand`.
pub fn powershell_command(script: &str) -> String {
    let script_unicode: Vec<u8> = script
        .encode_utf16()
        .flat_map(|c| c.to_le_bytes())
        .collect();
    let encoded = BASE64_STANDARD.encode(&script_unicode);
    format!(
        "powershell.exe -NoProfile -NonInteractive -EncodedCommand {}",
        encoded
    )
}
