//! winrm-krb5 - run a command on a Windows host over WinRM with Kerberos
//!
//! This is the main entry point for the CLI. It wires the Kerberos transport
//! into a WinRM client, runs one command and streams its output.

mod cli;

use anyhow::{Context, Result};
use cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use winrm_krb5::config::Config;
use winrm_krb5::connection::{KerberosTransport, WinRmClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    let config = Config::load(cli.config.as_deref())?;
    let endpoint = cli.endpoint(&config)?;
    let parameters = config.parameters();

    tracing::info!(endpoint = %endpoint.url(), "Connecting to WinRM endpoint");

    // No username or password: the ticket cache authenticates us.
    let transport = KerberosTransport::with_default_credentials()?;
    let client = WinRmClient::new(endpoint, parameters, transport)
        .context("Failed to configure WinRM transport")?;

    let mut stdout = tokio::io::stdout();
    let mut stderr = tokio::io::stderr();
    let exit_code = if cli.powershell {
        client
            .run_powershell(&cli.command, &mut stdout, &mut stderr)
            .await?
    } else {
        client.run(&cli.command, &mut stdout, &mut stderr).await?
    };

    tracing::debug!(exit_code, "Remote command finished");
    std::process::exit(exit_code);
}

/// Initialize logging based on verbosity level
///
/// Logs go to stderr; stdout carries the remote command's output.
fn init_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(verbosity >= 3),
        )
        .with(env_filter)
        .init();
}
