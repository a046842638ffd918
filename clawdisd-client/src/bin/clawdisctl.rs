//! Command-line front end for the Clawdis action daemon.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use clawdis_ipc::{Capability, Response};
use clawdisd_client::{ClawdisClient, DEFAULT_SOCK};

#[derive(Parser, Debug)]
#[command(name = "clawdisctl")]
#[command(about = "Talk to the Clawdis action daemon", version)]
struct Cli {
    /// Socket path
    #[arg(long, default_value = DEFAULT_SOCK)]
    socket: PathBuf,

    /// Give up after this many seconds per call
    #[arg(long, default_value_t = 30.0)]
    timeout: f64,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Check that the daemon is up
    Status,
    /// Post a desktop notification
    Notify {
        title: String,
        body: String,
        /// Notification sound name
        #[arg(long)]
        sound: Option<String>,
    },
    /// Check (and optionally request) capability grants
    Permissions {
        /// Capabilities to check; all of them when omitted
        #[arg(value_parser = clap::value_parser!(Capability))]
        capabilities: Vec<Capability>,
        /// Allow OS permission prompts
        #[arg(long)]
        interactive: bool,
    },
    /// Capture the screen to a PNG file
    Screenshot {
        /// Write the PNG here
        output: PathBuf,
        /// Capture this display instead of the main one
        #[arg(long)]
        display: Option<u32>,
        /// Capture this window instead of a display
        #[arg(long)]
        window: Option<u32>,
    },
    /// Run a command through the daemon
    Run {
        /// Working directory
        #[arg(long)]
        cwd: Option<String>,
        /// Kill the command after this many seconds
        #[arg(long)]
        timeout: Option<f64>,
        /// Program and arguments
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client =
        ClawdisClient::with_reply_timeout(&cli.socket, Duration::from_secs_f64(cli.timeout));

    match cli.command {
        Cmd::Status => {
            let response = client.status().await?;
            report(&response)
        }
        Cmd::Notify { title, body, sound } => {
            let response = client.notify(title, body, sound).await?;
            report(&response)
        }
        Cmd::Permissions {
            capabilities,
            interactive,
        } => {
            let capabilities: BTreeSet<Capability> = if capabilities.is_empty() {
                Capability::ALL.into_iter().collect()
            } else {
                capabilities.into_iter().collect()
            };
            let response = client.ensure_permissions(capabilities, interactive).await?;
            report(&response)
        }
        Cmd::Screenshot {
            output,
            display,
            window,
        } => {
            let response = client.screenshot(display, window).await?;
            if !response.ok {
                return report(&response);
            }
            let png = response
                .payload
                .as_deref()
                .context("daemon returned no image data")?;
            std::fs::write(&output, png)
                .with_context(|| format!("failed to write {}", output.display()))?;
            println!("wrote {} bytes to {}", png.len(), output.display());
            Ok(())
        }
        Cmd::Run {
            cwd,
            timeout,
            command,
        } => {
            let response = client
                .run_shell(command, cwd, None, timeout, false)
                .await?;
            if let Some(output) = &response.payload {
                std::io::stdout().write_all(output)?;
            }
            if response.ok {
                Ok(())
            } else {
                bail!("{}", response.message.as_deref().unwrap_or("failed"))
            }
        }
    }
}

fn report(response: &Response) -> Result<()> {
    let message = response.message.as_deref().unwrap_or_default();
    if response.ok {
        if message.is_empty() {
            println!("ok");
        } else {
            println!("ok: {message}");
        }
        Ok(())
    } else {
        bail!("{}", if message.is_empty() { "failed" } else { message })
    }
}
