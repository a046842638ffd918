//! Clawdis privileged action daemon.
//!
//! Listens on a Unix domain socket for length-framed requests, dispatches
//! them through the action broker, and streams framed responses back. One
//! task per connection; connections may pipeline multiple requests.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use clawdis_ipc::wire::{read_frame, write_frame};
use clawdisd::authorizer::HostAuthorizer;
use clawdisd::broker::ActionBroker;
use clawdisd::capture::CaptureService;
use clawdisd::notify::DesktopNotifier;
use clawdisd::settings::FileSettings;
use clawdisd::watcher::PermissionWatcher;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal;
use tracing::{debug, error, info};

const DEFAULT_SOCK: &str = "/tmp/clawdisd.sock";

#[derive(Parser, Debug)]
#[command(name = "clawdisd")]
#[command(about = "Clawdis privileged action daemon", version)]
struct Cli {
    /// Socket path
    #[arg(long, default_value = DEFAULT_SOCK)]
    socket: PathBuf,

    /// Settings file (or use CLAWDIS_SETTINGS env var)
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings_path = cli
        .settings
        .or_else(|| std::env::var_os("CLAWDIS_SETTINGS").map(PathBuf::from))
        .unwrap_or_else(FileSettings::default_path);
    info!("reading settings from {}", settings_path.display());

    let authorizer = Arc::new(HostAuthorizer::new());
    let broker = Arc::new(ActionBroker::new(
        Arc::new(FileSettings::new(&settings_path)),
        authorizer.clone(),
        Arc::new(DesktopNotifier::new()),
        Arc::new(CaptureService::new()),
    ));

    // The daemon keeps one standing observer so grant changes surface in
    // the logs while it is up.
    let watcher = PermissionWatcher::new(authorizer);
    watcher.register();
    let mut permission_rx = watcher.subscribe();
    tokio::spawn(async move {
        while permission_rx.changed().await.is_ok() {
            let snapshot = permission_rx.borrow_and_update().clone();
            info!(?snapshot, "permission grants changed");
        }
    });

    // Remove existing socket
    let _ = std::fs::remove_file(&cli.socket);
    let listener = UnixListener::bind(&cli.socket)
        .with_context(|| format!("failed to bind {}", cli.socket.display()))?;
    info!("clawdisd listening on {}", cli.socket.display());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let broker = broker.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, broker).await {
                        error!("connection error: {e}");
                    }
                });
            }
            _ = signal::ctrl_c() => {
                info!("shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(&cli.socket);
    Ok(())
}

async fn handle_connection(stream: UnixStream, broker: Arc<ActionBroker>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    while let Some(frame) = read_frame(&mut reader).await? {
        debug!(len = frame.len(), "request frame received");
        let reply = broker.handle(&frame).await;
        write_frame(&mut writer, &reply).await?;
    }

    debug!("client disconnected");
    Ok(())
}
