//! Client library for the Clawdis action daemon.
//!
//! One connection per call: connect, send a framed request, read the framed
//! response, drop the socket. The daemon is local-only, so reconnect logic
//! would buy nothing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clawdis_ipc::wire::{decode_response, encode_request, read_frame, write_frame, WireError};
use clawdis_ipc::{Capability, Request, Response};
use tokio::net::UnixStream;
use tracing::debug;

pub const DEFAULT_SOCK: &str = "/tmp/clawdisd.sock";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("disconnected")]
    Disconnected,
    #[error("timeout")]
    Timeout,
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Clawdis daemon client.
pub struct ClawdisClient {
    sock_path: PathBuf,
    reply_timeout: Option<Duration>,
}

impl ClawdisClient {
    pub fn new<P: AsRef<Path>>(sock: P) -> Self {
        ClawdisClient {
            sock_path: sock.as_ref().to_path_buf(),
            reply_timeout: None,
        }
    }

    /// Bound the whole call (connect through reply) by `timeout`.
    pub fn with_reply_timeout<P: AsRef<Path>>(sock: P, timeout: Duration) -> Self {
        ClawdisClient {
            sock_path: sock.as_ref().to_path_buf(),
            reply_timeout: Some(timeout),
        }
    }

    /// Send one request and wait for its response.
    pub async fn call(&self, request: &Request) -> Result<Response, ClientError> {
        match self.reply_timeout {
            Some(limit) => tokio::time::timeout(limit, self.call_inner(request))
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => self.call_inner(request).await,
        }
    }

    async fn call_inner(&self, request: &Request) -> Result<Response, ClientError> {
        let mut stream = UnixStream::connect(&self.sock_path).await?;
        let body = encode_request(request)?;
        write_frame(&mut stream, &body).await?;

        let frame = read_frame(&mut stream)
            .await?
            .ok_or(ClientError::Disconnected)?;
        debug!(len = frame.len(), "response frame received");
        Ok(decode_response(&frame)?)
    }

    /// Liveness probe; answers even while the daemon is paused.
    pub async fn status(&self) -> Result<Response, ClientError> {
        self.call(&Request::Status).await
    }

    pub async fn notify(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
        sound: Option<String>,
    ) -> Result<Response, ClientError> {
        self.call(&Request::Notify {
            title: title.into(),
            body: body.into(),
            sound,
        })
        .await
    }

    pub async fn ensure_permissions(
        &self,
        capabilities: BTreeSet<Capability>,
        interactive: bool,
    ) -> Result<Response, ClientError> {
        self.call(&Request::EnsurePermissions {
            capabilities,
            interactive,
        })
        .await
    }

    pub async fn screenshot(
        &self,
        display_id: Option<u32>,
        window_id: Option<u32>,
    ) -> Result<Response, ClientError> {
        self.call(&Request::Screenshot {
            display_id,
            window_id,
        })
        .await
    }

    pub async fn run_shell(
        &self,
        command: Vec<String>,
        cwd: Option<String>,
        env: Option<BTreeMap<String, String>>,
        timeout_seconds: Option<f64>,
        needs_screen_capture_permission: bool,
    ) -> Result<Response, ClientError> {
        self.call(&Request::RunShell {
            command,
            cwd,
            env,
            timeout_seconds,
            needs_screen_capture_permission,
        })
        .await
    }
}
