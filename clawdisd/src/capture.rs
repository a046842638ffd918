//! One-shot screen and window capture.
//!
//! Display grabs go through the native capture backend at the display's own
//! pixel dimensions and are PNG-encoded in memory. Window grabs (macOS only)
//! go through the `screencapture` command backend, which is the only
//! window-scoped path available to a headless daemon. Every stage failure
//! collapses to `None`; the broker maps that to a single generic message.

use std::io::Cursor;
use std::time::Duration;

use async_trait::async_trait;
use screenshots::image::ImageFormat;
use screenshots::Screen;
use tokio::task::spawn_blocking;
use tracing::{debug, warn};

/// Hard bound on one capture attempt so a stalled platform API cannot hang a
/// broker task forever.
const CAPTURE_DEADLINE: Duration = Duration::from_secs(10);

#[async_trait]
pub trait Capturer: Send + Sync {
    /// Capture the selected window, else the selected (or first) display.
    /// Returns encoded PNG bytes, or `None` on any failure.
    async fn capture(&self, display_id: Option<u32>, window_id: Option<u32>) -> Option<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct CaptureService;

impl CaptureService {
    pub fn new() -> Self {
        CaptureService
    }

    async fn capture_inner(
        &self,
        display_id: Option<u32>,
        window_id: Option<u32>,
    ) -> Option<Vec<u8>> {
        if let Some(window_id) = window_id {
            // A window selector beats the display selector, but an unknown
            // window falls back to the display path.
            if let Some(png) = capture_window(window_id).await {
                return Some(png);
            }
            debug!(window_id, "window capture unavailable, falling back to display");
        }

        capture_display(display_id).await
    }
}

#[async_trait]
impl Capturer for CaptureService {
    async fn capture(&self, display_id: Option<u32>, window_id: Option<u32>) -> Option<Vec<u8>> {
        match tokio::time::timeout(CAPTURE_DEADLINE, self.capture_inner(display_id, window_id))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("capture did not complete within {CAPTURE_DEADLINE:?}");
                None
            }
        }
    }
}

/// Full-display grab through the native backend, encoded to PNG in memory.
async fn capture_display(display_id: Option<u32>) -> Option<Vec<u8>> {
    let task = spawn_blocking(move || -> Option<Vec<u8>> {
        let screens = match Screen::all() {
            Ok(screens) => screens,
            Err(err) => {
                warn!("failed to enumerate displays: {err}");
                return None;
            }
        };

        let screen = match display_id {
            Some(id) => screens.into_iter().find(|s| s.display_info.id == id)?,
            None => screens.into_iter().next()?,
        };

        let image = match screen.capture() {
            Ok(image) => image,
            Err(err) => {
                warn!(display_id = screen.display_info.id, "display capture failed: {err}");
                return None;
            }
        };

        let mut png = Vec::new();
        if let Err(err) = image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png) {
            warn!("png encode failed: {err}");
            return None;
        }
        Some(png)
    });

    task.await.ok().flatten()
}

/// Window-scoped grab via the `screencapture` command backend.
#[cfg(target_os = "macos")]
async fn capture_window(window_id: u32) -> Option<Vec<u8>> {
    let file = match tempfile::Builder::new().suffix(".png").tempfile() {
        Ok(file) => file,
        Err(err) => {
            warn!("failed to create capture scratch file: {err}");
            return None;
        }
    };
    let path = file.path().to_path_buf();

    let status = tokio::process::Command::new("screencapture")
        .arg("-x") // no capture sound
        .arg("-o") // no window shadow
        .arg(format!("-l{window_id}"))
        .arg(&path)
        .status()
        .await;

    match status {
        Ok(status) if status.success() => tokio::fs::read(&path).await.ok().filter(|b| !b.is_empty()),
        Ok(status) => {
            debug!(window_id, %status, "screencapture rejected window");
            None
        }
        Err(err) => {
            warn!("failed to run screencapture: {err}");
            None
        }
    }
}

#[cfg(not(target_os = "macos"))]
async fn capture_window(_window_id: u32) -> Option<Vec<u8>> {
    // No window enumeration backend on this platform.
    None
}
