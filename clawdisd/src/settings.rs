//! Persisted user settings the broker reads on every dispatch.
//!
//! The companion app owns writes (last-write-wins); the daemon only reads.
//! Values are re-read per request so a pause toggled in the UI takes effect
//! on the very next call.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

/// Snapshot of the settings the broker cares about.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Settings {
    /// Global pause flag; when set, every action except the liveness probe
    /// is rejected.
    #[serde(default)]
    pub pause_enabled: bool,

    /// Sound name applied to notifications that do not specify one.
    /// Empty means no sound.
    #[serde(default)]
    pub default_sound: String,
}

/// Read access to the persisted settings. Implementations must return the
/// current on-disk state on each call, never a cached copy.
pub trait SettingsStore: Send + Sync {
    fn current(&self) -> Settings;
}

/// Settings backed by a TOML file under `~/.clawdis/`.
pub struct FileSettings {
    path: PathBuf,
}

impl FileSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSettings { path: path.into() }
    }

    /// `~/.clawdis/settings.toml`, next to the CLI's own config.
    pub fn default_path() -> PathBuf {
        let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_else(|| {
            // Degenerate fallback for environments without HOME.
            std::env::temp_dir()
        });
        home.join(".clawdis").join("settings.toml")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SettingsStore for FileSettings {
    fn current(&self) -> Settings {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(_) => return Settings::default(),
        };

        match toml::from_str(&raw) {
            Ok(settings) => settings,
            Err(err) => {
                debug!(path = %self.path.display(), "unreadable settings file: {err}");
                Settings::default()
            }
        }
    }
}
