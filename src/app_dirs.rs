//! Platform directories for config, cache and log storage.

use std::env;
use std::path::PathBuf;

const APP_DIR_NAME: &str = "audiobook-reader";

fn home_dir() -> PathBuf {
    dirs_next::home_dir()
        .or_else(|| env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Config directory for persisted settings.
///
/// macOS: `~/Library/Application Support/audiobook-reader`,
/// Windows: `%APPDATA%\audiobook-reader`,
/// Linux: `~/.config/audiobook-reader`.
pub fn config_dir() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(home_dir)
        .join(APP_DIR_NAME)
}

/// Cache directory for downloaded artifacts.
pub fn cache_dir() -> PathBuf {
    dirs_next::cache_dir()
        .unwrap_or_else(home_dir)
        .join(APP_DIR_NAME)
}

/// Log directory for the session startup log.
///
/// macOS: `~/Library/Logs/audiobook-reader`,
/// Windows: `%LOCALAPPDATA%\audiobook-reader\logs`,
/// Linux: `~/.local/state/audiobook-reader`.
pub fn log_dir() -> PathBuf {
    if cfg!(target_os = "macos") {
        home_dir().join("Library").join("Logs").join(APP_DIR_NAME)
    } else if cfg!(target_os = "windows") {
        dirs_next::data_local_dir()
            .unwrap_or_else(home_dir)
            .join(APP_DIR_NAME)
            .join("logs")
    } else {
        home_dir().join(".local").join("state").join(APP_DIR_NAME)
    }
}
