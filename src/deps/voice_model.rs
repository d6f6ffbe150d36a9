//! Voice-model asset pair discovery.
//!
//! The synthesis engine needs two fixed-name files living in one directory:
//! the kokoro model and its voice embeddings. A directory is only valid
//! when both files are present and non-empty.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::app_dirs;

pub(crate) const MODEL_FILE: &str = "kokoro-v1.0.onnx";
pub(crate) const VOICES_FILE: &str = "voices-v1.0.bin";

const MODEL_BASE_URL: &str =
    "https://github.com/thewh1teagle/kokoro-onnx/releases/download/model-files-v1.0";

pub(crate) fn asset_files() -> [&'static str; 2] {
    [MODEL_FILE, VOICES_FILE]
}

pub(crate) fn asset_url(file: &str) -> String {
    format!("{MODEL_BASE_URL}/{file}")
}

/// Search order after the persisted override: a `models` directory next to
/// the executable (bundled installs), then the platform data and cache
/// directories.
pub(crate) fn search_dirs() -> Vec<(String, PathBuf)> {
    let mut dirs = Vec::new();
    if let Some(exe_dir) = env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)) {
        dirs.push(("package-local".to_string(), exe_dir.join("models")));
    }
    if let Some(data) = dirs_next::data_dir() {
        dirs.push(("data-dir".to_string(), data.join("audiobook-reader").join("models")));
    }
    dirs.push(("cache-dir".to_string(), app_dirs::cache_dir().join("models")));
    dirs
}

/// Default acquisition target.
pub(crate) fn download_dir(cache_dir: &Path) -> PathBuf {
    cache_dir.join("models")
}

fn non_empty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Both assets present and non-empty.
pub(crate) fn validate_dir(dir: &Path) -> bool {
    asset_files().iter().all(|file| non_empty_file(&dir.join(file)))
}

/// Names the missing or empty assets, for diagnostics.
pub(crate) fn missing_assets(dir: &Path) -> Vec<&'static str> {
    asset_files()
        .into_iter()
        .filter(|file| !non_empty_file(&dir.join(file)))
        .collect()
}

pub(crate) fn install_hint() -> &'static str {
    "download kokoro-v1.0.onnx and voices-v1.0.bin from \
     github.com/thewh1teagle/kokoro-onnx/releases into the app's models folder"
}
