//! ffmpeg discovery and validation.
//!
//! A binary named `ffmpeg` is not necessarily the media transcoder, so
//! validation runs the candidate with `-version` and requires the familiar
//! banner on stdout, not just an executable file.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::probe::{is_executable, ProbeSource};

pub(crate) const ENV_VAR: &str = "FFMPEG_PATH";

const BANNER_PREFIX: &str = "ffmpeg version";

/// Single-file redistributable builds, one per OS family (the same builds
/// the imageio project ships).
const DOWNLOAD_BASE_URL: &str = "https://github.com/imageio/imageio-binaries/raw/master/ffmpeg";

pub(crate) fn binary_name() -> &'static str {
    if cfg!(windows) {
        "ffmpeg.exe"
    } else {
        "ffmpeg"
    }
}

pub(crate) fn download_url() -> String {
    let artifact = if cfg!(target_os = "macos") {
        "ffmpeg-osx64-v4.2.2"
    } else if cfg!(windows) {
        "ffmpeg-win64-v4.2.2.exe"
    } else {
        "ffmpeg-linux64-v4.2.2"
    };
    format!("{DOWNLOAD_BASE_URL}/{artifact}")
}

/// Probe order after the persisted override.
pub(crate) fn probe_sequence() -> Vec<ProbeSource> {
    vec![
        ProbeSource::EnvVar(ENV_VAR),
        ProbeSource::PathLookup,
        ProbeSource::ShellConfig,
        ProbeSource::WellKnown(well_known_dirs()),
        ProbeSource::PackageManager,
    ]
}

fn well_known_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if cfg!(target_os = "macos") {
        dirs.push(PathBuf::from("/opt/homebrew/bin"));
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/opt/local/bin"));
    } else if cfg!(windows) {
        if let Some(local) = dirs_next::data_local_dir() {
            dirs.push(local.join("Microsoft").join("WinGet").join("Links"));
        }
        dirs.push(PathBuf::from(r"C:\ffmpeg\bin"));
        dirs.push(PathBuf::from(r"C:\Program Files\ffmpeg\bin"));
        dirs.push(PathBuf::from(r"C:\ProgramData\chocolatey\bin"));
    } else {
        dirs.push(PathBuf::from("/usr/bin"));
        dirs.push(PathBuf::from("/usr/local/bin"));
        dirs.push(PathBuf::from("/snap/bin"));
        if let Some(home) = dirs_next::home_dir() {
            dirs.push(home.join(".local").join("bin"));
        }
    }
    dirs
}

/// Exists, is executable, and announces itself as ffmpeg.
pub(crate) fn validate(path: &Path) -> bool {
    is_executable(path) && banner_ok(path)
}

fn banner_ok(path: &Path) -> bool {
    let output = match Command::new(path).arg("-version").output() {
        Ok(output) => output,
        Err(e) => {
            log::debug!("{} failed to run -version: {e}", path.display());
            return false;
        }
    };
    if !output.status.success() {
        return false;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    let recognized = stdout.trim_start().starts_with(BANNER_PREFIX);
    if !recognized {
        log::warn!(
            "{} exists but does not print an ffmpeg banner; name collision?",
            path.display()
        );
    }
    recognized
}

/// Terminal command a user can run instead of the in-app download.
pub(crate) fn install_hint() -> &'static str {
    if cfg!(target_os = "macos") {
        "brew install ffmpeg"
    } else if cfg!(windows) {
        "winget install -e --id Gyan.FFmpeg"
    } else {
        "sudo apt update && sudo apt install ffmpeg"
    }
}
