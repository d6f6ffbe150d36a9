//! Ordered discovery strategies for external binaries.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

/// One strategy for locating a dependency on disk. Probing is ordered and
/// short-circuits on the first candidate that passes validation.
#[derive(Debug, Clone)]
pub enum ProbeSource {
    /// A single environment variable naming the binary or its directory.
    EnvVar(&'static str),
    /// Every directory on the process PATH.
    PathLookup,
    /// PATH exports scraped from shell startup files.
    ShellConfig,
    /// A fixed, platform-specific directory list.
    WellKnown(Vec<PathBuf>),
    /// Ask the host package manager where it installed the binary.
    PackageManager,
}

impl ProbeSource {
    fn label(&self) -> String {
        match self {
            Self::EnvVar(name) => format!("env:{name}"),
            Self::PathLookup => "path".to_string(),
            Self::ShellConfig => "shell-config".to_string(),
            Self::WellKnown(_) => "well-known".to_string(),
            Self::PackageManager => "package-manager".to_string(),
        }
    }
}

/// One location consulted during resolution, kept for diagnostic display.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeRecord {
    pub source: String,
    pub location: String,
    pub note: Option<String>,
}

impl ProbeRecord {
    pub(crate) fn new(source: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            location: location.into(),
            note: None,
        }
    }

    pub(crate) fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Walks `sources` in order, recording every candidate, and returns the
/// first one `validate` accepts. Later sources are not consulted after a
/// hit, even if they would also validate.
pub(crate) fn run_probes<V>(
    sources: &[ProbeSource],
    binary: &str,
    validate: &V,
    checked: &mut Vec<ProbeRecord>,
) -> Option<PathBuf>
where
    V: Fn(&Path) -> bool,
{
    for source in sources {
        let label = source.label();
        let candidates = match source {
            ProbeSource::EnvVar(name) => match env::var_os(name) {
                Some(value) => env_var_candidates(&PathBuf::from(value), binary),
                None => {
                    checked.push(ProbeRecord::new(label, format!("${name}")).with_note("unset"));
                    continue;
                }
            },
            ProbeSource::PathLookup => path_candidates(binary),
            ProbeSource::ShellConfig => shell_config_candidates(binary),
            ProbeSource::WellKnown(dirs) => dirs.iter().map(|d| d.join(binary)).collect(),
            ProbeSource::PackageManager => match package_manager_candidates(binary) {
                Ok(paths) => paths,
                Err(note) => {
                    checked.push(ProbeRecord::new(label, binary).with_note(note));
                    continue;
                }
            },
        };

        if candidates.is_empty() {
            checked.push(ProbeRecord::new(label, binary).with_note("no candidates"));
            continue;
        }

        for candidate in candidates {
            checked.push(ProbeRecord::new(label.clone(), candidate.display().to_string()));
            if validate(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// A variable may name the binary itself or the directory holding it.
fn env_var_candidates(value: &Path, binary: &str) -> Vec<PathBuf> {
    if value.is_dir() {
        vec![value.join(binary)]
    } else {
        vec![value.to_path_buf()]
    }
}

fn path_candidates(binary: &str) -> Vec<PathBuf> {
    env::var_os("PATH")
        .map(|path| env::split_paths(&path).map(|dir| dir.join(binary)).collect())
        .unwrap_or_default()
}

fn shell_config_files() -> Vec<PathBuf> {
    let Some(home) = dirs_next::home_dir() else {
        return Vec::new();
    };
    [".zshrc", ".bashrc", ".bash_profile", ".profile"]
        .iter()
        .map(|name| home.join(name))
        .collect()
}

fn shell_config_candidates(binary: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for file in shell_config_files() {
        let Ok(content) = fs::read_to_string(&file) else {
            continue;
        };
        for dir in scrape_path_exports(&content) {
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs.into_iter().map(|dir| dir.join(binary)).collect()
}

/// Extracts directories from `PATH=` assignments in shell startup text.
/// `$PATH`/`${PATH}` segments and other unexpanded variables are skipped;
/// a leading `~` or `$HOME` is expanded.
pub(crate) fn scrape_path_exports(content: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some(value) = line.strip_prefix("PATH=") else {
            continue;
        };
        let value = value.trim_matches(|c| c == '"' || c == '\'');
        for segment in value.split(':') {
            let Some(dir) = expand_home(segment) else {
                continue;
            };
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
    }
    dirs
}

fn expand_home(segment: &str) -> Option<PathBuf> {
    if segment.is_empty() {
        return None;
    }
    if let Some(rest) = segment
        .strip_prefix("$HOME/")
        .or_else(|| segment.strip_prefix("~/"))
    {
        return dirs_next::home_dir().map(|home| home.join(rest));
    }
    if segment.contains('$') || segment == "~" {
        return None;
    }
    Some(PathBuf::from(segment))
}

fn package_manager_candidates(binary: &str) -> Result<Vec<PathBuf>, String> {
    if !cfg!(target_os = "macos") {
        return Err("no package manager query on this platform".to_string());
    }
    let package = binary.trim_end_matches(".exe");
    let output = Command::new("brew")
        .args(["--prefix", package])
        .output()
        .map_err(|e| format!("brew not available: {e}"))?;
    if !output.status.success() {
        return Err(format!("brew --prefix {package} failed"));
    }
    let prefix = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if prefix.is_empty() {
        return Err("brew returned an empty prefix".to_string());
    }
    Ok(vec![PathBuf::from(prefix).join("bin").join(binary)])
}

/// Exists, is a regular file, and carries an execute bit on Unix.
pub(crate) fn is_executable(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn first_validated_source_wins() {
        let first = tempfile::tempdir().expect("tempdir");
        let second = tempfile::tempdir().expect("tempdir");
        for dir in [&first, &second] {
            fs::write(dir.path().join("tool"), b"x").expect("write");
        }

        let sources = [
            ProbeSource::WellKnown(vec![first.path().to_path_buf()]),
            ProbeSource::WellKnown(vec![second.path().to_path_buf()]),
        ];
        let validated = RefCell::new(Vec::new());
        let validate = |p: &Path| {
            validated.borrow_mut().push(p.to_path_buf());
            p.exists()
        };

        let mut checked = Vec::new();
        let hit = run_probes(&sources, "tool", &validate, &mut checked).expect("hit");
        assert_eq!(hit, first.path().join("tool"));
        // The second source would validate too, but was never consulted.
        assert_eq!(validated.borrow().len(), 1);
        assert_eq!(checked.len(), 1);
    }

    #[test]
    fn set_env_var_preempts_later_sources() {
        let env_dir = tempfile::tempdir().expect("tempdir");
        fs::write(env_dir.path().join("tool"), b"x").expect("write");
        env::set_var("READER_CORE_TEST_SET_VAR", env_dir.path());

        let fallback = tempfile::tempdir().expect("tempdir");
        fs::write(fallback.path().join("tool"), b"x").expect("write");

        let sources = [
            ProbeSource::EnvVar("READER_CORE_TEST_SET_VAR"),
            ProbeSource::WellKnown(vec![fallback.path().to_path_buf()]),
        ];
        let mut checked = Vec::new();
        let hit = run_probes(&sources, "tool", &|p: &Path| p.exists(), &mut checked);
        env::remove_var("READER_CORE_TEST_SET_VAR");

        assert_eq!(hit, Some(env_dir.path().join("tool")));
        // The fallback directory also holds the binary but is never reached.
        assert_eq!(checked.len(), 1);
        assert_eq!(checked[0].source, "env:READER_CORE_TEST_SET_VAR");
    }

    #[test]
    fn path_hit_consults_no_later_source() {
        // A binary name unique to this test, so only the prepended entry
        // can satisfy the lookup.
        let binary = "reader-core-path-probe-tool";
        let path_dir = tempfile::tempdir().expect("tempdir");
        fs::write(path_dir.path().join(binary), b"x").expect("write");

        let original = env::var_os("PATH");
        let mut entries = vec![path_dir.path().to_path_buf()];
        if let Some(orig) = &original {
            entries.extend(env::split_paths(orig));
        }
        env::set_var("PATH", env::join_paths(entries).expect("join_paths"));

        let fallback = tempfile::tempdir().expect("tempdir");
        fs::write(fallback.path().join(binary), b"x").expect("write");

        let sources = [
            ProbeSource::PathLookup,
            ProbeSource::WellKnown(vec![fallback.path().to_path_buf()]),
        ];
        let mut checked = Vec::new();
        let hit = run_probes(&sources, binary, &|p: &Path| p.exists(), &mut checked);

        match original {
            Some(orig) => env::set_var("PATH", orig),
            None => env::remove_var("PATH"),
        }

        assert_eq!(hit, Some(path_dir.path().join(binary)));
        assert!(checked.iter().all(|r| r.source == "path"));
        assert_eq!(checked.len(), 1);
    }

    #[test]
    fn failing_sources_are_recorded_in_order() {
        let empty = tempfile::tempdir().expect("tempdir");
        let hit_dir = tempfile::tempdir().expect("tempdir");
        fs::write(hit_dir.path().join("tool"), b"x").expect("write");

        let sources = [
            ProbeSource::EnvVar("READER_CORE_TEST_UNSET_VAR"),
            ProbeSource::WellKnown(vec![empty.path().to_path_buf()]),
            ProbeSource::WellKnown(vec![hit_dir.path().to_path_buf()]),
        ];
        let mut checked = Vec::new();
        let hit = run_probes(&sources, "tool", &|p: &Path| p.exists(), &mut checked);

        assert_eq!(hit, Some(hit_dir.path().join("tool")));
        assert_eq!(checked.len(), 3);
        assert_eq!(checked[0].source, "env:READER_CORE_TEST_UNSET_VAR");
        assert_eq!(checked[0].note.as_deref(), Some("unset"));
        assert_eq!(checked[1].source, "well-known");
        assert_eq!(checked[2].location, hit.unwrap().display().to_string());
    }

    #[test]
    fn no_source_matches_returns_none_with_full_record() {
        let empty = tempfile::tempdir().expect("tempdir");
        let sources = [
            ProbeSource::WellKnown(vec![empty.path().to_path_buf()]),
            ProbeSource::WellKnown(vec![empty.path().join("nested")]),
        ];
        let mut checked = Vec::new();
        let hit = run_probes(&sources, "tool", &|_: &Path| false, &mut checked);
        assert!(hit.is_none());
        assert_eq!(checked.len(), 2);
    }

    #[test]
    fn scrapes_path_exports_from_shell_config() {
        let content = r#"
# aliases
alias ll='ls -l'
export PATH="/opt/homebrew/bin:$PATH"
PATH=/usr/local/bin:~/bin
export PATH='$HOME/tools:/opt/ffmpeg/bin'
"#;
        let dirs = scrape_path_exports(content);
        assert!(dirs.contains(&PathBuf::from("/opt/homebrew/bin")));
        assert!(dirs.contains(&PathBuf::from("/usr/local/bin")));
        assert!(dirs.contains(&PathBuf::from("/opt/ffmpeg/bin")));
        // $PATH itself is never a directory candidate.
        assert!(!dirs.iter().any(|d| d.to_string_lossy().contains("$PATH")));
        if let Some(home) = dirs_next::home_dir() {
            assert!(dirs.contains(&home.join("bin")));
            assert!(dirs.contains(&home.join("tools")));
        }
    }

    #[cfg(unix)]
    #[test]
    fn executable_bit_is_required_on_unix() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        let plain = dir.path().join("plain");
        fs::write(&plain, b"data").expect("write");
        assert!(!is_executable(&plain));

        let exec = dir.path().join("exec");
        fs::write(&exec, b"#!/bin/sh\n").expect("write");
        fs::set_permissions(&exec, fs::Permissions::from_mode(0o755)).expect("chmod");
        assert!(is_executable(&exec));
        assert!(!is_executable(dir.path()));
    }
}
