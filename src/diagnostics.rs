//! Session logging and startup checks.
//!
//! The session log is an explicitly constructed collaborator: created at
//! process start, installed as the `log` backend, flushed when dropped.
//! Each session starts a fresh `startup.log` under the platform log
//! directory so a support request only ever needs one file.

use std::env;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};

use crate::app_dirs;
use crate::deps::{DependencyId, DependencyResolver};

const LOG_FILE_NAME: &str = "startup.log";

pub struct SessionLog {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
    level: LevelFilter,
}

impl SessionLog {
    /// Opens a fresh session log under the platform log directory.
    pub fn create() -> io::Result<Self> {
        Self::create_in(app_dirs::log_dir())
    }

    pub fn create_in(dir: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&dir)?;
        let path = dir.join(LOG_FILE_NAME);
        let mut writer = BufWriter::new(File::create(&path)?);
        write_header(&mut writer)?;
        writer.flush()?;
        Ok(Self {
            writer: Mutex::new(writer),
            path,
            level: LevelFilter::Debug,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log path shown to the user, shortened to `~/...` when possible.
    pub fn display_path(&self) -> String {
        if let Some(home) = dirs_next::home_dir() {
            if let Ok(rel) = self.path.strip_prefix(&home) {
                return format!("~/{}", rel.display());
            }
        }
        self.path.display().to_string()
    }

    /// Installs this log as the process-wide `log` backend.
    pub fn install(self) -> Result<(), log::SetLoggerError> {
        log::set_max_level(self.level);
        log::set_boxed_logger(Box::new(self))
    }
}

fn write_header(writer: &mut impl Write) -> io::Result<()> {
    let epoch_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    writeln!(writer, "=== Audiobook Reader Startup Log ===")?;
    writeln!(writer, "Session: {epoch_secs} (unix)")?;
    writeln!(writer, "Platform: {} {}", env::consts::OS, env::consts::ARCH)?;
    if let Ok(exe) = env::current_exe() {
        writeln!(writer, "Executable: {}", exe.display())?;
    }
    if let Ok(cwd) = env::current_dir() {
        writeln!(writer, "CWD: {}", cwd.display())?;
    }
    writeln!(
        writer,
        "PATH: {}",
        env::var("PATH").unwrap_or_else(|_| "N/A".to_string())
    )?;
    writeln!(writer, "{}", "=".repeat(50))?;
    Ok(())
}

fn wall_clock() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let secs_of_day = now.as_secs() % 86_400;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60,
        now.subsec_millis()
    )
}

impl Log for SessionLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{}] {}: {}",
            wall_clock(),
            record.level(),
            record.target(),
            record.args()
        );
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writeln!(writer, "{line}");
            let _ = writer.flush();
        }
        // Mirror to stderr for terminal debugging.
        eprintln!("{line}");
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.writer.lock() {
            let _ = writer.flush();
        }
    }
}

impl Drop for SessionLog {
    fn drop(&mut self) {
        self.flush();
    }
}

/// Resolves both dependencies and logs every location consulted. Returns
/// one human-readable issue per missing dependency; an empty list means
/// conversion can start immediately.
pub fn run_startup_checks(resolver: &DependencyResolver) -> Vec<String> {
    log::info!("=== Startup Diagnostics ===");
    let mut issues = Vec::new();

    for id in [DependencyId::Transcoder, DependencyId::VoiceModel] {
        let result = resolver.resolve(id);
        match &result.path {
            Some(path) => log::info!("{id} found: {}", path.display()),
            None => {
                log::warn!("{id} not found; locations checked:");
                for record in &result.checked {
                    match &record.note {
                        Some(note) => {
                            log::info!("  [{}] {} ({note})", record.source, record.location)
                        }
                        None => log::info!("  [{}] {}", record.source, record.location),
                    }
                }
                issues.push(format!(
                    "{id} is missing. Download it from the app, or run: {}",
                    resolver.install_hint(id)
                ));
            }
        }
    }

    log::info!("Diagnostics complete ({} issues)", issues.len());
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    #[test]
    fn header_records_the_host_environment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = SessionLog::create_in(dir.path().to_path_buf()).expect("create");
        session.flush();

        let content = fs::read_to_string(session.path()).expect("read");
        assert!(content.contains("Startup Log"));
        assert!(content.contains(&format!("Platform: {}", env::consts::OS)));
        assert!(content.contains("PATH:"));
    }

    #[test]
    fn records_are_timestamped_and_leveled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = SessionLog::create_in(dir.path().to_path_buf()).expect("create");

        session.log(
            &Record::builder()
                .args(format_args!("resolving dependencies"))
                .level(Level::Warn)
                .target("reader_core::test")
                .build(),
        );
        session.flush();

        let content = fs::read_to_string(session.path()).expect("read");
        let line = content.lines().last().expect("line");
        assert!(line.contains("[WARN]"));
        assert!(line.contains("resolving dependencies"));
        // [HH:MM:SS.mmm] prefix
        assert_eq!(line.as_bytes()[3], b':');
    }

    #[test]
    fn trace_records_are_filtered_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let session = SessionLog::create_in(dir.path().to_path_buf()).expect("create");
        assert!(!session.enabled(&Metadata::builder().level(Level::Trace).build()));
        assert!(session.enabled(&Metadata::builder().level(Level::Debug).build()));
    }

    #[test]
    fn startup_checks_report_missing_dependencies() {
        let config = tempfile::tempdir().expect("tempdir");
        let cache = tempfile::tempdir().expect("tempdir");
        let resolver = DependencyResolver::with_dirs(
            config.path().to_path_buf(),
            cache.path().to_path_buf(),
        );

        let issues = run_startup_checks(&resolver);
        // ffmpeg may genuinely exist on the host; the model pair in a fresh
        // sandbox should not.
        if !resolver.resolve(DependencyId::VoiceModel).is_found() {
            assert!(issues.iter().any(|i| i.contains("voice model")));
        }
    }
}
