//! Location, validation and acquisition of the two external runtime
//! dependencies: the media transcoder binary and the voice-model asset pair.

mod download;
mod overrides;
mod probe;
mod transcoder;
mod voice_model;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use thiserror::Error;

use crate::app_dirs;
use overrides::OverrideStore;
pub use probe::{ProbeRecord, ProbeSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DependencyId {
    Transcoder,
    VoiceModel,
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transcoder => write!(f, "ffmpeg transcoder"),
            Self::VoiceModel => write!(f, "voice model"),
        }
    }
}

#[derive(Error, Debug)]
pub enum DepsError {
    #[error("{0} was not found on this system")]
    Missing(DependencyId),

    #[error("{} is not a valid location for {id}", path.display())]
    Invalid { id: DependencyId, path: PathBuf },

    #[error("download failed: {0}")]
    AcquireFailed(String),

    #[error("an acquisition for {0} is already running")]
    AcquireInFlight(DependencyId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DepsError {
    /// Display-safe summary for the presentation layer.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Missing(DependencyId::Transcoder) => {
                "ffmpeg was not found. Download it here or install it manually."
            }
            Self::Missing(DependencyId::VoiceModel) => {
                "The voice model files were not found. Download them here or pick their folder."
            }
            Self::Invalid { .. } => {
                "That location does not contain a working copy of the dependency."
            }
            Self::AcquireFailed(_) => {
                "Could not download the dependency. Check your internet connection and free disk space, then try again."
            }
            Self::AcquireInFlight(_) => "A download for this dependency is already running.",
            Self::Io(_) => {
                "The app could not read or write its local files. Check disk space and permissions."
            }
        }
    }
}

/// Outcome of one resolution pass. Produced fresh on every call; the only
/// state that survives a restart is the persisted override.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionResult {
    pub path: Option<PathBuf>,
    /// Every location consulted, in probe order, for diagnostic display.
    pub checked: Vec<ProbeRecord>,
}

impl ResolutionResult {
    pub fn is_found(&self) -> bool {
        self.path.is_some()
    }
}

/// Resolves dependency locations across heterogeneous hosts and owns the
/// persisted overrides. Safe to share between threads; acquisitions are
/// guarded per dependency id.
pub struct DependencyResolver {
    store: OverrideStore,
    cache_dir: PathBuf,
    transcoder_acquire: AtomicBool,
    model_acquire: AtomicBool,
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self::with_dirs(app_dirs::config_dir(), app_dirs::cache_dir())
    }

    /// Test seam: resolver rooted in explicit config and cache directories.
    pub fn with_dirs(config_dir: PathBuf, cache_dir: PathBuf) -> Self {
        Self {
            store: OverrideStore::new(config_dir),
            cache_dir,
            transcoder_acquire: AtomicBool::new(false),
            model_acquire: AtomicBool::new(false),
        }
    }

    fn validate(&self, id: DependencyId, path: &Path) -> bool {
        match id {
            DependencyId::Transcoder => transcoder::validate(path),
            DependencyId::VoiceModel => path.is_dir() && voice_model::validate_dir(path),
        }
    }

    /// Checks the persisted override first, then the ordered probe sources
    /// for `id`. The first validated hit wins; if none match, the result
    /// carries every location checked.
    pub fn resolve(&self, id: DependencyId) -> ResolutionResult {
        let mut checked = Vec::new();

        if let Some(path) = self.store.read(id) {
            let location = path.display().to_string();
            if self.validate(id, &path) {
                checked.push(ProbeRecord::new("override", location));
                return ResolutionResult {
                    path: Some(path),
                    checked,
                };
            }
            // A stale override is cleared, never trusted.
            log::warn!("Persisted override for {id} is stale: {location}");
            checked.push(ProbeRecord::new("override", location).with_note("stale, cleared"));
            if let Err(e) = self.store.clear(id) {
                log::warn!("Failed to clear stale override for {id}: {e}");
            }
        }

        let path = match id {
            DependencyId::Transcoder => probe::run_probes(
                &transcoder::probe_sequence(),
                transcoder::binary_name(),
                &transcoder::validate,
                &mut checked,
            ),
            DependencyId::VoiceModel => self.probe_model_dirs(&mut checked),
        };

        if let Some(found) = &path {
            log::info!("{id} resolved to {}", found.display());
        } else {
            log::warn!("{id} not found ({} locations checked)", checked.len());
        }
        ResolutionResult { path, checked }
    }

    fn probe_model_dirs(&self, checked: &mut Vec<ProbeRecord>) -> Option<PathBuf> {
        for (label, dir) in voice_model::search_dirs() {
            let mut record = ProbeRecord::new(label, dir.display().to_string());
            if voice_model::validate_dir(&dir) {
                checked.push(record);
                return Some(dir);
            }
            let missing = voice_model::missing_assets(&dir);
            if !missing.is_empty() {
                record = record.with_note(format!("missing {}", missing.join(", ")));
            }
            checked.push(record);
        }
        None
    }

    /// Like [`resolve`](Self::resolve), for callers that cannot proceed
    /// without the dependency.
    pub fn require(&self, id: DependencyId) -> Result<PathBuf, DepsError> {
        self.resolve(id).path.ok_or(DepsError::Missing(id))
    }

    /// Persists `path` as the override for `id` after running the same
    /// validation `resolve` uses. Rejection leaves any prior override
    /// untouched.
    pub fn set_override(&self, id: DependencyId, path: &Path) -> Result<(), DepsError> {
        if !self.validate(id, path) {
            return Err(DepsError::Invalid {
                id,
                path: path.to_path_buf(),
            });
        }
        self.store.write(id, path)?;
        log::info!("Override for {id} set to {}", path.display());
        Ok(())
    }

    fn acquire_flag(&self, id: DependencyId) -> &AtomicBool {
        match id {
            DependencyId::Transcoder => &self.transcoder_acquire,
            DependencyId::VoiceModel => &self.model_acquire,
        }
    }

    fn try_begin_acquire(&self, id: DependencyId) -> bool {
        self.acquire_flag(id)
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Downloads the fallback artifact for `id` into the cache directory,
    /// reporting fractional progress in `[0.0, 1.0]` through `progress`,
    /// and records the override on success. An interrupted acquisition
    /// leaves no usable override behind. At most one acquisition per id
    /// runs at a time.
    pub fn acquire<F>(&self, id: DependencyId, progress: F) -> Result<PathBuf, DepsError>
    where
        F: Fn(f64),
    {
        if !self.try_begin_acquire(id) {
            return Err(DepsError::AcquireInFlight(id));
        }
        // Released on drop, so a panicking progress callback cannot leave
        // the flag latched for the rest of the process.
        let _guard = AcquireGuard(self.acquire_flag(id));

        let result = match id {
            DependencyId::Transcoder => self.acquire_transcoder(&progress),
            DependencyId::VoiceModel => self.acquire_model(&progress),
        };

        match &result {
            Ok(path) => log::info!("{id} acquired at {}", path.display()),
            Err(err) => log::error!("Acquisition of {id} failed: {err}"),
        }
        result
    }

    fn acquire_transcoder<F>(&self, progress: &F) -> Result<PathBuf, DepsError>
    where
        F: Fn(f64),
    {
        let client = download::http_client()?;
        let dest = self.cache_dir.join("bin").join(transcoder::binary_name());
        download::download_file(&client, &transcoder::download_url(), &dest, progress)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| DepsError::AcquireFailed(format!("{}: {e}", dest.display())))?;
        }

        if !transcoder::validate(&dest) {
            return Err(DepsError::AcquireFailed(format!(
                "{} did not pass validation after download",
                dest.display()
            )));
        }
        self.set_override(DependencyId::Transcoder, &dest)?;
        Ok(dest)
    }

    fn acquire_model<F>(&self, progress: &F) -> Result<PathBuf, DepsError>
    where
        F: Fn(f64),
    {
        let dir = voice_model::download_dir(&self.cache_dir);
        let files = voice_model::asset_files();
        let count = files.len() as f64;
        let client = download::http_client()?;

        for (index, file) in files.iter().enumerate() {
            let dest = dir.join(file);
            let base = index as f64;
            if !voice_model::missing_assets(&dir).contains(file) {
                log::debug!("{file} already present, skipping download");
                progress((base + 1.0) / count);
                continue;
            }
            download::download_file(&client, &voice_model::asset_url(file), &dest, &|f: f64| {
                progress((base + f) / count)
            })?;
        }

        if !voice_model::validate_dir(&dir) {
            return Err(DepsError::AcquireFailed(format!(
                "{} is incomplete after download",
                dir.display()
            )));
        }
        self.set_override(DependencyId::VoiceModel, &dir)?;
        Ok(dir)
    }

    /// Terminal command a user can run instead of the in-app acquisition.
    pub fn install_hint(&self, id: DependencyId) -> &'static str {
        match id {
            DependencyId::Transcoder => transcoder::install_hint(),
            DependencyId::VoiceModel => voice_model::install_hint(),
        }
    }
}

impl Default for DependencyResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears an acquire flag when dropped, unwinding included.
struct AcquireGuard<'a>(&'a AtomicBool);

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn resolver() -> (DependencyResolver, TempDir, TempDir) {
        let config = tempfile::tempdir().expect("tempdir");
        let cache = tempfile::tempdir().expect("tempdir");
        let resolver =
            DependencyResolver::with_dirs(config.path().to_path_buf(), cache.path().to_path_buf());
        (resolver, config, cache)
    }

    fn write_model_pair(dir: &std::path::Path) {
        fs::write(dir.join(voice_model::MODEL_FILE), b"onnx").expect("write");
        fs::write(dir.join(voice_model::VOICES_FILE), b"bin").expect("write");
    }

    #[test]
    fn valid_override_short_circuits_resolution() {
        let (resolver, _config, _cache) = resolver();
        let models = tempfile::tempdir().expect("tempdir");
        write_model_pair(models.path());

        resolver
            .set_override(DependencyId::VoiceModel, models.path())
            .expect("set_override");

        let result = resolver.resolve(DependencyId::VoiceModel);
        assert_eq!(result.path.as_deref(), Some(models.path()));
        assert_eq!(result.checked.len(), 1);
        assert_eq!(result.checked[0].source, "override");
    }

    #[test]
    fn stale_override_is_cleared_not_trusted() {
        let (resolver, _config, _cache) = resolver();
        let models = tempfile::tempdir().expect("tempdir");
        write_model_pair(models.path());
        resolver
            .set_override(DependencyId::VoiceModel, models.path())
            .expect("set_override");

        // Invalidate the override by removing one asset.
        fs::remove_file(models.path().join(voice_model::VOICES_FILE)).expect("remove");

        let result = resolver.resolve(DependencyId::VoiceModel);
        assert_ne!(result.path.as_deref(), Some(models.path()));
        let record = &result.checked[0];
        assert_eq!(record.source, "override");
        assert_eq!(record.note.as_deref(), Some("stale, cleared"));

        // The next pass no longer consults the override at all.
        let again = resolver.resolve(DependencyId::VoiceModel);
        assert!(again.checked.iter().all(|r| r.source != "override"));
    }

    #[test]
    fn rejected_override_leaves_prior_state_unchanged() {
        let (resolver, _config, _cache) = resolver();
        let good = tempfile::tempdir().expect("tempdir");
        write_model_pair(good.path());
        resolver
            .set_override(DependencyId::VoiceModel, good.path())
            .expect("set_override");

        // A directory lacking the voices file must be rejected.
        let bad = tempfile::tempdir().expect("tempdir");
        fs::write(bad.path().join(voice_model::MODEL_FILE), b"onnx").expect("write");
        let err = resolver
            .set_override(DependencyId::VoiceModel, bad.path())
            .expect_err("must reject");
        assert!(matches!(err, DepsError::Invalid { .. }));

        let result = resolver.resolve(DependencyId::VoiceModel);
        assert_eq!(result.path.as_deref(), Some(good.path()));
    }

    #[test]
    fn require_reports_missing_as_typed_error() {
        let (resolver, _config, _cache) = resolver();
        // Fresh temp dirs hold no model assets anywhere the prober looks
        // that validates, unless the host happens to ship them; skip then.
        let result = resolver.resolve(DependencyId::VoiceModel);
        if result.is_found() {
            return;
        }
        let err = resolver
            .require(DependencyId::VoiceModel)
            .expect_err("missing");
        assert!(matches!(err, DepsError::Missing(DependencyId::VoiceModel)));
        assert!(!err.user_message().is_empty());
    }

    #[test]
    fn acquire_is_single_flight_per_id() {
        let (resolver, _config, _cache) = resolver();
        assert!(resolver.try_begin_acquire(DependencyId::VoiceModel));
        let in_flight = AcquireGuard(resolver.acquire_flag(DependencyId::VoiceModel));

        let err = resolver
            .acquire(DependencyId::VoiceModel, |_| {})
            .expect_err("guarded");
        assert!(matches!(
            err,
            DepsError::AcquireInFlight(DependencyId::VoiceModel)
        ));

        // A different id is not affected by this guard.
        assert!(resolver.try_begin_acquire(DependencyId::Transcoder));

        drop(in_flight);
        assert!(resolver.try_begin_acquire(DependencyId::VoiceModel));
    }

    #[test]
    fn acquire_flag_is_released_when_the_progress_callback_panics() {
        let (resolver, _config, cache) = resolver();
        let target = voice_model::download_dir(cache.path());
        fs::create_dir_all(&target).expect("mkdir");
        write_model_pair(&target);

        let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            resolver.acquire(DependencyId::VoiceModel, |_| panic!("consumer bug"))
        }));
        assert!(panicked.is_err());

        // The flag must not stay latched after the unwind.
        let acquired = resolver
            .acquire(DependencyId::VoiceModel, |_| {})
            .expect("acquire after panic");
        assert_eq!(acquired, target);
    }

    #[test]
    fn acquire_model_with_assets_already_present_needs_no_network() {
        let (resolver, _config, cache) = resolver();
        let target = voice_model::download_dir(cache.path());
        fs::create_dir_all(&target).expect("mkdir");
        write_model_pair(&target);

        let fractions = std::sync::Mutex::new(Vec::new());
        let acquired = resolver
            .acquire(DependencyId::VoiceModel, |f| {
                fractions.lock().expect("lock").push(f)
            })
            .expect("acquire");
        assert_eq!(acquired, target);

        // Skipped files still advance the fraction to completion.
        let fractions = fractions.into_inner().expect("into_inner");
        assert_eq!(fractions.last().copied(), Some(1.0));

        // Success records the override for subsequent resolutions.
        let result = resolver.resolve(DependencyId::VoiceModel);
        assert_eq!(result.path, Some(target));
        assert_eq!(result.checked[0].source, "override");
    }

    #[test]
    fn install_hints_are_present_for_both_ids() {
        let (resolver, _config, _cache) = resolver();
        assert!(!resolver.install_hint(DependencyId::Transcoder).is_empty());
        assert!(!resolver.install_hint(DependencyId::VoiceModel).is_empty());
    }
}
