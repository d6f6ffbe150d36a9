//! Persisted dependency-path overrides.
//!
//! Two small plain-text files under the config directory, one per
//! dependency, each holding a single absolute path. Files are overwritten
//! wholesale on update; cross-process coordination is last-writer-wins.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::DependencyId;

pub(crate) struct OverrideStore {
    root: PathBuf,
}

impl OverrideStore {
    pub(crate) fn new(config_dir: PathBuf) -> Self {
        Self { root: config_dir }
    }

    fn file_for(&self, id: DependencyId) -> PathBuf {
        let name = match id {
            DependencyId::Transcoder => "transcoder-path.txt",
            DependencyId::VoiceModel => "model-dir.txt",
        };
        self.root.join(name)
    }

    pub(crate) fn read(&self, id: DependencyId) -> Option<PathBuf> {
        let file = self.file_for(id);
        let content = fs::read_to_string(&file).ok()?;
        let trimmed = content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(PathBuf::from(trimmed))
        }
    }

    pub(crate) fn write(&self, id: DependencyId, path: &Path) -> io::Result<()> {
        fs::create_dir_all(&self.root)?;
        fs::write(self.file_for(id), path.display().to_string())
    }

    pub(crate) fn clear(&self, id: DependencyId) -> io::Result<()> {
        match fs::remove_file(self.file_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
