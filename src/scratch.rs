use crate::{logi, logw};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Temporary artifacts of one run, removed when the guard is dropped.
///
/// Drop runs on every exit path, so a failed step does not leave scratch files
/// behind. Missing files count as already clean.
#[derive(Debug, Default)]
pub struct ScratchFiles {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl ScratchFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Leaves the files on disk when dropped.
    pub fn keep(mut self, keep: bool) -> Self {
        self.keep = keep;
        self
    }

    /// Registers `path` and hands it back for use.
    pub fn track(&mut self, path: impl Into<PathBuf>) -> PathBuf {
        let path = path.into();
        if !self.paths.contains(&path) {
            self.paths.push(path.clone());
        }
        path
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Removes every tracked file now. Returns how many were actually deleted.
    pub fn cleanup(&mut self) -> usize {
        if self.keep {
            logi(format!("Keeping {} scratch files", self.paths.len()));
            self.paths.clear();
            return 0;
        }

        let mut removed = 0;
        for path in self.paths.drain(..) {
            if remove_if_present(&path) {
                removed += 1;
            }
        }
        removed
    }
}

fn remove_if_present(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(err) if err.kind() == ErrorKind::NotFound => false,
        Err(err) => {
            logw(format!("Failed to remove scratch file {}: {}", path.display(), err));
            false
        }
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}
