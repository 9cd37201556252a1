use std::path::{Path, PathBuf};

/// Opaque reference to a computed spatial mapping
///
/// A handle lists transform files in application order, each with an invert
/// flag. The registration engine writes a single composite file, so handles
/// created by registration hold exactly one entry; borrowing roles clone the
/// handle instead of recomputing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformHandle {
    entries: Vec<(PathBuf, bool)>,
}

impl TransformHandle {
    /// Handle for a composite transform file written by the registration engine
    pub fn composite(path: impl Into<PathBuf>) -> Self {
        Self {
            entries: vec![(path.into(), false)],
        }
    }

    /// Appends another transform, applied after the existing ones
    pub fn then(mut self, path: impl Into<PathBuf>, invert: bool) -> Self {
        self.entries.push((path.into(), invert));
        self
    }

    /// Transform files with their invert flags
    pub fn entries(&self) -> &[(PathBuf, bool)] {
        &self.entries
    }

    /// Transform files only
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().map(|(p, _)| p.as_path())
    }

    /// Whether every transform file is still on disk
    pub fn exists(&self) -> bool {
        self.files().all(Path::is_file)
    }
}
