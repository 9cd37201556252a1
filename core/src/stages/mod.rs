//! Per-case processing stages, in pipeline order
//!
//! Each stage takes the case bundle by `&mut`, records its outputs on the role
//! records and skips work whose output already exists unless `repeat` is set.

pub mod bias;
pub mod convert;
pub mod mask;
pub mod postprocess;
pub mod register;
pub mod stack;

use std::path::{Path, PathBuf};

/// File name without its `.nii` / `.nii.gz` extension
pub fn nii_stem(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.find(".nii") {
        Some(pos) => name[..pos].to_string(),
        None => name,
    }
}

/// Path next to `path` named `<stem><suffix>`
///
/// `sibling("/w/1_T1_w.nii.gz", "m.nii.gz")` is `/w/1_T1_wm.nii.gz`.
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
    path.with_file_name(format!("{}{}", nii_stem(path), suffix))
}

/// Removes a file if it exists
pub(crate) fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
