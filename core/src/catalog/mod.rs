//! Series catalog: discovers DICOM files under a case directory and groups
//! them into series, one per containing directory

mod manifest;

pub use manifest::{write_manifest, SeriesManifest};

use crate::error::{PrepError, Result};
use crate::extraction::read_series_header;
use crate::types::{Series, SeriesHeader};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Description used for series without a SeriesDescription
const MISSING_DESCRIPTION: &str = "none";

/// Builds the catalog of every DICOM series below `dicom_dir`
///
/// Files are grouped by their immediate parent directory. Directories are
/// visited in sorted order and each group's header comes from its first file
/// in sorted order.
pub fn build_catalog(dicom_dir: &Path) -> Result<Vec<Series>> {
    info!("GETTING SERIES LIST:");
    info!("- DICOM directory = {}", dicom_dir.display());

    if !dicom_dir.is_dir() {
        return Err(PrepError::MissingInput(dicom_dir.to_path_buf()));
    }

    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for file in find_dicom_files(dicom_dir) {
        let parent = file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dicom_dir.to_path_buf());
        groups.entry(parent).or_default().push(file);
    }

    let mut catalog = Vec::with_capacity(groups.len());
    for (directory, mut files) in groups {
        files.sort();
        let header = match read_series_header(&files[0]) {
            Ok(header) => header,
            Err(e) => {
                warn!("- Skipping {}: {}", directory.display(), e);
                continue;
            }
        };
        if header.description.is_none() {
            info!(
                "- Series {} has no series description",
                catalog.len() + 1
            );
        }

        let label = series_label(&header, &directory);
        catalog.push(Series {
            index: catalog.len(),
            directory,
            files,
            header,
            label,
        });
    }

    info!("- Found {} series", catalog.len());
    Ok(catalog)
}

/// Display label of a series, e.g. `AX T1 POST FS postcon [dir=00012]`
pub fn series_label(header: &SeriesHeader, directory: &Path) -> String {
    let mut marker = if header.has_contrast() {
        " postcon ".to_string()
    } else {
        " ".to_string()
    };
    if header.is_reformatted() {
        marker.push_str("ref ");
    }

    let description = header.description.as_deref().unwrap_or(MISSING_DESCRIPTION);
    format!("{}{}[dir={}]", description, marker, dir_suffix(directory))
}

/// Last five characters of a directory path
fn dir_suffix(directory: &Path) -> String {
    let text = directory.to_string_lossy();
    let count = text.chars().count();
    text.chars().skip(count.saturating_sub(5)).collect()
}

/// Recursively finds DICOM files
///
/// `.dcm` files are accepted as-is. Files without any extension are sniffed
/// for the DICOM magic; `DICOMDIR` is never included.
pub fn find_dicom_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();

        if name.ends_with(".dcm") {
            files.push(path.to_path_buf());
        } else if !name.contains('.')
            && !name.eq_ignore_ascii_case("dicomdir")
            && is_dicom_file(path)
        {
            files.push(path.to_path_buf());
        }
    }

    files.sort();
    files
}

/// Checks for the `DICM` magic after the 128-byte preamble
pub fn is_dicom_file(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return false,
    };

    let mut buffer = [0u8; 132];
    match file.read_exact(&mut buffer) {
        Ok(()) => &buffer[128..132] == b"DICM",
        Err(_) => false,
    }
}
