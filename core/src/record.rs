//! Persisted case record
//!
//! Two files per case, both in the work directory:
//! - `<id>_metadata.bin`: bincode snapshot, read back by the ADC tool
//! - `<id>_metadata_HR.json`: pretty-printed JSON for people, with each
//!   role's DICOM list collapsed to its first file

use crate::error::{PrepError, Result};
use crate::types::{path_or_sentinel, CaseBundle, CaseInfo, RoleRecord, NONE_SENTINEL};
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Suffix of the binary snapshot
pub const METADATA_SUFFIX: &str = "metadata.bin";

/// Suffix of the human-readable record
pub const METADATA_HR_SUFFIX: &str = "metadata_HR.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfoSnapshot {
    pub id: String,
    pub dcmdir: String,
    pub work_dir: String,
    pub mask_file: String,
}

/// Everything known about one role at the end of a case
///
/// Unset values hold the `None` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleSnapshot {
    pub name: String,
    pub series: String,
    pub dicoms: Vec<String>,
    pub directory: String,
    pub filename: String,
    pub reg: String,
    pub reg_target: String,
    pub reg_moving: String,
    pub registration: String,
    pub filename_reg: String,
    pub transform: Vec<String>,
    pub interp: String,
    pub bias: bool,
    pub no_norm: bool,
    pub reg_last: bool,
    pub filename_masked: String,
    pub filename_bias: String,
    pub filename_norm: String,
}

impl From<&RoleRecord> for RoleSnapshot {
    fn from(record: &RoleRecord) -> Self {
        let series = record.selection.series();
        Self {
            name: record.name.clone(),
            series: record.selection.label().to_string(),
            dicoms: series
                .map(|s| s.files.iter().map(|f| f.display().to_string()).collect())
                .unwrap_or_default(),
            directory: path_or_sentinel(series.map(|s| s.directory.as_path())),
            filename: path_or_sentinel(record.filename.as_deref()),
            reg: record
                .spec
                .reg
                .as_ref()
                .map(|r| r.to_string())
                .unwrap_or_else(|| NONE_SENTINEL.to_string()),
            reg_target: record
                .spec
                .reg_target
                .clone()
                .unwrap_or_else(|| NONE_SENTINEL.to_string()),
            reg_moving: path_or_sentinel(record.reg_moving.as_deref()),
            registration: record.registration.to_string(),
            filename_reg: path_or_sentinel(record.filename_reg.as_deref()),
            transform: record
                .transform
                .iter()
                .flat_map(|t| t.files())
                .map(|f| f.display().to_string())
                .collect(),
            interp: record.spec.interp.to_string(),
            bias: record.spec.bias,
            no_norm: record.spec.no_norm,
            reg_last: record.spec.reg_last,
            filename_masked: path_or_sentinel(record.filename_masked.as_deref()),
            filename_bias: path_or_sentinel(record.filename_bias.as_deref()),
            filename_norm: path_or_sentinel(record.filename_norm.as_deref()),
        }
    }
}

impl RoleSnapshot {
    /// DICOM files of the matched series, if any are still on disk
    pub fn dicom_files(&self) -> Vec<PathBuf> {
        self.dicoms.iter().map(PathBuf::from).collect()
    }
}

/// Snapshot of a finished case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub info: InfoSnapshot,
    pub roles: Vec<RoleSnapshot>,
}

impl CaseRecord {
    pub fn from_bundle(bundle: &CaseBundle) -> Self {
        let info: &CaseInfo = &bundle.info;
        Self {
            info: InfoSnapshot {
                id: info.id.clone(),
                dcmdir: info.dicom_dir.display().to_string(),
                work_dir: info.work_dir.display().to_string(),
                mask_file: path_or_sentinel(info.mask_file.as_deref()),
            },
            roles: bundle.iter().map(RoleSnapshot::from).collect(),
        }
    }

    pub fn role(&self, name: &str) -> Option<&RoleSnapshot> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// JSON object keyed by `info` and then each role name, in role order
    pub fn human_readable(&self) -> Result<Value> {
        let mut root = Map::new();
        root.insert("info".to_string(), serde_json::to_value(&self.info)?);
        for role in &self.roles {
            let mut value = serde_json::to_value(role)?;
            if let Some(fields) = value.as_object_mut() {
                fields.remove("name");
                let first = role
                    .dicoms
                    .first()
                    .cloned()
                    .unwrap_or_else(|| NONE_SENTINEL.to_string());
                fields.insert("dicoms".to_string(), Value::String(first));
                if role.transform.is_empty() {
                    fields.insert(
                        "transform".to_string(),
                        Value::String(NONE_SENTINEL.to_string()),
                    );
                }
            }
            root.insert(role.name.clone(), value);
        }
        Ok(Value::Object(root))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Writes both record files, each unless it exists and `repeat` is false
pub fn write_record(bundle: &CaseBundle, repeat: bool) -> Result<CaseRecord> {
    let record = CaseRecord::from_bundle(bundle);

    let binary = bundle.info.output_path(METADATA_SUFFIX);
    if repeat || !binary.is_file() {
        std::fs::write(&binary, record.to_bytes()?)?;
        info!("- Saved case record to {}", binary.display());
    }

    let readable = bundle.info.output_path(METADATA_HR_SUFFIX);
    if repeat || !readable.is_file() {
        let text = serde_json::to_string_pretty(&record.human_readable()?)?;
        std::fs::write(&readable, text)?;
        info!("- Saved readable case record to {}", readable.display());
    }
    Ok(record)
}

/// Reads a binary case record
pub fn load_record(path: &Path) -> Result<CaseRecord> {
    let bytes = std::fs::read(path)
        .map_err(|e| PrepError::RecordError(format!("{}: {}", path.display(), e)))?;
    CaseRecord::from_bytes(&bytes)
}

/// First `*_metadata.bin` in `dir`, by name
pub fn find_record(dir: &Path) -> Option<PathBuf> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.ends_with(METADATA_SUFFIX))
                    .unwrap_or(false)
        })
        .collect();
    found.sort();
    found.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        GeometricMode, MatchedSeries, RegMode, RegistrationState, RoleSpec, Selection,
        SeriesHeader, TransformHandle,
    };
    use tempfile::TempDir;

    fn bundle(temp_dir: &TempDir) -> CaseBundle {
        let study = temp_dir.path().join("42").join("study");
        std::fs::create_dir_all(&study).unwrap();
        let mut bundle = CaseBundle::new(CaseInfo::from_dicom_dir(&study));
        let work = bundle.info.work_dir.clone();

        let spec = RoleSpec::derived(
            Some(RegMode::Geometric(GeometricMode::Affine)),
            Some("T2FS".to_string()),
        );
        let mut dwi = RoleRecord::new("DWI", spec);
        dwi.selection = Selection::Matched(MatchedSeries {
            label: "AX DWI [dir=00004]".to_string(),
            files: vec![study.join("00004/IM0001.dcm"), study.join("00004/IM0002.dcm")],
            directory: study.join("00004"),
            header: SeriesHeader::default(),
        });
        dwi.filename = Some(work.join("42_DWI.nii.gz"));
        dwi.filename_reg = Some(work.join("42_DWI_w.nii.gz"));
        dwi.transform = Some(TransformHandle::composite(
            work.join("42_DWI_2_42_T2FS_w_Composite.h5"),
        ));
        dwi.registration = RegistrationState::Registered;
        bundle.insert(dwi);

        let mut t2 = RoleRecord::new("T2", RoleSpec::default());
        t2.selection = Selection::NoMatch;
        bundle.insert(t2);
        bundle
    }

    #[test]
    fn test_unset_fields_are_sentinels() {
        let temp_dir = TempDir::new().unwrap();
        let record = CaseRecord::from_bundle(&bundle(&temp_dir));
        let t2 = record.role("T2").unwrap();
        assert_eq!(t2.series, "None");
        assert_eq!(t2.filename, "None");
        assert_eq!(t2.directory, "None");
        assert_eq!(t2.reg, "None");
        assert!(t2.dicoms.is_empty());
        assert_eq!(record.info.mask_file, "None");

        let dwi = record.role("DWI").unwrap();
        assert_eq!(dwi.reg, "affine");
        assert_eq!(dwi.registration, "registered");
        assert_eq!(dwi.transform.len(), 1);
    }

    #[test]
    fn test_write_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = bundle(&temp_dir);
        let written = write_record(&bundle, false).unwrap();

        let path = find_record(&bundle.info.work_dir).unwrap();
        assert_eq!(path, bundle.info.work_dir.join("42_metadata.bin"));
        let loaded = load_record(&path).unwrap();
        assert_eq!(loaded, written);
        assert_eq!(loaded.role("DWI").unwrap().dicom_files().len(), 2);

        let text =
            std::fs::read_to_string(bundle.info.work_dir.join("42_metadata_HR.json")).unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["info", "DWI", "T2"]);
        assert!(value["DWI"]["dicoms"].as_str().unwrap().ends_with("IM0001.dcm"));
        assert_eq!(value["T2"]["dicoms"], "None");
        assert_eq!(value["T2"]["transform"], "None");
        assert_eq!(value["info"]["id"], "42");
    }

    #[test]
    fn test_existing_record_kept_without_repeat() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = bundle(&temp_dir);
        let readable = bundle.info.output_path(METADATA_HR_SUFFIX);
        std::fs::write(&readable, "{}").unwrap();

        write_record(&bundle, false).unwrap();
        assert_eq!(std::fs::read_to_string(&readable).unwrap(), "{}");
        write_record(&bundle, true).unwrap();
        assert!(std::fs::read_to_string(&readable).unwrap().contains("\"DWI\""));
    }

    #[test]
    fn test_corrupt_record() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("1_metadata.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        assert!(matches!(load_record(&path), Err(PrepError::RecordError(_))));
    }
}
