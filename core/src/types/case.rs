use super::RoleRecord;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Metadata block of a case
#[derive(Debug, Clone, PartialEq)]
pub struct CaseInfo {
    /// Case identifier (accession number), the name of the work directory
    pub id: String,

    /// Root of the case's DICOM tree
    pub dicom_dir: PathBuf,

    /// Directory receiving every output of the case
    pub work_dir: PathBuf,

    /// Binary breast mask, once it exists
    pub mask_file: Option<PathBuf>,
}

impl CaseInfo {
    /// Derives case metadata from a DICOM directory laid out as `<data>/<id>/<study>`
    ///
    /// Outputs go to `<data>/<id>`, and the case id is that directory's name.
    pub fn from_dicom_dir(dicom_dir: &Path) -> Self {
        let work_dir = dicom_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| dicom_dir.to_path_buf());
        let id = work_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            id,
            dicom_dir: dicom_dir.to_path_buf(),
            work_dir,
            mask_file: None,
        }
    }

    /// `<work_dir>/<id>_<suffix>`
    pub fn output_path(&self, suffix: &str) -> PathBuf {
        self.work_dir.join(format!("{}_{}", self.id, suffix))
    }

    /// Expected converted volume for a role
    pub fn role_volume(&self, role: &str) -> PathBuf {
        self.output_path(&format!("{}.nii.gz", role))
    }
}

/// Case-scoped aggregate of every role record
///
/// Role iteration order is the order roles were inserted: configuration-file
/// order first, then roles derived during processing.
#[derive(Debug, Clone)]
pub struct CaseBundle {
    pub info: CaseInfo,
    order: Vec<String>,
    roles: HashMap<String, RoleRecord>,
}

impl CaseBundle {
    pub fn new(info: CaseInfo) -> Self {
        Self {
            info,
            order: Vec::new(),
            roles: HashMap::new(),
        }
    }

    /// Inserts a role, replacing an existing record of the same name in place
    pub fn insert(&mut self, record: RoleRecord) {
        if !self.roles.contains_key(&record.name) {
            self.order.push(record.name.clone());
        }
        self.roles.insert(record.name.clone(), record);
    }

    pub fn get(&self, name: &str) -> Option<&RoleRecord> {
        self.roles.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut RoleRecord> {
        self.roles.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.roles.contains_key(name)
    }

    /// Role names in iteration order
    pub fn names(&self) -> &[String] {
        &self.order
    }

    /// Role records in iteration order
    pub fn iter(&self) -> impl Iterator<Item = &RoleRecord> {
        self.order.iter().filter_map(|name| self.roles.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
