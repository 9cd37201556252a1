use super::{Interpolation, RegMode, RegistrationState, Series, SeriesHeader, TransformHandle};
use crate::selection::Criteria;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Sentinel written for anything a role does not have (no match, no file)
pub const NONE_SENTINEL: &str = "None";

/// Post-conversion processing configured for a role
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostProcess {
    /// A post-processor from the registry, validated at load time
    Named(String),

    /// Generic multiphase splitter: output role name -> phase index
    Split(BTreeMap<String, usize>),
}

/// Static configuration of one role, as loaded from the role-configuration file
#[derive(Debug, Clone, Default)]
pub struct RoleSpec {
    /// Match criteria; roles without criteria are never matched against the catalog
    pub criteria: Option<Criteria>,

    /// Registration mode, `None` when the role stays in its native space
    pub reg: Option<RegMode>,

    /// File path or role name to register to
    pub reg_target: Option<String>,

    /// Initial moving transform by centre of mass (0 = geometric centre, 1 = centre of mass)
    pub reg_com: u8,

    pub interp: Interpolation,

    /// Truncate, N4-correct and normalize this role
    pub bias: bool,

    /// Skip normalization after bias correction
    pub no_norm: bool,

    /// Schedule after every other role (targets a role registered earlier)
    pub reg_last: bool,

    pub postprocess: Option<PostProcess>,
}

impl RoleSpec {
    /// Spec for a role derived during processing rather than matched
    pub fn derived(reg: Option<RegMode>, reg_target: Option<String>) -> Self {
        Self {
            reg,
            reg_target,
            reg_com: 1,
            ..Default::default()
        }
    }
}

/// The series bound to a role by the matcher
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedSeries {
    pub label: String,
    pub files: Vec<PathBuf>,
    pub directory: PathBuf,
    pub header: SeriesHeader,
}

impl From<&Series> for MatchedSeries {
    fn from(series: &Series) -> Self {
        Self {
            label: series.label.clone(),
            files: series.files.clone(),
            directory: series.directory.clone(),
            header: series.header.clone(),
        }
    }
}

/// Matcher outcome for a role
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Selection {
    /// Not evaluated (no criteria, or matcher not run yet)
    #[default]
    Pending,

    /// Evaluated, nothing matched
    NoMatch,

    Matched(MatchedSeries),
}

impl Selection {
    /// Series label, or the `None` sentinel
    pub fn label(&self) -> &str {
        match self {
            Selection::Matched(series) => &series.label,
            _ => NONE_SENTINEL,
        }
    }

    pub fn series(&self) -> Option<&MatchedSeries> {
        match self {
            Selection::Matched(series) => Some(series),
            _ => None,
        }
    }
}

/// One role's configuration plus everything derived for it during the case
#[derive(Debug, Clone)]
pub struct RoleRecord {
    pub name: String,
    pub spec: RoleSpec,
    pub selection: Selection,

    /// Converted (native space) volume
    pub filename: Option<PathBuf>,

    /// Surrogate volume used to compute this role's transform
    pub reg_moving: Option<PathBuf>,

    pub registration: RegistrationState,
    pub filename_reg: Option<PathBuf>,
    pub transform: Option<TransformHandle>,
    pub filename_masked: Option<PathBuf>,
    pub filename_bias: Option<PathBuf>,
    pub filename_norm: Option<PathBuf>,
}

impl RoleRecord {
    pub fn new(name: impl Into<String>, spec: RoleSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            selection: Selection::Pending,
            filename: None,
            reg_moving: None,
            registration: RegistrationState::Unregistered,
            filename_reg: None,
            transform: None,
            filename_masked: None,
            filename_bias: None,
            filename_norm: None,
        }
    }

    /// Role derived from another role's data, with its volume already on disk
    pub fn derived(name: impl Into<String>, spec: RoleSpec, filename: PathBuf) -> Self {
        let mut record = Self::new(name, spec);
        record.filename = Some(filename);
        record
    }

    /// Converted filename, only if the file exists
    pub fn existing_filename(&self) -> Option<&Path> {
        self.filename.as_deref().filter(|p| p.is_file())
    }

    /// Registered filename, only if the file exists
    pub fn existing_registered(&self) -> Option<&Path> {
        self.filename_reg.as_deref().filter(|p| p.is_file())
    }

    /// Volume used to compute this role's transform
    pub fn registration_moving(&self) -> Option<&Path> {
        self.reg_moving.as_deref().or(self.filename.as_deref())
    }
}

/// Renders an optional path the way the case record stores it
pub fn path_or_sentinel(path: Option<&Path>) -> String {
    path.map(|p| p.display().to_string())
        .unwrap_or_else(|| NONE_SENTINEL.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selection_sentinel() {
        assert_eq!(Selection::NoMatch.label(), "None");
        assert_eq!(Selection::Pending.label(), "None");
        assert!(Selection::NoMatch.series().is_none());
        assert_ne!(Selection::NoMatch, Selection::Pending);
    }

    #[test]
    fn test_registration_moving_prefers_surrogate() {
        let mut record = RoleRecord::derived("ASL", RoleSpec::default(), PathBuf::from("/w/1_ASL.nii.gz"));
        assert_eq!(record.registration_moving(), Some(Path::new("/w/1_ASL.nii.gz")));

        record.reg_moving = Some(PathBuf::from("/w/1_ASL_anat.nii.gz"));
        assert_eq!(
            record.registration_moving(),
            Some(Path::new("/w/1_ASL_anat.nii.gz"))
        );
    }

    #[test]
    fn test_path_or_sentinel() {
        assert_eq!(path_or_sentinel(None), "None");
        assert_eq!(path_or_sentinel(Some(Path::new("/a/b.nii.gz"))), "/a/b.nii.gz");
    }
}
