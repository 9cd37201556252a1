//! Pipeline configuration
//!
//! - [`ToolPaths`]: locations of the external executables
//! - [`PipelineOptions`]: per-run switches
//! - [`load_role_config`]: the role-configuration JSON file

use crate::error::{PrepError, Result};
use crate::selection::Criteria;
use crate::stages::postprocess;
use crate::types::{Interpolation, PostProcess, RegMode, RoleSpec};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Registration target keyword substituted with the atlas path
pub const ATLAS_TARGET: &str = "atlas";

/// Locations of the external tools
///
/// Defaults are the bare executable names, resolved through `PATH`.
///
/// # Example
///
/// ```
/// use breastprep_core::ToolPaths;
///
/// let tools = ToolPaths::default()
///     .with_dcm2niix("/opt/mricrogl/dcm2niix")
///     .with_mask_model("/models/breast/params.json");
///
/// assert_eq!(tools.ants_registration.to_str(), Some("antsRegistration"));
/// assert_eq!(tools.mask_models.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ToolPaths {
    pub dcm2niix: PathBuf,
    pub ants_registration: PathBuf,
    pub ants_apply_transforms: PathBuf,
    pub n4_bias_correction: PathBuf,

    /// CNN inference command, called once per model parameter file
    pub mask_predictor: PathBuf,

    /// Model parameter files; inference is skipped when empty
    pub mask_models: Vec<PathBuf>,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            dcm2niix: PathBuf::from("dcm2niix"),
            ants_registration: PathBuf::from("antsRegistration"),
            ants_apply_transforms: PathBuf::from("antsApplyTransforms"),
            n4_bias_correction: PathBuf::from("N4BiasFieldCorrection"),
            mask_predictor: PathBuf::from("breast-mask-predict"),
            mask_models: Vec::new(),
        }
    }
}

impl ToolPaths {
    /// Builder: Set the DICOM to NIfTI converter
    pub fn with_dcm2niix(mut self, path: impl Into<PathBuf>) -> Self {
        self.dcm2niix = path.into();
        self
    }

    /// Builder: Set the directory holding the ANTs executables
    pub fn with_ants_dir(mut self, dir: &Path) -> Self {
        self.ants_registration = dir.join("antsRegistration");
        self.ants_apply_transforms = dir.join("antsApplyTransforms");
        self.n4_bias_correction = dir.join("N4BiasFieldCorrection");
        self
    }

    /// Builder: Set the mask inference command
    pub fn with_mask_predictor(mut self, path: impl Into<PathBuf>) -> Self {
        self.mask_predictor = path.into();
        self
    }

    /// Builder: Add a mask model parameter file
    pub fn with_mask_model(mut self, path: impl Into<PathBuf>) -> Self {
        self.mask_models.push(path.into());
        self
    }
}

/// Switches controlling one pipeline run
///
/// # Example
///
/// ```
/// use breastprep_core::PipelineOptions;
///
/// let options = PipelineOptions::new("/support/param_files/breast_regex.json")
///     .repeat(true)
///     .mask_role("T1FS");
///
/// assert!(options.repeat);
/// assert_eq!(options.mask_threshold, 0.5);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    /// Role-configuration JSON file
    pub role_config: PathBuf,

    /// Atlas volume substituted for `reg_target: "atlas"`
    pub atlas: Option<PathBuf>,

    /// Redo work even when outputs exist
    pub repeat: bool,

    /// Hide GPUs from mask inference
    pub force_cpu: bool,

    /// Role whose registered volume the mask model runs on
    pub mask_role: String,

    /// Probability threshold for the combined mask
    pub mask_threshold: f32,

    /// Run truncation, N4 and normalization
    pub bias: bool,

    /// Assemble the 4D review stack
    pub stack: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            role_config: PathBuf::from("breast_regex.json"),
            atlas: None,
            repeat: false,
            force_cpu: false,
            mask_role: "T1".to_string(),
            mask_threshold: 0.5,
            bias: true,
            stack: true,
        }
    }
}

impl PipelineOptions {
    pub fn new(role_config: impl Into<PathBuf>) -> Self {
        Self {
            role_config: role_config.into(),
            ..Default::default()
        }
    }

    /// Builder: Set the atlas volume
    pub fn atlas(mut self, atlas: impl Into<PathBuf>) -> Self {
        self.atlas = Some(atlas.into());
        self
    }

    /// Builder: Redo existing work
    pub fn repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    /// Builder: Force CPU inference
    pub fn force_cpu(mut self, force: bool) -> Self {
        self.force_cpu = force;
        self
    }

    /// Builder: Set the mask reference role
    pub fn mask_role(mut self, role: impl Into<String>) -> Self {
        self.mask_role = role.into();
        self
    }

    /// Builder: Set the mask probability threshold
    pub fn mask_threshold(mut self, threshold: f32) -> Self {
        self.mask_threshold = threshold;
        self
    }

    /// Builder: Enable bias correction and normalization
    pub fn bias(mut self, enabled: bool) -> Self {
        self.bias = enabled;
        self
    }

    /// Builder: Enable the 4D review stack
    pub fn stack(mut self, enabled: bool) -> Self {
        self.stack = enabled;
        self
    }
}

/// `reg` accepts `false` as well as a mode or role name
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RegSetting {
    Flag(bool),
    Name(String),
}

#[derive(Debug, Default, Deserialize)]
struct RegOption {
    reg_com: Option<u8>,
}

/// One role entry as written in the configuration file
#[derive(Debug, Default, Deserialize)]
struct RoleEntry {
    #[serde(rename = "or")]
    any_of: Option<Vec<Vec<String>>>,
    #[serde(rename = "not", default)]
    none_of: Vec<String>,
    reg: Option<RegSetting>,
    reg_target: Option<String>,
    reg_option: Option<RegOption>,
    interp: Option<Interpolation>,
    #[serde(default)]
    bias: bool,
    #[serde(default)]
    no_norm: bool,
    #[serde(default)]
    reg_last: bool,
    split: Option<BTreeMap<String, usize>>,
    split_func: Option<String>,
}

/// Reads the role configuration, keeping the file's role order
pub fn load_role_config(path: &Path, atlas: Option<&Path>) -> Result<Vec<(String, RoleSpec)>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        PrepError::config(format!("cannot read role configuration {}: {}", path.display(), e))
    })?;
    parse_role_config(&text, atlas)
}

/// Parses role configuration JSON
///
/// # Errors
///
/// Configuration errors for malformed JSON, `reg: true`, an atlas target
/// without an atlas, registration without a target, a `reg` naming neither a
/// mode nor a configured role, and unknown post-processors. Invalid patterns
/// are reported as pattern errors.
pub fn parse_role_config(text: &str, atlas: Option<&Path>) -> Result<Vec<(String, RoleSpec)>> {
    let root: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)
        .map_err(|e| PrepError::config(format!("invalid role configuration: {}", e)))?;

    let role_names: Vec<String> = root.keys().cloned().collect();
    let mut roles = Vec::with_capacity(root.len());
    for (name, value) in root {
        let entry: RoleEntry = serde_json::from_value(value)
            .map_err(|e| PrepError::config(format!("role {}: {}", name, e)))?;
        let spec = build_spec(&name, entry, atlas, &role_names)?;
        roles.push((name, spec));
    }
    Ok(roles)
}

fn build_spec(
    name: &str,
    entry: RoleEntry,
    atlas: Option<&Path>,
    role_names: &[String],
) -> Result<RoleSpec> {
    let criteria = match &entry.any_of {
        Some(any_of) => Some(Criteria::new(any_of, &entry.none_of)?),
        None => None,
    };

    let reg = match entry.reg {
        None | Some(RegSetting::Flag(false)) => None,
        Some(RegSetting::Flag(true)) => {
            return Err(PrepError::config(format!(
                "role {}: reg must be false or a registration mode, not true",
                name
            )))
        }
        Some(RegSetting::Name(mode)) => RegMode::parse(&mode),
    };

    let reg_target = match entry.reg_target {
        Some(target) if target == ATLAS_TARGET => {
            let atlas = atlas.ok_or_else(|| {
                PrepError::config(format!("role {}: registers to the atlas but no atlas is set", name))
            })?;
            Some(atlas.display().to_string())
        }
        other => other,
    };

    match &reg {
        Some(RegMode::Geometric(mode)) if reg_target.is_none() => {
            return Err(PrepError::config(format!(
                "role {}: {} registration needs a reg_target",
                name, mode
            )));
        }
        Some(RegMode::Borrow(source)) if !role_names.iter().any(|r| r == source) => {
            return Err(PrepError::config(format!(
                "role {}: reg {} is neither a registration mode nor a role",
                name, source
            )));
        }
        _ => {}
    }

    let postprocess = match (entry.split_func, entry.split) {
        (Some(func), _) => {
            if !postprocess::is_known(&func) {
                return Err(PrepError::config(format!(
                    "role {}: unknown split_func {}",
                    name, func
                )));
            }
            Some(PostProcess::Named(func))
        }
        (None, Some(split)) => Some(PostProcess::Split(split)),
        (None, None) => None,
    };

    Ok(RoleSpec {
        criteria,
        reg,
        reg_target,
        reg_com: entry.reg_option.and_then(|o| o.reg_com).unwrap_or(1),
        interp: entry.interp.unwrap_or_default(),
        bias: entry.bias,
        no_norm: entry.no_norm,
        reg_last: entry.reg_last,
        postprocess,
    })
}
