//! Boundary to the external imaging tools
//!
//! Every conversion, registration, transform application, bias correction and
//! mask inference goes through [`ExternalTools`]. [`CommandLineTools`] runs the
//! real executables; tests substitute a scripted fake.

mod registration;

#[cfg(test)]
pub(crate) mod fake;

pub use registration::{RegStage, RegistrationParams, SigmaUnit};

use crate::config::ToolPaths;
use crate::error::{PrepError, Result};
use crate::types::{Interpolation, TransformHandle};
use log::debug;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Suffix the registration engine appends to the output prefix
pub const COMPOSITE_SUFFIX: &str = "Composite.h5";

/// Operations delegated to external tools
pub trait ExternalTools {
    /// Converts one DICOM series directory, naming outputs `<name>*.nii.gz` in `out_dir`
    ///
    /// Returns the NIfTI files written by this call, sorted.
    fn convert(&self, series_dir: &Path, out_dir: &Path, name: &str) -> Result<Vec<PathBuf>>;

    /// Registers `moving` to `fixed` and returns the composite transform file
    fn register(
        &self,
        fixed: &Path,
        moving: &Path,
        params: &RegistrationParams,
        prefix: &Path,
    ) -> Result<PathBuf>;

    /// Resamples `moving` into the grid of `reference` through `transform`
    fn apply_transforms(
        &self,
        moving: &Path,
        reference: &Path,
        output: &Path,
        interp: Interpolation,
        transform: &TransformHandle,
    ) -> Result<()>;

    /// N4 bias-field correction restricted to `mask`
    fn correct_bias(&self, input: &Path, mask: &Path, output: &Path, bias_map: &Path)
        -> Result<()>;

    /// Model parameter files the mask predictor runs with
    fn mask_models(&self) -> &[PathBuf];

    /// Runs mask inference for one model, writing a probability volume to `output`
    fn predict_mask(&self, params: &Path, infer_dir: &Path, output: &Path) -> Result<()>;
}

/// Runs the real executables
#[derive(Debug, Clone)]
pub struct CommandLineTools {
    paths: ToolPaths,
    force_cpu: bool,
    threads: usize,
}

impl CommandLineTools {
    pub fn new(paths: ToolPaths, force_cpu: bool) -> Self {
        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            paths,
            force_cpu,
            threads,
        }
    }

    pub fn paths(&self) -> &ToolPaths {
        &self.paths
    }

    fn itk_command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.env("ITK_GLOBAL_DEFAULT_NUMBER_OF_THREADS", self.threads.to_string());
        cmd
    }
}

impl ExternalTools for CommandLineTools {
    fn convert(&self, series_dir: &Path, out_dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(out_dir)?;
        let before = list_outputs(out_dir, name)?;

        let mut cmd = Command::new(&self.paths.dcm2niix);
        cmd.args(["-b", "y", "-z", "y", "-w", "2"])
            .arg("-f")
            .arg(name)
            .arg("-o")
            .arg(out_dir)
            .arg(series_dir);
        run("dcm2niix", &mut cmd)?;

        let written: Vec<PathBuf> = list_outputs(out_dir, name)?
            .into_iter()
            .filter(|p| !before.contains(p))
            .collect();
        if written.is_empty() {
            return Err(PrepError::tool(
                "dcm2niix",
                format!("no output for {}", series_dir.display()),
            ));
        }
        Ok(written)
    }

    fn register(
        &self,
        fixed: &Path,
        moving: &Path,
        params: &RegistrationParams,
        prefix: &Path,
    ) -> Result<PathBuf> {
        let mut cmd = self.itk_command(&self.paths.ants_registration);
        cmd.args(params.to_args(fixed, moving, prefix));
        run("antsRegistration", &mut cmd)?;

        let composite = composite_path(prefix);
        if !composite.is_file() {
            return Err(PrepError::tool(
                "antsRegistration",
                format!("{} was not written", composite.display()),
            ));
        }
        Ok(composite)
    }

    fn apply_transforms(
        &self,
        moving: &Path,
        reference: &Path,
        output: &Path,
        interp: Interpolation,
        transform: &TransformHandle,
    ) -> Result<()> {
        let mut cmd = self.itk_command(&self.paths.ants_apply_transforms);
        cmd.args(["-d", "3"])
            .arg("-i")
            .arg(moving)
            .arg("-r")
            .arg(reference)
            .arg("-o")
            .arg(output)
            .args(["-n", interp.simple_name(), "-f", "0"]);
        // the tool applies the last listed transform first
        for (file, invert) in transform.entries().iter().rev() {
            cmd.arg("-t")
                .arg(format!("[{},{}]", file.display(), u8::from(*invert)));
        }
        run("antsApplyTransforms", &mut cmd)
    }

    fn correct_bias(
        &self,
        input: &Path,
        mask: &Path,
        output: &Path,
        bias_map: &Path,
    ) -> Result<()> {
        let mut cmd = self.itk_command(&self.paths.n4_bias_correction);
        cmd.args(["-d", "3"])
            .arg("-i")
            .arg(input)
            .arg("-x")
            .arg(mask)
            .args(["-s", "3", "-c", "[50x50x50x50,1e-06]", "-b", "[300,3]"])
            .arg("-o")
            .arg(format!("[{},{}]", output.display(), bias_map.display()));
        run("N4BiasFieldCorrection", &mut cmd)
    }

    fn mask_models(&self) -> &[PathBuf] {
        &self.paths.mask_models
    }

    fn predict_mask(&self, params: &Path, infer_dir: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.paths.mask_predictor);
        cmd.arg("--params")
            .arg(params)
            .arg("--infer-dir")
            .arg(infer_dir)
            .arg("--out")
            .arg(output);
        if self.force_cpu {
            cmd.env("CUDA_VISIBLE_DEVICES", "-1");
        }
        run("mask predictor", &mut cmd)?;
        if !output.is_file() {
            return Err(PrepError::tool(
                "mask predictor",
                format!("{} was not written", output.display()),
            ));
        }
        Ok(())
    }
}

/// `<prefix>Composite.h5`
pub fn composite_path(prefix: &Path) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(COMPOSITE_SUFFIX);
    PathBuf::from(name)
}

/// Runs a command to completion, turning a failed exit into a tool error
fn run(tool: &str, cmd: &mut Command) -> Result<()> {
    debug!("Running {:?}", cmd);
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| PrepError::tool(tool, format!("could not start: {}", e)))?;

    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    Err(PrepError::tool(tool, format!("{}: {}", output.status, message)))
}

/// `<name>*.nii.gz` files in `dir`, sorted
pub fn list_outputs(dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.is_dir() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(name) && n.ends_with(".nii.gz"))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
