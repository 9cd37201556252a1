//! Scripted stand-in for the external tools
//!
//! Writes real NIfTI files so the stages downstream can read them, and keeps
//! a log of every call for assertions.

use super::{composite_path, ExternalTools, RegistrationParams};
use crate::error::{PrepError, Result};
use crate::testing::volume_from_fn;
use crate::types::{Interpolation, TransformHandle};
use crate::volume::Volume;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// What the converter produces for one series directory
#[derive(Debug, Clone)]
pub(crate) struct FakeSeries {
    pub volume: Volume,
    /// Second output, written with an `a` suffix
    pub extra: Option<Volume>,
    /// Tab-separated b-values written next to the primary output
    pub bvals: Option<String>,
}

impl FakeSeries {
    pub fn new(volume: Volume) -> Self {
        Self {
            volume,
            extra: None,
            bvals: None,
        }
    }

    pub fn with_extra(mut self, extra: Volume) -> Self {
        self.extra = Some(extra);
        self
    }

    pub fn with_bvals(mut self, bvals: &str) -> Self {
        self.bvals = Some(bvals.to_string());
        self
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeTools {
    series: HashMap<PathBuf, FakeSeries>,
    failing: HashSet<String>,
    models: Vec<PathBuf>,
    probability: Option<Volume>,
    calls: RefCell<Vec<String>>,
}

impl FakeTools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the converter output for a series directory
    pub fn with_series(mut self, dir: impl Into<PathBuf>, series: FakeSeries) -> Self {
        self.series.insert(dir.into(), series);
        self
    }

    /// Makes every call whose main input has this file name fail
    pub fn failing_on(mut self, file_name: &str) -> Self {
        self.failing.insert(file_name.to_string());
        self
    }

    /// Adds a mask model that predicts `probability`
    pub fn with_mask_model(mut self, params: impl Into<PathBuf>, probability: Volume) -> Self {
        self.models.push(params.into());
        self.probability = Some(probability);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Number of logged calls starting with `prefix`
    pub fn count(&self, prefix: &str) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, tool: &str, input: &Path) -> Result<()> {
        if self.failing.contains(&file_name(input)) {
            return Err(PrepError::tool(tool, format!("scripted failure on {}", input.display())));
        }
        if !input.exists() {
            return Err(PrepError::tool(tool, format!("{} does not exist", input.display())));
        }
        Ok(())
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// First of `<name>.nii.gz`, `<name>a.nii.gz`, `<name>b.nii.gz`, ... not on disk
fn free_name(out_dir: &Path, name: &str) -> PathBuf {
    let first = out_dir.join(format!("{}.nii.gz", name));
    if !first.exists() {
        return first;
    }
    ('a'..='z')
        .map(|c| out_dir.join(format!("{}{}.nii.gz", name, c)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

impl ExternalTools for FakeTools {
    fn convert(&self, series_dir: &Path, out_dir: &Path, name: &str) -> Result<Vec<PathBuf>> {
        self.log(format!("convert {} {}", file_name(series_dir), name));
        self.check("dcm2niix", series_dir)?;
        let series = self
            .series
            .get(series_dir)
            .cloned()
            .unwrap_or_else(|| FakeSeries::new(volume_from_fn(&[4, 4, 4], |_| 1.0)));

        let primary = free_name(out_dir, name);
        series.volume.save(&primary)?;
        let mut written = vec![primary.clone()];
        if let Some(bvals) = &series.bvals {
            let stem = primary.to_string_lossy().replace(".nii.gz", "");
            std::fs::write(format!("{}.bval", stem), bvals)?;
            std::fs::write(format!("{}.bvec", stem), "0\n0\n0\n")?;
        }
        if let Some(extra) = &series.extra {
            let path = free_name(out_dir, name);
            extra.save(&path)?;
            written.push(path);
        }
        written.sort();
        Ok(written)
    }

    fn register(
        &self,
        fixed: &Path,
        moving: &Path,
        params: &RegistrationParams,
        prefix: &Path,
    ) -> Result<PathBuf> {
        self.log(format!(
            "register {} {} {}",
            file_name(moving),
            file_name(fixed),
            params.mode
        ));
        self.check("antsRegistration", moving)?;
        self.check("antsRegistration", fixed)?;
        let composite = composite_path(prefix);
        std::fs::write(&composite, params.to_args(fixed, moving, prefix).join(" "))?;
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
        self.log(format!("apply {} {} {}", file_name(moving), file_name(reference), interp));
        self.check("antsApplyTransforms", moving)?;
        if !transform.exists() {
            return Err(PrepError::tool("antsApplyTransforms", "transform file missing"));
        }
        std::fs::copy(moving, output)?;
        Ok(())
    }

    fn correct_bias(
        &self,
        input: &Path,
        mask: &Path,
        output: &Path,
        bias_map: &Path,
    ) -> Result<()> {
        self.log(format!("n4 {}", file_name(input)));
        self.check("N4BiasFieldCorrection", input)?;
        self.check("N4BiasFieldCorrection", mask)?;
        let volume = Volume::open(input)?;
        volume.save(output)?;
        let ones = volume.data().mapv(|_| 1.0);
        volume.with_data(ones).save(bias_map)?;
        Ok(())
    }

    fn mask_models(&self) -> &[PathBuf] {
        &self.models
    }

    fn predict_mask(&self, params: &Path, infer_dir: &Path, output: &Path) -> Result<()> {
        self.log(format!("predict {}", file_name(params)));
        self.check("mask predictor", infer_dir)?;
        let probability = self
            .probability
            .as_ref()
            .ok_or_else(|| PrepError::tool("mask predictor", "no probability scripted"))?;
        probability.save(output)?;
        Ok(())
    }
}
