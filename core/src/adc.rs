//! ADC maps from the DWI series of processed cases
//!
//! Works from the case record left by the pipeline: the DWI role's DICOM
//! files are converted again (keeping the b-value table) into `DWI_temp`, and
//! the ADC is computed from the mean b=0 and mean maximum-b volumes.

use crate::error::{PrepError, Result};
use crate::pipeline::{case_number, sort_by_case};
use crate::record::{find_record, load_record, RoleSnapshot};
use crate::stages::postprocess::read_bvals;
use crate::stages::{remove_if_exists, sibling};
use crate::tools::ExternalTools;
use crate::types::NONE_SENTINEL;
use crate::volume::Volume;
use log::{error, info};
use ndarray::{ArrayD, Zip};
use std::path::{Path, PathBuf};

/// Suffix of the ADC output, `<dir>/<dir name>_ADC.nii.gz`
pub const ADC_SUFFIX: &str = "ADC.nii.gz";

/// Converter output name for the temporary DWI volume
pub const DWI_TEMP: &str = "DWI_temp";

const DWI_ROLE: &str = "DWI";

/// ADC output scale (mm²/s to 10⁻⁶ mm²/s)
const ADC_SCALE: f64 = 1e6;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdcOptions {
    /// Recompute existing ADC maps
    pub overwrite: bool,

    /// Keep the converter outputs
    pub intermediates: bool,
}

/// What happened to one case directory
#[derive(Debug, Clone, PartialEq)]
pub enum AdcOutcome {
    Created(PathBuf),
    AlreadyExists(PathBuf),
    NoRecord,
    /// No DWI role, or its DICOM files are gone
    MissingDwi,
    /// Conversion did not leave a volume with both b-tables
    MissingConversion,
    NotFourD,
}

/// Processed case directories (`<data>/*`), ordered by case number
pub fn processed_dirs(data_dir: &Path) -> Result<Vec<PathBuf>> {
    if !data_dir.is_dir() {
        return Err(PrepError::MissingInput(data_dir.to_path_buf()));
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(data_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    sort_by_case(&mut dirs, case_number);
    Ok(dirs)
}

/// Computes ADC maps for every directory, returning the maps written
///
/// A failing directory is logged and never stops the others.
pub fn run(dirs: &[PathBuf], tools: &dyn ExternalTools, options: AdcOptions) -> Vec<PathBuf> {
    info!(
        "Performing ADC calculation for a total of {} directories",
        dirs.len()
    );
    let mut created = Vec::new();
    for dir in dirs {
        info!("Working on directory {}", dir.display());
        match make_adc(dir, tools, options) {
            Ok(AdcOutcome::Created(path)) => created.push(path),
            Ok(_) => {}
            Err(e) => error!("- ADC calculation failed for {}: {}", dir.display(), e),
        }
    }
    created
}

/// ADC map for one processed case directory
pub fn make_adc(dir: &Path, tools: &dyn ExternalTools, options: AdcOptions) -> Result<AdcOutcome> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let adc_file = dir.join(format!("{}_{}", name, ADC_SUFFIX));
    if adc_file.is_file() && !options.overwrite {
        info!(
            "- ADC already exists at {}, work will not be repeated",
            adc_file.display()
        );
        return Ok(AdcOutcome::AlreadyExists(adc_file));
    }

    let Some(record_file) = find_record(dir) else {
        info!("- No case record found in {}", dir.display());
        return Ok(AdcOutcome::NoRecord);
    };
    info!("- Loading metadata file");
    let record = load_record(&record_file)?;

    let Some(series_dir) = record.role(DWI_ROLE).and_then(dwi_series_dir) else {
        info!("- Missing some required files - ADC calculation not performed");
        return Ok(AdcOutcome::MissingDwi);
    };

    let dwi_file = dir.join(format!("{}.nii.gz", DWI_TEMP));
    let bvals_file = dir.join(format!("{}.bval", DWI_TEMP));
    let bvecs_file = dir.join(format!("{}.bvec", DWI_TEMP));
    let have_all = |files: &[&PathBuf]| files.iter().all(|f| f.is_file());

    let mut temporaries = vec![dwi_file.clone(), bvals_file.clone(), bvecs_file.clone()];
    if !have_all(&[&dwi_file, &bvals_file, &bvecs_file]) {
        info!("- Converting DWI");
        for stale in &temporaries {
            remove_if_exists(stale)?;
        }
        for written in tools.convert(&series_dir, dir, DWI_TEMP)? {
            temporaries.push(sibling(&written, ".bval"));
            temporaries.push(sibling(&written, ".bvec"));
            temporaries.push(written);
        }
    }

    let outcome = if have_all(&[&dwi_file, &bvals_file, &bvecs_file]) {
        compute(&dwi_file, &bvals_file, &adc_file)
    } else {
        info!("- Converted DWI or b-tables not found at {}", dwi_file.display());
        Ok(AdcOutcome::MissingConversion)
    };

    if !options.intermediates {
        temporaries.sort();
        temporaries.dedup();
        for file in temporaries.iter().filter(|f| f.is_file()) {
            info!("- Removing temporary file {}", file.display());
            remove_if_exists(file)?;
        }
    }
    outcome
}

/// Series directory of the DWI role, when its first DICOM file still exists
fn dwi_series_dir(role: &RoleSnapshot) -> Option<PathBuf> {
    let first = role.dicom_files().into_iter().next().filter(|f| f.is_file())?;
    if role.directory != NONE_SENTINEL && Path::new(&role.directory).is_dir() {
        return Some(PathBuf::from(&role.directory));
    }
    first.parent().map(Path::to_path_buf)
}

fn compute(dwi_file: &Path, bvals_file: &Path, adc_file: &Path) -> Result<AdcOutcome> {
    let dwi = Volume::open(dwi_file)?;
    if dwi.data().ndim() != 4 {
        info!("- DWI is not 4D, so ADC calculation could not be performed");
        return Ok(AdcOutcome::NotFourD);
    }
    let bvals = read_bvals(bvals_file)?;
    adc_map(&dwi, &bvals)?.save(adc_file)?;
    info!("- Saved output to {}", adc_file.display());
    Ok(AdcOutcome::Created(adc_file.to_path_buf()))
}

/// `ln(mean(max-b) / mean(b0)) / -bmax`, scaled to 10⁻⁶ mm²/s
///
/// Non-finite voxels are mapped the way `nan_to_num` does: NaN to 0 and
/// infinities to the largest finite `f32` of the same sign.
pub fn adc_map(dwi: &Volume, bvals: &[f64]) -> Result<Volume> {
    if bvals.len() != dwi.phase_count() {
        return Err(PrepError::ShapeError(format!(
            "{} b-values for {} DWI volumes",
            bvals.len(),
            dwi.phase_count()
        )));
    }
    let bmax = bvals.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if bmax <= 0.0 {
        return Err(PrepError::ShapeError(
            "no diffusion-weighted volumes in DWI series".to_string(),
        ));
    }
    let b0: Vec<usize> = indices_where(bvals, |b| b == 0.0);
    if b0.is_empty() {
        return Err(PrepError::ShapeError(
            "no b=0 volumes in DWI series".to_string(),
        ));
    }
    let weighted = indices_where(bvals, |b| b == bmax);

    let b0_mean = dwi.mean_of_phases(&b0)?.into_data();
    let max_mean = dwi.mean_of_phases(&weighted)?.into_data();

    let mut adc = ArrayD::<f32>::zeros(b0_mean.raw_dim());
    Zip::from(&mut adc)
        .and(&b0_mean)
        .and(&max_mean)
        .for_each(|out, &s0, &s| {
            let value = (s as f64 / s0 as f64).ln() / -bmax * ADC_SCALE;
            *out = nan_to_num(value);
        });
    Ok(dwi.with_data(adc))
}

fn indices_where(bvals: &[f64], pred: impl Fn(f64) -> bool) -> Vec<usize> {
    bvals
        .iter()
        .enumerate()
        .filter(|(_, &b)| pred(b))
        .map(|(i, _)| i)
        .collect()
}

pub fn nan_to_num(value: f64) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(f32::MIN as f64, f32::MAX as f64) as f32
    }
}
