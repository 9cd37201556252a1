use super::sibling;
use crate::error::Result;
use crate::tools::ExternalTools;
use crate::types::CaseBundle;
use crate::volume::{normalize_nonzero, truncate_intensities, Volume};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Lower and upper in-mask quantiles kept by truncation
const TRUNCATION: (f64, f64) = (0.001, 0.999);

/// Truncation, N4 correction and normalization of the `bias` roles
///
/// Outputs chain off the masked volume: `<stem>t`, `<stem>tb` (plus
/// `<stem>_biasmap`) and `<stem>tbn`. Roles with `no_norm` stop after N4.
pub fn run(bundle: &mut CaseBundle, tools: &dyn ExternalTools, repeat: bool) -> Result<()> {
    info!("BIAS CORRECTING IMAGES:");
    let Some(mask_file) = bundle.info.mask_file.clone().filter(|p| p.is_file()) else {
        info!("- Skipping bias correction as mask image does not exist.");
        return Ok(());
    };

    let names: Vec<String> = bundle
        .iter()
        .filter(|r| r.spec.bias)
        .map(|r| r.name.clone())
        .collect();
    for name in &names {
        if let Err(e) = correct_role(bundle, tools, name, &mask_file, repeat) {
            warn!("- Bias correction of {} failed: {}", name, e);
        }
    }

    info!("NORMALIZING NIIs:");
    for name in &names {
        if let Err(e) = normalize_role(bundle, name, repeat) {
            warn!("- Normalization of {} failed: {}", name, e);
        }
    }
    Ok(())
}

fn correct_role(
    bundle: &mut CaseBundle,
    tools: &dyn ExternalTools,
    name: &str,
    mask_file: &Path,
    repeat: bool,
) -> Result<()> {
    let Some(record) = bundle.get_mut(name) else {
        return Ok(());
    };
    let Some(masked) = record.filename_masked.clone().filter(|p| p.is_file()) else {
        info!(
            "- Skipping bias correction for {} as masked file does not exist.",
            name
        );
        return Ok(());
    };
    let truncated = sibling(&masked, "t.nii.gz");
    let corrected = sibling(&truncated, "b.nii.gz");
    let bias_map = sibling(&masked, "_biasmap.nii.gz");

    if repeat || !truncated.is_file() {
        info!("- Truncating image intensities for {}", masked.display());
        let volume = Volume::open(&masked)?;
        let mask = Volume::open(mask_file)?;
        let (lo, hi) = TRUNCATION;
        let data = truncate_intensities(volume.data(), mask.data(), lo, hi)?;
        volume.with_data(data).save(&truncated)?;
    } else {
        info!("- Truncated image already exists at {}", truncated.display());
    }

    if repeat || !corrected.is_file() {
        info!("- Bias correcting {}", truncated.display());
        tools.correct_bias(&truncated, mask_file, &corrected, &bias_map)?;
    } else {
        info!(
            "- Bias corrected image already exists at {}",
            corrected.display()
        );
    }
    record.filename_bias = Some(corrected);
    Ok(())
}

fn normalize_role(bundle: &mut CaseBundle, name: &str, repeat: bool) -> Result<()> {
    let Some(record) = bundle.get_mut(name) else {
        return Ok(());
    };
    if record.spec.no_norm {
        return Ok(());
    }
    let Some(corrected) = record.filename_bias.clone().filter(|p| p.is_file()) else {
        return Ok(());
    };
    let normalized: PathBuf = sibling(&corrected, "n.nii.gz");

    if repeat || !normalized.is_file() {
        info!("- Normalizing {} at {}", name, corrected.display());
        let volume = Volume::open(&corrected)?;
        let data = normalize_nonzero(volume.data());
        volume.with_data(data).save(&normalized)?;
    } else {
        info!(
            "- Normalized {} already exists at {}",
            name,
            normalized.display()
        );
    }
    record.filename_norm = Some(normalized);
    Ok(())
}
