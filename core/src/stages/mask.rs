use super::{nii_stem, remove_if_exists, sibling};
use crate::config::PipelineOptions;
use crate::error::{PrepError, Result};
use crate::tools::ExternalTools;
use crate::types::CaseBundle;
use crate::volume::{apply_mask, combine_probabilities, Volume};
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Suffix of the case's binary breast mask
pub const MASK_SUFFIX: &str = "breast_mask.nii.gz";

/// Builds the breast mask and applies it to every registered role
///
/// Needs the registered volume of the mask reference role; without it the
/// stage only warns. An existing mask is reused. Masked volumes are named
/// `<stem>m.nii.gz` for warped inputs (`..._w`) and `<stem>_wm.nii.gz`
/// otherwise.
pub fn run(
    bundle: &mut CaseBundle,
    tools: &dyn ExternalTools,
    options: &PipelineOptions,
) -> Result<()> {
    info!("BREAST MASKING:");
    let Some(reference) = bundle
        .get(&options.mask_role)
        .and_then(|r| r.existing_registered())
        .map(Path::to_path_buf)
    else {
        warn!(
            "Did not find required image for breast masking: {}",
            options.mask_role
        );
        return Ok(());
    };

    let mask_file = bundle.info.output_path(MASK_SUFFIX);
    if mask_file.is_file() {
        info!("- Breast mask already exists at {}", mask_file.display());
    } else {
        info!("- Creating CNN-based breast mask at {}", mask_file.display());
        if let Err(e) = predict(bundle, tools, &reference, &mask_file, options.mask_threshold) {
            warn!("- Error creating breast mask at {}: {}", mask_file.display(), e);
        }
    }
    if !mask_file.is_file() {
        info!(
            "- Combined mask file not found, expected location is: {}",
            mask_file.display()
        );
        return Ok(());
    }
    bundle.info.mask_file = Some(mask_file.clone());

    let mask = Volume::open(&mask_file)?;
    for name in bundle.names().to_vec() {
        if let Err(e) = mask_role(bundle, &name, &mask, options.repeat) {
            warn!("- Masking {} failed: {}", name, e);
        }
    }
    Ok(())
}

/// Masked output name for a registered volume
pub fn masked_path(registered: &Path) -> PathBuf {
    if nii_stem(registered).ends_with("_w") {
        sibling(registered, "m.nii.gz")
    } else {
        sibling(registered, "_wm.nii.gz")
    }
}

/// Runs every mask model, then thresholds the mean probability
fn predict(
    bundle: &CaseBundle,
    tools: &dyn ExternalTools,
    reference: &Path,
    mask_file: &Path,
    threshold: f32,
) -> Result<()> {
    let models = tools.mask_models();
    if models.is_empty() {
        return Err(PrepError::config("no mask model parameter files configured"));
    }

    let mut geometry: Option<Volume> = None;
    let mut probabilities = Vec::with_capacity(models.len());
    for (i, params) in models.iter().enumerate() {
        let output = bundle
            .info
            .output_path(&format!("breast_mask_prob{}.nii.gz", i));
        tools.predict_mask(params, &bundle.info.work_dir, &output)?;
        let volume = Volume::open(&output)?;
        remove_if_exists(&output)?;
        probabilities.push(volume.data().clone());
        geometry.get_or_insert(volume);
    }

    let geometry = match geometry {
        Some(volume) => volume,
        None => Volume::open(reference)?,
    };
    let mask = combine_probabilities(&probabilities, threshold)?;
    geometry.with_data(mask).save(mask_file)?;
    info!("- Created combined breast mask at {}", mask_file.display());
    Ok(())
}

fn mask_role(bundle: &mut CaseBundle, name: &str, mask: &Volume, repeat: bool) -> Result<()> {
    let Some(record) = bundle.get_mut(name) else {
        return Ok(());
    };
    let Some(registered) = record.filename_reg.clone() else {
        info!("- No registered file exists for series {}", name);
        return Ok(());
    };
    let masked = masked_path(&registered);

    if registered.is_file() && (repeat || !masked.is_file()) {
        info!("- Masking {}", registered.display());
        let volume = Volume::open(&registered)?;
        let data = apply_mask(volume.data(), mask.data())?;
        volume.with_data(data).save(&masked)?;
        record.filename_masked = Some(masked);
    } else if masked.is_file() {
        info!(
            "- Masked file already exists for {} at {}",
            name,
            masked.display()
        );
        record.filename_masked = Some(masked);
    } else {
        info!("- Skipping masking for {} as file does not exist", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{volume_from_fn, write_constant};
    use crate::tools::fake::FakeTools;
    use crate::types::{CaseInfo, RoleRecord, RoleSpec};
    use tempfile::TempDir;

    const SHAPE: [usize; 3] = [4, 4, 4];

    /// Probability 0.9 in a 2x2x2 block at the origin and one isolated corner voxel
    fn probability() -> Volume {
        volume_from_fn(&SHAPE, |i| {
            let (x, y, z) = (i / 16, (i / 4) % 4, i % 4);
            if (x < 2 && y < 2 && z < 2) || i == 63 {
                0.9
            } else {
                0.1
            }
        })
    }

    fn bundle_with(temp_dir: &TempDir, roles: &[(&str, &str)]) -> CaseBundle {
        let study = temp_dir.path().join("1").join("study");
        std::fs::create_dir_all(&study).unwrap();
        let mut bundle = CaseBundle::new(CaseInfo::from_dicom_dir(&study));
        for (name, file_name) in roles {
            let path = bundle.info.work_dir.join(file_name);
            let mut record = RoleRecord::new(*name, RoleSpec::default());
            record.filename_reg = Some(write_constant(&path, &SHAPE, 5.0));
            bundle.insert(record);
        }
        bundle
    }

    #[test]
    fn test_masked_path() {
        assert_eq!(
            masked_path(Path::new("/w/1_T1_w.nii.gz")),
            PathBuf::from("/w/1_T1_wm.nii.gz")
        );
        assert_eq!(
            masked_path(Path::new("/w/1_T2.nii.gz")),
            PathBuf::from("/w/1_T2_wm.nii.gz")
        );
    }

    #[test]
    fn test_builds_and_applies_mask() {
        let temp_dir = TempDir::new().unwrap();
        let mut bundle = bundle_with(
            &temp_dir,
            &[("T1", "1_T1_w.nii.gz"), ("T2", "1_T2.nii.gz")],
        );
        bundle.insert(RoleRecord::new("EMPTY", RoleSpec::default()));
        let tools = FakeTools::new()
            .with_mask_model("/models/a.json", probability())
            .with_mask_model("/models/b.json", probability());

        run(&mut bundle, &tools, &PipelineOptions::default()).unwrap();

        assert_eq!(tools.count("predict"), 2);
        let mask_file = bundle.info.output_path(MASK_SUFFIX);
        assert_eq!(bundle.info.mask_file, Some(mask_file.clone()));
        let mask = Volume::open(&mask_file).unwrap();
        // the isolated voxel is dropped
        assert_eq!(mask.data().iter().filter(|&&v| v > 0.0).count(), 8);

        let t1 = bundle.get("T1").unwrap();
        let masked = t1.filename_masked.clone().unwrap();
        assert_eq!(masked, bundle.info.work_dir.join("1_T1_wm.nii.gz"));
        let data = Volume::open(&masked).unwrap();
        assert_eq!(data.data().iter().filter(|&&v| v == 5.0).count(), 8);
        assert_eq!(data.data().iter().filter(|&&v| v == 0.0).count(), 56);

        let t2 = bundle.get("T2").unwrap();
        assert_eq!(
            t2.filename_masked,
            Some(bundle.info.work_dir.join("1_T2_wm.nii.gz"))
        );
        assert!(bundle.get("EMPTY").unwrap().filename_masked.is_none());
        // probability maps are not kept
        assert!(!bundle.info.output_path("breast_mask_prob0.nii.gz").exists());
    }

    #[test]
    fn test_existing_mask_reused() {
        let temp_dir = TempDir::new().unwrap();
        let mut bundle = bundle_with(&temp_dir, &[("T1", "1_T1_w.nii.gz")]);
        write_constant(&bundle.info.output_path(MASK_SUFFIX), &SHAPE, 1.0);
        let tools = FakeTools::new().with_mask_model("/models/a.json", probability());

        run(&mut bundle, &tools, &PipelineOptions::default()).unwrap();
        assert_eq!(tools.count("predict"), 0);

        let masked = bundle.get("T1").unwrap().filename_masked.clone().unwrap();
        assert!(Volume::open(&masked).unwrap().data().iter().all(|&v| v == 5.0));

        // masked outputs are only rewritten on repeat
        write_constant(&masked, &SHAPE, 9.0);
        run(&mut bundle, &tools, &PipelineOptions::default()).unwrap();
        assert!(Volume::open(&masked).unwrap().data().iter().all(|&v| v == 9.0));
        run(&mut bundle, &tools, &PipelineOptions::default().repeat(true)).unwrap();
        assert!(Volume::open(&masked).unwrap().data().iter().all(|&v| v == 5.0));
    }

    #[test]
    fn test_order_independent() {
        let temp_dir = TempDir::new().unwrap();
        let forward = bundle_with(
            &temp_dir,
            &[("T1", "1_T1_w.nii.gz"), ("T2", "1_T2_w.nii.gz")],
        );
        let mut reversed = CaseBundle::new(forward.info.clone());
        for name in ["T2", "T1"] {
            reversed.insert(forward.get(name).unwrap().clone());
        }
        let mut forward = forward;
        let tools = FakeTools::new().with_mask_model("/models/a.json", probability());

        run(&mut forward, &tools, &PipelineOptions::default()).unwrap();
        let first: Vec<_> = ["T1", "T2"]
            .iter()
            .map(|n| Volume::open(forward.get(n).unwrap().filename_masked.as_ref().unwrap()).unwrap())
            .collect();

        run(&mut reversed, &tools, &PipelineOptions::default().repeat(true)).unwrap();
        for (name, before) in ["T1", "T2"].iter().zip(&first) {
            let after = Volume::open(reversed.get(name).unwrap().filename_masked.as_ref().unwrap()).unwrap();
            assert_eq!(after.data(), before.data());
        }
    }

    #[test]
    fn test_missing_reference_is_noop() {
        let temp_dir = TempDir::new().unwrap();
        let mut bundle = bundle_with(&temp_dir, &[("T2", "1_T2_w.nii.gz")]);
        let tools = FakeTools::new().with_mask_model("/models/a.json", probability());

        run(&mut bundle, &tools, &PipelineOptions::default()).unwrap();
        assert!(tools.calls().is_empty());
        assert!(bundle.info.mask_file.is_none());
        assert!(bundle.get("T2").unwrap().filename_masked.is_none());
    }
}
