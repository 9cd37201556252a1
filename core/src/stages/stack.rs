use crate::error::{PrepError, Result};
use crate::types::CaseBundle;
use crate::volume::{stack_volumes, Volume};
use log::{info, warn};
use std::path::PathBuf;

/// Suffix of the 4D review volume
pub const STACK_SUFFIX: &str = "nii4d.nii.gz";

/// Stacks every normalized volume, in role order, into `<work>/<id>_nii4d.nii.gz`
///
/// Needs at least two normalized volumes of the same shape. Returns the
/// stack's path when it exists after the call.
pub fn run(bundle: &CaseBundle, repeat: bool) -> Result<Option<PathBuf>> {
    info!("MAKING 4D NII:");
    let mut files = Vec::new();
    for record in bundle.iter() {
        if let Some(normalized) = record.filename_norm.as_ref().filter(|p| p.is_file()) {
            info!(
                "- Adding {} to nii4D list at {}",
                record.name,
                normalized.display()
            );
            files.push(normalized.clone());
        }
    }
    if files.len() < 2 {
        info!("- Not enough files to make 4D Nii");
        return Ok(None);
    }

    let output = bundle.info.output_path(STACK_SUFFIX);
    if output.is_file() && !repeat {
        info!("- 4D Nii already exists at {}", output.display());
        return Ok(Some(output));
    }

    info!("- Creating 4D nii at {}", output.display());
    let volumes = files
        .iter()
        .map(|f| Volume::open(f))
        .collect::<Result<Vec<_>>>()?;
    let arrays: Vec<_> = volumes.iter().map(|v| v.data().clone()).collect();
    let data = match stack_volumes(&arrays) {
        Ok(data) => data,
        Err(PrepError::ShapeError(msg)) => {
            warn!("- Normalized volumes cannot be stacked: {}", msg);
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    volumes[0].with_data(data).save(&output)?;
    Ok(Some(output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::write_constant;
    use crate::types::{CaseInfo, RoleRecord, RoleSpec};
    use tempfile::TempDir;

    fn case(temp_dir: &TempDir, shapes: &[(&str, [usize; 3])]) -> CaseBundle {
        let study = temp_dir.path().join("1").join("study");
        std::fs::create_dir_all(&study).unwrap();
        let mut bundle = CaseBundle::new(CaseInfo::from_dicom_dir(&study));
        for (i, (name, shape)) in shapes.iter().enumerate() {
            let path = bundle.info.work_dir.join(format!("1_{}_wmtbn.nii.gz", name));
            let mut record = RoleRecord::new(*name, RoleSpec::default());
            record.filename_norm = Some(write_constant(&path, shape, i as f32 + 1.0));
            bundle.insert(record);
        }
        bundle
    }

    #[test]
    fn test_stacks_in_role_order() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = case(&temp_dir, &[("T2", [3, 3, 2]), ("T1", [3, 3, 2]), ("T1C", [3, 3, 2])]);

        let output = run(&bundle, false).unwrap().unwrap();
        assert_eq!(output, bundle.info.work_dir.join("1_nii4d.nii.gz"));
        let stack = Volume::open(&output).unwrap();
        assert_eq!(stack.shape(), &[3, 3, 2, 3]);
        assert_eq!(stack.phase_means(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_needs_two_volumes() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = case(&temp_dir, &[("T1", [3, 3, 2])]);
        assert!(run(&bundle, false).unwrap().is_none());
    }

    #[test]
    fn test_shape_mismatch_skips() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = case(&temp_dir, &[("T1", [3, 3, 2]), ("DWI", [2, 2, 2])]);
        assert!(run(&bundle, false).unwrap().is_none());
        assert!(!bundle.info.output_path(STACK_SUFFIX).exists());
    }

    #[test]
    fn test_existing_stack_kept() {
        let temp_dir = TempDir::new().unwrap();
        let bundle = case(&temp_dir, &[("T1", [3, 3, 2]), ("T2", [3, 3, 2])]);
        let output = bundle.info.output_path(STACK_SUFFIX);
        write_constant(&output, &[2, 2, 2], 0.0);

        run(&bundle, false).unwrap();
        assert_eq!(Volume::open(&output).unwrap().shape(), &[2, 2, 2]);
        run(&bundle, true).unwrap();
        assert_eq!(Volume::open(&output).unwrap().shape(), &[3, 3, 2, 2]);
    }
}
