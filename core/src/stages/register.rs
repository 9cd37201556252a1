//! Registration orchestrator
//!
//! Roles targeting the atlas go first and `reg_last` roles last; everything
//! else keeps configuration order. Geometric registrations run mode by mode
//! in [`GeometricMode::PRIORITY`] order, then roles borrowing another role's
//! transform. A failing role is logged and never stops the others.

use super::nii_stem;
use crate::error::{PrepError, Result};
use crate::tools::{ExternalTools, RegistrationParams};
use crate::types::{
    CaseBundle, GeometricMode, Interpolation, RegMode, RegistrationState, TransformHandle,
};
use log::{info, warn};
use std::path::{Path, PathBuf};

pub fn run(
    bundle: &mut CaseBundle,
    tools: &dyn ExternalTools,
    atlas: Option<&Path>,
    repeat: bool,
) -> Result<()> {
    info!("REGISTERING IMAGES:");
    let order = registration_order(bundle, atlas);

    for name in &order {
        let Some(record) = bundle.get_mut(name) else {
            continue;
        };
        let reason = if record.existing_filename().is_none() {
            Some("no converted file")
        } else if record.spec.reg.is_none() {
            Some("no registration requested")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                record.filename_reg = record.filename.clone();
                record.transform = None;
                record.registration = RegistrationState::Skipped(reason.to_string());
            }
            None => record.registration = RegistrationState::Unregistered,
        }
    }

    for mode in GeometricMode::PRIORITY {
        for name in &order {
            let Some(record) = bundle.get(name) else {
                continue;
            };
            if record.registration != RegistrationState::Unregistered
                || record.spec.reg != Some(RegMode::Geometric(mode))
            {
                continue;
            }
            if let Err(e) = register_role(bundle, tools, name, mode, repeat) {
                warn!("- Registration of {} failed: {}", name, e);
                mark_skipped(bundle, name, format!("registration failed: {}", e));
            }
        }
    }

    for name in &order {
        let source = match bundle.get(name).map(|r| (&r.registration, &r.spec.reg)) {
            Some((RegistrationState::Unregistered, Some(RegMode::Borrow(source)))) => {
                source.clone()
            }
            _ => continue,
        };
        if let Err(e) = borrow_transform(bundle, tools, name, &source, repeat) {
            warn!(
                "- Error attempting to apply existing transform to series {}: {}",
                name, e
            );
            mark_skipped(bundle, name, format!("transform from {} failed: {}", source, e));
        }
    }

    // every role carries a registered filename from here on
    for name in &order {
        if let Some(record) = bundle.get_mut(name) {
            if record.filename_reg.is_none() {
                record.filename_reg = record.filename.clone();
            }
        }
    }
    Ok(())
}

/// Atlas-target roles first, `reg_last` roles last, otherwise bundle order
pub fn registration_order(bundle: &CaseBundle, atlas: Option<&Path>) -> Vec<String> {
    let atlas = atlas.map(|p| p.display().to_string());
    let targets_atlas = |name: &String| {
        let target = bundle.get(name).and_then(|r| r.spec.reg_target.as_ref());
        atlas.is_some() && target == atlas.as_ref()
    };
    let is_last = |name: &String| bundle.get(name).map(|r| r.spec.reg_last).unwrap_or(false);

    let names = bundle.names();
    let mut order: Vec<String> = names.iter().filter(|n| targets_atlas(*n)).cloned().collect();
    order.extend(
        names
            .iter()
            .filter(|n| !targets_atlas(*n) && !is_last(*n))
            .cloned(),
    );
    order.extend(
        names
            .iter()
            .filter(|n| !targets_atlas(*n) && is_last(*n))
            .cloned(),
    );
    order
}

fn mark_skipped(bundle: &mut CaseBundle, name: &str, reason: String) {
    if let Some(record) = bundle.get_mut(name) {
        record.registration = RegistrationState::Skipped(reason);
    }
}

/// Target file: an existing path, else the named role's registered volume
fn resolve_target(bundle: &CaseBundle, target: &str) -> Option<PathBuf> {
    let path = Path::new(target);
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    bundle
        .get(target)
        .and_then(|r| r.existing_registered())
        .map(Path::to_path_buf)
}

fn register_role(
    bundle: &mut CaseBundle,
    tools: &dyn ExternalTools,
    name: &str,
    mode: GeometricMode,
    repeat: bool,
) -> Result<()> {
    let work_dir = bundle.info.work_dir.clone();
    let Some(record) = bundle.get(name) else {
        return Ok(());
    };
    let target_name = record.spec.reg_target.clone().unwrap_or_default();
    let target = resolve_target(bundle, &target_name);
    let moving_reg = record
        .registration_moving()
        .filter(|p| p.is_file())
        .map(Path::to_path_buf);
    let (Some(target), Some(moving_reg), Some(moving)) =
        (target, moving_reg, record.filename.clone())
    else {
        info!(
            "- Skipping registration of {}: moving or target image ({}) is missing",
            name, target_name
        );
        mark_skipped(bundle, name, format!("missing input for target {}", target_name));
        return Ok(());
    };
    let interp = record.spec.interp;
    let params = RegistrationParams::for_mode(mode, record.spec.reg_com);

    let handle = compute_transform(tools, &moving_reg, &target, &params, &work_dir, repeat)?;
    let output = warp(tools, &moving, &target, interp, &handle, &work_dir, repeat)?;

    if let Some(record) = bundle.get_mut(name) {
        record.filename_reg = Some(output);
        record.transform = Some(handle);
        record.registration = RegistrationState::Registered;
    }
    Ok(())
}

/// Computes, or reuses, the composite transform from `moving` to `target`
fn compute_transform(
    tools: &dyn ExternalTools,
    moving: &Path,
    target: &Path,
    params: &RegistrationParams,
    work_dir: &Path,
    repeat: bool,
) -> Result<TransformHandle> {
    let prefix = work_dir.join(format!("{}_2_{}_", nii_stem(moving), nii_stem(target)));
    let composite = crate::tools::composite_path(&prefix);
    if composite.is_file() && !repeat {
        info!("- Warp file already exists at {}", composite.display());
        return Ok(TransformHandle::composite(composite));
    }
    info!(
        "- Registering image {} to {}",
        moving.display(),
        target.display()
    );
    let written = tools.register(target, moving, params, &prefix)?;
    Ok(TransformHandle::composite(written))
}

/// Applies `handle` to `moving`, writing `<work>/<moving stem>_w.nii.gz`
fn warp(
    tools: &dyn ExternalTools,
    moving: &Path,
    reference: &Path,
    interp: Interpolation,
    handle: &TransformHandle,
    work_dir: &Path,
    repeat: bool,
) -> Result<PathBuf> {
    let output = work_dir.join(format!("{}_w.nii.gz", nii_stem(moving)));
    if output.is_file() && !repeat {
        info!("- Transformed image already exists at {}", output.display());
    } else {
        info!("- Creating warped image {}", output.display());
        tools.apply_transforms(moving, reference, &output, interp, handle)?;
    }
    Ok(output)
}

fn borrow_transform(
    bundle: &mut CaseBundle,
    tools: &dyn ExternalTools,
    name: &str,
    source: &str,
    repeat: bool,
) -> Result<()> {
    let work_dir = bundle.info.work_dir.clone();
    let source_record = bundle
        .get(source)
        .ok_or_else(|| PrepError::config(format!("{} borrows from unknown role {}", name, source)))?;
    let handle = source_record
        .transform
        .clone()
        .ok_or_else(|| PrepError::tool("antsApplyTransforms", format!("{} has no transform", source)))?;
    let reference = source_record
        .existing_registered()
        .map(Path::to_path_buf)
        .ok_or_else(|| {
            PrepError::MissingInput(source_record.filename_reg.clone().unwrap_or_default())
        })?;
    let record = bundle
        .get(name)
        .ok_or_else(|| PrepError::config(format!("unknown role {}", name)))?;
    let moving = record
        .existing_filename()
        .map(Path::to_path_buf)
        .ok_or_else(|| PrepError::MissingInput(record.filename.clone().unwrap_or_default()))?;
    let interp = record.spec.interp;

    let output = warp(tools, &moving, &reference, interp, &handle, &work_dir, repeat)?;
    if let Some(record) = bundle.get_mut(name) {
        record.filename_reg = Some(output);
        record.transform = Some(handle);
        record.registration = RegistrationState::Registered;
    }
    Ok(())
}
