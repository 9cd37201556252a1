use super::{postprocess, remove_if_exists, sibling};
use crate::error::Result;
use crate::tools::ExternalTools;
use crate::types::{CaseBundle, Selection};
use log::{info, warn};
use std::path::PathBuf;

/// Role whose anatomical split is used as its registration moving image
pub const ASL_ROLE: &str = "ASL";

/// Converts every matched role to `<work>/<id>_<role>.nii.gz`
///
/// Extra converter outputs are removed once every role has been converted and
/// post-processed. Only configuration errors abort the stage; any other
/// failure is logged and leaves the role without a file.
pub fn run(bundle: &mut CaseBundle, tools: &dyn ExternalTools, repeat: bool) -> Result<()> {
    info!("CONVERTING FILES:");
    let mut extras: Vec<PathBuf> = Vec::new();
    for name in bundle.names().to_vec() {
        if let Err(e) = convert_role(bundle, tools, &name, repeat, &mut extras) {
            if e.is_fatal() {
                return Err(e);
            }
            warn!("- Conversion of {} failed: {}", name, e);
        }
    }

    for extra in &extras {
        if extra.is_file() {
            info!(
                "- Removing extra file generated during conversion: {}",
                extra.display()
            );
            remove_if_exists(extra)?;
        }
    }

    info!("CONVERTED FILES LIST:");
    for record in bundle.iter() {
        if let Some(file) = record.existing_filename() {
            info!("- {} = {}", record.name, file.display());
        }
    }

    if let Some(asl) = bundle.get_mut(ASL_ROLE) {
        if let Some(file) = &asl.filename {
            let anat = sibling(file, "_anat.nii.gz");
            if anat.is_file() {
                asl.reg_moving = Some(anat);
            }
        }
    }
    Ok(())
}

fn convert_role(
    bundle: &mut CaseBundle,
    tools: &dyn ExternalTools,
    name: &str,
    repeat: bool,
    extras: &mut Vec<PathBuf>,
) -> Result<()> {
    let Some(record) = bundle.get(name) else {
        return Ok(());
    };
    if record.selection == Selection::Pending {
        return Ok(());
    }
    let series_dir = record.selection.series().map(|s| s.directory.clone());
    let out_name = format!("{}_{}", bundle.info.id, name);
    let expected = bundle.info.role_volume(name);

    match series_dir {
        _ if expected.is_file() && !repeat => {
            info!("- {} already exists and will not be overwritten", out_name);
        }
        Some(series_dir) => {
            if expected.is_file() {
                info!(
                    "- {} already exists, but repeat is True, so it will be overwritten",
                    out_name
                );
                remove_if_exists(&expected)?;
            }
            info!("- Converting {}", out_name);
            let mut outputs = tools
                .convert(&series_dir, &bundle.info.work_dir, &out_name)?
                .into_iter();
            if let Some(primary) = outputs.next() {
                if primary != expected {
                    info!(
                        "- {} converted file is named {}, renaming {}",
                        name,
                        primary.display(),
                        expected.display()
                    );
                    std::fs::rename(&primary, &expected)?;
                }
            }
            extras.extend(outputs);
        }
        None => {
            info!("- No existing file and no matching series found: {}", name);
        }
    }

    if expected.is_file() {
        if let Some(record) = bundle.get_mut(name) {
            record.filename = Some(expected);
        }
        postprocess::run(bundle, name, repeat)?;
    }
    Ok(())
}
