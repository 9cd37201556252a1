//! Post-conversion processing of individual roles
//!
//! Named post-processors live in a fixed registry; the configuration loader
//! rejects names that are not in it. Every post-processor can run again on
//! its own output without changing it.

use super::{remove_if_exists, sibling};
use crate::error::{PrepError, Result};
use crate::types::{CaseBundle, GeometricMode, PostProcess, RegMode, RoleRecord, RoleSpec};
use crate::volume::Volume;
use log::info;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Post-processor entry point: bundle, role name, repeat flag
pub type PostProcessor = fn(&mut CaseBundle, &str, bool) -> Result<()>;

const REGISTRY: [(&str, PostProcessor); 3] = [
    ("split_asl", split_asl),
    ("split_dwi", split_dwi),
    ("combine_dti55", combine_dti55),
];

/// Directions of a complete DTI acquisition, plus one B0
const DTI_DIRECTIONS: usize = 55;

/// Role created by [`split_dwi`]
pub const B0_ROLE: &str = "B0";

/// Default registration target of the B0 role
const B0_DEFAULT_TARGET: &str = "T2FS";

pub fn lookup(name: &str) -> Option<PostProcessor> {
    REGISTRY
        .iter()
        .find(|(registered, _)| *registered == name)
        .map(|(_, f)| *f)
}

pub fn is_known(name: &str) -> bool {
    lookup(name).is_some()
}

/// Runs whatever post-processing is configured for `role`
pub fn run(bundle: &mut CaseBundle, role: &str, repeat: bool) -> Result<()> {
    let Some(postprocess) = bundle.get(role).and_then(|r| r.spec.postprocess.clone()) else {
        return Ok(());
    };
    match postprocess {
        PostProcess::Named(name) => {
            let f = lookup(&name)
                .ok_or_else(|| PrepError::config(format!("unknown post-processor {}", name)))?;
            f(bundle, role, repeat)
        }
        PostProcess::Split(phases) => split_phases(bundle, role, &phases, repeat),
    }
}

fn existing_file(bundle: &CaseBundle, role: &str) -> Option<PathBuf> {
    bundle
        .get(role)
        .and_then(|r| r.existing_filename())
        .map(Path::to_path_buf)
}

/// Generic multiphase splitter
///
/// Writes phase `index` of the role's 4D volume to `<work>/<id>_<name>.nii.gz`
/// for every `name -> index` entry. Outputs are bound only to roles already in
/// the bundle.
pub fn split_phases(
    bundle: &mut CaseBundle,
    role: &str,
    phases: &BTreeMap<String, usize>,
    repeat: bool,
) -> Result<()> {
    let Some(source) = existing_file(bundle, role) else {
        return Ok(());
    };
    let outputs: Vec<(String, PathBuf)> = phases
        .keys()
        .map(|name| (name.clone(), bundle.info.role_volume(name)))
        .collect();

    if !repeat && outputs.iter().all(|(_, path)| path.is_file()) {
        info!(
            "- Split option was specified for {} but split outputs already exist",
            role
        );
    } else {
        let volume = Volume::open(&source)?;
        if !volume.is_multiphase() {
            info!(
                "- Split option was specified for {}, but data is not 4D",
                role
            );
            return Ok(());
        }
        for (name, &index) in phases {
            info!("- Splitting {} phase {} as {}", role, index, name);
            volume.phase(index)?.save(&bundle.info.role_volume(name))?;
        }
    }

    for (name, path) in outputs {
        if let Some(record) = bundle.get_mut(&name) {
            record.filename = Some(path);
        }
    }
    Ok(())
}

/// Separates ASL perfusion from its anatomical reference
///
/// The anatomical volume (`<stem>_anat.nii.gz`) becomes the role's moving
/// image for registration. A missing perfusion volume leaves the role without
/// a file and unregistered.
pub fn split_asl(bundle: &mut CaseBundle, role: &str, _repeat: bool) -> Result<()> {
    let Some(perfusion) = bundle.get(role).and_then(|r| r.filename.clone()) else {
        return Ok(());
    };
    info!("- Splitting {} into perfusion and anatomy", role);
    let second = sibling(&perfusion, "a.nii.gz");
    let anat = sibling(&perfusion, "_anat.nii.gz");

    // the converter sometimes writes the two parts as separate files
    if second.is_file() && perfusion.is_file() {
        let first_mean = Volume::open(&perfusion)?.mean();
        let second_mean = Volume::open(&second)?.mean();
        if first_mean > second_mean {
            std::fs::rename(&perfusion, &anat)?;
            std::fs::rename(&second, &perfusion)?;
        } else {
            std::fs::rename(&second, &anat)?;
        }
    }

    let Some(record) = bundle.get_mut(role) else {
        return Ok(());
    };
    if !perfusion.is_file() {
        info!("- No perfusion volume for {}", role);
        record.filename = None;
        record.spec.reg = None;
        return Ok(());
    }

    if !anat.is_file() {
        let volume = Volume::open(&perfusion)?;
        if volume.is_multiphase() {
            volume.phase(1)?.save(&anat)?;
            volume.phase(0)?.save(&perfusion)?;
        }
    }
    if anat.is_file() {
        record.reg_moving = Some(anat);
    }
    Ok(())
}

/// Splits a 4D diffusion series into a B0 and a max-b DWI volume
///
/// With a b-value table the B0 is the mean of the b=0 phases and the DWI the
/// mean of the phases at the highest b-value. Without one the brightest phase
/// is taken as B0 and the first other phase as DWI. The DWI volume is
/// overwritten in place; the B0 goes to `<work>/<id>_B0.nii.gz` and gets its
/// own role. The b-value and b-vector tables are always removed.
pub fn split_dwi(bundle: &mut CaseBundle, role: &str, _repeat: bool) -> Result<()> {
    let Some(dwi) = existing_file(bundle, role) else {
        return Ok(());
    };
    let bvals = sibling(&dwi, ".bval");
    let bvecs = sibling(&dwi, ".bvec");
    let b0 = bundle.info.role_volume(B0_ROLE);

    let volume = Volume::open(&dwi)?;
    if volume.is_multiphase() {
        let (b0_volume, dwi_volume) = if bvals.is_file() {
            info!("- Splitting DWI/B0 based on bvals file");
            let values = read_bvals(&bvals)?;
            let max = values.iter().copied().fold(f64::MIN, f64::max);
            let zero: Vec<usize> = indices_where(&values, |b| b == 0.0);
            let highest: Vec<usize> = indices_where(&values, |b| b == max);
            (volume.mean_of_phases(&zero)?, volume.mean_of_phases(&highest)?)
        } else {
            info!("- Splitting DWI/B0 based on average image intensity");
            let means = volume.phase_means();
            let brightest = means
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            let other = (0..means.len()).find(|&i| i != brightest).unwrap_or(0);
            (volume.phase(brightest)?, volume.phase(other)?)
        };
        dwi_volume.save(&dwi)?;
        b0_volume.save(&b0)?;
    } else {
        info!("- DWI is not 4D, so splitting was not performed");
    }

    if b0.is_file() {
        let target = bundle
            .get(role)
            .and_then(|r| r.spec.reg_target.clone())
            .unwrap_or_else(|| B0_DEFAULT_TARGET.to_string());
        let mut spec = RoleSpec::derived(
            Some(RegMode::Geometric(GeometricMode::FastAffine)),
            Some(target),
        );
        spec.reg_com = 0;
        spec.reg_last = true;
        bundle.insert(RoleRecord::derived(B0_ROLE, spec, b0));
    }

    remove_if_exists(&bvals)?;
    remove_if_exists(&bvecs)?;
    Ok(())
}

fn indices_where(values: &[f64], f: impl Fn(f64) -> bool) -> Vec<usize> {
    values
        .iter()
        .enumerate()
        .filter(|(_, &v)| f(v))
        .map(|(i, _)| i)
        .collect()
}

/// Repairs 55-direction DTI data
///
/// More than 56 volumes: the surplus leading B0s are averaged into one and
/// the gradient tables trimmed to match. Fewer than 56 with a second
/// converter output (`<stem>a`): the two are concatenated along with their
/// tables and the second output removed.
pub fn combine_dti55(bundle: &mut CaseBundle, role: &str, _repeat: bool) -> Result<()> {
    let Some(dti) = existing_file(bundle, role) else {
        return Ok(());
    };
    let bvals = sibling(&dti, ".bval");
    let bvecs = sibling(&dti, ".bvec");
    if !bvals.is_file() {
        return Ok(());
    }
    let rows = read_table(&bvals)?;
    let count = rows.first().map(Vec::len).unwrap_or(0);
    if count == DTI_DIRECTIONS + 1 {
        return Ok(());
    }

    if count > DTI_DIRECTIONS + 1 {
        info!("- Averaging multiple B0s in DTI data");
        let surplus = count - DTI_DIRECTIONS;
        Volume::open(&dti)?
            .average_leading_phases(surplus)?
            .save(&dti)?;
        write_table(&bvals, &drop_columns(rows, surplus - 1))?;
        if bvecs.is_file() {
            let vec_rows = read_table(&bvecs)?;
            write_table(&bvecs, &drop_columns(vec_rows, surplus - 1))?;
        }
        return Ok(());
    }

    let dti_a = sibling(&dti, "a.nii.gz");
    let bvals_a = sibling(&dti, "a.bval");
    let bvecs_a = sibling(&dti, "a.bvec");
    if !dti_a.is_file() || !bvals_a.is_file() {
        return Ok(());
    }
    info!("- Combining split DTI file");
    let combined = Volume::open(&dti)?.concat_phases(&Volume::open(&dti_a)?)?;
    combined.save(&dti)?;
    write_table(&bvals, &join_columns(rows, read_table(&bvals_a)?))?;
    if bvecs.is_file() && bvecs_a.is_file() {
        let joined = join_columns(read_table(&bvecs)?, read_table(&bvecs_a)?);
        write_table(&bvecs, &joined)?;
    }
    for path in [&dti_a, &bvals_a, &bvecs_a] {
        remove_if_exists(path)?;
    }
    Ok(())
}

fn drop_columns(rows: Vec<Vec<String>>, n: usize) -> Vec<Vec<String>> {
    rows.into_iter()
        .map(|row| row.into_iter().skip(n).collect())
        .collect()
}

fn join_columns(rows: Vec<Vec<String>>, more: Vec<Vec<String>>) -> Vec<Vec<String>> {
    rows.into_iter()
        .zip(more)
        .map(|(mut row, extra)| {
            row.extend(extra);
            row
        })
        .collect()
}

/// Whitespace-separated table, one row per non-empty line
fn read_table(path: &Path) -> Result<Vec<Vec<String>>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.split_whitespace().map(str::to_string).collect())
        .collect())
}

fn write_table(path: &Path, rows: &[Vec<String>]) -> Result<()> {
    let mut text = String::new();
    for row in rows {
        text.push_str(&row.join("\t"));
        text.push('\n');
    }
    std::fs::write(path, text)?;
    Ok(())
}

/// First row of a b-value table
pub fn read_bvals(path: &Path) -> Result<Vec<f64>> {
    let rows = read_table(path)?;
    let first = rows.into_iter().next().unwrap_or_default();
    first
        .iter()
        .map(|v| {
            v.parse::<f64>().map_err(|_| {
                PrepError::tool(
                    "dcm2niix",
                    format!("invalid b-value {} in {}", v, path.display()),
                )
            })
        })
        .collect()
}
