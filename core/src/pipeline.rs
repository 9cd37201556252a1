//! Case discovery and the per-case pipeline
//!
//! A data directory holds one directory per case, named by its accession
//! number, each containing the study's DICOM tree: `<data>/<id>/<study>`.
//! Outputs are written to `<data>/<id>`.

use crate::catalog::{build_catalog, write_manifest};
use crate::config::{load_role_config, PipelineOptions};
use crate::error::Result;
use crate::record::write_record;
use crate::selection::match_roles;
use crate::stages::{bias, convert, mask, register, stack};
use crate::tools::ExternalTools;
use crate::types::{CaseBundle, CaseInfo, RoleRecord};
use log::{error, info};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use walkdir::WalkDir;

/// Suffix of the series manifest
pub const MANIFEST_SUFFIX: &str = "series_list.txt";

/// Seconds to wait after a failed case before starting the next one
pub const COOLDOWN_SECS: u64 = 5;

/// Result of one processed case
#[derive(Debug, Clone)]
pub struct CaseSummary {
    pub bundle: CaseBundle,

    /// 4D review stack, when one was made
    pub stack: Option<PathBuf>,

    pub elapsed: Duration,
}

/// Runs every stage on one study directory
///
/// Order: role configuration, catalog and manifest, matching, conversion,
/// registration, masking, then (as enabled) bias correction and the 4D stack.
/// The case record is written last.
pub fn process_case(
    dicom_dir: &Path,
    tools: &dyn ExternalTools,
    options: &PipelineOptions,
) -> Result<CaseSummary> {
    let started = Instant::now();
    let roles = load_role_config(&options.role_config, options.atlas.as_deref())?;

    let info = CaseInfo::from_dicom_dir(dicom_dir);
    std::fs::create_dir_all(&info.work_dir)?;
    let catalog = build_catalog(dicom_dir)?;
    let manifest = info.output_path(MANIFEST_SUFFIX);
    if write_manifest(&catalog, &manifest, options.repeat)? {
        info!("- Wrote series list to {}", manifest.display());
    }

    let mut bundle = CaseBundle::new(info);
    for (name, spec) in roles {
        bundle.insert(RoleRecord::new(name, spec));
    }
    match_roles(&catalog, &mut bundle);

    convert::run(&mut bundle, tools, options.repeat)?;
    register::run(&mut bundle, tools, options.atlas.as_deref(), options.repeat)?;
    mask::run(&mut bundle, tools, options)?;
    if options.bias {
        bias::run(&mut bundle, tools, options.repeat)?;
    }
    let stack = if options.stack {
        stack::run(&bundle, options.repeat)?
    } else {
        None
    };
    write_record(&bundle, options.repeat)?;

    Ok(CaseSummary {
        bundle,
        stack,
        elapsed: started.elapsed(),
    })
}

/// Counts from a batch run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub completed: usize,
    pub failed: Vec<PathBuf>,
}

/// Processes cases one after another
///
/// A case that errors or panics is logged, followed by a countdown of
/// `cooldown_secs` seconds, and the batch moves on to the next case.
/// `on_complete` sees every successful case.
pub fn run_batch(
    cases: &[PathBuf],
    tools: &dyn ExternalTools,
    options: &PipelineOptions,
    cooldown_secs: u64,
    mut on_complete: impl FnMut(&CaseSummary),
) -> BatchReport {
    let mut report = BatchReport::default();
    for (i, case) in cases.iter().enumerate() {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| process_case(case, tools, options)));
        let message = match outcome {
            Ok(Ok(summary)) => {
                info!(
                    "COMPLETED # {} of {} in {:.2} minute(s)",
                    i + 1,
                    cases.len(),
                    summary.elapsed.as_secs_f64() / 60.0
                );
                on_complete(&summary);
                report.completed += 1;
                continue;
            }
            Ok(Err(e)) => e.to_string(),
            Err(payload) => panic_message(payload.as_ref()),
        };
        error!(
            "Encountered an error while processing directory {}",
            case.display()
        );
        error!("{}", message);
        report.failed.push(case.clone());
        countdown(cooldown_secs);
    }
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn countdown(seconds: u64) {
    for s in (1..=seconds).rev() {
        info!("Processing will continue in {} seconds...", s);
        std::thread::sleep(Duration::from_secs(1));
    }
}

/// Study directories `<data>/*/*`, ordered by case number
pub fn discover_cases(data_dir: &Path) -> Vec<PathBuf> {
    let mut cases: Vec<PathBuf> = WalkDir::new(data_dir)
        .min_depth(2)
        .max_depth(2)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect();
    sort_by_case(&mut cases, |p| p.parent().and_then(case_number));
    cases
}

/// Numeric value of a directory name
pub fn case_number(dir: &Path) -> Option<u64> {
    dir.file_name()?.to_str()?.parse().ok()
}

/// Sorts by case number; unnumbered paths go last, by name
pub fn sort_by_case(paths: &mut [PathBuf], number: impl Fn(&Path) -> Option<u64>) {
    paths.sort_by_cached_key(|p| {
        let n = number(p.as_path());
        (n.is_none(), n, p.clone())
    });
}

/// `items[start..end]`, clamped to the list
pub fn select_range<T>(items: Vec<T>, start: usize, end: Option<usize>) -> Vec<T> {
    let end = end.unwrap_or(items.len()).min(items.len());
    items
        .into_iter()
        .take(end)
        .skip(start)
        .collect()
}

/// `--list` lines: `000: <case dir>`
pub fn listing(cases: &[PathBuf]) -> Vec<String> {
    cases
        .iter()
        .enumerate()
        .map(|(i, case)| {
            let dir = case.parent().unwrap_or(case);
            format!("{:03}: {}", i, dir.display())
        })
        .collect()
}
