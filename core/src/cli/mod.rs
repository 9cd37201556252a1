pub mod report;

use crate::adc::{processed_dirs, AdcOptions};
use crate::config::{PipelineOptions, ToolPaths};
use crate::error::{PrepError, Result};
use crate::pipeline::select_range;
use clap::Parser;
use std::path::{Path, PathBuf};

/// Role configuration, relative to the support directory
pub const ROLE_CONFIG_FILE: &str = "param_files/breast_regex.json";

/// Mask model parameter files, relative to the support directory
pub const MASK_MODEL_DIR: &str = "mask_models";

/// Support directory looked up next to the executable
pub const DEFAULT_SUPPORT_DIR: &str = "support_files";

/// Command-line arguments for breastprep
#[derive(Parser, Debug)]
#[command(name = "breastprep")]
#[command(about = "Breast MRI preprocessing: DICOM conversion, registration, masking and normalization")]
#[command(version)]
pub struct Cli {
    /// Data directory laid out as <data>/<accession>/<study>
    #[arg(short, long, value_name = "DIR")]
    pub dcm_dir: PathBuf,

    /// Support directory with param_files/breast_regex.json
    #[arg(short = 'f', long, value_name = "DIR")]
    pub support_dir: Option<PathBuf>,

    /// Atlas volume for roles registered to "atlas"
    #[arg(short, long, value_name = "FILE")]
    pub atlas: Option<PathBuf>,

    /// Index of the first case to process
    #[arg(short, long, default_value_t = 0)]
    pub start: usize,

    /// Index one past the last case to process
    #[arg(short, long)]
    pub end: Option<usize>,

    /// Repeat work whose outputs already exist
    #[arg(short, long)]
    pub redo: bool,

    /// List cases and exit
    #[arg(short, long)]
    pub list: bool,

    /// Run mask inference on the CPU
    #[arg(long)]
    pub force_cpu: bool,

    /// Role the breast mask is predicted from
    #[arg(long, default_value = "T1")]
    pub mask_role: String,

    /// Probability threshold of the combined mask
    #[arg(long, default_value_t = 0.5)]
    pub mask_threshold: f32,

    /// Skip truncation, bias correction and normalization
    #[arg(long)]
    pub no_bias: bool,

    /// Skip the 4D review volume
    #[arg(long)]
    pub no_stack: bool,

    /// DICOM to NIfTI converter
    #[arg(long, value_name = "FILE")]
    pub dcm2niix: Option<PathBuf>,

    /// Directory holding the ANTs executables
    #[arg(long, value_name = "DIR")]
    pub ants_dir: Option<PathBuf>,

    /// Mask inference command
    #[arg(long, value_name = "FILE")]
    pub mask_predictor: Option<PathBuf>,

    /// Mask model parameter file (repeatable); defaults to <support>/mask_models/*.json
    #[arg(long = "mask-model", value_name = "FILE")]
    pub mask_models: Vec<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Explicit support directory, else `support_files` next to the executable
    pub fn resolve_support_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = self.support_dir.as_ref().filter(|d| d.is_dir()) {
            return Ok(dir.clone());
        }
        let beside_exe = std::env::current_exe()?
            .parent()
            .map(|p| p.join(DEFAULT_SUPPORT_DIR))
            .filter(|p| p.is_dir());
        beside_exe.ok_or_else(|| {
            PrepError::config("no support dir given with --support-dir and none found next to the executable")
        })
    }

    pub fn tool_paths(&self, support_dir: &Path) -> Result<ToolPaths> {
        let mut paths = ToolPaths::default();
        if let Some(dcm2niix) = &self.dcm2niix {
            paths = paths.with_dcm2niix(dcm2niix);
        }
        if let Some(dir) = &self.ants_dir {
            paths = paths.with_ants_dir(dir);
        }
        if let Some(predictor) = &self.mask_predictor {
            paths = paths.with_mask_predictor(predictor);
        }
        let models = if self.mask_models.is_empty() {
            find_mask_models(&support_dir.join(MASK_MODEL_DIR))?
        } else {
            self.mask_models.clone()
        };
        for model in models {
            paths = paths.with_mask_model(model);
        }
        Ok(paths)
    }

    /// Pipeline options; the role configuration must exist in the support directory
    pub fn pipeline_options(&self, support_dir: &Path) -> Result<PipelineOptions> {
        let role_config = support_dir.join(ROLE_CONFIG_FILE);
        if !role_config.is_file() {
            return Err(PrepError::config(format!(
                "Required support file not found at {}",
                role_config.display()
            )));
        }
        let mut options = PipelineOptions::new(role_config)
            .repeat(self.redo)
            .force_cpu(self.force_cpu)
            .mask_role(self.mask_role.clone())
            .mask_threshold(self.mask_threshold)
            .bias(!self.no_bias)
            .stack(!self.no_stack);
        if let Some(atlas) = &self.atlas {
            if !atlas.is_file() {
                return Err(PrepError::MissingInput(atlas.clone()));
            }
            options = options.atlas(atlas);
        }
        Ok(options)
    }
}

/// `*.json` files in `dir`, sorted; none when the directory is absent
fn find_mask_models(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut models: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    models.sort();
    Ok(models)
}

/// Command-line arguments for makeadc
#[derive(Parser, Debug)]
#[command(name = "makeadc")]
#[command(about = "Compute ADC maps from the DWI series of processed breast MRI cases")]
#[command(version)]
pub struct MakeAdcCli {
    /// Directory of processed cases, one directory per case
    #[arg(short, long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    /// Process only this case directory
    #[arg(short = 'c', long, value_name = "DIR")]
    pub direc: Option<PathBuf>,

    /// Index of the first directory to process
    #[arg(short, long, default_value_t = 0)]
    pub start: usize,

    /// Index of the last directory to process (inclusive)
    #[arg(short, long)]
    pub end: Option<usize>,

    /// List directories and exit
    #[arg(short, long)]
    pub list: bool,

    /// Overwrite existing ADC maps
    #[arg(short = 'x', long)]
    pub overwrite: bool,

    /// Keep the converted DWI and its b-tables
    #[arg(short, long)]
    pub intermediates: bool,

    /// DICOM to NIfTI converter
    #[arg(long, value_name = "FILE", default_value = "dcm2niix")]
    pub dcm2niix: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl MakeAdcCli {
    /// Directories to work on: `--direc` alone, else the selected range of `--data-dir`
    pub fn directories(&self) -> Result<Vec<PathBuf>> {
        if let Some(direc) = &self.direc {
            if !direc.is_dir() {
                return Err(PrepError::MissingInput(direc.clone()));
            }
            return Ok(vec![direc.clone()]);
        }
        let data_dir = self
            .data_dir
            .as_ref()
            .ok_or_else(|| PrepError::config("Must specify data directory using --data-dir"))?;
        let dirs = processed_dirs(data_dir)?;
        Ok(select_range(dirs, self.start, self.end.map(|e| e + 1)))
    }

    pub fn adc_options(&self) -> AdcOptions {
        AdcOptions {
            overwrite: self.overwrite,
            intermediates: self.intermediates,
        }
    }
}

/// Initializes `env_logger` at info level, or debug when verbose
pub fn setup_logging(verbose: bool) {
    if verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn support_dir() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let params = temp_dir.path().join("param_files");
        std::fs::create_dir_all(&params).unwrap();
        std::fs::write(params.join("breast_regex.json"), "{}").unwrap();
        let models = temp_dir.path().join(MASK_MODEL_DIR);
        std::fs::create_dir_all(&models).unwrap();
        for name in ["b.json", "a.json", "notes.txt"] {
            std::fs::write(models.join(name), "{}").unwrap();
        }
        temp_dir
    }

    #[test]
    fn test_breastprep_args() {
        let support = support_dir();
        let cli = Cli::try_parse_from([
            "breastprep",
            "--dcm-dir",
            "/data",
            "--support-dir",
            support.path().to_str().unwrap(),
            "-s",
            "2",
            "-e",
            "5",
            "--redo",
            "--no-stack",
            "--ants-dir",
            "/opt/ants/bin",
        ])
        .unwrap();
        assert_eq!(cli.start, 2);
        assert_eq!(cli.end, Some(5));

        let support_dir = cli.resolve_support_dir().unwrap();
        let options = cli.pipeline_options(&support_dir).unwrap();
        assert!(options.repeat);
        assert!(options.bias);
        assert!(!options.stack);
        assert_eq!(options.mask_role, "T1");
        assert_eq!(options.role_config, support.path().join(ROLE_CONFIG_FILE));

        let paths = cli.tool_paths(&support_dir).unwrap();
        assert_eq!(
            paths.ants_registration,
            PathBuf::from("/opt/ants/bin/antsRegistration")
        );
        let models: Vec<_> = paths
            .mask_models
            .iter()
            .map(|m| m.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(models, vec!["a.json", "b.json"]);
    }

    #[test]
    fn test_missing_role_config() {
        let empty = TempDir::new().unwrap();
        let cli = Cli::try_parse_from(["breastprep", "-d", "/data"]).unwrap();
        let err = cli.pipeline_options(empty.path()).unwrap_err();
        assert!(err.to_string().contains("breast_regex.json"));
    }

    #[test]
    fn test_makeadc_inclusive_end() {
        let temp_dir = TempDir::new().unwrap();
        for id in ["1", "2", "10", "11"] {
            std::fs::create_dir_all(temp_dir.path().join(id)).unwrap();
        }
        let cli = MakeAdcCli::try_parse_from([
            "makeadc",
            "--data-dir",
            temp_dir.path().to_str().unwrap(),
            "-s",
            "1",
            "-e",
            "2",
            "-x",
        ])
        .unwrap();
        assert_eq!(
            cli.directories().unwrap(),
            vec![temp_dir.path().join("2"), temp_dir.path().join("10")]
        );
        assert!(cli.adc_options().overwrite);
        assert!(!cli.adc_options().intermediates);
    }

    #[test]
    fn test_makeadc_requires_a_directory() {
        let cli = MakeAdcCli::try_parse_from(["makeadc"]).unwrap();
        assert!(cli.directories().unwrap_err().is_fatal());

        let cli = MakeAdcCli::try_parse_from(["makeadc", "--direc", "/no/such/case"]).unwrap();
        assert!(matches!(
            cli.directories(),
            Err(PrepError::MissingInput(_))
        ));
    }
}
