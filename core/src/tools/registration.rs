use crate::types::GeometricMode;
use std::path::Path;

/// Units of the smoothing sigmas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigmaUnit {
    Voxel,
    Millimetre,
}

impl SigmaUnit {
    fn suffix(&self) -> &'static str {
        match self {
            SigmaUnit::Voxel => "vox",
            SigmaUnit::Millimetre => "mm",
        }
    }
}

/// One stage of a registration run
#[derive(Debug, Clone, PartialEq)]
pub struct RegStage {
    /// Transform name with its parameters, e.g. `Rigid[0.1]`
    pub transform: &'static str,
    pub iterations: &'static [u32],
    pub convergence_threshold: &'static str,
    pub convergence_window: u32,
    pub shrink_factors: &'static [u32],
    pub smoothing_sigmas: &'static [u32],
    pub sigma_unit: SigmaUnit,

    /// Regular sampling percentage; `None` samples every voxel
    pub sampling: Option<f64>,
}

impl RegStage {
    fn args(&self, fixed: &Path, moving: &Path) -> Vec<String> {
        let sampling = match self.sampling {
            Some(pct) => format!(",Regular,{}", pct),
            None => String::new(),
        };
        vec![
            "--transform".to_string(),
            self.transform.to_string(),
            "--metric".to_string(),
            format!(
                "Mattes[{},{},1,32{}]",
                fixed.display(),
                moving.display(),
                sampling
            ),
            "--convergence".to_string(),
            format!(
                "[{},{},{}]",
                join_x(self.iterations),
                self.convergence_threshold,
                self.convergence_window
            ),
            "--smoothing-sigmas".to_string(),
            format!("{}{}", join_x(self.smoothing_sigmas), self.sigma_unit.suffix()),
            "--shrink-factors".to_string(),
            join_x(self.shrink_factors),
            "--use-histogram-matching".to_string(),
            "1".to_string(),
        ]
    }
}

fn join_x(values: &[u32]) -> String {
    values
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join("x")
}

const TRANSLATION: [RegStage; 1] = [RegStage {
    transform: "Translation[0.1]",
    iterations: &[1000, 500, 250, 50],
    convergence_threshold: "1e-07",
    convergence_window: 10,
    shrink_factors: &[4, 3, 2, 1],
    smoothing_sigmas: &[6, 4, 1, 0],
    sigma_unit: SigmaUnit::Voxel,
    sampling: Some(0.25),
}];

const RIGID: [RegStage; 1] = [RegStage {
    transform: "Rigid[0.1]",
    iterations: &[1000, 500, 250, 50],
    convergence_threshold: "1e-07",
    convergence_window: 10,
    shrink_factors: &[4, 3, 2, 1],
    smoothing_sigmas: &[6, 4, 1, 0],
    sigma_unit: SigmaUnit::Voxel,
    sampling: Some(0.25),
}];

const AFFINE: [RegStage; 2] = [
    RegStage {
        transform: "Rigid[0.1]",
        iterations: &[1000, 1000, 1000, 1000],
        convergence_threshold: "1e-07",
        convergence_window: 10,
        shrink_factors: &[4, 3, 2, 1],
        smoothing_sigmas: &[6, 4, 1, 0],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: Some(0.25),
    },
    RegStage {
        transform: "Affine[0.1]",
        iterations: &[1000, 1000, 1000, 1000],
        convergence_threshold: "1e-07",
        convergence_window: 10,
        shrink_factors: &[4, 3, 2, 1],
        smoothing_sigmas: &[6, 4, 1, 0],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: Some(0.25),
    },
];

const FAST_AFFINE: [RegStage; 2] = [
    RegStage {
        transform: "Rigid[0.1]",
        iterations: &[1000, 1000, 1000],
        convergence_threshold: "1e-04",
        convergence_window: 5,
        shrink_factors: &[6, 4, 2],
        smoothing_sigmas: &[6, 4, 1],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: Some(0.25),
    },
    RegStage {
        transform: "Affine[0.1]",
        iterations: &[1000, 1000, 1000],
        convergence_threshold: "1e-04",
        convergence_window: 5,
        shrink_factors: &[6, 4, 2],
        smoothing_sigmas: &[6, 4, 1],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: Some(0.25),
    },
];

const DIFFEO: [RegStage; 3] = [
    RegStage {
        transform: "Rigid[0.1]",
        iterations: &[1000, 1000, 1000, 1000],
        convergence_threshold: "1e-07",
        convergence_window: 5,
        shrink_factors: &[4, 3, 2, 1],
        smoothing_sigmas: &[6, 4, 1, 0],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: Some(0.25),
    },
    RegStage {
        transform: "Affine[0.1]",
        iterations: &[1000, 1000, 1000, 1000],
        convergence_threshold: "1e-07",
        convergence_window: 5,
        shrink_factors: &[8, 4, 2, 1],
        smoothing_sigmas: &[4, 2, 1, 0],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: Some(0.25),
    },
    RegStage {
        transform: "SyN[0.1,3.0,0.0]",
        iterations: &[250, 100, 50],
        convergence_threshold: "1e-07",
        convergence_window: 5,
        shrink_factors: &[4, 2, 1],
        smoothing_sigmas: &[2, 1, 0],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: None,
    },
];

const FAST_DIFFEO: [RegStage; 2] = [
    RegStage {
        transform: "Affine[0.1]",
        iterations: &[1000, 500, 250],
        convergence_threshold: "1e-05",
        convergence_window: 5,
        shrink_factors: &[6, 4, 2],
        smoothing_sigmas: &[4, 2, 1],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: Some(0.25),
    },
    RegStage {
        transform: "SyN[0.1,3.0,0.0]",
        iterations: &[50, 50],
        convergence_threshold: "1e-05",
        convergence_window: 5,
        shrink_factors: &[4, 2],
        smoothing_sigmas: &[2, 1],
        sigma_unit: SigmaUnit::Millimetre,
        sampling: None,
    },
];

/// Complete parameter bundle for one registration run
///
/// Every mode uses the Mattes metric (weight 1, 32 bins), histogram matching,
/// winsorized intensities, float precision and a single composite output.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationParams {
    pub mode: GeometricMode,
    pub stages: Vec<RegStage>,

    /// Initial moving transform: 0 geometric centre, 1 centre of mass, 2 origin
    pub initial_moving: u8,
}

impl RegistrationParams {
    pub fn for_mode(mode: GeometricMode, initial_moving: u8) -> Self {
        let stages: &[RegStage] = match mode {
            GeometricMode::Translation => &TRANSLATION,
            GeometricMode::Rigid => &RIGID,
            GeometricMode::Affine => &AFFINE,
            GeometricMode::FastAffine => &FAST_AFFINE,
            GeometricMode::Diffeo => &DIFFEO,
            GeometricMode::FastDiffeo => &FAST_DIFFEO,
        };
        Self {
            mode,
            stages: stages.to_vec(),
            initial_moving,
        }
    }

    /// Command-line arguments for the registration engine
    ///
    /// The engine writes `<prefix>Composite.h5`.
    pub fn to_args(&self, fixed: &Path, moving: &Path, prefix: &Path) -> Vec<String> {
        let mut args = vec![
            "--float".to_string(),
            "--dimensionality".to_string(),
            "3".to_string(),
            "--collapse-output-transforms".to_string(),
            "1".to_string(),
            "--initial-moving-transform".to_string(),
            format!(
                "[{},{},{}]",
                fixed.display(),
                moving.display(),
                self.initial_moving
            ),
        ];
        for stage in &self.stages {
            args.extend(stage.args(fixed, moving));
        }
        args.extend([
            "--winsorize-image-intensities".to_string(),
            "[0.005,0.995]".to_string(),
            "--write-composite-transform".to_string(),
            "1".to_string(),
            "--output".to_string(),
            prefix.display().to_string(),
        ]);
        args
    }
}
