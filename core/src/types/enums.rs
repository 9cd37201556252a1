use std::fmt;

/// Geometric registration modes, in the fixed order the orchestrator runs them
///
/// Each mode names a complete parameter bundle for the registration engine
/// (see [`crate::tools::RegistrationParams::for_mode`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometricMode {
    Translation,
    Rigid,
    Affine,
    FastAffine,
    Diffeo,
    FastDiffeo,
}

impl GeometricMode {
    /// Execution priority: a mode's roles all run before the next mode's
    pub const PRIORITY: [GeometricMode; 6] = [
        GeometricMode::Translation,
        GeometricMode::Rigid,
        GeometricMode::Affine,
        GeometricMode::FastAffine,
        GeometricMode::Diffeo,
        GeometricMode::FastDiffeo,
    ];

    /// Returns simple name for display and serialization
    pub fn simple_name(&self) -> &'static str {
        match self {
            GeometricMode::Translation => "translation",
            GeometricMode::Rigid => "rigid",
            GeometricMode::Affine => "affine",
            GeometricMode::FastAffine => "fast_affine",
            GeometricMode::Diffeo => "diffeo",
            GeometricMode::FastDiffeo => "fast_diffeo",
        }
    }

    /// Parses a mode name; `trans` is accepted as shorthand for translation
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trans" | "translation" => Some(GeometricMode::Translation),
            "rigid" => Some(GeometricMode::Rigid),
            "affine" => Some(GeometricMode::Affine),
            "fast_affine" => Some(GeometricMode::FastAffine),
            "diffeo" => Some(GeometricMode::Diffeo),
            "fast_diffeo" => Some(GeometricMode::FastDiffeo),
            _ => None,
        }
    }
}

impl fmt::Display for GeometricMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_name())
    }
}

/// How a role gets into the common space
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RegMode {
    /// Compute a new transform with the given parameter bundle
    Geometric(GeometricMode),

    /// Reuse the transform already computed for the named role
    Borrow(String),
}

impl RegMode {
    /// Parses a registration setting
    ///
    /// Returns `None` for the "no registration" spellings (`none`, empty).
    /// Any name that is not a geometric mode refers to another role.
    pub fn parse(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return None;
        }
        Some(match GeometricMode::parse(trimmed) {
            Some(mode) => RegMode::Geometric(mode),
            None => RegMode::Borrow(trimmed.to_string()),
        })
    }
}

impl fmt::Display for RegMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegMode::Geometric(mode) => write!(f, "{}", mode),
            RegMode::Borrow(role) => write!(f, "{}", role),
        }
    }
}

/// Interpolation kinds understood by the transform-application tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Deserialize)]
pub enum Interpolation {
    #[default]
    Linear,
    NearestNeighbor,
    MultiLabel,
    Gaussian,
    BSpline,
    CosineWindowedSinc,
    WelchWindowedSinc,
    HammingWindowedSinc,
    LanczosWindowedSinc,
    GenericLabel,
}

impl Interpolation {
    /// Name as passed on the command line
    pub fn simple_name(&self) -> &'static str {
        match self {
            Interpolation::Linear => "Linear",
            Interpolation::NearestNeighbor => "NearestNeighbor",
            Interpolation::MultiLabel => "MultiLabel",
            Interpolation::Gaussian => "Gaussian",
            Interpolation::BSpline => "BSpline",
            Interpolation::CosineWindowedSinc => "CosineWindowedSinc",
            Interpolation::WelchWindowedSinc => "WelchWindowedSinc",
            Interpolation::HammingWindowedSinc => "HammingWindowedSinc",
            Interpolation::LanczosWindowedSinc => "LanczosWindowedSinc",
            Interpolation::GenericLabel => "GenericLabel",
        }
    }
}

impl fmt::Display for Interpolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.simple_name())
    }
}

/// Per-role registration state machine
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegistrationState {
    #[default]
    Unregistered,

    /// No registration requested, or a prerequisite was missing
    Skipped(String),

    Registered,
}

impl RegistrationState {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegistrationState::Registered)
    }
}

impl fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationState::Unregistered => write!(f, "unregistered"),
            RegistrationState::Skipped(reason) => write!(f, "skipped ({})", reason),
            RegistrationState::Registered => write!(f, "registered"),
        }
    }
}
