use std::path::PathBuf;
use thiserror::Error;

/// Result type for breastprep operations
pub type Result<T> = std::result::Result<T, PrepError>;

/// Error types for breastprep operations
#[derive(Error, Debug)]
pub enum PrepError {
    /// DICOM reading error
    #[error("DICOM error: {0}")]
    DicomError(String),

    /// NIfTI reading or writing error
    #[error("NIfTI error: {0}")]
    NiftiError(#[from] nifti::NiftiError),

    /// Malformed or missing role configuration. Fatal for the case.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid pattern in a role's match criteria
    #[error("Invalid pattern: {0}")]
    PatternError(#[from] regex::Error),

    /// External tool exited unsuccessfully or could not be started
    #[error("{tool} failed: {detail}")]
    ToolError { tool: String, detail: String },

    /// A required input file is absent
    #[error("Missing input: {}", .0.display())]
    MissingInput(PathBuf),

    /// Volumes with incompatible shapes
    #[error("Shape error: {0}")]
    ShapeError(String),

    /// Case record could not be written or read back
    #[error("Record error: {0}")]
    RecordError(String),

    /// I/O error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl PrepError {
    /// Builds a configuration error from anything printable
    pub fn config(msg: impl Into<String>) -> Self {
        PrepError::ConfigError(msg.into())
    }

    /// Builds an external tool error
    pub fn tool(tool: impl Into<String>, detail: impl Into<String>) -> Self {
        PrepError::ToolError {
            tool: tool.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error must abort the whole case
    pub fn is_fatal(&self) -> bool {
        matches!(self, PrepError::ConfigError(_) | PrepError::PatternError(_))
    }
}

// Convert dicom-object errors
impl From<dicom_object::ReadError> for PrepError {
    fn from(e: dicom_object::ReadError) -> Self {
        PrepError::DicomError(format!("{}", e))
    }
}

impl From<serde_json::Error> for PrepError {
    fn from(e: serde_json::Error) -> Self {
        PrepError::RecordError(format!("{}", e))
    }
}

impl From<bincode::Error> for PrepError {
    fn from(e: bincode::Error) -> Self {
        PrepError::RecordError(format!("{}", e))
    }
}

impl From<ndarray::ShapeError> for PrepError {
    fn from(e: ndarray::ShapeError) -> Self {
        PrepError::ShapeError(format!("{}", e))
    }
}
