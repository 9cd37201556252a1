use std::fmt;

/// DICOM ImageType field decomposed into its components
///
/// - `pixels`: First element (e.g., "ORIGINAL", "DERIVED")
/// - `exam`: Second element (e.g., "PRIMARY", "SECONDARY")
/// - `extras`: Everything after the first two (e.g., "M", "ND", "REFORMATTED")
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ImageType {
    pub pixels: String,
    pub exam: String,
    pub extras: Vec<String>,
}

impl ImageType {
    /// Builds an ImageType from the raw backslash-separated values
    pub fn from_values<S: AsRef<str>>(values: &[S]) -> Self {
        let mut iter = values.iter().map(|v| v.as_ref().trim().to_string());
        Self {
            pixels: iter.next().unwrap_or_default(),
            exam: iter.next().unwrap_or_default(),
            extras: iter.collect(),
        }
    }

    /// Checks if the image type contains a specific value
    pub fn contains(&self, val: &str) -> bool {
        self.pixels == val || self.exam == val || self.extras.iter().any(|x| x == val)
    }

    /// Multiplanar reformats are flagged by the scanner with REFORMATTED
    pub fn is_reformatted(&self) -> bool {
        self.contains("REFORMATTED")
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = vec![self.pixels.as_str(), self.exam.as_str()];
        parts.extend(self.extras.iter().map(String::as_str));
        write!(f, "{}", parts.join("\\"))
    }
}
