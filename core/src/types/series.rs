use super::ImageType;
use std::path::PathBuf;

/// Representative header of one DICOM series
///
/// Every field is optional: scanners routinely omit any of them, and the
/// catalog and matcher treat an absent field as "unknown" rather than an error.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct SeriesHeader {
    /// SeriesDescription (0008,103E)
    pub description: Option<String>,

    /// ContrastBolusAgent (0018,0010)
    pub contrast_agent: Option<String>,

    /// ImageType (0008,0008)
    pub image_type: Option<ImageType>,

    /// SliceThickness (0018,0050)
    pub slice_thickness: Option<f64>,

    /// AcquisitionMatrix (0018,1310)
    pub acquisition_matrix: Option<Vec<u16>>,

    pub rows: Option<u16>,
    pub columns: Option<u16>,

    /// ImagesInAcquisition (0020,1002)
    pub images_in_acquisition: Option<i32>,

    /// AcquisitionTime (0008,0032), kept as the raw TM string
    pub acquisition_time: Option<String>,
}

impl SeriesHeader {
    /// Whether a contrast agent was actually given
    ///
    /// The ContrastBolusAgent field is often present but filled with a
    /// placeholder such as "No", "None" or "OFF".
    pub fn has_contrast(&self) -> bool {
        match &self.contrast_agent {
            Some(agent) => {
                let normalized: String = agent
                    .to_lowercase()
                    .chars()
                    .filter(|c| *c != ' ')
                    .collect();
                !matches!(normalized.as_str(), "" | "no" | "none" | "off")
            }
            None => false,
        }
    }

    /// Whether ImageType marks this series as a reformat
    pub fn is_reformatted(&self) -> bool {
        self.image_type
            .as_ref()
            .is_some_and(|image_type| image_type.is_reformatted())
    }

    /// Acquisition time as a number, if it parses as one
    pub fn acquisition_time_value(&self) -> Option<f64> {
        self.acquisition_time
            .as_deref()
            .and_then(|t| t.trim().parse::<f64>().ok())
    }
}

/// One cataloged DICOM acquisition
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Position in the catalog
    pub index: usize,

    /// Directory holding the series' files
    pub directory: PathBuf,

    /// Sorted file paths of the series
    pub files: Vec<PathBuf>,

    /// Header of the representative (first) file
    pub header: SeriesHeader,

    /// Display label used for matching, e.g. `AX T1 POST FS postcon [dir=00012]`
    pub label: String,
}

impl Series {
    /// Number of images in the acquisition, if reported
    pub fn image_count(&self) -> Option<i32> {
        self.header.images_in_acquisition
    }
}
