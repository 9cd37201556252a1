use crate::error::Result;
use crate::extraction::tags::{
    get_f64_value, get_int_value, get_multi_string_value, get_multi_u16_value, get_string_value,
    get_u16_value, ACQUISITION_MATRIX, ACQUISITION_TIME, COLUMNS, CONTRAST_BOLUS_AGENT,
    IMAGES_IN_ACQUISITION, IMAGE_TYPE, PIXEL_DATA, ROWS, SERIES_DESCRIPTION, SLICE_THICKNESS,
};
use crate::types::{ImageType, SeriesHeader};
use dicom_object::{InMemDicomObject, OpenFileOptions};
use std::path::Path;

/// Reads the header of one DICOM file, stopping before the pixel data
pub fn read_series_header(path: &Path) -> Result<SeriesHeader> {
    let dcm = OpenFileOptions::new()
        .read_until(PIXEL_DATA)
        .open_file(path)?;
    Ok(extract_series_header(&dcm))
}

/// Extracts the fields used for cataloging and tie-breaking
///
/// Empty strings are treated the same as absent tags.
pub fn extract_series_header(dcm: &InMemDicomObject) -> SeriesHeader {
    SeriesHeader {
        description: non_empty(get_string_value(dcm, SERIES_DESCRIPTION)),
        contrast_agent: get_string_value(dcm, CONTRAST_BOLUS_AGENT),
        image_type: extract_image_type(dcm),
        slice_thickness: get_f64_value(dcm, SLICE_THICKNESS),
        acquisition_matrix: get_multi_u16_value(dcm, ACQUISITION_MATRIX),
        rows: get_u16_value(dcm, ROWS),
        columns: get_u16_value(dcm, COLUMNS),
        images_in_acquisition: get_int_value(dcm, IMAGES_IN_ACQUISITION),
        acquisition_time: non_empty(get_string_value(dcm, ACQUISITION_TIME)),
    }
}

/// Extracts ImageType, or `None` when the tag is absent
pub fn extract_image_type(dcm: &InMemDicomObject) -> Option<ImageType> {
    get_multi_string_value(dcm, IMAGE_TYPE).map(|values| ImageType::from_values(&values))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mr_object, write_mr_file, MrFixture};
    use tempfile::TempDir;

    #[test]
    fn test_extract_full_header() {
        let fixture = MrFixture {
            description: Some("AX T1 POST FS"),
            contrast: Some("GADAVIST"),
            image_type: vec!["DERIVED", "PRIMARY", "REFORMATTED"],
            slice_thickness: Some("1.2"),
            acquisition_matrix: Some(vec![0, 320, 320, 0]),
            rows: Some(512),
            columns: Some(512),
            images: Some(176),
            acquisition_time: Some("101530.5"),
        };
        let header = extract_series_header(&mr_object(&fixture));

        assert_eq!(header.description.as_deref(), Some("AX T1 POST FS"));
        assert!(header.has_contrast());
        assert!(header.is_reformatted());
        assert_eq!(header.slice_thickness, Some(1.2));
        assert_eq!(header.acquisition_matrix, Some(vec![0, 320, 320, 0]));
        assert_eq!(header.rows, Some(512));
        assert_eq!(header.columns, Some(512));
        assert_eq!(header.images_in_acquisition, Some(176));
        assert_eq!(header.acquisition_time_value(), Some(101530.5));
    }

    #[test]
    fn test_extract_sparse_header() {
        let fixture = MrFixture {
            description: Some(""),
            ..Default::default()
        };
        let header = extract_series_header(&mr_object(&fixture));

        assert_eq!(header.description, None);
        assert_eq!(header.image_type, None);
        assert_eq!(header.images_in_acquisition, None);
        assert!(!header.has_contrast());
    }

    #[test]
    fn test_read_series_header_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("IM0001.dcm");
        let fixture = MrFixture {
            description: Some("SAG STIR"),
            images: Some(40),
            ..Default::default()
        };
        write_mr_file(&path, &fixture, 1);

        let header = read_series_header(&path).unwrap();
        assert_eq!(header.description.as_deref(), Some("SAG STIR"));
        assert_eq!(header.images_in_acquisition, Some(40));
    }

    #[test]
    fn test_read_series_header_not_dicom() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.dcm");
        std::fs::write(&path, b"not a dicom file").unwrap();

        assert!(read_series_header(&path).is_err());
    }
}
