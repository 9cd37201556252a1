//! Fixtures shared by the unit tests: synthetic MR DICOM files and NIfTI volumes

use crate::extraction::tags::{
    ACQUISITION_MATRIX, ACQUISITION_TIME, COLUMNS, CONTRAST_BOLUS_AGENT, IMAGES_IN_ACQUISITION,
    IMAGE_TYPE, MODALITY, ROWS, SERIES_DESCRIPTION, SLICE_THICKNESS, SOP_CLASS_UID,
    SOP_INSTANCE_UID,
};
use crate::volume::Volume;
use dicom_core::{DataElement, PrimitiveValue, VR};
use dicom_dictionary_std::uids::MR_IMAGE_STORAGE;
use dicom_object::{FileMetaTableBuilder, InMemDicomObject};
use ndarray::{ArrayD, IxDyn};
use std::path::{Path, PathBuf};

/// Header fields of a synthetic MR image
#[derive(Debug, Clone, Default)]
pub struct MrFixture<'a> {
    pub description: Option<&'a str>,
    pub contrast: Option<&'a str>,
    pub image_type: Vec<&'a str>,
    pub slice_thickness: Option<&'a str>,
    pub acquisition_matrix: Option<Vec<u16>>,
    pub rows: Option<u16>,
    pub columns: Option<u16>,
    pub images: Option<i32>,
    pub acquisition_time: Option<&'a str>,
}

impl<'a> MrFixture<'a> {
    pub fn described(description: &'a str) -> Self {
        Self {
            description: Some(description),
            ..Default::default()
        }
    }
}

pub fn mr_object(fixture: &MrFixture) -> InMemDicomObject {
    let mut dcm = InMemDicomObject::new_empty();
    dcm.put(DataElement::new(MODALITY, VR::CS, PrimitiveValue::from("MR")));
    if let Some(desc) = fixture.description {
        dcm.put(DataElement::new(SERIES_DESCRIPTION, VR::LO, PrimitiveValue::from(desc)));
    }
    if let Some(agent) = fixture.contrast {
        dcm.put(DataElement::new(CONTRAST_BOLUS_AGENT, VR::LO, PrimitiveValue::from(agent)));
    }
    if !fixture.image_type.is_empty() {
        let values: Vec<String> = fixture.image_type.iter().map(|s| s.to_string()).collect();
        dcm.put(DataElement::new(IMAGE_TYPE, VR::CS, PrimitiveValue::Strs(values.into())));
    }
    if let Some(thickness) = fixture.slice_thickness {
        dcm.put(DataElement::new(SLICE_THICKNESS, VR::DS, PrimitiveValue::from(thickness)));
    }
    if let Some(matrix) = &fixture.acquisition_matrix {
        dcm.put(DataElement::new(
            ACQUISITION_MATRIX,
            VR::US,
            PrimitiveValue::U16(matrix.clone().into()),
        ));
    }
    if let Some(rows) = fixture.rows {
        dcm.put(DataElement::new(ROWS, VR::US, PrimitiveValue::from(rows)));
    }
    if let Some(columns) = fixture.columns {
        dcm.put(DataElement::new(COLUMNS, VR::US, PrimitiveValue::from(columns)));
    }
    if let Some(images) = fixture.images {
        dcm.put(DataElement::new(
            IMAGES_IN_ACQUISITION,
            VR::IS,
            PrimitiveValue::from(images.to_string()),
        ));
    }
    if let Some(time) = fixture.acquisition_time {
        dcm.put(DataElement::new(ACQUISITION_TIME, VR::TM, PrimitiveValue::from(time)));
    }
    dcm
}

/// Writes one DICOM file with a preamble and file meta group
pub fn write_mr_file(path: &Path, fixture: &MrFixture, instance: u32) {
    let mut dcm = mr_object(fixture);
    dcm.put(DataElement::new(
        SOP_CLASS_UID,
        VR::UI,
        PrimitiveValue::from(MR_IMAGE_STORAGE),
    ));
    dcm.put(DataElement::new(
        SOP_INSTANCE_UID,
        VR::UI,
        PrimitiveValue::from(format!("1.2.826.0.1.3680043.2.1143.{}", instance)),
    ));
    let file = dcm
        .with_meta(FileMetaTableBuilder::new().transfer_syntax("1.2.840.10008.1.2.1"))
        .unwrap();
    file.write_to_file(path).unwrap();
}

/// Writes `count` images of one series into `dir`
pub fn write_mr_series(dir: &Path, fixture: &MrFixture, count: u32) -> Vec<PathBuf> {
    std::fs::create_dir_all(dir).unwrap();
    (1..=count)
        .map(|i| {
            let path = dir.join(format!("IM{:04}.dcm", i));
            write_mr_file(&path, fixture, i);
            path
        })
        .collect()
}

/// Volume of the given shape filled by `f(flat_index)`
pub fn volume_from_fn(shape: &[usize], f: impl Fn(usize) -> f32) -> Volume {
    let n: usize = shape.iter().product();
    let data = ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(f).collect()).unwrap();
    Volume::from_array(data)
}

/// Writes a constant-valued volume and returns its path
pub fn write_constant(path: &Path, shape: &[usize], value: f32) -> PathBuf {
    volume_from_fn(shape, |_| value).save(path).unwrap();
    path.to_path_buf()
}
