//! NIfTI volume I/O and voxel-level operations
//!
//! Volumes are held as `f32` arrays with their header. Writes go through
//! [`Volume::save`], which keeps the source geometry (affine, voxel sizes) and
//! lets the writer derive dimensions from the array.

pub mod ops;

use crate::error::{PrepError, Result};
use ndarray::{ArrayD, Axis};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

pub use ops::{
    apply_mask, combine_probabilities, largest_component, normalize_nonzero, percentile_bounds,
    stack_volumes, truncate_intensities,
};

/// A NIfTI image loaded into memory
#[derive(Debug, Clone)]
pub struct Volume {
    header: NiftiHeader,
    data: ArrayD<f32>,
}

impl Volume {
    /// Reads a `.nii` or `.nii.gz` file
    pub fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(PrepError::MissingInput(path.to_path_buf()));
        }
        let obj = ReaderOptions::new().read_file(path)?;
        let header = obj.header().clone();
        let data = obj.into_volume().into_ndarray::<f32>()?;
        Ok(Self { header, data })
    }

    /// Wraps an array with a default header (unit voxels, identity geometry)
    pub fn from_array(data: ArrayD<f32>) -> Self {
        Self {
            header: NiftiHeader::default(),
            data,
        }
    }

    /// New volume sharing this volume's geometry
    pub fn with_data(&self, data: ArrayD<f32>) -> Self {
        Self {
            header: self.header.clone(),
            data,
        }
    }

    /// Writes the volume; gzip compression follows the `.gz` extension
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut header = self.header.clone();
        // data is already scaled on read
        header.scl_slope = 1.0;
        header.scl_inter = 0.0;
        WriterOptions::new(path)
            .reference_header(&header)
            .write_nifti(&self.data)?;
        Ok(())
    }

    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    pub fn into_data(self) -> ArrayD<f32> {
        self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of phases along the 4th axis (1 for 3D volumes)
    pub fn phase_count(&self) -> usize {
        if self.data.ndim() >= 4 {
            self.data.shape()[3]
        } else {
            1
        }
    }

    /// Whether this is a 4D volume with at least two phases
    pub fn is_multiphase(&self) -> bool {
        self.data.ndim() >= 4 && self.phase_count() >= 2
    }

    /// Extracts one 3D phase of a 4D volume
    pub fn phase(&self, index: usize) -> Result<Volume> {
        self.check_phase(index)?;
        let data = self.data.index_axis(Axis(3), index).to_owned();
        Ok(self.with_data(data))
    }

    /// Voxelwise mean over the given phases
    pub fn mean_of_phases(&self, indices: &[usize]) -> Result<Volume> {
        if indices.is_empty() {
            return Err(PrepError::ShapeError(
                "cannot average an empty phase list".to_string(),
            ));
        }
        let mut sum = self.phase(indices[0])?.into_data();
        for &i in &indices[1..] {
            self.check_phase(i)?;
            sum += &self.data.index_axis(Axis(3), i);
        }
        sum.mapv_inplace(|v| v / indices.len() as f32);
        Ok(self.with_data(sum))
    }

    /// Mean of every voxel
    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&v| v as f64).sum::<f64>() / self.data.len() as f64
    }

    /// Mean intensity of each phase
    pub fn phase_means(&self) -> Vec<f64> {
        if self.data.ndim() < 4 {
            return vec![self.mean()];
        }
        self.data
            .axis_iter(Axis(3))
            .map(|phase| {
                let n = phase.len().max(1) as f64;
                phase.iter().map(|&v| v as f64).sum::<f64>() / n
            })
            .collect()
    }

    /// Concatenates the phases of `other` after this volume's phases
    pub fn concat_phases(&self, other: &Volume) -> Result<Volume> {
        let a = self.as_4d()?;
        let b = other.as_4d()?;
        let data = ndarray::concatenate(Axis(3), &[a.view(), b.view()])?;
        Ok(self.with_data(data))
    }

    /// Replaces phases `0..count` with their mean, keeping the rest
    pub fn average_leading_phases(&self, count: usize) -> Result<Volume> {
        if count < 2 {
            return Ok(self.clone());
        }
        let indices: Vec<usize> = (0..count).collect();
        let mean = self.mean_of_phases(&indices)?.into_data().insert_axis(Axis(3));
        let rest = self.data.slice_axis(Axis(3), (count..).into());
        let data = ndarray::concatenate(Axis(3), &[mean.view(), rest])?;
        Ok(self.with_data(data))
    }

    fn as_4d(&self) -> Result<ArrayD<f32>> {
        match self.data.ndim() {
            3 => Ok(self.data.clone().insert_axis(Axis(3))),
            4 => Ok(self.data.clone()),
            n => Err(PrepError::ShapeError(format!(
                "expected a 3D or 4D volume, got {} dimensions",
                n
            ))),
        }
    }

    fn check_phase(&self, index: usize) -> Result<()> {
        if self.data.ndim() < 4 || index >= self.phase_count() {
            return Err(PrepError::ShapeError(format!(
                "phase {} out of range for shape {:?}",
                index,
                self.shape()
            )));
        }
        Ok(())
    }
}
