use crate::error::{PrepError, Result};
use ndarray::{ArrayD, Axis, Zip};
use std::collections::VecDeque;

fn check_same_shape(a: &ArrayD<f32>, b: &ArrayD<f32>, what: &str) -> Result<()> {
    if a.shape() != b.shape() {
        return Err(PrepError::ShapeError(format!(
            "{}: shape {:?} does not match {:?}",
            what,
            a.shape(),
            b.shape()
        )));
    }
    Ok(())
}

/// Keeps voxels where `mask > 0`, zeroes everything else
pub fn apply_mask(data: &ArrayD<f32>, mask: &ArrayD<f32>) -> Result<ArrayD<f32>> {
    check_same_shape(data, mask, "mask")?;
    Ok(Zip::from(data)
        .and(mask)
        .map_collect(|&v, &m| if m > 0.0 { v } else { 0.0 }))
}

/// Intensities at the `lo` and `hi` quantiles of the in-mask voxels
///
/// Each bound is the sorted in-mask value at index `round(q * n)`, clamped
/// to the last element. Returns `None` when the mask is empty.
pub fn percentile_bounds(
    data: &ArrayD<f32>,
    mask: &ArrayD<f32>,
    lo: f64,
    hi: f64,
) -> Result<Option<(f32, f32)>> {
    check_same_shape(data, mask, "mask")?;
    let mut values: Vec<f32> = data
        .iter()
        .zip(mask.iter())
        .filter(|(_, &m)| m > 0.0)
        .map(|(&v, _)| v)
        .collect();
    if values.is_empty() {
        return Ok(None);
    }
    values.sort_by(f32::total_cmp);

    let last = values.len() - 1;
    let at = |q: f64| {
        let idx = (q * values.len() as f64).round() as usize;
        values[idx.min(last)]
    };
    Ok(Some((at(lo), at(hi))))
}

/// Clamps intensities to the in-mask `[lo, hi]` quantiles and zeroes outside the mask
pub fn truncate_intensities(
    data: &ArrayD<f32>,
    mask: &ArrayD<f32>,
    lo: f64,
    hi: f64,
) -> Result<ArrayD<f32>> {
    let (lo_val, hi_val) = percentile_bounds(data, mask, lo, hi)?
        .ok_or_else(|| PrepError::ShapeError("mask has no voxels".to_string()))?;
    Ok(Zip::from(data).and(mask).map_collect(|&v, &m| {
        if m > 0.0 {
            v.max(lo_val).min(hi_val)
        } else {
            0.0
        }
    }))
}

/// Zero-mean, unit-variance scaling computed over nonzero voxels only
///
/// Zero voxels stay exactly zero. A constant image maps to all zeros.
pub fn normalize_nonzero(data: &ArrayD<f32>) -> ArrayD<f32> {
    let nonzero: Vec<f64> = data
        .iter()
        .filter(|&&v| v != 0.0)
        .map(|&v| v as f64)
        .collect();
    if nonzero.is_empty() {
        return data.clone();
    }
    let n = nonzero.len() as f64;
    let mean = nonzero.iter().sum::<f64>() / n;
    let var = nonzero.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = var.sqrt();

    data.mapv(|v| {
        if v == 0.0 {
            0.0
        } else if std > 0.0 {
            ((v as f64 - mean) / std) as f32
        } else {
            0.0
        }
    })
}

/// Averages probability maps, thresholds them and keeps the largest component
pub fn combine_probabilities(probs: &[ArrayD<f32>], threshold: f32) -> Result<ArrayD<f32>> {
    let first = probs
        .first()
        .ok_or_else(|| PrepError::ShapeError("no probability maps to combine".to_string()))?;
    let mut sum = first.clone();
    for prob in &probs[1..] {
        check_same_shape(first, prob, "probability map")?;
        sum += prob;
    }
    let count = probs.len() as f32;
    let binary = sum.mapv(|v| if v / count > threshold { 1.0 } else { 0.0 });
    Ok(largest_component(&binary))
}

/// Largest face-connected (6-connected in 3D) component of a binary image
pub fn largest_component(mask: &ArrayD<f32>) -> ArrayD<f32> {
    let shape = mask.shape().to_vec();
    let values: Vec<bool> = mask.iter().map(|&v| v > 0.0).collect();

    // row-major strides of the logical layout
    let mut strides = vec![1usize; shape.len()];
    for k in (0..shape.len().saturating_sub(1)).rev() {
        strides[k] = strides[k + 1] * shape[k + 1];
    }

    let mut labels = vec![0u32; values.len()];
    let mut best_label = 0u32;
    let mut best_size = 0usize;
    let mut next_label = 0u32;
    let mut queue = VecDeque::new();

    for start in 0..values.len() {
        if !values[start] || labels[start] != 0 {
            continue;
        }
        next_label += 1;
        labels[start] = next_label;
        queue.push_back(start);
        let mut size = 0usize;

        while let Some(idx) = queue.pop_front() {
            size += 1;
            for (k, &stride) in strides.iter().enumerate() {
                let coord = (idx / stride) % shape[k];
                if coord > 0 {
                    let n = idx - stride;
                    if values[n] && labels[n] == 0 {
                        labels[n] = next_label;
                        queue.push_back(n);
                    }
                }
                if coord + 1 < shape[k] {
                    let n = idx + stride;
                    if values[n] && labels[n] == 0 {
                        labels[n] = next_label;
                        queue.push_back(n);
                    }
                }
            }
        }

        if size > best_size {
            best_size = size;
            best_label = next_label;
        }
    }

    let out: Vec<f32> = labels
        .iter()
        .map(|&l| if l != 0 && l == best_label { 1.0 } else { 0.0 })
        .collect();
    // same element count and shape as the input
    ArrayD::from_shape_vec(mask.raw_dim(), out).unwrap_or_else(|_| mask.mapv(|_| 0.0))
}

/// Stacks same-shaped 3D volumes along a new 4th axis
pub fn stack_volumes(volumes: &[ArrayD<f32>]) -> Result<ArrayD<f32>> {
    let first = volumes
        .first()
        .ok_or_else(|| PrepError::ShapeError("no volumes to stack".to_string()))?;
    for vol in &volumes[1..] {
        check_same_shape(first, vol, "stacked volume")?;
    }
    let views: Vec<_> = volumes.iter().map(|v| v.view()).collect();
    Ok(ndarray::stack(Axis(first.ndim()), &views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn array(shape: &[usize], values: Vec<f32>) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
    }

    #[test]
    fn test_apply_mask() {
        let data = array(&[2, 2, 1], vec![1.0, 2.0, 3.0, 4.0]);
        let mask = array(&[2, 2, 1], vec![1.0, 0.0, 1.0, 0.0]);
        let out = apply_mask(&data, &mask).unwrap();
        assert_eq!(out.iter().cloned().collect::<Vec<_>>(), vec![1.0, 0.0, 3.0, 0.0]);

        let wrong = array(&[4, 1, 1], vec![1.0; 4]);
        assert!(apply_mask(&data, &wrong).is_err());
    }

    #[test]
    fn test_percentile_bounds_index_rule() {
        // 1000 in-mask values 1..=1000: round(0.001 * 1000) = 1, round(0.999 * 1000) = 999
        let data = array(&[10, 10, 10], (1..=1000).map(|v| v as f32).collect());
        let mask = array(&[10, 10, 10], vec![1.0; 1000]);
        let (lo, hi) = percentile_bounds(&data, &mask, 0.001, 0.999).unwrap().unwrap();
        assert_eq!(lo, 2.0);
        assert_eq!(hi, 1000.0);

        let empty = array(&[10, 10, 10], vec![0.0; 1000]);
        assert!(percentile_bounds(&data, &empty, 0.001, 0.999).unwrap().is_none());
    }

    #[test]
    fn test_truncate_clamps_and_remasks() {
        let data = array(&[1, 1, 4], vec![-5.0, 1.0, 2.0, 100.0]);
        let mask = array(&[1, 1, 4], vec![1.0, 1.0, 1.0, 0.0]);
        // in-mask sorted: [-5, 1, 2]; round(0.34 * 3) = 1, round(0.9 * 3) = 3 -> clamped to 2
        let out = truncate_intensities(&data, &mask, 0.34, 0.9).unwrap();
        assert_eq!(out.iter().cloned().collect::<Vec<_>>(), vec![1.0, 1.0, 2.0, 0.0]);
    }

    #[test]
    fn test_normalize_preserves_zeros() {
        let data = array(&[2, 3, 1], vec![0.0, 2.0, 4.0, 0.0, 6.0, 8.0]);
        let out = normalize_nonzero(&data);
        assert_eq!(out[[0, 0, 0]], 0.0);
        assert_eq!(out[[1, 0, 0]], 0.0);

        let nonzero: Vec<f64> = out.iter().filter(|&&v| v != 0.0).map(|&v| v as f64).collect();
        assert_eq!(nonzero.len(), 4);
        let mean = nonzero.iter().sum::<f64>() / 4.0;
        let std = (nonzero.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 4.0).sqrt();
        assert!(mean.abs() < 1e-6);
        assert!((std - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_constant_image() {
        let data = array(&[2, 1, 1], vec![0.0, 5.0]);
        let out = normalize_nonzero(&data);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_largest_component_six_connectivity() {
        // two blobs: a 3-voxel line and a single voxel touching it only diagonally
        let mut values = vec![0.0; 27];
        values[0] = 1.0; // (0,0,0)
        values[1] = 1.0; // (0,0,1)
        values[2] = 1.0; // (0,0,2)
        values[13] = 1.0; // (1,1,1), diagonal to the line
        let mask = array(&[3, 3, 3], values);
        let out = largest_component(&mask);
        assert_eq!(out.sum(), 3.0);
        assert_eq!(out[[1, 1, 1]], 0.0);
        assert_eq!(out[[0, 0, 2]], 1.0);
    }

    #[test]
    fn test_combine_probabilities() {
        let a = array(&[1, 1, 4], vec![0.9, 0.9, 0.2, 0.9]);
        let b = array(&[1, 1, 4], vec![0.8, 0.4, 0.2, 0.1]);
        // mean: [0.85, 0.65, 0.2, 0.5]; > 0.5 -> [1, 1, 0, 0]
        let mask = combine_probabilities(&[a, b], 0.5).unwrap();
        assert_eq!(mask.iter().cloned().collect::<Vec<_>>(), vec![1.0, 1.0, 0.0, 0.0]);
        assert!(combine_probabilities(&[], 0.5).is_err());
    }

    #[test]
    fn test_stack_volumes() {
        let a = array(&[2, 2, 2], vec![1.0; 8]);
        let b = array(&[2, 2, 2], vec![2.0; 8]);
        let stacked = stack_volumes(&[a.clone(), b]).unwrap();
        assert_eq!(stacked.shape(), &[2, 2, 2, 2]);
        assert_eq!(stacked[[1, 1, 1, 1]], 2.0);

        let c = array(&[2, 2, 1], vec![1.0; 4]);
        assert!(stack_volumes(&[a, c]).is_err());
    }
}
