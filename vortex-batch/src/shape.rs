//! Shape utilities: axis resolution, parameter broadcasting, padding and cropping
//!
//! Padding and cropping along a set of axes share a `ratio` that decides how
//! the difference between the two shapes is split: the leading side gets
//! `floor(delta * ratio)`, the trailing side the rest.

use ndarray::{ArrayBase, ArrayD, Data, IxDyn, Slice};

use crate::error::{PipelineError, Result};

/// Broadcast a per-axis (or per-position) parameter to `n` values.
///
/// A single value is repeated; exactly `n` values are kept as they are.
pub fn broadcast_param<T: Clone>(values: &[T], n: usize, what: &str) -> Result<Vec<T>> {
    match values.len() {
        1 => Ok(vec![values[0].clone(); n]),
        len if len == n => Ok(values.to_vec()),
        len => Err(PipelineError::invalid(format!(
            "{} has {} values, which cannot be broadcast to {}",
            what, len, n
        ))),
    }
}

/// Resolve the axes an operation applies to.
///
/// `None` selects the last `count` dimensions of an `ndim`-dimensional array.
pub fn resolve_axes(ndim: usize, axes: Option<&[usize]>, count: usize) -> Result<Vec<usize>> {
    let axes = match axes {
        Some(axes) => axes.to_vec(),
        None => {
            if count > ndim {
                return Err(PipelineError::invalid(format!(
                    "{} axes requested for a {}-dimensional array",
                    count, ndim
                )));
            }
            (ndim - count..ndim).collect()
        }
    };

    for (i, &axis) in axes.iter().enumerate() {
        if axis >= ndim {
            return Err(PipelineError::invalid(format!(
                "axis {} is out of bounds for a {}-dimensional array",
                axis, ndim
            )));
        }
        if axes[..i].contains(&axis) {
            return Err(PipelineError::invalid(format!("axis {} is repeated", axis)));
        }
    }
    Ok(axes)
}

/// Replace the extents of `shape` at `axes` with `values`
pub fn fill_by_indices(shape: &[usize], values: &[usize], axes: &[usize]) -> Vec<usize> {
    let mut result = shape.to_vec();
    for (&axis, &value) in axes.iter().zip(values) {
        result[axis] = value;
    }
    result
}

fn check_ratio(ratio: &[f64]) -> Result<()> {
    match ratio.iter().find(|r| !(0.0..=1.0).contains(*r)) {
        Some(r) => Err(PipelineError::invalid(format!(
            "ratio must lie in [0, 1], got {}",
            r
        ))),
        None => Ok(()),
    }
}

/// Leading part of `delta` for a given split `ratio`
fn leading(delta: usize, ratio: f64) -> usize {
    (delta as f64 * ratio).floor() as usize
}

/// Pad `x` with `value`; `padding[axis] = [before, after]`.
pub fn pad<A, S>(x: &ArrayBase<S, IxDyn>, padding: &[[usize; 2]], value: A) -> Result<ArrayD<A>>
where
    A: Clone,
    S: Data<Elem = A>,
{
    if padding.len() != x.ndim() {
        return Err(PipelineError::invalid(format!(
            "padding has {} entries for a {}-dimensional array",
            padding.len(),
            x.ndim()
        )));
    }

    let new_shape: Vec<usize> = x
        .shape()
        .iter()
        .zip(padding)
        .map(|(&size, [before, after])| size + before + after)
        .collect();

    let mut padded = ArrayD::from_elem(IxDyn(&new_shape), value);
    padded
        .slice_each_axis_mut(|ax| {
            let axis = ax.axis.index();
            let start = padding[axis][0];
            Slice::from(start..start + x.shape()[axis])
        })
        .assign(x);
    Ok(padded)
}

/// Pad `x` along `axes` up to `shape`.
///
/// `shape` and `ratio` are given per axis (or as a single broadcast value).
pub fn pad_to_shape<A, S>(
    x: &ArrayBase<S, IxDyn>,
    shape: &[usize],
    axes: Option<&[usize]>,
    value: A,
    ratio: &[f64],
) -> Result<ArrayD<A>>
where
    A: Clone,
    S: Data<Elem = A>,
{
    let axes = resolve_axes(x.ndim(), axes, shape.len())?;
    let shape = broadcast_param(shape, axes.len(), "shape")?;
    let ratio = broadcast_param(ratio, axes.len(), "ratio")?;
    check_ratio(&ratio)?;

    let mut padding = vec![[0, 0]; x.ndim()];
    for ((&axis, &target), &r) in axes.iter().zip(&shape).zip(&ratio) {
        let old = x.shape()[axis];
        if old > target {
            return Err(PipelineError::shape(format!(
                "cannot pad axis {} of size {} down to {}",
                axis, old, target
            )));
        }
        let delta = target - old;
        let before = leading(delta, r);
        padding[axis] = [before, delta - before];
    }

    pad(x, &padding, value)
}

/// Crop `x` along `axes` down to `shape`.
pub fn crop_to_shape<A, S>(
    x: &ArrayBase<S, IxDyn>,
    shape: &[usize],
    axes: Option<&[usize]>,
    ratio: &[f64],
) -> Result<ArrayD<A>>
where
    A: Clone,
    S: Data<Elem = A>,
{
    let axes = resolve_axes(x.ndim(), axes, shape.len())?;
    let shape = broadcast_param(shape, axes.len(), "shape")?;
    let ratio = broadcast_param(ratio, axes.len(), "ratio")?;
    check_ratio(&ratio)?;

    let mut ranges: Vec<(usize, usize)> = x.shape().iter().map(|&size| (0, size)).collect();
    for ((&axis, &target), &r) in axes.iter().zip(&shape).zip(&ratio) {
        let old = x.shape()[axis];
        if old < target {
            return Err(PipelineError::shape(format!(
                "cannot crop axis {} of size {} up to {}",
                axis, old, target
            )));
        }
        let start = leading(old - target, r);
        ranges[axis] = (start, start + target);
    }

    Ok(x
        .slice_each_axis(|ax| {
            let (start, stop) = ranges[ax.axis.index()];
            Slice::from(start..stop)
        })
        .to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array, Axis};

    fn row(x: &ArrayD<f32>, index: usize) -> Vec<f32> {
        x.index_axis(Axis(0), index).iter().copied().collect()
    }

    #[test]
    fn test_broadcast_param() {
        assert_eq!(broadcast_param(&[3], 2, "stride").unwrap(), vec![3, 3]);
        assert_eq!(broadcast_param(&[1, 2], 2, "stride").unwrap(), vec![1, 2]);
        assert!(broadcast_param(&[1, 2], 3, "stride").unwrap_err().is_config());
    }

    #[test]
    fn test_resolve_axes() {
        assert_eq!(resolve_axes(3, None, 2).unwrap(), vec![1, 2]);
        assert_eq!(resolve_axes(3, Some(&[0, 2]), 2).unwrap(), vec![0, 2]);
        assert!(resolve_axes(3, Some(&[3]), 1).is_err());
        assert!(resolve_axes(3, Some(&[1, 1]), 2).is_err());
        assert!(resolve_axes(1, None, 2).is_err());
    }

    #[test]
    fn test_pad_to_shape_ratio() {
        let x = Array::from_elem(IxDyn(&[2, 3]), 1.0_f32);

        // Delta of 3 along axis 1 split 0.5 -> 1 before, 2 after
        let padded = pad_to_shape(&x, &[6], None, 0.0, &[0.5]).unwrap();
        assert_eq!(padded.shape(), &[2, 6]);
        assert_eq!(row(&padded, 0), vec![0.0, 1.0, 1.0, 1.0, 0.0, 0.0]);

        let trailing = pad_to_shape(&x, &[6], None, 0.0, &[0.0]).unwrap();
        assert_eq!(row(&trailing, 1), vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0]);

        let leading = pad_to_shape(&x, &[6], None, 0.0, &[1.0]).unwrap();
        assert_eq!(row(&leading, 1), vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_pad_to_smaller_shape_fails() {
        let x = Array::from_elem(IxDyn(&[4]), 0_i32);
        let err = pad_to_shape(&x, &[3], None, 0, &[0.5]).unwrap_err();
        assert!(err.is_shape());
    }

    #[test]
    fn test_crop_undoes_pad() {
        let x = array![[1, 2, 3], [4, 5, 6]].into_dyn();
        for ratio in [0.0, 0.3, 0.5, 1.0] {
            let padded = pad_to_shape(&x, &[5, 8], Some(&[0, 1]), -1, &[ratio]).unwrap();
            let cropped = crop_to_shape(&padded, &[2, 3], Some(&[0, 1]), &[ratio]).unwrap();
            assert_eq!(cropped, x);
        }
    }

    #[test]
    fn test_invalid_ratio() {
        let x = Array::from_elem(IxDyn(&[4]), 0_i32);
        assert!(pad_to_shape(&x, &[6], None, 0, &[1.5]).unwrap_err().is_config());
    }
}
