//! Grid patch divide/combine
//!
//! Sweeps a box over an array the way a convolution sweeps its receptive
//! field. `divide` cuts an array into (possibly overlapping) patches,
//! `combine` puts patches back together and averages the overlaps.
//!
//! ```text
//! shape = 10, box = 4, stride = 2, valid = false
//!
//!   0 1 2 3 4 5 6 7 8 9
//!   [-------)
//!       [-------)
//!           [-------)
//!               [-------)
//! ```

use ndarray::{ArrayBase, ArrayD, ArrayViewD, Data, IxDyn, NdFloat, Slice};

use crate::error::{PipelineError, Result};
use crate::iter::zip_equal;
use crate::shape::{broadcast_param, fill_by_indices, resolve_axes};

/// Start/stop coordinates of one window, covering every dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridBox {
    /// Inclusive start per dimension
    pub start: Vec<usize>,
    /// Exclusive stop per dimension
    pub stop: Vec<usize>,
}

impl GridBox {
    /// Extent of the box per dimension
    pub fn shape(&self) -> Vec<usize> {
        self.start
            .iter()
            .zip(&self.stop)
            .map(|(start, stop)| stop - start)
            .collect()
    }

    /// View of `x` covered by this box
    pub fn view<'a, A, S>(&self, x: &'a ArrayBase<S, IxDyn>) -> ArrayViewD<'a, A>
    where
        S: Data<Elem = A>,
    {
        x.slice_each_axis(|ax| {
            let axis = ax.axis.index();
            Slice::from(self.start[axis]..self.stop[axis])
        })
    }
}

/// Number of window positions along one axis
fn positions(size: usize, window: usize, stride: usize, valid: bool) -> usize {
    if valid {
        if size < window {
            0
        } else {
            (size - window) / stride + 1
        }
    } else if size <= window {
        1
    } else {
        (size - window).div_ceil(stride) + 1
    }
}

/// Lazy, exact-size sequence of boxes produced by [`get_boxes`]
///
/// Boxes come in row-major order of their start positions, last axis fastest.
#[derive(Debug, Clone)]
pub struct Boxes {
    shape: Vec<usize>,
    window: Vec<usize>,
    stride: Vec<usize>,
    counts: Vec<usize>,
    position: usize,
    total: usize,
}

impl Boxes {
    /// Number of window positions per dimension
    pub fn grid_shape(&self) -> &[usize] {
        &self.counts
    }
}

impl Iterator for Boxes {
    type Item = GridBox;

    fn next(&mut self) -> Option<GridBox> {
        if self.position >= self.total {
            return None;
        }

        let ndim = self.shape.len();
        let mut start = vec![0; ndim];
        let mut rest = self.position;
        for axis in (0..ndim).rev() {
            start[axis] = (rest % self.counts[axis]) * self.stride[axis];
            rest /= self.counts[axis];
        }
        let stop = start
            .iter()
            .zip(&self.window)
            .zip(&self.shape)
            .map(|((&s, &w), &size)| (s + w).min(size))
            .collect();

        self.position += 1;
        Some(GridBox { start, stop })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.total - self.position;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Boxes {}

/// Yield boxes covering an array of `shape` in a convolution-like fashion.
///
/// `box_size` and `stride` are given per axis or as one broadcast value.
/// With `axes = None` the last `max(box_size.len(), stride.len())` dimensions
/// are used. With `valid` set, boxes sticking out of the array are left out;
/// otherwise the last box along an axis is clipped to the boundary.
pub fn get_boxes(
    shape: &[usize],
    box_size: &[usize],
    stride: &[usize],
    axes: Option<&[usize]>,
    valid: bool,
) -> Result<Boxes> {
    let count = box_size.len().max(stride.len());
    let axes = resolve_axes(shape.len(), axes, count)?;
    let box_size = broadcast_param(box_size, axes.len(), "box_size")?;
    let stride = broadcast_param(stride, axes.len(), "stride")?;

    if box_size.contains(&0) {
        return Err(PipelineError::invalid("box size must be positive"));
    }
    if stride.contains(&0) {
        return Err(PipelineError::invalid("stride must be positive"));
    }

    let window = fill_by_indices(shape, &box_size, &axes);
    let full_stride = fill_by_indices(&vec![1; shape.len()], &stride, &axes);
    let counts: Vec<usize> = shape
        .iter()
        .zip(&window)
        .zip(&full_stride)
        .map(|((&size, &w), &s)| positions(size, w, s, valid))
        .collect();
    let total = counts.iter().product();

    Ok(Boxes {
        shape: shape.to_vec(),
        window,
        stride: full_stride,
        counts,
        position: 0,
        total,
    })
}

/// Generate patches of `x` in a convolution-like fashion.
///
/// See [`get_boxes`] for the meaning of the parameters.
pub fn divide<'a, A, S>(
    x: &'a ArrayBase<S, IxDyn>,
    patch_size: &[usize],
    stride: &[usize],
    axes: Option<&[usize]>,
    valid: bool,
) -> Result<impl Iterator<Item = ArrayViewD<'a, A>> + 'a>
where
    A: 'a,
    S: Data<Elem = A> + 'a,
{
    let boxes = get_boxes(x.shape(), patch_size, stride, axes, valid)?;
    Ok(boxes.map(move |b| b.view(x)))
}

/// Build an array from patches obtained by [`divide`] with matching parameters.
///
/// `output_shape` gives the extent along `axes`; the other dimensions are
/// taken from the first patch. `stride` defaults to the patch size. Regions
/// covered by several patches are averaged, uncovered regions stay zero.
pub fn combine<A, S, I>(
    patches: I,
    output_shape: &[usize],
    stride: Option<&[usize]>,
    axes: Option<&[usize]>,
) -> Result<ArrayD<A>>
where
    A: NdFloat,
    S: Data<Elem = A>,
    I: IntoIterator<Item = ArrayBase<S, IxDyn>>,
{
    let mut patches = patches.into_iter().peekable();
    let patch_shape = match patches.peek() {
        Some(patch) => patch.shape().to_vec(),
        None => {
            return Err(PipelineError::EmptyInput {
                what: "cannot combine zero patches".into(),
            })
        }
    };

    let axes = resolve_axes(patch_shape.len(), axes, output_shape.len())?;
    let output_shape = broadcast_param(output_shape, axes.len(), "output_shape")?;
    let window: Vec<usize> = axes.iter().map(|&axis| patch_shape[axis]).collect();
    let stride = match stride {
        Some(stride) => broadcast_param(stride, axes.len(), "stride")?,
        None => window.clone(),
    };
    let full_shape = fill_by_indices(&patch_shape, &output_shape, &axes);

    let mut result = ArrayD::<A>::zeros(IxDyn(&full_shape));
    let mut counts = ArrayD::<A>::zeros(IxDyn(&full_shape));
    let boxes = get_boxes(&full_shape, &window, &stride, Some(axes.as_slice()), false)?;

    for pair in zip_equal(boxes, patches) {
        let (grid_box, patch) = pair?;
        let slice = |ax: ndarray::AxisDescription| {
            let axis = ax.axis.index();
            Slice::from(grid_box.start[axis]..grid_box.stop[axis])
        };

        let mut region = result.slice_each_axis_mut(slice);
        if region.shape() != patch.shape() {
            return Err(PipelineError::shape(format!(
                "patch of shape {:?} does not fit box of shape {:?}",
                patch.shape(),
                region.shape()
            )));
        }
        region += &patch;
        counts
            .slice_each_axis_mut(slice)
            .mapv_inplace(|c| c + A::one());
    }

    counts.mapv_inplace(|c| c.max(A::one()));
    Ok(result / &counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn spans(boxes: Boxes) -> Vec<(usize, usize)> {
        boxes.map(|b| (b.start[0], b.stop[0])).collect()
    }

    #[test]
    fn test_get_boxes_valid() {
        let boxes = get_boxes(&[10], &[3], &[3], None, true).unwrap();
        assert_eq!(boxes.len(), 3);
        assert_eq!(spans(boxes), vec![(0, 3), (3, 6), (6, 9)]);
    }

    #[test]
    fn test_get_boxes_clipped() {
        let boxes = get_boxes(&[10], &[3], &[3], None, false).unwrap();
        assert_eq!(boxes.len(), 4);
        assert_eq!(spans(boxes), vec![(0, 3), (3, 6), (6, 9), (9, 10)]);
    }

    #[test]
    fn test_get_boxes_row_major_over_axes() {
        let boxes: Vec<GridBox> = get_boxes(&[2, 4, 4], &[2], &[2], Some(&[1, 2]), true)
            .unwrap()
            .collect();
        assert_eq!(boxes.len(), 4);
        assert_eq!(boxes[0].start, vec![0, 0, 0]);
        assert_eq!(boxes[1].start, vec![0, 0, 2]);
        assert_eq!(boxes[2].start, vec![0, 2, 0]);
        // Non-grid dimensions span the whole extent
        assert_eq!(boxes[3].stop, vec![2, 4, 4]);
    }

    #[test]
    fn test_get_boxes_rejects_zero_stride() {
        assert!(get_boxes(&[10], &[3], &[0], None, true).unwrap_err().is_config());
    }

    #[test]
    fn test_divide_shapes() {
        let x = Array::from_shape_fn(IxDyn(&[3, 5]), |i| (i[0] * 5 + i[1]) as f64);
        let patches: Vec<_> = divide(&x, &[2], &[2], None, false).unwrap().collect();
        assert_eq!(patches.len(), 3);
        assert_eq!(patches[0].shape(), &[3, 2]);
        assert_eq!(patches[2].shape(), &[3, 1]);
        assert_eq!(patches[1][[1, 0]], 7.0);
    }

    #[test]
    fn test_combine_reconstructs() {
        let x = Array::from_shape_fn(IxDyn(&[10]), |i| i[0] as f64 * 1.5);
        let patches = divide(&x, &[4], &[2], None, false).unwrap();
        let combined = combine(patches, &[10], Some(&[2]), None).unwrap();
        assert_eq!(combined, x);
    }

    #[test]
    fn test_combine_averages_overlaps() {
        let x = Array::<f64, _>::zeros(IxDyn(&[10]));
        // Patch k is filled with k
        let patches: Vec<ArrayD<f64>> = divide(&x, &[4], &[2], None, false)
            .unwrap()
            .enumerate()
            .map(|(k, p)| Array::from_elem(p.raw_dim(), k as f64))
            .collect();

        let combined = combine(patches, &[10], Some(&[2]), None).unwrap();
        let expected = [0.0, 0.0, 0.5, 0.5, 1.5, 1.5, 2.5, 2.5, 3.0, 3.0];
        assert_eq!(combined.iter().copied().collect::<Vec<_>>(), expected);
    }

    #[test]
    fn test_combine_uncovered_stays_zero() {
        let patches = vec![Array::from_elem(IxDyn(&[2]), 4.0_f32)];
        let combined = combine(patches, &[2], Some(&[3]), None).unwrap();
        assert_eq!(combined.iter().copied().collect::<Vec<_>>(), vec![4.0, 4.0]);

        // Stride larger than the patch leaves holes
        let x = Array::from_elem(IxDyn(&[8]), 1.0_f32);
        let patches = divide(&x, &[2], &[3], None, true).unwrap();
        let combined = combine(patches, &[8], Some(&[3]), None).unwrap();
        assert_eq!(
            combined.iter().copied().collect::<Vec<_>>(),
            vec![1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0]
        );
    }

    #[test]
    fn test_combine_count_mismatch() {
        let x = Array::from_elem(IxDyn(&[10]), 1.0_f64);
        let patches: Vec<_> = divide(&x, &[4], &[2], None, false).unwrap().take(3).collect();
        let err = combine(patches, &[10], Some(&[2]), None).unwrap_err();
        assert!(matches!(err, PipelineError::LengthMismatch { .. }));
    }

    #[test]
    fn test_combine_empty() {
        let patches: Vec<ArrayD<f32>> = Vec::new();
        assert!(matches!(
            combine(patches, &[4], None, None),
            Err(PipelineError::EmptyInput { .. })
        ));
    }
}
