//! Combining primitives
//!
//! Turn a chunk of samples into one batch: `[(x, y), (x, y)] -> [(x, x), (y, y)]`.
//! Each sample is a `Vec` whose positions play the role of tuple fields.

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::error::{PipelineError, Result};
use crate::shape::{broadcast_param, pad_to_shape};
use crate::DEFAULT_PAD_RATIO;

/// One training example: one array per position
pub type Sample<A> = Vec<ArrayD<A>>;

/// One batch: one array per position, leading axis = chunk length
pub type Batch<A> = Vec<ArrayD<A>>;

/// Transpose samples into position-major sequences.
///
/// An empty chunk gives an empty batch.
pub fn combine_batches<V>(inputs: Vec<Vec<V>>) -> Result<Vec<Vec<V>>> {
    let Some(arity) = inputs.first().map(Vec::len) else {
        return Ok(Vec::new());
    };

    let mut positions: Vec<Vec<V>> = (0..arity)
        .map(|_| Vec::with_capacity(inputs.len()))
        .collect();

    for (index, sample) in inputs.into_iter().enumerate() {
        if sample.len() != arity {
            return Err(PipelineError::ArityMismatch {
                expected: arity,
                actual: sample.len(),
                index,
            });
        }
        for (position, value) in positions.iter_mut().zip(sample) {
            position.push(value);
        }
    }

    Ok(positions)
}

/// Stack arrays along a new leading axis; all arrays must share a shape.
pub fn stack<A: Clone>(arrays: &[ArrayD<A>]) -> Result<ArrayD<A>> {
    let Some(first) = arrays.first() else {
        return Err(PipelineError::EmptyInput {
            what: "cannot stack zero arrays".into(),
        });
    };

    if let Some(other) = arrays.iter().find(|a| a.shape() != first.shape()) {
        return Err(PipelineError::shape(format!(
            "cannot stack arrays of shapes {:?} and {:?}",
            first.shape(),
            other.shape()
        )));
    }

    let views: Vec<ArrayViewD<'_, A>> = arrays.iter().map(|a| a.view()).collect();
    ndarray::stack(Axis(0), &views).map_err(|e| PipelineError::shape(e.to_string()))
}

/// Combine samples into a batch of stacked arrays.
pub fn combine_to_arrays<A: Clone>(inputs: Vec<Sample<A>>) -> Result<Batch<A>> {
    combine_batches(inputs)?
        .iter()
        .map(|position| stack(position))
        .collect()
}

/// Pad every array of a position to the largest extent along each axis, then stack.
fn pad_batch_equal<A: Clone>(arrays: &[ArrayD<A>], value: A, ratio: f64) -> Result<ArrayD<A>> {
    let Some(first) = arrays.first() else {
        return Err(PipelineError::EmptyInput {
            what: "cannot pad zero arrays".into(),
        });
    };

    let ndim = first.ndim();
    if let Some(other) = arrays.iter().find(|a| a.ndim() != ndim) {
        return Err(PipelineError::shape(format!(
            "cannot pad arrays of shapes {:?} and {:?} to a common shape",
            first.shape(),
            other.shape()
        )));
    }

    let max_shape: Vec<usize> = (0..ndim)
        .map(|axis| arrays.iter().map(|a| a.shape()[axis]).max().unwrap_or(0))
        .collect();
    let axes: Vec<usize> = (0..ndim).collect();

    let padded = arrays
        .iter()
        .map(|a| pad_to_shape(a, &max_shape, Some(axes.as_slice()), value.clone(), &[ratio]))
        .collect::<Result<Vec<_>>>()?;
    stack(&padded)
}

/// Combine samples into a batch, padding each position to a common shape.
///
/// `padding_values` holds one value, or one value per position. `ratio`
/// splits the padding between the leading and trailing side of each axis.
pub fn combine_pad<A: Clone>(
    inputs: Vec<Sample<A>>,
    padding_values: &[A],
    ratio: f64,
) -> Result<Batch<A>> {
    let positions = combine_batches(inputs)?;
    if positions.is_empty() {
        return Ok(Vec::new());
    }
    let values = broadcast_param(padding_values, positions.len(), "padding_values")?;

    positions
        .iter()
        .zip(values)
        .map(|(arrays, value)| pad_batch_equal(arrays, value, ratio))
        .collect()
}

/// Reusable padding combiner, usable as the final stage of a pipeline
#[derive(Debug, Clone)]
pub struct CombinePad<A> {
    /// One value, or one value per position
    pub padding_values: Vec<A>,
    /// Leading share of the padding
    pub ratio: f64,
}

impl<A: Clone> CombinePad<A> {
    /// Pad with `value` everywhere, split by the default ratio
    pub fn new(value: A) -> Self {
        Self {
            padding_values: vec![value],
            ratio: DEFAULT_PAD_RATIO,
        }
    }

    /// Use one padding value per position
    pub fn per_position(values: Vec<A>) -> Self {
        Self {
            padding_values: values,
            ratio: DEFAULT_PAD_RATIO,
        }
    }

    /// Set the padding split ratio
    pub fn with_ratio(mut self, ratio: f64) -> Self {
        self.ratio = ratio;
        self
    }

    /// Combine a chunk
    pub fn combine(&self, inputs: Vec<Sample<A>>) -> Result<Batch<A>> {
        combine_pad(inputs, &self.padding_values, self.ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, array, IxDyn};

    fn scalar(v: i64) -> ArrayD<i64> {
        arr0(v).into_dyn()
    }

    #[test]
    fn test_combine_batches_transposes() {
        let inputs = vec![vec![1, 10], vec![2, 20], vec![3, 30]];
        let combined = combine_batches(inputs).unwrap();
        assert_eq!(combined, vec![vec![1, 2, 3], vec![10, 20, 30]]);
    }

    #[test]
    fn test_combine_batches_round_trip() {
        let items = vec![vec!['a', 'b', 'c'], vec!['d', 'e', 'f']];
        let once = combine_batches(items.clone()).unwrap();
        let twice = combine_batches(once).unwrap();
        assert_eq!(twice, items);
    }

    #[test]
    fn test_combine_batches_empty() {
        let combined = combine_batches::<u8>(Vec::new()).unwrap();
        assert!(combined.is_empty());
    }

    #[test]
    fn test_combine_batches_arity_mismatch() {
        let err = combine_batches(vec![vec![1, 2], vec![3]]).unwrap_err();
        match err {
            PipelineError::ArityMismatch { expected, actual, index } => {
                assert_eq!((expected, actual, index), (2, 1, 1));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_combine_to_arrays_scalars() {
        let batch =
            combine_to_arrays(vec![vec![scalar(1), scalar(10)], vec![scalar(2), scalar(20)]])
                .unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], array![1, 2].into_dyn());
        assert_eq!(batch[1], array![10, 20].into_dyn());
    }

    #[test]
    fn test_combine_to_arrays_shape_mismatch() {
        let inputs = vec![
            vec![ArrayD::<f32>::zeros(IxDyn(&[3]))],
            vec![ArrayD::<f32>::zeros(IxDyn(&[4]))],
        ];
        assert!(combine_to_arrays(inputs).unwrap_err().is_shape());
    }

    #[test]
    fn test_combine_pad_trailing() {
        let inputs = vec![
            vec![array![1, 2, 3].into_dyn()],
            vec![array![4, 5, 6, 7, 8].into_dyn()],
        ];
        let batch = combine_pad(inputs, &[0], 0.0).unwrap();
        assert_eq!(batch[0].shape(), &[2, 5]);
        assert_eq!(batch[0], array![[1, 2, 3, 0, 0], [4, 5, 6, 7, 8]].into_dyn());
    }

    #[test]
    fn test_combine_pad_per_position_values() {
        let inputs = vec![
            vec![array![1.0].into_dyn(), array![[1.0]].into_dyn()],
            vec![array![2.0, 2.0].into_dyn(), array![[2.0, 2.0], [2.0, 2.0]].into_dyn()],
        ];
        let batch = CombinePad::per_position(vec![-1.0, 9.0])
            .with_ratio(1.0)
            .combine(inputs)
            .unwrap();

        assert_eq!(batch[0], array![[-1.0, 1.0], [2.0, 2.0]].into_dyn());
        assert_eq!(batch[1].shape(), &[2, 2, 2]);
        assert_eq!(batch[1][[0, 1, 1]], 1.0);
        assert_eq!(batch[1][[0, 0, 0]], 9.0);
    }

    #[test]
    fn test_combine_pad_bad_padding_values() {
        let inputs = vec![vec![scalar(1), scalar(2)]];
        assert!(combine_pad(inputs, &[0, 0, 0], 0.5).unwrap_err().is_config());
    }
}
