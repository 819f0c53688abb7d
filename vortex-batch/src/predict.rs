//! Inference-time wrappers around patch-local predictors
//!
//! `PatchesGrid` runs a predictor over an arbitrarily large array by
//! dividing it into patches, predicting each patch and averaging the
//! overlaps back together.

use ndarray::{ArrayBase, ArrayD, ArrayViewD, Axis, Data, IxDyn, NdFloat};

use crate::error::{BoxError, PipelineError, Result};
use crate::grid::{combine, divide};
use crate::shape::{broadcast_param, crop_to_shape, pad_to_shape, resolve_axes};
use crate::DEFAULT_PAD_RATIO;

/// Output of a user predictor
pub type PredictResult<A> = std::result::Result<ArrayD<A>, BoxError>;

/// Divide-predict-combine wrapper
#[derive(Debug, Clone)]
pub struct PatchesGrid<A> {
    /// Patch extent per axis (or one broadcast value)
    pub patch_size: Vec<usize>,
    /// Step per axis (or one broadcast value)
    pub stride: Vec<usize>,
    /// Axes to divide along; `None` = trailing axes
    pub axes: Option<Vec<usize>>,
    /// Pad the input to a whole number of strides with this value
    pub padding_values: Option<A>,
    /// Leading share of the padding
    pub ratio: Vec<f64>,
}

impl<A: NdFloat> PatchesGrid<A> {
    /// Zero-padded grid with the default ratio
    pub fn new(patch_size: Vec<usize>, stride: Vec<usize>) -> Self {
        Self {
            patch_size,
            stride,
            axes: None,
            padding_values: Some(A::zero()),
            ratio: vec![DEFAULT_PAD_RATIO],
        }
    }

    /// Restrict the grid to `axes`
    pub fn with_axes(mut self, axes: Vec<usize>) -> Self {
        self.axes = Some(axes);
        self
    }

    /// Set the padding value; `None` disables padding
    pub fn with_padding(mut self, padding_values: Option<A>) -> Self {
        self.padding_values = padding_values;
        self
    }

    /// Set the padding split ratio
    pub fn with_ratio(mut self, ratio: Vec<f64>) -> Self {
        self.ratio = ratio;
        self
    }

    /// Run `predict` over `x` patch by patch.
    ///
    /// The prediction may change the non-grid dimensions (e.g. channels) but
    /// must keep the patch extent along the grid axes.
    pub fn apply<S, F>(&self, x: &ArrayBase<S, IxDyn>, mut predict: F) -> Result<ArrayD<A>>
    where
        S: Data<Elem = A>,
        F: FnMut(ArrayViewD<'_, A>) -> PredictResult<A>,
    {
        let count = self.patch_size.len().max(self.stride.len());
        let axes = resolve_axes(x.ndim(), self.axes.as_deref(), count)?;
        let patch_size = broadcast_param(&self.patch_size, axes.len(), "patch_size")?;
        let stride = broadcast_param(&self.stride, axes.len(), "stride")?;
        if stride.contains(&0) {
            return Err(PipelineError::invalid("stride must be positive"));
        }
        let shape: Vec<usize> = axes.iter().map(|&axis| x.shape()[axis]).collect();

        let padded;
        let input = match &self.padding_values {
            Some(value) => {
                let target: Vec<usize> = shape
                    .iter()
                    .zip(&patch_size)
                    .zip(&stride)
                    .map(|((&size, &patch), &step)| {
                        let missing = (step as i64 - size as i64 + patch as i64)
                            .rem_euclid(step as i64);
                        size + missing as usize
                    })
                    .collect();
                padded = pad_to_shape(x, &target, Some(axes.as_slice()), *value, &self.ratio)?;
                padded.view()
            }
            None => x.view(),
        };
        let grid_shape: Vec<usize> = axes.iter().map(|&axis| input.shape()[axis]).collect();
        // Grid axes counted from the end, so predictions may prepend dimensions
        let from_end: Vec<usize> = axes.iter().map(|&axis| x.ndim() - axis).collect();

        let mut failure: Option<BoxError> = None;
        let mut predictions = divide(&input, &patch_size, &stride, Some(axes.as_slice()), false)?
            .map_while(|patch| match predict(patch) {
                Ok(prediction) => Some(prediction),
                Err(e) => {
                    failure = Some(e);
                    None
                }
            })
            .peekable();

        let out_ndim = predictions.peek().map(|p| p.ndim()).unwrap_or(x.ndim());
        let out_axes = output_axes(out_ndim, &from_end)?;
        let combined = combine(
            predictions,
            &grid_shape,
            Some(stride.as_slice()),
            Some(out_axes.as_slice()),
        );

        if let Some(e) = failure {
            return Err(PipelineError::from_worker("predict", e));
        }
        let prediction = combined?;

        match self.padding_values {
            Some(_) => crop_to_shape(&prediction, &shape, Some(out_axes.as_slice()), &self.ratio),
            None => Ok(prediction),
        }
    }
}

/// Map axes counted from the end onto an array of `ndim` dimensions
fn output_axes(ndim: usize, from_end: &[usize]) -> Result<Vec<usize>> {
    from_end
        .iter()
        .map(|&offset| {
            ndim.checked_sub(offset).ok_or_else(|| {
                PipelineError::shape(format!(
                    "prediction with {} dimensions lost a grid axis",
                    ndim
                ))
            })
        })
        .collect()
}

/// Remove `n` leading singleton dimensions
fn extract_dims<A>(mut x: ArrayD<A>, n: usize) -> Result<ArrayD<A>> {
    for _ in 0..n {
        if x.ndim() == 0 || x.shape()[0] != 1 {
            return Err(PipelineError::shape(format!(
                "cannot extract a leading singleton dimension from shape {:?}",
                x.shape()
            )));
        }
        x = x.index_axis_move(Axis(0), 0);
    }
    Ok(x)
}

/// Wrap a predictor so it sees `n_add` extra leading singleton dimensions
/// (e.g. batch and channel) and `n_extract` of them are removed afterwards.
pub fn add_extract_dims<A, F>(
    n_add: usize,
    n_extract: usize,
    mut predict: F,
) -> impl FnMut(ArrayViewD<'_, A>) -> PredictResult<A>
where
    F: FnMut(ArrayViewD<'_, A>) -> PredictResult<A>,
{
    move |x: ArrayViewD<'_, A>| {
        let mut x = x;
        for _ in 0..n_add {
            x = x.insert_axis(Axis(0));
        }
        let prediction = predict(x)?;
        Ok(extract_dims(prediction, n_extract)?)
    }
}

/// Predict a volume slice by slice along its last axis.
///
/// Each slice reaches `predict` with a leading batch dimension of one. Every
/// entry of the returned batch becomes an output slice, and the slices are
/// stacked along a new last axis.
pub fn predict_slices<S, A, F>(x: &ArrayBase<S, IxDyn>, mut predict: F) -> Result<ArrayD<A>>
where
    S: Data<Elem = A>,
    A: Clone,
    F: FnMut(ArrayViewD<'_, A>) -> PredictResult<A>,
{
    if x.ndim() == 0 {
        return Err(PipelineError::shape("cannot slice a zero-dimensional array"));
    }

    let mut predicted = Vec::with_capacity(x.len_of(Axis(x.ndim() - 1)));
    for slice in x.axis_iter(Axis(x.ndim() - 1)) {
        let batch = predict(slice.insert_axis(Axis(0)))
            .map_err(|e| PipelineError::from_worker("predict", e))?;
        if batch.ndim() == 0 {
            return Err(PipelineError::shape("slice prediction has no batch dimension"));
        }
        predicted.extend(batch.outer_iter().map(|p| p.to_owned()));
    }

    let Some(first) = predicted.first() else {
        return Err(PipelineError::EmptyInput {
            what: "slices to predict".into(),
        });
    };
    let last = Axis(first.ndim());
    let views: Vec<ArrayViewD<'_, A>> = predicted.iter().map(|p| p.view()).collect();
    ndarray::stack(last, &views).map_err(|e| PipelineError::shape(e.to_string()))
}
