//! Host-side evaluation metrics.
//!
//! These run on `ndarray` arrays pulled off the device and are not part of the autodiff
//! graph.
use candle_core::Tensor;
use ndarray::{s, Array2, Array3, ArrayView, ArrayView3, Axis, RemoveAxis, Slice};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricError {
    #[error("prediction shape {pred:?} does not match target shape {target:?}")]
    ShapeMismatch {
        target: Vec<usize>,
        pred: Vec<usize>,
    },
    #[error("{seqlen} sequence lengths given for a batch of {batch}")]
    BatchMismatch { batch: usize, seqlen: usize },
    #[error("sequence length {len} exceeds padded length {max_len}")]
    LengthOutOfRange { len: usize, max_len: usize },
    #[error("cannot evaluate an empty batch")]
    EmptyBatch,
    #[error(transparent)]
    Candle(#[from] candle_core::Error),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

fn check_batch(target: &[usize], pred: &[usize], seqlen: &[usize]) -> Result<(), MetricError> {
    if target != pred {
        return Err(MetricError::ShapeMismatch {
            target: target.to_vec(),
            pred: pred.to_vec(),
        });
    }
    let batch = target[0];
    if batch == 0 {
        return Err(MetricError::EmptyBatch);
    }
    if seqlen.len() != batch {
        return Err(MetricError::BatchMismatch {
            batch,
            seqlen: seqlen.len(),
        });
    }
    let max_len = target.get(1).copied().unwrap_or(0);
    match seqlen.iter().find(|&&len| len > max_len) {
        Some(&len) => Err(MetricError::LengthOutOfRange { len, max_len }),
        None => Ok(()),
    }
}

fn mean_squared_error<D: ndarray::Dimension>(
    y_true: ArrayView<f32, D>,
    y_pred: ArrayView<f32, D>,
) -> f32 {
    (&y_true - &y_pred).mapv(|d| d * d).mean().unwrap_or(0.0)
}

/// Batch mean of the MSE over the valid `seqlen x seqlen` block of each distance matrix.
pub fn mse_dist_matrix(
    y_true: ArrayView3<f32>,
    y_pred: ArrayView3<f32>,
    batch_seqlen: &[usize],
) -> Result<f32, MetricError> {
    check_batch(y_true.shape(), y_pred.shape(), batch_seqlen)?;
    let total: f32 = y_true
        .outer_iter()
        .zip(y_pred.outer_iter())
        .zip(batch_seqlen)
        .map(|((yt, yp), &sl)| {
            mean_squared_error(yt.slice(s![..sl, ..sl]), yp.slice(s![..sl, ..sl]))
        })
        .sum();
    Ok(total / batch_seqlen.len() as f32)
}

/// Batch mean of the MSE over the first `seqlen` positions of each protein.
///
/// Works for `[batch, length]` angle arrays as well as `[batch, length, dihedrals]`.
pub fn mse_torsion_angle<D: RemoveAxis>(
    y_true: ArrayView<f32, D>,
    y_pred: ArrayView<f32, D>,
    batch_seqlen: &[usize],
) -> Result<f32, MetricError> {
    check_batch(y_true.shape(), y_pred.shape(), batch_seqlen)?;
    let total: f32 = y_true
        .axis_iter(Axis(0))
        .zip(y_pred.axis_iter(Axis(0)))
        .zip(batch_seqlen)
        .map(|((yt, yp), &sl)| {
            mean_squared_error(
                yt.slice_axis(Axis(0), Slice::from(..sl)),
                yp.slice_axis(Axis(0), Slice::from(..sl)),
            )
        })
        .sum();
    Ok(total / batch_seqlen.len() as f32)
}

/// Copies a rank-3 tensor to a host `Array3<f32>`.
pub fn tensor_to_array3(tensor: &Tensor) -> Result<Array3<f32>, MetricError> {
    let dims = tensor.dims3()?;
    let data = tensor
        .to_dtype(candle_core::DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(Array3::from_shape_vec(dims, data)?)
}

/// Copies a rank-2 tensor to a host `Array2<f32>`.
pub fn tensor_to_array2(tensor: &Tensor) -> Result<Array2<f32>, MetricError> {
    let dims = tensor.dims2()?;
    let data = tensor
        .to_dtype(candle_core::DType::F32)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    Ok(Array2::from_shape_vec(dims, data)?)
}
