use super::{load_tensors, resolve_lengths, take_tensor, DISTANCE_MATRIX};
use anyhow::{bail, Result};
use candle_core::{DType, Device};
use ferritin_geometry::metrics::tensor_to_array3;
use ferritin_geometry::{drmsd_dist_matrix, pairwise_mask, seqlen_tensor};
use ferritin_training::plot_dist_matrix;
use std::path::Path;

pub fn execute(
    pred: &Path,
    gt: &Path,
    names: Vec<String>,
    lengths: Vec<usize>,
    output: &Path,
) -> Result<()> {
    let device = Device::Cpu;
    let pred_dm = take_tensor(&mut load_tensors(pred, &device)?, DISTANCE_MATRIX, pred)?
        .to_dtype(DType::F32)?;
    let gt_dm = take_tensor(&mut load_tensors(gt, &device)?, DISTANCE_MATRIX, gt)?
        .to_dtype(DType::F32)?;
    if pred_dm.dims() != gt_dm.dims() {
        bail!(
            "prediction {:?} and ground truth {:?} differ in shape",
            pred_dm.dims(),
            gt_dm.dims()
        );
    }

    let (batch, max_len, _) = pred_dm.dims3()?;
    let lengths = resolve_lengths(lengths, batch, max_len)?;
    let names = if names.is_empty() {
        (0..batch).map(|i| format!("protein_{i}")).collect()
    } else {
        names
    };

    let weights = pairwise_mask(&lengths, max_len, DType::F32, &device)?;
    let seqlen = seqlen_tensor(&lengths, DType::F32, &device)?;
    let scores = drmsd_dist_matrix(&pred_dm, &gt_dm, &seqlen, &weights)?.to_vec1::<f32>()?;

    plot_dist_matrix(
        tensor_to_array3(&pred_dm)?.view(),
        tensor_to_array3(&gt_dm)?.view(),
        &names,
        &lengths,
        &scores,
        output,
    )
}
