//! Differentiable structural losses.
use crate::constants::DEFAULT_EPSILON;
use crate::geometry::reduce_l2_norm;
use candle_core::{bail, DType, Device, Result, Tensor};

/// Distance-matrix RMSD per protein.
///
/// - `mat1`, `mat2`: `[batch, length, length]`
/// - `batch_seqlen`: `[batch]`, float
/// - `weights`: `[batch, length, length]`
pub fn drmsd_dist_matrix(
    mat1: &Tensor,
    mat2: &Tensor,
    batch_seqlen: &Tensor,
    weights: &Tensor,
) -> Result<Tensor> {
    let diffs = mat1.sub(mat2)?;
    let norms = reduce_l2_norm(&diffs, &[1, 2], Some(weights), DEFAULT_EPSILON)?;
    norms.div(batch_seqlen)
}

/// Torsion-angle RMSD per protein.
///
/// - `angles1`, `angles2`: `[batch, length]`
/// - `batch_seqlen`: `[batch]`, float
/// - `weights`: `[batch, length]`
pub fn rmsd_torsion_angle(
    angles1: &Tensor,
    angles2: &Tensor,
    batch_seqlen: &Tensor,
    weights: &Tensor,
) -> Result<Tensor> {
    let diffs = angles1.sub(angles2)?;
    let norms = reduce_l2_norm(&diffs, &[1], Some(weights), DEFAULT_EPSILON)?;
    norms.div(&batch_seqlen.sqrt()?)
}

/// RMSD across the whole batch, weighting each protein by its length.
pub fn rmsd_kaggle(rmsd_batch: &Tensor, seqlen_batch: &Tensor) -> Result<Tensor> {
    let norm = rmsd_batch.sqr()?.mul(seqlen_batch)?.sum_all()?;
    norm.div(&seqlen_batch.sum_all()?)?.sqrt()
}

/// Sequence lengths as a float `[batch]` tensor.
pub fn seqlen_tensor(seqlen: &[usize], dtype: DType, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = seqlen.iter().map(|&len| len as f32).collect();
    Tensor::new(values.as_slice(), device)?.to_dtype(dtype)
}

/// `[batch, max_len]` weights that are one on the valid residues of each protein.
pub fn sequence_mask(
    seqlen: &[usize],
    max_len: usize,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    if let Some(len) = seqlen.iter().find(|&&len| len > max_len) {
        bail!("sequence length {len} exceeds padded length {max_len}");
    }
    let values: Vec<f32> = seqlen
        .iter()
        .flat_map(|&len| (0..max_len).map(move |i| if i < len { 1.0 } else { 0.0 }))
        .collect();
    Tensor::from_vec(values, (seqlen.len(), max_len), device)?.to_dtype(dtype)
}

/// `[batch, max_len, max_len]` weights covering the valid block of each distance matrix.
pub fn pairwise_mask(
    seqlen: &[usize],
    max_len: usize,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let mask = sequence_mask(seqlen, max_len, dtype, device)?;
    mask.unsqueeze(2)?.broadcast_mul(&mask.unsqueeze(1)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drmsd_known_value() -> Result<()> {
        let device = Device::Cpu;
        let mat1 = Tensor::ones((1, 2, 2), DType::F32, &device)?;
        let mat2 = Tensor::zeros((1, 2, 2), DType::F32, &device)?;
        let weights = Tensor::ones((1, 2, 2), DType::F32, &device)?;
        let seqlen = seqlen_tensor(&[2], DType::F32, &device)?;
        let drmsd = drmsd_dist_matrix(&mat1, &mat2, &seqlen, &weights)?.to_vec1::<f32>()?;
        // sqrt(4) / 2
        assert!((drmsd[0] - 1.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_drmsd_ignores_padding() -> Result<()> {
        let device = Device::Cpu;
        let mat1 = Tensor::new(&[[[0f32, 2., 9.], [2., 0., 9.], [9., 9., 9.]]], &device)?;
        let mat2 = Tensor::zeros((1, 3, 3), DType::F32, &device)?;
        let weights = pairwise_mask(&[2], 3, DType::F32, &device)?;
        let seqlen = seqlen_tensor(&[2], DType::F32, &device)?;
        let drmsd = drmsd_dist_matrix(&mat1, &mat2, &seqlen, &weights)?.to_vec1::<f32>()?;
        // sqrt(2^2 + 2^2) / 2
        assert!((drmsd[0] - 8f32.sqrt() / 2.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_rmsd_torsion_angle() -> Result<()> {
        let device = Device::Cpu;
        let a1 = Tensor::new(&[[1f32, 1., 1., 1.], [0.5, 0.5, 0., 0.]], &device)?;
        let a2 = Tensor::zeros((2, 4), DType::F32, &device)?;
        let weights = sequence_mask(&[4, 2], 4, DType::F32, &device)?;
        let seqlen = seqlen_tensor(&[4, 2], DType::F32, &device)?;
        let rmsd = rmsd_torsion_angle(&a1, &a2, &seqlen, &weights)?.to_vec1::<f32>()?;
        assert!((rmsd[0] - 1.0).abs() < 1e-5);
        assert!((rmsd[1] - 0.5).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_rmsd_kaggle_weights_by_length() -> Result<()> {
        let device = Device::Cpu;
        let rmsd = Tensor::new(&[1f32, 3.], &device)?;
        let seqlen = seqlen_tensor(&[3, 1], DType::F32, &device)?;
        let total = rmsd_kaggle(&rmsd, &seqlen)?.to_scalar::<f32>()?;
        // sqrt((1 * 3 + 9 * 1) / 4)
        assert!((total - 3f32.sqrt()).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_masks() -> Result<()> {
        let device = Device::Cpu;
        let mask = sequence_mask(&[1, 3], 3, DType::F32, &device)?.to_vec2::<f32>()?;
        assert_eq!(mask, vec![vec![1., 0., 0.], vec![1., 1., 1.]]);
        let pair = pairwise_mask(&[2], 3, DType::F32, &device)?;
        assert_eq!(pair.sum_all()?.to_scalar::<f32>()?, 4.0);
        assert!(sequence_mask(&[4], 3, DType::F32, &device).is_err());
        Ok(())
    }
}
