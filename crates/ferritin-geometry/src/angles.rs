//! Angle utilities: a differentiable `atan2` and the learned angle alphabet used to turn
//! per-residue mixture probabilities into torsion angles.
use crate::constants::NUM_DIHEDRALS;
use candle_core::{bail, CpuStorage, CustomOp2, Device, Layout, Result, Shape, Tensor};
use candle_nn::{Init, VarBuilder};
use std::f64::consts::PI;

const ATAN2_EPS: f64 = 1e-12;

struct Atan2;

impl CustomOp2 for Atan2 {
    fn name(&self) -> &'static str {
        "atan2"
    }

    fn cpu_fwd(
        &self,
        s1: &CpuStorage,
        l1: &Layout,
        s2: &CpuStorage,
        l2: &Layout,
    ) -> Result<(CpuStorage, Shape)> {
        let (Some((y_start, y_end)), Some((x_start, x_end))) =
            (l1.contiguous_offsets(), l2.contiguous_offsets())
        else {
            bail!("atan2 expects contiguous inputs");
        };
        let storage = match (s1, s2) {
            (CpuStorage::F32(y), CpuStorage::F32(x)) => CpuStorage::F32(
                y[y_start..y_end]
                    .iter()
                    .zip(x[x_start..x_end].iter())
                    .map(|(y, x)| y.atan2(*x))
                    .collect(),
            ),
            (CpuStorage::F64(y), CpuStorage::F64(x)) => CpuStorage::F64(
                y[y_start..y_end]
                    .iter()
                    .zip(x[x_start..x_end].iter())
                    .map(|(y, x)| y.atan2(*x))
                    .collect(),
            ),
            _ => bail!("atan2 expects two f32 or two f64 tensors"),
        };
        Ok((storage, l1.shape().clone()))
    }

    fn bwd(
        &self,
        y: &Tensor,
        x: &Tensor,
        _res: &Tensor,
        grad_res: &Tensor,
    ) -> Result<(Option<Tensor>, Option<Tensor>)> {
        let denom = (y.sqr()? + x.sqr()?)?.maximum(ATAN2_EPS)?;
        let grad_y = grad_res.mul(&x.div(&denom)?)?;
        let grad_x = grad_res.mul(&y.neg()?.div(&denom)?)?;
        Ok((Some(grad_y), Some(grad_x)))
    }
}

/// Element-wise `atan2(y, x)` with gradients for both arguments.
///
/// The kernel runs on the CPU; tensors living on an accelerator are moved across and back.
pub fn atan2(y: &Tensor, x: &Tensor) -> Result<Tensor> {
    if y.shape() != x.shape() {
        bail!(
            "atan2 shape mismatch: {:?} vs {:?}",
            y.shape().dims(),
            x.shape().dims()
        );
    }
    let device = y.device();
    if device.is_cpu() {
        y.contiguous()?.apply_op2(&x.contiguous()?, Atan2)
    } else {
        let y_cpu = y.to_device(&Device::Cpu)?.contiguous()?;
        let x_cpu = x.to_device(&Device::Cpu)?.contiguous()?;
        y_cpu.apply_op2(&x_cpu, Atan2)?.to_device(device)
    }
}

/// Creates the trainable `[alphabet_size, NUM_DIHEDRALS]` angle alphabet, initialised
/// uniformly in `[-pi, pi]`.
pub fn create_alphabet_mixtures(vb: &VarBuilder, alphabet_size: usize) -> Result<Tensor> {
    vb.get_with_hints(
        (alphabet_size, NUM_DIHEDRALS),
        "alphabet",
        Init::Uniform { lo: -PI, up: PI },
    )
}

/// Circular mean of the alphabet angles weighted by `weights`.
///
/// `weights`: `[batch, length, alphabet_size]`, `angles`: `[alphabet_size, NUM_DIHEDRALS]`
/// -> `[batch, length, NUM_DIHEDRALS]`
pub fn reduce_mean_angle(weights: &Tensor, angles: &Tensor) -> Result<Tensor> {
    let (_batch, _length, alphabet_size) = weights.dims3()?;
    let (rows, _num_angles) = angles.dims2()?;
    if rows != alphabet_size {
        bail!("alphabet has {rows} entries but weights cover {alphabet_size}");
    }
    let y_coords = weights.broadcast_matmul(&angles.sin()?)?;
    let x_coords = weights.broadcast_matmul(&angles.cos()?)?;
    atan2(&y_coords, &x_coords)
}

/// Converts softmax probabilities over the alphabet into torsion angles.
pub fn alphabet_mixtures_to_torsion_angles(probs: &Tensor, alphabet: &Tensor) -> Result<Tensor> {
    reduce_mean_angle(probs, alphabet)
}
