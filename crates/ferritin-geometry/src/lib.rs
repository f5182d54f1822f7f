//! ferritin-geometry
//!
//! Differentiable protein backbone geometry on top of candle.
//!
//! - torsion angles -> backbone coordinates -> pairwise distance matrices
//! - a learned alphabet of angles for mixture-style angle prediction
//! - structural losses (dRMSD, torsion RMSD) and host-side metrics
//!
//! ```ignore
//! use ferritin_geometry::{get_distance_matrix, GeometryConfig};
//! let (dist, coords) = get_distance_matrix(&torsion_angles, &GeometryConfig::default())?;
//! ```
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{Device, Result, Tensor};

pub mod angles;
pub mod constants;
pub mod geometry;
pub mod layers;
pub mod losses;
pub mod metrics;

pub use angles::{
    alphabet_mixtures_to_torsion_angles, atan2, create_alphabet_mixtures, reduce_mean_angle,
};
pub use constants::{Dihedral, NUM_DIHEDRALS, NUM_DIMENSIONS};
pub use geometry::{
    coordinates_to_dist_matrix, dihedral_to_point, get_distance_matrix, point_to_coordinate,
    reduce_l2_norm, torsion_angles_to_coordinates, GeometryConfig,
};
pub use layers::{DistanceMatrix, TorsionAngles};
pub use losses::{
    drmsd_dist_matrix, pairwise_mask, rmsd_kaggle, rmsd_torsion_angle, seqlen_tensor,
    sequence_mask,
};
pub use metrics::{mse_dist_matrix, mse_torsion_angle, MetricError};

pub fn device(cpu: bool) -> Result<Device> {
    if cpu {
        Ok(Device::Cpu)
    } else if cuda_is_available() {
        Ok(Device::new_cuda(0)?)
    } else if metal_is_available() {
        Ok(Device::new_metal(0)?)
    } else {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        {
            tracing::info!("Running on CPU, to run on GPU(metal), build with `--features metal`");
        }
        #[cfg(not(all(target_os = "macos", target_arch = "aarch64")))]
        {
            tracing::info!("Running on CPU, to run on GPU, build with `--features cuda`");
        }
        Ok(Device::Cpu)
    }
}

/// Uniform `[lo, hi)` samples from a fixed seed, so test failures can be replayed.
#[cfg(test)]
pub(crate) fn seeded_uniform(shape: &[usize], lo: f32, hi: f32, seed: u64) -> Result<Tensor> {
    use rand::{rngs::StdRng, Rng, SeedableRng};
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..shape.iter().product::<usize>())
        .map(|_| rng.gen_range(lo..hi))
        .collect();
    Tensor::from_vec(values, shape, &Device::Cpu)
}
