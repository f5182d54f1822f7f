//! Differentiable backbone reconstruction.
//!
//! Torsion angles are turned into local-frame points (`dihedral_to_point`), the points are
//! chained into Cartesian coordinates (`point_to_coordinate`) and the coordinates are reduced
//! to pairwise distance matrices. Every step is a candle tensor op so gradients flow back to
//! the angles.
//!
//! Shapes follow the batch-first convention at the public boundary:
//!
//! - torsion angles: `[batch, length, NUM_DIHEDRALS]`
//! - coordinates:    `[batch, length, NUM_DIMENSIONS]`
//! - distances:      `[batch, length, length]`
//!
//! `dihedral_to_point` and `point_to_coordinate` work step-first (`[steps, batch, ...]`).
use crate::constants::{
    BackboneAtom, BOND_ANGLES, BOND_LENGTHS, DEFAULT_EPSILON, DEFAULT_NUM_FRAGMENTS,
    NUM_DIHEDRALS, NUM_DIMENSIONS,
};
use candle_core::{bail, DType, Device, IndexOp, Result, Tensor, D};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Number of chain fragments extended in parallel before being stitched together.
    pub num_fragments: usize,
    /// Keep only the C-alpha atom of each residue.
    pub c_alpha_only: bool,
    pub epsilon: f64,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            num_fragments: DEFAULT_NUM_FRAGMENTS,
            c_alpha_only: true,
            epsilon: DEFAULT_EPSILON,
        }
    }
}

/// `sqrt(sum(weights * t^2) + eps)` over `dims`. The reduced dims are removed.
pub fn reduce_l2_norm(
    t: &Tensor,
    dims: &[usize],
    weights: Option<&Tensor>,
    eps: f64,
) -> Result<Tensor> {
    let squares = t.sqr()?;
    let weighted = match weights {
        Some(w) => squares.broadcast_mul(w)?,
        None => squares,
    };
    (weighted.sum(dims.to_vec())? + eps)?.sqrt()
}

/// Unit vectors along the last dim. Zero vectors stay zero.
pub fn l2_normalize(t: &Tensor, eps: f64) -> Result<Tensor> {
    let norm = t.sqr()?.sum_keepdim(D::Minus1)?.maximum(eps)?.sqrt()?;
    t.broadcast_div(&norm)
}

/// Cross product along the last dim, broadcasting the leading dims.
pub fn cross(u: &Tensor, v: &Tensor) -> Result<Tensor> {
    let component = |t: &Tensor, idx: usize| t.narrow(D::Minus1, idx, 1);
    let (u0, u1, u2) = (component(u, 0)?, component(u, 1)?, component(u, 2)?);
    let (v0, v1, v2) = (component(v, 0)?, component(v, 1)?, component(v, 2)?);

    let c0 = u1.broadcast_mul(&v2)?.broadcast_sub(&u2.broadcast_mul(&v1)?)?;
    let c1 = u2.broadcast_mul(&v0)?.broadcast_sub(&u0.broadcast_mul(&v2)?)?;
    let c2 = u0.broadcast_mul(&v1)?.broadcast_sub(&u1.broadcast_mul(&v0)?)?;
    Tensor::cat(&[&c0, &c1, &c2], D::Minus1)
}

/// The three most recently placed atoms; the next atom is built in their frame.
#[derive(Clone, Debug)]
pub struct Triplet {
    pub a: Tensor,
    pub b: Tensor,
    pub c: Tensor,
    /// Floor for squared norms when building the local frame.
    pub eps: f64,
}

impl Triplet {
    /// Canonical starting frame. Its local basis is the identity and `c` is the origin,
    /// so coordinates built from it can later be moved into any other frame with `extend`.
    pub fn initial(
        num_fragments: usize,
        batch: usize,
        dtype: DType,
        device: &Device,
        eps: f64,
    ) -> Result<Self> {
        let row = |v: [f32; 3]| -> Result<Tensor> {
            Tensor::new(&v, device)?
                .to_dtype(dtype)?
                .broadcast_as((num_fragments, batch, NUM_DIMENSIONS))?
                .contiguous()
        };
        Ok(Self {
            a: row([-(0.5f32).sqrt(), (1.5f32).sqrt(), 0.0])?,
            b: row([-(2.0f32).sqrt(), 0.0, 0.0])?,
            c: row([0.0, 0.0, 0.0])?,
            eps,
        })
    }

    /// Places `points` (local frame, last dim = 3) relative to this triplet.
    ///
    /// `points` may carry extra leading dims; the triplet is broadcast over them.
    pub fn extend(&self, points: &Tensor) -> Result<Tensor> {
        let eps = self.eps;
        let bc = l2_normalize(&self.c.broadcast_sub(&self.b)?, eps)?;
        let n = l2_normalize(&cross(&self.b.broadcast_sub(&self.a)?, &bc)?, eps)?;
        let n_bc = cross(&n, &bc)?;

        let px = points.narrow(D::Minus1, 0, 1)?;
        let py = points.narrow(D::Minus1, 1, 1)?;
        let pz = points.narrow(D::Minus1, 2, 1)?;

        px.broadcast_mul(&bc)?
            .broadcast_add(&py.broadcast_mul(&n_bc)?)?
            .broadcast_add(&pz.broadcast_mul(&n)?)?
            .broadcast_add(&self.c)
    }

    fn advance(self, next: Tensor) -> Self {
        Self {
            a: self.b,
            b: self.c,
            c: next,
            eps: self.eps,
        }
    }

    /// Selects one fragment's triplet from `[fragments, batch, 3]` components.
    fn fragment(&self, idx: usize) -> Result<Self> {
        Ok(Self {
            a: self.a.i(idx)?,
            b: self.b.i(idx)?,
            c: self.c.i(idx)?,
            eps: self.eps,
        })
    }
}

/// Converts dihedrals `[steps, batch, NUM_DIHEDRALS]` into local-frame points
/// `[steps * NUM_DIHEDRALS, batch, NUM_DIMENSIONS]`, residue-major then dihedral.
pub fn dihedral_to_point(dihedral: &Tensor) -> Result<Tensor> {
    let (steps, batch, num_dihedrals) = dihedral.dims3()?;
    if num_dihedrals != NUM_DIHEDRALS {
        bail!("expected {NUM_DIHEDRALS} dihedrals per residue, got {num_dihedrals}");
    }
    let device = dihedral.device();
    let dtype = dihedral.dtype();

    let (r_cos_theta, r_sin_theta): (Vec<f32>, Vec<f32>) = BOND_LENGTHS
        .iter()
        .zip(BOND_ANGLES.iter())
        .map(|(r, theta)| (r * (PI - theta).cos(), r * (PI - theta).sin()))
        .unzip();
    let r_cos_theta = Tensor::new(r_cos_theta.as_slice(), device)?.to_dtype(dtype)?;
    let r_sin_theta = Tensor::new(r_sin_theta.as_slice(), device)?.to_dtype(dtype)?;

    let pt_x = r_cos_theta
        .broadcast_as((steps, batch, NUM_DIHEDRALS))?
        .contiguous()?;
    let pt_y = dihedral.cos()?.broadcast_mul(&r_sin_theta)?;
    let pt_z = dihedral.sin()?.broadcast_mul(&r_sin_theta)?;

    // [steps, batch, dihedrals, dims] -> [steps, dihedrals, batch, dims]
    let pt = Tensor::stack(&[pt_x, pt_y, pt_z], 3)?;
    pt.transpose(1, 2)?
        .reshape((steps * NUM_DIHEDRALS, batch, NUM_DIMENSIONS))
}

/// Chains local-frame points `[steps, batch, 3]` into coordinates `[steps, batch, 3]`.
///
/// The chain is cut into `num_fragments` pieces that are extended in parallel from the
/// canonical frame; the pieces are then stitched together back to front. The first atom is
/// always the origin. `eps` floors the squared norms used to build each frame.
pub fn point_to_coordinate(points: &Tensor, num_fragments: usize, eps: f64) -> Result<Tensor> {
    let (steps, batch, dims) = points.dims3()?;
    if dims != NUM_DIMENSIONS {
        bail!("expected {NUM_DIMENSIONS}D points, got {dims}");
    }
    if steps == 0 {
        bail!("cannot build coordinates for an empty chain");
    }
    if num_fragments == 0 {
        bail!("num_fragments must be at least 1");
    }

    let padding = (num_fragments - steps % num_fragments) % num_fragments;
    let padded = if padding > 0 {
        points.pad_with_zeros(0, 0, padding)?
    } else {
        points.clone()
    };
    let fragment_size = (steps + padding) / num_fragments;

    // [fragment_size, num_fragments, batch, dims]
    let padded = padded
        .reshape((num_fragments, fragment_size, batch, NUM_DIMENSIONS))?
        .transpose(0, 1)?;

    let mut tri = Triplet::initial(num_fragments, batch, points.dtype(), points.device(), eps)?;
    let mut placed = Vec::with_capacity(fragment_size);
    for step in 0..fragment_size {
        let coord = tri.extend(&padded.i(step)?)?;
        tri = tri.advance(coord.clone());
        placed.push(coord);
    }

    // [num_fragments, fragment_size, batch, dims]
    let pretrans = Tensor::stack(&placed, 0)?.transpose(0, 1)?;

    let mut coords = pretrans.i(num_fragments - 1)?;
    for fragment in (0..num_fragments - 1).rev() {
        let transformed = tri.fragment(fragment)?.extend(&coords)?;
        coords = Tensor::cat(&[&pretrans.i(fragment)?, &transformed], 0)?;
    }

    // drop the last atom and put the origin in front
    coords.narrow(0, 0, steps - 1)?.pad_with_zeros(0, 1, 0)
}

/// Torsion angles `[batch, length, 3]` to coordinates.
///
/// Returns `[batch, length, 3]` C-alpha coordinates, or `[batch, 3 * length, 3]` backbone
/// coordinates (N, CA, C per residue) when `c_alpha_only` is off.
pub fn torsion_angles_to_coordinates(
    torsion_angles: &Tensor,
    config: &GeometryConfig,
) -> Result<Tensor> {
    let (batch, length, num_dihedrals) = torsion_angles.dims3()?;
    if num_dihedrals != NUM_DIHEDRALS {
        bail!("expected torsion angles with {NUM_DIHEDRALS} dihedrals, got {num_dihedrals}");
    }

    let dihedral = torsion_angles.transpose(0, 1)?;
    let points = dihedral_to_point(&dihedral)?;
    let coords = point_to_coordinate(&points, config.num_fragments, config.epsilon)?;

    let coords = if config.c_alpha_only {
        coords
            .reshape((length, NUM_DIHEDRALS, batch, NUM_DIMENSIONS))?
            .i((.., BackboneAtom::CA.to_index()))?
    } else {
        coords
    };
    coords.transpose(0, 1)?.contiguous()
}

/// Pairwise distances between all coordinates, element-wise over the batch.
///
/// `coords`: `[batch, length, 3]` -> `[batch, length, length]`
pub fn coordinates_to_dist_matrix(coords: &Tensor, eps: f64) -> Result<Tensor> {
    let (_batch, _length, dims) = coords.dims3()?;
    if dims != NUM_DIMENSIONS {
        bail!("expected {NUM_DIMENSIONS}D coordinates, got {dims}");
    }
    let diffs = coords.unsqueeze(2)?.broadcast_sub(&coords.unsqueeze(1)?)?;
    reduce_l2_norm(&diffs, &[3], None, eps)
}

/// Torsion angles to `(distance_matrix, coordinates)`.
pub fn get_distance_matrix(
    torsion_angles: &Tensor,
    config: &GeometryConfig,
) -> Result<(Tensor, Tensor)> {
    let coordinates = torsion_angles_to_coordinates(torsion_angles, config)?;
    let dist = coordinates_to_dist_matrix(&coordinates, config.epsilon)?;
    Ok((dist, coordinates))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seeded_uniform;
    use candle_core::Var;

    fn random_angles(batch: usize, length: usize, seed: u64) -> Result<Tensor> {
        seeded_uniform(&[batch, length, NUM_DIHEDRALS], -PI, PI, seed)
    }

    /// Every residue gets the same `[phi, psi, omega]`.
    fn repeated_angles(length: usize, dihedrals: [f32; 3]) -> Result<Tensor> {
        let values: Vec<f32> = dihedrals.iter().copied().cycle().take(length * 3).collect();
        Tensor::from_vec(values, (1, length, NUM_DIHEDRALS), &Device::Cpu)
    }

    fn norm(a: &[f64], b: &[f64]) -> f64 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (x - y).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    fn angle_at(a: &[f64], b: &[f64], c: &[f64]) -> f64 {
        let u: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
        let v: Vec<f64> = c.iter().zip(b).map(|(x, y)| x - y).collect();
        let dot: f64 = u.iter().zip(&v).map(|(x, y)| x * y).sum();
        (dot / (norm(a, b) * norm(c, b))).acos()
    }

    fn backbone(angles: &Tensor, num_fragments: usize) -> Result<Vec<Vec<Vec<f64>>>> {
        let config = GeometryConfig {
            num_fragments,
            c_alpha_only: false,
            ..Default::default()
        };
        torsion_angles_to_coordinates(&angles.to_dtype(DType::F64)?, &config)?.to_vec3::<f64>()
    }

    #[test]
    fn test_cross_product() -> Result<()> {
        let x = Tensor::new(&[[1f32, 0., 0.]], &Device::Cpu)?;
        let y = Tensor::new(&[[0f32, 1., 0.]], &Device::Cpu)?;
        let z = cross(&x, &y)?.to_vec2::<f32>()?;
        assert_eq!(z, vec![vec![0., 0., 1.]]);
        Ok(())
    }

    #[test]
    fn test_reduce_l2_norm_weights() -> Result<()> {
        let t = Tensor::new(&[[3f32, 4.], [1., 1.]], &Device::Cpu)?;
        let w = Tensor::new(&[[1f32, 1.], [0., 0.]], &Device::Cpu)?;
        let norms = reduce_l2_norm(&t, &[1], Some(&w), 0.0)?.to_vec1::<f32>()?;
        assert!((norms[0] - 5.0).abs() < 1e-6);
        assert!(norms[1].abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_dihedral_to_point_shape() -> Result<()> {
        let angles = random_angles(2, 5, 11)?.transpose(0, 1)?;
        let points = dihedral_to_point(&angles)?;
        assert_eq!(points.dims(), &[15, 2, 3]);

        // every local point sits one bond length away from the previous atom
        let points = points.to_vec3::<f32>()?;
        for (idx, step) in points.iter().enumerate() {
            for p in step {
                let r = (p[0].powi(2) + p[1].powi(2) + p[2].powi(2)).sqrt();
                assert!((r - BOND_LENGTHS[idx % NUM_DIHEDRALS]).abs() < 1e-2);
            }
        }
        Ok(())
    }

    #[test]
    fn test_backbone_bond_geometry() -> Result<()> {
        let angles = random_angles(2, 7, 12)?;
        for chain in backbone(&angles, DEFAULT_NUM_FRAGMENTS)? {
            assert_eq!(chain.len(), 21);
            assert!(chain[0].iter().all(|v| v.abs() < 1e-9));
            for k in 0..chain.len() - 1 {
                let bond = norm(&chain[k], &chain[k + 1]);
                let expected = BOND_LENGTHS[k % NUM_DIHEDRALS] as f64;
                assert!(
                    (bond - expected).abs() < 1e-3,
                    "bond {k}: {bond} != {expected}"
                );
            }
            for k in 1..chain.len() - 1 {
                let angle = angle_at(&chain[k - 1], &chain[k], &chain[k + 1]);
                let expected = BOND_ANGLES[k % NUM_DIHEDRALS] as f64;
                assert!((angle - expected).abs() < 1e-4, "angle {k}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_fragment_count_does_not_change_structure() -> Result<()> {
        let angles = random_angles(3, 10, 13)?;
        let sequential = backbone(&angles, 1)?;
        for num_fragments in [2, 4, 6, 7, 40] {
            let parallel = backbone(&angles, num_fragments)?;
            for (chain_a, chain_b) in sequential.iter().zip(parallel.iter()) {
                for (a, b) in chain_a.iter().zip(chain_b.iter()) {
                    assert!(norm(a, b) < 1e-6, "fragments={num_fragments}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_calpha_selection() -> Result<()> {
        let angles = random_angles(1, 4, 14)?;
        let full = backbone(&angles, 3)?;
        let config = GeometryConfig {
            num_fragments: 3,
            ..Default::default()
        };
        let calpha = torsion_angles_to_coordinates(&angles.to_dtype(DType::F64)?, &config)?;
        assert_eq!(calpha.dims(), &[1, 4, 3]);
        let calpha = calpha.to_vec3::<f64>()?;
        for residue in 0..4 {
            let expected = &full[0][residue * NUM_DIHEDRALS + BackboneAtom::CA.to_index()];
            assert!(norm(&calpha[0][residue], expected) < 1e-9);
        }
        Ok(())
    }

    #[test]
    fn test_distance_matrix() -> Result<()> {
        let angles = random_angles(2, 6, 15)?;
        let (dist, coords) = get_distance_matrix(&angles, &GeometryConfig::default())?;
        assert_eq!(dist.dims(), &[2, 6, 6]);
        assert_eq!(coords.dims(), &[2, 6, 3]);

        let dist = dist.to_vec3::<f32>()?;
        let coords = coords.to_vec3::<f32>()?;
        for (b, matrix) in dist.iter().enumerate() {
            for i in 0..6 {
                assert!(matrix[i][i] < 1e-3);
                for j in 0..6 {
                    assert!((matrix[i][j] - matrix[j][i]).abs() < 1e-3);
                    let expected = coords[b][i]
                        .iter()
                        .zip(coords[b][j].iter())
                        .map(|(x, y)| (x - y).powi(2))
                        .sum::<f32>()
                        .sqrt();
                    assert!((matrix[i][j] - expected).abs() < 1e-2);
                }
            }
            // the C-alpha spacing spans 277 pm (phi = 0) to 380 pm (phi = pi)
            for i in 0..5 {
                let spacing = matrix[i][i + 1];
                assert!((270.0..390.0).contains(&spacing), "spacing {spacing}");
            }
        }
        Ok(())
    }

    #[test]
    fn test_calpha_spacing_follows_phi() -> Result<()> {
        for (phi, expected) in [(0.0, 277.005f32), (PI / 2.0, 332.631), (PI, 380.204)] {
            // psi does not move the next C-alpha
            for psi in [0.0, 1.0, PI] {
                let angles = repeated_angles(4, [phi, psi, PI])?;
                let (dist, _) = get_distance_matrix(&angles, &GeometryConfig::default())?;
                let dist = dist.to_vec3::<f32>()?;
                for i in 0..3 {
                    let spacing = dist[0][i][i + 1];
                    assert!(
                        (spacing - expected).abs() < 0.05,
                        "phi={phi} psi={psi}: {spacing} != {expected}"
                    );
                }
            }
        }
        Ok(())
    }

    #[test]
    fn test_epsilon_reaches_frame_construction() -> Result<()> {
        let angles = random_angles(1, 4, 17)?;
        let default = torsion_angles_to_coordinates(&angles, &GeometryConfig::default())?;
        // far above the squared bond lengths, so every frame axis is shrunk
        let coarse = GeometryConfig {
            epsilon: 1e6,
            ..Default::default()
        };
        let shrunk = torsion_angles_to_coordinates(&angles, &coarse)?;
        let diff = default.sub(&shrunk)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff > 1.0, "epsilon had no effect: {diff}");
        Ok(())
    }

    #[test]
    fn test_gradients_reach_angles() -> Result<()> {
        let angles = Var::from_tensor(&random_angles(2, 9, 16)?)?;
        let (dist, _) = get_distance_matrix(angles.as_tensor(), &GeometryConfig::default())?;
        let loss = dist.sum_all()?;
        let grads = loss.backward()?;
        let grad = grads
            .get(angles.as_tensor())
            .expect("angles should receive a gradient");
        assert_eq!(grad.dims(), &[2, 9, 3]);
        let values = grad.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(values.iter().any(|v| v.abs() > 0.0));
        Ok(())
    }

    #[test]
    fn test_rejects_bad_input() -> Result<()> {
        let bad = Tensor::zeros((1, 4, 2), DType::F32, &Device::Cpu)?;
        assert!(torsion_angles_to_coordinates(&bad, &GeometryConfig::default()).is_err());
        let points = Tensor::zeros((6, 1, 3), DType::F32, &Device::Cpu)?;
        assert!(point_to_coordinate(&points, 0, DEFAULT_EPSILON).is_err());
        let empty = Tensor::zeros((0, 1, 3), DType::F32, &Device::Cpu)?;
        assert!(point_to_coordinate(&empty, 2, DEFAULT_EPSILON).is_err());
        Ok(())
    }

    #[test]
    fn test_config_defaults_from_json() {
        let config: GeometryConfig = serde_json::from_str(r#"{"num_fragments": 4}"#).unwrap();
        assert_eq!(config.num_fragments, 4);
        assert!(config.c_alpha_only);
        assert_eq!(config.epsilon, DEFAULT_EPSILON);
    }
}
