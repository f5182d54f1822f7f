use crate::angles::{alphabet_mixtures_to_torsion_angles, create_alphabet_mixtures};
use crate::geometry::{get_distance_matrix, GeometryConfig};
use candle_core::{Result, Tensor};
use candle_nn::{Module, VarBuilder};

/// Converts torsion angles into a distance matrix (and the coordinates it was built from)
/// using the differentiable reconstruction.
#[derive(Debug, Clone, Default)]
pub struct DistanceMatrix {
    config: GeometryConfig,
}

impl DistanceMatrix {
    pub fn new(config: GeometryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    /// `[batch, length, 3]` angles -> (`[batch, length, length]`, `[batch, length, 3]`)
    pub fn forward(&self, torsion_angles: &Tensor) -> Result<(Tensor, Tensor)> {
        get_distance_matrix(torsion_angles, &self.config)
    }
}

/// Computes torsion angles from softmax probabilities over a learned alphabet of angles,
/// as an alternative to predicting the angles directly.
#[derive(Debug, Clone)]
pub struct TorsionAngles {
    alphabet: Tensor,
}

impl TorsionAngles {
    pub fn new(vb: VarBuilder, alphabet_size: usize) -> Result<Self> {
        let alphabet = create_alphabet_mixtures(&vb, alphabet_size)?;
        Ok(Self { alphabet })
    }

    pub fn alphabet(&self) -> &Tensor {
        &self.alphabet
    }
}

impl Module for TorsionAngles {
    fn forward(&self, probs: &Tensor) -> Result<Tensor> {
        alphabet_mixtures_to_torsion_angles(probs, &self.alphabet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_ALPHABET_SIZE;
    use crate::seeded_uniform;
    use candle_core::{DType, Device, D};
    use candle_nn::ops::softmax;
    use candle_nn::VarMap;

    #[test]
    fn test_probabilities_to_distances() -> Result<()> {
        let device = Device::Cpu;
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let torsion = TorsionAngles::new(vb.pp("torsion"), DEFAULT_ALPHABET_SIZE)?;
        varmap.set_one(
            "torsion.alphabet",
            seeded_uniform(&[DEFAULT_ALPHABET_SIZE, 3], -3.0, 3.0, 20)?,
        )?;
        let distance = DistanceMatrix::default();

        let logits = seeded_uniform(&[2, 12, DEFAULT_ALPHABET_SIZE], -2.0, 2.0, 21)?;
        let probs = softmax(&logits, D::Minus1)?;
        let angles = torsion.forward(&probs)?;
        assert_eq!(angles.dims(), &[2, 12, 3]);

        let (dist, coords) = distance.forward(&angles)?;
        assert_eq!(dist.dims(), &[2, 12, 12]);
        assert_eq!(coords.dims(), &[2, 12, 3]);

        // the loss reaches the alphabet through atan2 and the reconstruction
        let grads = dist.mean_all()?.backward()?;
        let alphabet_grad = grads
            .get(torsion.alphabet())
            .expect("alphabet should receive a gradient");
        let values = alphabet_grad.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(values.iter().any(|v| v.abs() > 0.0));
        Ok(())
    }
}
