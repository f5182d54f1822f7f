//! Gradient-based refinement of torsion angles against a target distance matrix.
//!
//! The angles are the only trainable parameters; the loss is the mean dRMSD between the
//! reconstructed and target distance matrices. This exercises the full differentiable
//! path (angles -> coordinates -> distances -> loss) and the checkpoint/plot glue.
use crate::checkpoint::CkptSaver;
use anyhow::{bail, Context, Result};
use candle_core::{DType, Tensor};
use candle_nn::{AdamW, Init, Optimizer, ParamsAdamW, VarBuilder, VarMap};
use ferritin_geometry::{
    drmsd_dist_matrix, get_distance_matrix, pairwise_mask, rmsd_kaggle, seqlen_tensor,
    GeometryConfig, NUM_DIHEDRALS,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

pub const ANGLES_VAR: &str = "torsion_angles";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    pub epochs: usize,
    pub learning_rate: f64,
    pub weight_decay: f64,
    /// Log every `log_every` epochs.
    pub log_every: usize,
    pub geometry: GeometryConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            learning_rate: 1e-2,
            weight_decay: 0.0,
            log_every: 10,
            geometry: GeometryConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

/// Per-epoch losses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    /// Mean dRMSD of the optimisation step.
    pub train: Vec<f32>,
    /// Length-weighted batch RMSD after the step.
    pub val: Vec<f32>,
}

impl History {
    pub fn push(&mut self, train: f32, val: f32) {
        self.train.push(train);
        self.val.push(val);
    }
}

pub struct TorsionFitter {
    varmap: VarMap,
    angles: Tensor,
    config: TrainConfig,
}

impl TorsionFitter {
    /// Creates trainable angles initialised from `initial` (`[batch, length, 3]`).
    pub fn new(initial: &Tensor, config: TrainConfig) -> Result<Self> {
        let (batch, length, num_dihedrals) = initial.dims3()?;
        if num_dihedrals != NUM_DIHEDRALS {
            bail!("expected {NUM_DIHEDRALS} torsion angles per residue, got {num_dihedrals}");
        }
        let mut varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, initial.device());
        let angles =
            vb.get_with_hints((batch, length, NUM_DIHEDRALS), ANGLES_VAR, Init::Const(0.))?;
        varmap.set_one(ANGLES_VAR, initial.to_dtype(DType::F32)?)?;
        Ok(Self {
            varmap,
            angles,
            config,
        })
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn angles(&self) -> &Tensor {
        &self.angles
    }

    /// Runs `config.epochs` AdamW steps against `target_dm` (`[batch, length, length]`).
    ///
    /// Padding beyond each protein's `seqlen` is masked out of the loss.
    pub fn fit(
        &self,
        target_dm: &Tensor,
        seqlen: &[usize],
        mut saver: Option<&mut CkptSaver>,
    ) -> Result<History> {
        let (batch, length, _) = self.angles.dims3()?;
        if target_dm.dims() != &[batch, length, length] {
            bail!(
                "target distance matrix {:?} does not match angles for {batch} x {length}",
                target_dm.dims()
            );
        }
        if seqlen.len() != batch {
            bail!("{} sequence lengths for a batch of {batch}", seqlen.len());
        }
        if let Some(idx) = seqlen.iter().position(|&len| len == 0) {
            bail!("protein {idx} has a sequence length of 0");
        }

        let device = self.angles.device();
        let target_dm = target_dm.to_dtype(DType::F32)?;
        let weights = pairwise_mask(seqlen, length, DType::F32, device)?;
        let seqlen_t = seqlen_tensor(seqlen, DType::F32, device)?;

        let params = ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: self.config.weight_decay,
            ..Default::default()
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params)?;
        let log_every = self.config.log_every.max(1);

        let mut history = History::default();
        for epoch in 0..self.config.epochs {
            let (dist, _) = get_distance_matrix(&self.angles, &self.config.geometry)?;
            let loss = drmsd_dist_matrix(&dist, &target_dm, &seqlen_t, &weights)?.mean_all()?;
            optimizer.backward_step(&loss)?;
            let train_loss = loss.to_scalar::<f32>()?;

            let (dist, _) = get_distance_matrix(&self.angles.detach(), &self.config.geometry)?;
            let drmsd = drmsd_dist_matrix(&dist, &target_dm, &seqlen_t, &weights)?;
            let eval_loss = rmsd_kaggle(&drmsd, &seqlen_t)?.to_scalar::<f32>()?;
            history.push(train_loss, eval_loss);

            if let Some(saver) = saver.as_deref_mut() {
                saver.update(epoch, eval_loss as f64)?;
            }
            if epoch % log_every == 0 {
                info!(epoch, train_loss, eval_loss, "torsion fit");
            } else {
                debug!(epoch, train_loss, eval_loss, "torsion fit");
            }
        }
        Ok(history)
    }
}

/// Fits free torsion angles starting from `initial` and returns the loss history together
/// with the fitted `[batch, length, 3]` angles.
///
/// With a `work_dir`, the best angles are checkpointed there as training goes.
pub fn fit_torsion_angles(
    initial: &Tensor,
    target_dm: &Tensor,
    seqlen: &[usize],
    config: TrainConfig,
    work_dir: Option<&Path>,
) -> Result<(History, Tensor)> {
    let fitter = TorsionFitter::new(initial, config)?;
    let mut saver = match work_dir {
        Some(dir) => Some(CkptSaver::new(dir, fitter.varmap().clone())?),
        None => None,
    };
    let history = fitter.fit(target_dm, seqlen, saver.as_mut())?;
    Ok((history, fitter.angles().detach()))
}
