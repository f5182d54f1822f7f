//! Best-model checkpointing.
//!
//! Both savers keep the best evaluation loss seen so far and write a new checkpoint
//! whenever a loss is at least as good as it.
use anyhow::{Context, Result};
use candle_nn::VarMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CKPT_PREFIX: &str = "model.ckpt-";
const CKPT_SUFFIX: &str = ".safetensors";

/// Anything that can write its weights to a single file.
pub trait SaveModel {
    fn save_model(&self, path: &Path) -> Result<()>;
}

impl SaveModel for VarMap {
    fn save_model(&self, path: &Path) -> Result<()> {
        self.save(path)
            .with_context(|| format!("failed to save weights to {}", path.display()))
    }
}

/// Sidecar written next to every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub epoch: usize,
    pub eval_loss: Option<f64>,
}

#[derive(Debug, Clone, Default)]
struct BestEval(Option<f64>);

impl BestEval {
    /// Records `eval_loss` and returns true when it is no worse than the best so far.
    fn update(&mut self, eval_loss: f64) -> bool {
        let improved = self.0.map_or(true, |best| best >= eval_loss);
        if improved {
            self.0 = Some(eval_loss);
        }
        improved
    }
}

/// Saves the variables of a `VarMap` as `model.ckpt-{epoch}.safetensors`.
pub struct CkptSaver {
    work_dir: PathBuf,
    varmap: VarMap,
    best_eval: BestEval,
}

impl CkptSaver {
    pub fn new(work_dir: impl AsRef<Path>, varmap: VarMap) -> Result<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();
        fs::create_dir_all(&work_dir)
            .with_context(|| format!("failed to create {}", work_dir.display()))?;
        Ok(Self {
            work_dir,
            varmap,
            best_eval: BestEval::default(),
        })
    }

    pub fn best_eval(&self) -> Option<f64> {
        self.best_eval.0
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Saves a checkpoint when `eval_loss` matches or beats the best loss so far.
    pub fn update(&mut self, epoch: usize, eval_loss: f64) -> Result<Option<PathBuf>> {
        if self.best_eval.update(eval_loss) {
            info!(epoch, eval_loss, "new best evaluation loss");
            self.save(epoch, Some(eval_loss)).map(Some)
        } else {
            debug!(epoch, eval_loss, best = ?self.best_eval.0, "no improvement");
            Ok(None)
        }
    }

    /// Writes the checkpoint for `epoch`; `eval_loss` is recorded in the sidecar as given.
    pub fn save(&self, epoch: usize, eval_loss: Option<f64>) -> Result<PathBuf> {
        let path = checkpoint_path(&self.work_dir, epoch);
        self.varmap.save_model(&path)?;

        let meta = CheckpointMeta { epoch, eval_loss };
        fs::write(path.with_extension("json"), serde_json::to_string_pretty(&meta)?)?;
        info!(path = %path.display(), "saved checkpoint");
        Ok(path)
    }

    /// Loads the values stored in `ckpt_path` into the tracked variables.
    pub fn restore(&mut self, ckpt_path: impl AsRef<Path>) -> Result<()> {
        let ckpt_path = ckpt_path.as_ref();
        self.varmap
            .load(ckpt_path)
            .with_context(|| format!("failed to restore {}", ckpt_path.display()))?;
        info!(path = %ckpt_path.display(), "restored checkpoint");
        Ok(())
    }
}

/// Saves a whole model through its own `SaveModel` impl as `model-{epoch}.safetensors`.
pub struct ModelSaver<M: SaveModel> {
    work_dir: PathBuf,
    model: M,
    best_eval: BestEval,
}

impl<M: SaveModel> ModelSaver<M> {
    pub fn new(work_dir: impl AsRef<Path>, model: M) -> Result<Self> {
        let work_dir = work_dir.as_ref().to_path_buf();
        fs::create_dir_all(&work_dir)?;
        Ok(Self {
            work_dir,
            model,
            best_eval: BestEval::default(),
        })
    }

    pub fn best_eval(&self) -> Option<f64> {
        self.best_eval.0
    }

    pub fn update(&mut self, epoch: usize, eval_loss: f64) -> Result<Option<PathBuf>> {
        if self.best_eval.update(eval_loss) {
            self.save(epoch).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn save(&self, epoch: usize) -> Result<PathBuf> {
        let path = self.work_dir.join(format!("model-{epoch}.safetensors"));
        self.model.save_model(&path)?;
        Ok(path)
    }
}

pub fn checkpoint_path(work_dir: &Path, epoch: usize) -> PathBuf {
    work_dir.join(format!("{CKPT_PREFIX}{epoch}{CKPT_SUFFIX}"))
}

/// The checkpoint with the highest epoch in `work_dir`, if any.
pub fn latest_checkpoint(work_dir: impl AsRef<Path>) -> Result<Option<PathBuf>> {
    let mut latest: Option<(usize, PathBuf)> = None;
    for entry in fs::read_dir(work_dir.as_ref())? {
        let path = entry?.path();
        let epoch = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(CKPT_PREFIX))
            .and_then(|rest| rest.strip_suffix(CKPT_SUFFIX))
            .and_then(|epoch| epoch.parse::<usize>().ok());
        if let Some(epoch) = epoch {
            if latest.as_ref().map_or(true, |(best, _)| epoch > *best) {
                latest = Some((epoch, path));
            }
        }
    }
    Ok(latest.map(|(_, path)| path))
}
