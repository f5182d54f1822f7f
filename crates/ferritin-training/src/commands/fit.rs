use super::{
    load_tensors, resolve_lengths, save_tensors, take_tensor, DISTANCE_MATRIX, TORSION_ANGLES,
};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use ferritin_geometry::{device, get_distance_matrix, NUM_DIHEDRALS};
use ferritin_training::{fit_torsion_angles, plot_train_val, TrainConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f32::consts::PI;
use std::fs;
use std::path::PathBuf;
use tracing::info;

pub const HISTORY_PLOT: &str = "history.svg";
pub const HISTORY_FILE: &str = "history.json";
pub const FITTED_FILE: &str = "fitted.safetensors";

pub struct FitArgs {
    pub target: PathBuf,
    pub work_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub init: Option<PathBuf>,
    pub lengths: Vec<usize>,
    pub seed: u64,
    pub cpu: bool,
}

fn random_angles(shape: (usize, usize), seed: u64, device: &Device) -> Result<Tensor> {
    let (batch, length) = shape;
    let mut rng = StdRng::seed_from_u64(seed);
    let values: Vec<f32> = (0..batch * length * NUM_DIHEDRALS)
        .map(|_| rng.gen_range(-PI..PI))
        .collect();
    Ok(Tensor::from_vec(values, (batch, length, NUM_DIHEDRALS), device)?)
}

pub fn execute(args: FitArgs) -> Result<()> {
    let device = device(args.cpu)?;
    let config = match &args.config {
        Some(path) => TrainConfig::from_json_file(path)?,
        None => TrainConfig::default(),
    };

    let target_dm = take_tensor(
        &mut load_tensors(&args.target, &device)?,
        DISTANCE_MATRIX,
        &args.target,
    )?
    .to_dtype(DType::F32)?;
    let (batch, length, _) = target_dm.dims3()?;
    let lengths = resolve_lengths(args.lengths, batch, length)?;

    let initial = match &args.init {
        Some(path) => take_tensor(&mut load_tensors(path, &device)?, TORSION_ANGLES, path)?,
        None => random_angles((batch, length), args.seed, &device)?,
    };

    info!(batch, length, epochs = config.epochs, "fitting torsion angles");
    let geometry = config.geometry.clone();
    let (history, angles) = fit_torsion_angles(
        &initial,
        &target_dm,
        &lengths,
        config,
        Some(args.work_dir.as_path()),
    )?;

    plot_train_val(
        &history.train,
        &history.val,
        Some("dRMSD"),
        args.work_dir.join(HISTORY_PLOT),
    )?;
    fs::write(
        args.work_dir.join(HISTORY_FILE),
        serde_json::to_string_pretty(&history)?,
    )?;

    let (dist, _) = get_distance_matrix(&angles, &geometry)?;
    let fitted = HashMap::from([
        (TORSION_ANGLES.to_string(), angles),
        (DISTANCE_MATRIX.to_string(), dist),
    ]);
    let fitted_path = args.work_dir.join(FITTED_FILE);
    save_tensors(&fitted, &fitted_path)?;
    info!(
        final_eval = ?history.val.last(),
        path = %fitted_path.display(),
        "finished fit"
    );
    Ok(())
}
