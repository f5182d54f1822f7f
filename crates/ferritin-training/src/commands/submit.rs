use super::{load_tensors, take_tensor, DISTANCE_MATRIX, PHI, PSI};
use anyhow::Result;
use candle_core::Device;
use ferritin_training::save_submission_from_tensors;
use std::path::Path;

pub fn execute(input: &Path, data_dir: &Path) -> Result<()> {
    let mut tensors = load_tensors(input, &Device::Cpu)?;
    let dm = take_tensor(&mut tensors, DISTANCE_MATRIX, input)?;
    let phi = take_tensor(&mut tensors, PHI, input)?;
    let psi = take_tensor(&mut tensors, PSI, input)?;
    save_submission_from_tensors(&dm, &phi, &psi, data_dir)?;
    Ok(())
}
