pub mod fit;
pub mod plot;
pub mod reconstruct;
pub mod submit;

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{Device, Tensor};
use std::collections::HashMap;
use std::path::Path;

pub const TORSION_ANGLES: &str = "torsion_angles";
pub const DISTANCE_MATRIX: &str = "distance_matrix";
pub const COORDINATES: &str = "coordinates";
pub const PHI: &str = "phi";
pub const PSI: &str = "psi";

pub fn load_tensors(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    candle_core::safetensors::load(path, device)
        .with_context(|| format!("failed to read {}", path.display()))
}

pub fn take_tensor(
    tensors: &mut HashMap<String, Tensor>,
    name: &str,
    path: &Path,
) -> Result<Tensor> {
    tensors
        .remove(name)
        .ok_or_else(|| anyhow!("{} has no tensor named {name}", path.display()))
}

pub fn save_tensors(tensors: &HashMap<String, Tensor>, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    candle_core::safetensors::save(tensors, path)
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Falls back to the padded length for every protein when no lengths are given.
///
/// Every given length must lie in `1..=max_len`.
pub fn resolve_lengths(lengths: Vec<usize>, batch: usize, max_len: usize) -> Result<Vec<usize>> {
    if lengths.is_empty() {
        return Ok(vec![max_len; batch]);
    }
    if lengths.len() != batch {
        bail!("{} lengths given for a batch of {batch}", lengths.len());
    }
    if let Some((idx, len)) = lengths
        .iter()
        .enumerate()
        .find(|(_, &len)| len == 0 || len > max_len)
    {
        bail!("length {len} for protein {idx} is outside 1..={max_len}");
    }
    Ok(lengths)
}
