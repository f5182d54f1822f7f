use super::{load_tensors, save_tensors, take_tensor, COORDINATES, DISTANCE_MATRIX, TORSION_ANGLES};
use anyhow::Result;
use ferritin_geometry::{device, DistanceMatrix, GeometryConfig};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub fn execute(
    input: &Path,
    output: &Path,
    num_fragments: usize,
    full_backbone: bool,
    cpu: bool,
) -> Result<()> {
    let device = device(cpu)?;
    let mut tensors = load_tensors(input, &device)?;
    let angles = take_tensor(&mut tensors, TORSION_ANGLES, input)?;

    let layer = DistanceMatrix::new(GeometryConfig {
        num_fragments,
        c_alpha_only: !full_backbone,
        ..Default::default()
    });
    let (dist, coords) = layer.forward(&angles)?;
    info!(
        angles = ?angles.dims(),
        distance_matrix = ?dist.dims(),
        "reconstructed backbone"
    );

    let out = HashMap::from([
        (DISTANCE_MATRIX.to_string(), dist),
        (COORDINATES.to_string(), coords),
    ]);
    save_tensors(&out, output)?;
    info!(path = %output.display(), "wrote reconstruction");
    Ok(())
}
