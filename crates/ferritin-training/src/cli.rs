use super::commands;
use clap::{Parser, Subcommand};
use ferritin_geometry::constants::DEFAULT_NUM_FRAGMENTS;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rebuild backbone coordinates and distance matrices from torsion angles.
    Reconstruct {
        /// safetensors file holding `torsion_angles` [batch, length, 3]
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = DEFAULT_NUM_FRAGMENTS)]
        num_fragments: usize,
        /// Distances between all backbone atoms instead of C-alpha only
        #[arg(long)]
        full_backbone: bool,
        #[arg(long)]
        cpu: bool,
    },
    /// Write `submission.csv` for the proteins listed in `DATA_DIR/test.csv`.
    Submit {
        /// safetensors file holding `distance_matrix`, `phi` and `psi`
        #[arg(short, long)]
        input: PathBuf,
        #[arg(short, long)]
        data_dir: PathBuf,
    },
    /// Heatmaps of predicted against ground-truth distance matrices.
    PlotDist {
        #[arg(long)]
        pred: PathBuf,
        #[arg(long)]
        gt: PathBuf,
        #[arg(long, value_delimiter = ',')]
        names: Vec<String>,
        /// Protein lengths; defaults to the padded length
        #[arg(long, value_delimiter = ',')]
        lengths: Vec<usize>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Refine torsion angles against a target distance matrix.
    Fit {
        /// safetensors file holding `distance_matrix` [batch, length, length]
        #[arg(short, long)]
        target: PathBuf,
        #[arg(short, long)]
        work_dir: PathBuf,
        /// JSON training config
        #[arg(long)]
        config: Option<PathBuf>,
        /// Starting angles; random when omitted
        #[arg(long)]
        init: Option<PathBuf>,
        #[arg(long, value_delimiter = ',')]
        lengths: Vec<usize>,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long)]
        cpu: bool,
    },
}

impl Cli {
    pub fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Reconstruct {
                input,
                output,
                num_fragments,
                full_backbone,
                cpu,
            } => {
                commands::reconstruct::execute(&input, &output, num_fragments, full_backbone, cpu)
            }
            Commands::Submit { input, data_dir } => commands::submit::execute(&input, &data_dir),
            Commands::PlotDist {
                pred,
                gt,
                names,
                lengths,
                output,
            } => commands::plot::execute(&pred, &gt, names, lengths, &output),
            Commands::Fit {
                target,
                work_dir,
                config,
                init,
                lengths,
                seed,
                cpu,
            } => commands::fit::execute(commands::fit::FitArgs {
                target,
                work_dir,
                config,
                init,
                lengths,
                seed,
                cpu,
            }),
        }
    }
}
