//! ferritin-training
//!
//! - best-model checkpointing for candle `VarMap`s
//! - competition submission export (CSV)
//! - SVG plots of training curves and distance matrices
//! - a small torsion-angle fitter built on `ferritin-geometry`
//! - CLI (`ferritin-rgn`) to drive the above.
//!
pub mod checkpoint;
pub mod plotting;
pub mod submission;
pub mod trainer;

pub use checkpoint::{latest_checkpoint, CkptSaver, ModelSaver, SaveModel};
pub use plotting::{plot_dist_matrix, plot_train_val};
pub use submission::{save_submission, save_submission_from_tensors, SubmissionError};
pub use trainer::{fit_torsion_angles, History, TorsionFitter, TrainConfig};
