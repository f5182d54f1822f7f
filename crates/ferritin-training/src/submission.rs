//! Competition submission export.
//!
//! The submission is a long two-column CSV (`Id`, `Predicted`). For each protein `p` with
//! `n` residues it holds, in order, the `n x n` distances `p_d_{i}_{j}`, then the psi
//! angles `p_psi_{i}`, then the phi angles `p_phi_{i}` (1-based indices).
use anyhow::{Context, Result};
use candle_core::Tensor;
use ferritin_geometry::metrics::{tensor_to_array2, tensor_to_array3};
use ndarray::{s, ArrayView2, ArrayView3};
use polars::prelude::*;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub const TEST_INDEX_FILE: &str = "test.csv";
pub const SUBMISSION_FILE: &str = "submission.csv";

#[derive(Error, Debug)]
pub enum SubmissionError {
    #[error("test index lists {listed} proteins but {predicted} predictions were given")]
    CountMismatch { listed: usize, predicted: usize },
    #[error("prediction for {name} covers {available} residues, the index declares {declared}")]
    TooShort {
        name: String,
        declared: usize,
        available: usize,
    },
    #[error("test index is missing column {0}")]
    MissingColumn(usize),
    #[error("test index row {0} has an empty name or length")]
    EmptyEntry(usize),
    #[error("test index row {row} has an invalid length {length}")]
    InvalidLength { row: usize, length: i64 },
}

/// One protein of the competition test index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEntry {
    pub name: String,
    pub length: usize,
}

/// Name given by polars to the headerless name column.
const NAME_COLUMN: &str = "column_2";

/// Reads the headerless test index: column 1 holds protein names, column 2 lengths.
///
/// Names are always read as text, so names such as `1.50` are kept verbatim.
pub fn read_test_index(path: &Path) -> Result<Vec<TestEntry>> {
    let names_as_text = Schema::from_iter([Field::new(NAME_COLUMN.into(), DataType::String)]);
    let df = CsvReadOptions::default()
        .with_has_header(false)
        .with_schema_overwrite(Some(Arc::new(names_as_text)))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()
        .with_context(|| format!("failed to read {}", path.display()))?;

    let columns = df.get_columns();
    let names = columns
        .get(1)
        .ok_or(SubmissionError::MissingColumn(1))?
        .cast(&DataType::String)?;
    let lengths = columns
        .get(2)
        .ok_or(SubmissionError::MissingColumn(2))?
        .cast(&DataType::Int64)?;

    names
        .str()?
        .into_iter()
        .zip(lengths.i64()?.into_iter())
        .enumerate()
        .map(|(row, entry)| match entry {
            (Some(name), Some(length)) => {
                let length = usize::try_from(length)
                    .map_err(|_| SubmissionError::InvalidLength { row, length })?;
                Ok(TestEntry {
                    name: name.to_string(),
                    length,
                })
            }
            _ => Err(SubmissionError::EmptyEntry(row).into()),
        })
        .collect()
}

/// Writes `save_path/submission.csv` for the proteins listed in `save_path/test.csv`.
///
/// - `dm`: `[proteins, max_len, max_len]` predicted distance matrices
/// - `phi`, `psi`: `[proteins, max_len]` predicted angles
///
/// Predictions may be padded; each protein is cropped to its declared length.
pub fn save_submission(
    dm: ArrayView3<f32>,
    phi: ArrayView2<f32>,
    psi: ArrayView2<f32>,
    save_path: &Path,
) -> Result<PathBuf> {
    let entries = read_test_index(&save_path.join(TEST_INDEX_FILE))?;
    for predicted in [dm.shape()[0], phi.shape()[0], psi.shape()[0]] {
        if predicted != entries.len() {
            return Err(SubmissionError::CountMismatch {
                listed: entries.len(),
                predicted,
            }
            .into());
        }
    }

    let mut ids = Vec::new();
    let mut values = Vec::new();
    for (idx, entry) in entries.iter().enumerate() {
        let TestEntry { name, length } = entry;
        let length = *length;
        let available = dm.shape()[1]
            .min(dm.shape()[2])
            .min(phi.shape()[1])
            .min(psi.shape()[1]);
        if available < length {
            return Err(SubmissionError::TooShort {
                name: name.clone(),
                declared: length,
                available,
            }
            .into());
        }

        let dist = dm.slice(s![idx, ..length, ..length]);
        for ((i, j), value) in dist.indexed_iter() {
            ids.push(format!("{name}_d_{}_{}", i + 1, j + 1));
            values.push(*value);
        }
        for (i, value) in psi.slice(s![idx, ..length]).iter().enumerate() {
            ids.push(format!("{name}_psi_{}", i + 1));
            values.push(*value);
        }
        for (i, value) in phi.slice(s![idx, ..length]).iter().enumerate() {
            ids.push(format!("{name}_phi_{}", i + 1));
            values.push(*value);
        }
    }

    let mut output = df!("Id" => ids, "Predicted" => values)?;
    let out_path = save_path.join(SUBMISSION_FILE);
    let mut file = File::create(&out_path)
        .with_context(|| format!("failed to create {}", out_path.display()))?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .finish(&mut output)?;

    info!(
        proteins = entries.len(),
        rows = output.height(),
        path = %out_path.display(),
        "wrote submission"
    );
    Ok(out_path)
}

/// `save_submission` for predictions still held in tensors.
pub fn save_submission_from_tensors(
    dm: &Tensor,
    phi: &Tensor,
    psi: &Tensor,
    save_path: &Path,
) -> Result<PathBuf> {
    let dm = tensor_to_array3(dm)?;
    let phi = tensor_to_array2(phi)?;
    let psi = tensor_to_array2(psi)?;
    save_submission(dm.view(), phi.view(), psi.view(), save_path)
}
