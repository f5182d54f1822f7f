//! ferretin-test-data
//!
//! A module to provide test files embedded in the crate for use in testing.
//!
//! The test files are represented as `TestFile` objects which package the raw data
//! and create temporary files (or directories) for programs to operate on.
use std::fs;
use std::path::PathBuf;
use tempfile::{Builder, NamedTempFile, TempDir};

#[derive(Debug)]
/// Test File
///
/// Example usage:
///
/// ```ignore
/// // returns (filepath, _tempfile_handle).
/// // _handle ensures the tempfile remains in scope
/// use ferritin_test_data::TestFile;
/// let (csv_file, _temp) = TestFile::submission_index_01().create_temp().unwrap();
/// // or place the file under its canonical name in a fresh directory
/// let (dir, _temp) = TestFile::submission_index_01().create_temp_dir().unwrap();
/// ```
pub struct TestFile {
    filebinary: &'static [u8],
    name: &'static str,
    suffix: &'static str,
}

impl TestFile {
    /// Competition index with two proteins: `T0949` (3 residues) and `T0951` (2 residues).
    /// Headerless; columns are row id, protein name, length, sequence.
    pub fn submission_index_01() -> Self {
        Self {
            filebinary: include_bytes!("../data/submission/test.csv"),
            name: "test",
            suffix: "csv",
        }
    }

    /// Protein names listed in `submission_index_01`, in file order.
    pub fn submission_index_01_proteins() -> Vec<(&'static str, usize)> {
        vec![("T0949", 3), ("T0951", 2)]
    }

    pub fn create_temp(&self) -> std::io::Result<(String, NamedTempFile)> {
        let temp = Builder::new()
            .suffix(&format!(".{}", self.suffix))
            .tempfile()?;

        fs::write(&temp, self.filebinary)?;
        let path = temp.path().to_string_lossy().into_owned();

        Ok((path, temp))
    }

    /// Writes the file as `<name>.<suffix>` inside a new temporary directory and returns
    /// the directory path.
    pub fn create_temp_dir(&self) -> std::io::Result<(PathBuf, TempDir)> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(format!("{}.{}", self.name, self.suffix));
        fs::write(path, self.filebinary)?;
        Ok((dir.path().to_path_buf(), dir))
    }
}
