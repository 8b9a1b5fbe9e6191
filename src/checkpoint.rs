//! Block export/import of flattened tables.
//!
//! Campaigns against an expensive evaluator are split into blocks of rows,
//! written as numbered files `<prefix>_<index><postfix>` (1-based), with the
//! single-block case written as `<prefix><postfix>` alone. The repository
//! owns the naming convention so row blocks always reassemble in the order
//! they were written, and records a JSON manifest alongside the blocks so a
//! campaign can be reloaded without re-deriving file names.

use std::path::PathBuf;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{GsaError, Result};
use crate::table::{read_table, read_tables, write_table};

/// Default file extension for block files.
pub const DEFAULT_POSTFIX: &str = ".txt";

/// Where and how to load a previously exported table.
///
/// Either `load_file` names a single explicit file (takes precedence), or
/// `prefix` + `n_files` describe a numbered block family. `offset` is the
/// first block index (default 1) and `postfix` the extension (default
/// `.txt`). A `delimiter` of `None` splits columns on any whitespace.
#[derive(Debug, Clone, Default)]
pub struct LoadConfig {
    /// Single explicit file to load; takes precedence over `prefix`.
    pub load_file: Option<PathBuf>,
    /// Directory the file names are resolved against.
    pub indir: Option<PathBuf>,
    /// Block file prefix.
    pub prefix: Option<String>,
    /// Number of block files.
    pub n_files: Option<usize>,
    /// First block index, default 1.
    pub offset: Option<usize>,
    /// Block file extension, default `.txt`.
    pub postfix: Option<String>,
    /// Column delimiter; `None` splits on any whitespace.
    pub delimiter: Option<char>,
}

impl LoadConfig {
    /// Configuration for a single explicit file.
    pub fn single(path: impl Into<PathBuf>) -> Self {
        Self {
            load_file: Some(path.into()),
            ..Self::default()
        }
    }

    /// Configuration for a numbered block family under `indir`.
    pub fn blocks(indir: impl Into<PathBuf>, prefix: impl Into<String>, n_files: usize) -> Self {
        Self {
            indir: Some(indir.into()),
            prefix: Some(prefix.into()),
            n_files: Some(n_files),
            ..Self::default()
        }
    }

    /// Set the first block index.
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Set the block file extension.
    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = Some(postfix.into());
        self
    }

    /// Set the column delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = Some(delimiter);
        self
    }

    /// Resolve the ordered list of files this configuration names.
    ///
    /// # Errors
    ///
    /// Returns `GsaError::Config` when neither `load_file` nor a complete
    /// `prefix` + `n_files` pair is given.
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        let indir = self.indir.clone().unwrap_or_default();
        if let Some(file) = &self.load_file {
            return Ok(vec![indir.join(file)]);
        }
        let prefix = self.prefix.as_deref().ok_or_else(|| GsaError::Config {
            message: "either 'load_file' or 'prefix' is required to load from file".to_string(),
        })?;
        let n_files = self.n_files.ok_or_else(|| GsaError::Config {
            message: "loading with 'prefix' requires 'n_files'".to_string(),
        })?;
        let offset = self.offset.unwrap_or(1);
        let postfix = self.postfix.as_deref().unwrap_or(DEFAULT_POSTFIX);
        Ok((offset..offset + n_files)
            .map(|i| indir.join(format!("{}_{}{}", prefix, i, postfix)))
            .collect())
    }

    /// Read and row-concatenate every file this configuration names.
    pub fn read(&self) -> Result<Array2<f64>> {
        read_tables(&self.resolve()?, self.delimiter)
    }
}

/// Manifest describing an exported block family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// Total rows across all blocks.
    pub rows: usize,
    /// Columns per row.
    pub cols: usize,
    /// Rows per block (the last block may be shorter).
    pub block_size: usize,
    /// Block file names, in row order.
    pub files: Vec<String>,
}

/// Writes and reads the numbered block files of one exported table.
#[derive(Debug, Clone)]
pub struct CheckpointRepository {
    dir: PathBuf,
    prefix: String,
    postfix: String,
    delimiter: char,
}

impl CheckpointRepository {
    /// Create a repository rooted at `dir` with the given file prefix.
    ///
    /// Whitespace inside the prefix is collapsed to underscores and a
    /// trailing underscore is dropped, so block names stay shell-friendly.
    pub fn new(dir: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            dir: dir.into(),
            prefix: sanitize_prefix(prefix),
            postfix: DEFAULT_POSTFIX.to_string(),
            delimiter: '\t',
        }
    }

    /// Replace the default `.txt` extension.
    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = postfix.into();
        self
    }

    /// Replace the default tab column delimiter.
    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    fn block_path(&self, index: usize) -> PathBuf {
        self.dir
            .join(format!("{}_{}{}", self.prefix, index, self.postfix))
    }

    fn single_path(&self) -> PathBuf {
        self.dir.join(format!("{}{}", self.prefix, self.postfix))
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join(format!("{}_manifest.json", self.prefix))
    }

    /// Write `table` as one file, or as `ceil(rows / block_size)` numbered
    /// block files when `block_size` is given and smaller than the row
    /// count. Also writes a JSON manifest next to the blocks. Returns the
    /// paths written, in row order.
    pub fn export(
        &self,
        table: ArrayView2<f64>,
        block_size: Option<usize>,
    ) -> Result<Vec<PathBuf>> {
        std::fs::create_dir_all(&self.dir)?;
        let rows = table.nrows();
        let block_size = block_size.unwrap_or(rows).clamp(1, rows.max(1));
        let n_files = rows.div_ceil(block_size).max(1);

        let mut paths = Vec::with_capacity(n_files);
        if n_files == 1 {
            let path = self.single_path();
            log::debug!("writing {} rows to {}", rows, path.display());
            write_table(&path, table, self.delimiter)?;
            paths.push(path);
        } else {
            for b in 0..n_files {
                let start = b * block_size;
                let end = (start + block_size).min(rows);
                let path = self.block_path(b + 1);
                log::debug!(
                    "writing rows {}..{} to {}",
                    start,
                    end,
                    path.display()
                );
                write_table(&path, table.slice(ndarray::s![start..end, ..]), self.delimiter)?;
                paths.push(path);
            }
        }

        let manifest = CheckpointManifest {
            rows,
            cols: table.ncols(),
            block_size,
            files: paths
                .iter()
                .map(|p| {
                    p.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                })
                .collect(),
        };
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(self.manifest_path(), json)?;

        Ok(paths)
    }

    /// Read the manifest written by a previous [`export`](Self::export).
    pub fn manifest(&self) -> Result<CheckpointManifest> {
        let path = self.manifest_path();
        if !path.is_file() {
            return Err(GsaError::MissingFile {
                path: path.display().to_string(),
            });
        }
        let json = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Reload the full table this repository exported, using the manifest
    /// to enumerate the blocks.
    pub fn load(&self) -> Result<Array2<f64>> {
        let manifest = self.manifest();
        let delimiter = delimiter_for_read(self.delimiter);
        match manifest {
            Ok(manifest) => {
                let paths: Vec<PathBuf> =
                    manifest.files.iter().map(|f| self.dir.join(f)).collect();
                let table = read_tables(&paths, delimiter)?;
                if table.nrows() != manifest.rows || table.ncols() != manifest.cols {
                    return Err(GsaError::ShapeMismatch {
                        expected: format!("({}, {})", manifest.rows, manifest.cols),
                        actual: format!("({}, {})", table.nrows(), table.ncols()),
                    });
                }
                Ok(table)
            }
            // No manifest: fall back to the single-file name.
            Err(GsaError::MissingFile { .. }) => read_table(&self.single_path(), delimiter),
            Err(e) => Err(e),
        }
    }
}

fn delimiter_for_read(delimiter: char) -> Option<char> {
    if delimiter.is_whitespace() {
        None
    } else {
        Some(delimiter)
    }
}

fn sanitize_prefix(prefix: &str) -> String {
    let joined = prefix.split_whitespace().collect::<Vec<_>>().join("_");
    joined.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::TempDir;

    fn numbered_table(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64)
    }

    #[test]
    fn test_single_file_export_omits_index() {
        let dir = TempDir::new().unwrap();
        let repo = CheckpointRepository::new(dir.path(), "sample");
        let table = numbered_table(6, 2);
        let paths = repo.export(table.view(), None).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].file_name().unwrap(), "sample.txt");
        assert_eq!(repo.load().unwrap(), table);
    }

    #[test]
    fn test_blocked_export_uses_one_based_indices() {
        let dir = TempDir::new().unwrap();
        let repo = CheckpointRepository::new(dir.path(), "sample");
        let table = numbered_table(7, 3);
        let paths = repo.export(table.view(), Some(3)).unwrap();
        let names: Vec<_> = paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["sample_1.txt", "sample_2.txt", "sample_3.txt"]);
        assert_eq!(repo.load().unwrap(), table);
    }

    #[test]
    fn test_oversized_block_size_collapses_to_single_file() {
        let dir = TempDir::new().unwrap();
        let repo = CheckpointRepository::new(dir.path(), "sample");
        let table = numbered_table(4, 2);
        let paths = repo.export(table.view(), Some(100)).unwrap();
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].file_name().unwrap(), "sample.txt");
    }

    #[test]
    fn test_manifest_records_blocks() {
        let dir = TempDir::new().unwrap();
        let repo = CheckpointRepository::new(dir.path(), "obj").with_delimiter(' ');
        let table = numbered_table(5, 1);
        repo.export(table.view(), Some(2)).unwrap();
        let manifest = repo.manifest().unwrap();
        assert_eq!(manifest.rows, 5);
        assert_eq!(manifest.cols, 1);
        assert_eq!(manifest.block_size, 2);
        assert_eq!(manifest.files.len(), 3);
    }

    #[test]
    fn test_prefix_sanitization() {
        assert_eq!(sanitize_prefix("my sample "), "my_sample");
        assert_eq!(sanitize_prefix("run_"), "run");
    }

    #[test]
    fn test_load_config_requires_prefix_or_file() {
        let err = LoadConfig::default().resolve().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_load_config_requires_n_files_with_prefix() {
        let config = LoadConfig {
            prefix: Some("sample".to_string()),
            ..LoadConfig::default()
        };
        let err = config.resolve().unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_load_config_offset_names_files() {
        let config = LoadConfig::blocks("/data", "sample", 2).with_offset(3);
        let files = config.resolve().unwrap();
        assert_eq!(files[0], PathBuf::from("/data/sample_3.txt"));
        assert_eq!(files[1], PathBuf::from("/data/sample_4.txt"));
    }

    #[test]
    fn test_load_config_single_file_takes_precedence() {
        let mut config = LoadConfig::blocks("/data", "sample", 2);
        config.load_file = Some(PathBuf::from("explicit.txt"));
        let files = config.resolve().unwrap();
        assert_eq!(files, vec![PathBuf::from("/data/explicit.txt")]);
    }
}
