//! Delimited-text numeric tables.
//!
//! Samples and objective values travel between campaigns as plain-text
//! tables, one row per line. Values are written with Rust's shortest
//! round-trip float formatting, so a written table reloads to bit-identical
//! contents. Lines starting with `#` and blank lines are skipped on read.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use ndarray::{Array2, ArrayView2};

use crate::error::{GsaError, Result};

/// Write a numeric table to `path`, one row per line, columns joined by
/// `delimiter`.
pub fn write_table(path: &Path, table: ArrayView2<f64>, delimiter: char) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for row in table.rows() {
        let mut first = true;
        for &value in row.iter() {
            if !first {
                write!(writer, "{}", delimiter)?;
            }
            write!(writer, "{}", value)?;
            first = false;
        }
        writeln!(writer)?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a numeric table from `path`.
///
/// With `delimiter = None` (or a whitespace delimiter) columns are split on
/// any run of whitespace, which accepts both tab- and space-separated
/// tables. Every data line must have the same number of columns as the
/// first.
///
/// # Errors
///
/// Returns `GsaError::MissingFile` if `path` does not exist and
/// `GsaError::Parse` for malformed values or ragged rows.
pub fn read_table(path: &Path, delimiter: Option<char>) -> Result<Array2<f64>> {
    if !path.is_file() {
        return Err(GsaError::MissingFile {
            path: path.display().to_string(),
        });
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);

    let mut values: Vec<f64> = Vec::new();
    let mut cols = 0usize;
    let mut rows = 0usize;

    for (line_idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = match delimiter {
            Some(d) if !d.is_whitespace() => line.split(d).map(str::trim).collect(),
            _ => line.split_whitespace().collect(),
        };

        if cols == 0 {
            cols = fields.len();
        } else if fields.len() != cols {
            return Err(GsaError::Parse {
                path: path.display().to_string(),
                line: line_idx + 1,
                message: format!("expected {} columns, found {}", cols, fields.len()),
            });
        }

        for field in fields {
            let value = field.parse::<f64>().map_err(|e| GsaError::Parse {
                path: path.display().to_string(),
                line: line_idx + 1,
                message: format!("'{}': {}", field, e),
            })?;
            values.push(value);
        }
        rows += 1;
    }

    if rows == 0 {
        return Err(GsaError::Parse {
            path: path.display().to_string(),
            line: 0,
            message: "no numeric data found".to_string(),
        });
    }

    Array2::from_shape_vec((rows, cols), values).map_err(|e| GsaError::Parse {
        path: path.display().to_string(),
        line: 0,
        message: e.to_string(),
    })
}

/// Read and row-concatenate a sequence of table files in order.
///
/// All files must agree on the column count.
pub fn read_tables(paths: &[std::path::PathBuf], delimiter: Option<char>) -> Result<Array2<f64>> {
    let mut stacked: Option<Array2<f64>> = None;
    for path in paths {
        log::debug!("reading {}", path.display());
        let block = read_table(path, delimiter)?;
        stacked = Some(match stacked {
            None => block,
            Some(acc) => {
                if acc.ncols() != block.ncols() {
                    return Err(GsaError::ShapeMismatch {
                        expected: format!("(_, {})", acc.ncols()),
                        actual: format!("({}, {}) in '{}'", block.nrows(), block.ncols(), path.display()),
                    });
                }
                let mut merged = Array2::zeros((acc.nrows() + block.nrows(), acc.ncols()));
                merged.slice_mut(ndarray::s![..acc.nrows(), ..]).assign(&acc);
                merged.slice_mut(ndarray::s![acc.nrows().., ..]).assign(&block);
                merged
            }
        });
    }
    stacked.ok_or_else(|| GsaError::Config {
        message: "no input files were given".to_string(),
    })
}
