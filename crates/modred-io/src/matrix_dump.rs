//! Plain-text matrix dumps for offline inspection.
//!
//! Two layouts are supported:
//! - **dense**: one matrix row per line, whitespace separated, row-major
//! - **triplets**: `row col value` per line with 1-based indices, closed by a
//!   `nrows ncols 0` line so the file can be loaded with Matlab's `spconvert`

use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{IoError, Result};
use crate::json::{ensure_parent_dir, read_file};

/// Dense matrix payload in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrixData {
    pub nrows: usize,
    pub ncols: usize,
    pub values: Vec<f64>,
}

impl DenseMatrixData {
    pub fn new(nrows: usize, ncols: usize, values: Vec<f64>) -> Result<Self> {
        if values.len() != nrows * ncols {
            return Err(IoError::InvalidData(format!(
                "dense matrix {}x{} needs {} values, got {}",
                nrows,
                ncols,
                nrows * ncols,
                values.len()
            )));
        }
        Ok(Self {
            nrows,
            ncols,
            values,
        })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.nrows && col < self.ncols {
            Some(self.values[row * self.ncols + col])
        } else {
            None
        }
    }
}

pub fn write_dense_matrix(path: impl AsRef<Path>, matrix: &DenseMatrixData) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let mut out = BufWriter::new(fs::File::create(path)?);
    for row in 0..matrix.nrows {
        let line = matrix.values[row * matrix.ncols..(row + 1) * matrix.ncols]
            .iter()
            .map(|v| format!("{:.12e}", v))
            .collect::<Vec<_>>()
            .join(" ");
        writeln!(out, "{}", line)?;
    }
    out.flush()?;
    Ok(())
}

pub fn read_dense_matrix(path: impl AsRef<Path>) -> Result<DenseMatrixData> {
    let bytes = read_file(path.as_ref())?;
    let text = String::from_utf8(bytes).map_err(|e| IoError::Parse(e.to_string()))?;

    let mut values = Vec::new();
    let mut nrows = 0;
    let mut ncols = None;
    for (line_no, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let row = trimmed
            .split_whitespace()
            .map(|tok| {
                tok.parse::<f64>()
                    .map_err(|e| IoError::Parse(format!("line {}: '{}': {}", line_no + 1, tok, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        match ncols {
            None => ncols = Some(row.len()),
            Some(n) if n != row.len() => {
                return Err(IoError::Parse(format!(
                    "line {}: expected {} columns, found {}",
                    line_no + 1,
                    n,
                    row.len()
                )));
            }
            Some(_) => {}
        }
        values.extend(row);
        nrows += 1;
    }

    DenseMatrixData::new(nrows, ncols.unwrap_or(0), values)
}

/// Writes `(row, col, value)` triplets (0-based on input) as a 1-based triplet file.
pub fn write_triplets(
    path: impl AsRef<Path>,
    nrows: usize,
    ncols: usize,
    triplets: &[(usize, usize, f64)],
) -> Result<()> {
    let path = path.as_ref();
    ensure_parent_dir(path)?;
    let mut out = BufWriter::new(fs::File::create(path)?);
    for &(r, c, v) in triplets {
        if r >= nrows || c >= ncols {
            return Err(IoError::InvalidData(format!(
                "triplet ({}, {}) outside {}x{} matrix",
                r, c, nrows, ncols
            )));
        }
        writeln!(out, "{} {} {:.12e}", r + 1, c + 1, v)?;
    }
    writeln!(out, "{} {} 0", nrows, ncols)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_dump_reads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("M_red.dat");
        let matrix = DenseMatrixData::new(2, 3, vec![1.0, -2.5, 0.0, 3.25e-9, 4.0, 1e12]).unwrap();

        write_dense_matrix(&path, &matrix).expect("write");
        let loaded = read_dense_matrix(&path).expect("read");

        assert_eq!(loaded.nrows, 2);
        assert_eq!(loaded.ncols, 3);
        for (a, b) in loaded.values.iter().zip(&matrix.values) {
            assert!((a - b).abs() <= 1e-11 * b.abs().max(1.0));
        }
        assert_eq!(loaded.get(1, 2), Some(loaded.values[5]));
        assert_eq!(loaded.get(2, 0), None);
    }

    #[test]
    fn dense_rejects_ragged_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ragged.dat");
        fs::write(&path, "1 2 3\n4 5\n").unwrap();
        assert!(matches!(read_dense_matrix(&path), Err(IoError::Parse(_))));
    }

    #[test]
    fn dense_size_mismatch_is_invalid() {
        assert!(matches!(
            DenseMatrixData::new(2, 2, vec![1.0]),
            Err(IoError::InvalidData(_))
        ));
    }

    #[test]
    fn triplets_are_one_based_with_size_trailer() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("K.dat");
        write_triplets(&path, 3, 3, &[(0, 0, 2.0), (2, 1, -1.0)]).expect("write");

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("1 1 "));
        assert!(lines[1].starts_with("3 2 "));
        assert_eq!(lines[2], "3 3 0");
    }

    #[test]
    fn triplets_out_of_range_fail() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bad.dat");
        let err = write_triplets(&path, 2, 2, &[(2, 0, 1.0)]).expect_err("out of range");
        assert!(matches!(err, IoError::InvalidData(_)));
    }
}
