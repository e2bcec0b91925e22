//! MatrixMarket coordinate I/O.
//!
//! The `.mtx` sidecar trio (matrix + features + barcodes) is the portable
//! export format of the 10x ecosystem and the CLI's input path. Reading
//! promotes the column-pointer width from the declared entry count, so files
//! beyond 2^31 non-zeros land directly in the 64-bit container.

use crate::core::error::{DemarkError, Result};
use crate::matrix::csc::{required_width, ColPtr, CscMatrix, CscMatrixDyn, PtrWidth};
use itertools::Itertools;
use log::info;
use std::io::{BufRead, Write};
use std::path::Path;

struct Triplet {
    row: u32,
    col: u32,
    value: f64,
}

/// Parse a MatrixMarket coordinate stream into a CSC matrix.
///
/// Accepts `real` and `integer` fields with `general` symmetry. Explicitly
/// stored zeros are dropped (consumers treat them as absent anyway);
/// duplicate coordinates are a hard error.
pub fn read_matrix_market<R: BufRead>(reader: R) -> Result<CscMatrixDyn> {
    let mut lines = reader.lines().enumerate();

    let (_, banner) = lines
        .next()
        .ok_or_else(|| DemarkError::EmptyData("MatrixMarket stream is empty".to_string()))?;
    let banner = banner?;
    parse_banner(&banner)?;

    let (dims_lineno, dims_line) = loop {
        match lines.next() {
            Some((lineno, line)) => {
                let line = line?;
                if !line.trim_start().starts_with('%') && !line.trim().is_empty() {
                    break (lineno, line);
                }
            }
            None => {
                return Err(DemarkError::Parse(
                    "MatrixMarket stream ends before the size line".to_string(),
                ))
            }
        }
    };
    let (nrow, ncol, declared_nnz) = parse_size_line(&dims_line, dims_lineno)?;
    if nrow > crate::matrix::csc::MAX_DIM || ncol > crate::matrix::csc::MAX_DIM {
        return Err(DemarkError::MalformedMatrix(format!(
            "declared dimension {}x{} exceeds the 2^31 axis limit",
            nrow, ncol
        )));
    }

    let mut triplets: Vec<Triplet> = Vec::with_capacity(declared_nnz);
    let mut seen = 0usize;
    for (lineno, line) in lines {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('%') {
            continue;
        }
        seen += 1;
        let mut fields = trimmed.split_ascii_whitespace();
        let (row, col, value) = match (fields.next(), fields.next(), fields.next()) {
            (Some(r), Some(c), Some(v)) => (
                parse_index(r, lineno, nrow, "row")?,
                parse_index(c, lineno, ncol, "column")?,
                v.parse::<f64>().map_err(|_| {
                    DemarkError::Parse(format!("invalid value '{}' on line {}", v, lineno + 1))
                })?,
            ),
            _ => {
                return Err(DemarkError::Parse(format!(
                    "expected 'row col value' on line {}",
                    lineno + 1
                )))
            }
        };
        if value != 0.0 {
            triplets.push(Triplet { row, col, value });
        }
    }
    if seen != declared_nnz {
        return Err(DemarkError::Parse(format!(
            "size line declares {} entries but {} were found",
            declared_nnz, seen
        )));
    }

    let dropped = seen - triplets.len();
    if dropped > 0 {
        info!("Dropped {} explicitly stored zeros while reading", dropped);
    }

    triplets.sort_unstable_by_key(|t| (t.col, t.row));
    if let Some((dup, _)) = triplets
        .iter()
        .tuple_windows()
        .find(|(a, b)| a.col == b.col && a.row == b.row)
    {
        return Err(DemarkError::MalformedMatrix(format!(
            "duplicate entry at ({}, {})",
            dup.row + 1,
            dup.col + 1
        )));
    }

    let nnz = triplets.len();
    let mut x = Vec::with_capacity(nnz);
    let mut i = Vec::with_capacity(nnz);
    let mut p = Vec::with_capacity(ncol + 1);
    p.push(0usize);
    let mut current = 0u32;
    for t in &triplets {
        while current < t.col {
            p.push(x.len());
            current += 1;
        }
        x.push(t.value);
        i.push(t.row);
    }
    while p.len() < ncol + 1 {
        p.push(x.len());
    }

    Ok(match required_width(nnz) {
        PtrWidth::I32 => {
            let p = p.into_iter().map(|v| v as i32).collect();
            CscMatrix::<i32>::from_parts_unchecked(x, i, p, nrow, ncol).into()
        }
        PtrWidth::I64 => {
            let p = p.into_iter().map(|v| v as i64).collect();
            CscMatrix::<i64>::from_parts_unchecked(x, i, p, nrow, ncol).into()
        }
    })
}

/// Read a `.mtx` or `.mtx.gz` file.
pub fn read_matrix_market_path<P: AsRef<Path>>(path: P) -> Result<CscMatrixDyn> {
    let reader = crate::core::io::open_text(path.as_ref())
        .map_err(|e| DemarkError::InvalidInput(format!("{}: {}", path.as_ref().display(), e)))?;
    let matrix = read_matrix_market(reader)?;
    info!(
        "Read {}x{} matrix with {} non-zeros ({}-bit pointers) from {:?}",
        matrix.nrow(),
        matrix.ncol(),
        matrix.nnz(),
        match matrix.width() {
            PtrWidth::I32 => 32,
            PtrWidth::I64 => 64,
        },
        path.as_ref()
    );
    Ok(matrix)
}

/// Write a matrix as MatrixMarket coordinate `real general`, column-major.
pub fn write_matrix_market<P: ColPtr, W: Write>(m: &CscMatrix<P>, w: &mut W) -> Result<()> {
    writeln!(w, "%%MatrixMarket matrix coordinate real general")?;
    writeln!(w, "{} {} {}", m.nrow(), m.ncol(), m.nnz())?;
    for c in 0..m.ncol() {
        for (r, v) in m.col(c) {
            writeln!(w, "{} {} {}", r + 1, c + 1, v)?;
        }
    }
    Ok(())
}

fn parse_banner(banner: &str) -> Result<()> {
    let mut fields = banner.split_ascii_whitespace();
    if fields.next() != Some("%%MatrixMarket") {
        return Err(DemarkError::Parse(
            "missing %%MatrixMarket banner".to_string(),
        ));
    }
    let object = fields.next().unwrap_or("");
    let format = fields.next().unwrap_or("");
    let field = fields.next().unwrap_or("");
    let symmetry = fields.next().unwrap_or("");
    if !object.eq_ignore_ascii_case("matrix") || !format.eq_ignore_ascii_case("coordinate") {
        return Err(DemarkError::Parse(format!(
            "unsupported MatrixMarket header '{} {}' (expected 'matrix coordinate')",
            object, format
        )));
    }
    if !(field.eq_ignore_ascii_case("real") || field.eq_ignore_ascii_case("integer")) {
        return Err(DemarkError::Parse(format!(
            "unsupported MatrixMarket field '{}' (expected 'real' or 'integer')",
            field
        )));
    }
    if !symmetry.eq_ignore_ascii_case("general") {
        return Err(DemarkError::Parse(format!(
            "unsupported MatrixMarket symmetry '{}' (expected 'general')",
            symmetry
        )));
    }
    Ok(())
}

fn parse_size_line(line: &str, lineno: usize) -> Result<(usize, usize, usize)> {
    let mut fields = line.split_ascii_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(r), Some(c), Some(n)) => {
            let parse = |s: &str, what: &str| {
                s.parse::<usize>().map_err(|_| {
                    DemarkError::Parse(format!(
                        "invalid {} '{}' on line {}",
                        what,
                        s,
                        lineno + 1
                    ))
                })
            };
            Ok((parse(r, "row count")?, parse(c, "column count")?, parse(n, "entry count")?))
        }
        _ => Err(DemarkError::Parse(format!(
            "expected 'nrow ncol nnz' on line {}",
            lineno + 1
        ))),
    }
}

fn parse_index(s: &str, lineno: usize, bound: usize, what: &str) -> Result<u32> {
    let one_based = s.parse::<usize>().map_err(|_| {
        DemarkError::Parse(format!("invalid {} index '{}' on line {}", what, s, lineno + 1))
    })?;
    if one_based == 0 || one_based > bound {
        return Err(DemarkError::MalformedMatrix(format!(
            "{} index {} out of range 1..={} on line {}",
            what,
            one_based,
            bound,
            lineno + 1
        )));
    }
    Ok((one_based - 1) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SMALL: &str = "%%MatrixMarket matrix coordinate real general\n\
        % genes x cells\n\
        3 4 4\n\
        1 1 1.0\n\
        3 2 2.0\n\
        2 3 3.0\n\
        1 4 4.0\n";

    #[test]
    fn reads_coordinate_file() {
        let m = read_matrix_market(Cursor::new(SMALL)).unwrap();
        assert_eq!(m.nrow(), 3);
        assert_eq!(m.ncol(), 4);
        assert_eq!(m.nnz(), 4);
        let m = m.to_i64();
        assert_eq!(m.values(), &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(m.row_indices(), &[0, 2, 1, 0]);
        assert_eq!(m.col_ptrs(), &[0i64, 1, 2, 3, 4]);
    }

    #[test]
    fn unordered_entries_are_sorted() {
        let text = "%%MatrixMarket matrix coordinate integer general\n\
            2 2 3\n\
            2 2 4\n\
            1 1 1\n\
            2 1 2\n";
        let m = read_matrix_market(Cursor::new(text)).unwrap().to_i64();
        assert_eq!(m.row_indices(), &[0, 1, 1]);
        assert_eq!(m.values(), &[1.0, 2.0, 4.0]);
    }

    #[test]
    fn stored_zeros_are_dropped() {
        let text = "%%MatrixMarket matrix coordinate real general\n\
            2 2 2\n\
            1 1 0.0\n\
            2 2 5.0\n";
        let m = read_matrix_market(Cursor::new(text)).unwrap();
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn duplicate_entries_rejected() {
        let text = "%%MatrixMarket matrix coordinate real general\n\
            2 2 2\n\
            1 1 1.0\n\
            1 1 2.0\n";
        assert!(matches!(
            read_matrix_market(Cursor::new(text)),
            Err(DemarkError::MalformedMatrix(_))
        ));
    }

    #[test]
    fn bad_banner_rejected() {
        assert!(matches!(
            read_matrix_market(Cursor::new("%%MatrixMarket matrix array real general\n1 1\n1.0\n")),
            Err(DemarkError::Parse(_))
        ));
        assert!(matches!(
            read_matrix_market(Cursor::new("not a matrix\n")),
            Err(DemarkError::Parse(_))
        ));
    }

    #[test]
    fn entry_count_mismatch_rejected() {
        let text = "%%MatrixMarket matrix coordinate real general\n\
            2 2 3\n\
            1 1 1.0\n";
        assert!(matches!(
            read_matrix_market(Cursor::new(text)),
            Err(DemarkError::Parse(_))
        ));
    }

    #[test]
    fn out_of_range_index_rejected() {
        let text = "%%MatrixMarket matrix coordinate real general\n\
            2 2 1\n\
            3 1 1.0\n";
        assert!(matches!(
            read_matrix_market(Cursor::new(text)),
            Err(DemarkError::MalformedMatrix(_))
        ));
    }

    #[test]
    fn write_read_round_trip() {
        let m = read_matrix_market(Cursor::new(SMALL)).unwrap().to_i64();
        let mut buf = Vec::new();
        write_matrix_market(&m, &mut buf).unwrap();
        let back = read_matrix_market(Cursor::new(buf)).unwrap().to_i64();
        assert_eq!(back.values(), m.values());
        assert_eq!(back.row_indices(), m.row_indices());
        assert_eq!(back.col_ptrs(), m.col_ptrs());
    }
}
