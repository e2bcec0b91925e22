//! Rearrangement operations on CSC matrices: transpose, densify, rbind/cbind,
//! and axis sums. Pure data movement; the statistics live in `crate::de`.

use crate::core::error::{DemarkError, Result};
use crate::matrix::csc::{required_width, ColPtr, CscMatrix, CscMatrixDyn, PtrWidth, MAX_DIM};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;

/// Transpose by direct construction: bucket-count non-zeros per source row,
/// prefix-sum into write heads, then scatter every `(col, value)` into its
/// destination run. Source columns are visited in ascending order, so each
/// destination column fills with strictly ascending row indices and no sort
/// is needed. O(nnz + nrow); dimension names are swapped.
pub fn transpose<P: ColPtr>(m: &CscMatrix<P>) -> Result<CscMatrix<P>> {
    let (nrow, ncol) = m.dim();
    let nnz = m.nnz();

    let mut head = vec![0usize; nrow + 1];
    for &r in m.row_indices() {
        head[r as usize + 1] += 1;
    }
    for r in 1..=nrow {
        head[r] += head[r - 1];
    }
    // head[r] now holds the write offset for source row r.
    let mut out_x = vec![0.0f64; nnz];
    let mut out_i = vec![0u32; nnz];
    for c in 0..ncol {
        for k in m.col_range(c) {
            let r = m.row_indices()[k] as usize;
            let pos = head[r];
            out_x[pos] = m.values()[k];
            out_i[pos] = c as u32;
            head[r] += 1;
        }
    }
    // After the scatter head[r] is the end of row r's run; shifting it right
    // by one restores offset semantics.
    let mut out_p = Vec::with_capacity(nrow + 1);
    out_p.push(P::from_usize(0)?);
    for r in 0..nrow {
        out_p.push(P::from_usize(head[r])?);
    }

    let mut out = CscMatrix::from_parts_unchecked(out_x, out_i, out_p, ncol, nrow);
    out.set_names_unchecked(
        m.colnames().map(<[String]>::to_vec),
        m.rownames().map(<[String]>::to_vec),
    );
    Ok(out)
}

/// Scatter the stored entries into a zeroed `nrow x ncol` dense array.
pub fn to_dense<P: ColPtr>(m: &CscMatrix<P>) -> Array2<f64> {
    let mut dense = Array2::<f64>::zeros(m.dim());
    for c in 0..m.ncol() {
        for (r, v) in m.col(c) {
            dense[[r as usize, c]] = v;
        }
    }
    dense
}

/// Scatter into a zeroed `ncol x nrow` dense array, i.e. densify and
/// transpose in one pass.
pub fn to_dense_transposed<P: ColPtr>(m: &CscMatrix<P>) -> Array2<f64> {
    let mut dense = Array2::<f64>::zeros((m.ncol(), m.nrow()));
    for c in 0..m.ncol() {
        for (r, v) in m.col(c) {
            dense[[c, r as usize]] = v;
        }
    }
    dense
}

/// Sparsify a dense array, keeping entries with non-zero values. The result
/// width follows the stored-entry count.
pub fn from_dense(a: ArrayView2<f64>) -> CscMatrixDyn {
    let (nrow, ncol) = a.dim();
    let mut x = Vec::new();
    let mut i = Vec::new();
    let mut p = Vec::with_capacity(ncol + 1);
    p.push(0usize);
    for c in 0..ncol {
        for r in 0..nrow {
            let v = a[[r, c]];
            if v != 0.0 {
                x.push(v);
                i.push(r as u32);
            }
        }
        p.push(x.len());
    }
    let width = required_width(x.len());
    build_with_width(x, i, p, nrow, ncol, width)
}

fn build_with_width(
    x: Vec<f64>,
    i: Vec<u32>,
    p: Vec<usize>,
    nrow: usize,
    ncol: usize,
    width: PtrWidth,
) -> CscMatrixDyn {
    match width {
        PtrWidth::I32 => {
            let p = p.into_iter().map(|v| v as i32).collect();
            CscMatrix::<i32>::from_parts_unchecked(x, i, p, nrow, ncol).into()
        }
        PtrWidth::I64 => {
            let p = p.into_iter().map(|v| v as i64).collect();
            CscMatrix::<i64>::from_parts_unchecked(x, i, p, nrow, ncol).into()
        }
    }
}

fn combined_width(mats: &[CscMatrixDyn], total_nnz: usize) -> PtrWidth {
    if mats.iter().any(|m| m.width() == PtrWidth::I64) {
        PtrWidth::I64
    } else {
        required_width(total_nnz)
    }
}

fn col_entries(m: &CscMatrixDyn, c: usize) -> (&[u32], &[f64]) {
    match m {
        CscMatrixDyn::I32(m) => {
            let range = m.col_range(c);
            (&m.row_indices()[range.clone()], &m.values()[range])
        }
        CscMatrixDyn::I64(m) => {
            let range = m.col_range(c);
            (&m.row_indices()[range.clone()], &m.values()[range])
        }
    }
}

/// Concatenate matrices side by side. All inputs must agree on `nrow`; the
/// result is 64-bit iff any input is or the combined nnz overflows 32 bits.
pub fn cbind(mats: &[CscMatrixDyn]) -> Result<CscMatrixDyn> {
    if mats.is_empty() {
        return Err(DemarkError::EmptyData("cbind of no matrices".to_string()));
    }
    let nrow = mats[0].nrow();
    for m in &mats[1..] {
        if m.nrow() != nrow {
            return Err(DemarkError::DimensionMismatch {
                expected: format!("{} rows", nrow),
                actual: format!("{} rows", m.nrow()),
            });
        }
    }
    let total_nnz: usize = mats.iter().map(CscMatrixDyn::nnz).sum();
    let ncol: usize = mats.iter().map(CscMatrixDyn::ncol).sum();
    if ncol > MAX_DIM {
        return Err(DemarkError::MalformedMatrix(format!(
            "cbind result has {} columns, exceeding the 2^31 axis limit",
            ncol
        )));
    }

    let mut x = Vec::with_capacity(total_nnz);
    let mut i = Vec::with_capacity(total_nnz);
    let mut p = Vec::with_capacity(ncol + 1);
    p.push(0usize);
    for m in mats {
        for c in 0..m.ncol() {
            let (rows, vals) = col_entries(m, c);
            i.extend_from_slice(rows);
            x.extend_from_slice(vals);
            p.push(x.len());
        }
    }

    let mut out = build_with_width(x, i, p, nrow, ncol, combined_width(mats, total_nnz));
    let colnames: Option<Vec<String>> = mats
        .iter()
        .map(|m| m.colnames().map(<[String]>::to_vec))
        .collect::<Option<Vec<_>>>()
        .map(|chunks| chunks.concat());
    if let Some(names) = colnames {
        out.set_colnames(names)?;
    }
    if let Some(names) = mats[0].rownames() {
        out.set_rownames(names.to_vec())?;
    }
    Ok(out)
}

/// Stack matrices on top of each other. All inputs must agree on `ncol`.
/// Each output column is rebuilt by walking the inputs in order and shifting
/// their row indices by the cumulative row offset, which keeps every column
/// strictly ascending without a sort. Width promotion as for [`cbind`].
pub fn rbind(mats: &[CscMatrixDyn]) -> Result<CscMatrixDyn> {
    if mats.is_empty() {
        return Err(DemarkError::EmptyData("rbind of no matrices".to_string()));
    }
    let ncol = mats[0].ncol();
    for m in &mats[1..] {
        if m.ncol() != ncol {
            return Err(DemarkError::DimensionMismatch {
                expected: format!("{} columns", ncol),
                actual: format!("{} columns", m.ncol()),
            });
        }
    }
    let total_nnz: usize = mats.iter().map(CscMatrixDyn::nnz).sum();
    let nrow: usize = mats.iter().map(CscMatrixDyn::nrow).sum();
    if nrow > MAX_DIM {
        return Err(DemarkError::MalformedMatrix(format!(
            "rbind result has {} rows, exceeding the 2^31 axis limit",
            nrow
        )));
    }

    let mut row_offsets = Vec::with_capacity(mats.len());
    let mut offset = 0usize;
    for m in mats {
        row_offsets.push(offset);
        offset += m.nrow();
    }

    let mut x = Vec::with_capacity(total_nnz);
    let mut i = Vec::with_capacity(total_nnz);
    let mut p = Vec::with_capacity(ncol + 1);
    p.push(0usize);
    for c in 0..ncol {
        for (m, &base) in mats.iter().zip(&row_offsets) {
            let (rows, vals) = col_entries(m, c);
            for (&r, &v) in rows.iter().zip(vals) {
                i.push(r + base as u32);
                x.push(v);
            }
        }
        p.push(x.len());
    }

    let mut out = build_with_width(x, i, p, nrow, ncol, combined_width(mats, total_nnz));
    let rownames: Option<Vec<String>> = mats
        .iter()
        .map(|m| m.rownames().map(<[String]>::to_vec))
        .collect::<Option<Vec<_>>>()
        .map(|chunks| chunks.concat());
    if let Some(names) = rownames {
        out.set_rownames(names)?;
    }
    if let Some(names) = mats[0].colnames() {
        out.set_colnames(names.to_vec())?;
    }
    Ok(out)
}

/// Per-column sums, one parallel task per column.
pub fn col_sums<P: ColPtr>(m: &CscMatrix<P>) -> Vec<f64> {
    (0..m.ncol())
        .into_par_iter()
        .map(|c| m.values()[m.col_range(c)].iter().sum::<f64>())
        .collect()
}

/// Per-row sums. The stored-entry range is split into contiguous chunks, each
/// worker scatter-adds into a private `nrow`-sized accumulator, and the
/// accumulators are reduced elementwise at the end; no locks in the hot path.
pub fn row_sums<P: ColPtr>(m: &CscMatrix<P>) -> Vec<f64> {
    let nrow = m.nrow();
    let nnz = m.nnz();
    if nnz == 0 {
        return vec![0.0; nrow];
    }
    let workers = rayon::current_num_threads().max(1);
    let chunk = nnz.div_ceil(workers);
    (0..nnz)
        .into_par_iter()
        .chunks(chunk)
        .map(|entries| {
            let mut local = vec![0.0f64; nrow];
            for k in entries {
                local[m.row_indices()[k] as usize] += m.values()[k];
            }
            local
        })
        .reduce(
            || vec![0.0f64; nrow],
            |mut acc, local| {
                for (a, l) in acc.iter_mut().zip(local) {
                    *a += l;
                }
                acc
            },
        )
}

impl CscMatrixDyn {
    pub fn transpose(&self) -> Result<CscMatrixDyn> {
        match self {
            CscMatrixDyn::I32(m) => transpose(m).map(CscMatrixDyn::from),
            CscMatrixDyn::I64(m) => transpose(m).map(CscMatrixDyn::from),
        }
    }

    pub fn to_dense(&self) -> Array2<f64> {
        match self {
            CscMatrixDyn::I32(m) => to_dense(m),
            CscMatrixDyn::I64(m) => to_dense(m),
        }
    }

    pub fn row_sums(&self) -> Vec<f64> {
        match self {
            CscMatrixDyn::I32(m) => row_sums(m),
            CscMatrixDyn::I64(m) => row_sums(m),
        }
    }

    pub fn col_sums(&self) -> Vec<f64> {
        match self {
            CscMatrixDyn::I32(m) => col_sums(m),
            CscMatrixDyn::I64(m) => col_sums(m),
        }
    }
}
