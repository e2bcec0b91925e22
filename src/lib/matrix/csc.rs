//! Compressed sparse column containers with 32- and 64-bit column pointers.
//!
//! Single-cell count matrices routinely exceed 2^31 non-zeros, at which point
//! the classic `i32` pointer array of the dgCMatrix layout overflows. The
//! containers here keep the dgCMatrix triple `(x, i, p)` but make the pointer
//! width a type parameter, with [`CscMatrixDyn`] carrying either width at
//! runtime so both kinds can flow through the same pipelines.

use crate::core::error::{DemarkError, Result};

/// Largest admissible axis length. Row indices are stored as `u32`, so a
/// dimension never exceeds 2^31 (matching the dgCMatrix limit).
pub const MAX_DIM: usize = 1 << 31;

/// Column-pointer integer. Implemented for `i32` (dgCMatrix-compatible) and
/// `i64` (large matrices); every kernel is generic over this so the two
/// widths share one code path.
pub trait ColPtr:
    Copy + Clone + Default + PartialEq + PartialOrd + Send + Sync + std::fmt::Debug + 'static
{
    /// Number of bits in the pointer, for diagnostics.
    const BITS: u32;
    /// Largest nnz this width can address.
    const MAX_NNZ: usize;

    fn from_usize(v: usize) -> Result<Self>;
    fn to_usize(self) -> usize;
}

impl ColPtr for i32 {
    const BITS: u32 = 32;
    const MAX_NNZ: usize = i32::MAX as usize;

    #[inline]
    fn from_usize(v: usize) -> Result<Self> {
        i32::try_from(v).map_err(|_| {
            DemarkError::Overflow(format!("value {} exceeds 32-bit column pointer range", v))
        })
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

impl ColPtr for i64 {
    const BITS: u32 = 64;
    const MAX_NNZ: usize = i64::MAX as usize;

    #[inline]
    fn from_usize(v: usize) -> Result<Self> {
        i64::try_from(v).map_err(|_| {
            DemarkError::Overflow(format!("value {} exceeds 64-bit column pointer range", v))
        })
    }

    #[inline]
    fn to_usize(self) -> usize {
        self as usize
    }
}

/// A sparse matrix in CSC format.
///
/// Invariants (enforced by [`CscMatrix::from_parts`], assumed everywhere else):
/// - `p` has `ncol + 1` entries, `p[0] == 0`, `p[ncol] == nnz`, non-decreasing;
/// - row indices are strictly ascending within each column and `< nrow`;
/// - no explicit zeros are stored (consumers still tolerate them);
/// - dimension name vectors, when present, match the axis lengths.
#[derive(Debug, Clone, PartialEq)]
pub struct CscMatrix<P: ColPtr = i64> {
    x: Vec<f64>,
    i: Vec<u32>,
    p: Vec<P>,
    nrow: usize,
    ncol: usize,
    rownames: Option<Vec<String>>,
    colnames: Option<Vec<String>>,
}

/// dgCMatrix-compatible narrow variant.
pub type CscMatrix32 = CscMatrix<i32>;
/// Large variant whose pointer array may address more than 2^31 non-zeros.
pub type CscMatrix64 = CscMatrix<i64>;

impl<P: ColPtr> CscMatrix<P> {
    /// Allocate a zero-filled triple for `nnz` entries, to be populated by a
    /// rebuild-style operation. Fails before allocating when the requested
    /// nnz does not fit the pointer width or a dimension is out of range.
    pub fn with_nnz(nrow: usize, ncol: usize, nnz: usize) -> Result<Self> {
        if nrow > MAX_DIM || ncol > MAX_DIM {
            return Err(DemarkError::MalformedMatrix(format!(
                "dimension {}x{} exceeds the 2^31 axis limit",
                nrow, ncol
            )));
        }
        if nnz > P::MAX_NNZ {
            return Err(DemarkError::Overflow(format!(
                "{} non-zeros do not fit a {}-bit column pointer",
                nnz,
                P::BITS
            )));
        }
        Ok(Self {
            x: vec![0.0; nnz],
            i: vec![0; nnz],
            p: vec![P::default(); ncol + 1],
            nrow,
            ncol,
            rownames: None,
            colnames: None,
        })
    }

    /// Validate a raw triple and take ownership of it.
    pub fn from_parts(
        x: Vec<f64>,
        i: Vec<u32>,
        p: Vec<P>,
        nrow: usize,
        ncol: usize,
    ) -> Result<Self> {
        let m = Self {
            x,
            i,
            p,
            nrow,
            ncol,
            rownames: None,
            colnames: None,
        };
        m.validate()?;
        Ok(m)
    }

    /// Take ownership of a triple that is already known to satisfy the CSC
    /// invariants, e.g. the output of a rebuild-style operation. Feeding an
    /// invalid triple through this constructor is a logic error.
    pub fn from_parts_unchecked(
        x: Vec<f64>,
        i: Vec<u32>,
        p: Vec<P>,
        nrow: usize,
        ncol: usize,
    ) -> Self {
        debug_assert_eq!(p.len(), ncol + 1);
        debug_assert_eq!(x.len(), i.len());
        Self {
            x,
            i,
            p,
            nrow,
            ncol,
            rownames: None,
            colnames: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.nrow > MAX_DIM || self.ncol > MAX_DIM {
            return Err(DemarkError::MalformedMatrix(format!(
                "dimension {}x{} exceeds the 2^31 axis limit",
                self.nrow, self.ncol
            )));
        }
        if self.p.len() != self.ncol + 1 {
            return Err(DemarkError::MalformedMatrix(format!(
                "pointer array has {} entries, expected ncol + 1 = {}",
                self.p.len(),
                self.ncol + 1
            )));
        }
        if self.x.len() != self.i.len() {
            return Err(DemarkError::MalformedMatrix(format!(
                "value and row-index arrays disagree: {} vs {}",
                self.x.len(),
                self.i.len()
            )));
        }
        if self.p[0].to_usize() != 0 {
            return Err(DemarkError::MalformedMatrix(
                "pointer array must start at 0".to_string(),
            ));
        }
        if self.p[self.ncol].to_usize() != self.x.len() {
            return Err(DemarkError::MalformedMatrix(format!(
                "pointer array ends at {} but {} entries are stored",
                self.p[self.ncol].to_usize(),
                self.x.len()
            )));
        }
        for c in 0..self.ncol {
            let lo = self.p[c].to_usize();
            let hi = self.p[c + 1].to_usize();
            if lo > hi {
                return Err(DemarkError::MalformedMatrix(format!(
                    "pointer array decreases at column {}",
                    c
                )));
            }
            let mut prev: Option<u32> = None;
            for k in lo..hi {
                let row = self.i[k];
                if row as usize >= self.nrow {
                    return Err(DemarkError::MalformedMatrix(format!(
                        "row index {} out of range in column {} ({} rows)",
                        row, c, self.nrow
                    )));
                }
                if let Some(prev) = prev {
                    if row <= prev {
                        return Err(DemarkError::MalformedMatrix(format!(
                            "row indices not strictly ascending in column {}",
                            c
                        )));
                    }
                }
                prev = Some(row);
                if self.x[k] == 0.0 {
                    return Err(DemarkError::MalformedMatrix(format!(
                        "explicit zero stored at ({}, {})",
                        row, c
                    )));
                }
            }
        }
        Ok(())
    }

    /// Attach row names; the vector length must match `nrow`.
    pub fn set_rownames(&mut self, names: Vec<String>) -> Result<()> {
        if names.len() != self.nrow {
            return Err(DemarkError::DimensionMismatch {
                expected: format!("{} row names", self.nrow),
                actual: format!("{}", names.len()),
            });
        }
        self.rownames = Some(names);
        Ok(())
    }

    /// Attach column names; the vector length must match `ncol`.
    pub fn set_colnames(&mut self, names: Vec<String>) -> Result<()> {
        if names.len() != self.ncol {
            return Err(DemarkError::DimensionMismatch {
                expected: format!("{} column names", self.ncol),
                actual: format!("{}", names.len()),
            });
        }
        self.colnames = Some(names);
        Ok(())
    }

    pub(crate) fn set_names_unchecked(
        &mut self,
        rownames: Option<Vec<String>>,
        colnames: Option<Vec<String>>,
    ) {
        self.rownames = rownames;
        self.colnames = colnames;
    }

    #[inline]
    pub fn nrow(&self) -> usize {
        self.nrow
    }

    #[inline]
    pub fn ncol(&self) -> usize {
        self.ncol
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.p[self.ncol].to_usize()
    }

    #[inline]
    pub fn dim(&self) -> (usize, usize) {
        (self.nrow, self.ncol)
    }

    pub fn rownames(&self) -> Option<&[String]> {
        self.rownames.as_deref()
    }

    pub fn colnames(&self) -> Option<&[String]> {
        self.colnames.as_deref()
    }

    /// Stored values, column-contiguous.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.x
    }

    /// Row index of each stored value.
    #[inline]
    pub fn row_indices(&self) -> &[u32] {
        &self.i
    }

    /// Column offsets, `ncol + 1` entries.
    #[inline]
    pub fn col_ptrs(&self) -> &[P] {
        &self.p
    }

    /// Storage range of column `c` within `values()` / `row_indices()`.
    #[inline]
    pub fn col_range(&self, c: usize) -> std::ops::Range<usize> {
        self.p[c].to_usize()..self.p[c + 1].to_usize()
    }

    /// Iterate the `(row, value)` pairs of column `c`, ascending by row.
    pub fn col(&self, c: usize) -> impl Iterator<Item = (u32, f64)> + '_ {
        let range = self.col_range(c);
        self.i[range.clone()]
            .iter()
            .copied()
            .zip(self.x[range].iter().copied())
    }

    /// Value at `(row, col)`, zero when no entry is stored. Binary search per
    /// lookup; intended for tests and spot checks, not hot loops.
    pub fn get(&self, row: usize, col: usize) -> f64 {
        let range = self.col_range(col);
        match self.i[range.clone()].binary_search(&(row as u32)) {
            Ok(offset) => self.x[range.start + offset],
            Err(_) => 0.0,
        }
    }

    /// Fraction of entries that are stored.
    pub fn density(&self) -> f64 {
        let total = self.nrow as f64 * self.ncol as f64;
        if total == 0.0 {
            return 0.0;
        }
        self.nnz() as f64 / total
    }

    /// Re-point the triple at a different pointer width, failing with
    /// `Overflow` when nnz does not fit the target.
    pub fn to_width<Q: ColPtr>(&self) -> Result<CscMatrix<Q>> {
        if self.nnz() > Q::MAX_NNZ {
            return Err(DemarkError::Overflow(format!(
                "{} non-zeros do not fit a {}-bit column pointer",
                self.nnz(),
                Q::BITS
            )));
        }
        let p: Vec<Q> = self
            .p
            .iter()
            .map(|&v| Q::from_usize(v.to_usize()))
            .collect::<Result<_>>()?;
        let mut out = CscMatrix::from_parts_unchecked(
            self.x.clone(),
            self.i.clone(),
            p,
            self.nrow,
            self.ncol,
        );
        out.set_names_unchecked(self.rownames.clone(), self.colnames.clone());
        Ok(out)
    }
}

/// Pointer width selector for freshly built matrices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtrWidth {
    I32,
    I64,
}

/// Narrowest width that can address `nnz` stored entries.
#[inline]
pub fn required_width(nnz: usize) -> PtrWidth {
    if nnz > i32::MAX as usize {
        PtrWidth::I64
    } else {
        PtrWidth::I32
    }
}

/// A CSC matrix of either pointer width.
///
/// I/O promotes to 64-bit on read when nnz demands it; concatenation widens
/// when any input is wide or the combined nnz overflows 32 bits. Kernels
/// dispatch through this enum into the width-generic implementations.
#[derive(Debug, Clone, PartialEq)]
pub enum CscMatrixDyn {
    I32(CscMatrix<i32>),
    I64(CscMatrix<i64>),
}

impl CscMatrixDyn {
    pub fn nrow(&self) -> usize {
        match self {
            CscMatrixDyn::I32(m) => m.nrow(),
            CscMatrixDyn::I64(m) => m.nrow(),
        }
    }

    pub fn ncol(&self) -> usize {
        match self {
            CscMatrixDyn::I32(m) => m.ncol(),
            CscMatrixDyn::I64(m) => m.ncol(),
        }
    }

    pub fn nnz(&self) -> usize {
        match self {
            CscMatrixDyn::I32(m) => m.nnz(),
            CscMatrixDyn::I64(m) => m.nnz(),
        }
    }

    pub fn width(&self) -> PtrWidth {
        match self {
            CscMatrixDyn::I32(_) => PtrWidth::I32,
            CscMatrixDyn::I64(_) => PtrWidth::I64,
        }
    }

    pub fn rownames(&self) -> Option<&[String]> {
        match self {
            CscMatrixDyn::I32(m) => m.rownames(),
            CscMatrixDyn::I64(m) => m.rownames(),
        }
    }

    pub fn colnames(&self) -> Option<&[String]> {
        match self {
            CscMatrixDyn::I32(m) => m.colnames(),
            CscMatrixDyn::I64(m) => m.colnames(),
        }
    }

    pub fn set_rownames(&mut self, names: Vec<String>) -> Result<()> {
        match self {
            CscMatrixDyn::I32(m) => m.set_rownames(names),
            CscMatrixDyn::I64(m) => m.set_rownames(names),
        }
    }

    pub fn set_colnames(&mut self, names: Vec<String>) -> Result<()> {
        match self {
            CscMatrixDyn::I32(m) => m.set_colnames(names),
            CscMatrixDyn::I64(m) => m.set_colnames(names),
        }
    }

    /// Narrow to 32-bit pointers; fails with `Overflow` when nnz does not fit.
    pub fn to_i32(&self) -> Result<CscMatrix<i32>> {
        match self {
            CscMatrixDyn::I32(m) => Ok(m.clone()),
            CscMatrixDyn::I64(m) => m.to_width::<i32>(),
        }
    }

    /// Widen to 64-bit pointers; always succeeds.
    pub fn to_i64(&self) -> CscMatrix<i64> {
        match self {
            CscMatrixDyn::I32(m) => m
                .to_width::<i64>()
                .expect("widening a column pointer cannot overflow"),
            CscMatrixDyn::I64(m) => m.clone(),
        }
    }
}

impl From<CscMatrix<i32>> for CscMatrixDyn {
    fn from(m: CscMatrix<i32>) -> Self {
        CscMatrixDyn::I32(m)
    }
}

impl From<CscMatrix<i64>> for CscMatrixDyn {
    fn from(m: CscMatrix<i64>) -> Self {
        CscMatrixDyn::I64(m)
    }
}
