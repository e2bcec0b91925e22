//! Per-cluster reduction of one feature's non-zeros.
//!
//! This is the shared inner loop of every statistical kernel: a single pass
//! over a feature column scattering into per-cluster accumulators. Zero
//! counts are recovered afterwards from the precomputed cluster sizes
//! (`zeros_k = n_k - nz_k`), so the implicit mass of zeros never has to be
//! touched.

/// Per-cluster accumulators for one feature, caller-owned and reused across
/// features by each worker.
#[derive(Debug, Clone)]
pub struct ClusterAggregates {
    sums: Vec<f64>,
    nnz: Vec<u32>,
    sum_sq: Option<Vec<f64>>,
}

impl ClusterAggregates {
    pub fn new(k: usize, want_sum_sq: bool) -> Self {
        Self {
            sums: vec![0.0; k],
            nnz: vec![0; k],
            sum_sq: want_sum_sq.then(|| vec![0.0; k]),
        }
    }

    pub fn reset(&mut self) {
        self.sums.fill(0.0);
        self.nnz.fill(0);
        if let Some(sum_sq) = &mut self.sum_sq {
            sum_sq.fill(0.0);
        }
    }

    /// Number of clusters K.
    #[inline]
    pub fn k(&self) -> usize {
        self.sums.len()
    }

    /// Sum of non-zero values per cluster.
    #[inline]
    pub fn sums(&self) -> &[f64] {
        &self.sums
    }

    /// Count of non-zero entries per cluster.
    #[inline]
    pub fn nnz(&self) -> &[u32] {
        &self.nnz
    }

    /// Sum of squared non-zero values per cluster (t path only).
    #[inline]
    pub fn sum_sq(&self) -> Option<&[f64]> {
        self.sum_sq.as_deref()
    }

    /// Total stored entries across clusters.
    pub fn nnz_total(&self) -> usize {
        self.nnz.iter().map(|&n| n as usize).sum()
    }

    /// Total of all stored values.
    pub fn sum_total(&self) -> f64 {
        self.sums.iter().sum()
    }
}

/// Sorted distinct non-zero values of one feature with per-cluster counts:
/// the value-block decomposition the rank-sum kernel assembles ranks from.
///
/// `counts` is value-major (`values.len() x K`); peak size per worker is
/// O(K * distinct values), which is the rank-sum path's working set.
#[derive(Debug, Clone, Default)]
pub struct ValueHist {
    values: Vec<f64>,
    counts: Vec<u32>,
    totals: Vec<u32>,
    k: usize,
}

impl ValueHist {
    pub fn new(k: usize) -> Self {
        Self {
            values: Vec::new(),
            counts: Vec::new(),
            totals: Vec::new(),
            k,
        }
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.counts.clear();
        self.totals.clear();
    }

    /// Number of distinct non-zero values.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Distinct values, ascending.
    #[inline]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Per-cluster counts of the `d`-th distinct value.
    #[inline]
    pub fn counts_for(&self, d: usize) -> &[u32] {
        &self.counts[d * self.k..(d + 1) * self.k]
    }

    /// Count of the `d`-th distinct value across all clusters.
    #[inline]
    pub fn total_for(&self, d: usize) -> u32 {
        self.totals[d]
    }
}

/// Reducer with per-worker scratch, reused across features so the hot loop
/// allocates only when a feature has more distinct values than any before it.
#[derive(Debug)]
pub struct ClusterReducer {
    k: usize,
    pairs: Vec<(f64, u32)>,
}

impl ClusterReducer {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            pairs: Vec::new(),
        }
    }

    /// Reduce one feature given as parallel `(rows, values)` slices.
    ///
    /// `labels[rows[j]]` assigns each entry to a cluster. Explicitly stored
    /// zeros are skipped, matching their absence from a canonical matrix.
    /// When `hist` is supplied it is rebuilt with the feature's value-block
    /// decomposition (rank-sum path); the t path passes `None` and pays
    /// nothing for it.
    pub fn reduce(
        &mut self,
        rows: &[u32],
        values: &[f64],
        labels: &[u32],
        agg: &mut ClusterAggregates,
        hist: Option<&mut ValueHist>,
    ) {
        debug_assert_eq!(rows.len(), values.len());
        debug_assert_eq!(agg.k(), self.k);

        agg.reset();
        let want_hist = hist.is_some();
        if want_hist {
            self.pairs.clear();
        }

        for (&row, &v) in rows.iter().zip(values) {
            if v == 0.0 {
                continue;
            }
            let k = labels[row as usize] as usize;
            agg.sums[k] += v;
            agg.nnz[k] += 1;
            if let Some(sum_sq) = &mut agg.sum_sq {
                sum_sq[k] += v * v;
            }
            if want_hist {
                self.pairs.push((v, labels[row as usize]));
            }
        }

        if let Some(hist) = hist {
            debug_assert_eq!(hist.k, self.k);
            hist.clear();
            self.pairs.sort_unstable_by(|a, b| a.0.total_cmp(&b.0));
            let mut start = 0;
            while start < self.pairs.len() {
                let value = self.pairs[start].0;
                let mut end = start + 1;
                while end < self.pairs.len() && self.pairs[end].0 == value {
                    end += 1;
                }
                hist.values.push(value);
                let base = hist.counts.len();
                hist.counts.resize(base + self.k, 0);
                for &(_, label) in &self.pairs[start..end] {
                    hist.counts[base + label as usize] += 1;
                }
                hist.totals.push((end - start) as u32);
                start = end;
            }
        }
    }
}
