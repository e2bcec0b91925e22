//! Sparsity-aware Wilcoxon-Mann-Whitney rank-sum kernel.
//!
//! With log-normalized expression the vast majority of samples share the
//! value zero, so ranks collapse into one giant zero block plus one block per
//! distinct non-zero value. The reducer's histogram is exactly the
//! per-cluster decomposition of those blocks, which lets the rank sum of
//! every cluster be assembled arithmetically in O(distinct values * K) per
//! feature; no sample-level sort ever happens.

use crate::core::error::{DemarkError, Result};
use crate::de::config::{Alternative, DeConfig};
use crate::de::labels::ClusterLabels;
use crate::de::reduce::{ClusterAggregates, ClusterReducer, ValueHist};
use crate::matrix::csc::{ColPtr, CscMatrix};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};

#[derive(Debug, Clone)]
pub struct RankSumOptions {
    pub continuity_correction: bool,
    pub alternative: Alternative,
}

impl Default for RankSumOptions {
    fn default() -> Self {
        Self {
            continuity_correction: true,
            alternative: Alternative::TwoSided,
        }
    }
}

impl From<&DeConfig> for RankSumOptions {
    fn from(config: &DeConfig) -> Self {
        Self {
            continuity_correction: config.continuity_correction,
            alternative: config.alternative,
        }
    }
}

/// Worker-local kernel state: the per-cluster rank-sum accumulator and the
/// standard normal used for the approximation.
#[derive(Debug)]
pub(crate) struct RankSumKernel {
    rank_sums: Vec<f64>,
    normal: Normal,
}

impl RankSumKernel {
    pub(crate) fn new(k: usize) -> Self {
        Self {
            rank_sums: vec![0.0; k],
            normal: Normal::new(0.0, 1.0).expect("standard normal parameters are valid"),
        }
    }

    /// Fill `out_p` with the one-vs-rest p-value of every cluster for one
    /// feature; `out_u` (when wanted) receives the raw U statistics.
    ///
    /// Zeros occupy the lowest ranks `1..=Z`; this leans on non-negative
    /// expression values (negative inputs would have to rank below the zero
    /// block and are not handled).
    pub(crate) fn compute(
        &mut self,
        agg: &ClusterAggregates,
        hist: &ValueHist,
        sizes: &[usize],
        n_samples: usize,
        opts: &RankSumOptions,
        out_p: &mut [f64],
        mut out_u: Option<&mut [f64]>,
    ) {
        let k = agg.k();
        let n = n_samples as f64;
        let zeros_total = (n_samples - agg.nnz_total()) as f64;

        // Zero block: ranks 1..=Z, mean (Z + 1) / 2.
        let zero_mean_rank = (zeros_total + 1.0) / 2.0;
        for kk in 0..k {
            let zeros_k = (sizes[kk] - agg.nnz()[kk] as usize) as f64;
            self.rank_sums[kk] = zeros_k * zero_mean_rank;
        }

        // Walk the value blocks in ascending order, accumulating mean ranks
        // and the tie term over all N samples (zero block included).
        let mut tie_sum = zeros_total * zeros_total * zeros_total - zeros_total;
        let mut below = zeros_total;
        for d in 0..hist.len() {
            let t = hist.total_for(d) as f64;
            let mean_rank = below + (t + 1.0) / 2.0;
            for (kk, &count) in hist.counts_for(d).iter().enumerate() {
                if count > 0 {
                    self.rank_sums[kk] += mean_rank * count as f64;
                }
            }
            tie_sum += t * t * t - t;
            below += t;
        }

        let tie_correction = if n > 1.0 { tie_sum / (n * (n - 1.0)) } else { 0.0 };
        let c = if opts.continuity_correction { 0.5 } else { 0.0 };

        for kk in 0..k {
            let n1 = sizes[kk] as f64;
            let n2 = n - n1;
            let u = self.rank_sums[kk] - n1 * (n1 + 1.0) / 2.0;
            if let Some(out_u) = out_u.as_deref_mut() {
                out_u[kk] = u;
            }
            if n1 == 0.0 || n2 == 0.0 {
                out_p[kk] = 1.0;
                continue;
            }
            let mu = n1 * n2 / 2.0;
            let sigma2 = n1 * n2 / 12.0 * ((n + 1.0) - tie_correction);
            if sigma2 <= 0.0 {
                out_p[kk] = 1.0;
                continue;
            }
            let sd = sigma2.sqrt();
            let p = match opts.alternative {
                Alternative::TwoSided => {
                    let diff = u - mu;
                    let correction = if diff == 0.0 { 0.0 } else { c * diff.signum() };
                    let z = (diff - correction) / sd;
                    2.0 * self.normal.cdf(-z.abs())
                }
                Alternative::Greater => {
                    let z = (u - mu - c) / sd;
                    1.0 - self.normal.cdf(z)
                }
                Alternative::Less => {
                    let z = (u - mu + c) / sd;
                    self.normal.cdf(z)
                }
            };
            out_p[kk] = p.clamp(0.0, 1.0);
        }
    }
}

fn check_labels(n_samples: usize, labels: &ClusterLabels) -> Result<()> {
    if labels.len() != n_samples {
        return Err(DemarkError::DimensionMismatch {
            expected: format!("{} cluster labels (one per sample)", n_samples),
            actual: format!("{}", labels.len()),
        });
    }
    Ok(())
}

/// One-vs-rest WMW p-values for every (feature, cluster) pair.
///
/// `matrix` is samples x features (features as columns); the returned array
/// is `F x K`. Parallel over features with worker-local scratch.
pub fn rank_sum_matrix<P: ColPtr>(
    matrix: &CscMatrix<P>,
    labels: &ClusterLabels,
    opts: &RankSumOptions,
) -> Result<Array2<f64>> {
    check_labels(matrix.nrow(), labels)?;
    let k = labels.n_clusters();
    let n_features = matrix.ncol();

    let per_feature: Vec<Vec<f64>> = (0..n_features)
        .into_par_iter()
        .map_init(
            || {
                (
                    ClusterReducer::new(k),
                    ClusterAggregates::new(k, false),
                    ValueHist::new(k),
                    RankSumKernel::new(k),
                )
            },
            |(reducer, agg, hist, kernel), f| {
                let range = matrix.col_range(f);
                reducer.reduce(
                    &matrix.row_indices()[range.clone()],
                    &matrix.values()[range],
                    labels.ids(),
                    agg,
                    Some(&mut *hist),
                );
                let mut p = vec![0.0; k];
                kernel.compute(agg, hist, labels.sizes(), labels.len(), opts, &mut p, None);
                p
            },
        )
        .collect();

    let flat: Vec<f64> = per_feature.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_features, k), flat)
        .expect("per-feature results have uniform length"))
}

/// Dense-input variant: gathers each feature's non-zeros in ascending sample
/// order and reuses the sparse reduction, so p-values match the CSC path
/// bit for bit (the summation order is identical).
pub fn rank_sum_dense(
    matrix: ArrayView2<f64>,
    labels: &ClusterLabels,
    opts: &RankSumOptions,
) -> Result<Array2<f64>> {
    check_labels(matrix.nrows(), labels)?;
    let k = labels.n_clusters();
    let n_features = matrix.ncols();

    let per_feature: Vec<Vec<f64>> = (0..n_features)
        .into_par_iter()
        .map_init(
            || {
                (
                    ClusterReducer::new(k),
                    ClusterAggregates::new(k, false),
                    ValueHist::new(k),
                    RankSumKernel::new(k),
                    Vec::new(),
                    Vec::new(),
                )
            },
            |(reducer, agg, hist, kernel, rows, values), f| {
                gather_nonzeros(&matrix, f, rows, values);
                reducer.reduce(rows, values, labels.ids(), agg, Some(&mut *hist));
                let mut p = vec![0.0; k];
                kernel.compute(agg, hist, labels.sizes(), labels.len(), opts, &mut p, None);
                p
            },
        )
        .collect();

    let flat: Vec<f64> = per_feature.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_features, k), flat)
        .expect("per-feature results have uniform length"))
}

/// Collect the non-zeros of dense column `f`, ascending by sample index.
pub(crate) fn gather_nonzeros(
    matrix: &ArrayView2<f64>,
    f: usize,
    rows: &mut Vec<u32>,
    values: &mut Vec<f64>,
) {
    rows.clear();
    values.clear();
    for (s, &v) in matrix.column(f).iter().enumerate() {
        if v != 0.0 {
            rows.push(s as u32);
            values.push(v);
        }
    }
}
