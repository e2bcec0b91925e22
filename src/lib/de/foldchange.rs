//! Fold-change and detection-rate kernel.
//!
//! Consumes the reducer's per-cluster sums and non-zero counts; the cluster
//! mean divides by the full cluster size, so the implicit zeros weigh in
//! without being visited.

use crate::core::error::{DemarkError, Result};
use crate::de::config::DeConfig;
use crate::de::labels::ClusterLabels;
use crate::de::reduce::{ClusterAggregates, ClusterReducer};
use crate::matrix::csc::{ColPtr, CscMatrix};
use ndarray::Array2;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct FoldChangeOptions {
    /// Added inside the log when comparing de-normalized means.
    pub pseudocount: f64,
    /// Base of the reported log fold-change.
    pub log_base: f64,
    /// Treat the input as log1p-normalized and invert with `expm1` before
    /// comparing means; when off, the fold-change is the plain difference of
    /// means (already-scaled data).
    pub use_expm1: bool,
}

impl Default for FoldChangeOptions {
    fn default() -> Self {
        Self {
            pseudocount: 1.0,
            log_base: 2.0,
            use_expm1: true,
        }
    }
}

impl From<&DeConfig> for FoldChangeOptions {
    fn from(config: &DeConfig) -> Self {
        Self {
            pseudocount: config.pseudocount,
            log_base: config.log_base,
            use_expm1: config.use_expm1,
        }
    }
}

/// Fold-change statistics of one (feature, cluster) pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FoldChange {
    /// Mean over the cluster (zeros included).
    pub mean_in: f64,
    /// Mean over the complement.
    pub mean_out: f64,
    /// Log fold-change per the configured base/pseudocount semantics.
    pub log_fc: f64,
    /// Detection rate in the cluster (pct.1).
    pub pct_in: f64,
    /// Detection rate in the complement (pct.2).
    pub pct_out: f64,
}

/// Fill `out` with the fold-change statistics of every cluster for one
/// feature. Empty sides report zero means and detection rates.
pub(crate) fn fold_change_feature(
    agg: &ClusterAggregates,
    sizes: &[usize],
    n_samples: usize,
    opts: &FoldChangeOptions,
    out: &mut [FoldChange],
) {
    let sum_total = agg.sum_total();
    let nnz_total = agg.nnz_total();
    let log_base = opts.log_base.ln();

    for kk in 0..agg.k() {
        let n1 = sizes[kk] as f64;
        let n2 = (n_samples - sizes[kk]) as f64;
        let sum1 = agg.sums()[kk];
        let nz1 = agg.nnz()[kk] as f64;

        let mean_in = if n1 > 0.0 { sum1 / n1 } else { 0.0 };
        let mean_out = if n2 > 0.0 { (sum_total - sum1) / n2 } else { 0.0 };
        let pct_in = if n1 > 0.0 { nz1 / n1 } else { 0.0 };
        let pct_out = if n2 > 0.0 {
            (nnz_total as f64 - nz1) / n2
        } else {
            0.0
        };

        let log_fc = if opts.use_expm1 {
            ((mean_in.exp_m1() + opts.pseudocount).ln()
                - (mean_out.exp_m1() + opts.pseudocount).ln())
                / log_base
        } else {
            mean_in - mean_out
        };

        out[kk] = FoldChange {
            mean_in,
            mean_out,
            log_fc,
            pct_in,
            pct_out,
        };
    }
}

/// Wide view of the fold-change kernel: `F x K` arrays of log fold-changes
/// and detection rates.
#[derive(Debug, Clone)]
pub struct FoldChangeMatrix {
    pub log_fc: Array2<f64>,
    pub pct_in: Array2<f64>,
    pub pct_out: Array2<f64>,
}

/// Fold-change statistics for every (feature, cluster) pair; `matrix` is
/// samples x features.
pub fn fold_change_matrix<P: ColPtr>(
    matrix: &CscMatrix<P>,
    labels: &ClusterLabels,
    opts: &FoldChangeOptions,
) -> Result<FoldChangeMatrix> {
    if labels.len() != matrix.nrow() {
        return Err(DemarkError::DimensionMismatch {
            expected: format!("{} cluster labels (one per sample)", matrix.nrow()),
            actual: format!("{}", labels.len()),
        });
    }
    let k = labels.n_clusters();
    let n_features = matrix.ncol();

    let per_feature: Vec<Vec<FoldChange>> = (0..n_features)
        .into_par_iter()
        .map_init(
            || (ClusterReducer::new(k), ClusterAggregates::new(k, false)),
            |(reducer, agg), f| {
                let range = matrix.col_range(f);
                reducer.reduce(
                    &matrix.row_indices()[range.clone()],
                    &matrix.values()[range],
                    labels.ids(),
                    agg,
                    None,
                );
                let mut fc = vec![FoldChange::default(); k];
                fold_change_feature(agg, labels.sizes(), labels.len(), opts, &mut fc);
                fc
            },
        )
        .collect();

    let mut log_fc = Array2::zeros((n_features, k));
    let mut pct_in = Array2::zeros((n_features, k));
    let mut pct_out = Array2::zeros((n_features, k));
    for (f, row) in per_feature.iter().enumerate() {
        for (kk, fc) in row.iter().enumerate() {
            log_fc[[f, kk]] = fc.log_fc;
            pct_in[[f, kk]] = fc.pct_in;
            pct_out[[f, kk]] = fc.pct_out;
        }
    }
    Ok(FoldChangeMatrix {
        log_fc,
        pct_in,
        pct_out,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn run_kernel(
        feature: &[f64],
        labels: &ClusterLabels,
        opts: &FoldChangeOptions,
    ) -> Vec<FoldChange> {
        let k = labels.n_clusters();
        let mut reducer = ClusterReducer::new(k);
        let mut agg = ClusterAggregates::new(k, false);
        let rows: Vec<u32> = (0..feature.len() as u32).collect();
        reducer.reduce(&rows, feature, labels.ids(), &mut agg, None);
        let mut fc = vec![FoldChange::default(); k];
        fold_change_feature(&agg, labels.sizes(), labels.len(), opts, &mut fc);
        fc
    }

    #[test]
    fn means_and_detection_rates() {
        let labels = ClusterLabels::from_ids(vec![0, 0, 1, 1]).unwrap();
        let fc = run_kernel(&[1.0, 0.0, 0.5, 0.5], &labels, &FoldChangeOptions::default());
        assert_abs_diff_eq!(fc[0].mean_in, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(fc[0].mean_out, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(fc[0].pct_in, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(fc[0].pct_out, 1.0, epsilon = 1e-12);
        // Cluster 1 mirrors cluster 0.
        assert_abs_diff_eq!(fc[1].pct_in, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fc[1].pct_out, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn expm1_log2_fold_change() {
        let labels = ClusterLabels::from_ids(vec![0, 0, 1, 1]).unwrap();
        let fc = run_kernel(&[1.0, 0.0, 0.0, 0.0], &labels, &FoldChangeOptions::default());
        // mean_in = 0.5 on the log1p scale; de-normalized fold change is
        // log2(expm1(0.5) + 1) - log2(expm1(0) + 1).
        let expected = (0.5_f64.exp_m1() + 1.0).log2();
        assert_abs_diff_eq!(fc[0].log_fc, expected, epsilon = 1e-12);
        assert_abs_diff_eq!(fc[0].log_fc, 0.7213, epsilon = 1e-4);
        assert!(fc[1].log_fc < 0.0);
    }

    #[test]
    fn scale_data_fold_change_is_mean_difference() {
        let labels = ClusterLabels::from_ids(vec![0, 0, 1, 1]).unwrap();
        let opts = FoldChangeOptions {
            use_expm1: false,
            ..Default::default()
        };
        let fc = run_kernel(&[2.0, 1.0, -1.0, 0.0], &labels, &opts);
        assert_abs_diff_eq!(fc[0].log_fc, 1.5 - (-0.5), epsilon = 1e-12);
        assert_abs_diff_eq!(fc[1].log_fc, -0.5 - 1.5, epsilon = 1e-12);
    }

    #[test]
    fn log_base_rescales() {
        let labels = ClusterLabels::from_ids(vec![0, 0, 1, 1]).unwrap();
        let base2 = run_kernel(&[1.0, 1.0, 0.0, 0.0], &labels, &FoldChangeOptions::default());
        let natural = run_kernel(
            &[1.0, 1.0, 0.0, 0.0],
            &labels,
            &FoldChangeOptions {
                log_base: std::f64::consts::E,
                ..Default::default()
            },
        );
        assert_abs_diff_eq!(
            base2[0].log_fc,
            natural[0].log_fc / 2.0_f64.ln(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn empty_cluster_sides() {
        let labels = ClusterLabels::from_ids_with_k(vec![0, 0, 0, 0], 2).unwrap();
        let fc = run_kernel(&[1.0, 2.0, 0.0, 3.0], &labels, &FoldChangeOptions::default());
        // Cluster 1 is empty: zero mean and detection inside, everything outside.
        assert_eq!(fc[1].mean_in, 0.0);
        assert_eq!(fc[1].pct_in, 0.0);
        assert_abs_diff_eq!(fc[1].mean_out, 1.5, epsilon = 1e-12);
        // Cluster 0 owns every sample: the complement is empty.
        assert_eq!(fc[0].mean_out, 0.0);
        assert_eq!(fc[0].pct_out, 0.0);
    }

    #[test]
    fn all_zero_feature() {
        let labels = ClusterLabels::from_ids(vec![0, 1, 0, 1]).unwrap();
        let fc = run_kernel(&[0.0; 4], &labels, &FoldChangeOptions::default());
        for entry in fc {
            assert_eq!(entry.pct_in, 0.0);
            assert_eq!(entry.pct_out, 0.0);
            assert_eq!(entry.log_fc, 0.0);
        }
    }

    #[test]
    fn matrix_view_shapes() {
        let dense = ndarray::arr2(&[[1.0, 0.0], [0.0, 2.0], [1.0, 0.0], [0.0, 0.0]]);
        let sparse = crate::matrix::ops::from_dense(dense.view()).to_i64();
        let labels = ClusterLabels::from_ids(vec![0, 0, 1, 1]).unwrap();
        let fc = fold_change_matrix(&sparse, &labels, &FoldChangeOptions::default()).unwrap();
        assert_eq!(fc.log_fc.dim(), (2, 2));
        assert_abs_diff_eq!(fc.pct_in[[0, 0]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(fc.pct_out[[0, 0]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(fc.pct_in[[1, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(fc.pct_out[[1, 1]], 0.5, epsilon = 1e-12);
    }
}
