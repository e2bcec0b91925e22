//! One-vs-rest marker-finding driver.
//!
//! Canonicalizes the input to samples x features, runs the selected kernel
//! and the fold-change kernel in one parallel pass over features, then
//! filters, ranks, and adjusts into the long marker table.

use crate::core::error::{DemarkError, Result};
use crate::de::config::{DeConfig, TestKind};
use crate::de::filter::{filter_and_rank, FilterOptions, MarkerRow};
use crate::de::foldchange::{fold_change_feature, FoldChange, FoldChangeOptions};
use crate::de::labels::ClusterLabels;
use crate::de::reduce::{ClusterAggregates, ClusterReducer, ValueHist};
use crate::de::ttest::{t_test_feature, TTestOptions};
use crate::de::wilcoxon::{RankSumKernel, RankSumOptions};
use crate::matrix::csc::{ColPtr, CscMatrix, CscMatrixDyn};
use crate::matrix::ops::transpose;
use log::info;
use rayon::prelude::*;
use smallvec::{smallvec, SmallVec};
use std::io::Write;
use std::time::Instant;

/// Per-feature buffer sized for the common small-K case.
type ClusterVec<T> = SmallVec<[T; 16]>;

/// The long-format result table, ordered per the filter/rank step, with the
/// presentation names resolved from the matrix dimnames and cluster labels.
#[derive(Debug, Clone)]
pub struct MarkerTable {
    rows: Vec<MarkerRow>,
    feature_names: Vec<String>,
    cluster_names: Vec<String>,
    total_features: usize,
}

impl MarkerTable {
    /// Surviving rows in their final order.
    pub fn rows(&self) -> &[MarkerRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Feature count of the whole input (the Bonferroni factor).
    pub fn total_features(&self) -> usize {
        self.total_features
    }

    pub fn feature_name(&self, row: &MarkerRow) -> &str {
        &self.feature_names[row.feature_index]
    }

    pub fn cluster_name(&self, row: &MarkerRow) -> &str {
        &self.cluster_names[row.cluster as usize]
    }

    /// Serialize as TSV with the column order
    /// `p_val, p_val_adj, avg_logFC, pct.1, pct.2, cluster, gene`.
    pub fn write_tsv<W: Write>(&self, writer: &mut csv::Writer<W>) -> Result<()> {
        writer.write_record([
            "p_val",
            "p_val_adj",
            "avg_logFC",
            "pct.1",
            "pct.2",
            "cluster",
            "gene",
        ])?;
        for row in &self.rows {
            writer.write_record([
                format!("{:e}", row.p_val).as_str(),
                format!("{:e}", row.p_val_adj).as_str(),
                format!("{}", row.avg_log_fc).as_str(),
                format!("{}", row.pct_in).as_str(),
                format!("{}", row.pct_out).as_str(),
                self.cluster_name(row),
                self.feature_name(row),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Run one-vs-rest differential expression and return the marker table.
///
/// `features_as_rows` says which axis of `matrix` carries the features; the
/// features-in-rows layout (the 10x convention) is canonicalized with one
/// transpose. `labels` assigns a cluster to every sample.
pub fn find_markers<P: ColPtr>(
    matrix: &CscMatrix<P>,
    labels: &ClusterLabels,
    features_as_rows: bool,
    config: &DeConfig,
) -> Result<MarkerTable> {
    let start = Instant::now();

    let transposed;
    let canonical: &CscMatrix<P> = if features_as_rows {
        transposed = transpose(matrix)?;
        &transposed
    } else {
        matrix
    };

    if labels.len() != canonical.nrow() {
        return Err(DemarkError::DimensionMismatch {
            expected: format!("{} cluster labels (one per sample)", canonical.nrow()),
            actual: format!("{}", labels.len()),
        });
    }

    let n_samples = canonical.nrow();
    let n_features = canonical.ncol();
    let k = labels.n_clusters();
    info!(
        "Testing {} features over {} samples in {} clusters ({} test, {} threads)",
        n_features, n_samples, k, config.test, config.threads
    );

    let threads = crate::core::concurrency::determine_allowed_cpus(config.threads as usize)
        .map_err(|e| DemarkError::InvalidInput(e.to_string()))?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| DemarkError::InvalidInput(format!("failed to build worker pool: {}", e)))?;

    let test = config.test;
    let rank_sum_opts = RankSumOptions::from(config);
    let t_opts = TTestOptions::from(config);
    let fc_opts = FoldChangeOptions::from(config);
    let want_hist = test == TestKind::RankSum;
    let want_sum_sq = test == TestKind::StudentT;

    let stats: Vec<(ClusterVec<f64>, ClusterVec<FoldChange>)> = pool.install(|| {
        (0..n_features)
            .into_par_iter()
            .map_init(
                || {
                    (
                        ClusterReducer::new(k),
                        ClusterAggregates::new(k, want_sum_sq),
                        ValueHist::new(k),
                        RankSumKernel::new(k),
                    )
                },
                |(reducer, agg, hist, kernel), f| {
                    let range = canonical.col_range(f);
                    reducer.reduce(
                        &canonical.row_indices()[range.clone()],
                        &canonical.values()[range],
                        labels.ids(),
                        agg,
                        want_hist.then_some(&mut *hist),
                    );
                    let mut p: ClusterVec<f64> = smallvec![0.0; k];
                    match test {
                        TestKind::RankSum => kernel.compute(
                            agg,
                            hist,
                            labels.sizes(),
                            n_samples,
                            &rank_sum_opts,
                            &mut p,
                            None,
                        ),
                        TestKind::StudentT => {
                            t_test_feature(agg, labels.sizes(), n_samples, &t_opts, &mut p, None)
                        }
                    }
                    let mut fc: ClusterVec<FoldChange> = smallvec![FoldChange::default(); k];
                    fold_change_feature(agg, labels.sizes(), n_samples, &fc_opts, &mut fc);
                    (p, fc)
                },
            )
            .collect()
    });

    let mut rows = Vec::with_capacity(n_features * k);
    for (f, (p, fc)) in stats.iter().enumerate() {
        for kk in 0..k {
            rows.push(MarkerRow {
                feature_index: f,
                cluster: kk as u32,
                p_val: p[kk],
                p_val_adj: 0.0,
                avg_log_fc: fc[kk].log_fc,
                pct_in: fc[kk].pct_in,
                pct_out: fc[kk].pct_out,
            });
        }
    }

    let candidates = rows.len();
    let rows = filter_and_rank(rows, n_features, &FilterOptions::from(config));
    info!(
        "Kept {} of {} (feature, cluster) rows in {:?}",
        rows.len(),
        candidates,
        start.elapsed()
    );

    let feature_names = match canonical.colnames() {
        Some(names) => names.to_vec(),
        None => (0..n_features).map(|f| f.to_string()).collect(),
    };

    Ok(MarkerTable {
        rows,
        feature_names,
        cluster_names: labels.names(),
        total_features: n_features,
    })
}

/// Width-dispatching wrapper over [`find_markers`].
pub fn find_markers_dyn(
    matrix: &CscMatrixDyn,
    labels: &ClusterLabels,
    features_as_rows: bool,
    config: &DeConfig,
) -> Result<MarkerTable> {
    match matrix {
        CscMatrixDyn::I32(m) => find_markers(m, labels, features_as_rows, config),
        CscMatrixDyn::I64(m) => find_markers(m, labels, features_as_rows, config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ops::from_dense;
    use approx::assert_abs_diff_eq;
    use ndarray::arr2;

    fn binary_pair() -> (CscMatrix<i64>, ClusterLabels) {
        // Two features over six samples: A marks cluster 0, B marks cluster 1.
        let dense = arr2(&[
            [1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 1.0, 1.0, 1.0],
        ]);
        let matrix = from_dense(dense.view()).to_i64();
        let labels = ClusterLabels::from_ids(vec![0, 0, 0, 1, 1, 1]).unwrap();
        (matrix, labels)
    }

    fn permissive_config() -> DeConfig {
        DeConfig {
            min_pct: 0.0,
            logfc_threshold: 0.0,
            p_thresh: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn end_to_end_binary_markers() {
        let (matrix, labels) = binary_pair();
        let table = find_markers(&matrix, &labels, true, &permissive_config()).unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.total_features(), 2);

        // Cluster 0 first; within it feature A (positive logFC) precedes B.
        let first = &table.rows()[0];
        assert_eq!(first.cluster, 0);
        assert_eq!(first.feature_index, 0);
        assert!(first.avg_log_fc > 1.0);
        assert_abs_diff_eq!(first.pct_in, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first.pct_out, 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(first.p_val, 0.0468, epsilon = 5e-4);

        for row in table.rows() {
            assert_abs_diff_eq!(row.p_val, first.p_val, epsilon = 1e-12);
            assert_eq!(row.p_val_adj, (2.0 * row.p_val).min(1.0));
        }
    }

    #[test]
    fn orientation_flag_is_equivalent() {
        let (matrix, labels) = binary_pair();
        let config = permissive_config();
        let by_rows = find_markers(&matrix, &labels, true, &config).unwrap();
        let transposed = transpose(&matrix).unwrap();
        let by_cols = find_markers(&transposed, &labels, false, &config).unwrap();
        assert_eq!(by_rows.rows(), by_cols.rows());
    }

    #[test]
    fn default_p_threshold_prunes() {
        // p ~ 0.047 for the binary pair, above the 1e-2 reporting cutoff.
        let (matrix, labels) = binary_pair();
        let table = find_markers(&matrix, &labels, true, &DeConfig::default()).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn all_zero_feature_is_dropped() {
        let dense = arr2(&[
            [1.0, 1.0, 1.0, 0.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        ]);
        let matrix = from_dense(dense.view()).to_i64();
        let labels = ClusterLabels::from_ids(vec![0, 0, 0, 1, 1, 1]).unwrap();
        let config = DeConfig {
            logfc_threshold: 0.0,
            p_thresh: 1.0,
            ..Default::default()
        };
        let table = find_markers(&matrix, &labels, true, &config).unwrap();
        // The zero feature fails min_pct in every cluster.
        assert!(table.rows().iter().all(|r| r.feature_index != 1));
        assert!(!table.is_empty());
    }

    #[test]
    fn only_pos_removes_down_markers() {
        let (matrix, labels) = binary_pair();
        let config = DeConfig {
            only_pos: true,
            ..permissive_config()
        };
        let table = find_markers(&matrix, &labels, true, &config).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.rows().iter().all(|r| r.avg_log_fc > 0.0));
    }

    #[test]
    fn t_test_path() {
        // Strong separation with a little within-group spread (a variance of
        // exactly zero on both sides is degenerate and reports p = 1).
        let dense = arr2(&[
            [3.0, 3.1, 2.9, 0.1, 0.2, 0.0],
            [0.1, 0.2, 0.0, 3.0, 3.1, 2.9],
        ]);
        let matrix = from_dense(dense.view()).to_i64();
        let labels = ClusterLabels::from_ids(vec![0, 0, 0, 1, 1, 1]).unwrap();
        let config = DeConfig {
            test: TestKind::StudentT,
            ..permissive_config()
        };
        let table = find_markers(&matrix, &labels, true, &config).unwrap();
        assert_eq!(table.len(), 4);
        assert!(table.rows()[0].p_val < 1e-4, "p = {}", table.rows()[0].p_val);
    }

    #[test]
    fn names_resolve_from_dimnames_and_labels() {
        let (mut matrix, _) = binary_pair();
        matrix
            .set_rownames(vec!["ACTA2".into(), "CD3E".into()])
            .unwrap();
        let raw: Vec<String> = ["T", "T", "T", "B", "B", "B"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let labels = ClusterLabels::from_names(&raw).unwrap();
        let table = find_markers(&matrix, &labels, true, &permissive_config()).unwrap();
        let first = &table.rows()[0];
        assert_eq!(table.feature_name(first), "ACTA2");
        assert_eq!(table.cluster_name(first), "T");
    }

    #[test]
    fn synthesized_feature_names() {
        let (matrix, labels) = binary_pair();
        let table = find_markers(&matrix, &labels, true, &permissive_config()).unwrap();
        let first = &table.rows()[0];
        assert_eq!(table.feature_name(first), "0");
    }

    #[test]
    fn label_length_mismatch_rejected() {
        let (matrix, _) = binary_pair();
        let labels = ClusterLabels::from_ids(vec![0, 1]).unwrap();
        assert!(matches!(
            find_markers(&matrix, &labels, true, &permissive_config()),
            Err(DemarkError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn zero_threads_rejected() {
        let (matrix, labels) = binary_pair();
        let config = DeConfig {
            threads: 0,
            ..permissive_config()
        };
        assert!(find_markers(&matrix, &labels, true, &config).is_err());
    }

    #[test]
    fn tsv_serialization() {
        let (matrix, labels) = binary_pair();
        let table = find_markers(&matrix, &labels, true, &permissive_config()).unwrap();
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        table.write_tsv(&mut writer).unwrap();
        let bytes = writer.into_inner().expect("writer flushed");
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(
            lines.next().unwrap(),
            "p_val\tp_val_adj\tavg_logFC\tpct.1\tpct.2\tcluster\tgene"
        );
        assert_eq!(lines.count(), 4);
    }

    #[test]
    fn dyn_dispatch_matches_generic() {
        let (matrix, labels) = binary_pair();
        let dynamic = CscMatrixDyn::from(matrix.clone());
        let a = find_markers(&matrix, &labels, true, &permissive_config()).unwrap();
        let b = find_markers_dyn(&dynamic, &labels, true, &permissive_config()).unwrap();
        assert_eq!(a.rows(), b.rows());
    }
}
