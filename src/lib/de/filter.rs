//! Filtering, ranking, and p-value adjustment of marker rows.

use crate::de::config::DeConfig;

/// One (feature, cluster) row of the long marker table.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerRow {
    /// Feature index in the input matrix.
    pub feature_index: usize,
    /// Cluster id in `[0, K)`.
    pub cluster: u32,
    pub p_val: f64,
    /// Bonferroni-clamped p-value, filled by [`filter_and_rank`].
    pub p_val_adj: f64,
    pub avg_log_fc: f64,
    /// Detection rate in the cluster (pct.1).
    pub pct_in: f64,
    /// Detection rate in the complement (pct.2).
    pub pct_out: f64,
}

/// Thresholds applied to the raw rows.
#[derive(Debug, Clone)]
pub struct FilterOptions {
    pub min_pct: f64,
    pub min_diff_pct: f64,
    pub logfc_threshold: f64,
    pub only_pos: bool,
    pub p_thresh: f64,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            min_pct: 0.1,
            min_diff_pct: f64::NEG_INFINITY,
            logfc_threshold: 0.25,
            only_pos: false,
            p_thresh: 1e-2,
        }
    }
}

impl From<&DeConfig> for FilterOptions {
    fn from(config: &DeConfig) -> Self {
        Self {
            min_pct: config.min_pct,
            min_diff_pct: config.min_diff_pct,
            logfc_threshold: config.logfc_threshold,
            only_pos: config.only_pos,
            p_thresh: config.p_thresh,
        }
    }
}

/// Apply the detection-rate, fold-change, direction, and p-value filters,
/// sort within each cluster, and Bonferroni-clamp.
///
/// The adjustment multiplies by `total_features` -- the feature count of the
/// whole input, not the surviving row count. That intentionally mirrors the
/// reference pipeline even though it under-corrects relative to a strict
/// Bonferroni over the performed tests.
///
/// Ordering is deterministic: cluster ascending, then p ascending, then log
/// fold-change descending, then feature index ascending.
pub fn filter_and_rank(
    rows: Vec<MarkerRow>,
    total_features: usize,
    opts: &FilterOptions,
) -> Vec<MarkerRow> {
    let mut kept: Vec<MarkerRow> = rows
        .into_iter()
        .filter(|row| {
            row.pct_in.max(row.pct_out) >= opts.min_pct
                && (row.pct_in - row.pct_out).abs() >= opts.min_diff_pct
                && row.avg_log_fc.abs() >= opts.logfc_threshold
                && (!opts.only_pos || row.avg_log_fc > 0.0)
                && row.p_val < opts.p_thresh
        })
        .collect();

    kept.sort_by(|a, b| {
        a.cluster
            .cmp(&b.cluster)
            .then_with(|| a.p_val.total_cmp(&b.p_val))
            .then_with(|| b.avg_log_fc.total_cmp(&a.avg_log_fc))
            .then_with(|| a.feature_index.cmp(&b.feature_index))
    });

    let factor = total_features as f64;
    for row in &mut kept {
        row.p_val_adj = (factor * row.p_val).min(1.0);
    }
    kept
}
