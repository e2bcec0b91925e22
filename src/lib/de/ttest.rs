//! Student's t kernel over the sparse per-cluster reduction.
//!
//! Group means and variances come straight from `sum_k` / `sum_sq_k` / `n_k`;
//! the implicit zeros contribute nothing to either sum, so the one pass over
//! stored entries is all the data access there is.

use crate::core::error::{DemarkError, Result};
use crate::de::config::{Alternative, DeConfig};
use crate::de::labels::ClusterLabels;
use crate::de::reduce::{ClusterAggregates, ClusterReducer};
use crate::de::wilcoxon::gather_nonzeros;
use crate::matrix::csc::{ColPtr, CscMatrix};
use ndarray::{Array2, ArrayView2};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};

#[derive(Debug, Clone)]
pub struct TTestOptions {
    /// Pooled variance (classic two-sample t) instead of Welch.
    pub var_equal: bool,
    pub alternative: Alternative,
}

impl Default for TTestOptions {
    fn default() -> Self {
        Self {
            var_equal: false,
            alternative: Alternative::TwoSided,
        }
    }
}

impl From<&DeConfig> for TTestOptions {
    fn from(config: &DeConfig) -> Self {
        Self {
            var_equal: config.var_equal,
            alternative: config.alternative,
        }
    }
}

/// Fill `out_p` with one-vs-rest t-test p-values for one feature; `out_t`
/// (when wanted) receives the t statistics. Degenerate splits (fewer than
/// two samples on either side, or zero pooled spread) report p = 1.0.
pub(crate) fn t_test_feature(
    agg: &ClusterAggregates,
    sizes: &[usize],
    n_samples: usize,
    opts: &TTestOptions,
    out_p: &mut [f64],
    mut out_t: Option<&mut [f64]>,
) {
    let sum_sq = agg
        .sum_sq()
        .expect("t kernel requires sum-of-squares aggregates");
    let n = n_samples as f64;
    let sum_total = agg.sum_total();
    let sum_sq_total: f64 = sum_sq.iter().sum();

    for kk in 0..agg.k() {
        if let Some(out_t) = out_t.as_deref_mut() {
            out_t[kk] = 0.0;
        }
        let n1 = sizes[kk] as f64;
        let n2 = n - n1;
        if n1 < 2.0 || n2 < 2.0 {
            out_p[kk] = 1.0;
            continue;
        }

        let sum1 = agg.sums()[kk];
        let sum2 = sum_total - sum1;
        let mean1 = sum1 / n1;
        let mean2 = sum2 / n2;
        // Sample variance from the running sums; tiny negative residues from
        // cancellation are clamped to zero.
        let var1 = ((sum_sq[kk] - n1 * mean1 * mean1) / (n1 - 1.0)).max(0.0);
        let var2 = (((sum_sq_total - sum_sq[kk]) - n2 * mean2 * mean2) / (n2 - 1.0)).max(0.0);

        let (se, df) = if opts.var_equal {
            let pooled = ((n1 - 1.0) * var1 + (n2 - 1.0) * var2) / (n1 + n2 - 2.0);
            ((pooled * (1.0 / n1 + 1.0 / n2)).sqrt(), n1 + n2 - 2.0)
        } else {
            let a = var1 / n1;
            let b = var2 / n2;
            let df = (a + b) * (a + b)
                / (a * a / (n1 - 1.0) + b * b / (n2 - 1.0));
            ((a + b).sqrt(), df)
        };

        if se <= 0.0 || !se.is_finite() || !df.is_finite() || df <= 0.0 {
            out_p[kk] = 1.0;
            continue;
        }

        let t = (mean1 - mean2) / se;
        if let Some(out_t) = out_t.as_deref_mut() {
            out_t[kk] = t;
        }
        let dist = match StudentsT::new(0.0, 1.0, df) {
            Ok(dist) => dist,
            Err(_) => {
                out_p[kk] = 1.0;
                continue;
            }
        };
        let p = match opts.alternative {
            Alternative::TwoSided => 2.0 * dist.cdf(-t.abs()),
            Alternative::Greater => 1.0 - dist.cdf(t),
            Alternative::Less => dist.cdf(t),
        };
        out_p[kk] = p.clamp(0.0, 1.0);
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

/// One-vs-rest t-test p-values for every (feature, cluster) pair; `matrix`
/// is samples x features, result is `F x K`.
pub fn t_test_matrix<P: ColPtr>(
    matrix: &CscMatrix<P>,
    labels: &ClusterLabels,
    opts: &TTestOptions,
) -> Result<Array2<f64>> {
    check_labels(matrix.nrow(), labels)?;
    let k = labels.n_clusters();
    let n_features = matrix.ncol();

    let per_feature: Vec<Vec<f64>> = (0..n_features)
        .into_par_iter()
        .map_init(
            || (ClusterReducer::new(k), ClusterAggregates::new(k, true)),
            |(reducer, agg), f| {
                let range = matrix.col_range(f);
                reducer.reduce(
                    &matrix.row_indices()[range.clone()],
                    &matrix.values()[range],
                    labels.ids(),
                    agg,
                    None,
                );
                let mut p = vec![0.0; k];
                t_test_feature(agg, labels.sizes(), labels.len(), opts, &mut p, None);
                p
            },
        )
        .collect();

    let flat: Vec<f64> = per_feature.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_features, k), flat)
        .expect("per-feature results have uniform length"))
}

/// Dense-input variant reusing the sparse reduction (identical summation
/// order, so results match the CSC path bit for bit).
pub fn t_test_dense(
    matrix: ArrayView2<f64>,
    labels: &ClusterLabels,
    opts: &TTestOptions,
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
                    ClusterAggregates::new(k, true),
                    Vec::new(),
                    Vec::new(),
                )
            },
            |(reducer, agg, rows, values), f| {
                gather_nonzeros(&matrix, f, rows, values);
                reducer.reduce(rows, values, labels.ids(), agg, None);
                let mut p = vec![0.0; k];
                t_test_feature(agg, labels.sizes(), labels.len(), opts, &mut p, None);
                p
            },
        )
        .collect();

    let flat: Vec<f64> = per_feature.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((n_features, k), flat)
        .expect("per-feature results have uniform length"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::ops::from_dense;
    use approx::assert_abs_diff_eq;
    use ndarray::Array2;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Textbook two-pass reference on the dense feature.
    fn reference_p(feature: &[f64], labels: &[u32], cluster: u32, var_equal: bool) -> f64 {
        let group1: Vec<f64> = feature
            .iter()
            .zip(labels)
            .filter(|(_, &l)| l == cluster)
            .map(|(&v, _)| v)
            .collect();
        let group2: Vec<f64> = feature
            .iter()
            .zip(labels)
            .filter(|(_, &l)| l != cluster)
            .map(|(&v, _)| v)
            .collect();
        let n1 = group1.len() as f64;
        let n2 = group2.len() as f64;
        if n1 < 2.0 || n2 < 2.0 {
            return 1.0;
        }
        let m1 = group1.iter().sum::<f64>() / n1;
        let m2 = group2.iter().sum::<f64>() / n2;
        let v1 = group1.iter().map(|v| (v - m1) * (v - m1)).sum::<f64>() / (n1 - 1.0);
        let v2 = group2.iter().map(|v| (v - m2) * (v - m2)).sum::<f64>() / (n2 - 1.0);
        let (se, df) = if var_equal {
            let pooled = ((n1 - 1.0) * v1 + (n2 - 1.0) * v2) / (n1 + n2 - 2.0);
            ((pooled * (1.0 / n1 + 1.0 / n2)).sqrt(), n1 + n2 - 2.0)
        } else {
            let a = v1 / n1;
            let b = v2 / n2;
            (
                (a + b).sqrt(),
                (a + b) * (a + b) / (a * a / (n1 - 1.0) + b * b / (n2 - 1.0)),
            )
        };
        if se <= 0.0 || !df.is_finite() || df <= 0.0 {
            return 1.0;
        }
        let t = (m1 - m2) / se;
        let dist = StudentsT::new(0.0, 1.0, df).unwrap();
        (2.0 * dist.cdf(-t.abs())).clamp(0.0, 1.0)
    }

    fn run_kernel(feature: &[f64], labels: &ClusterLabels, opts: &TTestOptions) -> Vec<f64> {
        let k = labels.n_clusters();
        let mut reducer = ClusterReducer::new(k);
        let mut agg = ClusterAggregates::new(k, true);
        let rows: Vec<u32> = (0..feature.len() as u32).collect();
        reducer.reduce(&rows, feature, labels.ids(), &mut agg, None);
        let mut p = vec![0.0; k];
        t_test_feature(&agg, labels.sizes(), labels.len(), opts, &mut p, None);
        p
    }

    #[test]
    fn matches_two_pass_reference() {
        let mut rng = StdRng::seed_from_u64(99418);
        for var_equal in [false, true] {
            for _ in 0..20 {
                let n = rng.gen_range(8..=120);
                let k = rng.gen_range(2..=4);
                let ids: Vec<u32> = (0..n).map(|i| (i % k) as u32).collect();
                let feature: Vec<f64> = (0..n)
                    .map(|_| {
                        if rng.gen_bool(0.5) {
                            0.0
                        } else {
                            rng.gen_range(1..=30) as f64 / 7.0
                        }
                    })
                    .collect();
                let labels = ClusterLabels::from_ids_with_k(ids.clone(), k as usize).unwrap();
                let opts = TTestOptions {
                    var_equal,
                    ..Default::default()
                };
                let p = run_kernel(&feature, &labels, &opts);
                for cluster in 0..k as u32 {
                    let expected = reference_p(&feature, &ids, cluster, var_equal);
                    assert_abs_diff_eq!(p[cluster as usize], expected, epsilon = 1e-10);
                }
            }
        }
    }

    #[test]
    fn separator_feature_is_significant() {
        let ids = vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1];
        let feature: Vec<f64> = ids
            .iter()
            .enumerate()
            .map(|(i, &l)| l as f64 * 3.0 + (i as f64) * 0.01)
            .collect();
        let labels = ClusterLabels::from_ids(ids).unwrap();
        let p = run_kernel(&feature, &labels, &TTestOptions::default());
        assert!(p[0] < 1e-6, "p = {}", p[0]);
        assert!(p[1] < 1e-6, "p = {}", p[1]);
    }

    #[test]
    fn constant_feature_is_degenerate() {
        let labels = ClusterLabels::from_ids(vec![0, 0, 1, 1]).unwrap();
        assert_eq!(run_kernel(&[2.0; 4], &labels, &TTestOptions::default()), vec![1.0, 1.0]);
        assert_eq!(run_kernel(&[0.0; 4], &labels, &TTestOptions::default()), vec![1.0, 1.0]);
    }

    #[test]
    fn tiny_groups_are_degenerate() {
        let labels = ClusterLabels::from_ids(vec![0, 1, 1, 1, 1]).unwrap();
        let p = run_kernel(&[5.0, 1.0, 2.0, 1.5, 0.0], &labels, &TTestOptions::default());
        assert_eq!(p[0], 1.0);
    }

    #[test]
    fn pooled_and_welch_agree_on_balanced_equal_variance() {
        // Same spread in both groups, same sizes: the two estimators coincide.
        let labels = ClusterLabels::from_ids(vec![0, 0, 0, 1, 1, 1]).unwrap();
        let feature = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let welch = run_kernel(&feature, &labels, &TTestOptions::default());
        let pooled = run_kernel(
            &feature,
            &labels,
            &TTestOptions {
                var_equal: true,
                ..Default::default()
            },
        );
        assert_abs_diff_eq!(welch[0], pooled[0], epsilon = 1e-12);
    }

    #[test]
    fn one_sided_alternatives() {
        let labels = ClusterLabels::from_ids(vec![0, 0, 0, 1, 1, 1]).unwrap();
        let feature = [4.0, 5.0, 6.0, 1.0, 1.5, 2.0];
        let greater = run_kernel(
            &feature,
            &labels,
            &TTestOptions {
                alternative: Alternative::Greater,
                ..Default::default()
            },
        );
        let less = run_kernel(
            &feature,
            &labels,
            &TTestOptions {
                alternative: Alternative::Less,
                ..Default::default()
            },
        );
        assert!(greater[0] < 0.05);
        assert!(less[0] > 0.9);
        assert!(greater[1] > 0.9);
        assert!(less[1] < 0.05);
    }

    #[test]
    fn sparse_and_dense_agree_bitwise() {
        let mut rng = StdRng::seed_from_u64(7305);
        let n = 40;
        let n_features = 9;
        let mut dense = Array2::<f64>::zeros((n, n_features));
        for v in dense.iter_mut() {
            if rng.gen_bool(0.35) {
                *v = rng.gen_range(1..=9) as f64 / 3.0;
            }
        }
        let ids: Vec<u32> = (0..n as u32).map(|_| rng.gen_range(0..3)).collect();
        let labels = ClusterLabels::from_ids_with_k(ids, 3).unwrap();

        let sparse = from_dense(dense.view()).to_i64();
        let opts = TTestOptions::default();
        let p_sparse = t_test_matrix(&sparse, &labels, &opts).unwrap();
        let p_dense = t_test_dense(dense.view(), &labels, &opts).unwrap();
        for (a, b) in p_sparse.iter().zip(p_dense.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }
}
