use demark_lib::core::error::Result;
use demark_lib::de::{Alternative, DeConfig, TestKind};
use std::path::PathBuf;
use structopt::StructOpt;

/// Arguments for the `markers` command.
#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "markers",
    about = "One-vs-rest differential expression over a sparse matrix"
)]
pub struct MarkersArgs {
    /// Path to the MatrixMarket count matrix (.mtx or .mtx.gz).
    #[structopt(short, long, parse(from_os_str))]
    pub matrix: PathBuf,

    /// Per-cell cluster assignment, one label per line. String labels are
    /// factorized; with tab-separated lines the last field is used.
    #[structopt(short, long, parse(from_os_str))]
    pub labels: PathBuf,

    /// Feature names aligned with the matrix feature axis (10x features.tsv
    /// works; the symbol column is preferred when present).
    #[structopt(long, parse(from_os_str))]
    pub features: Option<PathBuf>,

    /// Cell barcodes aligned with the matrix sample axis.
    #[structopt(long, parse(from_os_str))]
    pub barcodes: Option<PathBuf>,

    /// Output TSV path; `-` or absent writes to stdout.
    #[structopt(short, long, parse(from_os_str))]
    pub output: Option<PathBuf>,

    /// Statistical test: rank_sum or t.
    #[structopt(long, default_value = "rank_sum")]
    pub test: String,

    /// Alternative hypothesis: two-sided, less, or greater.
    #[structopt(long, default_value = "two-sided")]
    pub alternative: String,

    /// Disable the continuity correction in the rank-sum z.
    #[structopt(long)]
    pub no_continuity: bool,

    /// Pooled variance instead of Welch for the t-test.
    #[structopt(long)]
    pub var_equal: bool,

    /// Drop rows where neither group reaches this detection rate.
    #[structopt(long, default_value = "0.1")]
    pub min_pct: f64,

    /// Drop rows whose detection-rate gap is below this fraction.
    #[structopt(long)]
    pub min_diff_pct: Option<f64>,

    /// Drop rows with |avg log fold-change| below this.
    #[structopt(long, default_value = "0.25")]
    pub logfc_threshold: f64,

    /// Report only positive markers.
    #[structopt(long)]
    pub only_pos: bool,

    /// Pseudocount added inside the fold-change log.
    #[structopt(long, default_value = "1")]
    pub pseudocount: f64,

    /// Base of the reported log fold-change.
    #[structopt(long, default_value = "2")]
    pub log_base: f64,

    /// The matrix is already on a linear scale; skip the expm1 inversion.
    #[structopt(long)]
    pub no_expm1: bool,

    /// Reporting cutoff on the raw p-value.
    #[structopt(long, default_value = "0.01")]
    pub p_thresh: f64,

    /// Number of threads to use (default: 1).
    #[structopt(short, long, default_value = "1")]
    pub threads: u32,

    /// The matrix is cells x genes instead of the genes x cells default.
    #[structopt(long)]
    pub samples_as_rows: bool,

    /// gzip the output regardless of the output extension.
    #[structopt(long)]
    pub gzip: bool,
}

impl MarkersArgs {
    /// Translate the string-typed CLI options into a kernel configuration.
    pub fn to_config(&self) -> Result<DeConfig> {
        Ok(DeConfig {
            test: self.test.parse::<TestKind>()?,
            continuity_correction: !self.no_continuity,
            var_equal: self.var_equal,
            alternative: self.alternative.parse::<Alternative>()?,
            min_pct: self.min_pct,
            min_diff_pct: self.min_diff_pct.unwrap_or(f64::NEG_INFINITY),
            logfc_threshold: self.logfc_threshold,
            only_pos: self.only_pos,
            pseudocount: self.pseudocount,
            log_base: self.log_base,
            use_expm1: !self.no_expm1,
            p_thresh: self.p_thresh,
            threads: self.threads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_arguments() {
        let args = MarkersArgs::from_iter_safe(&[
            "markers",
            "--matrix",
            "matrix.mtx.gz",
            "--labels",
            "clusters.tsv",
        ])
        .unwrap();

        assert_eq!(args.matrix, PathBuf::from("matrix.mtx.gz"));
        assert_eq!(args.labels, PathBuf::from("clusters.tsv"));
        assert!(args.features.is_none());
        assert_eq!(args.test, "rank_sum");
        assert_eq!(args.threads, 1);
        assert!(!args.samples_as_rows);

        let config = args.to_config().unwrap();
        assert_eq!(config.test, TestKind::RankSum);
        assert!(config.continuity_correction);
        assert_eq!(config.min_diff_pct, f64::NEG_INFINITY);
    }

    #[test]
    fn option_overrides_reach_config() {
        let args = MarkersArgs::from_iter_safe(&[
            "markers",
            "--matrix",
            "m.mtx",
            "--labels",
            "l.tsv",
            "--test",
            "t",
            "--var-equal",
            "--no-continuity",
            "--no-expm1",
            "--only-pos",
            "--min-diff-pct",
            "0.2",
            "--p-thresh",
            "1.0",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.test, TestKind::StudentT);
        assert!(config.var_equal);
        assert!(!config.continuity_correction);
        assert!(!config.use_expm1);
        assert!(config.only_pos);
        assert_eq!(config.min_diff_pct, 0.2);
        assert_eq!(config.p_thresh, 1.0);
    }

    #[test]
    fn unknown_test_is_rejected() {
        let args = MarkersArgs::from_iter_safe(&[
            "markers",
            "--matrix",
            "m.mtx",
            "--labels",
            "l.tsv",
            "--test",
            "deseq2",
        ])
        .unwrap();
        assert!(args.to_config().is_err());
    }
}
