//! Configuration for the differential expression driver.

use crate::core::error::{DemarkError, Result};
use std::fmt;
use std::str::FromStr;

/// Statistical kernel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestKind {
    /// Wilcoxon-Mann-Whitney rank sum (default).
    RankSum,
    /// Student's t (Welch or pooled, see [`DeConfig::var_equal`]).
    StudentT,
}

impl FromStr for TestKind {
    type Err = DemarkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rank_sum" | "rank-sum" | "ranksum" | "wilcox" | "wilcoxon" => Ok(TestKind::RankSum),
            "t" | "ttest" | "t-test" | "student" => Ok(TestKind::StudentT),
            _ => Err(DemarkError::UnknownTest(s.to_string())),
        }
    }
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestKind::RankSum => write!(f, "rank_sum"),
            TestKind::StudentT => write!(f, "t"),
        }
    }
}

/// Alternative hypothesis, with "greater" meaning the cluster tends to larger
/// values than its complement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alternative {
    TwoSided,
    Less,
    Greater,
}

impl FromStr for Alternative {
    type Err = DemarkError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "two-sided" | "two.sided" | "twosided" | "both" => Ok(Alternative::TwoSided),
            "less" => Ok(Alternative::Less),
            "greater" => Ok(Alternative::Greater),
            _ => Err(DemarkError::InvalidInput(format!(
                "unknown alternative '{}' (expected two-sided, less, or greater)",
                s
            ))),
        }
    }
}

/// Options for one marker-finding run. Plain fields with the documented
/// defaults; construct with `DeConfig::default()` and override as needed.
#[derive(Debug, Clone)]
pub struct DeConfig {
    /// Which statistical kernel to run.
    pub test: TestKind,
    /// Subtract/add 0.5 in the rank-sum z numerator.
    pub continuity_correction: bool,
    /// Pooled (true) vs Welch (false) variance for the t kernel.
    pub var_equal: bool,
    pub alternative: Alternative,
    /// Drop rows where neither detection rate reaches this fraction.
    pub min_pct: f64,
    /// Drop rows where the detection-rate gap is below this fraction.
    pub min_diff_pct: f64,
    /// Drop rows with |avg log fold-change| below this.
    pub logfc_threshold: f64,
    /// Keep only positive fold-changes.
    pub only_pos: bool,
    /// Pseudocount added before taking logs in the fold-change kernel.
    pub pseudocount: f64,
    /// Base of the reported log fold-change.
    pub log_base: f64,
    /// Invert log1p normalization (`expm1`) before comparing means; disable
    /// for data already on a linear ("scale.data") scale.
    pub use_expm1: bool,
    /// Reporting cutoff on the raw p-value.
    pub p_thresh: f64,
    /// Worker count for the feature loop.
    pub threads: u32,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            test: TestKind::RankSum,
            continuity_correction: true,
            var_equal: false,
            alternative: Alternative::TwoSided,
            min_pct: 0.1,
            min_diff_pct: f64::NEG_INFINITY,
            logfc_threshold: 0.25,
            only_pos: false,
            pseudocount: 1.0,
            log_base: 2.0,
            use_expm1: true,
            p_thresh: 1e-2,
            threads: 1,
        }
    }
}
