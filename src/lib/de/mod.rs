//! One-vs-rest differential expression: cluster labels, configuration, the
//! per-cluster reducer, the statistical kernels, and the driver.

pub mod config;
pub mod driver;
pub mod filter;
pub mod foldchange;
pub mod labels;
pub mod reduce;
pub mod ttest;
pub mod wilcoxon;

pub use config::{Alternative, DeConfig, TestKind};
pub use driver::{find_markers, find_markers_dyn, MarkerTable};
pub use filter::{filter_and_rank, FilterOptions, MarkerRow};
pub use foldchange::{fold_change_matrix, FoldChange, FoldChangeMatrix, FoldChangeOptions};
pub use labels::ClusterLabels;
pub use reduce::{ClusterAggregates, ClusterReducer, ValueHist};
pub use ttest::{t_test_dense, t_test_matrix, TTestOptions};
pub use wilcoxon::{rank_sum_dense, rank_sum_matrix, RankSumOptions};
