//! Cluster assignments for the sample axis.
//!
//! The kernels only ever see dense integer ids in `[0, K)`; string labels are
//! factorized at the boundary and carried as a side `k -> name` map for
//! presentation.

use crate::core::error::{DemarkError, Result};
use rustc_hash::FxHashMap;

/// One cluster id per sample, with precomputed cluster sizes.
#[derive(Debug, Clone)]
pub struct ClusterLabels {
    ids: Vec<u32>,
    sizes: Vec<usize>,
    names: Option<Vec<String>>,
}

impl ClusterLabels {
    /// Build from raw ids; `K` is `max(ids) + 1`.
    pub fn from_ids(ids: Vec<u32>) -> Result<Self> {
        if ids.is_empty() {
            return Err(DemarkError::EmptyData(
                "cluster label vector is empty".to_string(),
            ));
        }
        let k = ids.iter().copied().max().unwrap_or(0) as usize + 1;
        let mut sizes = vec![0usize; k];
        for &id in &ids {
            sizes[id as usize] += 1;
        }
        Ok(Self {
            ids,
            sizes,
            names: None,
        })
    }

    /// Build from raw ids with an explicit cluster count, rejecting ids
    /// outside `[0, k)` before they can reach a kernel.
    pub fn from_ids_with_k(ids: Vec<u32>, k: usize) -> Result<Self> {
        if let Some(&bad) = ids.iter().find(|&&id| id as usize >= k) {
            return Err(DemarkError::InvalidInput(format!(
                "cluster id {} out of range for {} clusters",
                bad, k
            )));
        }
        if ids.is_empty() {
            return Err(DemarkError::EmptyData(
                "cluster label vector is empty".to_string(),
            ));
        }
        let mut sizes = vec![0usize; k];
        for &id in &ids {
            sizes[id as usize] += 1;
        }
        Ok(Self {
            ids,
            sizes,
            names: None,
        })
    }

    /// Factorize string labels: distinct names are assigned ids in first-seen
    /// order and kept as the presentation map.
    pub fn from_names(labels: &[String]) -> Result<Self> {
        if labels.is_empty() {
            return Err(DemarkError::EmptyData(
                "cluster label vector is empty".to_string(),
            ));
        }
        let mut index: FxHashMap<&str, u32> = FxHashMap::default();
        let mut names: Vec<String> = Vec::new();
        let mut ids = Vec::with_capacity(labels.len());
        for label in labels {
            let id = *index.entry(label.as_str()).or_insert_with(|| {
                names.push(label.clone());
                (names.len() - 1) as u32
            });
            ids.push(id);
        }
        let mut out = Self::from_ids(ids)?;
        out.names = Some(names);
        Ok(out)
    }

    /// Attach presentation names, one per cluster.
    pub fn set_names(&mut self, names: Vec<String>) -> Result<()> {
        if names.len() != self.n_clusters() {
            return Err(DemarkError::DimensionMismatch {
                expected: format!("{} cluster names", self.n_clusters()),
                actual: format!("{}", names.len()),
            });
        }
        self.names = Some(names);
        Ok(())
    }

    /// Number of labeled samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Number of clusters K.
    #[inline]
    pub fn n_clusters(&self) -> usize {
        self.sizes.len()
    }

    /// Per-sample ids in `[0, K)`.
    #[inline]
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    /// Per-cluster sample counts `n_k`.
    #[inline]
    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    /// Presentation name of cluster `k`: the attached name, or the id itself
    /// rendered as a string.
    pub fn name_of(&self, k: usize) -> String {
        match &self.names {
            Some(names) => names[k].clone(),
            None => k.to_string(),
        }
    }

    /// All presentation names, synthesized from ids when none were attached.
    pub fn names(&self) -> Vec<String> {
        (0..self.n_clusters()).map(|k| self.name_of(k)).collect()
    }
}
