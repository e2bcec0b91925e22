mod args;

use anyhow::{anyhow, Context, Result};
use demark_lib::de::{find_markers_dyn, ClusterLabels};
use demark_lib::matrix::mm;
use demark_lib::utils;
use log::info;
use std::io::BufRead;
use std::path::Path;
use std::time::Instant;

use crate::commands::common;

pub use args::MarkersArgs;

/// Entry point for the `markers` command.
pub fn run_markers(args: MarkersArgs) -> Result<()> {
    let start = Instant::now();
    info!("Starting marker detection for {:?}", args.matrix);

    let config = args.to_config()?;
    let active_threads = common::configure_global_thread_pool(args.threads as usize)?;
    info!("Using {} worker threads", active_threads);

    let mut matrix = mm::read_matrix_market_path(&args.matrix)
        .with_context(|| format!("Failed to read matrix from {:?}", args.matrix))?;

    let features_as_rows = !args.samples_as_rows;
    if let Some(path) = &args.features {
        let names = read_name_column(path, NameColumn::Symbol)
            .with_context(|| format!("Failed to read feature names from {:?}", path))?;
        info!("Loaded {} feature names from {:?}", names.len(), path);
        if features_as_rows {
            matrix.set_rownames(names)?;
        } else {
            matrix.set_colnames(names)?;
        }
    }
    if let Some(path) = &args.barcodes {
        let names = read_name_column(path, NameColumn::First)
            .with_context(|| format!("Failed to read barcodes from {:?}", path))?;
        info!("Loaded {} barcodes from {:?}", names.len(), path);
        if features_as_rows {
            matrix.set_colnames(names)?;
        } else {
            matrix.set_rownames(names)?;
        }
    }

    let raw_labels = read_name_column(&args.labels, NameColumn::Last)
        .with_context(|| format!("Failed to read cluster labels from {:?}", args.labels))?;
    let n_samples = if features_as_rows {
        matrix.ncol()
    } else {
        matrix.nrow()
    };
    if raw_labels.len() != n_samples {
        return Err(anyhow!(
            "Label file {:?} has {} entries but the matrix has {} samples",
            args.labels,
            raw_labels.len(),
            n_samples
        ));
    }
    let labels = ClusterLabels::from_names(&raw_labels)?;
    info!(
        "Factorized {} samples into {} clusters",
        labels.len(),
        labels.n_clusters()
    );

    let table = find_markers_dyn(&matrix, &labels, features_as_rows, &config)?;

    if let Some(path) = &args.output {
        utils::make_parent_dirs(path)?;
    }
    let gzipped = args.gzip
        || args
            .output
            .as_ref()
            .map(utils::is_gzipped)
            .unwrap_or(false);
    let mut writer = utils::get_writer(&args.output, gzipped, true, 6)?;
    table.write_tsv(&mut writer)?;

    info!(
        "Wrote {} marker rows for {} features in {:?}",
        table.len(),
        table.total_features(),
        start.elapsed()
    );
    Ok(())
}

/// Which tab-separated field of a line-per-entry file carries the name.
#[derive(Debug, Clone, Copy)]
enum NameColumn {
    /// Always the first field (barcodes).
    First,
    /// The second field when present, else the first; matches the 10x
    /// features.tsv layout of `id<TAB>symbol<TAB>type`.
    Symbol,
    /// The last field; accepts both bare labels and `barcode<TAB>cluster`.
    Last,
}

fn read_name_column<P: AsRef<Path>>(path: P, column: NameColumn) -> Result<Vec<String>> {
    let reader = utils::open_text(path)?;
    parse_name_column(reader, column)
}

fn parse_name_column<R: BufRead>(reader: R, column: NameColumn) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            continue;
        }
        let mut fields = trimmed.split('\t');
        let name = match column {
            NameColumn::First => fields.next(),
            NameColumn::Symbol => {
                let first = fields.next();
                fields.next().or(first)
            }
            NameColumn::Last => fields.last(),
        };
        match name {
            Some(name) if !name.is_empty() => names.push(name.to_string()),
            _ => return Err(anyhow!("blank field in line '{}'", trimmed)),
        }
    }
    Ok(names)
}
