//! DEMARK - Differential Expression MARKer engine
//!
//! DEMARK is a parallelized command-line tool for one-vs-rest differential
//! expression over sparse single-cell matrices. It reads a MatrixMarket
//! count matrix with its feature/barcode sidecars and a per-cell cluster
//! assignment, runs the sparsity-aware Wilcoxon rank-sum (or Student's t)
//! kernel for every (gene, cluster) pair, and writes the filtered, ranked
//! marker table as TSV.
//!
//! # Usage
//!
//! ```bash
//! # Rank-sum markers for every cluster, two threads
//! demark markers --matrix matrix.mtx.gz --features features.tsv \
//!     --labels clusters.tsv --output markers.tsv --threads 2
//!
//! # Welch t-test on an already-scaled matrix, positive markers only
//! demark markers --matrix matrix.mtx --labels clusters.tsv \
//!     --test t --no-expm1 --only-pos
//! ```
//!
//! For more detailed usage information, see the documentation for the
//! `markers` subcommand.

extern crate demark_lib;
pub mod commands;
use anyhow::Result;
use demark_lib::utils;
use env_logger::Env;
use log::*;
use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(rename_all = "kebab-case", author, about)]
/// Commands for marker detection with DEMARK
struct Args {
    #[structopt(subcommand)]
    subcommand: Subcommand,
}

#[derive(StructOpt)]
enum Subcommand {
    /// One-vs-rest differential expression over a sparse matrix
    Markers(commands::MarkersArgs),
}

impl Subcommand {
    fn run(self) -> Result<()> {
        match self {
            Subcommand::Markers(args) => commands::run_markers(args)?,
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    if let Err(err) = Args::from_args().subcommand.run() {
        if utils::is_broken_pipe(&err) {
            std::process::exit(0);
        }
        error!("{}", err);
        std::process::exit(1);
    }
    Ok(())
}
