//! Utility re-exports.
//!
//! Shared helpers live under `crate::core`; this module mirrors them at the
//! historical `utils::*` paths the binary imports from.

pub use crate::core::concurrency::{determine_allowed_cpus, set_rayon_global_pools_size};
pub use crate::core::errors::is_broken_pipe;
pub use crate::core::fs::{is_gzipped, make_parent_dirs};
pub use crate::core::io::{get_reader, get_writer, open_text};
