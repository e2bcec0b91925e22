pub mod common;
pub mod markers;

pub use markers::{run_markers, MarkersArgs};
