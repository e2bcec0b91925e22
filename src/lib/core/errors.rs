use anyhow::Error;
use std::io;

/// Returns `true` when an error chain bottoms out in a broken pipe.
///
/// Writing the marker table to a truncated pager (`demark markers ... | head`)
/// is not a failure; `main` uses this to exit 0 instead of reporting an error.
#[inline]
pub fn is_broken_pipe(err: &Error) -> bool {
    err.root_cause()
        .downcast_ref::<io::Error>()
        .map(|io_err| io_err.kind() == io::ErrorKind::BrokenPipe)
        .unwrap_or(false)
}
