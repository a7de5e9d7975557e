//! Top-level handling of unrecoverable GPU failures.
//!
//! GPU wrappers return [`Result`](crate::Result) instead of aborting in
//! place. Callers at the top of a frame or of initialization funnel those
//! results through [`OrAbort`], which logs once with context and terminates
//! the process. A device that failed an object creation or a submission is
//! never used again.

use std::fmt::Display;

/// Terminate the process on error after logging it.
pub trait OrAbort<T> {
    /// Unwrap the value or log `context` with the error and abort.
    fn or_abort(self, context: &str) -> T;
}

impl<T, E: Display> OrAbort<T> for std::result::Result<T, E> {
    #[track_caller]
    fn or_abort(self, context: &str) -> T {
        match self {
            Ok(value) => value,
            Err(e) => abort_with(context, &e),
        }
    }
}

/// Log a fatal GPU error and abort.
#[cold]
#[track_caller]
pub fn abort_with(context: &str, error: &dyn Display) -> ! {
    let location = std::panic::Location::caller();
    tracing::error!(%location, "{context}: {error}");
    std::process::abort()
}
