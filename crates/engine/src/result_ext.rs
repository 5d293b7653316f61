//! Error logging at the point where a result is handed on.

use std::fmt::Display;

/// Adds [`log`](ResultExt::log) to `Result`.
pub trait ResultExt<T, E> {
    /// Log an `Err` with `context` and the caller's location, then return
    /// the result unchanged so it can still be propagated with `?`.
    fn log<S: Display>(self, context: S) -> Result<T, E>;
}

impl<T, E: Display> ResultExt<T, E> for Result<T, E> {
    #[track_caller]
    fn log<S: Display>(self, context: S) -> Result<T, E> {
        if let Err(ref e) = self {
            let location = std::panic::Location::caller();
            tracing::error!(
                error = %e,
                location = %format_args!("{}:{}", location.file(), location.line()),
                context = %context,
                "Operation failed"
            );
        }
        self
    }
}
