//! Error types.

use thiserror::Error;

/// Errors raised by the hooks and the metric collectors.
///
/// Driver errors observed by the hooks are never wrapped in this type; they
/// are handed back to the caller unchanged.
#[derive(Debug, Error)]
pub enum Error {
    /// A terminal hook ran without a matching pre-execution hook.
    #[error("missing execution context in {hook} hook")]
    MissingExecutionContext {
        /// The hook that found no context.
        hook: &'static str,
    },

    /// Metric construction or registration failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Opening a database pool failed.
    #[cfg(feature = "mysql")]
    #[error("failed to open database pool: {0}")]
    Connect(#[from] sea_orm::DbErr),
}

impl From<Error> for sea_orm::DbErr {
    fn from(err: Error) -> Self {
        sea_orm::DbErr::Custom(err.to_string())
    }
}

/// Result alias for this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_context_display() {
        let err = Error::MissingExecutionContext { hook: "after" };
        assert_eq!(err.to_string(), "missing execution context in after hook");
    }

    #[test]
    fn test_into_db_err() {
        let err: sea_orm::DbErr = Error::MissingExecutionContext { hook: "on_error" }.into();
        assert!(err.to_string().contains("missing execution context"));
    }
}
