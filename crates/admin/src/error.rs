use thiserror::Error;

/// Errors reported by an administration backend.
#[derive(Debug, Error)]
pub enum Error {
    /// A command was given parameters it cannot accept.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// A command was used out of order, e.g. waited on before execution.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// IO operation failed.
    #[error("{0}: {1}")]
    Io(&'static str, #[source] std::io::Error),
}
