use thiserror::Error;

/// Error type shared by every adapter operation.
///
/// Nothing here is recovered locally: failures surface to the caller
/// unmodified, and a failed step in a multi-step protocol terminates the
/// operation without compensation.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// Missing, empty, or duplicate datastore identity; unknown collection.
    #[error("Registration error: {0}")]
    Registration(String),

    /// Failure while opening a connection to the backing store.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Failure while executing a statement, including constraint violations.
    #[error("Statement error: {0}")]
    Statement(String),

    /// Invalid criteria, e.g. an aggregate-directive combination the
    /// dialect cannot express.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation requires a collaborator that was not configured.
    #[error("Unimplemented feature: {0}")]
    Unimplemented(String),

    #[error(transparent)]
    Mssql(#[from] tiberius::error::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
