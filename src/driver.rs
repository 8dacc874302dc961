use async_trait::async_trait;

use crate::config::DriverConfig;
use crate::error::AdapterError;
use crate::types::QueryOutcome;

/// One live network connection to the backing store.
///
/// A connection that has been closed reports `is_connected() == false`
/// and must not be queried again.
#[async_trait]
pub trait Connection: Send {
    fn is_connected(&self) -> bool;

    /// Execute a statement batch verbatim and return its recordsets.
    async fn query(&mut self, statement: &str) -> Result<QueryOutcome, AdapterError>;

    async fn close(&mut self) -> Result<(), AdapterError>;
}

/// The opaque driver seam: the adapter only ever connects, queries, closes.
///
/// Connect failures propagate to the caller unmodified; retries, if
/// desired, belong to a surrounding policy.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(&self, config: &DriverConfig) -> Result<Box<dyn Connection>, AdapterError>;
}
