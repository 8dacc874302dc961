//! SQL Server driver backed by Tiberius.
//!
//! Implements the [`Driver`]/[`Connection`] seam over a raw TDS client:
//! TCP connect, compat adapter, simple-query batches, and conversion of
//! driver rows into [`Record`]s.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use futures_util::TryStreamExt;
use tiberius::{AuthMethod, Client, Config as TiberiusConfig, EncryptionLevel, QueryItem, Row};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::debug;

use crate::config::DriverConfig;
use crate::driver::{Connection, Driver};
use crate::error::AdapterError;
use crate::types::{QueryOutcome, Record, Value};

/// Type alias for the SQL Server client.
pub type MssqlClient = Client<Compat<TcpStream>>;

/// [`Driver`] implementation that opens one Tiberius client per connect.
///
/// Pool sizing in [`DriverConfig`] is accepted but not acted on here: the
/// adapter's multiplexer owns handle reuse, so this driver stays a plain
/// connect/query/close surface.
#[derive(Debug, Clone, Default)]
pub struct TiberiusDriver;

impl TiberiusDriver {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Driver for TiberiusDriver {
    async fn connect(&self, config: &DriverConfig) -> Result<Box<dyn Connection>, AdapterError> {
        let tiberius_config = build_tiberius_config(config);
        let addr = format!("{}:{}", config.server, config.port);

        debug!(server = %config.server, port = config.port, "opening SQL Server connection");
        let tcp = timeout(config.connection_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                AdapterError::Connection(format!("TCP connect to {addr} timed out"))
            })??;
        tcp.set_nodelay(true)?;

        let client = timeout(
            config.connection_timeout,
            Client::connect(tiberius_config, tcp.compat_write()),
        )
        .await
        .map_err(|_| AdapterError::Connection(format!("TDS handshake with {addr} timed out")))??;

        Ok(Box::new(TiberiusConnection {
            client: Some(client),
            request_timeout: config.request_timeout,
        }))
    }
}

fn build_tiberius_config(config: &DriverConfig) -> TiberiusConfig {
    let mut tiberius_config = TiberiusConfig::new();
    tiberius_config.host(&config.server);
    tiberius_config.port(config.port);
    if let Some(database) = &config.database {
        tiberius_config.database(database);
    }
    tiberius_config.authentication(AuthMethod::sql_server(
        config.user.as_deref().unwrap_or_default(),
        config.password.as_deref().unwrap_or_default(),
    ));
    if config.encrypt {
        tiberius_config.encryption(EncryptionLevel::Required);
    } else {
        tiberius_config.encryption(EncryptionLevel::NotSupported);
    }
    tiberius_config.trust_cert();
    tiberius_config
}

/// One live TDS session.
struct TiberiusConnection {
    // None once closed; a closed connection is never queried again.
    client: Option<MssqlClient>,
    request_timeout: Duration,
}

#[async_trait]
impl Connection for TiberiusConnection {
    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn query(&mut self, statement: &str) -> Result<QueryOutcome, AdapterError> {
        let client = self.client.as_mut().ok_or_else(|| {
            AdapterError::Connection("query on a closed SQL Server connection".to_string())
        })?;

        let recordsets = timeout(self.request_timeout, run_batch(client, statement))
            .await
            .map_err(|_| AdapterError::Statement("SQL Server request timed out".to_string()))??;

        Ok(QueryOutcome { recordsets })
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        if let Some(client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }
}

async fn run_batch(
    client: &mut MssqlClient,
    statement: &str,
) -> Result<Vec<Vec<Record>>, AdapterError> {
    let mut stream = client.simple_query(statement).await?;
    let mut recordsets: Vec<Vec<Record>> = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(_) => recordsets.push(Vec::new()),
            QueryItem::Row(row) => {
                if recordsets.is_empty() {
                    recordsets.push(Vec::new());
                }
                if let Some(current) = recordsets.last_mut() {
                    current.push(row_to_record(&row));
                }
            }
        }
    }
    Ok(recordsets)
}

fn row_to_record(row: &Row) -> Record {
    let names: Vec<String> = row
        .columns()
        .iter()
        .map(|col| col.name().to_string())
        .collect();
    names
        .into_iter()
        .enumerate()
        .map(|(idx, name)| (name, extract_value(row, idx)))
        .collect()
}

/// Probe the column for each representation Tiberius can hand back.
fn extract_value(row: &Row, idx: usize) -> Value {
    if let Ok(Some(val)) = row.try_get::<i32, _>(idx) {
        return Value::Int(i64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<i64, _>(idx) {
        return Value::Int(val);
    }
    if let Ok(Some(val)) = row.try_get::<f32, _>(idx) {
        return Value::Float(f64::from(val));
    }
    if let Ok(Some(val)) = row.try_get::<f64, _>(idx) {
        return Value::Float(val);
    }
    if let Ok(Some(val)) = row.try_get::<bool, _>(idx) {
        return Value::Bool(val);
    }
    if let Ok(Some(val)) = row.try_get::<NaiveDateTime, _>(idx) {
        return Value::Timestamp(val);
    }
    if let Ok(Some(val)) = row.try_get::<&str, _>(idx) {
        return Value::Text(val.to_string());
    }
    if let Ok(Some(val)) = row.try_get::<&[u8], _>(idx) {
        return Value::Blob(val.to_vec());
    }
    Value::Null
}
