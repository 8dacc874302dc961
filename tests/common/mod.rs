#![allow(dead_code)]

//! Scripted in-memory driver for exercising the adapter without a server.
//!
//! Records every connect, close, and statement; answers statements
//! through a programmable handler.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sqlserver_adapter::prelude::*;
use sqlserver_adapter::{Connection, Driver, DriverConfig, QueryOutcome, SqlServerAdapter};

type Handler = dyn Fn(&str) -> Result<QueryOutcome, AdapterError> + Send + Sync;

pub struct ScriptedDriver {
    state: Arc<DriverState>,
}

struct DriverState {
    connects: AtomicUsize,
    closes: AtomicUsize,
    statements: Mutex<Vec<(usize, String)>>,
    handler: Mutex<Arc<Handler>>,
}

impl ScriptedDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(DriverState {
                connects: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
                statements: Mutex::new(Vec::new()),
                handler: Mutex::new(Arc::new(|_| Ok(QueryOutcome::empty()))),
            }),
        })
    }

    /// Install the statement handler every live connection answers with.
    pub fn respond_with(
        &self,
        handler: impl Fn(&str) -> Result<QueryOutcome, AdapterError> + Send + Sync + 'static,
    ) {
        *self.state.handler.lock().unwrap() = Arc::new(handler);
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    /// Statements in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .statements
            .lock()
            .unwrap()
            .iter()
            .map(|(_, statement)| statement.clone())
            .collect()
    }

    /// Statements tagged with the connection that executed them.
    pub fn statements_by_connection(&self) -> Vec<(usize, String)> {
        self.state.statements.lock().unwrap().clone()
    }
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn connect(&self, _config: &DriverConfig) -> Result<Box<dyn Connection>, AdapterError> {
        let id = self.state.connects.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(ScriptedConnection {
            id,
            connected: true,
            state: self.state.clone(),
        }))
    }
}

struct ScriptedConnection {
    id: usize,
    connected: bool,
    state: Arc<DriverState>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn query(&mut self, statement: &str) -> Result<QueryOutcome, AdapterError> {
        self.state
            .statements
            .lock()
            .unwrap()
            .push((self.id, statement.to_string()));
        let handler = self.state.handler.lock().unwrap().clone();
        handler(statement)
    }

    async fn close(&mut self) -> Result<(), AdapterError> {
        self.connected = false;
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A `user` collection with an identity primary key, plus an `account`
/// collection keyed by a natural text code.
pub fn collections() -> BTreeMap<String, CollectionDefinition> {
    let mut collections = BTreeMap::new();
    collections.insert(
        "user".to_string(),
        CollectionDefinition::new("id")
            .attribute(
                "id",
                AttributeDef::of(AttributeType::Integer).auto_increment(),
            )
            .attribute("name", AttributeDef::of(AttributeType::Text))
            .attribute("active", AttributeDef::of(AttributeType::Boolean)),
    );
    collections.insert(
        "account".to_string(),
        CollectionDefinition::new("code")
            .attribute("code", AttributeDef::of(AttributeType::Text))
            .attribute("balance", AttributeDef::of(AttributeType::Float)),
    );
    collections
}

/// Build an adapter on the scripted driver with one registered datastore.
pub fn adapter_with(driver: Arc<ScriptedDriver>, persistent: bool) -> SqlServerAdapter {
    let adapter = SqlServerAdapter::builder().driver(driver).build();
    let mut config = DatastoreConfig::new("default");
    config.persistent = persistent;
    adapter
        .register_datastore(config, collections())
        .expect("registration");
    adapter
}

/// Shorthand for building a record from attribute/value pairs.
pub fn row(pairs: &[(&str, Value)]) -> Record {
    pairs
        .iter()
        .map(|(name, value)| ((*name).to_string(), value.clone()))
        .collect()
}
