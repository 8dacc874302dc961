//! Datastore registry: identity -> configuration, collections, live handles.
//!
//! Explicitly owned (no process globals): construct one [`Registry`] at
//! startup, hand it to the adapter, tear it down at shutdown.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::config::{DatastoreConfig, DriverConfig, SchemaConfig};
use crate::connection::SessionId;
use crate::driver::Connection;
use crate::error::AdapterError;
use crate::schema::{CollectionDefinition, Schema};

/// A connection handle shared between the registry and the operation using it.
pub type SharedConnection = Arc<tokio::sync::Mutex<Box<dyn Connection>>>;

/// The handle shape active for an entry, selected by `config.persistent`.
enum HandleState {
    /// One shared handle, reused across calls once installed.
    Persistent(Option<SharedConnection>),
    /// One handle per live session id; never shared between operations.
    Transient(HashMap<SessionId, SharedConnection>),
}

struct DatastoreEntry {
    config: DatastoreConfig,
    collections: BTreeMap<String, CollectionDefinition>,
    handle: HandleState,
    /// Serializes persistent connection establishment for this identity.
    connect_gate: Arc<tokio::sync::Mutex<()>>,
}

/// Process-wide map of registered datastores.
///
/// Interior map access is short and synchronous; the lock is never held
/// across an await point.
#[derive(Default)]
pub struct Registry {
    entries: Mutex<HashMap<String, DatastoreEntry>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a datastore. Opens no connection.
    pub fn register(
        &self,
        config: DatastoreConfig,
        collections: BTreeMap<String, CollectionDefinition>,
    ) -> Result<(), AdapterError> {
        if config.identity.is_empty() {
            return Err(AdapterError::Registration(
                "datastore is missing an identity".to_string(),
            ));
        }
        let mut entries = self.lock_entries();
        if entries.contains_key(&config.identity) {
            return Err(AdapterError::Registration(format!(
                "datastore '{}' is already registered",
                config.identity
            )));
        }
        let handle = if config.persistent {
            HandleState::Persistent(None)
        } else {
            HandleState::Transient(HashMap::new())
        };
        debug!(identity = %config.identity, persistent = config.persistent, "registering datastore");
        entries.insert(
            config.identity.clone(),
            DatastoreEntry {
                config,
                collections,
                handle,
                connect_gate: Arc::new(tokio::sync::Mutex::new(())),
            },
        );
        Ok(())
    }

    /// The primary-key attribute name of a registered collection.
    pub fn primary_key(&self, identity: &str, collection: &str) -> Result<String, AdapterError> {
        let entries = self.lock_entries();
        let entry = lookup(&entries, identity)?;
        entry
            .collections
            .get(collection)
            .map(|def| def.primary_key.clone())
            .ok_or_else(|| {
                AdapterError::Registration(format!(
                    "collection '{collection}' is not registered on datastore '{identity}'"
                ))
            })
    }

    pub fn collection_definition(
        &self,
        identity: &str,
        collection: &str,
    ) -> Result<CollectionDefinition, AdapterError> {
        let entries = self.lock_entries();
        let entry = lookup(&entries, identity)?;
        entry.collections.get(collection).cloned().ok_or_else(|| {
            AdapterError::Registration(format!(
                "collection '{collection}' is not registered on datastore '{identity}'"
            ))
        })
    }

    pub fn is_persistent(&self, identity: &str) -> Result<bool, AdapterError> {
        let entries = self.lock_entries();
        Ok(lookup(&entries, identity)?.config.persistent)
    }

    /// The marshalled driver configuration for an entry.
    pub fn driver_config(&self, identity: &str) -> Result<DriverConfig, AdapterError> {
        let entries = self.lock_entries();
        Ok(lookup(&entries, identity)?.config.marshal())
    }

    pub(crate) fn connect_gate(
        &self,
        identity: &str,
    ) -> Result<Arc<tokio::sync::Mutex<()>>, AdapterError> {
        let entries = self.lock_entries();
        Ok(lookup(&entries, identity)?.connect_gate.clone())
    }

    pub(crate) fn persistent_handle(
        &self,
        identity: &str,
    ) -> Result<Option<SharedConnection>, AdapterError> {
        let entries = self.lock_entries();
        match &lookup(&entries, identity)?.handle {
            HandleState::Persistent(slot) => Ok(slot.clone()),
            HandleState::Transient(_) => Ok(None),
        }
    }

    pub(crate) fn install_persistent(
        &self,
        identity: &str,
        connection: Box<dyn Connection>,
    ) -> Result<SharedConnection, AdapterError> {
        let shared: SharedConnection = Arc::new(tokio::sync::Mutex::new(connection));
        let mut entries = self.lock_entries();
        let entry = lookup_mut(&mut entries, identity)?;
        match &mut entry.handle {
            HandleState::Persistent(slot) => {
                *slot = Some(shared.clone());
                Ok(shared)
            }
            HandleState::Transient(_) => Err(AdapterError::Registration(format!(
                "datastore '{identity}' is not configured as persistent"
            ))),
        }
    }

    pub(crate) fn install_session(
        &self,
        identity: &str,
        session: SessionId,
        connection: Box<dyn Connection>,
    ) -> Result<SharedConnection, AdapterError> {
        let shared: SharedConnection = Arc::new(tokio::sync::Mutex::new(connection));
        let mut entries = self.lock_entries();
        let entry = lookup_mut(&mut entries, identity)?;
        match &mut entry.handle {
            HandleState::Transient(sessions) => {
                sessions.insert(session, shared.clone());
                Ok(shared)
            }
            HandleState::Persistent(_) => Err(AdapterError::Registration(format!(
                "datastore '{identity}' is not configured as transient"
            ))),
        }
    }

    /// Detach a session handle so its owner can close it exactly once.
    ///
    /// Returns `None` when teardown already swept the session.
    pub(crate) fn remove_session(
        &self,
        identity: &str,
        session: SessionId,
    ) -> Option<SharedConnection> {
        let mut entries = self.lock_entries();
        let entry = entries.get_mut(identity)?;
        match &mut entry.handle {
            HandleState::Transient(sessions) => sessions.remove(&session),
            HandleState::Persistent(_) => None,
        }
    }

    /// Cache the normalized schema produced by a successful describe.
    pub fn cache_schema(&self, identity: &str, schema: Schema) -> Result<(), AdapterError> {
        let mut entries = self.lock_entries();
        let entry = lookup_mut(&mut entries, identity)?;
        entry.config.schema = SchemaConfig::Cached(schema);
        Ok(())
    }

    /// The schema cached by the last successful describe, if any.
    pub fn cached_schema(&self, identity: &str) -> Result<Option<Schema>, AdapterError> {
        let entries = self.lock_entries();
        match &lookup(&entries, identity)?.config.schema {
            SchemaConfig::Cached(schema) => Ok(Some(schema.clone())),
            SchemaConfig::Flag(_) => Ok(None),
        }
    }

    #[must_use]
    pub fn is_registered(&self, identity: &str) -> bool {
        self.lock_entries().contains_key(identity)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_entries().is_empty()
    }

    /// Close every handle owned by `identity` (or by every entry when
    /// `None`) and remove the entries. Idempotent: unknown or already
    /// torn-down identities are a no-op.
    pub async fn teardown(&self, identity: Option<&str>) {
        let removed: Vec<DatastoreEntry> = {
            let mut entries = self.lock_entries();
            match identity {
                Some(identity) => entries.remove(identity).into_iter().collect(),
                None => entries.drain().map(|(_, entry)| entry).collect(),
            }
        };

        for entry in removed {
            let identity = entry.config.identity;
            let handles: Vec<SharedConnection> = match entry.handle {
                HandleState::Persistent(slot) => slot.into_iter().collect(),
                HandleState::Transient(sessions) => sessions.into_values().collect(),
            };
            debug!(identity = %identity, handles = handles.len(), "tearing down datastore");
            for handle in handles {
                let mut connection = handle.lock().await;
                if let Err(error) = connection.close().await {
                    warn!(identity = %identity, %error, "failed to close connection during teardown");
                }
            }
        }
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, DatastoreEntry>> {
        // Lock poisoning would mean a panic while holding a map guard;
        // the map itself stays structurally valid, so keep going.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn lookup<'a>(
    entries: &'a HashMap<String, DatastoreEntry>,
    identity: &str,
) -> Result<&'a DatastoreEntry, AdapterError> {
    entries.get(identity).ok_or_else(|| {
        AdapterError::Registration(format!("datastore '{identity}' is not registered"))
    })
}

fn lookup_mut<'a>(
    entries: &'a mut HashMap<String, DatastoreEntry>,
    identity: &str,
) -> Result<&'a mut DatastoreEntry, AdapterError> {
    entries.get_mut(identity).ok_or_else(|| {
        AdapterError::Registration(format!("datastore '{identity}' is not registered"))
    })
}
