use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::schema::Schema;

/// Configuration for one logical datastore.
///
/// Immutable after registration, except that a successful `describe`
/// replaces [`DatastoreConfig::schema`] with the normalized catalog schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Unique key this datastore is registered under.
    pub identity: String,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Explicit server name for the driver; defaults to `host` when absent.
    pub server: Option<String>,
    pub schema: SchemaConfig,
    #[serde(with = "duration_millis")]
    pub connection_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub request_timeout: Duration,
    /// `true`: one shared handle reused across calls. `false`: a fresh,
    /// session-tagged handle per logical operation.
    pub persistent: bool,
    pub options: TlsOptions,
    pub pool: PoolSettings,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            identity: String::new(),
            host: "localhost".to_string(),
            port: 1433,
            database: None,
            user: None,
            password: None,
            server: None,
            schema: SchemaConfig::default(),
            connection_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(60),
            persistent: false,
            options: TlsOptions::default(),
            pool: PoolSettings::default(),
        }
    }
}

impl DatastoreConfig {
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            ..Self::default()
        }
    }

    /// Translate into the driver's expected shape.
    ///
    /// Non-destructive defaulting: an explicit `server` wins over `host`,
    /// and the pool idle timeout converts from seconds to the driver's
    /// milliseconds unit.
    #[must_use]
    pub fn marshal(&self) -> DriverConfig {
        DriverConfig {
            server: self.server.clone().unwrap_or_else(|| self.host.clone()),
            port: self.port,
            database: self.database.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
            encrypt: self.options.encrypt,
            connection_timeout: self.connection_timeout,
            request_timeout: self.request_timeout,
            pool: DriverPoolConfig {
                min: self.pool.min,
                max: self.pool.max,
                idle_timeout_millis: self.pool.idle_timeout_secs * 1000,
            },
        }
    }
}

/// Whether schema handling is enabled, or the cached result of a describe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SchemaConfig {
    Flag(bool),
    Cached(Schema),
}

impl Default for SchemaConfig {
    fn default() -> Self {
        SchemaConfig::Flag(true)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsOptions {
    pub encrypt: bool,
}

/// Pool sizing as the mapping layer supplies it; the idle timeout is in
/// seconds here and in milliseconds on the driver side.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min: u32,
    pub max: u32,
    #[serde(rename = "idleTimeout")]
    pub idle_timeout_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min: 5,
            max: 30,
            idle_timeout_secs: 300,
        }
    }
}

/// The marshalled configuration handed to [`crate::driver::Driver::connect`].
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub server: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub encrypt: bool,
    pub connection_timeout: Duration,
    pub request_timeout: Duration,
    pub pool: DriverPoolConfig,
}

#[derive(Debug, Clone)]
pub struct DriverPoolConfig {
    pub min: u32,
    pub max: u32,
    pub idle_timeout_millis: u64,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marshal_defaults_server_from_host() {
        let mut config = DatastoreConfig::new("primary");
        config.host = "db.internal".to_string();
        let marshalled = config.marshal();
        assert_eq!(marshalled.server, "db.internal");
        assert_eq!(marshalled.port, 1433);
    }

    #[test]
    fn marshal_keeps_an_explicit_server() {
        let mut config = DatastoreConfig::new("primary");
        config.host = "db.internal".to_string();
        config.server = Some("listener.internal".to_string());
        assert_eq!(config.marshal().server, "listener.internal");
    }

    #[test]
    fn marshal_converts_idle_timeout_to_millis() {
        let mut config = DatastoreConfig::new("primary");
        config.pool.idle_timeout_secs = 300;
        config.pool.max = 12;
        let pool = config.marshal().pool;
        assert_eq!(pool.idle_timeout_millis, 300_000);
        assert_eq!(pool.max, 12);
        assert_eq!(pool.min, 5);
    }
}
