//! Async SQL Server datastore adapter.
//!
//! Exposes a uniform CRUD/query contract to a mapping layer while
//! translating every call into dialect SQL and managing the underlying
//! connections. The core is the connection multiplexer — persistent
//! shared handles or transient session-tagged ones — and the multi-step
//! CRUD orchestration (update-with-reselect, destroy-with-preselect,
//! identity-insert creates). Cross-collection joins are delegated to an
//! external stitching algorithm through a minimal capability interface.
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use sqlserver_adapter::prelude::*;
//!
//! # async fn demo() -> Result<(), AdapterError> {
//! let adapter = SqlServerAdapter::builder().build();
//!
//! let mut config = DatastoreConfig::new("default");
//! config.host = "db.internal".to_string();
//! config.database = Some("app".to_string());
//!
//! let mut collections = BTreeMap::new();
//! collections.insert(
//!     "user".to_string(),
//!     CollectionDefinition::new("id")
//!         .attribute("id", AttributeDef::of(AttributeType::Integer).auto_increment())
//!         .attribute("name", AttributeDef::of(AttributeType::Text)),
//! );
//! adapter.register_datastore(config, collections)?;
//!
//! let rows = adapter
//!     .find("default", FindRequest::new("user", Criteria::where_eq("id", &Value::Int(1))))
//!     .await?;
//! # let _ = rows;
//! adapter.teardown(None).await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod compiler;
pub mod config;
pub mod connection;
pub mod criteria;
pub mod driver;
pub mod error;
pub mod join;
pub mod mssql;
pub mod prepare;
pub mod registry;
pub mod schema;
pub mod types;

pub use adapter::{
    CreateRequest, DefineRequest, DestroyRequest, FindRequest, JoinRequest, SqlServerAdapter,
    SqlServerAdapterBuilder, UpdateRequest,
};
pub use compiler::{SqlServerCompiler, StatementCompiler};
pub use config::{DatastoreConfig, DriverConfig, PoolSettings, SchemaConfig, TlsOptions};
pub use connection::SessionId;
pub use criteria::{Criteria, JoinInstruction};
pub use driver::{Connection, Driver};
pub use error::AdapterError;
pub use join::{JoinPlan, JoinSource, JoinStitcher};
pub use mssql::TiberiusDriver;
pub use prepare::{SqlServerValuePreparer, ValuePreparer};
pub use registry::Registry;
pub use schema::{AttributeDef, AttributeType, CollectionDefinition, ColumnSchema, Schema};
pub use types::{QueryOutcome, Record, Value};

/// Convenience imports for adapter consumers.
pub mod prelude {
    pub use crate::adapter::{
        CreateRequest, DefineRequest, DestroyRequest, FindRequest, JoinRequest, SqlServerAdapter,
        UpdateRequest,
    };
    pub use crate::config::DatastoreConfig;
    pub use crate::criteria::Criteria;
    pub use crate::error::AdapterError;
    pub use crate::schema::{AttributeDef, AttributeType, CollectionDefinition};
    pub use crate::types::{Record, Value};
}
