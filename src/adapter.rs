//! Statement dispatcher and CRUD orchestrator.
//!
//! Every verb runs the same envelope: acquire a connection from the
//! multiplexer, execute, release (closing the handle when the datastore
//! is transient), normalize the result. On top of that sit the two
//! multi-step protocols — update-with-reselect and destroy-with-preselect
//! — and the identity-insert special case for creates.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::compiler::{SqlServerCompiler, StatementCompiler};
use crate::config::DatastoreConfig;
use crate::connection::{Lease, ensure_connection, release};
use crate::criteria::Criteria;
use crate::driver::Driver;
use crate::error::AdapterError;
use crate::join::{JoinPlan, JoinSource, JoinStitcher};
use crate::mssql::TiberiusDriver;
use crate::prepare::{SqlServerValuePreparer, ValuePreparer};
use crate::registry::Registry;
use crate::schema::{CollectionDefinition, Schema, cast_record};
use crate::types::{QueryOutcome, Record, Value};

/// Find one or more records matching a criteria.
#[derive(Debug, Clone)]
pub struct FindRequest {
    pub using: String,
    pub criteria: Criteria,
}

impl FindRequest {
    #[must_use]
    pub fn new(using: impl Into<String>, criteria: Criteria) -> Self {
        Self {
            using: using.into(),
            criteria,
        }
    }
}

/// Insert one record.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub using: String,
    pub new_record: Record,
}

impl CreateRequest {
    #[must_use]
    pub fn new(using: impl Into<String>, new_record: Record) -> Self {
        Self {
            using: using.into(),
            new_record,
        }
    }
}

/// Update every record matching a criteria with a value set.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub using: String,
    pub criteria: Criteria,
    pub values_to_set: Record,
}

impl UpdateRequest {
    #[must_use]
    pub fn new(using: impl Into<String>, criteria: Criteria, values_to_set: Record) -> Self {
        Self {
            using: using.into(),
            criteria,
            values_to_set,
        }
    }
}

/// Delete every record matching a criteria.
#[derive(Debug, Clone)]
pub struct DestroyRequest {
    pub using: String,
    pub criteria: Criteria,
}

impl DestroyRequest {
    #[must_use]
    pub fn new(using: impl Into<String>, criteria: Criteria) -> Self {
        Self {
            using: using.into(),
            criteria,
        }
    }
}

/// Create a collection (table) from its definition.
#[derive(Debug, Clone)]
pub struct DefineRequest {
    pub using: String,
    pub definition: CollectionDefinition,
}

impl DefineRequest {
    #[must_use]
    pub fn new(using: impl Into<String>, definition: CollectionDefinition) -> Self {
        Self {
            using: using.into(),
            definition,
        }
    }
}

/// Emulate a cross-collection join; `criteria.joins` carries the plan.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub criteria: Criteria,
}

impl JoinRequest {
    #[must_use]
    pub fn new(criteria: Criteria) -> Self {
        Self { criteria }
    }
}

/// The adapter: registry, driver, and the external collaborators behind
/// their capability traits.
pub struct SqlServerAdapter {
    registry: Registry,
    driver: Arc<dyn Driver>,
    compiler: Arc<dyn StatementCompiler>,
    preparer: Arc<dyn ValuePreparer>,
    stitcher: Option<Arc<dyn JoinStitcher>>,
}

/// Builder for [`SqlServerAdapter`]; every collaborator has a shipped
/// default except the join stitcher.
#[derive(Default)]
pub struct SqlServerAdapterBuilder {
    driver: Option<Arc<dyn Driver>>,
    compiler: Option<Arc<dyn StatementCompiler>>,
    preparer: Option<Arc<dyn ValuePreparer>>,
    stitcher: Option<Arc<dyn JoinStitcher>>,
}

impl SqlServerAdapterBuilder {
    #[must_use]
    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.driver = Some(driver);
        self
    }

    #[must_use]
    pub fn compiler(mut self, compiler: Arc<dyn StatementCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    #[must_use]
    pub fn preparer(mut self, preparer: Arc<dyn ValuePreparer>) -> Self {
        self.preparer = Some(preparer);
        self
    }

    #[must_use]
    pub fn stitcher(mut self, stitcher: Arc<dyn JoinStitcher>) -> Self {
        self.stitcher = Some(stitcher);
        self
    }

    #[must_use]
    pub fn build(self) -> SqlServerAdapter {
        SqlServerAdapter {
            registry: Registry::new(),
            driver: self.driver.unwrap_or_else(|| Arc::new(TiberiusDriver::new())),
            compiler: self
                .compiler
                .unwrap_or_else(|| Arc::new(SqlServerCompiler::new())),
            preparer: self
                .preparer
                .unwrap_or_else(|| Arc::new(SqlServerValuePreparer::new())),
            stitcher: self.stitcher,
        }
    }
}

impl SqlServerAdapter {
    #[must_use]
    pub fn builder() -> SqlServerAdapterBuilder {
        SqlServerAdapterBuilder::default()
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Register a datastore and its collections. Opens no connection.
    pub fn register_datastore(
        &self,
        config: DatastoreConfig,
        collections: BTreeMap<String, CollectionDefinition>,
    ) -> Result<(), AdapterError> {
        self.registry.register(config, collections)
    }

    /// Close every handle owned by `identity` — or by every datastore
    /// when `None` — and forget the entries. Idempotent.
    pub async fn teardown(&self, identity: Option<&str>) {
        self.registry.teardown(identity).await;
    }

    /// Primary-key attribute name of a registered collection.
    pub fn primary_key(&self, identity: &str, collection: &str) -> Result<String, AdapterError> {
        self.registry.primary_key(identity, collection)
    }

    /// Execute a caller-supplied statement verbatim. Escape hatch: no
    /// validation, no compilation, same connection envelope as the verbs.
    pub async fn query(
        &self,
        identity: &str,
        statement: &str,
    ) -> Result<QueryOutcome, AdapterError> {
        let lease = ensure_connection(&self.registry, self.driver.as_ref(), identity).await?;
        let result = self.execute_on(&lease, statement).await;
        release(&self.registry, identity, lease).await;
        result
    }

    /// Introspect a collection against the store catalog.
    ///
    /// `Ok(None)` when the collection has no columns — distinguishing "no
    /// such table" from genuine failures. A successful describe caches
    /// the normalized schema on the datastore entry.
    pub async fn describe(
        &self,
        identity: &str,
        collection: &str,
    ) -> Result<Option<Schema>, AdapterError> {
        let statement = describe_statement(collection);
        let rows = self.query(identity, &statement).await?.into_rows();
        if rows.is_empty() {
            return Ok(None);
        }
        let schema = self.compiler.normalize_schema(&rows);
        self.registry.cache_schema(identity, schema.clone())?;
        Ok(Some(schema))
    }

    /// Create the backing table for a collection.
    pub async fn define(&self, identity: &str, request: DefineRequest) -> Result<(), AdapterError> {
        let body = self
            .compiler
            .table_definition(&request.using, &request.definition)?;
        let statement = format!("CREATE TABLE {} ({body})", quote_ident(&request.using));
        self.query(identity, &statement).await?;
        Ok(())
    }

    /// Drop a collection's table; a no-op when the table does not exist.
    pub async fn drop_collection(
        &self,
        identity: &str,
        collection: &str,
    ) -> Result<(), AdapterError> {
        let statement = format!(
            "IF OBJECT_ID('dbo.{}', 'U') IS NOT NULL DROP TABLE {}",
            collection.replace('\'', "''"),
            quote_ident(collection)
        );
        self.query(identity, &statement).await?;
        Ok(())
    }

    /// Select the records matching a criteria.
    ///
    /// Validates aggregate directives before any statement is issued and
    /// injects the collection's primary key for the compiler.
    pub async fn find(
        &self,
        identity: &str,
        request: FindRequest,
    ) -> Result<Vec<Record>, AdapterError> {
        let mut criteria = request.criteria;
        criteria.validate_aggregates()?;
        criteria.primary_key = Some(self.registry.primary_key(identity, &request.using)?);
        let statement = self.compiler.select(&request.using, &criteria)?;
        Ok(self.query(identity, &statement).await?.into_rows())
    }

    /// Insert one record and return it as the store now holds it.
    pub async fn create(
        &self,
        identity: &str,
        request: CreateRequest,
    ) -> Result<Record, AdapterError> {
        let using = request.using;
        let definition = self.registry.collection_definition(identity, &using)?;
        let pk = definition.primary_key.clone();
        let mut values = request.new_record;

        // Managed fields belong to the mapping layer; an explicitly
        // supplied primary key survives the strip.
        values.remove("createdAt");
        values.remove("updatedAt");
        let pk_supplied = values.get(&pk).is_some_and(|v| !v.is_null());
        if !pk_supplied {
            values.remove(&pk);
            values.remove("id");
        } else if pk != "id" {
            values.remove("id");
        }

        let preparer = self.preparer.clone();
        values.map_values(|v| preparer.prepare(v));

        let mut statement = self.compiler.insert(&using, &values)?;
        if pk_supplied && definition.identity_primary_key() {
            // The store rejects explicit writes into an identity column
            // unless identity-insert mode brackets the statement.
            let table = quote_ident(&using);
            statement =
                format!("SET IDENTITY_INSERT {table} ON; {statement} SET IDENTITY_INSERT {table} OFF;");
        }

        let outcome = self.query(identity, &statement).await?;
        let mut record = values;
        if let Some(generated) = outcome.rows().first().and_then(|row| row.get("id")) {
            if !generated.is_null() {
                record.set(pk.clone(), generated.clone());
            }
        }
        Ok(cast_record(&definition, record))
    }

    /// Update matching records and return the post-update rows.
    ///
    /// Three steps: select the matching primary keys (zero matches short-
    /// circuits to an empty result with no UPDATE issued), execute the
    /// update scoped by the original criteria, then re-read by the
    /// captured keys so the caller sees authoritative post-write state
    /// rather than an echo of its input.
    pub async fn update(
        &self,
        identity: &str,
        request: UpdateRequest,
    ) -> Result<Vec<Record>, AdapterError> {
        let using = request.using;
        let pk = self.registry.primary_key(identity, &using)?;
        let where_sql = self.compiler.where_clause(&using, &request.criteria)?;

        let lease = ensure_connection(&self.registry, self.driver.as_ref(), identity).await?;
        let staged = self
            .run_update_steps(&lease, &using, &pk, &where_sql, request.values_to_set)
            .await;
        release(&self.registry, identity, lease).await;

        let Some(pks) = staged? else {
            return Ok(Vec::new());
        };

        let criteria = if pks.len() == 1 {
            Criteria::where_eq(&pk, &pks[0]).with_limit(1)
        } else {
            Criteria::where_in(&pk, &pks)
        };
        self.find(identity, FindRequest::new(using, criteria)).await
    }

    async fn run_update_steps(
        &self,
        lease: &Lease,
        using: &str,
        pk: &str,
        where_sql: &str,
        mut values: Record,
    ) -> Result<Option<Vec<Value>>, AdapterError> {
        let select = join_clauses(&[
            &format!("SELECT {} FROM {}", quote_ident(pk), quote_ident(using)),
            where_sql,
        ]);
        let matched = self.execute_on(lease, &select).await?.into_rows();
        if matched.is_empty() {
            return Ok(None);
        }
        let pks: Vec<Value> = matched
            .iter()
            .filter_map(|row| row.get(pk).cloned())
            .collect();

        values.remove("updatedAt");
        let preparer = self.preparer.clone();
        values.map_values(|v| preparer.prepare(v));
        // the primary key itself is never updatable
        values.remove(pk);

        let set_sql = self.compiler.set_clause(using, &values)?;
        let update = join_clauses(&[
            &format!("UPDATE {} SET {set_sql}", quote_ident(using)),
            where_sql,
        ]);
        self.execute_on(lease, &update).await?;
        Ok(Some(pks))
    }

    /// Delete matching records and return the pre-delete snapshot.
    ///
    /// The selecting find runs first; if it fails the delete is never
    /// attempted.
    pub async fn destroy(
        &self,
        identity: &str,
        request: DestroyRequest,
    ) -> Result<Vec<Record>, AdapterError> {
        let using = request.using;
        let where_sql = self.compiler.where_clause(&using, &request.criteria)?;

        let lease = ensure_connection(&self.registry, self.driver.as_ref(), identity).await?;
        let snapshot = match self
            .find(identity, FindRequest::new(using.clone(), request.criteria))
            .await
        {
            Ok(rows) => rows,
            Err(error) => {
                release(&self.registry, identity, lease).await;
                return Err(error);
            }
        };

        let delete = join_clauses(&[&format!("DELETE FROM {}", quote_ident(&using)), where_sql.as_str()]);
        let deleted = self.execute_on(&lease, &delete).await;
        release(&self.registry, identity, lease).await;
        deleted?;
        Ok(snapshot)
    }

    /// Delegate a join to the configured stitching algorithm, exposing a
    /// find capability and a primary-key lookup scoped to this datastore.
    pub async fn join(
        &self,
        identity: &str,
        request: JoinRequest,
    ) -> Result<Vec<Record>, AdapterError> {
        let stitcher = self.stitcher.clone().ok_or_else(|| {
            AdapterError::Unimplemented("no join stitcher configured".to_string())
        })?;

        let mut criteria = request.criteria;
        // the stitcher projects for itself
        criteria.select = None;
        let parent = criteria
            .joins
            .first()
            .map(|join| join.parent.clone())
            .ok_or_else(|| {
                AdapterError::Validation("join criteria carry no join instructions".to_string())
            })?;

        let source = AdapterJoinSource {
            adapter: self,
            identity,
        };
        let plan = JoinPlan {
            instructions: &criteria,
            parent_collection: &parent,
        };
        stitcher.stitch(plan, &source).await
    }

    async fn execute_on(
        &self,
        lease: &Lease,
        statement: &str,
    ) -> Result<QueryOutcome, AdapterError> {
        debug!(statement, "executing statement");
        let mut connection = lease.conn.lock().await;
        connection.query(statement).await
    }
}

/// Capability view over one adapter + datastore handed to the stitcher.
struct AdapterJoinSource<'a> {
    adapter: &'a SqlServerAdapter,
    identity: &'a str,
}

#[async_trait]
impl JoinSource for AdapterJoinSource<'_> {
    async fn find(
        &self,
        collection: &str,
        criteria: Criteria,
    ) -> Result<Vec<Record>, AdapterError> {
        self.adapter
            .find(self.identity, FindRequest::new(collection, criteria))
            .await
    }

    fn primary_key(&self, collection: &str) -> Option<String> {
        if collection.is_empty() {
            return None;
        }
        self.adapter
            .registry
            .primary_key(self.identity, collection)
            .ok()
    }
}

fn join_clauses(parts: &[&str]) -> String {
    parts
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}

fn quote_ident(name: &str) -> String {
    format!("[{}]", name.replace(']', "]]"))
}

/// The catalog introspection statement behind `describe`.
fn describe_statement(collection: &str) -> String {
    let table = collection.replace('\'', "''");
    format!(
        concat!(
            "SELECT c.name AS ColumnName, TYPE_NAME(c.user_type_id) AS TypeName, ",
            "c.is_nullable AS Nullable, c.is_identity AS AutoIncrement, ",
            "ISNULL((SELECT is_unique FROM sys.indexes i ",
            "LEFT OUTER JOIN sys.index_columns ic ON i.index_id = ic.index_id ",
            "WHERE i.object_id = t.object_id AND ic.object_id = t.object_id ",
            "AND ic.column_id = c.column_id), 0) AS [Unique], ",
            "ISNULL((SELECT is_primary_key FROM sys.indexes i ",
            "LEFT OUTER JOIN sys.index_columns ic ON i.index_id = ic.index_id ",
            "WHERE i.object_id = t.object_id AND ic.object_id = t.object_id ",
            "AND ic.column_id = c.column_id), 0) AS PrimaryKey, ",
            "ISNULL((SELECT COUNT(*) FROM sys.indexes i ",
            "LEFT OUTER JOIN sys.index_columns ic ON i.index_id = ic.index_id ",
            "WHERE i.object_id = t.object_id AND ic.object_id = t.object_id ",
            "AND ic.column_id = c.column_id), 0) AS Indexed ",
            "FROM sys.tables t INNER JOIN sys.columns c ON c.object_id = t.object_id ",
            "WHERE t.name = '{table}'"
        ),
        table = table
    )
}
