//! The query proxy: one payload in, one envelope out.
//!
//! Requests go through a fixed pipeline that stops at the first error:
//!
//! 1. the table must be in the [`TableRegistry`] (no database access yet);
//! 2. UPDATE/DELETE must carry filters;
//! 3. the table's columns are fetched from the [`SchemaCache`];
//! 4. the payload is compiled into a [`Statement`], validating every column reference;
//! 5. the [`Executor`] runs it.
//!
//! The configured query timeout covers steps 3 to 5 as one budget, plus the pool checkout
//! for the pooled entry points.
//!
//! # Example
//!
//! ```ignore
//! use pggate::{ProxyConfig, QueryPayload, QueryProxy};
//! use serde_json::json;
//!
//! let proxy = QueryProxy::new(ProxyConfig::new().with_allowed_tables(["contractors"]));
//! let pool = pggate::create_pool(&database_url)?;
//!
//! let payload = QueryPayload::select("contractors")
//!     .filter("id", "in", json!([1, 2]))
//!     .order_by("name", true);
//! let envelope = proxy.handle_pooled(&pool, &payload).await;
//! ```

mod config;


pub use config::ProxyConfig;

use crate::client::GenericClient;
use crate::envelope::Envelope;
use crate::error::{GateError, GateResult};
use crate::executor::Executor;
use crate::ident::Ident;
use crate::payload::QueryPayload;
use crate::registry::TableRegistry;
use crate::schema::{SchemaCache, SchemaCacheConfig};
use crate::statement::{Statement, compile};
use serde_json::Value;
use tokio::time::Instant;

/// Validates, compiles and runs [`QueryPayload`]s.
///
/// A `QueryProxy` is shared between requests (typically behind an `Arc`); the schema cache
/// is its only mutable state.
#[derive(Debug)]
pub struct QueryProxy {
    registry: TableRegistry,
    schema: SchemaCache,
    executor: Executor,
}

impl Default for QueryProxy {
    fn default() -> Self {
        Self::new(ProxyConfig::default())
    }
}

impl QueryProxy {
    pub fn new(config: ProxyConfig) -> Self {
        let registry = match config.allowed_tables {
            Some(tables) => TableRegistry::new(tables),
            None => TableRegistry::default(),
        };
        let schema = SchemaCache::new(SchemaCacheConfig {
            schema: config.schema,
            ttl: config.schema_ttl,
        });
        let mut executor = Executor::new().log_sql_max_length(config.log_sql_max_length);
        if let Some(timeout) = config.query_timeout {
            executor = executor.query_timeout(timeout);
        }
        Self {
            registry,
            schema,
            executor,
        }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    pub fn schema_cache(&self) -> &SchemaCache {
        &self.schema
    }

    /// Drop the cached columns of one table. Returns whether an entry was present.
    pub fn invalidate(&self, table: &str) -> bool {
        self.schema.invalidate(table)
    }

    /// Drop every cached column set. Returns how many were present.
    pub fn clear_schema(&self) -> usize {
        self.schema.clear()
    }

    /// Checks that need no database access.
    fn admit(&self, payload: &QueryPayload) -> GateResult<Ident> {
        let table = self.registry.resolve(&payload.table)?;
        if payload.action.is_guarded_mutation() && payload.filters.is_empty() {
            return Err(GateError::UnconditionalMutationForbidden(payload.action));
        }
        Ok(table)
    }

    async fn prepare_admitted<C>(
        &self,
        client: &C,
        table: &Ident,
        payload: &QueryPayload,
        deadline: Option<Instant>,
    ) -> GateResult<Statement>
    where
        C: GenericClient + ?Sized,
    {
        let columns = self
            .executor
            .until_deadline(client, deadline, self.schema.columns_for(client, table.as_str()))
            .await?;
        compile(payload, table, &columns)
    }

    /// Validate and compile `payload` without running it.
    ///
    /// The client is only used to introspect the table on a schema cache miss.
    pub async fn prepare<C>(&self, client: &C, payload: &QueryPayload) -> GateResult<Statement>
    where
        C: GenericClient + ?Sized,
    {
        let table = self.admit(payload)?;
        let deadline = self.executor.deadline(Instant::now());
        self.prepare_admitted(client, &table, payload, deadline).await
    }

    async fn execute_admitted<C>(
        &self,
        client: &C,
        table: &Ident,
        payload: &QueryPayload,
        deadline: Option<Instant>,
    ) -> GateResult<Vec<Value>>
    where
        C: GenericClient + ?Sized,
    {
        let statement = self
            .prepare_admitted(client, table, payload, deadline)
            .await?;
        self.executor
            .run_until(client, table.as_str(), &statement, deadline)
            .await
    }

    /// Run `payload` and return the resulting rows as JSON objects.
    pub async fn execute<C>(&self, client: &C, payload: &QueryPayload) -> GateResult<Vec<Value>>
    where
        C: GenericClient + ?Sized,
    {
        let table = self.admit(payload)?;
        let deadline = self.executor.deadline(Instant::now());
        self.execute_admitted(client, &table, payload, deadline).await
    }

    /// Run `payload` and wrap the outcome in an [`Envelope`].
    pub async fn handle<C>(&self, client: &C, payload: &QueryPayload) -> Envelope
    where
        C: GenericClient + ?Sized,
    {
        let result = self.execute(client, payload).await;
        self.envelope(payload, result)
    }

    /// Like [`execute`](Self::execute), checking out a connection from `pool`.
    ///
    /// The connection is taken only after the checks that need no database access have
    /// passed, and is returned to the pool when this call completes.
    #[cfg(feature = "pool")]
    pub async fn execute_pooled(
        &self,
        pool: &deadpool_postgres::Pool,
        payload: &QueryPayload,
    ) -> GateResult<Vec<Value>> {
        let table = self.admit(payload)?;
        let deadline = self.executor.deadline(Instant::now());
        let checkout = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, pool.get())
                .await
                .map_err(|_| self.executor.timeout_error())?,
            None => pool.get().await,
        };
        // The pool's own wait timeout is the same budget.
        let client = checkout.map_err(|e| match e {
            deadpool_postgres::PoolError::Timeout(_) => self.executor.timeout_error(),
            e => GateError::from(e),
        })?;
        self.execute_admitted(&client, &table, payload, deadline).await
    }

    /// Like [`handle`](Self::handle), checking out a connection from `pool`.
    #[cfg(feature = "pool")]
    pub async fn handle_pooled(
        &self,
        pool: &deadpool_postgres::Pool,
        payload: &QueryPayload,
    ) -> Envelope {
        let result = self.execute_pooled(pool, payload).await;
        self.envelope(payload, result)
    }

    fn envelope(&self, payload: &QueryPayload, result: GateResult<Vec<Value>>) -> Envelope {
        match result {
            Ok(rows) => Envelope::ok(rows, payload.single),
            Err(err) => {
                if err.is_validation() {
                    tracing::info!(
                        target: "pggate.proxy",
                        table = %payload.table,
                        action = %payload.action,
                        code = err.code(),
                        error = %err,
                        "request rejected"
                    );
                } else {
                    tracing::warn!(
                        target: "pggate.proxy",
                        table = %payload.table,
                        action = %payload.action,
                        code = err.code(),
                        sqlstate = err.sqlstate().unwrap_or("-"),
                        error = %err,
                        "request failed"
                    );
                }
                Envelope::from_error(&err)
            }
        }
    }
}
