//! # pggate
//!
//! A schema-checked generic query proxy for PostgreSQL.
//!
//! Callers describe a CRUD operation as JSON (table, action, projection, filters, ordering,
//! pagination) and pggate compiles it into one parameterized statement, enforcing a
//! security perimeter on the way:
//!
//! - **Table allow-list**: only tables in the [`TableRegistry`] can be targeted
//! - **Schema-checked columns**: every referenced column must exist in the live table,
//!   as introspected from `pg_catalog` and memoized in the [`SchemaCache`]
//! - **Quoted identifiers**: identifiers are restricted to `[A-Za-z0-9_]` and always quoted
//! - **Parameters only**: values never appear in SQL text
//! - **Safe defaults**: UPDATE and DELETE require at least one filter
//!
//! ```ignore
//! use pggate::{QueryPayload, QueryProxy};
//! use serde_json::json;
//!
//! let proxy = QueryProxy::default();
//! let payload: QueryPayload = serde_json::from_value(json!({
//!     "table": "contractors",
//!     "action": "insert",
//!     "data": [{ "name": "A" }, { "name": "B", "address": "X" }],
//!     "returningColumns": "*"
//! }))?;
//! let envelope = proxy.handle(&client, &payload).await;
//! ```

pub mod client;
pub mod envelope;
pub mod error;
pub mod executor;
pub mod filter;
pub mod ident;
pub mod param;
pub mod payload;
pub mod proxy;
pub mod registry;
pub mod schema;
pub mod statement;

pub use client::GenericClient;
pub use envelope::Envelope;
pub use error::{GateError, GateResult};
pub use executor::Executor;
pub use filter::FilterOp;
pub use ident::{Ident, quote_ident};
pub use param::{JsonParam, ParamList};
pub use payload::{Action, Filter, Order, QueryPayload, Range};
pub use proxy::{ProxyConfig, QueryProxy};
pub use registry::{DEFAULT_TABLES, TableRegistry};
pub use schema::{ColumnInfo, SchemaCache, SchemaCacheConfig, TableColumns};
pub use statement::Statement;

#[cfg(feature = "pool")]
pub mod pool;

#[cfg(feature = "pool")]
pub use pool::{create_pool, create_pool_with_config, create_pool_with_wait_timeout};
