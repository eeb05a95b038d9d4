//! Per-table column metadata, introspected lazily from `pg_catalog` and memoized.
//!
//! The cache is the only shared mutable state in the proxy. Entries are kept behind a
//! `std::sync::RwLock` that is never held across an `.await`: a miss releases the lock,
//! runs the catalog query, then re-acquires it to store the result. Two requests missing
//! on the same table may both introspect; the last one to finish wins.

use crate::client::GenericClient;
use crate::error::{GateError, GateResult};
use crate::ident::Ident;
use crate::param::binds_natively;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio_postgres::Row;

const COLUMNS_SQL: &str = r#"
SELECT
  a.attname AS column_name,
  a.attnum AS ordinal,
  pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
  a.attnotnull AS not_null
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid
WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f')
  AND a.attnum > 0
  AND NOT a.attisdropped
  AND n.nspname = $1
  AND c.relname = $2
ORDER BY a.attnum
"#;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub ordinal: i16,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, ordinal: i16) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            ordinal,
        }
    }

    /// The type a parameter for this column is cast to after binding it as text, for
    /// types [`JsonParam`](crate::param::JsonParam) has no binary encoding for.
    pub fn text_cast(&self) -> Option<&str> {
        if self.data_type.is_empty() || binds_natively(&self.data_type) {
            None
        } else {
            Some(&self.data_type)
        }
    }
}

/// The legal columns of one table, in catalog order.
#[derive(Debug, Clone)]
pub struct TableColumns {
    table: String,
    columns: Vec<ColumnInfo>,
    index: HashMap<String, usize>,
    loaded_at: Instant,
}

impl TableColumns {
    pub fn new(table: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        let index = columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();
        Self {
            table: table.into(),
            columns,
            index,
            loaded_at: Instant::now(),
        }
    }

    /// Convenience constructor from bare names; data types are left empty.
    pub fn from_names<I, S>(table: impl Into<String>, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns = names
            .into_iter()
            .enumerate()
            .map(|(i, name)| ColumnInfo {
                name: name.into(),
                data_type: String::new(),
                not_null: false,
                ordinal: i16::try_from(i + 1).unwrap_or(i16::MAX),
            })
            .collect();
        Self::new(table, columns)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn contains(&self, column: &str) -> bool {
        self.index.contains_key(column)
    }

    /// Position of `column` in catalog order, used to order INSERT column lists.
    pub fn position(&self, column: &str) -> Option<usize> {
        self.index.get(column).copied()
    }

    /// See [`ColumnInfo::text_cast`]. `None` for unknown columns.
    pub fn text_cast(&self, column: &str) -> Option<&str> {
        self.index
            .get(column)
            .and_then(|&i| self.columns[i].text_cast())
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Validate a referenced column name: identifier syntax first, then membership.
    pub fn resolve(&self, column: &str) -> GateResult<Ident> {
        let ident = Ident::parse(column)?;
        if !self.contains(column) {
            return Err(GateError::unknown_column(&self.table, column));
        }
        Ok(ident)
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.loaded_at.elapsed() >= ttl)
    }
}

/// Configuration for [`SchemaCache`].
#[derive(Debug, Clone)]
pub struct SchemaCacheConfig {
    /// PostgreSQL schema the proxied tables live in (default: `public`).
    pub schema: String,
    /// How long an entry stays valid. `None` keeps entries for the process lifetime.
    pub ttl: Option<Duration>,
}

impl Default for SchemaCacheConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            ttl: None,
        }
    }
}

/// Memoized column sets, keyed by table name.
#[derive(Debug)]
pub struct SchemaCache {
    config: SchemaCacheConfig,
    entries: RwLock<HashMap<String, Arc<TableColumns>>>,
}

impl SchemaCache {
    pub fn new(config: SchemaCacheConfig) -> Self {
        Self {
            config,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SchemaCacheConfig {
        &self.config
    }

    /// Cached entry for `table`, if present and not expired.
    pub fn get(&self, table: &str) -> Option<Arc<TableColumns>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(table)
            .filter(|cols| !cols.is_expired(self.config.ttl))
            .cloned()
    }

    /// Store an entry, replacing whatever was there.
    pub fn insert(&self, columns: TableColumns) -> Arc<TableColumns> {
        let columns = Arc::new(columns);
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(columns.table().to_string(), Arc::clone(&columns));
        columns
    }

    /// Return the legal columns of `table`, introspecting on a miss.
    ///
    /// Failures are not cached, and neither is a table with no columns in the catalog.
    pub async fn columns_for<C>(&self, client: &C, table: &str) -> GateResult<Arc<TableColumns>>
    where
        C: GenericClient + ?Sized,
    {
        if let Some(cols) = self.get(table) {
            return Ok(cols);
        }

        let columns = load_columns(client, &self.config.schema, table).await?;
        if columns.is_empty() {
            return Err(GateError::TableNotFound(table.to_string()));
        }

        tracing::debug!(
            target: "pggate.schema",
            schema = %self.config.schema,
            table,
            column_count = columns.len(),
            "introspected table columns"
        );

        Ok(self.insert(TableColumns::new(table, columns)))
    }

    /// Drop the entry for one table. Returns whether an entry was present.
    pub fn invalidate(&self, table: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(table).is_some()
    }

    /// Drop every entry. Returns how many were present.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let n = entries.len();
        entries.clear();
        n
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(SchemaCacheConfig::default())
    }
}

/// Read a table's live columns from the catalog, in ordinal order.
pub async fn load_columns<C>(client: &C, schema: &str, table: &str) -> GateResult<Vec<ColumnInfo>>
where
    C: GenericClient + ?Sized,
{
    let rows = client.query(COLUMNS_SQL, &[&schema, &table]).await?;
    rows.iter().map(column_from_row).collect()
}

fn column_from_row(row: &Row) -> GateResult<ColumnInfo> {
    fn get<'a, T: tokio_postgres::types::FromSql<'a>>(row: &'a Row, column: &str) -> GateResult<T> {
        row.try_get(column)
            .map_err(|e| GateError::decode(column, e.to_string()))
    }

    Ok(ColumnInfo {
        name: get(row, "column_name")?,
        ordinal: get(row, "ordinal")?,
        data_type: get(row, "data_type")?,
        not_null: get(row, "not_null")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_postgres::types::ToSql;

    /// A client whose catalog has no rows: any introspection yields `TableNotFound`.
    struct EmptyCatalog {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl GenericClient for EmptyCatalog {
        async fn query(&self, _sql: &str, _params: &[&(dyn ToSql + Sync)]) -> GateResult<Vec<Row>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn execute(&self, _sql: &str, _params: &[&(dyn ToSql + Sync)]) -> GateResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    }

    #[test]
    fn text_cast_only_for_types_without_binary_encoding() {
        let cols = TableColumns::new(
            "assets",
            vec![
                ColumnInfo::new("id", "bigint", 1),
                ColumnInfo::new("addr", "inet", 2),
                ColumnInfo::new("blob", "bytea", 3),
                ColumnInfo::new("price", "numeric(10,2)", 4),
                ColumnInfo::new("seen", "timestamp(3) with time zone", 5),
                ColumnInfo::new("tags", "character varying(20)[]", 6),
                ColumnInfo::new("dur", "interval", 7),
                ColumnInfo::new("opens", "time with time zone", 8),
                ColumnInfo::new("mood", "public.mood", 9),
                ColumnInfo::new("spans", "interval[]", 10),
            ],
        );
        for native in ["id", "addr", "blob", "price", "seen", "tags", "missing"] {
            assert_eq!(cols.text_cast(native), None, "{native}");
        }
        assert_eq!(cols.text_cast("dur"), Some("interval"));
        assert_eq!(cols.text_cast("opens"), Some("time with time zone"));
        assert_eq!(cols.text_cast("mood"), Some("public.mood"));
        assert_eq!(cols.text_cast("spans"), Some("interval[]"));

        let untyped = TableColumns::from_names("assets", ["dur"]);
        assert_eq!(untyped.text_cast("dur"), None);
    }

    #[test]
    fn resolve_checks_syntax_then_membership() {
        let cols = TableColumns::from_names("contractors", ["id", "name"]);
        assert_eq!(cols.resolve("name").unwrap().to_sql(), r#""name""#);
        assert!(matches!(
            cols.resolve("address"),
            Err(GateError::UnknownColumn { ref table, ref column })
                if table == "contractors" && column == "address"
        ));
        assert!(matches!(
            cols.resolve("name; --"),
            Err(GateError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn positions_follow_catalog_order() {
        let cols = TableColumns::from_names("t", ["id", "name", "address"]);
        assert_eq!(cols.position("id"), Some(0));
        assert_eq!(cols.position("address"), Some(2));
        assert_eq!(cols.position("missing"), None);
    }

    #[tokio::test]
    async fn hit_skips_introspection() {
        let cache = SchemaCache::default();
        cache.insert(TableColumns::from_names("contractors", ["id"]));
        let client = EmptyCatalog {
            calls: AtomicUsize::new(0),
        };

        let cols = cache.columns_for(&client, "contractors").await.unwrap();
        assert!(cols.contains("id"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_table_is_not_cached() {
        let cache = SchemaCache::default();
        let client = EmptyCatalog {
            calls: AtomicUsize::new(0),
        };

        for _ in 0..2 {
            assert!(matches!(
                cache.columns_for(&client, "ghost").await,
                Err(GateError::TableNotFound(_))
            ));
        }
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn ttl_expires_entries() {
        let cache = SchemaCache::new(SchemaCacheConfig {
            ttl: Some(Duration::ZERO),
            ..Default::default()
        });
        cache.insert(TableColumns::from_names("t", ["id"]));
        assert!(cache.get("t").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn invalidate_and_clear() {
        let cache = SchemaCache::default();
        cache.insert(TableColumns::from_names("a", ["id"]));
        cache.insert(TableColumns::from_names("b", ["id"]));

        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));
        assert!(cache.get("b").is_some());
        assert_eq!(cache.clear(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn concurrent_inserts_keep_last_writer() {
        let cache = Arc::new(SchemaCache::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    cache.insert(TableColumns::from_names("t", [format!("c{i}")]));
                    cache.get("t").is_some()
                })
            })
            .collect();

        for h in handles {
            assert!(h.join().unwrap());
        }
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("t").unwrap().len(), 1);
    }
}
