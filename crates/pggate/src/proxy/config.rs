use crate::executor::DEFAULT_LOG_SQL_MAX_LENGTH;
use std::time::Duration;

/// Configuration for [`QueryProxy`](super::QueryProxy).
///
/// Defaults: schema `public`, the built-in table list, no schema TTL, no query timeout,
/// logged SQL truncated to 200 bytes.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// PostgreSQL schema the proxied tables live in.
    pub schema: String,
    /// Allowed tables. `None` uses [`DEFAULT_TABLES`](crate::registry::DEFAULT_TABLES).
    pub allowed_tables: Option<Vec<String>>,
    /// How long introspected column sets stay valid. `None` keeps them until invalidated.
    pub schema_ttl: Option<Duration>,
    /// Per-request timeout covering introspection, pool checkout and the statement.
    /// `None` means no timeout.
    pub query_timeout: Option<Duration>,
    /// Truncate logged SQL (in bytes). `None` means no truncation.
    pub log_sql_max_length: Option<usize>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            allowed_tables: None,
            schema_ttl: None,
            query_timeout: None,
            log_sql_max_length: Some(DEFAULT_LOG_SQL_MAX_LENGTH),
        }
    }
}

impl ProxyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Replace the built-in allow-list.
    pub fn with_allowed_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_tables = Some(tables.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_schema_ttl(mut self, ttl: Duration) -> Self {
        self.schema_ttl = Some(ttl);
        self
    }

    /// Requests exceeding this duration are cancelled and fail with a timeout error.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_log_sql_max_length(mut self, len: usize) -> Self {
        self.log_sql_max_length = Some(len);
        self
    }

    /// Log SQL in full.
    pub fn no_sql_truncation(mut self) -> Self {
        self.log_sql_max_length = None;
        self
    }
}
