//! Runs compiled statements and turns rows into JSON objects.

use crate::client::GenericClient;
use crate::error::{GateError, GateResult};
use crate::statement::Statement;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Column name of the wrapped result.
const ROW_COLUMN: &str = "row";

/// Default SQL truncation length for log events.
pub const DEFAULT_LOG_SQL_MAX_LENGTH: usize = 200;

fn truncate_sql_bytes(sql: &str, max_bytes: usize) -> &str {
    if sql.len() <= max_bytes {
        return sql;
    }
    let mut end = max_bytes;
    while end > 0 && !sql.is_char_boundary(end) {
        end -= 1;
    }
    &sql[..end]
}

/// Wrap a row-producing statement so each row comes back as one `jsonb` object.
///
/// The outer query is a plain scan of the CTE, so PostgreSQL emits the rows in the order
/// the inner statement's ORDER BY produced them.
pub fn wrap_as_json(sql: &str) -> String {
    format!("WITH gate_result AS ({sql}) SELECT to_jsonb(gate_result) AS {ROW_COLUMN} FROM gate_result")
}

/// Executes [`Statement`]s with an optional timeout.
#[derive(Debug, Clone)]
pub struct Executor {
    query_timeout: Option<Duration>,
    log_sql_max_length: Option<usize>,
}

impl Default for Executor {
    fn default() -> Self {
        Self {
            query_timeout: None,
            log_sql_max_length: Some(DEFAULT_LOG_SQL_MAX_LENGTH),
        }
    }
}

impl Executor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail statements that run longer than `timeout`, cancelling them server-side.
    pub fn query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    /// Truncate logged SQL to `len` bytes. `None` logs it in full.
    pub fn log_sql_max_length(mut self, len: Option<usize>) -> Self {
        self.log_sql_max_length = len;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.query_timeout
    }

    fn truncate_sql(&self, sql: &str) -> String {
        match self.log_sql_max_length {
            Some(max) if sql.len() > max => format!("{}...", truncate_sql_bytes(sql, max)),
            _ => sql.to_string(),
        }
    }

    /// Run `statement` and return its rows as JSON objects.
    ///
    /// Mutations without RETURNING are executed as-is and yield an empty list.
    pub async fn run<C>(&self, client: &C, table: &str, statement: &Statement) -> GateResult<Vec<Value>>
    where
        C: GenericClient + ?Sized,
    {
        self.run_until(client, table, statement, self.deadline(Instant::now()))
            .await
    }

    /// Like [`run`](Self::run), failing once `deadline` passes.
    pub(crate) async fn run_until<C>(
        &self,
        client: &C,
        table: &str,
        statement: &Statement,
        deadline: Option<Instant>,
    ) -> GateResult<Vec<Value>>
    where
        C: GenericClient + ?Sized,
    {
        let params = statement.params.as_refs();
        let tag = format!("{table}.{}", statement.action);

        tracing::debug!(
            target: "pggate.sql",
            tag = %tag,
            param_count = params.len(),
            returns_rows = statement.returns_rows,
            sql = %self.truncate_sql(&statement.sql),
        );

        let start = Instant::now();
        let result = if statement.returns_rows {
            let sql = wrap_as_json(&statement.sql);
            let rows = self
                .until_deadline(client, deadline, client.query(&sql, &params))
                .await?;
            rows.iter()
                .map(|row| {
                    row.try_get::<_, Value>(ROW_COLUMN)
                        .map_err(|e| GateError::decode(ROW_COLUMN, e.to_string()))
                })
                .collect::<GateResult<Vec<_>>>()
        } else {
            self.until_deadline(client, deadline, client.execute(&statement.sql, &params))
                .await
                .map(|_| Vec::new())
        };

        match &result {
            Ok(rows) => tracing::trace!(
                target: "pggate.sql",
                tag = %tag,
                rows = rows.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "statement completed"
            ),
            Err(GateError::Timeout(d)) => tracing::warn!(
                target: "pggate.sql",
                tag = %tag,
                timeout_ms = d.as_millis() as u64,
                "statement timed out, cancel requested"
            ),
            Err(e) => tracing::debug!(
                target: "pggate.sql",
                tag = %tag,
                code = e.code(),
                sqlstate = e.sqlstate().unwrap_or("-"),
                error = %e,
                "statement failed"
            ),
        }
        result
    }

    /// When a request started at `started` runs out of time.
    pub(crate) fn deadline(&self, started: Instant) -> Option<Instant> {
        self.query_timeout.map(|timeout| started + timeout)
    }

    pub(crate) fn timeout_error(&self) -> GateError {
        GateError::Timeout(self.query_timeout.unwrap_or_default())
    }

    /// Await `future`, cancelling the client's in-flight query if `deadline` passes first.
    pub(crate) async fn until_deadline<C, T, F>(
        &self,
        client: &C,
        deadline: Option<Instant>,
        future: F,
    ) -> GateResult<T>
    where
        C: GenericClient + ?Sized,
        F: std::future::Future<Output = GateResult<T>>,
    {
        match deadline {
            Some(deadline) => {
                tokio::pin!(future);
                tokio::select! {
                    result = &mut future => result,
                    _ = tokio::time::sleep_until(deadline) => {
                        if let Some(cancel_token) = client.cancel_token() {
                            tokio::spawn(async move {
                                let _ = cancel_token.cancel_query(tokio_postgres::NoTls).await;
                            });
                        }
                        Err(self.timeout_error())
                    }
                }
            }
            None => future.await,
        }
    }
}
