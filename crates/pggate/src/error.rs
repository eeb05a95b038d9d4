//! Error types for pggate

use crate::payload::Action;
use thiserror::Error;

/// Result type alias for pggate operations
pub type GateResult<T> = Result<T, GateError>;

/// Everything that can go wrong between a payload arriving and rows coming back.
///
/// Validation variants are raised before any SQL is sent. [`GateError::code`] gives a
/// stable machine-readable name for each kind, which the response envelope carries
/// alongside the human-readable message.
#[derive(Debug, Error)]
pub enum GateError {
    /// Table is not in the registry
    #[error("Table not allowed: {0}")]
    TableNotAllowed(String),

    /// Identifier contains characters outside `[A-Za-z0-9_]`
    #[error("Invalid identifier: '{0}'")]
    InvalidIdentifier(String),

    /// Column is not part of the table's cached schema
    #[error("Unknown column '{column}' on table '{table}'")]
    UnknownColumn { table: String, column: String },

    /// Filter operator outside the supported set
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),

    #[error("No data to insert")]
    NoDataToInsert,

    #[error("No data to update")]
    NoDataToUpdate,

    /// UPDATE/DELETE without a single filter
    #[error("Unconditional {0} forbidden")]
    UnconditionalMutationForbidden(Action),

    /// `range` window that cannot be expressed as LIMIT/OFFSET
    #[error("Invalid range: from={from}, to={to}")]
    InvalidRange { from: i64, to: i64 },

    /// Payload is structurally wrong (e.g. `in` without an array)
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Allowed table with no columns in the catalog
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Pool error
    #[error("Pool error: {0}")]
    Pool(String),

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Row decode error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Anything the database reported while running the statement
    #[error("{message}")]
    Execution {
        message: String,
        sqlstate: Option<String>,
    },
}

impl GateError {
    /// Create an unknown column error
    pub fn unknown_column(table: impl Into<String>, column: impl Into<String>) -> Self {
        Self::UnknownColumn {
            table: table.into(),
            column: column.into(),
        }
    }

    /// Create an invalid payload error
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable name for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TableNotAllowed(_) => "table_not_allowed",
            Self::InvalidIdentifier(_) => "invalid_identifier",
            Self::UnknownColumn { .. } => "unknown_column",
            Self::UnsupportedOperator(_) => "unsupported_operator",
            Self::NoDataToInsert => "no_data_to_insert",
            Self::NoDataToUpdate => "no_data_to_update",
            Self::UnconditionalMutationForbidden(_) => "unconditional_mutation_forbidden",
            Self::InvalidRange { .. } => "invalid_range",
            Self::InvalidPayload(_) => "invalid_payload",
            Self::TableNotFound(_) => "table_not_found",
            Self::Timeout(_) => "timeout",
            Self::Connection(_) | Self::Pool(_) | Self::Decode { .. } | Self::Execution { .. } => {
                "execution_error"
            }
        }
    }

    /// Whether this error was raised before anything was sent to the database.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::TableNotAllowed(_)
                | Self::InvalidIdentifier(_)
                | Self::UnknownColumn { .. }
                | Self::UnsupportedOperator(_)
                | Self::NoDataToInsert
                | Self::NoDataToUpdate
                | Self::UnconditionalMutationForbidden(_)
                | Self::InvalidRange { .. }
                | Self::InvalidPayload(_)
        )
    }

    /// SQLSTATE reported by the server, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Execution { sqlstate, .. } => sqlstate.as_deref(),
            _ => None,
        }
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// Convert a tokio_postgres error, keeping the server message and SQLSTATE verbatim.
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let message = match db_err.detail() {
                Some(detail) => format!("{}: {}", db_err.message(), detail),
                None => db_err.message().to_string(),
            };
            return Self::Execution {
                message,
                sqlstate: Some(db_err.code().code().to_string()),
            };
        }
        if err.is_closed() {
            return Self::Connection(error_chain(&err));
        }
        Self::Execution {
            message: error_chain(&err),
            sqlstate: None,
        }
    }
}

/// `err` followed by each distinct message in its source chain, `: `-separated.
fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

impl From<tokio_postgres::Error> for GateError {
    fn from(err: tokio_postgres::Error) -> Self {
        Self::from_db_error(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for GateError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}
