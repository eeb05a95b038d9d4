//! Request payload types.
//!
//! A [`QueryPayload`] is the declarative description of one CRUD operation, as sent by the
//! caller in camelCase JSON:
//!
//! ```json
//! {
//!   "table": "contractors",
//!   "action": "select",
//!   "select": "id, name",
//!   "filters": [{ "column": "id", "operator": "in", "value": [1, 2] }],
//!   "order": { "column": "name", "ascending": false },
//!   "range": { "from": 0, "to": 9 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The statement shape a payload asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Select,
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Select => "select",
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }

    /// UPDATE and DELETE must never run without a filter.
    pub fn is_guarded_mutation(&self) -> bool {
        matches!(self, Action::Update | Action::Delete)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `{column, operator, value}` triple.
///
/// `operator` stays a plain string on the wire so that unknown operators surface as
/// [`GateError::UnsupportedOperator`](crate::GateError::UnsupportedOperator) rather than
/// a decode failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub column: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

impl Filter {
    pub fn new(column: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Self {
            column: column.into(),
            operator: operator.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub column: String,
    #[serde(default = "default_ascending")]
    pub ascending: bool,
}

fn default_ascending() -> bool {
    true
}

/// Inclusive row window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub from: i64,
    pub to: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload {
    pub table: String,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<String>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<Order>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default)]
    pub single: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returning_columns: Option<String>,
}

impl QueryPayload {
    /// Start a payload for `action` on `table`; every optional part empty.
    pub fn new(table: impl Into<String>, action: Action) -> Self {
        Self {
            table: table.into(),
            action,
            data: None,
            select: None,
            filters: Vec::new(),
            order: None,
            range: None,
            single: false,
            returning_columns: None,
        }
    }

    pub fn select(table: impl Into<String>) -> Self {
        Self::new(table, Action::Select)
    }

    pub fn insert(table: impl Into<String>, data: Value) -> Self {
        Self::new(table, Action::Insert).with_data(data)
    }

    pub fn update(table: impl Into<String>, data: Value) -> Self {
        Self::new(table, Action::Update).with_data(data)
    }

    pub fn delete(table: impl Into<String>) -> Self {
        Self::new(table, Action::Delete)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn columns(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn filter(mut self, column: &str, operator: &str, value: Value) -> Self {
        self.filters.push(Filter::new(column, operator, value));
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    pub fn range(mut self, from: i64, to: i64) -> Self {
        self.range = Some(Range { from, to });
        self
    }

    pub fn single(mut self) -> Self {
        self.single = true;
        self
    }

    pub fn returning(mut self, cols: impl Into<String>) -> Self {
        self.returning_columns = Some(cols.into());
        self
    }
}
