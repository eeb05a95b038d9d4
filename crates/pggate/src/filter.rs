//! Filter compilation: `{column, operator, value}` triples to a parameterized WHERE body.

use crate::error::{GateError, GateResult};
use crate::param::ParamList;
use crate::payload::Filter;
use crate::schema::TableColumns;
use serde_json::Value;
use std::str::FromStr;

/// Supported filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `column = $n`
    Eq,
    /// `column = ANY($n)`, value is a JSON array bound as one array parameter
    In,
    /// `column >= $n`
    Gte,
    /// `column <= $n`
    Lte,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::In => "in",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
        }
    }
}

impl FromStr for FilterOp {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eq" => Ok(FilterOp::Eq),
            "in" => Ok(FilterOp::In),
            "gte" => Ok(FilterOp::Gte),
            "lte" => Ok(FilterOp::Lte),
            other => Err(GateError::UnsupportedOperator(other.to_string())),
        }
    }
}

/// Compile one filter, pushing its value (if any) onto `params`.
pub fn compile_filter(
    filter: &Filter,
    columns: &TableColumns,
    params: &mut ParamList,
) -> GateResult<String> {
    let column = columns.resolve(&filter.column)?;
    let op: FilterOp = filter.operator.parse()?;
    let cast = columns.text_cast(&filter.column);

    let sql = match op {
        FilterOp::Eq | FilterOp::Gte | FilterOp::Lte => {
            let cmp = match op {
                FilterOp::Eq => "=",
                FilterOp::Gte => ">=",
                _ => "<=",
            };
            let ph = params.placeholder_as(filter.value.clone(), cast);
            format!("{column} {cmp} {ph}")
        }
        FilterOp::In => match &filter.value {
            // Matches nothing without producing `IN ()`.
            Value::Array(items) if items.is_empty() => "FALSE".to_string(),
            Value::Array(_) => {
                let array_cast = cast.map(|ty| format!("{ty}[]"));
                let ph = params.placeholder_as(filter.value.clone(), array_cast.as_deref());
                format!("{column} = ANY({ph})")
            }
            _ => {
                return Err(GateError::invalid_payload(format!(
                    "'in' filter on '{}' requires an array value",
                    filter.column
                )));
            }
        },
    };
    Ok(sql)
}

/// Compile filters in list order, joined with `AND`.
///
/// Returns an empty string for an empty list; the caller omits WHERE entirely.
pub fn compile_filters(
    filters: &[Filter],
    columns: &TableColumns,
    params: &mut ParamList,
) -> GateResult<String> {
    let mut parts = Vec::with_capacity(filters.len());
    for filter in filters {
        parts.push(compile_filter(filter, columns, params)?);
    }
    Ok(parts.join(" AND "))
}

/// Append ` WHERE <filters>` to `sql` when there is at least one filter.
pub(crate) fn push_where(
    sql: &mut String,
    filters: &[Filter],
    columns: &TableColumns,
    params: &mut ParamList,
) -> GateResult<()> {
    let body = compile_filters(filters, columns, params)?;
    if !body.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&body);
    }
    Ok(())
}
