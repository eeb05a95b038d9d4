//! Statement assembly: one compile function per [`Action`].
//!
//! Every function validates the whole payload against the table's [`TableColumns`] before
//! returning, so a [`Statement`] only exists when it is safe to send. Parameters share a
//! single [`ParamList`], which numbers placeholders `$1, $2, ...` in the order the clauses
//! are emitted.

use crate::error::{GateError, GateResult};
use crate::filter::push_where;
use crate::ident::Ident;
use crate::param::ParamList;
use crate::payload::{Action, QueryPayload, Range};
use crate::schema::TableColumns;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// A fully validated, parameterized statement.
#[derive(Debug, Clone)]
pub struct Statement {
    pub action: Action,
    pub sql: String,
    pub params: ParamList,
    /// Whether the statement produces rows (SELECT, or a mutation with RETURNING).
    pub returns_rows: bool,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &ParamList {
        &self.params
    }
}

/// Compile `payload` against the columns of `table`.
pub fn compile(payload: &QueryPayload, table: &Ident, columns: &TableColumns) -> GateResult<Statement> {
    match payload.action {
        Action::Select => compile_select(payload, table, columns),
        Action::Insert => compile_insert(payload, table, columns),
        Action::Update => compile_update(payload, table, columns),
        Action::Delete => compile_delete(payload, table, columns),
    }
}

/// Resolve a comma-separated column list, or pass `*` through. A blank list means `*`.
pub fn column_list(list: &str, columns: &TableColumns) -> GateResult<String> {
    let list = list.trim();
    if list.is_empty() || list == "*" {
        return Ok("*".to_string());
    }
    let mut out = Vec::new();
    for name in list.split(',') {
        out.push(columns.resolve(name.trim())?.to_sql());
    }
    Ok(out.join(", "))
}

/// LIMIT/OFFSET for an inclusive `{from, to}` window.
///
/// Returns `(limit, offset)`; `offset` is `None` when the window starts at row 0.
pub fn range_window(range: &Range) -> GateResult<(i64, Option<i64>)> {
    if range.from < 0 || range.to < range.from {
        return Err(GateError::InvalidRange {
            from: range.from,
            to: range.to,
        });
    }
    let limit = range
        .to
        .checked_sub(range.from)
        .and_then(|d| d.checked_add(1))
        .ok_or(GateError::InvalidRange {
            from: range.from,
            to: range.to,
        })?;
    let offset = (range.from > 0).then_some(range.from);
    Ok((limit, offset))
}

fn push_returning(sql: &mut String, payload: &QueryPayload, columns: &TableColumns) -> GateResult<bool> {
    match payload.returning_columns.as_deref() {
        Some(list) if !list.trim().is_empty() => {
            sql.push_str(" RETURNING ");
            sql.push_str(&column_list(list, columns)?);
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn require_filters(payload: &QueryPayload) -> GateResult<()> {
    if payload.filters.is_empty() {
        return Err(GateError::UnconditionalMutationForbidden(payload.action));
    }
    Ok(())
}

pub fn compile_select(
    payload: &QueryPayload,
    table: &Ident,
    columns: &TableColumns,
) -> GateResult<Statement> {
    let projection = column_list(payload.select.as_deref().unwrap_or("*"), columns)?;
    let mut params = ParamList::new();
    let mut sql = format!("SELECT {projection} FROM {table}");

    push_where(&mut sql, &payload.filters, columns, &mut params)?;

    if let Some(order) = &payload.order {
        let col = columns.resolve(&order.column)?;
        let dir = if order.ascending { "ASC" } else { "DESC" };
        sql.push_str(&format!(" ORDER BY {col} {dir}"));
    }

    if let Some(range) = &payload.range {
        let (limit, offset) = range_window(range)?;
        sql.push_str(" LIMIT ");
        sql.push_str(&params.placeholder(Value::from(limit)));
        if let Some(offset) = offset {
            sql.push_str(" OFFSET ");
            sql.push_str(&params.placeholder(Value::from(offset)));
        }
    }

    Ok(Statement {
        action: Action::Select,
        sql,
        params,
        returns_rows: true,
    })
}

/// Normalize insert data to a non-empty list of row objects.
fn insert_rows(data: Option<&Value>) -> GateResult<Vec<&Map<String, Value>>> {
    let rows = match data {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(row)) => vec![row],
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_object().ok_or_else(|| {
                    GateError::invalid_payload(format!("insert row {i} is not an object"))
                })
            })
            .collect::<GateResult<Vec<_>>>()?,
        Some(_) => {
            return Err(GateError::invalid_payload(
                "insert data must be an object or an array of objects",
            ));
        }
    };
    if rows.is_empty() {
        return Err(GateError::NoDataToInsert);
    }
    Ok(rows)
}

pub fn compile_insert(
    payload: &QueryPayload,
    table: &Ident,
    columns: &TableColumns,
) -> GateResult<Statement> {
    let rows = insert_rows(payload.data.as_ref())?;

    // Union of keys across the batch, validated and put in catalog order.
    let mut keys = BTreeSet::new();
    for row in &rows {
        for key in row.keys() {
            columns.resolve(key)?;
            keys.insert(key.as_str());
        }
    }
    if keys.is_empty() {
        return Err(GateError::NoDataToInsert);
    }
    let mut insert_cols: Vec<&str> = keys.into_iter().collect();
    insert_cols.sort_by_key(|c| columns.position(c));

    let col_sql = insert_cols
        .iter()
        .map(|c| Ident::parse(c).map(|i| i.to_sql()))
        .collect::<GateResult<Vec<_>>>()?
        .join(", ");

    let mut params = ParamList::new();
    let mut tuples = Vec::with_capacity(rows.len());
    for row in &rows {
        let cells: Vec<String> = insert_cols
            .iter()
            .map(|c| {
                let value = row.get(*c).cloned().unwrap_or(Value::Null);
                params.placeholder_as(value, columns.text_cast(c))
            })
            .collect();
        tuples.push(format!("({})", cells.join(", ")));
    }

    let mut sql = format!(
        "INSERT INTO {table} ({col_sql}) VALUES {}",
        tuples.join(", ")
    );
    let returns_rows = push_returning(&mut sql, payload, columns)?;

    Ok(Statement {
        action: Action::Insert,
        sql,
        params,
        returns_rows,
    })
}

pub fn compile_update(
    payload: &QueryPayload,
    table: &Ident,
    columns: &TableColumns,
) -> GateResult<Statement> {
    require_filters(payload)?;

    let data = match payload.data.as_ref() {
        None | Some(Value::Null) => return Err(GateError::NoDataToUpdate),
        Some(Value::Object(data)) => data,
        Some(_) => return Err(GateError::invalid_payload("update data must be an object")),
    };
    if data.is_empty() {
        return Err(GateError::NoDataToUpdate);
    }

    let mut params = ParamList::new();
    let mut assignments = Vec::with_capacity(data.len());
    for (key, value) in data {
        let col = columns.resolve(key)?;
        let ph = params.placeholder_as(value.clone(), columns.text_cast(key));
        assignments.push(format!("{col} = {ph}"));
    }

    let mut sql = format!("UPDATE {table} SET {}", assignments.join(", "));
    push_where(&mut sql, &payload.filters, columns, &mut params)?;
    let returns_rows = push_returning(&mut sql, payload, columns)?;

    Ok(Statement {
        action: Action::Update,
        sql,
        params,
        returns_rows,
    })
}

pub fn compile_delete(
    payload: &QueryPayload,
    table: &Ident,
    columns: &TableColumns,
) -> GateResult<Statement> {
    require_filters(payload)?;

    let mut params = ParamList::new();
    let mut sql = format!("DELETE FROM {table}");
    push_where(&mut sql, &payload.filters, columns, &mut params)?;
    let returns_rows = push_returning(&mut sql, payload, columns)?;

    Ok(Statement {
        action: Action::Delete,
        sql,
        params,
        returns_rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnInfo;
    use serde_json::json;

    fn contractors() -> (Ident, TableColumns) {
        (
            Ident::parse("contractors").unwrap(),
            TableColumns::from_names("contractors", ["id", "name", "address", "role"]),
        )
    }

    fn build(payload: &QueryPayload) -> GateResult<Statement> {
        let (table, cols) = contractors();
        compile(payload, &table, &cols)
    }

    fn values(stmt: &Statement) -> Vec<Value> {
        stmt.params.values().cloned().collect()
    }

    #[test]
    fn select_defaults_to_star() {
        let stmt = build(&QueryPayload::select("contractors")).unwrap();
        assert_eq!(stmt.sql, r#"SELECT * FROM "contractors""#);
        assert!(stmt.params.is_empty());
        assert!(stmt.returns_rows);
    }

    #[test]
    fn blank_select_is_star() {
        for select in ["", "   "] {
            let stmt = build(&QueryPayload::select("contractors").columns(select)).unwrap();
            assert_eq!(stmt.sql, r#"SELECT * FROM "contractors""#, "{select:?}");
        }
        // A blank entry inside a list is still an error.
        assert!(matches!(
            build(&QueryPayload::select("contractors").columns("id,")),
            Err(GateError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn select_with_projection_filter_order_range() {
        let payload = QueryPayload::select("contractors")
            .columns("id, name")
            .filter("role", "eq", json!("admin"))
            .order_by("name", false)
            .range(10, 19);
        let stmt = build(&payload).unwrap();

        assert_eq!(
            stmt.sql,
            r#"SELECT "id", "name" FROM "contractors" WHERE "role" = $1 ORDER BY "name" DESC LIMIT $2 OFFSET $3"#
        );
        assert_eq!(values(&stmt), vec![json!("admin"), json!(10), json!(10)]);
    }

    #[test]
    fn range_from_zero_omits_offset() {
        let payload = QueryPayload::select("contractors")
            .order_by("name", true)
            .range(0, 4);
        let stmt = build(&payload).unwrap();
        assert_eq!(
            stmt.sql,
            r#"SELECT * FROM "contractors" ORDER BY "name" ASC LIMIT $1"#
        );
        assert_eq!(values(&stmt), vec![json!(5)]);
    }

    #[test]
    fn inverted_or_negative_range_is_rejected() {
        for (from, to) in [(5, 4), (-1, 3)] {
            let payload = QueryPayload::select("contractors").range(from, to);
            assert!(matches!(build(&payload), Err(GateError::InvalidRange { .. })));
        }
        let single_row = range_window(&Range { from: 3, to: 3 }).unwrap();
        assert_eq!(single_row, (1, Some(3)));
    }

    #[test]
    fn select_validates_every_column_reference() {
        let bad_projection = QueryPayload::select("contractors").columns("id, password");
        assert!(matches!(build(&bad_projection), Err(GateError::UnknownColumn { .. })));

        let bad_order = QueryPayload::select("contractors").order_by("name; drop", true);
        assert!(matches!(build(&bad_order), Err(GateError::InvalidIdentifier(_))));

        let empty_item = QueryPayload::select("contractors").columns("id,,name");
        assert!(matches!(build(&empty_item), Err(GateError::InvalidIdentifier(_))));
    }

    #[test]
    fn select_with_empty_in_matches_nothing() {
        let payload = QueryPayload::select("contractors").filter("id", "in", json!([]));
        let stmt = build(&payload).unwrap();
        assert_eq!(stmt.sql, r#"SELECT * FROM "contractors" WHERE FALSE"#);
        assert!(stmt.params.is_empty());
    }

    #[test]
    fn insert_single_row() {
        let payload = QueryPayload::insert("contractors", json!({ "name": "A" }));
        let stmt = build(&payload).unwrap();
        assert_eq!(stmt.sql, r#"INSERT INTO "contractors" ("name") VALUES ($1)"#);
        assert_eq!(values(&stmt), vec![json!("A")]);
        assert!(!stmt.returns_rows);
    }

    #[test]
    fn insert_heterogeneous_batch_fills_nulls() {
        let payload = QueryPayload::insert(
            "contractors",
            json!([{ "name": "A" }, { "address": "X", "name": "B" }]),
        )
        .returning("*");
        let stmt = build(&payload).unwrap();

        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "contractors" ("name", "address") VALUES ($1, $2), ($3, $4) RETURNING *"#
        );
        assert_eq!(
            values(&stmt),
            vec![json!("A"), Value::Null, json!("B"), json!("X")]
        );
        assert!(stmt.returns_rows);
    }

    #[test]
    fn insert_columns_follow_catalog_order() {
        let payload = QueryPayload::insert(
            "contractors",
            json!({ "role": "r", "address": "a", "id": 1 }),
        );
        let stmt = build(&payload).unwrap();
        assert!(stmt.sql.starts_with(r#"INSERT INTO "contractors" ("id", "address", "role")"#));
    }

    #[test]
    fn insert_without_rows_fails() {
        for data in [json!([]), json!({}), json!([{}, {}]), Value::Null] {
            let payload = QueryPayload::insert("contractors", data);
            assert!(matches!(build(&payload), Err(GateError::NoDataToInsert)));
        }
        let missing = QueryPayload::new("contractors", Action::Insert);
        assert!(matches!(build(&missing), Err(GateError::NoDataToInsert)));
    }

    #[test]
    fn insert_rejects_bad_rows_and_keys() {
        let scalar_row = QueryPayload::insert("contractors", json!([{ "name": "A" }, 5]));
        assert!(matches!(build(&scalar_row), Err(GateError::InvalidPayload(_))));

        let unknown = QueryPayload::insert("contractors", json!([{ "name": "A" }, { "vat": 1 }]));
        assert!(matches!(build(&unknown), Err(GateError::UnknownColumn { .. })));
    }

    #[test]
    fn update_numbers_set_before_where() {
        let payload = QueryPayload::update("contractors", json!({ "name": "B", "address": "Y" }))
            .filter("id", "eq", json!(7))
            .returning("id, name");
        let stmt = build(&payload).unwrap();

        assert_eq!(
            stmt.sql,
            r#"UPDATE "contractors" SET "address" = $1, "name" = $2 WHERE "id" = $3 RETURNING "id", "name""#
        );
        assert_eq!(values(&stmt), vec![json!("Y"), json!("B"), json!(7)]);
    }

    #[test]
    fn typed_columns_cast_from_text_in_values_and_set() {
        let table = Ident::parse("devices").unwrap();
        let cols = TableColumns::new(
            "devices",
            vec![
                ColumnInfo::new("id", "bigint", 1),
                ColumnInfo::new("addr", "inet", 2),
                ColumnInfo::new("uptime", "interval", 3),
            ],
        );

        let insert = QueryPayload::insert(
            "devices",
            json!([{ "addr": "10.0.0.1", "uptime": "1 day" }, { "addr": "10.0.0.2" }]),
        );
        let stmt = compile(&insert, &table, &cols).unwrap();
        assert_eq!(
            stmt.sql,
            r#"INSERT INTO "devices" ("addr", "uptime") VALUES ($1, $2::text::interval), ($3, $4::text::interval)"#
        );

        let update = QueryPayload::update("devices", json!({ "uptime": "2 hours" }))
            .filter("uptime", "lte", json!("1 hour"));
        let stmt = compile(&update, &table, &cols).unwrap();
        assert_eq!(
            stmt.sql,
            r#"UPDATE "devices" SET "uptime" = $1::text::interval WHERE "uptime" <= $2::text::interval"#
        );
    }

    #[test]
    fn update_requires_filters_before_data() {
        let payload = QueryPayload::update("contractors", json!({}));
        assert!(matches!(
            build(&payload),
            Err(GateError::UnconditionalMutationForbidden(Action::Update))
        ));
    }

    #[test]
    fn update_requires_data() {
        let empty = QueryPayload::update("contractors", json!({})).filter("id", "eq", json!(1));
        assert!(matches!(build(&empty), Err(GateError::NoDataToUpdate)));

        let missing = QueryPayload::new("contractors", Action::Update).filter("id", "eq", json!(1));
        assert!(matches!(build(&missing), Err(GateError::NoDataToUpdate)));

        let array = QueryPayload::update("contractors", json!([{ "name": "x" }]))
            .filter("id", "eq", json!(1));
        assert!(matches!(build(&array), Err(GateError::InvalidPayload(_))));
    }

    #[test]
    fn delete_requires_filters() {
        let err = build(&QueryPayload::delete("contractors")).unwrap_err();
        assert_eq!(err.to_string(), "Unconditional delete forbidden");
    }

    #[test]
    fn delete_with_filters_and_returning() {
        let payload = QueryPayload::delete("contractors")
            .filter("id", "in", json!([1, 2]))
            .returning("id");
        let stmt = build(&payload).unwrap();
        assert_eq!(
            stmt.sql,
            r#"DELETE FROM "contractors" WHERE "id" = ANY($1) RETURNING "id""#
        );
        assert!(stmt.returns_rows);
    }

    #[test]
    fn blank_returning_is_ignored() {
        let payload = QueryPayload::delete("contractors")
            .filter("id", "eq", json!(1))
            .returning("  ");
        let stmt = build(&payload).unwrap();
        assert_eq!(stmt.sql, r#"DELETE FROM "contractors" WHERE "id" = $1"#);
        assert!(!stmt.returns_rows);
    }
}
