//! JSON values as positional parameters.
//!
//! Payload values arrive as untyped JSON, but PostgreSQL infers a concrete type for every
//! `$n` placeholder from its context (`"qty" = $1` makes `$1` an `integer`). [`JsonParam`]
//! defers the encoding decision to bind time: `to_sql` receives the inferred [`Type`] and
//! converts the JSON value into that type's binary representation, so one generic code path
//! can bind values for any column of any table.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use base64::Engine;
use std::error::Error;
use std::net::IpAddr;
use std::str::FromStr;
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn Error + Sync + Send>;

/// A JSON value bound as a single statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonParam(pub Value);

impl JsonParam {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    fn mismatch(&self, ty: &Type) -> BoxError {
        format!("cannot bind {} to a parameter of type {}", self.0, ty).into()
    }

    fn as_bool(&self, ty: &Type) -> Result<bool, BoxError> {
        match &self.0 {
            Value::Bool(b) => Ok(*b),
            Value::String(s) => match s.as_str() {
                "true" | "t" => Ok(true),
                "false" | "f" => Ok(false),
                _ => Err(self.mismatch(ty)),
            },
            _ => Err(self.mismatch(ty)),
        }
    }

    fn as_i64(&self, ty: &Type) -> Result<i64, BoxError> {
        match &self.0 {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| f as i64)
                })
                .ok_or_else(|| self.mismatch(ty)),
            Value::String(s) => s.trim().parse::<i64>().map_err(|_| self.mismatch(ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn as_f64(&self, ty: &Type) -> Result<f64, BoxError> {
        match &self.0 {
            Value::Number(n) => n.as_f64().ok_or_else(|| self.mismatch(ty)),
            Value::String(s) => s.trim().parse::<f64>().map_err(|_| self.mismatch(ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn as_decimal(&self, ty: &Type) -> Result<Decimal, BoxError> {
        let text = match &self.0 {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => return Err(self.mismatch(ty)),
        };
        Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|_| self.mismatch(ty))
    }

    fn as_str(&self, ty: &Type) -> Result<&str, BoxError> {
        match &self.0 {
            Value::String(s) => Ok(s),
            _ => Err(self.mismatch(ty)),
        }
    }

    /// Text rendering for text-like columns: strings verbatim, anything else as JSON text.
    fn to_text(&self) -> String {
        match &self.0 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// `inet`/`cidr` binary form: family, prefix bits, cidr flag, address length, address.
    fn inet_to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        let text = self.as_str(ty)?.trim();
        let (addr, bits) = match text.split_once('/') {
            Some((addr, bits)) => (addr, Some(bits.parse::<u8>().map_err(|_| self.mismatch(ty))?)),
            None => (text, None),
        };
        let addr: IpAddr = addr.parse().map_err(|_| self.mismatch(ty))?;
        let (family, octets) = match addr {
            IpAddr::V4(a) => (2u8, a.octets().to_vec()),
            IpAddr::V6(a) => (3u8, a.octets().to_vec()),
        };
        let max_bits = (octets.len() * 8) as u8;
        let bits = bits.unwrap_or(max_bits);
        if bits > max_bits {
            return Err(self.mismatch(ty));
        }
        out.put_u8(family);
        out.put_u8(bits);
        out.put_u8(u8::from(*ty == Type::CIDR));
        out.put_u8(octets.len() as u8);
        out.put_slice(&octets);
        Ok(IsNull::No)
    }

    /// `\x`-prefixed hex, else standard base64; an array of byte values also works.
    fn as_bytes(&self, ty: &Type) -> Result<Vec<u8>, BoxError> {
        match &self.0 {
            Value::String(s) => match s.strip_prefix("\\x") {
                Some(hex) => hex::decode(hex).map_err(|_| self.mismatch(ty)),
                None => base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map_err(|_| self.mismatch(ty)),
            },
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_u64().and_then(|b| u8::try_from(b).ok()))
                .collect::<Option<Vec<u8>>>()
                .ok_or_else(|| self.mismatch(ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn as_array(&self, ty: &Type) -> Result<Vec<JsonParam>, BoxError> {
        match &self.0 {
            Value::Array(items) => Ok(items.iter().cloned().map(JsonParam).collect()),
            _ => Err(self.mismatch(ty)),
        }
    }
}

impl From<Value> for JsonParam {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

/// Whether [`JsonParam`] encodes values of a catalog type (as rendered by `format_type`)
/// directly. Other types are bound as text and cast server-side.
pub(crate) fn binds_natively(data_type: &str) -> bool {
    let base = data_type.trim().trim_end_matches("[]");
    // Drop a type modifier: `numeric(10,2)`, `timestamp(3) with time zone`.
    let base = match (base.find('('), base.find(')')) {
        (Some(open), Some(close)) if open < close => {
            format!("{}{}", &base[..open], &base[close + 1..])
        }
        _ => base.to_string(),
    };
    matches!(
        base.trim(),
        "boolean"
            | "smallint"
            | "integer"
            | "bigint"
            | "oid"
            | "real"
            | "double precision"
            | "numeric"
            | "text"
            | "character varying"
            | "character"
            | "name"
            | "json"
            | "jsonb"
            | "uuid"
            | "date"
            | "time without time zone"
            | "timestamp without time zone"
            | "timestamp with time zone"
            | "inet"
            | "cidr"
            | "bytea"
    )
}

fn parse_timestamptz(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f%#z", "%Y-%m-%dT%H:%M:%S%.f%#z"] {
        if let Ok(dt) = DateTime::parse_from_str(s, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    // No offset given: read as UTC.
    parse_timestamp(s).map(|naive| naive.and_utc())
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt);
        }
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(s).map(|dt| dt.date()))
}

fn parse_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

impl ToSql for JsonParam {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.0.is_null() {
            return Ok(IsNull::Yes);
        }

        match *ty {
            Type::BOOL => self.as_bool(ty)?.to_sql(ty, out),
            Type::INT2 => i16::try_from(self.as_i64(ty)?)
                .map_err(|_| self.mismatch(ty))?
                .to_sql(ty, out),
            Type::INT4 => i32::try_from(self.as_i64(ty)?)
                .map_err(|_| self.mismatch(ty))?
                .to_sql(ty, out),
            Type::INT8 => self.as_i64(ty)?.to_sql(ty, out),
            Type::OID => u32::try_from(self.as_i64(ty)?)
                .map_err(|_| self.mismatch(ty))?
                .to_sql(ty, out),
            Type::FLOAT4 => (self.as_f64(ty)? as f32).to_sql(ty, out),
            Type::FLOAT8 => self.as_f64(ty)?.to_sql(ty, out),
            Type::NUMERIC => self.as_decimal(ty)?.to_sql(ty, out),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
                self.to_text().as_str().to_sql(ty, out)
            }
            Type::JSON | Type::JSONB => self.0.to_sql(ty, out),
            Type::INET | Type::CIDR => self.inet_to_sql(ty, out),
            Type::BYTEA => {
                out.put_slice(&self.as_bytes(ty)?);
                Ok(IsNull::No)
            }
            Type::UUID => uuid::Uuid::parse_str(self.as_str(ty)?)
                .map_err(|_| self.mismatch(ty))?
                .to_sql(ty, out),
            Type::DATE => parse_date(self.as_str(ty)?)
                .ok_or_else(|| self.mismatch(ty))?
                .to_sql(ty, out),
            Type::TIME => parse_time(self.as_str(ty)?)
                .ok_or_else(|| self.mismatch(ty))?
                .to_sql(ty, out),
            Type::TIMESTAMP => parse_timestamp(self.as_str(ty)?)
                .ok_or_else(|| self.mismatch(ty))?
                .to_sql(ty, out),
            Type::TIMESTAMPTZ => parse_timestamptz(self.as_str(ty)?)
                .ok_or_else(|| self.mismatch(ty))?
                .to_sql(ty, out),
            _ => match ty.kind() {
                Kind::Array(_) => self.as_array(ty)?.to_sql(ty, out),
                Kind::Domain(base) => self.to_sql(base, out),
                // Enum labels and text-like extension types (citext) share the text wire format.
                Kind::Enum(_) => {
                    out.put_slice(self.as_str(ty)?.as_bytes());
                    Ok(IsNull::No)
                }
                Kind::Simple if ty.name() == "citext" => {
                    out.put_slice(self.to_text().as_bytes());
                    Ok(IsNull::No)
                }
                _ => Err(format!("unsupported parameter type: {ty}").into()),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Type compatibility is decided per value in `to_sql`.
        true
    }

    to_sql_checked!();
}

/// Positional parameters for one statement, numbered from `$1` in push order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamList {
    params: Vec<JsonParam>,
}

impl ParamList {
    /// Create a new empty parameter list.
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter and return its 1-based index.
    pub fn push(&mut self, value: Value) -> usize {
        self.params.push(JsonParam(value));
        self.params.len()
    }

    /// Add a parameter and return its `$n` placeholder.
    pub fn placeholder(&mut self, value: Value) -> String {
        format!("${}", self.push(value))
    }

    /// Like [`placeholder`](Self::placeholder), binding the value as text and casting it to
    /// `cast` when given. Array types are bound as `text[]`.
    pub fn placeholder_as(&mut self, value: Value, cast: Option<&str>) -> String {
        let n = self.push(value);
        match cast {
            None => format!("${n}"),
            Some(ty) if ty.ends_with("[]") => format!("${n}::text[]::{ty}"),
            Some(ty) => format!("${n}::text::{ty}"),
        }
    }

    /// Get the current parameter count.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Bound values, in placeholder order.
    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.params.iter().map(JsonParam::value)
    }

    /// Get all parameters as references for tokio-postgres.
    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params
            .iter()
            .map(|p| p as &(dyn ToSql + Sync))
            .collect()
    }
}
