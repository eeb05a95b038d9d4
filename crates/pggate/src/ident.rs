//! Safe SQL identifier handling.
//!
//! [`Ident`] is a table or column name that has passed the syntactic firewall: only
//! `[A-Za-z0-9_]+` is accepted, and the name is always rendered double-quoted. This check
//! runs before, and independently of, any schema lookup.
//!
//! # Example
//! ```ignore
//! use pggate::Ident;
//!
//! let t = Ident::parse("contractors")?;
//! assert_eq!(t.to_sql(), r#""contractors""#);
//! assert!(Ident::parse("users; drop table users").is_err());
//! # Ok::<(), pggate::GateError>(())
//! ```

use crate::error::{GateError, GateResult};
use std::fmt;

/// A validated, quotable SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident(String);

impl Ident {
    /// Validate a bare identifier.
    pub fn parse(s: &str) -> GateResult<Self> {
        if s.is_empty() || !s.chars().all(|c| c == '_' || c.is_ascii_alphanumeric()) {
            return Err(GateError::InvalidIdentifier(s.to_string()));
        }
        Ok(Self(s.to_string()))
    }

    /// The bare name, without quotes.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Render the identifier as quoted SQL.
    pub fn to_sql(&self) -> String {
        // No escaping needed: the character set excludes '"'.
        format!("\"{}\"", self.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0)
    }
}

/// Quote a bare identifier, rejecting anything outside `[A-Za-z0-9_]`.
pub fn quote_ident(s: &str) -> GateResult<String> {
    Ident::parse(s).map(|i| i.to_sql())
}
