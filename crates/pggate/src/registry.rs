//! Table allow-list.

use crate::error::{GateError, GateResult};
use crate::ident::Ident;
use std::collections::HashSet;

/// Tables of the qualification-tracking application that the proxy serves out of the box.
pub const DEFAULT_TABLES: &[&str] = &[
    "users",
    "contractors",
    "contractor_contacts",
    "projects",
    "project_documents",
    "project_stages",
    "qualification_objects",
    "qualification_protocols",
    "equipment",
    "equipment_verifications",
    "measurement_points",
    "loggers",
    "logger_readings",
    "reports",
    "report_templates",
    "notifications",
];

/// The fixed set of tables the proxy may target. Anything else fails closed.
#[derive(Debug, Clone)]
pub struct TableRegistry {
    tables: HashSet<String>,
}

impl TableRegistry {
    /// Build a registry from an explicit list of table names.
    pub fn new<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tables: tables.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains(table)
    }

    /// Check membership and return the quoted identifier for the table.
    ///
    /// Membership is tested first, so a name that is not allowed is reported as
    /// [`GateError::TableNotAllowed`] even when it would also fail identifier validation.
    pub fn resolve(&self, table: &str) -> GateResult<Ident> {
        if !self.contains(table) {
            return Err(GateError::TableNotAllowed(table.to_string()));
        }
        Ident::parse(table)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Allowed table names, sorted.
    pub fn tables(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tables.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for TableRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TABLES.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_app_tables() {
        let registry = TableRegistry::default();
        assert!(registry.contains("contractors"));
        assert!(registry.contains("users"));
        assert_eq!(registry.len(), DEFAULT_TABLES.len());
    }

    #[test]
    fn resolve_quotes_allowed_table() {
        let registry = TableRegistry::new(["contractors"]);
        assert_eq!(registry.resolve("contractors").unwrap().to_sql(), r#""contractors""#);
    }

    #[test]
    fn resolve_fails_closed() {
        let registry = TableRegistry::new(["contractors"]);
        for table in ["pg_authid", "Contractors", "contractors; --", ""] {
            assert!(matches!(
                registry.resolve(table),
                Err(GateError::TableNotAllowed(_))
            ));
        }
    }

    #[test]
    fn allowed_but_malformed_name_still_rejected() {
        let registry = TableRegistry::new(["bad name"]);
        assert!(matches!(
            registry.resolve("bad name"),
            Err(GateError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn tables_are_sorted() {
        let registry = TableRegistry::new(["b", "a", "c"]);
        assert_eq!(registry.tables(), vec!["a", "b", "c"]);
    }
}
