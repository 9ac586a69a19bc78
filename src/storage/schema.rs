//! Per-type schema inference and registration.

use super::sqlite::{IDENTITY_COLUMN, KEY_LABEL_COLUMN, table_name_for};
use crate::models::Value;
use crate::{Error, Result};
use std::any::TypeId;
use std::collections::{HashMap, HashSet};

/// Column layout of one mirrored type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    type_name: &'static str,
    columns: Vec<&'static str>,
}

impl TableSchema {
    /// Creates a schema from its parts.
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        type_name: &'static str,
        columns: Vec<&'static str>,
    ) -> Self {
        Self {
            table: table.into(),
            type_name,
            columns,
        }
    }

    /// Infers a schema from a value's attribute list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if the list is empty, repeats a name, or uses
    /// one of the reserved `object_id` / `key_label` columns.
    pub fn infer(
        prefix: &str,
        type_name: &'static str,
        attributes: &[(&'static str, Value)],
    ) -> Result<Self> {
        let table = table_name_for(prefix, type_name);
        if attributes.is_empty() {
            return Err(Error::Schema {
                table,
                reason: format!("type {type_name} exposes no attributes to index"),
            });
        }

        let mut seen = HashSet::with_capacity(attributes.len());
        let mut columns = Vec::with_capacity(attributes.len());
        for (name, _) in attributes {
            let lower = name.to_ascii_lowercase();
            if name.is_empty() {
                return Err(Error::Schema {
                    table,
                    reason: "attribute name is empty".to_string(),
                });
            }
            if lower == IDENTITY_COLUMN || lower == KEY_LABEL_COLUMN {
                return Err(Error::Schema {
                    table,
                    reason: format!("attribute '{name}' collides with a reserved column"),
                });
            }
            // SQLite column names are case-insensitive
            if !seen.insert(lower) {
                return Err(Error::Schema {
                    table,
                    reason: format!("attribute '{name}' is declared twice"),
                });
            }
            columns.push(*name);
        }

        Ok(Self {
            table,
            type_name,
            columns,
        })
    }

    /// Backing table name.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Name of the mirrored type.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Attribute columns in declaration order.
    #[must_use]
    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    /// Orders a value's attributes by this schema's columns.
    ///
    /// Columns the value does not expose are NULL; attributes outside the
    /// schema are dropped and returned by name.
    #[must_use]
    pub fn project(&self, attributes: Vec<(&'static str, Value)>) -> (Vec<Value>, Vec<&'static str>) {
        let mut by_name: HashMap<&'static str, Value> = attributes.into_iter().collect();
        let values = self
            .columns
            .iter()
            .map(|column| by_name.remove(column).unwrap_or(Value::Null))
            .collect();
        let mut extra: Vec<&'static str> = by_name.into_keys().collect();
        extra.sort_unstable();
        (values, extra)
    }
}

/// Registry of the schemas known to one engine.
///
/// A type's column set is fixed by its first registration: later values of the
/// same type are never re-inferred.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    by_type: HashMap<TypeId, TableSchema>,
    owners: HashMap<String, TypeId>,
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the schema registered for a type.
    #[must_use]
    pub fn get(&self, type_id: TypeId) -> Option<&TableSchema> {
        self.by_type.get(&type_id)
    }

    /// Returns `true` if some type owns `table`.
    #[must_use]
    pub fn has_table(&self, table: &str) -> bool {
        self.owners.contains_key(table)
    }

    /// Checks that `schema` can be recorded for `type_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if another type already owns the table name.
    pub fn check_available(&self, type_id: TypeId, schema: &TableSchema) -> Result<()> {
        match self.owners.get(schema.table()) {
            Some(owner) if *owner != type_id => {
                let other = self
                    .by_type
                    .get(owner)
                    .map_or("another type", TableSchema::type_name);
                Err(Error::Schema {
                    table: schema.table().to_string(),
                    reason: format!(
                        "table is already bound to {other}, cannot bind {}",
                        schema.type_name()
                    ),
                })
            },
            _ => Ok(()),
        }
    }

    /// Records a schema. First registration wins: a type that is already
    /// registered keeps its existing schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] if another type already owns the table name.
    pub fn record(&mut self, type_id: TypeId, schema: TableSchema) -> Result<&TableSchema> {
        self.check_available(type_id, &schema)?;
        self.owners
            .entry(schema.table().to_string())
            .or_insert(type_id);
        Ok(self.by_type.entry(type_id).or_insert(schema))
    }

    /// Table names of all registered types, sorted.
    #[must_use]
    pub fn tables(&self) -> Vec<String> {
        let mut tables: Vec<String> = self.owners.keys().cloned().collect();
        tables.sort();
        tables
    }

    /// Number of registered types.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}
