//! Single-entity DDL renderers.
//!
//! A dialect turns one fully specified table, column, key, index,
//! sequence, or procedure into statement text. Ordering is decided by
//! the phase generators; a dialect never looks at a diff.

mod sqlserver;

pub use sqlserver::SqlServerDialect;

use crate::resolver::ForeignKeyGroup;
use crate::schema::{Column, Index, Procedure, Sequence, Table};

/// Output of a column reorder: the rebuild itself, then every statement
/// needed to bring back the indexes and foreign keys the rebuild removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnReorder {
    /// Create staging table, copy rows, drop, rename, primary key.
    pub sql: String,
    /// Index and foreign key re-creation, in emission order.
    pub recreate: Vec<String>,
}

/// Trait for engine-specific statement rendering.
pub trait ScriptDialect: Send + Sync {
    /// Returns the dialect name.
    fn name(&self) -> &'static str;

    /// Quotes an identifier.
    fn quote_identifier(&self, name: &str) -> String;

    /// Quotes a schema-qualified name.
    fn qualified(&self, schema: &str, name: &str) -> String {
        format!("{}.{}", self.quote_identifier(schema), self.quote_identifier(name))
    }

    /// Script preamble: abort-on-error directive and provenance comment.
    fn script_header(&self, provenance: &str) -> String;

    /// Column definition as used in CREATE TABLE and ADD.
    fn column_definition(&self, column: &Column) -> String;

    /// CREATE TABLE with columns in ordinal order and the primary key inline.
    fn create_table(&self, table: &Table) -> String;

    /// DROP TABLE.
    fn drop_table(&self, schema: &str, name: &str) -> String {
        format!("DROP TABLE {};", self.qualified(schema, name))
    }

    /// ADD a column.
    fn add_column(&self, schema: &str, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ADD {};",
            self.qualified(schema, table),
            self.column_definition(column)
        )
    }

    /// DROP a column.
    fn drop_column(&self, schema: &str, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {};",
            self.qualified(schema, table),
            self.quote_identifier(column)
        )
    }

    /// ALTER a column's type or nullability in place.
    fn alter_column(&self, schema: &str, table: &str, column: &Column) -> String;

    /// Rebuild a column without ever leaving the table without it:
    /// add under a temporary name, drop the old column, rename.
    fn safe_column_rebuild(&self, schema: &str, table: &str, old: &Column, new: &Column, suffix: &str) -> String;

    /// ADD a (possibly composite) foreign key. With `force_nocheck` the
    /// constraint is created without validating existing rows.
    fn add_foreign_key(&self, group: &ForeignKeyGroup, force_nocheck: bool) -> String;

    /// DROP a foreign key if it exists.
    fn drop_foreign_key(&self, schema: &str, table: &str, name: &str) -> String;

    /// ADD the table's primary key.
    fn add_primary_key(&self, table: &Table) -> String;

    /// DROP the table's primary key, whatever its name. `suffix` keeps
    /// batch-local names unique.
    fn drop_primary_key(&self, schema: &str, table: &str, suffix: &str) -> String;

    /// CREATE INDEX.
    fn create_index(&self, schema: &str, table: &str, index: &Index) -> String;

    /// DROP INDEX if it exists.
    fn drop_index(&self, schema: &str, table: &str, name: &str) -> String;

    /// CREATE SEQUENCE.
    fn create_sequence(&self, sequence: &Sequence) -> String;

    /// DROP SEQUENCE.
    fn drop_sequence(&self, schema: &str, name: &str) -> String {
        format!("DROP SEQUENCE {};", self.qualified(schema, name))
    }

    /// CREATE PROCEDURE.
    fn create_procedure(&self, procedure: &Procedure) -> String;

    /// DROP PROCEDURE.
    fn drop_procedure(&self, schema: &str, name: &str) -> String {
        format!("DROP PROCEDURE {};", self.qualified(schema, name))
    }

    /// Rebuilds `actual` so its columns follow `desired`'s order.
    ///
    /// `referencing` lists constraints owned by other tables that point
    /// at this one; the caller drops them beforehand.
    fn column_reorder(&self, actual: &Table, desired: &Table, referencing: &[ForeignKeyGroup]) -> ColumnReorder;
}
