//! Structural diff model.
//!
//! A [`SchemaDiff`] is produced upstream and read-only for the whole of
//! generation. Change entries are enums, so "Add carries only the new
//! entity, Drop only the old one" holds by construction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ModelError, Result};
use crate::schema::{
    key, same_name, Column, ForeignKey, Index, Procedure, SchemaSnapshot, Sequence, Table, DEFAULT_SCHEMA,
};

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

/// Kind of a change entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    /// Entity is new.
    Add,
    /// Entity is removed.
    Drop,
    /// Entity changes in place.
    Modify,
    /// Column must be dropped and re-created regardless of what changed.
    Rebuild,
}

/// A change to one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ColumnChange {
    /// Add a new column.
    Add {
        /// Column as it will exist.
        new: Column,
    },
    /// Drop an existing column.
    Drop {
        /// Column as it exists.
        old: Column,
    },
    /// Change a column's definition or position.
    Modify {
        /// Column as it exists.
        old: Column,
        /// Column as it will exist.
        new: Column,
    },
    /// Force a drop and re-create of a column.
    Rebuild {
        /// Column as it exists.
        old: Column,
        /// Column as it will exist.
        new: Column,
    },
}

impl ColumnChange {
    /// Returns the kind of change.
    #[must_use]
    pub const fn change_type(&self) -> ChangeType {
        match self {
            Self::Add { .. } => ChangeType::Add,
            Self::Drop { .. } => ChangeType::Drop,
            Self::Modify { .. } => ChangeType::Modify,
            Self::Rebuild { .. } => ChangeType::Rebuild,
        }
    }

    /// The column before the change, if any.
    #[must_use]
    pub const fn old(&self) -> Option<&Column> {
        match self {
            Self::Add { .. } => None,
            Self::Drop { old } | Self::Modify { old, .. } | Self::Rebuild { old, .. } => Some(old),
        }
    }

    /// The column after the change, if any.
    #[must_use]
    pub const fn new(&self) -> Option<&Column> {
        match self {
            Self::Drop { .. } => None,
            Self::Add { new } | Self::Modify { new, .. } | Self::Rebuild { new, .. } => Some(new),
        }
    }

    /// Name of the affected column.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Add { new } => &new.name,
            Self::Drop { old } | Self::Modify { old, .. } | Self::Rebuild { old, .. } => &old.name,
        }
    }

    /// The change that undoes this one.
    #[must_use]
    pub fn inverted(&self) -> Self {
        match self {
            Self::Add { new } => Self::Drop { old: new.clone() },
            Self::Drop { old } => Self::Add { new: old.clone() },
            Self::Modify { old, new } => Self::Modify {
                old: new.clone(),
                new: old.clone(),
            },
            Self::Rebuild { old, new } => Self::Rebuild {
                old: new.clone(),
                new: old.clone(),
            },
        }
    }
}

/// A change to one foreign key component.
///
/// Components sharing a constraint name are grouped before emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum ForeignKeyChange {
    /// Add a new foreign key component.
    Add {
        /// Component as it will exist.
        new: ForeignKey,
    },
    /// Drop an existing foreign key component.
    Drop {
        /// Component as it exists.
        old: ForeignKey,
    },
    /// Replace a foreign key component.
    Modify {
        /// Component as it exists.
        old: ForeignKey,
        /// Component as it will exist.
        new: ForeignKey,
    },
}

impl ForeignKeyChange {
    /// Returns the kind of change.
    #[must_use]
    pub const fn change_type(&self) -> ChangeType {
        match self {
            Self::Add { .. } => ChangeType::Add,
            Self::Drop { .. } => ChangeType::Drop,
            Self::Modify { .. } => ChangeType::Modify,
        }
    }

    /// The component before the change, if any.
    #[must_use]
    pub const fn old(&self) -> Option<&ForeignKey> {
        match self {
            Self::Add { .. } => None,
            Self::Drop { old } | Self::Modify { old, .. } => Some(old),
        }
    }

    /// The component after the change, if any.
    #[must_use]
    pub const fn new(&self) -> Option<&ForeignKey> {
        match self {
            Self::Drop { .. } => None,
            Self::Add { new } | Self::Modify { new, .. } => Some(new),
        }
    }

    /// The change that undoes this one.
    #[must_use]
    pub fn inverted(&self) -> Self {
        match self {
            Self::Add { new } => Self::Drop { old: new.clone() },
            Self::Drop { old } => Self::Add { new: old.clone() },
            Self::Modify { old, new } => Self::Modify {
                old: new.clone(),
                new: old.clone(),
            },
        }
    }
}

/// A change to one index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum IndexChange {
    /// Add a new index.
    Add {
        /// Index as it will exist.
        new: Index,
    },
    /// Drop an existing index.
    Drop {
        /// Index as it exists.
        old: Index,
    },
    /// Replace an index.
    Modify {
        /// Index as it exists.
        old: Index,
        /// Index as it will exist.
        new: Index,
    },
}

impl IndexChange {
    /// Returns the kind of change.
    #[must_use]
    pub const fn change_type(&self) -> ChangeType {
        match self {
            Self::Add { .. } => ChangeType::Add,
            Self::Drop { .. } => ChangeType::Drop,
            Self::Modify { .. } => ChangeType::Modify,
        }
    }

    /// The index before the change, if any.
    #[must_use]
    pub const fn old(&self) -> Option<&Index> {
        match self {
            Self::Add { .. } => None,
            Self::Drop { old } | Self::Modify { old, .. } => Some(old),
        }
    }

    /// The index after the change, if any.
    #[must_use]
    pub const fn new(&self) -> Option<&Index> {
        match self {
            Self::Drop { .. } => None,
            Self::Add { new } | Self::Modify { new, .. } => Some(new),
        }
    }

    /// The change that undoes this one.
    #[must_use]
    pub fn inverted(&self) -> Self {
        match self {
            Self::Add { new } => Self::Drop { old: new.clone() },
            Self::Drop { old } => Self::Add { new: old.clone() },
            Self::Modify { old, new } => Self::Modify {
                old: new.clone(),
                new: old.clone(),
            },
        }
    }
}

/// All changes to one existing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDiff {
    /// Table name.
    pub table_name: String,
    /// Owning schema.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Column changes.
    #[serde(default)]
    pub column_changes: Vec<ColumnChange>,
    /// Foreign key changes (per component).
    #[serde(default)]
    pub foreign_key_changes: Vec<ForeignKeyChange>,
    /// Index changes.
    #[serde(default)]
    pub index_changes: Vec<IndexChange>,
}

impl TableDiff {
    /// Creates an empty diff for a table in the default schema.
    #[must_use]
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            schema: default_schema(),
            column_changes: Vec::new(),
            foreign_key_changes: Vec::new(),
            index_changes: Vec::new(),
        }
    }

    /// Sets the owning schema.
    #[must_use]
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Adds a column change.
    #[must_use]
    pub fn column(mut self, change: ColumnChange) -> Self {
        self.column_changes.push(change);
        self
    }

    /// Adds a foreign key change.
    #[must_use]
    pub fn foreign_key(mut self, change: ForeignKeyChange) -> Self {
        self.foreign_key_changes.push(change);
        self
    }

    /// Adds an index change.
    #[must_use]
    pub fn index(mut self, change: IndexChange) -> Self {
        self.index_changes.push(change);
        self
    }

    /// Lowercase lookup key.
    #[must_use]
    pub fn key(&self) -> String {
        key(&self.table_name)
    }

    /// Whether the diff holds no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.column_changes.is_empty()
            && self.foreign_key_changes.is_empty()
            && self.index_changes.is_empty()
    }

    /// Whether any column entry is an Add, Modify, or Rebuild.
    #[must_use]
    pub fn has_reconstructive_change(&self) -> bool {
        self.column_changes
            .iter()
            .any(|c| c.change_type() != ChangeType::Drop)
    }

    /// Gets the change for a column (case-insensitive).
    #[must_use]
    pub fn column_change(&self, name: &str) -> Option<&ColumnChange> {
        self.column_changes
            .iter()
            .find(|c| same_name(c.name(), name))
    }

    /// The diff that undoes this one.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            table_name: self.table_name.clone(),
            schema: self.schema.clone(),
            column_changes: self.column_changes.iter().map(ColumnChange::inverted).collect(),
            foreign_key_changes: self
                .foreign_key_changes
                .iter()
                .map(ForeignKeyChange::inverted)
                .collect(),
            index_changes: self.index_changes.iter().map(IndexChange::inverted).collect(),
        }
    }
}

/// A sequence whose definition changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceChange {
    /// Definition as it exists.
    pub old: Sequence,
    /// Definition as it will exist.
    pub new: Sequence,
}

/// A procedure whose definition changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureChange {
    /// Definition as it exists.
    pub old: Procedure,
    /// Definition as it will exist.
    pub new: Procedure,
}

/// The complete structural difference between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDiff {
    /// Tables to create.
    pub new_tables: Vec<Table>,
    /// Tables to drop.
    pub dropped_table_names: Vec<String>,
    /// Changes to tables present on both sides.
    pub modified_tables: Vec<TableDiff>,
    /// Sequences to create.
    pub new_sequences: Vec<Sequence>,
    /// Sequences to drop.
    pub dropped_sequence_names: Vec<String>,
    /// Sequences to re-create with a new definition.
    pub modified_sequences: Vec<SequenceChange>,
    /// Procedures to create.
    pub new_procedures: Vec<Procedure>,
    /// Procedures to drop.
    pub dropped_procedure_names: Vec<String>,
    /// Procedures to re-create with a new definition.
    pub modified_procedures: Vec<ProcedureChange>,
}

impl SchemaDiff {
    /// Creates an empty diff.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a table to create.
    #[must_use]
    pub fn new_table(mut self, table: Table) -> Self {
        self.new_tables.push(table);
        self
    }

    /// Adds a table to drop.
    #[must_use]
    pub fn drop_table(mut self, name: impl Into<String>) -> Self {
        self.dropped_table_names.push(name.into());
        self
    }

    /// Adds changes to an existing table.
    #[must_use]
    pub fn modify_table(mut self, diff: TableDiff) -> Self {
        self.modified_tables.push(diff);
        self
    }

    /// Adds a sequence to create.
    #[must_use]
    pub fn new_sequence(mut self, sequence: Sequence) -> Self {
        self.new_sequences.push(sequence);
        self
    }

    /// Adds a sequence to drop.
    #[must_use]
    pub fn drop_sequence(mut self, name: impl Into<String>) -> Self {
        self.dropped_sequence_names.push(name.into());
        self
    }

    /// Adds a sequence to re-create.
    #[must_use]
    pub fn modify_sequence(mut self, old: Sequence, new: Sequence) -> Self {
        self.modified_sequences.push(SequenceChange { old, new });
        self
    }

    /// Adds a procedure to create.
    #[must_use]
    pub fn new_procedure(mut self, procedure: Procedure) -> Self {
        self.new_procedures.push(procedure);
        self
    }

    /// Adds a procedure to drop.
    #[must_use]
    pub fn drop_procedure(mut self, name: impl Into<String>) -> Self {
        self.dropped_procedure_names.push(name.into());
        self
    }

    /// Adds a procedure to re-create.
    #[must_use]
    pub fn modify_procedure(mut self, old: Procedure, new: Procedure) -> Self {
        self.modified_procedures.push(ProcedureChange { old, new });
        self
    }

    /// Whether the diff holds no changes at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.new_tables.is_empty()
            && self.dropped_table_names.is_empty()
            && self.modified_tables.iter().all(TableDiff::is_empty)
            && self.new_sequences.is_empty()
            && self.dropped_sequence_names.is_empty()
            && self.modified_sequences.is_empty()
            && self.new_procedures.is_empty()
            && self.dropped_procedure_names.is_empty()
            && self.modified_procedures.is_empty()
    }

    /// Gets the diff of a modified table (case-insensitive).
    #[must_use]
    pub fn table_diff(&self, name: &str) -> Option<&TableDiff> {
        self.modified_tables
            .iter()
            .find(|t| same_name(&t.table_name, name))
    }

    /// Lowercase names of dropped tables.
    #[must_use]
    pub fn dropped_table_keys(&self) -> BTreeSet<String> {
        self.dropped_table_names.iter().map(|n| key(n)).collect()
    }

    /// Lowercase names of created tables.
    #[must_use]
    pub fn new_table_keys(&self) -> BTreeSet<String> {
        self.new_tables.iter().map(Table::key).collect()
    }

    /// Checks the diff against the snapshots it claims to connect.
    ///
    /// Collects every problem rather than stopping at the first.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::UnknownTable`] or [`ModelError::UnknownColumn`]
    /// for entries the snapshots lack, [`ModelError::Conflict`] for a table
    /// listed twice, and [`ModelError::MismatchedColumnChange`] for a change
    /// pairing two different columns. Several problems come back as
    /// [`ModelError::Multiple`].
    pub fn validate(&self, current: &SchemaSnapshot, target: &SchemaSnapshot) -> Result<()> {
        let mut errors = Vec::new();

        for name in &self.dropped_table_names {
            if current.get_table(name).is_none() {
                errors.push(ModelError::UnknownTable {
                    table: name.clone(),
                    snapshot: "current",
                });
            }
        }

        let dropped = self.dropped_table_keys();
        for table in &self.new_tables {
            if dropped.contains(&table.key()) {
                errors.push(ModelError::Conflict(format!(
                    "table '{}' is both created and dropped",
                    table.name
                )));
            }
        }

        let created = self.new_table_keys();
        for table_diff in &self.modified_tables {
            let table_key = table_diff.key();
            if created.contains(&table_key) || dropped.contains(&table_key) {
                errors.push(ModelError::Conflict(format!(
                    "table '{}' is modified and also created or dropped",
                    table_diff.table_name
                )));
            }
            for (snapshot, label) in [(current, "current"), (target, "target")] {
                if snapshot.get_table(&table_diff.table_name).is_none() {
                    errors.push(ModelError::UnknownTable {
                        table: table_diff.table_name.clone(),
                        snapshot: label,
                    });
                }
            }
            let before = current.get_table(&table_diff.table_name);
            for change in &table_diff.column_changes {
                if let (Some(table), Some(old)) = (before, change.old()) {
                    if table.get_column(&old.name).is_none() {
                        errors.push(ModelError::UnknownColumn {
                            table: table_diff.table_name.clone(),
                            column: old.name.clone(),
                            snapshot: "current",
                        });
                    }
                }
                if let (Some(old), Some(new)) = (change.old(), change.new()) {
                    if !same_name(&old.name, &new.name) {
                        errors.push(ModelError::MismatchedColumnChange {
                            table: table_diff.table_name.clone(),
                            old: old.name.clone(),
                            new: new.name.clone(),
                        });
                    }
                }
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ModelError::Multiple(errors)),
        }
    }

    /// The diff that undoes this one.
    ///
    /// Dropped entities only carry a name, so their full definitions are
    /// looked up in `current`. A name missing from `current` is skipped
    /// with a warning.
    #[must_use]
    pub fn inverted(&self, current: &SchemaSnapshot) -> Self {
        let restored_tables = self
            .dropped_table_names
            .iter()
            .filter_map(|name| {
                let table = current.get_table(name).cloned();
                if table.is_none() {
                    warn!(table = %name, "dropped table missing from current snapshot, not restored");
                }
                table
            })
            .collect();

        let restored_sequences = self
            .dropped_sequence_names
            .iter()
            .filter_map(|name| {
                let sequence = current.get_sequence(name).cloned();
                if sequence.is_none() {
                    warn!(sequence = %name, "dropped sequence missing from current snapshot, not restored");
                }
                sequence
            })
            .collect();

        let restored_procedures = self
            .dropped_procedure_names
            .iter()
            .filter_map(|name| {
                let procedure = current.get_procedure(name).cloned();
                if procedure.is_none() {
                    warn!(procedure = %name, "dropped procedure missing from current snapshot, not restored");
                }
                procedure
            })
            .collect();

        Self {
            new_tables: restored_tables,
            dropped_table_names: self.new_tables.iter().map(|t| t.name.clone()).collect(),
            modified_tables: self.modified_tables.iter().map(TableDiff::inverted).collect(),
            new_sequences: restored_sequences,
            dropped_sequence_names: self.new_sequences.iter().map(|s| s.name.clone()).collect(),
            modified_sequences: self
                .modified_sequences
                .iter()
                .map(|c| SequenceChange {
                    old: c.new.clone(),
                    new: c.old.clone(),
                })
                .collect(),
            new_procedures: restored_procedures,
            dropped_procedure_names: self.new_procedures.iter().map(|p| p.name.clone()).collect(),
            modified_procedures: self
                .modified_procedures
                .iter()
                .map(|c| ProcedureChange {
                    old: c.new.clone(),
                    new: c.old.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .table(
                Table::new("Users")
                    .column(Column::new("Id", "INT").primary_key())
                    .column(Column::new("Name", "NVARCHAR(100)")),
            )
            .table(Table::new("Legacy").column(Column::new("Id", "INT")))
            .procedure(Procedure::new("GetUsers", "CREATE PROCEDURE [dbo].[GetUsers] AS SELECT 1"))
    }

    #[test]
    fn test_column_change_accessors() {
        let change = ColumnChange::Modify {
            old: Column::new("Name", "NVARCHAR(50)"),
            new: Column::new("Name", "NVARCHAR(100)"),
        };
        assert_eq!(change.change_type(), ChangeType::Modify);
        assert_eq!(change.name(), "Name");
        assert_eq!(change.old().unwrap().sql_type, "NVARCHAR(50)");
        assert_eq!(change.new().unwrap().sql_type, "NVARCHAR(100)");
    }

    #[test]
    fn test_column_change_inverted_swaps_sides() {
        let add = ColumnChange::Add {
            new: Column::new("Email", "NVARCHAR(256)"),
        };
        let inverted = add.inverted();
        assert_eq!(inverted.change_type(), ChangeType::Drop);
        assert_eq!(inverted.old().unwrap().name, "Email");
        assert_eq!(inverted.inverted(), add);
    }

    #[test]
    fn test_column_change_deserializes_tagged() {
        let change: ColumnChange = serde_json::from_str(
            r#"{"change": "add", "new": {"name": "Email", "sql_type": "NVARCHAR(256)"}}"#,
        )
        .unwrap();
        assert_eq!(change.change_type(), ChangeType::Add);
        assert!(change.old().is_none());
    }

    #[test]
    fn test_has_reconstructive_change() {
        let drops_only = TableDiff::new("Users").column(ColumnChange::Drop {
            old: Column::new("Name", "INT"),
        });
        assert!(!drops_only.has_reconstructive_change());
        let with_add = drops_only.column(ColumnChange::Add {
            new: Column::new("Email", "INT"),
        });
        assert!(with_add.has_reconstructive_change());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let diff = SchemaDiff::new()
            .drop_table("Missing")
            .modify_table(TableDiff::new("Users").column(ColumnChange::Modify {
                old: Column::new("Name", "INT"),
                new: Column::new("FullName", "INT"),
            }));
        let err = diff.validate(&current(), &current()).unwrap_err();
        match err {
            ModelError::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_modified_table_missing_from_target() {
        let diff = SchemaDiff::new().modify_table(TableDiff::new("Users"));
        let err = diff.validate(&current(), &SchemaSnapshot::new()).unwrap_err();
        assert_eq!(
            err,
            ModelError::UnknownTable {
                table: "Users".to_string(),
                snapshot: "target",
            }
        );
    }

    #[test]
    fn test_validate_rejects_unknown_old_column() {
        let diff = SchemaDiff::new().modify_table(
            TableDiff::new("Users")
                .column(ColumnChange::Rebuild {
                    old: Column::new("Name", "NVARCHAR(100)"),
                    new: Column::computed("Name", "[Id]"),
                })
                .column(ColumnChange::Drop {
                    old: Column::new("Ghost", "INT"),
                }),
        );
        let err = diff.validate(&current(), &current()).unwrap_err();
        assert_eq!(
            err,
            ModelError::UnknownColumn {
                table: "Users".to_string(),
                column: "Ghost".to_string(),
                snapshot: "current",
            }
        );
    }

    #[test]
    fn test_inverted_restores_dropped_entities_from_current() {
        let diff = SchemaDiff::new()
            .drop_table("legacy")
            .new_table(Table::new("Audit").column(Column::new("Id", "INT")))
            .drop_procedure("GetUsers")
            .drop_procedure("Ghost");
        let inverted = diff.inverted(&current());
        assert_eq!(inverted.new_tables.len(), 1);
        assert_eq!(inverted.new_tables[0].name, "Legacy");
        assert_eq!(inverted.dropped_table_names, vec!["Audit".to_string()]);
        assert_eq!(inverted.new_procedures.len(), 1);
        assert!(inverted.dropped_procedure_names.is_empty());
    }

    #[test]
    fn test_is_empty_ignores_empty_table_diffs() {
        assert!(SchemaDiff::new().modify_table(TableDiff::new("Users")).is_empty());
        assert!(!SchemaDiff::new().drop_table("Users").is_empty());
    }
}
