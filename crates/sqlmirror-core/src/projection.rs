//! Snapshot projection.
//!
//! Replays the structural part of a [`SchemaDiff`] on a base snapshot
//! and returns the resulting snapshot. The base is never touched.
//!
//! Foreign key membership of modified tables is driven by the diff's
//! foreign key entries alone: a modified column keeps the base column's
//! keys, and an added column starts with none. New tables bring their
//! own keys.

use tracing::{debug, warn};

use crate::diff::{ColumnChange, SchemaDiff, TableDiff};
use crate::schema::{key, same_name, Column, ForeignKey, Index, SchemaSnapshot, Table};

/// Builds the snapshot that results from applying `diff` to `base`.
#[must_use]
pub fn project_schema_after_diff(base: &SchemaSnapshot, diff: &SchemaDiff) -> SchemaSnapshot {
    let dropped = diff.dropped_table_keys();
    let mut projected = SchemaSnapshot::new();

    for table in base.tables() {
        if dropped.contains(&table.key()) {
            continue;
        }
        let table = diff
            .table_diff(&table.name)
            .map_or_else(|| table.clone(), |table_diff| apply_table_diff(table, table_diff));
        projected = projected.table(table);
    }
    for table in &diff.new_tables {
        projected = projected.table(table.clone());
    }

    let dropped_sequences: Vec<String> = diff.dropped_sequence_names.iter().map(|n| key(n)).collect();
    for sequence in base.sequences() {
        if dropped_sequences.contains(&key(&sequence.name)) {
            continue;
        }
        let sequence = diff
            .modified_sequences
            .iter()
            .find(|c| same_name(&c.old.name, &sequence.name))
            .map_or_else(|| sequence.clone(), |c| c.new.clone());
        projected = projected.sequence(sequence);
    }
    for sequence in &diff.new_sequences {
        projected = projected.sequence(sequence.clone());
    }

    let dropped_procedures: Vec<String> =
        diff.dropped_procedure_names.iter().map(|n| key(n)).collect();
    for procedure in base.procedures() {
        if dropped_procedures.contains(&key(&procedure.name)) {
            continue;
        }
        let procedure = diff
            .modified_procedures
            .iter()
            .find(|c| same_name(&c.old.name, &procedure.name))
            .map_or_else(|| procedure.clone(), |c| c.new.clone());
        projected = projected.procedure(procedure);
    }
    for procedure in &diff.new_procedures {
        projected = projected.procedure(procedure.clone());
    }

    projected
}

/// Applies one table's changes, returning a new table.
#[must_use]
pub fn apply_table_diff(base: &Table, diff: &TableDiff) -> Table {
    // (ordinal, is_added, column)
    let mut columns: Vec<(usize, bool, Column)> = base
        .ordered_columns()
        .into_iter()
        .map(|c| (c.ordinal_position, false, c.clone()))
        .collect();

    for change in &diff.column_changes {
        match change {
            ColumnChange::Add { new } => {
                if columns.iter().any(|(_, _, c)| same_name(&c.name, &new.name)) {
                    warn!(table = %base.name, column = %new.name, "added column already exists, ignored");
                    continue;
                }
                let mut column = new.clone();
                column.foreign_keys.clear();
                columns.push((new.ordinal_position, true, column));
            }
            ColumnChange::Drop { old } => {
                columns.retain(|(_, _, c)| !same_name(&c.name, &old.name));
            }
            ColumnChange::Modify { old, new } | ColumnChange::Rebuild { old, new } => {
                let Some(slot) = columns
                    .iter_mut()
                    .find(|(_, _, c)| same_name(&c.name, &old.name))
                else {
                    warn!(table = %base.name, column = %old.name, "modified column not found, ignored");
                    continue;
                };
                let mut column = new.clone();
                column.foreign_keys = std::mem::take(&mut slot.2.foreign_keys);
                *slot = (new.ordinal_position, slot.1, column);
            }
        }
    }

    columns.sort_by(|a, b| {
        a.0.cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| key(&a.2.name).cmp(&key(&b.2.name)))
    });

    for change in &diff.foreign_key_changes {
        if let Some(old) = change.old() {
            remove_foreign_key(&mut columns, old);
        }
        if let Some(new) = change.new() {
            let owner = if new.column.is_empty() {
                None
            } else {
                columns
                    .iter_mut()
                    .find(|(_, _, c)| same_name(&c.name, &new.column))
            };
            match owner {
                Some(slot) => slot.2.foreign_keys.push(new.clone()),
                None => {
                    warn!(table = %base.name, constraint = %new.name, column = %new.column,
                        "foreign key owner column not found, ignored");
                }
            }
        }
        debug!(table = %base.name, change = ?change.change_type(), "projected foreign key change");
    }

    let mut indexes: Vec<Index> = base.indexes.clone();
    for change in &diff.index_changes {
        if let Some(old) = change.old() {
            indexes.retain(|i| !same_name(&i.name, &old.name));
        }
        if let Some(new) = change.new() {
            indexes.push(new.clone());
        }
    }

    let mut table = Table::new(base.name.clone()).in_schema(base.schema.clone());
    for (_, _, column) in columns {
        table = table.column(column);
    }
    table.indexes = indexes;
    table.primary_key_name.clone_from(&base.primary_key_name);
    table
}

fn remove_foreign_key(columns: &mut [(usize, bool, Column)], old: &ForeignKey) {
    for (_, _, column) in columns.iter_mut() {
        if !old.column.is_empty() && !same_name(&column.name, &old.column) {
            continue;
        }
        column
            .foreign_keys
            .retain(|fk| !same_name(&fk.name, &old.name));
    }
}
