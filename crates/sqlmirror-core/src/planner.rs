//! Safe column change planning.
//!
//! Identity-ness and computed-ness cannot be altered in place, so such
//! changes become DROP+ADD. A table must never be observed with zero
//! data (non-computed) columns, which the planner prevents by ordering
//! steps and, as a last resort, by rebuilding a column under a temporary
//! name.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::diff::{ColumnChange, SchemaDiff};
use crate::schema::{key, normalize_type, Column, Table};

/// How a Modify entry must be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnAction {
    /// Nothing on disk changes (for example only the position moved).
    Unchanged,
    /// A single ALTER COLUMN suffices.
    AlterInPlace,
    /// The column must be dropped and added again.
    DropAndAdd,
}

/// Decides how to turn `old` into `new`.
#[must_use]
pub fn classify(old: &Column, new: &Column) -> ColumnAction {
    if old.is_identity != new.is_identity || old.is_computed != new.is_computed {
        return ColumnAction::DropAndAdd;
    }
    if old.is_computed {
        return if old.computed_expression == new.computed_expression {
            ColumnAction::Unchanged
        } else {
            ColumnAction::DropAndAdd
        };
    }
    if normalize_type(&old.sql_type) != normalize_type(&new.sql_type) || old.nullable != new.nullable {
        return ColumnAction::AlterInPlace;
    }
    ColumnAction::Unchanged
}

/// Whether a change alters the column's on-disk representation, forcing
/// anything that depends on it (keys, indexes) to be dropped first.
#[must_use]
pub fn changes_representation(change: &ColumnChange) -> bool {
    match change {
        ColumnChange::Add { .. } => false,
        ColumnChange::Drop { .. } | ColumnChange::Rebuild { .. } => true,
        ColumnChange::Modify { old, new } => classify(old, new) != ColumnAction::Unchanged,
    }
}

/// Columns whose representation changes, per table (lowercase names).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnImpact {
    tables: BTreeMap<String, BTreeSet<String>>,
}

impl ColumnImpact {
    /// Evaluates [`changes_representation`] once per column of every modified table.
    #[must_use]
    pub fn from_diff(diff: &SchemaDiff) -> Self {
        let mut tables: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for table_diff in &diff.modified_tables {
            let changed: BTreeSet<String> = table_diff
                .column_changes
                .iter()
                .filter(|c| changes_representation(c))
                .map(|c| key(c.name()))
                .collect();
            if !changed.is_empty() {
                tables.entry(table_diff.key()).or_default().extend(changed);
            }
        }
        Self { tables }
    }

    /// Whether `table.column` changes representation.
    #[must_use]
    pub fn contains(&self, table: &str, column: &str) -> bool {
        self.tables
            .get(&key(table))
            .is_some_and(|cols| cols.contains(&key(column)))
    }

    /// Whether any column of `table` changes representation.
    #[must_use]
    pub fn touches(&self, table: &str) -> bool {
        self.tables.contains_key(&key(table))
    }

    /// Tables with at least one changed column.
    pub fn tables(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }
}

/// One emitted column operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnStep {
    /// ADD the column.
    Add(Column),
    /// DROP the column.
    Drop(Column),
    /// ALTER COLUMN in place.
    Alter {
        /// Definition before.
        old: Column,
        /// Definition after.
        new: Column,
    },
    /// DROP then ADD.
    Rebuild {
        /// Definition before.
        old: Column,
        /// Definition after.
        new: Column,
    },
    /// ADD under a temporary name, DROP the old column, rename.
    SafeRebuild {
        /// Definition before.
        old: Column,
        /// Definition after.
        new: Column,
    },
}

impl ColumnStep {
    /// The existing column this step touches, if any.
    #[must_use]
    pub const fn old(&self) -> Option<&Column> {
        match self {
            Self::Add(_) => None,
            Self::Drop(old)
            | Self::Alter { old, .. }
            | Self::Rebuild { old, .. }
            | Self::SafeRebuild { old, .. } => Some(old),
        }
    }
}

/// Ordered column operations for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnPlan {
    /// Steps in emission order.
    pub steps: Vec<ColumnStep>,
    /// Whether the last-column guard reordered the steps.
    pub guarded: bool,
}

/// Plans the column changes of one table, starting from `before`.
#[must_use]
pub fn plan_table(before: &Table, changes: &[ColumnChange]) -> ColumnPlan {
    let mut drops = Vec::new();
    let mut alters = Vec::new();
    // (new ordinal, step) so appends land in the final column order.
    let mut appends: Vec<(usize, ColumnStep)> = Vec::new();

    for change in changes {
        match change {
            ColumnChange::Add { new } => appends.push((new.ordinal_position, ColumnStep::Add(new.clone()))),
            ColumnChange::Drop { old } => drops.push(ColumnStep::Drop(old.clone())),
            ColumnChange::Rebuild { old, new } => appends.push((
                new.ordinal_position,
                ColumnStep::Rebuild {
                    old: old.clone(),
                    new: new.clone(),
                },
            )),
            ColumnChange::Modify { old, new } => match classify(old, new) {
                ColumnAction::Unchanged => {}
                ColumnAction::AlterInPlace => alters.push(ColumnStep::Alter {
                    old: old.clone(),
                    new: new.clone(),
                }),
                ColumnAction::DropAndAdd => appends.push((
                    new.ordinal_position,
                    ColumnStep::Rebuild {
                        old: old.clone(),
                        new: new.clone(),
                    },
                )),
            },
        }
    }
    appends.sort_by_key(|(ordinal, _)| *ordinal);

    let dropped_data = drops
        .iter()
        .filter(|s| s.old().is_some_and(Column::is_data_column))
        .count();
    let remaining = before.data_column_count().saturating_sub(dropped_data);
    let has_data_rebuild = appends
        .iter()
        .any(|(_, s)| matches!(s, ColumnStep::Rebuild { old, .. } if old.is_data_column()));
    let guarded = remaining == 0 || (has_data_rebuild && remaining <= 2);

    if !guarded {
        let steps = drops
            .into_iter()
            .chain(alters)
            .chain(appends.into_iter().map(|(_, s)| s))
            .collect();
        return ColumnPlan { steps, guarded };
    }

    debug!(table = %before.name, remaining, "last-column guard active, drops deferred");
    let mut live = before.data_column_count();
    let mut steps = alters;
    for (_, step) in appends {
        match step {
            ColumnStep::Rebuild { old, new } if old.is_data_column() && live <= 1 => {
                debug!(table = %before.name, column = %old.name, "rebuilding through a temporary column");
                if !new.is_data_column() {
                    live = live.saturating_sub(1);
                }
                steps.push(ColumnStep::SafeRebuild { old, new });
            }
            ColumnStep::Rebuild { old, new } => {
                live = (live + usize::from(new.is_data_column())).saturating_sub(usize::from(old.is_data_column()));
                steps.push(ColumnStep::Rebuild { old, new });
            }
            ColumnStep::Add(new) => {
                live += usize::from(new.is_data_column());
                steps.push(ColumnStep::Add(new));
            }
            other => steps.push(other),
        }
    }
    for step in drops {
        if step.old().is_some_and(Column::is_data_column) {
            live = live.saturating_sub(1);
            if live == 0 {
                warn!(table = %before.name, "column changes leave the table without data columns");
            }
        }
        steps.push(step);
    }
    ColumnPlan { steps, guarded }
}

/// Simulates the physical column order after `steps` (lowercase names).
///
/// DROP removes a column, ADD appends one, and a rebuild moves the
/// column to the end. ALTER leaves it in place.
#[must_use]
pub fn simulate_order(before_order: &[String], steps: &[ColumnStep]) -> Vec<String> {
    let mut order: Vec<String> = before_order.iter().map(|c| key(c)).collect();
    for step in steps {
        match step {
            ColumnStep::Add(new) => order.push(new.key()),
            ColumnStep::Drop(old) => order.retain(|c| *c != old.key()),
            ColumnStep::Rebuild { old, new } | ColumnStep::SafeRebuild { old, new } => {
                order.retain(|c| *c != old.key());
                order.push(new.key());
            }
            ColumnStep::Alter { .. } => {}
        }
    }
    order
}
