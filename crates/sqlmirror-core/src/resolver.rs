//! Foreign key grouping and restoration.
//!
//! Snapshots store foreign keys per column; the engine creates and drops
//! them per constraint. The functions here fold column components into
//! [`ForeignKeyGroup`]s and decide which groups a change set blocks and
//! which of the blocked ones must come back afterwards.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::context::{ConstraintKey, GenerationContext};
use crate::planner::ColumnImpact;
use crate::schema::{key, same_name, ForeignKey, ForeignKeyAction, SchemaSnapshot};

/// One foreign key constraint, possibly spanning several columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyGroup {
    /// Constraint name.
    pub name: String,
    /// Owning schema.
    pub schema: String,
    /// Owning table.
    pub table: String,
    /// Referenced schema.
    pub ref_schema: String,
    /// Referenced table.
    pub ref_table: String,
    /// Owning columns, in key order.
    pub columns: Vec<String>,
    /// Referenced columns, paired with `columns`.
    pub ref_columns: Vec<String>,
    /// ON DELETE action.
    pub delete_action: ForeignKeyAction,
    /// ON UPDATE action.
    pub update_action: ForeignKeyAction,
    /// Whether the constraint is disabled.
    pub not_enforced: bool,
    /// Whether the constraint is NOT FOR REPLICATION.
    pub not_for_replication: bool,
}

impl ForeignKeyGroup {
    /// Ledger key of this constraint.
    #[must_use]
    pub fn key(&self) -> ConstraintKey {
        ConstraintKey::foreign_key(&self.schema, &self.table, &self.name)
    }

    /// Whether this constraint references `table`.
    #[must_use]
    pub fn references(&self, table: &str) -> bool {
        same_name(&self.ref_table, table)
    }

    fn sort_key(&self) -> (String, String) {
        (key(&self.table), key(&self.name))
    }
}

/// Folds the components of one constraint into a group.
///
/// Components are taken in the order given; the first one supplies the
/// constraint-level attributes. Returns `None` for an empty slice.
#[must_use]
pub fn compute_foreign_key_group(components: &[&ForeignKey]) -> Option<ForeignKeyGroup> {
    let first = components.first()?;
    Some(ForeignKeyGroup {
        name: first.name.clone(),
        schema: first.schema.clone(),
        table: first.table.clone(),
        ref_schema: first.ref_schema.clone(),
        ref_table: first.ref_table.clone(),
        columns: components.iter().map(|c| c.column.clone()).collect(),
        ref_columns: components.iter().map(|c| c.ref_column.clone()).collect(),
        delete_action: first.delete_action,
        update_action: first.update_action,
        not_enforced: first.not_enforced,
        not_for_replication: first.not_for_replication,
    })
}

/// Groups components by (table, constraint name), ordered by table then name.
#[must_use]
pub fn group_foreign_keys<'a>(components: impl IntoIterator<Item = &'a ForeignKey>) -> Vec<ForeignKeyGroup> {
    let mut buckets: BTreeMap<(String, String), Vec<&ForeignKey>> = BTreeMap::new();
    for fk in components {
        let bucket = buckets.entry((key(&fk.table), key(&fk.name))).or_default();
        if !bucket.iter().any(|c| same_name(&c.column, &fk.column)) {
            bucket.push(fk);
        }
    }
    buckets
        .values()
        .filter_map(|components| compute_foreign_key_group(components))
        .collect()
}

/// Finds the constraint `name` owned by `table`.
#[must_use]
pub fn find_group(snapshot: &SchemaSnapshot, table: &str, name: &str) -> Option<ForeignKeyGroup> {
    let owner = snapshot.get_table(table)?;
    let components: Vec<&ForeignKey> = owner
        .foreign_keys()
        .filter(|fk| same_name(&fk.name, name))
        .collect();
    compute_foreign_key_group(&components)
}

/// Checks that both ends of `group` exist in `snapshot`.
///
/// Invalid groups are logged and must be skipped by the caller.
#[must_use]
pub fn validate_group(group: &ForeignKeyGroup, snapshot: &SchemaSnapshot) -> bool {
    let Some(owner) = snapshot.get_table(&group.table) else {
        warn!(constraint = %group.name, table = %group.table, "foreign key owner table missing, skipped");
        return false;
    };
    let Some(referenced) = snapshot.get_table(&group.ref_table) else {
        warn!(constraint = %group.name, table = %group.ref_table, "referenced table missing, skipped");
        return false;
    };
    if let Some(column) = group.columns.iter().find(|c| owner.get_column(c).is_none()) {
        warn!(constraint = %group.name, column = %column, "foreign key column missing, skipped");
        return false;
    }
    if let Some(column) = group.ref_columns.iter().find(|c| referenced.get_column(c).is_none()) {
        warn!(constraint = %group.name, column = %column, "referenced column missing, skipped");
        return false;
    }
    true
}

/// Tables whose structure the script is about to change.
#[derive(Debug, Clone, Copy)]
pub struct BlockingScope<'a> {
    /// Columns changing representation.
    pub impact: &'a ColumnImpact,
    /// Tables whose primary key will be dropped (lowercase).
    pub pk_dropped: &'a BTreeSet<String>,
    /// Tables that will be dropped (lowercase).
    pub dropped_tables: &'a BTreeSet<String>,
}

/// Every constraint in `before` that would block the upcoming changes.
///
/// A constraint blocks when it references a dropped table, when one of
/// its own columns or referenced columns changes representation, or when
/// it references a primary key column of a table whose key is dropped.
/// Constraints owned by dropped tables are left to the table drop.
#[must_use]
pub fn blocking_foreign_keys(before: &SchemaSnapshot, scope: BlockingScope<'_>) -> Vec<ForeignKeyGroup> {
    group_foreign_keys(before.foreign_keys())
        .into_iter()
        .filter(|group| {
            if scope.dropped_tables.contains(&key(&group.table)) {
                return false;
            }
            let blocked = scope.dropped_tables.contains(&key(&group.ref_table))
                || group.columns.iter().any(|c| scope.impact.contains(&group.table, c))
                || group
                    .ref_columns
                    .iter()
                    .any(|c| scope.impact.contains(&group.ref_table, c))
                || references_primary_key(group, before, scope.pk_dropped);
            if blocked {
                debug!(constraint = %group.name, table = %group.table, "foreign key blocks structural change");
            }
            blocked
        })
        .collect()
}

/// Constraints among `tables` themselves (owner and target both listed).
#[must_use]
pub fn foreign_keys_among(snapshot: &SchemaSnapshot, tables: &BTreeSet<String>) -> Vec<ForeignKeyGroup> {
    group_foreign_keys(snapshot.foreign_keys())
        .into_iter()
        .filter(|g| tables.contains(&key(&g.table)) && tables.contains(&key(&g.ref_table)))
        .collect()
}

/// Constraints owned by other tables that reference `table`.
#[must_use]
pub fn referencing_foreign_keys(snapshot: &SchemaSnapshot, table: &str) -> Vec<ForeignKeyGroup> {
    group_foreign_keys(snapshot.foreign_keys_referencing(table))
        .into_iter()
        .filter(|g| !same_name(&g.table, table))
        .collect()
}

fn references_primary_key(group: &ForeignKeyGroup, snapshot: &SchemaSnapshot, flagged: &BTreeSet<String>) -> bool {
    if !flagged.contains(&key(&group.ref_table)) {
        return false;
    }
    snapshot.get_table(&group.ref_table).is_some_and(|referenced| {
        let pk = referenced.primary_key_set();
        group.ref_columns.iter().any(|c| pk.contains(&key(c)))
    })
}

/// Constraints the script dropped as a side effect and can now restore.
///
/// For every flagged table (primary key regained, or a column changed
/// representation), collects the constraints in `snapshot` that reference
/// one of its primary key columns or changed columns and that the ledger
/// shows as dropped. Ordered by (table, constraint name).
#[must_use]
pub fn compute_restoration_closure(
    flagged: &BTreeSet<String>,
    impact: &ColumnImpact,
    snapshot: &SchemaSnapshot,
    ctx: &GenerationContext,
) -> Vec<ForeignKeyGroup> {
    let mut closure: Vec<ForeignKeyGroup> = group_foreign_keys(snapshot.foreign_keys())
        .into_iter()
        .filter(|group| flagged.contains(&key(&group.ref_table)))
        .filter(|group| {
            references_primary_key(group, snapshot, flagged)
                || group
                    .ref_columns
                    .iter()
                    .any(|c| impact.contains(&group.ref_table, c))
        })
        .filter(|group| ctx.is_dropped(&group.key()))
        .filter(|group| validate_group(group, snapshot))
        .collect();
    closure.sort_by_key(ForeignKeyGroup::sort_key);
    closure
}

/// Merges group lists, keeping the first occurrence of each constraint,
/// ordered by (table, constraint name).
#[must_use]
pub fn merge_groups(lists: impl IntoIterator<Item = Vec<ForeignKeyGroup>>) -> Vec<ForeignKeyGroup> {
    let mut merged: BTreeMap<(String, String), ForeignKeyGroup> = BTreeMap::new();
    for group in lists.into_iter().flatten() {
        merged.entry(group.sort_key()).or_insert(group);
    }
    merged.into_values().collect()
}
