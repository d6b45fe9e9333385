//! Phase generators.
//!
//! Each phase is a plain function from the shared [`PhaseInput`] and the
//! script's [`GenerationContext`] to a SQL fragment. The up and down
//! sequences are tables of [`PhaseSpec`]s; the down sequence runs over
//! the inverted diff, with the target snapshot as its starting point.
//!
//! Everything that several phases need to agree on (which columns change
//! representation, which primary keys go away, the column plans) is
//! computed once in [`Analysis`].

pub mod down;
pub mod up;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use crate::context::{ConstraintKey, ConstraintKind, GenerationContext};
use crate::diff::SchemaDiff;
use crate::dialect::ScriptDialect;
use crate::naming::deterministic_suffix;
use crate::planner::{plan_table, ColumnImpact, ColumnPlan, ColumnStep};
use crate::projection::project_schema_after_diff;
use crate::resolver::{
    blocking_foreign_keys, compute_restoration_closure, find_group, foreign_keys_among,
    group_foreign_keys, merge_groups, validate_group, BlockingScope, ForeignKeyGroup,
};
use crate::schema::{same_name, Index, SchemaSnapshot, Table};

/// Which script is being generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Current to target.
    Up,
    /// Target back to current.
    Down,
}

impl Direction {
    /// Short tag mixed into deterministic suffixes.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Facts derived once from the diff and both snapshots.
#[derive(Debug, Clone)]
pub struct Analysis {
    /// Columns whose representation changes.
    pub impact: ColumnImpact,
    /// Column plans per modified table (lowercase name).
    pub plans: BTreeMap<String, ColumnPlan>,
    /// Tables whose primary key is dropped before the column phase.
    pub pk_dropped: BTreeSet<String>,
    /// Tables that (re)gain a primary key after the column phase.
    pub pk_added: BTreeSet<String>,
    /// Tables the script drops.
    pub dropped_tables: BTreeSet<String>,
    /// Tables the script creates.
    pub created_tables: BTreeSet<String>,
    /// `before` with the diff applied.
    pub projected: SchemaSnapshot,
}

impl Analysis {
    /// Derives the shared facts for one script.
    #[must_use]
    pub fn new(diff: &SchemaDiff, before: &SchemaSnapshot, after: &SchemaSnapshot) -> Self {
        let impact = ColumnImpact::from_diff(diff);
        let projected = project_schema_after_diff(before, diff);
        let dropped_tables = diff.dropped_table_keys();
        let created_tables = diff.new_table_keys();

        let mut plans = BTreeMap::new();
        let mut pk_dropped = BTreeSet::new();
        let mut pk_added = BTreeSet::new();

        for table_diff in &diff.modified_tables {
            let Some(start) = before.get_table(&table_diff.table_name) else {
                warn!(table = %table_diff.table_name, "modified table missing from starting snapshot, skipped");
                continue;
            };
            plans.insert(table_diff.key(), plan_table(start, &table_diff.column_changes));

            let Some(end) = after
                .get_table(&table_diff.table_name)
                .or_else(|| projected.get_table(&table_diff.table_name))
            else {
                continue;
            };
            let end_pk = end.primary_key_set();

            if start.has_primary_key() {
                let set_changed = start.primary_key_set() != end_pk;
                let column_changed = start
                    .primary_key_set()
                    .iter()
                    .any(|c| impact.contains(&start.name, c));
                let renamed = !same_name(&start.primary_key_constraint_name(), &end.primary_key_constraint_name());
                if set_changed || column_changed || renamed {
                    debug!(table = %start.name, set_changed, column_changed, renamed, "primary key must be dropped");
                    pk_dropped.insert(table_diff.key());
                }
            }
            if !end_pk.is_empty() && (!start.has_primary_key() || pk_dropped.contains(&table_diff.key())) {
                pk_added.insert(table_diff.key());
            }
        }

        Self {
            impact,
            plans,
            pk_dropped,
            pk_added,
            dropped_tables,
            created_tables,
            projected,
        }
    }
}

/// Read-only input shared by every phase of one script.
pub struct PhaseInput<'a> {
    /// The diff in this script's direction.
    pub diff: &'a SchemaDiff,
    /// Snapshot the script starts from.
    pub before: &'a SchemaSnapshot,
    /// Snapshot the script must produce.
    pub after: &'a SchemaSnapshot,
    /// Statement renderer.
    pub dialect: &'a dyn ScriptDialect,
    /// Direction being generated.
    pub direction: Direction,
    /// Derived facts.
    pub analysis: Analysis,
}

impl<'a> PhaseInput<'a> {
    /// Builds the input and its analysis.
    #[must_use]
    pub fn new(
        diff: &'a SchemaDiff,
        before: &'a SchemaSnapshot,
        after: &'a SchemaSnapshot,
        dialect: &'a dyn ScriptDialect,
        direction: Direction,
    ) -> Self {
        Self {
            diff,
            before,
            after,
            dialect,
            direction,
            analysis: Analysis::new(diff, before, after),
        }
    }

    fn suffix(&self, schema: &str, table: &str, constraint: &str, phase: &str) -> String {
        deterministic_suffix(schema, table, constraint, &format!("{}-{}", self.direction.tag(), phase))
    }

    /// The table as it must look at the end, falling back to the projection.
    fn end_table(&self, name: &str) -> Option<&Table> {
        self.after
            .get_table(name)
            .or_else(|| self.analysis.projected.get_table(name))
    }
}

/// One ordered phase of a script.
#[derive(Clone, Copy)]
pub struct PhaseSpec {
    /// Position in the script.
    pub number: u8,
    /// Section title.
    pub title: &'static str,
    /// Generator.
    pub run: fn(&PhaseInput<'_>, &mut GenerationContext) -> String,
}

impl std::fmt::Debug for PhaseSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseSpec")
            .field("number", &self.number)
            .field("title", &self.title)
            .finish_non_exhaustive()
    }
}

/// Joins statements into one fragment.
fn join(statements: Vec<String>) -> String {
    statements
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn drop_foreign_key_groups(
    input: &PhaseInput<'_>,
    ctx: &mut GenerationContext,
    groups: &[ForeignKeyGroup],
) -> Vec<String> {
    groups
        .iter()
        .filter(|g| ctx.record_drop(g.key()))
        .map(|g| {
            debug!(constraint = %g.name, table = %g.table, "drop foreign key");
            input.dialect.drop_foreign_key(&g.schema, &g.table, &g.name)
        })
        .collect()
}

/// Creates foreign keys WITH NOCHECK, then replaces each enforced one by
/// a WITH CHECK version so the engine marks it trusted.
fn create_foreign_key_groups(
    input: &PhaseInput<'_>,
    ctx: &mut GenerationContext,
    groups: Vec<ForeignKeyGroup>,
) -> Vec<String> {
    let groups: Vec<ForeignKeyGroup> = groups
        .into_iter()
        .filter(|g| validate_group(g, input.after))
        .filter(|g| ctx.record_create(g.key()))
        .collect();

    let mut statements: Vec<String> = groups
        .iter()
        .map(|g| input.dialect.add_foreign_key(g, true))
        .collect();
    for group in groups.iter().filter(|g| !g.not_enforced) {
        statements.push(input.dialect.drop_foreign_key(&group.schema, &group.table, &group.name));
        statements.push(input.dialect.add_foreign_key(group, false));
    }
    statements
}

/// Foreign keys named by explicit Drop/Modify entries, as they exist in `before`.
fn explicit_foreign_key_drops(input: &PhaseInput<'_>) -> Vec<ForeignKeyGroup> {
    let mut groups = Vec::new();
    for table_diff in &input.diff.modified_tables {
        for old in table_diff.foreign_key_changes.iter().filter_map(|c| c.old()) {
            match find_group(input.before, &table_diff.table_name, &old.name) {
                Some(group) => groups.push(group),
                None => warn!(constraint = %old.name, table = %table_diff.table_name,
                    "dropped foreign key not found in starting snapshot, skipped"),
            }
        }
    }
    merge_groups([groups])
}

/// Foreign keys named by explicit Add/Modify entries plus those of created tables.
fn direct_foreign_keys(input: &PhaseInput<'_>) -> Vec<ForeignKeyGroup> {
    let mut groups = Vec::new();
    for table_diff in &input.diff.modified_tables {
        for new in table_diff.foreign_key_changes.iter().filter_map(|c| c.new()) {
            match find_group(input.after, &table_diff.table_name, &new.name) {
                Some(group) => groups.push(group),
                None => warn!(constraint = %new.name, table = %table_diff.table_name,
                    "added foreign key not found in final snapshot, skipped"),
            }
        }
    }
    for table in &input.diff.new_tables {
        groups.extend(group_foreign_keys(table.foreign_keys()));
    }
    merge_groups([groups])
}

/// Explicit drops plus every constraint blocking a structural change.
fn blocking_drops(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> Vec<String> {
    let analysis = &input.analysis;
    let blocking = blocking_foreign_keys(
        input.before,
        BlockingScope {
            impact: &analysis.impact,
            pk_dropped: &analysis.pk_dropped,
            dropped_tables: &analysis.dropped_tables,
        },
    );
    let groups = merge_groups([explicit_foreign_key_drops(input), blocking]);
    drop_foreign_key_groups(input, ctx, &groups)
}

fn drop_primary_key(input: &PhaseInput<'_>, ctx: &mut GenerationContext, table: &Table, phase: &str) -> Option<String> {
    if !table.has_primary_key() || !ctx.record_drop(ConstraintKey::primary_key(&table.schema, &table.name)) {
        return None;
    }
    let suffix = input.suffix(&table.schema, &table.name, &table.primary_key_constraint_name(), phase);
    debug!(table = %table.name, suffix = %suffix, "drop primary key");
    Some(input.dialect.drop_primary_key(&table.schema, &table.name, &suffix))
}

fn drop_primary_keys(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> Vec<String> {
    input
        .analysis
        .pk_dropped
        .iter()
        .filter_map(|name| input.before.get_table(name))
        .filter_map(|table| drop_primary_key(input, ctx, table, "pk"))
        .collect()
}

/// Adds primary keys of tables that regain one, then any other primary
/// key the script dropped that still exists at the end.
fn add_primary_keys(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> Vec<String> {
    let mut names: BTreeSet<String> = input.analysis.pk_added.clone();
    names.extend(
        ctx.dropped_keys(ConstraintKind::PrimaryKey)
            .into_iter()
            .map(|k| k.table),
    );
    let mut statements = Vec::new();
    for name in names {
        let Some(table) = input.end_table(&name) else {
            continue;
        };
        if !table.has_primary_key() {
            continue;
        }
        if ctx.record_create(ConstraintKey::primary_key(&table.schema, &table.name)) {
            debug!(table = %table.name, "add primary key");
            statements.push(input.dialect.add_primary_key(table));
        }
    }
    statements
}

/// Indexes dropped by explicit entries or because they cover a changing column.
fn index_drops(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> Vec<String> {
    let mut statements = Vec::new();
    for table_diff in &input.diff.modified_tables {
        let Some(table) = input.before.get_table(&table_diff.table_name) else {
            continue;
        };
        let mut names: Vec<String> = table_diff
            .index_changes
            .iter()
            .filter_map(|c| c.old())
            .map(|i| i.name.clone())
            .collect();
        names.extend(
            table
                .indexes
                .iter()
                .filter(|i| i.columns.iter().any(|c| input.analysis.impact.contains(&table.name, c)))
                .map(|i| i.name.clone()),
        );
        for name in names {
            if ctx.record_drop(ConstraintKey::index(&table.schema, &table.name, &name)) {
                debug!(index = %name, table = %table.name, "drop index");
                statements.push(input.dialect.drop_index(&table.schema, &table.name, &name));
            }
        }
    }
    statements
}

/// Every index the end state needs from this script: explicit additions,
/// indexes of created tables, and indexes the script dropped that still
/// exist at the end.
fn index_targets(input: &PhaseInput<'_>, ctx: &GenerationContext) -> Vec<(Table, Index)> {
    let mut targets: Vec<(Table, Index)> = Vec::new();
    for table_diff in &input.diff.modified_tables {
        let Some(table) = input.end_table(&table_diff.table_name) else {
            continue;
        };
        for index in table_diff.index_changes.iter().filter_map(|c| c.new()) {
            targets.push((table.clone(), index.clone()));
        }
    }
    for table in &input.diff.new_tables {
        for index in &table.indexes {
            targets.push((table.clone(), index.clone()));
        }
    }
    for dropped in ctx.dropped_keys(ConstraintKind::Index) {
        if let Some(table) = input.after.get_table(&dropped.table) {
            if let Some(index) = table.get_index(&dropped.name) {
                targets.push((table.clone(), index.clone()));
            }
        }
    }
    targets
}

fn create_indexes(input: &PhaseInput<'_>, ctx: &mut GenerationContext, targets: Vec<(Table, Index)>) -> Vec<String> {
    let mut statements = Vec::new();
    for (table, index) in targets {
        if let Some(column) = index.columns.iter().find(|c| table.get_column(c).is_none()) {
            warn!(index = %index.name, table = %table.name, column = %column, "index column missing, skipped");
            continue;
        }
        if ctx.record_create(ConstraintKey::index(&table.schema, &table.name, &index.name)) {
            debug!(index = %index.name, table = %table.name, "create index");
            statements.push(input.dialect.create_index(&table.schema, &table.name, &index));
        }
    }
    statements
}

/// Emits one table's column plan. A primary key still covering a column
/// that is about to change is dropped first.
fn column_changes(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> Vec<String> {
    let mut statements = Vec::new();
    for table_diff in &input.diff.modified_tables {
        let Some(plan) = input.analysis.plans.get(&table_diff.key()) else {
            continue;
        };
        let Some(table) = input.before.get_table(&table_diff.table_name) else {
            continue;
        };
        let (schema, name) = (table.schema.as_str(), table.name.as_str());
        for step in &plan.steps {
            if step.old().is_some_and(|c| c.is_primary_key) {
                if let Some(sql) = drop_primary_key(input, ctx, table, "column-pk") {
                    statements.push(sql);
                }
            }
            match step {
                ColumnStep::Add(new) => statements.push(input.dialect.add_column(schema, name, new)),
                ColumnStep::Drop(old) => statements.push(input.dialect.drop_column(schema, name, &old.name)),
                ColumnStep::Alter { new, .. } => statements.push(input.dialect.alter_column(schema, name, new)),
                ColumnStep::Rebuild { old, new } => {
                    statements.push(input.dialect.drop_column(schema, name, &old.name));
                    statements.push(input.dialect.add_column(schema, name, new));
                }
                ColumnStep::SafeRebuild { old, new } => {
                    let suffix = input.suffix(schema, name, &new.name, "rebuild");
                    statements.push(input.dialect.safe_column_rebuild(schema, name, old, new, &suffix));
                }
            }
        }
    }
    statements
}

/// Drops the script's dropped tables, after the keys among them.
fn drop_tables(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> Vec<String> {
    let among = foreign_keys_among(input.before, &input.analysis.dropped_tables);
    let mut statements = drop_foreign_key_groups(input, ctx, &among);
    for name in &input.diff.dropped_table_names {
        let Some(table) = input.before.get_table(name) else {
            warn!(table = %name, "dropped table missing from starting snapshot, skipped");
            continue;
        };
        ctx.record_table_dropped(table);
        statements.push(input.dialect.drop_table(&table.schema, &table.name));
    }
    statements
}

/// Creates the script's new tables with their primary keys inline.
fn create_tables(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> Vec<String> {
    input
        .diff
        .new_tables
        .iter()
        .map(|table| {
            if table.has_primary_key() {
                ctx.record_create(ConstraintKey::primary_key(&table.schema, &table.name));
            }
            input.dialect.create_table(table)
        })
        .collect()
}

/// Re-creates foreign keys: `direct` ones, the restoration closure of
/// every table whose key or columns changed, and any other constraint
/// the script dropped that exists at the end.
fn restore_foreign_keys(
    input: &PhaseInput<'_>,
    ctx: &mut GenerationContext,
    direct: Vec<ForeignKeyGroup>,
) -> Vec<String> {
    let analysis = &input.analysis;
    let mut flagged: BTreeSet<String> = analysis.pk_added.clone();
    flagged.extend(analysis.impact.tables().cloned());
    let closure = compute_restoration_closure(&flagged, &analysis.impact, input.after, ctx);
    let residual: Vec<ForeignKeyGroup> = ctx
        .dropped_keys(ConstraintKind::ForeignKey)
        .into_iter()
        .filter_map(|k| find_group(input.after, &k.table, &k.name))
        .collect();
    debug!(
        direct = direct.len(),
        closure = closure.len(),
        residual = residual.len(),
        "restoring foreign keys"
    );
    create_foreign_key_groups(input, ctx, merge_groups([direct, closure, residual]))
}

fn sequence_drops(input: &PhaseInput<'_>) -> Vec<String> {
    let mut statements = Vec::new();
    for name in &input.diff.dropped_sequence_names {
        match input.before.get_sequence(name) {
            Some(sequence) => statements.push(input.dialect.drop_sequence(&sequence.schema, &sequence.name)),
            None => warn!(sequence = %name, "dropped sequence missing from starting snapshot, skipped"),
        }
    }
    for change in &input.diff.modified_sequences {
        statements.push(input.dialect.drop_sequence(&change.old.schema, &change.old.name));
    }
    statements
}

fn sequence_creates(input: &PhaseInput<'_>) -> Vec<String> {
    input
        .diff
        .modified_sequences
        .iter()
        .map(|c| &c.new)
        .chain(&input.diff.new_sequences)
        .map(|s| input.dialect.create_sequence(s))
        .collect()
}

fn procedure_drops(input: &PhaseInput<'_>) -> Vec<String> {
    let mut statements = Vec::new();
    for name in &input.diff.dropped_procedure_names {
        match input.before.get_procedure(name) {
            Some(procedure) => statements.push(input.dialect.drop_procedure(&procedure.schema, &procedure.name)),
            None => warn!(procedure = %name, "dropped procedure missing from starting snapshot, skipped"),
        }
    }
    for change in &input.diff.modified_procedures {
        statements.push(input.dialect.drop_procedure(&change.old.schema, &change.old.name));
    }
    statements
}

fn procedure_creates(input: &PhaseInput<'_>) -> Vec<String> {
    input
        .diff
        .modified_procedures
        .iter()
        .map(|c| &c.new)
        .chain(&input.diff.new_procedures)
        .map(|p| input.dialect.create_procedure(p))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ColumnChange, TableDiff};
    use crate::dialect::SqlServerDialect;
    use crate::schema::{Column, ForeignKey};

    fn current() -> SchemaSnapshot {
        SchemaSnapshot::new()
            .table(
                Table::new("Users")
                    .column(Column::new("Id", "INT").primary_key())
                    .column(Column::new("Name", "NVARCHAR(100)")),
            )
            .table(
                Table::new("Orders")
                    .column(Column::new("Id", "INT").primary_key())
                    .column(Column::new("UserId", "INT").references(ForeignKey::new("FK_Orders_Users", "Users", "Id"))),
            )
    }

    fn identity_diff() -> SchemaDiff {
        SchemaDiff::new().modify_table(TableDiff::new("Users").column(ColumnChange::Modify {
            old: Column::new("Id", "INT").primary_key(),
            new: Column::new("Id", "INT").identity().primary_key(),
        }))
    }

    fn target() -> SchemaSnapshot {
        current().table(
            Table::new("Users")
                .column(Column::new("Id", "INT").identity().primary_key())
                .column(Column::new("Name", "NVARCHAR(100)")),
        )
    }

    #[test]
    fn test_analysis_flags_primary_key_cycle() {
        let analysis = Analysis::new(&identity_diff(), &current(), &target());
        assert!(analysis.pk_dropped.contains("users"));
        assert!(analysis.pk_added.contains("users"));
        assert!(analysis.impact.contains("users", "id"));
        assert_eq!(analysis.plans["users"].steps.len(), 1);
    }

    #[test]
    fn test_analysis_ignores_untouched_primary_key() {
        let diff = SchemaDiff::new().modify_table(TableDiff::new("Users").column(ColumnChange::Add {
            new: Column::new("Email", "NVARCHAR(256)").at_position(3),
        }));
        let analysis = Analysis::new(&diff, &current(), &current());
        assert!(analysis.pk_dropped.is_empty());
        assert!(analysis.pk_added.is_empty());
    }

    #[test]
    fn test_foreign_key_dance_is_ledgered() {
        let diff = identity_diff();
        let (before, after) = (current(), target());
        let dialect = SqlServerDialect::new();
        let input = PhaseInput::new(&diff, &before, &after, &dialect, Direction::Up);
        let mut ctx = GenerationContext::new();
        let drops = blocking_drops(&input, &mut ctx);
        assert_eq!(drops.len(), 1);
        assert!(blocking_drops(&input, &mut ctx).is_empty());

        let restored = restore_foreign_keys(&input, &mut ctx, Vec::new());
        assert_eq!(restored.len(), 3);
        assert!(restored[0].contains("WITH NOCHECK ADD CONSTRAINT [FK_Orders_Users]"));
        assert!(restored[1].contains("DROP CONSTRAINT [FK_Orders_Users]"));
        assert!(restored[2].contains("WITH CHECK ADD CONSTRAINT [FK_Orders_Users]"));
        assert!(restore_foreign_keys(&input, &mut ctx, Vec::new()).is_empty());
    }
}
