//! Up script: current schema to target schema.

use crate::context::GenerationContext;
use crate::schema::key;

use super::{
    add_primary_keys, blocking_drops, column_changes, create_foreign_key_groups, create_indexes,
    create_tables, direct_foreign_keys, drop_primary_keys, drop_tables, index_drops, index_targets,
    join, procedure_creates, procedure_drops, restore_foreign_keys, sequence_creates, sequence_drops,
    PhaseInput, PhaseSpec,
};

/// Up phases in emission order.
pub const PHASES: &[PhaseSpec] = &[
    PhaseSpec {
        number: 1,
        title: "Drop blocking constraints",
        run: drop_blocking_constraints,
    },
    PhaseSpec {
        number: 2,
        title: "Drop tables",
        run: drop_dropped_tables,
    },
    PhaseSpec {
        number: 3,
        title: "Sequences",
        run: sequences,
    },
    PhaseSpec {
        number: 4,
        title: "Create tables",
        run: create_new_tables,
    },
    PhaseSpec {
        number: 5,
        title: "Column changes",
        run: apply_column_changes,
    },
    PhaseSpec {
        number: 6,
        title: "Constraints",
        run: constraints,
    },
    PhaseSpec {
        number: 7,
        title: "Procedures",
        run: procedures,
    },
];

/// Foreign keys, then primary keys, then indexes standing in the way of
/// a table drop or a column change.
fn drop_blocking_constraints(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    let mut statements = blocking_drops(input, ctx);
    statements.extend(drop_primary_keys(input, ctx));
    statements.extend(index_drops(input, ctx));
    join(statements)
}

fn drop_dropped_tables(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(drop_tables(input, ctx))
}

fn sequences(input: &PhaseInput<'_>, _ctx: &mut GenerationContext) -> String {
    let mut statements = sequence_drops(input);
    statements.extend(sequence_creates(input));
    join(statements)
}

fn create_new_tables(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(create_tables(input, ctx))
}

fn apply_column_changes(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(column_changes(input, ctx))
}

/// New and changed foreign keys (NOCHECK first, then CHECK), regained
/// primary keys, restored foreign keys, then indexes.
///
/// A new foreign key pointing at a table whose primary key only comes
/// back in this phase waits until that key exists.
fn constraints(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    let pk_added = &input.analysis.pk_added;
    let (deferred, ready): (Vec<_>, Vec<_>) = direct_foreign_keys(input)
        .into_iter()
        .partition(|g| pk_added.contains(&key(&g.ref_table)));

    let mut statements = create_foreign_key_groups(input, ctx, ready);
    statements.extend(add_primary_keys(input, ctx));
    statements.extend(restore_foreign_keys(input, ctx, deferred));
    let targets = index_targets(input, ctx);
    statements.extend(create_indexes(input, ctx, targets));
    join(statements)
}

fn procedures(input: &PhaseInput<'_>, _ctx: &mut GenerationContext) -> String {
    let mut statements = procedure_drops(input);
    statements.extend(procedure_creates(input));
    join(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ColumnChange, SchemaDiff, TableDiff};
    use crate::dialect::SqlServerDialect;
    use crate::phases::Direction;
    use crate::schema::{Column, ForeignKey, SchemaSnapshot, Table};

    fn run(diff: &SchemaDiff, current: &SchemaSnapshot, target: &SchemaSnapshot) -> Vec<(u8, String)> {
        let dialect = SqlServerDialect::new();
        let input = PhaseInput::new(diff, current, target, &dialect, Direction::Up);
        let mut ctx = GenerationContext::new();
        PHASES
            .iter()
            .map(|phase| (phase.number, (phase.run)(&input, &mut ctx)))
            .collect()
    }

    #[test]
    fn test_phase_numbers_are_ordered() {
        let numbers: Vec<u8> = PHASES.iter().map(|p| p.number).collect();
        let mut sorted = numbers.clone();
        sorted.sort_unstable();
        assert_eq!(numbers, sorted);
    }

    #[test]
    fn test_add_column_touches_only_column_phase() {
        let current = SchemaSnapshot::new().table(
            Table::new("Users")
                .column(Column::new("Id", "INT").primary_key())
                .column(Column::new("Name", "NVARCHAR(100)")),
        );
        let target = SchemaSnapshot::new().table(
            Table::new("Users")
                .column(Column::new("Id", "INT").primary_key())
                .column(Column::new("Name", "NVARCHAR(100)"))
                .column(Column::new("Email", "NVARCHAR(256)")),
        );
        let diff = SchemaDiff::new().modify_table(TableDiff::new("Users").column(ColumnChange::Add {
            new: Column::new("Email", "NVARCHAR(256)").at_position(3),
        }));
        let phases = run(&diff, &current, &target);
        let non_empty: Vec<u8> = phases.iter().filter(|(_, s)| !s.is_empty()).map(|(n, _)| *n).collect();
        assert_eq!(non_empty, vec![5]);
        assert_eq!(phases[4].1, "ALTER TABLE [dbo].[Users] ADD [Email] NVARCHAR(256) NULL;");
    }

    #[test]
    fn test_new_foreign_key_waits_for_regained_primary_key() {
        let current = SchemaSnapshot::new()
            .table(Table::new("Users").column(Column::new("Id", "INT").not_null()))
            .table(Table::new("Orders").column(Column::new("Id", "INT")).column(Column::new("UserId", "INT")));
        let fk = ForeignKey::new("FK_Orders_Users", "Users", "Id");
        let target = SchemaSnapshot::new()
            .table(Table::new("Users").column(Column::new("Id", "INT").primary_key()))
            .table(
                Table::new("Orders")
                    .column(Column::new("Id", "INT"))
                    .column(Column::new("UserId", "INT").references(fk.clone())),
            );
        let diff = SchemaDiff::new()
            .modify_table(TableDiff::new("Users").column(ColumnChange::Modify {
                old: Column::new("Id", "INT").not_null(),
                new: Column::new("Id", "INT").primary_key(),
            }))
            .modify_table(TableDiff::new("Orders").foreign_key(crate::diff::ForeignKeyChange::Add {
                new: fk.owned_by("dbo", "Orders", "UserId"),
            }));
        let phases = run(&diff, &current, &target);
        let constraints = &phases[5].1;
        let pk = constraints.find("PRIMARY KEY").unwrap();
        let fk_add = constraints.find("ADD CONSTRAINT [FK_Orders_Users]").unwrap();
        assert!(pk < fk_add);
    }
}
