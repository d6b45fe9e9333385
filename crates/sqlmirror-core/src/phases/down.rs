//! Down script: target schema back to current schema.
//!
//! Runs over the inverted diff, so "Add" here is whatever the up script
//! dropped. Each phase mirrors one up concept; the last one restores
//! the original physical column order when the column phase could not.

use tracing::debug;

use crate::context::{ConstraintKey, GenerationContext};
use crate::planner::simulate_order;
use crate::resolver::{group_foreign_keys, merge_groups, referencing_foreign_keys, validate_group};
use crate::schema::{Index, Table};

use super::{
    add_primary_keys, blocking_drops, column_changes, create_indexes, create_tables, direct_foreign_keys,
    drop_foreign_key_groups, drop_primary_keys, drop_tables, index_drops, index_targets, join,
    procedure_creates, procedure_drops, restore_foreign_keys, sequence_creates, sequence_drops, PhaseInput,
    PhaseSpec,
};

/// Down phases in emission order.
pub const PHASES: &[PhaseSpec] = &[
    PhaseSpec {
        number: 0,
        title: "Reverse index changes",
        run: reverse_index_changes,
    },
    PhaseSpec {
        number: 1,
        title: "Drop foreign keys",
        run: drop_foreign_keys,
    },
    PhaseSpec {
        number: 2,
        title: "Drop primary keys",
        run: drop_changed_primary_keys,
    },
    PhaseSpec {
        number: 3,
        title: "Reverse column changes",
        run: reverse_column_changes,
    },
    PhaseSpec {
        number: 4,
        title: "Drop created tables",
        run: drop_created_tables,
    },
    PhaseSpec {
        number: 5,
        title: "Recreate dropped tables",
        run: recreate_dropped_tables,
    },
    PhaseSpec {
        number: 6,
        title: "Restore primary keys and indexes",
        run: restore_primary_keys_and_indexes,
    },
    PhaseSpec {
        number: 7,
        title: "Restore foreign keys",
        run: restore_original_foreign_keys,
    },
    PhaseSpec {
        number: 8,
        title: "Drop sequences",
        run: drop_sequences,
    },
    PhaseSpec {
        number: 9,
        title: "Recreate sequences",
        run: recreate_sequences,
    },
    PhaseSpec {
        number: 10,
        title: "Drop procedures",
        run: drop_procedures,
    },
    PhaseSpec {
        number: 11,
        title: "Recreate procedures",
        run: recreate_procedures,
    },
    PhaseSpec {
        number: 12,
        title: "Column reorder",
        run: reorder_columns,
    },
];

/// Drops what the up script added or changed, and re-adds the indexes it
/// dropped when their table and columns are already back in shape. The
/// rest wait for phase 6.
fn reverse_index_changes(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    let mut statements = index_drops(input, ctx);

    let analysis = &input.analysis;
    let mut safe: Vec<(Table, Index)> = Vec::new();
    for table_diff in &input.diff.modified_tables {
        let (Some(start), Some(end)) = (
            input.before.get_table(&table_diff.table_name),
            input.after.get_table(&table_diff.table_name),
        ) else {
            continue;
        };
        if analysis.created_tables.contains(&start.key()) || analysis.pk_dropped.contains(&start.key()) {
            continue;
        }
        for index in table_diff.index_changes.iter().filter_map(|c| c.new()) {
            let ready = index
                .columns
                .iter()
                .all(|c| start.get_column(c).is_some() && !analysis.impact.contains(&start.name, c));
            if ready {
                safe.push((end.clone(), index.clone()));
            } else {
                debug!(index = %index.name, table = %start.name, "index re-add deferred");
            }
        }
    }
    statements.extend(create_indexes(input, ctx, safe));
    join(statements)
}

/// Foreign keys go before primary keys: the engine refuses to drop a
/// referenced key.
fn drop_foreign_keys(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(blocking_drops(input, ctx))
}

fn drop_changed_primary_keys(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(drop_primary_keys(input, ctx))
}

fn reverse_column_changes(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(column_changes(input, ctx))
}

fn drop_created_tables(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(drop_tables(input, ctx))
}

fn recreate_dropped_tables(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    join(create_tables(input, ctx))
}

fn restore_primary_keys_and_indexes(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    let mut statements = add_primary_keys(input, ctx);
    let targets = index_targets(input, ctx);
    statements.extend(create_indexes(input, ctx, targets));
    join(statements)
}

fn restore_original_foreign_keys(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    let direct = direct_foreign_keys(input);
    join(restore_foreign_keys(input, ctx, direct))
}

fn drop_sequences(input: &PhaseInput<'_>, _ctx: &mut GenerationContext) -> String {
    join(sequence_drops(input))
}

fn recreate_sequences(input: &PhaseInput<'_>, _ctx: &mut GenerationContext) -> String {
    join(sequence_creates(input))
}

fn drop_procedures(input: &PhaseInput<'_>, _ctx: &mut GenerationContext) -> String {
    join(procedure_drops(input))
}

fn recreate_procedures(input: &PhaseInput<'_>, _ctx: &mut GenerationContext) -> String {
    join(procedure_creates(input))
}

/// Rebuilds tables whose physical column order no longer matches.
///
/// The column phase appends every added or rebuilt column, so a table
/// that saw an Add, Modify, or Rebuild can end up in a different order
/// than the one being restored. Plain drops never reorder survivors.
fn reorder_columns(input: &PhaseInput<'_>, ctx: &mut GenerationContext) -> String {
    let mut statements = Vec::new();
    for table_diff in &input.diff.modified_tables {
        if !table_diff.has_reconstructive_change() {
            continue;
        }
        let (Some(start), Some(desired)) = (
            input.before.get_table(&table_diff.table_name),
            input.after.get_table(&table_diff.table_name),
        ) else {
            continue;
        };
        let steps = input
            .analysis
            .plans
            .get(&table_diff.key())
            .map(|p| p.steps.as_slice())
            .unwrap_or_default();
        let simulated = simulate_order(&start.column_order(), steps);
        if simulated == desired.column_order() {
            continue;
        }
        debug!(table = %desired.name, actual = ?simulated, desired = ?desired.column_order(), "column reorder");

        let actual = desired.reordered(&simulated);
        let referencing: Vec<_> = referencing_foreign_keys(input.after, &desired.name)
            .into_iter()
            .filter(|g| validate_group(g, input.after))
            .collect();
        statements.extend(drop_foreign_key_groups(input, ctx, &referencing));
        ctx.record_table_dropped(&actual);

        let reorder = input.dialect.column_reorder(&actual, desired, &referencing);
        statements.push(reorder.sql);

        if desired.has_primary_key() {
            ctx.record_create(ConstraintKey::primary_key(&desired.schema, &desired.name));
        }
        for index in &desired.indexes {
            ctx.record_create(ConstraintKey::index(&desired.schema, &desired.name, &index.name));
        }
        let own = group_foreign_keys(desired.foreign_keys());
        for group in merge_groups([own, referencing]) {
            ctx.record_create(group.key());
        }
        statements.extend(reorder.recreate);
    }
    join(statements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::{ColumnChange, SchemaDiff, TableDiff};
    use crate::dialect::SqlServerDialect;
    use crate::phases::Direction;
    use crate::schema::{Column, ForeignKey, SchemaSnapshot};

    fn orders(order: &[&str]) -> Table {
        let mut table = Table::new("Orders");
        for name in order {
            let column = match *name {
                "Id" => Column::new("Id", "INT").identity().primary_key(),
                other => Column::new(other, "INT"),
            };
            table = table.column(column);
        }
        table
    }

    fn run(diff: &SchemaDiff, target: &SchemaSnapshot, current: &SchemaSnapshot) -> Vec<(u8, String)> {
        let dialect = SqlServerDialect::new();
        let input = PhaseInput::new(diff, target, current, &dialect, Direction::Down);
        let mut ctx = GenerationContext::new();
        PHASES
            .iter()
            .map(|phase| (phase.number, (phase.run)(&input, &mut ctx)))
            .collect()
    }

    #[test]
    fn test_thirteen_phases() {
        assert_eq!(PHASES.len(), 13);
        assert_eq!(PHASES.last().map(|p| p.number), Some(12));
    }

    #[test]
    fn test_position_only_change_triggers_reorder() {
        let current = SchemaSnapshot::new().table(orders(&["Id", "UserId", "Total"]));
        let target = SchemaSnapshot::new().table(orders(&["Id", "Total", "UserId"]));
        let up = SchemaDiff::new().modify_table(
            TableDiff::new("Orders")
                .column(ColumnChange::Modify {
                    old: Column::new("UserId", "INT").at_position(2),
                    new: Column::new("UserId", "INT").at_position(3),
                })
                .column(ColumnChange::Modify {
                    old: Column::new("Total", "INT").at_position(3),
                    new: Column::new("Total", "INT").at_position(2),
                }),
        );
        let down = up.inverted(&current);
        let phases = run(&down, &target, &current);
        let reorder = &phases[12].1;
        assert!(reorder.contains("CREATE TABLE [dbo].[tmp_ms_xx_Orders]"));
        assert!(reorder.contains("SET IDENTITY_INSERT [dbo].[tmp_ms_xx_Orders] ON;"));
        assert!(phases[..12].iter().all(|(_, s)| s.is_empty()));
    }

    #[test]
    fn test_plain_drop_does_not_reorder() {
        let current = SchemaSnapshot::new().table(orders(&["Id", "Total"]));
        let target = SchemaSnapshot::new().table(orders(&["Id", "Total", "Note"]));
        let up = SchemaDiff::new().modify_table(TableDiff::new("Orders").column(ColumnChange::Add {
            new: Column::new("Note", "INT").at_position(3),
        }));
        let down = up.inverted(&current);
        let phases = run(&down, &target, &current);
        assert_eq!(phases[3].1, "ALTER TABLE [dbo].[Orders] DROP COLUMN [Note];");
        assert!(phases[12].1.is_empty());
    }

    #[test]
    fn test_reorder_recreates_referencing_keys() {
        let current = SchemaSnapshot::new()
            .table(orders(&["Id", "Code", "Total"]))
            .table(
                Table::new("Lines")
                    .column(Column::new("Id", "INT").primary_key())
                    .column(Column::new("OrderId", "INT").references(ForeignKey::new("FK_Lines_Orders", "Orders", "Id"))),
            );
        let target = current.clone().table(orders(&["Id", "Total"]));
        let up = SchemaDiff::new().modify_table(TableDiff::new("Orders").column(ColumnChange::Drop {
            old: Column::new("Code", "INT").at_position(2),
        }));
        let down = up.inverted(&current);
        let phases = run(&down, &target, &current);
        assert_eq!(phases[3].1, "ALTER TABLE [dbo].[Orders] ADD [Code] INT NULL;");
        let reorder = &phases[12].1;
        let drop = reorder.find("DROP CONSTRAINT [FK_Lines_Orders]").unwrap();
        let rebuild = reorder.find("CREATE TABLE [dbo].[tmp_ms_xx_Orders]").unwrap();
        let add = reorder.find("WITH CHECK ADD CONSTRAINT [FK_Lines_Orders]").unwrap();
        assert!(drop < rebuild && rebuild < add);
    }

    #[test]
    fn test_copy_of_readded_column_is_deferred() {
        let current = SchemaSnapshot::new().table(orders(&["Id", "Code", "Total"]));
        let target = SchemaSnapshot::new().table(orders(&["Id", "Total"]));
        let up = SchemaDiff::new().modify_table(TableDiff::new("Orders").column(ColumnChange::Drop {
            old: Column::new("Code", "INT").at_position(2),
        }));
        let down = up.inverted(&current);
        let phases = run(&down, &target, &current);
        assert_eq!(phases[3].1, "ALTER TABLE [dbo].[Orders] ADD [Code] INT NULL;");
        let reorder = &phases[12].1;
        assert!(reorder.lines().any(|l| l
            == "EXEC(N'INSERT INTO [dbo].[tmp_ms_xx_Orders] ([Id], [Code], [Total]) SELECT [Id], [Code], [Total] FROM [dbo].[Orders];');"));
        assert!(reorder
            .lines()
            .filter(|l| l.contains("[Code]"))
            .all(|l| l.starts_with("EXEC(N'") || l.trim_start().starts_with("[Code]")));
    }
}
