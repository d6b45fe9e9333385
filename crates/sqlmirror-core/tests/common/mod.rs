#![allow(dead_code)]

use std::collections::HashMap;

use sqlmirror_core::prelude::*;

pub fn generator() -> ScriptGenerator {
    ScriptGenerator::new().options(
        GeneratorOptions::new()
            .with_migration_name("test")
            .with_provenance("sqlmirror"),
    )
}

/// Statement lines of a script, without comments and blank lines.
pub fn statements(script: &str) -> Vec<&str> {
    script
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with("--"))
        .collect()
}

/// Position of the first line containing `needle`.
pub fn line_of(script: &str, needle: &str) -> usize {
    script
        .lines()
        .position(|l| l.contains(needle))
        .unwrap_or_else(|| panic!("`{needle}` not found in:\n{script}"))
}

/// Position of the last line containing `needle`.
pub fn last_line_of(script: &str, needle: &str) -> usize {
    script
        .lines()
        .enumerate()
        .filter(|(_, l)| l.contains(needle))
        .last()
        .map(|(i, _)| i)
        .unwrap_or_else(|| panic!("`{needle}` not found in:\n{script}"))
}

pub fn count(script: &str, needle: &str) -> usize {
    script.matches(needle).count()
}

fn bracketed_after<'a>(line: &'a str, marker: &str) -> Option<&'a str> {
    let start = line.find(marker)? + marker.len();
    let rest = &line[start..];
    rest.find(']').map(|end| &rest[..end])
}

/// Checks that a named constraint is never added twice without a DROP
/// of the same name in between. A DROP TABLE forgets everything, since
/// it takes the table's constraints with it.
pub fn assert_drop_precedes_readd(script: &str) {
    let mut live: HashMap<String, bool> = HashMap::new();
    for line in script.lines() {
        if line.starts_with("DROP TABLE ") {
            live.clear();
        }
        if let Some(name) = bracketed_after(line, "DROP CONSTRAINT [") {
            live.insert(name.to_lowercase(), false);
        }
        if let Some(name) = bracketed_after(line, "ADD CONSTRAINT [") {
            let previous = live.insert(name.to_lowercase(), true);
            assert_ne!(previous, Some(true), "constraint {name} added twice without a drop:\n{script}");
        }
    }
}

pub fn users(id: Column) -> Table {
    Table::new("Users")
        .column(id)
        .column(Column::new("Name", "NVARCHAR(100)").not_null())
}

pub fn orders() -> Table {
    Table::new("Orders")
        .column(Column::new("Id", "INT").identity().primary_key())
        .column(
            Column::new("UserId", "INT")
                .not_null()
                .references(ForeignKey::new("FK_Orders_Users", "Users", "Id")),
        )
        .column(Column::new("Total", "DECIMAL(18,2)"))
        .index(Index::new("IX_Orders_UserId", &["UserId"]))
}

pub fn reviews() -> Table {
    Table::new("Reviews")
        .column(Column::new("Id", "INT").primary_key())
        .column(
            Column::new("UserId", "INT")
                .references(ForeignKey::new("FK_Reviews_Users", "Users", "Id").not_enforced()),
        )
}

/// Users with a plain INT key, referenced by Orders (enforced) and
/// Reviews (disabled).
pub fn plain_key_schema() -> SchemaSnapshot {
    SchemaSnapshot::new()
        .table(users(Column::new("Id", "INT").primary_key()))
        .table(orders())
        .table(reviews())
}

/// [`plain_key_schema`] with `Users.Id` turned into an identity.
pub fn identity_key_schema() -> SchemaSnapshot {
    plain_key_schema().table(users(Column::new("Id", "INT").identity().primary_key()))
}

pub fn identity_key_diff() -> SchemaDiff {
    SchemaDiff::new().modify_table(TableDiff::new("Users").column(ColumnChange::Modify {
        old: Column::new("Id", "INT").primary_key().at_position(1),
        new: Column::new("Id", "INT").identity().primary_key().at_position(1),
    }))
}

/// Checks that projecting `diff` onto `from` yields `to`, table by table.
pub fn assert_projection_matches(from: &SchemaSnapshot, diff: &SchemaDiff, to: &SchemaSnapshot) {
    let projected = project_schema_after_diff(from, diff);
    assert_eq!(projected.tables().count(), to.tables().count(), "table count differs");
    for expected in to.tables() {
        let actual = projected
            .get_table(&expected.name)
            .unwrap_or_else(|| panic!("table {} missing from projection", expected.name));
        assert!(
            actual.same_structure(expected),
            "projection of {} differs:\n{actual:#?}\nexpected:\n{expected:#?}",
            expected.name
        );
    }
}
