//! SQL Server dialect.
//!
//! Identifiers are bracket-quoted. Identity and computed properties
//! cannot be altered in place, CREATE PROCEDURE must start a batch (so
//! procedures go through `EXEC`), and column order can only change by
//! rebuilding the table.

use crate::naming::{reorder_table_name, temp_column_name};
use crate::resolver::{group_foreign_keys, ForeignKeyGroup};
use crate::schema::{same_name, Column, ForeignKeyAction, Index, Procedure, Sequence, Table};

use super::{ColumnReorder, ScriptDialect};

/// SQL Server (T-SQL) dialect.
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlServerDialect {
    /// Creates a new SQL Server dialect.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Escapes text for use inside an `N'...'` literal.
    fn literal(text: &str) -> String {
        text.replace('\'', "''")
    }

    fn column_list(&self, columns: &[String]) -> String {
        columns
            .iter()
            .map(|c| self.quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn primary_key_clause(&self, table: &Table) -> Option<String> {
        let columns: Vec<String> = table
            .primary_key_columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        if columns.is_empty() {
            return None;
        }
        let clustering = if table.indexes.iter().any(|i| i.is_clustered) {
            "NONCLUSTERED"
        } else {
            "CLUSTERED"
        };
        Some(format!(
            "CONSTRAINT {} PRIMARY KEY {} ({})",
            self.quote_identifier(&table.primary_key_constraint_name()),
            clustering,
            self.column_list(&columns)
        ))
    }

    /// CREATE TABLE under `name`, optionally without the primary key.
    fn create_table_named(&self, table: &Table, name: &str, with_primary_key: bool) -> String {
        let mut lines: Vec<String> = table
            .ordered_columns()
            .iter()
            .map(|c| self.column_definition(c))
            .collect();
        if with_primary_key {
            if let Some(pk) = self.primary_key_clause(table) {
                lines.push(pk);
            }
        }
        format!(
            "CREATE TABLE {} (\n    {}\n);",
            self.qualified(&table.schema, name),
            lines.join(",\n    ")
        )
    }

    fn action_clauses(group: &ForeignKeyGroup) -> String {
        let mut clauses = String::new();
        if group.delete_action != ForeignKeyAction::NoAction {
            clauses.push_str(" ON DELETE ");
            clauses.push_str(group.delete_action.to_sql());
        }
        if group.update_action != ForeignKeyAction::NoAction {
            clauses.push_str(" ON UPDATE ");
            clauses.push_str(group.update_action.to_sql());
        }
        if group.not_for_replication {
            clauses.push_str(" NOT FOR REPLICATION");
        }
        clauses
    }
}

impl ScriptDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "sqlserver"
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("[{}]", name.replace(']', "]]"))
    }

    fn script_header(&self, provenance: &str) -> String {
        format!("SET XACT_ABORT ON;\n-- {provenance}")
    }

    fn column_definition(&self, column: &Column) -> String {
        let name = self.quote_identifier(&column.name);
        if column.is_computed {
            return format!(
                "{} AS ({})",
                name,
                column.computed_expression.as_deref().unwrap_or_default()
            );
        }
        let mut parts = vec![name, column.sql_type.trim().to_string()];
        if column.is_identity {
            parts.push("IDENTITY(1,1)".to_string());
        }
        parts.push(if column.nullable { "NULL" } else { "NOT NULL" }.to_string());
        parts.join(" ")
    }

    fn create_table(&self, table: &Table) -> String {
        self.create_table_named(table, &table.name, true)
    }

    fn alter_column(&self, schema: &str, table: &str, column: &Column) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} {} {};",
            self.qualified(schema, table),
            self.quote_identifier(&column.name),
            column.sql_type.trim(),
            if column.nullable { "NULL" } else { "NOT NULL" }
        )
    }

    fn safe_column_rebuild(&self, schema: &str, table: &str, old: &Column, new: &Column, suffix: &str) -> String {
        let temp = temp_column_name(&new.name, suffix);
        let mut staged = new.clone();
        staged.name.clone_from(&temp);
        let qualified = self.qualified(schema, table);
        [
            self.add_column(schema, table, &staged),
            self.drop_column(schema, table, &old.name),
            format!(
                "EXEC sp_rename N'{}', N'{}', N'COLUMN';",
                Self::literal(&format!("{}.{}", qualified, self.quote_identifier(&temp))),
                Self::literal(&new.name)
            ),
        ]
        .join("\n")
    }

    fn add_foreign_key(&self, group: &ForeignKeyGroup, force_nocheck: bool) -> String {
        let table = self.qualified(&group.schema, &group.table);
        let check = if force_nocheck || group.not_enforced {
            "WITH NOCHECK"
        } else {
            "WITH CHECK"
        };
        let mut sql = format!(
            "ALTER TABLE {} {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){};",
            table,
            check,
            self.quote_identifier(&group.name),
            self.column_list(&group.columns),
            self.qualified(&group.ref_schema, &group.ref_table),
            self.column_list(&group.ref_columns),
            Self::action_clauses(group)
        );
        if group.not_enforced {
            sql.push_str(&format!(
                "\nALTER TABLE {} NOCHECK CONSTRAINT {};",
                table,
                self.quote_identifier(&group.name)
            ));
        }
        sql
    }

    fn drop_foreign_key(&self, schema: &str, table: &str, name: &str) -> String {
        format!(
            "IF OBJECT_ID(N'{}', N'F') IS NOT NULL ALTER TABLE {} DROP CONSTRAINT {};",
            Self::literal(&self.qualified(schema, name)),
            self.qualified(schema, table),
            self.quote_identifier(name)
        )
    }

    fn add_primary_key(&self, table: &Table) -> String {
        self.primary_key_clause(table).map_or_else(String::new, |clause| {
            format!("ALTER TABLE {} ADD {};", self.qualified(&table.schema, &table.name), clause)
        })
    }

    fn drop_primary_key(&self, schema: &str, table: &str, suffix: &str) -> String {
        let variable = format!("@pk_{suffix}");
        let qualified = self.qualified(schema, table);
        format!(
            "DECLARE {var} SYSNAME = (SELECT [name] FROM sys.key_constraints WHERE [type] = 'PK' AND [parent_object_id] = OBJECT_ID(N'{lit}'));\n\
             IF {var} IS NOT NULL EXEC(N'ALTER TABLE {inner} DROP CONSTRAINT [' + {var} + N']');",
            var = variable,
            lit = Self::literal(&qualified),
            inner = Self::literal(&qualified),
        )
    }

    fn create_index(&self, schema: &str, table: &str, index: &Index) -> String {
        format!(
            "CREATE {}{} INDEX {} ON {} ({});",
            if index.is_unique { "UNIQUE " } else { "" },
            if index.is_clustered { "CLUSTERED" } else { "NONCLUSTERED" },
            self.quote_identifier(&index.name),
            self.qualified(schema, table),
            self.column_list(&index.columns)
        )
    }

    fn drop_index(&self, schema: &str, table: &str, name: &str) -> String {
        format!(
            "IF EXISTS (SELECT 1 FROM sys.indexes WHERE [name] = N'{}' AND [object_id] = OBJECT_ID(N'{}')) DROP INDEX {} ON {};",
            Self::literal(name),
            Self::literal(&self.qualified(schema, table)),
            self.quote_identifier(name),
            self.qualified(schema, table)
        )
    }

    fn create_sequence(&self, sequence: &Sequence) -> String {
        let mut sql = format!(
            "CREATE SEQUENCE {} AS {} START WITH {} INCREMENT BY {}",
            self.qualified(&sequence.schema, &sequence.name),
            sequence.data_type,
            sequence.start_value,
            sequence.increment
        );
        if let Some(min) = sequence.min_value {
            sql.push_str(&format!(" MINVALUE {min}"));
        }
        if let Some(max) = sequence.max_value {
            sql.push_str(&format!(" MAXVALUE {max}"));
        }
        sql.push_str(if sequence.cycle { " CYCLE;" } else { " NO CYCLE;" });
        sql
    }

    fn create_procedure(&self, procedure: &Procedure) -> String {
        format!("EXEC(N'{}');", Self::literal(procedure.definition.trim()))
    }

    fn column_reorder(&self, actual: &Table, desired: &Table, referencing: &[ForeignKeyGroup]) -> ColumnReorder {
        let staging = reorder_table_name(&desired.name);
        let staging_qualified = self.qualified(&desired.schema, &staging);
        let copied: Vec<String> = desired
            .ordered_columns()
            .iter()
            .filter(|c| c.is_data_column())
            .filter(|c| actual.get_column(&c.name).is_some_and(Column::is_data_column))
            .map(|c| c.name.clone())
            .collect();
        let has_identity = desired
            .ordered_columns()
            .iter()
            .any(|c| c.is_identity && copied.iter().any(|n| same_name(n, &c.name)));

        let mut statements = vec![self.create_table_named(desired, &staging, false)];
        if has_identity {
            statements.push(format!("SET IDENTITY_INSERT {staging_qualified} ON;"));
        }
        if !copied.is_empty() {
            // Columns re-added earlier in the batch do not exist at compile time.
            let list = self.column_list(&copied);
            let copy = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {};",
                staging_qualified,
                list,
                list,
                self.qualified(&actual.schema, &actual.name)
            );
            statements.push(format!("EXEC(N'{}');", Self::literal(&copy)));
        }
        if has_identity {
            statements.push(format!("SET IDENTITY_INSERT {staging_qualified} OFF;"));
        }
        statements.push(self.drop_table(&actual.schema, &actual.name));
        statements.push(format!(
            "EXEC sp_rename N'{}', N'{}';",
            Self::literal(&staging_qualified),
            Self::literal(&desired.name)
        ));
        let pk = self.add_primary_key(desired);
        if !pk.is_empty() {
            statements.push(pk);
        }

        let mut recreate: Vec<String> = desired
            .indexes
            .iter()
            .map(|i| self.create_index(&desired.schema, &desired.name, i))
            .collect();
        for group in group_foreign_keys(desired.foreign_keys()) {
            recreate.push(self.add_foreign_key(&group, false));
        }
        for group in referencing {
            recreate.push(self.add_foreign_key(group, false));
        }

        ColumnReorder {
            sql: statements.join("\n"),
            recreate,
        }
    }
}
