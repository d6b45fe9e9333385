//! Loading documents from disk and writing script pairs.

use std::fs;
use std::path::Path;

use sqlmirror_cli::{write_scripts, CliError, MigrationInput};
use sqlmirror_core::prelude::GeneratorOptions;
use tempfile::TempDir;

const ADD_EMAIL: &str = r#"{
    "name": "AddEmail",
    "current": {
        "tables": [
            {"name": "Users", "columns": [
                {"name": "Id", "sql_type": "INT", "nullable": false, "is_primary_key": true},
                {"name": "Name", "sql_type": "NVARCHAR(100)"}
            ]}
        ]
    },
    "target": {
        "tables": [
            {"name": "Users", "columns": [
                {"name": "Id", "sql_type": "INT", "nullable": false, "is_primary_key": true},
                {"name": "Name", "sql_type": "NVARCHAR(100)"},
                {"name": "Email", "sql_type": "NVARCHAR(256)"}
            ]}
        ]
    },
    "diff": {
        "modified_tables": [
            {"table_name": "Users", "column_changes": [
                {"change": "add", "new": {"name": "Email", "sql_type": "NVARCHAR(256)", "ordinal_position": 3}}
            ]}
        ]
    }
}"#;

fn write_input(dir: &Path, text: &str) -> std::path::PathBuf {
    let path = dir.join("migration.json");
    fs::write(&path, text).unwrap();
    path
}

#[test]
fn test_generate_and_write_scripts() {
    let dir = TempDir::new().unwrap();
    let input = MigrationInput::load(&write_input(dir.path(), ADD_EMAIL)).unwrap();
    input.validate().unwrap();
    assert!(input.projection_mismatches().is_empty());

    let name = input.name_or("migration").to_string();
    let scripts = input
        .generate(GeneratorOptions::new().with_migration_name(name.clone()))
        .unwrap();
    let out = dir.path().join("out");
    let (up, down) = write_scripts(&out, &name, &scripts).unwrap();

    assert_eq!(up, out.join("AddEmail.up.sql"));
    assert_eq!(down, out.join("AddEmail.down.sql"));
    let up_text = fs::read_to_string(up).unwrap();
    let down_text = fs::read_to_string(down).unwrap();
    assert!(up_text.contains("up script for migration 'AddEmail'"));
    assert!(up_text.contains("ALTER TABLE [dbo].[Users] ADD [Email] NVARCHAR(256) NULL;"));
    assert!(down_text.contains("ALTER TABLE [dbo].[Users] DROP COLUMN [Email];"));
    assert!(down_text.ends_with(";\n"));
}

#[test]
fn test_malformed_document_is_a_json_error() {
    let dir = TempDir::new().unwrap();
    let path = write_input(dir.path(), r#"{"current": {"tables": []}"#);
    let err = MigrationInput::load(&path).unwrap_err();
    assert!(matches!(err, CliError::Json { .. }));
}

#[test]
fn test_duplicate_columns_are_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = write_input(
        dir.path(),
        r#"{
            "current": {"tables": [{"name": "T", "columns": [
                {"name": "A", "sql_type": "INT"}, {"name": "a", "sql_type": "INT"}
            ]}]},
            "target": {"tables": []}
        }"#,
    );
    assert!(matches!(MigrationInput::load(&path), Err(CliError::Json { .. })));
}

#[test]
fn test_diff_against_missing_table_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_input(
        dir.path(),
        r#"{
            "current": {"tables": []},
            "target": {"tables": []},
            "diff": {"dropped_table_names": ["Ghost"]}
        }"#,
    );
    let input = MigrationInput::load(&path).unwrap();
    assert!(matches!(input.validate(), Err(CliError::Model(_))));
    assert!(input.generate(GeneratorOptions::new()).is_err());
}
