//! File handling behind the `sqlmirror` binary.
//!
//! A migration input document is one JSON object:
//!
//! ```json
//! { "name": "AddEmail", "current": { "tables": [] }, "target": { "tables": [] }, "diff": {} }
//! ```
//!
//! `current` and `target` are schema snapshots, `diff` is the structural
//! diff between them. [`MigrationInput::load`] reads and validates the
//! snapshots; [`write_scripts`] stores the generated pair next to each
//! other as `<name>.up.sql` and `<name>.down.sql`.

pub mod error;

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use sqlmirror_core::prelude::*;

pub use error::{CliError, Result};

/// One migration to generate scripts for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationInput {
    /// Migration name, used for file names and the provenance comment.
    #[serde(default)]
    pub name: Option<String>,
    /// Schema the up script starts from.
    pub current: SchemaSnapshot,
    /// Schema the up script produces.
    pub target: SchemaSnapshot,
    /// Structural diff from `current` to `target`.
    #[serde(default)]
    pub diff: SchemaDiff,
}

impl MigrationInput {
    /// Reads a migration document from disk.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Io`] when the file cannot be read and
    /// [`CliError::Json`] when it is not a valid document, including
    /// snapshots with duplicate or misnumbered columns.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let input: Self = serde_json::from_str(&text).map_err(|source| CliError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(
            path = %path.display(),
            current_tables = input.current.tables().count(),
            target_tables = input.target.tables().count(),
            "migration input loaded"
        );
        Ok(input)
    }

    /// The migration name, falling back to `fallback`.
    #[must_use]
    pub fn name_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(fallback)
    }

    /// Checks that the diff's entries match both snapshots.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Model`] naming every entry that does not fit.
    pub fn validate(&self) -> Result<()> {
        self.diff.validate(&self.current, &self.target)?;
        Ok(())
    }

    /// Tables on which `current` with the diff applied disagrees with
    /// `target`, each with a short reason. Every mismatch is logged.
    #[must_use]
    pub fn projection_mismatches(&self) -> Vec<(String, &'static str)> {
        let projected = project_schema_after_diff(&self.current, &self.diff);
        let mut mismatches = Vec::new();
        for expected in self.target.tables() {
            match projected.get_table(&expected.name) {
                None => mismatches.push((expected.name.clone(), "missing from projection")),
                Some(actual) if !actual.same_structure(expected) => {
                    mismatches.push((expected.name.clone(), "structure differs"));
                }
                Some(_) => {}
            }
        }
        for actual in projected.tables() {
            if self.target.get_table(&actual.name).is_none() {
                mismatches.push((actual.name.clone(), "not in target"));
            }
        }
        for (table, reason) in &mismatches {
            warn!(table = %table, reason, "projection does not match target");
        }
        mismatches
    }

    /// Generates both scripts after validating the diff.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Model`] when validation fails.
    pub fn generate(&self, options: GeneratorOptions) -> Result<MigrationScripts> {
        let generator = ScriptGenerator::new().options(options);
        Ok(generator.generate_checked(&self.diff, &self.current, &self.target)?)
    }
}

/// Writes `<name>.up.sql` and `<name>.down.sql` into `out_dir`, creating
/// the directory when needed. Returns both paths.
///
/// # Errors
///
/// Returns [`CliError::InvalidInput`] for a name that is empty or holds a
/// path separator, and [`CliError::Io`] when a directory or file cannot be
/// written.
pub fn write_scripts(out_dir: &Path, name: &str, scripts: &MigrationScripts) -> Result<(PathBuf, PathBuf)> {
    if name.is_empty() || name.contains(['/', '\\']) {
        return Err(CliError::InvalidInput(format!(
            "migration name '{name}' is not a valid file name"
        )));
    }
    fs::create_dir_all(out_dir).map_err(|source| CliError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;

    let up = out_dir.join(format!("{name}.up.sql"));
    let down = out_dir.join(format!("{name}.down.sql"));
    for (path, script) in [(&up, &scripts.up), (&down, &scripts.down)] {
        fs::write(path, format!("{script}\n")).map_err(|source| CliError::Io {
            path: path.clone(),
            source,
        })?;
        info!(path = %path.display(), "script written");
    }
    Ok((up, down))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(target_email: bool) -> MigrationInput {
        let users = Table::new("Users").column(Column::new("Id", "INT").primary_key());
        let target = if target_email {
            users.clone().column(Column::new("Email", "NVARCHAR(256)"))
        } else {
            users.clone()
        };
        MigrationInput {
            name: None,
            current: SchemaSnapshot::new().table(users),
            target: SchemaSnapshot::new().table(target),
            diff: SchemaDiff::new().modify_table(TableDiff::new("Users").column(ColumnChange::Add {
                new: Column::new("Email", "NVARCHAR(256)").at_position(2),
            })),
        }
    }

    #[test]
    fn test_projection_matches_target() {
        assert!(input(true).projection_mismatches().is_empty());
    }

    #[test]
    fn test_projection_mismatch_is_reported() {
        let mismatches = input(false).projection_mismatches();
        assert_eq!(mismatches, vec![("Users".to_string(), "structure differs")]);
    }

    #[test]
    fn test_name_fallback() {
        let mut input = input(true);
        assert_eq!(input.name_or("migration"), "migration");
        input.name = Some("AddEmail".to_string());
        assert_eq!(input.name_or("migration"), "AddEmail");
    }

    #[test]
    fn test_rejects_path_like_names() {
        let scripts = MigrationScripts {
            up: String::new(),
            down: String::new(),
        };
        let result = write_scripts(Path::new("."), "../escape", &scripts);
        assert!(matches!(result, Err(CliError::InvalidInput(_))));
    }
}
