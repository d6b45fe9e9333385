//! Script generator facade.
//!
//! [`ScriptGenerator`] drives the up and down phase tables over one
//! diff and hands the fragments to the [`ScriptAssembler`]. Each script
//! gets a fresh [`GenerationContext`], so generating the same migration
//! twice, or several migrations in parallel, yields identical output.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::assembler::{PhaseOutput, ScriptAssembler};
use crate::context::GenerationContext;
use crate::dialect::{ScriptDialect, SqlServerDialect};
use crate::diff::SchemaDiff;
use crate::error::Result;
use crate::phases::{down, up, Direction, PhaseInput, PhaseSpec};
use crate::schema::SchemaSnapshot;

fn default_migration_name() -> String {
    "migration".to_string()
}

fn default_provenance() -> String {
    format!("sqlmirror {}", env!("CARGO_PKG_VERSION"))
}

const fn default_true() -> bool {
    true
}

/// Options for script generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorOptions {
    /// Migration name, shown in the provenance comment.
    #[serde(default = "default_migration_name")]
    pub migration_name: String,
    /// Tool string shown in the provenance comment.
    #[serde(default = "default_provenance")]
    pub provenance: String,
    /// Generation time shown in the provenance comment. Left out when
    /// unset so output stays byte-for-byte reproducible.
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    /// Whether to emit `-- Phase N: title` section comments.
    #[serde(default = "default_true")]
    pub phase_comments: bool,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl GeneratorOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            migration_name: default_migration_name(),
            provenance: default_provenance(),
            generated_at: None,
            phase_comments: true,
        }
    }

    /// Sets the migration name.
    #[must_use]
    pub fn with_migration_name(mut self, name: impl Into<String>) -> Self {
        self.migration_name = name.into();
        self
    }

    /// Sets the tool string.
    #[must_use]
    pub fn with_provenance(mut self, provenance: impl Into<String>) -> Self {
        self.provenance = provenance.into();
        self
    }

    /// Stamps scripts with a generation time.
    #[must_use]
    pub const fn with_generated_at(mut self, at: DateTime<Utc>) -> Self {
        self.generated_at = Some(at);
        self
    }

    /// Enables or disables phase section comments.
    #[must_use]
    pub const fn with_phase_comments(mut self, enabled: bool) -> Self {
        self.phase_comments = enabled;
        self
    }

    fn provenance_line(&self, direction: Direction) -> String {
        let mut line = format!(
            "{}: {} script for migration '{}'",
            self.provenance,
            direction.tag(),
            self.migration_name
        );
        if let Some(at) = self.generated_at {
            line.push_str(&format!(", generated {}", at.to_rfc3339_opts(SecondsFormat::Secs, true)));
        }
        line
    }
}

/// The pair of mutually inverse scripts for one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationScripts {
    /// Current to target.
    pub up: String,
    /// Target back to current.
    pub down: String,
}

/// Generates up and down scripts for a diff.
#[derive(Debug)]
pub struct ScriptGenerator<D: ScriptDialect = SqlServerDialect> {
    dialect: D,
    options: GeneratorOptions,
}

impl Default for ScriptGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptGenerator {
    /// Creates a SQL Server generator with default options.
    #[must_use]
    pub fn new() -> Self {
        Self::with_dialect(SqlServerDialect::new())
    }
}

impl<D: ScriptDialect> ScriptGenerator<D> {
    /// Creates a generator for another dialect.
    #[must_use]
    pub fn with_dialect(dialect: D) -> Self {
        Self {
            dialect,
            options: GeneratorOptions::default(),
        }
    }

    /// Replaces the options.
    #[must_use]
    pub fn options(mut self, options: GeneratorOptions) -> Self {
        self.options = options;
        self
    }

    /// Returns the options in use.
    #[must_use]
    pub const fn get_options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Generates both scripts. `current` is the schema the up script
    /// starts from and the down script restores.
    #[must_use]
    pub fn generate(&self, diff: &SchemaDiff, current: &SchemaSnapshot, target: &SchemaSnapshot) -> MigrationScripts {
        MigrationScripts {
            up: self.generate_up(diff, current, target),
            down: self.generate_down(diff, current, target),
        }
    }

    /// Validates the diff against both snapshots, then generates.
    ///
    /// # Errors
    ///
    /// Returns the [`ModelError`](crate::error::ModelError) from
    /// [`SchemaDiff::validate`] when the diff does not fit the snapshots.
    pub fn generate_checked(
        &self,
        diff: &SchemaDiff,
        current: &SchemaSnapshot,
        target: &SchemaSnapshot,
    ) -> Result<MigrationScripts> {
        diff.validate(current, target)?;
        Ok(self.generate(diff, current, target))
    }

    /// Generates the up script.
    #[must_use]
    pub fn generate_up(&self, diff: &SchemaDiff, current: &SchemaSnapshot, target: &SchemaSnapshot) -> String {
        let input = PhaseInput::new(diff, current, target, &self.dialect, Direction::Up);
        self.run(&input, up::PHASES)
    }

    /// Generates the down script from the inverted diff.
    #[must_use]
    pub fn generate_down(&self, diff: &SchemaDiff, current: &SchemaSnapshot, target: &SchemaSnapshot) -> String {
        let inverted = diff.inverted(current);
        let input = PhaseInput::new(&inverted, target, current, &self.dialect, Direction::Down);
        self.run(&input, down::PHASES)
    }

    fn run(&self, input: &PhaseInput<'_>, phases: &[PhaseSpec]) -> String {
        let mut ctx = GenerationContext::new();
        let outputs: Vec<PhaseOutput> = phases
            .iter()
            .map(|phase| {
                let sql = (phase.run)(input, &mut ctx);
                debug!(
                    direction = input.direction.tag(),
                    phase = phase.number,
                    statements = sql.lines().count(),
                    "{}",
                    phase.title
                );
                PhaseOutput {
                    number: phase.number,
                    title: phase.title,
                    sql,
                }
            })
            .collect();
        let emitted = outputs.iter().filter(|p| !p.sql.trim().is_empty()).count();
        info!(
            direction = input.direction.tag(),
            dialect = self.dialect.name(),
            migration = %self.options.migration_name,
            phases = emitted,
            "script generated"
        );
        ScriptAssembler::new(
            self.dialect
                .script_header(&self.options.provenance_line(input.direction)),
        )
        .with_phase_comments(self.options.phase_comments)
        .assemble(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::diff::{ColumnChange, TableDiff};
    use crate::schema::{Column, Table};

    fn users(with_email: bool) -> SchemaSnapshot {
        let mut table = Table::new("Users")
            .column(Column::new("Id", "INT").primary_key())
            .column(Column::new("Name", "NVARCHAR(100)"));
        if with_email {
            table = table.column(Column::new("Email", "NVARCHAR(256)"));
        }
        SchemaSnapshot::new().table(table)
    }

    fn add_email() -> SchemaDiff {
        SchemaDiff::new().modify_table(TableDiff::new("Users").column(ColumnChange::Add {
            new: Column::new("Email", "NVARCHAR(256)").at_position(3),
        }))
    }

    #[test]
    fn test_header_and_phase_comment() {
        let generator = ScriptGenerator::new().options(
            GeneratorOptions::new()
                .with_migration_name("AddEmail")
                .with_provenance("sqlmirror test"),
        );
        let scripts = generator.generate(&add_email(), &users(false), &users(true));
        assert_eq!(
            scripts.up,
            "SET XACT_ABORT ON;\n-- sqlmirror test: up script for migration 'AddEmail'\n\n-- Phase 5: Column changes\nALTER TABLE [dbo].[Users] ADD [Email] NVARCHAR(256) NULL;"
        );
        assert!(scripts.down.starts_with("SET XACT_ABORT ON;\n-- sqlmirror test: down script"));
        assert!(scripts
            .down
            .ends_with("-- Phase 3: Reverse column changes\nALTER TABLE [dbo].[Users] DROP COLUMN [Email];"));
    }

    #[test]
    fn test_generated_at_is_rendered() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let generator = ScriptGenerator::new().options(GeneratorOptions::new().with_generated_at(at));
        let up = generator.generate_up(&add_email(), &users(false), &users(true));
        assert!(up.lines().nth(1).unwrap().ends_with(", generated 2024-05-01T12:00:00Z"));
    }

    #[test]
    fn test_generate_checked_rejects_bad_diff() {
        let diff = SchemaDiff::new().drop_table("Ghost");
        assert!(ScriptGenerator::new()
            .generate_checked(&diff, &users(false), &users(false))
            .is_err());
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: GeneratorOptions = serde_json::from_str(r#"{"migration_name": "m1"}"#).unwrap();
        assert_eq!(options.migration_name, "m1");
        assert!(options.phase_comments);
        assert!(options.generated_at.is_none());
        assert!(options.provenance.starts_with("sqlmirror "));
    }
}
