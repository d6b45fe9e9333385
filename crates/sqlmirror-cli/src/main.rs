//! sqlmirror CLI
//!
//! Generates paired up/down SQL scripts from a migration input document.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use sqlmirror_cli::{write_scripts, MigrationInput};
use sqlmirror_core::prelude::GeneratorOptions;

/// Mutually inverse migration scripts from a schema diff.
#[derive(Parser)]
#[command(name = "sqlmirror")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate the up and down scripts.
    Generate {
        /// Migration input document (JSON).
        #[arg(short, long, env = "SQLMIRROR_INPUT")]
        input: PathBuf,

        /// Directory the scripts are written to.
        #[arg(short, long, env = "SQLMIRROR_OUT_DIR", default_value = ".")]
        out_dir: PathBuf,

        /// Migration name (overrides the document's name).
        #[arg(short, long)]
        name: Option<String>,

        /// Print both scripts instead of writing files.
        #[arg(long)]
        stdout: bool,

        /// Stamp the provenance comment with the current time.
        #[arg(long)]
        timestamp: bool,

        /// Leave out the per-phase section comments.
        #[arg(long)]
        no_phase_comments: bool,
    },

    /// Validate a migration input document.
    Check {
        /// Migration input document (JSON).
        #[arg(short, long, env = "SQLMIRROR_INPUT")]
        input: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Generate {
            input,
            out_dir,
            name,
            stdout,
            timestamp,
            no_phase_comments,
        } => {
            let document = MigrationInput::load(&input)?;
            let name = name.unwrap_or_else(|| document.name_or("migration").to_string());

            let mut options = GeneratorOptions::new()
                .with_migration_name(name.clone())
                .with_phase_comments(!no_phase_comments);
            if timestamp {
                options = options.with_generated_at(Utc::now());
            }
            let scripts = document.generate(options)?;

            if stdout {
                println!("{}\n", scripts.up);
                println!("{}", scripts.down);
            } else {
                let (up, down) = write_scripts(&out_dir, &name, &scripts)?;
                info!("Wrote {} and {}", up.display(), down.display());
            }
        }

        Commands::Check { input } => {
            let document = MigrationInput::load(&input)?;
            document.validate()?;
            let mismatches = document.projection_mismatches();
            if mismatches.is_empty() {
                info!("Migration input is consistent.");
            } else {
                info!("{} table(s) differ from the target snapshot.", mismatches.len());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use sqlmirror_cli::CliError;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_generate_arguments() {
        let cli = Cli::try_parse_from(["sqlmirror", "generate", "--input", "m.json", "--stdout", "-v"]).unwrap();
        assert!(cli.verbose);
        let Commands::Generate { input, stdout, .. } = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(input, PathBuf::from("m.json"));
        assert!(stdout);
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let err = MigrationInput::load(std::path::Path::new("does/not/exist.json")).unwrap_err();
        assert!(matches!(err, CliError::Io { .. }));
    }
}
