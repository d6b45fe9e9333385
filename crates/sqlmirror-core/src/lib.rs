//! Mutually inverse migration scripts from a structural schema diff.
//!
//! `sqlmirror-core` turns a [`SchemaDiff`](diff::SchemaDiff) between two
//! schema snapshots into an "up" script that moves the current schema to
//! the target and a "down" script that restores the current schema
//! exactly. The engine must never reject an intermediate state, so the
//! interesting part is the ordering:
//!
//! - foreign keys are created `WITH NOCHECK` first, then re-created
//!   `WITH CHECK`, which breaks creation cycles and leaves them trusted;
//! - keys and indexes standing on a column that changes representation
//!   are dropped up front and restored once the column is stable;
//! - a table is never left without a data column;
//! - the down script rebuilds a table when its physical column order
//!   cannot be restored otherwise.
//!
//! Generation is pure and synchronous. Failed lookups skip the fragment
//! and log through `tracing`.
//!
//! # Architecture
//!
//! - **Schema** / **Diff** - immutable inputs
//! - **Projection** - "schema after diff" snapshots
//! - **Planner** - ALTER vs. DROP+ADD, last-column guard
//! - **Resolver** - foreign key grouping and restoration closure
//! - **Phases** - ordered up and down generators
//! - **Assembler** - final script text
//! - **Dialect** - single-statement rendering (SQL Server)
//!
//! # Example
//!
//! ```rust
//! use sqlmirror_core::prelude::*;
//!
//! let current = SchemaSnapshot::new().table(
//!     Table::new("Users")
//!         .column(Column::new("Id", "INT").primary_key())
//!         .column(Column::new("Name", "NVARCHAR(100)")),
//! );
//! let target = current.clone().table(
//!     Table::new("Users")
//!         .column(Column::new("Id", "INT").primary_key())
//!         .column(Column::new("Name", "NVARCHAR(100)"))
//!         .column(Column::new("Email", "NVARCHAR(256)")),
//! );
//! let diff = SchemaDiff::new().modify_table(TableDiff::new("Users").column(ColumnChange::Add {
//!     new: Column::new("Email", "NVARCHAR(256)").at_position(3),
//! }));
//!
//! let scripts = ScriptGenerator::new().generate(&diff, &current, &target);
//! assert!(scripts.up.contains("ALTER TABLE [dbo].[Users] ADD [Email] NVARCHAR(256) NULL;"));
//! assert!(scripts.down.contains("ALTER TABLE [dbo].[Users] DROP COLUMN [Email];"));
//! ```

pub mod assembler;
pub mod context;
pub mod dialect;
pub mod diff;
pub mod error;
pub mod generator;
pub mod naming;
pub mod phases;
pub mod planner;
pub mod projection;
pub mod resolver;
pub mod schema;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::assembler::{PhaseOutput, ScriptAssembler};
    pub use crate::context::{ConstraintKey, ConstraintKind, GenerationContext};
    pub use crate::dialect::{ColumnReorder, ScriptDialect, SqlServerDialect};
    pub use crate::diff::{
        ChangeType, ColumnChange, ForeignKeyChange, IndexChange, ProcedureChange, SchemaDiff,
        SequenceChange, TableDiff,
    };
    pub use crate::error::{ModelError, Result};
    pub use crate::generator::{GeneratorOptions, MigrationScripts, ScriptGenerator};
    pub use crate::naming::deterministic_suffix;
    pub use crate::planner::{classify, plan_table, ColumnAction, ColumnImpact, ColumnPlan, ColumnStep};
    pub use crate::projection::project_schema_after_diff;
    pub use crate::resolver::{
        compute_foreign_key_group, compute_restoration_closure, group_foreign_keys, ForeignKeyGroup,
    };
    pub use crate::schema::{
        Column, ForeignKey, ForeignKeyAction, Index, Procedure, SchemaSnapshot, Sequence, Table,
        DEFAULT_SCHEMA,
    };
}
