//! Error types for snapshot and diff construction.
//!
//! Script generation itself never fails: lookups that miss inside a
//! phase generator skip the fragment and log a diagnostic. These errors
//! only surface while building or validating the immutable inputs.

/// Errors raised while constructing or validating schema inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Two columns of one table share a (case-insensitive) name.
    #[error("Duplicate column '{column}' in table '{table}'")]
    DuplicateColumn {
        /// Owning table.
        table: String,
        /// Column name.
        column: String,
    },

    /// Column ordinal positions are not 1-based and contiguous.
    #[error("Table '{table}' has column '{column}' at position {found}, expected {expected}")]
    InvalidOrdinal {
        /// Owning table.
        table: String,
        /// Offending column.
        column: String,
        /// Position the column should have.
        expected: usize,
        /// Position the column declares.
        found: usize,
    },

    /// Two tables of one snapshot share a name.
    #[error("Duplicate table '{0}' in snapshot")]
    DuplicateTable(String),

    /// Two sequences of one snapshot share a name.
    #[error("Duplicate sequence '{0}' in snapshot")]
    DuplicateSequence(String),

    /// Two procedures of one snapshot share a name.
    #[error("Duplicate procedure '{0}' in snapshot")]
    DuplicateProcedure(String),

    /// A diff entry names a table that the required snapshot lacks.
    #[error("Table '{table}' is not present in the {snapshot} snapshot")]
    UnknownTable {
        /// Table name.
        table: String,
        /// Which snapshot ("current" or "target").
        snapshot: &'static str,
    },

    /// A column change names a column that the required snapshot lacks.
    #[error("Column '{column}' of '{table}' is not present in the {snapshot} snapshot")]
    UnknownColumn {
        /// Owning table.
        table: String,
        /// Column name.
        column: String,
        /// Which snapshot ("current" or "target").
        snapshot: &'static str,
    },

    /// A Modify/Rebuild entry pairs columns with different names.
    #[error("Column change in '{table}' pairs '{old}' with '{new}'")]
    MismatchedColumnChange {
        /// Owning table.
        table: String,
        /// Old column name.
        old: String,
        /// New column name.
        new: String,
    },

    /// The same object appears in conflicting diff lists.
    #[error("Conflicting diff entries: {0}")]
    Conflict(String),

    /// Multiple errors occurred.
    #[error("Multiple errors occurred:\n{}", .0.iter().map(|e| format!("  - {}", e)).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<ModelError>),
}

/// Result type for model construction.
pub type Result<T> = std::result::Result<T, ModelError>;
