//! Schema snapshot types.
//!
//! A [`SchemaSnapshot`] is an immutable point-in-time description of a
//! database's tables, sequences, and procedures. Everything is keyed by
//! lowercase name so lookups are case-insensitive, the way the target
//! engine resolves identifiers. A "schema after N" view is always a new
//! snapshot built from parts (see [`crate::projection`]), never an edit
//! of an existing one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};

/// Schema used when an input omits one.
pub const DEFAULT_SCHEMA: &str = "dbo";

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

const fn default_true() -> bool {
    true
}

/// Lowercase lookup key for tables, columns, sequences, and procedures.
#[must_use]
pub fn key(name: &str) -> String {
    name.to_lowercase()
}

/// Whether two identifiers name the same object under [`key`] folding.
#[must_use]
pub fn same_name(a: &str, b: &str) -> bool {
    a == b || key(a) == key(b)
}

/// Normalizes a type string for comparison (`nvarchar ( 50 )` == `NVARCHAR(50)`).
#[must_use]
pub fn normalize_type(sql_type: &str) -> String {
    sql_type
        .split_whitespace()
        .collect::<String>()
        .to_ascii_uppercase()
}

/// Foreign key action (ON DELETE, ON UPDATE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ForeignKeyAction {
    /// No action (error if referenced row is deleted/updated).
    #[default]
    NoAction,
    /// Cascade the delete/update to referencing rows.
    Cascade,
    /// Set the foreign key column to NULL.
    SetNull,
    /// Set the foreign key column to its default value.
    SetDefault,
}

impl ForeignKeyAction {
    /// Returns the SQL representation of this action.
    #[must_use]
    pub const fn to_sql(self) -> &'static str {
        match self {
            Self::NoAction => "NO ACTION",
            Self::Cascade => "CASCADE",
            Self::SetNull => "SET NULL",
            Self::SetDefault => "SET DEFAULT",
        }
    }
}

/// One column component of a foreign key constraint.
///
/// Entries sharing `(name, table)` are the components of a single
/// composite constraint; see [`crate::resolver::group_foreign_keys`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Constraint name.
    pub name: String,
    /// Schema of the owning table.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Owning (referencing) table. Filled in when the column is placed in a table.
    #[serde(default)]
    pub table: String,
    /// Owning (referencing) column. Filled in when the column is placed in a table.
    #[serde(default)]
    pub column: String,
    /// Schema of the referenced table.
    #[serde(default = "default_schema")]
    pub ref_schema: String,
    /// Referenced table.
    pub ref_table: String,
    /// Referenced column.
    pub ref_column: String,
    /// ON DELETE action.
    #[serde(default)]
    pub delete_action: ForeignKeyAction,
    /// ON UPDATE action.
    #[serde(default)]
    pub update_action: ForeignKeyAction,
    /// The constraint exists but is disabled (not trusted).
    #[serde(default)]
    pub not_enforced: bool,
    /// The constraint is declared NOT FOR REPLICATION.
    #[serde(default)]
    pub not_for_replication: bool,
}

impl ForeignKey {
    /// Creates a foreign key component referencing `ref_table.ref_column`.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        ref_table: impl Into<String>,
        ref_column: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            schema: default_schema(),
            table: String::new(),
            column: String::new(),
            ref_schema: default_schema(),
            ref_table: ref_table.into(),
            ref_column: ref_column.into(),
            delete_action: ForeignKeyAction::NoAction,
            update_action: ForeignKeyAction::NoAction,
            not_enforced: false,
            not_for_replication: false,
        }
    }

    /// Sets the owning schema, table, and column.
    #[must_use]
    pub fn owned_by(
        mut self,
        schema: impl Into<String>,
        table: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.schema = schema.into();
        self.table = table.into();
        self.column = column.into();
        self
    }

    /// Sets the referenced schema.
    #[must_use]
    pub fn ref_schema(mut self, schema: impl Into<String>) -> Self {
        self.ref_schema = schema.into();
        self
    }

    /// Sets the ON DELETE action.
    #[must_use]
    pub const fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.delete_action = action;
        self
    }

    /// Sets the ON UPDATE action.
    #[must_use]
    pub const fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.update_action = action;
        self
    }

    /// Marks the constraint as disabled.
    #[must_use]
    pub const fn not_enforced(mut self) -> Self {
        self.not_enforced = true;
        self
    }

    /// Marks the constraint NOT FOR REPLICATION.
    #[must_use]
    pub const fn not_for_replication(mut self) -> Self {
        self.not_for_replication = true;
        self
    }

    /// Whether two components belong to the same named constraint.
    #[must_use]
    pub fn same_constraint(&self, other: &Self) -> bool {
        same_name(&self.name, &other.name) && same_name(&self.table, &other.table)
    }
}

/// Schema definition for a column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Engine type text, e.g. `INT` or `NVARCHAR(100)`. Ignored for computed columns.
    #[serde(default)]
    pub sql_type: String,
    /// Whether the column allows NULL values.
    #[serde(default = "default_true")]
    pub nullable: bool,
    /// Whether the column is an IDENTITY column.
    #[serde(default)]
    pub is_identity: bool,
    /// Whether the column is computed.
    #[serde(default)]
    pub is_computed: bool,
    /// Expression of a computed column.
    #[serde(default)]
    pub computed_expression: Option<String>,
    /// Whether the column is a member of the table's primary key.
    #[serde(default)]
    pub is_primary_key: bool,
    /// 1-based position within the table. Zero means "assign from list order".
    #[serde(default)]
    pub ordinal_position: usize,
    /// Foreign key components owned by this column.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
}

impl Column {
    /// Creates a nullable column.
    #[must_use]
    pub fn new(name: impl Into<String>, sql_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql_type: sql_type.into(),
            nullable: true,
            is_identity: false,
            is_computed: false,
            computed_expression: None,
            is_primary_key: false,
            ordinal_position: 0,
            foreign_keys: Vec::new(),
        }
    }

    /// Creates a computed column.
    #[must_use]
    pub fn computed(name: impl Into<String>, expression: impl Into<String>) -> Self {
        let mut column = Self::new(name, "");
        column.is_computed = true;
        column.computed_expression = Some(expression.into());
        column
    }

    /// Sets the column as NOT NULL.
    #[must_use]
    pub const fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Sets the column as nullable.
    #[must_use]
    pub const fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Sets the column as an IDENTITY column.
    #[must_use]
    pub const fn identity(mut self) -> Self {
        self.is_identity = true;
        self.nullable = false;
        self
    }

    /// Sets the column as a primary key member.
    #[must_use]
    pub const fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.nullable = false;
        self
    }

    /// Sets an explicit ordinal position.
    #[must_use]
    pub const fn at_position(mut self, position: usize) -> Self {
        self.ordinal_position = position;
        self
    }

    /// Adds a foreign key component owned by this column.
    #[must_use]
    pub fn references(mut self, foreign_key: ForeignKey) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Whether the column stores data (i.e. is not computed).
    #[must_use]
    pub const fn is_data_column(&self) -> bool {
        !self.is_computed
    }

    /// Lowercase lookup key.
    #[must_use]
    pub fn key(&self) -> String {
        key(&self.name)
    }

    /// Compares the stored representation of two columns, ignoring name
    /// case, ordinal position, key membership, and owned foreign keys.
    #[must_use]
    pub fn same_definition(&self, other: &Self) -> bool {
        if self.is_computed || other.is_computed {
            return self.is_computed == other.is_computed
                && self.computed_expression == other.computed_expression;
        }
        normalize_type(&self.sql_type) == normalize_type(&other.sql_type)
            && self.nullable == other.nullable
            && self.is_identity == other.is_identity
    }
}

/// Schema definition for an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Index {
    /// Index name.
    pub name: String,
    /// Columns included in the index, in key order.
    pub columns: Vec<String>,
    /// Whether this is a unique index.
    #[serde(default)]
    pub is_unique: bool,
    /// Whether this is the clustered index.
    #[serde(default)]
    pub is_clustered: bool,
}

impl Index {
    /// Creates a non-unique, non-clustered index.
    #[must_use]
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
            is_unique: false,
            is_clustered: false,
        }
    }

    /// Sets the index as unique.
    #[must_use]
    pub const fn unique(mut self) -> Self {
        self.is_unique = true;
        self
    }

    /// Sets the index as clustered.
    #[must_use]
    pub const fn clustered(mut self) -> Self {
        self.is_clustered = true;
        self
    }

    /// Whether the index covers `column` (case-insensitive).
    #[must_use]
    pub fn covers(&self, column: &str) -> bool {
        self.columns.iter().any(|c| same_name(c, column))
    }
}

/// Complete schema definition for a table.
///
/// Columns are stored by lowercase name; iteration in physical order
/// goes through [`Table::ordered_columns`]. Ordinal positions are
/// 1-based and contiguous, which the constructors enforce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTable", into = "RawTable")]
pub struct Table {
    /// Table name.
    pub name: String,
    /// Owning schema.
    pub schema: String,
    columns: BTreeMap<String, Column>,
    /// Index definitions (the primary key is not listed here).
    pub indexes: Vec<Index>,
    /// Explicit primary key constraint name, if known.
    pub primary_key_name: Option<String>,
}

impl Table {
    /// Creates an empty table in the default schema.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: default_schema(),
            columns: BTreeMap::new(),
            indexes: Vec::new(),
            primary_key_name: None,
        }
    }

    /// Builds a table from columns carrying explicit ordinals.
    ///
    /// Columns whose ordinal is zero are numbered from list order. The
    /// resulting positions must be exactly `1..=n`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateColumn`] when two columns share a
    /// name and [`ModelError::InvalidOrdinal`] when the positions have gaps
    /// or repeats.
    pub fn from_columns(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: Vec<Column>,
        indexes: Vec<Index>,
        primary_key_name: Option<String>,
    ) -> Result<Self> {
        let mut table = Self {
            name: name.into(),
            schema: schema.into(),
            columns: BTreeMap::new(),
            indexes,
            primary_key_name,
        };
        let assign = columns.iter().all(|c| c.ordinal_position == 0);
        for (idx, mut column) in columns.into_iter().enumerate() {
            if assign {
                column.ordinal_position = idx + 1;
            }
            table.insert_column(column)?;
        }
        table.check_ordinals()?;
        Ok(table)
    }

    /// Sets the owning schema.
    #[must_use]
    pub fn in_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        let schema = self.schema.clone();
        for column in self.columns.values_mut() {
            for fk in &mut column.foreign_keys {
                fk.schema.clone_from(&schema);
            }
        }
        self
    }

    /// Appends a column at the next ordinal position.
    ///
    /// A column with the same name replaces the existing one in place.
    /// Use [`Table::from_columns`] for untrusted input.
    #[must_use]
    pub fn column(mut self, mut column: Column) -> Self {
        column.ordinal_position = self
            .get_column(&column.name)
            .map_or(self.columns.len() + 1, |existing| existing.ordinal_position);
        self.columns.remove(&column.key());
        let _ = self.insert_column(column);
        self
    }

    /// Adds an index.
    #[must_use]
    pub fn index(mut self, index: Index) -> Self {
        self.indexes.push(index);
        self
    }

    /// Sets the primary key constraint name.
    #[must_use]
    pub fn primary_key_name(mut self, name: impl Into<String>) -> Self {
        self.primary_key_name = Some(name.into());
        self
    }

    fn insert_column(&mut self, mut column: Column) -> Result<()> {
        let column_key = column.key();
        if self.columns.contains_key(&column_key) {
            return Err(ModelError::DuplicateColumn {
                table: self.name.clone(),
                column: column.name,
            });
        }
        for fk in &mut column.foreign_keys {
            fk.schema.clone_from(&self.schema);
            fk.table.clone_from(&self.name);
            fk.column.clone_from(&column.name);
        }
        self.columns.insert(column_key, column);
        Ok(())
    }

    fn check_ordinals(&self) -> Result<()> {
        for (idx, column) in self.ordered_columns().into_iter().enumerate() {
            if column.ordinal_position != idx + 1 {
                return Err(ModelError::InvalidOrdinal {
                    table: self.name.clone(),
                    column: column.name.clone(),
                    expected: idx + 1,
                    found: column.ordinal_position,
                });
            }
        }
        Ok(())
    }

    /// Lowercase lookup key.
    #[must_use]
    pub fn key(&self) -> String {
        key(&self.name)
    }

    /// Gets a column by name (case-insensitive).
    #[must_use]
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.get(&key(name))
    }

    /// Number of columns.
    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Columns in ordinal order.
    #[must_use]
    pub fn ordered_columns(&self) -> Vec<&Column> {
        let mut columns: Vec<&Column> = self.columns.values().collect();
        columns.sort_by(|a, b| {
            a.ordinal_position
                .cmp(&b.ordinal_position)
                .then_with(|| a.key().cmp(&b.key()))
        });
        columns
    }

    /// Lowercase column names in ordinal order.
    #[must_use]
    pub fn column_order(&self) -> Vec<String> {
        self.ordered_columns().iter().map(|c| c.key()).collect()
    }

    /// Number of non-computed columns.
    #[must_use]
    pub fn data_column_count(&self) -> usize {
        self.columns.values().filter(|c| c.is_data_column()).count()
    }

    /// Primary key columns in ordinal order.
    #[must_use]
    pub fn primary_key_columns(&self) -> Vec<&Column> {
        self.ordered_columns()
            .into_iter()
            .filter(|c| c.is_primary_key)
            .collect()
    }

    /// Lowercase names of the primary key columns.
    #[must_use]
    pub fn primary_key_set(&self) -> BTreeSet<String> {
        self.primary_key_columns().iter().map(|c| c.key()).collect()
    }

    /// Whether the table has a primary key.
    #[must_use]
    pub fn has_primary_key(&self) -> bool {
        self.columns.values().any(|c| c.is_primary_key)
    }

    /// Primary key constraint name, explicit or conventional.
    #[must_use]
    pub fn primary_key_constraint_name(&self) -> String {
        self.primary_key_name
            .clone()
            .unwrap_or_else(|| format!("PK_{}", self.name))
    }

    /// All foreign key components owned by this table, in column order.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.ordered_columns()
            .into_iter()
            .flat_map(|c| c.foreign_keys.iter())
    }

    /// Gets an index by name (case-insensitive).
    #[must_use]
    pub fn get_index(&self, name: &str) -> Option<&Index> {
        self.indexes
            .iter()
            .find(|i| same_name(&i.name, name))
    }

    /// Compares structure: column order and definitions, key membership,
    /// foreign keys, and indexes. Index order and name case are ignored.
    #[must_use]
    pub fn same_structure(&self, other: &Self) -> bool {
        fn fk_signature(fk: &ForeignKey) -> (String, String, String, String, String) {
            (
                key(&fk.name),
                key(&fk.column),
                key(&fk.ref_table),
                key(&fk.ref_column),
                format!(
                    "{:?}/{:?}/{}/{}",
                    fk.delete_action, fk.update_action, fk.not_enforced, fk.not_for_replication
                ),
            )
        }
        fn index_signature(index: &Index) -> (String, Vec<String>, bool, bool) {
            (
                key(&index.name),
                index.columns.iter().map(|c| key(c)).collect(),
                index.is_unique,
                index.is_clustered,
            )
        }

        if !same_name(&self.name, &other.name) || self.column_order() != other.column_order() {
            return false;
        }
        let columns_match = self.ordered_columns().iter().zip(other.ordered_columns()).all(|(a, b)| {
            a.same_definition(b) && a.is_primary_key == b.is_primary_key
        });
        let mut fks: Vec<_> = self.foreign_keys().map(fk_signature).collect();
        let mut other_fks: Vec<_> = other.foreign_keys().map(fk_signature).collect();
        fks.sort();
        other_fks.sort();
        let mut indexes: Vec<_> = self.indexes.iter().map(index_signature).collect();
        let mut other_indexes: Vec<_> = other.indexes.iter().map(index_signature).collect();
        indexes.sort();
        other_indexes.sort();
        columns_match && fks == other_fks && indexes == other_indexes
    }

    /// Returns a copy whose ordinal positions follow `order`.
    ///
    /// Columns missing from `order` keep their relative order after the
    /// listed ones.
    #[must_use]
    pub fn reordered(&self, order: &[String]) -> Self {
        let mut columns: Vec<Column> = order
            .iter()
            .filter_map(|name| self.get_column(name).cloned())
            .collect();
        for column in self.ordered_columns() {
            if !order.iter().any(|o| same_name(o, &column.name)) {
                columns.push(column.clone());
            }
        }
        let mut table = Self {
            columns: BTreeMap::new(),
            ..self.clone()
        };
        for (idx, mut column) in columns.into_iter().enumerate() {
            column.ordinal_position = idx + 1;
            table.columns.insert(column.key(), column);
        }
        table
    }
}

#[derive(Serialize, Deserialize)]
struct RawTable {
    name: String,
    #[serde(default = "default_schema")]
    schema: String,
    #[serde(default)]
    columns: Vec<Column>,
    #[serde(default)]
    indexes: Vec<Index>,
    #[serde(default)]
    primary_key_name: Option<String>,
}

impl TryFrom<RawTable> for Table {
    type Error = ModelError;

    fn try_from(raw: RawTable) -> Result<Self> {
        Self::from_columns(
            raw.schema,
            raw.name,
            raw.columns,
            raw.indexes,
            raw.primary_key_name,
        )
    }
}

impl From<Table> for RawTable {
    fn from(table: Table) -> Self {
        let columns = table.ordered_columns().into_iter().cloned().collect();
        Self {
            name: table.name,
            schema: table.schema,
            columns,
            indexes: table.indexes,
            primary_key_name: table.primary_key_name,
        }
    }
}

/// Schema definition for a sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sequence {
    /// Sequence name.
    pub name: String,
    /// Owning schema.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Value type.
    #[serde(default = "Sequence::default_type")]
    pub data_type: String,
    /// START WITH value.
    #[serde(default = "Sequence::default_one")]
    pub start_value: i64,
    /// INCREMENT BY value.
    #[serde(default = "Sequence::default_one")]
    pub increment: i64,
    /// MINVALUE, if bounded.
    #[serde(default)]
    pub min_value: Option<i64>,
    /// MAXVALUE, if bounded.
    #[serde(default)]
    pub max_value: Option<i64>,
    /// Whether the sequence cycles.
    #[serde(default)]
    pub cycle: bool,
}

impl Sequence {
    fn default_type() -> String {
        "BIGINT".to_string()
    }

    const fn default_one() -> i64 {
        1
    }

    /// Creates a BIGINT sequence starting at 1, incrementing by 1.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: default_schema(),
            data_type: Self::default_type(),
            start_value: 1,
            increment: 1,
            min_value: None,
            max_value: None,
            cycle: false,
        }
    }

    /// Sets the start value.
    #[must_use]
    pub const fn start_with(mut self, value: i64) -> Self {
        self.start_value = value;
        self
    }

    /// Sets the increment.
    #[must_use]
    pub const fn increment_by(mut self, value: i64) -> Self {
        self.increment = value;
        self
    }
}

/// Schema definition for a stored procedure.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Procedure {
    /// Procedure name.
    pub name: String,
    /// Owning schema.
    #[serde(default = "default_schema")]
    pub schema: String,
    /// Full `CREATE PROCEDURE ...` text.
    pub definition: String,
}

impl Procedure {
    /// Creates a procedure in the default schema.
    #[must_use]
    pub fn new(name: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: default_schema(),
            definition: definition.into(),
        }
    }
}

/// An immutable snapshot of a database schema.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSnapshot", into = "RawSnapshot")]
pub struct SchemaSnapshot {
    tables: BTreeMap<String, Table>,
    sequences: BTreeMap<String, Sequence>,
    procedures: BTreeMap<String, Procedure>,
}

impl SchemaSnapshot {
    /// Creates an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from parts, rejecting duplicate names.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::DuplicateTable`], [`ModelError::DuplicateSequence`]
    /// or [`ModelError::DuplicateProcedure`] for a repeated name.
    pub fn from_parts(
        tables: impl IntoIterator<Item = Table>,
        sequences: impl IntoIterator<Item = Sequence>,
        procedures: impl IntoIterator<Item = Procedure>,
    ) -> Result<Self> {
        let mut snapshot = Self::new();
        for table in tables {
            if snapshot.tables.insert(table.key(), table.clone()).is_some() {
                return Err(ModelError::DuplicateTable(table.name));
            }
        }
        for sequence in sequences {
            if snapshot
                .sequences
                .insert(key(&sequence.name), sequence.clone())
                .is_some()
            {
                return Err(ModelError::DuplicateSequence(sequence.name));
            }
        }
        for procedure in procedures {
            if snapshot
                .procedures
                .insert(key(&procedure.name), procedure.clone())
                .is_some()
            {
                return Err(ModelError::DuplicateProcedure(procedure.name));
            }
        }
        Ok(snapshot)
    }

    /// Adds (or replaces) a table.
    #[must_use]
    pub fn table(mut self, table: Table) -> Self {
        self.tables.insert(table.key(), table);
        self
    }

    /// Adds (or replaces) a sequence.
    #[must_use]
    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.sequences.insert(key(&sequence.name), sequence);
        self
    }

    /// Adds (or replaces) a procedure.
    #[must_use]
    pub fn procedure(mut self, procedure: Procedure) -> Self {
        self.procedures.insert(key(&procedure.name), procedure);
        self
    }

    /// Gets a table by name (case-insensitive).
    #[must_use]
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(&key(name))
    }

    /// Gets a sequence by name (case-insensitive).
    #[must_use]
    pub fn get_sequence(&self, name: &str) -> Option<&Sequence> {
        self.sequences.get(&key(name))
    }

    /// Gets a procedure by name (case-insensitive).
    #[must_use]
    pub fn get_procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.get(&key(name))
    }

    /// Tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    /// Sequences in name order.
    pub fn sequences(&self) -> impl Iterator<Item = &Sequence> {
        self.sequences.values()
    }

    /// Procedures in name order.
    pub fn procedures(&self) -> impl Iterator<Item = &Procedure> {
        self.procedures.values()
    }

    /// Whether `table.column` exists in this snapshot.
    #[must_use]
    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.get_table(table)
            .is_some_and(|t| t.get_column(column).is_some())
    }

    /// All foreign key components across all tables, ordered by table then column.
    pub fn foreign_keys(&self) -> impl Iterator<Item = &ForeignKey> {
        self.tables.values().flat_map(Table::foreign_keys)
    }

    /// Foreign key components (in any table) that reference `table`.
    pub fn foreign_keys_referencing<'a>(
        &'a self,
        table: &'a str,
    ) -> impl Iterator<Item = &'a ForeignKey> + 'a {
        self.foreign_keys()
            .filter(move |fk| same_name(&fk.ref_table, table))
    }
}

#[derive(Serialize, Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    tables: Vec<Table>,
    #[serde(default)]
    sequences: Vec<Sequence>,
    #[serde(default)]
    procedures: Vec<Procedure>,
}

impl TryFrom<RawSnapshot> for SchemaSnapshot {
    type Error = ModelError;

    fn try_from(raw: RawSnapshot) -> Result<Self> {
        Self::from_parts(raw.tables, raw.sequences, raw.procedures)
    }
}

impl From<SchemaSnapshot> for RawSnapshot {
    fn from(snapshot: SchemaSnapshot) -> Self {
        Self {
            tables: snapshot.tables.into_values().collect(),
            sequences: snapshot.sequences.into_values().collect(),
            procedures: snapshot.procedures.into_values().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> Table {
        Table::new("Users")
            .column(Column::new("Id", "INT").primary_key())
            .column(Column::new("Name", "NVARCHAR(100)").not_null())
            .column(Column::new("Email", "NVARCHAR(256)"))
    }

    #[test]
    fn test_table_builder_assigns_ordinals() {
        let table = users();
        let order: Vec<usize> = table
            .ordered_columns()
            .iter()
            .map(|c| c.ordinal_position)
            .collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(table.column_order(), vec!["id", "name", "email"]);
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let table = users();
        assert!(table.get_column("EMAIL").is_some());
        assert!(table.get_column("missing").is_none());
    }

    #[test]
    fn test_same_name_folds_non_ascii() {
        assert!(same_name("ÄRENDE", "ärende"));
        assert!(same_name("Straße", "STRAßE"));
        assert!(!same_name("Id", "Ids"));
        let index = Index::new("IX_Ärende", &["Ärende"]);
        assert!(index.covers("ÄRENDE"));
    }

    #[test]
    fn test_from_columns_rejects_gap_in_ordinals() {
        let err = Table::from_columns(
            "dbo",
            "T",
            vec![
                Column::new("a", "INT").at_position(1),
                Column::new("b", "INT").at_position(3),
            ],
            vec![],
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidOrdinal {
                expected: 2,
                found: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_from_columns_rejects_duplicate_column() {
        let err = Table::from_columns(
            "dbo",
            "T",
            vec![Column::new("a", "INT"), Column::new("A", "INT")],
            vec![],
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateColumn { .. }));
    }

    #[test]
    fn test_foreign_keys_are_owned_by_their_column() {
        let orders = Table::new("Orders")
            .in_schema("sales")
            .column(Column::new("Id", "INT").primary_key())
            .column(
                Column::new("UserId", "INT").references(ForeignKey::new("FK_Orders_Users", "Users", "Id")),
            );
        let fk = orders.foreign_keys().next().unwrap();
        assert_eq!(fk.table, "Orders");
        assert_eq!(fk.column, "UserId");
        assert_eq!(fk.schema, "sales");
    }

    #[test]
    fn test_primary_key_helpers() {
        let table = users();
        assert!(table.has_primary_key());
        assert_eq!(table.primary_key_constraint_name(), "PK_Users");
        assert_eq!(
            table.primary_key_set().into_iter().collect::<Vec<_>>(),
            vec!["id".to_string()]
        );
        assert_eq!(table.data_column_count(), 3);
    }

    #[test]
    fn test_same_definition_ignores_case_and_spacing() {
        let a = Column::new("Name", "nvarchar ( 100 )");
        let b = Column::new("name", "NVARCHAR(100)").at_position(7);
        assert!(a.same_definition(&b));
        assert!(!a.same_definition(&b.clone().not_null()));
        assert!(!a.same_definition(&Column::computed("Name", "[a]+[b]")));
    }

    #[test]
    fn test_reordered_renumbers_columns() {
        let table = users().reordered(&["email".to_string(), "id".to_string()]);
        assert_eq!(table.column_order(), vec!["email", "id", "name"]);
        assert_eq!(table.get_column("name").unwrap().ordinal_position, 3);
    }

    #[test]
    fn test_same_structure_ignores_index_order() {
        let a = users()
            .index(Index::new("IX_A", &["Name"]))
            .index(Index::new("IX_B", &["Email"]));
        let b = users()
            .index(Index::new("ix_b", &["email"]))
            .index(Index::new("IX_A", &["Name"]));
        assert!(a.same_structure(&b));
        assert!(!a.same_structure(&users()));
        assert!(!users().same_structure(&users().reordered(&["name".to_string()])));
    }

    #[test]
    fn test_snapshot_deserializes_from_lists() {
        let json = r#"{
            "tables": [
                {"name": "Users", "columns": [
                    {"name": "Id", "sql_type": "INT", "nullable": false, "is_primary_key": true},
                    {"name": "Name", "sql_type": "NVARCHAR(50)"}
                ]}
            ],
            "sequences": [{"name": "OrderNumbers"}]
        }"#;
        let snapshot: SchemaSnapshot = serde_json::from_str(json).unwrap();
        let table = snapshot.get_table("users").unwrap();
        assert_eq!(table.schema, "dbo");
        assert_eq!(table.get_column("name").unwrap().ordinal_position, 2);
        assert_eq!(snapshot.get_sequence("ORDERNUMBERS").unwrap().start_value, 1);
    }

    #[test]
    fn test_snapshot_rejects_duplicate_tables() {
        let err = SchemaSnapshot::from_parts(
            vec![Table::new("A"), Table::new("a")],
            vec![],
            vec![],
        )
        .unwrap_err();
        assert_eq!(err, ModelError::DuplicateTable("a".to_string()));
    }

    #[test]
    fn test_foreign_keys_referencing() {
        let snapshot = SchemaSnapshot::new().table(users()).table(
            Table::new("Orders")
                .column(Column::new("Id", "INT").primary_key())
                .column(Column::new("UserId", "INT").references(ForeignKey::new("FK_O_U", "users", "Id"))),
        );
        let refs: Vec<_> = snapshot.foreign_keys_referencing("Users").collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].table, "Orders");
    }
}
