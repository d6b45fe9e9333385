//! Constraint ledger threaded through every phase of one script.
//!
//! The ledger remembers, per constraint, whether the script being built
//! has dropped it or (re)created it. Phases consult it before emitting
//! so a constraint is never dropped twice or created while live, and so
//! restoration only ever re-creates what the script itself took away.

use std::collections::BTreeMap;

use crate::schema::{key, Table};

/// Kind of a tracked constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ConstraintKind {
    /// Primary key (one per table).
    PrimaryKey,
    /// Foreign key.
    ForeignKey,
    /// Index.
    Index,
}

/// Case-insensitive identity of a constraint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConstraintKey {
    /// Kind of constraint.
    pub kind: ConstraintKind,
    /// Lowercase schema of the owning table.
    pub schema: String,
    /// Lowercase owning table.
    pub table: String,
    /// Lowercase constraint name; empty for primary keys.
    pub name: String,
}

impl ConstraintKey {
    /// Key of a table's primary key, whatever its name.
    #[must_use]
    pub fn primary_key(schema: &str, table: &str) -> Self {
        Self {
            kind: ConstraintKind::PrimaryKey,
            schema: key(schema),
            table: key(table),
            name: String::new(),
        }
    }

    /// Key of a foreign key constraint.
    #[must_use]
    pub fn foreign_key(schema: &str, table: &str, name: &str) -> Self {
        Self {
            kind: ConstraintKind::ForeignKey,
            schema: key(schema),
            table: key(table),
            name: key(name),
        }
    }

    /// Key of an index.
    #[must_use]
    pub fn index(schema: &str, table: &str, name: &str) -> Self {
        Self {
            kind: ConstraintKind::Index,
            schema: key(schema),
            table: key(table),
            name: key(name),
        }
    }
}

/// What the script has done to a constraint so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintState {
    /// Dropped and not re-created yet.
    Dropped,
    /// Created (or re-created) and live.
    Created,
}

/// Per-script generation state.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    ledger: BTreeMap<ConstraintKey, ConstraintState>,
}

impl GenerationContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a drop. Returns `false` if the constraint is already dropped.
    pub fn record_drop(&mut self, key: ConstraintKey) -> bool {
        self.ledger.insert(key, ConstraintState::Dropped) != Some(ConstraintState::Dropped)
    }

    /// Records a creation. Returns `false` if the constraint is already live.
    pub fn record_create(&mut self, key: ConstraintKey) -> bool {
        self.ledger.insert(key, ConstraintState::Created) != Some(ConstraintState::Created)
    }

    /// Records the implicit removal of everything a dropped table owned.
    pub fn record_table_dropped(&mut self, table: &Table) {
        if table.has_primary_key() {
            self.ledger.insert(
                ConstraintKey::primary_key(&table.schema, &table.name),
                ConstraintState::Dropped,
            );
        }
        for fk in table.foreign_keys() {
            self.ledger.insert(
                ConstraintKey::foreign_key(&table.schema, &table.name, &fk.name),
                ConstraintState::Dropped,
            );
        }
        for index in &table.indexes {
            self.ledger.insert(
                ConstraintKey::index(&table.schema, &table.name, &index.name),
                ConstraintState::Dropped,
            );
        }
    }

    /// Whether the script has dropped the constraint and not re-created it.
    #[must_use]
    pub fn is_dropped(&self, key: &ConstraintKey) -> bool {
        self.ledger.get(key) == Some(&ConstraintState::Dropped)
    }

    /// Whether the script has (re)created the constraint.
    #[must_use]
    pub fn is_created(&self, key: &ConstraintKey) -> bool {
        self.ledger.get(key) == Some(&ConstraintState::Created)
    }

    /// Every constraint of `kind` currently dropped, in key order.
    #[must_use]
    pub fn dropped_keys(&self, kind: ConstraintKind) -> Vec<ConstraintKey> {
        self.ledger
            .iter()
            .filter(|(k, state)| k.kind == kind && **state == ConstraintState::Dropped)
            .map(|(k, _)| k.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ForeignKey, Index};

    #[test]
    fn test_second_drop_is_noop() {
        let mut ctx = GenerationContext::new();
        let fk = ConstraintKey::foreign_key("dbo", "Orders", "FK_Orders_Users");
        assert!(ctx.record_drop(fk.clone()));
        assert!(!ctx.record_drop(ConstraintKey::foreign_key("DBO", "orders", "fk_orders_users")));
        assert!(ctx.is_dropped(&fk));
    }

    #[test]
    fn test_create_after_drop_then_duplicate_create() {
        let mut ctx = GenerationContext::new();
        let pk = ConstraintKey::primary_key("dbo", "Users");
        assert!(ctx.record_drop(pk.clone()));
        assert!(ctx.record_create(pk.clone()));
        assert!(!ctx.record_create(pk.clone()));
        assert!(ctx.is_created(&pk));
        assert!(!ctx.is_dropped(&pk));
    }

    #[test]
    fn test_record_table_dropped() {
        let table = Table::new("Orders")
            .column(Column::new("Id", "INT").primary_key())
            .column(Column::new("UserId", "INT").references(ForeignKey::new("FK_O_U", "Users", "Id")))
            .index(Index::new("IX_O_UserId", &["UserId"]));
        let mut ctx = GenerationContext::new();
        ctx.record_table_dropped(&table);
        assert!(ctx.is_dropped(&ConstraintKey::primary_key("dbo", "Orders")));
        assert_eq!(ctx.dropped_keys(ConstraintKind::ForeignKey).len(), 1);
        assert_eq!(ctx.dropped_keys(ConstraintKind::Index)[0].name, "ix_o_userid");
    }
}
