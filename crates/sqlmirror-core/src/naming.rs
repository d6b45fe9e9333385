//! Deterministic names for synthetic objects.

use sha2::{Digest, Sha256};

/// Length of the suffix returned by [`deterministic_suffix`].
pub const SUFFIX_LEN: usize = 8;

/// Prefix of the staging table used by a column reorder.
pub const REORDER_TABLE_PREFIX: &str = "tmp_ms_xx_";

/// Stable short token for a (schema, table, constraint, phase) tuple.
///
/// Inputs are case-folded, so names that the engine treats as equal
/// produce the same token. Different phases produce different tokens for
/// the same constraint.
#[must_use]
pub fn deterministic_suffix(schema: &str, table: &str, constraint: &str, phase_tag: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}",
            schema.to_lowercase(),
            table.to_lowercase(),
            constraint.to_lowercase(),
            phase_tag
        )
        .as_bytes(),
    );
    let hash = format!("{:x}", hasher.finalize());
    hash[..SUFFIX_LEN].to_string()
}

/// Temporary column name used while a column is rebuilt in place.
#[must_use]
pub fn temp_column_name(column: &str, suffix: &str) -> String {
    format!("{column}_tmp_{suffix}")
}

/// Staging table name used while a table's columns are reordered.
#[must_use]
pub fn reorder_table_name(table: &str) -> String {
    format!("{REORDER_TABLE_PREFIX}{table}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffix_is_stable_and_short() {
        let a = deterministic_suffix("dbo", "Users", "PK_Users", "up-pk");
        let b = deterministic_suffix("dbo", "Users", "PK_Users", "up-pk");
        assert_eq!(a, b);
        assert_eq!(a.len(), SUFFIX_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_suffix_ignores_case() {
        assert_eq!(
            deterministic_suffix("DBO", "users", "pk_users", "down-pk"),
            deterministic_suffix("dbo", "Users", "PK_Users", "down-pk")
        );
    }

    #[test]
    fn test_suffix_differs_per_phase() {
        assert_ne!(
            deterministic_suffix("dbo", "Users", "PK_Users", "up-pk"),
            deterministic_suffix("dbo", "Users", "PK_Users", "down-pk")
        );
    }

    #[test]
    fn test_synthetic_names() {
        assert_eq!(temp_column_name("Id", "abcd1234"), "Id_tmp_abcd1234");
        assert_eq!(reorder_table_name("Orders"), "tmp_ms_xx_Orders");
    }
}
