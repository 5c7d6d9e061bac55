//! Cache key shapes.
//!
//! `CacheKey` can only be built through its constructors, so every key the
//! proxy touches carries the table it belongs to and one of four shapes:
//!
//! - table entry: `entity:<table>:v<version>:<site>:<signature>`
//! - row entry: `entity:<table>:row:<id>`
//! - version tag: `entity:<table>:version`
//! - row-id index: `entity:<table>:rowid:<site>:<signature>`

use std::fmt;
use vernier_core::RowId;

const NAMESPACE: &str = "entity";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    table: String,
    shape: KeyShape,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyShape {
    Table {
        version: u64,
        site: String,
        signature: String,
    },
    Row(RowId),
    Version,
    RowIdIndex {
        site: String,
        signature: String,
    },
}

impl CacheKey {
    pub fn table(table: &str, version: u64, site: &str, signature: &str) -> Self {
        Self {
            table: table.to_string(),
            shape: KeyShape::Table {
                version,
                site: site.to_string(),
                signature: signature.to_string(),
            },
        }
    }

    pub fn row(table: &str, id: RowId) -> Self {
        Self {
            table: table.to_string(),
            shape: KeyShape::Row(id),
        }
    }

    pub fn version(table: &str) -> Self {
        Self {
            table: table.to_string(),
            shape: KeyShape::Version,
        }
    }

    pub fn row_id_index(table: &str, site: &str, signature: &str) -> Self {
        Self {
            table: table.to_string(),
            shape: KeyShape::RowIdIndex {
                site: site.to_string(),
                signature: signature.to_string(),
            },
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    /// Version embedded in a table entry key.
    pub fn embedded_version(&self) -> Option<u64> {
        match &self.shape {
            KeyShape::Table { version, .. } => Some(*version),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Prefix shared by every key of one table.
    pub fn table_prefix(table: &str) -> String {
        format!("{}:{}:", NAMESPACE, table)
    }

    /// Parse an encoded key. Returns `None` for anything outside the four shapes.
    pub fn decode(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split(':');
        if parts.next()? != NAMESPACE {
            return None;
        }
        let table = parts.next()?.to_string();
        let head = parts.next()?;
        let rest: Vec<&str> = parts.collect();

        let shape = match (head, rest.as_slice()) {
            ("version", []) => KeyShape::Version,
            ("row", [id]) => KeyShape::Row(id.parse().ok()?),
            ("rowid", [site, signature]) => KeyShape::RowIdIndex {
                site: site.to_string(),
                signature: signature.to_string(),
            },
            (version, [site, signature]) if version.starts_with('v') => KeyShape::Table {
                version: version[1..].parse().ok()?,
                site: site.to_string(),
                signature: signature.to_string(),
            },
            _ => return None,
        };
        Some(Self { table, shape })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.shape {
            KeyShape::Table {
                version,
                site,
                signature,
            } => write!(
                f,
                "{}:{}:v{}:{}:{}",
                NAMESPACE, self.table, version, site, signature
            ),
            KeyShape::Row(id) => write!(f, "{}:{}:row:{}", NAMESPACE, self.table, id),
            KeyShape::Version => write!(f, "{}:{}:version", NAMESPACE, self.table),
            KeyShape::RowIdIndex { site, signature } => {
                write!(f, "{}:{}:rowid:{}:{}", NAMESPACE, self.table, site, signature)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_shapes() {
        assert_eq!(
            CacheKey::table("example", 3, "search", "abc").encode(),
            "entity:example:v3:search:abc"
        );
        assert_eq!(CacheKey::row("example", 42).encode(), "entity:example:row:42");
        assert_eq!(CacheKey::version("example").encode(), "entity:example:version");
        assert_eq!(
            CacheKey::row_id_index("example", "get_by_fields", "abc").encode(),
            "entity:example:rowid:get_by_fields:abc"
        );
    }

    #[test]
    fn test_version_is_part_of_table_key() {
        let v1 = CacheKey::table("example", 1, "search", "abc");
        let v2 = CacheKey::table("example", 2, "search", "abc");
        assert_ne!(v1.encode(), v2.encode());
        assert_eq!(v1.embedded_version(), Some(1));
        assert_eq!(CacheKey::row("example", 1).embedded_version(), None);
    }

    #[test]
    fn test_decode_rejects_foreign_keys() {
        assert!(CacheKey::decode("session:abc").is_none());
        assert!(CacheKey::decode("entity:example:row:abc").is_none());
        assert!(CacheKey::decode("entity:example:x1:search:abc").is_none());
        assert!(CacheKey::decode("entity:example").is_none());
    }

    #[test]
    fn test_table_prefix_covers_all_shapes() {
        let prefix = CacheKey::table_prefix("example");
        for key in [
            CacheKey::table("example", 9, "count", "s"),
            CacheKey::row("example", 1),
            CacheKey::version("example"),
            CacheKey::row_id_index("example", "get", "s"),
        ] {
            assert!(key.encode().starts_with(&prefix));
        }
        assert!(!CacheKey::row("example2", 1).encode().starts_with(&prefix));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_keys_decode_to_themselves(
            table in "[a-z_]{1,12}",
            version in any::<u64>(),
            id in any::<i64>(),
            site in "[a-z_]{1,16}",
            signature in "[0-9a-f]{64}",
        ) {
            for key in [
                CacheKey::table(&table, version, &site, &signature),
                CacheKey::row(&table, id),
                CacheKey::version(&table),
                CacheKey::row_id_index(&table, &site, &signature),
            ] {
                prop_assert_eq!(CacheKey::decode(&key.encode()), Some(key));
            }
        }
    }
}
