//! Verb dispatch table.
//!
//! Every proxy operation is tagged with a [`Verb`]; [`Verb::strategy`] is the
//! single place that decides how the cache treats it.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Find,
    Search,
    Count,
    Create,
    Update,
    Wave,
    Delete,
    BatchCreate,
    BatchUpdate,
    BatchDelete,
}

/// Which timestamp columns a mutation stamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampPolicy {
    None,
    CreateAndUpdate,
    UpdateOnly,
}

/// Which row-cache entries a mutation deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowInvalidation {
    None,
    /// The single row addressed by the call.
    Single,
    /// Every row the call affected.
    Each,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutationPolicy {
    pub stamp: StampPolicy,
    pub row_invalidation: RowInvalidation,
}

/// How the cache treats a verb. Every mutation bumps the table version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStrategy {
    /// Row cache, reached through the row-id index.
    RowLookup,
    /// Version-tagged table cache. With `size_ceiling`, oversized results are
    /// returned but not stored.
    TableLookup { size_ceiling: bool },
    Mutation(MutationPolicy),
}

impl Verb {
    pub const ALL: [Verb; 11] = [
        Verb::Get,
        Verb::Find,
        Verb::Search,
        Verb::Count,
        Verb::Create,
        Verb::Update,
        Verb::Wave,
        Verb::Delete,
        Verb::BatchCreate,
        Verb::BatchUpdate,
        Verb::BatchDelete,
    ];

    /// Label used as the cache key site for built-in operations.
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Find => "find",
            Verb::Search => "search",
            Verb::Count => "count",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Wave => "wave",
            Verb::Delete => "delete",
            Verb::BatchCreate => "batch_create",
            Verb::BatchUpdate => "batch_update",
            Verb::BatchDelete => "batch_delete",
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        let mutation = |stamp, row_invalidation| {
            CacheStrategy::Mutation(MutationPolicy {
                stamp,
                row_invalidation,
            })
        };
        match self {
            Verb::Get => CacheStrategy::RowLookup,
            Verb::Find | Verb::Search => CacheStrategy::TableLookup { size_ceiling: true },
            Verb::Count => CacheStrategy::TableLookup {
                size_ceiling: false,
            },
            Verb::Create | Verb::BatchCreate => {
                mutation(StampPolicy::CreateAndUpdate, RowInvalidation::None)
            }
            Verb::Update => mutation(StampPolicy::UpdateOnly, RowInvalidation::Single),
            Verb::Wave | Verb::Delete => mutation(StampPolicy::None, RowInvalidation::Single),
            Verb::BatchUpdate => mutation(StampPolicy::UpdateOnly, RowInvalidation::Each),
            Verb::BatchDelete => mutation(StampPolicy::None, RowInvalidation::Each),
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self.strategy(), CacheStrategy::Mutation(_))
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_and_mutations_partition_verbs() {
        let reads: Vec<_> = Verb::ALL.iter().filter(|v| !v.is_mutation()).collect();
        assert_eq!(reads, [&Verb::Get, &Verb::Find, &Verb::Search, &Verb::Count]);
    }

    #[test]
    fn test_stamping_policy() {
        let stamp = |verb: Verb| match verb.strategy() {
            CacheStrategy::Mutation(policy) => Some(policy.stamp),
            _ => None,
        };
        assert_eq!(stamp(Verb::Create), Some(StampPolicy::CreateAndUpdate));
        assert_eq!(stamp(Verb::BatchCreate), Some(StampPolicy::CreateAndUpdate));
        assert_eq!(stamp(Verb::Update), Some(StampPolicy::UpdateOnly));
        assert_eq!(stamp(Verb::BatchUpdate), Some(StampPolicy::UpdateOnly));
        assert_eq!(stamp(Verb::Wave), Some(StampPolicy::None));
        assert_eq!(stamp(Verb::Get), None);
    }

    #[test]
    fn test_row_invalidation_policy() {
        let rows = |verb: Verb| match verb.strategy() {
            CacheStrategy::Mutation(policy) => policy.row_invalidation,
            _ => RowInvalidation::None,
        };
        assert_eq!(rows(Verb::Create), RowInvalidation::None);
        assert_eq!(rows(Verb::Update), RowInvalidation::Single);
        assert_eq!(rows(Verb::Wave), RowInvalidation::Single);
        assert_eq!(rows(Verb::Delete), RowInvalidation::Single);
        assert_eq!(rows(Verb::BatchUpdate), RowInvalidation::Each);
        assert_eq!(rows(Verb::BatchDelete), RowInvalidation::Each);
    }

    #[test]
    fn test_size_ceiling_applies_to_row_lists_only() {
        assert_eq!(
            Verb::Search.strategy(),
            CacheStrategy::TableLookup { size_ceiling: true }
        );
        assert_eq!(
            Verb::Count.strategy(),
            CacheStrategy::TableLookup {
                size_ceiling: false
            }
        );
    }
}
