//! Append-only caches of records that the graph has already fetched.
//!
//! Nodes populate them through their `on_result` hook so that other
//! consumers can look records up without another round trip. The caches are
//! side effects of resolution, not graph nodes: no node reads from them.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

use crate::model::{DiscreteCopyNumberData, Mutation};

/// A record that can be stored in a [`RecordCache`].
pub trait Cached: Clone + Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Send + Sync;

    fn key(&self) -> Self::Key;
}

/// Profile, sample and entrez gene id.
pub type CopyNumberKey = (String, String, i64);

impl Cached for DiscreteCopyNumberData {
    type Key = CopyNumberKey;

    fn key(&self) -> Self::Key {
        (
            self.molecular_profile_id.clone(),
            self.sample_id.clone(),
            self.gene.entrez_gene_id,
        )
    }
}

/// Profile, sample, entrez gene id and protein change.
pub type MutationKey = (String, String, i64, String);

impl Cached for Mutation {
    type Key = MutationKey;

    fn key(&self) -> Self::Key {
        (
            self.molecular_profile_id.clone(),
            self.sample_id.clone(),
            self.gene.entrez_gene_id,
            self.protein_change.clone(),
        )
    }
}

/// Shared, append-only record store. Clones share the same records.
///
/// A record is inserted only if no record with the same key is present; there
/// is no eviction.
#[derive(Clone)]
pub struct RecordCache<R: Cached> {
    records: Arc<RwLock<HashMap<R::Key, R>>>,
}

pub type DiscreteCnaCache = RecordCache<DiscreteCopyNumberData>;
pub type MutationDataCache = RecordCache<Mutation>;

impl<R: Cached> Default for RecordCache<R> {
    fn default() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl<R: Cached> RecordCache<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts already-fetched records. Returns how many were new.
    pub fn add_data(&self, records: &[R]) -> usize {
        let mut map = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = map.len();

        for record in records {
            map.entry(record.key()).or_insert_with(|| record.clone());
        }

        let added = map.len() - before;
        tracing::debug!(added, total = map.len(), "cache populated");
        added
    }

    pub fn get(&self, key: &R::Key) -> Option<R> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All cached records matching `predicate`, in no particular order.
    pub fn find(&self, predicate: impl Fn(&R) -> bool) -> Vec<R> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|record| predicate(record))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Gene;

    fn cna(sample: &str, alteration: i32) -> DiscreteCopyNumberData {
        DiscreteCopyNumberData {
            molecular_profile_id: "brca_gistic".into(),
            study_id: "brca".into(),
            sample_id: sample.into(),
            gene: Gene {
                entrez_gene_id: 2064,
                hugo_gene_symbol: "ERBB2".into(),
            },
            alteration,
        }
    }

    #[test]
    fn test_first_insert_wins() {
        let cache = DiscreteCnaCache::new();
        assert_eq!(cache.add_data(&[cna("s1", 2), cna("s2", -2)]), 2);
        assert_eq!(cache.add_data(&[cna("s1", 1), cna("s3", 0)]), 1);

        assert_eq!(cache.len(), 3);
        let key = ("brca_gistic".to_string(), "s1".to_string(), 2064);
        assert_eq!(cache.get(&key).unwrap().alteration, 2);
    }

    #[test]
    fn test_clones_share_records() {
        let cache = DiscreteCnaCache::new();
        let other = cache.clone();
        other.add_data(&[cna("s1", 2)]);

        assert!(!cache.is_empty());
        assert_eq!(cache.find(|r| r.alteration == 2).len(), 1);
    }
}
