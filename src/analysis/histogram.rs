use ahash::AHashMap;
use serde::Serialize;

use crate::navigator::{ObjectNavigator, TypeKey};
use crate::progress::{Outcome, Progress};
use crate::types::{DenseId, Result};

const CANCEL_POLL_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct HistogramEntry {
    #[serde(skip)]
    pub key: TypeKey,
    pub name: String,
    pub instance_count: u64,
    pub total_shallow_size: u64,
}

/// Per-class instance counts and shallow sizes, keyed by type identity in
/// first-encounter order. Two classes sharing a name stay separate entries.
/// Consumers sort as they need; the stored order is deterministic because
/// dense ids follow scan order.
pub struct Histogram {
    entries: Vec<HistogramEntry>,
    index: AHashMap<TypeKey, usize>,
}

impl Histogram {
    /// One linear scan over all heap objects.
    pub fn compute(
        navigator: &ObjectNavigator<'_>,
        progress: &dyn Progress,
    ) -> Result<Outcome<Histogram>> {
        progress.phase("computing class histogram");

        let mut entries: Vec<HistogramEntry> = Vec::new();
        let mut index: AHashMap<TypeKey, usize> = AHashMap::new();

        for dense in 0..navigator.object_count() as DenseId {
            let key = navigator.type_key(dense);
            let shallow = navigator.shallow_size(dense)?;

            let slot = match index.get(&key) {
                Some(&slot) => slot,
                None => {
                    index.insert(key, entries.len());
                    entries.push(HistogramEntry {
                        key,
                        name: navigator.type_name(dense)?.to_string(),
                        instance_count: 0,
                        total_shallow_size: 0,
                    });
                    entries.len() - 1
                }
            };
            entries[slot].instance_count += 1;
            entries[slot].total_shallow_size += shallow;

            if (dense as usize + 1) % CANCEL_POLL_INTERVAL == 0 && progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        Ok(Outcome::Completed(Histogram { entries, index }))
    }

    pub fn entries(&self) -> &[HistogramEntry] {
        &self.entries
    }

    pub fn get(&self, key: TypeKey) -> Option<&HistogramEntry> {
        self.index.get(&key).map(|&slot| &self.entries[slot])
    }

    /// All entries rendered under `name`; more than one when distinct
    /// classes share it.
    pub fn named<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'s HistogramEntry> {
        self.entries.iter().filter(move |e| e.name == name)
    }

    /// Entries by descending instance count; ties keep encounter order.
    pub fn by_count_desc(&self) -> Vec<&HistogramEntry> {
        let mut sorted: Vec<&HistogramEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| std::cmp::Reverse(e.instance_count));
        sorted
    }

    /// Entries by descending total shallow size; ties keep encounter order.
    pub fn by_size_desc(&self) -> Vec<&HistogramEntry> {
        let mut sorted: Vec<&HistogramEntry> = self.entries.iter().collect();
        sorted.sort_by_key(|e| std::cmp::Reverse(e.total_shallow_size));
        sorted
    }
}
