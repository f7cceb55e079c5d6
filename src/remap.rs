use std::cmp::Ordering;

use crate::parse::IndexedObject;
use crate::storage::{IntList, SlotWidth, StorageBacking};
use crate::types::{DenseId, ObjectId, Result};

/// Bijection from the sparse object ids in a dump onto dense `0..N`, where
/// `N` counts the heap objects (instances and arrays; classes and strings
/// keep their original ids). Dense ids follow scan encounter order, so
/// `objects[dense]` is the entry for that dense id.
///
/// Both lookup tables live behind the int-list seam, so a file-backed run
/// keeps them out of memory. The forward table is a flat list when the id
/// range is compact, which is the case for dumps produced by our own
/// builder, and sorted (id, dense) pairs searched by bisection otherwise.
pub struct IdRemapper {
    forward: Forward,
    inverse: Box<dyn IntList>,
}

enum Forward {
    /// Indexed by original id; stores dense+1 so 0 means unmapped.
    Flat(Box<dyn IntList>),
    /// Parallel lists sorted by original id.
    Sorted {
        ids: Box<dyn IntList>,
        dense: Box<dyn IntList>,
    },
}

/// A flat table pays off while the id range stays within a small factor of
/// the object count.
const FLAT_RANGE_FACTOR: u64 = 4;

impl IdRemapper {
    pub fn build(objects: &[IndexedObject], backing: &StorageBacking) -> Result<IdRemapper> {
        let max_id = objects.iter().map(|o| o.object_id).max().unwrap_or(0);
        let compact = max_id < FLAT_RANGE_FACTOR * objects.len() as u64 + 1024;

        let mut inverse = backing.new_list(SlotWidth::Eight, objects.len())?;
        for (dense, object) in objects.iter().enumerate() {
            inverse.set(dense, object.object_id)?;
        }

        let forward = if compact {
            let mut list = backing.new_list(SlotWidth::Four, max_id as usize + 1)?;
            for (dense, object) in objects.iter().enumerate() {
                list.set(object.object_id as usize, dense as u64 + 1)?;
            }
            Forward::Flat(list)
        } else {
            // The pair buffer is transient; only the sorted lists survive.
            let mut pairs: Vec<(ObjectId, DenseId)> = objects
                .iter()
                .enumerate()
                .map(|(dense, object)| (object.object_id, dense as DenseId))
                .collect();
            pairs.sort_unstable_by_key(|&(id, _)| id);

            let mut ids = backing.new_list(SlotWidth::Eight, pairs.len())?;
            let mut dense = backing.new_list(SlotWidth::Four, pairs.len())?;
            for (slot, (id, d)) in pairs.into_iter().enumerate() {
                ids.set(slot, id)?;
                dense.set(slot, d as u64)?;
            }
            Forward::Sorted { ids, dense }
        };

        Ok(IdRemapper { forward, inverse })
    }

    pub fn dense_of(&self, id: ObjectId) -> Result<Option<DenseId>> {
        match &self.forward {
            Forward::Flat(list) => {
                if id as usize >= list.len() {
                    return Ok(None);
                }
                Ok(match list.get(id as usize)? {
                    0 => None,
                    stored => Some((stored - 1) as DenseId),
                })
            }
            Forward::Sorted { ids, dense } => {
                let mut lo = 0usize;
                let mut hi = ids.len();
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    match ids.get(mid)?.cmp(&id) {
                        Ordering::Less => lo = mid + 1,
                        Ordering::Greater => hi = mid,
                        Ordering::Equal => return Ok(Some(dense.get(mid)? as DenseId)),
                    }
                }
                Ok(None)
            }
        }
    }

    pub fn original_of(&self, dense: DenseId) -> Result<ObjectId> {
        self.inverse.get(dense as usize)
    }

    /// Number of dense ids, i.e. `N`.
    pub fn len(&self) -> usize {
        self.inverse.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inverse.is_empty()
    }
}
