use ahash::AHashMap;

use crate::types::ObjectId;

/// Interned strings from the dump, keyed by their record id.
#[derive(Debug, Default)]
pub struct StringTable {
    strings: AHashMap<ObjectId, String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: ObjectId, s: String) {
        self.strings.insert(id, s);
    }

    pub fn get(&self, id: ObjectId) -> Option<&str> {
        self.strings.get(&id).map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
