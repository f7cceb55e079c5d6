use ahash::AHashMap;

use crate::types::{FieldType, HeapDumpError, ObjectId, Result};

#[derive(Debug, Clone)]
pub struct FieldDefinition {
    pub name: String,
    pub ty: FieldType,
}

/// One class as reconstructed from its load-class + class-dump records.
/// `fields` is the flattened field walk (runtime class first, then
/// superclasses), matching instance payload bytes position for position.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub class_id: ObjectId,
    pub serial: u32,
    pub name: String,
    pub superclass_id: ObjectId,
    pub instance_size: u32,
    pub fields: Vec<FieldDefinition>,
}

impl ClassDefinition {
    /// Sum of field widths, recomputable for cross-checking the recorded
    /// instance size.
    pub fn computed_size(&self, id_size: usize) -> u32 {
        self.fields
            .iter()
            .map(|f| f.ty.byte_size(id_size) as u32)
            .sum()
    }
}

/// All classes of a dump, addressable by id and by name. Names are not
/// unique; the name index keeps every class id carrying a name, in insert
/// order. Analysis requires every class referenced by any instance to
/// resolve here; a miss is a fatal consistency error.
#[derive(Debug, Default)]
pub struct ClassStore {
    by_id: AHashMap<ObjectId, ClassDefinition>,
    by_name: AHashMap<String, Vec<ObjectId>>,
}

impl ClassStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class: ClassDefinition) {
        self.by_name
            .entry(class.name.clone())
            .or_default()
            .push(class.class_id);
        self.by_id.insert(class.class_id, class);
    }

    pub fn get(&self, class_id: ObjectId) -> Option<&ClassDefinition> {
        self.by_id.get(&class_id)
    }

    /// The first-inserted class with this name; see `all_by_name` when the
    /// name may be ambiguous.
    pub fn get_by_name(&self, name: &str) -> Option<&ClassDefinition> {
        self.all_by_name(name).next()
    }

    pub fn all_by_name<'s>(
        &'s self,
        name: &str,
    ) -> impl Iterator<Item = &'s ClassDefinition> {
        self.by_name
            .get(name)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
    }

    pub fn require(&self, class_id: ObjectId) -> Result<&ClassDefinition> {
        self.by_id.get(&class_id).ok_or_else(|| {
            HeapDumpError::inconsistent(class_id, "class referenced but not defined in the dump")
        })
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassDefinition> {
        self.by_id.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn class(id: ObjectId, name: &str) -> ClassDefinition {
        ClassDefinition {
            class_id: id,
            serial: id as u32,
            name: name.to_string(),
            superclass_id: 0,
            instance_size: 0,
            fields: vec![],
        }
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let mut store = ClassStore::new();
        store.insert(class(10, "com.example.Leak"));
        store.insert(class(11, "com.example.Other"));

        assert_eq!(store.get(10).unwrap().name, "com.example.Leak");
        assert_eq!(store.get_by_name("com.example.Other").unwrap().class_id, 11);
        assert!(store.get(99).is_none());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_duplicate_names_are_all_kept() {
        let mut store = ClassStore::new();
        store.insert(class(10, "Twin"));
        store.insert(class(11, "Twin"));

        assert_eq!(store.get_by_name("Twin").unwrap().class_id, 10);
        let ids: Vec<ObjectId> = store.all_by_name("Twin").map(|c| c.class_id).collect();
        assert_eq!(ids, vec![10, 11]);
        assert_eq!(store.all_by_name("Missing").count(), 0);
    }

    #[test]
    fn test_require_missing_is_inconsistent() {
        let store = ClassStore::new();
        let err = store.require(42).unwrap_err();
        assert!(matches!(err, HeapDumpError::Inconsistent { id: 42, .. }));
    }

    #[test]
    fn test_computed_size() {
        let def = ClassDefinition {
            class_id: 1,
            serial: 1,
            name: "C".to_string(),
            superclass_id: 0,
            instance_size: 13,
            fields: vec![
                FieldDefinition {
                    name: "r".to_string(),
                    ty: FieldType::Object,
                },
                FieldDefinition {
                    name: "n".to_string(),
                    ty: FieldType::Int,
                },
                FieldDefinition {
                    name: "b".to_string(),
                    ty: FieldType::Bool,
                },
            ],
        };
        assert_eq!(def.computed_size(8), 13);
        assert_eq!(def.computed_size(4), 9);
    }
}
