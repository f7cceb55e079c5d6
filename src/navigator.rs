use crate::format::IdSize;
use crate::parse::{ClassDefinition, HeapObjectKind, IndexedObject, ParsedDump, PayloadSource};
use crate::remap::IdRemapper;
use crate::types::{DenseId, FieldType, HeapDumpError, ObjectId, Result};

/// How an outgoing reference is reached from its holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefLabel {
    Field(String),
    Element(u32),
}

impl std::fmt::Display for RefLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefLabel::Field(name) => write!(f, ".{}", name),
            RefLabel::Element(index) => write!(f, "[{}]", index),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reference {
    pub target: DenseId,
    pub label: RefLabel,
}

/// Identity of an object's type. Two classes may share a name (distinct
/// load-class records, one name string), so grouping goes by class id and
/// names are only rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKey {
    Class(ObjectId),
    PrimitiveArray(FieldType),
}

/// Uniform traversal interface over remapped heap objects. Payload bytes
/// are decoded on demand through a `PayloadSource`, so navigation works the
/// same whether the dump is in memory or read from disk; re-navigating an
/// object re-derives its references from the stored bytes.
///
/// Cycles are presented as-is: the navigator never deduplicates, that is
/// the traversal's job.
pub struct ObjectNavigator<'a> {
    dump: &'a ParsedDump,
    remapper: &'a IdRemapper,
    payloads: Box<dyn PayloadSource>,
}

impl<'a> ObjectNavigator<'a> {
    pub fn new(
        dump: &'a ParsedDump,
        remapper: &'a IdRemapper,
        payloads: Box<dyn PayloadSource>,
    ) -> Self {
        Self {
            dump,
            remapper,
            payloads,
        }
    }

    pub fn object_count(&self) -> usize {
        self.remapper.len()
    }

    /// Dense ids are scan-encounter-order indices into the object index.
    pub fn entry(&self, dense: DenseId) -> &IndexedObject {
        &self.dump.objects[dense as usize]
    }

    /// The owning class, or None for primitive arrays (which have an
    /// element type instead). A missing class definition is a fatal
    /// consistency error.
    pub fn class_of(&self, dense: DenseId) -> Result<Option<&ClassDefinition>> {
        match self.entry(dense).kind {
            HeapObjectKind::Instance { class_id } | HeapObjectKind::ObjectArray { class_id, .. } => {
                Ok(Some(self.dump.classes.require(class_id)?))
            }
            HeapObjectKind::PrimitiveArray { .. } => Ok(None),
        }
    }

    pub fn type_key(&self, dense: DenseId) -> TypeKey {
        match self.entry(dense).kind {
            HeapObjectKind::Instance { class_id } | HeapObjectKind::ObjectArray { class_id, .. } => {
                TypeKey::Class(class_id)
            }
            HeapObjectKind::PrimitiveArray { element_type, .. } => {
                TypeKey::PrimitiveArray(element_type)
            }
        }
    }

    /// Display name of the object's type; primitive arrays render as
    /// `byte[]`, `int[]`, etc.
    pub fn type_name(&self, dense: DenseId) -> Result<&str> {
        match self.entry(dense).kind {
            HeapObjectKind::Instance { class_id } | HeapObjectKind::ObjectArray { class_id, .. } => {
                Ok(self.dump.classes.require(class_id)?.name.as_str())
            }
            HeapObjectKind::PrimitiveArray { element_type, .. } => {
                Ok(primitive_array_name(element_type))
            }
        }
    }

    /// Bytes owned by the object itself, excluding anything it references.
    pub fn shallow_size(&self, dense: DenseId) -> Result<u64> {
        let id_size = self.dump.header.id_size.bytes();
        Ok(match self.entry(dense).kind {
            HeapObjectKind::Instance { class_id } => {
                self.dump.classes.require(class_id)?.instance_size as u64
            }
            HeapObjectKind::ObjectArray { count, .. } => count as u64 * id_size as u64,
            HeapObjectKind::PrimitiveArray {
                element_type,
                count,
            } => count as u64 * element_type.byte_size(id_size) as u64,
        })
    }

    /// Outgoing references in a stable order: object-typed fields in
    /// field-walk order, then array elements by index. Primitive fields and
    /// arrays contribute nothing. Null references are skipped; a non-null
    /// reference that does not remap is a fatal consistency error.
    pub fn references_of(&self, dense: DenseId) -> Result<Vec<Reference>> {
        let entry = self.entry(dense);
        let id_size = self.dump.header.id_size;

        match entry.kind {
            HeapObjectKind::Instance { class_id } => {
                let class = self.dump.classes.require(class_id)?;
                let payload = self
                    .payloads
                    .read(entry.payload_offset, entry.payload_len as usize)?;
                if payload.len() as u32 != class.instance_size {
                    return Err(HeapDumpError::inconsistent(
                        entry.object_id,
                        format!(
                            "instance payload is {} bytes but class {} declares {}",
                            payload.len(),
                            class.name,
                            class.instance_size
                        ),
                    ));
                }

                let mut refs = Vec::new();
                let mut pos = 0usize;
                for field in &class.fields {
                    let width = field.ty.byte_size(id_size.bytes());
                    if field.ty == FieldType::Object {
                        let target_id = read_id(&payload[pos..pos + width], id_size);
                        if let Some(reference) =
                            self.resolve(entry.object_id, target_id, || {
                                RefLabel::Field(field.name.clone())
                            })?
                        {
                            refs.push(reference);
                        }
                    }
                    pos += width;
                }
                Ok(refs)
            }
            HeapObjectKind::ObjectArray { count, .. } => {
                let payload = self
                    .payloads
                    .read(entry.payload_offset, entry.payload_len as usize)?;
                let width = id_size.bytes();
                let mut refs = Vec::new();
                for index in 0..count as usize {
                    let target_id = read_id(&payload[index * width..(index + 1) * width], id_size);
                    if let Some(reference) = self.resolve(entry.object_id, target_id, || {
                        RefLabel::Element(index as u32)
                    })? {
                        refs.push(reference);
                    }
                }
                Ok(refs)
            }
            HeapObjectKind::PrimitiveArray { .. } => Ok(Vec::new()),
        }
    }

    fn resolve(
        &self,
        holder_id: ObjectId,
        target_id: ObjectId,
        label: impl FnOnce() -> RefLabel,
    ) -> Result<Option<Reference>> {
        if target_id == 0 {
            return Ok(None);
        }
        match self.remapper.dense_of(target_id)? {
            Some(target) => Ok(Some(Reference {
                target,
                label: label(),
            })),
            None => Err(HeapDumpError::inconsistent(
                holder_id,
                format!("reference to id {} which is not in the dump", target_id),
            )),
        }
    }
}

pub fn primitive_array_name(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Bool => "boolean[]",
        FieldType::Byte => "byte[]",
        FieldType::Char => "char[]",
        FieldType::Short => "short[]",
        FieldType::Int => "int[]",
        FieldType::Long => "long[]",
        FieldType::Float => "float[]",
        FieldType::Double => "double[]",
        FieldType::Object => "object[]",
    }
}

fn read_id(bytes: &[u8], id_size: IdSize) -> ObjectId {
    match id_size {
        IdSize::Four => u32::from_be_bytes(bytes.try_into().unwrap()) as u64,
        IdSize::Eight => u64::from_be_bytes(bytes.try_into().unwrap()),
    }
}
