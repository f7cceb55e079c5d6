use std::io::Write;
use std::rc::Rc;

use ahash::AHashMap;

use crate::capture::mirror::{ClassMirror, ObjRef, Payload, ThreadMirror, Value};
use crate::format::{DumpWriter, IdSize};
use crate::types::{FieldType, GcRoot, HeapDumpError, ObjectId, Result, RootReason};

/// Serializes a live mirror graph into the binary dump stream.
///
/// Identity rules: every distinct object, class and string gets exactly one
/// id, assigned at first encounter and cached in capture-scoped handle
/// tables. The id is recorded *before* the builder recurses into fields and
/// elements, which is what makes cyclic graphs terminate.
pub struct DumpBuilder<W: Write> {
    writer: DumpWriter<W>,
    object_ids: AHashMap<usize, ObjectId>,
    class_ids: AHashMap<usize, ObjectId>,
    string_ids: AHashMap<String, ObjectId>,
    next_id: ObjectId,
    next_class_serial: u32,
    next_trace_serial: u32,
}

impl<W: Write> DumpBuilder<W> {
    pub fn new(out: W, id_size: IdSize, timestamp_millis: u64) -> Result<Self> {
        Ok(Self {
            writer: DumpWriter::new(out, id_size, timestamp_millis)?,
            object_ids: AHashMap::new(),
            class_ids: AHashMap::new(),
            string_ids: AHashMap::new(),
            next_id: 1,
            next_class_serial: 1,
            next_trace_serial: 1,
        })
    }

    /// Captures `obj` and everything reachable from it. Returns 0 for
    /// `None`; returns the cached id without emitting anything if this
    /// identity was already captured.
    pub fn add_object(&mut self, obj: Option<&ObjRef>) -> Result<ObjectId> {
        let Some(obj) = obj else {
            return Ok(0);
        };
        if let Some(&id) = self.object_ids.get(&obj.identity()) {
            return Ok(id);
        }

        let id = self.alloc_id();
        self.object_ids.insert(obj.identity(), id);

        match &obj.payload {
            Payload::Instance { class, values } => {
                let class_id = self.ensure_class(class)?;
                let bytes = self.serialize_fields(class, &values.borrow())?;
                self.writer.write_instance_dump(id, class_id, &bytes)?;
            }
            Payload::ObjectArray { class, elements } => {
                let class_id = self.ensure_class(class)?;
                let elements = elements.borrow().clone();
                let mut element_ids = Vec::with_capacity(elements.len());
                for element in &elements {
                    element_ids.push(self.add_object(element.as_ref())?);
                }
                self.writer.write_object_array(id, class_id, &element_ids)?;
            }
            Payload::PrimitiveArray { values } => {
                self.writer.write_primitive_array(
                    id,
                    values.element_type(),
                    values.len() as u32,
                    &values.pack(),
                )?;
            }
        }
        Ok(id)
    }

    pub fn add_root_unknown(&mut self, obj: &ObjRef) -> Result<ObjectId> {
        self.add_root(obj, RootReason::Unknown)
    }

    pub fn add_root_global_jni(&mut self, obj: &ObjRef) -> Result<ObjectId> {
        self.add_root(obj, RootReason::GlobalJni)
    }

    pub fn add_root_local_jni(&mut self, obj: &ObjRef) -> Result<ObjectId> {
        self.add_root(obj, RootReason::LocalJni)
    }

    pub fn add_root_java_frame(
        &mut self,
        obj: &ObjRef,
        thread_serial: u32,
        frame_index: u32,
    ) -> Result<ObjectId> {
        self.add_root(
            obj,
            RootReason::JavaFrame {
                thread_serial,
                frame_index,
            },
        )
    }

    pub fn add_root_native_stack(&mut self, obj: &ObjRef, thread_serial: u32) -> Result<ObjectId> {
        self.add_root(obj, RootReason::NativeStack { thread_serial })
    }

    pub fn add_root_sticky_class(&mut self, obj: &ObjRef) -> Result<ObjectId> {
        self.add_root(obj, RootReason::StickyClass)
    }

    pub fn add_root_thread_block(&mut self, obj: &ObjRef, thread_serial: u32) -> Result<ObjectId> {
        self.add_root(obj, RootReason::ThreadBlock { thread_serial })
    }

    pub fn add_root_monitor_used(&mut self, obj: &ObjRef) -> Result<ObjectId> {
        self.add_root(obj, RootReason::MonitorUsed)
    }

    pub fn add_root_thread_object(
        &mut self,
        obj: &ObjRef,
        thread_serial: u32,
        trace_serial: u32,
    ) -> Result<ObjectId> {
        self.add_root(
            obj,
            RootReason::ThreadObject {
                thread_serial,
                trace_serial,
            },
        )
    }

    /// Each call appends an independent root record; rooting the same
    /// object twice is legal and yields two records with one object id.
    fn add_root(&mut self, obj: &ObjRef, reason: RootReason) -> Result<ObjectId> {
        let object_id = self.add_object(Some(obj))?;
        self.writer.write_root(GcRoot { object_id, reason })?;
        Ok(object_id)
    }

    /// Emits up to `max_frames` of the thread's stack (innermost first) as
    /// frame records plus one trace record. Frame ids are per-call; frames
    /// are never deduplicated. Returns the trace serial, which doubles as
    /// the thread serial for `add_root_java_frame` cross-references.
    pub fn add_stack_trace(&mut self, thread: &ThreadMirror, max_frames: usize) -> Result<u32> {
        let serial = self.next_trace_serial;
        self.next_trace_serial += 1;

        let mut frame_ids = Vec::new();
        for frame in thread.frames.iter().take(max_frames) {
            let class_id = self.ensure_class(&frame.class)?;
            let method_id = self.intern_string(&frame.method)?;
            let signature_id = self.intern_string(&frame.signature)?;
            let frame_id = self.alloc_id();
            self.writer
                .write_stack_frame(frame_id, method_id, signature_id, class_id, frame.line)?;
            frame_ids.push(frame_id);
        }

        self.writer.write_stack_trace(serial, serial, &frame_ids)?;
        Ok(serial)
    }

    /// Finalizes the stream. Consumes the builder; unfinished output is
    /// not a valid dump.
    pub fn finish(self) -> Result<W> {
        self.writer.finish()
    }

    fn alloc_id(&mut self) -> ObjectId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Interns a string: one record per distinct content for the whole
    /// dump.
    fn intern_string(&mut self, s: &str) -> Result<ObjectId> {
        if let Some(&id) = self.string_ids.get(s) {
            return Ok(id);
        }
        let id = self.alloc_id();
        self.string_ids.insert(s.to_string(), id);
        self.writer.write_string(id, s)?;
        Ok(id)
    }

    /// Emits load-class + class-dump records once per class mirror,
    /// superclasses first. The class-dump field table is the flattened
    /// field walk, so it matches instance bytes position for position.
    fn ensure_class(&mut self, class: &Rc<ClassMirror>) -> Result<ObjectId> {
        let key = Rc::as_ptr(class) as usize;
        if let Some(&id) = self.class_ids.get(&key) {
            return Ok(id);
        }

        let superclass_id = match &class.superclass {
            Some(superclass) => self.ensure_class(superclass)?,
            None => 0,
        };

        let name_id = self.intern_string(&class.name)?;
        let class_id = self.alloc_id();
        self.class_ids.insert(key, class_id);

        let serial = self.next_class_serial;
        self.next_class_serial += 1;
        self.writer.write_load_class(serial, class_id, 0, name_id)?;

        let mut field_table = Vec::new();
        for field in class.field_walk() {
            let name_id = self.intern_string(&field.name)?;
            field_table.push((name_id, field.ty));
        }
        let instance_size = class.instance_size(self.writer.id_size().bytes());
        self.writer
            .write_class_dump(class_id, superclass_id, instance_size, &field_table)?;
        Ok(class_id)
    }

    /// Serializes instance field values in field-walk order. A value whose
    /// type disagrees with the declared field type means the mirror does
    /// not faithfully describe its class; the whole capture fails rather
    /// than emit an instance the class dump cannot describe.
    fn serialize_fields(&mut self, class: &Rc<ClassMirror>, values: &[Value]) -> Result<Vec<u8>> {
        let walk = class.field_walk();
        if walk.len() != values.len() {
            return Err(HeapDumpError::Capture(format!(
                "instance of {} has {} values for {} declared fields",
                class.name,
                values.len(),
                walk.len()
            )));
        }

        let id_size = self.writer.id_size();
        let mut bytes = Vec::new();
        for (field, value) in walk.iter().zip(values) {
            if field.ty != value.field_type() {
                return Err(HeapDumpError::Capture(format!(
                    "field {}.{} is declared {:?} but holds {:?}",
                    class.name,
                    field.name,
                    field.ty,
                    value.field_type()
                )));
            }
            match value {
                Value::Ref(target) => {
                    let id = self.add_object(target.as_ref())?;
                    match id_size {
                        IdSize::Eight => bytes.extend_from_slice(&id.to_be_bytes()),
                        IdSize::Four => bytes.extend_from_slice(&(id as u32).to_be_bytes()),
                    }
                }
                Value::Bool(v) => bytes.push(*v as u8),
                Value::Byte(v) => bytes.extend_from_slice(&v.to_be_bytes()),
                Value::Char(v) => bytes.extend_from_slice(&v.to_be_bytes()),
                Value::Short(v) => bytes.extend_from_slice(&v.to_be_bytes()),
                Value::Int(v) => bytes.extend_from_slice(&v.to_be_bytes()),
                Value::Long(v) => bytes.extend_from_slice(&v.to_be_bytes()),
                Value::Float(v) => bytes.extend_from_slice(&v.to_bits().to_be_bytes()),
                Value::Double(v) => bytes.extend_from_slice(&v.to_bits().to_be_bytes()),
            }
        }
        Ok(bytes)
    }
}
