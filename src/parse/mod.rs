pub mod class_store;
pub mod payload;
pub mod string_table;

pub use class_store::{ClassDefinition, ClassStore, FieldDefinition};
pub use payload::{FilePayloads, MemoryPayloads, PayloadSource, open_payloads};
pub use string_table::StringTable;

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::format::{HEADER_RESERVED, IdSize, MAGIC, tag};
use crate::progress::{Outcome, Progress};
use crate::types::{FieldType, GcRoot, HeapDumpError, ObjectId, Result, RootReason};

/// How often the scan loop polls for cancellation, in records.
const CANCEL_POLL_INTERVAL: usize = 1024;

#[derive(Debug, Clone, Copy)]
pub struct DumpHeader {
    pub id_size: IdSize,
    pub timestamp_millis: u64,
}

/// What kind of heap object an index entry describes, with whatever the
/// record prefix carries. Payload bytes stay in the file.
#[derive(Debug, Clone, Copy)]
pub enum HeapObjectKind {
    Instance {
        class_id: ObjectId,
    },
    ObjectArray {
        class_id: ObjectId,
        count: u32,
    },
    PrimitiveArray {
        element_type: FieldType,
        count: u32,
    },
}

/// Phase-1 index entry for one instance or array: enough to find and decode
/// the payload later without re-scanning the stream.
#[derive(Debug, Clone, Copy)]
pub struct IndexedObject {
    pub object_id: ObjectId,
    pub kind: HeapObjectKind,
    pub payload_offset: u64,
    pub payload_len: u64,
}

#[derive(Debug, Clone)]
pub struct StackFrame {
    pub frame_id: ObjectId,
    pub method_name_id: ObjectId,
    pub signature_id: ObjectId,
    pub class_id: ObjectId,
    pub line: i32,
}

#[derive(Debug, Clone)]
pub struct StackTrace {
    pub serial: u32,
    pub thread_serial: u32,
    pub frame_ids: Vec<ObjectId>,
}

/// Everything phase 1 extracts from a dump: metadata, classes, roots, and
/// the object index. Instance contents are not materialized here.
#[derive(Debug)]
pub struct ParsedDump {
    pub path: PathBuf,
    pub header: DumpHeader,
    pub strings: StringTable,
    pub classes: ClassStore,
    pub roots: Vec<GcRoot>,
    pub objects: Vec<IndexedObject>,
    pub stack_frames: Vec<StackFrame>,
    pub stack_traces: Vec<StackTrace>,
}

pub struct DumpParser {
    path: PathBuf,
}

impl DumpParser {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(HeapDumpError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("dump file does not exist: {}", path.display()),
            )));
        }
        Ok(Self { path })
    }

    /// Phase 1: one sequential pass locating record boundaries, building
    /// the class store, string table, root table and object index. Instance
    /// and array payloads are skipped over, not read.
    pub fn scan(&self, progress: &dyn Progress) -> Result<Outcome<ParsedDump>> {
        progress.phase("scanning dump records");

        let file = File::open(&self.path)?;
        let file_len = file.metadata()?.len();
        let mut scanner = Scanner::new(BufReader::new(file), file_len);
        let header = scanner.read_header()?;

        let mut strings = StringTable::new();
        let mut classes = ClassStore::new();
        let mut roots = Vec::new();
        let mut objects = Vec::new();
        let mut stack_frames = Vec::new();
        let mut stack_traces = Vec::new();
        // Load-class records arrive separately from class dumps; pair them
        // up by class object id.
        let mut loaded: AHashMap<ObjectId, (u32, ObjectId)> = AHashMap::new();

        let mut records = 0usize;
        loop {
            let record_offset = scanner.pos;
            let Some(record_tag) = scanner.read_tag()? else {
                break;
            };
            let _relative_ts = scanner.read_u32()?;
            let body_len = scanner.read_u32()? as u64;
            let body_start = scanner.pos;

            match record_tag {
                tag::STRING_UTF8 => {
                    let text_len = body_len
                        .checked_sub(header.id_size.bytes() as u64)
                        .ok_or_else(|| {
                            HeapDumpError::corrupt(record_offset, "string record shorter than an id")
                        })?;
                    let id = scanner.read_id(header.id_size)?;
                    let bytes = scanner.read_bytes(text_len)?;
                    let s = String::from_utf8(bytes).map_err(|_| {
                        HeapDumpError::corrupt(record_offset, "string record is not valid UTF-8")
                    })?;
                    strings.insert(id, s);
                }
                tag::LOAD_CLASS => {
                    let serial = scanner.read_u32()?;
                    let class_id = scanner.read_id(header.id_size)?;
                    let _trace_serial = scanner.read_u32()?;
                    let name_id = scanner.read_id(header.id_size)?;
                    loaded.insert(class_id, (serial, name_id));
                }
                tag::STACK_FRAME => {
                    stack_frames.push(StackFrame {
                        frame_id: scanner.read_id(header.id_size)?,
                        method_name_id: scanner.read_id(header.id_size)?,
                        signature_id: scanner.read_id(header.id_size)?,
                        class_id: scanner.read_id(header.id_size)?,
                        line: scanner.read_u32()? as i32,
                    });
                }
                tag::STACK_TRACE => {
                    let serial = scanner.read_u32()?;
                    let thread_serial = scanner.read_u32()?;
                    let count = scanner.read_u32()?;
                    let mut frame_ids = Vec::with_capacity(count as usize);
                    for _ in 0..count {
                        frame_ids.push(scanner.read_id(header.id_size)?);
                    }
                    stack_traces.push(StackTrace {
                        serial,
                        thread_serial,
                        frame_ids,
                    });
                }
                tag::ROOT_UNKNOWN
                | tag::ROOT_GLOBAL_JNI
                | tag::ROOT_LOCAL_JNI
                | tag::ROOT_JAVA_FRAME
                | tag::ROOT_NATIVE_STACK
                | tag::ROOT_STICKY_CLASS
                | tag::ROOT_THREAD_BLOCK
                | tag::ROOT_MONITOR_USED
                | tag::ROOT_THREAD_OBJECT => {
                    roots.push(scanner.read_root(record_tag, header.id_size)?);
                }
                tag::CLASS_DUMP => {
                    let class = scanner.read_class_dump(
                        header.id_size,
                        record_offset,
                        &loaded,
                        &strings,
                    )?;
                    classes.insert(class);
                }
                tag::INSTANCE_DUMP => {
                    let object_id = scanner.read_id(header.id_size)?;
                    let class_id = scanner.read_id(header.id_size)?;
                    let byte_count = scanner.read_u32()?;
                    let payload_offset = scanner.pos;
                    scanner.skip(byte_count as u64)?;
                    objects.push(IndexedObject {
                        object_id,
                        kind: HeapObjectKind::Instance { class_id },
                        payload_offset,
                        payload_len: byte_count as u64,
                    });
                }
                tag::OBJECT_ARRAY_DUMP => {
                    let object_id = scanner.read_id(header.id_size)?;
                    let class_id = scanner.read_id(header.id_size)?;
                    let count = scanner.read_u32()?;
                    let payload_offset = scanner.pos;
                    let payload_len = count as u64 * header.id_size.bytes() as u64;
                    scanner.skip(payload_len)?;
                    objects.push(IndexedObject {
                        object_id,
                        kind: HeapObjectKind::ObjectArray { class_id, count },
                        payload_offset,
                        payload_len,
                    });
                }
                tag::PRIMITIVE_ARRAY_DUMP => {
                    let object_id = scanner.read_id(header.id_size)?;
                    let type_tag = scanner.read_u8()?;
                    let element_type = FieldType::from_tag(type_tag).ok_or_else(|| {
                        HeapDumpError::corrupt(
                            record_offset,
                            format!("unknown primitive element type {:#x}", type_tag),
                        )
                    })?;
                    let count = scanner.read_u32()?;
                    let payload_offset = scanner.pos;
                    let payload_len =
                        count as u64 * element_type.byte_size(header.id_size.bytes()) as u64;
                    scanner.skip(payload_len)?;
                    objects.push(IndexedObject {
                        object_id,
                        kind: HeapObjectKind::PrimitiveArray {
                            element_type,
                            count,
                        },
                        payload_offset,
                        payload_len,
                    });
                }
                // Unknown tags are skippable by construction of the framing.
                _ => scanner.skip(body_len)?,
            }

            // The decoders above must consume exactly the declared body.
            if scanner.pos != body_start + body_len {
                return Err(HeapDumpError::corrupt(
                    record_offset,
                    format!(
                        "record body length mismatch: declared {}, decoded {}",
                        body_len,
                        scanner.pos - body_start
                    ),
                ));
            }

            records += 1;
            if records % CANCEL_POLL_INTERVAL == 0 && progress.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
        }

        Ok(Outcome::Completed(ParsedDump {
            path: self.path.clone(),
            header,
            strings,
            classes,
            roots,
            objects,
            stack_frames,
            stack_traces,
        }))
    }
}

/// Sequential reader that tracks the absolute byte offset for error
/// reporting and payload indexing. `file_len` bounds every skip: seeking
/// past end-of-file succeeds silently, so skips over payloads must be
/// validated against the real file size, not just the tracked position.
struct Scanner {
    reader: BufReader<File>,
    pos: u64,
    file_len: u64,
}

impl Scanner {
    fn new(reader: BufReader<File>, file_len: u64) -> Self {
        Self {
            reader,
            pos: 0,
            file_len,
        }
    }

    fn read_header(&mut self) -> Result<DumpHeader> {
        let magic = self.read_bytes(MAGIC.len() as u64).map_err(|_| {
            HeapDumpError::corrupt(0, "dump shorter than the format magic")
        })?;
        if magic != MAGIC {
            return Err(HeapDumpError::corrupt(0, "bad magic"));
        }

        let id_size_offset = self.pos;
        let id_size_byte = self.read_u8()?;
        let id_size = IdSize::from_byte(id_size_byte).ok_or_else(|| {
            HeapDumpError::corrupt(
                id_size_offset,
                format!("unsupported identifier size {}", id_size_byte),
            )
        })?;

        self.skip(HEADER_RESERVED as u64)?;
        let timestamp_millis = self.read_u64()?;
        Ok(DumpHeader {
            id_size,
            timestamp_millis,
        })
    }

    /// Returns None at a clean end of stream.
    fn read_tag(&mut self) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.reader.read(&mut buf)? {
            0 => Ok(None),
            _ => {
                self.pos += 1;
                Ok(Some(buf[0]))
            }
        }
    }

    fn read_root(&mut self, record_tag: u8, id_size: IdSize) -> Result<GcRoot> {
        let object_id = self.read_id(id_size)?;
        let reason = match record_tag {
            tag::ROOT_UNKNOWN => RootReason::Unknown,
            tag::ROOT_GLOBAL_JNI => RootReason::GlobalJni,
            tag::ROOT_LOCAL_JNI => RootReason::LocalJni,
            tag::ROOT_JAVA_FRAME => RootReason::JavaFrame {
                thread_serial: self.read_u32()?,
                frame_index: self.read_u32()?,
            },
            tag::ROOT_NATIVE_STACK => RootReason::NativeStack {
                thread_serial: self.read_u32()?,
            },
            tag::ROOT_STICKY_CLASS => RootReason::StickyClass,
            tag::ROOT_THREAD_BLOCK => RootReason::ThreadBlock {
                thread_serial: self.read_u32()?,
            },
            tag::ROOT_MONITOR_USED => RootReason::MonitorUsed,
            tag::ROOT_THREAD_OBJECT => RootReason::ThreadObject {
                thread_serial: self.read_u32()?,
                trace_serial: self.read_u32()?,
            },
            _ => unreachable!("caller matched root tags"),
        };
        Ok(GcRoot { object_id, reason })
    }

    fn read_class_dump(
        &mut self,
        id_size: IdSize,
        record_offset: u64,
        loaded: &AHashMap<ObjectId, (u32, ObjectId)>,
        strings: &StringTable,
    ) -> Result<ClassDefinition> {
        let class_id = self.read_id(id_size)?;
        let superclass_id = self.read_id(id_size)?;
        let instance_size = self.read_u32()?;
        let constant_count = self.read_u16()?;
        let static_count = self.read_u16()?;
        if constant_count != 0 || static_count != 0 {
            return Err(HeapDumpError::corrupt(
                record_offset,
                "constant-pool/static-field tables are reserved and must be empty",
            ));
        }

        let &(serial, name_id) = loaded.get(&class_id).ok_or_else(|| {
            HeapDumpError::corrupt(record_offset, "class dump without a load-class record")
        })?;
        let name = strings
            .get(name_id)
            .ok_or_else(|| {
                HeapDumpError::corrupt(record_offset, "class name string not in the dump")
            })?
            .to_string();

        let field_count = self.read_u16()?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_name_id = self.read_id(id_size)?;
            let type_tag = self.read_u8()?;
            let ty = FieldType::from_tag(type_tag).ok_or_else(|| {
                HeapDumpError::corrupt(
                    record_offset,
                    format!("unknown field type {:#x}", type_tag),
                )
            })?;
            let field_name = strings
                .get(field_name_id)
                .ok_or_else(|| {
                    HeapDumpError::corrupt(record_offset, "field name string not in the dump")
                })?
                .to_string();
            fields.push(FieldDefinition {
                name: field_name,
                ty,
            });
        }

        Ok(ClassDefinition {
            class_id,
            serial,
            name,
            superclass_id,
            instance_size,
            fields,
        })
    }

    fn read_bytes(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf).map_err(|_| {
            HeapDumpError::corrupt(self.pos, "record truncated")
        })?;
        self.pos += len;
        Ok(buf)
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        if self
            .pos
            .checked_add(len)
            .is_none_or(|end| end > self.file_len)
        {
            return Err(HeapDumpError::corrupt(self.pos, "record truncated"));
        }
        self.reader.seek_relative(len as i64)?;
        self.pos += len;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array::<2>()?))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.read_array::<4>()?))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.read_array::<8>()?))
    }

    fn read_id(&mut self, id_size: IdSize) -> Result<ObjectId> {
        match id_size {
            IdSize::Four => Ok(self.read_u32()? as u64),
            IdSize::Eight => self.read_u64(),
        }
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.reader.read_exact(&mut buf).map_err(|_| {
            HeapDumpError::corrupt(self.pos, "record truncated")
        })?;
        self.pos += N as u64;
        Ok(buf)
    }
}
