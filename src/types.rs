/// Identifier assigned to every object, class and string in a dump.
/// 0 is reserved for null and never assigned.
pub type ObjectId = u64;

/// Compact identifier in `0..N` assigned by the remapper; all analysis-time
/// flat arrays are indexed by this.
pub type DenseId = u32;

/// Basic field/element types, with the classic HPROF tag values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Object = 2,
    Bool = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
}

impl FieldType {
    pub fn from_tag(tag: u8) -> Option<FieldType> {
        Some(match tag {
            2 => FieldType::Object,
            4 => FieldType::Bool,
            5 => FieldType::Char,
            6 => FieldType::Float,
            7 => FieldType::Double,
            8 => FieldType::Byte,
            9 => FieldType::Short,
            10 => FieldType::Int,
            11 => FieldType::Long,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Serialized width in bytes. `Object` fields are identifier-sized and
    /// depend on the dump header, so callers pass the id width in.
    pub fn byte_size(self, id_size: usize) -> usize {
        match self {
            FieldType::Object => id_size,
            FieldType::Bool | FieldType::Byte => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Float | FieldType::Int => 4,
            FieldType::Double | FieldType::Long => 8,
        }
    }
}

/// Why an object is a GC root. Variants carry only the extra payload the
/// corresponding record format defines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootReason {
    Unknown,
    GlobalJni,
    LocalJni,
    JavaFrame { thread_serial: u32, frame_index: u32 },
    NativeStack { thread_serial: u32 },
    StickyClass,
    ThreadBlock { thread_serial: u32 },
    MonitorUsed,
    ThreadObject { thread_serial: u32, trace_serial: u32 },
}

impl RootReason {
    /// Stable display label, used by the roots-summary report section.
    pub fn label(&self) -> &'static str {
        match self {
            RootReason::Unknown => "unknown",
            RootReason::GlobalJni => "global JNI",
            RootReason::LocalJni => "local JNI",
            RootReason::JavaFrame { .. } => "java frame",
            RootReason::NativeStack { .. } => "native stack",
            RootReason::StickyClass => "sticky class",
            RootReason::ThreadBlock { .. } => "thread block",
            RootReason::MonitorUsed => "monitor used",
            RootReason::ThreadObject { .. } => "thread object",
        }
    }
}

/// A GC root entry as parsed from the dump: one record per `add_root_*`
/// call, so the same object may appear several times with different
/// (or identical) reasons.
#[derive(Debug, Clone, Copy)]
pub struct GcRoot {
    pub object_id: ObjectId,
    pub reason: RootReason,
}

#[derive(Debug, thiserror::Error)]
pub enum HeapDumpError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt dump at offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    #[error("inconsistent dump: {reason} (id {id})")]
    Inconsistent { id: ObjectId, reason: String },

    #[error("capture failed: {0}")]
    Capture(String),
}

impl HeapDumpError {
    pub fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        HeapDumpError::Corrupt {
            offset,
            reason: reason.into(),
        }
    }

    pub fn inconsistent(id: ObjectId, reason: impl Into<String>) -> Self {
        HeapDumpError::Inconsistent {
            id,
            reason: reason.into(),
        }
    }
}

pub type Result<T, E = HeapDumpError> = std::result::Result<T, E>;
