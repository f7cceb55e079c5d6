pub mod writer;

pub use writer::DumpWriter;

/// Null-terminated magic the stream must start with.
pub const MAGIC: &[u8] = b"HEAP PROFILE 1.0.3\0";

/// Bytes of reserved padding between the id-size byte and the timestamp.
pub const HEADER_RESERVED: usize = 4;

/// Record tags. Where classic HPROF defines a tag we reuse its value;
/// root records are flat top-level records here (no heap-dump segment
/// nesting), so they get their own 0x10 range.
pub mod tag {
    pub const STRING_UTF8: u8 = 0x01;
    pub const LOAD_CLASS: u8 = 0x02;
    pub const STACK_FRAME: u8 = 0x04;
    pub const STACK_TRACE: u8 = 0x05;

    pub const ROOT_UNKNOWN: u8 = 0x10;
    pub const ROOT_GLOBAL_JNI: u8 = 0x11;
    pub const ROOT_LOCAL_JNI: u8 = 0x12;
    pub const ROOT_JAVA_FRAME: u8 = 0x13;
    pub const ROOT_NATIVE_STACK: u8 = 0x14;
    pub const ROOT_STICKY_CLASS: u8 = 0x15;
    pub const ROOT_THREAD_BLOCK: u8 = 0x16;
    pub const ROOT_MONITOR_USED: u8 = 0x17;
    pub const ROOT_THREAD_OBJECT: u8 = 0x18;

    pub const CLASS_DUMP: u8 = 0x20;
    pub const INSTANCE_DUMP: u8 = 0x21;
    pub const OBJECT_ARRAY_DUMP: u8 = 0x22;
    pub const PRIMITIVE_ARRAY_DUMP: u8 = 0x23;
}

/// Width of every identifier in the stream, fixed by the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSize {
    Four,
    Eight,
}

impl IdSize {
    pub fn bytes(self) -> usize {
        match self {
            IdSize::Four => 4,
            IdSize::Eight => 8,
        }
    }

    pub fn from_byte(b: u8) -> Option<IdSize> {
        match b {
            4 => Some(IdSize::Four),
            8 => Some(IdSize::Eight),
            _ => None,
        }
    }
}
