use std::io::Write;

use crate::format::{HEADER_RESERVED, IdSize, MAGIC, tag};
use crate::types::{FieldType, GcRoot, HeapDumpError, ObjectId, Result, RootReason};

/// Append-only, single-pass encoder for the dump record stream.
///
/// Every record body is staged in a scratch buffer so the 4-byte length
/// prefix can be written first. `finish` must be called to flush; it
/// consumes the writer, so it cannot be called twice and no record can
/// follow it.
pub struct DumpWriter<W: Write> {
    out: W,
    id_size: IdSize,
    body: Vec<u8>,
}

impl<W: Write> DumpWriter<W> {
    /// Writes the stream header: magic, id-size byte, reserved bytes, and
    /// the 8-byte creation timestamp (milliseconds).
    pub fn new(mut out: W, id_size: IdSize, timestamp_millis: u64) -> Result<Self> {
        out.write_all(MAGIC)?;
        out.write_all(&[id_size.bytes() as u8])?;
        out.write_all(&[0u8; HEADER_RESERVED])?;
        out.write_all(&timestamp_millis.to_be_bytes())?;
        Ok(Self {
            out,
            id_size,
            body: Vec::new(),
        })
    }

    pub fn id_size(&self) -> IdSize {
        self.id_size
    }

    pub fn write_string(&mut self, id: ObjectId, s: &str) -> Result<()> {
        self.push_id(id)?;
        self.body.extend_from_slice(s.as_bytes());
        self.emit(tag::STRING_UTF8)
    }

    pub fn write_load_class(
        &mut self,
        serial: u32,
        class_id: ObjectId,
        trace_serial: u32,
        name_string_id: ObjectId,
    ) -> Result<()> {
        self.push_u32(serial);
        self.push_id(class_id)?;
        self.push_u32(trace_serial);
        self.push_id(name_string_id)?;
        self.emit(tag::LOAD_CLASS)
    }

    pub fn write_stack_frame(
        &mut self,
        frame_id: ObjectId,
        method_name_id: ObjectId,
        signature_id: ObjectId,
        class_id: ObjectId,
        line: i32,
    ) -> Result<()> {
        self.push_id(frame_id)?;
        self.push_id(method_name_id)?;
        self.push_id(signature_id)?;
        self.push_id(class_id)?;
        self.body.extend_from_slice(&line.to_be_bytes());
        self.emit(tag::STACK_FRAME)
    }

    pub fn write_stack_trace(
        &mut self,
        serial: u32,
        thread_serial: u32,
        frame_ids: &[ObjectId],
    ) -> Result<()> {
        self.push_u32(serial);
        self.push_u32(thread_serial);
        self.push_u32(frame_ids.len() as u32);
        for &frame in frame_ids {
            self.push_id(frame)?;
        }
        self.emit(tag::STACK_TRACE)
    }

    pub fn write_root(&mut self, root: GcRoot) -> Result<()> {
        self.push_id(root.object_id)?;
        let tag = match root.reason {
            RootReason::Unknown => tag::ROOT_UNKNOWN,
            RootReason::GlobalJni => tag::ROOT_GLOBAL_JNI,
            RootReason::LocalJni => tag::ROOT_LOCAL_JNI,
            RootReason::JavaFrame {
                thread_serial,
                frame_index,
            } => {
                self.push_u32(thread_serial);
                self.push_u32(frame_index);
                tag::ROOT_JAVA_FRAME
            }
            RootReason::NativeStack { thread_serial } => {
                self.push_u32(thread_serial);
                tag::ROOT_NATIVE_STACK
            }
            RootReason::StickyClass => tag::ROOT_STICKY_CLASS,
            RootReason::ThreadBlock { thread_serial } => {
                self.push_u32(thread_serial);
                tag::ROOT_THREAD_BLOCK
            }
            RootReason::MonitorUsed => tag::ROOT_MONITOR_USED,
            RootReason::ThreadObject {
                thread_serial,
                trace_serial,
            } => {
                self.push_u32(thread_serial);
                self.push_u32(trace_serial);
                tag::ROOT_THREAD_OBJECT
            }
        };
        self.emit(tag)
    }

    /// Constant-pool and static-field tables are reserved and always empty.
    pub fn write_class_dump(
        &mut self,
        class_id: ObjectId,
        superclass_id: ObjectId,
        instance_size: u32,
        fields: &[(ObjectId, FieldType)],
    ) -> Result<()> {
        self.push_id(class_id)?;
        self.push_id(superclass_id)?;
        self.push_u32(instance_size);
        self.push_u16(0); // constant pool
        self.push_u16(0); // static fields
        self.push_u16(fields.len() as u16);
        for &(name_id, ty) in fields {
            self.push_id(name_id)?;
            self.body.push(ty.tag());
        }
        self.emit(tag::CLASS_DUMP)
    }

    /// `field_bytes` must follow the field-walk order of the instance's
    /// class dump exactly; nothing here re-validates the layout.
    pub fn write_instance_dump(
        &mut self,
        object_id: ObjectId,
        class_id: ObjectId,
        field_bytes: &[u8],
    ) -> Result<()> {
        self.push_id(object_id)?;
        self.push_id(class_id)?;
        self.push_u32(field_bytes.len() as u32);
        self.body.extend_from_slice(field_bytes);
        self.emit(tag::INSTANCE_DUMP)
    }

    pub fn write_object_array(
        &mut self,
        object_id: ObjectId,
        array_class_id: ObjectId,
        elements: &[ObjectId],
    ) -> Result<()> {
        self.push_id(object_id)?;
        self.push_id(array_class_id)?;
        self.push_u32(elements.len() as u32);
        for &el in elements {
            self.push_id(el)?;
        }
        self.emit(tag::OBJECT_ARRAY_DUMP)
    }

    /// `packed` holds `count` elements already encoded most-significant-
    /// byte-first at the element type's width.
    pub fn write_primitive_array(
        &mut self,
        object_id: ObjectId,
        element_type: FieldType,
        count: u32,
        packed: &[u8],
    ) -> Result<()> {
        debug_assert_eq!(
            packed.len(),
            count as usize * element_type.byte_size(self.id_size.bytes())
        );
        self.push_id(object_id)?;
        self.body.push(element_type.tag());
        self.push_u32(count);
        self.body.extend_from_slice(packed);
        self.emit(tag::PRIMITIVE_ARRAY_DUMP)
    }

    /// Flushes and returns the underlying writer. Consumes `self`: after
    /// this no further records can be appended.
    pub fn finish(mut self) -> Result<W> {
        self.out.flush()?;
        Ok(self.out)
    }

    fn emit(&mut self, tag: u8) -> Result<()> {
        self.out.write_all(&[tag])?;
        // Relative timestamp; capture happens at a single instant.
        self.out.write_all(&0u32.to_be_bytes())?;
        self.out.write_all(&(self.body.len() as u32).to_be_bytes())?;
        self.out.write_all(&self.body)?;
        self.body.clear();
        Ok(())
    }

    fn push_id(&mut self, id: ObjectId) -> Result<()> {
        match self.id_size {
            IdSize::Eight => self.body.extend_from_slice(&id.to_be_bytes()),
            IdSize::Four => {
                let narrow = u32::try_from(id).map_err(|_| {
                    HeapDumpError::Capture(format!("identifier {} exceeds 4-byte id width", id))
                })?;
                self.body.extend_from_slice(&narrow.to_be_bytes());
            }
        }
        Ok(())
    }

    fn push_u32(&mut self, v: u32) {
        self.body.extend_from_slice(&v.to_be_bytes());
    }

    fn push_u16(&mut self, v: u16) {
        self.body.extend_from_slice(&v.to_be_bytes());
    }
}

/// Packs primitive values most-significant-byte-first for
/// `write_primitive_array`. Floats and doubles go through their raw bit
/// patterns so round trips are bit-exact.
pub fn pack_elements<T: PackElement>(values: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * T::TYPE.byte_size(8));
    for v in values {
        v.pack_into(&mut out);
    }
    out
}

pub trait PackElement {
    const TYPE: FieldType;
    fn pack_into(&self, out: &mut Vec<u8>);
}

macro_rules! pack_element {
    ($rust:ty, $ft:expr, |$v:ident| $bytes:expr) => {
        impl PackElement for $rust {
            const TYPE: FieldType = $ft;
            fn pack_into(&self, out: &mut Vec<u8>) {
                let $v = *self;
                out.extend_from_slice(&$bytes);
            }
        }
    };
}

pack_element!(bool, FieldType::Bool, |v| [v as u8]);
pack_element!(i8, FieldType::Byte, |v| v.to_be_bytes());
pack_element!(u16, FieldType::Char, |v| v.to_be_bytes());
pack_element!(i16, FieldType::Short, |v| v.to_be_bytes());
pack_element!(i32, FieldType::Int, |v| v.to_be_bytes());
pack_element!(i64, FieldType::Long, |v| v.to_be_bytes());
pack_element!(f32, FieldType::Float, |v| v.to_bits().to_be_bytes());
pack_element!(f64, FieldType::Double, |v| v.to_bits().to_be_bytes());

#[cfg(test)]
mod tests {
    use super::*;

    fn header_len() -> usize {
        MAGIC.len() + 1 + HEADER_RESERVED + 8
    }

    #[test]
    fn test_header_layout() {
        let w = DumpWriter::new(Vec::new(), IdSize::Eight, 0x1122334455667788).unwrap();
        let bytes = w.finish().unwrap();

        assert_eq!(&bytes[..MAGIC.len()], MAGIC);
        assert_eq!(bytes[MAGIC.len()], 8);
        assert_eq!(&bytes[MAGIC.len() + 1..MAGIC.len() + 5], &[0, 0, 0, 0]);
        assert_eq!(
            &bytes[MAGIC.len() + 5..],
            &0x1122334455667788u64.to_be_bytes()
        );
    }

    #[test]
    fn test_record_framing() {
        let mut w = DumpWriter::new(Vec::new(), IdSize::Eight, 0).unwrap();
        w.write_string(3, "ab").unwrap();
        let bytes = w.finish().unwrap();

        let rec = &bytes[header_len()..];
        assert_eq!(rec[0], tag::STRING_UTF8);
        assert_eq!(&rec[1..5], &[0, 0, 0, 0]); // relative timestamp
        assert_eq!(&rec[5..9], &10u32.to_be_bytes()); // 8-byte id + "ab"
        assert_eq!(&rec[9..17], &3u64.to_be_bytes());
        assert_eq!(&rec[17..19], b"ab");
    }

    #[test]
    fn test_four_byte_ids() {
        let mut w = DumpWriter::new(Vec::new(), IdSize::Four, 0).unwrap();
        w.write_string(7, "x").unwrap();
        let bytes = w.finish().unwrap();

        let rec = &bytes[header_len()..];
        assert_eq!(&rec[5..9], &5u32.to_be_bytes()); // 4-byte id + "x"
        assert_eq!(&rec[9..13], &7u32.to_be_bytes());

        let mut w = DumpWriter::new(Vec::new(), IdSize::Four, 0).unwrap();
        let err = w.write_string(u64::MAX, "x").unwrap_err();
        assert!(matches!(err, HeapDumpError::Capture(_)));
    }

    #[test]
    fn test_pack_elements_bit_exact() {
        let packed = pack_elements(&[1.5f64, -0.0, f64::NAN]);
        assert_eq!(packed.len(), 24);
        assert_eq!(&packed[..8], &1.5f64.to_bits().to_be_bytes());
        assert_eq!(&packed[8..16], &(-0.0f64).to_bits().to_be_bytes());
        assert_eq!(&packed[16..24], &f64::NAN.to_bits().to_be_bytes());

        let packed = pack_elements(&[0x1234u16, 0xffff]);
        assert_eq!(packed, vec![0x12, 0x34, 0xff, 0xff]);

        let packed = pack_elements(&[true, false]);
        assert_eq!(packed, vec![1, 0]);
    }

    #[test]
    fn test_class_dump_reserved_tables() {
        let mut w = DumpWriter::new(Vec::new(), IdSize::Eight, 0).unwrap();
        w.write_class_dump(10, 0, 16, &[(5, FieldType::Object), (6, FieldType::Int)])
            .unwrap();
        let bytes = w.finish().unwrap();

        let body = &bytes[header_len() + 9..];
        assert_eq!(&body[..8], &10u64.to_be_bytes());
        assert_eq!(&body[8..16], &0u64.to_be_bytes());
        assert_eq!(&body[16..20], &16u32.to_be_bytes());
        assert_eq!(&body[20..22], &[0, 0]); // constant pool count
        assert_eq!(&body[22..24], &[0, 0]); // static field count
        assert_eq!(&body[24..26], &2u16.to_be_bytes());
        assert_eq!(&body[26..34], &5u64.to_be_bytes());
        assert_eq!(body[34], FieldType::Object.tag());
        assert_eq!(&body[35..43], &6u64.to_be_bytes());
        assert_eq!(body[43], FieldType::Int.tag());
    }
}
