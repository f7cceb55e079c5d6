pub mod builder;
pub mod mirror;

pub use builder::DumpBuilder;
pub use mirror::{ClassMirror, FrameMirror, Obj, ObjRef, PrimitiveValues, ThreadMirror, Value};
