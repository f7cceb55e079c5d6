//! Capture-side object model.
//!
//! The dump builder does not introspect arbitrary process memory; it walks
//! mirrors, a small object model the harness builds up front. A mirror's
//! identity is its `Rc` pointer, which gives the builder a stable identity
//! key without any value-equality semantics. Fields are interior-mutable so
//! cyclic graphs can be wired up after construction.

use std::cell::RefCell;
use std::rc::Rc;

use crate::format::writer::pack_elements;
use crate::types::FieldType;

#[derive(Debug, Clone)]
pub struct FieldMirror {
    pub name: String,
    pub ty: FieldType,
}

/// A class: name, optional superclass, and the fields declared by this
/// class only. Static/constant members are out of the capture path.
#[derive(Debug)]
pub struct ClassMirror {
    pub name: String,
    pub superclass: Option<Rc<ClassMirror>>,
    pub fields: Vec<FieldMirror>,
}

impl ClassMirror {
    pub fn new(name: &str, fields: &[(&str, FieldType)]) -> Rc<ClassMirror> {
        Self::with_super(name, None, fields)
    }

    pub fn with_super(
        name: &str,
        superclass: Option<&Rc<ClassMirror>>,
        fields: &[(&str, FieldType)],
    ) -> Rc<ClassMirror> {
        Rc::new(ClassMirror {
            name: name.to_string(),
            superclass: superclass.cloned(),
            fields: fields
                .iter()
                .map(|(name, ty)| FieldMirror {
                    name: name.to_string(),
                    ty: *ty,
                })
                .collect(),
        })
    }

    /// Fields in serialization order: this class's declared fields, then
    /// each superclass's in turn. Instance bytes and the class-dump field
    /// table both follow this order.
    pub fn field_walk(&self) -> Vec<&FieldMirror> {
        let mut walk: Vec<&FieldMirror> = self.fields.iter().collect();
        let mut current = self.superclass.as_deref();
        while let Some(class) = current {
            walk.extend(class.fields.iter());
            current = class.superclass.as_deref();
        }
        walk
    }

    pub fn instance_size(&self, id_size: usize) -> u32 {
        self.field_walk()
            .iter()
            .map(|f| f.ty.byte_size(id_size) as u32)
            .sum()
    }
}

pub type ObjRef = Rc<Obj>;

/// A field value. Reference fields hold other mirrors (or null).
#[derive(Debug, Clone)]
pub enum Value {
    Ref(Option<ObjRef>),
    Bool(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl Value {
    pub fn field_type(&self) -> FieldType {
        match self {
            Value::Ref(_) => FieldType::Object,
            Value::Bool(_) => FieldType::Bool,
            Value::Byte(_) => FieldType::Byte,
            Value::Char(_) => FieldType::Char,
            Value::Short(_) => FieldType::Short,
            Value::Int(_) => FieldType::Int,
            Value::Long(_) => FieldType::Long,
            Value::Float(_) => FieldType::Float,
            Value::Double(_) => FieldType::Double,
        }
    }

    fn default_for(ty: FieldType) -> Value {
        match ty {
            FieldType::Object => Value::Ref(None),
            FieldType::Bool => Value::Bool(false),
            FieldType::Byte => Value::Byte(0),
            FieldType::Char => Value::Char(0),
            FieldType::Short => Value::Short(0),
            FieldType::Int => Value::Int(0),
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
        }
    }
}

/// Elements of a primitive array, one vector per element type.
#[derive(Debug, Clone)]
pub enum PrimitiveValues {
    Bool(Vec<bool>),
    Byte(Vec<i8>),
    Char(Vec<u16>),
    Short(Vec<i16>),
    Int(Vec<i32>),
    Long(Vec<i64>),
    Float(Vec<f32>),
    Double(Vec<f64>),
}

impl PrimitiveValues {
    pub fn element_type(&self) -> FieldType {
        match self {
            PrimitiveValues::Bool(_) => FieldType::Bool,
            PrimitiveValues::Byte(_) => FieldType::Byte,
            PrimitiveValues::Char(_) => FieldType::Char,
            PrimitiveValues::Short(_) => FieldType::Short,
            PrimitiveValues::Int(_) => FieldType::Int,
            PrimitiveValues::Long(_) => FieldType::Long,
            PrimitiveValues::Float(_) => FieldType::Float,
            PrimitiveValues::Double(_) => FieldType::Double,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PrimitiveValues::Bool(v) => v.len(),
            PrimitiveValues::Byte(v) => v.len(),
            PrimitiveValues::Char(v) => v.len(),
            PrimitiveValues::Short(v) => v.len(),
            PrimitiveValues::Int(v) => v.len(),
            PrimitiveValues::Long(v) => v.len(),
            PrimitiveValues::Float(v) => v.len(),
            PrimitiveValues::Double(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pack(&self) -> Vec<u8> {
        match self {
            PrimitiveValues::Bool(v) => pack_elements(v),
            PrimitiveValues::Byte(v) => pack_elements(v),
            PrimitiveValues::Char(v) => pack_elements(v),
            PrimitiveValues::Short(v) => pack_elements(v),
            PrimitiveValues::Int(v) => pack_elements(v),
            PrimitiveValues::Long(v) => pack_elements(v),
            PrimitiveValues::Float(v) => pack_elements(v),
            PrimitiveValues::Double(v) => pack_elements(v),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Payload {
    Instance {
        class: Rc<ClassMirror>,
        values: RefCell<Vec<Value>>,
    },
    ObjectArray {
        class: Rc<ClassMirror>,
        elements: RefCell<Vec<Option<ObjRef>>>,
    },
    PrimitiveArray {
        values: PrimitiveValues,
    },
}

/// One live object to capture: a plain instance, an object array, or a
/// primitive array.
#[derive(Debug)]
pub struct Obj {
    pub(crate) payload: Payload,
}

impl Obj {
    /// New instance of `class` with all fields zeroed/null.
    pub fn instance(class: &Rc<ClassMirror>) -> ObjRef {
        let values = class
            .field_walk()
            .iter()
            .map(|f| Value::default_for(f.ty))
            .collect();
        Rc::new(Obj {
            payload: Payload::Instance {
                class: Rc::clone(class),
                values: RefCell::new(values),
            },
        })
    }

    pub fn object_array(class: &Rc<ClassMirror>, elements: Vec<Option<ObjRef>>) -> ObjRef {
        Rc::new(Obj {
            payload: Payload::ObjectArray {
                class: Rc::clone(class),
                elements: RefCell::new(elements),
            },
        })
    }

    pub fn primitive_array(values: PrimitiveValues) -> ObjRef {
        Rc::new(Obj {
            payload: Payload::PrimitiveArray { values },
        })
    }

    /// Sets a field by name, searching the field walk (so a field declared
    /// by the runtime class shadows a same-named superclass field).
    ///
    /// Panics if the class declares no such field; that is a harness bug,
    /// not a capture failure.
    pub fn set_field(&self, name: &str, value: Value) {
        let Payload::Instance { class, values } = &self.payload else {
            panic!("set_field on a non-instance object");
        };
        let index = class
            .field_walk()
            .iter()
            .position(|f| f.name == name)
            .unwrap_or_else(|| panic!("class {} has no field named {}", class.name, name));
        values.borrow_mut()[index] = value;
    }

    /// Replaces an object-array element in place.
    pub fn set_element(&self, index: usize, element: Option<ObjRef>) {
        let Payload::ObjectArray { elements, .. } = &self.payload else {
            panic!("set_element on a non-array object");
        };
        elements.borrow_mut()[index] = element;
    }

    /// Stable identity key for the capture-scoped handle table.
    pub fn identity(self: &ObjRef) -> usize {
        Rc::as_ptr(self) as usize
    }
}

/// A thread's call stack for `add_stack_trace`: frames innermost first.
#[derive(Debug)]
pub struct ThreadMirror {
    pub name: String,
    pub frames: Vec<FrameMirror>,
}

#[derive(Debug)]
pub struct FrameMirror {
    pub class: Rc<ClassMirror>,
    pub method: String,
    pub signature: String,
    /// -1 for native frames.
    pub line: i32,
}
