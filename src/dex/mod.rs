//! In-memory model of a compiled unit.
//!
//! A unit is the read-only accessor surface the linker consumes: interned
//! string, type, proto, field, and method tables plus per-class definitions.
//! How the bytes arrive in memory is someone else's problem; see
//! [`builder::DexUnitBuilder`] for constructing units programmatically.

use std::sync::Arc;

pub mod builder;

pub use builder::DexUnitBuilder;

macro_rules! index_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            pub fn as_usize(self) -> usize {
                self.0 as usize
            }
        }
    };
}

index_type!(
    /// Index into a unit's string pool.
    StringIndex
);
index_type!(
    /// Index into a unit's type table.
    TypeIndex
);
index_type!(
    /// Index into a unit's proto table.
    ProtoIndex
);
index_type!(
    /// Index into a unit's field table.
    FieldIndex
);
index_type!(
    /// Index into a unit's method table.
    MethodIndex
);
index_type!(
    /// Index into a unit's class definition list.
    ClassDefIndex
);

/// Symbolic field reference: declaring type, field type, name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldId {
    pub class_idx: TypeIndex,
    pub type_idx: TypeIndex,
    pub name_idx: StringIndex,
}

/// Symbolic method reference: declaring type, signature proto, name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodId {
    pub class_idx: TypeIndex,
    pub proto_idx: ProtoIndex,
    pub name_idx: StringIndex,
}

/// A field declared by a class definition.
#[derive(Debug, Clone, Copy)]
pub struct EncodedField {
    pub field_idx: FieldIndex,
    pub access_flags: u32,
}

/// A method declared by a class definition. `code_off` is an opaque handle
/// to the body; zero means no code (abstract or native).
#[derive(Debug, Clone, Copy)]
pub struct EncodedMethod {
    pub method_idx: MethodIndex,
    pub access_flags: u32,
    pub code_off: u32,
}

/// Compile-time constant for a static field. Only primitives and null are
/// representable; anything else is assigned by the initializer itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncodedValue {
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
}

/// One class definition inside a unit. Field and method lists keep the
/// declaration order of the source; `static_values` is a prefix of
/// `static_fields` in the same order.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub class_idx: TypeIndex,
    pub access_flags: u32,
    pub superclass_idx: Option<TypeIndex>,
    pub interfaces: Vec<TypeIndex>,
    pub static_fields: Vec<EncodedField>,
    pub instance_fields: Vec<EncodedField>,
    pub direct_methods: Vec<EncodedMethod>,
    pub virtual_methods: Vec<EncodedMethod>,
    pub static_values: Vec<EncodedValue>,
}

/// A loaded compiled unit. Immutable once built; every accessor is a plain
/// table read.
#[derive(Debug)]
pub struct DexUnit {
    location: String,
    checksum: u32,
    pre_verified: bool,
    strings: Vec<Arc<str>>,
    type_ids: Vec<StringIndex>,
    proto_ids: Vec<StringIndex>,
    field_ids: Vec<FieldId>,
    method_ids: Vec<MethodId>,
    class_defs: Vec<ClassDef>,
}

impl DexUnit {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_tables(
        location: String,
        checksum: u32,
        pre_verified: bool,
        strings: Vec<Arc<str>>,
        type_ids: Vec<StringIndex>,
        proto_ids: Vec<StringIndex>,
        field_ids: Vec<FieldId>,
        method_ids: Vec<MethodId>,
        class_defs: Vec<ClassDef>,
    ) -> Self {
        Self {
            location,
            checksum,
            pre_verified,
            strings,
            type_ids,
            proto_ids,
            field_ids,
            method_ids,
            class_defs,
        }
    }

    /// Where the unit came from, for logs and error messages.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    /// Whether every class in this unit passed ahead-of-time verification.
    pub fn is_pre_verified(&self) -> bool {
        self.pre_verified
    }

    pub fn string_count(&self) -> usize {
        self.strings.len()
    }

    pub fn type_count(&self) -> usize {
        self.type_ids.len()
    }

    pub fn proto_count(&self) -> usize {
        self.proto_ids.len()
    }

    pub fn field_count(&self) -> usize {
        self.field_ids.len()
    }

    pub fn method_count(&self) -> usize {
        self.method_ids.len()
    }

    pub fn class_def_count(&self) -> usize {
        self.class_defs.len()
    }

    pub fn string_at(&self, idx: StringIndex) -> &str {
        &self.strings[idx.as_usize()]
    }

    pub fn type_descriptor(&self, idx: TypeIndex) -> &str {
        self.string_at(self.type_ids[idx.as_usize()])
    }

    pub fn proto_signature(&self, idx: ProtoIndex) -> &str {
        self.string_at(self.proto_ids[idx.as_usize()])
    }

    pub fn field_id(&self, idx: FieldIndex) -> &FieldId {
        &self.field_ids[idx.as_usize()]
    }

    pub fn field_name(&self, idx: FieldIndex) -> &str {
        self.string_at(self.field_id(idx).name_idx)
    }

    pub fn field_type_descriptor(&self, idx: FieldIndex) -> &str {
        self.type_descriptor(self.field_id(idx).type_idx)
    }

    pub fn method_id(&self, idx: MethodIndex) -> &MethodId {
        &self.method_ids[idx.as_usize()]
    }

    pub fn method_name(&self, idx: MethodIndex) -> &str {
        self.string_at(self.method_id(idx).name_idx)
    }

    pub fn method_signature(&self, idx: MethodIndex) -> &str {
        self.proto_signature(self.method_id(idx).proto_idx)
    }

    pub fn class_def(&self, idx: ClassDefIndex) -> &ClassDef {
        &self.class_defs[idx.as_usize()]
    }

    pub fn class_defs(&self) -> impl Iterator<Item = (ClassDefIndex, &ClassDef)> {
        self.class_defs
            .iter()
            .enumerate()
            .map(|(i, def)| (ClassDefIndex(i as u32), def))
    }

    /// Locate the definition of `descriptor` in this unit, if any.
    pub fn find_class_def(&self, descriptor: &str) -> Option<ClassDefIndex> {
        self.class_defs()
            .find(|(_, def)| self.type_descriptor(def.class_idx) == descriptor)
            .map(|(idx, _)| idx)
    }
}
