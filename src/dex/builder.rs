//! Programmatic construction of compiled units.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dex::{
    ClassDef, ClassDefIndex, DexUnit, EncodedField, EncodedMethod, EncodedValue, FieldId,
    FieldIndex, MethodId, MethodIndex, ProtoIndex, StringIndex, TypeIndex,
};
use crate::flags::AccessFlags;

/// Builds a [`DexUnit`] table by table, interning strings, types, protos,
/// and member references the way a container writer would.
///
/// ```
/// use dexlink::dex::DexUnitBuilder;
/// use dexlink::flags::AccessFlags;
///
/// let mut builder = DexUnitBuilder::new("demo.dex");
/// builder
///     .class("LDemo;")
///     .access_flags(AccessFlags::PUBLIC)
///     .superclass("Ljava/lang/Object;")
///     .instance_field("count", "I", AccessFlags::PRIVATE)
///     .virtual_method("count", "()I", AccessFlags::PUBLIC)
///     .define();
/// let unit = builder.build();
/// assert!(unit.find_class_def("LDemo;").is_some());
/// ```
#[derive(Debug, Default)]
pub struct DexUnitBuilder {
    location: String,
    pre_verified: bool,
    next_code_off: u32,
    strings: Vec<Arc<str>>,
    string_map: HashMap<Arc<str>, StringIndex>,
    type_ids: Vec<StringIndex>,
    type_map: HashMap<StringIndex, TypeIndex>,
    proto_ids: Vec<StringIndex>,
    proto_map: HashMap<StringIndex, ProtoIndex>,
    field_ids: Vec<FieldId>,
    field_map: HashMap<(TypeIndex, StringIndex, TypeIndex), FieldIndex>,
    method_ids: Vec<MethodId>,
    method_map: HashMap<(TypeIndex, StringIndex, ProtoIndex), MethodIndex>,
    class_defs: Vec<ClassDef>,
}

impl DexUnitBuilder {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            next_code_off: 0x70,
            ..Self::default()
        }
    }

    /// Mark every class in the unit as verified ahead of time.
    pub fn pre_verified(&mut self, flag: bool) -> &mut Self {
        self.pre_verified = flag;
        self
    }

    pub fn string(&mut self, s: &str) -> StringIndex {
        if let Some(&idx) = self.string_map.get(s) {
            return idx;
        }
        let arc: Arc<str> = Arc::from(s);
        let idx = StringIndex(self.strings.len() as u32);
        self.strings.push(arc.clone());
        self.string_map.insert(arc, idx);
        idx
    }

    pub fn type_id(&mut self, descriptor: &str) -> TypeIndex {
        let name = self.string(descriptor);
        if let Some(&idx) = self.type_map.get(&name) {
            return idx;
        }
        let idx = TypeIndex(self.type_ids.len() as u32);
        self.type_ids.push(name);
        self.type_map.insert(name, idx);
        idx
    }

    pub fn proto(&mut self, signature: &str) -> ProtoIndex {
        let name = self.string(signature);
        if let Some(&idx) = self.proto_map.get(&name) {
            return idx;
        }
        let idx = ProtoIndex(self.proto_ids.len() as u32);
        self.proto_ids.push(name);
        self.proto_map.insert(name, idx);
        idx
    }

    pub fn field_id(&mut self, class: &str, name: &str, type_descriptor: &str) -> FieldIndex {
        let class_idx = self.type_id(class);
        let name_idx = self.string(name);
        let type_idx = self.type_id(type_descriptor);
        let key = (class_idx, name_idx, type_idx);
        if let Some(&idx) = self.field_map.get(&key) {
            return idx;
        }
        let idx = FieldIndex(self.field_ids.len() as u32);
        self.field_ids.push(FieldId {
            class_idx,
            type_idx,
            name_idx,
        });
        self.field_map.insert(key, idx);
        idx
    }

    /// Synthetic offset of the next code item. Abstract and native
    /// methods have no body and keep offset zero.
    fn code_item_off(&mut self, flags: AccessFlags) -> u32 {
        if flags.intersects(AccessFlags::ABSTRACT | AccessFlags::NATIVE) {
            return 0;
        }
        let off = self.next_code_off;
        self.next_code_off += 0x20;
        off
    }

    pub fn method_id(&mut self, class: &str, name: &str, signature: &str) -> MethodIndex {
        let class_idx = self.type_id(class);
        let name_idx = self.string(name);
        let proto_idx = self.proto(signature);
        let key = (class_idx, name_idx, proto_idx);
        if let Some(&idx) = self.method_map.get(&key) {
            return idx;
        }
        let idx = MethodIndex(self.method_ids.len() as u32);
        self.method_ids.push(MethodId {
            class_idx,
            proto_idx,
            name_idx,
        });
        self.method_map.insert(key, idx);
        idx
    }

    /// Start a class definition. Nothing is recorded until
    /// [`ClassDefBuilder::define`] runs.
    pub fn class(&mut self, descriptor: &str) -> ClassDefBuilder<'_> {
        let class_idx = self.type_id(descriptor);
        let descriptor = descriptor.to_string();
        ClassDefBuilder {
            builder: self,
            descriptor,
            def: ClassDef {
                class_idx,
                access_flags: AccessFlags::PUBLIC.bits(),
                superclass_idx: None,
                interfaces: Vec::new(),
                static_fields: Vec::new(),
                instance_fields: Vec::new(),
                direct_methods: Vec::new(),
                virtual_methods: Vec::new(),
                static_values: Vec::new(),
            },
        }
    }

    pub fn build(self) -> DexUnit {
        let checksum = checksum(&self.strings, self.class_defs.len());
        DexUnit::from_tables(
            self.location,
            checksum,
            self.pre_verified,
            self.strings,
            self.type_ids,
            self.proto_ids,
            self.field_ids,
            self.method_ids,
            self.class_defs,
        )
    }
}

/// FNV-1a over the string pool and definition count. Stands in for the
/// container checksum so identical units compare equal across builds.
fn checksum(strings: &[Arc<str>], def_count: usize) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    let mut mix = |byte: u8| {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    };
    for s in strings {
        for &b in s.as_bytes() {
            mix(b);
        }
        mix(0);
    }
    for &b in (def_count as u32).to_le_bytes().iter() {
        mix(b);
    }
    hash
}

/// Accumulates one class definition against its parent builder.
pub struct ClassDefBuilder<'a> {
    builder: &'a mut DexUnitBuilder,
    descriptor: String,
    def: ClassDef,
}

impl ClassDefBuilder<'_> {
    pub fn access_flags(mut self, flags: AccessFlags) -> Self {
        self.def.access_flags = flags.bits();
        self
    }

    pub fn superclass(mut self, descriptor: &str) -> Self {
        self.def.superclass_idx = Some(self.builder.type_id(descriptor));
        self
    }

    pub fn interface(mut self, descriptor: &str) -> Self {
        let idx = self.builder.type_id(descriptor);
        self.def.interfaces.push(idx);
        self
    }

    pub fn instance_field(mut self, name: &str, type_descriptor: &str, flags: AccessFlags) -> Self {
        let field_idx = self
            .builder
            .field_id(&self.descriptor, name, type_descriptor);
        self.def.instance_fields.push(EncodedField {
            field_idx,
            access_flags: flags.bits(),
        });
        self
    }

    /// Declare a static field, optionally with a compile-time constant.
    /// Constants must be supplied for a contiguous prefix of the static
    /// fields, mirroring the container encoding.
    pub fn static_field(
        mut self,
        name: &str,
        type_descriptor: &str,
        flags: AccessFlags,
        value: Option<EncodedValue>,
    ) -> Self {
        let field_idx = self
            .builder
            .field_id(&self.descriptor, name, type_descriptor);
        self.def.static_fields.push(EncodedField {
            field_idx,
            access_flags: (flags | AccessFlags::STATIC).bits(),
        });
        if let Some(value) = value {
            self.def.static_values.push(value);
        }
        self
    }

    pub fn direct_method(mut self, name: &str, signature: &str, flags: AccessFlags) -> Self {
        let method_idx = self.builder.method_id(&self.descriptor, name, signature);
        let code_off = self.builder.code_item_off(flags);
        self.def.direct_methods.push(EncodedMethod {
            method_idx,
            access_flags: flags.bits(),
            code_off,
        });
        self
    }

    pub fn virtual_method(mut self, name: &str, signature: &str, flags: AccessFlags) -> Self {
        let method_idx = self.builder.method_id(&self.descriptor, name, signature);
        let code_off = self.builder.code_item_off(flags);
        self.def.virtual_methods.push(EncodedMethod {
            method_idx,
            access_flags: flags.bits(),
            code_off,
        });
        self
    }

    /// Record the definition in the unit and return its index.
    pub fn define(self) -> ClassDefIndex {
        let idx = ClassDefIndex(self.builder.class_defs.len() as u32);
        self.builder.class_defs.push(self.def);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_is_stable() {
        let mut builder = DexUnitBuilder::new("intern.dex");
        let a = builder.type_id("LFoo;");
        let b = builder.type_id("LFoo;");
        assert_eq!(a, b);
        let m1 = builder.method_id("LFoo;", "run", "()V");
        let m2 = builder.method_id("LFoo;", "run", "()V");
        let m3 = builder.method_id("LFoo;", "run", "(I)V");
        assert_eq!(m1, m2);
        assert_ne!(m1, m3);
    }

    #[test]
    fn test_identical_units_share_checksums() {
        let build = || {
            let mut b = DexUnitBuilder::new("sum.dex");
            b.class("LFoo;")
                .superclass("Ljava/lang/Object;")
                .static_field("A", "I", AccessFlags::PUBLIC, Some(EncodedValue::Int(7)))
                .define();
            b.build()
        };
        assert_eq!(build().checksum(), build().checksum());
    }

    #[test]
    fn test_only_concrete_methods_get_code_items() {
        let mut builder = DexUnitBuilder::new("code.dex");
        let def_idx = builder
            .class("LCode;")
            .superclass("Ljava/lang/Object;")
            .direct_method(
                "<init>",
                "()V",
                AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
            )
            .virtual_method("run", "()V", AccessFlags::PUBLIC)
            .virtual_method("hook", "()V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
            .define();
        let unit = builder.build();
        let def = unit.class_def(def_idx);
        assert_ne!(def.direct_methods[0].code_off, 0);
        assert_ne!(def.virtual_methods[0].code_off, 0);
        assert_ne!(
            def.direct_methods[0].code_off,
            def.virtual_methods[0].code_off
        );
        assert_eq!(def.virtual_methods[1].code_off, 0);
    }

    #[test]
    fn test_static_values_stay_positional() {
        let mut builder = DexUnitBuilder::new("vals.dex");
        let def_idx = builder
            .class("LVals;")
            .superclass("Ljava/lang/Object;")
            .static_field("first", "J", AccessFlags::PUBLIC, Some(EncodedValue::Long(9)))
            .static_field("second", "Z", AccessFlags::PUBLIC, Some(EncodedValue::Boolean(true)))
            .static_field("third", "I", AccessFlags::PUBLIC, None)
            .define();
        let unit = builder.build();
        let def = unit.class_def(def_idx);
        assert_eq!(def.static_fields.len(), 3);
        assert_eq!(
            def.static_values,
            vec![EncodedValue::Long(9), EncodedValue::Boolean(true)]
        );
    }
}
