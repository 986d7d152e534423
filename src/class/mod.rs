//! Runtime class metadata.
//!
//! A [`Class`] is the central entity of the linker: descriptor, status,
//! hierarchy, fields, dispatch tables, and the monitor that serializes its
//! state transitions. Metadata is allocated once, leaked, and addressed
//! through [`ClassRef`]/[`MethodRef`]/[`FieldRef`], which are plain `Copy`
//! pointers valid for the process lifetime.

use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::ptr::NonNull;

use crate::descriptor::{self, PrimitiveKind};
use crate::dex::{ClassDefIndex, DexUnit, FieldIndex, MethodIndex};
use crate::error::LinkError;
use crate::flags::AccessFlags;
use crate::sync::{
    Arc, AtomicPtr, AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Condvar, Mutex, MutexGuard,
    OnceLock, Ordering, RwLock, RwLockReadGuard,
};

/// Slots in the fixed-size interface method table used as a dispatch
/// inline cache.
pub const IMT_SIZE: usize = 43;

/// Identity of a defining class loader. Zero is the boot loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoaderId(pub u32);

impl LoaderId {
    pub const BOOT: LoaderId = LoaderId(0);

    pub fn is_boot(self) -> bool {
        self.0 == 0
    }
}

/// Linking states in transition order. A class only moves to numerically
/// higher states, except the jump to `Error` (allowed from anywhere) and
/// the one-time `Retired` marking of a replaced placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ClassStatus {
    Retired = 0,
    Error = 1,
    Idx = 2,
    Loaded = 3,
    Resolving = 4,
    Resolved = 5,
    Verifying = 6,
    RetryVerificationAtRuntime = 7,
    VerifyingAtRuntime = 8,
    Verified = 9,
    Initializing = 10,
    Initialized = 11,
}

impl ClassStatus {
    fn from_u8(value: u8) -> ClassStatus {
        match value {
            0 => ClassStatus::Retired,
            1 => ClassStatus::Error,
            2 => ClassStatus::Idx,
            3 => ClassStatus::Loaded,
            4 => ClassStatus::Resolving,
            5 => ClassStatus::Resolved,
            6 => ClassStatus::Verifying,
            7 => ClassStatus::RetryVerificationAtRuntime,
            8 => ClassStatus::VerifyingAtRuntime,
            9 => ClassStatus::Verified,
            10 => ClassStatus::Initializing,
            11 => ClassStatus::Initialized,
            _ => unreachable!("invalid class status byte {value}"),
        }
    }
}

/// Dispatch expectation at a call site, carried into member resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeKind {
    Static,
    Direct,
    Virtual,
    Super,
    Interface,
}

/// Role of a method record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Statics, constructors, and private methods; never in a vtable.
    Direct,
    /// Declared virtual method dispatched through the vtable.
    Virtual,
    /// Synthesized stand-in for an interface method the class does not
    /// implement.
    Miranda,
    /// Sentinel marking a colliding interface-method-table slot.
    Conflict,
}

macro_rules! leaked_handle {
    ($(#[$doc:meta])* $handle:ident, $target:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy)]
        pub struct $handle(NonNull<$target>);

        // SAFETY: the pointee is leaked at construction and never
        // deallocated, and all of its mutable state is atomic or behind
        // locks, so shared access from any thread is sound.
        unsafe impl Send for $handle {}
        unsafe impl Sync for $handle {}

        impl $handle {
            pub(crate) fn new(value: $target) -> $handle {
                $handle(NonNull::from(Box::leak(Box::new(value))))
            }

            /// The pointee, at its full immortal lifetime.
            pub fn get(&self) -> &'static $target {
                // SAFETY: constructed from Box::leak, never freed.
                unsafe { &*self.0.as_ptr() }
            }

            pub(crate) fn as_ptr(&self) -> *mut $target {
                self.0.as_ptr()
            }

            pub(crate) fn from_ptr(ptr: *mut $target) -> Option<$handle> {
                NonNull::new(ptr).map($handle)
            }
        }

        impl Deref for $handle {
            type Target = $target;

            fn deref(&self) -> &$target {
                self.get()
            }
        }

        impl PartialEq for $handle {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }

        impl Eq for $handle {}

        impl Hash for $handle {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.0.hash(state);
            }
        }
    };
}

leaked_handle!(
    /// Handle to immortal [`Class`] metadata. Equality is pointer identity:
    /// one class object per (descriptor, loader), plus retired placeholders.
    ClassRef,
    Class
);
leaked_handle!(
    /// Handle to an immortal [`Method`] record.
    MethodRef,
    Method
);
leaked_handle!(
    /// Handle to an immortal [`Field`] record.
    FieldRef,
    Field
);

impl Debug for ClassRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.descriptor())
    }
}

impl Debug for MethodRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.signature())
    }
}

impl Debug for FieldRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name(), self.type_descriptor())
    }
}

/// A declared field. The declaring class is a non-owning back-reference,
/// repointed when a placeholder class is swapped for its final object.
pub struct Field {
    declaring_class: AtomicPtr<Class>,
    unit: &'static DexUnit,
    dex_field_index: FieldIndex,
    access_flags: AccessFlags,
    offset: AtomicU32,
}

impl Field {
    /// Offset value before layout has run.
    pub const UNSET_OFFSET: u32 = u32::MAX;

    pub(crate) fn new(
        declaring_class: ClassRef,
        unit: &'static DexUnit,
        dex_field_index: FieldIndex,
        access_flags: AccessFlags,
    ) -> Field {
        Field {
            declaring_class: AtomicPtr::new(declaring_class.as_ptr()),
            unit,
            dex_field_index,
            access_flags,
            offset: AtomicU32::new(Field::UNSET_OFFSET),
        }
    }

    pub fn declaring_class(&self) -> ClassRef {
        match ClassRef::from_ptr(self.declaring_class.load(Ordering::Acquire)) {
            Some(class) => class,
            None => unreachable!("field without a declaring class"),
        }
    }

    pub(crate) fn repoint_declaring_class(&self, to: ClassRef) {
        self.declaring_class.store(to.as_ptr(), Ordering::Release);
    }

    pub fn unit(&self) -> &'static DexUnit {
        self.unit
    }

    pub fn dex_field_index(&self) -> FieldIndex {
        self.dex_field_index
    }

    pub fn name(&self) -> &'static str {
        self.unit.field_name(self.dex_field_index)
    }

    pub fn type_descriptor(&self) -> &'static str {
        self.unit.field_type_descriptor(self.dex_field_index)
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    pub fn is_reference(&self) -> bool {
        descriptor::is_reference(self.type_descriptor())
    }

    /// Storage width in bytes, 4 for references.
    pub fn width(&self) -> usize {
        descriptor::field_width(self.type_descriptor())
    }

    /// Byte offset within the instance, or within the static storage
    /// block for statics. Invariant once the class is resolved.
    pub fn offset(&self) -> u32 {
        self.offset.load(Ordering::Acquire)
    }

    pub(crate) fn set_offset(&self, offset: u32) {
        self.offset.store(offset, Ordering::Release);
    }
}

/// A method record. One struct covers all four roles; `kind` tags the
/// variant. Entry points stay mutable after linking, and racing fix-ups
/// are benign because every writer installs the same value.
pub struct Method {
    declaring_class: AtomicPtr<Class>,
    unit: Option<&'static DexUnit>,
    dex_method_index: MethodIndex,
    access_flags: AccessFlags,
    kind: MethodKind,
    vtable_index: AtomicU32,
    code_off: u32,
    entry_point: AtomicUsize,
    bridge_entry: AtomicUsize,
}

impl Method {
    /// Vtable index of methods that are not virtually dispatched.
    pub const NO_VTABLE_INDEX: u32 = u32::MAX;

    pub(crate) fn new(
        declaring_class: ClassRef,
        unit: &'static DexUnit,
        dex_method_index: MethodIndex,
        access_flags: AccessFlags,
        kind: MethodKind,
        code_off: u32,
    ) -> Method {
        Method {
            declaring_class: AtomicPtr::new(declaring_class.as_ptr()),
            unit: Some(unit),
            dex_method_index,
            access_flags,
            kind,
            vtable_index: AtomicU32::new(Method::NO_VTABLE_INDEX),
            code_off,
            entry_point: AtomicUsize::new(0),
            bridge_entry: AtomicUsize::new(0),
        }
    }

    /// The interface-method-table conflict sentinel. Exactly one exists
    /// per runtime; it belongs to no unit and is repointed at the root
    /// class once the boot image is up.
    pub(crate) fn new_conflict_sentinel() -> Method {
        Method {
            declaring_class: AtomicPtr::new(std::ptr::null_mut()),
            unit: None,
            dex_method_index: MethodIndex(0),
            access_flags: AccessFlags::PUBLIC,
            kind: MethodKind::Conflict,
            vtable_index: AtomicU32::new(Method::NO_VTABLE_INDEX),
            code_off: 0,
            entry_point: AtomicUsize::new(0),
            bridge_entry: AtomicUsize::new(0),
        }
    }

    /// Clone an interface method into a miranda stand-in declared by
    /// `declaring_class`.
    pub(crate) fn new_miranda(interface_method: &Method, declaring_class: ClassRef) -> Method {
        let unit = match interface_method.unit {
            Some(unit) => unit,
            None => unreachable!("miranda source must come from a unit"),
        };
        Method {
            declaring_class: AtomicPtr::new(declaring_class.as_ptr()),
            unit: Some(unit),
            dex_method_index: interface_method.dex_method_index,
            access_flags: interface_method.access_flags | AccessFlags::ABSTRACT,
            kind: MethodKind::Miranda,
            vtable_index: AtomicU32::new(Method::NO_VTABLE_INDEX),
            code_off: 0,
            entry_point: AtomicUsize::new(0),
            bridge_entry: AtomicUsize::new(0),
        }
    }

    pub fn declaring_class(&self) -> ClassRef {
        match ClassRef::from_ptr(self.declaring_class.load(Ordering::Acquire)) {
            Some(class) => class,
            None => unreachable!("method without a declaring class"),
        }
    }

    pub(crate) fn repoint_declaring_class(&self, to: ClassRef) {
        self.declaring_class.store(to.as_ptr(), Ordering::Release);
    }

    pub fn kind(&self) -> MethodKind {
        self.kind
    }

    pub fn dex_method_index(&self) -> MethodIndex {
        self.dex_method_index
    }

    pub fn name(&self) -> &'static str {
        match self.unit {
            Some(unit) => unit.method_name(self.dex_method_index),
            None => "<runtime>",
        }
    }

    pub fn signature(&self) -> &'static str {
        match self.unit {
            Some(unit) => unit.method_signature(self.dex_method_index),
            None => "()V",
        }
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.is_static()
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.is_public()
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.is_abstract()
    }

    /// Opaque handle to the code body; zero when there is none.
    pub fn code_off(&self) -> u32 {
        self.code_off
    }

    pub fn vtable_index(&self) -> u32 {
        self.vtable_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_vtable_index(&self, index: u32) {
        self.vtable_index.store(index, Ordering::Release);
    }

    pub fn entry_point(&self) -> usize {
        self.entry_point.load(Ordering::Acquire)
    }

    /// Install the compiled-code entry. Callable at any time after
    /// linking as code becomes available.
    pub fn set_entry_point(&self, entry: usize) {
        self.entry_point.store(entry, Ordering::Release);
    }

    pub fn bridge_entry(&self) -> usize {
        self.bridge_entry.load(Ordering::Acquire)
    }

    pub fn set_bridge_entry(&self, entry: usize) {
        self.bridge_entry.store(entry, Ordering::Release);
    }

    /// Name and signature equality, the override/implementation match
    /// used by the dispatch-table builders. Signatures compare by their
    /// full proto text, which is loader-agnostic.
    pub fn matches(&self, name: &str, signature: &str) -> bool {
        self.name() == name && self.signature() == signature
    }
}

/// One (interface, resolutions) pair of an interface table.
#[derive(Clone)]
pub struct IfTableEntry {
    pub interface: ClassRef,
    /// Resolving method per interface virtual, in declaration order.
    /// Empty on the iftables of interface classes themselves, which only
    /// record the transitive interface set.
    pub methods: Vec<MethodRef>,
}

/// Flattened, deduplicated interface dispatch table. Shared by subclasses
/// that add no interfaces of their own.
#[derive(Clone, Default)]
pub struct IfTable {
    entries: Vec<IfTableEntry>,
}

impl IfTable {
    pub(crate) fn new(entries: Vec<IfTableEntry>) -> IfTable {
        IfTable { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IfTableEntry] {
        &self.entries
    }

    pub fn interfaces(&self) -> impl Iterator<Item = ClassRef> + '_ {
        self.entries.iter().map(|e| e.interface)
    }

    pub fn contains(&self, interface: ClassRef) -> bool {
        self.entries.iter().any(|e| e.interface == interface)
    }

    pub fn entry_for(&self, interface: ClassRef) -> Option<&IfTableEntry> {
        self.entries.iter().find(|e| e.interface == interface)
    }
}

impl Debug for IfTable {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|e| e.interface))
            .finish()
    }
}

/// Byte storage for a class's static fields, sized by the static layout
/// pass. Reads and writes are little-endian at layout-assigned offsets.
#[derive(Debug)]
pub struct StaticStorage {
    data: RwLock<Vec<u8>>,
}

macro_rules! storage_access {
    ($read:ident, $write:ident, $ty:ty) => {
        pub fn $read(&self, offset: usize) -> $ty {
            let data = self.data.read();
            let mut buf = [0u8; std::mem::size_of::<$ty>()];
            buf.copy_from_slice(&data[offset..offset + std::mem::size_of::<$ty>()]);
            <$ty>::from_le_bytes(buf)
        }

        pub fn $write(&self, offset: usize, value: $ty) {
            let mut data = self.data.write();
            data[offset..offset + std::mem::size_of::<$ty>()]
                .copy_from_slice(&value.to_le_bytes());
        }
    };
}

impl StaticStorage {
    pub(crate) fn new(size: usize) -> StaticStorage {
        StaticStorage {
            data: RwLock::new(vec![0; size]),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    storage_access!(read_i8, write_i8, i8);
    storage_access!(read_u8, write_u8, u8);
    storage_access!(read_i16, write_i16, i16);
    storage_access!(read_u16, write_u16, u16);
    storage_access!(read_i32, write_i32, i32);
    storage_access!(read_i64, write_i64, i64);
    storage_access!(read_f32, write_f32, f32);
    storage_access!(read_f64, write_f64, f64);

    /// Compressed reference slot; zero is null.
    pub fn read_reference(&self, offset: usize) -> u32 {
        let data = self.data.read();
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&data[offset..offset + 4]);
        u32::from_le_bytes(buf)
    }

    pub fn write_reference(&self, offset: usize, value: u32) {
        let mut data = self.data.write();
        data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }
}

/// Value of `reference_bitmap` meaning "too many reference fields for the
/// bitmap; precise scanners must walk the superclass chain instead".
pub const WALK_SUPER_BITMAP: u32 = u32::MAX;

/// Runtime class metadata. See the module docs for the ownership model.
pub struct Class {
    descriptor: Arc<str>,
    loader: LoaderId,
    access_flags: AccessFlags,
    primitive: Option<PrimitiveKind>,
    component: Option<ClassRef>,
    dex_unit: Option<&'static DexUnit>,
    dex_class_def: Option<ClassDefIndex>,

    status: AtomicU8,
    /// Thread currently resolving or initializing this class, else zero.
    owner_thread: AtomicU64,
    monitor: Mutex<()>,
    monitor_cond: Condvar,
    /// First linking failure; sticky for the lifetime of the class.
    error: Mutex<Option<LinkError>>,

    superclass: AtomicPtr<Class>,
    interfaces: OnceLock<Vec<ClassRef>>,

    instance_fields: OnceLock<Vec<FieldRef>>,
    static_fields: OnceLock<Vec<FieldRef>>,
    direct_methods: OnceLock<Vec<MethodRef>>,
    /// Declared virtuals plus any mirandas appended while linking.
    virtual_methods: RwLock<Vec<MethodRef>>,

    vtable: OnceLock<Arc<Vec<MethodRef>>>,
    iftable: OnceLock<Arc<IfTable>>,
    imt: OnceLock<Box<[Option<MethodRef>; IMT_SIZE]>>,

    instance_size: AtomicUsize,
    reference_bitmap: AtomicU32,
    statics: StaticStorage,
}

impl Class {
    fn base(
        descriptor: Arc<str>,
        loader: LoaderId,
        access_flags: AccessFlags,
        status: ClassStatus,
        static_storage_size: usize,
    ) -> Class {
        Class {
            descriptor,
            loader,
            access_flags,
            primitive: None,
            component: None,
            dex_unit: None,
            dex_class_def: None,
            status: AtomicU8::new(status as u8),
            owner_thread: AtomicU64::new(0),
            monitor: Mutex::new(()),
            monitor_cond: Condvar::new(),
            error: Mutex::new(None),
            superclass: AtomicPtr::new(std::ptr::null_mut()),
            interfaces: OnceLock::new(),
            instance_fields: OnceLock::new(),
            static_fields: OnceLock::new(),
            direct_methods: OnceLock::new(),
            virtual_methods: RwLock::new(Vec::new()),
            vtable: OnceLock::new(),
            iftable: OnceLock::new(),
            imt: OnceLock::new(),
            instance_size: AtomicUsize::new(0),
            reference_bitmap: AtomicU32::new(0),
            statics: StaticStorage::new(static_storage_size),
        }
    }

    pub(crate) fn new_primitive(descriptor: Arc<str>, kind: PrimitiveKind) -> Class {
        let mut class = Class::base(
            descriptor,
            LoaderId::BOOT,
            AccessFlags::PUBLIC | AccessFlags::FINAL | AccessFlags::ABSTRACT,
            ClassStatus::Initialized,
            0,
        );
        class.primitive = Some(kind);
        class
    }

    pub(crate) fn new_array(
        descriptor: Arc<str>,
        component: ClassRef,
        object_class: ClassRef,
        iftable: Arc<IfTable>,
        instance_size: usize,
    ) -> Class {
        let mut class = Class::base(
            descriptor,
            component.loader(),
            AccessFlags::PUBLIC | AccessFlags::FINAL,
            ClassStatus::Initialized,
            0,
        );
        class.component = Some(component);
        class.superclass = AtomicPtr::new(object_class.as_ptr());
        class.instance_size = AtomicUsize::new(instance_size);
        if let Some(vtable) = object_class.vtable() {
            let _ = class.vtable.set(Arc::clone(vtable));
        }
        let _ = class.iftable.set(iftable);
        class
    }

    pub(crate) fn new_from_unit(
        descriptor: Arc<str>,
        loader: LoaderId,
        unit: &'static DexUnit,
        def_idx: ClassDefIndex,
        access_flags: AccessFlags,
        static_storage_size: usize,
    ) -> Class {
        let mut class = Class::base(
            descriptor,
            loader,
            access_flags,
            ClassStatus::Idx,
            static_storage_size,
        );
        class.dex_unit = Some(unit);
        class.dex_class_def = Some(def_idx);
        class
    }

    /// Copy of this class with an exactly-sized static block, for the
    /// placeholder swap. Shares every handle; the caller repoints member
    /// back-references and retires the original.
    pub(crate) fn duplicate_with_storage(&self, static_storage_size: usize) -> Class {
        let class = Class {
            descriptor: self.descriptor.clone(),
            loader: self.loader,
            access_flags: self.access_flags,
            primitive: self.primitive,
            component: self.component,
            dex_unit: self.dex_unit,
            dex_class_def: self.dex_class_def,
            status: AtomicU8::new(self.status.load(Ordering::Acquire)),
            owner_thread: AtomicU64::new(0),
            monitor: Mutex::new(()),
            monitor_cond: Condvar::new(),
            error: Mutex::new(None),
            superclass: AtomicPtr::new(self.superclass.load(Ordering::Acquire)),
            interfaces: OnceLock::new(),
            instance_fields: OnceLock::new(),
            static_fields: OnceLock::new(),
            direct_methods: OnceLock::new(),
            virtual_methods: RwLock::new(self.virtual_methods.read().clone()),
            vtable: OnceLock::new(),
            iftable: OnceLock::new(),
            imt: OnceLock::new(),
            instance_size: AtomicUsize::new(self.instance_size.load(Ordering::Acquire)),
            reference_bitmap: AtomicU32::new(self.reference_bitmap.load(Ordering::Acquire)),
            statics: StaticStorage::new(static_storage_size),
        };
        if let Some(interfaces) = self.interfaces.get() {
            let _ = class.interfaces.set(interfaces.clone());
        }
        if let Some(fields) = self.instance_fields.get() {
            let _ = class.instance_fields.set(fields.clone());
        }
        if let Some(fields) = self.static_fields.get() {
            let _ = class.static_fields.set(fields.clone());
        }
        if let Some(methods) = self.direct_methods.get() {
            let _ = class.direct_methods.set(methods.clone());
        }
        if let Some(vtable) = self.vtable.get() {
            let _ = class.vtable.set(Arc::clone(vtable));
        }
        if let Some(iftable) = self.iftable.get() {
            let _ = class.iftable.set(Arc::clone(iftable));
        }
        if let Some(imt) = self.imt.get() {
            let _ = class.imt.set(imt.clone());
        }
        class
    }

    pub fn descriptor(&self) -> &str {
        &self.descriptor
    }

    pub(crate) fn descriptor_handle(&self) -> Arc<str> {
        self.descriptor.clone()
    }

    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    pub fn access_flags(&self) -> AccessFlags {
        self.access_flags
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.is_interface()
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.is_abstract()
    }

    pub fn is_final(&self) -> bool {
        self.access_flags.is_final()
    }

    pub fn is_public(&self) -> bool {
        self.access_flags.is_public()
    }

    pub fn is_primitive(&self) -> bool {
        self.primitive.is_some()
    }

    pub fn primitive_kind(&self) -> Option<PrimitiveKind> {
        self.primitive
    }

    pub fn is_array(&self) -> bool {
        self.component.is_some()
    }

    pub fn component_type(&self) -> Option<ClassRef> {
        self.component
    }

    pub fn dex_unit(&self) -> Option<&'static DexUnit> {
        self.dex_unit
    }

    pub fn dex_class_def(&self) -> Option<ClassDefIndex> {
        self.dex_class_def
    }

    pub fn status(&self) -> ClassStatus {
        ClassStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    pub fn is_resolved(&self) -> bool {
        self.status() >= ClassStatus::Resolved
    }

    pub fn is_verified(&self) -> bool {
        self.status() >= ClassStatus::Verified
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == ClassStatus::Initialized
    }

    pub fn is_erroneous(&self) -> bool {
        self.status() == ClassStatus::Error
    }

    pub fn is_retired(&self) -> bool {
        self.status() == ClassStatus::Retired
    }

    /// Plain status store. Used while holding the monitor, or before any
    /// other thread can observe the class.
    pub(crate) fn set_status(&self, status: ClassStatus) {
        self.status.store(status as u8, Ordering::Release);
    }

    /// Status store followed by a monitor broadcast, waking every thread
    /// blocked in a wait loop on this class. Must not be called while
    /// holding the monitor.
    pub(crate) fn set_status_and_notify(&self, status: ClassStatus) {
        self.status.store(status as u8, Ordering::Release);
        let _guard = self.monitor.lock();
        self.monitor_cond.notify_all();
    }

    /// Move to `Error` with `err` as the sticky failure, waking waiters.
    /// The first failure wins; calling again keeps the original error.
    /// Must not be called while holding the monitor.
    pub(crate) fn fail(&self, err: LinkError) {
        {
            let mut stored = self.error.lock();
            if stored.is_some() {
                return;
            }
            *stored = Some(err);
        }
        self.set_status_and_notify(ClassStatus::Error);
    }

    /// The error to raise for a use of this erroneous class. The original
    /// failure is re-raised identically, except initializer failures,
    /// which surface as a missing class definition on re-use.
    pub fn raise_stored(&self) -> LinkError {
        let stored = self.error.lock();
        match *stored {
            Some(LinkError::Initializer { .. }) | Some(LinkError::Throw(_)) => {
                LinkError::NoClassDefFound(self.descriptor.clone())
            }
            Some(ref err) => err.clone(),
            None => LinkError::NoClassDefFound(self.descriptor.clone()),
        }
    }

    /// The sticky failure as stored, without the re-raise shaping.
    pub fn stored_error(&self) -> Option<LinkError> {
        self.error.lock().clone()
    }

    pub fn owner_thread(&self) -> u64 {
        self.owner_thread.load(Ordering::Acquire)
    }

    pub(crate) fn set_owner_thread(&self, thread_id: u64) {
        self.owner_thread.store(thread_id, Ordering::Release);
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.monitor.lock()
    }

    /// Block on the monitor until the next status broadcast. Spurious
    /// wakeups happen; callers re-check their condition in a loop.
    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, ()>) {
        self.monitor_cond.wait(guard);
    }

    pub fn superclass(&self) -> Option<ClassRef> {
        ClassRef::from_ptr(self.superclass.load(Ordering::Acquire))
    }

    /// Write-once; the superclass never changes after loading.
    pub(crate) fn set_superclass(&self, superclass: ClassRef) {
        self.superclass.store(superclass.as_ptr(), Ordering::Release);
    }

    /// Directly declared interfaces, in declaration order.
    pub fn interfaces(&self) -> &[ClassRef] {
        self.interfaces.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn set_interfaces(&self, interfaces: Vec<ClassRef>) {
        let _ = self.interfaces.set(interfaces);
    }

    pub fn instance_fields(&self) -> &[FieldRef] {
        self.instance_fields.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn static_fields(&self) -> &[FieldRef] {
        self.static_fields.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn set_fields(&self, instance: Vec<FieldRef>, statics: Vec<FieldRef>) {
        let _ = self.instance_fields.set(instance);
        let _ = self.static_fields.set(statics);
    }

    pub fn direct_methods(&self) -> &[MethodRef] {
        self.direct_methods.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub(crate) fn set_direct_methods(&self, methods: Vec<MethodRef>) {
        let _ = self.direct_methods.set(methods);
    }

    /// Declared virtuals plus mirandas. The list only grows, and only
    /// while the defining thread links the class.
    pub fn virtual_methods(&self) -> RwLockReadGuard<'_, Vec<MethodRef>> {
        self.virtual_methods.read()
    }

    pub(crate) fn set_virtual_methods(&self, methods: Vec<MethodRef>) {
        *self.virtual_methods.write() = methods;
    }

    pub(crate) fn push_virtual_method(&self, method: MethodRef) {
        self.virtual_methods.write().push(method);
    }

    pub fn vtable(&self) -> Option<&Arc<Vec<MethodRef>>> {
        self.vtable.get()
    }

    pub fn vtable_slice(&self) -> &[MethodRef] {
        self.vtable.get().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub(crate) fn set_vtable(&self, vtable: Arc<Vec<MethodRef>>) {
        let _ = self.vtable.set(vtable);
    }

    pub fn iftable(&self) -> Option<&Arc<IfTable>> {
        self.iftable.get()
    }

    pub fn iftable_entries(&self) -> &[IfTableEntry] {
        self.iftable.get().map(|t| t.entries()).unwrap_or(&[])
    }

    pub(crate) fn set_iftable(&self, iftable: Arc<IfTable>) {
        let _ = self.iftable.set(iftable);
    }

    pub fn imt(&self) -> Option<&[Option<MethodRef>; IMT_SIZE]> {
        self.imt.get().map(|b| &**b)
    }

    pub(crate) fn set_imt(&self, imt: Box<[Option<MethodRef>; IMT_SIZE]>) {
        let _ = self.imt.set(imt);
    }

    /// Full object size in bytes, header included. For arrays this is the
    /// fixed part only.
    pub fn instance_size(&self) -> usize {
        self.instance_size.load(Ordering::Acquire)
    }

    pub(crate) fn set_instance_size(&self, size: usize) {
        self.instance_size.store(size, Ordering::Release);
    }

    /// Bitmap of instance reference slots for precise scanning: bit `i`
    /// covers byte offset `4 * i`. [`WALK_SUPER_BITMAP`] means the layout
    /// outgrew the bitmap.
    pub fn reference_bitmap(&self) -> u32 {
        self.reference_bitmap.load(Ordering::Acquire)
    }

    pub(crate) fn set_reference_bitmap(&self, bitmap: u32) {
        self.reference_bitmap.store(bitmap, Ordering::Release);
    }

    pub fn statics(&self) -> &StaticStorage {
        &self.statics
    }

    pub fn find_declared_direct_method(&self, name: &str, signature: &str) -> Option<MethodRef> {
        self.direct_methods()
            .iter()
            .copied()
            .find(|m| m.matches(name, signature))
    }

    pub fn find_declared_virtual_method(&self, name: &str, signature: &str) -> Option<MethodRef> {
        self.virtual_methods()
            .iter()
            .copied()
            .find(|m| m.matches(name, signature))
    }

    /// Direct-method lookup along the superclass chain.
    pub fn find_direct_method(&self, name: &str, signature: &str) -> Option<MethodRef> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(found) = class.find_declared_direct_method(name, signature) {
                return Some(found);
            }
            current = class.superclass().map(|c| c.get());
        }
        None
    }

    /// Virtual-method lookup along the superclass chain.
    pub fn find_virtual_method(&self, name: &str, signature: &str) -> Option<MethodRef> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(found) = class.find_declared_virtual_method(name, signature) {
                return Some(found);
            }
            current = class.superclass().map(|c| c.get());
        }
        None
    }

    /// Interface-method lookup: the receiver's own virtuals first (which
    /// include the root class's methods), then every interface in the
    /// flattened table.
    pub fn find_interface_method(&self, name: &str, signature: &str) -> Option<MethodRef> {
        if let Some(found) = self.find_virtual_method(name, signature) {
            return Some(found);
        }
        for entry in self.iftable_entries() {
            if let Some(found) = entry
                .interface
                .find_declared_virtual_method(name, signature)
            {
                return Some(found);
            }
        }
        None
    }

    pub fn find_declared_field(
        &self,
        name: &str,
        type_descriptor: &str,
        is_static: bool,
    ) -> Option<FieldRef> {
        let fields = if is_static {
            self.static_fields()
        } else {
            self.instance_fields()
        };
        fields
            .iter()
            .copied()
            .find(|f| f.name() == name && f.type_descriptor() == type_descriptor)
    }

    /// Field lookup along the superclass chain; statics also consult the
    /// flattened interfaces, where constants live.
    pub fn find_field(
        &self,
        name: &str,
        type_descriptor: &str,
        is_static: bool,
    ) -> Option<FieldRef> {
        let mut current = Some(self);
        while let Some(class) = current {
            if let Some(found) = class.find_declared_field(name, type_descriptor, is_static) {
                return Some(found);
            }
            current = class.superclass().map(|c| c.get());
        }
        if is_static {
            for entry in self.iftable_entries() {
                if let Some(found) =
                    entry
                        .interface
                        .find_declared_field(name, type_descriptor, true)
                {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Whether `other`'s package-private members are visible here.
    pub fn in_same_runtime_package(&self, other: &Class) -> bool {
        self.loader == other.loader
            && descriptor::same_package(&self.descriptor, &other.descriptor)
    }

    /// Whether this class can reference `other` as a supertype or
    /// interface.
    pub fn can_access(&self, other: &Class) -> bool {
        other.is_public() || self.in_same_runtime_package(other)
    }
}

impl Debug for Class {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{:?}]", self.descriptor, self.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_ordering_follows_transitions() {
        assert!(ClassStatus::Idx < ClassStatus::Loaded);
        assert!(ClassStatus::Loaded < ClassStatus::Resolving);
        assert!(ClassStatus::Resolving < ClassStatus::Resolved);
        assert!(ClassStatus::Resolved < ClassStatus::Verified);
        assert!(ClassStatus::Verified < ClassStatus::Initializing);
        assert!(ClassStatus::Initializing < ClassStatus::Initialized);
        assert!(ClassStatus::Error < ClassStatus::Idx);
        assert!(ClassStatus::Retired < ClassStatus::Error);
    }

    #[test]
    fn test_status_round_trips_through_byte() {
        for status in [
            ClassStatus::Retired,
            ClassStatus::Error,
            ClassStatus::Idx,
            ClassStatus::Loaded,
            ClassStatus::Resolving,
            ClassStatus::Resolved,
            ClassStatus::Verifying,
            ClassStatus::RetryVerificationAtRuntime,
            ClassStatus::VerifyingAtRuntime,
            ClassStatus::Verified,
            ClassStatus::Initializing,
            ClassStatus::Initialized,
        ] {
            assert_eq!(ClassStatus::from_u8(status as u8), status);
        }
    }

    #[test]
    fn test_static_storage_reads_what_it_writes() {
        let storage = StaticStorage::new(24);
        storage.write_i32(0, -7);
        storage.write_i64(8, 1 << 40);
        storage.write_f32(4, 1.5);
        storage.write_reference(16, 0xdead_beef);
        assert_eq!(storage.read_i32(0), -7);
        assert_eq!(storage.read_i64(8), 1 << 40);
        assert_eq!(storage.read_f32(4), 1.5);
        assert_eq!(storage.read_reference(16), 0xdead_beef);
    }

    #[test]
    fn test_fail_keeps_first_error() {
        let class = Class::base(
            Arc::from("LBroken;"),
            LoaderId::BOOT,
            AccessFlags::PUBLIC,
            ClassStatus::Loaded,
            0,
        );
        class.fail(LinkError::ClassFormat("bad member".into()));
        class.fail(LinkError::Linkage("later failure".into()));
        assert!(class.is_erroneous());
        match class.raise_stored() {
            LinkError::ClassFormat(msg) => assert_eq!(msg, "bad member"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
