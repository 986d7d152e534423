//! The class linker facade.
//!
//! [`Linker`] owns the class table, the unit registry, and the string
//! interner, and drives every class through the load, resolve, verify,
//! and initialize transitions. Collaborators that live elsewhere in a
//! full runtime (heap, bytecode verifier, interpreter, class loaders)
//! plug in through traits.

use std::mem;

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::class::{
    Class, ClassRef, ClassStatus, Field, FieldRef, IfTable, IfTableEntry, InvokeKind, LoaderId,
    Method, MethodKind, MethodRef,
};
use crate::class_table::ClassTable;
use crate::descriptor::{
    self, CLONEABLE_DESCRIPTOR, OBJECT_DESCRIPTOR, REFERENCE_CLASS_DESCRIPTOR,
    SERIALIZABLE_DESCRIPTOR,
};
use crate::dex::{
    ClassDef, ClassDefIndex, DexUnit, DexUnitBuilder, EncodedField, EncodedValue, FieldIndex,
    MethodIndex, StringIndex, TypeIndex,
};
use crate::dex_cache::DexRegistry;
use crate::error::{LinkError, Result, Throwable};
use crate::flags::AccessFlags;
use crate::heap::Heap;
use crate::intern::InternTable;
use crate::layout::{self, LayoutKind, OBJECT_HEADER_SIZE};
use crate::sync::{current_thread_id, Arc, AtomicU32, AtomicU64, OnceLock, Ordering, RwLock};
use crate::verifier::{AccessFlagVerifier, Verifier, VerifyOutcome};
use crate::vtable;

/// Fixed part of an array instance: object header plus the length word.
const ARRAY_BASE_SIZE: usize = OBJECT_HEADER_SIZE + 4;

/// Whether classes run the verifier before initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Enforce,
    Skip,
}

#[derive(Debug, Clone)]
pub struct LinkerOptions {
    pub verify: VerifyMode,
    /// Start recording newly registered classes for incremental root
    /// visits right away.
    pub log_new_roots: bool,
}

impl Default for LinkerOptions {
    fn default() -> Self {
        Self {
            verify: VerifyMode::Enforce,
            log_new_roots: false,
        }
    }
}

/// Monotonic counters kept by the linker. Cheap enough to update on hot
/// paths; read them through [`LinkerMetrics::snapshot`].
#[derive(Default)]
pub struct LinkerMetrics {
    classes_defined: AtomicU64,
    classes_initialized: AtomicU64,
    mirandas_synthesized: AtomicU64,
    imt_conflicts: AtomicU64,
    type_cache_hits: AtomicU64,
    type_cache_misses: AtomicU64,
    method_cache_hits: AtomicU64,
    method_cache_misses: AtomicU64,
    field_cache_hits: AtomicU64,
    field_cache_misses: AtomicU64,
    string_cache_hits: AtomicU64,
    string_cache_misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub classes_defined: u64,
    pub classes_initialized: u64,
    pub mirandas_synthesized: u64,
    pub imt_conflicts: u64,
    pub type_cache_hits: u64,
    pub type_cache_misses: u64,
    pub method_cache_hits: u64,
    pub method_cache_misses: u64,
    pub field_cache_hits: u64,
    pub field_cache_misses: u64,
    pub string_cache_hits: u64,
    pub string_cache_misses: u64,
}

impl LinkerMetrics {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_class_defined(&self) {
        Self::bump(&self.classes_defined);
    }

    pub(crate) fn record_class_initialized(&self) {
        Self::bump(&self.classes_initialized);
    }

    pub(crate) fn add_mirandas(&self, count: u64) {
        self.mirandas_synthesized.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_imt_conflict(&self) {
        Self::bump(&self.imt_conflicts);
    }

    pub(crate) fn record_type_lookup(&self, hit: bool) {
        Self::bump(if hit {
            &self.type_cache_hits
        } else {
            &self.type_cache_misses
        });
    }

    pub(crate) fn record_method_lookup(&self, hit: bool) {
        Self::bump(if hit {
            &self.method_cache_hits
        } else {
            &self.method_cache_misses
        });
    }

    pub(crate) fn record_field_lookup(&self, hit: bool) {
        Self::bump(if hit {
            &self.field_cache_hits
        } else {
            &self.field_cache_misses
        });
    }

    pub(crate) fn record_string_lookup(&self, hit: bool) {
        Self::bump(if hit {
            &self.string_cache_hits
        } else {
            &self.string_cache_misses
        });
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            classes_defined: self.classes_defined.load(Ordering::Relaxed),
            classes_initialized: self.classes_initialized.load(Ordering::Relaxed),
            mirandas_synthesized: self.mirandas_synthesized.load(Ordering::Relaxed),
            imt_conflicts: self.imt_conflicts.load(Ordering::Relaxed),
            type_cache_hits: self.type_cache_hits.load(Ordering::Relaxed),
            type_cache_misses: self.type_cache_misses.load(Ordering::Relaxed),
            method_cache_hits: self.method_cache_hits.load(Ordering::Relaxed),
            method_cache_misses: self.method_cache_misses.load(Ordering::Relaxed),
            field_cache_hits: self.field_cache_hits.load(Ordering::Relaxed),
            field_cache_misses: self.field_cache_misses.load(Ordering::Relaxed),
            string_cache_hits: self.string_cache_hits.load(Ordering::Relaxed),
            string_cache_misses: self.string_cache_misses.load(Ordering::Relaxed),
        }
    }
}

/// A registered class loader, asked to produce classes the boot path
/// does not know. Implementations usually locate a unit and call back
/// into [`Linker::define_class`].
pub trait LoaderDelegate: Send + Sync {
    fn load_class(&self, linker: &Linker, descriptor: &str, loader: LoaderId) -> Result<ClassRef>;
}

/// Executes managed code on behalf of the linker. Only static
/// initializers are ever invoked from here.
pub trait Invoker: Send + Sync {
    fn invoke_initializer(&self, method: MethodRef) -> std::result::Result<(), Throwable>;
}

/// Treats every static initializer as an immediate success.
#[derive(Debug, Default)]
pub struct NoopInvoker;

impl Invoker for NoopInvoker {
    fn invoke_initializer(&self, _method: MethodRef) -> std::result::Result<(), Throwable> {
        Ok(())
    }
}

/// Which roots a [`Linker::visit_roots`] pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootVisitKind {
    /// Every pinned root, table entry, and cached resolution.
    All,
    /// Only classes registered since the previous drain.
    NewOnly,
}

pub struct Linker {
    table: ClassTable,
    registry: DexRegistry,
    intern: InternTable,
    heap: Arc<dyn Heap>,
    verifier: Box<dyn Verifier>,
    invoker: Box<dyn Invoker>,
    loaders: DashMap<LoaderId, Arc<dyn LoaderDelegate>>,
    next_loader: AtomicU32,
    options: LinkerOptions,
    /// Shared sentinel installed in colliding interface-dispatch slots.
    conflict_method: MethodRef,
    /// Allocated at startup so a boot-classpath miss can be reported
    /// even with the heap exhausted.
    boot_class_not_found: LinkError,
    object_class: OnceLock<ClassRef>,
    array_iftable: OnceLock<Arc<IfTable>>,
    /// Classes pinned independently of the table: primitives and the
    /// boot well-knowns.
    class_roots: RwLock<Vec<ClassRef>>,
    metrics: LinkerMetrics,
}

impl Linker {
    pub fn new(heap: Arc<dyn Heap>) -> Result<Linker> {
        Self::with_collaborators(
            heap,
            Box::new(AccessFlagVerifier),
            Box::new(NoopInvoker),
            LinkerOptions::default(),
        )
    }

    pub fn with_collaborators(
        heap: Arc<dyn Heap>,
        verifier: Box<dyn Verifier>,
        invoker: Box<dyn Invoker>,
        options: LinkerOptions,
    ) -> Result<Linker> {
        let linker = Linker {
            table: ClassTable::new(),
            registry: DexRegistry::new(),
            intern: InternTable::new(),
            heap,
            verifier,
            invoker,
            loaders: DashMap::new(),
            next_loader: AtomicU32::new(1),
            options,
            conflict_method: MethodRef::new(Method::new_conflict_sentinel()),
            boot_class_not_found: LinkError::ClassNotFound(Arc::from("<boot class unavailable>")),
            object_class: OnceLock::new(),
            array_iftable: OnceLock::new(),
            class_roots: RwLock::new(Vec::new()),
            metrics: LinkerMetrics::default(),
        };
        if linker.options.log_new_roots {
            linker.table.set_log_new_roots(true);
        }
        linker.bootstrap()?;
        Ok(linker)
    }

    /// Create the primitive classes and define the boot image classes
    /// every later definition leans on.
    fn bootstrap(&self) -> Result<()> {
        for kind in descriptor::PrimitiveKind::ALL {
            self.heap.allocate_non_movable(mem::size_of::<Class>())?;
            let class = ClassRef::new(Class::new_primitive(
                self.intern.intern(kind.descriptor()),
                kind,
            ));
            if self.table.insert(class).is_some() {
                unreachable!("primitive {} registered twice", kind.descriptor());
            }
            self.class_roots.write().push(class);
        }

        self.registry.register(boot_image_unit(), true);
        let object = self.find_class(OBJECT_DESCRIPTOR, LoaderId::BOOT)?;
        let _ = self.object_class.set(object);
        self.conflict_method.repoint_declaring_class(object);

        let cloneable = self.find_class(CLONEABLE_DESCRIPTOR, LoaderId::BOOT)?;
        let serializable = self.find_class(SERIALIZABLE_DESCRIPTOR, LoaderId::BOOT)?;
        let reference = self.find_class(REFERENCE_CLASS_DESCRIPTOR, LoaderId::BOOT)?;
        let _ = self.array_iftable.set(Arc::new(IfTable::new(vec![
            IfTableEntry {
                interface: cloneable,
                methods: Vec::new(),
            },
            IfTableEntry {
                interface: serializable,
                methods: Vec::new(),
            },
        ])));
        self.class_roots
            .write()
            .extend([object, cloneable, serializable, reference]);
        debug!(classes = self.table.len(), "boot image ready");
        Ok(())
    }

    /// The root class of the hierarchy.
    pub fn object_class(&self) -> ClassRef {
        match self.object_class.get() {
            Some(&class) => class,
            None => unreachable!("linker used before bootstrap"),
        }
    }

    fn array_iftable(&self) -> Arc<IfTable> {
        match self.array_iftable.get() {
            Some(iftable) => Arc::clone(iftable),
            None => unreachable!("linker used before bootstrap"),
        }
    }

    pub fn metrics(&self) -> &LinkerMetrics {
        &self.metrics
    }

    pub fn intern_table(&self) -> &InternTable {
        &self.intern
    }

    pub fn class_count(&self) -> usize {
        self.table.len()
    }

    pub fn lookup_class(&self, descriptor: &str, loader: LoaderId) -> Option<ClassRef> {
        self.table.lookup(descriptor, loader)
    }

    /// Register a unit on the boot classpath; its classes become
    /// findable through the boot loader.
    pub fn add_boot_unit(&self, unit: DexUnit) -> &'static DexUnit {
        self.registry.register(unit, true).0
    }

    /// Register a unit that only loader delegates will define from.
    pub fn add_unit(&self, unit: DexUnit) -> &'static DexUnit {
        self.registry.register(unit, false).0
    }

    /// Install a loader delegate and hand it a fresh loader identity.
    pub fn register_loader(&self, delegate: Arc<dyn LoaderDelegate>) -> LoaderId {
        let id = LoaderId(self.next_loader.fetch_add(1, Ordering::Relaxed));
        self.loaders.insert(id, delegate);
        id
    }

    /// Find or create the class for `descriptor` in the namespace of
    /// `loader`, fully resolved. Array and primitive classes are
    /// synthesized here; everything else comes from a unit, either on
    /// the boot classpath or through the loader's delegate.
    pub fn find_class(&self, descriptor: &str, loader: LoaderId) -> Result<ClassRef> {
        if !descriptor::is_valid_type_descriptor(descriptor) {
            return Err(LinkError::ClassFormat(format!(
                "invalid descriptor {descriptor}"
            )));
        }

        if descriptor.len() == 1 {
            match self.table.lookup(descriptor, LoaderId::BOOT) {
                Some(class) => return Ok(class),
                None => unreachable!("primitive classes exist from startup"),
            }
        }

        if let Some(component_descriptor) = descriptor::array_component(descriptor) {
            let component = self.find_class(component_descriptor, loader)?;
            // Array classes live in their component's namespace, so one
            // array class exists per component class.
            let owning = component.loader();
            if let Some(class) = self.table.lookup(descriptor, owning) {
                return Ok(class);
            }
            self.heap.allocate_non_movable(mem::size_of::<Class>())?;
            let class = ClassRef::new(Class::new_array(
                self.intern.intern(descriptor),
                component,
                self.object_class(),
                self.array_iftable(),
                ARRAY_BASE_SIZE,
            ));
            return Ok(self.table.insert(class).unwrap_or(class));
        }

        if let Some(class) = self.table.lookup(descriptor, loader) {
            return self.ensure_resolved(class);
        }

        if loader.is_boot() {
            for unit in self.registry.boot_units() {
                if let Some(def_idx) = unit.find_class_def(descriptor) {
                    return self.define_class(descriptor, LoaderId::BOOT, unit, def_idx);
                }
            }
            warn!(descriptor, "boot classpath has no definition");
            return Err(self.boot_class_not_found.clone());
        }

        match self.loaders.get(&loader) {
            Some(delegate) => {
                let delegate = Arc::clone(delegate.value());
                let class = delegate.load_class(self, descriptor, loader)?;
                self.ensure_resolved(class)
            }
            None => Err(LinkError::ClassNotFound(self.intern.intern(descriptor))),
        }
    }

    /// Create, register, and fully resolve a class from `unit`.
    ///
    /// Loser of a definition race adopts the winner's class. On failure
    /// the class is published in the erroneous state and the failure is
    /// returned; later uses re-raise it.
    pub fn define_class(
        &self,
        descriptor: &str,
        loader: LoaderId,
        unit: &'static DexUnit,
        def_idx: ClassDefIndex,
    ) -> Result<ClassRef> {
        if let Some(existing) = self.table.lookup(descriptor, loader) {
            return self.ensure_resolved(existing);
        }
        if def_idx.as_usize() >= unit.class_def_count() {
            return Err(LinkError::ClassFormat(format!(
                "class def index {} out of range for {}",
                def_idx.0,
                unit.location()
            )));
        }
        let def = unit.class_def(def_idx);

        // Static storage is sized by prediction now and checked against
        // the exact layout later; a mismatch retires this object.
        let predicted_statics = 8 * def.static_fields.len();
        let metadata_size = mem::size_of::<Class>()
            + predicted_statics
            + (def.instance_fields.len() + def.static_fields.len()) * mem::size_of::<Field>()
            + (def.direct_methods.len() + def.virtual_methods.len()) * mem::size_of::<Method>();
        self.heap.allocate_non_movable(metadata_size)?;

        let class = ClassRef::new(Class::new_from_unit(
            self.intern.intern(descriptor),
            loader,
            unit,
            def_idx,
            AccessFlags::from_bits_truncate(def.access_flags),
            predicted_statics,
        ));
        if let Some(existing) = self.table.insert(class) {
            return self.ensure_resolved(existing);
        }
        self.metrics.record_class_defined();
        class.set_owner_thread(current_thread_id());
        debug!(descriptor, loader = loader.0, "defining class");

        let linked = self
            .load_members(class, def)
            .and_then(|_| self.link_super_and_interfaces(class, def))
            .and_then(|_| self.link_class(class));
        match linked {
            Ok(final_class) => Ok(final_class),
            Err(err) => {
                class.set_owner_thread(0);
                class.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Materialize field and method records from the definition.
    fn load_members(&self, class: ClassRef, def: &ClassDef) -> Result<()> {
        let unit = match class.dex_unit() {
            Some(unit) => unit,
            None => unreachable!("unit-backed class without a unit"),
        };

        let load_fields = |encoded: &[EncodedField]| -> Result<Vec<FieldRef>> {
            let mut fields = Vec::with_capacity(encoded.len());
            for ef in encoded {
                if ef.field_idx.as_usize() >= unit.field_count() {
                    return Err(LinkError::ClassFormat(format!(
                        "field index {} out of range in {}",
                        ef.field_idx.0,
                        class.descriptor()
                    )));
                }
                let type_descriptor = unit.field_type_descriptor(ef.field_idx);
                if !descriptor::is_valid_type_descriptor(type_descriptor)
                    || type_descriptor == "V"
                {
                    return Err(LinkError::ClassFormat(format!(
                        "field {}.{} has invalid type {}",
                        class.descriptor(),
                        unit.field_name(ef.field_idx),
                        type_descriptor
                    )));
                }
                fields.push(FieldRef::new(Field::new(
                    class,
                    unit,
                    ef.field_idx,
                    AccessFlags::from_bits_truncate(ef.access_flags),
                )));
            }
            Ok(fields)
        };
        let instance_fields = load_fields(&def.instance_fields)?;
        let static_fields = load_fields(&def.static_fields)?;
        class.set_fields(instance_fields, static_fields);

        let mut direct_methods = Vec::with_capacity(def.direct_methods.len());
        for em in &def.direct_methods {
            if em.method_idx.as_usize() >= unit.method_count() {
                return Err(LinkError::ClassFormat(format!(
                    "method index {} out of range in {}",
                    em.method_idx.0,
                    class.descriptor()
                )));
            }
            let flags = AccessFlags::from_bits_truncate(em.access_flags);
            if !flags.intersects(
                AccessFlags::STATIC | AccessFlags::PRIVATE | AccessFlags::CONSTRUCTOR,
            ) {
                return Err(LinkError::ClassFormat(format!(
                    "{}.{} is in the direct list but is neither static, private, nor a constructor",
                    class.descriptor(),
                    unit.method_name(em.method_idx)
                )));
            }
            direct_methods.push(MethodRef::new(Method::new(
                class,
                unit,
                em.method_idx,
                flags,
                MethodKind::Direct,
                em.code_off,
            )));
        }
        class.set_direct_methods(direct_methods);

        let mut virtual_methods = Vec::with_capacity(def.virtual_methods.len());
        for em in &def.virtual_methods {
            if em.method_idx.as_usize() >= unit.method_count() {
                return Err(LinkError::ClassFormat(format!(
                    "method index {} out of range in {}",
                    em.method_idx.0,
                    class.descriptor()
                )));
            }
            let flags = AccessFlags::from_bits_truncate(em.access_flags);
            if flags.intersects(AccessFlags::STATIC | AccessFlags::CONSTRUCTOR) {
                return Err(LinkError::ClassFormat(format!(
                    "{}.{} is in the virtual list but carries direct-only flags",
                    class.descriptor(),
                    unit.method_name(em.method_idx)
                )));
            }
            virtual_methods.push(MethodRef::new(Method::new(
                class,
                unit,
                em.method_idx,
                flags,
                MethodKind::Virtual,
                em.code_off,
            )));
        }
        class.set_virtual_methods(virtual_methods);
        Ok(())
    }

    /// Resolve the superclass and direct interfaces, moving the class
    /// from `Idx` to `Loaded`.
    fn link_super_and_interfaces(&self, class: ClassRef, def: &ClassDef) -> Result<()> {
        let unit = match class.dex_unit() {
            Some(unit) => unit,
            None => unreachable!("unit-backed class without a unit"),
        };
        match def.superclass_idx {
            None => {
                if class.descriptor() != OBJECT_DESCRIPTOR {
                    return Err(LinkError::ClassFormat(format!(
                        "{} has no superclass",
                        class.descriptor()
                    )));
                }
            }
            Some(idx) => {
                let superclass = self.resolve_type(unit, idx, class)?;
                if superclass.is_interface() {
                    return Err(LinkError::Linkage(format!(
                        "{} extends interface {}",
                        class.descriptor(),
                        superclass.descriptor()
                    )));
                }
                if superclass.is_final() {
                    return Err(LinkError::Linkage(format!(
                        "{} extends final class {}",
                        class.descriptor(),
                        superclass.descriptor()
                    )));
                }
                if !class.can_access(superclass.get()) {
                    return Err(LinkError::IllegalAccess(format!(
                        "{} cannot access superclass {}",
                        class.descriptor(),
                        superclass.descriptor()
                    )));
                }
                class.set_superclass(superclass);
            }
        }

        let mut interfaces = Vec::with_capacity(def.interfaces.len());
        for &idx in &def.interfaces {
            let interface = self.resolve_type(unit, idx, class)?;
            if !interface.is_interface() {
                return Err(LinkError::IncompatibleClassChange(format!(
                    "{} implements {}, which is not an interface",
                    class.descriptor(),
                    interface.descriptor()
                )));
            }
            if !class.can_access(interface.get()) {
                return Err(LinkError::IllegalAccess(format!(
                    "{} cannot access interface {}",
                    class.descriptor(),
                    interface.descriptor()
                )));
            }
            interfaces.push(interface);
        }
        class.set_interfaces(interfaces);
        class.set_status(ClassStatus::Loaded);
        Ok(())
    }

    /// Lay out fields, build dispatch tables, and publish the class as
    /// resolved. When the exact static storage size disagrees with the
    /// prediction made at definition time, the class object is replaced
    /// by an exactly-sized copy and the original is retired.
    fn link_class(&self, class: ClassRef) -> Result<ClassRef> {
        {
            let _guard = class.lock();
            class.set_status(ClassStatus::Resolving);
        }

        if class.is_interface() {
            class.set_instance_size(0);
        } else {
            layout::link_fields(class.get(), LayoutKind::Instance);
        }
        let exact_statics = layout::link_fields(class.get(), LayoutKind::Static);
        vtable::link_methods(class, self.conflict_method, &self.metrics)?;

        let predicted = class.statics().len();
        if exact_statics == predicted {
            class.set_owner_thread(0);
            class.set_status_and_notify(ClassStatus::Resolved);
            return Ok(class);
        }

        self.heap
            .allocate_non_movable(mem::size_of::<Class>() + exact_statics)?;
        let final_class = ClassRef::new(class.duplicate_with_storage(exact_statics));
        for &field in final_class.instance_fields() {
            field.repoint_declaring_class(final_class);
        }
        for &field in final_class.static_fields() {
            field.repoint_declaring_class(final_class);
        }
        for &method in final_class.direct_methods() {
            method.repoint_declaring_class(final_class);
        }
        for &method in final_class.virtual_methods().iter() {
            method.repoint_declaring_class(final_class);
        }
        final_class.set_owner_thread(0);
        final_class.set_status(ClassStatus::Resolved);
        self.table.replace(class, final_class);
        class.set_owner_thread(0);
        class.set_status_and_notify(ClassStatus::Retired);
        debug!(
            descriptor = class.descriptor(),
            predicted,
            exact = exact_statics,
            "static storage reprediction retired the class object"
        );
        Ok(final_class)
    }

    /// Wait until `class` is resolved, following a retirement swap to
    /// the replacement object. Detects resolution cycles entered from
    /// this thread.
    pub fn ensure_resolved(&self, class: ClassRef) -> Result<ClassRef> {
        let mut class = class;
        loop {
            let status = class.status();
            if status >= ClassStatus::Resolved {
                return Ok(class);
            }
            match status {
                ClassStatus::Error => return Err(class.raise_stored()),
                ClassStatus::Retired => {
                    class = match self.table.lookup(class.descriptor(), class.loader()) {
                        Some(replacement) if replacement != class => replacement,
                        _ => unreachable!(
                            "retired {} has no replacement in the table",
                            class.descriptor()
                        ),
                    };
                    continue;
                }
                _ => {}
            }
            if class.owner_thread() == current_thread_id() {
                return Err(LinkError::ClassCircularity(class.descriptor_handle()));
            }
            let mut guard = class.lock();
            let status = class.status();
            if status < ClassStatus::Resolved
                && status != ClassStatus::Error
                && status != ClassStatus::Retired
            {
                class.wait(&mut guard);
            }
        }
    }

    /// Drive `class` through verification. Soft failures park the class
    /// in the retry state and report a soft error; the next attempt
    /// verifies with runtime rules, where a second failure is final.
    pub fn ensure_verified(&self, class: ClassRef) -> Result<()> {
        if class.is_verified() {
            return Ok(());
        }
        let class = self.ensure_resolved(class)?;
        if class.is_verified() {
            return Ok(());
        }

        let forced = match class.superclass() {
            Some(superclass) if !superclass.is_verified() => {
                match self.ensure_verified(superclass) {
                    Ok(()) => None,
                    Err(err) if err.is_soft_verify_failure() => Some(VerifyOutcome::SoftFail(
                        format!(
                            "superclass {} requires runtime verification",
                            superclass.descriptor()
                        ),
                    )),
                    Err(_) => Some(VerifyOutcome::HardFail(format!(
                        "superclass {} failed verification",
                        superclass.descriptor()
                    ))),
                }
            }
            _ => None,
        };

        let mut runtime_retry = false;
        loop {
            let mut guard = class.lock();
            let status = class.status();
            if status >= ClassStatus::Verified {
                return Ok(());
            }
            match status {
                ClassStatus::Error => return Err(class.raise_stored()),
                ClassStatus::Resolved => {
                    class.set_status(ClassStatus::Verifying);
                    break;
                }
                ClassStatus::RetryVerificationAtRuntime => {
                    class.set_status(ClassStatus::VerifyingAtRuntime);
                    runtime_retry = true;
                    break;
                }
                ClassStatus::Verifying | ClassStatus::VerifyingAtRuntime => {
                    class.wait(&mut guard);
                }
                other => unreachable!(
                    "verification of {} reached from {:?}",
                    class.descriptor(),
                    other
                ),
            }
        }

        let pre_verified = class
            .dex_unit()
            .map(|unit| unit.is_pre_verified())
            .unwrap_or(true);
        let outcome = if let Some(forced) = forced {
            forced
        } else if pre_verified || self.options.verify == VerifyMode::Skip {
            VerifyOutcome::Ok
        } else {
            self.verifier.verify(class)
        };

        match outcome {
            VerifyOutcome::Ok => {
                class.set_status_and_notify(ClassStatus::Verified);
                Ok(())
            }
            VerifyOutcome::SoftFail(reason) if !runtime_retry => {
                class.set_status_and_notify(ClassStatus::RetryVerificationAtRuntime);
                Err(LinkError::VerifyFailure {
                    descriptor: class.descriptor_handle(),
                    reason,
                    soft: true,
                })
            }
            VerifyOutcome::SoftFail(reason) | VerifyOutcome::HardFail(reason) => {
                let err = LinkError::VerifyFailure {
                    descriptor: class.descriptor_handle(),
                    reason,
                    soft: false,
                };
                class.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Run the initialization protocol: superclass first, exactly one
    /// initializing thread, reentrant for that thread, and sticky
    /// failure for everyone after the first.
    pub fn ensure_initialized(&self, class: ClassRef) -> Result<()> {
        if class.is_initialized() {
            return Ok(());
        }
        let class = self.ensure_resolved(class)?;
        self.ensure_verified(class)?;

        if !class.is_interface() {
            if let Some(superclass) = class.superclass() {
                if !superclass.is_initialized() {
                    if let Err(err) = self.ensure_initialized(superclass) {
                        class.fail(LinkError::NoClassDefFound(class.descriptor_handle()));
                        return Err(err);
                    }
                }
            }
        }

        let thread = current_thread_id();
        loop {
            let mut guard = class.lock();
            match class.status() {
                ClassStatus::Initialized => return Ok(()),
                ClassStatus::Error => return Err(class.raise_stored()),
                ClassStatus::Initializing if class.owner_thread() == thread => {
                    // Reentrant use from this thread's own initializer.
                    return Ok(());
                }
                ClassStatus::Initializing => {
                    class.wait(&mut guard);
                }
                ClassStatus::Verified => {
                    class.set_owner_thread(thread);
                    class.set_status(ClassStatus::Initializing);
                    break;
                }
                other => unreachable!(
                    "initialization of {} reached from {:?}",
                    class.descriptor(),
                    other
                ),
            }
        }

        self.apply_static_values(class);
        let run = match class.find_declared_direct_method("<clinit>", "()V") {
            Some(clinit) => self.invoker.invoke_initializer(clinit),
            None => Ok(()),
        };
        match run {
            Ok(()) => {
                class.set_owner_thread(0);
                class.set_status_and_notify(ClassStatus::Initialized);
                self.metrics.record_class_initialized();
                debug!(descriptor = class.descriptor(), "class initialized");
                Ok(())
            }
            Err(throwable) => {
                let err = LinkError::from_initializer(class.descriptor_handle(), throwable);
                class.set_owner_thread(0);
                class.fail(err.clone());
                Err(err)
            }
        }
    }

    /// Copy compile-time constants into static storage before the
    /// initializer runs.
    fn apply_static_values(&self, class: ClassRef) {
        let Some(def_idx) = class.dex_class_def() else {
            return;
        };
        let Some(unit) = class.dex_unit() else {
            return;
        };
        let def = unit.class_def(def_idx);
        let statics = class.static_fields();
        for (i, value) in def.static_values.iter().enumerate() {
            let Some(&field) = statics.get(i) else {
                break;
            };
            let offset = field.offset() as usize;
            let storage = class.statics();
            match *value {
                EncodedValue::Boolean(v) => storage.write_u8(offset, u8::from(v)),
                EncodedValue::Byte(v) => storage.write_i8(offset, v),
                EncodedValue::Char(v) => storage.write_u16(offset, v),
                EncodedValue::Short(v) => storage.write_i16(offset, v),
                EncodedValue::Int(v) => storage.write_i32(offset, v),
                EncodedValue::Long(v) => storage.write_i64(offset, v),
                EncodedValue::Float(v) => storage.write_f32(offset, v),
                EncodedValue::Double(v) => storage.write_f64(offset, v),
                EncodedValue::Null => storage.write_reference(offset, 0),
            }
        }
    }

    /// Resolve the class named by `unit`'s type table entry `idx`, using
    /// `invoking`'s loader. Idempotent through the unit's cache.
    pub fn resolve_type(
        &self,
        unit: &'static DexUnit,
        idx: TypeIndex,
        invoking: ClassRef,
    ) -> Result<ClassRef> {
        if idx.as_usize() >= unit.type_count() {
            return Err(LinkError::ClassFormat(format!(
                "type index {} out of range for {}",
                idx.0,
                unit.location()
            )));
        }
        let cache = match self.registry.cache_of(unit) {
            Some(cache) => cache,
            None => {
                return Err(LinkError::Linkage(format!(
                    "unit {} is not registered",
                    unit.location()
                )))
            }
        };
        if let Some(class) = cache.resolved_type(idx) {
            self.metrics.record_type_lookup(true);
            if class.is_erroneous() {
                return Err(class.raise_stored());
            }
            return Ok(class);
        }
        self.metrics.record_type_lookup(false);
        let class = self.find_class(unit.type_descriptor(idx), invoking.loader())?;
        Ok(cache.set_resolved_type(idx, class))
    }

    /// Resolve a method reference for the given dispatch expectation.
    /// The expectation is re-checked on every cache hit, since distinct
    /// call sites share the slot.
    pub fn resolve_method(
        &self,
        unit: &'static DexUnit,
        idx: MethodIndex,
        invoking: ClassRef,
        kind: InvokeKind,
    ) -> Result<MethodRef> {
        if idx.as_usize() >= unit.method_count() {
            return Err(LinkError::ClassFormat(format!(
                "method index {} out of range for {}",
                idx.0,
                unit.location()
            )));
        }
        let cache = match self.registry.cache_of(unit) {
            Some(cache) => cache,
            None => {
                return Err(LinkError::Linkage(format!(
                    "unit {} is not registered",
                    unit.location()
                )))
            }
        };
        if let Some(method) = cache.resolved_method(idx) {
            self.metrics.record_method_lookup(true);
            self.check_invoke_kind(method, kind)?;
            return Ok(method);
        }
        self.metrics.record_method_lookup(false);

        let method_id = unit.method_id(idx);
        let class = self.resolve_type(unit, method_id.class_idx, invoking)?;
        let name = unit.method_name(idx);
        let signature = unit.method_signature(idx);

        let found = match kind {
            InvokeKind::Static | InvokeKind::Direct => {
                match class.find_direct_method(name, signature) {
                    Some(method) => Some(method),
                    None => {
                        if class.find_virtual_method(name, signature).is_some() {
                            return Err(LinkError::IncompatibleClassChange(format!(
                                "{}.{} is virtual but was invoked directly",
                                class.descriptor(),
                                name
                            )));
                        }
                        None
                    }
                }
            }
            InvokeKind::Virtual | InvokeKind::Super => {
                match class.find_virtual_method(name, signature) {
                    Some(method) => Some(method),
                    None => {
                        if class.find_direct_method(name, signature).is_some() {
                            return Err(LinkError::IncompatibleClassChange(format!(
                                "{}.{} is direct but was invoked virtually",
                                class.descriptor(),
                                name
                            )));
                        }
                        None
                    }
                }
            }
            InvokeKind::Interface => {
                if !class.is_interface() {
                    return Err(LinkError::IncompatibleClassChange(format!(
                        "{} is not an interface",
                        class.descriptor()
                    )));
                }
                class.find_interface_method(name, signature)
            }
        };
        let method = found.ok_or_else(|| {
            LinkError::NoSuchMethod(format!("{}.{}{}", class.descriptor(), name, signature))
        })?;
        self.check_invoke_kind(method, kind)?;
        Ok(cache.set_resolved_method(idx, method))
    }

    fn check_invoke_kind(&self, method: MethodRef, kind: InvokeKind) -> Result<()> {
        let compatible = match kind {
            InvokeKind::Static => method.is_static(),
            InvokeKind::Direct => !method.is_static() && method.kind() == MethodKind::Direct,
            InvokeKind::Virtual | InvokeKind::Super => {
                !method.is_static() && method.kind() != MethodKind::Direct
            }
            InvokeKind::Interface => {
                let declaring = method.declaring_class();
                declaring.is_interface()
                    || declaring == self.object_class()
                    || method.kind() == MethodKind::Miranda
            }
        };
        if compatible {
            Ok(())
        } else {
            Err(LinkError::IncompatibleClassChange(format!(
                "{}.{} does not match {:?} dispatch",
                method.declaring_class().descriptor(),
                method.name(),
                kind
            )))
        }
    }

    /// Resolve a field reference. `is_static` comes from the access
    /// site; a mismatch with the resolved field's staticness is an
    /// incompatible change, checked on every hit.
    pub fn resolve_field(
        &self,
        unit: &'static DexUnit,
        idx: FieldIndex,
        invoking: ClassRef,
        is_static: bool,
    ) -> Result<FieldRef> {
        if idx.as_usize() >= unit.field_count() {
            return Err(LinkError::ClassFormat(format!(
                "field index {} out of range for {}",
                idx.0,
                unit.location()
            )));
        }
        let cache = match self.registry.cache_of(unit) {
            Some(cache) => cache,
            None => {
                return Err(LinkError::Linkage(format!(
                    "unit {} is not registered",
                    unit.location()
                )))
            }
        };
        if let Some(field) = cache.resolved_field(idx) {
            self.metrics.record_field_lookup(true);
            self.check_field_staticness(field, is_static)?;
            return Ok(field);
        }
        self.metrics.record_field_lookup(false);

        let field_id = unit.field_id(idx);
        let class = self.resolve_type(unit, field_id.class_idx, invoking)?;
        let name = unit.field_name(idx);
        let type_descriptor = unit.field_type_descriptor(idx);

        let found = match class.find_field(name, type_descriptor, is_static) {
            Some(field) => field,
            None => {
                if class.find_field(name, type_descriptor, !is_static).is_some() {
                    return Err(LinkError::IncompatibleClassChange(format!(
                        "field {}.{} staticness does not match the access",
                        class.descriptor(),
                        name
                    )));
                }
                return Err(LinkError::NoSuchField(format!(
                    "{}.{}:{}",
                    class.descriptor(),
                    name,
                    type_descriptor
                )));
            }
        };
        Ok(cache.set_resolved_field(idx, found))
    }

    fn check_field_staticness(&self, field: FieldRef, is_static: bool) -> Result<()> {
        if field.is_static() == is_static {
            Ok(())
        } else {
            Err(LinkError::IncompatibleClassChange(format!(
                "field {}.{} staticness does not match the access",
                field.declaring_class().descriptor(),
                field.name()
            )))
        }
    }

    /// Resolve and intern a string table entry.
    pub fn resolve_string(&self, unit: &'static DexUnit, idx: StringIndex) -> Result<Arc<str>> {
        if idx.as_usize() >= unit.string_count() {
            return Err(LinkError::ClassFormat(format!(
                "string index {} out of range for {}",
                idx.0,
                unit.location()
            )));
        }
        let cache = match self.registry.cache_of(unit) {
            Some(cache) => cache,
            None => {
                return Err(LinkError::Linkage(format!(
                    "unit {} is not registered",
                    unit.location()
                )))
            }
        };
        if let Some(interned) = cache.resolved_string(idx) {
            self.metrics.record_string_lookup(true);
            return Ok(interned);
        }
        self.metrics.record_string_lookup(false);
        let interned = self.intern.intern(unit.string_at(idx));
        Ok(cache.set_resolved_string(idx, interned))
    }

    /// Report every class reachable from linker structures to `visitor`.
    /// `NewOnly` drains the incremental log populated while new-root
    /// logging is enabled.
    pub fn visit_roots(&self, kind: RootVisitKind, visitor: &mut dyn FnMut(ClassRef)) {
        match kind {
            RootVisitKind::All => {
                for &class in self.class_roots.read().iter() {
                    visitor(class);
                }
                self.table.visit(visitor);
                self.registry.visit_resolved_types(visitor);
            }
            RootVisitKind::NewOnly => {
                for class in self.table.take_new_roots() {
                    visitor(class);
                }
            }
        }
    }

    pub fn set_log_new_roots(&self, enabled: bool) {
        self.table.set_log_new_roots(enabled);
    }
}

/// The minimal boot image: the root class, the two array marker
/// interfaces, and the reference root, all pre-verified.
fn boot_image_unit() -> DexUnit {
    let mut builder = DexUnitBuilder::new("<boot image>");
    builder.pre_verified(true);
    builder
        .class(OBJECT_DESCRIPTOR)
        .direct_method(
            "<init>",
            "()V",
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
        )
        .virtual_method("equals", "(Ljava/lang/Object;)Z", AccessFlags::PUBLIC)
        .virtual_method("hashCode", "()I", AccessFlags::PUBLIC)
        .virtual_method("toString", "()Ljava/lang/String;", AccessFlags::PUBLIC)
        .define();
    builder
        .class(CLONEABLE_DESCRIPTOR)
        .access_flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
        .superclass(OBJECT_DESCRIPTOR)
        .define();
    builder
        .class(SERIALIZABLE_DESCRIPTOR)
        .access_flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
        .superclass(OBJECT_DESCRIPTOR)
        .define();
    builder
        .class(REFERENCE_CLASS_DESCRIPTOR)
        .access_flags(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
        .superclass(OBJECT_DESCRIPTOR)
        .instance_field("referent", OBJECT_DESCRIPTOR, AccessFlags::PRIVATE)
        .instance_field("queue", OBJECT_DESCRIPTOR, AccessFlags::PRIVATE)
        .instance_field("next", OBJECT_DESCRIPTOR, AccessFlags::PRIVATE)
        .instance_field("pendingNext", OBJECT_DESCRIPTOR, AccessFlags::PRIVATE)
        .define();
    builder.build()
}
