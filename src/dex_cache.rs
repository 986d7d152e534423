//! Per-unit resolution caches and the unit registry.
//!
//! Every registered [`DexUnit`] gets a [`DexCache`] with one write-once
//! slot per symbol table entry. Racing resolvers may compute the same
//! answer twice; the slot keeps whichever store lands first and the
//! losers adopt it, so resolution is idempotent without any locking on
//! the hot read path.

use tracing::debug;

use crate::class::{ClassRef, FieldRef, MethodRef};
use crate::dex::{DexUnit, FieldIndex, MethodIndex, StringIndex, TypeIndex};
use crate::sync::{Arc, OnceLock, RwLock};

/// Resolution slots for one unit. Indexes must already be validated
/// against the unit's tables; the linker rejects out-of-range indexes
/// before they reach the cache.
pub struct DexCache {
    strings: Vec<OnceLock<Arc<str>>>,
    types: Vec<OnceLock<ClassRef>>,
    fields: Vec<OnceLock<FieldRef>>,
    methods: Vec<OnceLock<MethodRef>>,
}

impl DexCache {
    fn new(unit: &DexUnit) -> DexCache {
        DexCache {
            strings: (0..unit.string_count()).map(|_| OnceLock::new()).collect(),
            types: (0..unit.type_count()).map(|_| OnceLock::new()).collect(),
            fields: (0..unit.field_count()).map(|_| OnceLock::new()).collect(),
            methods: (0..unit.method_count()).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn resolved_string(&self, idx: StringIndex) -> Option<Arc<str>> {
        self.strings[idx.as_usize()].get().cloned()
    }

    pub fn set_resolved_string(&self, idx: StringIndex, value: Arc<str>) -> Arc<str> {
        let slot = &self.strings[idx.as_usize()];
        let _ = slot.set(value);
        match slot.get() {
            Some(winner) => winner.clone(),
            None => unreachable!("string slot empty after set"),
        }
    }

    pub fn resolved_type(&self, idx: TypeIndex) -> Option<ClassRef> {
        self.types[idx.as_usize()].get().copied()
    }

    pub fn set_resolved_type(&self, idx: TypeIndex, class: ClassRef) -> ClassRef {
        let slot = &self.types[idx.as_usize()];
        let _ = slot.set(class);
        match slot.get() {
            Some(&winner) => winner,
            None => unreachable!("type slot empty after set"),
        }
    }

    pub fn resolved_field(&self, idx: FieldIndex) -> Option<FieldRef> {
        self.fields[idx.as_usize()].get().copied()
    }

    pub fn set_resolved_field(&self, idx: FieldIndex, field: FieldRef) -> FieldRef {
        let slot = &self.fields[idx.as_usize()];
        let _ = slot.set(field);
        match slot.get() {
            Some(&winner) => winner,
            None => unreachable!("field slot empty after set"),
        }
    }

    pub fn resolved_method(&self, idx: MethodIndex) -> Option<MethodRef> {
        self.methods[idx.as_usize()].get().copied()
    }

    pub fn set_resolved_method(&self, idx: MethodIndex, method: MethodRef) -> MethodRef {
        let slot = &self.methods[idx.as_usize()];
        let _ = slot.set(method);
        match slot.get() {
            Some(&winner) => winner,
            None => unreachable!("method slot empty after set"),
        }
    }

    /// Every class this cache has resolved so far.
    pub fn visit_types(&self, visitor: &mut dyn FnMut(ClassRef)) {
        for slot in &self.types {
            if let Some(&class) = slot.get() {
                visitor(class);
            }
        }
    }
}

struct RegisteredUnit {
    unit: &'static DexUnit,
    cache: &'static DexCache,
    boot: bool,
}

/// Registry of every open unit and its cache. Units are leaked on
/// registration and live for the process.
#[derive(Default)]
pub struct DexRegistry {
    units: RwLock<Vec<RegisteredUnit>>,
}

impl DexRegistry {
    pub fn new() -> DexRegistry {
        DexRegistry::default()
    }

    /// Register a unit, creating its cache. Re-registering a unit with
    /// the same location and checksum returns the original registration.
    pub fn register(&self, unit: DexUnit, boot: bool) -> (&'static DexUnit, &'static DexCache) {
        let mut units = self.units.write();
        if let Some(existing) = units
            .iter()
            .find(|r| r.unit.location() == unit.location() && r.unit.checksum() == unit.checksum())
        {
            debug!(location = unit.location(), "unit already registered");
            return (existing.unit, existing.cache);
        }
        let unit: &'static DexUnit = Box::leak(Box::new(unit));
        let cache: &'static DexCache = Box::leak(Box::new(DexCache::new(unit)));
        debug!(
            location = unit.location(),
            classes = unit.class_def_count(),
            boot,
            "unit registered"
        );
        units.push(RegisteredUnit { unit, cache, boot });
        (unit, cache)
    }

    /// The cache paired with `unit` at registration time.
    pub fn cache_of(&self, unit: &'static DexUnit) -> Option<&'static DexCache> {
        self.units
            .read()
            .iter()
            .find(|r| std::ptr::eq(r.unit, unit))
            .map(|r| r.cache)
    }

    /// Snapshot of the boot-path units, in registration order.
    pub fn boot_units(&self) -> Vec<&'static DexUnit> {
        self.units
            .read()
            .iter()
            .filter(|r| r.boot)
            .map(|r| r.unit)
            .collect()
    }

    pub fn units(&self) -> Vec<&'static DexUnit> {
        self.units.read().iter().map(|r| r.unit).collect()
    }

    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }

    /// Visit every class resolved through any cache. Snapshots the cache
    /// list first so visitors are free to take linker locks.
    pub fn visit_resolved_types(&self, visitor: &mut dyn FnMut(ClassRef)) {
        let caches: Vec<&'static DexCache> = self.units.read().iter().map(|r| r.cache).collect();
        for cache in caches {
            cache.visit_types(visitor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::DexUnitBuilder;

    fn tiny_unit(location: &str) -> DexUnit {
        let mut builder = DexUnitBuilder::new(location);
        builder.class("LA;").define();
        builder.build()
    }

    #[test]
    fn test_string_slot_keeps_first_store() {
        let registry = DexRegistry::new();
        let (unit, cache) = registry.register(tiny_unit("tiny.dex"), false);
        let idx = StringIndex(0);
        let first = cache.set_resolved_string(idx, Arc::from("first"));
        let second = cache.set_resolved_string(idx, Arc::from("second"));
        assert_eq!(&*first, "first");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.resolved_string(idx).as_deref(), Some("first"));
        assert!(unit.string_count() > 0);
    }

    #[test]
    fn test_reregistration_is_idempotent() {
        let registry = DexRegistry::new();
        let (unit_a, cache_a) = registry.register(tiny_unit("same.dex"), true);
        let (unit_b, cache_b) = registry.register(tiny_unit("same.dex"), true);
        assert!(std::ptr::eq(unit_a, unit_b));
        assert!(std::ptr::eq(cache_a, cache_b));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.boot_units().len(), 1);
    }
}
