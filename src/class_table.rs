//! Concurrent registry of loaded classes.
//!
//! Keys are (descriptor, defining loader); classes loaded by different
//! loaders from the same name are distinct entries. Insertion is
//! first-writer-wins so racing definers converge on one class object.

use std::collections::HashMap;

use tracing::debug;

use crate::class::{ClassRef, LoaderId};
use crate::sync::{Arc, AtomicBool, Mutex, Ordering, RwLock};

#[derive(Default)]
pub struct ClassTable {
    /// Per-loader descriptor maps. The nesting keeps lookups borrow-only
    /// on the descriptor.
    classes: RwLock<HashMap<LoaderId, HashMap<Arc<str>, ClassRef>>>,
    /// Classes inserted since the last drain, for incremental root
    /// publication to a collector.
    new_roots: Mutex<Vec<ClassRef>>,
    log_new_roots: AtomicBool,
}

impl ClassTable {
    pub fn new() -> ClassTable {
        ClassTable::default()
    }

    pub fn lookup(&self, descriptor: &str, loader: LoaderId) -> Option<ClassRef> {
        self.classes
            .read()
            .get(&loader)
            .and_then(|per_loader| per_loader.get(descriptor))
            .copied()
    }

    /// Register `class` under its (descriptor, loader) key. Returns the
    /// previously registered class if one beat us to the slot, in which
    /// case `class` must be discarded by the caller.
    pub fn insert(&self, class: ClassRef) -> Option<ClassRef> {
        let mut classes = self.classes.write();
        let per_loader = classes.entry(class.loader()).or_default();
        if let Some(&existing) = per_loader.get(class.descriptor()) {
            return Some(existing);
        }
        per_loader.insert(class.descriptor_handle(), class);
        drop(classes);
        debug!(descriptor = class.descriptor(), loader = class.loader().0, "class registered");
        if self.log_new_roots.load(Ordering::Acquire) {
            self.new_roots.lock().push(class);
        }
        None
    }

    /// Swap a retired placeholder for its final class under the same key.
    /// The slot must still hold `old`; anything else means the swap
    /// protocol was violated.
    pub(crate) fn replace(&self, old: ClassRef, new: ClassRef) {
        let mut classes = self.classes.write();
        let slot = classes
            .get_mut(&old.loader())
            .and_then(|per_loader| per_loader.get_mut(old.descriptor()));
        match slot {
            Some(slot) if *slot == old => *slot = new,
            _ => unreachable!(
                "class table slot for {} no longer holds the placeholder",
                old.descriptor()
            ),
        }
        drop(classes);
        if self.log_new_roots.load(Ordering::Acquire) {
            self.new_roots.lock().push(new);
        }
    }

    pub fn len(&self) -> usize {
        self.classes.read().values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every registered class. The table lock is held for the
    /// duration; visitors must not load classes.
    pub fn visit(&self, visitor: &mut dyn FnMut(ClassRef)) {
        let classes = self.classes.read();
        for per_loader in classes.values() {
            for &class in per_loader.values() {
                visitor(class);
            }
        }
    }

    /// Enable or disable recording of newly inserted classes. Disabling
    /// clears anything recorded but not yet drained.
    pub fn set_log_new_roots(&self, enabled: bool) {
        self.log_new_roots.store(enabled, Ordering::Release);
        if !enabled {
            self.new_roots.lock().clear();
        }
    }

    /// Drain the classes inserted since the previous drain.
    pub fn take_new_roots(&self) -> Vec<ClassRef> {
        std::mem::take(&mut *self.new_roots.lock())
    }
}
