//! Dispatch table construction.
//!
//! A class's vtable starts as a copy of its superclass's, gets overridden
//! in place where declared virtuals match by name and signature, and
//! grows new slots for the rest. The flattened interface table is built
//! against that vtable, synthesizing miranda stand-ins for interface
//! methods with no implementation, and finally the fixed-size interface
//! method table is filled for fast interface dispatch.

use tracing::{debug, warn};

use crate::class::{ClassRef, IfTable, IfTableEntry, Method, MethodRef, IMT_SIZE};
use crate::error::{LinkError, Result};
use crate::linker::LinkerMetrics;
use crate::sync::Arc;

/// Hard cap on vtable slots; past this, indexes no longer fit in the
/// compact 16-bit dispatch encoding.
const MAX_VTABLE_SLOTS: usize = u16::MAX as usize;

fn name_hash(name: &str) -> u32 {
    name.bytes()
        .fold(0u32, |h, b| h.wrapping_mul(31).wrapping_add(u32::from(b)))
}

/// Open-addressed index of a class's declared virtuals, keyed by method
/// name hash. Triple-sized so linear probe runs stay short.
struct NameTable {
    slots: Vec<u32>,
}

const EMPTY_SLOT: u32 = u32::MAX;

impl NameTable {
    fn build(methods: &[MethodRef]) -> NameTable {
        let capacity = (methods.len() * 3).max(1);
        let mut slots = vec![EMPTY_SLOT; capacity];
        for (i, method) in methods.iter().enumerate() {
            let mut probe = name_hash(method.name()) as usize % capacity;
            while slots[probe] != EMPTY_SLOT {
                probe = (probe + 1) % capacity;
            }
            slots[probe] = i as u32;
        }
        NameTable { slots }
    }

    /// Index into the declared-virtuals list of the method matching by
    /// name and signature, if any.
    fn find(&self, methods: &[MethodRef], name: &str, signature: &str) -> Option<usize> {
        if methods.is_empty() {
            return None;
        }
        let capacity = self.slots.len();
        let mut probe = name_hash(name) as usize % capacity;
        while self.slots[probe] != EMPTY_SLOT {
            let candidate = self.slots[probe] as usize;
            if methods[candidate].matches(name, signature) {
                return Some(candidate);
            }
            probe = (probe + 1) % capacity;
        }
        None
    }
}

/// Build and publish the dispatch tables of a freshly laid-out class.
pub(crate) fn link_methods(
    class: ClassRef,
    conflict_method: MethodRef,
    metrics: &LinkerMetrics,
) -> Result<()> {
    if class.is_interface() {
        // Interface virtuals are numbered by declaration order; the
        // table arrays of implementing classes index by that number.
        for (i, method) in class.virtual_methods().iter().enumerate() {
            method.set_vtable_index(i as u32);
        }
        let iftable = flatten_interfaces(class)
            .into_iter()
            .map(|interface| IfTableEntry {
                interface,
                methods: Vec::new(),
            })
            .collect();
        class.set_iftable(Arc::new(IfTable::new(iftable)));
        return Ok(());
    }

    let own_was_empty = class.virtual_methods().is_empty();
    let mut vtable = build_vtable(class)?;
    let (iftable, miranda_count) = build_iftable(class, &mut vtable, metrics)?;
    class.set_iftable(iftable);

    match class.superclass().and_then(|s| s.vtable().cloned()) {
        Some(shared) if own_was_empty && miranda_count == 0 => class.set_vtable(shared),
        _ => class.set_vtable(Arc::new(vtable)),
    }

    class.set_imt(build_imt(class, conflict_method, metrics));
    debug!(
        class = class.descriptor(),
        vtable = class.vtable_slice().len(),
        interfaces = class.iftable_entries().len(),
        mirandas = miranda_count,
        "linked methods"
    );
    Ok(())
}

/// Copy-and-override pass over the superclass vtable, then append the
/// declared virtuals that override nothing.
fn build_vtable(class: ClassRef) -> Result<Vec<MethodRef>> {
    let own: Vec<MethodRef> = class.virtual_methods().clone();
    let mut vtable: Vec<MethodRef> = match class.superclass() {
        Some(superclass) => superclass.vtable_slice().to_vec(),
        None => Vec::new(),
    };

    let table = NameTable::build(&own);
    let mut overrides = vec![false; own.len()];
    for slot in 0..vtable.len() {
        let super_method = vtable[slot];
        let Some(own_idx) = table.find(&own, super_method.name(), super_method.signature()) else {
            continue;
        };
        if super_method.is_final() {
            return Err(LinkError::Linkage(format!(
                "{} overrides final method {}.{}",
                class.descriptor(),
                super_method.declaring_class().descriptor(),
                super_method.name()
            )));
        }
        if super_method.access_flags().is_package_private()
            && !class.in_same_runtime_package(super_method.declaring_class().get())
        {
            // Legacy linking lets the override land even though the
            // packages differ. Kept for compatibility, loudly.
            warn!(
                class = class.descriptor(),
                method = super_method.name(),
                declared_in = super_method.declaring_class().descriptor(),
                "cross-package override of a package-private method"
            );
        }
        let method = own[own_idx];
        method.set_vtable_index(slot as u32);
        vtable[slot] = method;
        overrides[own_idx] = true;
    }

    for (i, &method) in own.iter().enumerate() {
        if overrides[i] {
            continue;
        }
        method.set_vtable_index(vtable.len() as u32);
        vtable.push(method);
    }
    if vtable.len() > MAX_VTABLE_SLOTS {
        return Err(LinkError::ClassFormat(format!(
            "{} has {} virtual methods, limit is {MAX_VTABLE_SLOTS}",
            class.descriptor(),
            vtable.len()
        )));
    }
    Ok(vtable)
}

/// The transitive interface set: the superclass's flattened table, then
/// each declared interface followed by its own flattened table, first
/// appearance winning.
fn flatten_interfaces(class: ClassRef) -> Vec<ClassRef> {
    let mut flattened: Vec<ClassRef> = Vec::new();
    let push = |interface: ClassRef, flattened: &mut Vec<ClassRef>| {
        if !flattened.contains(&interface) {
            flattened.push(interface);
        }
    };
    if let Some(superclass) = class.superclass() {
        for entry in superclass.iftable_entries() {
            push(entry.interface, &mut flattened);
        }
    }
    for &interface in class.interfaces() {
        push(interface, &mut flattened);
        for entry in interface.iftable_entries() {
            push(entry.interface, &mut flattened);
        }
    }
    flattened
}

/// Resolve every interface method against the vtable, appending mirandas
/// for the unimplemented ones. Returns the table and how many mirandas
/// were synthesized.
fn build_iftable(
    class: ClassRef,
    vtable: &mut Vec<MethodRef>,
    metrics: &LinkerMetrics,
) -> Result<(Arc<IfTable>, usize)> {
    let flattened = flatten_interfaces(class);

    // A subclass that declares nothing and adds no interfaces resolves
    // identically to its superclass; share that table.
    if let Some(superclass) = class.superclass() {
        if class.virtual_methods().is_empty() && class.interfaces().is_empty() {
            if let Some(super_iftable) = superclass.iftable() {
                if super_iftable.len() == flattened.len() {
                    return Ok((Arc::clone(super_iftable), 0));
                }
            }
        }
    }

    let mut mirandas: Vec<MethodRef> = Vec::new();
    let mut entries = Vec::with_capacity(flattened.len());
    for interface in flattened {
        let interface_methods: Vec<MethodRef> = interface.virtual_methods().clone();
        let mut methods = Vec::with_capacity(interface_methods.len());
        for interface_method in interface_methods {
            let resolution = match find_implementation(vtable, interface_method) {
                Some(found) => {
                    if !found.is_public() {
                        return Err(LinkError::IllegalAccess(format!(
                            "{}.{} implementing {}.{} is not public",
                            found.declaring_class().descriptor(),
                            found.name(),
                            interface.descriptor(),
                            interface_method.name()
                        )));
                    }
                    found
                }
                None => miranda_for(class, interface_method, &mut mirandas),
            };
            methods.push(resolution);
        }
        entries.push(IfTableEntry { interface, methods });
    }

    for &miranda in &mirandas {
        miranda.set_vtable_index(vtable.len() as u32);
        vtable.push(miranda);
        class.push_virtual_method(miranda);
    }
    if vtable.len() > MAX_VTABLE_SLOTS {
        return Err(LinkError::ClassFormat(format!(
            "{} has {} virtual methods after interface linking, limit is {MAX_VTABLE_SLOTS}",
            class.descriptor(),
            vtable.len()
        )));
    }
    let count = mirandas.len();
    metrics.add_mirandas(count as u64);
    Ok((Arc::new(IfTable::new(entries)), count))
}

/// Most-derived implementation wins, so the vtable is scanned backward.
fn find_implementation(vtable: &[MethodRef], interface_method: MethodRef) -> Option<MethodRef> {
    vtable
        .iter()
        .rev()
        .copied()
        .find(|m| m.matches(interface_method.name(), interface_method.signature()))
}

/// Reuse the miranda already made for an identically named and typed
/// method of another interface, else synthesize one.
fn miranda_for(
    class: ClassRef,
    interface_method: MethodRef,
    mirandas: &mut Vec<MethodRef>,
) -> MethodRef {
    if let Some(&existing) = mirandas
        .iter()
        .find(|m| m.matches(interface_method.name(), interface_method.signature()))
    {
        return existing;
    }
    let miranda = MethodRef::new(Method::new_miranda(interface_method.get(), class));
    mirandas.push(miranda);
    miranda
}

/// Fill the fixed-size interface dispatch table. Slots are picked by the
/// interface method's id; colliding slots that disagree on the target
/// get the shared conflict sentinel.
fn build_imt(
    class: ClassRef,
    conflict_method: MethodRef,
    metrics: &LinkerMetrics,
) -> Box<[Option<MethodRef>; IMT_SIZE]> {
    let mut imt: Box<[Option<MethodRef>; IMT_SIZE]> = Box::new([None; IMT_SIZE]);
    for entry in class.iftable_entries() {
        let interface_methods: Vec<MethodRef> = entry.interface.virtual_methods().clone();
        for (j, &resolution) in entry.methods.iter().enumerate() {
            let Some(&interface_method) = interface_methods.get(j) else {
                continue;
            };
            let slot = interface_method.dex_method_index().as_usize() % IMT_SIZE;
            match imt[slot] {
                None => imt[slot] = Some(resolution),
                Some(current) if current == resolution || current == conflict_method => {}
                Some(_) => {
                    imt[slot] = Some(conflict_method);
                    metrics.add_imt_conflict();
                }
            }
        }
    }
    imt
}

#[cfg(test)]
mod tests {
    use super::name_hash;

    #[test]
    fn test_name_hash_matches_reference_values() {
        // h = h * 31 + byte over UTF-8 bytes.
        assert_eq!(name_hash(""), 0);
        assert_eq!(name_hash("a"), 97);
        assert_eq!(name_hash("ab"), 97 * 31 + 98);
        assert_ne!(name_hash("run"), name_hash("call"));
    }
}
