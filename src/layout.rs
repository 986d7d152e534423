//! Field layout and the instance reference bitmap.
//!
//! Fields are packed reference-first, then by descending width, with
//! alignment holes collected into a gap heap and handed to the first
//! later field narrow enough to fit. The order is a pure function of the
//! field set, so layout never depends on declaration order.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;

use tracing::trace;

use crate::class::{Class, FieldRef, WALK_SUPER_BITMAP};
use crate::descriptor::{REFERENCE_CLASS_DESCRIPTOR, REFERENCE_WIDTH};

/// Bytes reserved at the front of every instance for the object header.
pub const OBJECT_HEADER_SIZE: usize = 8;

/// Name of the special scanning-excluded field of the reference root
/// class.
const REFERENT_FIELD: &str = "referent";

pub(crate) fn round_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

/// An unused byte range created by alignment padding. Gaps are chunked so
/// each one's offset is aligned to its size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldGap {
    size: usize,
    offset: usize,
}

impl Ord for FieldGap {
    /// Heap order: widest gap first, ties broken toward the lowest
    /// offset, so placement is deterministic.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.size
            .cmp(&other.size)
            .then_with(|| other.offset.cmp(&self.offset))
    }
}

impl PartialOrd for FieldGap {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// Break `[start, end)` into aligned gaps of 4, 2, and 1 bytes.
fn add_gaps(gaps: &mut BinaryHeap<FieldGap>, mut start: usize, end: usize) {
    while start < end {
        let remaining = end - start;
        if remaining >= 4 && start % 4 == 0 {
            gaps.push(FieldGap {
                size: 4,
                offset: start,
            });
            start += 4;
        } else if remaining >= 2 && start % 2 == 0 {
            gaps.push(FieldGap {
                size: 2,
                offset: start,
            });
            start += 2;
        } else {
            gaps.push(FieldGap {
                size: 1,
                offset: start,
            });
            start += 1;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LayoutKind {
    Instance,
    Static,
}

/// Assign offsets to the class's fields of the given kind.
///
/// Instance layout starts where the superclass ended (or right after the
/// object header for the root) and also publishes the instance size and
/// reference bitmap. Static layout starts at zero and returns the exact
/// storage block size, which the caller compares against its prediction.
pub(crate) fn link_fields(class: &Class, kind: LayoutKind) -> usize {
    let mut fields: Vec<FieldRef> = match kind {
        LayoutKind::Instance => class.instance_fields().to_vec(),
        LayoutKind::Static => class.static_fields().to_vec(),
    };
    // Pure sort key: references ahead of primitives, wide before narrow,
    // names breaking the remaining ties.
    fields.sort_by(|a, b| {
        b.is_reference()
            .cmp(&a.is_reference())
            .then_with(|| b.width().cmp(&a.width()))
            .then_with(|| a.name().cmp(b.name()))
    });

    let base = match kind {
        LayoutKind::Instance => match class.superclass() {
            Some(superclass) => superclass.instance_size(),
            None => OBJECT_HEADER_SIZE,
        },
        LayoutKind::Static => 0,
    };

    let mut gaps: BinaryHeap<FieldGap> = BinaryHeap::new();
    let mut current = base;
    let mut largest = REFERENCE_WIDTH;
    for &field in &fields {
        let width = field.width();
        if width == 0 {
            unreachable!("zero-width field {} survived validation", field.name());
        }
        largest = largest.max(width);
        let offset = match gaps.peek() {
            Some(gap) if gap.size >= width => {
                let gap = match gaps.pop() {
                    Some(gap) => gap,
                    None => unreachable!("peeked gap vanished"),
                };
                add_gaps(&mut gaps, gap.offset + width, gap.offset + gap.size);
                gap.offset
            }
            _ => {
                let aligned = round_up(current, width);
                add_gaps(&mut gaps, current, aligned);
                current = aligned + width;
                aligned
            }
        };
        field.set_offset(offset as u32);
        trace!(
            class = class.descriptor(),
            field = field.name(),
            offset,
            width,
            "placed field"
        );
    }

    let size = round_up(current, largest);
    match kind {
        LayoutKind::Instance => {
            class.set_instance_size(size);
            class.set_reference_bitmap(build_reference_bitmap(class, &fields));
            size
        }
        LayoutKind::Static => size,
    }
}

/// Fold this class's reference slots into the inherited bitmap. Offsets
/// past the bitmap's reach degrade the whole class to chain-walk
/// scanning.
fn build_reference_bitmap(class: &Class, fields: &[FieldRef]) -> u32 {
    let inherited = match class.superclass() {
        Some(superclass) => superclass.reference_bitmap(),
        None => 0,
    };
    if inherited == WALK_SUPER_BITMAP {
        return WALK_SUPER_BITMAP;
    }
    let skip_referent = class.descriptor() == REFERENCE_CLASS_DESCRIPTOR;
    let mut bitmap = inherited;
    for field in fields {
        if !field.is_reference() {
            continue;
        }
        if skip_referent && field.name() == REFERENT_FIELD {
            continue;
        }
        let slot = field.offset() as usize / REFERENCE_WIDTH;
        if slot >= 32 {
            return WALK_SUPER_BITMAP;
        }
        bitmap |= 1 << slot;
    }
    bitmap
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_heap_prefers_wide_then_low() {
        let mut gaps = BinaryHeap::new();
        gaps.push(FieldGap { size: 2, offset: 4 });
        gaps.push(FieldGap { size: 4, offset: 12 });
        gaps.push(FieldGap { size: 4, offset: 8 });
        gaps.push(FieldGap { size: 1, offset: 3 });
        let order: Vec<FieldGap> = std::iter::from_fn(|| gaps.pop()).collect();
        assert_eq!(
            order,
            vec![
                FieldGap { size: 4, offset: 8 },
                FieldGap { size: 4, offset: 12 },
                FieldGap { size: 2, offset: 4 },
                FieldGap { size: 1, offset: 3 },
            ]
        );
    }

    #[test]
    fn test_gap_chunking_respects_alignment() {
        let mut gaps = BinaryHeap::new();
        add_gaps(&mut gaps, 9, 16);
        let mut chunks: Vec<FieldGap> = gaps.into_vec();
        chunks.sort_by_key(|g| g.offset);
        assert_eq!(
            chunks,
            vec![
                FieldGap { size: 1, offset: 9 },
                FieldGap { size: 2, offset: 10 },
                FieldGap { size: 4, offset: 12 },
            ]
        );
    }

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(9, 4), 12);
        assert_eq!(round_up(12, 8), 16);
        assert_eq!(round_up(16, 8), 16);
    }
}
