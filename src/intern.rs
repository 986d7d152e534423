use dashmap::DashMap;
use std::sync::Arc;

/// Global string intern table.
///
/// Interning maps equal contents to one shared allocation for the process
/// lifetime, so identity comparison of interned strings is meaningful.
#[derive(Debug, Default)]
pub struct InternTable {
    strings: DashMap<Arc<str>, Arc<str>>,
}

impl InternTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the canonical allocation for `s`, inserting it if new.
    /// Racing inserts of the same contents converge on one winner.
    pub fn intern(&self, s: &str) -> Arc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.value().clone();
        }
        let arc: Arc<str> = Arc::from(s);
        self.strings
            .entry(arc.clone())
            .or_insert_with(|| arc)
            .value()
            .clone()
    }

    pub fn contains(&self, s: &str) -> bool {
        self.strings.contains_key(s)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::InternTable;
    use std::sync::Arc;

    #[test]
    fn test_interning_returns_one_allocation() {
        let table = InternTable::new();
        let a = table.intern("hello");
        let b = table.intern("hello");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);

        let c = table.intern("world");
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_concurrent_interning_converges() {
        let table = Arc::new(InternTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.intern("shared"))
            })
            .collect();
        let results: Vec<Arc<str>> = handles
            .into_iter()
            .map(|h| h.join().expect("intern thread panicked"))
            .collect();
        assert_eq!(table.len(), 1);
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
    }
}
