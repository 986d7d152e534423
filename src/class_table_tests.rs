#[cfg(test)]
mod tests {
    use crate::class::{Class, ClassRef, LoaderId};
    use crate::class_table::ClassTable;
    use crate::dex::{ClassDefIndex, DexUnit, DexUnitBuilder};
    use crate::flags::AccessFlags;
    use crate::sync::Arc;

    fn leaked_unit() -> &'static DexUnit {
        let mut builder = DexUnitBuilder::new("<table tests>");
        builder.class("Lt/A;").superclass("Ljava/lang/Object;").define();
        Box::leak(Box::new(builder.build()))
    }

    fn unit_class(descriptor: &str, loader: LoaderId) -> ClassRef {
        ClassRef::new(Class::new_from_unit(
            Arc::from(descriptor),
            loader,
            leaked_unit(),
            ClassDefIndex(0),
            AccessFlags::PUBLIC,
            0,
        ))
    }

    #[test]
    fn first_insert_wins() {
        let table = ClassTable::new();
        let first = unit_class("Lt/A;", LoaderId::BOOT);
        let second = unit_class("Lt/A;", LoaderId::BOOT);

        assert_eq!(table.insert(first), None);
        assert_eq!(table.insert(second), Some(first));
        assert_eq!(table.lookup("Lt/A;", LoaderId::BOOT), Some(first));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn loaders_are_separate_namespaces() {
        let table = ClassTable::new();
        let boot = unit_class("Lt/A;", LoaderId::BOOT);
        let app = unit_class("Lt/A;", LoaderId(7));

        assert_eq!(table.insert(boot), None);
        assert_eq!(table.insert(app), None);
        assert_eq!(table.lookup("Lt/A;", LoaderId::BOOT), Some(boot));
        assert_eq!(table.lookup("Lt/A;", LoaderId(7)), Some(app));
        assert_eq!(table.lookup("Lt/A;", LoaderId(8)), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn replace_swaps_the_slot_in_place() {
        let table = ClassTable::new();
        let original = unit_class("Lt/A;", LoaderId::BOOT);
        let replacement = unit_class("Lt/A;", LoaderId::BOOT);

        table.insert(original);
        table.replace(original, replacement);
        assert_eq!(table.lookup("Lt/A;", LoaderId::BOOT), Some(replacement));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn visit_reports_every_entry() {
        let table = ClassTable::new();
        table.insert(unit_class("Lt/A;", LoaderId::BOOT));
        table.insert(unit_class("Lt/B;", LoaderId::BOOT));
        table.insert(unit_class("Lt/A;", LoaderId(3)));

        let mut seen = Vec::new();
        table.visit(&mut |class| seen.push(class.descriptor().to_string()));
        seen.sort();
        assert_eq!(seen, ["Lt/A;", "Lt/A;", "Lt/B;"]);
    }

    #[test]
    fn new_root_log_drains_only_once() {
        let table = ClassTable::new();
        table.insert(unit_class("Lt/A;", LoaderId::BOOT));
        table.set_log_new_roots(true);
        let b = unit_class("Lt/B;", LoaderId::BOOT);
        table.insert(b);

        assert_eq!(table.take_new_roots(), vec![b]);
        assert!(table.take_new_roots().is_empty());

        // Disabling clears anything accumulated since the last drain.
        table.insert(unit_class("Lt/C;", LoaderId::BOOT));
        table.set_log_new_roots(false);
        assert!(table.take_new_roots().is_empty());
    }
}
