#[cfg(test)]
mod tests {
    use crate::class::{ClassStatus, InvokeKind, LoaderId, MethodRef};
    use crate::dex::{
        DexUnit, DexUnitBuilder, EncodedValue, FieldIndex, MethodIndex, StringIndex, TypeIndex,
    };
    use crate::error::{LinkError, Throwable};
    use crate::flags::AccessFlags;
    use crate::heap::MallocHeap;
    use crate::linker::{Invoker, Linker, LinkerOptions, NoopInvoker, VerifyMode};
    use crate::sync::{current_thread_id, Arc, Mutex};
    use crate::verifier::{AccessFlagVerifier, Verifier, VerifyOutcome};

    const CLINIT_FLAGS: AccessFlags = AccessFlags::STATIC.union(AccessFlags::CONSTRUCTOR);

    fn boot_linker() -> Linker {
        Linker::new(Arc::new(MallocHeap::new())).unwrap()
    }

    fn unit(build: impl FnOnce(&mut DexUnitBuilder)) -> DexUnit {
        let mut builder = DexUnitBuilder::new("<linker tests>");
        builder.pre_verified(true);
        build(&mut builder);
        builder.build()
    }

    #[test]
    fn bootstrap_publishes_the_well_known_roots() {
        let linker = boot_linker();
        let object = linker.object_class();
        assert_eq!(object.descriptor(), "Ljava/lang/Object;");
        assert_eq!(object.status(), ClassStatus::Resolved);
        assert_eq!(object.vtable_slice().len(), 3);
        assert!(object.find_declared_direct_method("<init>", "()V").is_some());

        let int = linker.find_class("I", LoaderId::BOOT).unwrap();
        assert!(int.is_primitive());
        assert_eq!(int.status(), ClassStatus::Initialized);
        let void = linker.find_class("V", LoaderId::BOOT).unwrap();
        assert!(void.is_primitive());
    }

    #[test]
    fn invalid_descriptors_are_rejected() {
        let linker = boot_linker();
        for bad in ["", "Ljava/lang/Object", "X", "[", "hello"] {
            let err = linker.find_class(bad, LoaderId::BOOT).unwrap_err();
            assert!(matches!(err, LinkError::ClassFormat(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn array_classes_synthesize_on_demand() {
        let linker = boot_linker();
        let ints = linker.find_class("[I", LoaderId::BOOT).unwrap();
        assert!(ints.is_array());
        assert_eq!(ints.status(), ClassStatus::Initialized);
        assert_eq!(ints.instance_size(), 12);
        assert_eq!(
            ints.component_type().unwrap(),
            linker.find_class("I", LoaderId::BOOT).unwrap()
        );

        // The marker interfaces come from the shared table.
        let interfaces: Vec<_> = ints
            .iftable_entries()
            .iter()
            .map(|e| e.interface.descriptor().to_string())
            .collect();
        assert_eq!(
            interfaces,
            ["Ljava/lang/Cloneable;", "Ljava/io/Serializable;"]
        );
        assert!(Arc::ptr_eq(
            ints.vtable().unwrap(),
            linker.object_class().vtable().unwrap()
        ));

        let nested = linker.find_class("[[I", LoaderId::BOOT).unwrap();
        assert_eq!(nested.component_type().unwrap(), ints);
        // Same handle on every lookup.
        assert_eq!(linker.find_class("[[I", LoaderId::BOOT).unwrap(), nested);
    }

    #[test]
    fn boot_misses_use_the_preallocated_error() {
        let linker = boot_linker();
        let err = linker.find_class("Lno/Such;", LoaderId::BOOT).unwrap_err();
        assert!(matches!(err, LinkError::ClassNotFound(_)), "{err:?}");
    }

    #[test]
    fn definitions_converge_to_one_class() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            b.class("Lt/A;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .define();
        }));
        let defined_before = linker.metrics().snapshot().classes_defined;
        let first = linker.find_class("Lt/A;", LoaderId::BOOT).unwrap();
        let second = linker.find_class("Lt/A;", LoaderId::BOOT).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            linker.metrics().snapshot().classes_defined,
            defined_before + 1
        );
    }

    #[test]
    fn mispredicted_static_storage_is_resized_exactly() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            // One int static: predicted eight bytes, laid out as four.
            b.class("Lt/Small;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .static_field("x", "I", AccessFlags::PUBLIC, None)
                .define();
            // One long static: prediction and layout agree.
            b.class("Lt/Exact;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .static_field("x", "J", AccessFlags::PUBLIC, None)
                .define();
        }));
        let small = linker.find_class("Lt/Small;", LoaderId::BOOT).unwrap();
        assert_eq!(small.statics().len(), 4);
        assert_eq!(small.status(), ClassStatus::Resolved);
        assert_eq!(
            linker.lookup_class("Lt/Small;", LoaderId::BOOT),
            Some(small)
        );
        for field in small.static_fields() {
            assert_eq!(field.declaring_class(), small);
        }

        let exact = linker.find_class("Lt/Exact;", LoaderId::BOOT).unwrap();
        assert_eq!(exact.statics().len(), 8);
    }

    #[test]
    fn encoded_constants_prime_static_storage() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            b.class("Lt/Consts;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .static_field("answer", "I", AccessFlags::PUBLIC, Some(EncodedValue::Int(42)))
                .static_field(
                    "big",
                    "J",
                    AccessFlags::PUBLIC,
                    Some(EncodedValue::Long(-7_000_000_000)),
                )
                .static_field(
                    "ratio",
                    "F",
                    AccessFlags::PUBLIC,
                    Some(EncodedValue::Float(0.5)),
                )
                .static_field(
                    "yes",
                    "Z",
                    AccessFlags::PUBLIC,
                    Some(EncodedValue::Boolean(true)),
                )
                .define();
        }));
        let consts = linker.find_class("Lt/Consts;", LoaderId::BOOT).unwrap();
        linker.ensure_initialized(consts).unwrap();

        let offset = |name: &str| {
            consts
                .static_fields()
                .iter()
                .find(|f| f.name() == name)
                .unwrap()
                .offset() as usize
        };
        let storage = consts.statics();
        assert_eq!(storage.read_i32(offset("answer")), 42);
        assert_eq!(storage.read_i64(offset("big")), -7_000_000_000);
        assert_eq!(storage.read_f32(offset("ratio")), 0.5);
        assert_eq!(storage.read_u8(offset("yes")), 1);
    }

    #[test]
    fn initialization_is_reentrant_for_the_owner_thread() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            b.class("Lt/R;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .define();
        }));
        let class = linker.find_class("Lt/R;", LoaderId::BOOT).unwrap();
        linker.ensure_verified(class).unwrap();

        // Pose as this thread's own running initializer.
        class.set_owner_thread(current_thread_id());
        class.set_status(ClassStatus::Initializing);
        linker.ensure_initialized(class).unwrap();
        assert_eq!(class.status(), ClassStatus::Initializing);
    }

    struct ScriptedInvoker {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Invoker for ScriptedInvoker {
        fn invoke_initializer(&self, method: MethodRef) -> Result<(), Throwable> {
            let descriptor = method.declaring_class().descriptor().to_string();
            self.log.lock().push(descriptor.clone());
            match descriptor.as_str() {
                "Lt/BadExc;" => Err(Throwable::exception(
                    "Ljava/lang/IllegalStateException;",
                    "boom",
                )),
                "Lt/BadErr;" => Err(Throwable::error("Ljava/lang/StackOverflowError;", "deep")),
                _ => Ok(()),
            }
        }
    }

    fn scripted_linker() -> (Linker, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let linker = Linker::with_collaborators(
            Arc::new(MallocHeap::new()),
            Box::new(AccessFlagVerifier),
            Box::new(ScriptedInvoker {
                log: Arc::clone(&log),
            }),
            LinkerOptions::default(),
        )
        .unwrap();
        (linker, log)
    }

    #[test]
    fn clinit_failures_wrap_and_stick() {
        let (linker, _log) = scripted_linker();
        linker.add_boot_unit(unit(|b| {
            for descriptor in ["Lt/BadExc;", "Lt/BadErr;"] {
                b.class(descriptor)
                    .access_flags(AccessFlags::PUBLIC)
                    .superclass("Ljava/lang/Object;")
                    .direct_method("<clinit>", "()V", CLINIT_FLAGS)
                    .define();
            }
        }));

        let exc = linker.find_class("Lt/BadExc;", LoaderId::BOOT).unwrap();
        let err = linker.ensure_initialized(exc).unwrap_err();
        assert!(
            matches!(
                &err,
                LinkError::Initializer { descriptor, cause }
                    if &**descriptor == "Lt/BadExc;" && cause.message == "boom"
            ),
            "{err:?}"
        );
        // Later attempts re-raise as a definition failure.
        let again = linker.ensure_initialized(exc).unwrap_err();
        assert!(
            matches!(&again, LinkError::NoClassDefFound(d) if &**d == "Lt/BadExc;"),
            "{again:?}"
        );

        // Error-kind throwables pass through unwrapped.
        let bad = linker.find_class("Lt/BadErr;", LoaderId::BOOT).unwrap();
        let err = linker.ensure_initialized(bad).unwrap_err();
        assert!(
            matches!(&err, LinkError::Throw(t) if t.descriptor == "Ljava/lang/StackOverflowError;"),
            "{err:?}"
        );
    }

    #[test]
    fn superclasses_initialize_first() {
        let (linker, log) = scripted_linker();
        linker.add_boot_unit(unit(|b| {
            b.class("Lt/A;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .direct_method("<clinit>", "()V", CLINIT_FLAGS)
                .define();
            b.class("Lt/B;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Lt/A;")
                .direct_method("<clinit>", "()V", CLINIT_FLAGS)
                .define();
            b.class("Lt/IFace;")
                .access_flags(
                    AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
                )
                .superclass("Ljava/lang/Object;")
                .direct_method("<clinit>", "()V", CLINIT_FLAGS)
                .define();
            b.class("Lt/C;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Lt/B;")
                .interface("Lt/IFace;")
                .direct_method("<clinit>", "()V", CLINIT_FLAGS)
                .define();
        }));

        let c = linker.find_class("Lt/C;", LoaderId::BOOT).unwrap();
        linker.ensure_initialized(c).unwrap();

        // Hierarchy order, and no interface in the list: implementing
        // an interface does not initialize it.
        assert_eq!(*log.lock(), ["Lt/A;", "Lt/B;", "Lt/C;"]);
        let iface = linker.find_class("Lt/IFace;", LoaderId::BOOT).unwrap();
        assert_ne!(iface.status(), ClassStatus::Initialized);

        linker.ensure_initialized(iface).unwrap();
        assert_eq!(log.lock().last().map(String::as_str), Some("Lt/IFace;"));
    }

    #[test]
    fn circular_hierarchies_error_out() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            b.class("Lt/A;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Lt/B;")
                .define();
            b.class("Lt/B;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Lt/A;")
                .define();
        }));
        let err = linker.find_class("Lt/A;", LoaderId::BOOT).unwrap_err();
        assert!(
            matches!(&err, LinkError::ClassCircularity(d) if &**d == "Lt/A;"),
            "{err:?}"
        );
        // Both classes are poisoned.
        let again = linker.find_class("Lt/B;", LoaderId::BOOT).unwrap_err();
        assert!(matches!(again, LinkError::ClassCircularity(_)), "{again:?}");
    }

    #[test]
    fn hierarchy_shape_is_validated() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            b.class("Lt/Sealed;")
                .access_flags(AccessFlags::PUBLIC | AccessFlags::FINAL)
                .superclass("Ljava/lang/Object;")
                .define();
            b.class("Lt/ExtendsFinal;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Lt/Sealed;")
                .define();
            b.class("Lt/Iface;")
                .access_flags(
                    AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT,
                )
                .superclass("Ljava/lang/Object;")
                .define();
            b.class("Lt/ExtendsIface;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Lt/Iface;")
                .define();
            b.class("Lt/ImplementsClass;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .interface("Lt/Sealed;")
                .define();
        }));

        let err = linker
            .find_class("Lt/ExtendsFinal;", LoaderId::BOOT)
            .unwrap_err();
        assert!(matches!(err, LinkError::Linkage(_)), "{err:?}");
        let err = linker
            .find_class("Lt/ExtendsIface;", LoaderId::BOOT)
            .unwrap_err();
        assert!(matches!(err, LinkError::Linkage(_)), "{err:?}");
        let err = linker
            .find_class("Lt/ImplementsClass;", LoaderId::BOOT)
            .unwrap_err();
        assert!(
            matches!(err, LinkError::IncompatibleClassChange(_)),
            "{err:?}"
        );
    }

    #[test]
    fn package_private_supertypes_are_walled_off() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            b.class("La/Base;")
                .access_flags(AccessFlags::empty())
                .superclass("Ljava/lang/Object;")
                .define();
            b.class("La/Hook;")
                .access_flags(AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
                .superclass("Ljava/lang/Object;")
                .define();
            b.class("Lb/Sub;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("La/Base;")
                .define();
            b.class("Lb/Hooked;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .interface("La/Hook;")
                .define();
            // Same package sees both just fine.
            b.class("La/Sibling;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("La/Base;")
                .interface("La/Hook;")
                .define();
        }));

        let err = linker.find_class("Lb/Sub;", LoaderId::BOOT).unwrap_err();
        assert!(matches!(err, LinkError::IllegalAccess(_)), "{err:?}");
        let err = linker.find_class("Lb/Hooked;", LoaderId::BOOT).unwrap_err();
        assert!(matches!(err, LinkError::IllegalAccess(_)), "{err:?}");
        linker.find_class("La/Sibling;", LoaderId::BOOT).unwrap();
    }

    #[test]
    fn member_lists_are_validated() {
        let linker = boot_linker();
        linker.add_boot_unit(unit(|b| {
            // An instance method in the direct list.
            b.class("Lt/BadDirect;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .direct_method("oops", "()V", AccessFlags::PUBLIC)
                .define();
            // A static method in the virtual list.
            b.class("Lt/BadVirtual;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .virtual_method("oops", "()V", AccessFlags::PUBLIC | AccessFlags::STATIC)
                .define();
        }));
        for descriptor in ["Lt/BadDirect;", "Lt/BadVirtual;"] {
            let err = linker.find_class(descriptor, LoaderId::BOOT).unwrap_err();
            assert!(matches!(err, LinkError::ClassFormat(_)), "{err:?}");
        }
    }

    #[test]
    fn resolution_goes_through_the_unit_cache() {
        let linker = boot_linker();
        let mut peer_type = TypeIndex(0);
        let mut ping = MethodIndex(0);
        let mut count = FieldIndex(0);
        let unit = linker.add_boot_unit(unit(|b| {
            b.class("Lt/Host;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .define();
            b.class("Lt/Peer;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .virtual_method("ping", "()V", AccessFlags::PUBLIC)
                .static_field("count", "I", AccessFlags::PUBLIC, None)
                .define();
            peer_type = b.type_id("Lt/Peer;");
            ping = b.method_id("Lt/Peer;", "ping", "()V");
            count = b.field_id("Lt/Peer;", "count", "I");
        }));
        let host = linker.find_class("Lt/Host;", LoaderId::BOOT).unwrap();

        let first = linker.resolve_type(unit, peer_type, host).unwrap();
        let before = linker.metrics().snapshot();
        let second = linker.resolve_type(unit, peer_type, host).unwrap();
        let after = linker.metrics().snapshot();
        assert_eq!(first, second);
        assert_eq!(after.type_cache_hits, before.type_cache_hits + 1);

        let method = linker
            .resolve_method(unit, ping, host, InvokeKind::Virtual)
            .unwrap();
        assert_eq!(method.name(), "ping");
        // The cached entry still answers dispatch-kind checks.
        let err = linker
            .resolve_method(unit, ping, host, InvokeKind::Static)
            .unwrap_err();
        assert!(
            matches!(err, LinkError::IncompatibleClassChange(_)),
            "{err:?}"
        );

        let field = linker.resolve_field(unit, count, host, true).unwrap();
        assert_eq!(field.name(), "count");
        let err = linker.resolve_field(unit, count, host, false).unwrap_err();
        assert!(
            matches!(err, LinkError::IncompatibleClassChange(_)),
            "{err:?}"
        );

        let interned = linker.resolve_string(unit, StringIndex(0)).unwrap();
        let again = linker.resolve_string(unit, StringIndex(0)).unwrap();
        assert!(Arc::ptr_eq(&interned, &again));
    }

    #[test]
    fn missing_members_report_what_was_asked() {
        let linker = boot_linker();
        let mut ghost = MethodIndex(0);
        let mut phantom = FieldIndex(0);
        let unit = linker.add_boot_unit(unit(|b| {
            b.class("Lt/Host;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .define();
            // Ids that name members no class defines.
            ghost = b.method_id("Lt/Host;", "ghost", "()V");
            phantom = b.field_id("Lt/Host;", "phantom", "I");
        }));
        let host = linker.find_class("Lt/Host;", LoaderId::BOOT).unwrap();

        let err = linker
            .resolve_method(unit, ghost, host, InvokeKind::Virtual)
            .unwrap_err();
        assert!(
            matches!(&err, LinkError::NoSuchMethod(m) if m.contains("ghost")),
            "{err:?}"
        );

        let err = linker
            .resolve_field(unit, phantom, host, false)
            .unwrap_err();
        assert!(
            matches!(&err, LinkError::NoSuchField(f) if f.contains("phantom")),
            "{err:?}"
        );
    }

    struct ScriptedVerifier {
        outcomes: Mutex<Vec<VerifyOutcome>>,
    }

    impl Verifier for ScriptedVerifier {
        fn verify(&self, _class: crate::class::ClassRef) -> VerifyOutcome {
            self.outcomes.lock().pop().unwrap_or(VerifyOutcome::Ok)
        }
    }

    fn verifying_linker(outcomes: Vec<VerifyOutcome>, mode: VerifyMode) -> Linker {
        Linker::with_collaborators(
            Arc::new(MallocHeap::new()),
            Box::new(ScriptedVerifier {
                outcomes: Mutex::new(outcomes),
            }),
            Box::new(NoopInvoker),
            LinkerOptions {
                verify: mode,
                log_new_roots: false,
            },
        )
        .unwrap()
    }

    fn unverified_unit() -> DexUnit {
        let mut builder = DexUnitBuilder::new("<unverified>");
        builder
            .class("Lt/Suspect;")
            .access_flags(AccessFlags::PUBLIC)
            .superclass("Ljava/lang/Object;")
            .define();
        builder.build()
    }

    #[test]
    fn soft_failures_retry_at_runtime_and_can_recover() {
        // Outcomes pop from the back: soft first, then clean.
        let linker = verifying_linker(
            vec![
                VerifyOutcome::Ok,
                VerifyOutcome::SoftFail("missing peer".into()),
            ],
            VerifyMode::Enforce,
        );
        linker.add_boot_unit(unverified_unit());
        let class = linker.find_class("Lt/Suspect;", LoaderId::BOOT).unwrap();

        let err = linker.ensure_verified(class).unwrap_err();
        assert!(err.is_soft_verify_failure(), "{err:?}");
        assert_eq!(class.status(), ClassStatus::RetryVerificationAtRuntime);
        assert!(!class.is_erroneous());

        linker.ensure_verified(class).unwrap();
        assert_eq!(class.status(), ClassStatus::Verified);
    }

    #[test]
    fn soft_failures_at_runtime_are_final() {
        let linker = verifying_linker(
            vec![
                VerifyOutcome::SoftFail("still missing".into()),
                VerifyOutcome::SoftFail("missing peer".into()),
            ],
            VerifyMode::Enforce,
        );
        linker.add_boot_unit(unverified_unit());
        let class = linker.find_class("Lt/Suspect;", LoaderId::BOOT).unwrap();

        let err = linker.ensure_verified(class).unwrap_err();
        assert!(err.is_soft_verify_failure());
        let err = linker.ensure_verified(class).unwrap_err();
        assert!(!err.is_soft_verify_failure(), "{err:?}");
        assert!(class.is_erroneous());
    }

    #[test]
    fn hard_failures_poison_the_class() {
        let linker = verifying_linker(
            vec![VerifyOutcome::HardFail("bad bytecode".into())],
            VerifyMode::Enforce,
        );
        linker.add_boot_unit(unverified_unit());
        let class = linker.find_class("Lt/Suspect;", LoaderId::BOOT).unwrap();

        let err = linker.ensure_verified(class).unwrap_err();
        assert!(
            matches!(&err, LinkError::VerifyFailure { soft: false, .. }),
            "{err:?}"
        );
        assert!(class.is_erroneous());
        let err = linker.ensure_initialized(class).unwrap_err();
        assert!(matches!(err, LinkError::VerifyFailure { .. }), "{err:?}");
    }

    #[test]
    fn skip_mode_bypasses_the_verifier() {
        let linker = verifying_linker(
            vec![VerifyOutcome::HardFail("never consulted".into())],
            VerifyMode::Skip,
        );
        linker.add_boot_unit(unverified_unit());
        let class = linker.find_class("Lt/Suspect;", LoaderId::BOOT).unwrap();
        linker.ensure_initialized(class).unwrap();
        assert_eq!(class.status(), ClassStatus::Initialized);
    }

    #[test]
    fn failed_initialization_poisons_cached_resolutions() {
        let (linker, _log) = scripted_linker();
        let mut bad_type = TypeIndex(0);
        let unit = linker.add_boot_unit(unit(|b| {
            b.class("Lt/BadExc;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .direct_method("<clinit>", "()V", CLINIT_FLAGS)
                .define();
            b.class("Lt/User;")
                .access_flags(AccessFlags::PUBLIC)
                .superclass("Ljava/lang/Object;")
                .define();
            bad_type = b.type_id("Lt/BadExc;");
        }));
        let user = linker.find_class("Lt/User;", LoaderId::BOOT).unwrap();

        let bad = linker.resolve_type(unit, bad_type, user).unwrap();
        linker.ensure_initialized(bad).unwrap_err();

        // The cached slot now re-raises instead of handing out the
        // erroneous class.
        let err = linker.resolve_type(unit, bad_type, user).unwrap_err();
        assert!(
            matches!(&err, LinkError::NoClassDefFound(d) if &**d == "Lt/BadExc;"),
            "{err:?}"
        );
    }
}
