use clap::Parser;
use dexlink::class::MethodKind;
use dexlink::descriptor::pretty_name;
use dexlink::dex::DexUnitBuilder;
use dexlink::flags::AccessFlags;
use dexlink::heap::MallocHeap;
use dexlink::sync::Arc;
use dexlink::{ClassRef, Linker, LoaderId};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Link a demo unit and dump the layout and dispatch tables of a class"
)]
struct Args {
    /// Descriptor of the class to dump (e.g. Ldemo/Circle;)
    #[arg(default_value = "Ldemo/Circle;")]
    descriptor: String,
    /// Run static initialization before dumping
    #[arg(short, long)]
    initialize: bool,
}

/// A small hierarchy that exercises gap-filled layout, overrides,
/// default-less interface methods, and colliding interface slots.
fn demo_unit() -> dexlink::dex::DexUnit {
    use dexlink::dex::EncodedValue;

    let mut builder = DexUnitBuilder::new("<demo>");
    builder.pre_verified(true);
    builder
        .class("Ldemo/Drawable;")
        .access_flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
        .superclass("Ljava/lang/Object;")
        .virtual_method("draw", "()V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
        .virtual_method("bounds", "()I", AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
        .define();
    builder
        .class("Ldemo/Scalable;")
        .access_flags(AccessFlags::PUBLIC | AccessFlags::INTERFACE | AccessFlags::ABSTRACT)
        .superclass("Ljava/lang/Object;")
        .virtual_method("scale", "(F)V", AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
        .virtual_method("bounds", "()I", AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
        .define();
    builder
        .class("Ldemo/Shape;")
        .access_flags(AccessFlags::PUBLIC | AccessFlags::ABSTRACT)
        .superclass("Ljava/lang/Object;")
        .interface("Ldemo/Drawable;")
        .instance_field("id", "I", AccessFlags::PROTECTED)
        .instance_field("tag", "Ljava/lang/Object;", AccessFlags::PRIVATE)
        .instance_field("visible", "Z", AccessFlags::PRIVATE)
        .static_field(
            "COUNT",
            "I",
            AccessFlags::PUBLIC,
            Some(EncodedValue::Int(0)),
        )
        .static_field(
            "EPOCH",
            "J",
            AccessFlags::PRIVATE | AccessFlags::FINAL,
            Some(EncodedValue::Long(1_700_000_000)),
        )
        .direct_method(
            "<init>",
            "()V",
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
        )
        .direct_method("nextId", "()I", AccessFlags::PRIVATE | AccessFlags::STATIC)
        .virtual_method("draw", "()V", AccessFlags::PUBLIC)
        .virtual_method("toString", "()Ljava/lang/String;", AccessFlags::PUBLIC)
        .define();
    builder
        .class("Ldemo/Circle;")
        .access_flags(AccessFlags::PUBLIC)
        .superclass("Ldemo/Shape;")
        .interface("Ldemo/Scalable;")
        .instance_field("radius", "F", AccessFlags::PRIVATE)
        .instance_field("center", "J", AccessFlags::PRIVATE)
        .instance_field("label", "Ljava/lang/String;", AccessFlags::PRIVATE)
        .static_field(
            "UNIT",
            "F",
            AccessFlags::PUBLIC | AccessFlags::FINAL,
            Some(EncodedValue::Float(1.0)),
        )
        .direct_method(
            "<init>",
            "()V",
            AccessFlags::PUBLIC | AccessFlags::CONSTRUCTOR,
        )
        .direct_method(
            "<clinit>",
            "()V",
            AccessFlags::STATIC | AccessFlags::CONSTRUCTOR,
        )
        .virtual_method("draw", "()V", AccessFlags::PUBLIC)
        .virtual_method("bounds", "()I", AccessFlags::PUBLIC)
        .virtual_method("scale", "(F)V", AccessFlags::PUBLIC)
        .define();
    builder.build()
}

fn dump(class: ClassRef) {
    println!(
        "class {} [{:?}] flags={:?}",
        pretty_name(class.descriptor()),
        class.status(),
        class.access_flags()
    );
    if let Some(superclass) = class.superclass() {
        println!("  extends {}", pretty_name(superclass.descriptor()));
    }
    for interface in class.interfaces() {
        println!("  implements {}", pretty_name(interface.descriptor()));
    }

    println!(
        "\ninstance layout ({} bytes, reference bitmap {:#010x}):",
        class.instance_size(),
        class.reference_bitmap()
    );
    let mut fields: Vec<_> = class.instance_fields().to_vec();
    fields.sort_by_key(|f| f.offset());
    for field in fields {
        println!(
            "  +{:<4} {:<10} {} ({} bytes)",
            field.offset(),
            pretty_name(field.type_descriptor()),
            field.name(),
            field.width()
        );
    }

    if !class.static_fields().is_empty() {
        println!("\nstatic storage ({} bytes):", class.statics().len());
        let mut fields: Vec<_> = class.static_fields().to_vec();
        fields.sort_by_key(|f| f.offset());
        for field in fields {
            println!(
                "  +{:<4} {:<10} {}",
                field.offset(),
                pretty_name(field.type_descriptor()),
                field.name()
            );
        }
    }

    println!("\nvtable ({} slots):", class.vtable_slice().len());
    for (i, method) in class.vtable_slice().iter().enumerate() {
        let marker = match method.kind() {
            MethodKind::Miranda => " [miranda]",
            MethodKind::Conflict => " [conflict]",
            _ => "",
        };
        println!(
            "  [{:>3}] {}.{}{}{}",
            i,
            pretty_name(method.declaring_class().descriptor()),
            method.name(),
            method.signature(),
            marker
        );
    }

    if !class.iftable_entries().is_empty() {
        println!("\ninterface tables:");
        for entry in class.iftable_entries() {
            println!("  {}:", pretty_name(entry.interface.descriptor()));
            for (i, target) in entry.methods.iter().enumerate() {
                println!(
                    "    [{}] -> vtable[{}] {}.{}",
                    i,
                    target.vtable_index(),
                    pretty_name(target.declaring_class().descriptor()),
                    target.name()
                );
            }
        }
    }

    if let Some(imt) = class.imt() {
        let occupied: Vec<_> = imt
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.map(|m| (slot, m)))
            .collect();
        println!("\nimt ({} of {} slots occupied):", occupied.len(), imt.len());
        for (slot, method) in occupied {
            let target = match method.kind() {
                MethodKind::Conflict => "conflict".to_string(),
                _ => format!(
                    "{}.{}",
                    pretty_name(method.declaring_class().descriptor()),
                    method.name()
                ),
            };
            println!("  [{:>2}] {}", slot, target);
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let linker = match Linker::new(Arc::new(MallocHeap::new())) {
        Ok(linker) => linker,
        Err(err) => {
            eprintln!("bootstrap failed: {err}");
            return ExitCode::FAILURE;
        }
    };
    linker.add_boot_unit(demo_unit());

    let class = match linker.find_class(&args.descriptor, LoaderId::BOOT) {
        Ok(class) => class,
        Err(err) => {
            eprintln!("linking {} failed: {err}", args.descriptor);
            return ExitCode::FAILURE;
        }
    };
    if args.initialize {
        if let Err(err) = linker.ensure_initialized(class) {
            eprintln!("initializing {} failed: {err}", args.descriptor);
            return ExitCode::FAILURE;
        }
    }
    dump(class);
    ExitCode::SUCCESS
}
