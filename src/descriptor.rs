//! Type descriptor utilities.
//!
//! Descriptors follow the compact container syntax: one character for
//! primitives (`I`, `J`, ...), `Lpkg/Name;` for classes, and a `[` prefix
//! per array dimension.

/// Byte width of a reference slot inside object and static layouts.
/// References are stored compressed regardless of the host pointer width.
pub const REFERENCE_WIDTH: usize = 4;

pub const OBJECT_DESCRIPTOR: &str = "Ljava/lang/Object;";
pub const CLONEABLE_DESCRIPTOR: &str = "Ljava/lang/Cloneable;";
pub const SERIALIZABLE_DESCRIPTOR: &str = "Ljava/io/Serializable;";
/// Soft-reference root; its `referent` slot gets special layout and
/// scanning treatment.
pub const REFERENCE_CLASS_DESCRIPTOR: &str = "Ljava/lang/ref/Reference;";

/// The nine primitive kinds, keyed by their one-character descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 9] = [
        PrimitiveKind::Boolean,
        PrimitiveKind::Byte,
        PrimitiveKind::Char,
        PrimitiveKind::Short,
        PrimitiveKind::Int,
        PrimitiveKind::Long,
        PrimitiveKind::Float,
        PrimitiveKind::Double,
        PrimitiveKind::Void,
    ];

    pub fn from_descriptor_char(c: u8) -> Option<PrimitiveKind> {
        match c {
            b'Z' => Some(PrimitiveKind::Boolean),
            b'B' => Some(PrimitiveKind::Byte),
            b'C' => Some(PrimitiveKind::Char),
            b'S' => Some(PrimitiveKind::Short),
            b'I' => Some(PrimitiveKind::Int),
            b'J' => Some(PrimitiveKind::Long),
            b'F' => Some(PrimitiveKind::Float),
            b'D' => Some(PrimitiveKind::Double),
            b'V' => Some(PrimitiveKind::Void),
            _ => None,
        }
    }

    pub fn descriptor(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "Z",
            PrimitiveKind::Byte => "B",
            PrimitiveKind::Char => "C",
            PrimitiveKind::Short => "S",
            PrimitiveKind::Int => "I",
            PrimitiveKind::Long => "J",
            PrimitiveKind::Float => "F",
            PrimitiveKind::Double => "D",
            PrimitiveKind::Void => "V",
        }
    }

    /// Storage width in bytes. Void has none.
    pub fn width(self) -> usize {
        match self {
            PrimitiveKind::Void => 0,
            PrimitiveKind::Boolean | PrimitiveKind::Byte => 1,
            PrimitiveKind::Char | PrimitiveKind::Short => 2,
            PrimitiveKind::Int | PrimitiveKind::Float => 4,
            PrimitiveKind::Long | PrimitiveKind::Double => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PrimitiveKind::Boolean => "boolean",
            PrimitiveKind::Byte => "byte",
            PrimitiveKind::Char => "char",
            PrimitiveKind::Short => "short",
            PrimitiveKind::Int => "int",
            PrimitiveKind::Long => "long",
            PrimitiveKind::Float => "float",
            PrimitiveKind::Double => "double",
            PrimitiveKind::Void => "void",
        }
    }
}

pub fn is_primitive(descriptor: &str) -> bool {
    descriptor.len() == 1
        && PrimitiveKind::from_descriptor_char(descriptor.as_bytes()[0]).is_some()
}

pub fn is_array(descriptor: &str) -> bool {
    descriptor.as_bytes().first() == Some(&b'[')
}

/// Class and array descriptors occupy reference slots; primitives do not.
pub fn is_reference(descriptor: &str) -> bool {
    matches!(descriptor.as_bytes().first(), Some(b'L') | Some(b'['))
}

/// Strip one array dimension: `[[I` to `[I`, `[LFoo;` to `LFoo;`.
pub fn array_component(descriptor: &str) -> Option<&str> {
    descriptor.strip_prefix('[')
}

/// Byte width of a field of this type within an object or static block.
pub fn field_width(descriptor: &str) -> usize {
    if is_reference(descriptor) {
        REFERENCE_WIDTH
    } else {
        PrimitiveKind::from_descriptor_char(descriptor.as_bytes()[0])
            .map(PrimitiveKind::width)
            .unwrap_or(0)
    }
}

/// Structural validity check for a single field or class descriptor.
pub fn is_valid_type_descriptor(descriptor: &str) -> bool {
    let stripped = descriptor.trim_start_matches('[');
    if stripped.is_empty() || descriptor.len() - stripped.len() > 255 {
        return false;
    }
    if stripped.len() == 1 {
        // Void is a valid return type but never a valid array component.
        return is_primitive(stripped)
            && !(descriptor.len() > stripped.len() && stripped == "V");
    }
    stripped.len() > 2 && stripped.starts_with('L') && stripped.ends_with(';')
}

/// The package portion of a class descriptor, empty for the default
/// package and for primitives/arrays.
pub fn package_of(descriptor: &str) -> &str {
    if !descriptor.starts_with('L') {
        return "";
    }
    let inner = &descriptor[1..descriptor.len().saturating_sub(1)];
    match inner.rfind('/') {
        Some(pos) => &inner[..pos],
        None => "",
    }
}

/// Whether two class descriptors share a runtime package. Loader identity
/// is checked separately by callers; this compares names only.
pub fn same_package(a: &str, b: &str) -> bool {
    package_of(a) == package_of(b)
}

/// Human-readable form: `Ljava/lang/Object;` becomes `java.lang.Object`,
/// `[I` becomes `int[]`.
pub fn pretty_name(descriptor: &str) -> String {
    let dims = descriptor.len() - descriptor.trim_start_matches('[').len();
    let element = &descriptor[dims..];
    let mut name = if element.starts_with('L') && element.ends_with(';') {
        element[1..element.len() - 1].replace('/', ".")
    } else {
        match element
            .as_bytes()
            .first()
            .and_then(|&c| PrimitiveKind::from_descriptor_char(c))
        {
            Some(kind) => kind.name().to_string(),
            None => element.to_string(),
        }
    };
    for _ in 0..dims {
        name.push_str("[]");
    }
    name
}
