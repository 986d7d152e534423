use bitflags::bitflags;

bitflags! {
    /// Access and property modifiers carried by classes, fields, and
    /// methods in a compiled unit. The numeric values match the container
    /// encoding, so raw flag words from a unit round-trip unchanged.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const TRANSIENT = 0x0080;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const SYNTHETIC = 0x1000;
        const ENUM = 0x4000;
        const CONSTRUCTOR = 0x1_0000;
    }
}

impl AccessFlags {
    pub fn is_public(self) -> bool {
        self.contains(AccessFlags::PUBLIC)
    }

    pub fn is_private(self) -> bool {
        self.contains(AccessFlags::PRIVATE)
    }

    pub fn is_protected(self) -> bool {
        self.contains(AccessFlags::PROTECTED)
    }

    /// Neither public, private, nor protected: visible only inside the
    /// declaring package.
    pub fn is_package_private(self) -> bool {
        !self.intersects(AccessFlags::PUBLIC | AccessFlags::PRIVATE | AccessFlags::PROTECTED)
    }

    pub fn is_static(self) -> bool {
        self.contains(AccessFlags::STATIC)
    }

    pub fn is_final(self) -> bool {
        self.contains(AccessFlags::FINAL)
    }

    pub fn is_interface(self) -> bool {
        self.contains(AccessFlags::INTERFACE)
    }

    pub fn is_abstract(self) -> bool {
        self.contains(AccessFlags::ABSTRACT)
    }

    pub fn is_constructor(self) -> bool {
        self.contains(AccessFlags::CONSTRUCTOR)
    }
}

#[cfg(test)]
mod tests {
    use super::AccessFlags;

    #[test]
    fn test_package_private_detection() {
        assert!(AccessFlags::FINAL.is_package_private());
        assert!(AccessFlags::empty().is_package_private());
        assert!(!(AccessFlags::PUBLIC | AccessFlags::FINAL).is_package_private());
        assert!(!AccessFlags::PROTECTED.is_package_private());
    }

    #[test]
    fn test_raw_round_trip() {
        let raw = 0x0001 | 0x0010 | 0x0400;
        let flags = AccessFlags::from_bits_truncate(raw);
        assert!(flags.is_public());
        assert!(flags.is_final());
        assert!(flags.is_abstract());
        assert_eq!(flags.bits(), raw);
    }
}
