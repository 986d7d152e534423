//! Bytecode verification seam.
//!
//! The linker drives verification through the [`Verifier`] trait so the
//! full dataflow verifier can live elsewhere; the built-in implementation
//! checks only structural access-flag rules.

use crate::class::ClassRef;
use crate::flags::AccessFlags;

/// Verdict for one class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Ok,
    /// Could not be proven safe now, may succeed with more of the world
    /// loaded. The class stays usable and re-verifies at runtime.
    SoftFail(String),
    /// Provably malformed.
    HardFail(String),
}

impl VerifyOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, VerifyOutcome::Ok)
    }
}

pub trait Verifier: Send + Sync {
    fn verify(&self, class: ClassRef) -> VerifyOutcome;
}

/// Structural checks on class and method access flags.
#[derive(Debug, Default)]
pub struct AccessFlagVerifier;

impl Verifier for AccessFlagVerifier {
    fn verify(&self, class: ClassRef) -> VerifyOutcome {
        let flags = class.access_flags();
        if flags.is_final() && flags.is_abstract() {
            return VerifyOutcome::HardFail(format!(
                "{} is both final and abstract",
                class.descriptor()
            ));
        }
        if flags.is_interface() && !flags.is_abstract() {
            return VerifyOutcome::HardFail(format!(
                "interface {} is not abstract",
                class.descriptor()
            ));
        }
        for method in class
            .direct_methods()
            .iter()
            .copied()
            .chain(class.virtual_methods().iter().copied())
        {
            let mf = method.access_flags();
            if mf.is_abstract()
                && mf.intersects(
                    AccessFlags::PRIVATE
                        | AccessFlags::STATIC
                        | AccessFlags::FINAL
                        | AccessFlags::CONSTRUCTOR,
                )
            {
                return VerifyOutcome::HardFail(format!(
                    "abstract method {}.{} has conflicting flags",
                    class.descriptor(),
                    method.name()
                ));
            }
        }
        VerifyOutcome::Ok
    }
}
