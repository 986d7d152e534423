//! Class loading and linking for a dex-based managed runtime: unit
//! registration, symbol resolution through per-unit caches, field
//! layout, dispatch table construction, and the class lifecycle from
//! definition through initialization.

pub mod class;
pub mod class_table;
#[cfg(test)]
mod class_table_tests;
pub mod descriptor;
pub mod dex;
pub mod dex_cache;
pub mod error;
pub mod flags;
pub mod heap;
pub mod intern;
pub mod layout;
pub mod linker;
#[cfg(test)]
mod linker_tests;
pub mod sync;
pub mod verifier;
mod vtable;

pub use class::{ClassRef, ClassStatus, FieldRef, InvokeKind, LoaderId, MethodRef};
pub use error::{LinkError, Result, Throwable, ThrowableKind};
pub use linker::{Linker, LinkerOptions, RootVisitKind, VerifyMode};
