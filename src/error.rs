use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LinkError>;

/// Severity of an exception escaping a static initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrowableKind {
    /// Unrecoverable error types; surfaced as-is without wrapping.
    Error,
    /// Everything else; wrapped in the initializer-error shape.
    Exception,
}

/// An exception value produced by managed code, as seen at the linking
/// boundary. The linker never inspects anything beyond the descriptor,
/// message, and severity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Throwable {
    pub descriptor: String,
    pub message: String,
    pub kind: ThrowableKind,
}

impl Throwable {
    pub fn exception(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            message: message.into(),
            kind: ThrowableKind::Exception,
        }
    }

    pub fn error(descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            message: message.into(),
            kind: ThrowableKind::Error,
        }
    }
}

impl fmt::Display for Throwable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.descriptor)
        } else {
            write!(f, "{}: {}", self.descriptor, self.message)
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinkError {
    #[error("class not found: {0}")]
    ClassNotFound(Arc<str>),

    #[error("circular dependency while resolving {0}")]
    ClassCircularity(Arc<str>),

    #[error("incompatible class change: {0}")]
    IncompatibleClassChange(String),

    #[error("linkage failed: {0}")]
    Linkage(String),

    #[error("malformed class: {0}")]
    ClassFormat(String),

    #[error("verification of {descriptor} failed: {reason}")]
    VerifyFailure {
        descriptor: Arc<str>,
        reason: String,
        /// Soft failures are retried with full type information at runtime
        /// and never mark the class erroneous.
        soft: bool,
    },

    #[error("illegal access: {0}")]
    IllegalAccess(String),

    #[error("no method {0}")]
    NoSuchMethod(String),

    #[error("no field {0}")]
    NoSuchField(String),

    #[error("allocation of {0} bytes failed")]
    OutOfMemory(usize),

    #[error("static initializer of {descriptor} raised {cause}")]
    Initializer { descriptor: Arc<str>, cause: Throwable },

    #[error("unhandled {0}")]
    Throw(Throwable),

    #[error("no class definition for {0} due to an earlier failure")]
    NoClassDefFound(Arc<str>),
}

impl LinkError {
    /// Shape an exception that escaped `descriptor`'s static initializer.
    /// Error-kind throwables propagate unwrapped.
    pub fn from_initializer(descriptor: Arc<str>, cause: Throwable) -> Self {
        match cause.kind {
            ThrowableKind::Error => LinkError::Throw(cause),
            ThrowableKind::Exception => LinkError::Initializer { descriptor, cause },
        }
    }

    pub fn is_soft_verify_failure(&self) -> bool {
        matches!(self, LinkError::VerifyFailure { soft: true, .. })
    }
}
