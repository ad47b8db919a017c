use crate::heap::HeapHandle;
use crate::keys::MethodKey;
use std::fmt::Display;

/// Error taxonomy for the engine (spec.md §7).
///
/// `JavaException` and `JavaExceptionThrown` are not "real" errors: together
/// they carry an in-progress stack unwind through the `Result` plumbing of
/// every invocation site (spec.md §4.5, §9 "Exception unwinding without
/// language exceptions"). The split exists because raising an exception
/// (`throw_exception!`, a null dereference deep inside `Value::as_ref_nonnull`)
/// happens in places that have no heap access, while the handler-search loop
/// needs an actual heap object to hand the catch block. `JavaException` is
/// the heap-free description; [`crate::vm::VirtualMachine::materialize_exception`]
/// turns it into a `JavaExceptionThrown(HeapHandle)` the first time it is
/// inspected.
#[derive(Debug)]
pub enum JvmError {
    MethodNotFound {
        class: String,
        name: String,
        descriptor: String,
    },
    ClassNotFound(String),
    UnsupportedOpcode(u8),
    UnsupportedDescriptor(String),
    UnsupportedNativeMethod {
        class: String,
        name: String,
        descriptor: String,
    },
    BadDecode(String),
    NoSuchFieldError(String),
    FrameStackIsEmpty,
    OperandStackIsEmpty,
    LocalVariableNotFound(usize),
    WrongOperandType(&'static str),
    LinkageError(String),
    JavaException(JavaExceptionInfo),
    JavaExceptionThrown(HeapHandle),
}

impl Display for JvmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JvmError::MethodNotFound {
                class,
                name,
                descriptor,
            } => write!(f, "method not found: {class}.{name}{descriptor}"),
            JvmError::ClassNotFound(name) => write!(f, "class not found: {name}"),
            JvmError::UnsupportedOpcode(op) => write!(f, "unsupported opcode: 0x{op:02x}"),
            JvmError::UnsupportedDescriptor(d) => write!(f, "unsupported descriptor: {d}"),
            JvmError::UnsupportedNativeMethod {
                class,
                name,
                descriptor,
            } => write!(f, "unsatisfied native link: {class}.{name}{descriptor}"),
            JvmError::BadDecode(msg) => write!(f, "malformed bytecode immediate: {msg}"),
            JvmError::NoSuchFieldError(name) => write!(f, "no such field: {name}"),
            JvmError::FrameStackIsEmpty => write!(f, "frame stack is empty"),
            JvmError::OperandStackIsEmpty => write!(f, "operand stack is empty"),
            JvmError::LocalVariableNotFound(idx) => write!(f, "local variable {idx} not found"),
            JvmError::WrongOperandType(expected) => {
                write!(f, "expected operand of kind {expected}")
            }
            JvmError::LinkageError(msg) => write!(f, "linkage error: {msg}"),
            JvmError::JavaException(info) => write!(f, "{}", info.kind.class_name()),
            JvmError::JavaExceptionThrown(handle) => {
                write!(f, "uncaught exception, heap ref {handle}")
            }
        }
    }
}

impl std::error::Error for JvmError {}

impl From<MethodKey> for JvmError {
    fn from(_: MethodKey) -> Self {
        JvmError::LinkageError("invalid method key".to_string())
    }
}

/// Named exception kinds the engine itself is able to raise (spec.md §7).
/// These are the ones the interpreter throws directly — `NullPointerException`
/// on a null dereference, `ArrayIndexOutOfBoundsException` on a bad array
/// access, and so on — via [`crate::throw_exception`]. User `athrow` of a
/// program-defined class never goes through this enum: the thrown object is
/// already on the heap, so it is wrapped straight into
/// `JvmError::JavaExceptionThrown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JavaExceptionKind {
    NullPointerException,
    ArrayIndexOutOfBoundsException,
    NegativeArraySizeException,
    ArithmeticException,
    ClassCastException,
    ArrayStoreException,
}

impl JavaExceptionKind {
    pub const fn class_name(self) -> &'static str {
        match self {
            Self::NullPointerException => "java/lang/NullPointerException",
            Self::ArrayIndexOutOfBoundsException => "java/lang/ArrayIndexOutOfBoundsException",
            Self::NegativeArraySizeException => "java/lang/NegativeArraySizeException",
            Self::ArithmeticException => "java/lang/ArithmeticException",
            Self::ClassCastException => "java/lang/ClassCastException",
            Self::ArrayStoreException => "java/lang/ArrayStoreException",
        }
    }
}

#[derive(Debug, Clone)]
pub struct JavaExceptionInfo {
    pub kind: JavaExceptionKind,
    pub message: Option<String>,
}

/// Builds a [`JvmError::JavaException`] without needing heap or VM access,
/// so it can be raised from deep inside pure accessors like
/// `Value::as_ref_nonnull`. See [`crate::throw_exception`] for the `return
/// Err(...)` shorthand used at call sites.
#[macro_export]
macro_rules! build_exception {
    ($kind:ident) => {
        $crate::error::JvmError::JavaException($crate::error::JavaExceptionInfo {
            kind: $crate::error::JavaExceptionKind::$kind,
            message: None,
        })
    };
    ($kind:ident, $msg:expr) => {
        $crate::error::JvmError::JavaException($crate::error::JavaExceptionInfo {
            kind: $crate::error::JavaExceptionKind::$kind,
            message: Some($msg.to_string()),
        })
    };
}

#[macro_export]
macro_rules! throw_exception {
    ($kind:ident) => {
        return Err($crate::build_exception!($kind))
    };
    ($kind:ident, $msg:expr) => {
        return Err($crate::build_exception!($kind, $msg))
    };
}
