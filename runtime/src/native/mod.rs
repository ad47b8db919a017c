use crate::error::JvmError;
use crate::value::Value;
use crate::vm::VirtualMachine;
use std::collections::HashMap;

pub mod preregistered;

/// A native method implementation (spec.md §4.3 step 7, §6). The argument
/// vector follows the convention spec.md §9's Open Question settles on: for
/// an instance method `args[0]` is the receiver and `args[1..]` are the
/// declared parameters, exactly mirroring how a Java frame's locals are
/// laid out — the native bridge does not special-case the receiver out of
/// the vector.
pub type NativeFn = fn(vm: &VirtualMachine, args: &[Value]) -> Result<Option<Value>, JvmError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NativeKey {
    class: String,
    name: String,
    descriptor: String,
}

/// The native bridge's lookup table (spec.md §4.3, §6 "external
/// collaborator: native method registry"). Populated once at startup from
/// [`preregistered`]; resolution is plain string lookup since native
/// methods never need virtual dispatch.
#[derive(Default)]
pub struct NativeRegistry {
    entries: HashMap<NativeKey, NativeFn>,
}

impl NativeRegistry {
    pub fn new() -> Self {
        let mut registry = Self::default();
        preregistered::register_all(&mut registry);
        registry
    }

    pub fn register(&mut self, class: &str, name: &str, descriptor: &str, f: NativeFn) {
        self.entries.insert(
            NativeKey {
                class: class.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            },
            f,
        );
    }

    pub fn find(&self, class: &str, name: &str, descriptor: &str) -> Option<NativeFn> {
        self.entries
            .get(&NativeKey {
                class: class.to_string(),
                name: name.to_string(),
                descriptor: descriptor.to_string(),
            })
            .copied()
    }
}
