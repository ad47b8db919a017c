use lasso::Spur;

/// Interned string handle. Every class/method/field name and every UTF-8
/// constant-pool entry is interned once through [`crate::vm::VirtualMachine::interner`]
/// so that name comparisons used by the resolver and the exception engine
/// (spec.md §4.2, §4.5) are pointer/integer comparisons rather than string
/// comparisons.
pub type Symbol = Spur;

/// Index of a loaded [`crate::rt::ClassDef`] inside the method area. Classes
/// are never unloaded, so a `ClassId` is valid for the lifetime of the VM
/// once obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

/// Identifies a method as (the class that declares it, its index within that
/// class's `methods` vector). Carrying the owning class alongside the index
/// means a `MethodId` is self-sufficient: the invocation prologue never needs
/// a separate lookup to find which `ClassDef` owns a resolved method (spec.md
/// §4.2 "Returns the MethodInfo and its actual owning ClassDef").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub class: ClassId,
    pub index: u16,
}

/// Fields are keyed by simple name only — spec.md §3 notes no per-class
/// namespacing is needed at the interpreter level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldKey {
    pub name: Symbol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodKey {
    pub name: Symbol,
    pub descriptor: Symbol,
}
