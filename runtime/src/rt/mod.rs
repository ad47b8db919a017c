use crate::keys::{ClassId, MethodId, Symbol};
use crate::rt::constant_pool::ConstantPool;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::RwLock;

pub mod constant_pool;
pub mod method;

pub use method::{CodeAttr, ExceptionTableEntry, MethodInfo};

pub const ACC_STATIC: u16 = method::ACC_STATIC;

#[derive(Debug, Clone, Copy)]
pub struct FieldInfo {
    pub access_flags: u16,
    pub name: Symbol,
}

impl FieldInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

/// A resolved entry of a class's v-table: the method a dynamic dispatch on
/// `(name, descriptor)` actually lands on for this class or any subclass
/// that doesn't override it (spec.md §4.2 "Virtual dispatch via the
/// v-table").
#[derive(Debug, Clone, Copy)]
pub struct VTableEntry {
    pub name: Symbol,
    pub descriptor: Symbol,
    pub method: MethodId,
}

/// Tri-state class-initialization tracker (SPEC_FULL.md §3 supplement,
/// JVM spec §5.5): `<clinit>` runs at most once, the first time the class is
/// actively used (`getstatic`/`putstatic`/`invokestatic`/`new`). A plain
/// bool would race two threads into running `<clinit>` twice; a class
/// caught mid-initialization by a cyclic reference reports itself
/// `Initializing` rather than recursing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassInitState {
    Uninitialized,
    Initializing,
    Initialized,
}

/// A loaded class (spec.md §3 `ClassDef`). Class-file parsing and linking
/// are out of scope (spec.md §1 Non-goals) — by the time a `ClassDef`
/// exists it is already fully resolved: `super_id` is a real `ClassId`,
/// `vtable` is precomputed, and every constant pool entry is a [`Symbol`]
/// rather than a raw index into class-file bytes.
pub struct ClassDef {
    pub name: Symbol,
    pub const_pool: ConstantPool,
    pub super_id: Option<ClassId>,
    pub methods: Vec<MethodInfo>,
    pub fields: Vec<FieldInfo>,
    pub vtable: Vec<VTableEntry>,
    pub static_fields: RwLock<HashMap<Symbol, Value>>,
    pub monitor: Mutex<()>,
    pub init_state: Mutex<ClassInitState>,
}

impl ClassDef {
    /// Marks the class `Initializing` and returns whether the caller is the
    /// one that should actually run `<clinit>` — `false` means another
    /// invocation already owns that (or it is already done).
    pub fn begin_initializing(&self) -> bool {
        let mut state = self.init_state.lock();
        if *state == ClassInitState::Uninitialized {
            *state = ClassInitState::Initializing;
            true
        } else {
            false
        }
    }

    pub fn mark_initialized(&self) {
        *self.init_state.lock() = ClassInitState::Initialized;
    }

    pub fn is_initialized(&self) -> bool {
        *self.init_state.lock() == ClassInitState::Initialized
    }

    pub fn find_declared_method(&self, name: Symbol, descriptor: Symbol) -> Option<u16> {
        self.methods
            .iter()
            .position(|m| m.name == name && m.descriptor == descriptor)
            .map(|idx| idx as u16)
    }

    pub fn find_vtable_entry(&self, name: Symbol, descriptor: Symbol) -> Option<MethodId> {
        self.vtable
            .iter()
            .find(|entry| entry.name == name && entry.descriptor == descriptor)
            .map(|entry| entry.method)
    }

    pub fn get_static(&self, name: Symbol) -> Option<Value> {
        self.static_fields.read().unwrap().get(&name).copied()
    }

    pub fn set_static(&self, name: Symbol, value: Value) {
        self.static_fields.write().unwrap().insert(name, value);
    }

    pub fn declares_field(&self, name: Symbol) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}
