use crate::error::JvmError;
use crate::keys::{ClassId, Symbol};
use crate::throw_exception;
use crate::value::Value;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Index into the heap's entry table. Handles are never reused: the engine
/// never frees an object (spec.md §5 "no GC"), so a handle obtained once
/// stays valid for the lifetime of the VM.
pub type HeapHandle = u32;

/// A class instance: a name-keyed field bag plus the monitor `monitorenter`/
/// `monitorexit` and `synchronized` methods acquire (spec.md §3, §5).
pub struct HeapObject {
    pub class: ClassId,
    pub fields: RwLock<HashMap<Symbol, Value>>,
    pub monitor: Mutex<()>,
}

/// `element_kind` is 0 for a reference array, otherwise the `newarray`
/// primitive-type code (spec.md §4.6 "array creation"); the interpreter
/// never reads more than an array's element count and its backing `Vec`, so
/// a single homogeneous `Value` vector covers both reference and primitive
/// element arrays.
pub struct ArrayObject {
    pub element_kind: u8,
    pub data: RwLock<Vec<Value>>,
    pub monitor: Mutex<()>,
}

pub enum HeapEntry {
    Object(HeapObject),
    Array(ArrayObject),
}

impl HeapEntry {
    pub fn monitor(&self) -> &Mutex<()> {
        match self {
            HeapEntry::Object(obj) => &obj.monitor,
            HeapEntry::Array(arr) => &arr.monitor,
        }
    }

    pub fn as_object(&self) -> Result<&HeapObject, JvmError> {
        match self {
            HeapEntry::Object(obj) => Ok(obj),
            HeapEntry::Array(_) => Err(JvmError::WrongOperandType("object")),
        }
    }

    pub fn as_array(&self) -> Result<&ArrayObject, JvmError> {
        match self {
            HeapEntry::Array(arr) => Ok(arr),
            HeapEntry::Object(_) => Err(JvmError::WrongOperandType("array")),
        }
    }
}

/// The engine's heap (spec.md §3 `HeapObject`/`ArrayObject`, §5 "no
/// relocation, no GC"). A flat, append-only `Vec<Arc<HeapEntry>>` behind a
/// single `RwLock` stands in for the teacher's raw `mmap` arena: object
/// layout and class-file parsing are out of scope here (spec.md §1
/// Non-goals), so there is no header/alignment bookkeeping to do by hand.
pub struct Heap {
    entries: RwLock<Vec<Arc<HeapEntry>>>,
    string_pool: Mutex<HashMap<String, HeapHandle>>,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            string_pool: Mutex::new(HashMap::new()),
        }
    }

    fn push(&self, entry: HeapEntry) -> HeapHandle {
        let mut entries = self.entries.write();
        let handle = entries.len() as HeapHandle;
        entries.push(Arc::new(entry));
        handle
    }

    pub fn new_object(
        &self,
        class: ClassId,
        field_names: impl IntoIterator<Item = Symbol>,
    ) -> HeapHandle {
        let fields = field_names.into_iter().map(|name| (name, Value::Null)).collect();
        self.push(HeapEntry::Object(HeapObject {
            class,
            fields: RwLock::new(fields),
            monitor: Mutex::new(()),
        }))
    }

    pub fn new_array(&self, element_kind: u8, length: i32) -> Result<HeapHandle, JvmError> {
        if length < 0 {
            throw_exception!(NegativeArraySizeException, length);
        }
        let default = if element_kind == 0 { Value::Null } else { Value::Int(0) };
        let data = vec![default; length as usize];
        Ok(self.push(HeapEntry::Array(ArrayObject {
            element_kind,
            data: RwLock::new(data),
            monitor: Mutex::new(()),
        })))
    }

    pub fn new_object_array(&self, length: i32) -> Result<HeapHandle, JvmError> {
        self.new_array(0, length)
    }

    /// Interns Java string literals so `ldc` of the same UTF-8 constant
    /// across two classes yields the same heap handle (spec.md §3 "string
    /// identity for literals"). `value_field` is the name the native
    /// `String` surface (SPEC_FULL.md §3) reads to recover the backing
    /// characters.
    pub fn new_string_object(
        &self,
        contents: &str,
        string_class: ClassId,
        value_field: Symbol,
    ) -> HeapHandle {
        if let Some(handle) = self.string_pool.lock().get(contents) {
            return *handle;
        }
        let chars: Vec<Value> = contents.chars().map(|c| Value::Int(c as i32)).collect();
        let char_array = self.push(HeapEntry::Array(ArrayObject {
            element_kind: b'C',
            data: RwLock::new(chars),
            monitor: Mutex::new(()),
        }));
        let handle = self.new_object(string_class, [value_field]);
        if let HeapEntry::Object(obj) = &*self.get(handle).expect("just created") {
            obj.fields.write().insert(value_field, Value::Ref(char_array));
        }
        self.string_pool.lock().insert(contents.to_string(), handle);
        handle
    }

    pub fn get(&self, handle: HeapHandle) -> Result<Arc<HeapEntry>, JvmError> {
        self.entries
            .read()
            .get(handle as usize)
            .cloned()
            .ok_or_else(|| JvmError::LinkageError(format!("dangling heap handle {handle}")))
    }

    pub fn get_class_id(&self, handle: HeapHandle) -> Result<Option<ClassId>, JvmError> {
        match &*self.get(handle)? {
            HeapEntry::Object(obj) => Ok(Some(obj.class)),
            HeapEntry::Array(_) => Ok(None),
        }
    }
}
