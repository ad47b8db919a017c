use crate::class_loader::ClassLoader;
use crate::config::VmConfig;
use crate::error::{JavaExceptionInfo, JvmError};
use crate::heap::{Heap, HeapHandle};
use crate::keys::{ClassId, MethodId, Symbol};
use crate::native::NativeRegistry;
use crate::rt::ClassDef;
use crate::value::Value;
use dashmap::DashMap;
use lasso::ThreadedRodeo;
use parking_lot::Mutex as PlMutex;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::RwLock;
use tracing_log::log::{debug, warn};
use walkdir::WalkDir;

/// The VM's owning struct (spec.md §2): the method area (class registry),
/// the heap, the native bridge, and everything the interpreter reaches for
/// through `&VirtualMachine` instead of threading a dozen separate
/// parameters through every handler.
pub struct VirtualMachine {
    interner: ThreadedRodeo,
    classes_by_name: DashMap<Symbol, ClassId>,
    class_defs: RwLock<Vec<Arc<ClassDef>>>,
    pub heap: Heap,
    pub natives: NativeRegistry,
    pub config: VmConfig,
    trace: PlMutex<Vec<String>>,
}

impl VirtualMachine {
    pub fn new(config: VmConfig) -> Self {
        Self {
            interner: ThreadedRodeo::new(),
            classes_by_name: DashMap::new(),
            class_defs: RwLock::new(Vec::new()),
            heap: Heap::new(),
            natives: NativeRegistry::new(),
            config,
            trace: PlMutex::new(Vec::new()),
        }
    }

    pub fn interner(&self) -> &ThreadedRodeo {
        &self.interner
    }

    pub fn intern(&self, s: &str) -> Symbol {
        self.interner.get_or_intern(s)
    }

    pub fn resolve(&self, sym: Symbol) -> &str {
        self.interner.resolve(&sym)
    }

    pub fn record_trace(&self, line: String) {
        self.trace.lock().push(line);
    }

    pub fn trace(&self) -> Vec<String> {
        self.trace.lock().clone()
    }

    pub fn get_class(&self, id: ClassId) -> Arc<ClassDef> {
        self.class_defs.read().unwrap()[id.0 as usize].clone()
    }

    fn insert_class(&self, name: Symbol, def: ClassDef) -> ClassId {
        let mut defs = self.class_defs.write().unwrap();
        let id = ClassId(defs.len() as u32);
        defs.push(Arc::new(def));
        self.classes_by_name.insert(name, id);
        id
    }

    /// Registers a hand-built [`ClassDef`] directly, bypassing `.class` file
    /// parsing entirely. Used by interpreter tests to exercise bytecode
    /// fixtures without round-tripping through the class loader.
    #[cfg(test)]
    pub fn define_class_for_test(&self, name: &str, def: ClassDef) -> ClassId {
        let sym = self.intern(name);
        self.insert_class(sym, def)
    }

    /// Loads (and caches) the class named `name` from the configured
    /// classpath directories (spec.md §6 "external collaborator: the class
    /// loader"). Recurses on the superclass first so `super_id` is always
    /// resolved before the subclass's v-table is built.
    pub fn load_class(&self, name: &str) -> Result<ClassId, JvmError> {
        let sym = self.intern(name);
        if let Some(id) = self.classes_by_name.get(&sym) {
            return Ok(*id);
        }

        let bytes = self.find_class_bytes(name).ok_or_else(|| JvmError::ClassNotFound(name.to_string()))?;
        self.define_class(name, &bytes)
    }

    fn find_class_bytes(&self, name: &str) -> Option<Vec<u8>> {
        let file_name = format!("{name}.class");
        for root in &self.config.classpath {
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                if entry.file_type().is_file() && entry.path().ends_with(&file_name) {
                    if let Ok(bytes) = fs::read(entry.path()) {
                        return Some(bytes);
                    }
                }
            }
        }
        None
    }

    /// Parses and links `bytes` under `name`, resolving (and loading, if
    /// necessary) its superclass first.
    ///
    /// A `java/lang/*` superclass that has no backing `.class` file on the
    /// classpath (`Exception`, `RuntimeException`, and friends — spec.md
    /// §4.2/§9: "the engine does not attempt to load the standard exception
    /// class") terminates the chain at a builtin stand-in rather than
    /// failing `ClassNotFound`; any other unresolvable superclass is a real
    /// linkage error and still propagates.
    pub fn define_class(&self, name: &str, bytes: &[u8]) -> Result<ClassId, JvmError> {
        let (_, super_name) = ClassLoader::peek_class_names(bytes)?;
        let (super_id, inherited_vtable) = match super_name {
            Some(super_name) if super_name != "java/lang/Object" => {
                let id = match self.load_class(&super_name) {
                    Ok(id) => id,
                    Err(JvmError::ClassNotFound(_)) if super_name.starts_with("java/lang/") => {
                        self.get_or_create_builtin_class(&super_name)
                    }
                    Err(other) => return Err(other),
                };
                (Some(id), self.get_class(id).vtable.clone())
            }
            _ => (None, Vec::new()),
        };

        let sym = self.intern(name);
        let next_id = ClassId(self.class_defs.read().unwrap().len() as u32);
        let loader = ClassLoader::new(&self.interner);
        let class_def = loader.parse(bytes, next_id, super_id, &inherited_vtable)?;
        debug!("linked class {name} as {next_id:?}, super = {super_id:?}");
        Ok(self.insert_class(sym, class_def))
    }

    /// A class that has no backing `.class` bytes: the handful of
    /// `java/lang/*Exception` classes the engine itself can raise (spec.md
    /// §7). Matching by fully-qualified name is all the exception engine
    /// ever needs (spec.md §9 "stops the walk at java/lang/Exception"), so
    /// these stand-ins never carry methods or fields.
    pub fn get_or_create_builtin_class(&self, name: &str) -> ClassId {
        let sym = self.intern(name);
        if let Some(id) = self.classes_by_name.get(&sym) {
            return *id;
        }
        // java/lang/String carries its characters under "value" (read by
        // read_java_string/new_string_object); java/lang/Class (an `ldc`
        // placeholder, see interpreter::new_class_placeholder) carries its
        // name under "name"; every other builtin is one of the engine's
        // raisable exception kinds and carries "message"
        // (materialize_exception). None has a `<clinit>` to run, so the
        // stand-in starts out already Initialized.
        let field_name = match name {
            "java/lang/String" => "value",
            "java/lang/Class" => "name",
            _ => "message",
        };
        let class_def = ClassDef {
            name: sym,
            const_pool: crate::rt::constant_pool::ConstantPool::new(Vec::new()),
            super_id: None,
            methods: Vec::new(),
            fields: vec![crate::rt::FieldInfo {
                access_flags: 0,
                name: self.intern(field_name),
            }],
            vtable: Vec::new(),
            static_fields: RwLock::new(Default::default()),
            monitor: PlMutex::new(()),
            init_state: PlMutex::new(crate::rt::ClassInitState::Initialized),
        };
        self.insert_class(sym, class_def)
    }

    /// Walks `subclass`'s super chain looking for `ancestor` by identity
    /// (spec.md §4.2, §9: the hierarchy walk used both for method
    /// resolution and for exception-type matching).
    pub fn is_subclass_of(&self, subclass: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(subclass);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get_class(id).super_id;
        }
        false
    }

    pub fn is_subclass_of_name(&self, subclass: ClassId, ancestor_name: &str) -> bool {
        let mut current = Some(subclass);
        while let Some(id) = current {
            if self.resolve(self.get_class(id).name) == ancestor_name {
                return true;
            }
            current = self.get_class(id).super_id;
        }
        false
    }

    /// Turns a heap-free [`JavaExceptionInfo`] into a real heap exception
    /// object the handler search can compare catch types against (spec.md
    /// §9 "exception unwinding without language exceptions"). The message,
    /// if any, becomes a real `java/lang/String` instance behind the
    /// synthetic class's `message` field.
    pub fn materialize_exception(&self, info: &JavaExceptionInfo) -> HeapHandle {
        let class_id = self.get_or_create_builtin_class(info.kind.class_name());
        let message_sym = self.intern("message");
        let handle = self.heap.new_object(class_id, [message_sym]);
        if let Some(msg) = &info.message {
            let message_handle = self.new_java_string(msg);
            if let Ok(entry) = self.heap.get(handle) {
                if let Ok(obj) = entry.as_object() {
                    obj.fields.write().insert(message_sym, Value::Ref(message_handle));
                }
            }
        }
        handle
    }

    /// Recovers the Rust string backing a `java/lang/String`-shaped
    /// instance created via [`crate::heap::Heap::new_string_object`] — the
    /// only string representation this engine's native bridge needs to
    /// read (SPEC_FULL.md §3).
    pub fn read_java_string(&self, handle: HeapHandle) -> Result<String, JvmError> {
        let entry = self.heap.get(handle)?;
        let obj = entry.as_object()?;
        let value_sym = self.intern("value");
        let chars_handle = match obj.fields.read().get(&value_sym) {
            Some(Value::Ref(h)) => *h,
            _ => return Err(JvmError::NoSuchFieldError("value".to_string())),
        };
        let chars_entry = self.heap.get(chars_handle)?;
        let array = chars_entry.as_array()?;
        let s: String = array
            .data
            .read()
            .iter()
            .map(|v| match v {
                Value::Int(c) => char::from_u32(*c as u32).unwrap_or('\u{FFFD}'),
                _ => '\u{FFFD}',
            })
            .collect();
        Ok(s)
    }

    pub fn new_java_string(&self, contents: &str) -> HeapHandle {
        let class_id = self.get_or_create_builtin_class("java/lang/String");
        let value_sym = self.intern("value");
        self.heap.new_string_object(contents, class_id, value_sym)
    }

    /// Method resolution (spec.md §4.2): `query_vtable = true` performs a
    /// dynamic dispatch lookup starting from the *runtime* class of the
    /// receiver (`invokevirtual`/`invokeinterface`); `query_vtable = false`
    /// walks straight up the declared-method chain, the binding used for
    /// `invokestatic`/`invokespecial`.
    pub fn resolve_method(
        &self,
        start_class: ClassId,
        name: Symbol,
        descriptor: Symbol,
        query_vtable: bool,
    ) -> Result<MethodId, JvmError> {
        if query_vtable {
            if let Some(method) = self.get_class(start_class).find_vtable_entry(name, descriptor) {
                return Ok(method);
            }
        }
        let mut current = Some(start_class);
        while let Some(id) = current {
            let class = self.get_class(id);
            if let Some(index) = class.find_declared_method(name, descriptor) {
                return Ok(MethodId { class: id, index });
            }
            current = class.super_id;
        }
        let class = self.get_class(start_class);
        warn!(
            "method resolution failed: {}.{}{}",
            self.resolve(class.name),
            self.resolve(name),
            self.resolve(descriptor)
        );
        Err(JvmError::MethodNotFound {
            class: self.resolve(class.name).to_string(),
            name: self.resolve(name).to_string(),
            descriptor: self.resolve(descriptor).to_string(),
        })
    }
}
