use crate::error::JvmError;
use crate::keys::Symbol;

/// A single already-resolved constant-pool entry (spec.md §3, §4.2). Names
/// and UTF-8 literals are interned to [`Symbol`]s by the class loader at
/// load time, so the accessor never needs to re-resolve a string once the
/// `ClassDef` exists — only the *kind* of entry is checked here.
#[derive(Debug, Clone)]
pub enum Const {
    Utf8(Symbol),
    Integer(i32),
    ClassInfo { name: Symbol },
    StringInfo { value: Symbol },
    NameAndType { name: Symbol, descriptor: Symbol },
    FieldRef {
        class: Symbol,
        name: Symbol,
        descriptor: Symbol,
    },
    MethodRef {
        class: Symbol,
        name: Symbol,
        descriptor: Symbol,
    },
    InterfaceMethodRef {
        class: Symbol,
        name: Symbol,
        descriptor: Symbol,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct FieldRefView {
    pub class: Symbol,
    pub name: Symbol,
    pub descriptor: Symbol,
}

#[derive(Debug, Clone, Copy)]
pub struct MethodRefView {
    pub class: Symbol,
    pub name: Symbol,
    pub descriptor: Symbol,
}

/// Per-class indexed table of literals, names, and references (spec.md
/// GLOSSARY). Index 0 is the reserved sentinel ("no super" / "catch-any")
/// and is never a valid lookup target, matching spec.md §6: "the engine
/// requires the constant pool to be indexable starting at 1".
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Option<Const>>,
}

impl ConstantPool {
    pub fn new(entries: Vec<Option<Const>>) -> Self {
        Self { entries }
    }

    fn get(&self, index: u16) -> Result<&Const, JvmError> {
        if index == 0 {
            return Err(JvmError::LinkageError(
                "constant pool index 0 is the reserved sentinel".to_string(),
            ));
        }
        self.entries
            .get(index as usize)
            .and_then(|slot| slot.as_ref())
            .ok_or_else(|| JvmError::LinkageError(format!("constant pool entry {index} missing")))
    }

    pub fn utf8(&self, index: u16) -> Result<Symbol, JvmError> {
        match self.get(index)? {
            Const::Utf8(sym) => Ok(*sym),
            other => Err(kind_mismatch(index, "Utf8", other)),
        }
    }

    pub fn integer(&self, index: u16) -> Result<i32, JvmError> {
        match self.get(index)? {
            Const::Integer(v) => Ok(*v),
            other => Err(kind_mismatch(index, "Integer", other)),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<Symbol, JvmError> {
        match self.get(index)? {
            Const::ClassInfo { name } => Ok(*name),
            other => Err(kind_mismatch(index, "Class", other)),
        }
    }

    pub fn string(&self, index: u16) -> Result<Symbol, JvmError> {
        match self.get(index)? {
            Const::StringInfo { value } => Ok(*value),
            other => Err(kind_mismatch(index, "String", other)),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(Symbol, Symbol), JvmError> {
        match self.get(index)? {
            Const::NameAndType { name, descriptor } => Ok((*name, *descriptor)),
            other => Err(kind_mismatch(index, "NameAndType", other)),
        }
    }

    pub fn field_ref(&self, index: u16) -> Result<FieldRefView, JvmError> {
        match self.get(index)? {
            Const::FieldRef {
                class,
                name,
                descriptor,
            } => Ok(FieldRefView {
                class: *class,
                name: *name,
                descriptor: *descriptor,
            }),
            other => Err(kind_mismatch(index, "Fieldref", other)),
        }
    }

    pub fn method_ref(&self, index: u16) -> Result<MethodRefView, JvmError> {
        match self.get(index)? {
            Const::MethodRef {
                class,
                name,
                descriptor,
            } => Ok(MethodRefView {
                class: *class,
                name: *name,
                descriptor: *descriptor,
            }),
            other => Err(kind_mismatch(index, "Methodref", other)),
        }
    }

    pub fn interface_method_ref(&self, index: u16) -> Result<MethodRefView, JvmError> {
        match self.get(index)? {
            Const::InterfaceMethodRef {
                class,
                name,
                descriptor,
            } => Ok(MethodRefView {
                class: *class,
                name: *name,
                descriptor: *descriptor,
            }),
            other => Err(kind_mismatch(index, "InterfaceMethodref", other)),
        }
    }
}

fn kind_mismatch(index: u16, expected: &'static str, actual: &Const) -> JvmError {
    JvmError::LinkageError(format!(
        "constant pool entry {index}: expected {expected}, found {actual:?}"
    ))
}
