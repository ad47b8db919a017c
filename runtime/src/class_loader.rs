use crate::error::JvmError;
use crate::keys::{ClassId, Symbol};
use crate::rt::constant_pool::{Const, ConstantPool};
use crate::rt::method::{ACC_NATIVE, CodeAttr, ExceptionTableEntry, MethodInfo};
use crate::rt::{ClassDef, FieldInfo, VTableEntry};
use byteorder::{BigEndian, ReadBytesExt};
use lasso::ThreadedRodeo;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Cursor, Read};
use std::sync::RwLock;

const CLASS_MAGIC: u32 = 0xCAFEBABE;

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;

/// Intermediate, not-yet-interned constant pool entry: class-file indices
/// are only resolvable once the whole pool has been read, so a first pass
/// keeps raw u16 indices and a second pass (`resolve`) turns them into
/// `Symbol`s and fully-qualified `Const` variants.
enum RawConst {
    Utf8(String),
    Integer(i32),
    ClassInfo { name_index: u16 },
    StringInfo { utf8_index: u16 },
    NameAndType { name_index: u16, descriptor_index: u16 },
    FieldRef { class_index: u16, name_and_type_index: u16 },
    MethodRef { class_index: u16, name_and_type_index: u16 },
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    /// Long/Float/Double/MethodHandle/MethodType/InvokeDynamic entries are
    /// accepted (so the pool's index numbering stays correct — some tags
    /// occupy two slots) but never resolved: accurate wide-primitive
    /// modeling and `invokedynamic` are explicit Non-goals (spec.md §1).
    Unsupported,
    WidePlaceholder,
}

/// The external collaborator spec.md §6 calls out as out of scope: turns
/// raw `.class` bytes into an already-linked [`ClassDef`]. Superclass
/// resolution, v-table construction, and interning are the only "linking"
/// this loader performs — full verification, access checking, and constant
/// pool validation are not attempted.
pub struct ClassLoader<'a> {
    interner: &'a ThreadedRodeo,
}

impl<'a> ClassLoader<'a> {
    pub fn new(interner: &'a ThreadedRodeo) -> Self {
        Self { interner }
    }

    fn read_raw_pool(cursor: &mut Cursor<&[u8]>, count: u16) -> Result<Vec<Option<RawConst>>, JvmError> {
        let mut pool: Vec<Option<RawConst>> = Vec::with_capacity(count as usize);
        pool.push(None); // index 0 sentinel
        let mut index = 1u16;
        while index < count {
            let tag = cursor
                .read_u8()
                .map_err(|e| JvmError::BadDecode(format!("constant pool tag: {e}")))?;
            let entry = match tag {
                TAG_UTF8 => {
                    let len = cursor
                        .read_u16::<BigEndian>()
                        .map_err(|e| JvmError::BadDecode(format!("utf8 length: {e}")))?;
                    let mut buf = vec![0u8; len as usize];
                    cursor
                        .read_exact(&mut buf)
                        .map_err(|e| JvmError::BadDecode(format!("utf8 bytes: {e}")))?;
                    let s = String::from_utf8(buf)
                        .map_err(|e| JvmError::BadDecode(format!("invalid utf8: {e}")))?;
                    RawConst::Utf8(s)
                }
                TAG_INTEGER => {
                    let v = cursor
                        .read_i32::<BigEndian>()
                        .map_err(|e| JvmError::BadDecode(format!("integer: {e}")))?;
                    RawConst::Integer(v)
                }
                TAG_FLOAT => {
                    cursor
                        .read_u32::<BigEndian>()
                        .map_err(|e| JvmError::BadDecode(format!("float: {e}")))?;
                    RawConst::Unsupported
                }
                TAG_LONG | TAG_DOUBLE => {
                    cursor
                        .read_u64::<BigEndian>()
                        .map_err(|e| JvmError::BadDecode(format!("wide constant: {e}")))?;
                    pool.push(Some(RawConst::Unsupported));
                    index += 1;
                    RawConst::WidePlaceholder
                }
                TAG_CLASS => {
                    let name_index = cursor
                        .read_u16::<BigEndian>()
                        .map_err(|e| JvmError::BadDecode(format!("class name index: {e}")))?;
                    RawConst::ClassInfo { name_index }
                }
                TAG_STRING => {
                    let utf8_index = cursor
                        .read_u16::<BigEndian>()
                        .map_err(|e| JvmError::BadDecode(format!("string index: {e}")))?;
                    RawConst::StringInfo { utf8_index }
                }
                TAG_FIELDREF => {
                    let class_index = cursor.read_u16::<BigEndian>().unwrap();
                    let name_and_type_index = cursor.read_u16::<BigEndian>().unwrap();
                    RawConst::FieldRef {
                        class_index,
                        name_and_type_index,
                    }
                }
                TAG_METHODREF => {
                    let class_index = cursor.read_u16::<BigEndian>().unwrap();
                    let name_and_type_index = cursor.read_u16::<BigEndian>().unwrap();
                    RawConst::MethodRef {
                        class_index,
                        name_and_type_index,
                    }
                }
                TAG_INTERFACE_METHODREF => {
                    let class_index = cursor.read_u16::<BigEndian>().unwrap();
                    let name_and_type_index = cursor.read_u16::<BigEndian>().unwrap();
                    RawConst::InterfaceMethodRef {
                        class_index,
                        name_and_type_index,
                    }
                }
                TAG_NAME_AND_TYPE => {
                    let name_index = cursor.read_u16::<BigEndian>().unwrap();
                    let descriptor_index = cursor.read_u16::<BigEndian>().unwrap();
                    RawConst::NameAndType {
                        name_index,
                        descriptor_index,
                    }
                }
                // MethodHandle(15)/MethodType(16)/Dynamic(17)/InvokeDynamic(18)/
                // Module(19)/Package(20): not needed by this engine's opcode
                // subset, skipped structurally.
                15 => {
                    cursor.read_u8().unwrap();
                    cursor.read_u16::<BigEndian>().unwrap();
                    RawConst::Unsupported
                }
                16 | 17 | 18 | 19 | 20 => {
                    cursor.read_u16::<BigEndian>().unwrap();
                    cursor.read_u16::<BigEndian>().unwrap();
                    RawConst::Unsupported
                }
                other => return Err(JvmError::BadDecode(format!("unknown constant pool tag {other}"))),
            };
            pool.push(Some(entry));
            index += 1;
        }
        Ok(pool)
    }

    fn intern_str(&self, s: &str) -> Symbol {
        self.interner.get_or_intern(s)
    }

    /// Reads just the header far enough to learn a class's own name and its
    /// superclass's name, without resolving the rest of the pool or
    /// building a [`ClassDef`] — used by [`crate::vm::VirtualMachine::define_class`]
    /// to load the superclass first.
    pub fn peek_class_names(bytes: &[u8]) -> Result<(String, Option<String>), JvmError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("magic: {e}")))?;
        if magic != CLASS_MAGIC {
            return Err(JvmError::BadDecode("bad magic number".to_string()));
        }
        cursor.read_u16::<BigEndian>().ok();
        cursor.read_u16::<BigEndian>().ok();
        let cp_count = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("constant pool count: {e}")))?;
        let raw_pool = Self::read_raw_pool(&mut cursor, cp_count)?;

        cursor.read_u16::<BigEndian>().ok(); // access_flags
        let this_class_index = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("this_class: {e}")))?;
        let super_class_index = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("super_class: {e}")))?;

        let class_name_at = |class_index: u16| -> Option<String> {
            match raw_pool.get(class_index as usize)?.as_ref()? {
                RawConst::ClassInfo { name_index } => match raw_pool.get(*name_index as usize)?.as_ref()? {
                    RawConst::Utf8(s) => Some(s.clone()),
                    _ => None,
                },
                _ => None,
            }
        };

        let this_name = class_name_at(this_class_index)
            .ok_or_else(|| JvmError::BadDecode("this_class name unresolved".to_string()))?;
        let super_name = if super_class_index == 0 {
            None
        } else {
            class_name_at(super_class_index)
        };
        Ok((this_name, super_name))
    }

    fn resolve_pool(&self, raw: Vec<Option<RawConst>>) -> Result<ConstantPool, JvmError> {
        let utf8 = |idx: u16| -> Result<&str, JvmError> {
            match raw.get(idx as usize).and_then(|e| e.as_ref()) {
                Some(RawConst::Utf8(s)) => Ok(s.as_str()),
                _ => Err(JvmError::LinkageError(format!("expected Utf8 at {idx}"))),
            }
        };
        let name_and_type = |idx: u16| -> Result<(&str, &str), JvmError> {
            match raw.get(idx as usize).and_then(|e| e.as_ref()) {
                Some(RawConst::NameAndType {
                    name_index,
                    descriptor_index,
                }) => Ok((utf8(*name_index)?, utf8(*descriptor_index)?)),
                _ => Err(JvmError::LinkageError(format!("expected NameAndType at {idx}"))),
            }
        };
        let class_name = |idx: u16| -> Result<&str, JvmError> {
            match raw.get(idx as usize).and_then(|e| e.as_ref()) {
                Some(RawConst::ClassInfo { name_index }) => utf8(*name_index),
                _ => Err(JvmError::LinkageError(format!("expected Class at {idx}"))),
            }
        };

        let mut resolved = Vec::with_capacity(raw.len());
        for entry in &raw {
            let out = match entry {
                None => None,
                Some(RawConst::Utf8(s)) => Some(Const::Utf8(self.intern_str(s))),
                Some(RawConst::Integer(v)) => Some(Const::Integer(*v)),
                Some(RawConst::ClassInfo { name_index }) => Some(Const::ClassInfo {
                    name: self.intern_str(utf8(*name_index)?),
                }),
                Some(RawConst::StringInfo { utf8_index }) => Some(Const::StringInfo {
                    value: self.intern_str(utf8(*utf8_index)?),
                }),
                Some(RawConst::NameAndType {
                    name_index,
                    descriptor_index,
                }) => Some(Const::NameAndType {
                    name: self.intern_str(utf8(*name_index)?),
                    descriptor: self.intern_str(utf8(*descriptor_index)?),
                }),
                Some(RawConst::FieldRef {
                    class_index,
                    name_and_type_index,
                }) => {
                    let class = class_name(*class_index)?;
                    let (name, descriptor) = name_and_type(*name_and_type_index)?;
                    Some(Const::FieldRef {
                        class: self.intern_str(class),
                        name: self.intern_str(name),
                        descriptor: self.intern_str(descriptor),
                    })
                }
                Some(RawConst::MethodRef {
                    class_index,
                    name_and_type_index,
                }) => {
                    let class = class_name(*class_index)?;
                    let (name, descriptor) = name_and_type(*name_and_type_index)?;
                    Some(Const::MethodRef {
                        class: self.intern_str(class),
                        name: self.intern_str(name),
                        descriptor: self.intern_str(descriptor),
                    })
                }
                Some(RawConst::InterfaceMethodRef {
                    class_index,
                    name_and_type_index,
                }) => {
                    let class = class_name(*class_index)?;
                    let (name, descriptor) = name_and_type(*name_and_type_index)?;
                    Some(Const::InterfaceMethodRef {
                        class: self.intern_str(class),
                        name: self.intern_str(name),
                        descriptor: self.intern_str(descriptor),
                    })
                }
                Some(RawConst::Unsupported) | Some(RawConst::WidePlaceholder) => None,
            };
            resolved.push(out);
        }
        Ok(ConstantPool::new(resolved))
    }

    fn skip_attributes(cursor: &mut Cursor<&[u8]>) -> Result<(), JvmError> {
        let count = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("attribute count: {e}")))?;
        for _ in 0..count {
            cursor
                .read_u16::<BigEndian>()
                .map_err(|e| JvmError::BadDecode(format!("attribute name index: {e}")))?;
            let len = cursor
                .read_u32::<BigEndian>()
                .map_err(|e| JvmError::BadDecode(format!("attribute length: {e}")))?;
            cursor.set_position(cursor.position() + len as u64);
        }
        Ok(())
    }

    fn read_code_attribute(
        &self,
        cursor: &mut Cursor<&[u8]>,
        raw_pool: &[Option<RawConst>],
    ) -> Result<CodeAttr, JvmError> {
        let max_stack = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("max_stack: {e}")))?;
        let max_locals = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("max_locals: {e}")))?;
        let code_len = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("code_length: {e}")))?;
        let mut code = vec![0u8; code_len as usize];
        cursor
            .read_exact(&mut code)
            .map_err(|e| JvmError::BadDecode(format!("code bytes: {e}")))?;

        let exception_table_len = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("exception table length: {e}")))?;
        let mut exception_table = Vec::with_capacity(exception_table_len as usize);
        for _ in 0..exception_table_len {
            let start_pc = cursor.read_u16::<BigEndian>().unwrap();
            let end_pc = cursor.read_u16::<BigEndian>().unwrap();
            let handler_pc = cursor.read_u16::<BigEndian>().unwrap();
            let catch_type_index = cursor.read_u16::<BigEndian>().unwrap();
            let catch_type = if catch_type_index == 0 {
                None
            } else {
                match raw_pool.get(catch_type_index as usize).and_then(|e| e.as_ref()) {
                    Some(RawConst::ClassInfo { name_index }) => {
                        match raw_pool.get(*name_index as usize).and_then(|e| e.as_ref()) {
                            Some(RawConst::Utf8(s)) => Some(self.intern_str(s)),
                            _ => None,
                        }
                    }
                    _ => None,
                }
            };
            exception_table.push(ExceptionTableEntry {
                start_pc,
                end_pc,
                handler_pc,
                catch_type,
            });
        }

        Self::skip_attributes(cursor)?;

        Ok(CodeAttr {
            max_stack,
            max_locals,
            code,
            exception_table,
        })
    }

    /// Parses a `.class` file's bytes into a linked [`ClassDef`]. `class_id`
    /// and `super_id` are assigned by the caller's method area (the
    /// registry owns `ClassId` allocation, spec.md §4.2), so this function
    /// only needs the super class's already-resolved `ClassId` to wire the
    /// hierarchy walk.
    pub fn parse(
        &self,
        bytes: &[u8],
        this_class_id: ClassId,
        super_id: Option<ClassId>,
        inherited_vtable: &[VTableEntry],
    ) -> Result<ClassDef, JvmError> {
        let mut cursor = Cursor::new(bytes);
        let magic = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("magic: {e}")))?;
        if magic != CLASS_MAGIC {
            return Err(JvmError::BadDecode("bad magic number".to_string()));
        }
        cursor.read_u16::<BigEndian>().unwrap(); // minor
        cursor.read_u16::<BigEndian>().unwrap(); // major

        let cp_count = cursor
            .read_u16::<BigEndian>()
            .map_err(|e| JvmError::BadDecode(format!("constant pool count: {e}")))?;
        let raw_pool = Self::read_raw_pool(&mut cursor, cp_count)?;

        let _access_flags = cursor.read_u16::<BigEndian>().unwrap();
        let this_class_index = cursor.read_u16::<BigEndian>().unwrap();
        let super_class_index = cursor.read_u16::<BigEndian>().unwrap();

        let class_name = match raw_pool.get(this_class_index as usize).and_then(|e| e.as_ref()) {
            Some(RawConst::ClassInfo { name_index }) => match raw_pool.get(*name_index as usize).and_then(|e| e.as_ref()) {
                Some(RawConst::Utf8(s)) => self.intern_str(s),
                _ => return Err(JvmError::BadDecode("this_class name unresolved".to_string())),
            },
            _ => return Err(JvmError::BadDecode("this_class not a ClassInfo".to_string())),
        };
        let _ = super_class_index;

        let interfaces_count = cursor.read_u16::<BigEndian>().unwrap();
        for _ in 0..interfaces_count {
            cursor.read_u16::<BigEndian>().unwrap();
        }

        let fields_count = cursor.read_u16::<BigEndian>().unwrap();
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let access_flags = cursor.read_u16::<BigEndian>().unwrap();
            let name_index = cursor.read_u16::<BigEndian>().unwrap();
            let _descriptor_index = cursor.read_u16::<BigEndian>().unwrap();
            Self::skip_attributes(&mut cursor)?;
            let name = match raw_pool.get(name_index as usize).and_then(|e| e.as_ref()) {
                Some(RawConst::Utf8(s)) => self.intern_str(s),
                _ => return Err(JvmError::BadDecode("field name unresolved".to_string())),
            };
            fields.push(FieldInfo { access_flags, name });
        }

        let methods_count = cursor.read_u16::<BigEndian>().unwrap();
        let mut methods = Vec::with_capacity(methods_count as usize);
        for _ in 0..methods_count {
            let access_flags = cursor.read_u16::<BigEndian>().unwrap();
            let name_index = cursor.read_u16::<BigEndian>().unwrap();
            let descriptor_index = cursor.read_u16::<BigEndian>().unwrap();
            let attr_count = cursor.read_u16::<BigEndian>().unwrap();
            let mut code = None;
            for _ in 0..attr_count {
                let attr_name_index = cursor.read_u16::<BigEndian>().unwrap();
                let attr_len = cursor.read_u32::<BigEndian>().unwrap();
                let attr_name = match raw_pool.get(attr_name_index as usize).and_then(|e| e.as_ref()) {
                    Some(RawConst::Utf8(s)) => s.as_str(),
                    _ => "",
                };
                if attr_name == "Code" && access_flags & ACC_NATIVE == 0 {
                    let attr_start = cursor.position();
                    code = Some(self.read_code_attribute(&mut cursor, &raw_pool)?);
                    cursor.set_position(attr_start + attr_len as u64);
                } else {
                    cursor.set_position(cursor.position() + attr_len as u64);
                }
            }
            let name = match raw_pool.get(name_index as usize).and_then(|e| e.as_ref()) {
                Some(RawConst::Utf8(s)) => self.intern_str(s),
                _ => return Err(JvmError::BadDecode("method name unresolved".to_string())),
            };
            let descriptor = match raw_pool.get(descriptor_index as usize).and_then(|e| e.as_ref()) {
                Some(RawConst::Utf8(s)) => self.intern_str(s),
                _ => return Err(JvmError::BadDecode("method descriptor unresolved".to_string())),
            };
            methods.push(MethodInfo {
                access_flags,
                name,
                descriptor,
                owning_class: this_class_id,
                code,
            });
        }

        Self::skip_attributes(&mut cursor)?;

        let init_name = self.intern_str("<init>");
        let mut vtable: Vec<VTableEntry> = inherited_vtable.to_vec();
        for (index, method) in methods.iter().enumerate() {
            if method.is_static() || method.name == init_name {
                continue;
            }
            let method_id = crate::keys::MethodId {
                class: this_class_id,
                index: index as u16,
            };
            if let Some(existing) = vtable
                .iter_mut()
                .find(|e| e.name == method.name && e.descriptor == method.descriptor)
            {
                existing.method = method_id;
            } else {
                vtable.push(VTableEntry {
                    name: method.name,
                    descriptor: method.descriptor,
                    method: method_id,
                });
            }
        }

        Ok(ClassDef {
            name: class_name,
            const_pool: self.resolve_pool(raw_pool)?,
            super_id,
            methods,
            fields,
            vtable,
            static_fields: RwLock::new(HashMap::new()),
            monitor: Mutex::new(()),
            init_state: Mutex::new(crate::rt::ClassInitState::Uninitialized),
        })
    }
}
