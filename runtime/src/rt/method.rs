use crate::keys::{ClassId, Symbol};

/// One row of a method's exception table (spec.md §3, §4.5): `catch_type`
/// is `None` for the `any` entry finally/catch-all blocks compile to.
#[derive(Debug, Clone)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: Option<Symbol>,
}

/// The bytecode and per-method tables the interpreter actually executes
/// (spec.md §3 `CodeAttr`). Native methods have no `CodeAttr` at all —
/// `MethodInfo::code` is `None` and invocation instead dispatches through
/// the native bridge (spec.md §4.3 step 7, §6).
#[derive(Debug, Clone, Default)]
pub struct CodeAttr {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
}

#[derive(Debug, Clone)]
pub struct MethodInfo {
    pub access_flags: u16,
    pub name: Symbol,
    pub descriptor: Symbol,
    pub owning_class: ClassId,
    pub code: Option<CodeAttr>,
}

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_SYNCHRONIZED: u16 = 0x0020;

impl MethodInfo {
    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn is_native(&self) -> bool {
        self.access_flags & ACC_NATIVE != 0
    }

    pub fn is_synchronized(&self) -> bool {
        self.access_flags & ACC_SYNCHRONIZED != 0
    }

    /// Number of argument descriptor slots, not counting `this` (spec.md
    /// §4.3 step 2, "parse the method descriptor"). Each slot is one local
    /// variable / one operand-stack cell since longs and doubles are out of
    /// scope (spec.md §1 Non-goals).
    pub fn arg_count(&self, descriptor_str: &str) -> usize {
        count_descriptor_params(descriptor_str)
    }
}

/// Free-standing version of [`MethodInfo::arg_count`] for call sites that
/// only have a descriptor string in hand — e.g. `invokespecial` deciding how
/// many operands to pop for a target that was never resolved to a real
/// `MethodInfo` (the `java/lang/String` `<init>` special case, spec.md §9).
pub fn count_descriptor_params(descriptor_str: &str) -> usize {
    let params = descriptor_str
        .split_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(params, _)| params)
        .unwrap_or("");
    let mut count = 0;
    let mut chars = params.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            'L' => {
                while chars.next_if(|&c| c != ';').is_some() {}
                chars.next();
                count += 1;
            }
            '[' => {
                while chars.next_if(|&c| c == '[').is_some() {}
                if chars.next_if(|&c| c == 'L').is_some() {
                    while chars.next_if(|&c| c != ';').is_some() {}
                    chars.next();
                } else {
                    chars.next();
                }
                count += 1;
            }
            _ => count += 1,
        }
    }
    count
}
