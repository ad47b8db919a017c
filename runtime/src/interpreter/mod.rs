use crate::error::JvmError;
use crate::frame::Frame;
use crate::heap::HeapHandle;
use crate::keys::{ClassId, MethodId, Symbol};
use crate::rt::method::{CodeAttr, count_descriptor_params};
use crate::rt::ClassDef;
use crate::throw_exception;
use crate::value::Value;
use crate::vm::VirtualMachine;
use byteorder::{BigEndian, ByteOrder};
use std::sync::Arc;

mod handlers;

/// JVM opcodes this engine's reduced instruction set actually dispatches
/// (spec.md §4.6). Values match the real bytecode so `.class` files compiled
/// by `javac` against the subset of the language the other [MODULE]s accept
/// run unmodified.
mod op {
    pub const NOP: u8 = 0x00;
    pub const ACONST_NULL: u8 = 0x01;
    pub const ICONST_M1: u8 = 0x02;
    pub const ICONST_0: u8 = 0x03;
    pub const ICONST_5: u8 = 0x08;
    pub const BIPUSH: u8 = 0x10;
    pub const SIPUSH: u8 = 0x11;
    pub const LDC: u8 = 0x12;
    pub const ILOAD: u8 = 0x15;
    pub const ALOAD: u8 = 0x19;
    pub const ILOAD_0: u8 = 0x1a;
    pub const ILOAD_3: u8 = 0x1d;
    pub const ALOAD_0: u8 = 0x2a;
    pub const ALOAD_3: u8 = 0x2d;
    pub const IALOAD: u8 = 0x2e;
    pub const AALOAD: u8 = 0x32;
    pub const CALOAD: u8 = 0x34;
    pub const ISTORE: u8 = 0x36;
    pub const ASTORE: u8 = 0x3a;
    pub const ISTORE_0: u8 = 0x3b;
    pub const ISTORE_3: u8 = 0x3e;
    pub const LSTORE_1: u8 = 0x40;
    pub const ASTORE_0: u8 = 0x4b;
    pub const ASTORE_3: u8 = 0x4e;
    pub const IASTORE: u8 = 0x4f;
    pub const AASTORE: u8 = 0x53;
    pub const CASTORE: u8 = 0x55;
    pub const POP: u8 = 0x57;
    pub const DUP: u8 = 0x59;
    pub const DUP_X1: u8 = 0x5a;
    pub const SWAP: u8 = 0x5f;
    pub const IADD: u8 = 0x60;
    pub const ISUB: u8 = 0x64;
    pub const IMUL: u8 = 0x68;
    pub const IDIV: u8 = 0x6c;
    pub const ISHL: u8 = 0x78;
    pub const ISHR: u8 = 0x7a;
    pub const IINC: u8 = 0x84;
    pub const IFEQ: u8 = 0x99;
    pub const IFNE: u8 = 0x9a;
    pub const IFLT: u8 = 0x9b;
    pub const IFGE: u8 = 0x9c;
    pub const IFGT: u8 = 0x9d;
    pub const IFLE: u8 = 0x9e;
    pub const IF_ICMPEQ: u8 = 0x9f;
    pub const IF_ICMPNE: u8 = 0xa0;
    pub const IF_ICMPLT: u8 = 0xa1;
    pub const IF_ICMPGE: u8 = 0xa2;
    pub const IF_ICMPGT: u8 = 0xa3;
    pub const IF_ICMPLE: u8 = 0xa4;
    pub const IF_ACMPEQ: u8 = 0xa5;
    pub const IF_ACMPNE: u8 = 0xa6;
    pub const GOTO: u8 = 0xa7;
    pub const IRETURN: u8 = 0xac;
    pub const ARETURN: u8 = 0xb0;
    pub const RETURN: u8 = 0xb1;
    pub const GETSTATIC: u8 = 0xb2;
    pub const PUTSTATIC: u8 = 0xb3;
    pub const GETFIELD: u8 = 0xb4;
    pub const PUTFIELD: u8 = 0xb5;
    pub const INVOKEVIRTUAL: u8 = 0xb6;
    pub const INVOKESPECIAL: u8 = 0xb7;
    pub const INVOKESTATIC: u8 = 0xb8;
    pub const INVOKEINTERFACE: u8 = 0xb9;
    pub const NEW: u8 = 0xbb;
    pub const NEWARRAY: u8 = 0xbc;
    pub const ANEWARRAY: u8 = 0xbd;
    pub const ARRAYLENGTH: u8 = 0xbe;
    pub const ATHROW: u8 = 0xbf;
    pub const CHECKCAST: u8 = 0xc0;
    pub const INSTANCEOF: u8 = 0xc1;
    pub const MONITORENTER: u8 = 0xc2;
    pub const MONITOREXIT: u8 = 0xc3;
    pub const IFNULL: u8 = 0xc6;
    pub const IFNONNULL: u8 = 0xc7;
    pub const WIDE: u8 = 0xc4;
}

/// What one dispatched instruction did to control flow: advance by its own
/// encoded size, jump to an absolute target (branches already resolve
/// fallthrough vs. taken in `handlers`), or end the method.
enum Step {
    Next(usize),
    Jump(usize),
    Return(Option<Value>),
}

fn u16_at(code: &[u8], pc: usize) -> u16 {
    BigEndian::read_u16(&code[pc..pc + 2])
}

fn i16_at(code: &[u8], pc: usize) -> i16 {
    BigEndian::read_i16(&code[pc..pc + 2])
}

pub struct Interpreter;

impl Interpreter {
    /// Entry point from the CLI front end (spec.md §6): loads the configured
    /// main class, triggers its `<clinit>` if any, and invokes
    /// `main(String[])` with `config.main_args` turned into a real Java
    /// string array.
    pub fn run_main(vm: &VirtualMachine) -> Result<(), JvmError> {
        let class_id = vm.load_class(&vm.config.main_class)?;
        ensure_class_initialized(vm, class_id)?;
        let name = vm.intern("main");
        let descriptor = vm.intern("([Ljava/lang/String;)V");
        let method_id = vm.resolve_method(class_id, name, descriptor, false)?;

        let args_array = vm.heap.new_object_array(vm.config.main_args.len() as i32)?;
        {
            let entry = vm.heap.get(args_array)?;
            let array = entry.as_array()?;
            let mut data = array.data.write();
            for (slot, arg) in data.iter_mut().zip(vm.config.main_args.iter()) {
                *slot = Value::Ref(vm.new_java_string(arg));
            }
        }

        invoke(vm, method_id, vec![Value::Ref(args_array)])?;
        Ok(())
    }
}

/// The invocation prologue (spec.md §4.3): resolves native vs. Java
/// dispatch, builds the callee's `Frame`, and — for a `synchronized` method
/// — holds the right `MutexGuard` as a local for the whole call so it
/// releases on every exit path (normal return, value return, or an
/// exception unwinding back out through `?`). This is the opcode-level
/// `monitorenter`/`monitorexit` pair's counterpart for method-level
/// synchronization; see `handlers::handle_monitorenter` for why that one
/// needs a different, lexically-unscoped technique.
pub fn invoke(vm: &VirtualMachine, method_id: MethodId, args: Vec<Value>) -> Result<Option<Value>, JvmError> {
    let class = vm.get_class(method_id.class);
    let info = &class.methods[method_id.index as usize];

    if info.is_native() {
        let class_name = vm.resolve(class.name).to_string();
        let name = vm.resolve(info.name).to_string();
        let descriptor = vm.resolve(info.descriptor).to_string();
        let native_fn = vm.natives.find(&class_name, &name, &descriptor).ok_or_else(|| {
            JvmError::UnsupportedNativeMethod {
                class: class_name.clone(),
                name: name.clone(),
                descriptor: descriptor.clone(),
            }
        })?;
        return native_fn(vm, &args);
    }

    let code_attr = info.code.as_ref().ok_or_else(|| {
        JvmError::LinkageError(format!(
            "{}.{} has no Code attribute and is not native",
            vm.resolve(class.name),
            vm.resolve(info.name)
        ))
    })?;
    let mut frame = Frame::new(code_attr.max_stack, code_attr.max_locals, args);

    if info.is_synchronized() {
        if info.is_static() {
            let _guard = class.monitor.lock();
            return interpret(vm, method_id, &mut frame);
        } else {
            let receiver = frame.load_local(0)?.as_ref_nonnull()?;
            let entry = vm.heap.get(receiver)?;
            let _guard = entry.monitor().lock();
            return interpret(vm, method_id, &mut frame);
        }
    }

    interpret(vm, method_id, &mut frame)
}

/// Runs `<clinit>` at most once per class, the first time it is actively
/// used — `new`, `getstatic`/`putstatic`, `invokestatic` (SPEC_FULL.md §3
/// supplement; spec.md's distilled scope is silent on static initializers).
/// Superclasses initialize before subclasses, matching JVM spec §5.5.
fn ensure_class_initialized(vm: &VirtualMachine, class_id: ClassId) -> Result<(), JvmError> {
    let class = vm.get_class(class_id);
    if class.is_initialized() {
        return Ok(());
    }
    if let Some(super_id) = class.super_id {
        ensure_class_initialized(vm, super_id)?;
    }
    if !class.begin_initializing() {
        return Ok(());
    }
    let clinit_name = vm.intern("<clinit>");
    let clinit_descriptor = vm.intern("()V");
    if let Some(index) = class.find_declared_method(clinit_name, clinit_descriptor) {
        invoke(vm, MethodId { class: class_id, index }, Vec::new())?;
    }
    class.mark_initialized();
    Ok(())
}

/// The fetch-decode-execute loop (spec.md §4.1, §4.6) plus exception
/// propagation (§4.5). `class`/`info`/`code` are fetched once: a method's
/// own bytecode never changes mid-execution, and holding an owned `Arc`
/// instead of a registry-guard borrow (the teacher's raw-pointer trick)
/// means recursive `invoke` calls below need no `unsafe` at all.
fn interpret(vm: &VirtualMachine, method: MethodId, frame: &mut Frame) -> Result<Option<Value>, JvmError> {
    let class = vm.get_class(method.class);
    let info = &class.methods[method.index as usize];
    let code_attr = info.code.as_ref().expect("interpret called on a codeless method");
    let code = &code_attr.code;

    loop {
        let pc = frame.pc();
        let opcode = code[pc];

        let outcome: Result<Step, JvmError> = (|| {
            Ok(match opcode {
                op::NOP => Step::Next(1),
                op::ACONST_NULL => {
                    handlers::handle_aconst_null(frame)?;
                    Step::Next(1)
                }
                n if (op::ICONST_M1..=op::ICONST_5).contains(&n) => {
                    handlers::handle_iconst(frame, n as i32 - op::ICONST_0 as i32)?;
                    Step::Next(1)
                }
                op::BIPUSH => {
                    handlers::handle_bipush(frame, code[pc + 1] as i8)?;
                    Step::Next(2)
                }
                op::SIPUSH => {
                    handlers::handle_sipush(frame, i16_at(code, pc + 1))?;
                    Step::Next(3)
                }
                op::LDC => {
                    let value = load_constant(vm, &class, code[pc + 1] as u16)?;
                    frame.push(value);
                    Step::Next(2)
                }
                op::ILOAD => {
                    handlers::handle_iload(frame, code[pc + 1] as usize)?;
                    Step::Next(2)
                }
                op::ALOAD => {
                    handlers::handle_aload(frame, code[pc + 1] as usize)?;
                    Step::Next(2)
                }
                n if (op::ILOAD_0..=op::ILOAD_3).contains(&n) => {
                    handlers::handle_iload(frame, (n - op::ILOAD_0) as usize)?;
                    Step::Next(1)
                }
                n if (op::ALOAD_0..=op::ALOAD_3).contains(&n) => {
                    handlers::handle_aload(frame, (n - op::ALOAD_0) as usize)?;
                    Step::Next(1)
                }
                op::IALOAD => {
                    handlers::handle_iaload(frame, vm)?;
                    Step::Next(1)
                }
                op::AALOAD => {
                    handlers::handle_aaload(frame, vm)?;
                    Step::Next(1)
                }
                op::CALOAD => {
                    handlers::handle_caload(frame, vm)?;
                    Step::Next(1)
                }
                op::ISTORE => {
                    handlers::handle_istore(frame, code[pc + 1] as usize)?;
                    Step::Next(2)
                }
                op::ASTORE => {
                    handlers::handle_astore(frame, code[pc + 1] as usize)?;
                    Step::Next(2)
                }
                n if (op::ISTORE_0..=op::ISTORE_3).contains(&n) => {
                    handlers::handle_istore(frame, (n - op::ISTORE_0) as usize)?;
                    Step::Next(1)
                }
                op::LSTORE_1 => {
                    // No long width is modeled (spec.md §1 Non-goals): a
                    // `lstore_1` just writes the stack top to local slot 1,
                    // the same single-slot store `istore_1` performs.
                    handlers::handle_istore(frame, 1)?;
                    Step::Next(1)
                }
                n if (op::ASTORE_0..=op::ASTORE_3).contains(&n) => {
                    handlers::handle_astore(frame, (n - op::ASTORE_0) as usize)?;
                    Step::Next(1)
                }
                op::IASTORE => {
                    handlers::handle_iastore(frame, vm)?;
                    Step::Next(1)
                }
                op::AASTORE => {
                    handlers::handle_aastore(frame, vm)?;
                    Step::Next(1)
                }
                op::CASTORE => {
                    handlers::handle_castore(frame, vm)?;
                    Step::Next(1)
                }
                op::POP => {
                    handlers::handle_pop(frame)?;
                    Step::Next(1)
                }
                op::DUP => {
                    handlers::handle_dup(frame)?;
                    Step::Next(1)
                }
                op::DUP_X1 => {
                    handlers::handle_dup_x1(frame)?;
                    Step::Next(1)
                }
                op::SWAP => {
                    handlers::handle_swap(frame)?;
                    Step::Next(1)
                }
                op::IADD => {
                    handlers::handle_iadd(frame)?;
                    Step::Next(1)
                }
                op::ISUB => {
                    handlers::handle_isub(frame)?;
                    Step::Next(1)
                }
                op::IMUL => {
                    handlers::handle_imul(frame)?;
                    Step::Next(1)
                }
                op::IDIV => {
                    handlers::handle_idiv(frame)?;
                    Step::Next(1)
                }
                op::ISHL => {
                    handlers::handle_ishl(frame)?;
                    Step::Next(1)
                }
                op::ISHR => {
                    handlers::handle_ishr(frame)?;
                    Step::Next(1)
                }
                op::IINC => {
                    if frame.wide_pending() {
                        frame.set_wide_pending(false);
                        let index = u16_at(code, pc + 1) as usize;
                        let constant = i16_at(code, pc + 3) as i32;
                        handlers::handle_iinc(frame, index, constant)?;
                        Step::Next(5)
                    } else {
                        handlers::handle_iinc(frame, code[pc + 1] as usize, code[pc + 2] as i8 as i32)?;
                        Step::Next(3)
                    }
                }
                op::WIDE => {
                    // Sets the pending flag for the next instruction (spec.md
                    // §4.6 "Control", §9: only `iinc` consumes it in this
                    // subset, but the flag itself is general-purpose).
                    frame.set_wide_pending(true);
                    Step::Next(1)
                }
                op::IFEQ => Step::Jump(handlers::handle_ifeq(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IFNE => Step::Jump(handlers::handle_ifne(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IFLT => Step::Jump(handlers::handle_iflt(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IFGE => Step::Jump(handlers::handle_ifge(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IFGT => Step::Jump(handlers::handle_ifgt(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IFLE => Step::Jump(handlers::handle_ifle(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ICMPEQ => Step::Jump(handlers::handle_if_icmpeq(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ICMPNE => Step::Jump(handlers::handle_if_icmpne(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ICMPLT => Step::Jump(handlers::handle_if_icmplt(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ICMPGE => Step::Jump(handlers::handle_if_icmpge(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ICMPGT => Step::Jump(handlers::handle_if_icmpgt(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ICMPLE => Step::Jump(handlers::handle_if_icmple(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ACMPEQ => Step::Jump(handlers::handle_if_acmpeq(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IF_ACMPNE => Step::Jump(handlers::handle_if_acmpne(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IFNULL => Step::Jump(handlers::handle_ifnull(frame, pc, i16_at(code, pc + 1), 3)?),
                op::IFNONNULL => Step::Jump(handlers::handle_ifnonnull(frame, pc, i16_at(code, pc + 1), 3)?),
                op::GOTO => Step::Jump(handlers::handle_goto(pc, i16_at(code, pc + 1))),

                op::IRETURN => Step::Return(Some(Value::Int(frame.pop_int()?))),
                op::ARETURN => Step::Return(Some(frame.pop()?)),
                op::RETURN => Step::Return(None),

                op::GETSTATIC => {
                    let view = class.const_pool.field_ref(u16_at(code, pc + 1))?;
                    let owner_name = vm.resolve(view.class).to_string();
                    let owner = vm.load_class(&owner_name)?;
                    ensure_class_initialized(vm, owner)?;
                    let value = vm.get_class(owner).get_static(view.name).unwrap_or(Value::Null);
                    frame.push(value);
                    Step::Next(3)
                }
                op::PUTSTATIC => {
                    let view = class.const_pool.field_ref(u16_at(code, pc + 1))?;
                    let owner_name = vm.resolve(view.class).to_string();
                    let owner = vm.load_class(&owner_name)?;
                    ensure_class_initialized(vm, owner)?;
                    let value = frame.pop()?;
                    vm.get_class(owner).set_static(view.name, value);
                    Step::Next(3)
                }
                op::GETFIELD => {
                    // Fields are keyed by simple name only (spec.md §3) —
                    // no need to resolve the declaring class to read one.
                    let view = class.const_pool.field_ref(u16_at(code, pc + 1))?;
                    let objectref = frame.pop_ref_nonnull()?;
                    let entry = vm.heap.get(objectref)?;
                    let obj = entry.as_object()?;
                    let value = obj.fields.read().get(&view.name).copied().unwrap_or(Value::Null);
                    frame.push(value);
                    Step::Next(3)
                }
                op::PUTFIELD => {
                    let view = class.const_pool.field_ref(u16_at(code, pc + 1))?;
                    let value = frame.pop()?;
                    let objectref = frame.pop_ref_nonnull()?;
                    let entry = vm.heap.get(objectref)?;
                    let obj = entry.as_object()?;
                    obj.fields.write().insert(view.name, value);
                    Step::Next(3)
                }

                op::INVOKEVIRTUAL => {
                    let view = class.const_pool.method_ref(u16_at(code, pc + 1))?;
                    let arg_slots = count_descriptor_params(vm.resolve(view.descriptor));
                    let total = arg_slots + 1;
                    let receiver = frame.peek_at(arg_slots)?.as_ref_nonnull()?;
                    let runtime_class = vm
                        .heap
                        .get_class_id(receiver)?
                        .ok_or(JvmError::WrongOperandType("object"))?;
                    let method_id = vm.resolve_method(runtime_class, view.name, view.descriptor, true)?;
                    let args = pop_args(frame, total)?;
                    if let Some(value) = invoke(vm, method_id, args)? {
                        frame.push(value);
                    }
                    Step::Next(3)
                }
                op::INVOKEINTERFACE => {
                    let view = class.const_pool.interface_method_ref(u16_at(code, pc + 1))?;
                    let arg_slots = count_descriptor_params(vm.resolve(view.descriptor));
                    let total = arg_slots + 1;
                    let receiver = frame.peek_at(arg_slots)?.as_ref_nonnull()?;
                    let runtime_class = vm
                        .heap
                        .get_class_id(receiver)?
                        .ok_or(JvmError::WrongOperandType("object"))?;
                    let method_id = vm.resolve_method(runtime_class, view.name, view.descriptor, true)?;
                    let args = pop_args(frame, total)?;
                    if let Some(value) = invoke(vm, method_id, args)? {
                        frame.push(value);
                    }
                    Step::Next(5)
                }
                op::INVOKESTATIC => {
                    let view = class.const_pool.method_ref(u16_at(code, pc + 1))?;
                    let owner_name = vm.resolve(view.class).to_string();
                    let owner = vm.load_class(&owner_name)?;
                    ensure_class_initialized(vm, owner)?;
                    let method_id = vm.resolve_method(owner, view.name, view.descriptor, false)?;
                    let arg_slots = count_descriptor_params(vm.resolve(view.descriptor));
                    let args = pop_args(frame, arg_slots)?;
                    if let Some(value) = invoke(vm, method_id, args)? {
                        frame.push(value);
                    }
                    Step::Next(3)
                }
                op::INVOKESPECIAL => {
                    invoke_special(vm, &class, frame, u16_at(code, pc + 1))?;
                    Step::Next(3)
                }

                op::NEW => {
                    let class_name_sym = class.const_pool.class_name(u16_at(code, pc + 1))?;
                    let class_name = vm.resolve(class_name_sym).to_string();
                    let target_class = match vm.load_class(&class_name) {
                        Ok(id) => {
                            ensure_class_initialized(vm, id)?;
                            id
                        }
                        Err(JvmError::ClassNotFound(_)) if class_name.starts_with("java/lang/") => {
                            vm.get_or_create_builtin_class(&class_name)
                        }
                        Err(other) => return Err(other),
                    };
                    let field_names: Vec<Symbol> =
                        vm.get_class(target_class).fields.iter().map(|f| f.name).collect();
                    let handle = vm.heap.new_object(target_class, field_names);
                    frame.push(Value::Ref(handle));
                    Step::Next(3)
                }
                op::NEWARRAY => {
                    handlers::handle_newarray(frame, vm, code[pc + 1])?;
                    Step::Next(2)
                }
                op::ANEWARRAY => {
                    handlers::handle_anewarray(frame, vm)?;
                    Step::Next(3)
                }
                op::ARRAYLENGTH => {
                    handlers::handle_arraylength(frame, vm)?;
                    Step::Next(1)
                }
                op::ATHROW => {
                    let handle = frame.pop_ref_nonnull()?;
                    return Err(JvmError::JavaExceptionThrown(handle));
                }
                op::CHECKCAST => {
                    let class_name_sym = class.const_pool.class_name(u16_at(code, pc + 1))?;
                    let class_name = vm.resolve(class_name_sym).to_string();
                    if let Some(handle) = frame.peek()?.as_nullable_ref()? {
                        let ok = match vm.heap.get_class_id(handle)? {
                            Some(id) => vm.is_subclass_of_name(id, &class_name),
                            None => false,
                        };
                        if !ok {
                            throw_exception!(ClassCastException, class_name);
                        }
                    }
                    Step::Next(3)
                }
                op::INSTANCEOF => {
                    let class_name_sym = class.const_pool.class_name(u16_at(code, pc + 1))?;
                    let class_name = vm.resolve(class_name_sym).to_string();
                    let is_instance = match frame.pop()?.as_nullable_ref()? {
                        Some(handle) => match vm.heap.get_class_id(handle)? {
                            Some(id) => vm.is_subclass_of_name(id, &class_name),
                            None => false,
                        },
                        None => false,
                    };
                    frame.push(Value::Int(is_instance as i32));
                    Step::Next(3)
                }
                op::MONITORENTER => {
                    handlers::handle_monitorenter(frame, vm)?;
                    Step::Next(1)
                }
                op::MONITOREXIT => {
                    handlers::handle_monitorexit(frame, vm)?;
                    Step::Next(1)
                }

                other => return Err(JvmError::UnsupportedOpcode(other)),
            })
        })();

        match outcome {
            Ok(Step::Next(size)) => frame.advance_pc(size),
            Ok(Step::Jump(target)) => frame.set_pc(target),
            Ok(Step::Return(value)) => return Ok(value),
            Err(err) => {
                let handle = to_thrown(vm, err)?;
                match find_handler(vm, code_attr, pc, handle) {
                    Some(handler_pc) => {
                        frame.reset_to_single(Value::Ref(handle));
                        frame.set_pc(handler_pc as usize);
                    }
                    None => return Err(JvmError::JavaExceptionThrown(handle)),
                }
            }
        }
    }
}

fn pop_args(frame: &mut Frame, count: usize) -> Result<Vec<Value>, JvmError> {
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        args.push(frame.pop()?);
    }
    args.reverse();
    Ok(args)
}

/// `invokespecial` (spec.md §4.6, §9 Open Questions): non-virtual private
/// and super-class calls dispatch normally, but `<init>` is a no-op for
/// every target class except `java/lang/String` — user field initializers
/// and superclass constructors simply never run. This is a deliberate,
/// literal reading of the spec's Open Question rather than a bug: any
/// instance field a test program needs set must be `putfield`-ed explicitly.
fn invoke_special(
    vm: &VirtualMachine,
    class: &Arc<ClassDef>,
    frame: &mut Frame,
    cp_index: u16,
) -> Result<(), JvmError> {
    let view = class.const_pool.method_ref(cp_index)?;
    let descriptor = vm.resolve(view.descriptor).to_string();
    let name = vm.resolve(view.name).to_string();
    let target_class_name = vm.resolve(view.class).to_string();
    let total = count_descriptor_params(&descriptor) + 1;

    if name == "<init>" {
        let args = pop_args(frame, total)?;
        let receiver = args[0].as_ref_nonnull()?;
        if target_class_name == "java/lang/String" {
            init_string(vm, receiver, &args[1..], &descriptor)?;
        }
        return Ok(());
    }

    let target_class = vm.load_class(&target_class_name)?;
    let method_id = vm.resolve_method(target_class, view.name, view.descriptor, false)?;
    let args = pop_args(frame, total)?;
    if let Some(value) = invoke(vm, method_id, args)? {
        frame.push(value);
    }
    Ok(())
}

/// The only two `java/lang/String` constructor shapes this engine's native
/// surface needs (SPEC_FULL.md §3): the no-arg empty string, and copying an
/// existing `char[]`. Anything else is an unsupported descriptor rather
/// than a silent no-op, since pretending to construct a string wrong would
/// be worse than refusing.
fn init_string(vm: &VirtualMachine, receiver: HeapHandle, ctor_args: &[Value], descriptor: &str) -> Result<(), JvmError> {
    let entry = vm.heap.get(receiver)?;
    let obj = entry.as_object()?;
    let value_sym = vm.intern("value");
    let chars_handle = match (descriptor, ctor_args) {
        ("()V", []) => vm.heap.new_array(b'C', 0)?,
        ("([C)V", [Value::Ref(src)]) => {
            let src_entry = vm.heap.get(*src)?;
            let contents = src_entry.as_array()?.data.read().clone();
            let handle = vm.heap.new_array(b'C', contents.len() as i32)?;
            *vm.heap.get(handle)?.as_array()?.data.write() = contents;
            handle
        }
        _ => return Err(JvmError::UnsupportedDescriptor(descriptor.to_string())),
    };
    obj.fields.write().insert(value_sym, Value::Ref(chars_handle));
    Ok(())
}

/// `ldc` (spec.md §4.6 "Constants"): accepts `Integer`, `String`, and
/// `Class` pool entries. A `Class` entry constructs a `java/lang/Class`
/// placeholder object carrying the named class's name — the engine has no
/// real reflection support, so this is only ever useful as an opaque
/// reference (e.g. for `==` comparison), never introspected.
fn load_constant(vm: &VirtualMachine, class: &Arc<ClassDef>, index: u16) -> Result<Value, JvmError> {
    if let Ok(v) = class.const_pool.integer(index) {
        return Ok(Value::Int(v));
    }
    if let Ok(class_name_sym) = class.const_pool.class_name(index) {
        return Ok(Value::Ref(new_class_placeholder(vm, vm.resolve(class_name_sym))));
    }
    let sym = class.const_pool.string(index)?;
    let text = vm.resolve(sym).to_string();
    Ok(Value::Ref(vm.new_java_string(&text)))
}

fn new_class_placeholder(vm: &VirtualMachine, class_name: &str) -> HeapHandle {
    let class_class = vm.get_or_create_builtin_class("java/lang/Class");
    let name_sym = vm.intern("name");
    let handle = vm.heap.new_object(class_class, [name_sym]);
    let name_string = vm.new_java_string(class_name);
    if let Ok(entry) = vm.heap.get(handle) {
        if let Ok(obj) = entry.as_object() {
            obj.fields.write().insert(name_sym, Value::Ref(name_string));
        }
    }
    handle
}

/// Turns a raised-but-not-yet-materialized exception into a real heap
/// handle, and passes every other `JvmError` straight through via `?` — VM
/// errors like `MethodNotFound` are not catchable Java exceptions and
/// should never reach the handler-table scan (spec.md §9).
fn to_thrown(vm: &VirtualMachine, err: JvmError) -> Result<HeapHandle, JvmError> {
    match err {
        JvmError::JavaException(info) => Ok(vm.materialize_exception(&info)),
        JvmError::JavaExceptionThrown(handle) => Ok(handle),
        other => Err(other),
    }
}

/// Scans the current method's exception table for a handler covering `pc`
/// (spec.md §4.5). Catch-type matching is exact-name equality, not a
/// superclass walk — `checkcast`/`instanceof` are the opcodes that walk the
/// hierarchy (via `VirtualMachine::is_subclass_of_name`); the exception
/// table's `catch_type` is compared as the literal class name the thrown
/// object was constructed with (spec.md §9 Open Questions).
fn find_handler(vm: &VirtualMachine, code_attr: &CodeAttr, pc: usize, exception: HeapHandle) -> Option<u16> {
    let exception_name = vm
        .heap
        .get_class_id(exception)
        .ok()
        .flatten()
        .map(|id| vm.get_class(id).name);
    code_attr
        .exception_table
        .iter()
        .find(|entry| {
            (entry.start_pc as usize) <= pc
                && pc < (entry.end_pc as usize)
                && match entry.catch_type {
                    None => true,
                    Some(catch_sym) => Some(catch_sym) == exception_name,
                }
        })
        .map(|entry| entry.handler_pc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::rt::method::{ExceptionTableEntry, MethodInfo};
    use crate::rt::ClassDef;
    use parking_lot::Mutex as PlMutex;
    use std::collections::HashMap;
    use std::sync::RwLock;

    fn test_vm() -> VirtualMachine {
        VirtualMachine::new(VmConfig::new(Vec::new(), "Test".to_string(), Vec::new()))
    }

    fn single_method_class(vm: &VirtualMachine, code: CodeAttr) -> MethodId {
        let name = vm.intern("run");
        let descriptor = vm.intern("()I");
        let class_id = vm.define_class_for_test(
            "Test",
            ClassDef {
                name: vm.intern("Test"),
                const_pool: crate::rt::constant_pool::ConstantPool::new(Vec::new()),
                super_id: None,
                methods: vec![MethodInfo {
                    access_flags: crate::rt::method::ACC_STATIC,
                    name,
                    descriptor,
                    owning_class: ClassId(0),
                    code: Some(code),
                }],
                fields: Vec::new(),
                vtable: Vec::new(),
                static_fields: RwLock::new(HashMap::new()),
                monitor: PlMutex::new(()),
                init_state: PlMutex::new(crate::rt::ClassInitState::Initialized),
            },
        );
        MethodId { class: class_id, index: 0 }
    }

    #[test]
    fn invokestatic_int_add_returns_eight() {
        let vm = test_vm();
        let code = CodeAttr {
            max_stack: 2,
            max_locals: 0,
            code: vec![0x10, 0x03, 0x10, 0x05, 0x60, 0xac], // bipush 3; bipush 5; iadd; ireturn
            exception_table: Vec::new(),
        };
        let method = single_method_class(&vm, code);
        let result = invoke(&vm, method, Vec::new()).unwrap();
        assert_eq!(result, Some(Value::Int(8)));
    }

    #[test]
    fn array_store_then_load_round_trips() {
        let vm = test_vm();
        let code = CodeAttr {
            max_stack: 3,
            max_locals: 0,
            code: vec![
                0x10, 0x01, // bipush 1 (length)
                0xbc, 0x0a, // newarray int
                0x59, // dup
                0x03, // iconst_0
                0x10, 0x07, // bipush 7
                0x4f, // iastore
                0x03, // iconst_0
                0x2e, // iaload
                0xac, // ireturn
            ],
            exception_table: Vec::new(),
        };
        let method = single_method_class(&vm, code);
        let result = invoke(&vm, method, Vec::new()).unwrap();
        assert_eq!(result, Some(Value::Int(7)));
    }

    #[test]
    fn division_by_zero_is_caught_by_handler() {
        let vm = test_vm();
        let catch_type = vm.intern("java/lang/ArithmeticException");
        let code = CodeAttr {
            max_stack: 2,
            max_locals: 0,
            code: vec![
                0x04, // iconst_1
                0x03, // iconst_0
                0x6c, // idiv -> throws ArithmeticException
                0xac, // ireturn (unreached)
                0x57, // [handler, pc=4] pop the exception reference
                0x10, 0x2a, // bipush 42
                0xac, // ireturn
            ],
            exception_table: vec![ExceptionTableEntry {
                start_pc: 0,
                end_pc: 4,
                handler_pc: 4,
                catch_type: Some(catch_type),
            }],
        };
        let method = single_method_class(&vm, code);
        let result = invoke(&vm, method, Vec::new()).unwrap();
        assert_eq!(result, Some(Value::Int(42)));
    }

    #[test]
    fn uncaught_exception_propagates_as_thrown_handle() {
        let vm = test_vm();
        let code = CodeAttr {
            max_stack: 2,
            max_locals: 0,
            code: vec![0x04, 0x03, 0x6c, 0xac], // iconst_1; iconst_0; idiv; ireturn
            exception_table: Vec::new(),
        };
        let method = single_method_class(&vm, code);
        match invoke(&vm, method, Vec::new()) {
            Err(JvmError::JavaExceptionThrown(_)) => {}
            other => panic!("expected an uncaught exception, got {other:?}"),
        }
    }

    #[test]
    fn instanceof_matches_the_receivers_runtime_class() {
        let vm = test_vm();
        let class_name_sym = vm.intern("java/lang/RuntimeException");
        let const_pool = crate::rt::constant_pool::ConstantPool::new(vec![
            None,
            Some(crate::rt::constant_pool::Const::ClassInfo { name: class_name_sym }),
        ]);
        let name = vm.intern("run");
        let descriptor = vm.intern("(Ljava/lang/Object;)I");
        let class_id = vm.define_class_for_test(
            "InstanceOfTest",
            ClassDef {
                name: vm.intern("InstanceOfTest"),
                const_pool,
                super_id: None,
                methods: vec![MethodInfo {
                    access_flags: crate::rt::method::ACC_STATIC,
                    name,
                    descriptor,
                    owning_class: ClassId(0),
                    code: Some(CodeAttr {
                        max_stack: 1,
                        max_locals: 1,
                        code: vec![0x2a, 0xc1, 0x00, 0x01, 0xac], // aload_0; instanceof #1; ireturn
                        exception_table: Vec::new(),
                    }),
                }],
                fields: Vec::new(),
                vtable: Vec::new(),
                static_fields: RwLock::new(HashMap::new()),
                monitor: PlMutex::new(()),
                init_state: PlMutex::new(crate::rt::ClassInitState::Initialized),
            },
        );
        let method = MethodId { class: class_id, index: 0 };

        let matching = vm.heap.new_object(vm.get_or_create_builtin_class("java/lang/RuntimeException"), []);
        assert_eq!(invoke(&vm, method, vec![Value::Ref(matching)]).unwrap(), Some(Value::Int(1)));

        let mismatching = vm.heap.new_object(vm.get_or_create_builtin_class("java/lang/ArithmeticException"), []);
        assert_eq!(invoke(&vm, method, vec![Value::Ref(mismatching)]).unwrap(), Some(Value::Int(0)));
    }
}
