use crate::error::JvmError;
use crate::native::NativeRegistry;
use crate::value::Value;
use crate::vm::VirtualMachine;

/// The minimal native stdlib surface an invoked program actually touches
/// (SPEC_FULL.md §3): enough of `Object`, `PrintStream`, and `String` to run
/// the end-to-end scenarios spec.md §8 describes, nothing more — a real
/// native method registry (class-file-backed JNI symbol table) is out of
/// scope (spec.md §1 Non-goals).
pub fn register_all(registry: &mut NativeRegistry) {
    registry.register("java/lang/Object", "<init>", "()V", object_init);
    registry.register("java/lang/Object", "hashCode", "()I", object_hash_code);
    registry.register(
        "java/io/PrintStream",
        "println",
        "(Ljava/lang/String;)V",
        print_stream_println_string,
    );
    registry.register(
        "java/io/PrintStream",
        "println",
        "(I)V",
        print_stream_println_int,
    );
}

fn object_init(_vm: &VirtualMachine, _args: &[Value]) -> Result<Option<Value>, JvmError> {
    Ok(None)
}

fn object_hash_code(_vm: &VirtualMachine, args: &[Value]) -> Result<Option<Value>, JvmError> {
    let receiver = args[0].as_ref_nonnull()?;
    Ok(Some(Value::Int(receiver as i32)))
}

/// Every `print*`-prefixed native is also appended to the VM's debug trace
/// buffer (spec.md §6 "native stdout is observable test output") so tests
/// can assert on program output without capturing the process's real
/// stdout.
fn print_stream_println_string(vm: &VirtualMachine, args: &[Value]) -> Result<Option<Value>, JvmError> {
    let handle = args[1].as_ref_nonnull()?;
    let text = vm.read_java_string(handle)?;
    println!("{text}");
    vm.record_trace(text);
    Ok(None)
}

fn print_stream_println_int(vm: &VirtualMachine, args: &[Value]) -> Result<Option<Value>, JvmError> {
    let value = args[1].as_int()?;
    println!("{value}");
    vm.record_trace(value.to_string());
    Ok(None)
}
