//! Output capture for sandboxed script stdout/stderr.
//!
//! Scripts have no terminal; whatever they print is captured into in-memory
//! buffers and surfaced on the execution report (and the diagnostic log),
//! never written to the host's streams.

use std::io::Write;
use std::sync::{Arc, Mutex};

use rustpython_vm::{function::FuncArgs, PyObjectRef, PyResult, VirtualMachine};

/// A writer that captures output to a shared buffer.
#[derive(Clone, Debug, Default)]
pub struct CapturedOutput {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedOutput {
    /// Create a new captured output buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes through a shared reference. Used by the interpreter-side
    /// writer objects, which only hold `Fn` closures.
    pub fn append(&self, data: &[u8]) {
        let mut buffer = self.buffer.lock().unwrap();
        buffer.extend_from_slice(data);
    }

    /// Get the captured output as a string.
    pub fn to_string_lossy(&self) -> String {
        let buffer = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buffer).to_string()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.lock().unwrap().is_empty()
    }
}

impl Write for CapturedOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Captured stdout/stderr for one sandbox execution.
#[derive(Clone, Default)]
pub struct SandboxIo {
    /// Captured stdout.
    pub stdout: CapturedOutput,
    /// Captured stderr.
    pub stderr: CapturedOutput,
}

impl SandboxIo {
    /// Create a fresh capture pair.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the captured stdout as a string.
    pub fn stdout_str(&self) -> String {
        self.stdout.to_string_lossy()
    }

    /// Get the captured stderr as a string.
    pub fn stderr_str(&self) -> String {
        self.stderr.to_string_lossy()
    }
}

/// Replace `sys.stdout` and `sys.stderr` with write-capturing objects.
///
/// RustPython's `print()` calls `sys.stdout.write(s)` then
/// `sys.stdout.write('\n')`, so this captures all print output.
pub(crate) fn install_output_capture(vm: &VirtualMachine, io: &SandboxIo) {
    let stdout_obj = build_writer_object(vm, io.stdout.clone());
    let stderr_obj = build_writer_object(vm, io.stderr.clone());

    let _ = vm.sys_module.set_attr("stdout", stdout_obj, vm);
    let _ = vm.sys_module.set_attr("stderr", stderr_obj, vm);
}

/// Build a minimal Python object with `write(s)` and `flush()` methods that
/// delegate into a [`CapturedOutput`].
fn build_writer_object(vm: &VirtualMachine, output: CapturedOutput) -> PyObjectRef {
    let write_fn = vm.new_function(
        "write",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let data: String = args
                .args
                .first()
                .and_then(|o| o.str(vm).ok())
                .map(|s| s.as_str().to_owned())
                .unwrap_or_default();
            output.append(data.as_bytes());
            Ok(vm.ctx.new_int(data.len()).into())
        },
    );

    let flush_fn = vm.new_function(
        "flush",
        move |_args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            Ok(vm.ctx.none())
        },
    );

    // A module makes a simple writable namespace; some Python code also
    // checks .closed and .encoding.
    let ns = vm.new_module("<writer>", vm.ctx.new_dict(), None);
    let _ = ns.set_attr("write", write_fn, vm);
    let _ = ns.set_attr("flush", flush_fn, vm);
    let _ = ns.set_attr("closed", vm.ctx.new_bool(false), vm);
    let _ = ns.set_attr("encoding", vm.ctx.new_str("utf-8"), vm);
    ns.into()
}
