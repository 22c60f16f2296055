//! Script execution under a wall-clock budget.
//!
//! Each run gets a fresh interpreter on a blocking worker thread, raced
//! against a timer. The interpreter offers no interruption point, so a run
//! that exceeds its budget is abandoned: the caller gets the timeout
//! immediately and the worker thread finishes (or spins) in the background.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustpython_vm::{compiler::Mode, Interpreter, Settings};

use crate::error::{self, RenderError, Result};
use crate::plotting;
use crate::policy::Policy;
use crate::sandbox::config::SandboxConfig;
use crate::sandbox::io::{install_output_capture, SandboxIo};
use crate::sandbox::{namespace, rewrite};

/// Output captured from one successful execution.
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// Everything the script printed to stdout.
    pub stdout: String,
    /// Everything the script wrote to stderr.
    pub stderr: String,
}

/// Executes validated scripts inside a restricted interpreter.
pub struct ScriptExecutor {
    config: SandboxConfig,
    policy: Arc<Policy>,
}

/// Build an interpreter with the stdlib and the native plotting modules
/// registered.
pub(crate) fn build_interpreter() -> Interpreter {
    Interpreter::with_init(Settings::default(), |vm| {
        vm.add_native_modules(rustpython_stdlib::get_module_inits());
        vm.add_native_module(
            "matplotlib".to_owned(),
            Box::new(plotting::make_matplotlib_module),
        );
    })
}

impl ScriptExecutor {
    /// Create an executor from a config and a shared policy.
    pub fn new(config: SandboxConfig, policy: Arc<Policy>) -> Self {
        Self { config, policy }
    }

    /// The active configuration.
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// The directory artifact files are allocated in.
    pub fn temp_dir(&self) -> &Path {
        &self.config.temp_dir
    }

    /// Execute a script with its save calls redirected to `output_path`.
    ///
    /// The script must already have passed validation; this method enforces
    /// the runtime restrictions (namespace, import hook, timeout) but not
    /// the static ones.
    pub async fn execute(&self, script: &str, output_path: &Path) -> Result<ExecutionReport> {
        let redirected =
            rewrite::redirect_save_calls(script, output_path, &self.config.save_call)?;

        let policy = Arc::clone(&self.policy);
        let cancelled = Arc::new(AtomicBool::new(false));
        let worker_flag = Arc::clone(&cancelled);
        let output = output_path.to_path_buf();
        let worker =
            tokio::task::spawn_blocking(move || run_sync(&redirected, &policy, &output, worker_flag));

        let timeout = self.config.timeout;
        tokio::select! {
            joined = worker => {
                joined.map_err(|e| RenderError::Internal(format!("sandbox worker failed: {e}")))?
            }
            _ = tokio::time::sleep(timeout) => {
                // The save sink checks this flag, so the abandoned run can
                // no longer write an artifact after we return.
                cancelled.store(true, Ordering::SeqCst);
                tracing::warn!(timeout = ?timeout, "script execution abandoned after budget");
                Err(RenderError::ExecutionTimeout(timeout))
            }
        }
    }
}

/// Run one script to completion in a fresh interpreter.
fn run_sync(
    script: &str,
    policy: &Policy,
    output: &Path,
    cancelled: Arc<AtomicBool>,
) -> Result<ExecutionReport> {
    let interpreter = build_interpreter();
    interpreter.enter(|vm| {
        // Worker threads are reused; figure state must not carry over, and
        // the save sink needs this run's output path and abandonment flag.
        plotting::figure::begin_run(output.to_path_buf(), cancelled);

        let io = SandboxIo::new();
        install_output_capture(vm, &io);

        if plotting::install(vm).is_err() {
            return Err(RenderError::Internal(
                "plotting modules failed to initialize".to_owned(),
            ));
        }

        let scope = match namespace::instantiate(vm, policy) {
            Ok(scope) => scope,
            Err(exc) => {
                let mut text = String::new();
                let _ = vm.write_exception(&mut text, &exc);
                return Err(RenderError::Internal(format!(
                    "namespace construction failed: {}",
                    text.trim()
                )));
            }
        };

        let code = vm
            .compile(script, Mode::Exec, "<script>".to_owned())
            .map_err(|err| RenderError::SyntaxInvalid(err.to_string()))?;

        match vm.run_code_obj(code, scope) {
            Ok(_) => Ok(ExecutionReport {
                stdout: io.stdout_str(),
                stderr: io.stderr_str(),
            }),
            Err(exc) => {
                let mut traceback = String::new();
                let _ = vm.write_exception(&mut traceback, &exc);
                tracing::debug!(traceback = %traceback.trim(), "script raised");

                Err(error::parse_script_exception(&traceback).unwrap_or_else(|| {
                    RenderError::ExecutionRuntimeError {
                        exception_type: "Exception".to_owned(),
                        message: traceback.lines().last().unwrap_or_default().to_owned(),
                    }
                }))
            }
        }
    })
}
