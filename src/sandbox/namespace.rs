//! Construction of the restricted execution namespace.
//!
//! Scripts run against a pruned copy of the interpreter builtins plus a fixed
//! set of pre-bound module objects. Import statements are serviced by a
//! guarded `__import__` that only hands out modules resolved here, before any
//! script code ran, so a script can never reach a loader of its own.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use rustpython_vm::{
    function::FuncArgs, scope::Scope, AsObject, PyObjectRef, PyResult, VirtualMachine,
};

use crate::error::RenderError;
use crate::policy::Policy;

/// Builtins a plotting script legitimately needs. Everything else is removed
/// from the builtins module before the script compiles.
///
/// Deliberately absent: `open`, `exec`, `eval`, `compile`, `input`,
/// `__import__` (replaced by the guarded hook), and the reflection surface
/// (`getattr`, `setattr`, `delattr`, `vars`, `globals`, `locals`, `dir`,
/// `type`, `id`).
const SAFE_BUILTINS: &[&str] = &[
    "print", "len", "range", "abs", "min", "max", "sum", "round", "pow", "divmod", "enumerate",
    "zip", "sorted", "reversed", "map", "filter", "iter", "next", "int", "float", "str", "bool",
    "list", "dict", "tuple", "set", "frozenset", "chr", "ord", "format", "repr", "any", "all",
    "isinstance", "issubclass", "callable", "slice", "object", "super", "staticmethod",
    "classmethod", "property", "__build_class__", "__name__", "__doc__",
];

/// Check whether a builtins entry survives pruning. Exception types all stay:
/// scripts need them for `except` clauses, and they carry no capability.
pub(crate) fn is_safe_builtin(name: &str) -> bool {
    if SAFE_BUILTINS.contains(&name) {
        return true;
    }
    if name.ends_with("Error") || name.ends_with("Exception") || name.ends_with("Warning") {
        return true;
    }
    matches!(
        name,
        "StopIteration"
            | "StopAsyncIteration"
            | "GeneratorExit"
            | "KeyboardInterrupt"
            | "SystemExit"
            | "NotImplemented"
            | "Ellipsis"
            | "None"
            | "True"
            | "False"
            | "__debug__"
    )
}

/// Resolve a dotted module path to its module object.
///
/// `sys.modules` is consulted first so natively installed submodules (which
/// the import machinery cannot find under a dotted name) resolve; otherwise
/// the top-level module is imported and the remaining segments are walked as
/// attributes.
fn resolve_module(vm: &VirtualMachine, path: &str) -> PyResult<PyObjectRef> {
    if let Ok(modules) = vm.sys_module.get_attr("modules", vm) {
        if let Ok(found) = modules.get_item(path, vm) {
            return Ok(found);
        }
    }

    let mut segments = path.split('.');
    let top = segments.next().unwrap_or(path);
    let mut module = vm.import(&vm.ctx.new_str(top), 0)?;
    for segment in segments {
        module = module.get_attr(&vm.ctx.new_str(segment), vm)?;
    }
    Ok(module)
}

/// Resolve `path` and every ancestor prefix into the module table. Import
/// statements need the intermediate packages too: `import a.b` binds `a`.
fn register_path(
    vm: &VirtualMachine,
    table: &mut HashMap<String, PyObjectRef>,
    path: &str,
) -> PyResult<()> {
    let mut prefix = String::new();
    for segment in path.split('.') {
        if !prefix.is_empty() {
            prefix.push('.');
        }
        prefix.push_str(segment);
        if !table.contains_key(&prefix) {
            let module = resolve_module(vm, &prefix)?;
            table.insert(prefix.clone(), module);
        }
    }
    Ok(())
}

/// Install the guarded `__import__` into builtins.
///
/// The hook serves only modules that were resolved before script execution.
/// With an empty fromlist it returns the top-level module, matching the
/// interpreter's expectation for `import a.b` statements; with a non-empty
/// fromlist it returns the full dotted module.
fn install_import_hook(
    vm: &VirtualMachine,
    table: HashMap<String, PyObjectRef>,
    allowed: HashSet<String>,
) -> PyResult<()> {
    #[allow(clippy::arc_with_non_send_sync)]
    let table = Arc::new(table);
    let allowed = Arc::new(allowed);

    let import_fn = vm.new_function(
        "__import__",
        move |args: FuncArgs, vm: &VirtualMachine| -> PyResult<PyObjectRef> {
            let name = match args.args.first() {
                Some(obj) => obj.str(vm)?.as_str().to_owned(),
                None => String::new(),
            };
            let top = name.split('.').next().unwrap_or(&name).to_owned();

            if !allowed.contains(&top) {
                return Err(vm.new_import_error(
                    format!("import of '{name}' is not permitted"),
                    vm.ctx.new_str(name.clone()),
                ));
            }

            // `import a.b` has an empty fromlist and binds the top-level
            // module; `from a.b import c` carries a fromlist and needs the
            // full module.
            let from_list_given = match args.args.get(3) {
                Some(obj) => obj.clone().try_to_bool(vm)?,
                None => false,
            };
            let key = if from_list_given { name.as_str() } else { top.as_str() };

            match table.get(key) {
                Some(module) => Ok(module.clone()),
                None => Err(vm.new_import_error(
                    format!("module '{name}' is not available in the sandbox"),
                    vm.ctx.new_str(name.clone()),
                )),
            }
        },
    );

    let builtins_dict = vm
        .builtins
        .as_object()
        .dict()
        .ok_or_else(|| vm.new_runtime_error("builtins module has no dict".to_owned()))?;
    builtins_dict.set_item("__import__", import_fn.into(), vm)
}

/// Remove every builtins entry outside the safe set.
fn prune_builtins(vm: &VirtualMachine) -> PyResult<()> {
    let builtins_dict = vm
        .builtins
        .as_object()
        .dict()
        .ok_or_else(|| vm.new_runtime_error("builtins module has no dict".to_owned()))?;

    let keys_obj = vm.call_method(builtins_dict.as_object(), "keys", ())?;
    let keys: Vec<String> =
        vm.extract_elements_with(&keys_obj, |key| key.str(vm).map(|s| s.as_str().to_owned()))?;

    for name in keys {
        if !is_safe_builtin(&name) {
            builtins_dict.del_item(name.as_str(), vm)?;
        }
    }
    Ok(())
}

/// Build the restricted scope for one execution.
///
/// Order matters: bindings and allowed modules are resolved while the
/// interpreter is still pristine, then builtins are pruned, then the guarded
/// importer replaces the real one.
pub(crate) fn instantiate(vm: &VirtualMachine, policy: &Policy) -> PyResult<Scope> {
    let mut table: HashMap<String, PyObjectRef> = HashMap::new();

    for binding in policy.global_bindings() {
        register_path(vm, &mut table, &binding.module)?;
    }
    for module in policy.allowed_modules() {
        // An allowed module without a provider is tolerated here; importing
        // it from script code raises ImportError at that point.
        let _ = register_path(vm, &mut table, module);
    }

    let bindings: Vec<(String, PyObjectRef)> = policy
        .global_bindings()
        .iter()
        .map(|b| {
            let module = table
                .get(&b.module)
                .cloned()
                .ok_or_else(|| vm.new_runtime_error(format!("unresolved binding '{}'", b.name)))?;
            Ok((b.name.clone(), module))
        })
        .collect::<PyResult<_>>()?;

    prune_builtins(vm)?;
    install_import_hook(vm, table, policy.allowed_modules().clone())?;

    let scope = vm.new_scope_with_builtins();
    scope
        .globals
        .set_item("__name__", vm.ctx.new_str("__main__").into(), vm)?;
    for (name, module) in bindings {
        scope.globals.set_item(name.as_str(), module, vm)?;
    }
    Ok(scope)
}

/// Resolve every global binding in a throwaway interpreter.
///
/// Run once at startup so a misconfigured policy fails the service
/// immediately instead of failing every request.
pub fn preflight(policy: &Policy) -> Result<(), RenderError> {
    let interpreter = super::executor::build_interpreter();
    interpreter.enter(|vm| {
        crate::plotting::install(vm)
            .map_err(|_| RenderError::Config("plotting modules failed to initialize".to_owned()))?;
        for binding in policy.global_bindings() {
            resolve_module(vm, &binding.module).map_err(|_| {
                RenderError::Config(format!(
                    "global binding '{}' -> '{}' cannot be resolved",
                    binding.name, binding.module
                ))
            })?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_builtins_cover_plotting_needs() {
        for name in ["print", "len", "range", "min", "max", "enumerate", "zip"] {
            assert!(is_safe_builtin(name), "{name} should be safe");
        }
    }

    #[test]
    fn test_dangerous_builtins_are_pruned() {
        for name in [
            "open",
            "exec",
            "eval",
            "compile",
            "input",
            "__import__",
            "getattr",
            "globals",
            "vars",
            "breakpoint",
        ] {
            assert!(!is_safe_builtin(name), "{name} must not be safe");
        }
    }

    #[test]
    fn test_exception_types_survive_pruning() {
        for name in [
            "ValueError",
            "ZeroDivisionError",
            "Exception",
            "BaseException",
            "StopIteration",
            "DeprecationWarning",
        ] {
            assert!(is_safe_builtin(name), "{name} should survive");
        }
    }

    #[test]
    fn test_preflight_rejects_unresolvable_binding() {
        let policy = Policy::empty().bind("x", "definitely_not_a_module");
        let result = preflight(&policy);
        assert!(matches!(result, Err(RenderError::Config(_))));
    }

    #[test]
    fn test_preflight_accepts_default_policy() {
        assert!(preflight(&Policy::default()).is_ok());
    }
}
