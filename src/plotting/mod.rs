//! Native plotting modules exposed to sandboxed scripts.
//!
//! Scripts see a `matplotlib.pyplot` surface; the functions record into the
//! thread-local [`figure::Figure`] and the save call rasterizes it. Text
//! properties (title, labels) are accepted and recorded so scripts using
//! them run unmodified, but are not rasterized.

pub(crate) mod figure;

use num_traits::ToPrimitive;
use rustpython_vm::builtins::{PyFloat, PyInt, PyModule, PyStr};
use rustpython_vm::{PyObjectRef, PyRef, PyResult, VirtualMachine};

/// Construct the `matplotlib` module object.
pub(crate) fn make_matplotlib_module(vm: &VirtualMachine) -> PyRef<PyModule> {
    matplotlib::make_module(vm)
}

/// Construct the `matplotlib.pyplot` module object.
pub(crate) fn make_pyplot_module(vm: &VirtualMachine) -> PyRef<PyModule> {
    pyplot::make_module(vm)
}

/// Wire `matplotlib.pyplot` into a freshly built interpreter.
///
/// The import machinery only finds native modules under top-level names, so
/// the submodule is attached as an attribute and registered in `sys.modules`
/// directly.
pub(crate) fn install(vm: &VirtualMachine) -> PyResult<()> {
    let matplotlib = vm.import("matplotlib", 0)?;
    let pyplot: PyObjectRef = make_pyplot_module(vm).into();
    matplotlib.set_attr("pyplot", pyplot.clone(), vm)?;
    let modules = vm.sys_module.get_attr("modules", vm)?;
    modules.set_item("matplotlib.pyplot", pyplot, vm)?;
    Ok(())
}

/// Coerce a Python number to f64.
fn to_f64(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<f64> {
    if let Some(f) = obj.payload::<PyFloat>() {
        return Ok(f.to_f64());
    }
    if let Some(i) = obj.payload::<PyInt>() {
        if let Some(value) = i.as_bigint().to_f64() {
            return Ok(value);
        }
    }
    if let Ok(converted) = vm.call_method(obj, "__float__", ()) {
        if let Some(f) = converted.payload::<PyFloat>() {
            return Ok(f.to_f64());
        }
    }
    Err(vm.new_type_error("expected a number".to_owned()))
}

/// Coerce a Python sequence to a vector of f64.
fn to_floats(obj: &PyObjectRef, vm: &VirtualMachine) -> PyResult<Vec<f64>> {
    vm.extract_elements_with(obj, |element| to_f64(&element, vm))
}

/// Zip two Python sequences into (x, y) points.
fn to_points(
    xs: &PyObjectRef,
    ys: &PyObjectRef,
    vm: &VirtualMachine,
) -> PyResult<Vec<(f64, f64)>> {
    let xs = to_floats(xs, vm)?;
    let ys = to_floats(ys, vm)?;
    if xs.len() != ys.len() {
        return Err(vm.new_value_error(format!(
            "x and y must have the same length ({} vs {})",
            xs.len(),
            ys.len()
        )));
    }
    Ok(xs.into_iter().zip(ys).collect())
}

fn as_str(obj: &PyObjectRef) -> Option<&str> {
    obj.payload::<PyStr>().map(|s| s.as_str())
}

#[rustpython_vm::pymodule]
mod matplotlib {
    use rustpython_vm::function::FuncArgs;
    use rustpython_vm::PyResult;

    /// Backend selection is meaningless here; accepted for compatibility.
    #[pyfunction(name = "use")]
    fn use_backend(_args: FuncArgs) -> PyResult<()> {
        Ok(())
    }
}

#[rustpython_vm::pymodule]
mod pyplot {
    use rustpython_vm::builtins::PyDictRef;
    use rustpython_vm::function::FuncArgs;
    use rustpython_vm::{PyObjectRef, PyResult, VirtualMachine};

    use super::figure;
    use super::{as_str, to_f64, to_floats, to_points};

    /// Per-figure style options; scripts may read and write keys freely.
    #[pyattr]
    #[allow(non_snake_case)]
    fn rcParams(vm: &VirtualMachine) -> PyDictRef {
        vm.ctx.new_dict()
    }

    /// Start a fresh figure, honoring a `figsize=(w, h)` keyword in inches.
    #[pyfunction]
    fn figure(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        figure::reset();
        if let Some(figsize) = args.kwargs.get("figsize") {
            let dims = to_floats(figsize, vm)?;
            if dims.len() == 2 {
                figure::with_current(|fig| fig.set_size_inches(dims[0], dims[1]));
            }
        }
        Ok(())
    }

    /// Add line series. Accepts `plot(y)`, `plot(x, y)`, and repeated
    /// `x, y` groups; format strings are accepted and ignored.
    #[pyfunction]
    fn plot(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        let positional: Vec<&PyObjectRef> = args
            .args
            .iter()
            .filter(|obj| as_str(obj).is_none())
            .collect();

        if positional.len() == 1 {
            let ys = to_floats(positional[0], vm)?;
            let points = ys
                .into_iter()
                .enumerate()
                .map(|(i, y)| (i as f64, y))
                .collect();
            figure::with_current(|fig| fig.add_series(points, false));
            return Ok(());
        }

        for pair in positional.chunks(2) {
            if let &[xs, ys] = pair {
                let points = to_points(xs, ys, vm)?;
                figure::with_current(|fig| fig.add_series(points, false));
            }
        }
        Ok(())
    }

    /// Add a scatter series.
    #[pyfunction]
    fn scatter(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        let (xs, ys) = match (args.args.first(), args.args.get(1)) {
            (Some(xs), Some(ys)) => (xs, ys),
            _ => return Err(vm.new_type_error("scatter() requires x and y".to_owned())),
        };
        let points = to_points(xs, ys, vm)?;
        figure::with_current(|fig| fig.add_series(points, true));
        Ok(())
    }

    #[pyfunction]
    fn title(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        if let Some(text) = args.args.first() {
            let text = text.str(vm)?.as_str().to_owned();
            figure::with_current(|fig| fig.set_title(text));
        }
        Ok(())
    }

    #[pyfunction]
    fn xlabel(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        if let Some(text) = args.args.first() {
            let text = text.str(vm)?.as_str().to_owned();
            figure::with_current(|fig| fig.set_xlabel(text));
        }
        Ok(())
    }

    #[pyfunction]
    fn ylabel(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        if let Some(text) = args.args.first() {
            let text = text.str(vm)?.as_str().to_owned();
            figure::with_current(|fig| fig.set_ylabel(text));
        }
        Ok(())
    }

    /// Toggle the grid; `grid()` with no argument turns it on.
    #[pyfunction]
    fn grid(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        let on = match args.args.first() {
            Some(obj) => obj.clone().try_to_bool(vm)?,
            None => true,
        };
        figure::with_current(|fig| fig.set_grid(on));
        Ok(())
    }

    /// `axis('equal')`, `axis('off')`, or `axis([x0, x1, y0, y1])`.
    #[pyfunction]
    fn axis(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        let Some(arg) = args.args.first() else {
            return Ok(());
        };
        if let Some(mode) = as_str(arg) {
            match mode {
                "equal" => figure::with_current(|fig| fig.set_axis_equal()),
                "off" => figure::with_current(|fig| fig.set_axis_off()),
                _ => {}
            }
            return Ok(());
        }
        let limits = to_floats(arg, vm)?;
        if limits.len() == 4 {
            figure::with_current(|fig| {
                fig.set_xlim(limits[0], limits[1]);
                fig.set_ylim(limits[2], limits[3]);
            });
        }
        Ok(())
    }

    /// `xlim(low, high)` or `xlim((low, high))`.
    #[pyfunction]
    fn xlim(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        if let Some((low, high)) = extract_limits(&args, vm)? {
            figure::with_current(|fig| fig.set_xlim(low, high));
        }
        Ok(())
    }

    /// `ylim(low, high)` or `ylim((low, high))`.
    #[pyfunction]
    fn ylim(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        if let Some((low, high)) = extract_limits(&args, vm)? {
            figure::with_current(|fig| fig.set_ylim(low, high));
        }
        Ok(())
    }

    fn extract_limits(args: &FuncArgs, vm: &VirtualMachine) -> PyResult<Option<(f64, f64)>> {
        match (args.args.first(), args.args.get(1)) {
            (Some(low), Some(high)) => Ok(Some((to_f64(low, vm)?, to_f64(high, vm)?))),
            (Some(pair), None) => {
                let limits = to_floats(pair, vm)?;
                if limits.len() == 2 {
                    Ok(Some((limits[0], limits[1])))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    /// Legends are not rasterized; accepted for compatibility.
    #[pyfunction]
    fn legend(_args: FuncArgs) -> PyResult<()> {
        Ok(())
    }

    /// There is no interactive display; accepted for compatibility.
    #[pyfunction]
    fn show(_args: FuncArgs) -> PyResult<()> {
        Ok(())
    }

    #[pyfunction]
    fn tight_layout(_args: FuncArgs) -> PyResult<()> {
        Ok(())
    }

    /// Discard the current figure.
    #[pyfunction]
    fn close(_args: FuncArgs) -> PyResult<()> {
        figure::reset();
        Ok(())
    }

    /// Rasterize the current figure as PNG.
    ///
    /// The sink, not the script, decides where the image lands: when a run
    /// has a bound output path, the path argument is accepted and ignored,
    /// so even an aliased reference to this function cannot pick a
    /// destination.
    #[pyfunction]
    fn savefig(args: FuncArgs, vm: &VirtualMachine) -> PyResult<()> {
        if figure::run_cancelled() {
            return Err(vm.new_runtime_error("execution budget exhausted".to_owned()));
        }

        let target = match figure::output_path() {
            Some(path) => path,
            None => args
                .args
                .first()
                .and_then(|obj| as_str(obj).map(std::path::PathBuf::from))
                .ok_or_else(|| {
                    vm.new_type_error("savefig() requires a path string".to_owned())
                })?,
        };

        figure::with_current(|fig| fig.render_to(&target))
            .map_err(|e| vm.new_runtime_error(format!("failed to write image: {e}")))?;

        if figure::run_cancelled() {
            // The run was abandoned while rendering; its slot is already
            // released, so the file just written must not outlive the run.
            let _ = std::fs::remove_file(&target);
            return Err(vm.new_runtime_error("execution budget exhausted".to_owned()));
        }
        Ok(())
    }
}
