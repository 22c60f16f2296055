//! In-memory figure model and PNG rendering.
//!
//! The plotting surface exposed to scripts records draw commands into a
//! per-thread [`Figure`]; nothing is rasterized until the save call runs.
//! Rendering draws in raw pixel coordinates on a bitmap backend so the
//! output never depends on host fonts (text properties are recorded but not
//! rasterized).

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use plotters::prelude::*;

/// Pixels per figure-size inch.
const DPI: f64 = 100.0;
/// Margin around the plot area, in pixels.
const MARGIN: i32 = 40;
/// Grid divisions per axis.
const GRID_DIVISIONS: i32 = 10;

/// Line colors cycled per series, matching the conventional plotting order.
const PALETTE: &[RGBColor] = &[
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
];

/// One plotted data series.
#[derive(Debug, Clone)]
pub(crate) struct Series {
    pub points: Vec<(f64, f64)>,
    /// Scatter series draw markers only; line series draw a polyline.
    pub scatter: bool,
}

/// The figure being built by the current execution.
#[derive(Debug, Clone)]
pub(crate) struct Figure {
    width: u32,
    height: u32,
    series: Vec<Series>,
    grid: bool,
    axis_equal: bool,
    axis_off: bool,
    xlim: Option<(f64, f64)>,
    ylim: Option<(f64, f64)>,
    title: Option<String>,
    xlabel: Option<String>,
    ylabel: Option<String>,
}

impl Default for Figure {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            series: Vec::new(),
            grid: false,
            axis_equal: false,
            axis_off: false,
            xlim: None,
            ylim: None,
            title: None,
            xlabel: None,
            ylabel: None,
        }
    }
}

/// Per-run state the script cannot reach: the private output path and the
/// abandonment flag. Unlike the figure itself, this survives `plt.figure()`
/// and `plt.close()` resets.
#[derive(Default)]
struct RunContext {
    output: Option<PathBuf>,
    cancelled: Option<Arc<AtomicBool>>,
}

thread_local! {
    static CURRENT: RefCell<Figure> = RefCell::new(Figure::default());
    static RUN: RefCell<RunContext> = RefCell::new(RunContext::default());
}

/// Bind the private output path and cancellation flag for the run starting
/// on this thread, discarding any figure state from a previous run.
pub(crate) fn begin_run(output: PathBuf, cancelled: Arc<AtomicBool>) {
    reset();
    RUN.with(|run| {
        *run.borrow_mut() = RunContext {
            output: Some(output),
            cancelled: Some(cancelled),
        };
    });
}

/// The private output path of the current run, if one is bound.
pub(crate) fn output_path() -> Option<PathBuf> {
    RUN.with(|run| run.borrow().output.clone())
}

/// Whether the current run has been abandoned by its caller.
pub(crate) fn run_cancelled() -> bool {
    RUN.with(|run| {
        run.borrow()
            .cancelled
            .as_ref()
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    })
}

/// Replace the current figure with a fresh one.
///
/// Executions run on reused worker threads, so state from an earlier script
/// must never bleed into the next run.
pub(crate) fn reset() {
    CURRENT.with(|current| *current.borrow_mut() = Figure::default());
}

/// Run a closure against the current thread's figure.
pub(crate) fn with_current<R>(f: impl FnOnce(&mut Figure) -> R) -> R {
    CURRENT.with(|current| f(&mut current.borrow_mut()))
}

impl Figure {
    /// Set the canvas size from a figsize in inches.
    pub(crate) fn set_size_inches(&mut self, width: f64, height: f64) {
        if width.is_finite() && width > 0.0 {
            self.width = (width * DPI).round() as u32;
        }
        if height.is_finite() && height > 0.0 {
            self.height = (height * DPI).round() as u32;
        }
    }

    pub(crate) fn add_series(&mut self, points: Vec<(f64, f64)>, scatter: bool) {
        self.series.push(Series { points, scatter });
    }

    pub(crate) fn set_grid(&mut self, on: bool) {
        self.grid = on;
    }

    pub(crate) fn set_axis_equal(&mut self) {
        self.axis_equal = true;
    }

    pub(crate) fn set_axis_off(&mut self) {
        self.axis_off = true;
    }

    pub(crate) fn set_xlim(&mut self, low: f64, high: f64) {
        self.xlim = Some((low, high));
    }

    pub(crate) fn set_ylim(&mut self, low: f64, high: f64) {
        self.ylim = Some((low, high));
    }

    pub(crate) fn set_title(&mut self, text: String) {
        self.title = Some(text);
    }

    pub(crate) fn set_xlabel(&mut self, text: String) {
        self.xlabel = Some(text);
    }

    pub(crate) fn set_ylabel(&mut self, text: String) {
        self.ylabel = Some(text);
    }

    /// Data bounds across all series, widened for degenerate spans and
    /// overridden by explicit axis limits.
    fn bounds(&self) -> (f64, f64, f64, f64) {
        let mut x_min = f64::INFINITY;
        let mut x_max = f64::NEG_INFINITY;
        let mut y_min = f64::INFINITY;
        let mut y_max = f64::NEG_INFINITY;

        for series in &self.series {
            for &(x, y) in &series.points {
                if x.is_finite() {
                    x_min = x_min.min(x);
                    x_max = x_max.max(x);
                }
                if y.is_finite() {
                    y_min = y_min.min(y);
                    y_max = y_max.max(y);
                }
            }
        }

        if !x_min.is_finite() {
            x_min = 0.0;
            x_max = 1.0;
        }
        if !y_min.is_finite() {
            y_min = 0.0;
            y_max = 1.0;
        }
        if (x_max - x_min).abs() < f64::EPSILON {
            x_min -= 0.5;
            x_max += 0.5;
        }
        if (y_max - y_min).abs() < f64::EPSILON {
            y_min -= 0.5;
            y_max += 0.5;
        }

        if let Some((low, high)) = self.xlim {
            x_min = low;
            x_max = high;
        }
        if let Some((low, high)) = self.ylim {
            y_min = low;
            y_max = high;
        }

        let (mut x_min, mut x_max, mut y_min, mut y_max) = (x_min, x_max, y_min, y_max);
        if self.axis_equal {
            // Expand the narrower range so a data unit spans the same number
            // of pixels on both axes.
            let plot_w = (self.width as i32 - 2 * MARGIN).max(1) as f64;
            let plot_h = (self.height as i32 - 2 * MARGIN).max(1) as f64;
            let x_scale = (x_max - x_min) / plot_w;
            let y_scale = (y_max - y_min) / plot_h;
            let scale = x_scale.max(y_scale);
            let x_mid = (x_min + x_max) / 2.0;
            let y_mid = (y_min + y_max) / 2.0;
            x_min = x_mid - scale * plot_w / 2.0;
            x_max = x_mid + scale * plot_w / 2.0;
            y_min = y_mid - scale * plot_h / 2.0;
            y_max = y_mid + scale * plot_h / 2.0;
        }

        (x_min, x_max, y_min, y_max)
    }

    /// Rasterize the figure to a PNG file at `path`.
    pub(crate) fn render_to(&self, path: &Path) -> anyhow::Result<()> {
        let root = BitMapBackend::new(path, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let (x_min, x_max, y_min, y_max) = self.bounds();
        let left = MARGIN;
        let top = MARGIN;
        let right = self.width as i32 - MARGIN;
        let bottom = self.height as i32 - MARGIN;
        let plot_w = (right - left).max(1) as f64;
        let plot_h = (bottom - top).max(1) as f64;

        let to_px = |x: f64, y: f64| -> (i32, i32) {
            let px = left as f64 + (x - x_min) / (x_max - x_min) * plot_w;
            let py = top as f64 + (1.0 - (y - y_min) / (y_max - y_min)) * plot_h;
            (px.round() as i32, py.round() as i32)
        };

        if !self.axis_off {
            if self.grid {
                let grid_color = RGBColor(220, 220, 220);
                for i in 1..GRID_DIVISIONS {
                    let x = left + (right - left) * i / GRID_DIVISIONS;
                    let y = top + (bottom - top) * i / GRID_DIVISIONS;
                    root.draw(&PathElement::new(vec![(x, top), (x, bottom)], &grid_color))?;
                    root.draw(&PathElement::new(vec![(left, y), (right, y)], &grid_color))?;
                }
            }
            root.draw(&PathElement::new(
                vec![
                    (left, top),
                    (right, top),
                    (right, bottom),
                    (left, bottom),
                    (left, top),
                ],
                &BLACK,
            ))?;
        }

        for (index, series) in self.series.iter().enumerate() {
            let color = PALETTE[index % PALETTE.len()];
            let points: Vec<(i32, i32)> = series
                .points
                .iter()
                .filter(|(x, y)| x.is_finite() && y.is_finite())
                .map(|&(x, y)| to_px(x, y))
                .collect();

            if series.scatter {
                for point in points {
                    root.draw(&Circle::new(point, 3, color.filled()))?;
                }
            } else {
                root.draw(&PathElement::new(points, color.stroke_width(2)))?;
            }
        }

        root.present()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reset_clears_state() {
        with_current(|fig| {
            fig.add_series(vec![(0.0, 0.0), (1.0, 1.0)], false);
            fig.set_grid(true);
        });
        reset();
        with_current(|fig| {
            assert!(fig.series.is_empty());
            assert!(!fig.grid);
        });
    }

    #[test]
    fn test_run_context_survives_figure_reset() {
        let flag = Arc::new(AtomicBool::new(false));
        begin_run(PathBuf::from("/tmp/run-out.png"), Arc::clone(&flag));
        reset();
        assert_eq!(output_path(), Some(PathBuf::from("/tmp/run-out.png")));
        assert!(!run_cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(run_cancelled());
    }

    #[test]
    fn test_set_size_inches_scales_by_dpi() {
        let mut fig = Figure::default();
        fig.set_size_inches(8.0, 6.0);
        assert_eq!(fig.width, 800);
        assert_eq!(fig.height, 600);
    }

    #[test]
    fn test_set_size_inches_ignores_nonsense() {
        let mut fig = Figure::default();
        fig.set_size_inches(-1.0, f64::NAN);
        assert_eq!(fig.width, 640);
        assert_eq!(fig.height, 480);
    }

    #[test]
    fn test_bounds_widen_degenerate_spans() {
        let mut fig = Figure::default();
        fig.add_series(vec![(2.0, 3.0), (2.0, 3.0)], false);
        let (x_min, x_max, y_min, y_max) = fig.bounds();
        assert!(x_max > x_min);
        assert!(y_max > y_min);
    }

    #[test]
    fn test_bounds_default_for_empty_figure() {
        let fig = Figure::default();
        assert_eq!(fig.bounds(), (0.0, 1.0, 0.0, 1.0));
    }

    #[test]
    fn test_explicit_limits_override_data() {
        let mut fig = Figure::default();
        fig.add_series(vec![(0.0, 0.0), (100.0, 100.0)], false);
        fig.set_xlim(-5.0, 5.0);
        fig.set_ylim(-1.0, 1.0);
        let (x_min, x_max, y_min, y_max) = fig.bounds();
        assert_eq!((x_min, x_max), (-5.0, 5.0));
        assert_eq!((y_min, y_max), (-1.0, 1.0));
    }

    #[test]
    fn test_render_produces_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("figure.png");

        let mut fig = Figure::default();
        fig.add_series(vec![(0.0, 0.0), (1.0, 2.0), (2.0, 1.0)], false);
        fig.add_series(vec![(0.5, 0.5), (1.5, 1.5)], true);
        fig.set_grid(true);
        fig.render_to(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }

    #[test]
    fn test_render_axis_equal_circle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("circle.png");

        let mut fig = Figure::default();
        let points: Vec<(f64, f64)> = (0..=64)
            .map(|i| {
                let t = i as f64 / 64.0 * std::f64::consts::TAU;
                (t.cos(), t.sin())
            })
            .collect();
        fig.add_series(points, false);
        fig.set_axis_equal();
        fig.render_to(&path).unwrap();

        assert!(path.exists());
    }
}
