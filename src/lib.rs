//! # Plot Sandbox
//!
//! Validated, sandboxed execution of machine-generated plotting scripts.
//!
//! This crate takes untrusted Python plotting source (typically produced by a
//! code-generation model from a natural-language description), decides whether
//! it is safe to run, runs it inside a restricted per-request namespace in an
//! embedded RustPython interpreter, intercepts its single allowed side effect
//! (saving a figure) into a private temporary path, and returns the rendered
//! PNG bytes. It enforces:
//!
//! - **Static validation**: forbidden-token scanning plus AST-level import
//!   analysis against an allow-list, before any execution
//! - **Restricted namespace**: a whitelisted set of built-ins and pre-resolved
//!   module bindings; no filesystem, process, or import machinery access
//! - **Timeout protection**: a wall-clock budget enforced around execution
//! - **Guaranteed cleanup**: the temporary artifact is deleted on every exit
//!   path, success or failure
//!
//! ## Example
//!
//! ```rust,ignore
//! use plot_sandbox_rs::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let renderer = Renderer::new(
//!         Box::new(MyGenerator::new()),
//!         Policy::default(),
//!         SandboxConfig::default(),
//!     )?;
//!
//!     let png = renderer.render("a sine wave between 0 and 10").await?;
//!     assert!(png.starts_with(b"\x89PNG"));
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Security Model
//!
//! The sandbox restricts what a script can *name*, not what the process can
//! *do*: built-ins are pruned to a safe whitelist, `__import__` is replaced by
//! a lookup over modules resolved before the script runs, and the only
//! reachable modules are an embedded plotting module and RustPython's native
//! `math`. This is the restricted-namespace discipline of the system it
//! replaces, hardened with tree-based import analysis and a structural save
//! rewrite. It is best-effort, not an OS-level isolation boundary: a
//! sufficiently creative script confined to the permitted objects still shares
//! the host process.

pub mod backoff;
pub mod error;
pub mod generate;
pub mod policy;
pub mod prelude;
pub mod render;
pub mod sandbox;
pub mod validate;

pub(crate) mod plotting;

// Re-export main types at crate root for convenience
pub use error::{RenderError, Result};
pub use generate::{GenerateError, ScriptGenerator};
pub use policy::{GlobalBinding, Policy};
pub use render::{Renderer, RetryPolicy};
pub use sandbox::config::{SandboxConfig, SandboxConfigBuilder};
pub use sandbox::executor::{ExecutionReport, ScriptExecutor};
pub use validate::{ValidationVerdict, Validator, Violation};
