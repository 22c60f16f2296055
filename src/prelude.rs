//! Prelude module for convenient imports.

pub use crate::error::{RenderError, Result};
pub use crate::generate::{GenerateError, ScriptGenerator};
pub use crate::policy::Policy;
pub use crate::render::{Renderer, RetryPolicy};
pub use crate::sandbox::config::SandboxConfig;
pub use crate::validate::Validator;
