//! Sandbox module containing all execution-related components.

pub mod artifact;
pub mod config;
pub mod executor;
pub mod io;
pub(crate) mod namespace;
pub(crate) mod rewrite;
