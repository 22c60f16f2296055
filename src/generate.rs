//! The `ScriptGenerator` trait, abstracting over code-generation backends.
//!
//! The core treats code generation as a capability it invokes, not one it
//! implements: a provider turns a drawing description into plotting source
//! text and reports failures as typed values, so the caller dispatches
//! retry-vs-fatal by type rather than by inspecting error strings.

use async_trait::async_trait;
use thiserror::Error;

/// Failure modes of a code-generation backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerateError {
    /// A retryable server-side condition (overload, brief outage). The
    /// caller backs off and retries a bounded number of times.
    #[error("transient generator failure: {0}")]
    Transient(String),

    /// A non-retryable rate-limit condition. The caller must not retry
    /// automatically.
    #[error("generator quota exceeded")]
    QuotaExceeded,
}

/// Abstraction over code-generation backends.
///
/// Each provider turns a natural-language drawing description into plotting
/// source text. The returned text is untrusted: it goes through validation
/// and the sandbox like any other script.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    /// Generate plotting source for the given description.
    async fn generate(&self, description: &str) -> Result<String, GenerateError>;

    /// Human-readable description of the provider and model.
    ///
    /// Used in status output, e.g. `"gemini (gemini-2.0-flash)"`.
    fn description(&self) -> String;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time verification that `ScriptGenerator` is object-safe.
    #[test]
    fn test_script_generator_is_object_safe() {
        fn _assert_object_safe(_: &dyn ScriptGenerator) {}
    }

    #[test]
    fn test_generate_error_kinds_are_distinct() {
        let transient = GenerateError::Transient("server overloaded".into());
        assert_ne!(transient, GenerateError::QuotaExceeded);
        assert!(transient.to_string().contains("server overloaded"));
    }
}
