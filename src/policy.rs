//! The immutable declaration of what a generated script may import, must not
//! contain, and can call.
//!
//! A [`Policy`] is pure configuration: it holds no behavior, only the data the
//! validator and the namespace builder act on. It is loaded once at startup
//! and shared read-only across requests.

use std::collections::HashSet;

/// A name the sandbox namespace exposes, bound to the module it resolves to.
///
/// Bindings are resolved once per run by importing `module` inside the
/// interpreter and injecting the module object by reference, so a script can
/// never substitute its own loader to reach disallowed code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalBinding {
    /// Identifier visible inside the execution namespace (e.g. `plt`).
    pub name: String,
    /// Dotted module path it resolves to (e.g. `matplotlib.pyplot`).
    pub module: String,
}

impl GlobalBinding {
    /// Create a binding from an identifier and the module it resolves to.
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
        }
    }
}

/// Static declaration of allowed modules, forbidden tokens, and the fixed
/// bindings visible to executed code.
#[derive(Debug, Clone)]
pub struct Policy {
    allowed_modules: HashSet<String>,
    /// Stored lowercase; matched case-insensitively as substrings.
    forbidden_tokens: Vec<String>,
    global_bindings: Vec<GlobalBinding>,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            allowed_modules: ["matplotlib", "math"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            forbidden_tokens: [
                "exec",
                "eval",
                "subprocess",
                "system",
                "import os",
                "__import__",
                "open(",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            global_bindings: vec![
                GlobalBinding::new("matplotlib", "matplotlib"),
                GlobalBinding::new("plt", "matplotlib.pyplot"),
                GlobalBinding::new("math", "math"),
            ],
        }
    }
}

impl Policy {
    /// An empty policy: nothing allowed, nothing forbidden, nothing bound.
    pub fn empty() -> Self {
        Self {
            allowed_modules: HashSet::new(),
            forbidden_tokens: Vec::new(),
            global_bindings: Vec::new(),
        }
    }

    /// Add a top-level module name scripts may import.
    pub fn allow_module(mut self, name: impl Into<String>) -> Self {
        self.allowed_modules.insert(name.into());
        self
    }

    /// Add a substring that must never appear in script text.
    pub fn forbid_token(mut self, token: impl Into<String>) -> Self {
        self.forbidden_tokens.push(token.into().to_lowercase());
        self
    }

    /// Add an identifier pre-bound inside the execution namespace.
    pub fn bind(mut self, name: impl Into<String>, module: impl Into<String>) -> Self {
        self.global_bindings.push(GlobalBinding::new(name, module));
        self
    }

    /// Top-level module names scripts may import.
    pub fn allowed_modules(&self) -> &HashSet<String> {
        &self.allowed_modules
    }

    /// Check a top-level module name against the allow set.
    pub fn is_module_allowed(&self, top_level: &str) -> bool {
        self.allowed_modules.contains(top_level)
    }

    /// Lowercased substrings that must never appear in script text.
    pub fn forbidden_tokens(&self) -> &[String] {
        &self.forbidden_tokens
    }

    /// Identifiers that exist inside the execution namespace, and nothing
    /// beyond them.
    pub fn global_bindings(&self) -> &[GlobalBinding] {
        &self.global_bindings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_allows_plotting_modules() {
        let policy = Policy::default();
        assert!(policy.is_module_allowed("matplotlib"));
        assert!(policy.is_module_allowed("math"));
        assert!(!policy.is_module_allowed("os"));
        assert!(!policy.is_module_allowed("subprocess"));
    }

    #[test]
    fn test_default_forbids_dangerous_tokens() {
        let policy = Policy::default();
        for token in ["exec", "eval", "subprocess", "system", "import os"] {
            assert!(
                policy.forbidden_tokens().iter().any(|t| t == token),
                "missing token {token}"
            );
        }
    }

    #[test]
    fn test_default_bindings_cover_plotting_surface() {
        let policy = Policy::default();
        let names: Vec<&str> = policy
            .global_bindings()
            .iter()
            .map(|b| b.name.as_str())
            .collect();
        assert!(names.contains(&"plt"));
        assert!(names.contains(&"matplotlib"));
        assert!(names.contains(&"math"));
    }

    #[test]
    fn test_builder_methods() {
        let policy = Policy::empty()
            .allow_module("math")
            .forbid_token("EXEC")
            .bind("m", "math");

        assert!(policy.is_module_allowed("math"));
        // Tokens are normalized to lowercase at insertion.
        assert_eq!(policy.forbidden_tokens(), &["exec".to_string()]);
        assert_eq!(policy.global_bindings()[0].module, "math");
    }
}
