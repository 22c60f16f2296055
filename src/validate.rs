//! Static validation of candidate scripts against a [`Policy`].
//!
//! Validation runs before any execution and short-circuits on the first
//! violation, in a fixed order: forbidden-token scan, parse, import analysis.
//! Token scanning catches constructs that are not expressible as imports
//! (direct calls to dangerous built-ins); tree-based import analysis is
//! required because a substring scan alone is trivially evaded by aliasing or
//! whitespace tricks.

use std::sync::Arc;

use rustpython_parser::{ast, Parse};

use crate::error::RenderError;
use crate::policy::Policy;

/// A reason to reject a script, with the offending detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A forbidden token occurs somewhere in the script text.
    ForbiddenToken(String),
    /// The script does not parse.
    SyntaxInvalid(String),
    /// The script imports a module outside the allow-list.
    UnauthorizedModule(String),
}

impl Violation {
    /// The offending token, parser message, or module name.
    pub fn detail(&self) -> &str {
        match self {
            Violation::ForbiddenToken(s)
            | Violation::SyntaxInvalid(s)
            | Violation::UnauthorizedModule(s) => s,
        }
    }
}

/// Accept/reject verdict for one script, produced once and never recomputed
/// after execution starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationVerdict {
    violation: Option<Violation>,
}

impl ValidationVerdict {
    fn accept() -> Self {
        Self { violation: None }
    }

    fn reject(violation: Violation) -> Self {
        Self {
            violation: Some(violation),
        }
    }

    /// Whether the script may proceed to execution.
    pub fn accepted(&self) -> bool {
        self.violation.is_none()
    }

    /// The violation that caused rejection, if any.
    pub fn violation(&self) -> Option<&Violation> {
        self.violation.as_ref()
    }

    /// Convert to a `Result`, mapping the violation to its error kind.
    pub fn into_result(self) -> crate::error::Result<()> {
        match self.violation {
            None => Ok(()),
            Some(Violation::ForbiddenToken(t)) => Err(RenderError::ForbiddenToken(t)),
            Some(Violation::SyntaxInvalid(m)) => Err(RenderError::SyntaxInvalid(m)),
            Some(Violation::UnauthorizedModule(m)) => Err(RenderError::UnauthorizedModule(m)),
        }
    }
}

/// Component rejecting scripts that violate [`Policy`] before any execution
/// occurs.
#[derive(Debug, Clone)]
pub struct Validator {
    policy: Arc<Policy>,
}

impl Validator {
    /// Create a validator over a shared policy.
    pub fn new(policy: Arc<Policy>) -> Self {
        Self { policy }
    }

    /// Inspect `source` against the policy and produce a verdict.
    pub fn validate(&self, source: &str) -> ValidationVerdict {
        // 1. Case-insensitive substring scan, anywhere in the text.
        let lowered = source.to_lowercase();
        for token in self.policy.forbidden_tokens() {
            if lowered.contains(token.as_str()) {
                return ValidationVerdict::reject(Violation::ForbiddenToken(token.clone()));
            }
        }

        // 2. Parse. A script that fails to parse cannot be analyzed, so it
        // must never execute.
        let suite = match ast::Suite::parse(source, "<script>") {
            Ok(suite) => suite,
            Err(e) => {
                return ValidationVerdict::reject(Violation::SyntaxInvalid(e.to_string()));
            }
        };

        // 3. Import analysis over the whole tree, including nested bodies.
        if let Some(violation) = self.check_imports(&suite) {
            return ValidationVerdict::reject(violation);
        }

        ValidationVerdict::accept()
    }

    fn check_imports(&self, stmts: &[ast::Stmt]) -> Option<Violation> {
        for stmt in stmts {
            match stmt {
                ast::Stmt::Import(import) => {
                    for alias in &import.names {
                        if let Some(v) = self.check_module_name(alias.name.as_str()) {
                            return Some(v);
                        }
                    }
                }
                ast::Stmt::ImportFrom(import) => {
                    // Only the module gates access; the imported symbol names
                    // are irrelevant and must not be consulted, or
                    // `from os import path` style imports would slip through.
                    let level = import.level.as_ref().map_or(0, |l| l.to_u32());
                    if level > 0 {
                        let detail = import
                            .module
                            .as_ref()
                            .map(|m| format!(".{}", m.as_str()))
                            .unwrap_or_else(|| ".".to_string());
                        return Some(Violation::UnauthorizedModule(detail));
                    }
                    match &import.module {
                        Some(module) => {
                            if let Some(v) = self.check_module_name(module.as_str()) {
                                return Some(v);
                            }
                        }
                        None => {
                            return Some(Violation::UnauthorizedModule(".".to_string()));
                        }
                    }
                }
                ast::Stmt::FunctionDef(f) => {
                    if let Some(v) = self.check_imports(&f.body) {
                        return Some(v);
                    }
                }
                ast::Stmt::AsyncFunctionDef(f) => {
                    if let Some(v) = self.check_imports(&f.body) {
                        return Some(v);
                    }
                }
                ast::Stmt::ClassDef(c) => {
                    if let Some(v) = self.check_imports(&c.body) {
                        return Some(v);
                    }
                }
                ast::Stmt::For(s) => {
                    if let Some(v) = self
                        .check_imports(&s.body)
                        .or_else(|| self.check_imports(&s.orelse))
                    {
                        return Some(v);
                    }
                }
                ast::Stmt::AsyncFor(s) => {
                    if let Some(v) = self
                        .check_imports(&s.body)
                        .or_else(|| self.check_imports(&s.orelse))
                    {
                        return Some(v);
                    }
                }
                ast::Stmt::While(s) => {
                    if let Some(v) = self
                        .check_imports(&s.body)
                        .or_else(|| self.check_imports(&s.orelse))
                    {
                        return Some(v);
                    }
                }
                ast::Stmt::If(s) => {
                    if let Some(v) = self
                        .check_imports(&s.body)
                        .or_else(|| self.check_imports(&s.orelse))
                    {
                        return Some(v);
                    }
                }
                ast::Stmt::With(s) => {
                    if let Some(v) = self.check_imports(&s.body) {
                        return Some(v);
                    }
                }
                ast::Stmt::AsyncWith(s) => {
                    if let Some(v) = self.check_imports(&s.body) {
                        return Some(v);
                    }
                }
                ast::Stmt::Try(s) => {
                    if let Some(v) = self
                        .check_imports(&s.body)
                        .or_else(|| self.check_imports(&s.orelse))
                        .or_else(|| self.check_imports(&s.finalbody))
                    {
                        return Some(v);
                    }
                    for handler in &s.handlers {
                        let ast::ExceptHandler::ExceptHandler(h) = handler;
                        if let Some(v) = self.check_imports(&h.body) {
                            return Some(v);
                        }
                    }
                }
                ast::Stmt::Match(s) => {
                    for case in &s.cases {
                        if let Some(v) = self.check_imports(&case.body) {
                            return Some(v);
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Extract the top-level module name (before the first dot) and check it
    /// against the allow set.
    fn check_module_name(&self, dotted: &str) -> Option<Violation> {
        let top_level = dotted.split('.').next().unwrap_or(dotted);
        if self.policy.is_module_allowed(top_level) {
            None
        } else {
            Some(Violation::UnauthorizedModule(top_level.to_string()))
        }
    }
}
