//! Structural redirection of save calls.
//!
//! The script must never control where its output lands, otherwise it could
//! overwrite arbitrary files. Every call to the save primitive is located in
//! the parsed syntax tree and its path argument is spliced out for the
//! private output path. Working on call nodes rather than on lines keeps the
//! rewrite robust to formatting variations a substring approach would miss.

use std::path::Path;

use rustpython_parser::ast::{self, Ranged};
use rustpython_parser::Parse;

use crate::error::{RenderError, Result};

/// A single text edit, applied back-to-front so earlier offsets stay valid.
enum Edit {
    /// Replace the byte range with the text.
    Replace(usize, usize, String),
    /// Insert the text at the byte offset.
    Insert(usize, String),
}

impl Edit {
    fn position(&self) -> usize {
        match self {
            Edit::Replace(start, _, _) => *start,
            Edit::Insert(at, _) => *at,
        }
    }
}

/// Rewrite every call to `save_call` in `source` so its path argument is
/// `output_path`. A script with no save call is returned unchanged; the
/// missing artifact is diagnosed after execution, not here.
pub(crate) fn redirect_save_calls(
    source: &str,
    output_path: &Path,
    save_call: &str,
) -> Result<String> {
    let suite = ast::Suite::parse(source, "<script>")
        .map_err(|e| RenderError::SyntaxInvalid(e.to_string()))?;

    let literal = python_string_literal(output_path);
    let mut edits = Vec::new();
    for stmt in &suite {
        walk_stmt(stmt, save_call, &literal, &mut edits);
    }

    if edits.is_empty() {
        return Ok(source.to_owned());
    }

    edits.sort_by_key(|e| std::cmp::Reverse(e.position()));
    let mut rewritten = source.to_owned();
    for edit in edits {
        match edit {
            Edit::Replace(start, end, text) => rewritten.replace_range(start..end, &text),
            Edit::Insert(at, text) => rewritten.insert_str(at, &text),
        }
    }
    Ok(rewritten)
}

/// Render a filesystem path as a Python string literal.
fn python_string_literal(path: &Path) -> String {
    let raw = path.to_string_lossy();
    if !raw.contains('"') && !raw.ends_with('\\') {
        format!("r\"{raw}\"")
    } else {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

/// Record the edit for one save call: replace the first positional argument,
/// or the `fname` keyword value, or insert a path into the argument list.
fn record_save_call(call: &ast::ExprCall, literal: &str, edits: &mut Vec<Edit>) {
    if let Some(first) = call.args.first() {
        let range = first.range();
        edits.push(Edit::Replace(
            usize::from(range.start()),
            usize::from(range.end()),
            literal.to_owned(),
        ));
        return;
    }

    if let Some(keyword) = call
        .keywords
        .iter()
        .find(|k| k.arg.as_ref().map(|a| a.as_str()) == Some("fname"))
    {
        let range = keyword.value.range();
        edits.push(Edit::Replace(
            usize::from(range.start()),
            usize::from(range.end()),
            literal.to_owned(),
        ));
        return;
    }

    if let Some(keyword) = call.keywords.first() {
        // Only keyword arguments: the path goes in front of them.
        edits.push(Edit::Insert(
            usize::from(keyword.range().start()),
            format!("{literal}, "),
        ));
    } else {
        // Empty argument list: insert just before the closing parenthesis.
        edits.push(Edit::Insert(
            usize::from(call.range().end()) - 1,
            literal.to_owned(),
        ));
    }
}

fn is_save_call(func: &ast::Expr, save_call: &str) -> bool {
    match func {
        ast::Expr::Attribute(attr) => attr.attr.as_str() == save_call,
        ast::Expr::Name(name) => name.id.as_str() == save_call,
        _ => false,
    }
}

fn walk_stmt(stmt: &ast::Stmt, save_call: &str, literal: &str, edits: &mut Vec<Edit>) {
    let walk_body = |body: &[ast::Stmt], edits: &mut Vec<Edit>| {
        for s in body {
            walk_stmt(s, save_call, literal, edits);
        }
    };

    match stmt {
        ast::Stmt::Expr(s) => walk_expr(&s.value, save_call, literal, edits),
        ast::Stmt::Assign(s) => {
            for target in &s.targets {
                walk_expr(target, save_call, literal, edits);
            }
            walk_expr(&s.value, save_call, literal, edits);
        }
        ast::Stmt::AugAssign(s) => {
            walk_expr(&s.target, save_call, literal, edits);
            walk_expr(&s.value, save_call, literal, edits);
        }
        ast::Stmt::AnnAssign(s) => {
            if let Some(value) = &s.value {
                walk_expr(value, save_call, literal, edits);
            }
        }
        ast::Stmt::Return(s) => {
            if let Some(value) = &s.value {
                walk_expr(value, save_call, literal, edits);
            }
        }
        ast::Stmt::Raise(s) => {
            if let Some(exc) = &s.exc {
                walk_expr(exc, save_call, literal, edits);
            }
        }
        ast::Stmt::Assert(s) => walk_expr(&s.test, save_call, literal, edits),
        ast::Stmt::For(s) => {
            walk_expr(&s.iter, save_call, literal, edits);
            walk_body(&s.body, edits);
            walk_body(&s.orelse, edits);
        }
        ast::Stmt::AsyncFor(s) => {
            walk_expr(&s.iter, save_call, literal, edits);
            walk_body(&s.body, edits);
            walk_body(&s.orelse, edits);
        }
        ast::Stmt::While(s) => {
            walk_expr(&s.test, save_call, literal, edits);
            walk_body(&s.body, edits);
            walk_body(&s.orelse, edits);
        }
        ast::Stmt::If(s) => {
            walk_expr(&s.test, save_call, literal, edits);
            walk_body(&s.body, edits);
            walk_body(&s.orelse, edits);
        }
        ast::Stmt::With(s) => {
            for item in &s.items {
                walk_expr(&item.context_expr, save_call, literal, edits);
            }
            walk_body(&s.body, edits);
        }
        ast::Stmt::AsyncWith(s) => {
            for item in &s.items {
                walk_expr(&item.context_expr, save_call, literal, edits);
            }
            walk_body(&s.body, edits);
        }
        ast::Stmt::Try(s) => {
            walk_body(&s.body, edits);
            for handler in &s.handlers {
                let ast::ExceptHandler::ExceptHandler(h) = handler;
                walk_body(&h.body, edits);
            }
            walk_body(&s.orelse, edits);
            walk_body(&s.finalbody, edits);
        }
        ast::Stmt::FunctionDef(s) => walk_body(&s.body, edits),
        ast::Stmt::AsyncFunctionDef(s) => walk_body(&s.body, edits),
        ast::Stmt::ClassDef(s) => walk_body(&s.body, edits),
        _ => {}
    }
}

fn walk_expr(expr: &ast::Expr, save_call: &str, literal: &str, edits: &mut Vec<Edit>) {
    match expr {
        ast::Expr::Call(call) => {
            if is_save_call(&call.func, save_call) {
                record_save_call(call, literal, edits);
            }
            walk_expr(&call.func, save_call, literal, edits);
            for arg in &call.args {
                walk_expr(arg, save_call, literal, edits);
            }
            for keyword in &call.keywords {
                walk_expr(&keyword.value, save_call, literal, edits);
            }
        }
        ast::Expr::BoolOp(e) => {
            for value in &e.values {
                walk_expr(value, save_call, literal, edits);
            }
        }
        ast::Expr::NamedExpr(e) => walk_expr(&e.value, save_call, literal, edits),
        ast::Expr::BinOp(e) => {
            walk_expr(&e.left, save_call, literal, edits);
            walk_expr(&e.right, save_call, literal, edits);
        }
        ast::Expr::UnaryOp(e) => walk_expr(&e.operand, save_call, literal, edits),
        ast::Expr::Lambda(e) => walk_expr(&e.body, save_call, literal, edits),
        ast::Expr::IfExp(e) => {
            walk_expr(&e.test, save_call, literal, edits);
            walk_expr(&e.body, save_call, literal, edits);
            walk_expr(&e.orelse, save_call, literal, edits);
        }
        ast::Expr::Dict(e) => {
            for key in e.keys.iter().flatten() {
                walk_expr(key, save_call, literal, edits);
            }
            for value in &e.values {
                walk_expr(value, save_call, literal, edits);
            }
        }
        ast::Expr::Set(e) => {
            for elt in &e.elts {
                walk_expr(elt, save_call, literal, edits);
            }
        }
        ast::Expr::ListComp(e) => {
            walk_expr(&e.elt, save_call, literal, edits);
            walk_comprehensions(&e.generators, save_call, literal, edits);
        }
        ast::Expr::SetComp(e) => {
            walk_expr(&e.elt, save_call, literal, edits);
            walk_comprehensions(&e.generators, save_call, literal, edits);
        }
        ast::Expr::DictComp(e) => {
            walk_expr(&e.key, save_call, literal, edits);
            walk_expr(&e.value, save_call, literal, edits);
            walk_comprehensions(&e.generators, save_call, literal, edits);
        }
        ast::Expr::GeneratorExp(e) => {
            walk_expr(&e.elt, save_call, literal, edits);
            walk_comprehensions(&e.generators, save_call, literal, edits);
        }
        ast::Expr::Compare(e) => {
            walk_expr(&e.left, save_call, literal, edits);
            for comparator in &e.comparators {
                walk_expr(comparator, save_call, literal, edits);
            }
        }
        ast::Expr::FormattedValue(e) => walk_expr(&e.value, save_call, literal, edits),
        ast::Expr::JoinedStr(e) => {
            for value in &e.values {
                walk_expr(value, save_call, literal, edits);
            }
        }
        ast::Expr::Attribute(e) => walk_expr(&e.value, save_call, literal, edits),
        ast::Expr::Subscript(e) => {
            walk_expr(&e.value, save_call, literal, edits);
            walk_expr(&e.slice, save_call, literal, edits);
        }
        ast::Expr::Starred(e) => walk_expr(&e.value, save_call, literal, edits),
        ast::Expr::List(e) => {
            for elt in &e.elts {
                walk_expr(elt, save_call, literal, edits);
            }
        }
        ast::Expr::Tuple(e) => {
            for elt in &e.elts {
                walk_expr(elt, save_call, literal, edits);
            }
        }
        ast::Expr::Slice(e) => {
            for part in [&e.lower, &e.upper, &e.step].into_iter().flatten() {
                walk_expr(part, save_call, literal, edits);
            }
        }
        _ => {}
    }
}

fn walk_comprehensions(
    generators: &[ast::Comprehension],
    save_call: &str,
    literal: &str,
    edits: &mut Vec<Edit>,
) {
    for generator in generators {
        walk_expr(&generator.iter, save_call, literal, edits);
        for cond in &generator.ifs {
            walk_expr(cond, save_call, literal, edits);
        }
    }
}
