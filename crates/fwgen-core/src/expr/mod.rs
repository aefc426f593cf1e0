//! Formula language.
//!
//! A formula is a short whitespace-separated expression over integers,
//! booleans, quoted text and path references into the component tree:
//!
//! ```text
//! /layout/body.size + 0x20
//! parent/mode.value == 2 ? 0x1000 : 0x800
//! '{index}' == '0' and /settings/secure.value
//! ```
//!
//! The evaluator does not know about components. Path references are handed
//! to a [`Scope`], which the layout engine implements over its tree.

mod eval;
mod lexer;

pub use lexer::{Token, tokenize};

use crate::error::{Error, Result};
use crate::value::Value;

/// Resolves the references a formula makes.
pub trait Scope {
    /// Resolves a path reference such as `/layout/header.size` to a value.
    fn resolve(&mut self, path: &str) -> Result<Value>;

    /// Index of the `depth`-th enclosing table row; `0` is the nearest.
    fn row_index(&self, depth: usize) -> Option<usize>;
}

/// Replaces `{index}` and `{parent_index}` with the enclosing row indices.
pub fn substitute(formula: &str, scope: &dyn Scope) -> Result<String> {
    let mut text = formula.to_string();
    for (placeholder, depth) in [("{parent_index}", 1), ("{index}", 0)] {
        if text.contains(placeholder) {
            let index = scope.row_index(depth).ok_or_else(|| {
                Error::formula(formula, format!("{placeholder} used outside a table row"))
            })?;
            text = text.replace(placeholder, &index.to_string());
        }
    }
    Ok(text)
}

/// Evaluates `formula` against `scope`.
pub fn evaluate(formula: &str, scope: &mut dyn Scope) -> Result<Value> {
    let text = substitute(formula, scope)?;
    let tokens = tokenize(&text).map_err(|e| Error::formula(formula, e))?;
    eval::Evaluator::new(formula, scope).eval(&tokens)
}

/// Evaluates `formula` and coerces the result to an integer.
pub fn evaluate_int(formula: &str, scope: &mut dyn Scope) -> Result<i128> {
    evaluate(formula, scope)?
        .as_int()
        .map_err(|e| Error::formula(formula, e))
}

/// Checks that `formula` tokenizes, without evaluating it.
pub fn check(formula: &str) -> Result<()> {
    let tokens = tokenize(formula).map_err(|e| Error::formula(formula, e))?;
    if tokens.is_empty() {
        return Err(Error::formula(formula, "empty expression"));
    }
    Ok(())
}
