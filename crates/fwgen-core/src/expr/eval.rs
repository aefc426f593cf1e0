//! Recursive evaluator over a flat token slice.
//!
//! There is no AST: each call finds the lowest-precedence operator at
//! parenthesis depth zero, splits the slice there and recurses into both
//! halves. Within one precedence level the split is taken at the last
//! occurrence, which makes every binary operator left-associative.

use super::Scope;
use super::lexer::Token;
use crate::error::{Error, Result};
use crate::value::{Value, parse_int_literal};

/// Binary operator levels, lowest precedence first.
const LEVELS: &[&[&str]] = &[
    &["or", "||"],
    &["and", "&&"],
    &["==", "!=", "<", "<=", ">", ">="],
    &["|"],
    &["^"],
    &["&"],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

const UNARY: &[&str] = &["not", "!", "~", "-"];

fn is_operator(word: &str) -> bool {
    word == "?" || word == ":" || UNARY.contains(&word) || LEVELS.iter().any(|l| l.contains(&word))
}

pub(crate) struct Evaluator<'a> {
    formula: &'a str,
    scope: &'a mut dyn Scope,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(formula: &'a str, scope: &'a mut dyn Scope) -> Self {
        Self { formula, scope }
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::formula(self.formula, message)
    }

    pub(crate) fn eval(&mut self, tokens: &[Token]) -> Result<Value> {
        let tokens = strip_parens(tokens);
        if tokens.is_empty() {
            return Err(self.error("empty expression"));
        }

        if let Some((question, colon)) = self.find_ternary(tokens)? {
            let cond = self.eval(&tokens[..question])?;
            return if cond.as_bool() {
                self.eval(&tokens[question + 1..colon])
            } else {
                self.eval(&tokens[colon + 1..])
            };
        }

        for level in LEVELS {
            if let Some(i) = find_split(tokens, level) {
                let op = tokens[i].word().unwrap_or_default();
                return self.binary(op, &tokens[..i], &tokens[i + 1..]);
            }
        }

        if tokens.len() > 1 {
            if let Some(op) = tokens[0].word().filter(|w| UNARY.contains(w)) {
                let operand = self.eval(&tokens[1..])?;
                return self.unary(op, &operand);
            }
            return Err(self.error("missing operator between operands"));
        }

        self.atom(&tokens[0])
    }

    /// Locates the first `?` at depth zero and the `:` that closes it.
    fn find_ternary(&self, tokens: &[Token]) -> Result<Option<(usize, usize)>> {
        let mut depth = 0usize;
        let mut question = None;
        let mut nested = 0usize;
        for (i, token) in tokens.iter().enumerate() {
            match token {
                Token::LParen => depth += 1,
                Token::RParen => depth = depth.saturating_sub(1),
                Token::Word(w) if depth == 0 && w == "?" => {
                    if question.is_none() {
                        question = Some(i);
                    } else {
                        nested += 1;
                    }
                }
                Token::Word(w) if depth == 0 && w == ":" && question.is_some() => {
                    if nested == 0 {
                        return Ok(question.map(|q| (q, i)));
                    }
                    nested -= 1;
                }
                _ => {}
            }
        }
        match question {
            Some(_) => Err(self.error("'?' without matching ':'")),
            None => Ok(None),
        }
    }

    fn binary(&mut self, op: &str, lhs: &[Token], rhs: &[Token]) -> Result<Value> {
        match op {
            "or" | "||" => {
                if self.eval(lhs)?.as_bool() {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(self.eval(rhs)?.as_bool()))
            }
            "and" | "&&" => {
                if !self.eval(lhs)?.as_bool() {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(self.eval(rhs)?.as_bool()))
            }
            _ => {
                let l = self.eval(lhs)?;
                let r = self.eval(rhs)?;
                self.apply(op, l, r)
            }
        }
    }

    fn apply(&self, op: &str, l: Value, r: Value) -> Result<Value> {
        match op {
            "==" => return Ok(Value::Bool(values_equal(&l, &r))),
            "!=" => return Ok(Value::Bool(!values_equal(&l, &r))),
            "+" => match (&l, &r) {
                (Value::Text(a), Value::Text(b)) => return Ok(Value::Text(format!("{a}{b}"))),
                (Value::Bytes(a), Value::Bytes(b)) => {
                    return Ok(Value::Bytes([a.as_slice(), b.as_slice()].concat()));
                }
                _ => {}
            },
            _ => {}
        }

        let a = self.int(&l)?;
        let b = self.int(&r)?;
        let overflow = || self.error(format!("integer overflow in {a} {op} {b}"));
        let result = match op {
            "<" => return Ok(Value::Bool(a < b)),
            "<=" => return Ok(Value::Bool(a <= b)),
            ">" => return Ok(Value::Bool(a > b)),
            ">=" => return Ok(Value::Bool(a >= b)),
            "+" => a.checked_add(b).ok_or_else(overflow)?,
            "-" => a.checked_sub(b).ok_or_else(overflow)?,
            "*" => a.checked_mul(b).ok_or_else(overflow)?,
            "/" => floor_div(a, b).ok_or_else(|| self.error("division by zero"))?,
            "%" => floor_mod(a, b).ok_or_else(|| self.error("division by zero"))?,
            "|" => a | b,
            "^" => a ^ b,
            "&" => a & b,
            "<<" | ">>" => {
                let shift = u32::try_from(b)
                    .ok()
                    .filter(|s| *s < 127)
                    .ok_or_else(|| self.error(format!("shift amount {b} out of range")))?;
                if op == ">>" {
                    a >> shift
                } else {
                    let shifted = a << shift;
                    if shifted >> shift != a {
                        return Err(overflow());
                    }
                    shifted
                }
            }
            _ => return Err(self.error(format!("unknown operator '{op}'"))),
        };
        Ok(Value::Int(result))
    }

    fn unary(&self, op: &str, operand: &Value) -> Result<Value> {
        match op {
            "not" | "!" => Ok(Value::Bool(!operand.as_bool())),
            "~" => Ok(Value::Int(!self.int(operand)?)),
            _ => {
                let v = self.int(operand)?;
                v.checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| self.error(format!("integer overflow negating {v}")))
            }
        }
    }

    fn atom(&mut self, token: &Token) -> Result<Value> {
        match token {
            Token::Quoted(s) => Ok(Value::Text(s.clone())),
            Token::Word(w) => {
                match w.as_str() {
                    "true" | "True" => return Ok(Value::Bool(true)),
                    "false" | "False" => return Ok(Value::Bool(false)),
                    _ => {}
                }
                if let Some(v) = parse_int_literal(w) {
                    return Ok(Value::Int(v));
                }
                if is_operator(w) {
                    return Err(self.error(format!("operator '{w}' is missing an operand")));
                }
                self.scope.resolve(w)
            }
            Token::LParen | Token::RParen => Err(self.error("unexpected parenthesis")),
        }
    }

    fn int(&self, value: &Value) -> Result<i128> {
        value.as_int().map_err(|e| self.error(e))
    }
}

/// Strips parentheses that enclose the entire slice.
fn strip_parens(mut tokens: &[Token]) -> &[Token] {
    while tokens.len() >= 2
        && tokens[0] == Token::LParen
        && matching_paren(tokens, 0) == Some(tokens.len() - 1)
    {
        tokens = &tokens[1..tokens.len() - 1];
    }
    tokens
}

fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Last binary occurrence of an operator from `level` at depth zero.
fn find_split(tokens: &[Token], level: &[&str]) -> Option<usize> {
    let mut depth = 0usize;
    let mut found = None;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(w) if depth == 0 && level.contains(&w.as_str()) => {
                // A binary operator needs an operand on its left.
                let has_left = i > 0
                    && match &tokens[i - 1] {
                        Token::Word(prev) => !is_operator(prev),
                        Token::Quoted(_) | Token::RParen => true,
                        Token::LParen => false,
                    };
                if has_left && i + 1 < tokens.len() {
                    found = Some(i);
                }
            }
            _ => {}
        }
    }
    found
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Text(a), Value::Text(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::None, Value::None) => true,
        (Value::None, _) | (_, Value::None) => false,
        _ => match (l.as_int(), r.as_int()) {
            (Ok(a), Ok(b)) => a == b,
            _ => l.to_string() == r.to_string(),
        },
    }
}

fn floor_div(a: i128, b: i128) -> Option<i128> {
    if b == 0 {
        return None;
    }
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        Some(q - 1)
    } else {
        Some(q)
    }
}

fn floor_mod(a: i128, b: i128) -> Option<i128> {
    let q = floor_div(a, b)?;
    a.checked_sub(q.checked_mul(b)?)
}
