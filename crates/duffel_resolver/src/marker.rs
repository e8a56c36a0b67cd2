//! Conditional-dependency expressions.
//!
//! Declared requirements may be guarded by an environment-marker expression
//! (`; python_version == '2.7'`). This module tokenizes and evaluates those
//! expressions against a [`MarkerSnapshot`] describing the *target*
//! interpreter, not the host running the resolver.
//!
//! The language is deliberately small: quoted strings and a fixed set of
//! variable names are the only atoms, comparisons are plain string
//! comparisons, `in` / `not in` are substring tests, and `and` binds tighter
//! than `or`. Bare atoms coerce to booleans, with the empty string being
//! false.

use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Extra;

/// The variable names an expression may reference, longest name first so the
/// tokenizer can scan greedily.
pub const MARKER_VARIABLES: &[&str] = &[
    "platform_python_implementation",
    "implementation_version",
    "python_full_version",
    "implementation_name",
    "platform_machine",
    "platform_release",
    "platform_version",
    "platform_system",
    "python_version",
    "sys_platform",
    "os_name",
    "extra",
];

/// A comparison operator between two atoms.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum CompareOp {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    In,
    NotIn,
}

impl Display for CompareOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
            CompareOp::Le => "<=",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Gt => ">",
            CompareOp::In => "in",
            CompareOp::NotIn => "not in",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(CompareOp),
    Str(String),
    Var(&'static str),
}

/// Error produced while tokenizing or parsing a marker expression.
#[derive(Debug, Clone, Error, Diagnostic)]
#[allow(missing_docs)]
pub enum MarkerParseError {
    #[error("unrecognized input at offset {0} in marker expression")]
    UnrecognizedInput(usize),

    #[error("unterminated string literal in marker expression")]
    UnterminatedString,

    #[error("unexpected end of marker expression")]
    UnexpectedEnd,

    #[error("expected {expected} in marker expression")]
    Expected { expected: &'static str },

    #[error("trailing input after marker expression")]
    TrailingInput,
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Splits `keyword` off the front of `input` only when it is not immediately
/// followed by another identifier character.
fn strip_keyword<'a>(input: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = input.strip_prefix(keyword)?;
    match rest.chars().next() {
        Some(c) if is_word_char(c) => None,
        _ => Some(rest),
    }
}

fn tokenize(expression: &str) -> Result<Vec<Token>, MarkerParseError> {
    let mut tokens = Vec::new();
    let mut rest = expression;

    'scan: while !rest.is_empty() {
        let trimmed = rest.trim_start();
        if trimmed.is_empty() {
            break;
        }
        rest = trimmed;

        for name in MARKER_VARIABLES {
            if let Some(after) = strip_keyword(rest, name) {
                tokens.push(Token::Var(name));
                rest = after;
                continue 'scan;
            }
        }

        if let Some(quote) = rest.chars().next().filter(|c| *c == '\'' || *c == '"') {
            let body = &rest[1..];
            let Some(end) = body.find(quote) else {
                return Err(MarkerParseError::UnterminatedString);
            };
            tokens.push(Token::Str(body[..end].to_owned()));
            rest = &body[end + 1..];
            continue 'scan;
        }

        // `not in` must win over `in`, and the two-character comparison
        // operators over their one-character prefixes.
        if let Some(after) = strip_keyword(rest, "not") {
            let after = after.trim_start();
            let Some(after) = strip_keyword(after, "in") else {
                return Err(MarkerParseError::Expected {
                    expected: "'in' after 'not'",
                });
            };
            tokens.push(Token::Op(CompareOp::NotIn));
            rest = after;
            continue 'scan;
        }
        for (text, token) in [
            ("(", Token::LParen),
            (")", Token::RParen),
            ("==", Token::Op(CompareOp::Eq)),
            ("!=", Token::Op(CompareOp::Ne)),
            ("<=", Token::Op(CompareOp::Le)),
            (">=", Token::Op(CompareOp::Ge)),
            ("<", Token::Op(CompareOp::Lt)),
            (">", Token::Op(CompareOp::Gt)),
        ] {
            if let Some(after) = rest.strip_prefix(text) {
                tokens.push(token);
                rest = after;
                continue 'scan;
            }
        }
        for (word, token) in [
            ("and", Token::And),
            ("or", Token::Or),
            ("in", Token::Op(CompareOp::In)),
        ] {
            if let Some(after) = strip_keyword(rest, word) {
                tokens.push(token);
                rest = after;
                continue 'scan;
            }
        }

        return Err(MarkerParseError::UnrecognizedInput(
            expression.len() - rest.len(),
        ));
    }

    Ok(tokens)
}

/// An atom of a marker expression: a variable reference or a string literal.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Value {
    /// One of [`MARKER_VARIABLES`].
    Variable(&'static str),
    /// A quoted string.
    Literal(String),
}

impl Value {
    fn resolve<'a>(&'a self, env: &'a dyn MarkerEnv) -> Cow<'a, str> {
        match self {
            Value::Variable(name) => Cow::Borrowed(env.marker_var(name).unwrap_or("")),
            Value::Literal(s) => Cow::Borrowed(s.as_str()),
        }
    }

    fn is_extra(&self) -> bool {
        matches!(self, Value::Variable("extra"))
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Variable(name) => write!(f, "{name}"),
            Value::Literal(s) if s.contains('\'') => write!(f, "\"{s}\""),
            Value::Literal(s) => write!(f, "'{s}'"),
        }
    }
}

/// A parsed marker expression.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MarkerExpr {
    /// Both sides must hold. Evaluation short-circuits.
    And(Box<MarkerExpr>, Box<MarkerExpr>),
    /// Either side must hold. Evaluation short-circuits.
    Or(Box<MarkerExpr>, Box<MarkerExpr>),
    /// A binary comparison between two atoms.
    Comparison {
        /// The operator.
        op: CompareOp,
        /// Left operand.
        lhs: Value,
        /// Right operand.
        rhs: Value,
    },
    /// A bare atom, coerced to a boolean (empty string is false).
    Truth(Value),
}

impl MarkerExpr {
    /// Parses an expression.
    pub fn parse(expression: &str) -> Result<MarkerExpr, MarkerParseError> {
        let tokens = tokenize(expression)?;
        let mut parser = Parser {
            tokens: &tokens,
            offset: 0,
        };
        let expr = parser.marker()?;
        if parser.offset != tokens.len() {
            return Err(MarkerParseError::TrailingInput);
        }
        Ok(expr)
    }

    /// Evaluates the expression against `env`.
    pub fn eval(&self, env: &dyn MarkerEnv) -> bool {
        match self {
            MarkerExpr::And(lhs, rhs) => lhs.eval(env) && rhs.eval(env),
            MarkerExpr::Or(lhs, rhs) => lhs.eval(env) || rhs.eval(env),
            MarkerExpr::Comparison { op, lhs, rhs } => {
                let mut left = lhs.resolve(env);
                let mut right = rhs.resolve(env);
                // Comparisons against the feature-group variable canonicalize
                // both sides so `extra == 'Socks_Proxy'` matches however the
                // metadata spelled it.
                if lhs.is_extra() || rhs.is_extra() {
                    if let Ok(extra) = Extra::from_str(&left) {
                        left = Cow::Owned(extra.as_str().to_owned());
                    }
                    if let Ok(extra) = Extra::from_str(&right) {
                        right = Cow::Owned(extra.as_str().to_owned());
                    }
                }
                match op {
                    CompareOp::Eq => left == right,
                    CompareOp::Ne => left != right,
                    CompareOp::Le => left <= right,
                    CompareOp::Ge => left >= right,
                    CompareOp::Lt => left < right,
                    CompareOp::Gt => left > right,
                    CompareOp::In => right.contains(left.as_ref()),
                    CompareOp::NotIn => !right.contains(left.as_ref()),
                }
            }
            MarkerExpr::Truth(value) => !value.resolve(env).is_empty(),
        }
    }

    /// True when the expression mentions the `extra` variable anywhere.
    pub fn references_extra(&self) -> bool {
        match self {
            MarkerExpr::And(lhs, rhs) | MarkerExpr::Or(lhs, rhs) => {
                lhs.references_extra() || rhs.references_extra()
            }
            MarkerExpr::Comparison { lhs, rhs, .. } => lhs.is_extra() || rhs.is_extra(),
            MarkerExpr::Truth(value) => value.is_extra(),
        }
    }

    fn fmt_prec(&self, f: &mut Formatter<'_>, inside_and: bool) -> std::fmt::Result {
        match self {
            MarkerExpr::Or(lhs, rhs) => {
                if inside_and {
                    write!(f, "(")?;
                }
                lhs.fmt_prec(f, false)?;
                write!(f, " or ")?;
                rhs.fmt_prec(f, false)?;
                if inside_and {
                    write!(f, ")")?;
                }
                Ok(())
            }
            MarkerExpr::And(lhs, rhs) => {
                lhs.fmt_prec(f, true)?;
                write!(f, " and ")?;
                rhs.fmt_prec(f, true)
            }
            MarkerExpr::Comparison { op, lhs, rhs } => write!(f, "{lhs} {op} {rhs}"),
            MarkerExpr::Truth(value) => write!(f, "{value}"),
        }
    }
}

impl Display for MarkerExpr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_prec(f, false)
    }
}

impl FromStr for MarkerExpr {
    type Err = MarkerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MarkerExpr::parse(s)
    }
}

struct Parser<'a> {
    tokens: &'a [Token],
    offset: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.offset)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.offset);
        if token.is_some() {
            self.offset += 1;
        }
        token
    }

    // marker := and_chain ('or' and_chain)*
    fn marker(&mut self) -> Result<MarkerExpr, MarkerParseError> {
        let mut expr = self.and_chain()?;
        while self.peek() == Some(&Token::Or) {
            self.bump();
            let rhs = self.and_chain()?;
            expr = MarkerExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    // and_chain := expr ('and' expr)*
    fn and_chain(&mut self) -> Result<MarkerExpr, MarkerParseError> {
        let mut expr = self.expr()?;
        while self.peek() == Some(&Token::And) {
            self.bump();
            let rhs = self.expr()?;
            expr = MarkerExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    // expr := '(' marker ')' | atom (op atom)?
    fn expr(&mut self) -> Result<MarkerExpr, MarkerParseError> {
        if self.peek() == Some(&Token::LParen) {
            self.bump();
            let inner = self.marker()?;
            if self.bump() != Some(&Token::RParen) {
                return Err(MarkerParseError::Expected { expected: "')'" });
            }
            return Ok(inner);
        }

        let lhs = self.atom()?;
        if let Some(Token::Op(op)) = self.peek() {
            let op = *op;
            self.bump();
            let rhs = self.atom()?;
            return Ok(MarkerExpr::Comparison { op, lhs, rhs });
        }
        Ok(MarkerExpr::Truth(lhs))
    }

    fn atom(&mut self) -> Result<Value, MarkerParseError> {
        match self.bump() {
            Some(Token::Str(s)) => Ok(Value::Literal(s.clone())),
            Some(Token::Var(name)) => Ok(Value::Variable(name)),
            Some(_) => Err(MarkerParseError::Expected {
                expected: "a string or a marker variable",
            }),
            None => Err(MarkerParseError::UnexpectedEnd),
        }
    }
}

/// Anything that can resolve marker variables to values.
pub trait MarkerEnv {
    /// The value of the variable, or `None` when the environment does not
    /// define it.
    fn marker_var(&self, name: &str) -> Option<&str>;
}

/// The record of marker values describing a target interpreter and platform.
/// Built once per resolve, either by probing an interpreter or derived from an
/// [`crate::interpreter::InterpreterIdentity`].
#[derive(Default, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct MarkerSnapshot {
    #[serde(default)]
    pub os_name: String,
    #[serde(default)]
    pub sys_platform: String,
    #[serde(default)]
    pub platform_machine: String,
    #[serde(default)]
    pub platform_python_implementation: String,
    #[serde(default)]
    pub platform_release: String,
    #[serde(default)]
    pub platform_version: String,
    #[serde(default)]
    pub python_version: String,
    #[serde(default)]
    pub python_full_version: String,
    #[serde(default)]
    pub implementation_name: String,
    #[serde(default)]
    pub implementation_version: String,
}

impl MarkerEnv for MarkerSnapshot {
    fn marker_var(&self, name: &str) -> Option<&str> {
        match name {
            "os_name" => Some(&self.os_name),
            "sys_platform" => Some(&self.sys_platform),
            "platform_machine" => Some(&self.platform_machine),
            "platform_python_implementation" => Some(&self.platform_python_implementation),
            "platform_release" => Some(&self.platform_release),
            "platform_version" => Some(&self.platform_version),
            "python_version" => Some(&self.python_version),
            "python_full_version" => Some(&self.python_full_version),
            "implementation_name" => Some(&self.implementation_name),
            "implementation_version" => Some(&self.implementation_version),
            _ => None,
        }
    }
}

/// A [`MarkerSnapshot`] with the `extra` variable bound to a feature group
/// under consideration. An unbound `extra` evaluates as the empty string.
#[derive(Debug, Copy, Clone)]
pub struct WithExtra<'a> {
    /// The underlying snapshot.
    pub snapshot: &'a MarkerSnapshot,
    /// The active feature group, if any.
    pub extra: Option<&'a Extra>,
}

impl MarkerEnv for WithExtra<'_> {
    fn marker_var(&self, name: &str) -> Option<&str> {
        if name == "extra" {
            return Some(self.extra.map(Extra::as_str).unwrap_or(""));
        }
        self.snapshot.marker_var(name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn snapshot() -> MarkerSnapshot {
        MarkerSnapshot {
            os_name: "posix".into(),
            sys_platform: "darwin".into(),
            platform_machine: "x86_64".into(),
            platform_python_implementation: "PyPy".into(),
            platform_release: "13.4.0".into(),
            python_version: "2.7".into(),
            python_full_version: "2.7.8".into(),
            implementation_name: "pypy".into(),
            ..MarkerSnapshot::default()
        }
    }

    fn eval(expression: &str) -> bool {
        MarkerExpr::parse(expression).unwrap().eval(&snapshot())
    }

    #[test]
    fn test_tokenizer_operators() {
        for op in ["==", "!=", "<=", ">=", "<", ">", "in", "not in"] {
            let tokens = tokenize(&format!("python_version {op} '2.7'")).unwrap();
            assert_eq!(tokens.len(), 3, "did not tokenize {op}");
        }
    }

    #[test]
    fn test_string_comparisons() {
        assert!(eval("'ello' in 'hello'"));
        assert!(eval("'2.6' < '2.7'"));
        assert!(eval("'hello' not in 'ello'"));
        assert!(eval("'2.7' >= '2.6'"));

        assert!(!eval("'ello' not in 'hello'"));
        assert!(!eval("'2.6' > '2.7'"));
        assert!(!eval("'hello' in 'ello'"));
        assert!(!eval("'2.7' <= '2.6'"));
    }

    #[test]
    fn test_subexpressions() {
        assert!(eval("python_version == '2.7'"));
        assert!(!eval("python_version != '2.7'"));
        assert!(eval("(python_version == '2.7')"));
        assert!(eval("python_version in python_full_version"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!eval("''"));
        assert!(eval("'hello'"));
        assert!(eval("implementation_name"));
        assert!(eval("os_name"));
        assert!(!eval("platform_version"));
    }

    #[test]
    fn test_connectives() {
        assert!(!eval("'' and 'hello'"));
        assert!(eval("'' or 'hello'"));
        assert!(!eval("'hello' and ''"));
        assert!(eval("'hello' or ''"));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        assert!(!eval("'' or '' and 'true'"));
        assert!(eval("'true' or '' and ''"));
        assert_eq!(eval("'x' or '' and ''"), eval("'x' or ('' and '')"));
    }

    #[test]
    fn test_double_quoted_strings() {
        assert!(eval("sys_platform == \"darwin\""));
    }

    #[test]
    fn test_extra_binding() {
        let snapshot = snapshot();
        let hi: Extra = "HI".parse().unwrap();
        let env = WithExtra {
            snapshot: &snapshot,
            extra: Some(&hi),
        };
        let expr = MarkerExpr::parse("extra == 'hi'").unwrap();
        assert!(expr.eval(&env));
        assert!(!expr.eval(&WithExtra {
            snapshot: &snapshot,
            extra: None,
        }));
        assert!(expr.references_extra());
    }

    #[test]
    fn test_display_roundtrip() {
        for expression in [
            "python_version == '2.7'",
            "os_name == 'posix' and python_version == '2.7'",
            "'x' or 'y' and 'z'",
            "('x' or 'y') and 'z'",
        ] {
            let parsed = MarkerExpr::parse(expression).unwrap();
            let reparsed = MarkerExpr::parse(&parsed.to_string()).unwrap();
            assert_eq!(parsed, reparsed, "{expression}");
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(MarkerExpr::parse("'unterminated").is_err());
        assert!(MarkerExpr::parse("bogus_variable == 'x'").is_err());
        assert!(MarkerExpr::parse("python_version ==").is_err());
        assert!(MarkerExpr::parse("(python_version == '2.7'").is_err());
        assert!(MarkerExpr::parse("python_version == '2.7')").is_err());
    }
}
