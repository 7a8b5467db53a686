// SPDX-FileCopyrightText: 2026 Capstan Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Restricted condition language for `when` clauses.
//!
//! Expressions are parsed into a small AST and interpreted directly:
//! literals (`true`, `false`, `null`, `undefined`, numbers, quoted strings),
//! field access into the context layers (`config.flag`, `input.items[0]`,
//! or a bare key looked up through every layer), `!`, `&&`, `||`, the
//! comparisons `=== !== == != < <= > >=`, and parentheses.
//!
//! Evaluation fails closed. A disallowed character, a syntax error or an
//! over-long expression makes the condition `false`.

use std::cmp::Ordering;

use capstan_core::filter::{compare_values, values_equal};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::template::{Layer, Scope};

const MAX_EXPRESSION_LEN: usize = 1024;
const MAX_DEPTH: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("condition is empty")]
    Empty,
    #[error("condition exceeds {MAX_EXPRESSION_LEN} characters")]
    TooLong,
    #[error("character '{0}' is not allowed in conditions")]
    Disallowed(char),
    #[error("condition nests deeper than {MAX_DEPTH} levels")]
    TooDeep,
    #[error("syntax error: {0}")]
    Syntax(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    StrictEq,
    StrictNe,
    LooseEq,
    LooseNe,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Option<Value>),
    Path(Vec<Segment>),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CmpOp, Box<Expr>),
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c.is_ascii_whitespace() || "'\"()[]._$-!=<>&|".contains(c)
}

/// Evaluates `expr` against `scope`. Anything that does not parse is `false`.
pub fn evaluate_condition(expr: &str, scope: &Scope<'_>) -> bool {
    match parse_condition(expr) {
        Ok(ast) => truthy(ast.eval(scope).as_ref()),
        Err(e) => {
            debug!(condition = expr, error = %e, "condition rejected, treating as false");
            false
        }
    }
}

/// Parses `expr` without evaluating it.
pub fn parse_condition(expr: &str) -> Result<Expr, ConditionError> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(ConditionError::Empty);
    }
    if expr.len() > MAX_EXPRESSION_LEN {
        return Err(ConditionError::TooLong);
    }
    if let Some(c) = expr.chars().find(|c| !is_allowed(*c)) {
        return Err(ConditionError::Disallowed(c));
    }
    let tokens = tokenize(expr)?;
    let mut parser = Parser { tokens, pos: 0, depth: 0 };
    let ast = parser.or()?;
    if parser.pos != parser.tokens.len() {
        return Err(ConditionError::Syntax(format!(
            "unexpected {:?}",
            parser.tokens[parser.pos]
        )));
    }
    Ok(ast)
}

// --- lexer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Not,
    And,
    Or,
    Cmp(CmpOp),
}

fn tokenize(src: &str) -> Result<Vec<Token>, ConditionError> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let peek = |i: usize| chars.get(i).copied();

    while let Some(c) = peek(i) {
        match c {
            c if c.is_ascii_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '&' if peek(i + 1) == Some('&') => {
                tokens.push(Token::And);
                i += 2;
            }
            '|' if peek(i + 1) == Some('|') => {
                tokens.push(Token::Or);
                i += 2;
            }
            '=' | '!' if peek(i + 1) == Some('=') => {
                let strict = peek(i + 2) == Some('=');
                let op = match (c, strict) {
                    ('=', true) => CmpOp::StrictEq,
                    ('=', false) => CmpOp::LooseEq,
                    (_, true) => CmpOp::StrictNe,
                    (_, false) => CmpOp::LooseNe,
                };
                tokens.push(Token::Cmp(op));
                i += if strict { 3 } else { 2 };
            }
            '!' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '<' | '>' => {
                let or_equal = peek(i + 1) == Some('=');
                let op = match (c, or_equal) {
                    ('<', false) => CmpOp::Lt,
                    ('<', true) => CmpOp::Lte,
                    (_, false) => CmpOp::Gt,
                    (_, true) => CmpOp::Gte,
                };
                tokens.push(Token::Cmp(op));
                i += if or_equal { 2 } else { 1 };
            }
            '\'' | '"' => {
                let quote = c;
                let mut text = String::new();
                i += 1;
                loop {
                    match peek(i) {
                        None => {
                            return Err(ConditionError::Syntax("unterminated string".into()));
                        }
                        Some(ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(ch) => {
                            text.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit()
                || (c == '-' && peek(i + 1).is_some_and(|d| d.is_ascii_digit())) =>
            {
                let start = i;
                i += 1;
                while peek(i).is_some_and(|d| d.is_ascii_digit()) {
                    i += 1;
                }
                // A path segment like `items.0.name` never carries a fraction.
                let after_dot = matches!(tokens.last(), Some(Token::Dot));
                let is_float = !after_dot
                    && peek(i) == Some('.')
                    && peek(i + 1).is_some_and(|d| d.is_ascii_digit());
                if is_float {
                    i += 1;
                    while peek(i).is_some_and(|d| d.is_ascii_digit()) {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let token = if is_float {
                    text.parse().map(Token::Float).ok()
                } else {
                    text.parse().map(Token::Int).ok()
                };
                tokens.push(token.ok_or_else(|| {
                    ConditionError::Syntax(format!("invalid number '{text}'"))
                })?);
            }
            c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while peek(i).is_some_and(|d| d.is_ascii_alphanumeric() || d == '_' || d == '$') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(ConditionError::Syntax(format!("unexpected '{other}'")));
            }
        }
    }
    Ok(tokens)
}

// --- parser ---

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ConditionError> {
        match self.next() {
            Some(ref t) if t == expected => Ok(()),
            other => Err(ConditionError::Syntax(format!(
                "expected {expected:?}, found {other:?}"
            ))),
        }
    }

    fn descend(&mut self) -> Result<(), ConditionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ConditionError::TooDeep);
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.and()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ConditionError> {
        if self.peek() == Some(&Token::Not) {
            self.pos += 1;
            self.descend()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ConditionError> {
        let left = self.primary()?;
        if let Some(Token::Cmp(op)) = self.peek() {
            let op = *op;
            self.pos += 1;
            let right = self.primary()?;
            return Ok(Expr::Compare(Box::new(left), op, Box::new(right)));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, ConditionError> {
        match self.next() {
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.or()?;
                self.expect(&Token::RParen)?;
                self.depth -= 1;
                Ok(inner)
            }
            Some(Token::Int(n)) => Ok(Expr::Literal(Some(Value::from(n)))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Some(
                serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number),
            ))),
            Some(Token::Str(s)) => Ok(Expr::Literal(Some(Value::String(s)))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Expr::Literal(Some(Value::Bool(true)))),
                "false" => Ok(Expr::Literal(Some(Value::Bool(false)))),
                "null" => Ok(Expr::Literal(Some(Value::Null))),
                "undefined" => Ok(Expr::Literal(None)),
                _ => self.path(name),
            },
            other => Err(ConditionError::Syntax(format!(
                "expected a value, found {other:?}"
            ))),
        }
    }

    fn path(&mut self, root: String) -> Result<Expr, ConditionError> {
        let mut segments = vec![Segment::Key(root)];
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(key)) => segments.push(Segment::Key(key)),
                        Some(Token::Int(n)) if n >= 0 => segments.push(Segment::Index(n as usize)),
                        other => {
                            return Err(ConditionError::Syntax(format!(
                                "expected a field name after '.', found {other:?}"
                            )));
                        }
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Int(n)) if n >= 0 => segments.push(Segment::Index(n as usize)),
                        Some(Token::Str(key)) => segments.push(Segment::Key(key)),
                        other => {
                            return Err(ConditionError::Syntax(format!(
                                "expected an index, found {other:?}"
                            )));
                        }
                    }
                    self.expect(&Token::RBracket)?;
                }
                _ => return Ok(Expr::Path(segments)),
            }
        }
    }
}

// --- interpreter ---

impl Expr {
    /// Evaluates to a JSON value; `None` stands for an undefined reference.
    pub fn eval(&self, scope: &Scope<'_>) -> Option<Value> {
        match self {
            Self::Literal(v) => v.clone(),
            Self::Path(segments) => resolve_path(segments, scope),
            Self::Not(inner) => Some(Value::Bool(!truthy(inner.eval(scope).as_ref()))),
            Self::And(l, r) => {
                let left = l.eval(scope);
                if truthy(left.as_ref()) { r.eval(scope) } else { left }
            }
            Self::Or(l, r) => {
                let left = l.eval(scope);
                if truthy(left.as_ref()) { left } else { r.eval(scope) }
            }
            Self::Compare(l, op, r) => {
                let (left, right) = (l.eval(scope), r.eval(scope));
                Some(Value::Bool(compare(left.as_ref(), *op, right.as_ref())))
            }
        }
    }
}

fn dotted(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| match s {
            Segment::Key(k) => k.clone(),
            Segment::Index(i) => i.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn resolve_path(segments: &[Segment], scope: &Scope<'_>) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    if let Segment::Key(root) = first
        && let Some(layer) = Layer::from_root(root)
    {
        if rest.is_empty() {
            return scope.layer(layer).map(|m| Value::Object(m.clone()));
        }
        return scope.lookup_in(layer, &dotted(rest)).cloned();
    }
    scope.lookup(&dotted(segments)).cloned()
}

/// JavaScript-style truthiness.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

fn to_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Null => Some(0.0),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn strict_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => values_equal(x, y),
        _ => false,
    }
}

fn loose_equal(a: Option<&Value>, b: Option<&Value>) -> bool {
    let nullish = |v: Option<&Value>| matches!(v, None | Some(Value::Null));
    if nullish(a) || nullish(b) {
        return nullish(a) && nullish(b);
    }
    match (a, b) {
        (Some(Value::Number(_) | Value::Bool(_)), Some(Value::String(_) | Value::Bool(_)))
        | (Some(Value::String(_) | Value::Bool(_)), Some(Value::Number(_) | Value::Bool(_))) => {
            match (to_number(a), to_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => strict_equal(a, b),
    }
}

fn relational(a: Option<&Value>, b: Option<&Value>) -> Option<Ordering> {
    if let (Some(x @ Value::String(_)), Some(y @ Value::String(_))) = (a, b) {
        return compare_values(x, y);
    }
    to_number(a)?.partial_cmp(&to_number(b)?)
}

fn compare(a: Option<&Value>, op: CmpOp, b: Option<&Value>) -> bool {
    match op {
        CmpOp::StrictEq => strict_equal(a, b),
        CmpOp::StrictNe => !strict_equal(a, b),
        CmpOp::LooseEq => loose_equal(a, b),
        CmpOp::LooseNe => !loose_equal(a, b),
        CmpOp::Lt => relational(a, b) == Some(Ordering::Less),
        CmpOp::Lte => matches!(relational(a, b), Some(Ordering::Less | Ordering::Equal)),
        CmpOp::Gt => relational(a, b) == Some(Ordering::Greater),
        CmpOp::Gte => matches!(relational(a, b), Some(Ordering::Greater | Ordering::Equal)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::JsonMap;
    use proptest::prelude::*;
    use serde_json::json;

    fn map(v: Value) -> JsonMap {
        v.as_object().cloned().unwrap()
    }

    fn eval_with(expr: &str, config: Value, vars: Value) -> bool {
        let config = map(config);
        let vars = map(vars);
        let scope = Scope::new()
            .push(Layer::Variables, &vars)
            .push(Layer::Config, &config);
        evaluate_condition(expr, &scope)
    }

    fn eval(expr: &str) -> bool {
        eval_with(expr, json!({}), json!({}))
    }

    #[test]
    fn strict_boolean_flag() {
        assert!(eval_with("config.flag === true", json!({"flag": true}), json!({})));
        assert!(!eval_with("config.flag === true", json!({"flag": false}), json!({})));
        assert!(!eval_with("config.flag === true", json!({}), json!({})));
        assert!(!eval_with("config.flag === true", json!({"flag": "true"}), json!({})));
    }

    #[test]
    fn loose_equality_coerces() {
        assert!(eval_with("config.count == '3'", json!({"count": 3}), json!({})));
        assert!(!eval_with("config.count === '3'", json!({"count": 3}), json!({})));
        assert!(eval("undefined == null"));
        assert!(!eval("undefined === null"));
        assert!(eval_with("config.missing == null", json!({}), json!({})));
    }

    #[test]
    fn boolean_operators_and_precedence() {
        let config = json!({"a": true, "b": false, "n": 5});
        assert!(eval_with("config.a && !config.b", config.clone(), json!({})));
        assert!(eval_with("config.b || config.n > 3", config.clone(), json!({})));
        assert!(!eval_with("config.b || config.a && config.b", config.clone(), json!({})));
        assert!(eval_with("(config.b || config.a) && config.n >= 5", config, json!({})));
    }

    #[test]
    fn bare_keys_search_every_layer() {
        let vars = json!({"fetch": {"rows": [{"status": "open"}], "count": 1}});
        assert!(eval_with("fetch.count > 0", json!({}), vars.clone()));
        assert!(eval_with("fetch.rows[0].status === 'open'", json!({}), vars.clone()));
        assert!(eval_with("fetch.rows.0[\"status\"] != \"done\"", json!({}), vars.clone()));
        assert!(eval_with("vars.fetch.count === 1", json!({}), vars));
    }

    #[test]
    fn truthiness_matches_javascript() {
        let config = json!({"empty": "", "zero": 0, "list": [], "obj": {}, "text": "x"});
        assert!(!eval_with("config.empty", config.clone(), json!({})));
        assert!(!eval_with("config.zero", config.clone(), json!({})));
        assert!(eval_with("config.list", config.clone(), json!({})));
        assert!(eval_with("config.obj", config.clone(), json!({})));
        assert!(eval_with("config.text", config, json!({})));
    }

    #[test]
    fn relational_operators() {
        assert!(eval("-1 < 0.5"));
        assert!(eval("'abc' < 'abd'"));
        assert!(!eval("'abc' < 1"));
        assert!(!eval("undefined < 1"));
    }

    #[test]
    fn malformed_expressions_are_false() {
        assert!(!eval(""));
        assert!(!eval("config.flag ==="));
        assert!(!eval("(true"));
        assert!(!eval("true true"));
        assert!(!eval("'unterminated"));
        assert!(!eval(&"(".repeat(100)));
        assert!(matches!(parse_condition("a = b"), Err(ConditionError::Syntax(_))));
    }

    #[test]
    fn disallowed_characters_fail_closed() {
        assert!(!eval("true; process.exit()"));
        assert!(!eval("true || `x`"));
        assert!(!eval("1 + 1 == 2"));
        assert!(!eval("{}"));
        assert_eq!(parse_condition("a, b"), Err(ConditionError::Disallowed(',')));
    }

    proptest! {
        #[test]
        fn any_disallowed_character_yields_false(
            prefix in "[a-z =!|&()']{0,16}",
            bad in "[;{}+*/`,:?@#%^~\\\\]",
            suffix in "[a-z =!|&()']{0,16}",
        ) {
            let expr = format!("true || {prefix}{bad}{suffix}");
            prop_assert!(!eval(&expr));
        }

        #[test]
        fn never_panics(expr in ".{0,64}") {
            let _ = eval(&expr);
        }
    }
}
