//! Condition expressions over flow variables.
//!
//! The grammar covers literals, variable lookup (with `.field` and `[index]`
//! access), arithmetic, comparison, `contains`, and boolean connectives.
//! Nothing else exists: no calls, no assignment, no statements. An expression
//! can only observe the bindings handed to it through [`VariableLookup`].

use std::collections::HashMap;
use std::fmt;

use serde_json::{Number, Value};
use thiserror::Error;

use crate::context::VariableLookup;

/// Conditions longer than this are rejected before tokenizing.
const MAX_SOURCE_LEN: usize = 1024;
/// Maximum nesting of parentheses and unary operators.
const MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("empty expression")]
    Empty,

    #[error("expression longer than {} bytes", MAX_SOURCE_LEN)]
    TooLong,

    #[error("expression nested deeper than {} levels", MAX_DEPTH)]
    TooDeep,

    #[error("unexpected character '{ch}' at offset {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {found} at offset {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("cannot apply '{op}' to {left} and {right}")]
    TypeMismatch {
        op: &'static str,
        left: &'static str,
        right: &'static str,
    },

    #[error("cannot apply '{op}' to {operand}")]
    UnaryTypeMismatch {
        op: &'static str,
        operand: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic result is not a finite number")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(Value),
    Ident(String),
    Contains,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Literal(v) => write!(f, "literal {}", v),
            Token::Ident(name) => write!(f, "identifier '{}'", name),
            Token::Contains => f.write_str("'contains'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::LBracket => f.write_str("'['"),
            Token::RBracket => f.write_str("']'"),
            Token::Dot => f.write_str("'.'"),
            Token::Not => f.write_str("'!'"),
            Token::And => f.write_str("'&&'"),
            Token::Or => f.write_str("'||'"),
            Token::Eq => f.write_str("'=='"),
            Token::Ne => f.write_str("'!='"),
            Token::Lt => f.write_str("'<'"),
            Token::Le => f.write_str("'<='"),
            Token::Gt => f.write_str("'>'"),
            Token::Ge => f.write_str("'>='"),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::Percent => f.write_str("'%'"),
        }
    }
}

fn tokenize(src: &str) -> Result<Vec<(Token, usize)>, ExprError> {
    let chars: Vec<(usize, char)> = src.char_indices().collect();
    let peek = |i: usize| chars.get(i).map(|&(_, c)| c);
    let mut tokens = Vec::new();
    let mut i = 0;

    while let Some(&(pos, c)) = chars.get(i) {
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while peek(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            let mut is_float = false;
            if peek(i) == Some('.') && peek(i + 1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                i += 1;
                while peek(i).is_some_and(|c| c.is_ascii_digit()) {
                    i += 1;
                }
            }
            if matches!(peek(i), Some('e' | 'E')) {
                let mut j = i + 1;
                if matches!(peek(j), Some('+' | '-')) {
                    j += 1;
                }
                if peek(j).is_some_and(|c| c.is_ascii_digit()) {
                    is_float = true;
                    i = j;
                    while peek(i).is_some_and(|c| c.is_ascii_digit()) {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            tokens.push((Token::Literal(number_literal(&text, is_float)?), pos));
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut text = String::new();
            i += 1;
            loop {
                match peek(i) {
                    None => return Err(ExprError::UnterminatedString(pos)),
                    Some(c) if c == quote => {
                        i += 1;
                        break;
                    }
                    Some('\\') => {
                        let escaped = peek(i + 1).ok_or(ExprError::UnterminatedString(pos))?;
                        text.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            other => other,
                        });
                        i += 2;
                    }
                    Some(c) => {
                        text.push(c);
                        i += 1;
                    }
                }
            }
            tokens.push((Token::Literal(Value::String(text)), pos));
            continue;
        }

        if c.is_alphabetic() || c == '_' || c == '$' {
            let start = i;
            while peek(i).is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$') {
                i += 1;
            }
            let word: String = chars[start..i].iter().map(|&(_, c)| c).collect();
            let token = match word.as_str() {
                "true" => Token::Literal(Value::Bool(true)),
                "false" => Token::Literal(Value::Bool(false)),
                "null" => Token::Literal(Value::Null),
                "contains" => Token::Contains,
                _ => Token::Ident(word),
            };
            tokens.push((token, pos));
            continue;
        }

        let next = peek(i + 1);
        let (token, width) = match (c, next) {
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('[', _) => (Token::LBracket, 1),
            (']', _) => (Token::RBracket, 1),
            ('.', _) => (Token::Dot, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', Some('=')) => (Token::Ge, 2),
            ('>', _) => (Token::Gt, 1),
            // `===` and `!==` are accepted as spellings of `==` and `!=`
            ('=', Some('=')) if peek(i + 2) == Some('=') => (Token::Eq, 3),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) if peek(i + 2) == Some('=') => (Token::Ne, 3),
            ('!', Some('=')) => (Token::Ne, 2),
            ('!', _) => (Token::Not, 1),
            (ch, _) => return Err(ExprError::UnexpectedChar { ch, pos }),
        };
        tokens.push((token, pos));
        i += width;
    }

    Ok(tokens)
}

fn number_literal(text: &str, is_float: bool) -> Result<Value, ExprError> {
    if !is_float {
        if let Ok(n) = text.parse::<i64>() {
            return Ok(Value::from(n));
        }
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| ExprError::InvalidNumber(text.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Contains => "contains",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Var(String),
    Field(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn unexpected(&self) -> ExprError {
        match self.tokens.get(self.pos) {
            Some((token, pos)) => ExprError::UnexpectedToken {
                found: token.to_string(),
                pos: *pos,
            },
            None => ExprError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ExprError>,
    ) -> Result<T, ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep);
        }
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn or(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.equality()?;
        while self.eat(&Token::And) {
            let right = self.equality()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        ops: &[(Token, BinaryOp)],
        next: fn(&mut Self) -> Result<Expr, ExprError>,
    ) -> Result<Expr, ExprError> {
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    let right = next(self)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[(Token::Eq, BinaryOp::Eq), (Token::Ne, BinaryOp::Ne)],
            Self::comparison,
        )
    }

    fn comparison(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                (Token::Le, BinaryOp::Le),
                (Token::Lt, BinaryOp::Lt),
                (Token::Ge, BinaryOp::Ge),
                (Token::Gt, BinaryOp::Gt),
                (Token::Contains, BinaryOp::Contains),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expr, ExprError> {
        self.binary_level(
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
            Self::unary,
        )
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Not) {
            return self.nested(|p| Ok(Expr::Not(Box::new(p.unary()?))));
        }
        if self.eat(&Token::Minus) {
            return self.nested(|p| Ok(Expr::Neg(Box::new(p.unary()?))));
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, ExprError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let field = match self.peek() {
                    Some(Token::Ident(name)) => name.clone(),
                    // Keywords are valid field names after a dot
                    Some(Token::Contains) => "contains".to_string(),
                    _ => return Err(self.unexpected()),
                };
                self.pos += 1;
                expr = Expr::Field(Box::new(expr), field);
            } else if self.eat(&Token::LBracket) {
                let index = self.nested(|p| p.or())?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        match self.advance() {
            Some(Token::Literal(v)) => Ok(Expr::Literal(v)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::LParen) => {
                let inner = self.nested(|p| p.or())?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(_) => {
                self.pos -= 1;
                Err(self.unexpected())
            }
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

/// JavaScript-style truthiness: `false`, `null`, `0`, `NaN` and `""` are false.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn number(f: f64) -> Result<Value, ExprError> {
    if !f.is_finite() {
        return Err(ExprError::NonFinite);
    }
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return Ok(Value::from(f as i64));
    }
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or(ExprError::NonFinite)
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| loose_eq(a, b))
        }
        _ => a == b,
    }
}

fn binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, ExprError> {
    let mismatch = || ExprError::TypeMismatch {
        op: op.symbol(),
        left: type_name(&left),
        right: type_name(&right),
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_eq(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!loose_eq(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (&left, &right) {
                (Value::Number(x), Value::Number(y)) => x
                    .as_f64()
                    .zip(y.as_f64())
                    .and_then(|(x, y)| x.partial_cmp(&y)),
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => return Err(mismatch()),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::Contains => match (&left, &right) {
            (Value::String(haystack), Value::String(needle)) => {
                Ok(Value::Bool(haystack.contains(needle.as_str())))
            }
            (Value::Array(items), needle) => {
                Ok(Value::Bool(items.iter().any(|item| loose_eq(item, needle))))
            }
            (Value::Object(map), Value::String(key)) => Ok(Value::Bool(map.contains_key(key))),
            _ => Err(mismatch()),
        },
        BinaryOp::Add => match (&left, &right) {
            (Value::String(x), Value::String(y)) => Ok(Value::String(format!("{}{}", x, y))),
            (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => number(x + y),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            let (Some(x), Some(y)) = (left.as_f64(), right.as_f64()) else {
                return Err(mismatch());
            };
            match op {
                BinaryOp::Sub => number(x - y),
                BinaryOp::Mul => number(x * y),
                _ if y == 0.0 => Err(ExprError::DivisionByZero),
                BinaryOp::Div => number(x / y),
                _ => number(x % y),
            }
        }
    }
}

fn eval(expr: &Expr, vars: &dyn VariableLookup) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var(name) => vars
            .lookup(name)
            .cloned()
            .ok_or_else(|| ExprError::UnknownIdentifier(name.clone())),
        Expr::Field(base, field) => match eval(base, vars)? {
            Value::Object(mut map) => Ok(map.remove(field).unwrap_or(Value::Null)),
            other => Err(ExprError::UnaryTypeMismatch {
                op: ".",
                operand: type_name(&other),
            }),
        },
        Expr::Index(base, index) => {
            let base = eval(base, vars)?;
            let index = eval(index, vars)?;
            match (base, &index) {
                (Value::Array(mut items), Value::Number(n)) => {
                    let item = n
                        .as_u64()
                        .and_then(|i| usize::try_from(i).ok())
                        .filter(|&i| i < items.len())
                        .map(|i| items.swap_remove(i));
                    Ok(item.unwrap_or(Value::Null))
                }
                (Value::Object(mut map), Value::String(key)) => {
                    Ok(map.remove(key).unwrap_or(Value::Null))
                }
                (base, index) => Err(ExprError::TypeMismatch {
                    op: "[]",
                    left: type_name(&base),
                    right: type_name(index),
                }),
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, vars)?))),
        Expr::Neg(inner) => {
            let value = eval(inner, vars)?;
            match value.as_f64() {
                Some(f) => number(-f),
                None => Err(ExprError::UnaryTypeMismatch {
                    op: "-",
                    operand: type_name(&value),
                }),
            }
        }
        Expr::And(left, right) => {
            if !truthy(&eval(left, vars)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, vars)?)))
        }
        Expr::Or(left, right) => {
            if truthy(&eval(left, vars)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, vars)?)))
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, vars)?;
            let right = eval(right, vars)?;
            binary(*op, left, right)
        }
    }
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    source: String,
    expr: Expr,
}

impl Condition {
    pub fn parse(source: &str) -> Result<Self, ExprError> {
        if source.len() > MAX_SOURCE_LEN {
            return Err(ExprError::TooLong);
        }
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.or()?;
        if parser.peek().is_some() {
            return Err(parser.unexpected());
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate to a raw JSON value.
    pub fn evaluate(&self, vars: &dyn VariableLookup) -> Result<Value, ExprError> {
        eval(&self.expr, vars)
    }

    /// Evaluate and coerce the result with [`truthy`].
    pub fn test(&self, vars: &dyn VariableLookup) -> Result<bool, ExprError> {
        self.evaluate(vars).map(|v| truthy(&v))
    }
}

/// Evaluates condition strings, parsing each distinct string once.
#[derive(Debug, Default)]
pub struct ConditionEvaluator {
    cache: HashMap<String, Result<Condition, ExprError>>,
}

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `source`, or return the cached parse (or parse error).
    pub fn compile(&mut self, source: &str) -> Result<&Condition, ExprError> {
        self.cache
            .entry(source.to_string())
            .or_insert_with(|| Condition::parse(source))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn evaluate(&mut self, source: &str, vars: &dyn VariableLookup) -> Result<bool, ExprError> {
        self.compile(source)?.test(vars)
    }

    /// Number of distinct expressions seen so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Evaluate `expr` once, treating any error as `false`.
pub fn evaluate_condition(expr: &str, vars: &dyn VariableLookup) -> bool {
    Condition::parse(expr)
        .and_then(|c| c.test(vars))
        .unwrap_or(false)
}
