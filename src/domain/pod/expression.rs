//! Restricted expression language used by pod templates and resource validation rules.
//!
//! Templates embed expressions as `{{ ... }}`. An expression is integer arithmetic
//! (`+ - * /`, unary minus, parentheses) over literals and variables. Literals may carry a
//! byte unit (`B, Ki, Mi, Gi, Ti`). There are no loops, calls or I/O, and evaluation is
//! bounded by a token budget, a nesting depth and a maximum rendered size, so a template can
//! neither hang the scheduler nor exhaust its memory.

use std::collections::BTreeMap;
use std::fmt;

use crate::domain::resource::quantity::parse_bytes;
use crate::error::{Error, Result};

pub const MAX_EXPRESSION_TOKENS: usize = 256;
pub const MAX_EXPRESSION_DEPTH: usize = 32;
pub const MAX_RENDERED_LEN: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableValue {
    Number(i64),
    Text(String),
}

impl VariableValue {
    fn as_number(&self, name: &str) -> Result<i64> {
        match self {
            VariableValue::Number(value) => Ok(*value),
            VariableValue::Text(text) => parse_literal(text).map_err(|_| Error::ExpressionError(format!("variable '{}' is not numeric: '{}'", name, text))),
        }
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VariableValue::Number(value) => write!(f, "{}", value),
            VariableValue::Text(text) => f.write_str(text),
        }
    }
}

pub type Variables = BTreeMap<String, VariableValue>;

/// Parses a literal operand: a plain integer or a byte quantity such as `16Gi`.
pub fn parse_literal(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    if let Some(negative) = trimmed.strip_prefix('-') {
        return parse_literal(negative).map(|value| -value);
    }
    parse_bytes(trimmed).map_err(|_| Error::ExpressionError(format!("invalid literal '{}'", text)))
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(i64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        if tokens.len() >= MAX_EXPRESSION_TOKENS {
            return Err(Error::ExpressionError(format!("expression exceeds {} tokens", MAX_EXPRESSION_TOKENS)));
        }
        let c = chars[i];
        match c {
            ' ' | '\t' => i += 1,
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
                    i += 1;
                }
                let literal: String = chars[start..i].iter().collect();
                tokens.push(Token::Number(parse_literal(&literal)?));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(Error::ExpressionError(format!("unexpected character '{}' in '{}'", other, source))),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    variables: &'a Variables,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self, depth: usize) -> Result<i64> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(Error::ExpressionError("expression nested too deeply".to_string()));
        }
        let mut value = self.term(depth)?;
        while let Some(token) = self.peek() {
            let op = token.clone();
            match op {
                Token::Plus | Token::Minus => {
                    self.pos += 1;
                    let rhs = self.term(depth)?;
                    value = if op == Token::Plus { value.checked_add(rhs) } else { value.checked_sub(rhs) }.ok_or_else(overflow)?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self, depth: usize) -> Result<i64> {
        let mut value = self.factor(depth)?;
        while let Some(token) = self.peek() {
            let op = token.clone();
            match op {
                Token::Star => {
                    self.pos += 1;
                    let rhs = self.factor(depth)?;
                    value = value.checked_mul(rhs).ok_or_else(overflow)?;
                }
                Token::Slash => {
                    self.pos += 1;
                    let rhs = self.factor(depth)?;
                    if rhs == 0 {
                        return Err(Error::ExpressionError("division by zero".to_string()));
                    }
                    value /= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self, depth: usize) -> Result<i64> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::Ident(name)) => match self.variables.get(&name) {
                Some(value) => value.as_number(&name),
                None => Err(Error::ExpressionError(format!("unknown variable '{}'", name))),
            },
            Some(Token::Minus) => self.factor(depth + 1).map(|v| -v),
            Some(Token::LParen) => {
                let value = self.expr(depth + 1)?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err(Error::ExpressionError("missing ')'".to_string())),
                }
            }
            Some(other) => Err(Error::ExpressionError(format!("unexpected token {:?}", other))),
            None => Err(Error::ExpressionError("unexpected end of expression".to_string())),
        }
    }
}

fn overflow() -> Error {
    Error::ExpressionError("integer overflow".to_string())
}

/// Evaluates a bare expression (without the `{{ }}` delimiters) to an integer.
pub fn evaluate(source: &str, variables: &Variables) -> Result<i64> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(Error::ExpressionError("empty expression".to_string()));
    }
    let mut parser = Parser { tokens: &tokens, pos: 0, variables };
    let value = parser.expr(0)?;
    if parser.pos != tokens.len() {
        return Err(Error::ExpressionError(format!("trailing input in '{}'", source)));
    }
    Ok(value)
}

/// Replaces every `{{ expr }}` in `template`.
///
/// A lone variable keeps its textual value; anything else is evaluated arithmetically.
pub fn render(template: &str, variables: &Variables) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| Error::ExpressionError(format!("unterminated '{{{{' in '{}'", template)))?;
        let source = after[..end].trim();

        match variables.get(source) {
            Some(value) => out.push_str(&value.to_string()),
            None => out.push_str(&evaluate(source, variables)?.to_string()),
        }

        if out.len() > MAX_RENDERED_LEN {
            return Err(Error::ExpressionError(format!("rendered template exceeds {} bytes", MAX_RENDERED_LEN)));
        }
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Evaluates a validation operand: a literal, or a template that renders to one.
pub fn evaluate_operand(operand: &str, variables: &Variables) -> Result<i64> {
    if operand.contains("{{") {
        parse_literal(&render(operand, variables)?)
    } else {
        parse_literal(operand)
    }
}
