/*
 * expr.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Embedded expressions.
//!
//! Directive arguments and echo bodies are carried through the rewrite
//! pipeline as opaque text. When a compiled program is prepared for
//! execution, that text is parsed here into an [`Expr`] tree and later
//! interpreted against an [`ExprEnv`]. The language is a small PHP-flavoured
//! subset: `$variables`, literals, array literals, indexing, calls, the usual
//! arithmetic/comparison/logical operators, `??`, `?:`, assignments and
//! increments.

use crate::error::{TemplateError, TemplateResult};
use crate::value::Value;
use indexmap::IndexMap;
use std::cmp::Ordering;

// ── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Var(String),
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Dot,
    Bang,

    Eq,           // ==
    Ne,           // != or <>
    Identical,    // ===
    NotIdentical, // !==
    Lt,
    Le,
    Gt,
    Ge,

    And,      // &&
    Or,       // ||
    Coalesce, // ??
    Question,
    Colon,

    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    DotAssign,
    Incr,
    Decr,

    Arrow,       // ->
    DoubleArrow, // =>
    Comma,
    Semicolon,
    LParen,
    RParen,
    LBracket,
    RBracket,

    Unknown(char),
    Eof,
}

// ── Lexer ───────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer { src, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek2(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek().is_some_and(&pred) {
            self.advance();
        }
        &self.src[start..self.pos]
    }

    fn read_number(&mut self) -> Result<Token, String> {
        let start = self.pos;
        self.read_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek2().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            self.read_while(|c| c.is_ascii_digit());
            let text = &self.src[start..self.pos];
            return text
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|e| format!("invalid number {text}: {e}"));
        }
        let text = &self.src[start..self.pos];
        match text.parse::<i64>() {
            Ok(n) => Ok(Token::Int(n)),
            Err(_) => text
                .parse::<f64>()
                .map(Token::Float)
                .map_err(|e| format!("invalid number {text}: {e}")),
        }
    }

    fn read_string(&mut self, quote: char) -> Result<Token, String> {
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err("unterminated string literal".to_string()),
                Some(c) if c == quote => return Ok(Token::Str(out)),
                Some('\\') => {
                    let Some(next) = self.advance() else {
                        return Err("unterminated string literal".to_string());
                    };
                    match (quote, next) {
                        (_, '\\') => out.push('\\'),
                        (q, c) if c == q => out.push(c),
                        ('"', 'n') => out.push('\n'),
                        ('"', 't') => out.push('\t'),
                        ('"', 'r') => out.push('\r'),
                        ('"', '$') => out.push('$'),
                        (_, c) => {
                            out.push('\\');
                            out.push(c);
                        }
                    }
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn next_token(&mut self) -> Result<Token, String> {
        self.read_while(char::is_whitespace);

        let Some(ch) = self.advance() else {
            return Ok(Token::Eof);
        };

        let tok = match ch {
            '$' => {
                let name = self.read_while(is_ident_char);
                if name.is_empty() || name.starts_with(|c: char| c.is_ascii_digit()) {
                    Token::Unknown('$')
                } else {
                    Token::Var(name.to_string())
                }
            }
            c if c.is_ascii_digit() => {
                self.pos -= 1;
                return self.read_number();
            }
            c if is_ident_start(c) => {
                self.pos -= c.len_utf8();
                Token::Ident(self.read_while(is_ident_char).to_string())
            }
            '\'' | '"' => return self.read_string(ch),
            '+' => {
                if self.eat('+') {
                    Token::Incr
                } else if self.eat('=') {
                    Token::PlusAssign
                } else {
                    Token::Plus
                }
            }
            '-' => {
                if self.eat('-') {
                    Token::Decr
                } else if self.eat('=') {
                    Token::MinusAssign
                } else if self.eat('>') {
                    Token::Arrow
                } else {
                    Token::Minus
                }
            }
            '*' => {
                if self.eat('=') {
                    Token::StarAssign
                } else {
                    Token::Star
                }
            }
            '/' => {
                if self.eat('=') {
                    Token::SlashAssign
                } else {
                    Token::Slash
                }
            }
            '%' => Token::Percent,
            '.' => {
                if self.eat('=') {
                    Token::DotAssign
                } else {
                    Token::Dot
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::NotIdentical
                    } else {
                        Token::Ne
                    }
                } else {
                    Token::Bang
                }
            }
            '=' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::Identical
                    } else {
                        Token::Eq
                    }
                } else if self.eat('>') {
                    Token::DoubleArrow
                } else {
                    Token::Assign
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Le
                } else if self.eat('>') {
                    Token::Ne
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' if self.eat('&') => Token::And,
            '|' if self.eat('|') => Token::Or,
            '?' => {
                if self.eat('?') {
                    Token::Coalesce
                } else {
                    Token::Question
                }
            }
            ':' => Token::Colon,
            ',' => Token::Comma,
            ';' => Token::Semicolon,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            other => Token::Unknown(other),
        };
        Ok(tok)
    }

    fn tokenize(mut self) -> Result<Vec<Token>, String> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token()?;
            if tok == Token::Eof {
                break;
            }
            tokens.push(tok);
        }
        Ok(tokens)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

// ── AST ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Concat,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    Identical,
    NotIdentical,
    And,
    Or,
    Coalesce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
    Concat,
}

/// A parsed embedded expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    /// `[a, b]` or `['k' => v]`; entries without a key are appended.
    Array(Vec<(Option<Expr>, Expr)>),
    /// `$a[key]`; a `None` key is the append form `$a[]`, only valid as a target.
    Index(Box<Expr>, Option<Box<Expr>>),
    /// `$a->name`
    Property(Box<Expr>, String),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    /// `c ? a : b`, or the short form `c ?: b` when the middle is `None`.
    Ternary(Box<Expr>, Option<Box<Expr>>, Box<Expr>),
    Assign(Box<Expr>, AssignOp, Box<Expr>),
    IncDec {
        target: Box<Expr>,
        delta: i64,
        prefix: bool,
    },
}

impl Expr {
    fn is_place(&self) -> bool {
        match self {
            Expr::Var(_) => true,
            Expr::Index(base, _) | Expr::Property(base, _) => base.is_place(),
            _ => false,
        }
    }
}

/// Header of a `@foreach` / `@forelse`: `source as $value` or
/// `source as $key => $value`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeachHeader {
    pub source: Expr,
    pub key: Option<String>,
    pub value: String,
}

/// Header of a `@for`: `init; condition; step`, each a comma list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ForHeader {
    pub init: Vec<Expr>,
    pub condition: Vec<Expr>,
    pub step: Vec<Expr>,
}

// ── Parser ──────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if matches!(self.peek(), Token::Ident(name) if name.eq_ignore_ascii_case(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), String> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(format!("expected {what}, found {:?}", self.peek()))
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    // ── Grammar ─────────────────────────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, String> {
        self.parse_assign()
    }

    fn parse_assign(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_ternary()?;
        let op = match self.peek() {
            Token::Assign => AssignOp::Set,
            Token::PlusAssign => AssignOp::Add,
            Token::MinusAssign => AssignOp::Sub,
            Token::StarAssign => AssignOp::Mul,
            Token::SlashAssign => AssignOp::Div,
            Token::DotAssign => AssignOp::Concat,
            _ => return Ok(lhs),
        };
        if !lhs.is_place() {
            return Err("left side of assignment is not assignable".to_string());
        }
        self.pos += 1;
        let rhs = self.parse_assign()?;
        Ok(Expr::Assign(Box::new(lhs), op, Box::new(rhs)))
    }

    fn parse_ternary(&mut self) -> Result<Expr, String> {
        let cond = self.parse_coalesce()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        if self.eat(&Token::Colon) {
            let otherwise = self.parse_ternary()?;
            return Ok(Expr::Ternary(Box::new(cond), None, Box::new(otherwise)));
        }
        let then = self.parse_assign()?;
        self.expect(&Token::Colon, "':' in ternary")?;
        let otherwise = self.parse_ternary()?;
        Ok(Expr::Ternary(
            Box::new(cond),
            Some(Box::new(then)),
            Box::new(otherwise),
        ))
    }

    fn parse_coalesce(&mut self) -> Result<Expr, String> {
        let lhs = self.parse_or()?;
        if self.eat(&Token::Coalesce) {
            let rhs = self.parse_coalesce()?;
            return Ok(Expr::Binary(BinOp::Coalesce, Box::new(lhs), Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) || self.eat_keyword("or") {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(BinOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_equality()?;
        while self.eat(&Token::And) || self.eat_keyword("and") {
            let rhs = self.parse_equality()?;
            lhs = Expr::Binary(BinOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_relational()?;
        loop {
            let op = match self.peek() {
                Token::Eq => BinOp::Eq,
                Token::Ne => BinOp::Ne,
                Token::Identical => BinOp::Identical,
                Token::NotIdentical => BinOp::NotIdentical,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_relational()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_relational(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = match self.peek() {
                Token::Lt => BinOp::Lt,
                Token::Le => BinOp::Le,
                Token::Gt => BinOp::Gt,
                Token::Ge => BinOp::Ge,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                Token::Dot => BinOp::Concat,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, String> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, String> {
        match self.peek() {
            Token::Bang => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Token::Ident(word) if word.eq_ignore_ascii_case("not") => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.parse_unary()?)))
            }
            Token::Minus => {
                self.pos += 1;
                Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.parse_unary()?)))
            }
            Token::Plus => {
                self.pos += 1;
                self.parse_unary()
            }
            Token::Incr | Token::Decr => {
                let delta = if self.advance() == Token::Incr { 1 } else { -1 };
                let target = self.parse_postfix()?;
                if !target.is_place() {
                    return Err("increment target is not assignable".to_string());
                }
                Ok(Expr::IncDec {
                    target: Box::new(target),
                    delta,
                    prefix: true,
                })
            }
            _ => self.parse_postfix(),
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, String> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::LBracket => {
                    self.pos += 1;
                    if self.eat(&Token::RBracket) {
                        expr = Expr::Index(Box::new(expr), None);
                        continue;
                    }
                    let key = self.parse_expr()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index(Box::new(expr), Some(Box::new(key)));
                }
                Token::Arrow => {
                    self.pos += 1;
                    match self.advance() {
                        Token::Ident(name) => expr = Expr::Property(Box::new(expr), name),
                        other => return Err(format!("expected property name, found {other:?}")),
                    }
                }
                Token::Incr | Token::Decr if expr.is_place() => {
                    let delta = if self.advance() == Token::Incr { 1 } else { -1 };
                    expr = Expr::IncDec {
                        target: Box::new(expr),
                        delta,
                        prefix: false,
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::Int(n))),
            Token::Float(f) => Ok(Expr::Literal(Value::Float(f))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Var(name) => Ok(Expr::Var(name)),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.parse_list(&Token::RParen)?;
                    self.expect(&Token::RParen, &format!("')' after arguments to {name}"))?;
                    return Ok(Expr::Call(name, args));
                }
                match name.to_ascii_lowercase().as_str() {
                    "true" => Ok(Expr::Literal(Value::Bool(true))),
                    "false" => Ok(Expr::Literal(Value::Bool(false))),
                    "null" => Ok(Expr::Literal(Value::Null)),
                    _ => Err(format!("unexpected identifier `{name}`")),
                }
            }
            Token::LParen => {
                let inner = self.parse_expr()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => self.parse_array_literal(),
            other => Err(format!("unexpected token {other:?}")),
        }
    }

    fn parse_array_literal(&mut self) -> Result<Expr, String> {
        let mut entries = Vec::new();
        while self.peek() != &Token::RBracket {
            let first = self.parse_expr()?;
            if self.eat(&Token::DoubleArrow) {
                let value = self.parse_expr()?;
                entries.push((Some(first), value));
            } else {
                entries.push((None, first));
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RBracket, "']' closing array literal")?;
        Ok(Expr::Array(entries))
    }

    /// Comma-separated expressions up to (not including) `end`.
    fn parse_list(&mut self, end: &Token) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        if self.peek() == end || self.at_end() {
            return Ok(items);
        }
        items.push(self.parse_expr()?);
        while self.eat(&Token::Comma) {
            if self.peek() == end {
                break;
            }
            items.push(self.parse_expr()?);
        }
        Ok(items)
    }

    fn finish(&self) -> Result<(), String> {
        if self.at_end() {
            Ok(())
        } else {
            Err(format!("unexpected trailing {:?}", self.peek()))
        }
    }
}

fn with_parser<T>(
    src: &str,
    f: impl FnOnce(&mut Parser) -> Result<T, String>,
) -> TemplateResult<T> {
    let wrap = |message: String| TemplateError::ExpressionError {
        expression: src.trim().to_string(),
        message,
    };
    let tokens = Lexer::new(src).tokenize().map_err(wrap)?;
    if let Some(Token::Unknown(c)) = tokens.iter().find(|t| matches!(t, Token::Unknown(_))) {
        return Err(wrap(format!("unexpected character `{c}`")));
    }
    let mut parser = Parser::new(tokens);
    let result = f(&mut parser).map_err(wrap)?;
    parser.finish().map_err(wrap)?;
    Ok(result)
}

/// Parse a single expression.
pub fn parse_expression(src: &str) -> TemplateResult<Expr> {
    with_parser(src, |p| {
        if p.at_end() {
            return Err("empty expression".to_string());
        }
        p.parse_expr()
    })
}

/// Parse a comma-separated argument list (possibly empty).
pub fn parse_arguments(src: &str) -> TemplateResult<Vec<Expr>> {
    with_parser(src, |p| p.parse_list(&Token::Eof))
}

/// Parse `;`-separated statements, skipping empty ones.
pub fn parse_statements(src: &str) -> TemplateResult<Vec<Expr>> {
    with_parser(src, |p| {
        let mut statements = Vec::new();
        while !p.at_end() {
            if p.eat(&Token::Semicolon) {
                continue;
            }
            statements.push(p.parse_expr()?);
            if !p.at_end() {
                p.expect(&Token::Semicolon, "';' between statements")?;
            }
        }
        Ok(statements)
    })
}

/// Parse a `foreach` header.
pub fn parse_foreach_header(src: &str) -> TemplateResult<ForeachHeader> {
    with_parser(src, |p| {
        let source = p.parse_expr()?;
        if !p.eat_keyword("as") {
            return Err("expected `as` in loop header".to_string());
        }
        let first = match p.advance() {
            Token::Var(name) => name,
            other => return Err(format!("expected loop variable, found {other:?}")),
        };
        if p.eat(&Token::DoubleArrow) {
            match p.advance() {
                Token::Var(value) => Ok(ForeachHeader {
                    source,
                    key: Some(first),
                    value,
                }),
                other => Err(format!("expected loop value variable, found {other:?}")),
            }
        } else {
            Ok(ForeachHeader {
                source,
                key: None,
                value: first,
            })
        }
    })
}

/// Parse a `for` header.
pub fn parse_for_header(src: &str) -> TemplateResult<ForHeader> {
    with_parser(src, |p| {
        let init = p.parse_list(&Token::Semicolon)?;
        p.expect(&Token::Semicolon, "';' after loop initializer")?;
        let condition = p.parse_list(&Token::Semicolon)?;
        p.expect(&Token::Semicolon, "';' after loop condition")?;
        let step = p.parse_list(&Token::Eof)?;
        Ok(ForHeader {
            init,
            condition,
            step,
        })
    })
}

// ── Evaluator ───────────────────────────────────────────────────────────────

/// What an expression needs from the code running it.
pub trait ExprEnv {
    /// Read a variable. Unbound variables are `None`.
    fn lookup(&self, name: &str) -> Option<&Value>;

    /// Mutable access to a variable, binding it to null first if unbound.
    fn variable_mut(&mut self, name: &str) -> &mut Value;

    /// Call a built-in or registered function.
    fn call(&mut self, name: &str, args: Vec<Value>) -> TemplateResult<Value>;
}

/// Evaluate an [`Expr`] against the given environment.
pub fn evaluate(expr: &Expr, env: &mut dyn ExprEnv) -> TemplateResult<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),

        Expr::Var(name) => match env.lookup(name) {
            Some(v) => Ok(v.clone()),
            None => {
                tracing::trace!(variable = %name, "undefined template variable");
                Ok(Value::Null)
            }
        },

        Expr::Array(entries) => {
            let mut map = IndexMap::new();
            let mut is_list = true;
            let mut next_index: i64 = 0;
            for (key, value) in entries {
                let value = evaluate(value, env)?;
                let key = match key {
                    Some(k) => {
                        is_list = false;
                        let k = evaluate(k, env)?;
                        if let Value::Int(n) = k {
                            next_index = next_index.max(n.saturating_add(1));
                        }
                        k.render()
                    }
                    None => {
                        let k = next_index.to_string();
                        next_index = next_index.saturating_add(1);
                        k
                    }
                };
                map.insert(key, value);
            }
            if is_list {
                Ok(Value::List(map.into_values().collect()))
            } else {
                Ok(Value::Map(map))
            }
        }

        Expr::Index(base, key) => {
            let Some(key) = key else {
                return Err(TemplateError::eval("cannot use [] for reading"));
            };
            let base = evaluate(base, env)?;
            let key = evaluate(key, env)?;
            Ok(base.get(&key).cloned().unwrap_or_default())
        }

        Expr::Property(base, name) => {
            let base = evaluate(base, env)?;
            Ok(base
                .get(&Value::String(name.clone()))
                .cloned()
                .unwrap_or_default())
        }

        Expr::Call(name, arg_exprs) => {
            let mut args = Vec::with_capacity(arg_exprs.len());
            for arg in arg_exprs {
                args.push(evaluate(arg, env)?);
            }
            env.call(name, args)
        }

        Expr::Unary(op, inner) => {
            let v = evaluate(inner, env)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!v.is_truthy())),
                UnaryOp::Neg => arithmetic(BinOp::Sub, &Value::Int(0), &v),
            }
        }

        Expr::Binary(op, lhs, rhs) => {
            // Short-circuit for &&, || and ??
            match op {
                BinOp::And => {
                    let l = evaluate(lhs, env)?;
                    if !l.is_truthy() {
                        return Ok(Value::Bool(false));
                    }
                    return Ok(Value::Bool(evaluate(rhs, env)?.is_truthy()));
                }
                BinOp::Or => {
                    let l = evaluate(lhs, env)?;
                    if l.is_truthy() {
                        return Ok(Value::Bool(true));
                    }
                    return Ok(Value::Bool(evaluate(rhs, env)?.is_truthy()));
                }
                BinOp::Coalesce => {
                    let l = evaluate(lhs, env)?;
                    if !l.is_null() {
                        return Ok(l);
                    }
                    return evaluate(rhs, env);
                }
                _ => {}
            }
            let l = evaluate(lhs, env)?;
            let r = evaluate(rhs, env)?;
            binary(*op, &l, &r)
        }

        Expr::Ternary(cond, then, otherwise) => {
            let c = evaluate(cond, env)?;
            match (c.is_truthy(), then) {
                (true, Some(then)) => evaluate(then, env),
                (true, None) => Ok(c),
                (false, _) => evaluate(otherwise, env),
            }
        }

        Expr::Assign(target, op, rhs) => {
            let rhs = evaluate(rhs, env)?;
            let new_value = match op {
                AssignOp::Set => rhs,
                _ => {
                    let current = evaluate(target, env)?;
                    let bin = match op {
                        AssignOp::Add => BinOp::Add,
                        AssignOp::Sub => BinOp::Sub,
                        AssignOp::Mul => BinOp::Mul,
                        AssignOp::Div => BinOp::Div,
                        AssignOp::Concat => BinOp::Concat,
                        AssignOp::Set => unreachable!(),
                    };
                    binary(bin, &current, &rhs)?
                }
            };
            *place_mut(target, env)? = new_value.clone();
            Ok(new_value)
        }

        Expr::IncDec {
            target,
            delta,
            prefix,
        } => {
            let current = evaluate(target, env)?;
            let updated = arithmetic(BinOp::Add, &current, &Value::Int(*delta))?;
            *place_mut(target, env)? = updated.clone();
            Ok(if *prefix { updated } else { current })
        }
    }
}

/// Resolve an assignable expression to a mutable slot, creating intermediate
/// lists/maps as needed.
fn place_mut<'e>(target: &Expr, env: &'e mut dyn ExprEnv) -> TemplateResult<&'e mut Value> {
    // Flatten the access chain first so that every key is evaluated before
    // the environment is borrowed mutably.
    let mut keys: Vec<Option<Value>> = Vec::new();
    let mut cursor = target;
    let root = loop {
        match cursor {
            Expr::Var(name) => break name.clone(),
            Expr::Index(base, key) => {
                let key = match key {
                    Some(k) => Some(evaluate(k, env)?),
                    None => None,
                };
                keys.push(key);
                cursor = base;
            }
            Expr::Property(base, name) => {
                keys.push(Some(Value::String(name.clone())));
                cursor = base;
            }
            _ => return Err(TemplateError::eval("expression is not assignable")),
        }
    };
    keys.reverse();

    let mut slot = env.variable_mut(&root);
    for key in keys {
        slot = child_slot(slot, key)?;
    }
    Ok(slot)
}

fn child_slot(slot: &mut Value, key: Option<Value>) -> TemplateResult<&mut Value> {
    if slot.is_null() {
        *slot = match &key {
            None | Some(Value::Int(_)) => Value::List(Vec::new()),
            Some(_) => Value::Map(IndexMap::new()),
        };
    }
    // A key that is not a list index turns a list into a map.
    let non_index_key = key
        .as_ref()
        .is_some_and(|k| k.as_i64().and_then(|i| usize::try_from(i).ok()).is_none());
    if non_index_key && matches!(slot, Value::List(_)) {
        if let Value::List(items) = std::mem::take(slot) {
            *slot = Value::Map(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| (i.to_string(), v))
                    .collect(),
            );
        }
    }

    match slot {
        Value::List(items) => {
            let index = match &key {
                None => items.len(),
                Some(k) => k
                    .as_i64()
                    .and_then(|i| usize::try_from(i).ok())
                    .unwrap_or(usize::MAX),
            };
            match index.cmp(&items.len()) {
                Ordering::Less => Ok(&mut items[index]),
                Ordering::Equal => {
                    items.push(Value::Null);
                    Ok(&mut items[index])
                }
                Ordering::Greater => Err(TemplateError::eval(format!(
                    "list index {index} is out of range (length {})",
                    items.len()
                ))),
            }
        }
        Value::Map(map) => {
            let name = match key {
                Some(k) => k.render(),
                None => map.len().to_string(),
            };
            Ok(map.entry(name).or_insert(Value::Null))
        }
        other => Err(TemplateError::eval(format!(
            "cannot index into a {} value",
            other.type_name()
        ))),
    }
}

fn binary(op: BinOp, l: &Value, r: &Value) -> TemplateResult<Value> {
    match op {
        BinOp::Concat => Ok(Value::String(format!("{}{}", l.render(), r.render()))),
        BinOp::Eq => Ok(Value::Bool(l.loose_eq(r))),
        BinOp::Ne => Ok(Value::Bool(!l.loose_eq(r))),
        BinOp::Identical => Ok(Value::Bool(l.strict_eq(r))),
        BinOp::NotIdentical => Ok(Value::Bool(!l.strict_eq(r))),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ord = l.compare(r);
            Ok(Value::Bool(match (op, ord) {
                (_, None) => false,
                (BinOp::Lt, Some(o)) => o == Ordering::Less,
                (BinOp::Le, Some(o)) => o != Ordering::Greater,
                (BinOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            }))
        }
        _ => arithmetic(op, l, r),
    }
}

fn numeric_operand(v: &Value) -> TemplateResult<Value> {
    match v {
        Value::Int(_) | Value::Float(_) => Ok(v.clone()),
        Value::Null => Ok(Value::Int(0)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<i64>() {
                Ok(Value::Int(n))
            } else if let Ok(f) = s.parse::<f64>() {
                Ok(Value::Float(f))
            } else {
                Err(TemplateError::eval(format!(
                    "non-numeric value \"{s}\" in arithmetic"
                )))
            }
        }
        other => Err(TemplateError::eval(format!(
            "unsupported operand type {} in arithmetic",
            other.type_name()
        ))),
    }
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> TemplateResult<Value> {
    let l = numeric_operand(l)?;
    let r = numeric_operand(r)?;

    if let (Value::Int(a), Value::Int(b)) = (&l, &r) {
        let (a, b) = (*a, *b);
        let checked = match op {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => {
                if b == 0 {
                    return Err(TemplateError::eval("division by zero"));
                }
                match a.checked_rem(b) {
                    Some(0) => a.checked_div(b),
                    Some(_) => return Ok(Value::Float(a as f64 / b as f64)),
                    None => None,
                }
            }
            BinOp::Rem => {
                if b == 0 {
                    return Err(TemplateError::eval("modulo by zero"));
                }
                a.checked_rem(b)
            }
            _ => return Err(TemplateError::eval(format!("{op:?} is not arithmetic"))),
        };
        if let Some(n) = checked {
            return Ok(Value::Int(n));
        }
    }

    let a = l.as_f64().unwrap_or(0.0);
    let b = r.as_f64().unwrap_or(0.0);
    let result = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(TemplateError::eval("division by zero"));
            }
            a / b
        }
        BinOp::Rem => {
            let (a, b) = (a.trunc(), b.trunc());
            if b == 0.0 {
                return Err(TemplateError::eval("modulo by zero"));
            }
            let rem = a % b;
            // Modulo yields an integer whenever the remainder fits one.
            if rem.is_finite() && rem.abs() < i64::MAX as f64 {
                return Ok(Value::Int(rem as i64));
            }
            rem
        }
        _ => return Err(TemplateError::eval(format!("{op:?} is not arithmetic"))),
    };
    Ok(Value::Float(result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct TestEnv {
        vars: HashMap<String, Value>,
    }

    impl TestEnv {
        fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
            self.vars.insert(name.to_string(), value.into());
            self
        }
    }

    impl ExprEnv for TestEnv {
        fn lookup(&self, name: &str) -> Option<&Value> {
            self.vars.get(name)
        }

        fn variable_mut(&mut self, name: &str) -> &mut Value {
            self.vars.entry(name.to_string()).or_default()
        }

        fn call(&mut self, name: &str, args: Vec<Value>) -> TemplateResult<Value> {
            match name {
                "count" => Ok(Value::from(args.first().map(Value::count).unwrap_or(0))),
                _ => Err(TemplateError::UnknownFunction {
                    name: name.to_string(),
                }),
            }
        }
    }

    fn eval_in(src: &str, env: &mut TestEnv) -> Value {
        let expr = parse_expression(src).expect("expression should parse");
        evaluate(&expr, env).expect("expression should evaluate")
    }

    fn eval(src: &str) -> Value {
        eval_in(src, &mut TestEnv::default())
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(eval("1 + 2 * 3"), Value::Int(7));
        assert_eq!(eval("(1 + 2) * 3"), Value::Int(9));
        assert_eq!(eval("7 / 2"), Value::Float(3.5));
        assert_eq!(eval("8 / 2"), Value::Int(4));
        assert_eq!(eval("7 % 3"), Value::Int(1));
        assert_eq!(eval("-3 + 1"), Value::Int(-2));
    }

    #[test]
    fn test_concat_and_strings() {
        assert_eq!(eval("'a' . 'b' . 1"), Value::from("ab1"));
        assert_eq!(eval(r#""tab\there""#), Value::from("tab\there"));
        assert_eq!(eval(r"'it\'s'"), Value::from("it's"));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval("1 == '1'"), Value::Bool(true));
        assert_eq!(eval("1 === '1'"), Value::Bool(false));
        assert_eq!(eval("2 < 10"), Value::Bool(true));
        assert_eq!(eval("'b' >= 'a'"), Value::Bool(true));
        assert_eq!(eval("1 <> 2"), Value::Bool(true));
    }

    #[test]
    fn test_logical_keywords_and_coalesce() {
        assert_eq!(eval("true and not false"), Value::Bool(true));
        assert_eq!(eval("false or 0"), Value::Bool(false));
        assert_eq!(eval("$missing ?? 'fallback'"), Value::from("fallback"));
        assert_eq!(eval("'' ?: 'empty'"), Value::from("empty"));
        assert_eq!(eval("1 ? 'yes' : 'no'"), Value::from("yes"));
    }

    #[test]
    fn test_variables_index_and_property() {
        let user: Value = [("name", "Ada"), ("id", "7")].into_iter().collect();
        let mut env = TestEnv::default()
            .with("user", user)
            .with("list", vec![10i64, 20]);

        assert_eq!(eval_in("$user['name']", &mut env), Value::from("Ada"));
        assert_eq!(eval_in("$user->id", &mut env), Value::from("7"));
        assert_eq!(eval_in("$list[1]", &mut env), Value::Int(20));
        assert_eq!(eval_in("$list[9]", &mut env), Value::Null);
        assert_eq!(eval_in("$nope", &mut env), Value::Null);
    }

    #[test]
    fn test_array_literals() {
        assert_eq!(eval("[1, 2]"), Value::from(vec![1i64, 2]));
        let map = eval("['a' => 1, 'b' => 2]");
        assert_eq!(map.get(&Value::from("b")), Some(&Value::Int(2)));
    }

    #[test]
    fn test_assignment_and_increment() {
        let mut env = TestEnv::default();
        eval_in("$i = 0", &mut env);
        eval_in("$i++", &mut env);
        eval_in("$i += 5", &mut env);
        assert_eq!(env.vars.get("i"), Some(&Value::Int(6)));

        assert_eq!(eval_in("$i--", &mut env), Value::Int(6));
        assert_eq!(eval_in("--$i", &mut env), Value::Int(4));

        eval_in("$s = 'a'", &mut env);
        eval_in("$s .= 'b'", &mut env);
        assert_eq!(env.vars.get("s"), Some(&Value::from("ab")));
    }

    #[test]
    fn test_index_assignment_autovivifies() {
        let mut env = TestEnv::default();
        eval_in("$list[] = 'x'", &mut env);
        eval_in("$list[] = 'y'", &mut env);
        eval_in("$map['k']['inner'] = 1", &mut env);

        assert_eq!(env.vars.get("list"), Some(&Value::from(vec!["x", "y"])));
        assert_eq!(
            env.vars.get("map").and_then(|m| m.get_path(&["k", "inner"])),
            Some(&Value::Int(1))
        );
    }

    #[test]
    fn test_function_calls() {
        let mut env = TestEnv::default().with("items", vec![1i64, 2, 3]);
        assert_eq!(eval_in("count($items) > 2", &mut env), Value::Bool(true));

        let expr = parse_expression("nope()").unwrap();
        assert!(matches!(
            evaluate(&expr, &mut env),
            Err(TemplateError::UnknownFunction { .. })
        ));
    }

    #[test]
    fn test_division_by_zero_is_an_error() {
        let expr = parse_expression("1 / 0").unwrap();
        assert!(evaluate(&expr, &mut TestEnv::default()).is_err());
    }

    #[test]
    fn test_overflowing_division_falls_back_to_float() {
        let mut env = TestEnv::default().with("n", i64::MIN);
        assert_eq!(eval_in("$n / -1", &mut env), Value::Float(-(i64::MIN as f64)));
        assert_eq!(eval_in("$n % -1", &mut env), Value::Int(0));
        assert_eq!(eval_in("$n * -1", &mut env), Value::Float(-(i64::MIN as f64)));

        let mut env = TestEnv::default().with("n", -1e30);
        assert_eq!(eval_in("$n % -1", &mut env), Value::Int(0));
        assert_eq!(eval("7.9 % 3"), Value::Int(1));
    }

    #[test]
    fn test_array_keys_at_integer_limit() {
        let list = eval("[9223372036854775807 => 'a', 'b']");
        assert_eq!(
            list.get(&Value::from("9223372036854775807")),
            Some(&Value::from("b"))
        );
        assert_eq!(list.count(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_expression("").is_err());
        assert!(parse_expression("1 +").is_err());
        assert!(parse_expression("'unterminated").is_err());
        assert!(parse_expression("1 = 2").is_err());
        assert!(parse_expression("$a $b").is_err());
        assert!(parse_expression("#").is_err());
    }

    #[test]
    fn test_parse_arguments() {
        let args = parse_arguments("'layout', ['title' => 'Home']").unwrap();
        assert_eq!(args.len(), 2);
        assert!(parse_arguments("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_statements() {
        let stmts = parse_statements("$a = 1; $b = 2;").unwrap();
        assert_eq!(stmts.len(), 2);
        assert!(parse_statements("  ").unwrap().is_empty());
    }

    #[test]
    fn test_foreach_header() {
        let header = parse_foreach_header("$users as $user").unwrap();
        assert_eq!(header.source, Expr::Var("users".to_string()));
        assert_eq!(header.key, None);
        assert_eq!(header.value, "user");

        let header = parse_foreach_header("$map as $k => $v").unwrap();
        assert_eq!(header.key.as_deref(), Some("k"));
        assert_eq!(header.value, "v");

        assert!(parse_foreach_header("$users").is_err());
    }

    #[test]
    fn test_for_header() {
        let header = parse_for_header("$i = 0; $i < 10; $i++").unwrap();
        assert_eq!(header.init.len(), 1);
        assert_eq!(header.condition.len(), 1);
        assert_eq!(header.step.len(), 1);

        let header = parse_for_header(";;").unwrap();
        assert_eq!(header, ForHeader::default());
    }
}
