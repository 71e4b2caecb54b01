//! Expression Parser
//!
//! Recursive-descent parser producing [`Expression`] trees from binding
//! source strings. The grammar is the usual expression ladder — assignment,
//! conditional, logical, equality, relational, additive, multiplicative,
//! unary, postfix — with three template-language extensions:
//!
//! - converter tails: `expr | name:arg1:arg2`
//! - behavior tails: `expr & name:arg`
//! - iterator declarations: `local of iterable`
//!
//! Parsed expressions are cached per source string, since the same binding
//! source recurs across template instantiations.

use std::sync::Arc;

use dashmap::DashMap;

use super::ast::{BinaryOp, Expression, Literal, UnaryOp};
use crate::error::{Error, Result};

/// Parser with a per-instance cache of parsed expressions.
pub struct ExpressionParser {
    cache: DashMap<String, Arc<Expression>>,
    for_of_cache: DashMap<String, Arc<Expression>>,
}

impl ExpressionParser {
    /// Create a parser with empty caches.
    pub fn new() -> Self {
        Self {
            cache: DashMap::new(),
            for_of_cache: DashMap::new(),
        }
    }

    /// Parse a binding expression.
    pub fn parse(&self, source: &str) -> Result<Arc<Expression>> {
        if let Some(cached) = self.cache.get(source) {
            return Ok(cached.clone());
        }
        let mut cursor = Cursor::new(source);
        cursor.skip_ws();
        let expr = parse_expression(&mut cursor)?;
        cursor.skip_ws();
        if !cursor.eof() {
            return Err(cursor.error("unexpected trailing input"));
        }
        let expr = Arc::new(expr);
        self.cache.insert(source.to_string(), expr.clone());
        Ok(expr)
    }

    /// Parse an iterator declaration: `local of iterable`.
    pub fn parse_for_of(&self, source: &str) -> Result<Arc<Expression>> {
        if let Some(cached) = self.for_of_cache.get(source) {
            return Ok(cached.clone());
        }
        let mut cursor = Cursor::new(source);
        cursor.skip_ws();
        let local = cursor
            .ident()
            .ok_or_else(|| cursor.error("expected loop-local name"))?;
        cursor.skip_ws();
        match cursor.ident() {
            Some(kw) if kw == "of" => {}
            _ => return Err(cursor.error("expected 'of'")),
        }
        cursor.skip_ws();
        let iterable = parse_expression(&mut cursor)?;
        cursor.skip_ws();
        if !cursor.eof() {
            return Err(cursor.error("unexpected trailing input"));
        }
        let expr = Arc::new(Expression::ForOf {
            local,
            iterable: Box::new(iterable),
        });
        self.for_of_cache.insert(source.to_string(), expr.clone());
        Ok(expr)
    }

    /// Split text into an interpolation expression, or `None` when the text
    /// contains no `${}` holes.
    pub fn parse_interpolation(&self, text: &str) -> Result<Option<Expression>> {
        let mut parts: Vec<String> = Vec::new();
        let mut expressions: Vec<Expression> = Vec::new();
        let mut current = String::new();
        let mut rest = text;

        while let Some(start) = rest.find("${") {
            current.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = find_closing_brace(after)
                .ok_or_else(|| Error::Parse("unterminated interpolation".to_string()))?;
            let inner = &after[..end];
            expressions.push(self.parse(inner)?.as_ref().clone());
            parts.push(std::mem::take(&mut current));
            rest = &after[end + 1..];
        }

        if expressions.is_empty() {
            return Ok(None);
        }
        current.push_str(rest);
        parts.push(current);
        Ok(Some(Expression::Interpolation { parts, expressions }))
    }
}

impl Default for ExpressionParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Find the index of the `}` closing an interpolation hole, honoring nested
/// braces and quoted strings.
fn find_closing_brace(source: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, ch) in source.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Some(i);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

struct Cursor<'a> {
    source: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Self { source, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn eof(&self) -> bool {
        self.pos >= self.source.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.bump();
        }
    }

    /// Consume `token` if the input starts with it (after whitespace) and,
    /// for operator tokens, is not a prefix of a longer operator.
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if !self.rest().starts_with(token) {
            return false;
        }
        // Avoid eating "=" out of "==", "&" out of "&&", "|" out of "||".
        let next = self.rest()[token.len()..].chars().next();
        let conflict = match token {
            "=" => matches!(next, Some('=')),
            "!" => matches!(next, Some('=')),
            "&" => matches!(next, Some('&')),
            "|" => matches!(next, Some('|')),
            "<" | ">" => matches!(next, Some('=')),
            "==" | "!=" => matches!(next, Some('=')),
            _ => false,
        };
        if conflict {
            return false;
        }
        self.pos += token.len();
        true
    }

    /// Check for `token` without consuming.
    fn at(&mut self, token: &str) -> bool {
        self.skip_ws();
        self.rest().starts_with(token)
    }

    fn ident(&mut self) -> Option<String> {
        self.skip_ws();
        let mut chars = self.rest().char_indices();
        let (_, first) = chars.next()?;
        if !(first.is_ascii_alphabetic() || first == '_' || first == '$') {
            return None;
        }
        let mut end = first.len_utf8();
        for (i, ch) in chars {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == '$' {
                end = i + ch.len_utf8();
            } else {
                break;
            }
        }
        let word = self.rest()[..end].to_string();
        self.pos += end;
        Some(word)
    }

    /// Peek the next identifier without consuming.
    fn peek_ident(&mut self) -> Option<String> {
        let saved = self.pos;
        let word = self.ident();
        self.pos = saved;
        word
    }

    fn error(&self, message: &str) -> Error {
        Error::Parse(format!("{message} at offset {}", self.pos))
    }
}

fn parse_expression(c: &mut Cursor) -> Result<Expression> {
    let mut expr = parse_assign(c)?;

    // Converter tails bind tighter than behavior tails; both associate left.
    while c.eat("|") {
        let name = c.ident().ok_or_else(|| c.error("expected converter name"))?;
        let args = parse_tail_args(c)?;
        expr = Expression::ValueConverter {
            expr: Box::new(expr),
            name,
            args,
        };
    }
    while c.eat("&") {
        let name = c.ident().ok_or_else(|| c.error("expected behavior name"))?;
        let args = parse_tail_args(c)?;
        expr = Expression::BindingBehavior {
            expr: Box::new(expr),
            name,
            args,
        };
    }
    Ok(expr)
}

fn parse_tail_args(c: &mut Cursor) -> Result<Vec<Expression>> {
    let mut args = Vec::new();
    while c.eat(":") {
        args.push(parse_conditional(c)?);
    }
    Ok(args)
}

fn parse_assign(c: &mut Cursor) -> Result<Expression> {
    let target = parse_conditional(c)?;
    if c.eat("=") {
        let value = parse_assign(c)?;
        return Ok(Expression::Assign {
            target: Box::new(target),
            value: Box::new(value),
        });
    }
    Ok(target)
}

fn parse_conditional(c: &mut Cursor) -> Result<Expression> {
    let condition = parse_or(c)?;
    if c.eat("?") {
        let yes = parse_assign(c)?;
        if !c.eat(":") {
            return Err(c.error("expected ':' in conditional"));
        }
        let no = parse_assign(c)?;
        return Ok(Expression::Conditional {
            condition: Box::new(condition),
            yes: Box::new(yes),
            no: Box::new(no),
        });
    }
    Ok(condition)
}

fn parse_or(c: &mut Cursor) -> Result<Expression> {
    let mut left = parse_and(c)?;
    while c.eat("||") {
        let right = parse_and(c)?;
        left = binary(BinaryOp::Or, left, right);
    }
    Ok(left)
}

fn parse_and(c: &mut Cursor) -> Result<Expression> {
    let mut left = parse_equality(c)?;
    while c.eat("&&") {
        let right = parse_equality(c)?;
        left = binary(BinaryOp::And, left, right);
    }
    Ok(left)
}

fn parse_equality(c: &mut Cursor) -> Result<Expression> {
    let mut left = parse_relational(c)?;
    loop {
        let op = if c.eat("===") {
            BinaryOp::StrictEq
        } else if c.eat("!==") {
            BinaryOp::StrictNe
        } else if c.eat("==") {
            BinaryOp::Eq
        } else if c.eat("!=") {
            BinaryOp::Ne
        } else {
            return Ok(left);
        };
        let right = parse_relational(c)?;
        left = binary(op, left, right);
    }
}

fn parse_relational(c: &mut Cursor) -> Result<Expression> {
    let mut left = parse_additive(c)?;
    loop {
        // Word operators from the source language are not supported.
        if let Some(word) = c.peek_ident() {
            if word == "instanceof" || word == "in" {
                return Err(Error::UnknownOperator(word));
            }
        }
        let op = if c.eat("<=") {
            BinaryOp::Le
        } else if c.eat(">=") {
            BinaryOp::Ge
        } else if c.eat("<") {
            BinaryOp::Lt
        } else if c.eat(">") {
            BinaryOp::Gt
        } else {
            return Ok(left);
        };
        let right = parse_additive(c)?;
        left = binary(op, left, right);
    }
}

fn parse_additive(c: &mut Cursor) -> Result<Expression> {
    let mut left = parse_multiplicative(c)?;
    loop {
        let op = if c.eat("+") {
            BinaryOp::Add
        } else if c.eat("-") {
            BinaryOp::Sub
        } else {
            return Ok(left);
        };
        let right = parse_multiplicative(c)?;
        left = binary(op, left, right);
    }
}

fn parse_multiplicative(c: &mut Cursor) -> Result<Expression> {
    let mut left = parse_unary(c)?;
    loop {
        let op = if c.eat("*") {
            BinaryOp::Mul
        } else if c.eat("/") {
            BinaryOp::Div
        } else if c.eat("%") {
            BinaryOp::Mod
        } else {
            return Ok(left);
        };
        let right = parse_unary(c)?;
        left = binary(op, left, right);
    }
}

fn parse_unary(c: &mut Cursor) -> Result<Expression> {
    if let Some(word) = c.peek_ident() {
        if word == "typeof" || word == "void" {
            return Err(Error::UnknownOperator(word));
        }
    }
    let op = if c.eat("!") {
        Some(UnaryOp::Not)
    } else if c.eat("-") {
        Some(UnaryOp::Neg)
    } else if c.eat("+") {
        Some(UnaryOp::Pos)
    } else {
        None
    };
    match op {
        Some(op) => Ok(Expression::Unary {
            op,
            expr: Box::new(parse_unary(c)?),
        }),
        None => parse_postfix(c),
    }
}

fn parse_postfix(c: &mut Cursor) -> Result<Expression> {
    let mut expr = parse_primary(c)?;
    loop {
        if c.eat(".") {
            let name = c.ident().ok_or_else(|| c.error("expected member name"))?;
            if c.at("(") {
                let args = parse_call_args(c)?;
                expr = Expression::CallMember {
                    object: Box::new(expr),
                    name,
                    args,
                };
            } else {
                expr = Expression::AccessMember {
                    object: Box::new(expr),
                    name,
                };
            }
        } else if c.at("[") {
            c.eat("[");
            let key = parse_expression(c)?;
            if !c.eat("]") {
                return Err(c.error("expected ']'"));
            }
            expr = Expression::AccessKeyed {
                object: Box::new(expr),
                key: Box::new(key),
            };
        } else if c.at("(") {
            let args = parse_call_args(c)?;
            expr = match expr {
                Expression::AccessScope { name, ancestor } => Expression::CallScope {
                    name,
                    args,
                    ancestor,
                },
                Expression::AccessMember { object, name } => Expression::CallMember {
                    object,
                    name,
                    args,
                },
                other => Expression::CallFunction {
                    func: Box::new(other),
                    args,
                },
            };
        } else {
            return Ok(expr);
        }
    }
}

fn parse_call_args(c: &mut Cursor) -> Result<Vec<Expression>> {
    c.eat("(");
    let mut args = Vec::new();
    if c.eat(")") {
        return Ok(args);
    }
    loop {
        args.push(parse_assign(c)?);
        if c.eat(",") {
            continue;
        }
        if c.eat(")") {
            return Ok(args);
        }
        return Err(c.error("expected ',' or ')'"));
    }
}

fn parse_primary(c: &mut Cursor) -> Result<Expression> {
    c.skip_ws();
    match c.peek() {
        None => Err(c.error("unexpected end of expression")),
        Some(ch) if ch.is_ascii_digit() => parse_number(c),
        Some('\'') | Some('"') => {
            let value = parse_string(c)?;
            Ok(Expression::Literal {
                value: Literal::Str(value),
            })
        }
        Some('`') => parse_template_literal(c),
        Some('(') => {
            c.eat("(");
            let expr = parse_expression(c)?;
            if !c.eat(")") {
                return Err(c.error("expected ')'"));
            }
            Ok(expr)
        }
        Some('[') => {
            c.eat("[");
            let mut elements = Vec::new();
            if !c.eat("]") {
                loop {
                    elements.push(parse_assign(c)?);
                    if c.eat(",") {
                        continue;
                    }
                    if c.eat("]") {
                        break;
                    }
                    return Err(c.error("expected ',' or ']'"));
                }
            }
            Ok(Expression::ArrayLiteral { elements })
        }
        Some('{') => parse_object_literal(c),
        _ => parse_identifier_expression(c),
    }
}

fn parse_number(c: &mut Cursor) -> Result<Expression> {
    let start = c.pos;
    while matches!(c.peek(), Some(ch) if ch.is_ascii_digit()) {
        c.bump();
    }
    if c.peek() == Some('.')
        && c.rest()[1..].chars().next().is_some_and(|ch| ch.is_ascii_digit())
    {
        c.bump();
        while matches!(c.peek(), Some(ch) if ch.is_ascii_digit()) {
            c.bump();
        }
    }
    let text = &c.source[start..c.pos];
    let value: f64 = text
        .parse()
        .map_err(|_| Error::Parse(format!("invalid number '{text}'")))?;
    Ok(Expression::Literal {
        value: Literal::Number(value),
    })
}

fn parse_string(c: &mut Cursor) -> Result<String> {
    let quote = c.bump().expect("caller checked the quote");
    let mut out = String::new();
    loop {
        match c.bump() {
            None => return Err(c.error("unterminated string")),
            Some('\\') => match c.bump() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some(other) => out.push(other),
                None => return Err(c.error("unterminated string escape")),
            },
            Some(ch) if ch == quote => return Ok(out),
            Some(ch) => out.push(ch),
        }
    }
}

fn parse_template_literal(c: &mut Cursor) -> Result<Expression> {
    c.bump(); // opening backtick
    let mut cooked = Vec::new();
    let mut expressions = Vec::new();
    let mut current = String::new();
    loop {
        match c.bump() {
            None => return Err(c.error("unterminated template literal")),
            Some('`') => {
                cooked.push(current);
                return Ok(Expression::TemplateLiteral {
                    cooked,
                    expressions,
                });
            }
            Some('\\') => match c.bump() {
                Some('n') => current.push('\n'),
                Some('t') => current.push('\t'),
                Some(other) => current.push(other),
                None => return Err(c.error("unterminated template literal")),
            },
            Some('$') if c.peek() == Some('{') => {
                c.bump();
                cooked.push(std::mem::take(&mut current));
                expressions.push(parse_expression(c)?);
                if !c.eat("}") {
                    return Err(c.error("expected '}'"));
                }
            }
            Some(ch) => current.push(ch),
        }
    }
}

fn parse_object_literal(c: &mut Cursor) -> Result<Expression> {
    c.eat("{");
    let mut keys = Vec::new();
    let mut values = Vec::new();
    if c.eat("}") {
        return Ok(Expression::ObjectLiteral { keys, values });
    }
    loop {
        c.skip_ws();
        let key = match c.peek() {
            Some('\'') | Some('"') => parse_string(c)?,
            _ => c.ident().ok_or_else(|| c.error("expected object key"))?,
        };
        if c.eat(":") {
            values.push(parse_assign(c)?);
        } else {
            // Shorthand: `{ foo }` reads `foo` from scope.
            values.push(Expression::AccessScope {
                name: key.clone(),
                ancestor: 0,
            });
        }
        keys.push(key);
        if c.eat(",") {
            continue;
        }
        if c.eat("}") {
            return Ok(Expression::ObjectLiteral { keys, values });
        }
        return Err(c.error("expected ',' or '}'"));
    }
}

fn parse_identifier_expression(c: &mut Cursor) -> Result<Expression> {
    let word = c.ident().ok_or_else(|| c.error("unexpected character"))?;
    match word.as_str() {
        "true" => Ok(Expression::Literal {
            value: Literal::Bool(true),
        }),
        "false" => Ok(Expression::Literal {
            value: Literal::Bool(false),
        }),
        "null" | "undefined" => Ok(Expression::Literal {
            value: Literal::Null,
        }),
        "$this" => parse_scope_root(c, 0),
        "$parent" => {
            let mut ancestor = 1;
            loop {
                let saved = c.pos;
                if c.eat(".") {
                    if c.peek_ident().as_deref() == Some("$parent") {
                        c.ident();
                        ancestor += 1;
                        continue;
                    }
                    c.pos = saved;
                }
                break;
            }
            parse_scope_root(c, ancestor)
        }
        _ => Ok(Expression::AccessScope {
            name: word,
            ancestor: 0,
        }),
    }
}

/// After `$this` or a `$parent` chain: a following member name resolves as a
/// scoped access at that depth, otherwise the context itself is the value.
fn parse_scope_root(c: &mut Cursor, ancestor: usize) -> Result<Expression> {
    let saved = c.pos;
    if c.eat(".") {
        if let Some(name) = c.ident() {
            return Ok(Expression::AccessScope { name, ancestor });
        }
        c.pos = saved;
    }
    Ok(Expression::AccessThis { ancestor })
}

fn binary(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
