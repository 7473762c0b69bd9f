//! Recursive-descent expression parser and the YAML/JSON scalar wrapper
//! (§4.2).

use super::ast::{BinOp, DottedName, Expr, InterpPart, UnOp};
use super::lexer::{LexError, Lexer, Token};
use thiserror::Error;

/// Expression source length is bounded at 400 characters pre-parse (§4.2).
pub const MAX_EXPR_LEN: usize = 400;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("expression exceeds {MAX_EXPR_LEN} character limit ({0} chars)")]
    TooLong(usize),
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("unexpected token: {0:?}")]
    UnexpectedToken(Token),
    #[error("unexpected end of expression")]
    UnexpectedEof,
    #[error("only identifiers or dotted identifier chains are callable")]
    InvalidCallTarget,
    #[error("map literal keys must be strings")]
    NonStringMapKey,
    #[error("unbalanced delimiters in interpolation")]
    UnbalancedDelimiters,
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn parse(src: &str) -> Result<Expr, ParseError> {
        if src.chars().count() > MAX_EXPR_LEN {
            return Err(ParseError::TooLong(src.chars().count()));
        }
        let tokens = Lexer::tokenize(src)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.parse_or()?;
        parser.expect_eof()?;
        Ok(expr)
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        self.tokens.get(self.pos + offset).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect_eof(&self) -> Result<(), ParseError> {
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(ParseError::UnexpectedToken(other.clone())),
        }
    }

    fn eat(&mut self, tok: &Token) -> bool {
        if self.peek() == tok {
            self.advance();
            true
        } else {
            false
        }
    }

    // or
    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_and()?;
        while self.eat(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::Or, Box::new(rhs));
        }
        Ok(lhs)
    }

    // and
    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_not()?;
        while self.eat(&Token::And) {
            let rhs = self.parse_not()?;
            lhs = Expr::Binary(Box::new(lhs), BinOp::And, Box::new(rhs));
        }
        Ok(lhs)
    }

    // not (as a low-precedence prefix sitting between and/comparison)
    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let lhs = self.parse_additive()?;
        // `in` / `not in`
        if self.eat(&Token::In) {
            let rhs = self.parse_additive()?;
            return Ok(Expr::Membership {
                needle: Box::new(lhs),
                haystack: Box::new(rhs),
                negated: false,
            });
        }
        if *self.peek() == Token::Not && *self.peek_at(1) == Token::In {
            self.advance();
            self.advance();
            let rhs = self.parse_additive()?;
            return Ok(Expr::Membership {
                needle: Box::new(lhs),
                haystack: Box::new(rhs),
                negated: true,
            });
        }
        let op = match self.peek() {
            Token::EqEq => Some(BinOp::Eq),
            Token::NotEq => Some(BinOp::NotEq),
            Token::Lt => Some(BinOp::Lt),
            Token::Gt => Some(BinOp::Gt),
            Token::Le => Some(BinOp::Le),
            Token::Ge => Some(BinOp::Ge),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let rhs = self.parse_additive()?;
            return Ok(Expr::Binary(Box::new(lhs), op, Box::new(rhs)));
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::SlashSlash => BinOp::FloorDiv,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                _ => break,
            };
            self.advance();
            let rhs = self.parse_unary()?;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Neg, Box::new(inner)));
        }
        if self.eat(&Token::Not) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Unary(UnOp::Not, Box::new(inner)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let name = match self.advance() {
                        Token::Ident(n) => n,
                        other => return Err(ParseError::UnexpectedToken(other)),
                    };
                    if matches!(self.peek(), Token::LParen) {
                        // dotted call target, e.g. a.b.c(...)
                        let mut dotted = vec![name];
                        loop {
                            if matches!(self.peek(), Token::Dot) {
                                self.advance();
                                match self.advance() {
                                    Token::Ident(n) => dotted.push(n),
                                    other => return Err(ParseError::UnexpectedToken(other)),
                                }
                            } else {
                                break;
                            }
                        }
                        if matches!(self.peek(), Token::LParen) {
                            let args = self.parse_call_args()?;
                            expr = Expr::Call(merge_dotted(expr, dotted)?, args);
                            continue;
                        } else {
                            // fall through: property chain without call
                            for seg in dotted {
                                expr = Expr::Property(Box::new(expr), seg);
                            }
                            continue;
                        }
                    }
                    expr = Expr::Property(Box::new(expr), name);
                }
                Token::LBracket => {
                    self.advance();
                    let idx = self.parse_or()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(idx));
                }
                Token::LParen => {
                    let args = self.parse_call_args()?;
                    expr = Expr::Call(expr_to_dotted(&expr)?, args);
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        self.expect(&Token::LParen)?;
        let mut args = Vec::new();
        if !matches!(self.peek(), Token::RParen) {
            loop {
                args.push(self.parse_or()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Token::Int(i) => Ok(Expr::Int(i)),
            Token::Float(f) => Ok(Expr::Double(f)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Null => Ok(Expr::Null),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if !matches!(self.peek(), Token::RBracket) {
                    loop {
                        items.push(self.parse_or()?);
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Token::LBrace => {
                let mut entries = Vec::new();
                if !matches!(self.peek(), Token::RBrace) {
                    loop {
                        let key = match self.advance() {
                            Token::Str(s) => s,
                            Token::Ident(s) => s,
                            other => return Err(ParseError::UnexpectedToken(other)),
                        };
                        self.expect(&Token::Colon)?;
                        let value = self.parse_or()?;
                        entries.push((key, value));
                        if self.eat(&Token::Comma) {
                            continue;
                        }
                        break;
                    }
                }
                self.expect(&Token::RBrace)?;
                Ok(Expr::Map(entries))
            }
            Token::Eof => Err(ParseError::UnexpectedEof),
            other => Err(ParseError::UnexpectedToken(other)),
        }
    }

    fn expect(&mut self, tok: &Token) -> Result<(), ParseError> {
        if self.peek() == tok {
            self.advance();
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken(self.peek().clone()))
        }
    }
}

fn expr_to_dotted(expr: &Expr) -> Result<DottedName, ParseError> {
    match expr {
        Expr::Ident(name) => Ok(vec![name.clone()]),
        Expr::Property(base, field) => {
            let mut dotted = expr_to_dotted(base)?;
            dotted.push(field.clone());
            Ok(dotted)
        }
        _ => Err(ParseError::InvalidCallTarget),
    }
}

fn merge_dotted(base: Expr, mut rest: Vec<String>) -> Result<DottedName, ParseError> {
    let mut dotted = expr_to_dotted(&base)?;
    dotted.append(&mut rest);
    Ok(dotted)
}

/// The four-case value-parser wrapper (§4.2): routes a YAML/JSON scalar to
/// either a literal, a whole-expression, a string interpolation, or a plain
/// string literal.
pub fn parse_value_expr(raw: &str) -> Result<Expr, ParseError> {
    let trimmed = raw.trim();
    if let Some(inner) = strip_whole_expr(trimmed) {
        return Parser::parse(inner);
    }
    if contains_expr_marker(raw) {
        return parse_interpolation(raw);
    }
    Ok(Expr::Str(raw.to_string()))
}

/// `${...}` spanning the whole (trimmed) string, delimiters balanced.
fn strip_whole_expr(trimmed: &str) -> Option<&str> {
    let inner = trimmed.strip_prefix("${")?.strip_suffix('}')?;
    if delimiters_balanced(inner) {
        Some(inner)
    } else {
        None
    }
}

fn contains_expr_marker(s: &str) -> bool {
    find_expr_spans(s).next().is_some()
}

/// Scan `s` for `${...}` spans, respecting quoted-string contents/escapes
/// inside the expression text, and returns (marker_start, marker_end,
/// inner_start, inner_end) byte offsets. `marker_end` is exclusive of the
/// closing `}`.
fn find_expr_spans(s: &str) -> impl Iterator<Item = (usize, usize, usize, usize)> + '_ {
    let bytes = s.as_bytes();
    let mut spans = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            let inner_start = i + 2;
            if let Some(end) = matching_brace(s, inner_start) {
                spans.push((i, end + 1, inner_start, end));
                i = end + 1;
                continue;
            }
        }
        i += 1;
    }
    spans.into_iter()
}

/// Find the index of the `}` matching the `{` implicitly opened just before
/// `start`, tracking `{ [ (` depth and respecting string literals/escapes.
fn matching_brace(s: &str, start: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut depth = 1i32;
    let mut i = start;
    let mut in_string: Option<u8> = None;
    while i < bytes.len() {
        let c = bytes[i];
        if let Some(q) = in_string {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        match c {
            b'"' | b'\'' => in_string = Some(c),
            b'{' | b'[' | b'(' => depth += 1,
            b'}' | b']' | b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn delimiters_balanced(s: &str) -> bool {
    matching_brace(&format!("{s}}}"), 0) == Some(s.len())
}

fn parse_interpolation(raw: &str) -> Result<Expr, ParseError> {
    let mut parts = Vec::new();
    let mut last_end = 0;
    for (marker_start, marker_end, inner_start, inner_end) in find_expr_spans(raw) {
        if marker_start > last_end {
            parts.push(InterpPart::Literal(raw[last_end..marker_start].to_string()));
        }
        let inner = &raw[inner_start..inner_end];
        parts.push(InterpPart::Expr(Parser::parse(inner)?));
        last_end = marker_end;
    }
    if last_end < raw.len() {
        parts.push(InterpPart::Literal(raw[last_end..].to_string()));
    }
    if parts.is_empty() {
        return Ok(Expr::Str(raw.to_string()));
    }
    Ok(Expr::Interpolation(parts))
}

/// Pre-processing pass: quote `${{ ... }}` map-literal expressions so a
/// YAML parser doesn't interpret their contents as flow mappings. Scans
/// the raw document text; depth tracking of `{ [ (` respects strings and
/// escapes, same as `matching_brace`.
pub fn quote_map_literals(doc: &str) -> String {
    let bytes = doc.as_bytes();
    let mut out = String::with_capacity(doc.len());
    let mut i = 0;
    while i < bytes.len() {
        if doc[i..].starts_with("${{") {
            if let Some(close) = matching_brace(doc, i + 2) {
                // close points at the outer closing '}'; the literal spans
                // i..=close (i.e. "${{ ... }}")
                let literal = &doc[i..=close];
                out.push('"');
                for c in literal.chars() {
                    if c == '"' {
                        out.push('\\');
                    }
                    out.push(c);
                }
                out.push('"');
                i = close + 1;
                continue;
            }
        }
        let ch = doc[i..].chars().next().unwrap();
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precedence() {
        let e = Parser::parse("1 + 2 * 3").unwrap();
        assert_eq!(
            e,
            Expr::Binary(
                Box::new(Expr::Int(1)),
                BinOp::Add,
                Box::new(Expr::Binary(
                    Box::new(Expr::Int(2)),
                    BinOp::Mul,
                    Box::new(Expr::Int(3))
                ))
            )
        );
    }

    #[test]
    fn parses_not_in_as_negated_membership() {
        let e = Parser::parse("x not in y").unwrap();
        match e {
            Expr::Membership { negated, .. } => assert!(negated),
            _ => panic!("expected membership"),
        }
    }

    #[test]
    fn parses_in_as_non_negated_membership() {
        let e = Parser::parse("x in y").unwrap();
        match e {
            Expr::Membership { negated, .. } => assert!(!negated),
            _ => panic!("expected membership"),
        }
    }

    #[test]
    fn parses_dotted_call() {
        let e = Parser::parse("http.get({\"url\": x})").unwrap();
        match e {
            Expr::Call(name, args) => {
                assert_eq!(name, vec!["http", "get"]);
                assert_eq!(args.len(), 1);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn too_long_expression_rejected() {
        let long = "1".repeat(401);
        assert_eq!(Parser::parse(&long), Err(ParseError::TooLong(401)));
        let ok = "1".repeat(400);
        assert!(Parser::parse(&ok).is_ok());
    }

    #[test]
    fn value_expr_whole_expression() {
        let e = parse_value_expr("${x + 1}").unwrap();
        assert!(matches!(e, Expr::Binary(..)));
    }

    #[test]
    fn value_expr_interpolation() {
        let e = parse_value_expr("hello ${name}!").unwrap();
        match e {
            Expr::Interpolation(parts) => {
                assert_eq!(parts.len(), 3);
                assert_eq!(parts[0], InterpPart::Literal("hello ".to_string()));
                assert_eq!(parts[2], InterpPart::Literal("!".to_string()));
            }
            _ => panic!("expected interpolation"),
        }
    }

    #[test]
    fn value_expr_plain_string() {
        let e = parse_value_expr("plain text").unwrap();
        assert_eq!(e, Expr::Str("plain text".to_string()));
    }

    #[test]
    fn interpolation_respects_quoted_braces() {
        let e = parse_value_expr(r#"x=${m["}"]} done"#).unwrap();
        match e {
            Expr::Interpolation(parts) => {
                assert!(matches!(&parts[1], InterpPart::Expr(_)));
            }
            _ => panic!("expected interpolation"),
        }
    }

    #[test]
    fn quote_map_literals_wraps_double_brace() {
        let doc = "x: ${{ a: 1 }}\n";
        let quoted = quote_map_literals(doc);
        assert!(quoted.starts_with("x: \""));
    }
}
