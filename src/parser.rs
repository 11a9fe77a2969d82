//! # Query Text Parser
//!
//! Recursive descent parser for the InfluxQL-style select dialect. Parsing is
//! a two-phase process: the tokenizer turns query text into a stream of
//! position-tagged tokens, then the parser builds [`SelectStatement`] values
//! with standard operator precedence:
//!
//! 1. `OR` (lowest)
//! 2. `AND`
//! 3. comparisons (`= != =~ !~ < <= > >=`)
//! 4. `+ - | ^`
//! 5. `* / % &` (highest)
//!
//! Extensions over plain SQL: `field::field` / `field::tag` namespace hints,
//! duration literals (`5m`, `1h30m`), regex literals (`/cpu.*/`), and `$name`
//! bound parameters substituted at parse time.

use std::collections::HashMap;

use crate::ast::{Expr, Field, IdentifierType, MeasurementSource, Reference, SelectStatement, SortField};
use crate::error::{TsqlError, TsqlResult};
use crate::value::{parse_duration_str, Operator, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenType {
    Identifier,
    QuotedIdentifier,
    Keyword,
    Integer,
    Number,
    Duration,
    StringLit,
    RegexLit,
    Param,
    Operator,
    DoubleColon,
    LeftParen,
    RightParen,
    Comma,
    Dot,
    Asterisk,
    Semicolon,
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    typ: TokenType,
    text: String,
    position: usize,
}

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "BY", "ORDER", "LIMIT", "OFFSET", "ASC", "DESC", "AND",
    "OR", "AS", "TRUE", "FALSE", "NULL",
];

fn is_keyword(word: &str) -> bool {
    let upper = word.to_uppercase();
    KEYWORDS.contains(&upper.as_str())
}

/// A regex literal can only start where an operand is expected; after an
/// operand `/` is division.
fn regex_can_follow(prev: Option<&Token>) -> bool {
    match prev {
        None => true,
        Some(t) => match t.typ {
            TokenType::Identifier
            | TokenType::QuotedIdentifier
            | TokenType::Integer
            | TokenType::Number
            | TokenType::Duration
            | TokenType::StringLit
            | TokenType::RegexLit
            | TokenType::RightParen => false,
            TokenType::Keyword => !matches!(t.text.to_uppercase().as_str(), "TRUE" | "FALSE"),
            _ => true,
        },
    }
}

fn tokenize(text: &str) -> TsqlResult<Vec<Token>> {
    let mut tokens: Vec<Token> = Vec::new();
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;

    while pos < chars.len() {
        let ch = chars[pos];
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                pos += 1;
            }
            '(' => {
                tokens.push(Token {
                    typ: TokenType::LeftParen,
                    text: "(".to_string(),
                    position: pos,
                });
                pos += 1;
            }
            ')' => {
                tokens.push(Token {
                    typ: TokenType::RightParen,
                    text: ")".to_string(),
                    position: pos,
                });
                pos += 1;
            }
            ',' => {
                tokens.push(Token {
                    typ: TokenType::Comma,
                    text: ",".to_string(),
                    position: pos,
                });
                pos += 1;
            }
            ';' => {
                tokens.push(Token {
                    typ: TokenType::Semicolon,
                    text: ";".to_string(),
                    position: pos,
                });
                pos += 1;
            }
            '.' => {
                tokens.push(Token {
                    typ: TokenType::Dot,
                    text: ".".to_string(),
                    position: pos,
                });
                pos += 1;
            }
            '*' => {
                tokens.push(Token {
                    typ: TokenType::Asterisk,
                    text: "*".to_string(),
                    position: pos,
                });
                pos += 1;
            }
            '+' | '-' | '%' | '&' | '|' | '^' => {
                tokens.push(Token {
                    typ: TokenType::Operator,
                    text: ch.to_string(),
                    position: pos,
                });
                pos += 1;
            }
            '/' => {
                if regex_can_follow(tokens.last()) {
                    // regex literal: consume to the next unescaped slash
                    let start = pos;
                    pos += 1;
                    let mut pattern = String::new();
                    let mut closed = false;
                    while pos < chars.len() {
                        if chars[pos] == '\\' && pos + 1 < chars.len() && chars[pos + 1] == '/' {
                            pattern.push('/');
                            pos += 2;
                            continue;
                        }
                        if chars[pos] == '/' {
                            closed = true;
                            pos += 1;
                            break;
                        }
                        pattern.push(chars[pos]);
                        pos += 1;
                    }
                    if !closed {
                        return Err(TsqlError::parse_error("unclosed regex literal", Some(start)));
                    }
                    tokens.push(Token {
                        typ: TokenType::RegexLit,
                        text: pattern,
                        position: start,
                    });
                } else {
                    tokens.push(Token {
                        typ: TokenType::Operator,
                        text: "/".to_string(),
                        position: pos,
                    });
                    pos += 1;
                }
            }
            '=' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '~' {
                    tokens.push(Token {
                        typ: TokenType::Operator,
                        text: "=~".to_string(),
                        position: pos,
                    });
                    pos += 2;
                } else {
                    tokens.push(Token {
                        typ: TokenType::Operator,
                        text: "=".to_string(),
                        position: pos,
                    });
                    pos += 1;
                }
            }
            '!' => {
                if pos + 1 < chars.len() && (chars[pos + 1] == '=' || chars[pos + 1] == '~') {
                    tokens.push(Token {
                        typ: TokenType::Operator,
                        text: format!("!{}", chars[pos + 1]),
                        position: pos,
                    });
                    pos += 2;
                } else {
                    return Err(TsqlError::parse_error("unexpected '!'", Some(pos)));
                }
            }
            '<' | '>' => {
                if pos + 1 < chars.len() && chars[pos + 1] == '=' {
                    tokens.push(Token {
                        typ: TokenType::Operator,
                        text: format!("{}=", ch),
                        position: pos,
                    });
                    pos += 2;
                } else {
                    tokens.push(Token {
                        typ: TokenType::Operator,
                        text: ch.to_string(),
                        position: pos,
                    });
                    pos += 1;
                }
            }
            ':' => {
                if pos + 1 < chars.len() && chars[pos + 1] == ':' {
                    tokens.push(Token {
                        typ: TokenType::DoubleColon,
                        text: "::".to_string(),
                        position: pos,
                    });
                    pos += 2;
                } else {
                    return Err(TsqlError::parse_error("unexpected ':'", Some(pos)));
                }
            }
            '\'' => {
                let start = pos;
                pos += 1;
                let mut value = String::new();
                let mut closed = false;
                while pos < chars.len() {
                    if chars[pos] == '\\' && pos + 1 < chars.len() {
                        value.push(chars[pos + 1]);
                        pos += 2;
                        continue;
                    }
                    if chars[pos] == '\'' {
                        closed = true;
                        pos += 1;
                        break;
                    }
                    value.push(chars[pos]);
                    pos += 1;
                }
                if !closed {
                    return Err(TsqlError::parse_error(
                        "unclosed string literal",
                        Some(start),
                    ));
                }
                tokens.push(Token {
                    typ: TokenType::StringLit,
                    text: value,
                    position: start,
                });
            }
            '"' => {
                let start = pos;
                pos += 1;
                let mut value = String::new();
                let mut closed = false;
                while pos < chars.len() {
                    if chars[pos] == '"' {
                        closed = true;
                        pos += 1;
                        break;
                    }
                    value.push(chars[pos]);
                    pos += 1;
                }
                if !closed {
                    return Err(TsqlError::parse_error(
                        "unclosed quoted identifier",
                        Some(start),
                    ));
                }
                tokens.push(Token {
                    typ: TokenType::QuotedIdentifier,
                    text: value,
                    position: start,
                });
            }
            '$' => {
                let start = pos;
                pos += 1;
                let mut name = String::new();
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    name.push(chars[pos]);
                    pos += 1;
                }
                if name.is_empty() {
                    return Err(TsqlError::parse_error("empty parameter name", Some(start)));
                }
                tokens.push(Token {
                    typ: TokenType::Param,
                    text: name,
                    position: start,
                });
            }
            c if c.is_ascii_digit() => {
                let start = pos;
                let mut number = String::new();
                let mut is_float = false;
                while pos < chars.len() {
                    let c = chars[pos];
                    if c.is_ascii_digit() {
                        number.push(c);
                        pos += 1;
                    } else if c == '.' && !is_float && pos + 1 < chars.len() && chars[pos + 1].is_ascii_digit() {
                        is_float = true;
                        number.push(c);
                        pos += 1;
                    } else {
                        break;
                    }
                }
                // a trailing unit letter makes this a duration literal
                if pos < chars.len() && (chars[pos].is_ascii_alphabetic() || chars[pos] == 'µ') {
                    let mut dur = number;
                    while pos < chars.len()
                        && (chars[pos].is_ascii_alphanumeric() || chars[pos] == 'µ' || chars[pos] == '.')
                    {
                        dur.push(chars[pos]);
                        pos += 1;
                    }
                    tokens.push(Token {
                        typ: TokenType::Duration,
                        text: dur,
                        position: start,
                    });
                } else {
                    tokens.push(Token {
                        typ: if is_float {
                            TokenType::Number
                        } else {
                            TokenType::Integer
                        },
                        text: number,
                        position: start,
                    });
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                let mut word = String::new();
                while pos < chars.len() && (chars[pos].is_alphanumeric() || chars[pos] == '_') {
                    word.push(chars[pos]);
                    pos += 1;
                }
                let typ = if is_keyword(&word) {
                    TokenType::Keyword
                } else {
                    TokenType::Identifier
                };
                tokens.push(Token {
                    typ,
                    text: word,
                    position: start,
                });
            }
            other => {
                return Err(TsqlError::parse_error(
                    format!("unexpected character '{}'", other),
                    Some(pos),
                ));
            }
        }
    }

    tokens.push(Token {
        typ: TokenType::Eof,
        text: String::new(),
        position: text.len(),
    });
    Ok(tokens)
}

/// Parse query text into select statements, substituting `$name` bound
/// parameters. Multiple statements separated by `;` are allowed.
pub fn parse_statements(
    text: &str,
    params: &HashMap<String, Value>,
) -> TsqlResult<Vec<SelectStatement>> {
    let tokens = tokenize(text)?;
    let mut p = StatementParser {
        tokens,
        pos: 0,
        params,
    };
    let mut statements = Vec::new();
    loop {
        while p.peek_is(TokenType::Semicolon) {
            p.advance();
        }
        if p.peek_is(TokenType::Eof) {
            break;
        }
        statements.push(p.parse_select()?);
    }
    if statements.is_empty() {
        return Err(TsqlError::parse_error("empty query", None));
    }
    Ok(statements)
}

struct StatementParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    params: &'a HashMap<String, Value>,
}

impl<'a> StatementParser<'a> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_is(&self, typ: TokenType) -> bool {
        self.peek().typ == typ
    }

    fn peek_keyword(&self, word: &str) -> bool {
        let t = self.peek();
        t.typ == TokenType::Keyword && t.text.eq_ignore_ascii_case(word)
    }

    fn advance(&mut self) -> Token {
        let t = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        t
    }

    fn expect_keyword(&mut self, word: &str) -> TsqlResult<()> {
        if self.peek_keyword(word) {
            self.advance();
            Ok(())
        } else {
            let t = self.peek();
            Err(TsqlError::parse_error(
                format!("expected {}, got '{}'", word, t.text),
                Some(t.position),
            ))
        }
    }

    fn expect(&mut self, typ: TokenType, what: &str) -> TsqlResult<Token> {
        if self.peek_is(typ) {
            Ok(self.advance())
        } else {
            let t = self.peek();
            Err(TsqlError::parse_error(
                format!("expected {}, got '{}'", what, t.text),
                Some(t.position),
            ))
        }
    }

    fn parse_select(&mut self) -> TsqlResult<SelectStatement> {
        if !self.peek_keyword("SELECT") {
            let t = self.peek();
            return Err(TsqlError::parse_error(
                "only select statements are supported",
                Some(t.position),
            ));
        }
        self.advance();

        let fields = self.parse_fields()?;
        self.expect_keyword("FROM")?;
        let sources = self.parse_sources()?;

        let mut condition = None;
        if self.peek_keyword("WHERE") {
            self.advance();
            condition = Some(self.parse_expr(0)?);
        }

        let mut dimensions = Vec::new();
        if self.peek_keyword("GROUP") {
            self.advance();
            self.expect_keyword("BY")?;
            loop {
                dimensions.push(self.parse_expr(0)?);
                if self.peek_is(TokenType::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let mut sorts = Vec::new();
        if self.peek_keyword("ORDER") {
            self.advance();
            self.expect_keyword("BY")?;
            loop {
                let expr = self.parse_expr(0)?;
                let mut ascending = true;
                if self.peek_keyword("ASC") {
                    self.advance();
                } else if self.peek_keyword("DESC") {
                    self.advance();
                    ascending = false;
                }
                // a bare time reference means "sort by the time key"
                let expr = match expr.unwrap_paren() {
                    Expr::Reference(r)
                        if r.hint == IdentifierType::Any
                            && (r.name == "time" || r.name == "timestamp") =>
                    {
                        None
                    }
                    _ => Some(expr),
                };
                sorts.push(SortField { expr, ascending });
                if self.peek_is(TokenType::Comma) {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        let mut limit = None;
        if self.peek_keyword("LIMIT") {
            self.advance();
            let t = self.expect(TokenType::Integer, "integer")?;
            limit = Some(t.text.parse::<i64>().map_err(|_| {
                TsqlError::parse_error("invalid LIMIT value", Some(t.position))
            })?);
        }
        let mut offset = None;
        if self.peek_keyword("OFFSET") {
            self.advance();
            let t = self.expect(TokenType::Integer, "integer")?;
            offset = Some(t.text.parse::<i64>().map_err(|_| {
                TsqlError::parse_error("invalid OFFSET value", Some(t.position))
            })?);
        }

        if !self.peek_is(TokenType::Semicolon) && !self.peek_is(TokenType::Eof) {
            let t = self.peek();
            return Err(TsqlError::parse_error(
                format!("unexpected token '{}'", t.text),
                Some(t.position),
            ));
        }

        Ok(SelectStatement {
            fields,
            sources,
            condition,
            dimensions,
            sorts,
            limit,
            offset,
        })
    }

    fn parse_fields(&mut self) -> TsqlResult<Vec<Field>> {
        let mut fields = Vec::new();
        loop {
            let expr = self.parse_expr(0)?;
            let mut alias = None;
            if self.peek_keyword("AS") {
                self.advance();
                let t = self.peek().clone();
                match t.typ {
                    TokenType::Identifier | TokenType::QuotedIdentifier | TokenType::StringLit => {
                        alias = Some(t.text);
                        self.advance();
                    }
                    _ => {
                        return Err(TsqlError::parse_error(
                            "expected alias after AS",
                            Some(t.position),
                        ))
                    }
                }
            }
            fields.push(Field { expr, alias });
            if self.peek_is(TokenType::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(fields)
    }

    fn parse_sources(&mut self) -> TsqlResult<Vec<MeasurementSource>> {
        let mut sources = Vec::new();
        loop {
            let t = self.peek().clone();
            match t.typ {
                TokenType::Identifier | TokenType::QuotedIdentifier => {
                    self.advance();
                    if self.peek_is(TokenType::Dot) {
                        self.advance();
                        let name = self.expect_source_name()?;
                        sources.push(MeasurementSource {
                            database: Some(t.text),
                            name,
                            regex: None,
                        });
                    } else {
                        sources.push(MeasurementSource {
                            database: None,
                            name: t.text,
                            regex: None,
                        });
                    }
                }
                TokenType::RegexLit => {
                    self.advance();
                    sources.push(MeasurementSource {
                        database: None,
                        name: String::new(),
                        regex: Some(t.text),
                    });
                }
                TokenType::LeftParen => {
                    return Err(TsqlError::translate_error("not support sub query yet"));
                }
                _ => {
                    return Err(TsqlError::parse_error(
                        format!("invalid source '{}'", t.text),
                        Some(t.position),
                    ));
                }
            }
            if self.peek_is(TokenType::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(sources)
    }

    fn expect_source_name(&mut self) -> TsqlResult<String> {
        let t = self.peek().clone();
        match t.typ {
            TokenType::Identifier | TokenType::QuotedIdentifier => {
                self.advance();
                Ok(t.text)
            }
            _ => Err(TsqlError::parse_error(
                "expected measurement name",
                Some(t.position),
            )),
        }
    }

    fn operator_precedence(text: &str) -> Option<(Operator, u8)> {
        let op = match text {
            "OR" => (Operator::Or, 1),
            "AND" => (Operator::And, 2),
            "=" => (Operator::Eq, 3),
            "!=" => (Operator::Neq, 3),
            "=~" => (Operator::EqRegex, 3),
            "!~" => (Operator::NeqRegex, 3),
            "<" => (Operator::Lt, 3),
            "<=" => (Operator::Lte, 3),
            ">" => (Operator::Gt, 3),
            ">=" => (Operator::Gte, 3),
            "+" => (Operator::Add, 4),
            "-" => (Operator::Sub, 4),
            "|" => (Operator::BitOr, 4),
            "^" => (Operator::BitXor, 4),
            "*" => (Operator::Mul, 5),
            "/" => (Operator::Div, 5),
            "%" => (Operator::Mod, 5),
            "&" => (Operator::BitAnd, 5),
            _ => return None,
        };
        Some(op)
    }

    fn parse_expr(&mut self, min_prec: u8) -> TsqlResult<Expr> {
        let mut lhs = self.parse_unary()?;
        loop {
            let t = self.peek().clone();
            let text = match t.typ {
                TokenType::Operator => t.text.clone(),
                TokenType::Asterisk => "*".to_string(),
                TokenType::Keyword if t.text.eq_ignore_ascii_case("AND") => "AND".to_string(),
                TokenType::Keyword if t.text.eq_ignore_ascii_case("OR") => "OR".to_string(),
                _ => break,
            };
            let (op, prec) = match Self::operator_precedence(&text) {
                Some(v) => v,
                None => break,
            };
            if prec < min_prec {
                break;
            }
            self.advance();
            let rhs = self.parse_expr(prec + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> TsqlResult<Expr> {
        let t = self.peek().clone();
        if t.typ == TokenType::Operator && t.text == "-" {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Expr::Integer(i) => Expr::Integer(-i),
                Expr::Number(n) => Expr::Number(-n),
                Expr::DurationLit(d) => Expr::DurationLit(-d),
                other => Expr::Binary {
                    op: Operator::Sub,
                    lhs: Box::new(Expr::Integer(0)),
                    rhs: Box::new(other),
                },
            });
        }
        if t.typ == TokenType::Operator && t.text == "+" {
            self.advance();
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> TsqlResult<Expr> {
        let t = self.advance();
        match t.typ {
            TokenType::LeftParen => {
                let inner = self.parse_expr(0)?;
                self.expect(TokenType::RightParen, ")")?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            TokenType::Integer => t
                .text
                .parse::<i64>()
                .map(Expr::Integer)
                .or_else(|_| t.text.parse::<u64>().map(Expr::Unsigned))
                .map_err(|_| TsqlError::parse_error("invalid integer", Some(t.position))),
            TokenType::Number => t
                .text
                .parse::<f64>()
                .map(Expr::Number)
                .map_err(|_| TsqlError::parse_error("invalid number", Some(t.position))),
            TokenType::Duration => parse_duration_str(&t.text)
                .map(Expr::DurationLit)
                .map_err(|_| {
                    TsqlError::parse_error(
                        format!("invalid duration '{}'", t.text),
                        Some(t.position),
                    )
                }),
            TokenType::StringLit => Ok(Expr::StringLit(t.text)),
            TokenType::RegexLit => Ok(Expr::RegexLit(t.text)),
            TokenType::Asterisk => Ok(Expr::Wildcard),
            TokenType::Param => match self.params.get(&t.text) {
                Some(v) => Ok(value_to_literal(v)),
                None => Err(TsqlError::parse_error(
                    format!("missing parameter '{}'", t.text),
                    Some(t.position),
                )),
            },
            TokenType::Keyword => match t.text.to_uppercase().as_str() {
                "TRUE" => Ok(Expr::Bool(true)),
                "FALSE" => Ok(Expr::Bool(false)),
                "NULL" => Ok(Expr::Nil),
                _ => Err(TsqlError::parse_error(
                    format!("unexpected keyword '{}'", t.text),
                    Some(t.position),
                )),
            },
            TokenType::Identifier | TokenType::QuotedIdentifier => {
                if t.typ == TokenType::Identifier && self.peek_is(TokenType::LeftParen) {
                    self.advance();
                    let mut args = Vec::new();
                    if !self.peek_is(TokenType::RightParen) {
                        loop {
                            args.push(self.parse_expr(0)?);
                            if self.peek_is(TokenType::Comma) {
                                self.advance();
                            } else {
                                break;
                            }
                        }
                    }
                    self.expect(TokenType::RightParen, ")")?;
                    return Ok(Expr::Call { name: t.text, args });
                }
                let mut hint = IdentifierType::Any;
                if self.peek_is(TokenType::DoubleColon) {
                    self.advance();
                    let h = self.expect(TokenType::Identifier, "field or tag")?;
                    hint = match h.text.as_str() {
                        "field" => IdentifierType::Field,
                        "tag" => IdentifierType::Tag,
                        other => {
                            return Err(TsqlError::parse_error(
                                format!("invalid type hint '{}'", other),
                                Some(h.position),
                            ))
                        }
                    };
                }
                Ok(Expr::Reference(Reference::tagged(t.text, hint)))
            }
            _ => Err(TsqlError::parse_error(
                format!("unexpected token '{}'", t.text),
                Some(t.position),
            )),
        }
    }
}

fn value_to_literal(v: &Value) -> Expr {
    match v {
        Value::Null => Expr::Nil,
        Value::Bool(b) => Expr::Bool(*b),
        Value::Int(i) => Expr::Integer(*i),
        Value::Uint(u) => Expr::Unsigned(*u),
        Value::Float(f) => Expr::Number(*f),
        Value::String(s) => Expr::StringLit(s.clone()),
        Value::Duration(d) => Expr::DurationLit(*d),
        Value::Time(t) => Expr::Integer(t.timestamp_nanos_opt().unwrap_or(0)),
        Value::Regex(r) => Expr::RegexLit(r.as_str().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(text: &str) -> SelectStatement {
        let stmts = parse_statements(text, &HashMap::new()).unwrap();
        assert_eq!(stmts.len(), 1);
        stmts.into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_simple_select() {
        let s = parse_one("SELECT cpu, host::tag FROM system WHERE cpu > 0.5 LIMIT 10 OFFSET 2");
        assert_eq!(s.fields.len(), 2);
        assert_eq!(s.sources[0].name, "system");
        assert!(s.condition.is_some());
        assert_eq!(s.limit, Some(10));
        assert_eq!(s.offset, Some(2));
        match &s.fields[1].expr {
            Expr::Reference(r) => {
                assert_eq!(r.name, "host");
                assert_eq!(r.hint, IdentifierType::Tag);
            }
            other => panic!("unexpected field expr: {:?}", other),
        }
    }

    #[test]
    fn test_parse_group_by_time_and_functions() {
        let s = parse_one("SELECT max(usage) AS peak FROM cpu GROUP BY time(5m), host");
        assert_eq!(s.fields[0].alias.as_deref(), Some("peak"));
        assert_eq!(s.dimensions.len(), 2);
        match &s.dimensions[0] {
            Expr::Call { name, args } => {
                assert_eq!(name, "time");
                assert_eq!(args[0], Expr::DurationLit(300_000_000_000));
            }
            other => panic!("unexpected dimension: {:?}", other),
        }
    }

    #[test]
    fn test_parse_db_qualified_source() {
        let s = parse_one("SELECT x FROM telegraf.cpu");
        assert_eq!(s.sources[0].database.as_deref(), Some("telegraf"));
        assert_eq!(s.sources[0].name, "cpu");
    }

    #[test]
    fn test_parse_regex_vs_division() {
        let s = parse_one("SELECT a / b FROM m WHERE host =~ /web-\\/x.*/");
        match &s.fields[0].expr {
            Expr::Binary { op, .. } => assert_eq!(*op, Operator::Div),
            other => panic!("unexpected expr: {:?}", other),
        }
        match s.condition.unwrap() {
            Expr::Binary { op, rhs, .. } => {
                assert_eq!(op, Operator::EqRegex);
                assert_eq!(*rhs, Expr::RegexLit("web-/x.*".to_string()));
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[test]
    fn test_parse_order_by_normalizes_time() {
        let s = parse_one("SELECT x FROM m ORDER BY time DESC, max(x) ASC");
        assert_eq!(s.sorts.len(), 2);
        assert!(s.sorts[0].expr.is_none());
        assert!(!s.sorts[0].ascending);
        assert!(s.sorts[1].expr.is_some());
        assert!(s.sorts[1].ascending);
    }

    #[test]
    fn test_parse_precedence() {
        let s = parse_one("SELECT a + b * c FROM m");
        match &s.fields[0].expr {
            Expr::Binary { op, rhs, .. } => {
                assert_eq!(*op, Operator::Add);
                assert!(matches!(**rhs, Expr::Binary { op: Operator::Mul, .. }));
            }
            other => panic!("unexpected expr: {:?}", other),
        }
    }

    #[test]
    fn test_parse_params_substitute() {
        let mut params = HashMap::new();
        params.insert("host".to_string(), Value::String("web-1".to_string()));
        let stmts = parse_statements("SELECT x FROM m WHERE host = $host", &params).unwrap();
        match stmts[0].condition.clone().unwrap() {
            Expr::Binary { rhs, .. } => {
                assert_eq!(*rhs, Expr::StringLit("web-1".to_string()));
            }
            other => panic!("unexpected condition: {:?}", other),
        }
    }

    #[test]
    fn test_parse_missing_param_errors() {
        let err = parse_statements("SELECT x FROM m WHERE host = $host", &HashMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("missing parameter"));
    }

    #[test]
    fn test_subquery_rejected() {
        let err = parse_statements("SELECT x FROM (SELECT y FROM m)", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("sub query"));
    }

    #[test]
    fn test_non_select_rejected() {
        let err = parse_statements("DELETE FROM m", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("only select"));
    }

    #[test]
    fn test_wildcard_field() {
        let s = parse_one("SELECT * FROM m");
        assert_eq!(s.fields[0].expr, Expr::Wildcard);
    }
}
