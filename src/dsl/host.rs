//! Parser for host statements: the assignments, expressions and control
//! headers that pass through the score lexer as opaque text.
//!
//! Covers a small expression language: numbers (including `.5`), strings,
//! booleans, lists, objects, variables, `track.field` access, named calls,
//! arithmetic, comparison and logic. `await` is accepted and ignored.

use super::error::CompileError;
use super::program::{AssignOp, BinaryOp, Binding, Expr, HostStmt, Place, UnaryOp};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Num(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    End,
}

/// Longest first.
const PUNCTUATION: &[&str] = &[
    "===", "!==", "==", "!=", "<=", ">=", "&&", "||", "+=", "-=", "*=", "/=", "++", "--", "(",
    ")", "[", "]", "{", "}", ",", ".", ":", ";", "=", "<", ">", "+", "-", "*", "/", "%", "!",
];

struct Lexer<'a> {
    text: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            chars: text.chars().collect(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError::unlocated(format!("{message} in '{}'", self.text.trim()))
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn tokenize(mut self) -> Result<Vec<Tok>, CompileError> {
        let mut toks = Vec::new();
        while let Some(ch) = self.peek_at(0) {
            if ch.is_whitespace() {
                self.pos += 1;
            } else if ch.is_ascii_digit() || (ch == '.' && self.peek_at(1).is_some_and(|c| c.is_ascii_digit())) {
                toks.push(self.number()?);
            } else if ch == '\'' || ch == '"' || ch == '`' {
                toks.push(self.string(ch)?);
            } else if ch.is_alphabetic() || ch == '_' || ch == '$' {
                let start = self.pos;
                while self
                    .peek_at(0)
                    .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
                {
                    self.pos += 1;
                }
                toks.push(Tok::Ident(self.chars[start..self.pos].iter().collect()));
            } else {
                toks.push(self.punct()?);
            }
        }
        toks.push(Tok::End);
        Ok(toks)
    }

    fn number(&mut self) -> Result<Tok, CompileError> {
        let start = self.pos;
        let mut seen_dot = false;
        while let Some(c) = self.peek_at(0) {
            if c.is_ascii_digit() {
                self.pos += 1;
            } else if c == '.' && !seen_dot && self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                seen_dot = true;
                self.pos += 1;
            } else {
                break;
            }
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map(Tok::Num)
            .map_err(|_| self.error(&format!("bad number '{text}'")))
    }

    fn string(&mut self, quote: char) -> Result<Tok, CompileError> {
        self.pos += 1;
        let mut out = String::new();
        loop {
            let Some(c) = self.peek_at(0) else {
                return Err(self.error("unterminated string"));
            };
            self.pos += 1;
            match c {
                c if c == quote => return Ok(Tok::Str(out)),
                '\\' => {
                    let escaped = self.peek_at(0).ok_or_else(|| self.error("unterminated string"))?;
                    self.pos += 1;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                other => out.push(other),
            }
        }
    }

    fn punct(&mut self) -> Result<Tok, CompileError> {
        for &p in PUNCTUATION {
            let len = p.chars().count();
            if self.pos + len <= self.chars.len()
                && self.chars[self.pos..self.pos + len].iter().copied().eq(p.chars())
            {
                self.pos += len;
                return Ok(Tok::Punct(p));
            }
        }
        let ch = self.chars[self.pos];
        Err(self.error(&format!("unexpected '{ch}'")))
    }
}

/// Binary operators by precedence, loosest first.
const BINARY_LEVELS: &[&[(&str, BinaryOp)]] = &[
    &[("||", BinaryOp::Or)],
    &[("&&", BinaryOp::And)],
    &[
        ("===", BinaryOp::Eq),
        ("==", BinaryOp::Eq),
        ("!==", BinaryOp::Ne),
        ("!=", BinaryOp::Ne),
    ],
    &[
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
    ],
    &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
    &[("*", BinaryOp::Mul), ("/", BinaryOp::Div), ("%", BinaryOp::Rem)],
];

const ASSIGN_OPS: &[(&str, AssignOp)] = &[
    ("=", AssignOp::Set),
    ("+=", AssignOp::Add),
    ("-=", AssignOp::Sub),
    ("*=", AssignOp::Mul),
    ("/=", AssignOp::Div),
];

struct Parser<'a> {
    text: &'a str,
    toks: Vec<Tok>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Result<Self, CompileError> {
        Ok(Self {
            text,
            toks: Lexer::new(text).tokenize()?,
            pos: 0,
        })
    }

    fn error(&self, message: &str) -> CompileError {
        CompileError::unlocated(format!("{message} in '{}'", self.text.trim()))
    }

    fn peek(&self) -> &Tok {
        self.toks.get(self.pos).unwrap_or(&Tok::End)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if tok != Tok::End {
            self.pos += 1;
        }
        tok
    }

    fn at(&self, punct: &str) -> bool {
        matches!(self.peek(), Tok::Punct(p) if *p == punct)
    }

    fn at_ident(&self, word: &str) -> bool {
        matches!(self.peek(), Tok::Ident(w) if w == word)
    }

    fn eat(&mut self, punct: &str) -> bool {
        if self.at(punct) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, punct: &str) -> Result<(), CompileError> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(self.error(&format!("expected '{punct}'")))
        }
    }

    fn ident(&mut self) -> Result<String, CompileError> {
        match self.advance() {
            Tok::Ident(name) => Ok(name),
            _ => Err(self.error("expected a name")),
        }
    }

    fn finish(&mut self) -> Result<(), CompileError> {
        self.eat(";");
        match self.peek() {
            Tok::End => Ok(()),
            _ => Err(self.error("unexpected trailing input")),
        }
    }

    fn statement(&mut self) -> Result<HostStmt, CompileError> {
        if let Tok::Ident(word) = self.peek() {
            if matches!(word.as_str(), "const" | "let" | "var") {
                self.pos += 1;
                let name = self.ident()?;
                let value = if self.eat("=") {
                    self.expression()?
                } else {
                    Expr::Undefined
                };
                return Ok(HostStmt::Declare { name, value });
            }
        }

        let expr = self.expression()?;
        for (punct, op) in ASSIGN_OPS {
            if self.eat(punct) {
                let place = self.place(&expr)?;
                let value = self.expression()?;
                return Ok(HostStmt::Assign {
                    place,
                    op: *op,
                    value,
                });
            }
        }
        for (punct, op) in [("++", AssignOp::Add), ("--", AssignOp::Sub)] {
            if self.eat(punct) {
                let place = self.place(&expr)?;
                return Ok(HostStmt::Assign {
                    place,
                    op,
                    value: Expr::Number(1.0),
                });
            }
        }
        Ok(HostStmt::Eval(expr))
    }

    fn place(&self, expr: &Expr) -> Result<Place, CompileError> {
        Place::from_expr(expr).ok_or_else(|| self.error("invalid assignment target"))
    }

    fn expression(&mut self) -> Result<Expr, CompileError> {
        self.binary(0)
    }

    fn binary(&mut self, level: usize) -> Result<Expr, CompileError> {
        let Some(ops) = BINARY_LEVELS.get(level) else {
            return self.unary();
        };
        let mut left = self.binary(level + 1)?;
        'outer: loop {
            for (punct, op) in ops.iter() {
                if self.eat(punct) {
                    let right = self.binary(level + 1)?;
                    left = Expr::Binary(*op, Box::new(left), Box::new(right));
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn unary(&mut self) -> Result<Expr, CompileError> {
        if self.eat("!") {
            return Ok(Expr::Unary(UnaryOp::Not, Box::new(self.unary()?)));
        }
        if self.eat("-") {
            return Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.unary()?)));
        }
        if self.eat("+") {
            return self.unary();
        }
        if self.at_ident("await") {
            self.pos += 1;
            return self.unary();
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(".") {
                let field = self.ident()?;
                expr = Expr::Member(Box::new(expr), field);
            } else if self.at("(") {
                let Expr::Var(name) = expr else {
                    return Err(self.error("only named functions can be called"));
                };
                self.pos += 1;
                let args = self.list_until(")")?;
                expr = Expr::Call { name, args };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, CompileError> {
        match self.advance() {
            Tok::Num(n) => Ok(Expr::Number(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(word) => Ok(match word.as_str() {
                "true" => Expr::Bool(true),
                "false" => Expr::Bool(false),
                "null" | "undefined" => Expr::Undefined,
                _ => Expr::Var(word),
            }),
            Tok::Punct("(") => {
                let expr = self.expression()?;
                self.expect(")")?;
                Ok(expr)
            }
            Tok::Punct("[") => Ok(Expr::List(self.list_until("]")?)),
            Tok::Punct("{") => self.object(),
            Tok::End => Err(self.error("unexpected end of expression")),
            Tok::Punct(p) => Err(self.error(&format!("unexpected '{p}'"))),
        }
    }

    /// Comma-separated expressions up to `close`, trailing comma allowed.
    fn list_until(&mut self, close: &str) -> Result<Vec<Expr>, CompileError> {
        let mut items = Vec::new();
        while !self.eat(close) {
            items.push(self.expression()?);
            if !self.eat(",") {
                self.expect(close)?;
                break;
            }
        }
        Ok(items)
    }

    fn object(&mut self) -> Result<Expr, CompileError> {
        let mut entries = Vec::new();
        while !self.eat("}") {
            let key = match self.advance() {
                Tok::Ident(name) | Tok::Str(name) => name,
                Tok::Num(n) => n.to_string(),
                _ => return Err(self.error("expected an object key")),
            };
            let value = if self.eat(":") {
                self.expression()?
            } else {
                Expr::Var(key.clone())
            };
            entries.push((key, value));
            if !self.eat(",") {
                self.expect("}")?;
                break;
            }
        }
        Ok(Expr::Object(entries))
    }
}

/// Parse one host statement. A trailing `;` is allowed.
pub fn parse_statement(text: &str) -> Result<HostStmt, CompileError> {
    let mut parser = Parser::new(text)?;
    let stmt = parser.statement()?;
    parser.finish()?;
    Ok(stmt)
}

pub fn parse_expression(text: &str) -> Result<Expr, CompileError> {
    let mut parser = Parser::new(text)?;
    let expr = parser.expression()?;
    parser.finish()?;
    Ok(expr)
}

/// Parse a call's argument list (the text between the parentheses).
pub fn parse_arguments(text: &str) -> Result<Vec<Expr>, CompileError> {
    let mut parser = Parser::new(text)?;
    let mut args = Vec::new();
    while !matches!(parser.peek(), Tok::End) {
        args.push(parser.expression()?);
        if !parser.eat(",") {
            break;
        }
    }
    parser.finish()?;
    Ok(args)
}

/// Parse a track's parameter list: comma-separated names.
pub fn parse_params(text: &str) -> Result<Vec<String>, CompileError> {
    let mut parser = Parser::new(text)?;
    let mut params = Vec::new();
    while !matches!(parser.peek(), Tok::End) {
        params.push(parser.ident()?);
        if !parser.eat(",") {
            break;
        }
    }
    parser.finish()?;
    Ok(params)
}

/// Parse the target of `const t = await call()`, given `const t =`.
pub fn parse_binding(text: &str) -> Result<Binding, CompileError> {
    let target = text.trim_end().trim_end_matches('=');
    let mut parser = Parser::new(target)?;
    let declare = parser.at_ident("const") || parser.at_ident("let");
    if declare {
        parser.pos += 1;
    }
    let expr = parser.postfix()?;
    let place = parser.place(&expr)?;
    parser.finish()?;
    Ok(Binding { declare, place })
}

/// A parsed `if`/`else`/`for`/`while` header.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlHeader {
    If(Expr),
    ElseIf(Expr),
    Else,
    While(Expr),
    For {
        init: Option<HostStmt>,
        cond: Option<Expr>,
        step: Option<HostStmt>,
    },
}

/// Parse a control header from its keyword and parenthesised text.
pub fn parse_control(keyword: &str, header: &str) -> Result<ControlHeader, CompileError> {
    let keyword: Vec<&str> = keyword.split_whitespace().collect();
    match keyword.as_slice() {
        ["if"] => Ok(ControlHeader::If(parse_expression(header)?)),
        ["else", "if"] => Ok(ControlHeader::ElseIf(parse_expression(header)?)),
        ["else"] => Ok(ControlHeader::Else),
        ["while"] => Ok(ControlHeader::While(parse_expression(header)?)),
        ["for"] => {
            let parts = split_top_level(header, ';');
            let [init, cond, step] = parts.as_slice() else {
                return Err(CompileError::unlocated(format!(
                    "for header needs three clauses: '{header}'"
                )));
            };
            Ok(ControlHeader::For {
                init: non_empty(init).map(parse_statement).transpose()?,
                cond: non_empty(cond).map(parse_expression).transpose()?,
                step: non_empty(step).map(parse_statement).transpose()?,
            })
        }
        _ => Err(CompileError::unlocated(format!(
            "unknown control keyword '{}'",
            keyword.join(" ")
        ))),
    }
}

fn non_empty(text: &str) -> Option<&str> {
    (!text.trim().is_empty()).then_some(text)
}

/// Split on `sep` outside of brackets and quotes.
fn split_top_level(text: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' | '`' => quote = Some(c),
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => depth -= 1,
                c if c == sep && depth == 0 => {
                    parts.push(&text[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&text[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::walker::state::{FieldRef, TrackField};

    fn num(n: f64) -> Box<Expr> {
        Box::new(Expr::Number(n))
    }

    #[test]
    fn fraction_is_division() {
        assert_eq!(
            parse_expression("3/8").unwrap(),
            Expr::Binary(BinaryOp::Div, num(3.0), num(8.0))
        );
    }

    #[test]
    fn leading_dot_number() {
        assert_eq!(parse_expression(".2").unwrap(), Expr::Number(0.2));
    }

    #[test]
    fn precedence() {
        assert_eq!(
            parse_expression("1 + 2 * 3").unwrap(),
            Expr::Binary(
                BinaryOp::Add,
                num(1.0),
                Box::new(Expr::Binary(BinaryOp::Mul, num(2.0), num(3.0)))
            )
        );
        assert!(matches!(
            parse_expression("a < 2 && b || c").unwrap(),
            Expr::Binary(BinaryOp::Or, _, _)
        ));
    }

    #[test]
    fn declaration() {
        assert_eq!(
            parse_statement("const someVar = wutVar;").unwrap(),
            HostStmt::Declare {
                name: "someVar".into(),
                value: Expr::Var("wutVar".into())
            }
        );
    }

    #[test]
    fn track_field_assignment() {
        assert_eq!(
            parse_statement("track.someVar = 'wutValue';").unwrap(),
            HostStmt::Assign {
                place: Place::Track(FieldRef::Custom("someVar".into())),
                op: AssignOp::Set,
                value: Expr::Str("wutValue".into())
            }
        );
        assert_eq!(
            parse_statement("track.beatsPerMinute *= 2").unwrap(),
            HostStmt::Assign {
                place: Place::Track(FieldRef::Field(TrackField::BeatsPerMinute)),
                op: AssignOp::Mul,
                value: Expr::Number(2.0)
            }
        );
    }

    #[test]
    fn increment() {
        assert_eq!(
            parse_statement("i++").unwrap(),
            HostStmt::Assign {
                place: Place::Var("i".into()),
                op: AssignOp::Add,
                value: Expr::Number(1.0)
            }
        );
    }

    #[test]
    fn call_with_object_argument() {
        let expr = parse_expression("await loadPreset('Oscillator', {type: 'sine', mixer: .5})").unwrap();
        let Expr::Call { name, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "loadPreset");
        assert_eq!(args.len(), 2);
        assert_eq!(
            args[1],
            Expr::Object(vec![
                ("type".into(), Expr::Str("sine".into())),
                ("mixer".into(), Expr::Number(0.5)),
            ])
        );
    }

    #[test]
    fn arguments_and_params() {
        assert_eq!(parse_arguments("").unwrap(), vec![]);
        assert_eq!(parse_arguments("1, 'a'").unwrap().len(), 2);
        assert_eq!(parse_params("a, b").unwrap(), vec!["a", "b"]);
        assert!(parse_params("1").is_err());
    }

    #[test]
    fn binding_targets() {
        assert_eq!(
            parse_binding("const t = ").unwrap(),
            Binding {
                declare: true,
                place: Place::Var("t".into())
            }
        );
        assert_eq!(
            parse_binding("track.last =").unwrap(),
            Binding {
                declare: false,
                place: Place::Track(FieldRef::Custom("last".into()))
            }
        );
    }

    #[test]
    fn for_header() {
        let header = parse_control("for", "let i = 0; i < 4; i++").unwrap();
        let ControlHeader::For { init, cond, step } = header else {
            panic!("expected for");
        };
        assert!(matches!(init, Some(HostStmt::Declare { .. })));
        assert!(matches!(cond, Some(Expr::Binary(BinaryOp::Lt, _, _))));
        assert!(matches!(step, Some(HostStmt::Assign { op: AssignOp::Add, .. })));
    }

    #[test]
    fn for_header_with_empty_clauses() {
        let header = parse_control("for", ";;").unwrap();
        assert_eq!(
            header,
            ControlHeader::For {
                init: None,
                cond: None,
                step: None
            }
        );
    }

    #[test]
    fn else_if_keyword_spacing() {
        assert!(matches!(
            parse_control("else   if", "x").unwrap(),
            ControlHeader::ElseIf(_)
        ));
    }

    #[test]
    fn errors() {
        assert!(parse_expression("1 +").is_err());
        assert!(parse_statement("3 = x").is_err());
        assert!(parse_expression("'open").is_err());
        assert!(parse_expression("a # b").is_err());
        assert!(parse_expression("x.y(1)").is_err());
    }
}
