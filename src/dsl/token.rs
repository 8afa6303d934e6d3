//! Token types for the score lexer.
//!
//! A token is either a literal run of pass-through text or a typed node whose
//! content is text or a nested token sequence. Concatenating the source text
//! of every token reproduces the lexer input exactly.

use serde::Serialize;

/// The kind of a typed token. One variant per grammar rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
    Comment,
    TrackDefinition,
    ControlHeader,
    FunctionCall,
    Assignment,
    FunctionDefinition,
    Command,
    Wait,
}

impl TokenKind {
    pub fn name(self) -> &'static str {
        match self {
            TokenKind::Comment => "comment",
            TokenKind::TrackDefinition => "track-definition",
            TokenKind::ControlHeader => "control-header",
            TokenKind::FunctionCall => "function-call",
            TokenKind::Assignment => "assignment",
            TokenKind::FunctionDefinition => "function-definition",
            TokenKind::Command => "command",
            TokenKind::Wait => "wait",
        }
    }
}

/// Content of a typed token.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TokenContent {
    Text(String),
    Nested(Vec<Token>),
}

impl TokenContent {
    /// Source text covered by this content.
    pub fn source(&self) -> String {
        let mut out = String::new();
        self.write_source(&mut out);
        out
    }

    fn write_source(&self, out: &mut String) {
        match self {
            TokenContent::Text(s) => out.push_str(s),
            TokenContent::Nested(tokens) => {
                for token in tokens {
                    token.write_source(out);
                }
            }
        }
    }
}

/// A token produced by the lexer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Token {
    /// Pass-through text that matched no rule.
    Literal(String),
    Typed {
        #[serde(rename = "type")]
        kind: TokenKind,
        content: TokenContent,
    },
}

impl Token {
    pub fn literal(text: impl Into<String>) -> Self {
        Token::Literal(text.into())
    }

    pub fn typed(kind: TokenKind, text: impl Into<String>) -> Self {
        Token::Typed {
            kind,
            content: TokenContent::Text(text.into()),
        }
    }

    pub fn kind(&self) -> Option<TokenKind> {
        match self {
            Token::Literal(_) => None,
            Token::Typed { kind, .. } => Some(*kind),
        }
    }

    /// The source text this token covers.
    pub fn source(&self) -> String {
        let mut out = String::new();
        self.write_source(&mut out);
        out
    }

    fn write_source(&self, out: &mut String) {
        match self {
            Token::Literal(s) => out.push_str(s),
            Token::Typed { content, .. } => content.write_source(out),
        }
    }
}

/// A token together with the byte offset where it starts in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub offset: usize,
    pub token: Token,
}

/// Reassemble the lexer input from a token sequence.
pub fn tokens_to_source(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        token.write_source(&mut out);
    }
    out
}
