//! Error types for the score compiler.

use thiserror::Error;

/// An error that occurred while tokenizing or compiling a score.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("[{line}:{col}] {kind:?}: {message}{}", token_suffix(*.token_index))]
pub struct CompileError {
    pub message: String,
    pub line: usize,
    pub col: usize,
    /// Index of the offending statement in the token stream, when known.
    pub token_index: Option<usize>,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LexError,
    CompileError,
}

fn token_suffix(token_index: Option<usize>) -> String {
    match token_index {
        Some(idx) => format!(" (token #{idx})"),
        None => String::new(),
    }
}

impl CompileError {
    pub fn lex(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            line,
            col,
            token_index: None,
            kind: ErrorKind::LexError,
        }
    }

    pub fn compile(message: impl Into<String>, line: usize, col: usize) -> Self {
        Self {
            message: message.into(),
            line,
            col,
            token_index: None,
            kind: ErrorKind::CompileError,
        }
    }

    /// A compile error without a known location yet; see [`CompileError::located`].
    pub fn unlocated(message: impl Into<String>) -> Self {
        Self::compile(message, 0, 0)
    }

    /// Attach the statement's position in the token stream and the source.
    pub fn located(mut self, token_index: usize, source: &str, offset: usize) -> Self {
        let (line, col) = line_col(source, offset);
        self.token_index = Some(token_index);
        self.line = line;
        self.col = col;
        self
    }
}

/// 1-based line and column of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let col = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, col)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_col_first_line() {
        assert_eq!(line_col("C4 D4", 3), (1, 4));
    }

    #[test]
    fn line_col_after_newline() {
        assert_eq!(line_col("C4\n  D4", 5), (2, 3));
    }

    #[test]
    fn display_includes_position_and_token() {
        let err = CompileError::unlocated("invalid command statement: '@@'").located(
            2,
            "C4 @@",
            3,
        );
        assert_eq!(
            err.to_string(),
            "[1:4] CompileError: invalid command statement: '@@' (token #2)"
        );
    }

    #[test]
    fn lex_error_kind() {
        let err = CompileError::lex("bad", 1, 1);
        assert_eq!(err.kind, ErrorKind::LexError);
        assert_eq!(err.token_index, None);
    }
}
