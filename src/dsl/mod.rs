//! Score compiler: text → typed tokens → listing + executable program.

pub mod codegen;
pub mod error;
pub mod grammar;
pub mod host;
pub mod lexer;
pub mod note;
pub mod overrides;
pub mod program;
pub mod token;

pub use error::{CompileError, ErrorKind};
pub use program::{Program, Song};
pub use token::{Token, TokenContent, TokenKind};

use lexer::Lexer;

/// The score compiler.
///
/// Tokenizes source text with the first-match rule table, then rewrites the
/// tokens into a procedural listing and an instruction program.
pub struct Compiler;

impl Compiler {
    /// Classify score text into a token stream. Never fails: text no rule
    /// matches is kept as literal tokens.
    pub fn tokenize(source: &str) -> Vec<Token> {
        Lexer::default().tokenize(source)
    }

    /// The generated listing body, without the root template.
    pub fn emit(source: &str) -> Result<String, CompileError> {
        let tokens = Lexer::default().tokenize_spanned(source);
        let (body, _) = codegen::generate(source, &tokens)?;
        Ok(body)
    }

    /// Compile score text into a [`Song`].
    pub fn compile(source: &str) -> Result<Song, CompileError> {
        let tokens = Lexer::default().tokenize_spanned(source);
        let (body, program) = codegen::generate(source, &tokens)?;
        log::debug!(
            "compiled {} tokens into {} procedures",
            tokens.len(),
            program.procedures.len()
        );
        Ok(Song {
            listing: codegen::wrap_root(&body),
            program,
        })
    }
}
