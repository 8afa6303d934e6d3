//! The priority-ordered rule table of the score language.
//!
//! Rules are tried in declaration order at each scan position and the first
//! one that matches at the cursor wins, regardless of match length. Several
//! rules overlap (`foo(...)` is both a function call and the prefix of a
//! command), so the order here is part of the language.

use once_cell::sync::Lazy;
use regex::Regex;

use super::token::TokenKind;

/// A single lexical rule.
pub struct Rule {
    pub kind: TokenKind,
    pub pattern: Regex,
    /// Grammar used to tokenize the matched text into nested content.
    /// `None` keeps the match as plain text.
    pub inside: Option<Grammar>,
}

/// An ordered list of rules.
#[derive(Default)]
pub struct Grammar {
    rules: Vec<Rule>,
}

/// `//` to end of line.
pub const COMMENT: &str = r"//[^\r\n]*";

/// `track name(args) {`
pub const TRACK_DEFINITION: &str =
    r"\btrack\b\s*(?P<name>[$\w][$\w]+)\((?P<args>(?:[^()]|\([^()]*\))*)\)\s*\{";

/// `for (...)`, `while (...)`, `if (...)`, `else if (...)`, `else`
pub const CONTROL_HEADER: &str =
    r"\b(?P<keyword>else\s+if|if|for|while)\s*\((?P<header>(?:[^()]|\([^()]*\))*)\)|\belse\b";

/// `[const|let] target = [await] name@overrides(args)`
pub const FUNCTION_CALL: &str = r"\b(?P<assign>(?:(?:const|let)\s*)?[\w.]+\s*=\s*)?(?P<await>await\s+)?\b(?P<name>[$\w][$\w.]+)(?P<overrides>(?:[@^][^@^=;()\s]+)*)\((?P<args>(?:[^()]|\([^()]*\))*)\)";

/// `[const|let|var] target = value[;]`
///
/// The value stops at a newline, `;` or an unmatched `}`, so a one-line block
/// such as `{ x = 1 }` keeps its closing brace. Quoted strings and one level
/// of `{...}` may hold any of these.
pub const ASSIGNMENT: &str = r#"(?:(?:const|let|var)\s*)?[\w.]+\s*=(?:'[^'\n]*'|"[^"\n]*"|\{[^\n;{}]*\}|[^\n;{}'"])+;?"#;

/// `function name(args) {`
pub const FUNCTION_DEFINITION: &str =
    r"\bfunction\b\s*(?P<name>[$\w][$\w]+)(?P<args>\((?:[^()]|\([^()]*\))*\))\s*\{";

/// `C4@1/4^64`
pub const COMMAND: &str = r"\b(?P<command>[a-zA-Z][a-zA-Z0-9]*)(?P<overrides>(?:[@^][^@^=;()\s]+)*)";

/// `1/4`, `.5`, `2`, `/5`
pub const WAIT: &str = r"(?P<duration>\d*[/.]?\d+)";

/// The score grammar, compiled once.
pub static SCORE_GRAMMAR: Lazy<Grammar> = Lazy::new(Grammar::score);

impl Grammar {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// The score language, in priority order.
    pub fn score() -> Self {
        Self::new(vec![
            Rule::new(TokenKind::Comment, COMMENT),
            Rule::new(TokenKind::TrackDefinition, TRACK_DEFINITION),
            Rule::new(TokenKind::ControlHeader, CONTROL_HEADER),
            Rule::new(TokenKind::FunctionCall, FUNCTION_CALL),
            Rule::new(TokenKind::Assignment, ASSIGNMENT).nested(Grammar::default()),
            Rule::new(TokenKind::FunctionDefinition, FUNCTION_DEFINITION),
            Rule::new(TokenKind::Command, COMMAND),
            Rule::new(TokenKind::Wait, WAIT),
        ])
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Rule {
    /// Build a rule from one of the pattern constants in this module.
    ///
    /// # Panics
    /// Panics if `pattern` is not a valid regex. Patterns are compile-time
    /// constants covered by the tests below.
    pub fn new(kind: TokenKind, pattern: &str) -> Self {
        Self {
            kind,
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("bad {} rule: {e}", kind.name())),
            inside: None,
        }
    }

    pub fn nested(mut self, grammar: Grammar) -> Self {
        self.inside = Some(grammar);
        self
    }

    /// Match this rule exactly at `pos`, returning the match end.
    pub fn match_at(&self, text: &str, pos: usize) -> Option<usize> {
        self.pattern
            .find_at(text, pos)
            .filter(|m| m.start() == pos && m.end() > m.start())
            .map(|m| m.end())
    }
}

/// Anchored variants of the rule patterns, used by the code generator to
/// destructure a token's text.
pub mod anchored {
    use super::*;

    fn whole(pattern: &str) -> Regex {
        Regex::new(&format!("^(?:{pattern})$")).unwrap_or_else(|e| panic!("bad pattern: {e}"))
    }

    pub static TRACK_DEFINITION: Lazy<Regex> = Lazy::new(|| whole(super::TRACK_DEFINITION));
    pub static CONTROL_HEADER: Lazy<Regex> = Lazy::new(|| whole(super::CONTROL_HEADER));
    pub static FUNCTION_CALL: Lazy<Regex> = Lazy::new(|| whole(super::FUNCTION_CALL));
    pub static FUNCTION_DEFINITION: Lazy<Regex> =
        Lazy::new(|| whole(super::FUNCTION_DEFINITION));
    pub static COMMAND: Lazy<Regex> = Lazy::new(|| whole(super::COMMAND));
    pub static WAIT: Lazy<Regex> = Lazy::new(|| whole(super::WAIT));
}
