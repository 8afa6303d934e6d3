//! First-match lexer for the score language.
//!
//! Walks the input with a cursor. At each position the grammar rules are tried
//! in order; the first rule matching exactly at the cursor emits a typed token
//! and the cursor jumps past it. Otherwise the character is appended to the
//! current literal run. Nothing is ever dropped.

use super::grammar::{Grammar, SCORE_GRAMMAR};
use super::token::{SpannedToken, Token, TokenContent};

pub struct Lexer<'g> {
    grammar: &'g Grammar,
}

impl Default for Lexer<'static> {
    fn default() -> Self {
        Self::new(&SCORE_GRAMMAR)
    }
}

/// Cached result of a rule's last unanchored search.
#[derive(Clone, Copy)]
enum Lookahead {
    Unknown,
    /// No match anywhere at or after the searched position.
    Exhausted,
    At { start: usize, end: usize },
}

impl<'g> Lexer<'g> {
    pub fn new(grammar: &'g Grammar) -> Self {
        Self { grammar }
    }

    pub fn tokenize(&self, source: &str) -> Vec<Token> {
        self.tokenize_spanned(source)
            .into_iter()
            .map(|t| t.token)
            .collect()
    }

    /// Tokenize, keeping the byte offset of each token.
    pub fn tokenize_spanned(&self, source: &str) -> Vec<SpannedToken> {
        let rules = self.grammar.rules();
        // Each rule remembers where its next match starts. A leftmost search
        // from an earlier cursor stays valid until the cursor passes it.
        let mut cache = vec![Lookahead::Unknown; rules.len()];
        let mut tokens = Vec::new();
        let mut literal_start = 0;
        let mut pos = 0;

        while pos < source.len() {
            let mut matched = None;
            for (idx, rule) in rules.iter().enumerate() {
                let next = match cache[idx] {
                    Lookahead::Exhausted => continue,
                    Lookahead::At { start, end } if start >= pos => (start, end),
                    _ => match rule.pattern.find_at(source, pos) {
                        Some(m) => {
                            cache[idx] = Lookahead::At {
                                start: m.start(),
                                end: m.end(),
                            };
                            (m.start(), m.end())
                        }
                        None => {
                            cache[idx] = Lookahead::Exhausted;
                            continue;
                        }
                    },
                };
                if next.0 == pos && next.1 > pos {
                    matched = Some((idx, next.1));
                    break;
                }
            }

            match matched {
                Some((idx, end)) => {
                    if literal_start < pos {
                        tokens.push(SpannedToken {
                            offset: literal_start,
                            token: Token::literal(&source[literal_start..pos]),
                        });
                    }
                    let rule = &rules[idx];
                    let text = &source[pos..end];
                    let content = match &rule.inside {
                        Some(inner) => TokenContent::Nested(Lexer::new(inner).tokenize(text)),
                        None => TokenContent::Text(text.to_string()),
                    };
                    tokens.push(SpannedToken {
                        offset: pos,
                        token: Token::Typed {
                            kind: rule.kind,
                            content,
                        },
                    });
                    pos = end;
                    literal_start = end;
                }
                None => {
                    pos += source[pos..].chars().next().map_or(1, char::len_utf8);
                }
            }
        }

        if literal_start < source.len() {
            tokens.push(SpannedToken {
                offset: literal_start,
                token: Token::literal(&source[literal_start..]),
            });
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::token::{tokens_to_source, TokenKind};

    fn lex(source: &str) -> Vec<Token> {
        Lexer::default().tokenize(source)
    }

    #[test]
    fn waits_and_separators() {
        assert_eq!(
            lex("1/6; /5"),
            vec![
                Token::typed(TokenKind::Wait, "1/6"),
                Token::literal("; "),
                Token::typed(TokenKind::Wait, "/5"),
            ]
        );
    }

    #[test]
    fn command_with_overrides_is_one_token() {
        assert_eq!(
            lex("C5@3/8^.2"),
            vec![Token::typed(TokenKind::Command, "C5@3/8^.2")]
        );
    }

    #[test]
    fn track_definition_then_commands() {
        assert_eq!(
            lex("track myTrack(myTrackArg) { C4^2 D4@2 }"),
            vec![
                Token::typed(TokenKind::TrackDefinition, "track myTrack(myTrackArg) {"),
                Token::literal(" "),
                Token::typed(TokenKind::Command, "C4^2"),
                Token::literal(" "),
                Token::typed(TokenKind::Command, "D4@2"),
                Token::literal(" }"),
            ]
        );
    }

    #[test]
    fn function_call_leaves_semicolon() {
        assert_eq!(
            lex("testFunction('arg');"),
            vec![
                Token::typed(TokenKind::FunctionCall, "testFunction('arg')"),
                Token::literal(";"),
            ]
        );
    }

    #[test]
    fn assignments_are_nested_and_keep_semicolon() {
        let tokens = lex("const someVar = wutVar;let otherVar=1/7;");
        assert_eq!(
            tokens,
            vec![
                Token::Typed {
                    kind: TokenKind::Assignment,
                    content: TokenContent::Nested(vec![Token::literal("const someVar = wutVar;")]),
                },
                Token::Typed {
                    kind: TokenKind::Assignment,
                    content: TokenContent::Nested(vec![Token::literal("let otherVar=1/7;")]),
                },
            ]
        );
    }

    #[test]
    fn member_assignment() {
        let tokens = lex("track.someVar = 'wutValue';");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind(), Some(TokenKind::Assignment));
        assert_eq!(tokens[0].source(), "track.someVar = 'wutValue';");
    }

    #[test]
    fn comment_runs_to_end_of_line() {
        let tokens = lex("// intro\nC4");
        assert_eq!(tokens[0], Token::typed(TokenKind::Comment, "// intro"));
        assert_eq!(tokens[1], Token::literal("\n"));
        assert_eq!(tokens[2], Token::typed(TokenKind::Command, "C4"));
    }

    #[test]
    fn call_beats_command_by_priority() {
        let tokens = lex("lead@4(1, 2)");
        assert_eq!(tokens, vec![Token::typed(TokenKind::FunctionCall, "lead@4(1, 2)")]);
    }

    #[test]
    fn control_header_only_captures_header() {
        let tokens = lex("for (let i = 0; i < 2; i++) { C4 1 }");
        assert_eq!(
            tokens[0],
            Token::typed(TokenKind::ControlHeader, "for (let i = 0; i < 2; i++)")
        );
        assert_eq!(tokens[2], Token::typed(TokenKind::Command, "C4"));
        assert_eq!(tokens[4], Token::typed(TokenKind::Wait, "1"));
    }

    #[test]
    fn else_branches() {
        let tokens = lex("} else if (x) { } else {");
        let kinds: Vec<_> = tokens.iter().filter_map(Token::kind).collect();
        assert_eq!(kinds, vec![TokenKind::ControlHeader, TokenKind::ControlHeader]);
        assert_eq!(tokens[1].source(), "else if (x)");
        assert_eq!(tokens[3].source(), "else");
    }

    #[test]
    fn unmatched_text_is_kept() {
        let tokens = lex("C4 ~~ D4");
        assert_eq!(tokens[1], Token::literal(" ~~ "));
    }

    #[test]
    fn round_trip_and_idempotence() {
        let source = "// demo\nconst lead = loadPreset('Oscillator');\ntrack riff(n) {\n  C4@1/4 /4 E4^96 1/4;\n}\nriff(2);\n€ 2\n";
        let first = lex(source);
        assert_eq!(tokens_to_source(&first), source);
        assert_eq!(lex(source), first);
    }

    #[test]
    fn empty_input() {
        assert!(lex("").is_empty());
    }

    #[test]
    fn spans_point_into_source() {
        let source = "C4 1/2";
        let spanned = Lexer::default().tokenize_spanned(source);
        let offsets: Vec<usize> = spanned.iter().map(|t| t.offset).collect();
        assert_eq!(offsets, vec![0, 2, 3]);
    }
}
