//! Hand-written tokenizer for the `.bpm` source grammar.
//!
//! No parser-generator dependency: tokens carry a `Span` so the parser can
//! raise `CompileError::Syntax` with line/column pointing at the offending
//! token, the same way the rest of this codebase tracks source position.

use crate::error::{CompileError, Span};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Int(i64),
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Colon,
    Comma,
    Arrow,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<Token>, CompileError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;
    let mut line = 1usize;
    let mut column = 1usize;

    macro_rules! advance {
        () => {{
            if chars[i] == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
            i += 1;
        }};
    }

    while i < chars.len() {
        let c = chars[i];

        if c == ' ' || c == '\t' || c == '\r' || c == '\n' {
            advance!();
            continue;
        }

        if c == '/' && i + 1 < chars.len() && chars[i + 1] == '/' {
            while i < chars.len() && chars[i] != '\n' {
                advance!();
            }
            continue;
        }

        let start_span = Span::new(line, column);

        match c {
            '{' => {
                advance!();
                tokens.push(Token {
                    kind: TokenKind::LBrace,
                    span: start_span,
                });
            }
            '}' => {
                advance!();
                tokens.push(Token {
                    kind: TokenKind::RBrace,
                    span: start_span,
                });
            }
            '[' => {
                advance!();
                tokens.push(Token {
                    kind: TokenKind::LBracket,
                    span: start_span,
                });
            }
            ']' => {
                advance!();
                tokens.push(Token {
                    kind: TokenKind::RBracket,
                    span: start_span,
                });
            }
            ':' => {
                advance!();
                tokens.push(Token {
                    kind: TokenKind::Colon,
                    span: start_span,
                });
            }
            ',' => {
                advance!();
                tokens.push(Token {
                    kind: TokenKind::Comma,
                    span: start_span,
                });
            }
            '-' if i + 1 < chars.len() && chars[i + 1] == '>' => {
                advance!();
                advance!();
                tokens.push(Token {
                    kind: TokenKind::Arrow,
                    span: start_span,
                });
            }
            '-' if i + 1 < chars.len() && chars[i + 1].is_ascii_digit() => {
                let (value, consumed) = lex_int(&chars[i..]);
                for _ in 0..consumed {
                    advance!();
                }
                tokens.push(Token {
                    kind: TokenKind::Int(value),
                    span: start_span,
                });
            }
            '"' => {
                let (value, consumed) = lex_string(&chars[i..], start_span)?;
                for _ in 0..consumed {
                    advance!();
                }
                tokens.push(Token {
                    kind: TokenKind::Str(value),
                    span: start_span,
                });
            }
            c if c.is_ascii_digit() => {
                let (value, consumed) = lex_int(&chars[i..]);
                for _ in 0..consumed {
                    advance!();
                }
                tokens.push(Token {
                    kind: TokenKind::Int(value),
                    span: start_span,
                });
            }
            c if c.is_alphabetic() || c == '_' => {
                let (value, consumed) = lex_ident(&chars[i..]);
                for _ in 0..consumed {
                    advance!();
                }
                tokens.push(Token {
                    kind: TokenKind::Ident(value),
                    span: start_span,
                });
            }
            other => {
                return Err(CompileError::syntax(
                    start_span,
                    format!("unexpected character '{}'", other),
                ));
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span::new(line, column),
    });
    Ok(tokens)
}

fn lex_ident(chars: &[char]) -> (String, usize) {
    let mut n = 0;
    while n < chars.len() && (chars[n].is_alphanumeric() || chars[n] == '_') {
        n += 1;
    }
    (chars[..n].iter().collect(), n)
}

fn lex_int(chars: &[char]) -> (i64, usize) {
    let mut n = 0;
    if chars[n] == '-' {
        n += 1;
    }
    while n < chars.len() && chars[n].is_ascii_digit() {
        n += 1;
    }
    let text: String = chars[..n].iter().collect();
    (text.parse().unwrap_or(0), n)
}

fn lex_string(chars: &[char], span: Span) -> Result<(String, usize), CompileError> {
    let mut n = 1; // skip opening quote
    let mut value = String::new();
    loop {
        if n >= chars.len() {
            return Err(CompileError::syntax(span, "unterminated string literal"));
        }
        match chars[n] {
            '"' => {
                n += 1;
                break;
            }
            '\\' if n + 1 < chars.len() => {
                let escaped = chars[n + 1];
                match escaped {
                    '"' => value.push('"'),
                    '\\' => value.push('\\'),
                    'n' => value.push('\n'),
                    't' => value.push('\t'),
                    other => value.push(other),
                }
                n += 2;
            }
            c => {
                value.push(c);
                n += 1;
            }
        }
    }
    Ok((value, n))
}
