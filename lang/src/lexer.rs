//! Line lexer: an explicit five-state machine over character classes.
//!
//! States: 0 between tokens, 1 inside an identifier, 2 inside an
//! expression run, 3 after a lone `=`, 4 inside a string literal.
//! Tokens are emitted on the transitions out of a state; the lexer never
//! fails. An unterminated string is emitted with its opening quote only
//! and rejected later by the parser.

use crate::token::{Token, TokenKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Space,
    Digit,
    Ident,
    Equals,
    Separator,
    Quote,
    Other,
}

fn classify(c: char) -> Class {
    if c.is_whitespace() {
        Class::Space
    } else if c.is_ascii_digit() {
        Class::Digit
    } else if c.is_alphabetic() || c == '_' || c == '.' {
        Class::Ident
    } else if c == '=' {
        Class::Equals
    } else if c == ',' || c == ';' {
        Class::Separator
    } else if c == '"' {
        Class::Quote
    } else {
        Class::Other
    }
}

/// True when the buffer ends in a numeric-literal run, so a following
/// letter extends the literal (hex digits, exponent markers) instead of
/// starting an identifier.
fn in_numeric_run(buf: &str) -> bool {
    let tail: Vec<char> = buf
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '.')
        .collect();
    tail.last().is_some_and(|c| c.is_ascii_digit())
}

/// Tokenize one source line. Any `//` suffix is stripped first.
pub fn tokenize_line(line: &str) -> Vec<Token> {
    let line = match line.find("//") {
        Some(pos) => &line[..pos],
        None => line,
    };

    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut state = 0u8;

    let flush = |tokens: &mut Vec<Token>, buf: &mut String, kind: TokenKind| {
        if !buf.is_empty() {
            tokens.push(Token {
                kind,
                body: std::mem::take(buf),
            });
        }
    };

    for c in line.chars() {
        let class = classify(c);
        match state {
            0 => match class {
                Class::Space => {}
                Class::Ident => {
                    buf.push(c);
                    state = 1;
                }
                Class::Digit | Class::Other => {
                    buf.push(c);
                    state = 2;
                }
                Class::Equals => {
                    buf.push(c);
                    state = 3;
                }
                Class::Separator => tokens.push(Token::separator(c)),
                Class::Quote => {
                    buf.push(c);
                    state = 4;
                }
            },
            1 => match class {
                Class::Ident | Class::Digit => buf.push(c),
                Class::Space => {
                    flush(&mut tokens, &mut buf, TokenKind::Id);
                    state = 0;
                }
                Class::Equals => {
                    flush(&mut tokens, &mut buf, TokenKind::Id);
                    buf.push(c);
                    state = 3;
                }
                Class::Separator => {
                    flush(&mut tokens, &mut buf, TokenKind::Id);
                    tokens.push(Token::separator(c));
                    state = 0;
                }
                Class::Quote => {
                    flush(&mut tokens, &mut buf, TokenKind::Id);
                    buf.push(c);
                    state = 4;
                }
                Class::Other => {
                    flush(&mut tokens, &mut buf, TokenKind::Id);
                    buf.push(c);
                    state = 2;
                }
            },
            2 => match class {
                Class::Digit | Class::Other | Class::Equals => buf.push(c),
                Class::Ident => {
                    if in_numeric_run(&buf) {
                        buf.push(c);
                    } else {
                        flush(&mut tokens, &mut buf, TokenKind::Expression);
                        buf.push(c);
                        state = 1;
                    }
                }
                Class::Space => {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    state = 0;
                }
                Class::Separator => {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    tokens.push(Token::separator(c));
                    state = 0;
                }
                Class::Quote => {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    buf.push(c);
                    state = 4;
                }
            },
            3 => match class {
                // `==` stays a single token
                Class::Equals => {
                    buf.push(c);
                    state = 2;
                }
                Class::Digit | Class::Other => {
                    buf.push(c);
                    state = 2;
                }
                Class::Ident => {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    buf.push(c);
                    state = 1;
                }
                Class::Space => {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    state = 0;
                }
                Class::Separator => {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    tokens.push(Token::separator(c));
                    state = 0;
                }
                Class::Quote => {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    buf.push(c);
                    state = 4;
                }
            },
            _ => {
                buf.push(c);
                if class == Class::Quote {
                    flush(&mut tokens, &mut buf, TokenKind::Expression);
                    state = 0;
                }
            }
        }
    }

    match state {
        1 => flush(&mut tokens, &mut buf, TokenKind::Id),
        2 | 3 | 4 => flush(&mut tokens, &mut buf, TokenKind::Expression),
        _ => {}
    }

    tokens
}
