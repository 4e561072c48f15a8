//! Token model shared by the lexer, parser and expression scanner.

use serde::{Deserialize, Serialize};

/// Token categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenKind {
    /// Keywords, builtin names and user identifiers
    Id,
    /// Numeric literals, operators, parentheses and string literals
    Expression,
    /// `,` and `;`
    Separator,
}

/// A lexed token: a tag plus the raw source slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub kind: TokenKind,
    pub body: String,
}

impl Token {
    pub fn id(body: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Id,
            body: body.into(),
        }
    }

    pub fn expression(body: impl Into<String>) -> Self {
        Self {
            kind: TokenKind::Expression,
            body: body.into(),
        }
    }

    pub fn separator(c: char) -> Self {
        Self {
            kind: TokenKind::Separator,
            body: c.to_string(),
        }
    }

    pub fn is_id(&self, body: &str) -> bool {
        self.kind == TokenKind::Id && self.body == body
    }
}
