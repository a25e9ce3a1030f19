//! Token types

use crate::util::span::Span;

/// Lexer error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("line {line}: unterminated string")]
    UnterminatedString { line: u32 },
    #[error("line {line}: unterminated long string or comment")]
    UnterminatedLong { line: u32 },
    #[error("line {line}: invalid escape sequence '\\{sequence}'")]
    InvalidEscape { line: u32, sequence: String },
    #[error("line {line}: malformed number '{text}'")]
    InvalidNumber { line: u32, text: String },
    #[error("line {line}: unexpected character '{ch}'")]
    UnexpectedChar { line: u32, ch: char },
}

/// Token kind
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwAnd,
    KwBreak,
    KwDo,
    KwElse,
    KwElseif,
    KwEnd,
    KwFalse,
    KwFor,
    KwFunction,
    KwIf,
    KwIn,
    KwLocal,
    KwNil,
    KwNot,
    KwOr,
    KwRepeat,
    KwReturn,
    KwThen,
    KwTrue,
    KwUntil,
    KwWhile,

    // Identifiers and literals
    Identifier(String),
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Caret,
    Hash,
    EqEq,
    Neq,
    Le,
    Ge,
    Lt,
    Gt,
    Assign,
    DotDot,

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semicolon,
    Colon,
    Comma,
    Dot,

    Eof,
}

impl TokenKind {
    /// Map an identifier to its keyword, if it is one
    pub fn keyword(ident: &str) -> Option<TokenKind> {
        let kw = match ident {
            "and" => TokenKind::KwAnd,
            "break" => TokenKind::KwBreak,
            "do" => TokenKind::KwDo,
            "else" => TokenKind::KwElse,
            "elseif" => TokenKind::KwElseif,
            "end" => TokenKind::KwEnd,
            "false" => TokenKind::KwFalse,
            "for" => TokenKind::KwFor,
            "function" => TokenKind::KwFunction,
            "if" => TokenKind::KwIf,
            "in" => TokenKind::KwIn,
            "local" => TokenKind::KwLocal,
            "nil" => TokenKind::KwNil,
            "not" => TokenKind::KwNot,
            "or" => TokenKind::KwOr,
            "repeat" => TokenKind::KwRepeat,
            "return" => TokenKind::KwReturn,
            "then" => TokenKind::KwThen,
            "true" => TokenKind::KwTrue,
            "until" => TokenKind::KwUntil,
            "while" => TokenKind::KwWhile,
            _ => return None,
        };
        Some(kw)
    }

    /// Human readable description for parse errors
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Identifier(name) => format!("'{}'", name),
            TokenKind::IntLiteral(n) => n.to_string(),
            TokenKind::FloatLiteral(f) => f.to_string(),
            TokenKind::StringLiteral(s) => format!("\"{}\"", s),
            TokenKind::Eof => "<eof>".to_string(),
            other => format!("{:?}", other),
        }
    }
}

/// A lexed token
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    /// Line the token starts on
    pub fn line(&self) -> u32 {
        self.span.line()
    }
}
