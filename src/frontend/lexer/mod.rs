//! Lexer for the script dialect
//!
//! Produces a flat token vector terminated by `Eof`.

pub mod tokens;

pub use tokens::{LexError, Token, TokenKind};

use crate::util::span::{Position, Span};

/// Tokenize a whole chunk
pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
    tracing::trace!(bytes = source.len(), "lexing chunk");
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            break;
        }
    }
    tracing::trace!(tokens = tokens.len(), "lexing complete");
    Ok(tokens)
}

/// Main lexer structure
pub struct Lexer<'a> {
    source: &'a str,
    offset: usize,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    /// Get current position
    pub fn position(&self) -> Position {
        Position::new(self.line, self.column, self.offset)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.offset..].chars().next()
    }

    fn peek_nth(
        &self,
        n: usize,
    ) -> Option<char> {
        self.source[self.offset..].chars().nth(n)
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn eat(
        &mut self,
        expected: char,
    ) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Produce the next token
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_trivia()?;
        let start = self.position();
        let Some(c) = self.advance() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                span: Span::new(start, start),
            });
        };

        let kind = match c {
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => {
                if self.eat('/') {
                    TokenKind::SlashSlash
                } else {
                    TokenKind::Slash
                }
            }
            '%' => TokenKind::Percent,
            '^' => TokenKind::Caret,
            '#' => TokenKind::Hash,
            '=' => {
                if self.eat('=') {
                    TokenKind::EqEq
                } else {
                    TokenKind::Assign
                }
            }
            '~' => {
                if self.eat('=') {
                    TokenKind::Neq
                } else {
                    return Err(LexError::UnexpectedChar { line: start.line, ch: '~' });
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            ']' => TokenKind::RBracket,
            ';' => TokenKind::Semicolon,
            ':' => TokenKind::Colon,
            ',' => TokenKind::Comma,
            '[' => match self.long_bracket_level() {
                Some(level) => TokenKind::StringLiteral(self.scan_long(level, start.line)?),
                None => TokenKind::LBracket,
            },
            '.' => {
                if self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.scan_number(start)?
                } else if self.eat('.') {
                    TokenKind::DotDot
                } else {
                    TokenKind::Dot
                }
            }
            '"' | '\'' => TokenKind::StringLiteral(self.scan_string(c, start.line)?),
            c if c.is_ascii_digit() => self.scan_number(start)?,
            c if c == '_' || unicode_ident::is_xid_start(c) => {
                let ident = self.scan_identifier(start);
                TokenKind::keyword(&ident).unwrap_or(TokenKind::Identifier(ident))
            }
            other => {
                return Err(LexError::UnexpectedChar {
                    line: start.line,
                    ch: other,
                })
            }
        };

        Ok(Token {
            kind,
            span: Span::new(start, self.position()),
        })
    }

    fn skip_trivia(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.advance();
                }
                Some('-') if self.peek_nth(1) == Some('-') => {
                    let line = self.line;
                    self.advance();
                    self.advance();
                    if self.peek() == Some('[') {
                        self.advance();
                        if let Some(level) = self.long_bracket_level() {
                            self.scan_long(level, line)?;
                            continue;
                        }
                    }
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Called after an opening `[`; consumes `=*[` and returns the level
    fn long_bracket_level(&mut self) -> Option<usize> {
        let rest = &self.source[self.offset..];
        let level = rest.chars().take_while(|&c| c == '=').count();
        if rest[level..].starts_with('[') {
            for _ in 0..=level {
                self.advance();
            }
            Some(level)
        } else {
            None
        }
    }

    fn scan_long(
        &mut self,
        level: usize,
        line: u32,
    ) -> Result<String, LexError> {
        // A newline directly after the opening bracket is not part of the text
        if self.peek() == Some('\r') {
            self.advance();
        }
        if self.peek() == Some('\n') {
            self.advance();
        }
        let close = format!("]{}]", "=".repeat(level));
        let rest = &self.source[self.offset..];
        let Some(end) = rest.find(&close) else {
            return Err(LexError::UnterminatedLong { line });
        };
        let text = rest[..end].to_string();
        // advance char by char to keep line accounting right
        let stop = self.offset + end;
        while self.offset < stop {
            self.advance();
        }
        for _ in 0..close.len() {
            self.advance();
        }
        Ok(text)
    }

    fn scan_string(
        &mut self,
        quote: char,
        line: u32,
    ) -> Result<String, LexError> {
        let mut out = String::new();
        loop {
            let Some(c) = self.advance() else {
                return Err(LexError::UnterminatedString { line });
            };
            match c {
                c if c == quote => return Ok(out),
                '\n' => return Err(LexError::UnterminatedString { line }),
                '\\' => {
                    let Some(e) = self.advance() else {
                        return Err(LexError::UnterminatedString { line });
                    };
                    match e {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        '0' => out.push('\0'),
                        '\\' => out.push('\\'),
                        '"' => out.push('"'),
                        '\'' => out.push('\''),
                        '\n' => out.push('\n'),
                        'x' => {
                            let hex: String = [self.advance(), self.advance()]
                                .into_iter()
                                .flatten()
                                .collect();
                            match u8::from_str_radix(&hex, 16) {
                                Ok(byte) if hex.len() == 2 => out.push(char::from(byte)),
                                _ => {
                                    return Err(LexError::InvalidEscape {
                                        line: self.line,
                                        sequence: format!("x{}", hex),
                                    })
                                }
                            }
                        }
                        other => {
                            return Err(LexError::InvalidEscape {
                                line: self.line,
                                sequence: other.to_string(),
                            })
                        }
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn scan_identifier(
        &mut self,
        start: Position,
    ) -> String {
        while let Some(c) = self.peek() {
            if c == '_' || unicode_ident::is_xid_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        self.source[start.offset..self.offset].to_string()
    }

    fn scan_number(
        &mut self,
        start: Position,
    ) -> Result<TokenKind, LexError> {
        let first = &self.source[start.offset..];
        if first.starts_with("0x") || first.starts_with("0X") {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.advance();
            }
            let text = &self.source[start.offset..self.offset];
            // hex literals wrap around like two's complement
            return u64::from_str_radix(&text[2..], 16)
                .map(|v| TokenKind::IntLiteral(v as i64))
                .map_err(|_| LexError::InvalidNumber {
                    line: start.line,
                    text: text.to_string(),
                });
        }

        let mut is_float = first.starts_with('.');
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                self.advance();
            } else if c == '.' && !is_float && self.peek_nth(1) != Some('.') {
                is_float = true;
                self.advance();
            } else if c == 'e' || c == 'E' {
                is_float = true;
                self.advance();
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
            } else {
                break;
            }
        }
        if self.peek().is_some_and(|c| c == '_' || c.is_alphabetic()) {
            let bad = self.scan_identifier(start);
            return Err(LexError::InvalidNumber {
                line: start.line,
                text: bad,
            });
        }

        let text = &self.source[start.offset..self.offset];
        let invalid = || LexError::InvalidNumber {
            line: start.line,
            text: text.to_string(),
        };
        if is_float {
            text.parse::<f64>()
                .map(TokenKind::FloatLiteral)
                .map_err(|_| invalid())
        } else {
            match text.parse::<i64>() {
                Ok(v) => Ok(TokenKind::IntLiteral(v)),
                // decimal integers that overflow become floats
                Err(_) => text
                    .parse::<f64>()
                    .map(TokenKind::FloatLiteral)
                    .map_err(|_| invalid()),
            }
        }
    }
}

#[cfg(test)]
mod tests;
