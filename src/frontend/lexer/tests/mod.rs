//! Lexer tests

use crate::frontend::lexer::{tokenize, LexError, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[test]
fn test_keywords_and_identifiers() {
    assert_eq!(
        kinds("local function foo end"),
        vec![
            TokenKind::KwLocal,
            TokenKind::KwFunction,
            TokenKind::Identifier("foo".to_string()),
            TokenKind::KwEnd,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_numbers() {
    assert_eq!(
        kinds("50 0x10 1.5 .5 2e3"),
        vec![
            TokenKind::IntLiteral(50),
            TokenKind::IntLiteral(16),
            TokenKind::FloatLiteral(1.5),
            TokenKind::FloatLiteral(0.5),
            TokenKind::FloatLiteral(2000.0),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_concat_is_not_a_float() {
    assert_eq!(
        kinds("1 .. 2"),
        vec![
            TokenKind::IntLiteral(1),
            TokenKind::DotDot,
            TokenKind::IntLiteral(2),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_strings_and_escapes() {
    assert_eq!(
        kinds(r#""a\nb" 'it\'s' [[long
text]]"#),
        vec![
            TokenKind::StringLiteral("a\nb".to_string()),
            TokenKind::StringLiteral("it's".to_string()),
            TokenKind::StringLiteral("long\ntext".to_string()),
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_comments_are_skipped() {
    let tokens = tokenize("-- line comment\nx --[[ block\ncomment ]] y").unwrap();
    assert_eq!(tokens.len(), 3);
    assert_eq!(tokens[0].kind, TokenKind::Identifier("x".to_string()));
    assert_eq!(tokens[0].line(), 2);
    assert_eq!(tokens[1].line(), 3);
}

#[test]
fn test_operators() {
    assert_eq!(
        kinds("== ~= <= >= // .. #"),
        vec![
            TokenKind::EqEq,
            TokenKind::Neq,
            TokenKind::Le,
            TokenKind::Ge,
            TokenKind::SlashSlash,
            TokenKind::DotDot,
            TokenKind::Hash,
            TokenKind::Eof,
        ]
    );
}

#[test]
fn test_unterminated_string() {
    assert_eq!(
        tokenize("x = \"abc").unwrap_err(),
        LexError::UnterminatedString { line: 1 }
    );
}

#[test]
fn test_unexpected_char() {
    assert!(matches!(
        tokenize("a = $").unwrap_err(),
        LexError::UnexpectedChar { ch: '$', .. }
    ));
}
