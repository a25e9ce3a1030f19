//! Parser tests module


use crate::frontend::lexer::tokenize;
use crate::frontend::parser::{ast::Chunk, parse, ParseError};

pub(super) fn parse_src(source: &str) -> Chunk {
    parse(tokenize(source).unwrap()).unwrap()
}

pub(super) fn parse_err(source: &str) -> ParseError {
    parse(tokenize(source).unwrap()).unwrap_err()
}
