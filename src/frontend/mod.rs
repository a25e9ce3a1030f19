//! Frontend compilation pipeline
//!
//! This module contains the lexer and the parser. [`Compiler`] drives them
//! and hands the resolved AST to the code generator.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::middle::{self, Proto};

pub mod lexer;
pub mod parser;

/// Compiler context
#[derive(Debug, Default)]
pub struct Compiler;

impl Compiler {
    /// Create a new compiler
    #[inline]
    pub fn new() -> Self {
        Self
    }

    /// Compile a chunk of source code to its top-level prototype
    pub fn compile(
        &self,
        source: &str,
        chunk_name: &str,
    ) -> Result<Arc<Proto>, CompileError> {
        debug!("Compiling {} ({} bytes)", chunk_name, source.len());
        let tokens = lexer::tokenize(source).map_err(|error| CompileError::Lex {
            chunk: chunk_name.to_string(),
            error,
        })?;
        debug!("Tokenized into {} tokens", tokens.len());

        let ast = parser::parse(tokens).map_err(|error| CompileError::Parse {
            chunk: chunk_name.to_string(),
            error,
        })?;
        debug!("Parsing successful, got {} statements", ast.body.len());

        middle::generate(&ast, chunk_name).map_err(|error| CompileError::Codegen {
            chunk: chunk_name.to_string(),
            error,
        })
    }
}

/// Compile `source` under `chunk_name`
pub fn compile(
    source: &str,
    chunk_name: &str,
) -> Result<Arc<Proto>, CompileError> {
    Compiler::new().compile(source, chunk_name)
}

/// Compilation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{chunk}: {error}")]
    Lex {
        chunk: String,
        error: lexer::LexError,
    },

    #[error("{chunk}: {error}")]
    Parse {
        chunk: String,
        error: parser::ParseError,
    },

    #[error("{chunk}: {error}")]
    Codegen {
        chunk: String,
        error: middle::CodegenError,
    },
}

impl CompileError {
    /// Source line the error points at
    pub fn line(&self) -> u32 {
        match self {
            CompileError::Lex { error, .. } => match error {
                lexer::LexError::UnterminatedString { line }
                | lexer::LexError::UnterminatedLong { line }
                | lexer::LexError::InvalidEscape { line, .. }
                | lexer::LexError::InvalidNumber { line, .. }
                | lexer::LexError::UnexpectedChar { line, .. } => *line,
            },
            CompileError::Parse { error, .. } => error.line,
            CompileError::Codegen { error, .. } => error.line,
        }
    }
}
