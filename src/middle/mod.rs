//! Bytecode and code generation
//!
//! This module handles the transformation from AST to bytecode.

pub mod bytecode;
pub mod codegen;

pub use bytecode::{Capture, Constant, Instr, Proto, Want};
pub use codegen::{generate, CodegenError};
