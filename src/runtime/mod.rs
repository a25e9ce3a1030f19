//! Runtime system
//!
//! This module contains script values, tables, engine objects and the
//! garbage-collected heap they live in.

pub mod extfunc;
pub mod gc;
pub mod table;
pub mod userdata;
pub mod value;

#[cfg(test)]
mod tests;
