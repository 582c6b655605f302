//! Deep embedding, optimiser and instruction compiler for chervil.
//!
//! Parsers are assembled as immutable [`ast::Comb`] trees and compiled
//! through a fixed pipeline into a linear [`bytecode::Program`] for the
//! stack-based parsing VM:
//!
//! ```text
//! combinator tree
//!       │ let-finding          (sharing, recursion, registers)
//!       │ preprocess           (Subroutine / Rec substitution + peephole)
//!       │ code generation      (labelled instructions, queued subroutines)
//!       │ label resolution     (symbolic labels -> absolute PCs)
//!       ▼
//! Program { instrs, stateful indices, register initials }
//! ```
//!
//! The typed [`combinator::Parser`] facade is the public face of this
//! crate; everything else is the machinery behind `Parser::compile`.

pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod combinator;
pub mod registers;
pub mod token;

pub use codegen::{compile, CodegenMode};
pub use combinator::Parser;
pub use registers::{Reg, NUM_REGISTERS};

/// A grammar-construction error, surfaced at compile time.
///
/// Parse-time failures are ordinary values on the VM's error stack; this
/// type is reserved for grammars that cannot be compiled at all (an
/// infinite loop such as `many(pure(x))`, or register pool exhaustion).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    /// Error message.
    pub message: String,
}

impl CompileError {
    pub fn new(message: impl Into<String>) -> CompileError {
        CompileError { message: message.into() }
    }
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CompileError {}

/// Result type for compilation.
pub type CompileResult<T> = Result<T, CompileError>;
