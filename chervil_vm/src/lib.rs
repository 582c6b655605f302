//! Stack-based parsing virtual machine for chervil programs.
//!
//! This crate executes the instruction arrays produced by
//! `chervil_compiler`. A [`Context`] binds one program to one input and
//! drives the dispatch loop with:
//!
//! - **Operand stack**: type-erased intermediate results
//! - **Call stack**: return frames for shared and recursive subroutines
//! - **State/check stacks**: position snapshots and consumption checks
//!   backing `attempt`, alternation and the loop combinators
//! - **Handler stack**: recovery points with depth and stack snapshots
//! - **Registers**: four parser-visible slots with callee-save framing
//!
//! # Example
//!
//! ```
//! use chervil_vm::{parse, combinator::{char_, digit}};
//!
//! let p = digit().or(&char_('x')).many();
//! assert_eq!(parse(&p, "12x"), Ok(vec!['1', '2', 'x']));
//! ```
//!
//! Compiled programs are shared across threads by handing each extra
//! thread a [`Program::clone_for_thread`] copy; everything inside one
//! `Context` is exclusively owned.

pub mod context;
pub mod ops;

pub use context::{Context, Status};

// The compiler is the other half of this machine; re-export its surface so
// users depend on one crate.
pub use chervil_compiler::bytecode::{Instr, Program};
pub use chervil_compiler::combinator::{
    self, binop, branch, chain_pre, char_, choice, col, digit, empty, fail, get,
    if_then_else, item, lift2, line, modify, one_of, pure, put, recursive, sat, string_,
    unexpected, unop, BinOp, Fun, Parser, UnOp,
};
pub use chervil_compiler::ast::CommentConfig;
pub use chervil_compiler::token;
pub use chervil_compiler::{CompileError, Reg, NUM_REGISTERS};
pub use chervil_core::value::{Either, FromValue, IntoValue, Value};

/// Run a compiled program against an input.
pub fn run_program(
    program: &Program,
    input: &str,
    source_name: Option<&str>,
) -> Result<Value, String> {
    Context::new(program, input, source_name).run()
}

/// Parse an input with a typed parser.
pub fn parse<A: FromValue>(parser: &Parser<A>, input: &str) -> Result<A, String> {
    parse_named(parser, input, None)
}

/// Parse, attributing errors to a named source.
pub fn parse_named<A: FromValue>(
    parser: &Parser<A>,
    input: &str,
    source_name: Option<&str>,
) -> Result<A, String> {
    let program = parser.compile().map_err(|e| e.to_string())?;
    let value = run_program(&program, input, source_name)?;
    Ok(A::from_value(value).expect("parser result of unexpected shape"))
}
