//! Core value and error types for the chervil parsing machine.
//!
//! This crate is the shared foundation of the chervil workspace:
//!
//! - [`Value`] - the type-erased operand representation used by the VM stack
//! - [`DefuncError`] / [`DefuncHints`] - the defunctionalized error algebra
//! - [`ParseError`] - the reified error with merge and pretty-printing rules
//! - [`ErrorContext`] - the input capability consumed during reification
//!
//! Nothing in here depends on how parsers are built or executed; the
//! compiler and VM crates layer on top.

pub mod error;
pub mod input;
pub mod value;

pub use error::{DefuncError, DefuncHints, ErrorItem, ParseError, Pos};
pub use input::ErrorContext;
pub use value::{DynFn, Either, FromValue, IntoValue, Value};
