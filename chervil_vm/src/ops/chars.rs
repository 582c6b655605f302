//! Character and string matching.

use crate::context::Context;
use chervil_compiler::ast::DynPred;
use chervil_core::error::{DefuncError, ErrorItem};
use chervil_core::value::Value;
use std::sync::Arc;

pub fn char_tok(ctx: &mut Context<'_>, c: char, expected: &Option<Arc<str>>) {
    if ctx.current_char() == Some(c) {
        ctx.consume_char();
        ctx.stack.push(Value::Char(c));
        ctx.pc += 1;
    } else {
        let item = expected
            .as_ref()
            .map(|e| ErrorItem::Desc(e.clone()))
            .unwrap_or_else(|| ErrorItem::raw_char(c));
        let pos = ctx.pos();
        ctx.fail_with(DefuncError::expected(pos, Some(item)));
    }
}

pub fn satisfies(ctx: &mut Context<'_>, pred: &DynPred, expected: &Option<Arc<str>>) {
    match ctx.current_char() {
        Some(c) if pred(c) => {
            ctx.consume_char();
            ctx.stack.push(Value::Char(c));
            ctx.pc += 1;
        }
        _ => {
            let item = expected.as_ref().map(|e| ErrorItem::Desc(e.clone()));
            let pos = ctx.pos();
            ctx.fail_with(DefuncError::expected(pos, item));
        }
    }
}

/// Matches the literal character by character. A mismatch keeps whatever
/// prefix was already consumed and reports at the token start, which is
/// what makes `attempt(string_(..))` meaningful.
pub fn string_tok(ctx: &mut Context<'_>, s: &Arc<str>, chars: &[char], expected: &Option<Arc<str>>) {
    let start = ctx.pos();
    for &c in chars {
        if ctx.current_char() == Some(c) {
            ctx.consume_char();
        } else {
            let item = expected
                .as_ref()
                .map(|e| ErrorItem::Desc(e.clone()))
                .unwrap_or_else(|| ErrorItem::Raw(s.clone()));
            ctx.fail_with(DefuncError::string_tok(start, Some(item), chars.len()));
            return;
        }
    }
    ctx.stack.push(Value::Str(s.clone()));
    ctx.pc += 1;
}
