//! Selective branching and the filter family.
//!
//! The filter instructions pair with a preceding `SaveState`: the saved
//! position makes the error point at the start of the value that was
//! rejected, not at wherever its parse happened to end.

use crate::context::Context;
use chervil_compiler::ast::{ValueMsg, ValuePred, ValueToMsg};
use chervil_core::error::{DefuncError, ErrorItem};
use chervil_core::value::Value;

/// Pop a sum value: `Left` falls through, `Right` jumps.
pub fn case(ctx: &mut Context<'_>, right_target: u32) {
    match ctx.stack.pop().expect("case on an empty operand stack") {
        Value::Left(x) => {
            ctx.stack.push((*x).clone());
            ctx.pc += 1;
        }
        Value::Right(y) => {
            ctx.stack.push((*y).clone());
            ctx.pc = right_target as usize;
        }
        other => panic!("case on a non-sum value: {:?}", other),
    }
}

/// Pop a boolean: `true` falls through, `false` jumps.
pub fn if_cond(ctx: &mut Context<'_>, else_target: u32) {
    let cond = ctx
        .stack
        .pop()
        .and_then(|v| v.as_bool())
        .expect("if on a non-boolean value");
    if cond {
        ctx.pc += 1;
    } else {
        ctx.pc = else_target as usize;
    }
}

pub fn save_state(ctx: &mut Context<'_>) {
    ctx.save_state();
    ctx.pc += 1;
}

pub fn filter(ctx: &mut Context<'_>, pred: &ValuePred) {
    let start = ctx.pop_state();
    let v = ctx.stack.pop().expect("filter on an empty operand stack");
    if pred(&v) {
        ctx.stack.push(v);
        ctx.pc += 1;
    } else {
        ctx.fail_with(DefuncError::Empty { pos: start, expected: None });
    }
}

pub fn filter_out(ctx: &mut Context<'_>, pred: &ValueMsg) {
    let start = ctx.pop_state();
    let v = ctx.stack.pop().expect("filter on an empty operand stack");
    match pred(&v) {
        None => {
            ctx.stack.push(v);
            ctx.pc += 1;
        }
        Some(reason) => {
            ctx.fail_with(DefuncError::EmptyWithReason { pos: start, reason });
        }
    }
}

pub fn guard_against(ctx: &mut Context<'_>, pred: &ValueMsg) {
    let start = ctx.pop_state();
    let v = ctx.stack.pop().expect("guard on an empty operand stack");
    match pred(&v) {
        None => {
            ctx.stack.push(v);
            ctx.pc += 1;
        }
        Some(msg) => ctx.fail_with(DefuncError::fancy(start, vec![msg])),
    }
}

pub fn fast_fail(ctx: &mut Context<'_>, msg: &ValueToMsg) {
    let start = ctx.pop_state();
    let v = ctx.stack.pop().expect("fail on an empty operand stack");
    let rendered = msg(&v);
    ctx.fail_with(DefuncError::fancy(start, vec![rendered]));
}

pub fn fast_unexpected(ctx: &mut Context<'_>, msg: &ValueToMsg) {
    let start = ctx.pop_state();
    let v = ctx.stack.pop().expect("unexpected on an empty operand stack");
    let rendered = msg(&v);
    ctx.fail_with(DefuncError::unexpected(start, ErrorItem::Desc(rendered), None));
}
