//! Stack manipulation, control transfer and unconditional failure.

use crate::context::Context;
use chervil_core::error::{DefuncError, ErrorItem};
use chervil_core::value::Value;
use std::sync::Arc;

#[inline(always)]
pub fn push(ctx: &mut Context<'_>, v: &Value) {
    ctx.stack.push(v.clone());
    ctx.pc += 1;
}

#[inline(always)]
pub fn pop(ctx: &mut Context<'_>) {
    ctx.stack.pop().expect("pop on an empty operand stack");
    ctx.pc += 1;
}

#[inline(always)]
pub fn dup(ctx: &mut Context<'_>) {
    let top = ctx.stack.last().expect("dup on an empty operand stack").clone();
    ctx.stack.push(top);
    ctx.pc += 1;
}

#[inline(always)]
pub fn swap(ctx: &mut Context<'_>) {
    let n = ctx.stack.len();
    debug_assert!(n >= 2, "swap needs two operands");
    ctx.stack.swap(n - 1, n - 2);
    ctx.pc += 1;
}

/// `[f, x] -> [f x]`.
#[inline(always)]
pub fn apply(ctx: &mut Context<'_>) {
    let x = ctx.stack.pop().expect("apply without an argument");
    let f = ctx.stack.pop().expect("apply without a function");
    ctx.stack.push(f.apply(x));
    ctx.pc += 1;
}

#[inline(always)]
pub fn jump(ctx: &mut Context<'_>, target: u32) {
    ctx.pc = target as usize;
}

#[inline(always)]
pub fn call(ctx: &mut Context<'_>, target: u32) {
    ctx.call(target as usize);
}

#[inline(always)]
pub fn ret(ctx: &mut Context<'_>) {
    ctx.ret();
}

#[inline(always)]
pub fn halt(ctx: &mut Context<'_>) {
    ctx.halt();
}

pub fn empty(ctx: &mut Context<'_>) {
    let pos = ctx.pos();
    ctx.fail_with(DefuncError::empty(pos));
}

pub fn fail(ctx: &mut Context<'_>, msgs: &[Arc<str>]) {
    let pos = ctx.pos();
    ctx.fail_with(DefuncError::fancy(pos, msgs.to_vec()));
}

pub fn unexpected(ctx: &mut Context<'_>, msg: &Arc<str>) {
    let pos = ctx.pos();
    ctx.fail_with(DefuncError::unexpected(pos, ErrorItem::Desc(msg.clone()), None));
}

#[inline(always)]
pub fn line(ctx: &mut Context<'_>) {
    ctx.stack.push(Value::Int(ctx.line as i64));
    ctx.pc += 1;
}

#[inline(always)]
pub fn col(ctx: &mut Context<'_>) {
    ctx.stack.push(Value::Int(ctx.col as i64));
    ctx.pc += 1;
}
