//! Register access and the callee-save discipline.
//!
//! Registers are global parse state, so a plain recursive call would let a
//! body's register writes clobber its caller's view of slots the caller
//! never shared. Bodies that own registers are wrapped at compile time:
//! entry saves the owned slots, and both exits (return and failure
//! unwinding) restore them, giving those slots proper nesting while shared
//! slots stay global.

use crate::context::{Context, Status};

#[inline(always)]
pub fn get(ctx: &mut Context<'_>, slot: u8) {
    ctx.stack.push(ctx.regs[slot as usize].clone());
    ctx.pc += 1;
}

#[inline(always)]
pub fn put(ctx: &mut Context<'_>, slot: u8) {
    let v = ctx.stack.pop().expect("put on an empty operand stack");
    ctx.regs[slot as usize] = v;
    ctx.pc += 1;
}

pub fn callee_save(ctx: &mut Context<'_>, slots: &[u8], handler: u32) {
    ctx.push_reg_frame(slots);
    ctx.push_handler(handler);
    ctx.pc += 1;
}

pub fn callee_restore(ctx: &mut Context<'_>, slots: &[u8]) {
    ctx.pop_handler();
    ctx.pop_reg_frame(slots);
    ctx.pc += 1;
}

pub fn callee_restore_and_fail(ctx: &mut Context<'_>, slots: &[u8]) {
    debug_assert_eq!(ctx.status, Status::Recover, "restore-and-fail outside recovery");
    ctx.pop_reg_frame(slots);
    ctx.fail_again();
}
