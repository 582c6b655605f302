//! Alternation, backtracking and their join instructions.
//!
//! Join instructions sit at handler targets and inspect `status`: reached
//! by fallthrough they see `Good`, reached through recovery they see
//! `Recover`. That one check is what lets a single instruction close both
//! exits of a region.

use crate::context::{Context, Status};
use chervil_core::error::{DefuncError, ErrorItem};
use chervil_core::input::ErrorContext;
use chervil_core::value::Value;
use std::sync::Arc;

pub fn input_check(ctx: &mut Context<'_>, handler: u32) {
    ctx.push_check();
    ctx.push_handler(handler);
    ctx.pc += 1;
}

/// Commit the first alternative: discard its handler and check.
pub fn jump_good(ctx: &mut Context<'_>, end: u32) {
    ctx.pop_handler();
    ctx.pop_check();
    ctx.pc = end as usize;
}

/// Gate into the second alternative: only a failure that consumed nothing
/// may be caught here.
pub fn catch(ctx: &mut Context<'_>) {
    debug_assert_eq!(ctx.status, Status::Recover, "catch outside a recovery path");
    let check = ctx.pop_check();
    if ctx.offset != check {
        ctx.fail_again();
    } else {
        ctx.status = Status::Good;
        ctx.pc += 1;
    }
}

pub fn push_handler(ctx: &mut Context<'_>, handler: u32) {
    ctx.push_handler(handler);
    ctx.pc += 1;
}

pub fn pop_handler(ctx: &mut Context<'_>) {
    ctx.pop_handler();
    ctx.pc += 1;
}

/// Both alternatives failed: combine their errors and keep unwinding.
pub fn merge_errors(ctx: &mut Context<'_>) {
    debug_assert_eq!(ctx.status, Status::Recover, "merge outside a recovery path");
    let second = ctx.pop_error();
    let first = ctx.pop_error();
    ctx.push_error(DefuncError::Merged(Arc::new(first), Arc::new(second)));
    ctx.fail_again();
}

/// The second alternative won: the defeated branch still gets to suggest
/// expected items for later failures at this offset.
pub fn error_to_hints(ctx: &mut Context<'_>) {
    let err = ctx.pop_error();
    ctx.add_error_to_hints(err);
    ctx.pc += 1;
}

pub fn attempt(ctx: &mut Context<'_>, handler: u32) {
    ctx.save_state();
    ctx.push_handler(handler);
    ctx.pc += 1;
}

/// Join of `attempt`: success discards the snapshot, failure rewinds the
/// input to it and keeps failing.
pub fn restore(ctx: &mut Context<'_>) {
    match ctx.status {
        Status::Good => {
            ctx.pop_state();
            ctx.pop_handler();
            ctx.pc += 1;
        }
        Status::Recover => {
            let saved = ctx.pop_state();
            ctx.restore_to(saved);
            ctx.fail_again();
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

pub fn look(ctx: &mut Context<'_>, handler: u32) {
    ctx.save_state();
    ctx.push_handler(handler);
    ctx.save_hints(true);
    ctx.pc += 1;
}

/// Join of `look_ahead`: success rewinds, failure behaves as the inner
/// parser did.
pub fn look_exit(ctx: &mut Context<'_>) {
    match ctx.status {
        Status::Good => {
            let saved = ctx.pop_state();
            ctx.pop_handler();
            ctx.restore_to(saved);
            ctx.restore_hints();
            ctx.pc += 1;
        }
        Status::Recover => {
            ctx.pop_state();
            ctx.restore_hints();
            ctx.fail_again();
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

pub fn not_followed_by(ctx: &mut Context<'_>, handler: u32) {
    ctx.save_state();
    ctx.push_handler(handler);
    ctx.save_hints(true);
    ctx.pc += 1;
}

/// Join of `not_followed_by`: inverts the region, never consuming.
pub fn neg_look_exit(ctx: &mut Context<'_>) {
    match ctx.status {
        Status::Good => {
            let end_offset = ctx.offset;
            ctx.pop_handler_and_truncate();
            let saved = ctx.pop_state();
            let consumed = ctx.segment_between(saved.offset, end_offset);
            ctx.restore_to(saved);
            ctx.restore_hints();
            let err = if consumed.is_empty() {
                DefuncError::empty(saved)
            } else {
                DefuncError::unexpected(saved, ErrorItem::Raw(consumed.into()), None)
            };
            ctx.fail_with(err);
        }
        Status::Recover => {
            let saved = ctx.pop_state();
            ctx.restore_to(saved);
            ctx.pop_error();
            ctx.restore_hints();
            ctx.stack.push(Value::Unit);
            ctx.status = Status::Good;
            ctx.pc += 1;
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}
