//! Hint lifecycle and error rewriting instructions.

use crate::context::{Context, Status};
use chervil_core::error::DefuncError;
use std::sync::Arc;

pub fn save_hints(ctx: &mut Context<'_>, shadow: bool) {
    ctx.save_hints(shadow);
    ctx.pc += 1;
}

/// Success exit of a labelled region: commit its handler and check, then
/// rewrite the region's hint contribution to the label.
pub fn relabel_hints(ctx: &mut Context<'_>, label: &Arc<str>) {
    ctx.pop_handler();
    ctx.pop_check();
    ctx.relabel_hints(label);
    ctx.pc += 1;
}

/// Failure exit of a labelled region: the label applies only when the
/// region consumed nothing, then the failure keeps propagating.
pub fn relabel_error(ctx: &mut Context<'_>, label: &Arc<str>) {
    debug_assert_eq!(ctx.status, Status::Recover, "relabel outside recovery");
    let check = ctx.pop_check();
    ctx.restore_hints();
    if ctx.offset == check {
        let err = ctx.pop_error();
        ctx.push_error(DefuncError::WithLabel(Arc::new(err), label.clone()));
    }
    ctx.fail_again();
}

/// Failure exit of an `explain` region: attach the reason when the region
/// consumed nothing.
pub fn reason_error(ctx: &mut Context<'_>, reason: &Arc<str>) {
    debug_assert_eq!(ctx.status, Status::Recover, "reason outside recovery");
    let check = ctx.pop_check();
    if ctx.offset == check {
        let err = ctx.pop_error();
        ctx.push_error(DefuncError::WithReason(Arc::new(err), reason.clone()));
    }
    ctx.fail_again();
}
