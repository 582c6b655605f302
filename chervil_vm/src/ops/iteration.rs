//! Loop join instructions.
//!
//! Every consumption-terminated loop follows the same discipline: an
//! `InputCheck` arms a check and a handler before the body, the join
//! re-arms the check between iterations, and on the failure path the join
//! asks whether the failed iteration consumed input. If it did, the loop
//! is committed and the failure propagates; if not, the loop ends here
//! and the iteration's error is folded into the hint buffer.
//! `many_until` terminates through its sentinel instead, so it installs
//! only a handler, there to clean up its accumulator when the body fails.

use crate::context::{Context, Status};
use chervil_core::value::{DynFn, Value};
use chervil_compiler::bytecode::LoopStop;
use parking_lot::Mutex;
use std::sync::Arc;

fn identity() -> DynFn {
    Arc::new(|v| v)
}

pub fn many(ctx: &mut Context<'_>, body: u32, acc: &Mutex<Vec<Value>>) {
    match ctx.status {
        Status::Good => {
            let v = ctx.stack.pop().expect("loop body left no value");
            acc.lock().push(v);
            ctx.rearm_check();
            ctx.pc = body as usize;
        }
        Status::Recover => {
            let check = ctx.pop_check();
            if ctx.offset != check {
                acc.lock().clear();
                ctx.fail_again();
            } else {
                let err = ctx.pop_error();
                ctx.add_error_to_hints(err);
                let items = std::mem::take(&mut *acc.lock());
                ctx.stack.push(Value::List(Arc::new(items)));
                ctx.status = Status::Good;
                ctx.pc += 1;
            }
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

pub fn skip_many(ctx: &mut Context<'_>, body: u32) {
    match ctx.status {
        Status::Good => {
            ctx.stack.pop().expect("loop body left no value");
            ctx.rearm_check();
            ctx.pc = body as usize;
        }
        Status::Recover => {
            let check = ctx.pop_check();
            if ctx.offset != check {
                ctx.fail_again();
            } else {
                let err = ctx.pop_error();
                ctx.add_error_to_hints(err);
                ctx.stack.push(Value::Unit);
                ctx.status = Status::Good;
                ctx.pc += 1;
            }
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

/// Postfix chaining: the accumulated value sits under the loop; each
/// iteration's operator is applied to it.
pub fn chain_post(ctx: &mut Context<'_>, body: u32) {
    match ctx.status {
        Status::Good => {
            let f = ctx.stack.pop().expect("chain body left no operator");
            let x = ctx.stack.pop().expect("chain lost its accumulator");
            ctx.stack.push(f.apply(x));
            ctx.rearm_check();
            ctx.pc = body as usize;
        }
        Status::Recover => {
            let check = ctx.pop_check();
            if ctx.offset != check {
                ctx.fail_again();
            } else {
                let err = ctx.pop_error();
                ctx.add_error_to_hints(err);
                ctx.status = Status::Good;
                ctx.pc += 1;
            }
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

/// Prefix chaining: operators compose left-to-right into scratch; the exit
/// pushes the composition for the trailing operand to flow through.
pub fn chain_pre(ctx: &mut Context<'_>, body: u32, acc: &Mutex<Option<DynFn>>) {
    match ctx.status {
        Status::Good => {
            let f = ctx.stack.pop().expect("chain body left no operator");
            let f = match f {
                Value::Func(f) => f,
                other => panic!("prefix operator is not a function: {:?}", other),
            };
            let mut guard = acc.lock();
            *guard = Some(match guard.take() {
                None => f,
                Some(g) => Arc::new(move |v| g(f(v))),
            });
            drop(guard);
            ctx.rearm_check();
            ctx.pc = body as usize;
        }
        Status::Recover => {
            let check = ctx.pop_check();
            if ctx.offset != check {
                *acc.lock() = None;
                ctx.fail_again();
            } else {
                let err = ctx.pop_error();
                ctx.add_error_to_hints(err);
                let composed = acc.lock().take().unwrap_or_else(identity);
                ctx.stack.push(Value::Func(composed));
                ctx.status = Status::Good;
                ctx.pc += 1;
            }
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

/// Left-associative operator chaining: fold as the iterations arrive.
pub fn chainl(ctx: &mut Context<'_>, body: u32) {
    match ctx.status {
        Status::Good => {
            let y = ctx.stack.pop().expect("chain body left no operand");
            let f = ctx.stack.pop().expect("chain body left no operator");
            let x = ctx.stack.pop().expect("chain lost its accumulator");
            ctx.stack.push(f.apply(x).apply(y));
            ctx.rearm_check();
            ctx.pc = body as usize;
        }
        Status::Recover => {
            let check = ctx.pop_check();
            if ctx.offset != check {
                ctx.fail_again();
            } else {
                let err = ctx.pop_error();
                ctx.add_error_to_hints(err);
                ctx.status = Status::Good;
                ctx.pc += 1;
            }
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

/// Right-associative operator chaining. Right association cannot fold as
/// it goes; instead each iteration extends a composed continuation
/// `z -> ...f2(x2)(f1(x1)(z))...` in scratch, applied to the final operand
/// on exit.
pub fn chainr(ctx: &mut Context<'_>, body: u32, wrap: &DynFn, acc: &Mutex<Option<DynFn>>) {
    match ctx.status {
        Status::Good => {
            let next = ctx.stack.pop().expect("chain body left no operand");
            let f = ctx.stack.pop().expect("chain body left no operator");
            let x = ctx.stack.pop().expect("chain lost its operand");
            let applied = f.apply(x);
            let segment: DynFn = Arc::new(move |z| applied.apply(z));
            let mut guard = acc.lock();
            *guard = Some(match guard.take() {
                None => segment,
                Some(g) => Arc::new(move |z| g(segment(z))),
            });
            drop(guard);
            ctx.stack.push(next);
            ctx.rearm_check();
            ctx.pc = body as usize;
        }
        Status::Recover => {
            let check = ctx.pop_check();
            if ctx.offset != check {
                *acc.lock() = None;
                ctx.fail_again();
            } else {
                let err = ctx.pop_error();
                ctx.add_error_to_hints(err);
                let last = ctx.stack.pop().expect("chain lost its final operand");
                let composed = acc.lock().take().unwrap_or_else(identity);
                ctx.stack.push(wrap(composed(last)));
                ctx.status = Status::Good;
                ctx.pc += 1;
            }
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

/// One-or-more items with separators, trailing separator allowed. The body
/// yields the item and then a boolean: did a separator follow?
pub fn sep_end_by1(ctx: &mut Context<'_>, body: u32, acc: &Mutex<Vec<Value>>) {
    match ctx.status {
        Status::Good => {
            let more = ctx
                .stack
                .pop()
                .and_then(|v| v.as_bool())
                .expect("separator flag is not a boolean");
            let item = ctx.stack.pop().expect("loop body left no item");
            acc.lock().push(item);
            if more {
                ctx.rearm_check();
                ctx.pc = body as usize;
            } else {
                ctx.pop_handler();
                ctx.pop_check();
                let items = std::mem::take(&mut *acc.lock());
                ctx.stack.push(Value::List(Arc::new(items)));
                ctx.pc += 1;
            }
        }
        Status::Recover => {
            let check = ctx.pop_check();
            if ctx.offset != check || acc.lock().is_empty() {
                acc.lock().clear();
                ctx.fail_again();
            } else {
                // The item parser failed cleanly after a trailing
                // separator; the list is complete.
                let err = ctx.pop_error();
                ctx.add_error_to_hints(err);
                let items = std::mem::take(&mut *acc.lock());
                ctx.stack.push(Value::List(Arc::new(items)));
                ctx.status = Status::Good;
                ctx.pc += 1;
            }
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}

/// Iterate until the body yields the stop sentinel. The body is an
/// alternation of terminator and item, so it decides termination itself;
/// the loop's handler exists so a failing body discards the partial
/// accumulator before the failure propagates.
pub fn many_until(ctx: &mut Context<'_>, body: u32, acc: &Mutex<Vec<Value>>) {
    match ctx.status {
        Status::Good => {
            let v = ctx.stack.pop().expect("loop body left no value");
            if LoopStop::is_stop(&v) {
                ctx.pop_handler();
                let items = std::mem::take(&mut *acc.lock());
                ctx.stack.push(Value::List(Arc::new(items)));
                ctx.pc += 1;
            } else {
                acc.lock().push(v);
                ctx.pc = body as usize;
            }
        }
        Status::Recover => {
            acc.lock().clear();
            ctx.fail_again();
        }
        Status::Failed => unreachable!("dispatch does not run while failed"),
    }
}
