//! Instruction handlers, grouped by category.
//!
//! [`exec`] is the single dispatch point: one `match` over the instruction,
//! delegating to a handler function. Every handler upholds the dispatch
//! contract: it either advances `pc` past itself, fails through the
//! context, or performs a call/return/jump that overwrites `pc`.

pub mod chars;
pub mod choice;
pub mod control;
pub mod errors;
pub mod iteration;
pub mod registers;
pub mod selective;
pub mod token;

use crate::context::Context;
use chervil_compiler::bytecode::Instr;

/// Execute one instruction against the context.
pub fn exec<'p>(instr: &'p Instr, ctx: &mut Context<'p>) {
    match instr {
        // --- Stack and control ---
        Instr::Push(v) => control::push(ctx, v),
        Instr::Pop => control::pop(ctx),
        Instr::Dup => control::dup(ctx),
        Instr::Swap => control::swap(ctx),
        Instr::Apply => control::apply(ctx),
        Instr::Jump(l) => control::jump(ctx, *l),
        Instr::Label(_) => unreachable!("label markers are erased at resolution"),
        Instr::Call(l) => control::call(ctx, *l),
        Instr::Return => control::ret(ctx),
        Instr::Halt => control::halt(ctx),
        Instr::Empty => control::empty(ctx),
        Instr::Fail(msgs) => control::fail(ctx, msgs),
        Instr::Unexpected(msg) => control::unexpected(ctx, msg),
        Instr::Line => control::line(ctx),
        Instr::Col => control::col(ctx),

        // --- Characters ---
        Instr::CharTok { c, expected } => chars::char_tok(ctx, *c, expected),
        Instr::Satisfies { pred, expected } => chars::satisfies(ctx, pred, expected),
        Instr::StringTok { s, chars, expected } => chars::string_tok(ctx, s, chars, expected),

        // --- Choice and recovery ---
        Instr::InputCheck(h) => choice::input_check(ctx, *h),
        Instr::JumpGood(end) => choice::jump_good(ctx, *end),
        Instr::Catch => choice::catch(ctx),
        Instr::PushHandler(h) => choice::push_handler(ctx, *h),
        Instr::PopHandler => choice::pop_handler(ctx),
        Instr::MergeErrors => choice::merge_errors(ctx),
        Instr::ErrorToHints => choice::error_to_hints(ctx),
        Instr::Attempt(h) => choice::attempt(ctx, *h),
        Instr::Restore => choice::restore(ctx),
        Instr::Look(h) => choice::look(ctx, *h),
        Instr::LookExit => choice::look_exit(ctx),
        Instr::NotFollowedBy(h) => choice::not_followed_by(ctx, *h),
        Instr::NegLookExit => choice::neg_look_exit(ctx),

        // --- Iteration ---
        Instr::Many { body, acc } => iteration::many(ctx, *body, acc),
        Instr::SkipMany { body } => iteration::skip_many(ctx, *body),
        Instr::ChainPost { body } => iteration::chain_post(ctx, *body),
        Instr::ChainPre { body, acc } => iteration::chain_pre(ctx, *body, acc),
        Instr::Chainl { body } => iteration::chainl(ctx, *body),
        Instr::Chainr { body, wrap, acc } => iteration::chainr(ctx, *body, wrap, acc),
        Instr::SepEndBy1 { body, acc } => iteration::sep_end_by1(ctx, *body, acc),
        Instr::ManyUntil { body, acc } => iteration::many_until(ctx, *body, acc),

        // --- Selection and filtering ---
        Instr::Case(l) => selective::case(ctx, *l),
        Instr::If(l) => selective::if_cond(ctx, *l),
        Instr::SaveState => selective::save_state(ctx),
        Instr::Filter { pred } => selective::filter(ctx, pred),
        Instr::FilterOut { pred } => selective::filter_out(ctx, pred),
        Instr::GuardAgainst { pred } => selective::guard_against(ctx, pred),
        Instr::FastFail { msg } => selective::fast_fail(ctx, msg),
        Instr::FastUnexpected { msg } => selective::fast_unexpected(ctx, msg),

        // --- Registers ---
        Instr::Get(r) => registers::get(ctx, *r),
        Instr::Put(r) => registers::put(ctx, *r),
        Instr::CalleeSave { slots, handler } => registers::callee_save(ctx, slots, *handler),
        Instr::CalleeRestore { slots } => registers::callee_restore(ctx, slots),
        Instr::CalleeRestoreAndFail { slots } => {
            registers::callee_restore_and_fail(ctx, slots)
        }

        // --- Error plumbing ---
        Instr::SaveHints { shadow } => errors::save_hints(ctx, *shadow),
        Instr::RelabelHints(label) => errors::relabel_hints(ctx, label),
        Instr::RelabelError(label) => errors::relabel_error(ctx, label),
        Instr::ReasonError(reason) => errors::reason_error(ctx, reason),

        // --- Tokens ---
        Instr::TokenNatural => token::natural(ctx),
        Instr::TokenFloat => token::float(ctx),
        Instr::TokenStringLit { quote, escapes } => token::string_lit(ctx, *quote, escapes),
        Instr::TokenEscape { escapes } => token::escape(ctx, escapes),
        Instr::TokenWhiteSpace { cfg } => token::white_space(ctx, cfg),
        Instr::TokenSkipComments { cfg } => token::skip_comments(ctx, cfg),
        Instr::TokenSpecific { s, chars, letter } => token::specific(ctx, s, chars, letter),
        Instr::TokenNonSpecific { name, start, rest, illegal } => {
            token::non_specific(ctx, name, start, rest, illegal)
        }
        Instr::TokenMaxOp { ops, expecteds } => token::max_op(ctx, ops, expecteds),
        Instr::JumpTable { table, expecteds } => token::jump_table(ctx, table, expecteds),
    }
}
