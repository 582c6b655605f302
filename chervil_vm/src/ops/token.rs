//! Token-level instructions: numeric literals, string literals,
//! whitespace/comments, keywords, identifiers, operator sets and the
//! jump-table dispatcher.
//!
//! Unlike the bare character instructions, token instructions that need
//! lookahead restore the saved position on failure, so callers get
//! alternation-friendly behavior without wrapping them in `attempt`.

use crate::context::Context;
use chervil_compiler::ast::{CommentConfig, DynPred, StrPred};
use chervil_core::error::{DefuncError, ErrorItem};
use chervil_core::input::ErrorContext;
use chervil_core::value::Value;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::sync::Arc;

fn expected_desc(ctx: &mut Context<'_>, what: &str) {
    let pos = ctx.pos();
    ctx.fail_with(DefuncError::expected(pos, Some(ErrorItem::Desc(what.into()))));
}

/// An unsigned decimal integer.
pub fn natural(ctx: &mut Context<'_>) {
    let start = ctx.pos();
    if !ctx.current_char().is_some_and(|c| c.is_ascii_digit()) {
        return expected_desc(ctx, "natural");
    }
    let mut n: i64 = 0;
    while let Some(c) = ctx.current_char() {
        if !c.is_ascii_digit() {
            break;
        }
        ctx.consume_char();
        n = match n
            .checked_mul(10)
            .and_then(|m| m.checked_add((c as u8 - b'0') as i64))
        {
            Some(m) => m,
            None => {
                return ctx.fail_with(DefuncError::fancy(
                    start,
                    vec!["integer literal is too large".into()],
                ));
            }
        };
    }
    ctx.stack.push(Value::Int(n));
    ctx.pc += 1;
}

/// A decimal float: digits with a fractional part, an exponent, or both.
/// A plain integer is not a float; the position is restored so a caller
/// can fall back to `natural`.
pub fn float(ctx: &mut Context<'_>) {
    let start = ctx.pos();
    if !ctx.current_char().is_some_and(|c| c.is_ascii_digit()) {
        return expected_desc(ctx, "float");
    }
    let mut text = String::new();
    while let Some(c) = ctx.current_char() {
        if !c.is_ascii_digit() {
            break;
        }
        ctx.consume_char();
        text.push(c);
    }
    let mut is_float = false;
    if ctx.current_char() == Some('.') && ctx.char_at(ctx.offset + 1).is_some_and(|c| c.is_ascii_digit())
    {
        ctx.consume_char();
        text.push('.');
        while let Some(c) = ctx.current_char() {
            if !c.is_ascii_digit() {
                break;
            }
            ctx.consume_char();
            text.push(c);
        }
        is_float = true;
    }
    if matches!(ctx.current_char(), Some('e') | Some('E')) {
        let mut probe = ctx.offset + 1;
        if matches!(ctx.char_at(probe), Some('+') | Some('-')) {
            probe += 1;
        }
        if ctx.char_at(probe).is_some_and(|c| c.is_ascii_digit()) {
            text.push(ctx.consume_char());
            if matches!(ctx.current_char(), Some('+') | Some('-')) {
                text.push(ctx.consume_char());
            }
            while let Some(c) = ctx.current_char() {
                if !c.is_ascii_digit() {
                    break;
                }
                ctx.consume_char();
                text.push(c);
            }
            is_float = true;
        }
    }
    if !is_float {
        ctx.restore_to(start);
        return expected_desc(ctx, "float");
    }
    match text.parse::<f64>() {
        Ok(x) => {
            ctx.stack.push(Value::Float(x));
            ctx.pc += 1;
        }
        Err(_) => {
            ctx.restore_to(start);
            ctx.fail_with(DefuncError::fancy(start, vec!["malformed float literal".into()]));
        }
    }
}

/// A quoted string literal with single-character escapes.
pub fn string_lit(ctx: &mut Context<'_>, quote: char, escapes: &FxHashMap<char, char>) {
    let start = ctx.pos();
    if ctx.current_char() != Some(quote) {
        return expected_desc(ctx, "string");
    }
    ctx.consume_char();
    let mut out = String::new();
    loop {
        match ctx.current_char() {
            None | Some('\n') => {
                return ctx.fail_with(DefuncError::fancy(
                    start,
                    vec!["unclosed string literal".into()],
                ));
            }
            Some(c) if c == quote => {
                ctx.consume_char();
                break;
            }
            Some('\\') => {
                ctx.consume_char();
                match ctx.current_char().and_then(|e| escapes.get(&e).copied()) {
                    Some(mapped) => {
                        ctx.consume_char();
                        out.push(mapped);
                    }
                    None => {
                        let here = ctx.pos();
                        return ctx.fail_with(DefuncError::fancy(
                            here,
                            vec!["invalid escape sequence".into()],
                        ));
                    }
                }
            }
            Some(c) => {
                ctx.consume_char();
                out.push(c);
            }
        }
    }
    ctx.stack.push(Value::str(out));
    ctx.pc += 1;
}

/// A lone escape sequence: backslash plus one mapped character.
pub fn escape(ctx: &mut Context<'_>, escapes: &FxHashMap<char, char>) {
    let start = ctx.pos();
    if ctx.current_char() != Some('\\') {
        return expected_desc(ctx, "escape sequence");
    }
    ctx.consume_char();
    match ctx.current_char().and_then(|e| escapes.get(&e).copied()) {
        Some(mapped) => {
            ctx.consume_char();
            ctx.stack.push(Value::Char(mapped));
            ctx.pc += 1;
        }
        None => {
            ctx.restore_to(start);
            expected_desc(ctx, "escape sequence");
        }
    }
}

fn matches_at(ctx: &Context<'_>, s: &str) -> bool {
    s.chars()
        .enumerate()
        .all(|(i, c)| ctx.char_at(ctx.offset + i) == Some(c))
}

fn consume_str(ctx: &mut Context<'_>, s: &str) {
    for _ in s.chars() {
        ctx.consume_char();
    }
}

/// Skip comments (always) and whitespace (when `spaces` is set). Returns
/// false when it failed out on an unclosed block comment.
fn skip(ctx: &mut Context<'_>, cfg: &CommentConfig, spaces: bool) -> bool {
    loop {
        if let Some(opener) = &cfg.line {
            if matches_at(ctx, opener) {
                consume_str(ctx, opener);
                while ctx.current_char().is_some_and(|c| c != '\n') {
                    ctx.consume_char();
                }
                continue;
            }
        }
        if let (Some(opener), Some(closer)) = (&cfg.start, &cfg.end) {
            if matches_at(ctx, opener) {
                let open_pos = ctx.pos();
                consume_str(ctx, opener);
                let mut depth = 1u32;
                while depth > 0 {
                    if ctx.current_char().is_none() {
                        ctx.fail_with(DefuncError::fancy(
                            open_pos,
                            vec!["unclosed comment".into()],
                        ));
                        return false;
                    }
                    if matches_at(ctx, closer) {
                        consume_str(ctx, closer);
                        depth -= 1;
                    } else if cfg.nested && matches_at(ctx, opener) {
                        consume_str(ctx, opener);
                        depth += 1;
                    } else {
                        ctx.consume_char();
                    }
                }
                continue;
            }
        }
        if spaces && ctx.current_char().is_some_and(|c| (cfg.space)(c)) {
            ctx.consume_char();
            continue;
        }
        return true;
    }
}

pub fn white_space(ctx: &mut Context<'_>, cfg: &CommentConfig) {
    if skip(ctx, cfg, true) {
        ctx.stack.push(Value::Unit);
        ctx.pc += 1;
    }
}

pub fn skip_comments(ctx: &mut Context<'_>, cfg: &CommentConfig) {
    if skip(ctx, cfg, false) {
        ctx.stack.push(Value::Unit);
        ctx.pc += 1;
    }
}

/// A keyword: the literal, not followed by a letter character. Atomic.
pub fn specific(ctx: &mut Context<'_>, s: &Arc<str>, chars: &[char], letter: &DynPred) {
    let start = ctx.pos();
    for &c in chars {
        if ctx.current_char() == Some(c) {
            ctx.consume_char();
        } else {
            ctx.restore_to(start);
            return ctx.fail_with(DefuncError::expected(
                start,
                Some(ErrorItem::Raw(s.clone())),
            ));
        }
    }
    if ctx.current_char().is_some_and(|c| letter(c)) {
        ctx.restore_to(start);
        return ctx.fail_with(DefuncError::expected(start, Some(ErrorItem::Raw(s.clone()))));
    }
    ctx.stack.push(Value::Unit);
    ctx.pc += 1;
}

/// An identifier: a start character, then rest characters, rejected when
/// the spelled word is reserved. Atomic.
pub fn non_specific(
    ctx: &mut Context<'_>,
    name: &Arc<str>,
    start_pred: &DynPred,
    rest: &DynPred,
    illegal: &StrPred,
) {
    let start = ctx.pos();
    if !ctx.current_char().is_some_and(|c| start_pred(c)) {
        let pos = ctx.pos();
        return ctx.fail_with(DefuncError::expected(
            pos,
            Some(ErrorItem::Desc(name.clone())),
        ));
    }
    let mut text = String::new();
    text.push(ctx.consume_char());
    while ctx.current_char().is_some_and(|c| rest(c)) {
        text.push(ctx.consume_char());
    }
    if illegal(&text) {
        ctx.restore_to(start);
        return ctx.fail_with(DefuncError::unexpected(
            start,
            ErrorItem::Raw(text.into()),
            Some(ErrorItem::Desc(name.clone())),
        ));
    }
    ctx.stack.push(Value::str(text));
    ctx.pc += 1;
}

/// Longest match over an operator set; `ops` is sorted longest-first at
/// construction.
pub fn max_op(ctx: &mut Context<'_>, ops: &[Arc<str>], expecteds: &Arc<BTreeSet<ErrorItem>>) {
    let start = ctx.pos();
    for op in ops {
        if matches_at(ctx, op) {
            consume_str(ctx, op);
            ctx.stack.push(Value::Str(op.clone()));
            ctx.pc += 1;
            return;
        }
    }
    ctx.fail_with(DefuncError::MultiExpected {
        pos: start,
        expecteds: (**expecteds).clone(),
    });
}

/// Peek one character and dispatch; the chosen alternative consumes it.
pub fn jump_table(
    ctx: &mut Context<'_>,
    table: &FxHashMap<char, u32>,
    expecteds: &Arc<BTreeSet<ErrorItem>>,
) {
    match ctx.current_char().and_then(|c| table.get(&c)) {
        Some(&target) => ctx.pc = target as usize,
        None => {
            let pos = ctx.pos();
            ctx.fail_with(DefuncError::MultiExpected {
                pos,
                expecteds: (**expecteds).clone(),
            });
        }
    }
}
