//! Grammar-level tests: the arithmetic evaluator, operator chaining and
//! jump-table dispatch.

use chervil_vm::combinator::{
    binop, chain_pre, char_, choice, recursive, string_, unop, Parser,
};
use chervil_vm::{parse, token};

/// digits | '(' expr ')' | '-' factor, with `+` and `*` by precedence.
fn expr_parser() -> Parser<i64> {
    recursive(|expr| {
        let factor = recursive(|factor| {
            choice(vec![
                token::natural(),
                char_('(').then(&expr).before(&char_(')')),
                char_('-').then(&factor).map(|x: i64| -x),
            ])
        });
        let term = factor.chainl1(&char_('*').to(binop(|a: i64, b| a * b)));
        term.chainl1(&char_('+').to(binop(|a: i64, b| a + b)))
    })
}

#[test]
fn test_expression_evaluates() {
    let p = expr_parser();
    assert_eq!(parse(&p, "(2+3)*8"), Ok(40));
    assert_eq!(parse(&p, "-(3+4)"), Ok(-7));
    assert_eq!(parse(&p, "1+2*3"), Ok(7));
    assert_eq!(parse(&p, "((((5))))"), Ok(5));
    assert_eq!(parse(&p, "-(-(2))*3+4"), Ok(10));
}

#[test]
fn test_expression_rejects_garbage() {
    let p = expr_parser();
    assert!(parse(&p, "(2+").is_err());
    assert!(parse(&p, "*1").is_err());
}

#[test]
fn test_expression_parser_is_reusable() {
    // One compiled parser, many inputs; results stay independent.
    let p = expr_parser();
    p.force().unwrap();
    assert_eq!(parse(&p, "1+1"), Ok(2));
    assert_eq!(parse(&p, "2*2"), Ok(4));
    assert_eq!(parse(&p, "1+1"), Ok(2));
}

// =============================================================================
// Operator Chaining
// =============================================================================

fn digit_value() -> Parser<i64> {
    chervil_vm::combinator::digit().map(|c| (c as u8 - b'0') as i64)
}

#[test]
fn test_chainl1_associates_left() {
    let p = digit_value().chainl1(&char_('-').to(binop(|a: i64, b| a - b)));
    // (1-2)-3
    assert_eq!(parse(&p, "1-2-3"), Ok(-4));
    assert_eq!(parse(&p, "9"), Ok(9));
}

#[test]
fn test_chainl1_rejects_dangling_operator() {
    let p = digit_value().chainl1(&char_('-').to(binop(|a: i64, b| a - b)));
    assert!(parse(&p, "1-").is_err());
}

#[test]
fn test_chainr1_associates_right() {
    let p = digit_value().chainr1(&char_('-').to(binop(|a: i64, b| a - b)));
    // 1-(2-3)
    assert_eq!(parse(&p, "1-2-3"), Ok(2));
    assert_eq!(parse(&p, "5"), Ok(5));
}

#[test]
fn test_chain_pre_applies_prefixes_outside_in() {
    let p = chain_pre(&char_('-').to(unop(|x: i64| -x)), &digit_value());
    assert_eq!(parse(&p, "3"), Ok(3));
    assert_eq!(parse(&p, "-3"), Ok(-3));
    assert_eq!(parse(&p, "--3"), Ok(3));
}

#[test]
fn test_chain_post_applies_postfixes() {
    let p = digit_value().chain_post(&char_('!').to(unop(|x: i64| x + 1)));
    assert_eq!(parse(&p, "3!!"), Ok(5));
    assert_eq!(parse(&p, "3"), Ok(3));
}

// =============================================================================
// Jump Tables
// =============================================================================

#[test]
fn test_literal_headed_choice_dispatches() {
    let p = choice(vec![string_("cat"), string_("dog"), string_("emu")]);
    // The compiled form dispatches on the head character.
    let listing = p.compile().unwrap().disassemble();
    assert!(listing.contains("jumptable"), "listing was:\n{}", listing);
    assert_eq!(parse(&p, "cat"), Ok("cat".to_string()));
    assert_eq!(parse(&p, "dog"), Ok("dog".to_string()));
}

#[test]
fn test_jump_table_failure_lists_every_head() {
    let p = choice(vec![string_("cat"), string_("dog"), string_("emu")]);
    let err = parse(&p, "fox").unwrap_err();
    assert!(
        err.contains("expected \"cat\", \"dog\" or \"emu\""),
        "message was:\n{}",
        err
    );
}

#[test]
fn test_jump_table_committed_failure_propagates() {
    let p = choice(vec![string_("cat"), string_("dog"), string_("emu")]);
    let err = parse(&p, "cow").unwrap_err();
    assert!(err.contains("expected \"cat\""), "message was:\n{}", err);
}
