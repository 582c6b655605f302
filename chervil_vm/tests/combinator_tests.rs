//! End-to-end tests for the core combinator surface.
//!
//! Coverage:
//! - Sequencing, alternation and the no-consumption backtracking rule
//! - Iteration combinators and their termination behavior
//! - Lookahead and negative lookahead
//! - Token-level primitives

use chervil_vm::combinator::{
    char_, choice, col, digit, if_then_else, item, lift2, one_of, pure, sat, string_,
};
use chervil_vm::{parse, token, CommentConfig};

// =============================================================================
// Basics
// =============================================================================

#[test]
fn test_pure_never_consumes_and_never_fails() {
    assert_eq!(parse(&pure(42i64), ""), Ok(42));
    assert_eq!(parse(&pure(42i64), "anything"), Ok(42));
}

#[test]
fn test_char_and_string() {
    assert_eq!(parse(&char_('a'), "a"), Ok('a'));
    assert_eq!(parse(&string_("let"), "let rec"), Ok("let".to_string()));
    assert!(parse(&char_('a'), "b").is_err());
}

#[test]
fn test_map_then_before() {
    let p = char_('a').to(1i64).before(&char_('b'));
    assert_eq!(parse(&p, "ab"), Ok(1));
    let q = char_('a').then(&char_('b'));
    assert_eq!(parse(&q, "ab"), Ok('b'));
}

#[test]
fn test_lift2_pairs_results() {
    let p = lift2(|a: char, b: char| format!("{}{}", a, b), &char_('x'), &char_('y'));
    assert_eq!(parse(&p, "xy"), Ok("xy".to_string()));
}

#[test]
fn test_alternation_takes_second_branch() {
    let p = char_('a').or(&char_('b'));
    assert_eq!(parse(&p, "b"), Ok('b'));
}

#[test]
fn test_no_consume_on_choice() {
    // p fails without consuming, so p.or(q) behaves exactly as q.
    let q = string_("world");
    let p = string_("w!").attempt().or(&q.clone());
    assert_eq!(parse(&p, "world"), parse(&q, "world"));
}

#[test]
fn test_committed_consumption_propagates() {
    // "let" consumes "le" before failing on 'm'; the alternative never runs.
    let p = string_("let").or(&string_("lemma"));
    assert!(parse(&p, "lemma").is_err());
}

#[test]
fn test_attempt_rolls_back_for_the_alternative() {
    let p = string_("let").attempt().or(&string_("lemma"));
    assert_eq!(parse(&p, "lemma"), Ok("lemma".to_string()));
    assert_eq!(parse(&p, "let"), Ok("let".to_string()));
}

#[test]
fn test_look_ahead_is_nondestructive_on_success() {
    let p = string_("ab").look_ahead().then(&string_("ab"));
    assert_eq!(parse(&p, "ab"), Ok("ab".to_string()));
}

#[test]
fn test_look_ahead_fails_as_inner_parser() {
    let p = char_('a').look_ahead();
    assert!(parse(&p, "b").is_err());
}

#[test]
fn test_not_followed_by() {
    let p = string_("if").before(&sat(|c| c.is_alphanumeric()).not_followed_by());
    assert_eq!(parse(&p, "if("), Ok("if".to_string()));
    assert!(parse(&p, "ifx").is_err());
}

#[test]
fn test_if_then_else_selects_on_parsed_condition() {
    let cond = char_('y').to(true).or(&char_('n').to(false));
    let p = if_then_else(&cond, &char_('1'), &char_('0'));
    assert_eq!(parse(&p, "y1"), Ok('1'));
    assert_eq!(parse(&p, "n0"), Ok('0'));
    assert!(parse(&p, "y0").is_err());
}

// =============================================================================
// Iteration
// =============================================================================

#[test]
fn test_many_collects_and_stops_cleanly() {
    let p = char_('a').many();
    assert_eq!(parse(&p, "aaab"), Ok(vec!['a', 'a', 'a']));
    assert_eq!(parse(&p, "b"), Ok(vec![]));
}

#[test]
fn test_many_offset_after_matching() {
    // After three 'a's the machine sits at offset 3, i.e. column 4.
    let p = char_('a').many().zip(&col());
    assert_eq!(parse(&p, "aaab"), Ok((vec!['a', 'a', 'a'], 4)));
}

#[test]
fn test_many_with_consumed_failure_propagates() {
    // Each iteration is "ab"; a trailing lone 'a' commits and fails.
    let p = char_('a').then(&char_('b')).many();
    assert_eq!(parse(&p, "abab"), Ok(vec!['b', 'b']));
    assert!(parse(&p, "aba").is_err());
}

#[test]
fn test_some_requires_one() {
    let p = digit().some();
    assert_eq!(parse(&p, "12"), Ok(vec!['1', '2']));
    assert!(parse(&p, "x").is_err());
}

#[test]
fn test_skip_many_discards() {
    let p = char_(' ').skip_many().then(&char_('x'));
    assert_eq!(parse(&p, "   x"), Ok('x'));
    assert_eq!(parse(&p, "x"), Ok('x'));
}

#[test]
fn test_sep_end_by_accepts_optional_trailing_separator() {
    let p = digit().sep_end_by1(&char_(','));
    assert_eq!(parse(&p, "1,2,3"), Ok(vec!['1', '2', '3']));
    assert_eq!(parse(&p, "1,2,"), Ok(vec!['1', '2']));
    assert_eq!(parse(&p, "7"), Ok(vec!['7']));
    assert!(parse(&p, "x").is_err());
}

#[test]
fn test_sep_end_by_allows_zero() {
    let p = digit().sep_end_by(&char_(','));
    assert_eq!(parse(&p, ""), Ok(vec![]));
    assert_eq!(parse(&p, "4,2"), Ok(vec!['4', '2']));
}

#[test]
fn test_many_till_stops_at_terminator() {
    let p = item().many_till(&char_('.'));
    assert_eq!(parse(&p, "ab."), Ok(vec!['a', 'b']));
    assert_eq!(parse(&p, "."), Ok(vec![]));
    assert!(parse(&p, "ab").is_err());
}

#[test]
fn test_many_till_accumulator_resets_after_backtracking() {
    // Both branches run the same shared loop; items gathered by the
    // failed first pass must not leak into the second.
    let m = item().many_till(&char_('.'));
    let p = string_("a.").then(&m).attempt().or(&string_("a").then(&m));
    assert_eq!(parse(&p, "a.b"), Ok(vec![]));
}

// =============================================================================
// Filtering
// =============================================================================

#[test]
fn test_filter_keeps_and_rejects() {
    let even = digit().map(|c| (c as u8 - b'0') as i64).filter(|d| d % 2 == 0);
    assert_eq!(parse(&even, "4"), Ok(4));
    assert!(parse(&even, "3").is_err());
}

#[test]
fn test_guard_against_reports_the_message() {
    let small = digit()
        .map(|c| (c as u8 - b'0') as i64)
        .guard_against(|&d| (d > 5).then(|| format!("{} is too big", d)));
    assert_eq!(parse(&small, "3"), Ok(3));
    let err = parse(&small, "7").unwrap_err();
    assert!(err.contains("7 is too big"), "message was:\n{}", err);
}

// =============================================================================
// Choice Helpers
// =============================================================================

#[test]
fn test_choice_over_keywords() {
    let p = choice(vec![string_("cat"), string_("dog"), string_("emu")]);
    assert_eq!(parse(&p, "dog"), Ok("dog".to_string()));
    assert_eq!(parse(&p, "emu"), Ok("emu".to_string()));
    assert!(parse(&p, "fox").is_err());
}

#[test]
fn test_one_of() {
    let p = one_of("+-*").many();
    assert_eq!(parse(&p, "+-*"), Ok(vec!['+', '-', '*']));
}

// =============================================================================
// Tokens
// =============================================================================

#[test]
fn test_natural_token() {
    assert_eq!(parse(&token::natural(), "12034"), Ok(12034));
    assert!(parse(&token::natural(), "x").is_err());
}

#[test]
fn test_natural_overflow_is_an_error() {
    let err = parse(&token::natural(), "99999999999999999999").unwrap_err();
    assert!(err.contains("too large"), "message was:\n{}", err);
}

#[test]
fn test_float_token() {
    assert_eq!(parse(&token::float(), "3.25"), Ok(3.25));
    assert_eq!(parse(&token::float(), "1e3"), Ok(1000.0));
    assert_eq!(parse(&token::float(), "2.5e-1"), Ok(0.25));
    // A plain integer is not a float.
    assert!(parse(&token::float(), "42").is_err());
}

#[test]
fn test_float_or_natural_fallback() {
    // The float token restores on failure, so alternation needs no attempt.
    let p = token::float().or(&token::natural().map(|n| n as f64));
    assert_eq!(parse(&p, "42"), Ok(42.0));
    assert_eq!(parse(&p, "4.5"), Ok(4.5));
}

#[test]
fn test_string_literal_token() {
    assert_eq!(
        parse(&token::string_literal(), r#""hi\tthere""#),
        Ok("hi\tthere".to_string())
    );
    let err = parse(&token::string_literal(), "\"open").unwrap_err();
    assert!(err.contains("unclosed string literal"), "message was:\n{}", err);
}

#[test]
fn test_escape_token() {
    let p = token::escape(&[('n', '\n'), ('t', '\t')]);
    assert_eq!(parse(&p, "\\n"), Ok('\n'));
    assert!(parse(&p, "\\q").is_err());
}

#[test]
fn test_white_space_with_comments() {
    let mut cfg = CommentConfig::plain();
    cfg.line = Some("//".into());
    cfg.start = Some("/*".into());
    cfg.end = Some("*/".into());
    cfg.nested = true;
    let p = token::white_space(cfg).then(&char_('x'));
    assert_eq!(parse(&p, "  // note\n /* a /* b */ c */ x"), Ok('x'));
}

#[test]
fn test_unclosed_comment_fails() {
    let mut cfg = CommentConfig::plain();
    cfg.start = Some("/*".into());
    cfg.end = Some("*/".into());
    let p = token::white_space(cfg);
    let err = parse(&p, "/* forever").unwrap_err();
    assert!(err.contains("unclosed comment"), "message was:\n{}", err);
}

#[test]
fn test_keyword_rejects_identifier_prefix() {
    let p = token::keyword("if");
    assert_eq!(parse(&p, "if("), Ok(()));
    assert!(parse(&p, "iffy").is_err());
}

#[test]
fn test_identifier_rejects_reserved_words() {
    let p = token::identifier(&["if", "else"]);
    assert_eq!(parse(&p, "count1"), Ok("count1".to_string()));
    assert!(parse(&p, "else").is_err());
}

#[test]
fn test_operator_longest_match() {
    let p = token::operator_(&["<", "<=", "+"]);
    assert_eq!(parse(&p, "<=x"), Ok("<=".to_string()));
    assert_eq!(parse(&p, "<x"), Ok("<".to_string()));
    assert!(parse(&p, "!").is_err());
}
