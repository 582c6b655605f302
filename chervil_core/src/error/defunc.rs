//! Defunctionalized error values.
//!
//! Every failure path in the VM builds one of these in O(1): leaf variants
//! capture the position and at most one item, combining variants wrap their
//! children behind `Arc`. The tree is only walked once, by
//! [`DefuncError::as_parse_error`], when a terminal failure is reported.

use super::hints::DefuncHints;
use super::{ErrorItem, ParseError, Pos};
use crate::input::ErrorContext;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A deferred parse error.
#[derive(Debug, Clone)]
pub enum DefuncError {
    /// A single-item expectation failure; the unexpected witness is read
    /// from the input at reification time.
    ClassicExpected { pos: Pos, expected: Option<ErrorItem> },
    ClassicExpectedWithReason {
        pos: Pos,
        expected: Option<ErrorItem>,
        reason: Arc<str>,
    },
    /// An expectation failure with an explicit unexpected witness.
    ClassicUnexpected {
        pos: Pos,
        expected: Option<ErrorItem>,
        unexpected: ErrorItem,
    },
    /// A free-form failure from `fail` / `guard_against`.
    ClassicFancy { pos: Pos, msgs: Vec<Arc<str>> },
    /// A silent failure (`empty`, defeated filters).
    Empty { pos: Pos, expected: Option<ErrorItem> },
    EmptyWithReason { pos: Pos, reason: Arc<str> },
    /// A string-literal mismatch; the unexpected witness is the `size`-wide
    /// slice of input at the token start.
    StringTok {
        pos: Pos,
        expected: Option<ErrorItem>,
        size: usize,
    },
    /// An expectation failure over a whole set (jump tables, operator sets).
    MultiExpected { pos: Pos, expecteds: BTreeSet<ErrorItem> },
    /// Two branches both failed; offset priority is applied at reification.
    Merged(Arc<DefuncError>, Arc<DefuncError>),
    /// Hints that were valid at the failure offset ride along.
    WithHints(Arc<DefuncError>, DefuncHints),
    WithReason(Arc<DefuncError>, Arc<str>),
    /// Label rewriting; the empty label hides the expected set.
    WithLabel(Arc<DefuncError>, Arc<str>),
}

impl DefuncError {
    #[inline]
    pub fn expected(pos: Pos, expected: Option<ErrorItem>) -> DefuncError {
        DefuncError::ClassicExpected { pos, expected }
    }

    #[inline]
    pub fn unexpected(pos: Pos, unexpected: ErrorItem, expected: Option<ErrorItem>) -> DefuncError {
        DefuncError::ClassicUnexpected { pos, expected, unexpected }
    }

    #[inline]
    pub fn fancy(pos: Pos, msgs: Vec<Arc<str>>) -> DefuncError {
        DefuncError::ClassicFancy { pos, msgs }
    }

    #[inline]
    pub fn empty(pos: Pos) -> DefuncError {
        DefuncError::Empty { pos, expected: None }
    }

    #[inline]
    pub fn string_tok(pos: Pos, expected: Option<ErrorItem>, size: usize) -> DefuncError {
        DefuncError::StringTok { pos, expected, size }
    }

    /// The offset this error will report; a merged error reports the winner.
    pub fn offset(&self) -> usize {
        match self {
            DefuncError::ClassicExpected { pos, .. }
            | DefuncError::ClassicExpectedWithReason { pos, .. }
            | DefuncError::ClassicUnexpected { pos, .. }
            | DefuncError::ClassicFancy { pos, .. }
            | DefuncError::Empty { pos, .. }
            | DefuncError::EmptyWithReason { pos, .. }
            | DefuncError::StringTok { pos, .. }
            | DefuncError::MultiExpected { pos, .. } => pos.offset,
            DefuncError::Merged(a, b) => a.offset().max(b.offset()),
            DefuncError::WithHints(e, _)
            | DefuncError::WithReason(e, _)
            | DefuncError::WithLabel(e, _) => e.offset(),
        }
    }

    /// Reify the tree into a single [`ParseError`].
    pub fn as_parse_error(&self, input: &dyn ErrorContext) -> ParseError {
        match self {
            DefuncError::ClassicExpected { pos, expected } => ParseError::Trivial {
                pos: *pos,
                unexpected: witness_at(input, *pos),
                expecteds: expected.iter().cloned().collect(),
                reasons: vec![],
            },
            DefuncError::ClassicExpectedWithReason { pos, expected, reason } => {
                ParseError::Trivial {
                    pos: *pos,
                    unexpected: witness_at(input, *pos),
                    expecteds: expected.iter().cloned().collect(),
                    reasons: vec![reason.clone()],
                }
            }
            DefuncError::ClassicUnexpected { pos, expected, unexpected } => ParseError::Trivial {
                pos: *pos,
                unexpected: Some(unexpected.clone()),
                expecteds: expected.iter().cloned().collect(),
                reasons: vec![],
            },
            DefuncError::ClassicFancy { pos, msgs } => {
                ParseError::Fail { pos: *pos, msgs: msgs.clone() }
            }
            DefuncError::Empty { pos, expected } => ParseError::Trivial {
                pos: *pos,
                unexpected: None,
                expecteds: expected.iter().cloned().collect(),
                reasons: vec![],
            },
            DefuncError::EmptyWithReason { pos, reason } => ParseError::Trivial {
                pos: *pos,
                unexpected: None,
                expecteds: BTreeSet::new(),
                reasons: vec![reason.clone()],
            },
            DefuncError::StringTok { pos, expected, size } => {
                let unexpected = if input.in_range(pos.offset) {
                    Some(ErrorItem::Raw(input.substring(pos.offset, *size).into()))
                } else {
                    Some(ErrorItem::EndOfInput)
                };
                ParseError::Trivial {
                    pos: *pos,
                    unexpected,
                    expecteds: expected.iter().cloned().collect(),
                    reasons: vec![],
                }
            }
            DefuncError::MultiExpected { pos, expecteds } => ParseError::Trivial {
                pos: *pos,
                unexpected: witness_at(input, *pos),
                expecteds: expecteds.clone(),
                reasons: vec![],
            },
            DefuncError::Merged(a, b) => {
                a.as_parse_error(input).merge(b.as_parse_error(input))
            }
            DefuncError::WithHints(e, hints) => {
                e.as_parse_error(input).with_hints(&hints.collect())
            }
            DefuncError::WithReason(e, reason) => {
                e.as_parse_error(input).with_reason(reason.clone())
            }
            DefuncError::WithLabel(e, label) => e.as_parse_error(input).with_label(label),
        }
    }
}

/// The unexpected witness for a failure with no explicit one: the input
/// character at the failure offset, or end-of-input.
fn witness_at(input: &dyn ErrorContext, pos: Pos) -> Option<ErrorItem> {
    match input.char_at(pos.offset) {
        Some(c) => Some(ErrorItem::raw_char(c)),
        None => Some(ErrorItem::EndOfInput),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeInput(Vec<char>);

    impl ErrorContext for FakeInput {
        fn in_range(&self, offset: usize) -> bool {
            offset < self.0.len()
        }
        fn char_at(&self, offset: usize) -> Option<char> {
            self.0.get(offset).copied()
        }
        fn substring(&self, offset: usize, len: usize) -> String {
            self.0[offset.min(self.0.len())..(offset + len).min(self.0.len())]
                .iter()
                .collect()
        }
        fn nearest_newline_before(&self, _offset: usize) -> usize {
            0
        }
        fn nearest_newline_after(&self, _offset: usize) -> usize {
            self.0.len()
        }
        fn segment_between(&self, start: usize, end: usize) -> String {
            self.0[start..end].iter().collect()
        }
    }

    fn input(s: &str) -> FakeInput {
        FakeInput(s.chars().collect())
    }

    #[test]
    fn test_classic_expected_reads_witness_from_input() {
        let err = DefuncError::expected(Pos::START, Some(ErrorItem::Raw("a".into())));
        match err.as_parse_error(&input("xyz")) {
            ParseError::Trivial { unexpected, expecteds, .. } => {
                assert_eq!(unexpected, Some(ErrorItem::Raw("x".into())));
                assert!(expecteds.contains(&ErrorItem::Raw("a".into())));
            }
            _ => panic!("expected trivial"),
        }
    }

    #[test]
    fn test_witness_past_end_is_end_of_input() {
        let err = DefuncError::expected(Pos::new(3, 1, 4), None);
        match err.as_parse_error(&input("xyz")) {
            ParseError::Trivial { unexpected, .. } => {
                assert_eq!(unexpected, Some(ErrorItem::EndOfInput));
            }
            _ => panic!("expected trivial"),
        }
    }

    #[test]
    fn test_string_tok_witness_is_sized_slice() {
        let err = DefuncError::string_tok(Pos::START, Some(ErrorItem::Raw("let".into())), 3);
        match err.as_parse_error(&input("lemma")) {
            ParseError::Trivial { unexpected, .. } => {
                assert_eq!(unexpected, Some(ErrorItem::Raw("lem".into())));
            }
            _ => panic!("expected trivial"),
        }
    }

    #[test]
    fn test_merged_picks_deeper_error() {
        let shallow = Arc::new(DefuncError::expected(Pos::START, Some(ErrorItem::Raw("a".into()))));
        let deep = Arc::new(DefuncError::expected(
            Pos::new(2, 1, 3),
            Some(ErrorItem::Raw("b".into())),
        ));
        let merged = DefuncError::Merged(shallow, deep);
        assert_eq!(merged.offset(), 2);
        let reified = merged.as_parse_error(&input("xyz"));
        assert_eq!(reified.offset(), 2);
        assert!(reified.trivial_expecteds().unwrap().contains(&ErrorItem::Raw("b".into())));
    }

    #[test]
    fn test_with_label_hides_on_empty() {
        let base = Arc::new(DefuncError::expected(Pos::START, Some(ErrorItem::Raw("a".into()))));
        let hidden = DefuncError::WithLabel(base, "".into());
        let reified = hidden.as_parse_error(&input("xyz"));
        assert!(reified.trivial_expecteds().unwrap().is_empty());
    }
}
