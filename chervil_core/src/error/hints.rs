//! The hint buffer: expected items harvested from defeated alternatives.
//!
//! When a branch loses an alternation without consuming input, its expected
//! items are not thrown away: they are folded into a hints tree so that a
//! later failure *at the same offset* reports the union of everything that
//! would have been acceptable there. Like errors, hints are deferred: the
//! tree is built in O(1) per operation and only collected when a trivial
//! error is reified with hints attached.

use super::{ErrorItem, ParseError};
use std::collections::BTreeSet;
use std::sync::Arc;

/// A deferred sequence of expected-item sets.
#[derive(Debug, Clone)]
pub enum DefuncHints {
    Empty,
    /// Concatenation of two hint sequences.
    Merge(Arc<DefuncHints>, Arc<DefuncHints>),
    /// Rewrites everything gathered under it to a single label
    /// (or to nothing, for the empty hiding label).
    Replace(Arc<str>, Arc<DefuncHints>),
    /// Drops the most recently added set.
    Pop(Arc<DefuncHints>),
    /// Appends the expected set of a reified trivial error.
    AddError(Arc<DefuncHints>, Arc<ParseError>),
}

impl DefuncHints {
    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, DefuncHints::Empty)
    }

    /// Append a trivial error's expected set.
    pub fn add_error(self, err: Arc<ParseError>) -> DefuncHints {
        DefuncHints::AddError(Arc::new(self), err)
    }

    /// Materialize the ordered sequence of expected-item sets.
    pub fn collect(&self) -> Vec<BTreeSet<ErrorItem>> {
        let mut out = Vec::new();
        self.collect_into(&mut out);
        out
    }

    fn collect_into(&self, out: &mut Vec<BTreeSet<ErrorItem>>) {
        match self {
            DefuncHints::Empty => {}
            DefuncHints::Merge(a, b) => {
                a.collect_into(out);
                b.collect_into(out);
            }
            DefuncHints::Replace(label, inner) => {
                let mark = out.len();
                inner.collect_into(out);
                if out.len() > mark {
                    out.truncate(mark);
                    if !label.is_empty() {
                        let mut set = BTreeSet::new();
                        set.insert(ErrorItem::Desc(label.clone()));
                        out.push(set);
                    }
                }
            }
            DefuncHints::Pop(inner) => {
                let mark = out.len();
                inner.collect_into(out);
                if out.len() > mark {
                    out.pop();
                }
            }
            DefuncHints::AddError(inner, err) => {
                inner.collect_into(out);
                if let Some(expecteds) = err.trivial_expecteds() {
                    out.push(expecteds.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Pos;

    fn trivial_with(expected: &[&str]) -> Arc<ParseError> {
        Arc::new(ParseError::Trivial {
            pos: Pos::START,
            unexpected: None,
            expecteds: expected.iter().map(|s| ErrorItem::Raw((*s).into())).collect(),
            reasons: vec![],
        })
    }

    #[test]
    fn test_add_error_appends_sets_in_order() {
        let hints = DefuncHints::Empty
            .add_error(trivial_with(&["a"]))
            .add_error(trivial_with(&["b"]));
        let sets = hints.collect();
        assert_eq!(sets.len(), 2);
        assert!(sets[0].contains(&ErrorItem::Raw("a".into())));
        assert!(sets[1].contains(&ErrorItem::Raw("b".into())));
    }

    #[test]
    fn test_pop_drops_most_recent() {
        let hints = DefuncHints::Pop(Arc::new(
            DefuncHints::Empty
                .add_error(trivial_with(&["a"]))
                .add_error(trivial_with(&["b"])),
        ));
        let sets = hints.collect();
        assert_eq!(sets.len(), 1);
        assert!(sets[0].contains(&ErrorItem::Raw("a".into())));
    }

    #[test]
    fn test_replace_rewrites_to_label() {
        let inner = DefuncHints::Empty
            .add_error(trivial_with(&["a"]))
            .add_error(trivial_with(&["b"]));
        let hints = DefuncHints::Replace("operand".into(), Arc::new(inner));
        let sets = hints.collect();
        assert_eq!(sets.len(), 1);
        assert!(sets[0].contains(&ErrorItem::Desc("operand".into())));
    }

    #[test]
    fn test_replace_with_empty_label_hides() {
        let inner = DefuncHints::Empty.add_error(trivial_with(&["a"]));
        let hints = DefuncHints::Replace("".into(), Arc::new(inner));
        assert!(hints.collect().is_empty());
    }

    #[test]
    fn test_replace_of_nothing_stays_empty() {
        let hints = DefuncHints::Replace("x".into(), Arc::new(DefuncHints::Empty));
        assert!(hints.collect().is_empty());
    }
}
