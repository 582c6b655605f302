//! Token-level parser constructors.
//!
//! These build the dedicated token shapes rather than compositions of
//! character parsers, so each lexeme costs one instruction at run time.

use crate::ast::{Comb, CommentConfig};
use crate::combinator::Parser;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// The standard single-character escape map.
pub fn default_escapes() -> FxHashMap<char, char> {
    [
        ('n', '\n'),
        ('t', '\t'),
        ('r', '\r'),
        ('\\', '\\'),
        ('"', '"'),
        ('\'', '\''),
        ('0', '\0'),
    ]
    .into_iter()
    .collect()
}

/// An unsigned decimal integer.
pub fn natural() -> Parser<i64> {
    Parser::from_node(Arc::new(Comb::Natural))
}

/// A decimal float (requires a fractional part or an exponent).
pub fn float() -> Parser<f64> {
    Parser::from_node(Arc::new(Comb::Float))
}

/// A double-quoted string literal with the standard escapes.
pub fn string_literal() -> Parser<String> {
    Parser::from_node(Arc::new(Comb::StringLit {
        quote: '"',
        escapes: Arc::new(default_escapes()),
    }))
}

/// A lone escape sequence using the given map.
pub fn escape(pairs: &[(char, char)]) -> Parser<char> {
    Parser::from_node(Arc::new(Comb::Escape {
        escapes: Arc::new(pairs.iter().copied().collect()),
    }))
}

/// Skip whitespace and comments.
pub fn white_space(cfg: CommentConfig) -> Parser<()> {
    Parser::from_node(Arc::new(Comb::WhiteSpace { cfg: Arc::new(cfg) }))
}

/// Skip comments only.
pub fn skip_comments(cfg: CommentConfig) -> Parser<()> {
    Parser::from_node(Arc::new(Comb::SkipComments { cfg: Arc::new(cfg) }))
}

/// A keyword: the literal word, not running into a following identifier
/// character.
pub fn keyword(s: &str) -> Parser<()> {
    Parser::from_node(Arc::new(Comb::Specific {
        s: s.into(),
        letter: Arc::new(|c: char| c.is_alphanumeric() || c == '_'),
    }))
}

/// An identifier with the usual start/rest rules, rejecting reserved
/// words.
pub fn identifier(reserved: &[&str]) -> Parser<String> {
    let reserved: Vec<Arc<str>> = reserved.iter().map(|&s| Arc::from(s)).collect();
    Parser::from_node(Arc::new(Comb::NonSpecific {
        name: "identifier".into(),
        start: Arc::new(|c: char| c.is_alphabetic() || c == '_'),
        rest: Arc::new(|c: char| c.is_alphanumeric() || c == '_'),
        illegal: Arc::new(move |s: &str| reserved.iter().any(|r| &**r == s)),
    }))
}

/// Longest match over an operator set.
pub fn operator_(ops: &[&str]) -> Parser<String> {
    let mut ops: Vec<Arc<str>> = ops.iter().map(|&s| Arc::from(s)).collect();
    // Longest first, so "<=" wins over "<".
    ops.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    Parser::from_node(Arc::new(Comb::MaxOp { ops: Arc::new(ops) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_set_sorts_longest_first() {
        let p = operator_(&["<", "<=", "+"]);
        match &**p.node() {
            Comb::MaxOp { ops } => {
                assert_eq!(&*ops[0], "<=");
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_default_escapes_cover_the_basics() {
        let map = default_escapes();
        assert_eq!(map.get(&'n'), Some(&'\n'));
        assert_eq!(map.get(&'\\'), Some(&'\\'));
    }
}
