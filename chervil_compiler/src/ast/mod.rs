//! The deep embedding: an immutable tree of parser shapes.
//!
//! Combinators build [`Comb`] nodes behind `Arc`; nothing executes until the
//! tree is compiled. Node identity is pointer identity: the same `Arc`
//! appearing twice *is* sharing, and a cycle through a [`Comb::Defer`] cell
//! is recursion. The compilation pipeline runs three phases over the tree:
//!
//! 1. [`let_finder`] - reference counting, recursion detection, register
//!    collection
//! 2. [`preprocess`] - rebuilds the graph acyclically, turning shared nodes
//!    into [`Comb::Subroutine`] and back-edges into [`Comb::Rec`], applying
//!    the peephole [`optimise`] rules bottom-up as it goes
//! 3. code generation (see [`crate::codegen`])

pub mod let_finder;
pub mod optimise;
pub mod preprocess;

use crate::registers::RegSlot;
use chervil_core::error::ErrorItem;
use chervil_core::value::{DynFn, Value};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// A character predicate, as carried by `Satisfy` and the token shapes.
pub type DynPred = Arc<dyn Fn(char) -> bool + Send + Sync>;

/// A predicate over stack values, for the filter family.
pub type ValuePred = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A partial message function: `Some(msg)` rejects the value.
pub type ValueMsg = Arc<dyn Fn(&Value) -> Option<Arc<str>> + Send + Sync>;

/// A total message function, for `fail_with` / `unexpected_with`.
pub type ValueToMsg = Arc<dyn Fn(&Value) -> Arc<str> + Send + Sync>;

/// A reserved-word test for identifier lexing.
pub type StrPred = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// A parser node. Two `Node`s are the same parser iff the `Arc`s are.
pub type Node = Arc<Comb>;

/// Pointer-derived node identity.
pub type NodeId = usize;

/// Identity of a node for sharing analysis.
#[inline]
pub fn node_id(node: &Node) -> NodeId {
    Arc::as_ptr(node) as NodeId
}

/// Whitespace and comment syntax for the `WhiteSpace` / `SkipComments`
/// token shapes.
#[derive(Clone)]
pub struct CommentConfig {
    /// Characters counted as whitespace.
    pub space: DynPred,
    /// Line comment opener, if any.
    pub line: Option<Arc<str>>,
    /// Multi-line comment opener/closer, if any.
    pub start: Option<Arc<str>>,
    pub end: Option<Arc<str>>,
    /// Whether multi-line comments nest.
    pub nested: bool,
}

impl CommentConfig {
    /// Plain whitespace, no comments.
    pub fn plain() -> CommentConfig {
        CommentConfig {
            space: Arc::new(char::is_whitespace),
            line: None,
            start: None,
            end: None,
            nested: false,
        }
    }
}

impl fmt::Debug for CommentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommentConfig")
            .field("line", &self.line)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("nested", &self.nested)
            .finish()
    }
}

// =============================================================================
// Parser Shapes
// =============================================================================

/// The inherent shape of a parser.
///
/// `Subroutine`, `Rec` and `JumpTable` never come from the combinator
/// surface; they are introduced by preprocessing and optimisation.
pub enum Comb {
    // --- Leaves ---
    /// Succeed with a constant, consuming nothing.
    Pure(Value),
    /// Fail silently.
    Empty,
    /// Fail with free-form messages.
    Fail(Vec<Arc<str>>),
    /// Fail reporting an unexpected description.
    Unexpected(Arc<str>),
    /// Consume one character matching a predicate.
    Satisfy { pred: DynPred, expected: Option<Arc<str>> },
    /// Consume one specific character.
    CharTok { c: char, expected: Option<Arc<str>> },
    /// Consume a specific string.
    StringTok { s: Arc<str>, expected: Option<Arc<str>> },
    /// Push the current line / column.
    Line,
    Col,
    /// Read a register.
    GetRegister(Arc<RegSlot>),
    /// Run the child, store its result into a register, yield unit.
    PutRegister(Arc<RegSlot>, Node),

    // --- Composition ---
    Map(Node, DynFn),
    /// Applicative application: left yields a function, right its argument.
    Ap(Node, Node),
    /// Sequence keeping the right result.
    Then(Node, Node),
    /// Sequence keeping the left result.
    Before(Node, Node),
    /// Alternation with the no-consumption backtracking rule.
    Alt(Node, Node),
    Attempt(Node),
    Look(Node),
    NotFollowedBy(Node),

    // --- Iteration ---
    Many(Node),
    SkipMany(Node),
    ChainPost { p: Node, op: Node },
    ChainPre { op: Node, p: Node },
    Chainl { p: Node, op: Node },
    Chainr { p: Node, op: Node, wrap: DynFn },
    /// One-or-more `p` separated and optionally terminated by `sep`.
    SepEndBy { p: Node, sep: Node },
    /// Iterated body that yields a stop sentinel when the terminator matches.
    ManyUntil { body: Node },

    // --- Selection ---
    Branch { b: Node, left: Node, right: Node },
    If { b: Node, then_p: Node, else_p: Node },
    Filter { p: Node, pred: ValuePred },
    FilterOut { p: Node, pred: ValueMsg },
    GuardAgainst { p: Node, pred: ValueMsg },
    FastFail { p: Node, msg: ValueToMsg },
    FastUnexpected { p: Node, msg: ValueToMsg },

    // --- Error surgery ---
    Label { p: Node, name: Arc<str> },
    Reason { p: Node, reason: Arc<str> },

    // --- Token shapes ---
    Natural,
    Float,
    /// A quoted string literal with an escape map.
    StringLit { quote: char, escapes: Arc<FxHashMap<char, char>> },
    /// A single escape sequence (backslash plus a mapped character).
    Escape { escapes: Arc<FxHashMap<char, char>> },
    WhiteSpace { cfg: Arc<CommentConfig> },
    SkipComments { cfg: Arc<CommentConfig> },
    /// A keyword: the literal string not followed by a letter character.
    Specific { s: Arc<str>, letter: DynPred },
    /// An identifier: start/rest predicates with a reserved-word filter.
    NonSpecific {
        name: Arc<str>,
        start: DynPred,
        rest: DynPred,
        illegal: StrPred,
    },
    /// Longest match over a fixed operator set.
    MaxOp { ops: Arc<Vec<Arc<str>>> },

    // --- Structure ---
    /// Disables purity-driven optimisation of everything beneath it.
    Impure(Node),
    /// A lazily-tied knot, created by `recursive`.
    Defer(Arc<OnceLock<Node>>),

    // --- Introduced by preprocessing / optimisation ---
    /// A shared sub-parser compiled once and called from every site.
    Subroutine {
        id: NodeId,
        body: Node,
        size_cache: OnceLock<usize>,
    },
    /// A back-edge to an enclosing `Subroutine`.
    Rec { id: NodeId },
    /// Literal-headed alternation dispatch.
    JumpTable {
        table: Vec<(char, Node)>,
        expecteds: BTreeSet<ErrorItem>,
    },
}

impl Comb {
    /// Child nodes, in code-generation order. A child that is emitted twice
    /// (the `p` of `Chainl` / `Chainr`) appears twice, so reference counting
    /// sees both sites.
    pub fn children(&self) -> Vec<&Node> {
        match self {
            Comb::Pure(_)
            | Comb::Empty
            | Comb::Fail(_)
            | Comb::Unexpected(_)
            | Comb::Satisfy { .. }
            | Comb::CharTok { .. }
            | Comb::StringTok { .. }
            | Comb::Line
            | Comb::Col
            | Comb::GetRegister(_)
            | Comb::Natural
            | Comb::Float
            | Comb::StringLit { .. }
            | Comb::Escape { .. }
            | Comb::WhiteSpace { .. }
            | Comb::SkipComments { .. }
            | Comb::Specific { .. }
            | Comb::NonSpecific { .. }
            | Comb::MaxOp { .. }
            | Comb::Defer(_)
            | Comb::Rec { .. } => vec![],
            Comb::PutRegister(_, p)
            | Comb::Map(p, _)
            | Comb::Attempt(p)
            | Comb::Look(p)
            | Comb::NotFollowedBy(p)
            | Comb::Many(p)
            | Comb::SkipMany(p)
            | Comb::ManyUntil { body: p }
            | Comb::Filter { p, .. }
            | Comb::FilterOut { p, .. }
            | Comb::GuardAgainst { p, .. }
            | Comb::FastFail { p, .. }
            | Comb::FastUnexpected { p, .. }
            | Comb::Label { p, .. }
            | Comb::Reason { p, .. }
            | Comb::Impure(p)
            | Comb::Subroutine { body: p, .. } => vec![p],
            Comb::Ap(a, b)
            | Comb::Then(a, b)
            | Comb::Before(a, b)
            | Comb::Alt(a, b) => vec![a, b],
            Comb::ChainPost { p, op } => vec![p, op],
            Comb::ChainPre { op, p } => vec![op, p],
            Comb::Chainl { p, op } | Comb::Chainr { p, op, .. } => vec![p, op, p],
            Comb::SepEndBy { p, sep } => vec![p, sep],
            Comb::Branch { b, left, right } => vec![b, left, right],
            Comb::If { b, then_p, else_p } => vec![b, then_p, else_p],
            Comb::JumpTable { table, .. } => table.iter().map(|(_, n)| n).collect(),
        }
    }

    /// Estimated code-length contribution, used to pre-size the emission
    /// buffer. Only meaningful on preprocessed (acyclic) trees; subroutine
    /// bodies are cached so shared nodes are not re-walked.
    pub fn size(&self) -> usize {
        let overhead = match self {
            Comb::Subroutine { size_cache, body, .. } => {
                return *size_cache.get_or_init(|| body.size() + 4);
            }
            Comb::Rec { .. } => return 1,
            Comb::Alt(..) | Comb::Branch { .. } => 8,
            Comb::SepEndBy { .. } => 10,
            Comb::Label { .. } => 6,
            Comb::Reason { .. } | Comb::If { .. } => 5,
            Comb::ChainPre { .. } | Comb::Chainl { .. } | Comb::Chainr { .. } => 4,
            Comb::JumpTable { table, .. } => table.len() + 2,
            Comb::Map(..)
            | Comb::PutRegister(..)
            | Comb::Attempt(_)
            | Comb::Look(_)
            | Comb::NotFollowedBy(_)
            | Comb::Many(_)
            | Comb::SkipMany(_)
            | Comb::ManyUntil { .. }
            | Comb::ChainPost { .. }
            | Comb::Filter { .. }
            | Comb::FilterOut { .. }
            | Comb::GuardAgainst { .. }
            | Comb::FastFail { .. }
            | Comb::FastUnexpected { .. } => 2,
            _ => 1,
        };
        overhead + self.children().iter().map(|c| c.size()).sum::<usize>()
    }

    /// Short tag for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Comb::Pure(_) => "Pure",
            Comb::Empty => "Empty",
            Comb::Fail(_) => "Fail",
            Comb::Unexpected(_) => "Unexpected",
            Comb::Satisfy { .. } => "Satisfy",
            Comb::CharTok { .. } => "CharTok",
            Comb::StringTok { .. } => "StringTok",
            Comb::Line => "Line",
            Comb::Col => "Col",
            Comb::GetRegister(_) => "GetRegister",
            Comb::PutRegister(..) => "PutRegister",
            Comb::Map(..) => "Map",
            Comb::Ap(..) => "Ap",
            Comb::Then(..) => "Then",
            Comb::Before(..) => "Before",
            Comb::Alt(..) => "Alt",
            Comb::Attempt(_) => "Attempt",
            Comb::Look(_) => "Look",
            Comb::NotFollowedBy(_) => "NotFollowedBy",
            Comb::Many(_) => "Many",
            Comb::SkipMany(_) => "SkipMany",
            Comb::ChainPost { .. } => "ChainPost",
            Comb::ChainPre { .. } => "ChainPre",
            Comb::Chainl { .. } => "Chainl",
            Comb::Chainr { .. } => "Chainr",
            Comb::SepEndBy { .. } => "SepEndBy",
            Comb::ManyUntil { .. } => "ManyUntil",
            Comb::Branch { .. } => "Branch",
            Comb::If { .. } => "If",
            Comb::Filter { .. } => "Filter",
            Comb::FilterOut { .. } => "FilterOut",
            Comb::GuardAgainst { .. } => "GuardAgainst",
            Comb::FastFail { .. } => "FastFail",
            Comb::FastUnexpected { .. } => "FastUnexpected",
            Comb::Label { .. } => "Label",
            Comb::Reason { .. } => "Reason",
            Comb::Natural => "Natural",
            Comb::Float => "Float",
            Comb::StringLit { .. } => "StringLit",
            Comb::Escape { .. } => "Escape",
            Comb::WhiteSpace { .. } => "WhiteSpace",
            Comb::SkipComments { .. } => "SkipComments",
            Comb::Specific { .. } => "Specific",
            Comb::NonSpecific { .. } => "NonSpecific",
            Comb::MaxOp { .. } => "MaxOp",
            Comb::Impure(_) => "Impure",
            Comb::Defer(_) => "Defer",
            Comb::Subroutine { .. } => "Subroutine",
            Comb::Rec { .. } => "Rec",
            Comb::JumpTable { .. } => "JumpTable",
        }
    }
}

// Operands routinely contain closures, so `Debug` only names the shape.
impl fmt::Debug for Comb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_identity_is_pointer_identity() {
        let a: Node = Arc::new(Comb::Empty);
        let b: Node = Arc::new(Comb::Empty);
        assert_ne!(node_id(&a), node_id(&b));
        assert_eq!(node_id(&a), node_id(&a.clone()));
    }

    #[test]
    fn test_chain_counts_parser_twice() {
        let p: Node = Arc::new(Comb::CharTok { c: 'a', expected: None });
        let op: Node = Arc::new(Comb::Empty);
        let chain = Comb::Chainl { p: p.clone(), op };
        let ids: Vec<NodeId> = chain.children().iter().map(|n| node_id(n)).collect();
        assert_eq!(ids.iter().filter(|&&id| id == node_id(&p)).count(), 2);
    }

    #[test]
    fn test_size_counts_subroutine_body_once_per_site() {
        let body: Node = Arc::new(Comb::CharTok { c: 'a', expected: None });
        let sub: Node = Arc::new(Comb::Subroutine {
            id: node_id(&body),
            body,
            size_cache: OnceLock::new(),
        });
        let seq = Comb::Then(sub.clone(), sub);
        assert!(seq.size() >= 2);
    }
}
