//! Peephole rewrites over the deep embedding.
//!
//! [`rewrite_node`] is applied bottom-up during preprocessing: every rule
//! is a behavioral identity on the node it replaces, except the
//! `many(pure(_))` family which can never terminate and is rejected at
//! compile time. All `Pure`-driven rules look through nothing: a `Pure`
//! wrapped in [`Comb::Impure`] deliberately fails every pattern here,
//! which is the whole contract of `impure()`.
//!
//! [`form_jump_tables`] is a separate top-down pass that collapses
//! alternation chains with distinct literal head characters into a
//! [`Comb::JumpTable`].

use super::preprocess::map_children;
use super::{Comb, Node};
use crate::{CompileError, CompileResult};
use chervil_core::error::ErrorItem;
use chervil_core::Value;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Apply peephole rules to a freshly rebuilt node.
pub fn rewrite_node(node: Node) -> CompileResult<Node> {
    match &*node {
        Comb::Map(p, f) => {
            if let Comb::Pure(x) = &**p {
                return Ok(Arc::new(Comb::Pure(f(x.clone()))));
            }
        }
        Comb::Ap(pf, px) => {
            if let (Comb::Pure(f), Comb::Pure(x)) = (&**pf, &**px) {
                return Ok(Arc::new(Comb::Pure(f.apply(x.clone()))));
            }
        }
        Comb::Alt(a, b) => {
            if matches!(&**a, Comb::Empty) {
                return Ok(b.clone());
            }
            if matches!(&**b, Comb::Empty) {
                return Ok(a.clone());
            }
            // A pure left branch never fails; the right branch is dead.
            if matches!(&**a, Comb::Pure(_)) {
                return Ok(a.clone());
            }
        }
        Comb::Then(a, b) => {
            if matches!(&**a, Comb::Pure(_)) {
                return Ok(b.clone());
            }
        }
        Comb::Before(a, b) => {
            if matches!(&**b, Comb::Pure(_)) {
                return Ok(a.clone());
            }
        }
        Comb::Attempt(p) => match &**p {
            Comb::Pure(_) | Comb::Empty | Comb::Attempt(_) => return Ok(p.clone()),
            _ => {}
        },
        Comb::Look(p) => {
            if matches!(&**p, Comb::Pure(_)) {
                return Ok(p.clone());
            }
        }
        Comb::NotFollowedBy(p) => match &**p {
            Comb::Pure(_) => return Ok(Arc::new(Comb::Empty)),
            Comb::Empty => {
                return Ok(Arc::new(Comb::Pure(Value::Unit)));
            }
            _ => {}
        },
        Comb::Many(p) => match &**p {
            Comb::Pure(_) => return Err(non_productive("many")),
            Comb::Empty => {
                return Ok(Arc::new(Comb::Pure(Value::list(vec![]))));
            }
            _ => {}
        },
        Comb::SkipMany(p) => match &**p {
            Comb::Pure(_) => return Err(non_productive("skip_many")),
            Comb::Empty => {
                return Ok(Arc::new(Comb::Pure(Value::Unit)));
            }
            _ => {}
        },
        Comb::ChainPost { op, .. } => {
            if matches!(&**op, Comb::Pure(_)) {
                return Err(non_productive("chain_post"));
            }
        }
        Comb::ChainPre { op, .. } => {
            if matches!(&**op, Comb::Pure(_)) {
                return Err(non_productive("chain_pre"));
            }
        }
        Comb::Chainl { p, op } => {
            if matches!(&**p, Comb::Pure(_)) && matches!(&**op, Comb::Pure(_)) {
                return Err(non_productive("chainl1"));
            }
        }
        Comb::Chainr { p, op, .. } => {
            if matches!(&**p, Comb::Pure(_)) && matches!(&**op, Comb::Pure(_)) {
                return Err(non_productive("chainr1"));
            }
        }
        Comb::SepEndBy { p, sep } => {
            if matches!(&**p, Comb::Pure(_)) && matches!(&**sep, Comb::Pure(_)) {
                return Err(non_productive("sep_end_by1"));
            }
        }
        Comb::ManyUntil { body } => {
            // The body is terminator-or-item; a pure item never consumes,
            // so once the terminator declines the loop spins forever.
            if let Comb::Alt(_, item) = &**body {
                if matches!(&**item, Comb::Pure(_)) {
                    return Err(non_productive("many_till"));
                }
            }
        }
        Comb::Branch { b, left, right } => match &**b {
            Comb::Pure(Value::Left(x)) => {
                return Ok(Arc::new(Comb::Ap(
                    left.clone(),
                    Arc::new(Comb::Pure((**x).clone())),
                )));
            }
            Comb::Pure(Value::Right(x)) => {
                return Ok(Arc::new(Comb::Ap(
                    right.clone(),
                    Arc::new(Comb::Pure((**x).clone())),
                )));
            }
            _ => {}
        },
        Comb::If { b, then_p, else_p } => {
            if let Comb::Pure(Value::Bool(cond)) = &**b {
                return Ok(if *cond { then_p.clone() } else { else_p.clone() });
            }
        }
        Comb::Filter { p, pred } => {
            if let Comb::Pure(x) = &**p {
                return Ok(if pred(x) {
                    p.clone()
                } else {
                    Arc::new(Comb::Empty)
                });
            }
        }
        _ => {}
    }
    Ok(node)
}

fn non_productive(name: &str) -> CompileError {
    CompileError::new(format!(
        "{} applied to a parser that consumes no input: the loop cannot terminate",
        name
    ))
}

// =============================================================================
// Jump Table Formation
// =============================================================================

/// Minimum alternatives before table dispatch beats chained handlers.
const JUMP_TABLE_MIN: usize = 3;

/// Collapse literal-headed alternation chains into jump tables.
///
/// Runs over the preprocessed (acyclic) tree on an explicit work stack;
/// subroutine identity is preserved so call sites still agree on one body.
pub fn form_jump_tables(root: &Node) -> CompileResult<Node> {
    enum Task {
        Enter(Node),
        /// Rebuild `node`, storing the result under the original identity.
        Build { key: usize, node: Node },
    }

    let mut built: FxHashMap<usize, Node> = FxHashMap::default();
    let mut pending: FxHashSet<usize> = FxHashSet::default();
    let mut work = vec![Task::Enter(root.clone())];

    while let Some(task) = work.pop() {
        match task {
            Task::Enter(node) => {
                let id = super::node_id(&node);
                if built.contains_key(&id) || !pending.insert(id) {
                    continue;
                }
                let node = tableize(&node);
                work.push(Task::Build { key: id, node: node.clone() });
                for child in node.children() {
                    work.push(Task::Enter(child.clone()));
                }
            }
            Task::Build { key, node } => {
                let rebuilt = map_children(&node, &mut |child| {
                    Ok(built
                        .get(&super::node_id(child))
                        .expect("child rebuilt before parent")
                        .clone())
                })?;
                built.insert(key, rebuilt);
            }
        }
    }

    let root_id = super::node_id(root);
    Ok(built.remove(&root_id).expect("root was rebuilt by the work loop"))
}

/// Replace an alternation chain with a jump-table node when every
/// alternative has a distinct literal head; otherwise return it unchanged.
fn tableize(node: &Node) -> Node {
    if !matches!(&**node, Comb::Alt(..)) {
        return node.clone();
    }
    let mut alts = Vec::new();
    gather_alternatives(node, &mut alts);
    if alts.len() < JUMP_TABLE_MIN {
        return node.clone();
    }
    let heads = match distinct_heads(&alts) {
        Some(heads) => heads,
        None => return node.clone(),
    };
    let mut table = Vec::with_capacity(alts.len());
    let mut expecteds = BTreeSet::new();
    for (head, alt) in heads.into_iter().zip(alts) {
        expecteds.insert(expected_of(&alt));
        table.push((head, alt));
    }
    Arc::new(Comb::JumpTable { table, expecteds })
}

/// Flatten an `Alt` tree left-to-right regardless of association.
fn gather_alternatives(node: &Node, out: &mut Vec<Node>) {
    let mut stack = vec![node.clone()];
    while let Some(n) = stack.pop() {
        match &*n {
            Comb::Alt(a, b) => {
                stack.push(b.clone());
                stack.push(a.clone());
            }
            _ => out.push(n.clone()),
        }
    }
}

/// The head characters of all alternatives, if every one is a distinct
/// known literal.
fn distinct_heads(alts: &[Node]) -> Option<Vec<char>> {
    let mut seen = FxHashSet::default();
    let mut heads = Vec::with_capacity(alts.len());
    for alt in alts {
        let head = leading_char(alt)?;
        if !seen.insert(head) {
            return None;
        }
        heads.push(head);
    }
    Some(heads)
}

/// The first character an alternative must consume, when statically known.
fn leading_char(node: &Node) -> Option<char> {
    match &**node {
        Comb::CharTok { c, .. } => Some(*c),
        Comb::StringTok { s, .. } | Comb::Specific { s, .. } => s.chars().next(),
        Comb::Then(a, _) | Comb::Before(a, _) | Comb::Ap(a, _) => leading_char(a),
        Comb::Map(p, _)
        | Comb::Attempt(p)
        | Comb::Label { p, .. }
        | Comb::Reason { p, .. } => leading_char(p),
        _ => None,
    }
}

/// The expected item reported when no table entry matches.
fn expected_of(node: &Node) -> ErrorItem {
    match &**node {
        Comb::Label { name, .. } => ErrorItem::Desc(name.clone()),
        Comb::CharTok { c, expected } => match expected {
            Some(e) => ErrorItem::Desc(e.clone()),
            None => ErrorItem::raw_char(*c),
        },
        Comb::StringTok { s, expected } => match expected {
            Some(e) => ErrorItem::Desc(e.clone()),
            None => ErrorItem::Raw(s.clone()),
        },
        Comb::Specific { s, .. } => ErrorItem::Raw(s.clone()),
        Comb::Then(a, _) | Comb::Before(a, _) | Comb::Ap(a, _) => expected_of(a),
        Comb::Map(p, _) | Comb::Attempt(p) | Comb::Reason { p, .. } => expected_of(p),
        // distinct_heads vouched for a literal head before we got here.
        _ => ErrorItem::raw_char(leading_char(node).unwrap_or('?')),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(c: char) -> Node {
        Arc::new(Comb::CharTok { c, expected: None })
    }

    fn pure(v: Value) -> Node {
        Arc::new(Comb::Pure(v))
    }

    #[test]
    fn test_ap_of_pures_folds() {
        let f = pure(Value::func(|v| Value::Int(v.as_int().unwrap() * 2)));
        let x = pure(Value::Int(21));
        let out = rewrite_node(Arc::new(Comb::Ap(f, x))).unwrap();
        match &*out {
            Comb::Pure(v) => assert_eq!(v.as_int(), Some(42)),
            other => panic!("expected fold, got {:?}", other),
        }
    }

    #[test]
    fn test_alt_identities() {
        let p = ch('a');
        let empty: Node = Arc::new(Comb::Empty);
        let left = rewrite_node(Arc::new(Comb::Alt(empty.clone(), p.clone()))).unwrap();
        assert!(Arc::ptr_eq(&left, &p));
        let right = rewrite_node(Arc::new(Comb::Alt(p.clone(), empty))).unwrap();
        assert!(Arc::ptr_eq(&right, &p));
        let pure_wins =
            rewrite_node(Arc::new(Comb::Alt(pure(Value::Int(1)), p))).unwrap();
        assert!(matches!(&*pure_wins, Comb::Pure(_)));
    }

    #[test]
    fn test_many_of_pure_is_rejected() {
        let err = rewrite_node(Arc::new(Comb::Many(pure(Value::Int(1))))).unwrap_err();
        assert!(err.message.contains("many"));
    }

    #[test]
    fn test_many_of_empty_is_empty_list() {
        let out = rewrite_node(Arc::new(Comb::Many(Arc::new(Comb::Empty)))).unwrap();
        match &*out {
            Comb::Pure(Value::List(items)) => assert!(items.is_empty()),
            other => panic!("expected pure list, got {:?}", other),
        }
    }

    #[test]
    fn test_many_until_with_pure_item_is_rejected() {
        let stop = Arc::new(Comb::Map(ch('.'), Arc::new(|_| Value::Unit)));
        let body = Arc::new(Comb::Alt(stop, pure(Value::Int(1))));
        let err = rewrite_node(Arc::new(Comb::ManyUntil { body })).unwrap_err();
        assert!(err.message.contains("many_till"));
    }

    #[test]
    fn test_if_of_pure_bool_selects_branch() {
        let t = ch('t');
        let e = ch('e');
        let out = rewrite_node(Arc::new(Comb::If {
            b: pure(Value::Bool(false)),
            then_p: t,
            else_p: e.clone(),
        }))
        .unwrap();
        assert!(Arc::ptr_eq(&out, &e));
    }

    #[test]
    fn test_filter_of_pure_constant_folds() {
        let keep = rewrite_node(Arc::new(Comb::Filter {
            p: pure(Value::Int(4)),
            pred: Arc::new(|v| v.as_int().unwrap() % 2 == 0),
        }))
        .unwrap();
        assert!(matches!(&*keep, Comb::Pure(_)));
        let drop = rewrite_node(Arc::new(Comb::Filter {
            p: pure(Value::Int(3)),
            pred: Arc::new(|v| v.as_int().unwrap() % 2 == 0),
        }))
        .unwrap();
        assert!(matches!(&*drop, Comb::Empty));
    }

    #[test]
    fn test_impure_defeats_folding() {
        let shielded: Node = Arc::new(Comb::Impure(pure(Value::Int(1))));
        let out = rewrite_node(Arc::new(Comb::Alt(shielded, ch('a')))).unwrap();
        assert!(matches!(&*out, Comb::Alt(..)));
    }

    #[test]
    fn test_jump_table_forms_for_distinct_heads() {
        let alt: Node = Arc::new(Comb::Alt(
            ch('a'),
            Arc::new(Comb::Alt(ch('b'), ch('c'))),
        ));
        let out = form_jump_tables(&alt).unwrap();
        match &*out {
            Comb::JumpTable { table, expecteds } => {
                assert_eq!(table.len(), 3);
                assert_eq!(expecteds.len(), 3);
            }
            other => panic!("expected jump table, got {:?}", other),
        }
    }

    #[test]
    fn test_no_table_for_duplicate_heads() {
        let alt: Node = Arc::new(Comb::Alt(
            ch('a'),
            Arc::new(Comb::Alt(ch('b'), ch('a'))),
        ));
        let out = form_jump_tables(&alt).unwrap();
        assert!(matches!(&*out, Comb::Alt(..)));
    }

    #[test]
    fn test_no_table_below_threshold() {
        let alt: Node = Arc::new(Comb::Alt(ch('a'), ch('b')));
        let out = form_jump_tables(&alt).unwrap();
        assert!(matches!(&*out, Comb::Alt(..)));
    }
}
