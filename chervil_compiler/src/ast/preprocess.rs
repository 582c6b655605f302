//! Subroutine and recursion substitution.
//!
//! Rebuilds the analyzed graph as an acyclic tree. Shared nodes become a
//! single [`Comb::Subroutine`] reused at every call site; a child that is
//! still mid-rebuild when looked up is exactly a recursive back-edge, which
//! becomes [`Comb::Rec`]. Peephole rewrites run bottom-up during the
//! rebuild, so every composite node is optimised exactly once.
//!
//! The rebuild runs on an explicit work stack: grammar depth never
//! translates into host-stack depth, in any compilation mode.
//!
//! The rebuild is pure: running it twice over the same tree produces the
//! same substitution, which is what makes repeated compilation idempotent.

use super::let_finder::{resolve, LetInfo};
use super::{node_id, optimise, Comb, Node};
use crate::CompileResult;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::{Arc, OnceLock};

/// Rebuild `root` with sharing materialized as subroutines.
pub fn preprocess(root: &Node, info: &LetInfo) -> CompileResult<Node> {
    enum Task {
        Enter(Node),
        Build(Node),
    }

    let mut built: FxHashMap<usize, Node> = FxHashMap::default();
    let mut building: FxHashSet<usize> = FxHashSet::default();
    let root = resolve(root)?;
    let mut work = vec![Task::Enter(root.clone())];

    while let Some(task) = work.pop() {
        match task {
            Task::Enter(node) => {
                let node = resolve(&node)?;
                let id = node_id(&node);
                if built.contains_key(&id) || building.contains(&id) {
                    // Either already rebuilt, or a back-edge the parent
                    // will close with a Rec node.
                    continue;
                }
                if info.shared.contains(&id) {
                    building.insert(id);
                }
                work.push(Task::Build(node.clone()));
                for child in node.children() {
                    work.push(Task::Enter(child.clone()));
                }
            }
            Task::Build(node) => {
                let id = node_id(&node);
                if built.contains_key(&id) {
                    continue;
                }
                let rebuilt = map_children(&node, &mut |child| {
                    let child = resolve(child)?;
                    let cid = node_id(&child);
                    if let Some(done) = built.get(&cid) {
                        return Ok(done.clone());
                    }
                    debug_assert!(building.contains(&cid), "child rebuilt out of order");
                    Ok(Arc::new(Comb::Rec { id: cid }))
                })?;
                let optimised = if Arc::ptr_eq(&rebuilt, &node) {
                    rebuilt
                } else {
                    optimise::rewrite_node(rebuilt)?
                };
                let result = if info.shared.contains(&id) {
                    building.remove(&id);
                    if !info.recursive.contains(&id) && is_cheap(&optimised) {
                        // A shared single-instruction leaf is cheaper
                        // inlined at each site than called.
                        optimised
                    } else {
                        Arc::new(Comb::Subroutine {
                            id,
                            body: optimised,
                            size_cache: OnceLock::new(),
                        })
                    }
                } else {
                    optimised
                };
                built.insert(id, result);
            }
        }
    }

    let root_id = node_id(&root);
    Ok(built
        .remove(&root_id)
        .expect("root was rebuilt by the work loop"))
}

/// Leaves that compile to a single instruction.
fn is_cheap(node: &Node) -> bool {
    matches!(
        &**node,
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
    )
}

/// Rebuild one node with `f` applied to each child, reusing the original
/// `Arc` for leaves. Shapes that emit a child twice still rebuild it once.
pub(crate) fn map_children(
    node: &Node,
    f: &mut dyn FnMut(&Node) -> CompileResult<Node>,
) -> CompileResult<Node> {
    let rebuilt = match &**node {
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
        | Comb::Rec { .. } => return Ok(node.clone()),
        Comb::Defer(_) => {
            let resolved = resolve(node)?;
            return f(&resolved);
        }
        Comb::PutRegister(slot, p) => Comb::PutRegister(slot.clone(), f(p)?),
        Comb::Map(p, g) => Comb::Map(f(p)?, g.clone()),
        Comb::Ap(a, b) => Comb::Ap(f(a)?, f(b)?),
        Comb::Then(a, b) => Comb::Then(f(a)?, f(b)?),
        Comb::Before(a, b) => Comb::Before(f(a)?, f(b)?),
        Comb::Alt(a, b) => Comb::Alt(f(a)?, f(b)?),
        Comb::Attempt(p) => Comb::Attempt(f(p)?),
        Comb::Look(p) => Comb::Look(f(p)?),
        Comb::NotFollowedBy(p) => Comb::NotFollowedBy(f(p)?),
        Comb::Many(p) => Comb::Many(f(p)?),
        Comb::SkipMany(p) => Comb::SkipMany(f(p)?),
        Comb::ChainPost { p, op } => Comb::ChainPost { p: f(p)?, op: f(op)? },
        Comb::ChainPre { op, p } => Comb::ChainPre { op: f(op)?, p: f(p)? },
        Comb::Chainl { p, op } => Comb::Chainl { p: f(p)?, op: f(op)? },
        Comb::Chainr { p, op, wrap } => {
            Comb::Chainr { p: f(p)?, op: f(op)?, wrap: wrap.clone() }
        }
        Comb::SepEndBy { p, sep } => Comb::SepEndBy { p: f(p)?, sep: f(sep)? },
        Comb::ManyUntil { body } => Comb::ManyUntil { body: f(body)? },
        Comb::Branch { b, left, right } => {
            Comb::Branch { b: f(b)?, left: f(left)?, right: f(right)? }
        }
        Comb::If { b, then_p, else_p } => {
            Comb::If { b: f(b)?, then_p: f(then_p)?, else_p: f(else_p)? }
        }
        Comb::Filter { p, pred } => Comb::Filter { p: f(p)?, pred: pred.clone() },
        Comb::FilterOut { p, pred } => Comb::FilterOut { p: f(p)?, pred: pred.clone() },
        Comb::GuardAgainst { p, pred } => Comb::GuardAgainst { p: f(p)?, pred: pred.clone() },
        Comb::FastFail { p, msg } => Comb::FastFail { p: f(p)?, msg: msg.clone() },
        Comb::FastUnexpected { p, msg } => {
            Comb::FastUnexpected { p: f(p)?, msg: msg.clone() }
        }
        Comb::Label { p, name } => Comb::Label { p: f(p)?, name: name.clone() },
        Comb::Reason { p, reason } => Comb::Reason { p: f(p)?, reason: reason.clone() },
        Comb::Impure(p) => Comb::Impure(f(p)?),
        Comb::Subroutine { id, body, .. } => Comb::Subroutine {
            id: *id,
            body: f(body)?,
            size_cache: OnceLock::new(),
        },
        Comb::JumpTable { table, expecteds } => Comb::JumpTable {
            table: table
                .iter()
                .map(|(c, n)| Ok((*c, f(n)?)))
                .collect::<CompileResult<Vec<_>>>()?,
            expecteds: expecteds.clone(),
        },
    };
    Ok(Arc::new(rebuilt))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::let_finder;

    fn ch(c: char) -> Node {
        Arc::new(Comb::CharTok { c, expected: None })
    }

    fn run(root: &Node) -> Node {
        let info = let_finder::analyze(root).unwrap();
        preprocess(root, &info).unwrap()
    }

    #[test]
    fn test_shared_composite_becomes_one_subroutine() {
        let ab: Node = Arc::new(Comb::Then(ch('a'), ch('b')));
        let root: Node = Arc::new(Comb::Then(ab.clone(), ab));
        let out = run(&root);
        match &*out {
            Comb::Then(l, r) => {
                assert!(matches!(&**l, Comb::Subroutine { .. }));
                assert!(Arc::ptr_eq(l, r), "both sites reuse the same subroutine node");
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_shared_leaf_is_inlined() {
        let a = ch('a');
        let root: Node = Arc::new(Comb::Then(a.clone(), a));
        let out = run(&root);
        match &*out {
            Comb::Then(l, _) => assert!(matches!(&**l, Comb::CharTok { .. })),
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_recursion_becomes_subroutine_with_rec_backedge() {
        use std::sync::OnceLock;
        let cell = Arc::new(OnceLock::new());
        let defer: Node = Arc::new(Comb::Defer(cell.clone()));
        let p: Node = Arc::new(Comb::Then(ch('a'), defer));
        cell.set(p.clone()).ok();
        let out = run(&p);
        match &*out {
            Comb::Subroutine { id, body, .. } => {
                assert_eq!(*id, node_id(&p));
                match &**body {
                    Comb::Then(_, r) => {
                        assert!(matches!(&**r, Comb::Rec { id: rid } if *rid == node_id(&p)));
                    }
                    other => panic!("unexpected body {:?}", other),
                }
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_optimises_during_rebuild() {
        let dead: Node = Arc::new(Comb::Alt(Arc::new(Comb::Empty), ch('x')));
        let root: Node = Arc::new(Comb::Then(ch('a'), dead));
        let out = run(&root);
        match &*out {
            Comb::Then(_, r) => assert!(matches!(&**r, Comb::CharTok { c: 'x', .. })),
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_deep_tree_preprocesses_without_host_recursion() {
        let mut node = ch('x');
        for _ in 0..200_000 {
            node = Arc::new(Comb::Then(ch('a'), node));
        }
        let info = let_finder::analyze(&node).unwrap();
        assert!(preprocess(&node, &info).is_ok());
    }

    #[test]
    fn test_preprocess_is_idempotent_in_shape() {
        let ab: Node = Arc::new(Comb::Then(ch('a'), ch('b')));
        let root: Node = Arc::new(Comb::Then(ab.clone(), ab));
        let once = run(&root);
        let twice = run(&root);
        assert_eq!(once.kind_name(), twice.kind_name());
        assert_eq!(once.size(), twice.size());
    }
}
