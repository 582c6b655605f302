//! Sharing and recursion analysis.
//!
//! Walks the (possibly cyclic) parser graph once, counting how many edges
//! arrive at each node. A node reached twice is shared and will compile to
//! a subroutine; a node re-entered while still on the active DFS path is a
//! recursion point. Registers are collected here too, both the full set
//! (for slot allocation) and, per recursive node, the subset used nowhere
//! else (its callee-save set).

use super::{node_id, Comb, Node, NodeId};
use crate::registers::RegSlot;
use crate::{CompileError, CompileResult};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;

/// The result of sharing analysis.
pub struct LetInfo {
    /// Nodes reached through two or more edges: compiled as subroutines.
    pub shared: FxHashSet<NodeId>,
    /// Nodes that re-enter themselves: their occurrences inside their own
    /// body become `Rec` back-edges.
    pub recursive: FxHashSet<NodeId>,
    /// Every register the grammar touches, in first-use order.
    pub registers: Vec<Arc<RegSlot>>,
    /// Per recursive node: registers used only within it. These slots are
    /// saved and restored around each recursive invocation.
    pub body_locals: FxHashMap<NodeId, Vec<Arc<RegSlot>>>,
}

/// Follow `Defer` cells to the real node.
///
/// An unset cell means `recursive` handed out a handle that was used
/// before the definition closure returned; that grammar cannot compile.
pub fn resolve(node: &Node) -> CompileResult<Node> {
    let mut current = node.clone();
    loop {
        let next = match &*current {
            Comb::Defer(cell) => cell
                .get()
                .ok_or_else(|| {
                    CompileError::new("recursive parser used before it was defined")
                })?
                .clone(),
            _ => return Ok(current),
        };
        current = next;
    }
}

/// Analyze the graph rooted at `root`.
pub fn analyze(root: &Node) -> CompileResult<LetInfo> {
    enum Event {
        Enter(Node),
        Exit(NodeId),
    }

    let mut counts: FxHashMap<NodeId, usize> = FxHashMap::default();
    let mut nodes: FxHashMap<NodeId, Node> = FxHashMap::default();
    let mut recursive: FxHashSet<NodeId> = FxHashSet::default();
    let mut on_path: FxHashSet<NodeId> = FxHashSet::default();
    let mut registers: Vec<Arc<RegSlot>> = Vec::new();
    let mut seen_regs: FxHashSet<usize> = FxHashSet::default();

    let mut stack = vec![Event::Enter(root.clone())];
    while let Some(event) = stack.pop() {
        match event {
            Event::Enter(node) => {
                let node = resolve(&node)?;
                let id = node_id(&node);
                let count = counts.entry(id).or_insert(0);
                *count += 1;
                if on_path.contains(&id) {
                    recursive.insert(id);
                    continue;
                }
                if *count > 1 {
                    // Already fully explored; the extra edge is what we
                    // came to record.
                    continue;
                }
                nodes.insert(id, node.clone());
                collect_registers(&node, &mut registers, &mut seen_regs);
                on_path.insert(id);
                stack.push(Event::Exit(id));
                for child in node.children() {
                    stack.push(Event::Enter(child.clone()));
                }
            }
            Event::Exit(id) => {
                on_path.remove(&id);
            }
        }
    }

    let shared: FxHashSet<NodeId> = counts
        .iter()
        .filter(|(_, &c)| c >= 2)
        .map(|(&id, _)| id)
        .chain(recursive.iter().copied())
        .collect();

    // Callee-save planning: a register is local to a recursive body when no
    // path avoiding that body reaches it.
    let mut body_locals = FxHashMap::default();
    for &rec_id in &recursive {
        let rec_node = &nodes[&rec_id];
        let inside = registers_under(rec_node, None)?;
        let outside = registers_under(root, Some(rec_id))?;
        let locals: Vec<Arc<RegSlot>> = registers
            .iter()
            .filter(|slot| {
                let ptr = Arc::as_ptr(slot) as usize;
                inside.contains(&ptr) && !outside.contains(&ptr)
            })
            .cloned()
            .collect();
        if !locals.is_empty() {
            body_locals.insert(rec_id, locals);
        }
    }

    Ok(LetInfo { shared, recursive, registers, body_locals })
}

fn collect_registers(
    node: &Node,
    registers: &mut Vec<Arc<RegSlot>>,
    seen: &mut FxHashSet<usize>,
) {
    let slot = match &**node {
        Comb::GetRegister(slot) | Comb::PutRegister(slot, _) => slot,
        _ => return,
    };
    if seen.insert(Arc::as_ptr(slot) as usize) {
        registers.push(slot.clone());
    }
}

/// Register pointers reachable from `start`, optionally treating one node
/// as an opaque leaf.
fn registers_under(start: &Node, skip: Option<NodeId>) -> CompileResult<FxHashSet<usize>> {
    let mut out = FxHashSet::default();
    let mut visited = FxHashSet::default();
    let mut stack = vec![start.clone()];
    while let Some(node) = stack.pop() {
        let node = resolve(&node)?;
        let id = node_id(&node);
        if skip == Some(id) {
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        if let Comb::GetRegister(slot) | Comb::PutRegister(slot, _) = &*node {
            out.insert(Arc::as_ptr(slot) as usize);
        }
        for child in node.children() {
            stack.push(child.clone());
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chervil_core::value::Value;
    use std::sync::OnceLock;

    fn ch(c: char) -> Node {
        Arc::new(Comb::CharTok { c, expected: None })
    }

    #[test]
    fn test_single_use_nodes_are_not_shared() {
        let a = ch('a');
        let b = ch('b');
        let root: Node = Arc::new(Comb::Then(a.clone(), b));
        let info = analyze(&root).unwrap();
        assert!(!info.shared.contains(&node_id(&a)));
        assert!(info.recursive.is_empty());
    }

    #[test]
    fn test_two_occurrences_become_shared() {
        let a = ch('a');
        let root: Node = Arc::new(Comb::Then(a.clone(), a.clone()));
        let info = analyze(&root).unwrap();
        assert!(info.shared.contains(&node_id(&a)));
        assert!(!info.recursive.contains(&node_id(&a)));
    }

    #[test]
    fn test_cycle_through_defer_is_recursive() {
        // p = 'a' then p
        let cell = Arc::new(OnceLock::new());
        let defer: Node = Arc::new(Comb::Defer(cell.clone()));
        let p: Node = Arc::new(Comb::Then(ch('a'), defer));
        cell.set(p.clone()).ok();
        let info = analyze(&p).unwrap();
        assert!(info.recursive.contains(&node_id(&p)));
        assert!(info.shared.contains(&node_id(&p)));
    }

    #[test]
    fn test_unset_defer_is_a_compile_error() {
        let cell: Arc<OnceLock<Node>> = Arc::new(OnceLock::new());
        let root: Node = Arc::new(Comb::Defer(cell));
        assert!(analyze(&root).is_err());
    }

    #[test]
    fn test_register_shared_with_outside_is_not_body_local() {
        use crate::registers::RegSlot;
        let slot = Arc::new(RegSlot::new(Value::Int(0)));
        let cell = Arc::new(OnceLock::new());
        let defer: Node = Arc::new(Comb::Defer(cell.clone()));
        let get: Node = Arc::new(Comb::GetRegister(slot.clone()));
        let body: Node = Arc::new(Comb::Then(get, defer));
        cell.set(body.clone()).ok();
        // The register also appears outside the recursion.
        let outer_get: Node = Arc::new(Comb::GetRegister(slot));
        let root: Node = Arc::new(Comb::Then(body.clone(), outer_get));
        let info = analyze(&root).unwrap();
        assert!(info.recursive.contains(&node_id(&body)));
        assert!(!info.body_locals.contains_key(&node_id(&body)));
    }

    #[test]
    fn test_register_only_inside_recursion_is_body_local() {
        use crate::registers::RegSlot;
        let slot = Arc::new(RegSlot::new(Value::Int(0)));
        let cell = Arc::new(OnceLock::new());
        let defer: Node = Arc::new(Comb::Defer(cell.clone()));
        let get: Node = Arc::new(Comb::GetRegister(slot));
        let body: Node = Arc::new(Comb::Then(get, defer));
        cell.set(body.clone()).ok();
        let root: Node = Arc::new(Comb::Then(body.clone(), ch('z')));
        let info = analyze(&root).unwrap();
        let locals = &info.body_locals[&node_id(&body)];
        assert_eq!(locals.len(), 1);
    }
}
