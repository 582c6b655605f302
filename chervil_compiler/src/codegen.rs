//! Lowering the preprocessed tree to instructions.
//!
//! Every shape expands to a fixed instruction schema (see the `expand`
//! match). Shared nodes emit a `Call` and queue their body; queued bodies
//! are emitted after the main program, each ending in `Return`, with the
//! callee-save wrapper around bodies that own registers.
//!
//! Two driver strategies walk the tree over one shared expansion:
//!
//! - [`CodegenMode::Direct`] recurses on the host stack (the default), and
//! - [`CodegenMode::Continuation`] runs an explicit work list, for grammars
//!   deep enough to exhaust the host stack during compilation.
//!
//! Both produce byte-identical programs.

use crate::ast::let_finder::{self, resolve};
use crate::ast::{optimise, preprocess, Comb, Node, NodeId};
use crate::bytecode::{CodeBuffer, Instr, Program, SlotList};
use crate::registers;
use crate::CompileResult;
use chervil_core::error::ErrorItem;
use chervil_core::value::Value;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Code-generation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CodegenMode {
    /// Direct host-stack recursion.
    #[default]
    Direct,
    /// Explicit continuation work list; survives very deep grammars.
    Continuation,
}

/// Compile a parser graph into a program.
pub fn compile(root: &Node, mode: CodegenMode) -> CompileResult<Program> {
    let info = let_finder::analyze(root)?;
    registers::allocate(&info.registers)?;
    let tree = preprocess::preprocess(root, &info)?;
    let tree = optimise::form_jump_tables(&tree)?;

    let mut body_slots: FxHashMap<NodeId, SlotList> = FxHashMap::default();
    for (&id, locals) in &info.body_locals {
        let mut slots: SlotList = locals
            .iter()
            .map(|slot| slot.addr().expect("register allocated before codegen"))
            .collect();
        slots.sort_unstable();
        body_slots.insert(id, slots);
    }

    let mut gen = CodeGen {
        buf: CodeBuffer::new(estimate_len(&tree)),
        mode,
        sub_labels: FxHashMap::default(),
        queue: Vec::new(),
        queued: FxHashSet::default(),
        body_slots,
    };
    gen.gen(&tree)?;
    gen.buf.emit(Instr::Halt);
    gen.emit_subroutines()?;

    let reg_init: Box<[(u8, Value)]> = info
        .registers
        .iter()
        .map(|slot| {
            (
                slot.addr().expect("register allocated before codegen"),
                slot.initial().clone(),
            )
        })
        .collect();
    Ok(Program::new(gen.buf.finish()?, reg_init))
}

/// Rough emitted-length estimate for buffer pre-sizing, walked without
/// host recursion so it is safe on arbitrarily deep trees.
fn estimate_len(root: &Node) -> usize {
    let mut seen_subs = FxHashSet::default();
    let mut stack = vec![root.clone()];
    let mut total = 16;
    while let Some(node) = stack.pop() {
        if let Comb::Subroutine { id, .. } = &*node {
            if !seen_subs.insert(*id) {
                total += 1;
                continue;
            }
        }
        total += 3;
        for child in node.children() {
            stack.push(child.clone());
        }
    }
    total
}

/// One unit of emission work.
enum Step {
    I(Instr),
    L(u32),
    Child(Node),
}

struct CodeGen {
    buf: CodeBuffer,
    mode: CodegenMode,
    /// Call target per shared node.
    sub_labels: FxHashMap<NodeId, u32>,
    /// Bodies waiting to be emitted after the main program.
    queue: Vec<(NodeId, Node)>,
    queued: FxHashSet<NodeId>,
    /// Callee-save slots per recursive body.
    body_slots: FxHashMap<NodeId, SlotList>,
}

impl CodeGen {
    fn gen(&mut self, node: &Node) -> CompileResult<()> {
        match self.mode {
            CodegenMode::Direct => self.gen_direct(node),
            CodegenMode::Continuation => self.gen_trampoline(node),
        }
    }

    fn gen_direct(&mut self, node: &Node) -> CompileResult<()> {
        let mut steps = Vec::with_capacity(16);
        self.expand(node, &mut steps)?;
        for step in steps {
            match step {
                Step::I(instr) => self.buf.emit(instr),
                Step::L(label) => self.buf.emit_label(label),
                Step::Child(child) => self.gen_direct(&child)?,
            }
        }
        Ok(())
    }

    fn gen_trampoline(&mut self, node: &Node) -> CompileResult<()> {
        let mut work = vec![Step::Child(node.clone())];
        while let Some(step) = work.pop() {
            match step {
                Step::I(instr) => self.buf.emit(instr),
                Step::L(label) => self.buf.emit_label(label),
                Step::Child(child) => {
                    let mut steps = Vec::with_capacity(16);
                    self.expand(&child, &mut steps)?;
                    while let Some(s) = steps.pop() {
                        work.push(s);
                    }
                }
            }
        }
        Ok(())
    }

    fn label_for(&mut self, id: NodeId) -> u32 {
        if let Some(&label) = self.sub_labels.get(&id) {
            return label;
        }
        let label = self.buf.fresh_label();
        self.sub_labels.insert(id, label);
        label
    }

    /// Emit queued subroutine bodies, draining anything they queue in turn.
    fn emit_subroutines(&mut self) -> CompileResult<()> {
        while let Some((id, body)) = self.queue.pop() {
            let label = self.label_for(id);
            self.buf.emit_label(label);
            match self.body_slots.get(&id).cloned() {
                Some(slots) => {
                    let handler = self.buf.fresh_label();
                    self.buf.emit(Instr::CalleeSave { slots: slots.clone(), handler });
                    self.gen(&body)?;
                    self.buf.emit(Instr::CalleeRestore { slots: slots.clone() });
                    self.buf.emit(Instr::Return);
                    self.buf.emit_label(handler);
                    self.buf.emit(Instr::CalleeRestoreAndFail { slots });
                }
                None => {
                    self.gen(&body)?;
                    self.buf.emit(Instr::Return);
                }
            }
        }
        Ok(())
    }

    /// Expand one node into its instruction schema.
    fn expand(&mut self, node: &Node, steps: &mut Vec<Step>) -> CompileResult<()> {
        use Step::{Child, I, L};
        match &**node {
            // --- Leaves ---
            Comb::Pure(v) => steps.push(I(Instr::Push(v.clone()))),
            Comb::Empty => steps.push(I(Instr::Empty)),
            Comb::Fail(msgs) => steps.push(I(Instr::Fail(msgs.clone()))),
            Comb::Unexpected(m) => steps.push(I(Instr::Unexpected(m.clone()))),
            Comb::Satisfy { pred, expected } => steps.push(I(Instr::Satisfies {
                pred: pred.clone(),
                expected: expected.clone(),
            })),
            Comb::CharTok { c, expected } => {
                steps.push(I(Instr::CharTok { c: *c, expected: expected.clone() }));
            }
            Comb::StringTok { s, expected } => steps.push(I(Instr::StringTok {
                s: s.clone(),
                chars: s.chars().collect(),
                expected: expected.clone(),
            })),
            Comb::Line => steps.push(I(Instr::Line)),
            Comb::Col => steps.push(I(Instr::Col)),
            Comb::GetRegister(slot) => {
                steps.push(I(Instr::Get(slot.addr().expect("register allocated"))));
            }
            Comb::PutRegister(slot, p) => {
                steps.push(Child(p.clone()));
                steps.push(I(Instr::Put(slot.addr().expect("register allocated"))));
                steps.push(I(Instr::Push(Value::Unit)));
            }

            // --- Composition ---
            Comb::Map(p, f) => {
                steps.push(I(Instr::Push(Value::Func(f.clone()))));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::Apply));
            }
            Comb::Ap(pf, px) => {
                steps.push(Child(pf.clone()));
                steps.push(Child(px.clone()));
                steps.push(I(Instr::Apply));
            }
            Comb::Then(a, b) => {
                steps.push(Child(a.clone()));
                steps.push(I(Instr::Pop));
                steps.push(Child(b.clone()));
            }
            Comb::Before(a, b) => {
                steps.push(Child(a.clone()));
                steps.push(Child(b.clone()));
                steps.push(I(Instr::Pop));
            }

            // --- Choice ---
            Comb::Alt(p, q) => {
                let handler = self.buf.fresh_label();
                let merge = self.buf.fresh_label();
                let end = self.buf.fresh_label();
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::JumpGood(end)));
                steps.push(L(handler));
                steps.push(I(Instr::Catch));
                steps.push(I(Instr::PushHandler(merge)));
                steps.push(Child(q.clone()));
                steps.push(I(Instr::PopHandler));
                steps.push(I(Instr::ErrorToHints));
                steps.push(I(Instr::Jump(end)));
                steps.push(L(merge));
                steps.push(I(Instr::MergeErrors));
                steps.push(L(end));
            }
            Comb::JumpTable { table, expecteds } => {
                let end = self.buf.fresh_label();
                let mut dispatch = FxHashMap::default();
                let mut arms = Vec::with_capacity(table.len());
                for (c, alt) in table {
                    let label = self.buf.fresh_label();
                    dispatch.insert(*c, label);
                    arms.push((label, alt.clone()));
                }
                steps.push(I(Instr::JumpTable {
                    table: dispatch,
                    expecteds: Arc::new(expecteds.clone()),
                }));
                for (label, alt) in arms {
                    steps.push(L(label));
                    steps.push(Child(alt));
                    steps.push(I(Instr::Jump(end)));
                }
                steps.push(L(end));
            }

            // --- Backtracking ---
            Comb::Attempt(p) => {
                let handler = self.buf.fresh_label();
                steps.push(I(Instr::Attempt(handler)));
                steps.push(Child(p.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::Restore));
            }
            Comb::Look(p) => {
                let handler = self.buf.fresh_label();
                steps.push(I(Instr::Look(handler)));
                steps.push(Child(p.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::LookExit));
            }
            Comb::NotFollowedBy(p) => {
                let handler = self.buf.fresh_label();
                steps.push(I(Instr::NotFollowedBy(handler)));
                steps.push(Child(p.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::NegLookExit));
            }

            // --- Iteration ---
            Comb::Many(p) => {
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(L(body));
                steps.push(Child(p.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::Many { body, acc: Mutex::new(Vec::new()) }));
            }
            Comb::SkipMany(p) => {
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(L(body));
                steps.push(Child(p.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::SkipMany { body }));
            }
            Comb::ChainPost { p, op } => {
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(Child(p.clone()));
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(L(body));
                steps.push(Child(op.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::ChainPost { body }));
            }
            Comb::ChainPre { op, p } => {
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(L(body));
                steps.push(Child(op.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::ChainPre { body, acc: Mutex::new(None) }));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::Apply));
            }
            Comb::Chainl { p, op } => {
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(Child(p.clone()));
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(L(body));
                steps.push(Child(op.clone()));
                steps.push(Child(p.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::Chainl { body }));
            }
            Comb::Chainr { p, op, wrap } => {
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(Child(p.clone()));
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(L(body));
                steps.push(Child(op.clone()));
                steps.push(Child(p.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::Chainr {
                    body,
                    wrap: wrap.clone(),
                    acc: Mutex::new(None),
                }));
            }
            Comb::SepEndBy { p, sep } => {
                // Each round parses an item and then a separator-or-nothing
                // flag; the loop join uses the flag to decide continuation.
                let more = Arc::new(Comb::Map(
                    sep.clone(),
                    Arc::new(|_| Value::Bool(true)),
                ));
                let flag = Arc::new(Comb::Alt(
                    more,
                    Arc::new(Comb::Pure(Value::Bool(false))),
                ));
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(L(body));
                steps.push(Child(p.clone()));
                steps.push(Child(flag));
                steps.push(L(handler));
                steps.push(I(Instr::SepEndBy1 { body, acc: Mutex::new(Vec::new()) }));
            }
            Comb::ManyUntil { body: loop_body } => {
                // The body decides termination itself (terminator-or-item
                // alternation), but the loop still installs a handler so a
                // failing body discards the partial accumulator on its way
                // out.
                let handler = self.buf.fresh_label();
                let body = self.buf.fresh_label();
                steps.push(I(Instr::PushHandler(handler)));
                steps.push(L(body));
                steps.push(Child(loop_body.clone()));
                steps.push(L(handler));
                steps.push(I(Instr::ManyUntil { body, acc: Mutex::new(Vec::new()) }));
            }

            // --- Selection ---
            Comb::Branch { b, left, right } => {
                let right_label = self.buf.fresh_label();
                let end = self.buf.fresh_label();
                steps.push(Child(b.clone()));
                steps.push(I(Instr::Case(right_label)));
                steps.push(Child(left.clone()));
                steps.push(I(Instr::Swap));
                steps.push(I(Instr::Apply));
                steps.push(I(Instr::Jump(end)));
                steps.push(L(right_label));
                steps.push(Child(right.clone()));
                steps.push(I(Instr::Swap));
                steps.push(I(Instr::Apply));
                steps.push(L(end));
            }
            Comb::If { b, then_p, else_p } => {
                let else_label = self.buf.fresh_label();
                let end = self.buf.fresh_label();
                steps.push(Child(b.clone()));
                steps.push(I(Instr::If(else_label)));
                steps.push(Child(then_p.clone()));
                steps.push(I(Instr::Jump(end)));
                steps.push(L(else_label));
                steps.push(Child(else_p.clone()));
                steps.push(L(end));
            }
            Comb::Filter { p, pred } => {
                steps.push(I(Instr::SaveState));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::Filter { pred: pred.clone() }));
            }
            Comb::FilterOut { p, pred } => {
                steps.push(I(Instr::SaveState));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::FilterOut { pred: pred.clone() }));
            }
            Comb::GuardAgainst { p, pred } => {
                steps.push(I(Instr::SaveState));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::GuardAgainst { pred: pred.clone() }));
            }
            Comb::FastFail { p, msg } => {
                steps.push(I(Instr::SaveState));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::FastFail { msg: msg.clone() }));
            }
            Comb::FastUnexpected { p, msg } => {
                steps.push(I(Instr::SaveState));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::FastUnexpected { msg: msg.clone() }));
            }

            // --- Error surgery ---
            Comb::Label { p, name } => {
                let handler = self.buf.fresh_label();
                let end = self.buf.fresh_label();
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(I(Instr::SaveHints { shadow: false }));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::RelabelHints(name.clone())));
                steps.push(I(Instr::Jump(end)));
                steps.push(L(handler));
                steps.push(I(Instr::RelabelError(name.clone())));
                steps.push(L(end));
            }
            Comb::Reason { p, reason } => {
                let handler = self.buf.fresh_label();
                let end = self.buf.fresh_label();
                steps.push(I(Instr::InputCheck(handler)));
                steps.push(Child(p.clone()));
                steps.push(I(Instr::JumpGood(end)));
                steps.push(L(handler));
                steps.push(I(Instr::ReasonError(reason.clone())));
                steps.push(L(end));
            }

            // --- Tokens ---
            Comb::Natural => steps.push(I(Instr::TokenNatural)),
            Comb::Float => steps.push(I(Instr::TokenFloat)),
            Comb::StringLit { quote, escapes } => steps.push(I(Instr::TokenStringLit {
                quote: *quote,
                escapes: escapes.clone(),
            })),
            Comb::Escape { escapes } => {
                steps.push(I(Instr::TokenEscape { escapes: escapes.clone() }));
            }
            Comb::WhiteSpace { cfg } => {
                steps.push(I(Instr::TokenWhiteSpace { cfg: cfg.clone() }));
            }
            Comb::SkipComments { cfg } => {
                steps.push(I(Instr::TokenSkipComments { cfg: cfg.clone() }));
            }
            Comb::Specific { s, letter } => steps.push(I(Instr::TokenSpecific {
                s: s.clone(),
                chars: s.chars().collect(),
                letter: letter.clone(),
            })),
            Comb::NonSpecific { name, start, rest, illegal } => {
                steps.push(I(Instr::TokenNonSpecific {
                    name: name.clone(),
                    start: start.clone(),
                    rest: rest.clone(),
                    illegal: illegal.clone(),
                }));
            }
            Comb::MaxOp { ops } => {
                let expecteds: BTreeSet<ErrorItem> =
                    ops.iter().map(|op| ErrorItem::Raw(op.clone())).collect();
                steps.push(I(Instr::TokenMaxOp {
                    ops: ops.clone(),
                    expecteds: Arc::new(expecteds),
                }));
            }

            // --- Structure ---
            Comb::Impure(p) => steps.push(Child(p.clone())),
            Comb::Defer(_) => {
                let resolved = resolve(node)?;
                steps.push(Child(resolved));
            }
            Comb::Subroutine { id, body, .. } => {
                let label = self.label_for(*id);
                steps.push(I(Instr::Call(label)));
                if self.queued.insert(*id) {
                    self.queue.push((*id, body.clone()));
                }
            }
            Comb::Rec { id } => {
                let label = self.label_for(*id);
                steps.push(I(Instr::Call(label)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ch(c: char) -> Node {
        Arc::new(Comb::CharTok { c, expected: None })
    }

    fn disasm(root: &Node, mode: CodegenMode) -> String {
        compile(root, mode).unwrap().disassemble()
    }

    #[test]
    fn test_single_char_compiles_to_chr_and_halt() {
        let prog = compile(&ch('a'), CodegenMode::Direct).unwrap();
        assert_eq!(prog.instrs.len(), 2);
        assert!(matches!(prog.instrs[0], Instr::CharTok { c: 'a', .. }));
        assert!(matches!(prog.instrs[1], Instr::Halt));
    }

    #[test]
    fn test_choice_schema() {
        let root: Node = Arc::new(Comb::Alt(ch('a'), ch('b')));
        let listing = disasm(&root, CodegenMode::Direct);
        assert!(listing.contains("inputcheck"));
        assert!(listing.contains("catch"));
        assert!(listing.contains("mergeerrors"));
        assert!(listing.contains("errortohints"));
    }

    #[test]
    fn test_shared_node_emits_one_body_and_two_calls() {
        let shared: Node = Arc::new(Comb::Then(ch('a'), ch('b')));
        let root: Node = Arc::new(Comb::Then(shared.clone(), shared));
        let prog = compile(&root, CodegenMode::Direct).unwrap();
        let listing = prog.disassemble();
        assert_eq!(listing.matches("call").count(), 2);
        assert_eq!(listing.matches("return").count(), 1);
    }

    #[test]
    fn test_recursive_grammar_compiles_to_self_call() {
        use std::sync::OnceLock;
        let cell = Arc::new(OnceLock::new());
        let defer: Node = Arc::new(Comb::Defer(cell.clone()));
        let rest: Node = Arc::new(Comb::Alt(defer, Arc::new(Comb::Pure(Value::Unit))));
        let p: Node = Arc::new(Comb::Then(ch('a'), rest));
        cell.set(p.clone()).ok();
        let prog = compile(&p, CodegenMode::Direct).unwrap();
        let listing = prog.disassemble();
        assert!(listing.matches("call").count() >= 2, "entry call plus back-edge:\n{}", listing);
    }

    #[test]
    fn test_many_is_stateful() {
        let root: Node = Arc::new(Comb::Many(ch('a')));
        let prog = compile(&root, CodegenMode::Direct).unwrap();
        assert_eq!(prog.stateful.len(), 1);
    }

    #[test]
    fn test_continuation_mode_emits_identical_code() {
        let inner: Node = Arc::new(Comb::Alt(ch('a'), ch('b')));
        let root: Node = Arc::new(Comb::Many(Arc::new(Comb::Then(inner, ch('c')))));
        assert_eq!(
            disasm(&root, CodegenMode::Direct),
            disasm(&root, CodegenMode::Continuation)
        );
    }

    #[test]
    fn test_deep_grammar_compiles_in_continuation_mode() {
        let mut node = ch('x');
        for _ in 0..50_000 {
            node = Arc::new(Comb::Then(ch('a'), node));
        }
        assert!(compile(&node, CodegenMode::Continuation).is_ok());
    }
}
