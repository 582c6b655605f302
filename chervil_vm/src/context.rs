//! The parsing machine context.
//!
//! A [`Context`] binds one compiled [`Program`] to one input and owns every
//! runtime structure: the operand stack, call frames, saved positions,
//! input checks, recovery handlers, the register file, the error stack and
//! the hint buffer. Instruction handlers in [`crate::ops`] drive it through
//! the primitives defined here.
//!
//! # Failure discipline
//!
//! Failing transitions `status` and unwinds to the nearest handler; there
//! are no exceptions anywhere on the parse path. A handler snapshots the
//! depths of the operand, state and check stacks when installed, and
//! [`Context::fail`] truncates all three on recovery, so an abandoned
//! parser can never leak stale entries into its alternatives.

use chervil_compiler::bytecode::{Instr, Program};
use chervil_compiler::NUM_REGISTERS;
use chervil_core::error::{DefuncError, DefuncHints, Pos};
use chervil_core::input::ErrorContext;
use chervil_core::value::Value;
use smallvec::SmallVec;
use std::sync::Arc;

/// Width of a tab stop for column tracking.
const TAB_WIDTH: u32 = 4;

/// Machine status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Executing normally.
    Good,
    /// Unwound to a handler; the join instruction decides what happens.
    Recover,
    /// No handler was left to recover with.
    Failed,
}

/// A recovery point.
#[derive(Debug, Clone, Copy)]
struct Handler {
    /// Call depth at installation; failure unwinds `calls` back to this.
    depth: u32,
    /// Resumption PC.
    pc: u32,
    /// Operand-stack size to truncate to.
    stack_sz: u32,
    /// Saved-position stack size to truncate to.
    states_sz: u32,
    /// Check stack size to truncate to.
    checks_sz: u32,
}

/// A return frame.
struct Frame<'p> {
    ret_pc: u32,
    /// The caller's program; restored on return so calls may cross
    /// instruction arrays.
    instrs: &'p [Instr],
}

/// Values saved around a register-owning recursive body.
type RegFrame = SmallVec<[Value; 4]>;

/// One parser execution over one input.
pub struct Context<'p> {
    // --- Input ---
    input: Vec<char>,
    source_name: Option<String>,
    pub(crate) offset: usize,
    pub(crate) line: u32,
    pub(crate) col: u32,

    // --- Machine state ---
    pub(crate) stack: Vec<Value>,
    calls: Vec<Frame<'p>>,
    states: Vec<Pos>,
    checks: Vec<usize>,
    handlers: Vec<Handler>,
    pub(crate) regs: [Value; NUM_REGISTERS],
    reg_saves: Vec<RegFrame>,
    pub(crate) status: Status,
    pub(crate) pc: usize,
    instrs: &'p [Instr],
    halted: bool,

    // --- Error state ---
    errs: Vec<DefuncError>,
    hints: DefuncHints,
    hints_valid_offset: usize,
    hint_stack: Vec<(DefuncHints, usize)>,
}

impl<'p> Context<'p> {
    /// Bind a program to an input.
    pub fn new(program: &'p Program, input: &str, source_name: Option<&str>) -> Context<'p> {
        program.reset_scratch();
        let mut regs: [Value; NUM_REGISTERS] = std::array::from_fn(|_| Value::Unit);
        for (slot, initial) in program.reg_init.iter() {
            regs[*slot as usize] = initial.clone();
        }
        Context {
            input: input.chars().collect(),
            source_name: source_name.map(str::to_owned),
            offset: 0,
            line: 1,
            col: 1,
            stack: Vec::with_capacity(16),
            calls: Vec::new(),
            states: Vec::new(),
            checks: Vec::new(),
            handlers: Vec::new(),
            regs,
            reg_saves: Vec::new(),
            status: Status::Good,
            pc: 0,
            instrs: &program.instrs,
            halted: false,
            errs: Vec::new(),
            hints: DefuncHints::Empty,
            hints_valid_offset: 0,
            hint_stack: Vec::new(),
        }
    }

    /// Run to completion.
    ///
    /// The loop dispatches while there is code to run, returns through call
    /// frames when a subroutine falls off its end, and reports the single
    /// remaining error once the machine is terminally failed.
    pub fn run(&mut self) -> Result<Value, String> {
        loop {
            if self.status == Status::Failed {
                let err = self.errs.pop().expect("failed without an error");
                debug_assert!(self.errs.is_empty(), "extra errors at failure");
                let reified = err.as_parse_error(self);
                return Err(reified.pretty(self.source_name.as_deref(), self));
            }
            if self.halted {
                debug_assert!(self.calls.is_empty(), "halted with live call frames");
                debug_assert!(self.errs.is_empty(), "succeeded with live errors");
                let value = self.stack.pop().expect("halted with an empty stack");
                debug_assert!(self.stack.is_empty(), "extra operands at success");
                return Ok(value);
            }
            if self.pc < self.instrs.len() {
                // Copy the slice reference out first: the instruction
                // borrow must outlive the `&mut self` handed to exec.
                let instrs = self.instrs;
                crate::ops::exec(&instrs[self.pc], self);
            } else if self.calls.is_empty() {
                self.halted = true;
            } else {
                self.ret();
            }
        }
    }

    // =========================================================================
    // Positions and Input
    // =========================================================================

    #[inline]
    pub fn pos(&self) -> Pos {
        Pos::new(self.offset, self.line, self.col)
    }

    /// Rewind to a previously saved position.
    #[inline]
    pub fn restore_to(&mut self, pos: Pos) {
        self.offset = pos.offset;
        self.line = pos.line;
        self.col = pos.col;
    }

    #[inline]
    pub fn current_char(&self) -> Option<char> {
        self.input.get(self.offset).copied()
    }

    /// Consume one character, maintaining line and column.
    #[inline]
    pub fn consume_char(&mut self) -> char {
        let c = self.input[self.offset];
        self.offset += 1;
        match c {
            '\n' => {
                self.line += 1;
                self.col = 1;
            }
            '\t' => {
                self.col += TAB_WIDTH - ((self.col - 1) % TAB_WIDTH);
            }
            _ => self.col += 1,
        }
        c
    }

    /// Bulk advance when the caller guarantees no newlines or tabs.
    #[inline]
    pub fn fast_unchecked_consume(&mut self, n: usize) {
        debug_assert!(self.input[self.offset..self.offset + n]
            .iter()
            .all(|&c| c != '\n' && c != '\t'));
        self.offset += n;
        self.col += n as u32;
    }

    /// Do the next characters spell out `chars` exactly?
    pub fn lookahead_matches(&self, chars: &[char]) -> bool {
        self.input[self.offset.min(self.input.len())..]
            .iter()
            .zip(chars)
            .filter(|(a, b)| a == b)
            .count()
            == chars.len()
    }

    // =========================================================================
    // Control Flow
    // =========================================================================

    /// Enter a subroutine.
    #[inline]
    pub fn call(&mut self, target: usize) {
        self.calls.push(Frame { ret_pc: self.pc as u32 + 1, instrs: self.instrs });
        self.pc = target;
    }

    /// Return from a subroutine.
    #[inline]
    pub fn ret(&mut self) {
        let frame = self.calls.pop().expect("return without a call frame");
        self.instrs = frame.instrs;
        self.pc = frame.ret_pc as usize;
    }

    #[inline]
    pub fn halt(&mut self) {
        self.halted = true;
    }

    /// Fail with a fresh error (hints attach if valid at this offset).
    pub fn fail_with(&mut self, err: DefuncError) {
        let err = self.use_hints(err);
        self.errs.push(err);
        self.unwind();
    }

    /// Propagate the current failure without a new error.
    pub fn fail_again(&mut self) {
        self.unwind();
    }

    fn unwind(&mut self) {
        match self.handlers.pop() {
            None => self.status = Status::Failed,
            Some(h) => {
                while self.calls.len() as u32 > h.depth {
                    let frame = self.calls.pop().expect("unwind below depth zero");
                    self.instrs = frame.instrs;
                }
                self.pc = h.pc as usize;
                self.stack.truncate(h.stack_sz as usize);
                self.states.truncate(h.states_sz as usize);
                self.checks.truncate(h.checks_sz as usize);
                self.status = Status::Recover;
            }
        }
    }

    /// Install a recovery point resuming at `pc`.
    ///
    /// Anything that must survive recovery (a saved state, an input check)
    /// is pushed *before* its handler so the snapshot covers it.
    pub fn push_handler(&mut self, pc: u32) {
        self.handlers.push(Handler {
            depth: self.calls.len() as u32,
            pc,
            stack_sz: self.stack.len() as u32,
            states_sz: self.states.len() as u32,
            checks_sz: self.checks.len() as u32,
        });
    }

    /// Drop the innermost handler without firing it.
    #[inline]
    pub fn pop_handler(&mut self) {
        self.handlers.pop().expect("pop on an empty handler stack");
    }

    /// Drop the innermost handler and truncate the machine stacks to its
    /// snapshot, as recovery would have. For joins that discard a
    /// successful result (`not_followed_by`).
    pub fn pop_handler_and_truncate(&mut self) {
        let h = self.handlers.pop().expect("pop on an empty handler stack");
        self.stack.truncate(h.stack_sz as usize);
        self.states.truncate(h.states_sz as usize);
        self.checks.truncate(h.checks_sz as usize);
    }

    // =========================================================================
    // Checks and Saved States
    // =========================================================================

    #[inline]
    pub fn push_check(&mut self) {
        self.checks.push(self.offset);
    }

    #[inline]
    pub fn pop_check(&mut self) -> usize {
        self.checks.pop().expect("pop on an empty check stack")
    }

    /// Re-arm the innermost check at the current offset (loop iteration).
    #[inline]
    pub fn rearm_check(&mut self) {
        *self.checks.last_mut().expect("re-arm without a check") = self.offset;
    }

    #[inline]
    pub fn save_state(&mut self) {
        self.states.push(self.pos());
    }

    #[inline]
    pub fn pop_state(&mut self) -> Pos {
        self.states.pop().expect("pop on an empty state stack")
    }

    // =========================================================================
    // Registers
    // =========================================================================

    /// Save the values of `slots` for a recursive body.
    pub fn push_reg_frame(&mut self, slots: &[u8]) {
        let frame: RegFrame = slots.iter().map(|&s| self.regs[s as usize].clone()).collect();
        self.reg_saves.push(frame);
    }

    /// Restore the values of `slots` saved on entry.
    pub fn pop_reg_frame(&mut self, slots: &[u8]) {
        let frame = self.reg_saves.pop().expect("pop on an empty register save stack");
        debug_assert_eq!(frame.len(), slots.len());
        for (&slot, value) in slots.iter().zip(frame) {
            self.regs[slot as usize] = value;
        }
    }

    // =========================================================================
    // Errors and Hints
    // =========================================================================

    #[inline]
    pub fn push_error(&mut self, err: DefuncError) {
        self.errs.push(err);
    }

    #[inline]
    pub fn pop_error(&mut self) -> DefuncError {
        self.errs.pop().expect("pop on an empty error stack")
    }

    /// Attach the hint buffer to an error born at the current offset.
    fn use_hints(&self, err: DefuncError) -> DefuncError {
        if self.hints_valid_offset == self.offset
            && !self.hints.is_empty()
            && err.offset() == self.offset
        {
            DefuncError::WithHints(Arc::new(err), self.hints.clone())
        } else {
            err
        }
    }

    /// Push the hint buffer; cleared for the region unless shadowed.
    pub fn save_hints(&mut self, shadow: bool) {
        self.hint_stack
            .push((self.hints.clone(), self.hints_valid_offset));
        if !shadow {
            self.hints = DefuncHints::Empty;
            self.hints_valid_offset = self.offset;
        }
    }

    /// Restore the hint buffer saved by the matching `save_hints`.
    pub fn restore_hints(&mut self) {
        let (hints, valid) = self.hint_stack.pop().expect("restore without saved hints");
        self.hints = hints;
        self.hints_valid_offset = valid;
    }

    /// Drop the saved frame, keeping the current buffer.
    pub fn commit_hints(&mut self) {
        self.hint_stack.pop().expect("commit without saved hints");
    }

    /// Merge the saved frame into the current buffer if it still applies at
    /// this offset, then commit.
    pub fn merge_hints(&mut self) {
        let (saved, saved_offset) = self.hint_stack.pop().expect("merge without saved hints");
        if saved_offset != self.offset {
            return;
        }
        if self.hints_valid_offset == self.offset && !self.hints.is_empty() {
            self.hints = DefuncHints::Merge(Arc::new(saved), Arc::new(self.hints.clone()));
        } else {
            self.hints = saved;
            self.hints_valid_offset = saved_offset;
        }
    }

    /// Commit a labelled region: its hint contribution is rewritten to the
    /// label and merged under whatever was saved at entry.
    pub fn relabel_hints(&mut self, label: &Arc<str>) {
        let (saved, saved_offset) = self.hint_stack.pop().expect("relabel without saved hints");
        let contribution = if self.hints_valid_offset == self.offset && !self.hints.is_empty() {
            DefuncHints::Replace(label.clone(), Arc::new(self.hints.clone()))
        } else {
            DefuncHints::Empty
        };
        self.hints = if saved_offset == self.offset && !saved.is_empty() {
            DefuncHints::Merge(Arc::new(saved), Arc::new(contribution))
        } else {
            contribution
        };
        self.hints_valid_offset = self.offset;
    }

    /// Fold a defeated branch's error into the hint buffer, if it is a
    /// trivial error at the current offset with something to offer.
    pub fn add_error_to_hints(&mut self, err: DefuncError) {
        if err.offset() != self.offset {
            return;
        }
        let reified = err.as_parse_error(self);
        let has_expecteds = reified
            .trivial_expecteds()
            .is_some_and(|set| !set.is_empty());
        if !has_expecteds {
            return;
        }
        if self.hints_valid_offset != self.offset {
            self.hints = DefuncHints::Empty;
            self.hints_valid_offset = self.offset;
        }
        self.hints = self.hints.clone().add_error(Arc::new(reified));
    }
}

// =============================================================================
// Error Reification Capability
// =============================================================================

impl ErrorContext for Context<'_> {
    fn in_range(&self, offset: usize) -> bool {
        offset < self.input.len()
    }

    fn char_at(&self, offset: usize) -> Option<char> {
        self.input.get(offset).copied()
    }

    fn substring(&self, offset: usize, len: usize) -> String {
        let start = offset.min(self.input.len());
        let end = (offset + len).min(self.input.len());
        self.input[start..end].iter().collect()
    }

    fn nearest_newline_before(&self, offset: usize) -> usize {
        let upto = offset.min(self.input.len());
        self.input[..upto]
            .iter()
            .rposition(|&c| c == '\n')
            .map(|idx| idx + 1)
            .unwrap_or(0)
    }

    fn nearest_newline_after(&self, offset: usize) -> usize {
        let from = offset.min(self.input.len());
        self.input[from..]
            .iter()
            .position(|&c| c == '\n')
            .map(|idx| from + idx)
            .unwrap_or(self.input.len())
    }

    fn segment_between(&self, start: usize, end: usize) -> String {
        self.input[start.min(self.input.len())..end.min(self.input.len())]
            .iter()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chervil_compiler::bytecode::Program;

    fn empty_program() -> Program {
        Program::new(Box::new([Instr::Push(Value::Unit), Instr::Halt]), Box::new([]))
    }

    #[test]
    fn test_column_tracking_with_tabs_and_newlines() {
        let prog = empty_program();
        let mut ctx = Context::new(&prog, "ab\tc\nx", None);
        ctx.consume_char(); // a -> col 2
        ctx.consume_char(); // b -> col 3
        ctx.consume_char(); // tab -> next stop after 3 is 5
        assert_eq!(ctx.col, 5);
        ctx.consume_char(); // c -> col 6
        ctx.consume_char(); // newline
        assert_eq!((ctx.line, ctx.col), (2, 1));
        ctx.consume_char(); // x
        assert_eq!((ctx.line, ctx.col), (2, 2));
    }

    #[test]
    fn test_tab_from_column_one() {
        let prog = empty_program();
        let mut ctx = Context::new(&prog, "\tz", None);
        ctx.consume_char();
        assert_eq!(ctx.col, 5);
    }

    #[test]
    fn test_fast_consume_advances_column_only() {
        let prog = empty_program();
        let mut ctx = Context::new(&prog, "abcd", None);
        ctx.fast_unchecked_consume(3);
        assert_eq!((ctx.offset, ctx.line, ctx.col), (3, 1, 4));
    }

    #[test]
    fn test_stack_shuffling_instructions() {
        let instrs: Box<[Instr]> = Box::new([
            Instr::Push(Value::Int(1)),
            Instr::Push(Value::Int(2)),
            Instr::Dup,
            Instr::Pop,
            Instr::Swap,
            Instr::Pop,
            Instr::Halt,
        ]);
        let prog = Program::new(instrs, Box::new([]));
        let result = Context::new(&prog, "", None).run();
        // [1,2] dup-> [1,2,2] pop-> [1,2] swap-> [2,1] pop-> [2]
        assert_eq!(result, Ok(Value::Int(2)));
    }

    #[test]
    fn test_fail_truncates_auxiliary_stacks() {
        let prog = empty_program();
        let mut ctx = Context::new(&prog, "abc", None);
        ctx.push_handler(1);
        ctx.save_state();
        ctx.push_check();
        ctx.stack.push(Value::Int(1));
        ctx.fail_with(DefuncError::empty(ctx.pos()));
        assert_eq!(ctx.status, Status::Recover);
        assert!(ctx.stack.is_empty());
        assert!(ctx.states.is_empty());
        assert!(ctx.checks.is_empty());
        assert_eq!(ctx.pc, 1);
    }

    #[test]
    fn test_fail_without_handler_is_terminal() {
        let prog = empty_program();
        let mut ctx = Context::new(&prog, "", None);
        ctx.fail_with(DefuncError::empty(ctx.pos()));
        assert_eq!(ctx.status, Status::Failed);
        assert_eq!(ctx.errs.len(), 1);
    }

    #[test]
    fn test_register_frames_restore_saved_slots() {
        let prog = empty_program();
        let mut ctx = Context::new(&prog, "", None);
        ctx.regs[1] = Value::Int(10);
        ctx.push_reg_frame(&[1]);
        ctx.regs[1] = Value::Int(99);
        ctx.pop_reg_frame(&[1]);
        assert_eq!(ctx.regs[1], Value::Int(10));
    }

    #[test]
    fn test_line_bounds_for_caret_rendering() {
        let prog = empty_program();
        let ctx = Context::new(&prog, "ab\ncd\nef", None);
        assert_eq!(ctx.nearest_newline_before(4), 3);
        assert_eq!(ctx.nearest_newline_after(4), 5);
        assert_eq!(ctx.segment_between(3, 5), "cd");
        // offset at end of input clamps
        assert_eq!(ctx.nearest_newline_before(8), 6);
        assert_eq!(ctx.nearest_newline_after(8), 8);
    }
}
