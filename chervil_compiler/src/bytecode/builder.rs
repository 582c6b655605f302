//! Instruction emission buffer with symbolic labels.
//!
//! Code generation emits into a [`CodeBuffer`], marking jump targets with
//! `Instr::Label` placeholders. [`CodeBuffer::finish`] then resolves in two
//! passes: the first records `label -> pc` for every marker while deciding
//! the compacted layout, the second drops the markers and rewrites each
//! instruction's embedded labels to absolute PCs.

use super::instruction::Instr;
use crate::{CompileError, CompileResult};
use rustc_hash::FxHashMap;

/// A growing instruction buffer with label allocation.
pub struct CodeBuffer {
    instrs: Vec<Instr>,
    next_label: u32,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> CodeBuffer {
        CodeBuffer { instrs: Vec::with_capacity(capacity), next_label: 0 }
    }

    /// Allocate a fresh symbolic label.
    #[inline]
    pub fn fresh_label(&mut self) -> u32 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Append an instruction.
    #[inline]
    pub fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    /// Mark the current position as the target of `label`.
    #[inline]
    pub fn emit_label(&mut self, label: u32) {
        self.instrs.push(Instr::Label(label));
    }

    /// Number of emitted entries, including pending label markers.
    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    /// Resolve labels and compact into the final instruction array.
    pub fn finish(self) -> CompileResult<Box<[Instr]>> {
        let mut targets: FxHashMap<u32, u32> = FxHashMap::default();
        let mut pc = 0u32;
        for instr in &self.instrs {
            match instr {
                Instr::Label(l) => {
                    if targets.insert(*l, pc).is_some() {
                        return Err(CompileError::new(format!(
                            "label {} bound twice during code generation",
                            l
                        )));
                    }
                }
                _ => pc += 1,
            }
        }
        let mut out = Vec::with_capacity(pc as usize);
        for mut instr in self.instrs {
            if matches!(instr, Instr::Label(_)) {
                continue;
            }
            instr.relabel(&targets);
            out.push(instr);
        }
        Ok(out.into_boxed_slice())
    }
}
