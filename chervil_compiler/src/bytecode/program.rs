//! The compiled parser artifact.
//!
//! A [`Program`] is the finalized instruction array plus the metadata a
//! Context needs to run it: which instructions carry per-run scratch,
//! which register slots exist and what to put in them. Programs are
//! immutable apart from that scratch; sharing one across threads means
//! giving each extra thread its own [`Program::clone_for_thread`] copy.

use super::instruction::Instr;
use chervil_core::value::Value;
use std::fmt::Write as _;

/// A compiled parser.
#[derive(Debug)]
pub struct Program {
    /// The instruction array: main body ending in `Halt`, then subroutines.
    pub instrs: Box<[Instr]>,
    /// Indices of stateful instructions, in increasing order.
    pub stateful: Box<[u32]>,
    /// `(slot, initial value)` pairs installed at the start of every parse.
    pub reg_init: Box<[(u8, Value)]>,
    /// Number of register slots in use.
    pub registers_used: u8,
}

impl Program {
    /// Assemble a finalized instruction array into a program.
    pub fn new(instrs: Box<[Instr]>, reg_init: Box<[(u8, Value)]>) -> Program {
        let stateful: Box<[u32]> = instrs
            .iter()
            .enumerate()
            .filter(|(_, i)| i.is_stateful())
            .map(|(idx, _)| idx as u32)
            .collect();
        let registers_used = reg_init
            .iter()
            .map(|(slot, _)| slot + 1)
            .max()
            .unwrap_or(0);
        Program { instrs, stateful, reg_init, registers_used }
    }

    /// An independently-runnable copy for another thread.
    ///
    /// Stateful entries come out with fresh scratch; every other operand is
    /// shared structurally through its `Arc`.
    pub fn clone_for_thread(&self) -> Program {
        Program {
            instrs: self.instrs.iter().map(Instr::clone).collect(),
            stateful: self.stateful.clone(),
            reg_init: self.reg_init.clone(),
            registers_used: self.registers_used,
        }
    }

    /// Clear all embedded scratch before a run, so a program abandoned
    /// mid-parse cannot leak state into the next parse.
    pub fn reset_scratch(&self) {
        for &idx in self.stateful.iter() {
            self.instrs[idx as usize].reset_scratch();
        }
    }

    /// Human-readable listing, one instruction per line.
    pub fn disassemble(&self) -> String {
        let mut out = String::with_capacity(self.instrs.len() * 16);
        for (pc, instr) in self.instrs.iter().enumerate() {
            let _ = writeln!(out, "{:4}  {:?}", pc, instr);
        }
        out
    }
}
