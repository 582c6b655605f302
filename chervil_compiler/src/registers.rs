//! The parser-visible register pool.
//!
//! Registers are mutable slots scoped to a single parse, read and written
//! by the `Get` / `Put` instructions. The pool is a fixed four slots: the
//! callee-save discipline around recursive subroutines records exactly the
//! slots a body owns, and a small closed pool keeps that bookkeeping a
//! fixed-size copy. Grammars needing more than four registers are rejected
//! at compile time.
//!
//! A register handle is bound to its slot the first time any parser using
//! it is compiled, and the binding is permanent, so a register behaves as
//! the same global state everywhere it appears.

use crate::{CompileError, CompileResult};
use chervil_core::value::{IntoValue, Value};
use rustc_hash::FxHashSet;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// Number of register slots available to a compiled parser.
pub const NUM_REGISTERS: usize = 4;

/// The untyped identity of a register: its slot binding and initial value.
pub struct RegSlot {
    addr: OnceLock<u8>,
    initial: Value,
}

impl RegSlot {
    pub fn new(initial: Value) -> RegSlot {
        RegSlot { addr: OnceLock::new(), initial }
    }

    /// The bound slot index, if allocation has happened.
    #[inline]
    pub fn addr(&self) -> Option<u8> {
        self.addr.get().copied()
    }

    /// The value installed into the slot at the start of every parse.
    #[inline]
    pub fn initial(&self) -> &Value {
        &self.initial
    }
}

impl std::fmt::Debug for RegSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.addr() {
            Some(a) => write!(f, "RegSlot(r{})", a),
            None => write!(f, "RegSlot(unallocated)"),
        }
    }
}

/// A typed register handle.
///
/// Clones share the underlying slot; the type parameter only constrains
/// the `get` / `put` combinator surface.
pub struct Reg<S> {
    slot: Arc<RegSlot>,
    _marker: PhantomData<fn() -> S>,
}

impl<S> Clone for Reg<S> {
    fn clone(&self) -> Reg<S> {
        Reg { slot: self.slot.clone(), _marker: PhantomData }
    }
}

impl<S: IntoValue> Reg<S> {
    /// Create a fresh, unallocated register with an initial value.
    pub fn new(initial: S) -> Reg<S> {
        Reg {
            slot: Arc::new(RegSlot::new(initial.into_value())),
            _marker: PhantomData,
        }
    }
}

impl<S> Reg<S> {
    /// The underlying slot identity.
    pub fn slot(&self) -> &Arc<RegSlot> {
        &self.slot
    }
}

/// Bind every unallocated register in `used` to a free slot.
///
/// Fails when demand exceeds [`NUM_REGISTERS`], or when two registers
/// bound by earlier compilations collide on a slot within one grammar.
pub fn allocate(used: &[Arc<RegSlot>]) -> CompileResult<()> {
    let mut taken: FxHashSet<u8> = FxHashSet::default();
    for slot in used {
        if let Some(addr) = slot.addr() {
            if !taken.insert(addr) {
                return Err(CompileError::new(format!(
                    "register slot r{} is claimed twice in one grammar; \
                     registers cannot be shared across independently compiled parsers",
                    addr
                )));
            }
        }
    }
    let mut free = (0..NUM_REGISTERS as u8).filter(|a| !taken.contains(a));
    for slot in used {
        if slot.addr().is_none() {
            let addr = free.next().ok_or_else(|| {
                CompileError::new(format!(
                    "grammar uses more than {} registers",
                    NUM_REGISTERS
                ))
            })?;
            // A concurrent compile may have raced us to the binding; the
            // value it chose came from the same allocation rules.
            let _ = slot.addr.set(addr);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocation_assigns_distinct_slots() {
        let regs: Vec<Arc<RegSlot>> =
            (0..3).map(|i| Arc::new(RegSlot::new(Value::Int(i)))).collect();
        allocate(&regs).unwrap();
        let mut addrs: Vec<u8> = regs.iter().map(|r| r.addr().unwrap()).collect();
        addrs.sort_unstable();
        addrs.dedup();
        assert_eq!(addrs.len(), 3);
    }

    #[test]
    fn test_allocation_is_stable_across_compiles() {
        let reg = Arc::new(RegSlot::new(Value::Unit));
        allocate(std::slice::from_ref(&reg)).unwrap();
        let first = reg.addr().unwrap();
        allocate(std::slice::from_ref(&reg)).unwrap();
        assert_eq!(reg.addr().unwrap(), first);
    }

    #[test]
    fn test_pool_overflow_is_a_compile_error() {
        let regs: Vec<Arc<RegSlot>> =
            (0..5).map(|_| Arc::new(RegSlot::new(Value::Unit))).collect();
        let err = allocate(&regs).unwrap_err();
        assert!(err.message.contains("registers"));
    }

    #[test]
    fn test_conflicting_bindings_are_rejected() {
        let a = Arc::new(RegSlot::new(Value::Unit));
        let b = Arc::new(RegSlot::new(Value::Unit));
        allocate(std::slice::from_ref(&a)).unwrap();
        allocate(std::slice::from_ref(&b)).unwrap();
        // Both independently grabbed r0; using them together cannot work.
        assert_eq!(a.addr(), b.addr());
        assert!(allocate(&[a, b]).is_err());
    }
}
