//! The closed instruction set of the parsing VM.
//!
//! An [`Instr`] is a tagged opcode with immediate operands: labels,
//! predicates, character data, register indices. Before label resolution a
//! `u32` label field holds a symbolic label id; afterwards it holds an
//! absolute PC. The VM crate owns execution; this module owns the data.
//!
//! A few loop instructions are **stateful**: they embed per-run scratch
//! (accumulators) behind a mutex. Cloning an instruction always produces
//! fresh, empty scratch, which is what makes
//! [`Program::clone_for_thread`](super::Program::clone_for_thread) safe.

use crate::ast::{CommentConfig, DynPred, StrPred, ValueMsg, ValuePred, ValueToMsg};
use chervil_core::error::ErrorItem;
use chervil_core::value::{DynFn, Value};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Callee-save slot lists are at most the whole register pool.
pub type SlotList = SmallVec<[u8; 4]>;

/// The sentinel a `ManyUntil` body yields when its terminator matched.
pub struct LoopStop;

impl LoopStop {
    /// The sentinel as a stack value.
    pub fn value() -> Value {
        Value::opaque(LoopStop)
    }

    /// Is this stack value the loop sentinel?
    pub fn is_stop(v: &Value) -> bool {
        v.downcast_opaque::<LoopStop>().is_some()
    }
}

/// One VM instruction.
pub enum Instr {
    // --- Stack and control ---
    Push(Value),
    Pop,
    Dup,
    Swap,
    /// Pop the argument, pop the function, push the application.
    Apply,
    Jump(u32),
    /// Emission-time marker; erased by label resolution.
    Label(u32),
    Call(u32),
    Return,
    /// End of the main body; subroutines follow it in the same array.
    Halt,
    /// Fail silently.
    Empty,
    /// Fail with free-form messages.
    Fail(Vec<Arc<str>>),
    /// Fail with an unexpected description.
    Unexpected(Arc<str>),

    // --- Characters ---
    CharTok { c: char, expected: Option<Arc<str>> },
    Satisfies { pred: DynPred, expected: Option<Arc<str>> },
    /// Matches a literal; consumes the matched prefix even on mismatch,
    /// reporting at the token start.
    StringTok {
        s: Arc<str>,
        chars: Arc<[char]>,
        expected: Option<Arc<str>>,
    },

    // --- Choice and recovery ---
    /// Push an input check and a handler for the first alternative.
    InputCheck(u32),
    /// Commit a successful branch: pop handler and check, jump to the end.
    JumpGood(u32),
    /// Entered on the failure path: re-fail if input was consumed,
    /// otherwise resume Good into the next alternative.
    Catch,
    PushHandler(u32),
    PopHandler,
    /// Both alternatives failed: merge the two errors and re-fail.
    MergeErrors,
    /// The second alternative won: fold the defeated branch's error into
    /// the hint buffer.
    ErrorToHints,

    // --- Backtracking ---
    /// Handler plus state snapshot for `attempt`.
    Attempt(u32),
    /// Join point of `attempt`: discard on success, rewind and re-fail on
    /// failure.
    Restore,
    /// Handler plus state snapshot (and shadowed hints) for `look_ahead`.
    Look(u32),
    /// Join point of `look_ahead`: rewind on success, propagate on failure.
    LookExit,
    /// Handler plus state snapshot for `not_followed_by`.
    NotFollowedBy(u32),
    /// Join point of `not_followed_by`: inverts success and failure.
    NegLookExit,

    // --- Iteration ---
    Many { body: u32, acc: Mutex<Vec<Value>> },
    SkipMany { body: u32 },
    ChainPost { body: u32 },
    ChainPre { body: u32, acc: Mutex<Option<DynFn>> },
    Chainl { body: u32 },
    Chainr {
        body: u32,
        wrap: DynFn,
        acc: Mutex<Option<DynFn>>,
    },
    SepEndBy1 { body: u32, acc: Mutex<Vec<Value>> },
    ManyUntil { body: u32, acc: Mutex<Vec<Value>> },

    // --- Selection and filtering ---
    /// Pop a sum: `Left` falls through, `Right` jumps.
    Case(u32),
    /// Pop a boolean: `true` falls through, `false` jumps.
    If(u32),
    /// Snapshot the position for the filter family's error reporting.
    SaveState,
    Filter { pred: ValuePred },
    FilterOut { pred: ValueMsg },
    GuardAgainst { pred: ValueMsg },
    FastFail { msg: ValueToMsg },
    FastUnexpected { msg: ValueToMsg },

    // --- Registers ---
    Get(u8),
    Put(u8),
    /// Entry of a register-owning recursive body: save the slots, install a
    /// restore-on-failure handler.
    CalleeSave { slots: SlotList, handler: u32 },
    /// Success exit: pop the handler and restore the slots.
    CalleeRestore { slots: SlotList },
    /// Failure exit: restore the slots and re-fail.
    CalleeRestoreAndFail { slots: SlotList },

    // --- Positions ---
    Line,
    Col,

    // --- Error plumbing ---
    SaveHints { shadow: bool },
    /// Success exit of a labelled region: commit the saved hints with the
    /// region's contribution rewritten to the label.
    RelabelHints(Arc<str>),
    /// Failure exit of a labelled region: relabel the error if it did not
    /// consume, restore hints, re-fail.
    RelabelError(Arc<str>),
    /// Failure exit of an `explain` region: attach the reason if the error
    /// did not consume, re-fail.
    ReasonError(Arc<str>),

    // --- Tokens ---
    TokenNatural,
    TokenFloat,
    TokenStringLit {
        quote: char,
        escapes: Arc<FxHashMap<char, char>>,
    },
    TokenEscape { escapes: Arc<FxHashMap<char, char>> },
    TokenWhiteSpace { cfg: Arc<CommentConfig> },
    TokenSkipComments { cfg: Arc<CommentConfig> },
    TokenSpecific {
        s: Arc<str>,
        chars: Arc<[char]>,
        letter: DynPred,
    },
    TokenNonSpecific {
        name: Arc<str>,
        start: DynPred,
        rest: DynPred,
        illegal: StrPred,
    },
    TokenMaxOp {
        ops: Arc<Vec<Arc<str>>>,
        expecteds: Arc<BTreeSet<ErrorItem>>,
    },

    /// Literal-headed alternation dispatch: peek one character and jump.
    JumpTable {
        table: FxHashMap<char, u32>,
        expecteds: Arc<BTreeSet<ErrorItem>>,
    },
}

impl Instr {
    /// Does this instruction embed per-run scratch?
    pub fn is_stateful(&self) -> bool {
        matches!(
            self,
            Instr::Many { .. }
                | Instr::ChainPre { .. }
                | Instr::Chainr { .. }
                | Instr::SepEndBy1 { .. }
                | Instr::ManyUntil { .. }
        )
    }

    /// Clear embedded scratch, making the instruction ready for a fresh run.
    pub fn reset_scratch(&self) {
        match self {
            Instr::Many { acc, .. }
            | Instr::SepEndBy1 { acc, .. }
            | Instr::ManyUntil { acc, .. } => acc.lock().clear(),
            Instr::ChainPre { acc, .. } | Instr::Chainr { acc, .. } => {
                *acc.lock() = None;
            }
            _ => {}
        }
    }

    /// Rewrite every embedded label through the resolution map.
    ///
    /// Called once per instruction after the `Label` markers have been
    /// collected; a label missing from the map is an emitter bug.
    pub fn relabel(&mut self, map: &FxHashMap<u32, u32>) {
        let fix = |l: &mut u32| {
            *l = *map.get(l).expect("unresolved label in emitted code");
        };
        match self {
            Instr::Jump(l)
            | Instr::Call(l)
            | Instr::InputCheck(l)
            | Instr::JumpGood(l)
            | Instr::PushHandler(l)
            | Instr::Attempt(l)
            | Instr::Look(l)
            | Instr::NotFollowedBy(l)
            | Instr::Case(l)
            | Instr::If(l)
            | Instr::Many { body: l, .. }
            | Instr::SkipMany { body: l }
            | Instr::ChainPost { body: l }
            | Instr::ChainPre { body: l, .. }
            | Instr::Chainl { body: l }
            | Instr::Chainr { body: l, .. }
            | Instr::SepEndBy1 { body: l, .. }
            | Instr::ManyUntil { body: l, .. }
            | Instr::CalleeSave { handler: l, .. } => fix(l),
            Instr::JumpTable { table, .. } => {
                for l in table.values_mut() {
                    fix(l);
                }
            }
            _ => {}
        }
    }
}

impl Clone for Instr {
    /// Structural clone with fresh scratch; shared operands stay shared
    /// through their `Arc`s.
    fn clone(&self) -> Instr {
        match self {
            Instr::Push(v) => Instr::Push(v.clone()),
            Instr::Pop => Instr::Pop,
            Instr::Dup => Instr::Dup,
            Instr::Swap => Instr::Swap,
            Instr::Apply => Instr::Apply,
            Instr::Jump(l) => Instr::Jump(*l),
            Instr::Label(l) => Instr::Label(*l),
            Instr::Call(l) => Instr::Call(*l),
            Instr::Return => Instr::Return,
            Instr::Halt => Instr::Halt,
            Instr::Empty => Instr::Empty,
            Instr::Fail(msgs) => Instr::Fail(msgs.clone()),
            Instr::Unexpected(m) => Instr::Unexpected(m.clone()),
            Instr::CharTok { c, expected } => Instr::CharTok { c: *c, expected: expected.clone() },
            Instr::Satisfies { pred, expected } => Instr::Satisfies {
                pred: pred.clone(),
                expected: expected.clone(),
            },
            Instr::StringTok { s, chars, expected } => Instr::StringTok {
                s: s.clone(),
                chars: chars.clone(),
                expected: expected.clone(),
            },
            Instr::InputCheck(l) => Instr::InputCheck(*l),
            Instr::JumpGood(l) => Instr::JumpGood(*l),
            Instr::Catch => Instr::Catch,
            Instr::PushHandler(l) => Instr::PushHandler(*l),
            Instr::PopHandler => Instr::PopHandler,
            Instr::MergeErrors => Instr::MergeErrors,
            Instr::ErrorToHints => Instr::ErrorToHints,
            Instr::Attempt(l) => Instr::Attempt(*l),
            Instr::Restore => Instr::Restore,
            Instr::Look(l) => Instr::Look(*l),
            Instr::LookExit => Instr::LookExit,
            Instr::NotFollowedBy(l) => Instr::NotFollowedBy(*l),
            Instr::NegLookExit => Instr::NegLookExit,
            Instr::Many { body, .. } => Instr::Many { body: *body, acc: Mutex::new(Vec::new()) },
            Instr::SkipMany { body } => Instr::SkipMany { body: *body },
            Instr::ChainPost { body } => Instr::ChainPost { body: *body },
            Instr::ChainPre { body, .. } => {
                Instr::ChainPre { body: *body, acc: Mutex::new(None) }
            }
            Instr::Chainl { body } => Instr::Chainl { body: *body },
            Instr::Chainr { body, wrap, .. } => Instr::Chainr {
                body: *body,
                wrap: wrap.clone(),
                acc: Mutex::new(None),
            },
            Instr::SepEndBy1 { body, .. } => {
                Instr::SepEndBy1 { body: *body, acc: Mutex::new(Vec::new()) }
            }
            Instr::ManyUntil { body, .. } => {
                Instr::ManyUntil { body: *body, acc: Mutex::new(Vec::new()) }
            }
            Instr::Case(l) => Instr::Case(*l),
            Instr::If(l) => Instr::If(*l),
            Instr::SaveState => Instr::SaveState,
            Instr::Filter { pred } => Instr::Filter { pred: pred.clone() },
            Instr::FilterOut { pred } => Instr::FilterOut { pred: pred.clone() },
            Instr::GuardAgainst { pred } => Instr::GuardAgainst { pred: pred.clone() },
            Instr::FastFail { msg } => Instr::FastFail { msg: msg.clone() },
            Instr::FastUnexpected { msg } => Instr::FastUnexpected { msg: msg.clone() },
            Instr::Get(r) => Instr::Get(*r),
            Instr::Put(r) => Instr::Put(*r),
            Instr::CalleeSave { slots, handler } => Instr::CalleeSave {
                slots: slots.clone(),
                handler: *handler,
            },
            Instr::CalleeRestore { slots } => Instr::CalleeRestore { slots: slots.clone() },
            Instr::CalleeRestoreAndFail { slots } => {
                Instr::CalleeRestoreAndFail { slots: slots.clone() }
            }
            Instr::Line => Instr::Line,
            Instr::Col => Instr::Col,
            Instr::SaveHints { shadow } => Instr::SaveHints { shadow: *shadow },
            Instr::RelabelHints(l) => Instr::RelabelHints(l.clone()),
            Instr::RelabelError(l) => Instr::RelabelError(l.clone()),
            Instr::ReasonError(r) => Instr::ReasonError(r.clone()),
            Instr::TokenNatural => Instr::TokenNatural,
            Instr::TokenFloat => Instr::TokenFloat,
            Instr::TokenStringLit { quote, escapes } => Instr::TokenStringLit {
                quote: *quote,
                escapes: escapes.clone(),
            },
            Instr::TokenEscape { escapes } => Instr::TokenEscape { escapes: escapes.clone() },
            Instr::TokenWhiteSpace { cfg } => Instr::TokenWhiteSpace { cfg: cfg.clone() },
            Instr::TokenSkipComments { cfg } => Instr::TokenSkipComments { cfg: cfg.clone() },
            Instr::TokenSpecific { s, chars, letter } => Instr::TokenSpecific {
                s: s.clone(),
                chars: chars.clone(),
                letter: letter.clone(),
            },
            Instr::TokenNonSpecific { name, start, rest, illegal } => Instr::TokenNonSpecific {
                name: name.clone(),
                start: start.clone(),
                rest: rest.clone(),
                illegal: illegal.clone(),
            },
            Instr::TokenMaxOp { ops, expecteds } => Instr::TokenMaxOp {
                ops: ops.clone(),
                expecteds: expecteds.clone(),
            },
            Instr::JumpTable { table, expecteds } => Instr::JumpTable {
                table: table.clone(),
                expecteds: expecteds.clone(),
            },
        }
    }
}

impl fmt::Debug for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Push(v) => write!(f, "push {:?}", v),
            Instr::Pop => write!(f, "pop"),
            Instr::Dup => write!(f, "dup"),
            Instr::Swap => write!(f, "swap"),
            Instr::Apply => write!(f, "apply"),
            Instr::Jump(l) => write!(f, "jump {}", l),
            Instr::Label(l) => write!(f, "label {}", l),
            Instr::Call(l) => write!(f, "call {}", l),
            Instr::Return => write!(f, "return"),
            Instr::Halt => write!(f, "halt"),
            Instr::Empty => write!(f, "empty"),
            Instr::Fail(_) => write!(f, "fail"),
            Instr::Unexpected(m) => write!(f, "unexpected {:?}", m),
            Instr::CharTok { c, .. } => write!(f, "chr {:?}", c),
            Instr::Satisfies { .. } => write!(f, "sat"),
            Instr::StringTok { s, .. } => write!(f, "str {:?}", s),
            Instr::InputCheck(l) => write!(f, "inputcheck {}", l),
            Instr::JumpGood(l) => write!(f, "jumpgood {}", l),
            Instr::Catch => write!(f, "catch"),
            Instr::PushHandler(l) => write!(f, "pushhandler {}", l),
            Instr::PopHandler => write!(f, "pophandler"),
            Instr::MergeErrors => write!(f, "mergeerrors"),
            Instr::ErrorToHints => write!(f, "errortohints"),
            Instr::Attempt(l) => write!(f, "attempt {}", l),
            Instr::Restore => write!(f, "restore"),
            Instr::Look(l) => write!(f, "look {}", l),
            Instr::LookExit => write!(f, "lookexit"),
            Instr::NotFollowedBy(l) => write!(f, "notfollowedby {}", l),
            Instr::NegLookExit => write!(f, "neglookexit"),
            Instr::Many { body, .. } => write!(f, "many {}", body),
            Instr::SkipMany { body } => write!(f, "skipmany {}", body),
            Instr::ChainPost { body } => write!(f, "chainpost {}", body),
            Instr::ChainPre { body, .. } => write!(f, "chainpre {}", body),
            Instr::Chainl { body } => write!(f, "chainl {}", body),
            Instr::Chainr { body, .. } => write!(f, "chainr {}", body),
            Instr::SepEndBy1 { body, .. } => write!(f, "sependby1 {}", body),
            Instr::ManyUntil { body, .. } => write!(f, "manyuntil {}", body),
            Instr::Case(l) => write!(f, "case {}", l),
            Instr::If(l) => write!(f, "if {}", l),
            Instr::SaveState => write!(f, "savestate"),
            Instr::Filter { .. } => write!(f, "filter"),
            Instr::FilterOut { .. } => write!(f, "filterout"),
            Instr::GuardAgainst { .. } => write!(f, "guardagainst"),
            Instr::FastFail { .. } => write!(f, "fastfail"),
            Instr::FastUnexpected { .. } => write!(f, "fastunexpected"),
            Instr::Get(r) => write!(f, "get r{}", r),
            Instr::Put(r) => write!(f, "put r{}", r),
            Instr::CalleeSave { slots, handler } => {
                write!(f, "calleesave {:?} {}", slots.as_slice(), handler)
            }
            Instr::CalleeRestore { slots } => {
                write!(f, "calleerestore {:?}", slots.as_slice())
            }
            Instr::CalleeRestoreAndFail { slots } => {
                write!(f, "calleerestoreandfail {:?}", slots.as_slice())
            }
            Instr::Line => write!(f, "line"),
            Instr::Col => write!(f, "col"),
            Instr::SaveHints { shadow } => write!(f, "savehints shadow={}", shadow),
            Instr::RelabelHints(l) => write!(f, "relabelhints {:?}", l),
            Instr::RelabelError(l) => write!(f, "relabelerror {:?}", l),
            Instr::ReasonError(r) => write!(f, "reasonerror {:?}", r),
            Instr::TokenNatural => write!(f, "tok.natural"),
            Instr::TokenFloat => write!(f, "tok.float"),
            Instr::TokenStringLit { quote, .. } => write!(f, "tok.stringlit {:?}", quote),
            Instr::TokenEscape { .. } => write!(f, "tok.escape"),
            Instr::TokenWhiteSpace { .. } => write!(f, "tok.whitespace"),
            Instr::TokenSkipComments { .. } => write!(f, "tok.skipcomments"),
            Instr::TokenSpecific { s, .. } => write!(f, "tok.keyword {:?}", s),
            Instr::TokenNonSpecific { name, .. } => write!(f, "tok.ident {:?}", name),
            Instr::TokenMaxOp { .. } => write!(f, "tok.maxop"),
            Instr::JumpTable { table, .. } => {
                let mut entries: Vec<(char, u32)> =
                    table.iter().map(|(c, l)| (*c, *l)).collect();
                entries.sort_unstable();
                write!(f, "jumptable {:?}", entries)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stateful_classification() {
        assert!(Instr::Many { body: 0, acc: Mutex::new(vec![]) }.is_stateful());
        assert!(Instr::SepEndBy1 { body: 0, acc: Mutex::new(vec![]) }.is_stateful());
        assert!(!Instr::SkipMany { body: 0 }.is_stateful());
        assert!(!Instr::Chainl { body: 0 }.is_stateful());
        assert!(!Instr::Push(Value::Unit).is_stateful());
    }

    #[test]
    fn test_clone_produces_fresh_scratch() {
        let instr = Instr::Many { body: 7, acc: Mutex::new(vec![Value::Int(1)]) };
        let copy = instr.clone();
        match copy {
            Instr::Many { body, acc } => {
                assert_eq!(body, 7);
                assert!(acc.lock().is_empty());
            }
            _ => panic!("clone changed shape"),
        }
    }

    #[test]
    fn test_relabel_rewrites_embedded_labels() {
        let mut map = FxHashMap::default();
        map.insert(3u32, 12u32);
        let mut instr = Instr::JumpGood(3);
        instr.relabel(&map);
        assert!(matches!(instr, Instr::JumpGood(12)));

        let mut table = FxHashMap::default();
        table.insert('x', 3u32);
        let mut jt = Instr::JumpTable { table, expecteds: Arc::new(BTreeSet::new()) };
        jt.relabel(&map);
        match jt {
            Instr::JumpTable { table, .. } => assert_eq!(table[&'x'], 12),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_loop_stop_sentinel() {
        assert!(LoopStop::is_stop(&LoopStop::value()));
        assert!(!LoopStop::is_stop(&Value::Unit));
    }
}
