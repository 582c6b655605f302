//! The typed combinator surface.
//!
//! [`Parser<A>`] is a phantom-typed handle over the untyped deep embedding:
//! combinators build [`Comb`] nodes, and the type parameter tracks what the
//! compiled program will leave on the operand stack. Conversions between
//! user types and [`Value`] happen inside the closures installed at
//! construction time, so the VM itself stays type-free.
//!
//! Compilation is cached per parser handle; [`Parser::force`] warms the
//! cache eagerly and [`Parser::overflows`] opts into the continuation
//! code-generation driver for very deep grammars.

use crate::ast::{Comb, Node};
use crate::bytecode::{LoopStop, Program};
use crate::codegen::{self, CodegenMode};
use crate::registers::Reg;
use crate::CompileResult;
use chervil_core::value::{DynFn, Either, FromValue, IntoValue, Value};
use parking_lot::RwLock;
use std::marker::PhantomData;
use std::sync::{Arc, OnceLock};

/// A parser producing values of type `A`.
pub struct Parser<A> {
    node: Node,
    mode: CodegenMode,
    cache: Arc<RwLock<Option<Arc<Program>>>>,
    _marker: PhantomData<fn() -> A>,
}

impl<A> Clone for Parser<A> {
    fn clone(&self) -> Parser<A> {
        Parser {
            node: self.node.clone(),
            mode: self.mode,
            cache: self.cache.clone(),
            _marker: PhantomData,
        }
    }
}

/// Convert a value back to its typed form.
///
/// The compiler inserted every conversion that produced the value, so a
/// mismatch is an internal bug, not a user error.
pub(crate) fn from_value<A: FromValue>(v: Value) -> A {
    A::from_value(v).expect("type-erased value of unexpected shape")
}

/// Wrap a typed function as a stack function.
fn dyn_fn<A, B, F>(f: F) -> DynFn
where
    A: FromValue,
    B: IntoValue,
    F: Fn(A) -> B + Send + Sync + 'static,
{
    Arc::new(move |v| f(from_value::<A>(v)).into_value())
}

impl<A> Parser<A> {
    pub(crate) fn from_node(node: Node) -> Parser<A> {
        Parser {
            node,
            mode: CodegenMode::Direct,
            cache: Arc::new(RwLock::new(None)),
            _marker: PhantomData,
        }
    }

    fn lift<B>(&self, comb: Comb) -> Parser<B> {
        Parser::from_node(Arc::new(comb))
    }

    /// The underlying deep-embedding node.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Compile (or fetch the cached program for) this parser.
    pub fn compile(&self) -> CompileResult<Arc<Program>> {
        if let Some(program) = self.cache.read().as_ref() {
            return Ok(program.clone());
        }
        let mut slot = self.cache.write();
        if let Some(program) = slot.as_ref() {
            return Ok(program.clone());
        }
        let program = Arc::new(codegen::compile(&self.node, self.mode)?);
        *slot = Some(program.clone());
        Ok(program)
    }

    /// Compile eagerly, so the first parse pays nothing.
    pub fn force(&self) -> CompileResult<()> {
        self.compile().map(|_| ())
    }

    /// Select the continuation code-generation driver. Call this on the
    /// finished parser; it starts a fresh compilation cache.
    pub fn overflows(self) -> Parser<A> {
        Parser {
            node: self.node,
            mode: CodegenMode::Continuation,
            cache: Arc::new(RwLock::new(None)),
            _marker: PhantomData,
        }
    }

    /// Shield this parser from purity-driven optimisation.
    ///
    /// Disables exactly the rewrites that inspect `Pure` payloads beneath
    /// this point: applicative folding, dead-alternative removal, branch
    /// and filter constant folding, and the non-productive-loop check.
    pub fn impure(self) -> Parser<A> {
        Parser::from_node(Arc::new(Comb::Impure(self.node)))
    }

    // =========================================================================
    // Sequencing and Transformation
    // =========================================================================

    pub fn map<B, F>(&self, f: F) -> Parser<B>
    where
        A: FromValue,
        B: IntoValue,
        F: Fn(A) -> B + Send + Sync + 'static,
    {
        self.lift(Comb::Map(self.node.clone(), dyn_fn(f)))
    }

    /// Replace the result with a constant.
    pub fn to<B>(&self, b: B) -> Parser<B>
    where
        B: IntoValue + Clone,
    {
        self.lift(Comb::Map(
            self.node.clone(),
            Arc::new(move |_| b.clone().into_value()),
        ))
    }

    /// Run `self`, discard its result, run `q`.
    pub fn then<B>(&self, q: &Parser<B>) -> Parser<B> {
        self.lift(Comb::Then(self.node.clone(), q.node.clone()))
    }

    /// Run `self`, then `q`, keeping `self`'s result.
    pub fn before<B>(&self, q: &Parser<B>) -> Parser<A> {
        self.lift(Comb::Before(self.node.clone(), q.node.clone()))
    }

    /// Pair the results of `self` and `q`.
    pub fn zip<B>(&self, q: &Parser<B>) -> Parser<(A, B)>
    where
        A: FromValue + IntoValue,
        B: FromValue + IntoValue,
    {
        lift2(|a, b| (a, b), self, q)
    }

    // =========================================================================
    // Choice and Backtracking
    // =========================================================================

    /// Try `self`; if it fails without consuming, try `q`.
    pub fn or(&self, q: &Parser<A>) -> Parser<A> {
        self.lift(Comb::Alt(self.node.clone(), q.node.clone()))
    }

    /// Roll the input back if `self` fails after consuming.
    pub fn attempt(&self) -> Parser<A> {
        self.lift(Comb::Attempt(self.node.clone()))
    }

    /// Parse without consuming on success.
    pub fn look_ahead(&self) -> Parser<A> {
        self.lift(Comb::Look(self.node.clone()))
    }

    /// Succeed exactly when `self` fails; never consumes.
    pub fn not_followed_by(&self) -> Parser<()> {
        self.lift(Comb::NotFollowedBy(self.node.clone()))
    }

    // =========================================================================
    // Error Surgery
    // =========================================================================

    /// Name this parser in error messages.
    pub fn label(&self, name: &str) -> Parser<A> {
        self.lift(Comb::Label { p: self.node.clone(), name: name.into() })
    }

    /// Remove this parser from expected-item reporting.
    pub fn hide(&self) -> Parser<A> {
        self.lift(Comb::Label { p: self.node.clone(), name: "".into() })
    }

    /// Attach an explanatory reason to failures of this parser.
    pub fn explain(&self, reason: &str) -> Parser<A> {
        self.lift(Comb::Reason { p: self.node.clone(), reason: reason.into() })
    }

    // =========================================================================
    // Filtering
    // =========================================================================

    pub fn filter<F>(&self, pred: F) -> Parser<A>
    where
        A: FromValue,
        F: Fn(&A) -> bool + Send + Sync + 'static,
    {
        self.lift(Comb::Filter {
            p: self.node.clone(),
            pred: Arc::new(move |v| pred(&from_value::<A>(v.clone()))),
        })
    }

    /// Reject values for which `f` gives a reason.
    pub fn filter_out<F>(&self, f: F) -> Parser<A>
    where
        A: FromValue,
        F: Fn(&A) -> Option<String> + Send + Sync + 'static,
    {
        self.lift(Comb::FilterOut {
            p: self.node.clone(),
            pred: Arc::new(move |v| f(&from_value::<A>(v.clone())).map(Arc::from)),
        })
    }

    /// Reject values for which `f` gives a message, as a fatal error.
    pub fn guard_against<F>(&self, f: F) -> Parser<A>
    where
        A: FromValue,
        F: Fn(&A) -> Option<String> + Send + Sync + 'static,
    {
        self.lift(Comb::GuardAgainst {
            p: self.node.clone(),
            pred: Arc::new(move |v| f(&from_value::<A>(v.clone())).map(Arc::from)),
        })
    }

    /// Always fail, with a message computed from the parsed value.
    pub fn fail_with<F>(&self, f: F) -> Parser<A>
    where
        A: FromValue,
        F: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.lift(Comb::FastFail {
            p: self.node.clone(),
            msg: Arc::new(move |v| Arc::from(f(&from_value::<A>(v.clone())))),
        })
    }

    /// Always fail, reporting the parsed value as unexpected.
    pub fn unexpected_with<F>(&self, f: F) -> Parser<A>
    where
        A: FromValue,
        F: Fn(&A) -> String + Send + Sync + 'static,
    {
        self.lift(Comb::FastUnexpected {
            p: self.node.clone(),
            msg: Arc::new(move |v| Arc::from(f(&from_value::<A>(v.clone())))),
        })
    }

    // =========================================================================
    // Iteration
    // =========================================================================

    /// Zero or more occurrences.
    pub fn many(&self) -> Parser<Vec<A>> {
        self.lift(Comb::Many(self.node.clone()))
    }

    /// One or more occurrences.
    pub fn some(&self) -> Parser<Vec<A>>
    where
        A: FromValue + IntoValue,
    {
        lift2(
            |first, mut rest: Vec<A>| {
                rest.insert(0, first);
                rest
            },
            self,
            &self.many(),
        )
    }

    /// Zero or more occurrences, results discarded.
    pub fn skip_many(&self) -> Parser<()> {
        self.lift(Comb::SkipMany(self.node.clone()))
    }

    /// One or more, folded left through infix operators.
    pub fn chainl1(&self, op: &Parser<BinOp<A>>) -> Parser<A> {
        self.lift(Comb::Chainl { p: self.node.clone(), op: op.node.clone() })
    }

    /// One or more, folded right through infix operators.
    pub fn chainr1(&self, op: &Parser<BinOp<A>>) -> Parser<A> {
        self.lift(Comb::Chainr {
            p: self.node.clone(),
            op: op.node.clone(),
            wrap: Arc::new(|v| v),
        })
    }

    /// A value followed by zero or more postfix operators.
    pub fn chain_post(&self, op: &Parser<UnOp<A>>) -> Parser<A> {
        self.lift(Comb::ChainPost { p: self.node.clone(), op: op.node.clone() })
    }

    /// One or more, separated and optionally terminated by `sep`.
    pub fn sep_end_by1<B>(&self, sep: &Parser<B>) -> Parser<Vec<A>> {
        self.lift(Comb::SepEndBy { p: self.node.clone(), sep: sep.node.clone() })
    }

    /// Zero or more, separated and optionally terminated by `sep`.
    pub fn sep_end_by<B>(&self, sep: &Parser<B>) -> Parser<Vec<A>>
    where
        A: IntoValue,
    {
        self.sep_end_by1(sep).or(&pure(Vec::new()))
    }

    /// Zero or more occurrences of `self` until `end` matches.
    pub fn many_till<B>(&self, end: &Parser<B>) -> Parser<Vec<A>> {
        let stop = Arc::new(Comb::Map(end.node.clone(), Arc::new(|_| LoopStop::value())));
        let body = Arc::new(Comb::Alt(stop, self.node.clone()));
        self.lift(Comb::ManyUntil { body })
    }
}

// =============================================================================
// Function-Valued Results
// =============================================================================

/// A typed function value, for operator parsers and `branch`.
pub struct Fun<A, B>(Arc<dyn Fn(A) -> B + Send + Sync>);

impl<A, B> Clone for Fun<A, B> {
    fn clone(&self) -> Fun<A, B> {
        Fun(self.0.clone())
    }
}

impl<A, B> Fun<A, B> {
    pub fn new(f: impl Fn(A) -> B + Send + Sync + 'static) -> Fun<A, B> {
        Fun(Arc::new(f))
    }

    pub fn call(&self, a: A) -> B {
        (self.0)(a)
    }
}

impl<A, B> IntoValue for Fun<A, B>
where
    A: FromValue + Send + Sync + 'static,
    B: IntoValue,
{
    fn into_value(self) -> Value {
        let f = self.0;
        Value::func(move |v| f(from_value::<A>(v)).into_value())
    }
}

/// A curried binary operator.
pub type BinOp<A> = Fun<A, Fun<A, A>>;

/// A unary operator.
pub type UnOp<A> = Fun<A, A>;

/// Curry a binary function into an operator value.
pub fn binop<A, F>(f: F) -> BinOp<A>
where
    A: Clone + Send + Sync + 'static,
    F: Fn(A, A) -> A + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Fun::new(move |x: A| {
        let f = f.clone();
        Fun::new(move |y: A| f(x.clone(), y))
    })
}

/// Wrap a unary function as an operator value.
pub fn unop<A, F>(f: F) -> UnOp<A>
where
    F: Fn(A) -> A + Send + Sync + 'static,
{
    Fun::new(f)
}

// =============================================================================
// Constructors
// =============================================================================

/// Succeed with a constant, consuming nothing.
pub fn pure<A: IntoValue>(a: A) -> Parser<A> {
    Parser::from_node(Arc::new(Comb::Pure(a.into_value())))
}

/// Fail silently.
pub fn empty<A>() -> Parser<A> {
    Parser::from_node(Arc::new(Comb::Empty))
}

/// Fail with a message.
pub fn fail<A>(msg: &str) -> Parser<A> {
    Parser::from_node(Arc::new(Comb::Fail(vec![msg.into()])))
}

/// Fail reporting an unexpected item.
pub fn unexpected<A>(msg: &str) -> Parser<A> {
    Parser::from_node(Arc::new(Comb::Unexpected(msg.into())))
}

/// Any single character.
pub fn item() -> Parser<char> {
    Parser::from_node(Arc::new(Comb::Satisfy {
        pred: Arc::new(|_| true),
        expected: Some("any character".into()),
    }))
}

/// A character matching the predicate.
pub fn sat(pred: impl Fn(char) -> bool + Send + Sync + 'static) -> Parser<char> {
    Parser::from_node(Arc::new(Comb::Satisfy { pred: Arc::new(pred), expected: None }))
}

/// A specific character.
pub fn char_(c: char) -> Parser<char> {
    Parser::from_node(Arc::new(Comb::CharTok { c, expected: None }))
}

/// Any character from the set.
pub fn one_of(set: &str) -> Parser<char> {
    let set: Vec<char> = set.chars().collect();
    sat(move |c| set.contains(&c))
}

/// A specific string.
pub fn string_(s: &str) -> Parser<String> {
    Parser::from_node(Arc::new(Comb::StringTok { s: s.into(), expected: None }))
}

/// An ASCII digit.
pub fn digit() -> Parser<char> {
    sat(|c| c.is_ascii_digit()).label("digit")
}

/// The current line (1-based).
pub fn line() -> Parser<i64> {
    Parser::from_node(Arc::new(Comb::Line))
}

/// The current column (1-based).
pub fn col() -> Parser<i64> {
    Parser::from_node(Arc::new(Comb::Col))
}

/// Combine two parsers' results with a function.
pub fn lift2<A, B, C, F>(f: F, pa: &Parser<A>, pb: &Parser<B>) -> Parser<C>
where
    A: FromValue,
    B: FromValue,
    C: IntoValue,
    F: Fn(A, B) -> C + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let curried: DynFn = Arc::new(move |a: Value| {
        let f = f.clone();
        Value::func(move |b: Value| {
            f(from_value::<A>(a.clone()), from_value::<B>(b)).into_value()
        })
    });
    Parser::from_node(Arc::new(Comb::Ap(
        Arc::new(Comb::Map(pa.node.clone(), curried)),
        pb.node.clone(),
    )))
}

/// Zero or more prefix operators applied to a trailing operand.
pub fn chain_pre<A>(op: &Parser<UnOp<A>>, p: &Parser<A>) -> Parser<A> {
    Parser::from_node(Arc::new(Comb::ChainPre {
        op: op.node().clone(),
        p: p.node().clone(),
    }))
}

/// Sum-directed choice: parse the scrutinee, then run exactly one arm on
/// its payload.
pub fn branch<L, R, O>(
    scrutinee: &Parser<Either<L, R>>,
    left: &Parser<Fun<L, O>>,
    right: &Parser<Fun<R, O>>,
) -> Parser<O> {
    Parser::from_node(Arc::new(Comb::Branch {
        b: scrutinee.node().clone(),
        left: left.node().clone(),
        right: right.node().clone(),
    }))
}

/// Boolean-directed choice between two parsers.
pub fn if_then_else<A>(cond: &Parser<bool>, t: &Parser<A>, e: &Parser<A>) -> Parser<A> {
    Parser::from_node(Arc::new(Comb::If {
        b: cond.node().clone(),
        then_p: t.node().clone(),
        else_p: e.node().clone(),
    }))
}

/// Alternation over a list, folded to the right so the chain associates
/// the way `a.or(b.or(c))` does.
pub fn choice<A>(mut alternatives: Vec<Parser<A>>) -> Parser<A> {
    match alternatives.pop() {
        None => empty(),
        Some(last) => alternatives
            .into_iter()
            .rev()
            .fold(last, |acc, alt| alt.or(&acc)),
    }
}

/// Read a register.
pub fn get<S>(reg: &Reg<S>) -> Parser<S>
where
    S: FromValue,
{
    Parser::from_node(Arc::new(Comb::GetRegister(reg.slot().clone())))
}

/// Run a parser and store its result into a register.
pub fn put<S>(reg: &Reg<S>, p: &Parser<S>) -> Parser<()> {
    Parser::from_node(Arc::new(Comb::PutRegister(
        reg.slot().clone(),
        p.node().clone(),
    )))
}

/// Apply a function to a register's contents.
pub fn modify<S, F>(reg: &Reg<S>, f: F) -> Parser<()>
where
    S: FromValue + IntoValue,
    F: Fn(S) -> S + Send + Sync + 'static,
{
    put(reg, &get(reg).map(f))
}

/// Tie a recursive knot: `f` receives a handle to the parser being
/// defined and may use it anywhere in the body it returns.
pub fn recursive<A, F>(f: F) -> Parser<A>
where
    F: FnOnce(Parser<A>) -> Parser<A>,
{
    let cell: Arc<OnceLock<Node>> = Arc::new(OnceLock::new());
    let handle = Parser::from_node(Arc::new(Comb::Defer(cell.clone())));
    let defined = f(handle);
    cell.set(defined.node.clone())
        .expect("recursive cell defined twice");
    defined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::node_id;

    #[test]
    fn test_combinators_build_expected_shapes() {
        let p = char_('a').or(&char_('b')).many();
        match &**p.node() {
            Comb::Many(inner) => assert!(matches!(&**inner, Comb::Alt(..))),
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_recursive_ties_the_knot() {
        let p: Parser<char> = recursive(|rec| char_('(').then(&rec).or(&char_('x')));
        // The defer cell inside the body resolves to the returned node.
        let mut found = false;
        fn scan(node: &Node, target: usize, found: &mut bool) {
            if let Comb::Defer(cell) = &**node {
                if let Some(inner) = cell.get() {
                    *found |= node_id(inner) == target;
                }
                return;
            }
            for child in node.children() {
                scan(child, target, found);
            }
        }
        scan(p.node(), node_id(p.node()), &mut found);
        assert!(found, "body references the defined parser");
    }

    #[test]
    fn test_compile_cache_is_shared_between_clones() {
        let p = char_('a');
        let q = p.clone();
        let first = p.compile().unwrap();
        let second = q.compile().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_force_idempotence() {
        let p = digit().many();
        p.force().unwrap();
        let first = p.compile().unwrap().disassemble();
        p.force().unwrap();
        let second = p.compile().unwrap().disassemble();
        assert_eq!(first, second);
    }

    #[test]
    fn test_overflow_mode_matches_direct_mode() {
        let p = char_('a').or(&char_('b')).many();
        let direct = p.compile().unwrap().disassemble();
        let cont = p.clone().overflows().compile().unwrap().disassemble();
        assert_eq!(direct, cont);
    }

    #[test]
    fn test_many_of_pure_is_rejected_at_compile_time() {
        let p = pure(1i64).many();
        assert!(p.compile().is_err());
    }

    #[test]
    fn test_many_till_of_pure_is_rejected_at_compile_time() {
        let p = pure(1i64).many_till(&char_('z'));
        assert!(p.compile().is_err());
    }

    #[test]
    fn test_impure_suppresses_the_loop_check() {
        // The grammar is still hopeless, but `impure` promised we would
        // not inspect the purity, so it must compile.
        let p = pure(1i64).impure().many();
        assert!(p.compile().is_ok());
    }

    #[test]
    fn test_binop_curries() {
        let f: BinOp<i64> = binop(|a, b| a - b);
        assert_eq!(f.call(10).call(4), 6);
    }
}
