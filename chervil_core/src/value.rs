//! Type-erased operand values.
//!
//! The parsing VM is untyped internally: every intermediate result lives on
//! one operand stack as a [`Value`]. The typed [`Parser<A>`] facade in the
//! compiler crate converts between user types and `Value` at the edges via
//! [`IntoValue`] / [`FromValue`], so the hot dispatch loop never needs to
//! know result types.
//!
//! Common cases (`Unit`, `Bool`, `Char`, `Int`, `Float`) are stored inline;
//! everything else is behind an `Arc` so that `Dup` and handler-driven stack
//! truncation stay cheap.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// A unary function value, as pushed by `Push` and consumed by `Apply`.
///
/// Multi-argument functions are curried: a binary operator is a
/// `Func` returning another `Func`.
pub type DynFn = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// An operand-stack value.
#[derive(Clone)]
pub enum Value {
    /// The unit result of discarding parsers (`skip_many`, `put`, ...).
    Unit,
    Bool(bool),
    Char(char),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    /// An immutable list, produced by `many` and friends.
    List(Arc<Vec<Value>>),
    Pair(Arc<(Value, Value)>),
    /// Left injection of a sum, consumed by `Case`.
    Left(Arc<Value>),
    /// Right injection of a sum, consumed by `Case`.
    Right(Arc<Value>),
    /// A function value, consumed by `Apply`.
    Func(DynFn),
    /// Escape hatch for user-defined result types.
    Opaque(Arc<dyn Any + Send + Sync>),
}

impl Value {
    /// Build a string value.
    #[inline]
    pub fn str(s: impl Into<Arc<str>>) -> Value {
        Value::Str(s.into())
    }

    /// Build a list value.
    #[inline]
    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Arc::new(items))
    }

    /// Build a pair value.
    #[inline]
    pub fn pair(a: Value, b: Value) -> Value {
        Value::Pair(Arc::new((a, b)))
    }

    /// Build a function value.
    #[inline]
    pub fn func(f: impl Fn(Value) -> Value + Send + Sync + 'static) -> Value {
        Value::Func(Arc::new(f))
    }

    /// Build an opaque value from any user type.
    #[inline]
    pub fn opaque<T: Any + Send + Sync>(v: T) -> Value {
        Value::Opaque(Arc::new(v))
    }

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[inline]
    pub fn as_char(&self) -> Option<char> {
        match self {
            Value::Char(c) => Some(*c),
            _ => None,
        }
    }

    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    #[inline]
    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }

    /// Downcast an opaque value to a concrete user type.
    pub fn downcast_opaque<T: Any + Send + Sync>(&self) -> Option<&T> {
        match self {
            Value::Opaque(v) => v.downcast_ref::<T>(),
            _ => None,
        }
    }

    /// Apply a function value.
    ///
    /// The compiler only emits `Apply` against stack shapes it produced
    /// itself, so a non-function operand here is a code-generation bug.
    #[inline]
    pub fn apply(&self, arg: Value) -> Value {
        match self {
            Value::Func(f) => f(arg),
            other => panic!("Apply on non-function value {:?}", other),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "{:?}", c),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items.iter()).finish(),
            Value::Pair(p) => write!(f, "({:?}, {:?})", p.0, p.1),
            Value::Left(v) => write!(f, "Left({:?})", v),
            Value::Right(v) => write!(f, "Right({:?})", v),
            Value::Func(_) => write!(f, "<function>"),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Pair(a), Value::Pair(b)) => a == b,
            (Value::Left(a), Value::Left(b)) => a == b,
            (Value::Right(a), Value::Right(b)) => a == b,
            (Value::Func(a), Value::Func(b)) => Arc::ptr_eq(a, b),
            (Value::Opaque(a), Value::Opaque(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

// =============================================================================
// Either
// =============================================================================

/// A plain sum type for the `branch` combinator surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Either<L, R> {
    Left(L),
    Right(R),
}

// =============================================================================
// Typed Conversion
// =============================================================================

/// Conversion from a user type into a stack value.
pub trait IntoValue: Send + Sync + 'static {
    fn into_value(self) -> Value;
}

/// Conversion from a stack value back into a user type.
///
/// Returns `None` on a representation mismatch; the typed facade treats
/// that as an internal invariant violation (the compiler inserted the
/// conversion that produced the value in the first place).
pub trait FromValue: Sized {
    fn from_value(v: Value) -> Option<Self>;
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Unit
    }
}

impl FromValue for () {
    fn from_value(v: Value) -> Option<()> {
        v.is_unit().then_some(())
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for bool {
    fn from_value(v: Value) -> Option<bool> {
        v.as_bool()
    }
}

impl IntoValue for char {
    fn into_value(self) -> Value {
        Value::Char(self)
    }
}

impl FromValue for char {
    fn from_value(v: Value) -> Option<char> {
        v.as_char()
    }
}

impl IntoValue for i64 {
    fn into_value(self) -> Value {
        Value::Int(self)
    }
}

impl FromValue for i64 {
    fn from_value(v: Value) -> Option<i64> {
        v.as_int()
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for f64 {
    fn from_value(v: Value) -> Option<f64> {
        v.as_float()
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self.into())
    }
}

impl FromValue for String {
    fn from_value(v: Value) -> Option<String> {
        v.as_str().map(str::to_owned)
    }
}

impl IntoValue for Arc<str> {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl FromValue for Arc<str> {
    fn from_value(v: Value) -> Option<Arc<str>> {
        match v {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(v: Value) -> Option<Value> {
        Some(v)
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::list(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(v: Value) -> Option<Vec<T>> {
        match v {
            Value::List(items) => items.iter().cloned().map(T::from_value).collect(),
            _ => None,
        }
    }
}

impl<A: IntoValue, B: IntoValue> IntoValue for (A, B) {
    fn into_value(self) -> Value {
        Value::pair(self.0.into_value(), self.1.into_value())
    }
}

impl<A: FromValue, B: FromValue> FromValue for (A, B) {
    fn from_value(v: Value) -> Option<(A, B)> {
        match v {
            Value::Pair(p) => Some((A::from_value(p.0.clone())?, B::from_value(p.1.clone())?)),
            _ => None,
        }
    }
}

impl<L: IntoValue, R: IntoValue> IntoValue for Either<L, R> {
    fn into_value(self) -> Value {
        match self {
            Either::Left(l) => Value::Left(Arc::new(l.into_value())),
            Either::Right(r) => Value::Right(Arc::new(r.into_value())),
        }
    }
}

impl<L: FromValue, R: FromValue> FromValue for Either<L, R> {
    fn from_value(v: Value) -> Option<Either<L, R>> {
        match v {
            Value::Left(l) => L::from_value((*l).clone()).map(Either::Left),
            Value::Right(r) => R::from_value((*r).clone()).map(Either::Right),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Char('x').as_char(), Some('x'));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_char(), None);
        assert!(Value::Unit.is_unit());
    }

    #[test]
    fn test_apply() {
        let f = Value::func(|v| Value::Int(v.as_int().unwrap() + 1));
        assert_eq!(f.apply(Value::Int(41)), Value::Int(42));
    }

    #[test]
    fn test_roundtrip_conversions() {
        assert_eq!(i64::from_value(7i64.into_value()), Some(7));
        assert_eq!(
            Vec::<char>::from_value(vec!['a', 'b'].into_value()),
            Some(vec!['a', 'b'])
        );
        assert_eq!(
            <(char, i64)>::from_value(('z', 9).into_value()),
            Some(('z', 9))
        );
        let e: Either<char, i64> = Either::Right(3);
        assert_eq!(Either::<char, i64>::from_value(e.into_value()), Some(Either::Right(3)));
    }

    #[test]
    fn test_opaque_downcast() {
        #[derive(Debug, PartialEq)]
        struct Custom(u8);
        let v = Value::opaque(Custom(5));
        assert_eq!(v.downcast_opaque::<Custom>(), Some(&Custom(5)));
        assert_eq!(v.downcast_opaque::<String>(), None);
    }

    #[test]
    fn test_func_equality_is_identity() {
        let f: DynFn = Arc::new(|v| v);
        let a = Value::Func(f.clone());
        let b = Value::Func(f);
        let c = Value::func(|v| v);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
