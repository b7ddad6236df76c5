//! Statically-typed adapter over the packed protocol.
//!
//! Given a declared signature, the glue trait generates the pairing of a
//! boxing adapter (native arguments in, staged pack, unboxed result out)
//! and an erased view over the same callable. Invoking either surface on
//! equivalent arguments yields identical results.

use std::fmt;
use std::marker::PhantomData;

use crate::error::{CallError, Site};
use crate::packed::{PackedFunc, StageArgs};
use crate::value::{FromTagged, IntoTagged, TaggedValue, TypeCode};

/// A typed callable with signature `A -> R`, where `A` is an argument
/// tuple.
///
/// The signature is phantom: the value itself is a [`PackedFunc`] plus a
/// compile-time promise about its shape. Because a typed wrapper converts
/// to and from the function-handle code, a wrapper whose result is itself
/// a wrapper supports partial application: the outer call captures fixed
/// arguments and returns a new callable closing over them.
pub struct TypedFunc<R, A> {
    packed: PackedFunc,
    _signature: PhantomData<fn(A) -> R>,
}

// Custom clone: the signature is phantom, so no bounds on R or A.
impl<R, A> Clone for TypedFunc<R, A> {
    fn clone(&self) -> Self {
        Self {
            packed: self.packed.clone(),
            _signature: PhantomData,
        }
    }
}

impl<R, A> TypedFunc<R, A> {
    /// Adopt an existing packed function under this signature.
    ///
    /// Nothing is checked here; a shape lie surfaces as `Arity` or
    /// `TypeMismatch` at call time.
    pub fn from_packed(packed: PackedFunc) -> Self {
        Self {
            packed,
            _signature: PhantomData,
        }
    }

    /// The erased view over the same underlying callable.
    pub fn packed(&self) -> &PackedFunc {
        &self.packed
    }

    pub fn to_packed(&self) -> PackedFunc {
        self.packed.clone()
    }

    pub fn same_as(&self, other: &TypedFunc<R, A>) -> bool {
        self.packed.same_as(&other.packed)
    }
}

impl<R: FromTagged, A: StageArgs> TypedFunc<R, A> {
    /// Build the wrapper from a native callable of the declared shape.
    pub fn new<F: IntoTypedFunc<R, A>>(body: F) -> Self {
        body.into_typed_func()
    }

    /// Typed call: stage the tuple, run the packed protocol, unbox `R`.
    pub fn call(&self, args: A) -> Result<R, CallError> {
        self.packed.call(args)?.convert::<R>()
    }
}

impl<R, A> fmt::Debug for TypedFunc<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedFunc({:?})", self.packed)
    }
}

impl<R, A> IntoTagged for TypedFunc<R, A> {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Func(self.packed))
    }
}

impl<R, A> IntoTagged for &TypedFunc<R, A> {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Func(self.packed.clone()))
    }
}

impl<R, A> FromTagged for TypedFunc<R, A> {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Func(func) => Ok(Self::from_packed(func.clone())),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::FUNC,
                found: other.code(),
            }),
        }
    }
}

/// Generates the boxing/unboxing adapter for one concrete arity.
pub trait IntoTypedFunc<R, A> {
    fn into_typed_func(self) -> TypedFunc<R, A>;
}

macro_rules! impl_into_typed_func {
    ($len:expr $(, $ty:ident : $idx:tt)*) => {
        impl<F, R, $($ty),*> IntoTypedFunc<R, ($($ty,)*)> for F
        where
            F: Fn($($ty),*) -> R + Send + Sync + 'static,
            R: IntoTagged + 'static,
            $($ty: FromTagged + 'static,)*
        {
            fn into_typed_func(self) -> TypedFunc<R, ($($ty,)*)> {
                let packed = PackedFunc::new(move |args, ret| {
                    // Arity first, then per-argument unboxing: a bad call
                    // never reaches the body.
                    if args.len() != $len {
                        return Err(CallError::Arity {
                            expected: $len,
                            found: args.len(),
                        });
                    }
                    ret.set(self($(args.get::<$ty>($idx)?),*))
                });
                TypedFunc {
                    packed,
                    _signature: PhantomData,
                }
            }
        }
    };
}

impl_into_typed_func!(0);
impl_into_typed_func!(1, A0: 0);
impl_into_typed_func!(2, A0: 0, A1: 1);
impl_into_typed_func!(3, A0: 0, A1: 1, A2: 2);
impl_into_typed_func!(4, A0: 0, A1: 1, A2: 2, A3: 3);
impl_into_typed_func!(5, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_into_typed_func!(6, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_into_typed_func!(7, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_into_typed_func!(8, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn typed_and_erased_calls_agree() {
        let addone = TypedFunc::<i64, (i64,)>::new(|n: i64| n + 1);

        let typed = addone.call((3,)).expect("typed call succeeds");
        let erased = addone
            .packed()
            .call((3i64,))
            .expect("packed call succeeds")
            .convert::<i64>()
            .expect("int result");
        assert_eq!(typed, 4);
        assert_eq!(erased, typed, "both surfaces must agree");
    }

    #[test]
    fn zero_arity_and_void_results_work() {
        let constant = TypedFunc::<i64, ()>::new(|| 7i64);
        assert_eq!(constant.call(()), Ok(7));

        let nop = TypedFunc::<(), (i64,)>::new(|_n: i64| ());
        assert_eq!(nop.call((1,)), Ok(()));
        let ret = nop.packed().call((1i64,)).expect("packed call succeeds");
        assert!(ret.is_unit());
    }

    #[test]
    fn wrong_arity_fails_before_the_body_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let addone = TypedFunc::<i64, (i64,)>::new(move |n: i64| {
            flag.store(true, Ordering::Relaxed);
            n + 1
        });

        let zero = addone.packed().call(()).unwrap_err();
        assert_eq!(
            zero,
            CallError::Arity {
                expected: 1,
                found: 0,
            }
        );
        let two = addone.packed().call((1i64, 2i64)).unwrap_err();
        assert_eq!(
            two,
            CallError::Arity {
                expected: 1,
                found: 2,
            }
        );
        assert!(!ran.load(Ordering::Relaxed), "body must not have run");
    }

    #[test]
    fn wrong_type_fails_before_the_body_runs() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let addone = TypedFunc::<i64, (i64,)>::new(move |n: i64| {
            flag.store(true, Ordering::Relaxed);
            n + 1
        });

        let err = addone.packed().call(("three",)).unwrap_err();
        assert_eq!(
            err,
            CallError::TypeMismatch {
                site: Site::Arg(0),
                expected: TypeCode::INT,
                found: TypeCode::STR,
            }
        );
        assert!(!ran.load(Ordering::Relaxed), "body must not have run");
    }

    #[test]
    fn widening_applies_on_the_typed_surface() {
        let double = TypedFunc::<f64, (f64,)>::new(|x: f64| x * 2.0);
        // Integer argument read at a float parameter.
        let ret = double.packed().call((21i64,)).expect("widening applies");
        assert_eq!(ret.convert::<f64>(), Ok(42.0));
    }

    #[test]
    fn functions_flow_through_typed_signatures() {
        type Int1 = TypedFunc<i64, (i64,)>;

        let outer = TypedFunc::<i64, (Int1, i64)>::new(|f: Int1, x: i64| {
            f.call((x,)).expect("inner call succeeds")
        });
        let addone = Int1::new(|n: i64| n + 1);
        assert_eq!(outer.call((addone, 1)), Ok(2));
    }

    #[test]
    fn currying_binds_the_captured_argument() {
        type Int1 = TypedFunc<i64, (i64,)>;
        type Int2 = TypedFunc<i64, (i64, i64)>;

        // The outer wrapper returns another wrapper closing over `value`.
        let bind = TypedFunc::<Int1, (Int2, i64)>::new(
            |f: Int2, value: i64| {
                Int1::new(move |x: i64| {
                    f.call((value, x)).expect("bound call succeeds")
                })
            },
        );

        let add = Int2::new(|x: i64, y: i64| x + y);
        let plus_one = bind.call((add.clone(), 1)).expect("bind succeeds");
        assert_eq!(plus_one.call((2,)), Ok(3));

        // The erased form of the bound result behaves identically.
        let erased = bind
            .packed()
            .call((add, 1i64))
            .expect("packed bind succeeds");
        let f1 = erased.convert::<Int1>().expect("func result");
        assert_eq!(f1.call((3,)), Ok(4));
    }

    #[test]
    fn typed_wrapper_adopts_a_packed_function() {
        let raw = PackedFunc::new(|args, ret| {
            ret.set(args.get::<i64>(0)? * 10)
        });
        let typed = TypedFunc::<i64, (i64,)>::from_packed(raw.clone());
        assert!(typed.packed().same_as(&raw));
        assert_eq!(typed.call((4,)), Ok(40));
    }
}
