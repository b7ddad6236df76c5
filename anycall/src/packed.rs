//! The type-erased callable and its call protocol.

use std::fmt;
use std::sync::Arc;

use log::trace;

use crate::args::{Args, RetSlot};
use crate::error::{CallError, Site};
use crate::value::{FromTagged, IntoTagged, TaggedValue, TypeCode};

/// Shape of the native callable behind every [`PackedFunc`]: read typed
/// values out of the pack, write one result into the slot.
pub type NativeFn =
    dyn Fn(Args<'_>, &mut RetSlot) -> Result<(), CallError> + Send + Sync;

/// A type-erased callable.
///
/// Immutable once constructed; clones share the wrapped callable, so a
/// packed function is itself a first-class value (`func` code) that can be
/// passed as an argument, returned as a result, and invoked zero or more
/// times by whoever receives it.
///
/// Invoking from multiple threads is safe exactly when the state captured
/// by the wrapped callable is; this layer adds no locking of its own.
#[derive(Clone)]
pub struct PackedFunc {
    body: Arc<NativeFn>,
}

impl PackedFunc {
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(Args<'_>, &mut RetSlot) -> Result<(), CallError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            body: Arc::new(body),
        }
    }

    /// Call with native arguments: forward-convert each into call-local
    /// storage, then run the erased protocol.
    ///
    /// A staging failure aborts before the callable runs.
    pub fn call<A: StageArgs>(&self, args: A) -> Result<TaggedValue, CallError> {
        let mut staged = Vec::with_capacity(A::LEN);
        args.stage(&mut staged).inspect_err(|err| {
            trace!("argument staging failed: {err}");
        })?;
        self.call_packed(&staged)
    }

    /// The erased protocol: an [`Args`] view over caller-staged values
    /// plus a fresh slot. The slot's final content is the generic return
    /// value.
    pub fn call_packed(
        &self,
        args: &[TaggedValue],
    ) -> Result<TaggedValue, CallError> {
        let mut ret = RetSlot::new();
        (self.body)(Args::new(args), &mut ret)?;
        Ok(ret.into_value())
    }

    /// Identity: true iff both values share the wrapped callable.
    pub fn same_as(&self, other: &PackedFunc) -> bool {
        Arc::ptr_eq(&self.body, &other.body)
    }
}

impl fmt::Debug for PackedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PackedFunc({:p})", Arc::as_ptr(&self.body))
    }
}

impl IntoTagged for PackedFunc {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Func(self))
    }
}

impl IntoTagged for &PackedFunc {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Func(self.clone()))
    }
}

impl FromTagged for PackedFunc {
    /// A function-handle argument reads back as an invocable wrapper.
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Func(func) => Ok(func.clone()),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::FUNC,
                found: other.code(),
            }),
        }
    }
}

/// Forward-converts a native argument list into call-local tagged storage.
///
/// Implemented for tuples of arity 0 through 8.
pub trait StageArgs {
    const LEN: usize;
    fn stage(self, out: &mut Vec<TaggedValue>) -> Result<(), CallError>;
}

macro_rules! impl_stage_args {
    ($len:expr $(, $ty:ident : $idx:tt)*) => {
        impl<$($ty: IntoTagged),*> StageArgs for ($($ty,)*) {
            const LEN: usize = $len;

            #[allow(unused_variables)]
            fn stage(self, out: &mut Vec<TaggedValue>) -> Result<(), CallError> {
                $(out.push(self.$idx.into_tagged()?);)*
                Ok(())
            }
        }
    };
}

impl_stage_args!(0);
impl_stage_args!(1, A0: 0);
impl_stage_args!(2, A0: 0, A1: 1);
impl_stage_args!(3, A0: 0, A1: 1, A2: 2);
impl_stage_args!(4, A0: 0, A1: 1, A2: 2, A3: 3);
impl_stage_args!(5, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4);
impl_stage_args!(6, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5);
impl_stage_args!(7, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6);
impl_stage_args!(8, A0: 0, A1: 1, A2: 2, A3: 3, A4: 4, A5: 5, A6: 6, A7: 7);
