//! TaggedValue: the uniform interchange unit of the convention.
//!
//! Every value crossing the call boundary travels as one discriminated
//! value. The discriminant is the type code; the payload is the active
//! member. The closed base set lives below [`TypeCode::EXT_BEGIN`];
//! registry-assigned extension codes live at and above it.

use std::ffi::c_void;
use std::fmt;

use crate::buffer::BufferHandle;
use crate::error::{CallError, Site};
use crate::handle::ObjectHandle;
use crate::packed::PackedFunc;
use crate::registry::ExtValue;

/// Small integer discriminator identifying which native kind a
/// [`TaggedValue`] currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCode(pub u32);

impl TypeCode {
    pub const UNIT: TypeCode = TypeCode(0);
    pub const INT: TypeCode = TypeCode(1);
    pub const FLOAT: TypeCode = TypeCode(2);
    pub const PTR: TypeCode = TypeCode(3);
    pub const BUFFER: TypeCode = TypeCode(4);
    pub const OBJECT: TypeCode = TypeCode(5);
    pub const STR: TypeCode = TypeCode(6);
    pub const FUNC: TypeCode = TypeCode(7);

    /// First code available to extension types. Codes below this are
    /// reserved for the closed base set.
    pub const EXT_BEGIN: TypeCode = TypeCode(64);

    #[inline]
    pub const fn is_ext(self) -> bool {
        self.0 >= Self::EXT_BEGIN.0
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            0 => write!(f, "unit"),
            1 => write!(f, "int"),
            2 => write!(f, "float"),
            3 => write!(f, "ptr"),
            4 => write!(f, "buffer"),
            5 => write!(f, "object"),
            6 => write!(f, "str"),
            7 => write!(f, "func"),
            n if self.is_ext() => write!(f, "ext({n})"),
            n => write!(f, "reserved({n})"),
        }
    }
}

/// A single value crossing the call boundary.
///
/// The active payload is fully determined by the discriminant, so reading
/// through the wrong accessor is a [`CallError::TypeMismatch`], never
/// undefined behaviour. Cloning an extension payload runs its registered
/// clone operation; cloning a handle increments the shared count.
#[derive(Debug, Clone)]
pub enum TaggedValue {
    /// Empty/void. Also the initial state of every return slot.
    Unit,
    Int(i64),
    Float(f64),
    /// Opaque raw handle. Never dereferenced by this layer.
    Ptr(*mut c_void),
    Buffer(BufferHandle),
    Object(ObjectHandle),
    /// Always copied into call-owned storage on forward conversion; a
    /// borrowed pointer would dangle across the boundary.
    Str(String),
    Func(PackedFunc),
    Ext(ExtValue),
}

// The raw pointer variant defeats the auto traits. It is an opaque token
// at this layer; every other payload is Send + Sync on its own.
unsafe impl Send for TaggedValue {}
unsafe impl Sync for TaggedValue {}

impl TaggedValue {
    pub fn code(&self) -> TypeCode {
        match self {
            TaggedValue::Unit => TypeCode::UNIT,
            TaggedValue::Int(_) => TypeCode::INT,
            TaggedValue::Float(_) => TypeCode::FLOAT,
            TaggedValue::Ptr(_) => TypeCode::PTR,
            TaggedValue::Buffer(_) => TypeCode::BUFFER,
            TaggedValue::Object(_) => TypeCode::OBJECT,
            TaggedValue::Str(_) => TypeCode::STR,
            TaggedValue::Func(_) => TypeCode::FUNC,
            TaggedValue::Ext(ext) => ext.code(),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, TaggedValue::Unit)
    }

    /// Reverse-convert a returned value into a native type.
    pub fn convert<T: FromTagged>(&self) -> Result<T, CallError> {
        T::from_tagged(self, Site::Ret)
    }
}

/// Forward conversion: native value → tagged value.
///
/// Fallible because staging an extension value requires its registry
/// entry; the primitive conversions never fail.
pub trait IntoTagged {
    fn into_tagged(self) -> Result<TaggedValue, CallError>;
}

/// Reverse conversion: tagged value → native value, on read.
///
/// An exact-code match always succeeds. The permitted cross-code
/// conversions are documented on each implementation; anything else is a
/// [`CallError::TypeMismatch`] carrying the site of the access.
pub trait FromTagged: Sized {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError>;
}

// ── Forward conversions ──────────────────────────────────────────────

macro_rules! int_into_tagged {
    ($($ty:ty),*) => {$(
        impl IntoTagged for $ty {
            #[inline]
            fn into_tagged(self) -> Result<TaggedValue, CallError> {
                Ok(TaggedValue::Int(self as i64))
            }
        }
    )*};
}

int_into_tagged!(i8, i16, i32, i64, u8, u16, u32);

impl IntoTagged for bool {
    #[inline]
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Int(self as i64))
    }
}

impl IntoTagged for f64 {
    #[inline]
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Float(self))
    }
}

impl IntoTagged for f32 {
    #[inline]
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Float(self as f64))
    }
}

impl IntoTagged for &str {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Str(self.to_owned()))
    }
}

impl IntoTagged for String {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Str(self))
    }
}

impl IntoTagged for *mut c_void {
    #[inline]
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Ptr(self))
    }
}

impl IntoTagged for () {
    #[inline]
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Unit)
    }
}

// Identity conversions let a generic return value feed the next call
// without a native round-trip.
impl IntoTagged for TaggedValue {
    #[inline]
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(self)
    }
}

impl IntoTagged for &TaggedValue {
    #[inline]
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(self.clone())
    }
}

// ── Reverse conversions ──────────────────────────────────────────────

impl FromTagged for i64 {
    /// Exact match, plus floats that hold an integral value in range
    /// (the exactness rule of the numeric bridge).
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Int(n) => Ok(*n),
            TaggedValue::Float(x) if x.fract() == 0.0 && x.is_finite() => {
                let n = *x as i64;
                if n as f64 == *x {
                    Ok(n)
                } else {
                    Err(CallError::ValueOutOfRange { site, target: "i64" })
                }
            }
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::INT,
                found: other.code(),
            }),
        }
    }
}

macro_rules! narrow_from_tagged {
    ($($ty:ty),*) => {$(
        impl FromTagged for $ty {
            /// Widens through `i64`, then range-checks instead of
            /// truncating.
            fn from_tagged(
                value: &TaggedValue,
                site: Site,
            ) -> Result<Self, CallError> {
                let wide = i64::from_tagged(value, site)?;
                <$ty>::try_from(wide).map_err(|_| {
                    CallError::ValueOutOfRange {
                        site,
                        target: stringify!($ty),
                    }
                })
            }
        }
    )*};
}

narrow_from_tagged!(i8, i16, i32, u8, u16, u32);

impl FromTagged for bool {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Int(n) => Ok(*n != 0),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::INT,
                found: other.code(),
            }),
        }
    }
}

impl FromTagged for f64 {
    /// Exact match, plus the integer widening: every `i64` magnitude
    /// representable in both reads back as the mathematically equal float.
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Float(x) => Ok(*x),
            TaggedValue::Int(n) => Ok(*n as f64),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::FLOAT,
                found: other.code(),
            }),
        }
    }
}

impl FromTagged for f32 {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        Ok(f64::from_tagged(value, site)? as f32)
    }
}

impl FromTagged for String {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Str(s) => Ok(s.clone()),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::STR,
                found: other.code(),
            }),
        }
    }
}

impl FromTagged for *mut c_void {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Ptr(p) => Ok(*p),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::PTR,
                found: other.code(),
            }),
        }
    }
}

impl FromTagged for () {
    /// A void read ignores whatever the slot holds.
    fn from_tagged(_value: &TaggedValue, _site: Site) -> Result<Self, CallError> {
        Ok(())
    }
}

impl FromTagged for TaggedValue {
    fn from_tagged(value: &TaggedValue, _site: Site) -> Result<Self, CallError> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip<T>(value: T) -> TaggedValue
    where
        T: IntoTagged,
    {
        value.into_tagged().expect("primitive staging cannot fail")
    }

    #[test]
    fn int_roundtrip_including_boundaries() {
        for n in [0i64, -1, 42, i64::MIN, i64::MAX] {
            let tagged = roundtrip(n);
            assert_eq!(tagged.code(), TypeCode::INT);
            assert_eq!(tagged.convert::<i64>(), Ok(n));
        }
    }

    #[test]
    fn float_roundtrip_including_boundaries() {
        for x in [0.0f64, -1.5, 1e300, f64::MIN_POSITIVE] {
            let tagged = roundtrip(x);
            assert_eq!(tagged.code(), TypeCode::FLOAT);
            assert_eq!(tagged.convert::<f64>(), Ok(x));
        }
    }

    #[test]
    fn string_roundtrip_including_empty() {
        for s in ["", "hello", "\u{1F980} crab"] {
            let tagged = roundtrip(s);
            assert_eq!(tagged.code(), TypeCode::STR);
            assert_eq!(tagged.convert::<String>(), Ok(s.to_owned()));
        }
    }

    #[test]
    fn raw_pointer_roundtrip() {
        let mut x = 0i32;
        let p = &mut x as *mut i32 as *mut std::ffi::c_void;
        let tagged = roundtrip(p);
        assert_eq!(tagged.code(), TypeCode::PTR);
        assert_eq!(tagged.convert::<*mut std::ffi::c_void>(), Ok(p));
    }

    #[test]
    fn int_widens_to_float_exactly() {
        for n in [0i64, -7, 1 << 52, -(1 << 52)] {
            let tagged = roundtrip(n);
            assert_eq!(tagged.convert::<f64>(), Ok(n as f64));
        }
    }

    #[test]
    fn integral_float_reads_back_as_int() {
        assert_eq!(roundtrip(3.0f64).convert::<i64>(), Ok(3));
        assert_eq!(roundtrip(-2.0f64).convert::<i64>(), Ok(-2));
    }

    #[test]
    fn fractional_float_does_not_read_as_int() {
        let err = roundtrip(2.5f64).convert::<i64>().unwrap_err();
        assert_eq!(
            err,
            CallError::TypeMismatch {
                site: Site::Ret,
                expected: TypeCode::INT,
                found: TypeCode::FLOAT,
            }
        );
    }

    #[test]
    fn narrow_reads_range_check_instead_of_truncating() {
        let tagged = roundtrip(i64::from(i32::MAX) + 1);
        assert_eq!(
            tagged.convert::<i32>(),
            Err(CallError::ValueOutOfRange {
                site: Site::Ret,
                target: "i32",
            })
        );
        assert_eq!(
            roundtrip(-1i64).convert::<u32>(),
            Err(CallError::ValueOutOfRange {
                site: Site::Ret,
                target: "u32",
            })
        );
        assert_eq!(roundtrip(300i64).convert::<i32>(), Ok(300));
    }

    #[test]
    fn string_read_as_numeric_is_a_mismatch() {
        let err = roundtrip("ten").convert::<i64>().unwrap_err();
        assert_eq!(
            err,
            CallError::TypeMismatch {
                site: Site::Ret,
                expected: TypeCode::INT,
                found: TypeCode::STR,
            }
        );
    }

    #[test]
    fn void_read_accepts_anything() {
        assert_eq!(roundtrip(5i64).convert::<()>(), Ok(()));
        assert_eq!(TaggedValue::Unit.convert::<()>(), Ok(()));
    }

    #[test]
    fn ext_range_starts_at_the_reserved_offset() {
        assert!(!TypeCode::FUNC.is_ext());
        assert!(TypeCode::EXT_BEGIN.is_ext());
        assert!(TypeCode(200).is_ext());
    }
}
