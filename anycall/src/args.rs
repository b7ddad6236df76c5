//! Call-scoped argument view and the return cell.

use std::any;

use crate::buffer::Buffer;
use crate::error::{CallError, Site};
use crate::registry::{ExtTypeRegistry, Extension};
use crate::value::{FromTagged, IntoTagged, TaggedValue, TypeCode};

/// Read-only, indexed view over the staged arguments of one call.
///
/// The view never owns the storage; the borrow ties it to the staging
/// buffer of the enclosing call, so it cannot outlive the call that
/// created it. Indices are dense and zero-based.
#[derive(Clone, Copy)]
pub struct Args<'a> {
    values: &'a [TaggedValue],
}

impl<'a> Args<'a> {
    pub fn new(values: &'a [TaggedValue]) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Type code of argument `index`, if present.
    pub fn code(&self, index: usize) -> Option<TypeCode> {
        self.values.get(index).map(TaggedValue::code)
    }

    /// Bounds-checked raw access to the stored value.
    pub fn value(&self, index: usize) -> Result<&'a TaggedValue, CallError> {
        self.values.get(index).ok_or(CallError::OutOfBounds {
            index,
            len: self.values.len(),
        })
    }

    /// The controlled access point: bounds check, then reverse conversion
    /// at the type requested by the call site. Errors carry the argument
    /// position.
    pub fn get<T: FromTagged>(&self, index: usize) -> Result<T, CallError> {
        T::from_tagged(self.value(index)?, Site::Arg(index))
    }

    /// Borrowed view of a string argument. No copy.
    pub fn str_ref(&self, index: usize) -> Result<&'a str, CallError> {
        match self.value(index)? {
            TaggedValue::Str(s) => Ok(s.as_str()),
            other => Err(CallError::TypeMismatch {
                site: Site::Arg(index),
                expected: TypeCode::STR,
                found: other.code(),
            }),
        }
    }

    /// Raw structural view of an array-buffer argument. Pointer only, no
    /// copy: the reference is pointer-equal to the handle's allocation.
    pub fn buffer(&self, index: usize) -> Result<&'a Buffer, CallError> {
        match self.value(index)? {
            TaggedValue::Buffer(handle) => Ok(&**handle),
            other => Err(CallError::TypeMismatch {
                site: Site::Arg(index),
                expected: TypeCode::BUFFER,
                found: other.code(),
            }),
        }
    }

    /// By-reference view of an extension argument: the clone staged at
    /// conversion time, returned directly. Repeated reads of the same slot
    /// are pointer-equal.
    pub fn ext_ref<T: Extension>(&self, index: usize) -> Result<&'a T, CallError> {
        let site = Site::Arg(index);
        let expected = ExtTypeRegistry::global()
            .code_of::<T>()
            .ok_or(CallError::UnregisteredExtension {
                type_name: any::type_name::<T>(),
            })?;
        match self.value(index)? {
            TaggedValue::Ext(ext) => {
                ext.downcast_ref::<T>().ok_or(CallError::TypeMismatch {
                    site,
                    expected,
                    found: ext.code(),
                })
            }
            other => Err(CallError::TypeMismatch {
                site,
                expected,
                found: other.code(),
            }),
        }
    }
}

/// Output cell of one call.
///
/// Starts empty (`Unit`). [`set`](RetSlot::set) performs the forward
/// conversion and stores the result; a second `set` overwrites, so the
/// last write wins. Exactly one meaningful write per call is the expected
/// discipline; the convention does not hard-enforce it.
#[derive(Debug)]
pub struct RetSlot {
    value: TaggedValue,
}

impl RetSlot {
    pub fn new() -> Self {
        Self {
            value: TaggedValue::Unit,
        }
    }

    /// Forward-convert `value` into the slot.
    pub fn set<T: IntoTagged>(&mut self, value: T) -> Result<(), CallError> {
        self.value = value.into_tagged()?;
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_unit()
    }

    pub fn into_value(self) -> TaggedValue {
        self.value
    }
}

impl Default for RetSlot {
    fn default() -> Self {
        Self::new()
    }
}
