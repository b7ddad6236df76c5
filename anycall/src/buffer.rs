//! Array-buffer leaf: a stable address plus shared destruction.
//!
//! Allocation strategy is the collaborator's business. `alloc` gives the
//! buffer its own zeroed storage; `from_raw` wraps foreign memory. Either
//! way the convention sees a stable data pointer and a length.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{CallError, Site};
use crate::value::{FromTagged, IntoTagged, TaggedValue, TypeCode};

/// A contiguous region of bytes shared across calls.
pub struct Buffer {
    data: *mut u8,
    len: usize,
    // Keeps owned storage alive. The heap block never moves, so `data`
    // stays valid while this field does.
    _storage: Option<Box<[u8]>>,
}

// Concurrent readers are fine; concurrent writers must synchronize at a
// higher layer, same as any shared memory.
unsafe impl Send for Buffer {}
unsafe impl Sync for Buffer {}

macro_rules! buffer_read {
    ($name:ident, $ty:ty) => {
        pub fn $name(&self, offset: usize) -> Result<$ty, CallError> {
            let p = self.checked(offset, size_of::<$ty>())?;
            Ok(unsafe { (p as *const $ty).read_unaligned() })
        }
    };
}

macro_rules! buffer_write {
    ($name:ident, $ty:ty) => {
        pub fn $name(&self, offset: usize, value: $ty) -> Result<(), CallError> {
            let p = self.checked(offset, size_of::<$ty>())?;
            unsafe { (p as *mut $ty).write_unaligned(value) };
            Ok(())
        }
    };
}

impl Buffer {
    /// Allocate a buffer with its own zeroed storage.
    pub fn alloc(len: usize) -> BufferHandle {
        let mut storage = vec![0u8; len].into_boxed_slice();
        let data = storage.as_mut_ptr();
        BufferHandle(Arc::new(Buffer {
            data,
            len,
            _storage: Some(storage),
        }))
    }

    /// Wrap foreign memory.
    ///
    /// # Safety
    ///
    /// `data` must stay valid for reads and writes of `len` bytes for the
    /// lifetime of the returned handle and every clone of it.
    pub unsafe fn from_raw(data: *mut u8, len: usize) -> BufferHandle {
        BufferHandle(Arc::new(Buffer {
            data,
            len,
            _storage: None,
        }))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: `data` is valid for `len` bytes by construction contract.
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }

    fn checked(&self, offset: usize, size: usize) -> Result<*mut u8, CallError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.len => {
                Ok(unsafe { self.data.add(offset) })
            }
            _ => Err(CallError::OutOfBounds {
                index: offset,
                len: self.len,
            }),
        }
    }

    buffer_read!(read_u8, u8);
    buffer_read!(read_i32, i32);
    buffer_read!(read_i64, i64);
    buffer_read!(read_f32, f32);
    buffer_read!(read_f64, f64);

    buffer_write!(write_u8, u8);
    buffer_write!(write_i32, i32);
    buffer_write!(write_i64, i64);
    buffer_write!(write_f32, f32);
    buffer_write!(write_f64, f64);
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Buffer({:p}, {} bytes)", self.data, self.len)
    }
}

/// Shared-ownership handle over a [`Buffer`].
///
/// Same count and identity semantics as [`ObjectHandle`]: copying
/// increments, dropping decrements, zero destroys.
///
/// [`ObjectHandle`]: crate::handle::ObjectHandle
#[derive(Clone)]
pub struct BufferHandle(Arc<Buffer>);

impl BufferHandle {
    pub fn same_as(&self, other: &BufferHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// The raw structural view callers compare against: pointer only, no
    /// copy.
    pub fn as_raw(&self) -> *const Buffer {
        Arc::as_ptr(&self.0)
    }
}

impl Deref for BufferHandle {
    type Target = Buffer;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BufferHandle({:?})", *self.0)
    }
}

impl IntoTagged for BufferHandle {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Buffer(self))
    }
}

impl IntoTagged for &BufferHandle {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Buffer(self.clone()))
    }
}

impl FromTagged for BufferHandle {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Buffer(handle) => Ok(handle.clone()),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::BUFFER,
                found: other.code(),
            }),
        }
    }
}
