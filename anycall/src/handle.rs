//! Shared-ownership handles for managed objects.
//!
//! Copying a handle increments the shared count, dropping decrements it,
//! and the object is destroyed when the count reaches zero. Counts are
//! atomic, so handles may cross threads. Two handles denote the same
//! object iff they share the allocation, independent of the count.

use std::any::{self, Any};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::error::{CallError, Site};
use crate::value::{FromTagged, IntoTagged, TaggedValue, TypeCode};

/// Contract for objects shared across calls by reference-counted handle.
///
/// The convention needs nothing from a managed object beyond a stable
/// allocation and a dynamic type; collaborators opt in by implementing
/// this marker.
pub trait ManagedObject: Any + Send + Sync {}

/// Type-erased handle over a managed object.
#[derive(Clone)]
pub struct ObjectHandle {
    object: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ObjectHandle {
    pub fn new<T: ManagedObject>(object: T) -> Self {
        Self {
            object: Arc::new(object),
            type_name: any::type_name::<T>(),
        }
    }

    /// Dynamic type name, as reported in narrowing errors.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Identity: true iff both handles share the allocation.
    pub fn same_as(&self, other: &ObjectHandle) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }

    /// Number of live handles sharing this object.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.object)
    }

    /// Stable identity pointer of the allocation.
    pub fn as_ptr(&self) -> *const () {
        Arc::as_ptr(&self.object) as *const ()
    }

    pub fn is<T: ManagedObject>(&self) -> bool {
        self.object.as_ref().is::<T>()
    }

    pub fn downcast_ref<T: ManagedObject>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// Narrow to the typed view of the same allocation. `None` when the
    /// dynamic type is not `T`; the conversion layer reports that as
    /// [`CallError::IdentityNarrowing`].
    pub fn downcast<T: ManagedObject>(&self) -> Option<TypedHandle<T>> {
        Arc::clone(&self.object)
            .downcast::<T>()
            .ok()
            .map(|object| TypedHandle { object })
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ObjectHandle({}, {:p})",
            self.type_name,
            self.as_ptr()
        )
    }
}

/// Typed view over the same allocation as an [`ObjectHandle`].
pub struct TypedHandle<T: ManagedObject> {
    object: Arc<T>,
}

// Custom clone: the default derive would demand T: Clone, but this shares
// the allocation rather than copying the object.
impl<T: ManagedObject> Clone for TypedHandle<T> {
    fn clone(&self) -> Self {
        Self {
            object: Arc::clone(&self.object),
        }
    }
}

impl<T: ManagedObject> TypedHandle<T> {
    pub fn new(object: T) -> Self {
        Self {
            object: Arc::new(object),
        }
    }

    pub fn same_as(&self, other: &TypedHandle<T>) -> bool {
        Arc::ptr_eq(&self.object, &other.object)
    }

    /// Identity test against an erased handle.
    pub fn same_object(&self, other: &ObjectHandle) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.object) as *const (), other.as_ptr())
    }

    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.object)
    }

    pub fn as_ptr(&self) -> *const T {
        Arc::as_ptr(&self.object)
    }

    /// Erase the static type. Same allocation, count unchanged by the
    /// conversion itself.
    pub fn erase(&self) -> ObjectHandle {
        let object: Arc<dyn Any + Send + Sync> = self.object.clone();
        ObjectHandle {
            object,
            type_name: any::type_name::<T>(),
        }
    }
}

impl<T: ManagedObject> Deref for TypedHandle<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.object
    }
}

impl<T: ManagedObject> fmt::Debug for TypedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TypedHandle({}, {:p})",
            any::type_name::<T>(),
            self.as_ptr()
        )
    }
}

impl<T: ManagedObject> From<TypedHandle<T>> for ObjectHandle {
    fn from(handle: TypedHandle<T>) -> Self {
        handle.erase()
    }
}

// ── Boundary conversions ─────────────────────────────────────────────

impl IntoTagged for ObjectHandle {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Object(self))
    }
}

impl IntoTagged for &ObjectHandle {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Object(self.clone()))
    }
}

impl<T: ManagedObject> IntoTagged for TypedHandle<T> {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Object(self.erase()))
    }
}

impl<T: ManagedObject> IntoTagged for &TypedHandle<T> {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ok(TaggedValue::Object(self.erase()))
    }
}

impl FromTagged for ObjectHandle {
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Object(handle) => Ok(handle.clone()),
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::OBJECT,
                found: other.code(),
            }),
        }
    }
}

impl<T: ManagedObject> FromTagged for TypedHandle<T> {
    /// Narrowing read: succeeds iff the underlying dynamic type is `T`.
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        match value {
            TaggedValue::Object(handle) => {
                handle.downcast::<T>().ok_or(CallError::IdentityNarrowing {
                    site,
                    expected: any::type_name::<T>(),
                    found: handle.type_name(),
                })
            }
            other => Err(CallError::TypeMismatch {
                site,
                expected: TypeCode::OBJECT,
                found: other.code(),
            }),
        }
    }
}
