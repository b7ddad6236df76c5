//! Process-wide extension-type registry.
//!
//! User types outside the closed base set travel under codes assigned
//! here. Registration is explicit and must happen before a type's first
//! use in a call; there is no load-time magic, no unregistration, and
//! entries live for the whole process.

use std::any::{self, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use log::trace;
use parking_lot::RwLock;

use crate::error::{CallError, Site};
use crate::value::{FromTagged, IntoTagged, TaggedValue, TypeCode};

/// Contract for user types travelling through the extension range.
///
/// `Clone` is the registered clone operation; whether it is deep or
/// shallow is the type's own business. The convention promises only
/// content-equal, independent storage after a by-value conversion.
/// Destruction is the type's `Drop`, run when the staged clone is
/// discarded.
pub trait Extension: Any + Clone + Send + Sync {}

type BoxedExt = Box<dyn Any + Send + Sync>;
type CloneFn = fn(&(dyn Any + Send + Sync)) -> BoxedExt;

#[derive(Clone, Copy)]
struct ExtEntry {
    code: TypeCode,
    type_name: &'static str,
    clone_fn: CloneFn,
}

struct RegistryImpl {
    by_type: HashMap<TypeId, ExtEntry>,
    next_code: u32,
}

/// The table mapping compile-time types to runtime extension codes.
pub struct ExtTypeRegistry(RwLock<RegistryImpl>);

static REGISTRY: OnceLock<ExtTypeRegistry> = OnceLock::new();

impl ExtTypeRegistry {
    /// The single process-wide table. The first call initializes it;
    /// nothing is ever registered implicitly.
    pub fn global() -> &'static ExtTypeRegistry {
        REGISTRY.get_or_init(|| {
            ExtTypeRegistry(RwLock::new(RegistryImpl {
                by_type: HashMap::new(),
                next_code: TypeCode::EXT_BEGIN.0,
            }))
        })
    }

    /// Assign the next unused extension code to `T`, storing its clone
    /// operation and printable name.
    ///
    /// Idempotent: registering the same type again returns the same code.
    pub fn register<T: Extension>(&self) -> TypeCode {
        let key = TypeId::of::<T>();
        if let Some(entry) = self.0.read().by_type.get(&key) {
            return entry.code;
        }
        let mut table = self.0.write();
        // Re-check under the write lock; another thread may have won.
        if let Some(entry) = table.by_type.get(&key) {
            return entry.code;
        }
        let code = TypeCode(table.next_code);
        table.next_code += 1;
        table.by_type.insert(
            key,
            ExtEntry {
                code,
                type_name: any::type_name::<T>(),
                clone_fn: clone_boxed::<T>,
            },
        );
        trace!(
            "registered extension type {} as code {}",
            any::type_name::<T>(),
            code.0
        );
        code
    }

    /// The code assigned to `T`, if it has been registered.
    pub fn code_of<T: Extension>(&self) -> Option<TypeCode> {
        self.0
            .read()
            .by_type
            .get(&TypeId::of::<T>())
            .map(|entry| entry.code)
    }

    fn entry_of<T: Extension>(&self) -> Option<ExtEntry> {
        self.0.read().by_type.get(&TypeId::of::<T>()).copied()
    }
}

/// Convenience over [`ExtTypeRegistry::global`].
pub fn register<T: Extension>() -> TypeCode {
    ExtTypeRegistry::global().register::<T>()
}

fn clone_boxed<T: Extension>(value: &(dyn Any + Send + Sync)) -> BoxedExt {
    match value.downcast_ref::<T>() {
        Some(concrete) => Box::new(concrete.clone()),
        None => unreachable!("registered clone invoked on a foreign value"),
    }
}

/// An extension payload inside a tagged value: the registry-assigned code
/// plus the clone staged at conversion time.
pub struct ExtValue {
    code: TypeCode,
    type_name: &'static str,
    clone_fn: CloneFn,
    value: BoxedExt,
}

impl ExtValue {
    pub fn code(&self) -> TypeCode {
        self.code
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }
}

// Cloning a tagged extension value runs the registered clone operation.
impl Clone for ExtValue {
    fn clone(&self) -> Self {
        Self {
            code: self.code,
            type_name: self.type_name,
            clone_fn: self.clone_fn,
            value: (self.clone_fn)(self.value.as_ref()),
        }
    }
}

impl fmt::Debug for ExtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExtValue({}, code {})", self.type_name, self.code.0)
    }
}

/// Marks a native value as travelling by extension code.
///
/// Staging moves the inner value into call-owned storage; reading back by
/// value clones via the registered operation, so the two sides never share
/// storage. The by-reference view ([`Args::ext_ref`]) exposes the staged
/// storage itself.
///
/// [`Args::ext_ref`]: crate::args::Args::ext_ref
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ext<T>(pub T);

impl<T: Extension> IntoTagged for Ext<T> {
    /// Fails with [`CallError::UnregisteredExtension`] before any call
    /// runs when `T` has no registry entry.
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        let entry = ExtTypeRegistry::global().entry_of::<T>().ok_or(
            CallError::UnregisteredExtension {
                type_name: any::type_name::<T>(),
            },
        )?;
        Ok(TaggedValue::Ext(ExtValue {
            code: entry.code,
            type_name: entry.type_name,
            clone_fn: entry.clone_fn,
            value: Box::new(self.0),
        }))
    }
}

impl<T: Extension> IntoTagged for &Ext<T> {
    fn into_tagged(self) -> Result<TaggedValue, CallError> {
        Ext(self.0.clone()).into_tagged()
    }
}

impl<T: Extension> FromTagged for Ext<T> {
    /// By-value read: a fresh copy constructed from the stored clone.
    fn from_tagged(value: &TaggedValue, site: Site) -> Result<Self, CallError> {
        let expected = ExtTypeRegistry::global().code_of::<T>().ok_or(
            CallError::UnregisteredExtension {
                type_name: any::type_name::<T>(),
            },
        )?;
        match value {
            TaggedValue::Ext(ext) => match ext.downcast_ref::<T>() {
                Some(concrete) => Ok(Ext(concrete.clone())),
                None => Err(CallError::TypeMismatch {
                    site,
                    expected,
                    found: ext.code(),
                }),
            },
            other => Err(CallError::TypeMismatch {
                site,
                expected,
                found: other.code(),
            }),
        }
    }
}
