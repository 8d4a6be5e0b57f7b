/*!
Pointer types understood by the archive and the type-erased handle used to move
objects between their concrete type and trait-object views.
*/

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use crate::{ArchiveError, Result};

/// Shared-ownership pointer, archived with the shared-pointer protocol
pub type Shared<T> = Rc<RefCell<T>>;

/// Identity of the allocation behind a pointer, the same for every view of it
pub(crate) fn identity<T: ?Sized>(ptr: &Shared<T>) -> usize {
    Rc::as_ptr(ptr) as *const () as usize
}

/// Plain object pointer, archived with the plain-pointer protocol
///
/// A `Ptr` aliases an object that is conceptually owned elsewhere in the graph.
/// It is reference counted so that objects created while reading stay alive
/// once the archive session ends. `Option<Ptr<T>>` is the nullable form that
/// the archive reads and writes.
pub struct Ptr<T: ?Sized>(Shared<T>);

impl<T> Ptr<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(RefCell::new(value)))
    }
}

impl<T: ?Sized> Ptr<T> {
    /// Wrap an existing cell, typically after coercing it to a trait-object view
    pub fn from_rc(rc: Shared<T>) -> Self {
        Self(rc)
    }

    pub fn as_rc(&self) -> &Shared<T> {
        &self.0
    }

    pub fn into_rc(self) -> Shared<T> {
        self.0
    }

    /// True when both pointers reference the same object, whatever their view
    pub fn same_object<U: ?Sized>(&self, other: &Ptr<U>) -> bool {
        identity(&self.0) == identity(&other.0)
    }
}

impl<T: ?Sized> Clone for Ptr<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: ?Sized> Deref for Ptr<T> {
    type Target = RefCell<T>;

    fn deref(&self) -> &RefCell<T> {
        &self.0
    }
}

impl<T: ?Sized> From<Shared<T>> for Ptr<T> {
    fn from(rc: Shared<T>) -> Self {
        Self(rc)
    }
}

impl<T: ?Sized> fmt::Debug for Ptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ptr({:#x})", identity(&self.0))
    }
}

/// A Rust type identified at runtime, with its name kept for error messages
#[derive(Debug, Clone, Copy)]
pub struct TypeTag {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeTag {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

impl PartialEq for TypeTag {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeTag {}

/// One object seen through one of its types
///
/// A handle keeps the object itself (as its concrete type) next to a view of
/// it as some type `V`, which is either the concrete type or a trait object
/// the concrete type was registered under. All views of a handle share the
/// object's reference count.
#[derive(Clone)]
pub struct Handle {
    object: Rc<dyn Any>,
    concrete: TypeTag,
    view: Rc<dyn Any>,
    view_type: TypeTag,
}

impl Handle {
    /// Handle to a concrete object, viewed as itself
    pub fn new<C: Any>(ptr: Shared<C>) -> Self {
        let object: Rc<dyn Any> = ptr.clone();
        Self {
            object,
            concrete: TypeTag::of::<C>(),
            view: Rc::new(ptr),
            view_type: TypeTag::of::<C>(),
        }
    }

    /// The same object seen through another view
    pub fn with_view<V: ?Sized + 'static>(&self, ptr: Shared<V>) -> Self {
        debug_assert_eq!(identity(&ptr), self.identity());
        Self {
            object: Rc::clone(&self.object),
            concrete: self.concrete,
            view: Rc::new(ptr),
            view_type: TypeTag::of::<V>(),
        }
    }

    /// The current view, if it is a view as `V`
    pub fn get<V: ?Sized + 'static>(&self) -> Option<Shared<V>> {
        self.view.downcast_ref::<Shared<V>>().cloned()
    }

    /// The current view as `V`, or a cast error naming both types
    pub fn cast<V: ?Sized + 'static>(&self) -> Result<Shared<V>> {
        self.get::<V>().ok_or_else(|| {
            ArchiveError::cast_failed(self.view_type.name, std::any::type_name::<V>())
        })
    }

    /// The object as its concrete type `C`
    pub fn concrete<C: Any>(&self) -> Option<Shared<C>> {
        Rc::clone(&self.object).downcast::<RefCell<C>>().ok()
    }

    pub fn concrete_type(&self) -> TypeTag {
        self.concrete
    }

    pub fn view_type(&self) -> TypeTag {
        self.view_type
    }

    /// Allocation identity of the object
    pub fn identity(&self) -> usize {
        Rc::as_ptr(&self.object) as *const () as usize
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("object", &format_args!("{:#x}", self.identity()))
            .field("concrete", &self.concrete.name)
            .field("view", &self.view_type.name)
            .finish()
    }
}
