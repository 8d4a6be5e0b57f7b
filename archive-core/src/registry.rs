/*!
Registry of polymorphic classes.

Every class that can appear behind a pointer whose static type differs from
its runtime type must be registered under a unique name, together with the
bases it can be viewed as. A base is either a trait-object view of the class
(`dyn Shape`) or another registered view that the first one extends. The
registry answers three questions by walking the declared bases depth-first:

- create: construct a class by name and hand it back as a requested base
- upcast: turn a handle of a class into a handle of one of its bases
- downcast: turn a handle of a base back into a handle of a derived class

The registry is populated once during setup and then only read, so sessions
borrow it immutably.
*/

use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;

use tracing::debug;

use crate::archivable::Archivable;
use crate::handle::{Handle, Shared, TypeTag};
use crate::{ArchiveError, Result};

/// Limit on base-chain depth, protecting against cyclic declarations
pub const MAX_CAST_DEPTH: usize = 64;

type UpcastFn = Box<dyn Fn(&Handle) -> Option<Handle> + Send + Sync>;

struct BaseClass {
    tag: TypeTag,
    upcast: UpcastFn,
}

/// Registration record of one class
///
/// Built with [`ClassInfo::concrete`], [`ClassInfo::without_default`] or
/// [`ClassInfo::view`], then extended with its bases:
///
/// ```rust
/// use archive_core::{Archivable, Archive, ClassInfo, Dynamic, Pointee, Result, Shared, TypeRegistry};
///
/// trait Shape: Dynamic {}
/// impl Pointee for dyn Shape {}
///
/// #[derive(Default)]
/// struct Circle { radius: f64 }
/// impl Shape for Circle {}
/// impl Archivable for Circle {
///     fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
///         ar.archive(&mut self.radius)
///     }
/// }
///
/// let mut registry = TypeRegistry::new();
/// registry.register(
///     ClassInfo::concrete::<Circle>("Circle")
///         .with_base::<dyn Shape>(|circle: Shared<Circle>| -> Shared<dyn Shape> { circle }),
/// )?;
/// assert!(registry.contains("Circle"));
/// # Ok::<(), archive_core::ArchiveError>(())
/// ```
pub struct ClassInfo {
    name: String,
    tag: TypeTag,
    create: Option<fn() -> Handle>,
    reify: Option<fn(&Handle) -> Option<Handle>>,
    bases: Vec<BaseClass>,
}

/// Typed builder for a [`ClassInfo`]
pub struct ClassBuilder<C: ?Sized> {
    info: ClassInfo,
    _class: PhantomData<fn(Shared<C>)>,
}

fn create_default<C: Archivable + Default>() -> Handle {
    Handle::new(Rc::new(RefCell::new(C::default())))
}

fn reify<C: Archivable>(handle: &Handle) -> Option<Handle> {
    handle.concrete::<C>().map(Handle::new)
}

impl ClassInfo {
    /// A concrete class that the archive can construct while reading
    pub fn concrete<C: Archivable + Default>(name: impl Into<String>) -> ClassBuilder<C> {
        ClassBuilder::new(ClassInfo {
            name: name.into(),
            tag: TypeTag::of::<C>(),
            create: Some(create_default::<C>),
            reify: Some(reify::<C>),
            bases: Vec::new(),
        })
    }

    /// A concrete class without a default value
    ///
    /// Objects of this class can be written and referenced, but reading one
    /// that has to be created fails with [`ArchiveError::NoDefaultConstructor`].
    pub fn without_default<C: Archivable>(name: impl Into<String>) -> ClassBuilder<C> {
        ClassBuilder::new(ClassInfo {
            name: name.into(),
            tag: TypeTag::of::<C>(),
            create: None,
            reify: Some(reify::<C>),
            bases: Vec::new(),
        })
    }

    /// An abstract view, such as `dyn Shape`, that is never constructed
    pub fn view<V: ?Sized + 'static>(name: impl Into<String>) -> ClassBuilder<V> {
        ClassBuilder::new(ClassInfo {
            name: name.into(),
            tag: TypeTag::of::<V>(),
            create: None,
            reify: None,
            bases: Vec::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_tag(&self) -> TypeTag {
        self.tag
    }

    pub fn is_constructible(&self) -> bool {
        self.create.is_some()
    }

    /// Tags of the directly declared bases
    pub fn bases(&self) -> impl Iterator<Item = TypeTag> + '_ {
        self.bases.iter().map(|base| base.tag)
    }

    /// Construct a new object of this class and view it as `target`
    ///
    /// # Arguments
    /// * `registry` - Registry used to follow base chains
    /// * `target` - The type the caller wants to hold the object as
    pub fn create(&self, registry: &TypeRegistry, target: TypeTag) -> Result<Handle> {
        let create = self
            .create
            .ok_or_else(|| ArchiveError::NoDefaultConstructor(self.name.clone()))?;
        let handle = create();
        if target == self.tag {
            Ok(handle)
        } else {
            self.upcast(registry, target, &handle)
        }
    }

    /// Convert `handle`, currently viewed as this class, into a view as `target`
    pub fn upcast(&self, registry: &TypeRegistry, target: TypeTag, handle: &Handle) -> Result<Handle> {
        self.upcast_at(registry, target, handle, 0)
            .ok_or_else(|| ArchiveError::cast_failed(self.name.as_str(), target.name))
    }

    /// Convert `handle`, currently viewed as `target`, into a view as this class
    ///
    /// `target` must be this class or one of its (transitive) bases. The object
    /// itself must actually be of this class or of a class derived from it.
    pub fn downcast(&self, registry: &TypeRegistry, target: TypeTag, handle: &Handle) -> Result<Handle> {
        self.downcast_at(registry, target, handle, 0)
            .ok_or_else(|| ArchiveError::cast_failed(target.name, self.name.as_str()))
    }

    /// True when this class is `target` or can be upcast to it
    pub fn reaches(&self, registry: &TypeRegistry, target: TypeTag) -> bool {
        self.reaches_at(registry, target, 0)
    }

    fn upcast_at(&self, registry: &TypeRegistry, target: TypeTag, handle: &Handle, depth: usize) -> Option<Handle> {
        if target == self.tag {
            return Some(handle.clone());
        }
        if depth >= MAX_CAST_DEPTH {
            return None;
        }
        for base in &self.bases {
            let Some(cast) = (base.upcast)(handle) else {
                continue;
            };
            if base.tag == target {
                return Some(cast);
            }
            let found = registry
                .by_type(base.tag.id)
                .and_then(|info| info.upcast_at(registry, target, &cast, depth + 1));
            if found.is_some() {
                return found;
            }
        }
        None
    }

    fn downcast_at(&self, registry: &TypeRegistry, target: TypeTag, handle: &Handle, depth: usize) -> Option<Handle> {
        if target == self.tag {
            return Some(handle.clone());
        }
        if depth >= MAX_CAST_DEPTH {
            return None;
        }
        for base in &self.bases {
            if base.tag == target {
                return self.narrow(registry, handle);
            }
            let found = registry
                .by_type(base.tag.id)
                .and_then(|info| info.downcast_at(registry, target, handle, depth + 1))
                .and_then(|mid| self.narrow(registry, &mid));
            if found.is_some() {
                return found;
            }
        }
        None
    }

    /// View the object behind `handle` as this class
    fn narrow(&self, registry: &TypeRegistry, handle: &Handle) -> Option<Handle> {
        if handle.view_type() == self.tag {
            return Some(handle.clone());
        }
        if let Some(reify) = self.reify {
            return reify(handle);
        }
        // Abstract views are reached through the object's concrete class
        let concrete = registry.by_type(handle.concrete_type().id)?;
        let exact = concrete.reify.and_then(|reify| reify(handle))?;
        concrete.upcast_at(registry, self.tag, &exact, 0)
    }

    fn reaches_at(&self, registry: &TypeRegistry, target: TypeTag, depth: usize) -> bool {
        if target == self.tag {
            return true;
        }
        depth < MAX_CAST_DEPTH
            && self.bases.iter().any(|base| {
                base.tag == target
                    || registry
                        .by_type(base.tag.id)
                        .is_some_and(|info| info.reaches_at(registry, target, depth + 1))
            })
    }
}

impl<C: ?Sized + 'static> ClassBuilder<C> {
    fn new(info: ClassInfo) -> Self {
        Self {
            info,
            _class: PhantomData,
        }
    }

    /// Declare a direct base `B` together with the conversion into it
    ///
    /// The conversion is almost always the unsizing coercion, written as
    /// `|p: Shared<C>| -> Shared<dyn B> { p }`; see [`register_class!`] for
    /// a shorthand.
    pub fn with_base<B: ?Sized + 'static>(mut self, cast: fn(Shared<C>) -> Shared<B>) -> Self {
        let upcast: UpcastFn = Box::new(move |handle: &Handle| {
            handle.get::<C>().map(|ptr| handle.with_view(cast(ptr)))
        });
        self.info.bases.push(BaseClass {
            tag: TypeTag::of::<B>(),
            upcast,
        });
        self
    }

    pub fn build(self) -> ClassInfo {
        self.info
    }
}

impl<C: ?Sized + 'static> From<ClassBuilder<C>> for ClassInfo {
    fn from(builder: ClassBuilder<C>) -> Self {
        builder.build()
    }
}

/// Name-keyed table of registered classes
#[derive(Default)]
pub struct TypeRegistry {
    classes: HashMap<String, ClassInfo>,
    names: HashMap<TypeId, String>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class
    ///
    /// # Arguments
    /// * `class` - A [`ClassInfo`] or a [`ClassBuilder`]
    ///
    /// # Returns
    /// [`ArchiveError::DuplicateClass`] if the name or the Rust type is
    /// already registered
    pub fn register(&mut self, class: impl Into<ClassInfo>) -> Result<()> {
        let info = class.into();
        if self.classes.contains_key(&info.name) {
            return Err(ArchiveError::DuplicateClass(info.name));
        }
        if let Some(existing) = self.names.get(&info.tag.id) {
            return Err(ArchiveError::DuplicateClass(format!(
                "{} (type {} is registered as {existing})",
                info.name, info.tag.name
            )));
        }

        debug!(
            class = %info.name,
            rust_type = info.tag.name,
            bases = info.bases.len(),
            "registered class"
        );
        self.names.insert(info.tag.id, info.name.clone());
        self.classes.insert(info.name.clone(), info);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ClassInfo> {
        self.classes.get(name)
    }

    /// Like [`TypeRegistry::get`], failing with [`ArchiveError::UnregisteredType`]
    pub fn lookup(&self, name: &str) -> Result<&ClassInfo> {
        self.get(name)
            .ok_or_else(|| ArchiveError::UnregisteredType(name.to_string()))
    }

    pub fn by_type(&self, id: TypeId) -> Option<&ClassInfo> {
        self.names.get(&id).and_then(|name| self.classes.get(name))
    }

    /// Registered name of a Rust type
    pub fn name_of(&self, id: TypeId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Registered names in sorted order
    pub fn class_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Register a class together with its bases in one statement
///
/// ```rust
/// use archive_core::{register_class, Archivable, Archive, Dynamic, Pointee, Result, TypeRegistry};
///
/// trait Shape: Dynamic {}
/// impl Pointee for dyn Shape {}
///
/// #[derive(Default)]
/// struct Square { side: f64 }
/// impl Shape for Square {}
/// impl Archivable for Square {
///     fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
///         ar.archive(&mut self.side)
///     }
/// }
///
/// let mut registry = TypeRegistry::new();
/// register_class!(registry, "Shape" => view dyn Shape)?;
/// register_class!(registry, "Square" => Square: dyn Shape)?;
/// assert_eq!(registry.class_names(), vec!["Shape", "Square"]);
/// # Ok::<(), archive_core::ArchiveError>(())
/// ```
#[macro_export]
macro_rules! register_class {
    ($registry:expr, $name:expr => view $class:ty $(: $($base:ty),+)?) => {
        $registry.register(
            $crate::ClassInfo::view::<$class>($name)
                $($(.with_base::<$base>(|p: $crate::Shared<$class>| -> $crate::Shared<$base> { p }))+)?
        )
    };
    ($registry:expr, $name:expr => $class:ty $(: $($base:ty),+)?) => {
        $registry.register(
            $crate::ClassInfo::concrete::<$class>($name)
                $($(.with_base::<$base>(|p: $crate::Shared<$class>| -> $crate::Shared<$base> { p }))+)?
        )
    };
}
