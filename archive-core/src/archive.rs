/*!
Archive sessions.

An [`Archive`] drives one pass over an object graph in one direction. It
wraps a [`Codec`], borrows the [`TypeRegistry`], and keeps the identity tables
that let every object be written exactly once no matter how many pointers
reach it. On reading, the same tables rebuild the aliasing: each pointer that
referenced one object when written references one object again once read.

## Pointer protocols

Plain pointers (`Option<Ptr<T>>`) start with an `i32` marker:

| marker | meaning |
|--------|---------|
| `-2` | null |
| `-1` | first sighting, runtime type is the static type, body follows |
| `-3` | first sighting of a registered class, name then body follow |
| `n >= 0` | the object with id `n`, then a downcast flag and the class name |

Shared pointers (`Option<Shared<T>>`) use `-2` for null, `-1` for a first
sighting (downcast flag, nested plain pointer, class name if the flag is set)
and `n >= 0` for later sightings (id, flag, class name if set). Shared ids are
assigned after the nested object is complete, plain ids before the body.
*/

use std::any::Any;
use std::collections::HashMap;

use tracing::{debug, trace};

use crate::archivable::{Archivable, Pointee};
use crate::codec::{Codec, Direction};
use crate::handle::{identity, Handle, Ptr, Shared, TypeTag};
use crate::registry::TypeRegistry;
use crate::version::{library_versions, VersionInfo, VersionTable};
use crate::{ArchiveError, Result};

const NULL_MARKER: i32 = -2;
const EXACT_MARKER: i32 = -1;
const POLYMORPHIC_MARKER: i32 = -3;

/// First sighting of an object on the write side
struct Sighting {
    id: i32,
    concrete: TypeTag,
    /// Keeps the object alive so its address cannot be reused mid-session
    _pin: Box<dyn Any>,
}

/// Object identities of one pointer protocol
#[derive(Default)]
struct IdentityTable {
    seen: HashMap<usize, Sighting>,
    restored: Vec<Handle>,
    next_id: i32,
}

impl IdentityTable {
    fn assign(&mut self, key: usize, concrete: TypeTag, pin: Box<dyn Any>) -> i32 {
        let id = self.next_id;
        self.next_id += 1;
        self.seen.insert(
            key,
            Sighting {
                id,
                concrete,
                _pin: pin,
            },
        );
        id
    }

    fn restored(&self, id: i32) -> Result<Handle> {
        usize::try_from(id)
            .ok()
            .and_then(|index| self.restored.get(index))
            .cloned()
            .ok_or_else(|| ArchiveError::malformed(format!("reference to unknown object id {id}")))
    }

    fn len(&self) -> usize {
        match self.seen.len() {
            0 => self.restored.len(),
            written => written,
        }
    }
}

/// One read or write pass over an object graph
///
/// # Example
/// ```rust
/// use archive_core::{Archive, BinaryReader, BinaryWriter, TypeRegistry};
///
/// let registry = TypeRegistry::new();
/// let mut bytes = Vec::new();
///
/// let mut values = vec![1.5, 2.5];
/// let mut ar = Archive::new(BinaryWriter::new(&mut bytes), &registry)?;
/// ar.archive(&mut values)?;
/// ar.finish()?;
///
/// let mut restored: Vec<f64> = Vec::new();
/// let mut ar = Archive::new(BinaryReader::new(bytes.as_slice()), &registry)?;
/// ar.archive(&mut restored)?;
/// assert_eq!(restored, values);
/// # Ok::<(), archive_core::ArchiveError>(())
/// ```
pub struct Archive<'a> {
    codec: Box<dyn Codec + 'a>,
    registry: &'a TypeRegistry,
    versions: VersionTable,
    pointers: IdentityTable,
    shared: IdentityTable,
}

impl<'a> Archive<'a> {
    /// Open a session and exchange the version header
    ///
    /// A writer records the process-wide library versions; a reader loads the
    /// table stored in the stream.
    pub fn new<C: Codec + 'a>(codec: C, registry: &'a TypeRegistry) -> Result<Self> {
        let versions = match codec.direction() {
            Direction::Write => library_versions(),
            Direction::Read => VersionTable::new(),
        };
        Self::with_versions(codec, registry, versions)
    }

    /// Open a session with an explicit version table
    ///
    /// The table is written as the header when writing and ignored when
    /// reading.
    pub fn with_versions<C: Codec + 'a>(
        codec: C,
        registry: &'a TypeRegistry,
        versions: VersionTable,
    ) -> Result<Self> {
        let mut archive = Self {
            codec: Box::new(codec),
            registry,
            versions: VersionTable::new(),
            pointers: IdentityTable::default(),
            shared: IdentityTable::default(),
        };

        let mut header = match archive.direction() {
            Direction::Write => versions,
            Direction::Read => VersionTable::new(),
        };
        header.archive(&mut archive)?;
        archive.versions = header;

        debug!(
            direction = ?archive.direction(),
            libraries = archive.versions.len(),
            "archive session opened"
        );
        #[cfg(feature = "metrics")]
        crate::observability::with_metrics(|m| m.record_session(archive.direction()));

        Ok(archive)
    }

    pub fn direction(&self) -> Direction {
        self.codec.direction()
    }

    pub fn is_writing(&self) -> bool {
        self.direction() == Direction::Write
    }

    pub fn is_reading(&self) -> bool {
        self.direction() == Direction::Read
    }

    /// The version table written to or read from the header
    pub fn versions(&self) -> &VersionTable {
        &self.versions
    }

    /// Version of `library` recorded in the header
    pub fn version(&self, library: &str) -> Option<&VersionInfo> {
        self.versions.get(library)
    }

    pub fn registry(&self) -> &'a TypeRegistry {
        self.registry
    }

    /// Number of distinct objects seen through plain pointers so far
    pub fn object_count(&self) -> usize {
        self.pointers.len()
    }

    /// Number of distinct objects seen through shared pointers so far
    pub fn shared_count(&self) -> usize {
        self.shared.len()
    }

    pub(crate) fn codec(&mut self) -> &mut dyn Codec {
        &mut *self.codec
    }

    /// Write or read one value
    pub fn archive<T: Archivable + ?Sized>(&mut self, value: &mut T) -> Result<()> {
        value.archive(self)
    }

    /// Write a value the caller only holds by shared reference
    ///
    /// The value is copied first. When reading, a fresh copy is decoded and
    /// discarded.
    pub fn write_value<T: Archivable + Clone>(&mut self, value: &T) -> Result<()> {
        let mut copy = value.clone();
        copy.archive(self)
    }

    /// Write or read a plain pointer
    pub fn pointer<T: ?Sized + Pointee>(&mut self, ptr: &mut Option<Ptr<T>>) -> Result<()> {
        match self.direction() {
            Direction::Write => match ptr {
                Some(ptr) => self.write_pointer(ptr.as_rc()),
                None => self.marker(NULL_MARKER),
            },
            Direction::Read => {
                *ptr = match self.read_pointer::<T>()? {
                    Some(handle) => Some(Ptr::from_rc(handle.cast::<T>()?)),
                    None => None,
                };
                Ok(())
            }
        }
    }

    /// Write or read a shared pointer
    pub fn shared<T: ?Sized + Pointee>(&mut self, ptr: &mut Option<Shared<T>>) -> Result<()> {
        match self.direction() {
            Direction::Write => match ptr {
                Some(ptr) => self.write_shared(ptr),
                None => self.marker(NULL_MARKER),
            },
            Direction::Read => {
                *ptr = match self.read_shared::<T>()? {
                    Some(handle) => Some(handle.cast::<T>()?),
                    None => None,
                };
                Ok(())
            }
        }
    }

    /// Flush buffered output
    pub fn flush(&mut self) -> Result<()> {
        self.codec.flush()
    }

    /// End the session, flushing buffered output
    pub fn finish(mut self) -> Result<()> {
        self.flush()?;
        debug!(
            direction = ?self.direction(),
            objects = self.pointers.len(),
            shared = self.shared.len(),
            "archive session finished"
        );
        Ok(())
    }

    /// Runtime type of the object behind `ptr`, from the tables when known
    fn runtime_type<T: ?Sized + Pointee>(&self, ptr: &Shared<T>) -> Result<TypeTag> {
        let key = identity(ptr);
        if let Some(seen) = self.pointers.seen.get(&key).or_else(|| self.shared.seen.get(&key)) {
            return Ok(seen.concrete);
        }
        let object = ptr
            .try_borrow()
            .map_err(|_| ArchiveError::AlreadyBorrowed(std::any::type_name::<T>().to_string()))?;
        Ok(TypeTag {
            id: object.as_any().type_id(),
            name: object.type_name(),
        })
    }

    /// Registered name of `concrete`, checked to be viewable as `target`
    fn class_name(&self, concrete: TypeTag, target: TypeTag) -> Result<String> {
        let info = self
            .registry
            .by_type(concrete.id)
            .ok_or_else(|| ArchiveError::UnregisteredType(concrete.name.to_string()))?;
        if !info.reaches(self.registry, target) {
            return Err(ArchiveError::cast_failed(info.name(), target.name));
        }
        Ok(info.name().to_string())
    }

    fn marker(&mut self, mut marker: i32) -> Result<()> {
        self.codec.i32(&mut marker)
    }

    fn visit<T: ?Sized + Pointee>(&mut self, ptr: &Shared<T>) -> Result<()> {
        let mut object = ptr
            .try_borrow_mut()
            .map_err(|_| ArchiveError::AlreadyBorrowed(std::any::type_name::<T>().to_string()))?;
        object.archive(self)
    }

    fn write_pointer<T: ?Sized + Pointee>(&mut self, ptr: &Shared<T>) -> Result<()> {
        let key = identity(ptr);
        let target = TypeTag::of::<T>();

        if let Some(seen) = self.pointers.seen.get(&key) {
            let (mut id, concrete) = (seen.id, seen.concrete);
            let mut downcast = concrete != target;
            let mut name = if downcast {
                self.class_name(concrete, target)?
            } else {
                self.registry
                    .name_of(concrete.id)
                    .unwrap_or(concrete.name)
                    .to_string()
            };
            self.codec.i32(&mut id)?;
            self.codec.bool(&mut downcast)?;
            self.codec.string(&mut name)?;
            trace!(id, "plain pointer to known object");
            #[cfg(feature = "metrics")]
            crate::observability::with_metrics(|m| m.record_identity_hit());
            return Ok(());
        }

        let concrete = self.runtime_type(ptr)?;
        if concrete == target {
            let id = self.pointers.assign(key, concrete, Box::new(ptr.clone()));
            self.marker(EXACT_MARKER)?;
            trace!(id, rust_type = concrete.name, "writing object");
        } else {
            let mut name = self.class_name(concrete, target)?;
            let id = self.pointers.assign(key, concrete, Box::new(ptr.clone()));
            self.marker(POLYMORPHIC_MARKER)?;
            self.codec.string(&mut name)?;
            trace!(id, class = %name, "writing polymorphic object");
        }
        #[cfg(feature = "metrics")]
        crate::observability::with_metrics(|m| m.record_object(Direction::Write));

        self.visit(ptr)
    }

    fn read_pointer<T: ?Sized + Pointee>(&mut self) -> Result<Option<Handle>> {
        let registry = self.registry;
        let target = TypeTag::of::<T>();
        let mut marker = 0i32;
        self.codec.i32(&mut marker)?;

        let handle = match marker {
            NULL_MARKER => return Ok(None),
            EXACT_MARKER => {
                let handle = T::construct()?;
                self.pointers.restored.push(handle.clone());
                trace!(id = self.pointers.restored.len() - 1, rust_type = target.name, "reading object");
                handle
            }
            POLYMORPHIC_MARKER => {
                let mut name = String::new();
                self.codec.string(&mut name)?;
                let info = registry.lookup(&name)?;
                let handle = info.create(registry, target)?;
                let canonical = info.downcast(registry, target, &handle)?;
                self.pointers.restored.push(canonical);
                trace!(id = self.pointers.restored.len() - 1, class = %name, "reading polymorphic object");
                handle
            }
            id if id >= 0 => {
                let mut downcast = false;
                let mut name = String::new();
                self.codec.bool(&mut downcast)?;
                self.codec.string(&mut name)?;
                let known = self.pointers.restored(id)?;
                #[cfg(feature = "metrics")]
                crate::observability::with_metrics(|m| m.record_identity_hit());
                if downcast {
                    return registry.lookup(&name)?.upcast(registry, target, &known).map(Some);
                }
                return Ok(Some(known));
            }
            other => {
                return Err(ArchiveError::malformed(format!(
                    "invalid pointer marker {other}"
                )))
            }
        };

        #[cfg(feature = "metrics")]
        crate::observability::with_metrics(|m| m.record_object(Direction::Read));
        self.visit(&handle.cast::<T>()?)?;
        Ok(Some(handle))
    }

    fn write_shared<T: ?Sized + Pointee>(&mut self, ptr: &Shared<T>) -> Result<()> {
        let key = identity(ptr);
        let target = TypeTag::of::<T>();
        let concrete = self.runtime_type(ptr)?;
        let mut downcast = concrete != target;
        let class = if downcast {
            Some(self.class_name(concrete, target)?)
        } else {
            None
        };

        match self.shared.seen.get(&key).map(|seen| seen.id) {
            Some(mut id) => {
                self.codec.i32(&mut id)?;
                self.codec.bool(&mut downcast)?;
                trace!(id, "shared pointer to known object");
                #[cfg(feature = "metrics")]
                crate::observability::with_metrics(|m| m.record_identity_hit());
            }
            None => {
                self.marker(EXACT_MARKER)?;
                self.codec.bool(&mut downcast)?;
                self.write_pointer(ptr)?;
                let id = self.shared.assign(key, concrete, Box::new(ptr.clone()));
                trace!(id, "shared object complete");
            }
        }

        if let Some(mut name) = class {
            self.codec.string(&mut name)?;
        }
        Ok(())
    }

    fn read_shared<T: ?Sized + Pointee>(&mut self) -> Result<Option<Handle>> {
        let registry = self.registry;
        let target = TypeTag::of::<T>();
        let mut marker = 0i32;
        self.codec.i32(&mut marker)?;

        match marker {
            NULL_MARKER => Ok(None),
            EXACT_MARKER => {
                let mut downcast = false;
                self.codec.bool(&mut downcast)?;
                let handle = self
                    .read_pointer::<T>()?
                    .ok_or_else(|| ArchiveError::malformed("shared pointer wraps a null object"))?;
                let canonical = if downcast {
                    let mut name = String::new();
                    self.codec.string(&mut name)?;
                    registry.lookup(&name)?.downcast(registry, target, &handle)?
                } else {
                    handle.clone()
                };
                self.shared.restored.push(canonical);
                trace!(id = self.shared.restored.len() - 1, "shared object complete");
                Ok(Some(handle))
            }
            id if id >= 0 => {
                let mut downcast = false;
                self.codec.bool(&mut downcast)?;
                let known = self.shared.restored(id)?;
                #[cfg(feature = "metrics")]
                crate::observability::with_metrics(|m| m.record_identity_hit());
                if downcast {
                    let mut name = String::new();
                    self.codec.string(&mut name)?;
                    registry.lookup(&name)?.upcast(registry, target, &known).map(Some)
                } else {
                    Ok(Some(known))
                }
            }
            other => Err(ArchiveError::malformed(format!(
                "invalid shared pointer marker {other}"
            ))),
        }
    }
}
