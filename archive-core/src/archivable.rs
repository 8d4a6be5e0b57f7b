/*!
Traits implemented by archivable types, plus their implementations for the
primitive and container types of the standard library.

A type opts in by implementing [`Archivable`] with a single `archive` method
that visits every persistent field in a fixed order. The same method serves
both directions: the archive either reads each field and writes it out, or
overwrites it with the decoded value.

```rust
use archive_core::{Archivable, Archive, Result};

#[derive(Default)]
struct Sample {
    label: String,
    values: Vec<f64>,
}

impl Archivable for Sample {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.label)?;
        ar.archive(&mut self.values)
    }
}
```
*/

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};
use std::rc::Rc;

use num_complex::Complex;

use crate::archive::Archive;
use crate::handle::{Handle, Ptr, Shared};
use crate::version::VersionInfo;
use crate::{ArchiveError, Result};

/// Elements decoded per step when reading a sequence
const READ_CHUNK: usize = 1 << 16;

/// A value that can be written to and read back from an archive
pub trait Archivable: Any {
    /// Visit every persistent field, in the same order for both directions
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()>;

    /// Visit a contiguous run of values
    ///
    /// Trivial primitives override this to move the whole run as one block.
    fn archive_slice(values: &mut [Self], ar: &mut Archive<'_>) -> Result<()>
    where
        Self: Sized,
    {
        values.iter_mut().try_for_each(|value| value.archive(ar))
    }
}

/// Runtime type access for archivable objects behind trait-object views
///
/// Implemented for every sized [`Archivable`]. Traits used as polymorphic
/// bases declare it as a supertrait:
///
/// ```rust
/// use archive_core::Dynamic;
///
/// trait Shape: Dynamic {
///     fn area(&self) -> f64;
/// }
/// ```
pub trait Dynamic: Archivable {
    fn as_any(&self) -> &dyn Any;

    /// Name of the concrete Rust type
    fn type_name(&self) -> &'static str;
}

impl<T: Archivable> Dynamic for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Types that can sit behind an archived pointer
///
/// Every default-constructible archivable type is a pointee. Trait-object views
/// opt in with an empty impl and are never constructed directly; objects read
/// through them are created by name from the type registry.
///
/// ```rust
/// use archive_core::{Dynamic, Pointee};
///
/// trait Shape: Dynamic {}
/// impl Pointee for dyn Shape {}
/// ```
pub trait Pointee: Dynamic {
    /// Create a fresh object of exactly this type
    fn construct() -> Result<Handle> {
        Err(ArchiveError::NoDefaultConstructor(
            std::any::type_name::<Self>().to_string(),
        ))
    }
}

impl<T: Archivable + Default> Pointee for T {
    fn construct() -> Result<Handle> {
        Ok(Handle::new(Rc::new(RefCell::new(T::default()))))
    }
}

macro_rules! primitive {
    ($ty:ty, $method:ident) => {
        impl Archivable for $ty {
            fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
                ar.codec().$method(self)
            }
        }
    };
    ($ty:ty, $method:ident, $bulk:ident) => {
        impl Archivable for $ty {
            fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
                ar.codec().$method(self)
            }

            fn archive_slice(values: &mut [Self], ar: &mut Archive<'_>) -> Result<()> {
                ar.codec().$bulk(values)
            }
        }
    };
}

primitive!(f64, f64, f64_slice);
primitive!(i8, i8);
primitive!(i16, i16, i16_slice);
primitive!(i32, i32, i32_slice);
primitive!(i64, i64, i64_slice);
primitive!(u8, u8, u8_slice);
primitive!(u64, u64, u64_slice);
primitive!(bool, bool);
primitive!(String, string);

/// Sizes travel as the 64-bit size type
impl Archivable for usize {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        let mut wide = *self as u64;
        ar.codec().u64(&mut wide)?;
        *self = usize::try_from(wide)
            .map_err(|_| ArchiveError::malformed(format!("size {wide} does not fit in memory")))?;
        Ok(())
    }
}

/// Nullable raw byte buffer
impl Archivable for Option<Vec<u8>> {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.codec().blob(self)
    }
}

impl<T: Archivable> Archivable for Complex<T> {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        self.re.archive(ar)?;
        self.im.archive(ar)
    }
}

/// Fixed-size arrays carry no length prefix
impl<T: Archivable, const N: usize> Archivable for [T; N] {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        T::archive_slice(self, ar)
    }
}

impl<T: Archivable + Default> Archivable for Vec<T> {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        let mut len = self.len();
        len.archive(ar)?;
        if ar.is_writing() {
            return T::archive_slice(self, ar);
        }

        // Allocation follows the decoded elements, never the declared length alone
        self.clear();
        while self.len() < len {
            let start = self.len();
            self.resize_with(len.min(start + READ_CHUNK), T::default);
            T::archive_slice(&mut self[start..], ar)?;
        }
        Ok(())
    }
}

/// Reading inserts into the existing map; a key read twice keeps the last value
impl<K, V, S> Archivable for HashMap<K, V, S>
where
    K: Archivable + Default + Clone + Eq + Hash,
    V: Archivable + Default,
    S: BuildHasher + Default + 'static,
{
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        let mut len = self.len();
        len.archive(ar)?;
        if ar.is_writing() {
            for (key, value) in self.iter_mut() {
                ar.write_value(key)?;
                value.archive(ar)?;
            }
        } else {
            for _ in 0..len {
                let (key, value) = read_entry::<K, V>(ar)?;
                self.insert(key, value);
            }
        }
        Ok(())
    }
}

impl<K, V> Archivable for BTreeMap<K, V>
where
    K: Archivable + Default + Clone + Ord,
    V: Archivable + Default,
{
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        let mut len = self.len();
        len.archive(ar)?;
        if ar.is_writing() {
            for (key, value) in self.iter_mut() {
                ar.write_value(key)?;
                value.archive(ar)?;
            }
        } else {
            for _ in 0..len {
                let (key, value) = read_entry::<K, V>(ar)?;
                self.insert(key, value);
            }
        }
        Ok(())
    }
}

fn read_entry<K, V>(ar: &mut Archive<'_>) -> Result<(K, V)>
where
    K: Archivable + Default,
    V: Archivable + Default,
{
    let mut key = K::default();
    key.archive(ar)?;
    let mut value = V::default();
    value.archive(ar)?;
    Ok((key, value))
}

/// Versions travel in their text form
impl Archivable for VersionInfo {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        let mut text = self.to_string();
        text.archive(ar)?;
        if ar.is_reading() {
            *self = text.parse()?;
        }
        Ok(())
    }
}

impl<T: ?Sized + Pointee> Archivable for Option<Ptr<T>> {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.pointer(self)
    }
}

impl<T: ?Sized + Pointee> Archivable for Option<Shared<T>> {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.shared(self)
    }
}
