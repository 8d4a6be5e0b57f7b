/*!
# Archive Core Engine

Symmetric persistence of in-memory object graphs.

This crate writes an object graph to a byte stream and rebuilds it later with
the same shape, including:

- Aliasing: an object reached through several pointers is written once and
  every pointer references the same object again after reading
- Polymorphism: objects held through trait-object views (`Ptr<dyn Shape>`)
  are recreated as their registered concrete class
- Shared ownership: `Rc<RefCell<T>>` pointers keep their sharing, including
  when different pointers view the object through different types
- Two wire encodings: a buffered native-endian binary codec and a
  line-oriented text codec
- A version header recording the libraries that produced the archive

## Architecture

Types describe their persistent state once, in [`Archivable::archive`]. An
[`Archive`] session runs that description over a [`Codec`], which is the only
part that knows the wire format. Polymorphic classes and their bases live in
a [`TypeRegistry`] that sessions borrow.

## Usage

```rust
use archive_core::{register_class, Archivable, Archive, BinaryReader, BinaryWriter};
use archive_core::{Dynamic, Pointee, Ptr, Result, Shared, TypeRegistry};
use std::{cell::RefCell, rc::Rc};

trait Shape: Dynamic {
    fn area(&self) -> f64;
}
impl Pointee for dyn Shape {}

#[derive(Default)]
struct Square {
    side: f64,
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

impl Archivable for Square {
    fn archive(&mut self, ar: &mut Archive<'_>) -> Result<()> {
        ar.archive(&mut self.side)
    }
}

let mut registry = TypeRegistry::new();
register_class!(registry, "Square" => Square: dyn Shape)?;

let square: Shared<dyn Shape> = Rc::new(RefCell::new(Square { side: 3.0 }));
let square = Ptr::from_rc(square);
let mut shapes = vec![Some(square.clone()), Some(square)];

let mut bytes = Vec::new();
let mut ar = Archive::new(BinaryWriter::new(&mut bytes), &registry)?;
ar.archive(&mut shapes)?;
ar.finish()?;

let mut restored: Vec<Option<Ptr<dyn Shape>>> = Vec::new();
let mut ar = Archive::new(BinaryReader::new(bytes.as_slice()), &registry)?;
ar.archive(&mut restored)?;

let first = restored[0].as_ref().unwrap();
assert_eq!(first.borrow().area(), 9.0);
assert!(first.same_object(restored[1].as_ref().unwrap()));
# Ok::<(), archive_core::ArchiveError>(())
```
*/

pub mod archivable;
pub mod archive;
pub mod codec;
pub mod config;
pub mod error;
pub mod handle;
pub mod observability;
pub mod registry;
pub mod version;


pub use archivable::{Archivable, Dynamic, Pointee};
pub use archive::Archive;
pub use codec::{BinaryReader, BinaryWriter, Codec, Direction, TextReader, TextWriter};
pub use config::{open_reader, open_writer, ArchiveConfig, Format};
pub use error::{ArchiveError, Result};
pub use handle::{Handle, Ptr, Shared, TypeTag};
pub use registry::{ClassBuilder, ClassInfo, TypeRegistry};
pub use version::{library_version, library_versions, set_library_version, VersionInfo, VersionTable};
