/*!
Primitive codecs for archive sessions.

This module defines the codec abstraction (port) and the two concrete wire
encodings (adapters). The archive engine in [`crate::archive`] is written once
against [`Codec`]; a format only has to move primitives in and out of a byte
stream, which keeps the read and write paths symmetric by construction.
*/

pub mod binary;
pub mod text;

use crate::{ArchiveError, Result};
use serde::{Deserialize, Serialize};

pub use binary::{BinaryReader, BinaryWriter, DEFAULT_BUFFER_SIZE};
pub use text::{TextReader, TextWriter};

/// Strings carry a 32-bit length in every encoding
pub(crate) fn string_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| {
        ArchiveError::malformed(format!(
            "string of {len} bytes exceeds the 32-bit length prefix"
        ))
    })
}

/// Direction of an archive session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Values flow from memory into the stream
    Write,
    /// Values flow from the stream into memory
    Read,
}

/// Primitive I/O for one wire encoding
///
/// Every method takes the value by mutable reference. A writer reads the
/// current value and emits it; a reader overwrites it with the decoded value.
/// The same call sequence therefore drives both directions.
///
/// The slice methods are the bulk path for contiguous runs of trivial
/// elements. Their default implementations dispatch per element; codecs that
/// can move a whole block at once override them.
pub trait Codec {
    /// The direction this codec moves data in
    fn direction(&self) -> Direction;

    fn f64(&mut self, value: &mut f64) -> Result<()>;
    fn i8(&mut self, value: &mut i8) -> Result<()>;
    fn i16(&mut self, value: &mut i16) -> Result<()>;
    fn i32(&mut self, value: &mut i32) -> Result<()>;
    fn i64(&mut self, value: &mut i64) -> Result<()>;
    fn u8(&mut self, value: &mut u8) -> Result<()>;
    /// The size type, used for element counts
    fn u64(&mut self, value: &mut u64) -> Result<()>;
    fn bool(&mut self, value: &mut bool) -> Result<()>;
    fn string(&mut self, value: &mut String) -> Result<()>;

    /// Nullable raw byte buffer; `None` is encoded as length -1
    fn blob(&mut self, value: &mut Option<Vec<u8>>) -> Result<()>;

    fn f64_slice(&mut self, values: &mut [f64]) -> Result<()> {
        values.iter_mut().try_for_each(|v| self.f64(v))
    }

    fn i16_slice(&mut self, values: &mut [i16]) -> Result<()> {
        values.iter_mut().try_for_each(|v| self.i16(v))
    }

    fn i32_slice(&mut self, values: &mut [i32]) -> Result<()> {
        values.iter_mut().try_for_each(|v| self.i32(v))
    }

    fn i64_slice(&mut self, values: &mut [i64]) -> Result<()> {
        values.iter_mut().try_for_each(|v| self.i64(v))
    }

    fn u64_slice(&mut self, values: &mut [u64]) -> Result<()> {
        values.iter_mut().try_for_each(|v| self.u64(v))
    }

    fn u8_slice(&mut self, values: &mut [u8]) -> Result<()> {
        values.iter_mut().try_for_each(|v| self.u8(v))
    }

    /// Push buffered bytes to the underlying sink. A no-op for readers.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<C: Codec + ?Sized> Codec for Box<C> {
    fn direction(&self) -> Direction {
        (**self).direction()
    }
    fn f64(&mut self, value: &mut f64) -> Result<()> {
        (**self).f64(value)
    }
    fn i8(&mut self, value: &mut i8) -> Result<()> {
        (**self).i8(value)
    }
    fn i16(&mut self, value: &mut i16) -> Result<()> {
        (**self).i16(value)
    }
    fn i32(&mut self, value: &mut i32) -> Result<()> {
        (**self).i32(value)
    }
    fn i64(&mut self, value: &mut i64) -> Result<()> {
        (**self).i64(value)
    }
    fn u8(&mut self, value: &mut u8) -> Result<()> {
        (**self).u8(value)
    }
    fn u64(&mut self, value: &mut u64) -> Result<()> {
        (**self).u64(value)
    }
    fn bool(&mut self, value: &mut bool) -> Result<()> {
        (**self).bool(value)
    }
    fn string(&mut self, value: &mut String) -> Result<()> {
        (**self).string(value)
    }
    fn blob(&mut self, value: &mut Option<Vec<u8>>) -> Result<()> {
        (**self).blob(value)
    }
    fn f64_slice(&mut self, values: &mut [f64]) -> Result<()> {
        (**self).f64_slice(values)
    }
    fn i16_slice(&mut self, values: &mut [i16]) -> Result<()> {
        (**self).i16_slice(values)
    }
    fn i32_slice(&mut self, values: &mut [i32]) -> Result<()> {
        (**self).i32_slice(values)
    }
    fn i64_slice(&mut self, values: &mut [i64]) -> Result<()> {
        (**self).i64_slice(values)
    }
    fn u64_slice(&mut self, values: &mut [u64]) -> Result<()> {
        (**self).u64_slice(values)
    }
    fn u8_slice(&mut self, values: &mut [u8]) -> Result<()> {
        (**self).u8_slice(values)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}
