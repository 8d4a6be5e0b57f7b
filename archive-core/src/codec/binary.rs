/*!
Fixed-width binary codec.

Primitives are written in native byte order through a fixed-size staging
buffer which is flushed when it would overflow, on explicit request, and when
the writer goes away. Strings carry a 32-bit length prefix, nullable blobs a
64-bit signed length (-1 for absent). Neither has a terminator.
*/

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use byteorder::{NativeEndian, ReadBytesExt};
use bytes::{BufMut, BytesMut};
use tracing::warn;

use super::{string_len, Codec, Direction};
use crate::{ArchiveError, Result};

/// Default size of the writer's staging buffer in bytes
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Binary encoder over any byte sink
///
/// # Example
/// ```rust
/// use archive_core::codec::{BinaryWriter, Codec};
///
/// let mut bytes = Vec::new();
/// let mut writer = BinaryWriter::new(&mut bytes);
/// writer.i32(&mut 7)?;
/// writer.flush()?;
/// drop(writer);
/// assert_eq!(bytes, 7i32.to_ne_bytes());
/// # Ok::<(), archive_core::ArchiveError>(())
/// ```
pub struct BinaryWriter<W: Write> {
    sink: W,
    buffer: BytesMut,
    capacity: usize,
}

impl<W: Write> BinaryWriter<W> {
    /// Create a writer with the default staging buffer size
    pub fn new(sink: W) -> Self {
        Self::with_buffer_size(sink, DEFAULT_BUFFER_SIZE)
    }

    /// Create a writer with a custom staging buffer size
    ///
    /// A size of zero is raised to the width of the largest primitive so every
    /// value still fits.
    pub fn with_buffer_size(sink: W, capacity: usize) -> Self {
        let capacity = capacity.max(std::mem::size_of::<u64>());
        Self {
            sink,
            buffer: BytesMut::with_capacity(capacity),
            capacity,
        }
    }

    /// Make room for `width` more bytes in the staging buffer
    fn reserve(&mut self, width: usize) -> Result<()> {
        if self.buffer.len() + width > self.capacity {
            self.flush_buffer()?;
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if !self.buffer.is_empty() {
            self.sink.write_all(&self.buffer)?;
            self.buffer.clear();
        }
        Ok(())
    }

    /// Write a block directly to the sink, after anything already staged
    fn write_block(&mut self, block: &[u8]) -> Result<()> {
        self.flush_buffer()?;
        self.sink.write_all(block)?;
        Ok(())
    }
}

impl BinaryWriter<BufWriter<File>> {
    /// Create (or truncate) a file and write to it
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())?;
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write> Drop for BinaryWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = Codec::flush(self) {
            warn!("Failed to flush binary archive on close: {}", e);
        }
    }
}

impl<W: Write> Codec for BinaryWriter<W> {
    fn direction(&self) -> Direction {
        Direction::Write
    }

    fn f64(&mut self, value: &mut f64) -> Result<()> {
        self.reserve(8)?;
        self.buffer.put_f64_ne(*value);
        Ok(())
    }

    fn i8(&mut self, value: &mut i8) -> Result<()> {
        self.reserve(1)?;
        self.buffer.put_i8(*value);
        Ok(())
    }

    fn i16(&mut self, value: &mut i16) -> Result<()> {
        self.reserve(2)?;
        self.buffer.put_i16_ne(*value);
        Ok(())
    }

    fn i32(&mut self, value: &mut i32) -> Result<()> {
        self.reserve(4)?;
        self.buffer.put_i32_ne(*value);
        Ok(())
    }

    fn i64(&mut self, value: &mut i64) -> Result<()> {
        self.reserve(8)?;
        self.buffer.put_i64_ne(*value);
        Ok(())
    }

    fn u8(&mut self, value: &mut u8) -> Result<()> {
        self.reserve(1)?;
        self.buffer.put_u8(*value);
        Ok(())
    }

    fn u64(&mut self, value: &mut u64) -> Result<()> {
        self.reserve(8)?;
        self.buffer.put_u64_ne(*value);
        Ok(())
    }

    fn bool(&mut self, value: &mut bool) -> Result<()> {
        self.reserve(1)?;
        self.buffer.put_u8(u8::from(*value));
        Ok(())
    }

    fn string(&mut self, value: &mut String) -> Result<()> {
        let mut len = string_len(value.len())?;
        self.i32(&mut len)?;
        self.write_block(value.as_bytes())
    }

    fn blob(&mut self, value: &mut Option<Vec<u8>>) -> Result<()> {
        let mut len = match value {
            Some(bytes) => i64::try_from(bytes.len())
                .map_err(|_| ArchiveError::malformed("blob length exceeds i64"))?,
            None => -1,
        };
        self.i64(&mut len)?;
        match value {
            Some(bytes) => self.write_block(bytes),
            None => Ok(()),
        }
    }

    fn f64_slice(&mut self, values: &mut [f64]) -> Result<()> {
        let mut block = BytesMut::with_capacity(values.len() * 8);
        values.iter().for_each(|v| block.put_f64_ne(*v));
        self.write_block(&block)
    }

    fn i16_slice(&mut self, values: &mut [i16]) -> Result<()> {
        let mut block = BytesMut::with_capacity(values.len() * 2);
        values.iter().for_each(|v| block.put_i16_ne(*v));
        self.write_block(&block)
    }

    fn i32_slice(&mut self, values: &mut [i32]) -> Result<()> {
        let mut block = BytesMut::with_capacity(values.len() * 4);
        values.iter().for_each(|v| block.put_i32_ne(*v));
        self.write_block(&block)
    }

    fn i64_slice(&mut self, values: &mut [i64]) -> Result<()> {
        let mut block = BytesMut::with_capacity(values.len() * 8);
        values.iter().for_each(|v| block.put_i64_ne(*v));
        self.write_block(&block)
    }

    fn u64_slice(&mut self, values: &mut [u64]) -> Result<()> {
        let mut block = BytesMut::with_capacity(values.len() * 8);
        values.iter().for_each(|v| block.put_u64_ne(*v));
        self.write_block(&block)
    }

    fn u8_slice(&mut self, values: &mut [u8]) -> Result<()> {
        self.write_block(values)
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_buffer()?;
        self.sink.flush()?;
        Ok(())
    }
}

/// Binary decoder over any byte source
pub struct BinaryReader<R: Read> {
    source: BufReader<R>,
}

impl<R: Read> BinaryReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: BufReader::new(source),
        }
    }

    /// Read exactly `len` raw bytes without trusting `len` for the allocation
    fn read_bytes(&mut self, len: u64, what: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        (&mut self.source)
            .take(len)
            .read_to_end(&mut bytes)
            .map_err(|e| ArchiveError::from_read(e, what))?;
        if (bytes.len() as u64) < len {
            return Err(ArchiveError::truncated(format!(
                "{what} ({} of {len} bytes)",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

impl BinaryReader<File> {
    /// Open a file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(File::open(path.as_ref())?))
    }
}

impl<R: Read> Codec for BinaryReader<R> {
    fn direction(&self) -> Direction {
        Direction::Read
    }

    fn f64(&mut self, value: &mut f64) -> Result<()> {
        *value = self
            .source
            .read_f64::<NativeEndian>()
            .map_err(|e| ArchiveError::from_read(e, "f64"))?;
        Ok(())
    }

    fn i8(&mut self, value: &mut i8) -> Result<()> {
        *value = self
            .source
            .read_i8()
            .map_err(|e| ArchiveError::from_read(e, "i8"))?;
        Ok(())
    }

    fn i16(&mut self, value: &mut i16) -> Result<()> {
        *value = self
            .source
            .read_i16::<NativeEndian>()
            .map_err(|e| ArchiveError::from_read(e, "i16"))?;
        Ok(())
    }

    fn i32(&mut self, value: &mut i32) -> Result<()> {
        *value = self
            .source
            .read_i32::<NativeEndian>()
            .map_err(|e| ArchiveError::from_read(e, "i32"))?;
        Ok(())
    }

    fn i64(&mut self, value: &mut i64) -> Result<()> {
        *value = self
            .source
            .read_i64::<NativeEndian>()
            .map_err(|e| ArchiveError::from_read(e, "i64"))?;
        Ok(())
    }

    fn u8(&mut self, value: &mut u8) -> Result<()> {
        *value = self
            .source
            .read_u8()
            .map_err(|e| ArchiveError::from_read(e, "u8"))?;
        Ok(())
    }

    fn u64(&mut self, value: &mut u64) -> Result<()> {
        *value = self
            .source
            .read_u64::<NativeEndian>()
            .map_err(|e| ArchiveError::from_read(e, "u64"))?;
        Ok(())
    }

    fn bool(&mut self, value: &mut bool) -> Result<()> {
        let byte = self
            .source
            .read_u8()
            .map_err(|e| ArchiveError::from_read(e, "bool"))?;
        *value = byte != 0;
        Ok(())
    }

    fn string(&mut self, value: &mut String) -> Result<()> {
        let mut len = 0i32;
        self.i32(&mut len)?;
        let len = u64::try_from(len)
            .map_err(|_| ArchiveError::malformed(format!("negative string length {len}")))?;
        let bytes = self.read_bytes(len, "string")?;
        *value = String::from_utf8(bytes)
            .map_err(|e| ArchiveError::malformed(format!("invalid UTF-8 in string: {e}")))?;
        Ok(())
    }

    fn blob(&mut self, value: &mut Option<Vec<u8>>) -> Result<()> {
        let mut len = 0i64;
        self.i64(&mut len)?;
        *value = match len {
            -1 => None,
            len if len < -1 => {
                return Err(ArchiveError::malformed(format!("negative blob length {len}")))
            }
            len => Some(self.read_bytes(len as u64, "blob")?),
        };
        Ok(())
    }

    fn f64_slice(&mut self, values: &mut [f64]) -> Result<()> {
        self.source
            .read_f64_into::<NativeEndian>(values)
            .map_err(|e| ArchiveError::from_read(e, "f64 block"))
    }

    fn i16_slice(&mut self, values: &mut [i16]) -> Result<()> {
        self.source
            .read_i16_into::<NativeEndian>(values)
            .map_err(|e| ArchiveError::from_read(e, "i16 block"))
    }

    fn i32_slice(&mut self, values: &mut [i32]) -> Result<()> {
        self.source
            .read_i32_into::<NativeEndian>(values)
            .map_err(|e| ArchiveError::from_read(e, "i32 block"))
    }

    fn i64_slice(&mut self, values: &mut [i64]) -> Result<()> {
        self.source
            .read_i64_into::<NativeEndian>(values)
            .map_err(|e| ArchiveError::from_read(e, "i64 block"))
    }

    fn u64_slice(&mut self, values: &mut [u64]) -> Result<()> {
        self.source
            .read_u64_into::<NativeEndian>(values)
            .map_err(|e| ArchiveError::from_read(e, "u64 block"))
    }

    fn u8_slice(&mut self, values: &mut [u8]) -> Result<()> {
        self.source
            .read_exact(values)
            .map_err(|e| ArchiveError::from_read(e, "u8 block"))
    }
}
