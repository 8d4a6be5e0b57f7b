/*!
Line-oriented text codec.

Every number sits on its own line in decimal. Booleans are `t` or `f`. A
string is a length line followed by the raw bytes and a newline; the empty
string is just the `0` line. Blobs follow the same convention with a signed
length, `-1` meaning absent.
*/

use std::fmt::Display;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::str::FromStr;

use super::{string_len, Codec, Direction};
use crate::{ArchiveError, Result};

/// Text encoder over any byte sink
pub struct TextWriter<W: Write> {
    sink: BufWriter<W>,
}

impl<W: Write> TextWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink: BufWriter::new(sink),
        }
    }

    fn line<T: Display>(&mut self, value: T) -> Result<()> {
        writeln!(self.sink, "{value}")?;
        Ok(())
    }

    /// Raw bytes terminated by a newline, skipped entirely when empty
    fn raw(&mut self, bytes: &[u8]) -> Result<()> {
        if !bytes.is_empty() {
            self.sink.write_all(bytes)?;
            self.sink.write_all(b"\n")?;
        }
        Ok(())
    }
}

impl TextWriter<File> {
    /// Create (or truncate) a file and write to it
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(File::create(path.as_ref())?))
    }
}

impl<W: Write> Codec for TextWriter<W> {
    fn direction(&self) -> Direction {
        Direction::Write
    }

    fn f64(&mut self, value: &mut f64) -> Result<()> {
        // Debug formatting is the shortest text that parses back to the same bits
        writeln!(self.sink, "{:?}", *value)?;
        Ok(())
    }

    fn i8(&mut self, value: &mut i8) -> Result<()> {
        self.line(*value)
    }

    fn i16(&mut self, value: &mut i16) -> Result<()> {
        self.line(*value)
    }

    fn i32(&mut self, value: &mut i32) -> Result<()> {
        self.line(*value)
    }

    fn i64(&mut self, value: &mut i64) -> Result<()> {
        self.line(*value)
    }

    fn u8(&mut self, value: &mut u8) -> Result<()> {
        self.line(*value)
    }

    fn u64(&mut self, value: &mut u64) -> Result<()> {
        self.line(*value)
    }

    fn bool(&mut self, value: &mut bool) -> Result<()> {
        self.line(if *value { 't' } else { 'f' })
    }

    fn string(&mut self, value: &mut String) -> Result<()> {
        self.line(string_len(value.len())?)?;
        self.raw(value.as_bytes())
    }

    fn blob(&mut self, value: &mut Option<Vec<u8>>) -> Result<()> {
        match value {
            Some(bytes) => {
                self.line(bytes.len())?;
                self.raw(bytes)
            }
            None => self.line(-1),
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.sink.flush()?;
        Ok(())
    }
}

/// Text decoder over any byte source
pub struct TextReader<R: Read> {
    source: BufReader<R>,
    line: String,
}

impl<R: Read> TextReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source: BufReader::new(source),
            line: String::new(),
        }
    }

    fn next_line(&mut self, what: &str) -> Result<&str> {
        self.line.clear();
        let read = self
            .source
            .read_line(&mut self.line)
            .map_err(|e| ArchiveError::from_read(e, what))?;
        if read == 0 {
            return Err(ArchiveError::truncated(what));
        }
        Ok(self.line.trim())
    }

    fn parse<T>(&mut self, what: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        let line = self.next_line(what)?;
        line.parse().map_err(|e| {
            ArchiveError::malformed(format!("expected {what}, found {line:?}: {e}"))
        })
    }

    /// Raw bytes followed by the newline the writer put after them
    fn raw(&mut self, len: u64, what: &str) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        if len == 0 {
            return Ok(bytes);
        }
        let with_newline = len
            .checked_add(1)
            .ok_or_else(|| ArchiveError::malformed(format!("{what} length {len} out of range")))?;
        (&mut self.source)
            .take(with_newline)
            .read_to_end(&mut bytes)
            .map_err(|e| ArchiveError::from_read(e, what))?;
        match bytes.pop() {
            Some(b'\n') if bytes.len() as u64 == len => Ok(bytes),
            Some(_) if bytes.len() as u64 == len => Err(ArchiveError::malformed(format!(
                "missing line break after {what}"
            ))),
            _ => Err(ArchiveError::truncated(what)),
        }
    }
}

impl TextReader<File> {
    /// Open a file for reading
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(File::open(path.as_ref())?))
    }
}

impl<R: Read> Codec for TextReader<R> {
    fn direction(&self) -> Direction {
        Direction::Read
    }

    fn f64(&mut self, value: &mut f64) -> Result<()> {
        *value = self.parse("f64")?;
        Ok(())
    }

    fn i8(&mut self, value: &mut i8) -> Result<()> {
        *value = self.parse("i8")?;
        Ok(())
    }

    fn i16(&mut self, value: &mut i16) -> Result<()> {
        *value = self.parse("i16")?;
        Ok(())
    }

    fn i32(&mut self, value: &mut i32) -> Result<()> {
        *value = self.parse("i32")?;
        Ok(())
    }

    fn i64(&mut self, value: &mut i64) -> Result<()> {
        *value = self.parse("i64")?;
        Ok(())
    }

    fn u8(&mut self, value: &mut u8) -> Result<()> {
        *value = self.parse("u8")?;
        Ok(())
    }

    fn u64(&mut self, value: &mut u64) -> Result<()> {
        *value = self.parse("u64")?;
        Ok(())
    }

    fn bool(&mut self, value: &mut bool) -> Result<()> {
        *value = match self.next_line("bool")? {
            "t" => true,
            "f" => false,
            other => {
                return Err(ArchiveError::malformed(format!(
                    "expected bool, found {other:?}"
                )))
            }
        };
        Ok(())
    }

    fn string(&mut self, value: &mut String) -> Result<()> {
        let len: u64 = self.parse("string length")?;
        let bytes = self.raw(len, "string")?;
        *value = String::from_utf8(bytes)
            .map_err(|e| ArchiveError::malformed(format!("invalid UTF-8 in string: {e}")))?;
        Ok(())
    }

    fn blob(&mut self, value: &mut Option<Vec<u8>>) -> Result<()> {
        let len: i64 = self.parse("blob length")?;
        *value = match len {
            -1 => None,
            len if len < -1 => {
                return Err(ArchiveError::malformed(format!("negative blob length {len}")))
            }
            len => Some(self.raw(len as u64, "blob")?),
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written(f: impl FnOnce(&mut TextWriter<&mut Vec<u8>>)) -> String {
        let mut bytes = Vec::new();
        {
            let mut writer = TextWriter::new(&mut bytes);
            f(&mut writer);
            writer.flush().unwrap();
        }
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_one_value_per_line() {
        let text = written(|w| {
            w.i32(&mut -2).unwrap();
            w.u8(&mut 200).unwrap();
            w.bool(&mut true).unwrap();
            w.bool(&mut false).unwrap();
            w.f64(&mut 0.5).unwrap();
        });
        assert_eq!(text, "-2\n200\nt\nf\n0.5\n");
    }

    #[test]
    fn test_string_layout() {
        let text = written(|w| {
            w.string(&mut "two\nlines".to_string()).unwrap();
            w.string(&mut String::new()).unwrap();
            w.i32(&mut 1).unwrap();
        });
        assert_eq!(text, "9\ntwo\nlines\n0\n1\n");

        let mut reader = TextReader::new(text.as_bytes());
        let mut s = String::new();
        reader.string(&mut s).unwrap();
        assert_eq!(s, "two\nlines");
        reader.string(&mut s).unwrap();
        assert_eq!(s, "");
        let mut i = 0;
        reader.i32(&mut i).unwrap();
        assert_eq!(i, 1);
    }

    #[test]
    fn test_blob_layout() {
        let text = written(|w| {
            w.blob(&mut None).unwrap();
            w.blob(&mut Some(b"ab".to_vec())).unwrap();
        });
        assert_eq!(text, "-1\n2\nab\n");
    }

    #[test]
    fn test_float_text_round_trips_exactly() {
        for mut v in [0.1, 1.0 / 3.0, 1e300, -2.5e-310, f64::INFINITY] {
            let text = written(|w| w.f64(&mut v).unwrap());
            let mut reader = TextReader::new(text.as_bytes());
            let mut back = 0.0;
            reader.f64(&mut back).unwrap();
            assert_eq!(back.to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_bad_bool_is_malformed() {
        let mut reader = TextReader::new(&b"x\n"[..]);
        let mut b = false;
        assert!(matches!(reader.bool(&mut b), Err(ArchiveError::Malformed(_))));
    }

    #[test]
    fn test_garbage_number_is_malformed() {
        let mut reader = TextReader::new(&b"twelve\n"[..]);
        let mut i = 0i32;
        let err = reader.i32(&mut i).unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(_)));
        assert!(err.to_string().contains("twelve"));
    }

    #[test]
    fn test_huge_string_length_is_malformed() {
        let mut reader = TextReader::new(&b"18446744073709551615\nabc\n"[..]);
        let mut s = String::new();
        let err = reader.string(&mut s).unwrap_err();
        assert!(matches!(err, ArchiveError::Malformed(_)));
        assert!(err.is_stream_failure());
    }

    #[test]
    fn test_end_of_stream_is_truncated() {
        let mut reader = TextReader::new(&b"5\nab"[..]);
        let mut s = String::new();
        assert!(matches!(
            reader.string(&mut s),
            Err(ArchiveError::Truncated(_))
        ));

        let mut reader = TextReader::new(&b""[..]);
        let mut i = 0i64;
        assert!(matches!(reader.i64(&mut i), Err(ArchiveError::Truncated(_))));
    }
}
