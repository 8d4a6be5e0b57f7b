//! Configuration for selecting the wire encoding of an archive
//!
//! This module provides the configuration structures for choosing between the
//! binary and text codecs, and factory functions that open an [`Archive`]
//! session over the configured codec.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;

use crate::archive::Archive;
use crate::codec::{BinaryReader, BinaryWriter, TextReader, TextWriter, DEFAULT_BUFFER_SIZE};
use crate::registry::TypeRegistry;
use crate::version::VersionTable;
use crate::{ArchiveError, Result};

/// Smallest accepted binary write buffer
pub const MIN_BUFFER_SIZE: usize = 8;

/// Enumeration of supported wire encodings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// Raw native-endian values, buffered
    #[default]
    Binary,
    /// One decimal value per line
    Text,
}

impl Format {
    /// Guess the format from a file name: `.txt` is text, anything else binary
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        match path.as_ref().extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("txt") => Format::Text,
            _ => Format::Binary,
        }
    }
}

/// Configuration structure for archive sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// The wire encoding to use
    pub format: Format,
    /// Binary write buffer capacity in bytes (ignored by the text codec)
    pub buffer_size: usize,
}

impl ArchiveConfig {
    /// Binary configuration with the default buffer
    pub fn binary() -> Self {
        ArchiveConfig {
            format: Format::Binary,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Text configuration
    pub fn text() -> Self {
        ArchiveConfig {
            format: Format::Text,
            ..Self::binary()
        }
    }

    /// Configuration matching a file name
    pub fn for_path<P: AsRef<Path>>(path: P) -> Self {
        ArchiveConfig {
            format: Format::from_path(path),
            ..Self::binary()
        }
    }

    /// Parse a JSON configuration; missing fields take their defaults
    ///
    /// # Example
    /// ```rust
    /// use archive_core::{ArchiveConfig, Format};
    ///
    /// let config = ArchiveConfig::from_json(r#"{"format": "text"}"#)?;
    /// assert_eq!(config.format, Format::Text);
    /// # Ok::<(), archive_core::ArchiveError>(())
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ArchiveConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.format == Format::Binary && self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ArchiveError::config(format!(
                "binary buffer must hold at least {MIN_BUFFER_SIZE} bytes, got {}",
                self.buffer_size
            )));
        }
        Ok(())
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::binary()
    }
}

/// Open a writing session over `sink` using the configured codec
///
/// # Arguments
/// * `config` - Encoding and buffering settings
/// * `sink` - Destination of the archive bytes
/// * `registry` - Registered polymorphic classes
/// * `versions` - Version table written as the header
pub fn open_writer<'a, W: Write + 'a>(
    config: &ArchiveConfig,
    sink: W,
    registry: &'a TypeRegistry,
    versions: VersionTable,
) -> Result<Archive<'a>> {
    config.validate()?;
    match config.format {
        Format::Binary => Archive::with_versions(
            BinaryWriter::with_buffer_size(sink, config.buffer_size),
            registry,
            versions,
        ),
        Format::Text => Archive::with_versions(TextWriter::new(sink), registry, versions),
    }
}

/// Open a reading session over `source` using the configured codec
pub fn open_reader<'a, R: Read + 'a>(
    config: &ArchiveConfig,
    source: R,
    registry: &'a TypeRegistry,
) -> Result<Archive<'a>> {
    config.validate()?;
    match config.format {
        Format::Binary => Archive::new(BinaryReader::new(source), registry),
        Format::Text => Archive::new(TextReader::new(source), registry),
    }
}
