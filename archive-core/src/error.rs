/*!
Error types for the archive engine.
*/

use thiserror::Error;

/// Result type used throughout the archive core.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while writing or reading an archive.
///
/// Every error is fatal for the operation in progress: the engine performs no
/// retries, and bytes already written to a sink are not rolled back.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// A pointer's runtime class is not present in the type registry
    #[error("Polymorphic type {0} not registered for archive")]
    UnregisteredType(String),

    /// Construction was requested for a type that cannot be default-constructed
    #[error("Class {0} does not provide a default constructor")]
    NoDefaultConstructor(String),

    /// The requested type is not reachable through the declared bases
    #[error("Cast not successful from {from} to {to}, some classes are not registered properly for archiving")]
    CastFailed { from: String, to: String },

    /// I/O errors from the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stream ended before a value was complete
    #[error("Truncated archive while reading {0}")]
    Truncated(String),

    /// The stream contents could not be decoded
    #[error("Malformed archive: {0}")]
    Malformed(String),

    /// A class name was registered twice
    #[error("Class {0} is already registered")]
    DuplicateClass(String),

    /// An object had to be visited while its cell was borrowed elsewhere
    #[error("Object of type {0} is already borrowed")]
    AlreadyBorrowed(String),

    /// A version string could not be parsed
    #[error("Invalid version string: {0}")]
    InvalidVersion(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON errors while loading configuration
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ArchiveError {
    /// Create a new malformed-stream error
    pub fn malformed<S: Into<String>>(msg: S) -> Self {
        Self::Malformed(msg.into())
    }

    /// Create a new truncation error
    pub fn truncated<S: Into<String>>(context: S) -> Self {
        Self::Truncated(context.into())
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new cast error
    pub fn cast_failed<S1: Into<String>, S2: Into<String>>(from: S1, to: S2) -> Self {
        Self::CastFailed {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Map an I/O error raised while reading `context`, turning an early end of
    /// stream into [`ArchiveError::Truncated`].
    pub fn from_read(err: std::io::Error, context: &str) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Self::Truncated(context.to_string())
        } else {
            Self::Io(err)
        }
    }

    /// True for failures of the byte stream itself (I/O, truncation, garbage)
    pub fn is_stream_failure(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Truncated(_) | Self::Malformed(_)
        )
    }
}
