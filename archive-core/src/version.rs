/*!
Library version records stored in every archive header.

Libraries that archive their types record their version here so that readers
can implement backwards compatibility. The engine itself never interprets the
versions; it writes the table once at the start of a session and hands the table
read back from a stream to the caller.
*/

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{ArchiveError, Result};

/// Mapping from library name to its version, ordered by name
pub type VersionTable = BTreeMap<String, VersionInfo>;

/// Process-wide table of registered library versions
static LIBRARY_VERSIONS: Lazy<RwLock<VersionTable>> = Lazy::new(|| RwLock::new(VersionTable::new()));

/// Semantic version record of a library
///
/// The text form is `major.minor.patch` with an optional `-suffix`, and an
/// optional leading `v` is accepted when parsing.
///
/// # Example
/// ```rust
/// use archive_core::VersionInfo;
///
/// let version: VersionInfo = "v6.2.2304-12-gabc".parse()?;
/// assert_eq!(version.major, 6);
/// assert_eq!(version.suffix.as_deref(), Some("12-gabc"));
/// assert_eq!(version.to_string(), "6.2.2304-12-gabc");
/// # Ok::<(), archive_core::ArchiveError>(())
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    /// Free-form pre-release or build suffix
    pub suffix: Option<String>,
}

impl VersionInfo {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            suffix: None,
        }
    }

    /// Set the pre-release or build suffix
    pub fn with_suffix<S: Into<String>>(mut self, suffix: S) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

/// Suffixed versions are pre-releases and order before the plain release
impl Ord for VersionInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for VersionInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "-{suffix}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionInfo {
    type Err = ArchiveError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let (numbers, suffix) = match trimmed.split_once('-') {
            Some((numbers, suffix)) => (numbers, Some(suffix.to_string())),
            None => (trimmed, None),
        };

        let mut parts = numbers.split('.');
        let mut component = |required: bool| -> Result<u32> {
            match parts.next() {
                Some(part) => part
                    .parse()
                    .map_err(|_| ArchiveError::InvalidVersion(s.to_string())),
                None if required => Err(ArchiveError::InvalidVersion(s.to_string())),
                None => Ok(0),
            }
        };
        let major = component(true)?;
        let minor = component(false)?;
        let patch = component(false)?;
        if parts.next().is_some() {
            return Err(ArchiveError::InvalidVersion(s.to_string()));
        }

        Ok(Self {
            major,
            minor,
            patch,
            suffix,
        })
    }
}

/// Record the version of `library` in the process-wide table
///
/// Archives opened without an explicit table write a snapshot of this table as
/// their header.
pub fn set_library_version<S: Into<String>>(library: S, version: VersionInfo) {
    let mut table = match LIBRARY_VERSIONS.write() {
        Ok(table) => table,
        Err(poisoned) => poisoned.into_inner(),
    };
    table.insert(library.into(), version);
}

/// Look up the version of `library` in the process-wide table
pub fn library_version(library: &str) -> Option<VersionInfo> {
    let table = match LIBRARY_VERSIONS.read() {
        Ok(table) => table,
        Err(poisoned) => poisoned.into_inner(),
    };
    table.get(library).cloned()
}

/// Snapshot of the process-wide version table
pub fn library_versions() -> VersionTable {
    let table = match LIBRARY_VERSIONS.read() {
        Ok(table) => table,
        Err(poisoned) => poisoned.into_inner(),
    };
    table.clone()
}
