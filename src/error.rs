//! Error kinds returned by every fallible DTFS operation.

use core::fmt;

/// Everything that can go wrong inside the filesystem core.
///
/// Every fallible operation in this crate returns `Result<_, FsError>`
/// rather than panicking on caller-supplied bad input (missing files,
/// stale handles, a full directory, ...). Panics are reserved for
/// violated internal invariants, not for caller mistakes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    /// The free list is exhausted; no data sector was available.
    OutOfSectors,
    /// A block-device `read`/`write` call failed.
    DeviceIo,
    /// No file with the given name exists in the root directory.
    NotFound,
    /// A file with the given name already exists.
    AlreadyExists,
    /// The name is already open under another handle.
    AlreadyOpen,
    /// The handle does not refer to a currently open file.
    InvalidHandle,
    /// A name or buffer argument was invalid (empty, too long, ...).
    BadArgument,
    /// The device does not hold a formatted DTFS image.
    NotFormatted,
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FsError::OutOfSectors => write!(f, "no free sectors remain on the device"),
            FsError::DeviceIo => write!(f, "block device read or write failed"),
            FsError::NotFound => write!(f, "file not found"),
            FsError::AlreadyExists => write!(f, "file already exists"),
            FsError::AlreadyOpen => write!(f, "file is already open"),
            FsError::InvalidHandle => write!(f, "handle does not refer to an open file"),
            FsError::BadArgument => write!(f, "invalid argument"),
            FsError::NotFormatted => write!(f, "device is not formatted as DTFS"),
        }
    }
}

impl std::error::Error for FsError {}
