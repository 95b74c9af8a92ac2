//! Error types for VenomBroadcast

use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for VenomBroadcast operations
pub type Result<T> = std::result::Result<T, BroadcastError>;

/// Kind of access requested on a shared memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Shared access, many readers at once
    Read,
    /// Exclusive access, a single writer
    Write,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::Read => f.write_str("read"),
            Access::Write => f.write_str("write"),
        }
    }
}

/// Errors that can occur in VenomBroadcast operations
#[derive(Debug, Error)]
pub enum BroadcastError {
    /// Failed to create shared memory
    #[error("Failed to create shared memory '{name}': {source}")]
    ShmCreate {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to open shared memory
    #[error("Failed to open shared memory '{name}': {source}")]
    ShmOpen {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to unlink shared memory
    #[error("Failed to unlink shared memory '{name}': {source}")]
    Unlink {
        name: String,
        #[source]
        source: io::Error,
    },

    /// Failed to map memory
    #[error("Failed to map memory: {0}")]
    Mmap(#[source] io::Error),

    /// Failed to truncate shared memory
    #[error("Failed to set shared memory size: {0}")]
    Truncate(#[source] io::Error),

    /// Lock syscall failed for a reason other than contention
    #[error("Failed to lock shared memory: {0}")]
    Lock(#[source] io::Error),

    /// Lock could not be acquired within the bounded wait
    #[error("Could not acquire {access} access within {timeout:?}")]
    LockTimeout { access: Access, timeout: Duration },

    /// Namespace too long
    #[error("Namespace too long: max {max} chars, got {got}")]
    NamespaceTooLong { max: usize, got: usize },

    /// Namespace contains a character shm_open cannot take
    #[error("Invalid namespace '{0}': must be non-empty and contain no '/' or NUL")]
    InvalidName(String),

    /// Existing region is smaller than the layout requires
    #[error("Shared memory too small: need {required} bytes, region has {actual}")]
    RegionTooSmall { required: usize, actual: usize },

    /// Region does not start with the broadcast magic
    #[error("Invalid broadcast magic: expected {expected:?}, got {got:?}")]
    InvalidMagic { expected: [u8; 5], got: [u8; 5] },

    /// Region was laid out by an incompatible format version
    #[error("Incompatible broadcast version: supported {supported}, found {found}")]
    IncompatibleVersion { supported: u32, found: u32 },

    /// Requested capacity does not fit in the address space
    #[error("Broadcast queue capacity {capacity} is too large")]
    CapacityTooLarge { capacity: usize },

    /// Region queue was created with a different capacity
    #[error("Broadcast queue capacity mismatch: requested {requested}, region has {found}")]
    CapacityMismatch { requested: usize, found: usize },

    /// Field access would fall outside the region
    #[error("Out of bounds: {len} bytes at offset {offset} in a {size} byte region")]
    OutOfBounds {
        offset: usize,
        len: usize,
        size: usize,
    },

    /// Ring bookkeeping does not fit the bytes it lives in
    #[error("Corrupt broadcast queue: {0}")]
    CorruptQueue(String),

    /// Channel is already created
    #[error("Broadcast channel is already created")]
    AlreadyCreated,

    /// Channel was not created
    #[error("Broadcast channel is not created")]
    NotCreated,

    /// Channel was destroyed and cannot be reused
    #[error("Broadcast channel was destroyed")]
    Destroyed,
}

impl BroadcastError {
    /// True for failures a caller may simply retry
    pub fn is_timeout(&self) -> bool {
        matches!(self, BroadcastError::LockTimeout { .. })
    }

    /// True if creating a region failed because the name is taken
    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            BroadcastError::ShmCreate { source, .. } if source.kind() == io::ErrorKind::AlreadyExists
        )
    }
}
