use alloc::string::String;
use thiserror::Error;

use crate::block_dev::DeviceError;

/// Everything a volume operation can fail with
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FsError {
    /// The name does not fit into a directory entry
    #[error("file name `{0}` is too long")]
    NameTooLong(String),
    /// Empty names and names with NUL bytes can't be stored
    #[error("`{0}` is not a valid file name")]
    InvalidName(String),
    /// No live directory entry has this name
    #[error("file `{0}` doesn't exist")]
    NotFound(String),
    /// A live directory entry already has this name
    #[error("file `{0}` already exists")]
    AlreadyExists(String),
    /// At most one handle per file descriptor
    #[error("file is already opened")]
    AlreadyOpen,
    /// Destroying a file that still has a handle
    #[error("file `{0}` is currently open")]
    FileIsOpen(String),
    /// Every file descriptor slot is taken
    #[error("no free file descriptor left")]
    NoFreeDescriptor,
    /// The open file table has no free slot
    #[error("too many open files")]
    TableFull,
    /// The bitmap has no free data block left
    #[error("no free data block left")]
    OutOfSpace,
    /// A file may only use the direct block pointers
    #[error("file can only be {max} bytes long")]
    FileTooLarge {
        /// Largest possible file size in bytes
        max: usize,
    },
    /// Seeking before the start or past the end of a file
    #[error("position {position} is out of range, file size is {size}")]
    SeekOutOfRange {
        /// Requested position
        position: i64,
        /// File size at the time of the seek
        size: usize,
    },
    /// Read started at the end of the file
    #[error("end of file")]
    EndOfFile,
    /// No tombstone to reuse and the directory file is at its size limit
    #[error("reached limit of directory entries")]
    DirectoryFull,
    /// The directory payload can't be decoded
    #[error("directory data is corrupted: {0}")]
    CorruptDirectory(&'static str),
    /// The handle does not name an open user file
    #[error("bad file handle {0}")]
    BadHandle(usize),
    /// The device geometry or mount options can't hold a volume
    #[error("invalid volume configuration: {0}")]
    InvalidConfig(&'static str),
    /// In-memory or on-disk state contradicts itself
    #[error("file system is inconsistent: {0}")]
    Inconsistent(&'static str),
    /// The block device refused an operation
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
}

impl FsError {
    /// Whether the volume can no longer be trusted after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Device(_) | FsError::Inconsistent(_))
    }
}

/// Result alias used across the crate
pub type Result<T> = core::result::Result<T, FsError>;
