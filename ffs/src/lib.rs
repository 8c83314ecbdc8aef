//! A flat file system isolated from the kernel
//!
//! One volume, one directory, files of at most [`DIRECT_COUNT`] blocks.
//! Block 0 holds the data bitmap, the following reserved blocks hold packed
//! file descriptors, and everything after that is data. The root directory is
//! itself file descriptor 0 and is read and written through the same buffered
//! path as ordinary files.
#![no_std]
#![deny(missing_docs)]

extern crate alloc;

mod bitmap;
mod block_dev;
mod directory;
mod error;
mod ffs;
mod layout;
mod oft;


pub use bitmap::{Bitmap, BITMAP_BITS};
pub use block_dev::{BlockDevice, DeviceError, RamDisk};
pub use directory::Directory;
pub use error::{FsError, Result};
pub use ffs::{FileInfo, FlatFileSystem, FsConfig, SharedFileSystem, ROOT_HANDLE};
pub use layout::{
    DirEntry, FileDescriptor, Layout, BLOCK_UNUSED, DIRECT_COUNT, NAME_LEN, ROOT_FD, UNUSED_ENTRY,
};
