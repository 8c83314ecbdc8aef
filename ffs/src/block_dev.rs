use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;

use spin::Mutex;
use thiserror::Error;

/// Errors reported by a block device
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The block id is not in `[0, block_count)`
    #[error("block {block_id} is out of range, device has {block_count} blocks")]
    OutOfRange {
        /// Requested block
        block_id: usize,
        /// Blocks on the device
        block_count: usize,
    },
    /// Transfers always move exactly one block
    #[error("buffer holds {actual} bytes, a block is {expected} bytes")]
    BufferSize {
        /// Device block size
        expected: usize,
        /// Length of the caller's buffer
        actual: usize,
    },
}

/// BlockDevice is implemented by outer flat-fs user
pub trait BlockDevice: Send + Sync + Any {
    /// Size of every block in bytes
    fn block_size(&self) -> usize;
    /// Number of addressable blocks
    fn block_count(&self) -> usize;
    /// Copy block `block_id` into `buf`, which must be one block long
    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError>;
    /// Copy `buf`, which must be one block long, into block `block_id`
    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError>;
}

/// A zero-filled block device kept in memory
pub struct RamDisk {
    block_size: usize,
    blocks: Mutex<Vec<u8>>,
}

impl RamDisk {
    /// Create a device of `block_count` blocks of `block_size` bytes
    pub fn new(block_count: usize, block_size: usize) -> Self {
        Self {
            block_size,
            blocks: Mutex::new(vec![0u8; block_count * block_size]),
        }
    }

    fn range(&self, block_id: usize, len: usize) -> Result<core::ops::Range<usize>, DeviceError> {
        let block_count = self.block_count();
        if block_id >= block_count {
            return Err(DeviceError::OutOfRange {
                block_id,
                block_count,
            });
        }
        if len != self.block_size {
            return Err(DeviceError::BufferSize {
                expected: self.block_size,
                actual: len,
            });
        }
        let start = block_id * self.block_size;
        Ok(start..start + self.block_size)
    }
}

impl BlockDevice for RamDisk {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn block_count(&self) -> usize {
        match self.block_size {
            0 => 0,
            size => self.blocks.lock().len() / size,
        }
    }

    fn read_block(&self, block_id: usize, buf: &mut [u8]) -> Result<(), DeviceError> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.blocks.lock()[range]);
        Ok(())
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) -> Result<(), DeviceError> {
        let range = self.range(block_id, buf.len())?;
        self.blocks.lock()[range].copy_from_slice(buf);
        Ok(())
    }
}
