use alloc::vec;
use core::fmt::{Debug, Formatter, Result as FmtResult};

use super::{BlockDevice, FsError, Result, BITMAP_BITS};

/* Some constants */
/// Direct block pointers per file descriptor, there is no indirect tier
pub const DIRECT_COUNT: usize = 3;
/// Block pointer value of a slot that points nowhere.
/// Block 0 is the bitmap, so no data block can ever be 0.
pub const BLOCK_UNUSED: u32 = 0;
/// Width of the zero-padded name field of a directory entry
pub const NAME_LEN: usize = 12;
/// fd index of a tombstoned directory entry
pub const UNUSED_ENTRY: i32 = -1;
/// File descriptor of the root directory
pub const ROOT_FD: usize = 0;
// Bitmap lives in block 0, descriptors start right after it
const FD_AREA_START: usize = 1;

/**
    [FileDescriptor_Description]:
    Each file is stored as a FileDescriptor on disk: its size followed
    by its direct block pointers, all big-endian `u32`.
*/
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FileDescriptor {
    /// file size in bytes
    pub size: u32,
    /// absolute block ids, [`BLOCK_UNUSED`] for empty slots
    pub blocks: [u32; DIRECT_COUNT],
}

impl FileDescriptor {
    /// Bytes taken by one packed record
    pub const SIZE: usize = 4 * (1 + DIRECT_COUNT);

    /// A free record: no size and no blocks
    pub const fn empty() -> Self {
        Self {
            size: 0,
            blocks: [BLOCK_UNUSED; DIRECT_COUNT],
        }
    }

    /// A record that no file owns
    pub fn is_unused(&self) -> bool {
        self.size == 0 && self.blocks.iter().all(|&block| block == BLOCK_UNUSED)
    }

    /// Block ids actually allocated to this file
    pub fn used_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.blocks
            .iter()
            .copied()
            .filter(|&block| block != BLOCK_UNUSED)
    }

    /// Decode the record found at `offset` in a descriptor block
    pub fn parse(block: &[u8], offset: usize) -> Self {
        let mut blocks = [BLOCK_UNUSED; DIRECT_COUNT];
        for (i, block_id) in blocks.iter_mut().enumerate() {
            *block_id = read_u32(block, offset + 4 * (i + 1));
        }
        Self {
            size: read_u32(block, offset),
            blocks,
        }
    }

    /// Encode the record at `offset` in a descriptor block
    pub fn write_to(&self, block: &mut [u8], offset: usize) {
        write_u32(block, offset, self.size);
        for (i, &block_id) in self.blocks.iter().enumerate() {
            write_u32(block, offset + 4 * (i + 1), block_id);
        }
    }
}

/**
    [DirEntry_Description]:
    The directory is a sequence of these, each a zero-padded name and the
    index of the descriptor it is bound to. Tombstones keep their name bytes.
*/
#[derive(Clone, PartialEq, Eq)]
pub struct DirEntry {
    name: [u8; NAME_LEN],
    fd_index: i32,
}

impl DirEntry {
    /// Bytes taken by one serialized entry
    pub const SIZE: usize = NAME_LEN + 4;

    /// Bind `name` to `fd_index`, the name must already be validated
    pub fn new(name: &str, fd_index: usize) -> Self {
        let mut entry = Self {
            name: [0u8; NAME_LEN],
            fd_index: UNUSED_ENTRY,
        };
        entry.bind(name, fd_index);
        entry
    }

    pub(crate) fn bind(&mut self, name: &str, fd_index: usize) {
        self.name = [0u8; NAME_LEN];
        self.name[..name.len()].copy_from_slice(name.as_bytes());
        self.fd_index = fd_index as i32;
    }

    pub(crate) fn tombstone(&mut self) {
        self.fd_index = UNUSED_ENTRY;
    }

    /// Name with the padding stripped
    pub fn name(&self) -> &str {
        core::str::from_utf8(self.name_bytes()).unwrap_or_default()
    }

    fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&c| c == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }

    /// Bound descriptor, `None` for a tombstone
    pub fn fd_index(&self) -> Option<usize> {
        usize::try_from(self.fd_index).ok()
    }

    /// Whether this slot is a tombstone
    pub fn is_unused(&self) -> bool {
        self.fd_index == UNUSED_ENTRY
    }

    /// Decode one entry, `bytes` must be [`DirEntry::SIZE`] long
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(FsError::CorruptDirectory("truncated entry"));
        }
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&bytes[..NAME_LEN]);
        let fd_index = read_u32(bytes, NAME_LEN) as i32;
        let entry = Self { name, fd_index };
        if fd_index < UNUSED_ENTRY {
            return Err(FsError::CorruptDirectory("negative descriptor index"));
        }
        if core::str::from_utf8(entry.name_bytes()).is_err() {
            return Err(FsError::CorruptDirectory("name is not utf-8"));
        }
        Ok(entry)
    }

    /// Encode one entry
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[..NAME_LEN].copy_from_slice(&self.name);
        write_u32(&mut bytes, NAME_LEN, self.fd_index as u32);
        bytes
    }
}

impl Debug for DirEntry {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("DirEntry")
            .field("name", &self.name())
            .field("fd_index", &self.fd_index)
            .finish()
    }
}

/// Check that `name` fits into a directory entry
pub fn validate_name(name: &str) -> Result<()> {
    if name.len() > NAME_LEN {
        return Err(FsError::NameTooLong(name.into()));
    }
    if name.is_empty() || name.contains('\0') {
        return Err(FsError::InvalidName(name.into()));
    }
    Ok(())
}

/**
    [Layout_Description]:
    Where everything lives on a device of a given geometry.

    | block 0 | blocks 1..reserved | blocks reserved..count |
    | bitmap  | packed descriptors | data                   |
*/
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    block_size: usize,
    block_count: usize,
    max_files: usize,
    reserved_blocks: usize,
}

impl Debug for Layout {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Layout")
            .field("block_size", &self.block_size)
            .field("block_count", &self.block_count)
            .field("max_files", &self.max_files)
            .field("reserved_blocks", &self.reserved_blocks)
            .field("data_capacity", &self.data_capacity())
            .finish()
    }
}

impl Layout {
    /// Lay out a device; `max_files` defaults to one descriptor per
    /// directory entry plus the root
    pub fn new(block_size: usize, block_count: usize, max_files: Option<usize>) -> Result<Self> {
        if block_size == 0 || block_size % FileDescriptor::SIZE != 0 {
            return Err(FsError::InvalidConfig(
                "block size must be a non-zero multiple of 16",
            ));
        }
        // file sizes are stored as u32
        match block_size.checked_mul(DIRECT_COUNT) {
            Some(max_size) if max_size <= u32::MAX as usize => {}
            _ => return Err(FsError::InvalidConfig("block size is too large")),
        }
        let max_files = max_files.unwrap_or(1 + Self::entries_per_dir(block_size));
        if max_files == 0 {
            return Err(FsError::InvalidConfig("at least the root descriptor is needed"));
        }
        let fd_blocks = max_files
            .checked_mul(FileDescriptor::SIZE)
            .ok_or(FsError::InvalidConfig("too many descriptors"))?
            .div_ceil(block_size);
        let reserved_blocks = FD_AREA_START + fd_blocks;
        if reserved_blocks >= block_count {
            return Err(FsError::InvalidConfig("device has no room for data blocks"));
        }
        if block_count > u32::MAX as usize {
            return Err(FsError::InvalidConfig("block ids must fit in 32 bits"));
        }
        let layout = Self {
            block_size,
            block_count,
            max_files,
            reserved_blocks,
        };
        if block_count - reserved_blocks > BITMAP_BITS {
            log::warn!(
                "only {} of {} data blocks are reachable through the bitmap",
                BITMAP_BITS,
                block_count - reserved_blocks
            );
        }
        Ok(layout)
    }

    fn entries_per_dir(block_size: usize) -> usize {
        DIRECT_COUNT * block_size / DirEntry::SIZE
    }

    /// Device block size
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Device block count
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    /// Descriptor slots, the root included
    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Bitmap block plus descriptor blocks
    pub fn reserved_blocks(&self) -> usize {
        self.reserved_blocks
    }

    /// Largest file in bytes
    pub fn max_file_size(&self) -> usize {
        DIRECT_COUNT * self.block_size
    }

    /// Entries the directory file can hold
    pub fn dir_capacity(&self) -> usize {
        Self::entries_per_dir(self.block_size)
    }

    /// Data blocks that are both on the device and tracked by the bitmap
    pub fn data_capacity(&self) -> usize {
        (self.block_count - self.reserved_blocks).min(BITMAP_BITS)
    }

    /// Get descriptor position by fd index: (block id, offset in block)
    pub fn fd_pos(&self, fd_index: usize) -> (usize, usize) {
        let offset = fd_index * FileDescriptor::SIZE;
        (
            FD_AREA_START + offset / self.block_size,
            offset % self.block_size,
        )
    }

    /// Get global block id by bitmap index
    pub fn data_block_id(&self, data_index: usize) -> u32 {
        (self.reserved_blocks + data_index) as u32
    }

    /// Get bitmap index by global block id
    pub fn data_index(&self, block_id: u32) -> Option<usize> {
        (block_id as usize)
            .checked_sub(self.reserved_blocks)
            .filter(|&index| index < self.data_capacity())
    }

    /// Read descriptor `fd_index` from disk
    pub fn read_fd(&self, block_device: &dyn BlockDevice, fd_index: usize) -> Result<FileDescriptor> {
        let (block_id, offset) = self.fd_pos(fd_index);
        let mut block = vec![0u8; self.block_size];
        block_device.read_block(block_id, &mut block)?;
        Ok(FileDescriptor::parse(&block, offset))
    }

    /// Write descriptor `fd_index` to disk, leaving its neighbours alone
    pub fn write_fd(
        &self,
        block_device: &dyn BlockDevice,
        fd_index: usize,
        fd: &FileDescriptor,
    ) -> Result<()> {
        let (block_id, offset) = self.fd_pos(fd_index);
        let mut block = vec![0u8; self.block_size];
        block_device.read_block(block_id, &mut block)?;
        fd.write_to(&mut block, offset);
        block_device.write_block(block_id, &block)?;
        Ok(())
    }

    /**
        Find the first free descriptor, reading each descriptor block once.
        A descriptor is free when its record is unused and `is_bound`
        says no directory entry refers to it. The root is never free.
    */
    pub fn find_free_fd(
        &self,
        block_device: &dyn BlockDevice,
        mut is_bound: impl FnMut(usize) -> bool,
    ) -> Result<usize> {
        let per_block = self.block_size / FileDescriptor::SIZE;
        let mut block = vec![0u8; self.block_size];
        for block_id in FD_AREA_START..self.reserved_blocks {
            block_device.read_block(block_id, &mut block)?;
            for slot in 0..per_block {
                let fd_index = (block_id - FD_AREA_START) * per_block + slot;
                if fd_index >= self.max_files {
                    return Err(FsError::NoFreeDescriptor);
                }
                if fd_index == ROOT_FD {
                    continue;
                }
                let fd = FileDescriptor::parse(&block, slot * FileDescriptor::SIZE);
                if fd.is_unused() && !is_bound(fd_index) {
                    return Ok(fd_index);
                }
            }
        }
        Err(FsError::NoFreeDescriptor)
    }
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[offset..offset + 4]);
    u32::from_be_bytes(bytes)
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
