/*!
    The open file table keeps, per open file, a cached descriptor and a
    one-block buffer mirroring the last block touched. Switching blocks
    writes a dirty buffer back before the next block is fetched.
*/
use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::layout::{FileDescriptor, Layout, BLOCK_UNUSED, DIRECT_COUNT};
use crate::{BlockDevice, FsError, Result};

/// Cached state of one open file
#[derive(Debug)]
pub struct OpenFile {
    fd_index: usize,
    fd: FileDescriptor,
    position: usize,
    buffer: Box<[u8]>,
    // Logical block of the file the buffer mirrors, None until the first fetch
    buffer_block: Option<usize>,
    dirty_buffer: bool,
    dirty_fd: bool,
}

impl OpenFile {
    fn new(fd_index: usize, fd: FileDescriptor, position: usize, block_size: usize) -> Self {
        Self {
            fd_index,
            fd,
            position,
            buffer: vec![0u8; block_size].into_boxed_slice(),
            buffer_block: None,
            dirty_buffer: false,
            dirty_fd: false,
        }
    }

    pub fn fd_index(&self) -> usize {
        self.fd_index
    }

    pub fn size(&self) -> usize {
        self.fd.size as usize
    }

    pub fn position(&self) -> usize {
        self.position
    }

    fn block_size(&self) -> usize {
        self.buffer.len()
    }

    fn block_id(&self, logical: usize) -> Result<usize> {
        match self.fd.blocks[logical] {
            BLOCK_UNUSED => Err(FsError::Inconsistent("file block is not allocated")),
            block_id => Ok(block_id as usize),
        }
    }

    /// Write the buffer back to its block if it holds unsaved data
    pub fn flush_buffer(&mut self, block_device: &dyn BlockDevice) -> Result<()> {
        if !self.dirty_buffer {
            return Ok(());
        }
        let logical = self
            .buffer_block
            .ok_or(FsError::Inconsistent("dirty buffer without a block"))?;
        let block_id = self.block_id(logical)?;
        log::trace!("fd {}: flush block {}", self.fd_index, block_id);
        block_device.write_block(block_id, &self.buffer)?;
        self.dirty_buffer = false;
        Ok(())
    }

    /// Write the cached descriptor back if it changed
    pub fn flush_fd(&mut self, block_device: &dyn BlockDevice, layout: &Layout) -> Result<()> {
        if self.dirty_fd {
            layout.write_fd(block_device, self.fd_index, &self.fd)?;
            self.dirty_fd = false;
        }
        Ok(())
    }

    /// Flush buffer and descriptor, data first so the descriptor never
    /// points at blocks holding stale bytes
    pub fn sync(&mut self, block_device: &dyn BlockDevice, layout: &Layout) -> Result<()> {
        self.flush_buffer(block_device)?;
        self.flush_fd(block_device, layout)
    }

    /// Make the buffer mirror logical block `logical`
    fn fetch(&mut self, logical: usize, block_device: &dyn BlockDevice) -> Result<()> {
        if self.buffer_block == Some(logical) {
            return Ok(());
        }
        self.flush_buffer(block_device)?;
        let block_id = self.block_id(logical)?;
        log::trace!("fd {}: fetch block {}", self.fd_index, block_id);
        block_device.read_block(block_id, &mut self.buffer)?;
        self.buffer_block = Some(logical);
        Ok(())
    }

    /// Attach a freshly allocated block as logical block `logical`.
    /// Its old contents are never read, the buffer starts out zeroed.
    fn attach(&mut self, logical: usize, block_id: u32, block_device: &dyn BlockDevice) -> Result<()> {
        self.flush_buffer(block_device)?;
        self.fd.blocks[logical] = block_id;
        self.dirty_fd = true;
        self.buffer.fill(0);
        self.buffer_block = Some(logical);
        self.dirty_buffer = true;
        Ok(())
    }

    /**
        Copy bytes from the current position into `buf`, stopping at the
        end of the file. Reading at the end of the file is an error so a
        caller can tell it apart from an empty request.
    */
    pub fn read(&mut self, buf: &mut [u8], block_device: &dyn BlockDevice) -> Result<usize> {
        let size = self.size();
        if self.position >= size {
            return Err(FsError::EndOfFile);
        }
        let block_size = self.block_size();
        let mut read = 0;
        while read < buf.len() && self.position < size {
            self.fetch(self.position / block_size, block_device)?;
            let offset = self.position % block_size;
            let count = (block_size - offset)
                .min(size - self.position)
                .min(buf.len() - read);
            buf[read..read + count].copy_from_slice(&self.buffer[offset..offset + count]);
            read += count;
            self.position += count;
        }
        Ok(read)
    }

    /**
        Copy `data` into the file at the current position, growing it as
        needed. `alloc_block` hands out a new block id whenever the position
        enters a block the file doesn't own yet.

        `written` keeps counting even when an error stops the loop, so the
        caller knows how much was committed to the buffer and descriptor.
    */
    pub fn write(
        &mut self,
        data: &[u8],
        block_device: &dyn BlockDevice,
        mut alloc_block: impl FnMut() -> Result<u32>,
        written: &mut usize,
    ) -> Result<()> {
        let block_size = self.block_size();
        while *written < data.len() {
            let logical = self.position / block_size;
            if logical >= DIRECT_COUNT {
                return Err(FsError::FileTooLarge {
                    max: DIRECT_COUNT * block_size,
                });
            }
            if self.fd.blocks[logical] == BLOCK_UNUSED {
                let block_id = alloc_block()?;
                self.attach(logical, block_id, block_device)?;
            } else {
                self.fetch(logical, block_device)?;
            }

            let offset = self.position % block_size;
            let count = (block_size - offset).min(data.len() - *written);
            self.buffer[offset..offset + count].copy_from_slice(&data[*written..*written + count]);
            self.dirty_buffer = true;
            *written += count;
            self.position += count;
            if self.position > self.size() {
                self.fd.size = self.position as u32;
                self.dirty_fd = true;
            }
        }
        Ok(())
    }

    /**
        Move to `position`, which may be at most the file size.
        Leaving the buffered block writes it back; the next block is only
        fetched by the read or write that needs it.
    */
    pub fn seek(&mut self, position: usize, block_device: &dyn BlockDevice) -> Result<()> {
        let size = self.size();
        if position > size {
            return Err(FsError::SeekOutOfRange {
                position: i64::try_from(position).unwrap_or(i64::MAX),
                size,
            });
        }
        if self.buffer_block != Some(position / self.block_size()) {
            self.flush_buffer(block_device)?;
        }
        self.position = position;
        Ok(())
    }
}

/// Table of open files, this is kept in RAM
#[derive(Debug)]
pub struct OpenFileTable {
    slots: Vec<Option<OpenFile>>,
    block_size: usize,
}

impl OpenFileTable {
    pub fn new(capacity: usize, block_size: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self { slots, block_size }
    }

    /// Open `fd_index` in the first free slot and return the slot as handle
    pub fn allocate(&mut self, fd_index: usize, fd: FileDescriptor, position: usize) -> Result<usize> {
        if self.is_open(fd_index) {
            return Err(FsError::AlreadyOpen);
        }
        let handle = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::TableFull)?;
        self.slots[handle] = Some(OpenFile::new(fd_index, fd, position, self.block_size));
        Ok(handle)
    }

    /// Release a slot, dropping whatever it cached
    pub fn deallocate(&mut self, handle: usize) -> Option<OpenFile> {
        self.slots.get_mut(handle)?.take()
    }

    pub fn is_open(&self, fd_index: usize) -> bool {
        self.files().any(|file| file.fd_index == fd_index)
    }

    pub fn get(&self, handle: usize) -> Option<&OpenFile> {
        self.slots.get(handle)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: usize) -> Option<&mut OpenFile> {
        self.slots.get_mut(handle)?.as_mut()
    }

    pub fn files(&self) -> impl Iterator<Item = &OpenFile> + '_ {
        self.slots.iter().flatten()
    }

    pub fn files_mut(&mut self) -> impl Iterator<Item = &mut OpenFile> + '_ {
        self.slots.iter_mut().flatten()
    }
}
