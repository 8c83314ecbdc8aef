/*!
    The FlatFileSystem owns the bitmap, the directory and the open file
    table of one mounted volume and coordinates them to serve file
    operations. Handle 0 is the root directory itself; it stays open for
    the lifetime of the mount and directory changes are written through it.
*/
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::fmt::{Debug, Formatter, Result as FmtResult};

use spin::Mutex;

use super::{Bitmap, BlockDevice, Directory, FsError, Result};
use crate::layout::{validate_name, DirEntry, FileDescriptor, Layout, ROOT_FD};
use crate::oft::{OpenFile, OpenFileTable};

/// Handle of the root directory, never handed out to users
pub const ROOT_HANDLE: usize = 0;

const BITMAP_BLOCK: usize = 0;
const DEFAULT_OPEN_FILES: usize = 25;

/// Mount options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsConfig {
    /// Descriptor slots including the root, derived from the block size if unset
    pub max_files: Option<usize>,
    /// Open file table capacity including the root directory
    pub open_files: usize,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            max_files: None,
            open_files: DEFAULT_OPEN_FILES,
        }
    }
}

/// One line of a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File name
    pub name: String,
    /// File size in bytes
    pub size: usize,
}

/// A mounted volume behind one lock, for callers on several threads
pub type SharedFileSystem = Arc<Mutex<FlatFileSystem>>;

///A flat filesystem on block device
pub struct FlatFileSystem {
    block_device: Arc<dyn BlockDevice>,
    layout: Layout,
    bitmap: Bitmap,
    directory: Directory,
    oft: OpenFileTable,
}

impl Debug for FlatFileSystem {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("FlatFileSystem")
            .field("layout", &self.layout)
            .field("bitmap", &self.bitmap)
            .field("directory", &self.directory)
            .field("oft", &self.oft)
            .finish()
    }
}

/* core methods */
impl FlatFileSystem {
    /**
        Mount the volume on `block_device`.

        A device whose root descriptor is unused gets formatted: bitmap and
        descriptor area are zeroed and the directory starts empty. Otherwise
        the bitmap is loaded and the directory is read back from the root file.
    */
    pub fn mount(block_device: Arc<dyn BlockDevice>, config: FsConfig) -> Result<Self> {
        let layout = Layout::new(
            block_device.block_size(),
            block_device.block_count(),
            config.max_files,
        )?;
        if config.open_files == 0 {
            return Err(FsError::InvalidConfig("open file table can't be empty"));
        }
        let root_fd = layout.read_fd(&*block_device, ROOT_FD)?;
        let mut fs = Self {
            block_device,
            layout,
            bitmap: Bitmap::default(),
            directory: Directory::new(layout.dir_capacity()),
            oft: OpenFileTable::new(config.open_files, layout.block_size()),
        };

        if root_fd.is_unused() {
            fs.format()?;
        } else {
            fs.bitmap = Self::load_bitmap(&*fs.block_device, &fs.layout)?;
        }

        let root = fs.oft.allocate(ROOT_FD, root_fd, 0)?;
        debug_assert_eq!(root, ROOT_HANDLE);

        let dir_size = root_fd.size as usize;
        if dir_size > layout.max_file_size() {
            return Err(FsError::CorruptDirectory("larger than a file can be"));
        }
        if dir_size > 0 {
            let mut bytes = vec![0u8; dir_size];
            let block_device = Arc::clone(&fs.block_device);
            fs.root()?.read(&mut bytes, &*block_device)?;
            fs.directory = Directory::from_bytes(&bytes, layout.dir_capacity())?;
            log::info!(
                "volume restored: {} directory slots, {} data blocks in use",
                fs.directory.len(),
                fs.bitmap.used()
            );
        }
        Ok(fs)
    }

    fn format(&mut self) -> Result<()> {
        log::info!("formatting volume: {:?}", self.layout);
        let zero = vec![0u8; self.layout.block_size()];
        for block_id in BITMAP_BLOCK + 1..self.layout.reserved_blocks() {
            self.block_device.write_block(block_id, &zero)?;
        }
        self.bitmap = Bitmap::default();
        Self::store_bitmap(&*self.block_device, &self.layout, &self.bitmap)
    }

    /**
        Create an empty file called `name`.

        The descriptor is claimed and written before the directory entry
        that refers to it; the entry is written last.
    */
    pub fn create(&mut self, name: &str) -> Result<()> {
        validate_name(name)?;
        if self.directory.find_entry(name).is_ok() {
            return Err(FsError::AlreadyExists(name.into()));
        }
        let directory = &self.directory;
        let fd_index = self
            .layout
            .find_free_fd(&*self.block_device, |fd_index| directory.is_bound(fd_index))?;

        let slots = self.directory.len();
        let entry = self.directory.create_entry(name, fd_index)?;
        let persisted = self
            .layout
            .write_fd(&*self.block_device, fd_index, &FileDescriptor::empty())
            .and_then(|()| self.persist_entry(entry));
        if let Err(err) = persisted {
            // keep memory in line with what reached the disk
            if self.directory.len() > slots {
                self.directory.truncate(slots);
            } else {
                self.directory.remove_entry(entry);
            }
            return Err(err);
        }
        log::debug!("created `{}` with fd {} in slot {}", name, fd_index, entry);
        Ok(())
    }

    /**
        Remove the file called `name` and release its blocks.

        Open files can't be destroyed. The descriptor is cleared first, then
        the bitmap, and the directory entry is tombstoned last.
    */
    pub fn destroy(&mut self, name: &str) -> Result<()> {
        let entry = self.directory.find_entry(name)?;
        let fd_index = self.bound_fd(entry)?;
        if self.oft.is_open(fd_index) {
            return Err(FsError::FileIsOpen(name.into()));
        }

        let fd = self.layout.read_fd(&*self.block_device, fd_index)?;
        for block_id in fd.used_blocks() {
            let Some(index) = self.layout.data_index(block_id) else {
                log::warn!("block {} of `{}` is outside the data area", block_id, name);
                continue;
            };
            if !self.bitmap.dealloc(index) {
                log::warn!("block {} of `{}` was already free", block_id, name);
            }
        }
        self.layout
            .write_fd(&*self.block_device, fd_index, &FileDescriptor::empty())?;
        Self::store_bitmap(&*self.block_device, &self.layout, &self.bitmap)?;

        self.directory.remove_entry(entry);
        self.persist_entry(entry)?;
        log::debug!("destroyed `{}`, fd {} released", name, fd_index);
        Ok(())
    }

    /// Open `name` at position 0 and return its handle
    pub fn open(&mut self, name: &str) -> Result<usize> {
        let entry = self.directory.find_entry(name)?;
        let fd_index = self.bound_fd(entry)?;
        if self.oft.is_open(fd_index) {
            return Err(FsError::AlreadyOpen);
        }
        let fd = self.layout.read_fd(&*self.block_device, fd_index)?;
        let handle = self.oft.allocate(fd_index, fd, 0)?;
        log::debug!("opened `{}` (fd {}) as handle {}", name, fd_index, handle);
        Ok(handle)
    }

    /// Flush and release `handle`, returning the name of the file it had open
    pub fn close(&mut self, handle: usize) -> Result<String> {
        let file = Self::user_file(&mut self.oft, handle)?;
        file.sync(&*self.block_device, &self.layout)?;
        let fd_index = file.fd_index();
        let name = self
            .directory
            .name_of(fd_index)
            .ok_or(FsError::Inconsistent("open file has no directory entry"))?
            .to_string();
        self.oft.deallocate(handle);
        log::debug!("closed `{}` (handle {})", name, handle);
        Ok(name)
    }

    /**
        Read into `buf` from the current position of `handle`.

        Returns the number of bytes copied, fewer than requested when the
        end of the file comes first, or [`FsError::EndOfFile`] when the
        position already is at the end.
    */
    pub fn read(&mut self, handle: usize, buf: &mut [u8]) -> Result<usize> {
        Self::user_file(&mut self.oft, handle)?.read(buf, &*self.block_device)
    }

    /**
        Write `data` at the current position of `handle`.

        Blocks are allocated on demand. Whatever was written before an error
        (e.g. [`FsError::FileTooLarge`]) stays committed: buffer, bitmap and
        descriptor are all flushed before this returns.
    */
    pub fn write(&mut self, handle: usize, data: &[u8]) -> Result<usize> {
        Self::user_file(&mut self.oft, handle)?;
        self.write_file(handle, data)
    }

    /// Move `handle` to `position`, which may not exceed the file size
    pub fn seek(&mut self, handle: usize, position: usize) -> Result<()> {
        Self::user_file(&mut self.oft, handle)?.seek(position, &*self.block_device)
    }

    /// Flush the buffers and descriptors of every open file
    pub fn sync(&mut self) -> Result<()> {
        for file in self.oft.files_mut() {
            file.sync(&*self.block_device, &self.layout)?;
        }
        Ok(())
    }

    /// Name and size of every file, in directory order
    pub fn list_files(&mut self) -> Result<Vec<FileInfo>> {
        self.sync()?;
        self.directory
            .live()
            .map(|entry| {
                let fd_index = entry
                    .fd_index()
                    .ok_or(FsError::Inconsistent("live entry without descriptor"))?;
                let fd = self.layout.read_fd(&*self.block_device, fd_index)?;
                Ok(FileInfo {
                    name: entry.name().to_string(),
                    size: fd.size as usize,
                })
            })
            .collect()
    }

    /// Sync everything and give the device back
    pub fn unmount(mut self) -> Result<()> {
        self.sync()?;
        log::info!("volume unmounted");
        Ok(())
    }

    /// Put the volume behind a lock so several threads can share it
    pub fn into_shared(self) -> SharedFileSystem {
        Arc::new(Mutex::new(self))
    }
}

/* helper methods */
impl FlatFileSystem {
    /// Name of the file open under `handle`
    pub fn file_name(&self, handle: usize) -> Result<&str> {
        let file = self.open_file(handle)?;
        self.directory
            .name_of(file.fd_index())
            .ok_or(FsError::Inconsistent("open file has no directory entry"))
    }

    /// Current position of `handle`
    pub fn position(&self, handle: usize) -> Result<usize> {
        self.open_file(handle).map(OpenFile::position)
    }

    /// Size in bytes of the file open under `handle`
    pub fn file_size(&self, handle: usize) -> Result<usize> {
        self.open_file(handle).map(OpenFile::size)
    }

    /// Geometry of the mounted volume
    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// In-memory bitmap
    pub fn bitmap(&self) -> Bitmap {
        self.bitmap
    }

    /// In-memory directory
    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    /**
        Check that the bitmap and the descriptors agree: every block pointer
        of a live file lies in the data area, no block belongs to two files,
        no file claims more bytes than its blocks hold, and the set bits are
        exactly the blocks in use.
    */
    pub fn verify(&mut self) -> Result<()> {
        self.sync()?;
        let block_size = self.layout.block_size();
        let mut in_use = Bitmap::default();
        let live = core::iter::once(ROOT_FD)
            .chain(self.directory.live().filter_map(DirEntry::fd_index));
        for fd_index in live {
            let fd = self.layout.read_fd(&*self.block_device, fd_index)?;
            for block_id in fd.used_blocks() {
                let index = self
                    .layout
                    .data_index(block_id)
                    .ok_or(FsError::Inconsistent("block pointer outside the data area"))?;
                if in_use.is_used(index) {
                    return Err(FsError::Inconsistent("data block owned by two files"));
                }
                in_use = in_use.mark_used(index);
            }
            if fd.size as usize > fd.used_blocks().count() * block_size {
                return Err(FsError::Inconsistent("file is larger than its blocks"));
            }
        }
        if in_use != self.bitmap {
            return Err(FsError::Inconsistent("bitmap disagrees with descriptors"));
        }
        if Self::load_bitmap(&*self.block_device, &self.layout)? != self.bitmap {
            return Err(FsError::Inconsistent("bitmap on disk is stale"));
        }
        Ok(())
    }

    fn open_file(&self, handle: usize) -> Result<&OpenFile> {
        let file = match handle {
            ROOT_HANDLE => None,
            _ => self.oft.get(handle),
        };
        file.ok_or(FsError::BadHandle(handle))
    }

    fn user_file(oft: &mut OpenFileTable, handle: usize) -> Result<&mut OpenFile> {
        let file = match handle {
            ROOT_HANDLE => None,
            _ => oft.get_mut(handle),
        };
        file.ok_or(FsError::BadHandle(handle))
    }

    fn root(&mut self) -> Result<&mut OpenFile> {
        self.oft
            .get_mut(ROOT_HANDLE)
            .ok_or(FsError::Inconsistent("root directory is not open"))
    }

    fn bound_fd(&self, entry: usize) -> Result<usize> {
        self.directory
            .entry(entry)
            .and_then(DirEntry::fd_index)
            .ok_or(FsError::Inconsistent("live entry without descriptor"))
    }

    /// Write directory slot `entry` through the root handle
    fn persist_entry(&mut self, entry: usize) -> Result<()> {
        let bytes = self
            .directory
            .entry(entry)
            .map(DirEntry::to_bytes)
            .ok_or(FsError::Inconsistent("directory slot vanished"))?;
        let block_device = Arc::clone(&self.block_device);
        self.root()?.seek(entry * DirEntry::SIZE, &*block_device)?;
        self.write_file(ROOT_HANDLE, &bytes)?;
        Ok(())
    }

    fn write_file(&mut self, handle: usize, data: &[u8]) -> Result<usize> {
        let Self {
            block_device,
            layout,
            bitmap,
            oft,
            ..
        } = self;
        let block_device = &**block_device;
        let file = oft.get_mut(handle).ok_or(FsError::BadHandle(handle))?;
        let before = *bitmap;
        let capacity = layout.data_capacity();

        let mut written = 0;
        let outcome = file.write(
            data,
            block_device,
            || {
                let index = bitmap.alloc(capacity).ok_or(FsError::OutOfSpace)?;
                let block_id = layout.data_block_id(index);
                log::debug!("allocated data block {}", block_id);
                Ok(block_id)
            },
            &mut written,
        );

        // data first, then the bitmap, then the descriptor pointing at both
        file.flush_buffer(block_device)?;
        if *bitmap != before {
            Self::store_bitmap(block_device, layout, bitmap)?;
        }
        file.flush_fd(block_device, layout)?;
        outcome.map(|()| written)
    }

    fn load_bitmap(block_device: &dyn BlockDevice, layout: &Layout) -> Result<Bitmap> {
        let mut block = vec![0u8; layout.block_size()];
        block_device.read_block(BITMAP_BLOCK, &mut block)?;
        Ok(Bitmap::from_block(&block))
    }

    fn store_bitmap(block_device: &dyn BlockDevice, layout: &Layout, bitmap: &Bitmap) -> Result<()> {
        let mut block = vec![0u8; layout.block_size()];
        bitmap.write_to(&mut block);
        block_device.write_block(BITMAP_BLOCK, &block)?;
        Ok(())
    }
}
