//! Bitmap for the data area
//!
//! A single `u64` at the start of block 0. Bit `i`, counted from the most
//! significant bit, is set iff data block `i` is allocated.

/// Number of data blocks a bitmap can track
pub const BITMAP_BITS: usize = u64::BITS as usize;

const BITMAP_BYTES: usize = core::mem::size_of::<u64>();

/// Free/used state of the data blocks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Bitmap(u64);

impl Bitmap {
    /// Wrap a raw bitmap value
    pub const fn new(bits: u64) -> Self {
        Self(bits)
    }

    /// Raw bitmap value
    pub const fn bits(&self) -> u64 {
        self.0
    }

    /// First free data block, scanning from the most significant bit
    pub fn find_free(&self) -> Option<usize> {
        let index = self.0.leading_ones() as usize;
        (index < BITMAP_BITS).then_some(index)
    }

    /// Whether data block `index` is allocated
    pub fn is_used(&self, index: usize) -> bool {
        self.0 & Self::mask(index) != 0
    }

    /// Copy of this bitmap with `index` set
    #[must_use]
    pub fn mark_used(self, index: usize) -> Self {
        Self(self.0 | Self::mask(index))
    }

    /// Copy of this bitmap with `index` cleared
    #[must_use]
    pub fn mark_free(self, index: usize) -> Self {
        Self(self.0 & !Self::mask(index))
    }

    /**
        Allocate a new data block:
            *return: not global_id on block device, is the inner_id of bitmap
        Blocks at or beyond `capacity` don't exist on the device and are
        never handed out.
    */
    pub fn alloc(&mut self, capacity: usize) -> Option<usize> {
        let index = self.find_free().filter(|&index| index < capacity)?;
        *self = self.mark_used(index);
        Some(index)
    }

    /// Deallocate a data block, returning whether it was allocated
    pub fn dealloc(&mut self, index: usize) -> bool {
        let was_used = self.is_used(index);
        *self = self.mark_free(index);
        was_used
    }

    /// Number of allocated data blocks
    pub fn used(&self) -> usize {
        self.0.count_ones() as usize
    }

    /// Decode the bitmap from the start of block 0
    pub fn from_block(block: &[u8]) -> Self {
        let mut bytes = [0u8; BITMAP_BYTES];
        bytes.copy_from_slice(&block[..BITMAP_BYTES]);
        Self(u64::from_be_bytes(bytes))
    }

    /// Encode the bitmap into the start of block 0, zeroing the rest
    pub fn write_to(&self, block: &mut [u8]) {
        block.fill(0);
        block[..BITMAP_BYTES].copy_from_slice(&self.0.to_be_bytes());
    }

    fn mask(index: usize) -> u64 {
        debug_assert!(index < BITMAP_BITS);
        1u64 << (BITMAP_BITS - 1 - index)
    }
}
