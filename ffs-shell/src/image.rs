//! Moving a whole volume between a block device and a host byte stream
use std::io::{Read, Write};

use flat_fs::{BlockDevice, FsError};

use crate::error::ShellError;

/// Fill `device` block by block from `reader`; a short image is an error
pub fn load_image<R: Read>(device: &dyn BlockDevice, mut reader: R) -> Result<(), ShellError> {
    let mut block = vec![0u8; device.block_size()];
    for block_id in 0..device.block_count() {
        reader.read_exact(&mut block)?;
        device
            .write_block(block_id, &block)
            .map_err(FsError::from)?;
    }
    log::info!("loaded {} blocks", device.block_count());
    Ok(())
}

/// Dump every block of `device` to `writer` in block order
pub fn save_image<W: Write>(device: &dyn BlockDevice, mut writer: W) -> Result<(), ShellError> {
    let mut block = vec![0u8; device.block_size()];
    for block_id in 0..device.block_count() {
        device
            .read_block(block_id, &mut block)
            .map_err(FsError::from)?;
        writer.write_all(&block)?;
    }
    writer.flush()?;
    log::info!("saved {} blocks", device.block_count());
    Ok(())
}
