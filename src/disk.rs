//! Block device emulator.
//!
//! Presents a flat array of fixed-size blocks backed by an image file.
//! Reads and writes move whole blocks, all or nothing; partial-block I/O is
//! not supported.
//!
//! Interface:
//! * `create` makes a fresh zero-filled image, `open` loads an existing one.
//! * `read_blocks`/`write_blocks` operate on runs of consecutive blocks.
//! * `read_block`/`write_block` are the single-block adapter the filesystem
//!   uses for everything.
//! * `close` flushes the image and releases the device.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use crate::error::{Result, SfsError};
use crate::param::BSIZE;

/// One block worth of bytes.
///
/// Runs of the data are reinterpreted as `u32` block pointers, so the buffer
/// keeps 4-byte alignment.
#[repr(align(4))]
#[derive(Clone)]
pub struct Block(pub [u8; BSIZE]);

impl Block {
    pub const fn zeroed() -> Block {
        Block([0; BSIZE])
    }
}

impl Deref for Block {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Block {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// An emulated disk: an image file plus its geometry.
pub struct Disk {
    image: File,
    block_size: usize,
    nblocks: usize,
}

impl Disk {
    /// Create a fresh zero-filled disk image, replacing any existing file at
    /// `path`.
    pub fn create<P: AsRef<Path>>(path: P, block_size: usize, nblocks: usize) -> Result<Disk> {
        if block_size == 0 || nblocks == 0 {
            return Err(SfsError::InvalidArgument("disk geometry must be nonzero"));
        }
        let image = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        image.set_len((block_size * nblocks) as u64)?;
        log::debug!("fresh disk image: {} blocks of {} bytes", nblocks, block_size);
        Ok(Disk {
            image,
            block_size,
            nblocks,
        })
    }

    /// Open an existing disk image. The image length must match the
    /// requested geometry exactly.
    pub fn open<P: AsRef<Path>>(path: P, block_size: usize, nblocks: usize) -> Result<Disk> {
        let image = OpenOptions::new().read(true).write(true).open(path)?;
        let len = image.metadata()?.len();
        if len != (block_size * nblocks) as u64 {
            return Err(SfsError::Corrupted("disk image length does not match geometry"));
        }
        Ok(Disk {
            image,
            block_size,
            nblocks,
        })
    }

    /// Number of blocks on the device.
    pub fn nblocks(&self) -> usize {
        self.nblocks
    }

    /// Bytes per block.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Read `count` consecutive blocks starting at `start` into `buf`.
    pub fn read_blocks(&mut self, start: usize, count: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(start, count, buf.len())?;
        self.image
            .seek(SeekFrom::Start((start * self.block_size) as u64))?;
        self.image.read_exact(&mut buf[..count * self.block_size])?;
        Ok(())
    }

    /// Write `count` consecutive blocks starting at `start` from `buf`.
    pub fn write_blocks(&mut self, start: usize, count: usize, buf: &[u8]) -> Result<()> {
        self.check_range(start, count, buf.len())?;
        self.image
            .seek(SeekFrom::Start((start * self.block_size) as u64))?;
        self.image.write_all(&buf[..count * self.block_size])?;
        Ok(())
    }

    /// Read one block.
    pub fn read_block(&mut self, bno: usize) -> Result<Block> {
        let mut b = Block::zeroed();
        self.read_blocks(bno, 1, &mut b.0)?;
        Ok(b)
    }

    /// Write one block.
    pub fn write_block(&mut self, bno: usize, b: &Block) -> Result<()> {
        self.write_blocks(bno, 1, &b.0)
    }

    /// Flush the image and release the device.
    pub fn close(self) -> Result<()> {
        self.image.sync_all()?;
        Ok(())
    }

    fn check_range(&self, start: usize, count: usize, len: usize) -> Result<()> {
        if count == 0 || start.checked_add(count).map_or(true, |end| end > self.nblocks) {
            return Err(SfsError::InvalidArgument("block range out of bounds"));
        }
        if len < count * self.block_size {
            return Err(SfsError::InvalidArgument("buffer shorter than block range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_path(name: &str) -> std::path::PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("sfs-disk-{}-{}.img", name, std::process::id()));
        p
    }

    #[test]
    fn round_trip() {
        let path = image_path("round_trip");
        let mut disk = Disk::create(&path, BSIZE, 8).unwrap();
        let mut b = Block::zeroed();
        b[0] = 0xab;
        b[BSIZE - 1] = 0xcd;
        disk.write_block(3, &b).unwrap();
        let r = disk.read_block(3).unwrap();
        assert_eq!(r[0], 0xab);
        assert_eq!(r[BSIZE - 1], 0xcd);
        disk.close().unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn rejects_out_of_range() {
        let path = image_path("range");
        let mut disk = Disk::create(&path, BSIZE, 4).unwrap();
        assert!(disk.read_block(4).is_err());
        let b = Block::zeroed();
        assert!(disk.write_block(4, &b).is_err());
        assert!(disk.write_blocks(3, 2, &[0u8; 2 * BSIZE]).is_err());
        disk.close().unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn open_checks_length() {
        let path = image_path("length");
        let disk = Disk::create(&path, BSIZE, 4).unwrap();
        disk.close().unwrap();
        assert!(Disk::open(&path, BSIZE, 8).is_err());
        assert!(Disk::open(&path, BSIZE, 4).is_ok());
        std::fs::remove_file(&path).unwrap();
    }
}
