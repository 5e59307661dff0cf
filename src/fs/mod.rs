//! Filesystem implementation. Five layers:
//!   + Blocks: allocator for raw disk blocks within the data region.
//!   + Inodes: size plus a direct/indirect pointer list per file.
//!   + Directory: a flat one-block table of (name, inode) pairs.
//!   + Files: the open-file table with independent read/write cursors.
//!   + Shadows: a FIFO of committed directory snapshots.
//!
//! The filesystem keeps one in-memory image of the on-disk metadata (the
//! superblock, the inode file, every directory slot, and both bitmaps).
//! Mutations act on the image; each operation then flushes exactly the
//! region blocks it touched, synchronously, through the block adapter.
//! File data is not cached: reads and writes go block-at-a-time through the
//! adapter.

use core::cmp;
use std::path::Path;

use array_macro::array;
use zerocopy::byteorder::{I32, U32};
use zerocopy::{AsBytes, FromBytes};

use crate::bitmap::Bitmap;
use crate::disk::{Block, Disk};
use crate::error::{Result, SfsError};
use crate::file::FileTable;
use crate::param::{
    dir_block, BLOCKS_IFILE, BSIZE, DISK_NAME, FIRST_DATA, FREEMAP_BLOCK, INODE_SIZE, IPB,
    LAST_DATA, MAXDIRS, NBLOCKS, NINDIRECT, NINODES, WMASK_BLOCK,
};

pub mod dir;
pub mod inode;
mod shadow;
pub mod superblock;

use dir::{Directory, FileName, MAXFILES};
use inode::{Dinode, IndirectBlock};
use superblock::Superblock;

/// A mounted shadowing filesystem.
pub struct Sfs {
    pub(crate) disk: Disk,
    pub(crate) sb: Superblock,
    pub(crate) ifile: Box<[Dinode; NINODES]>,
    /// Slot 0 is live; slots 1..MAXDIRS are snapshots, slot 1 most recent.
    pub(crate) dirs: [Directory; MAXDIRS],
    /// One bit per device block, set = free.
    pub(crate) freemap: Bitmap,
    /// Kept in lockstep with the free bitmap for on-disk compatibility;
    /// never consulted.
    pub(crate) wmask: Bitmap,
    pub(crate) ftable: FileTable,
    /// Cursor of the directory enumeration, an index into slot 0.
    dir_cursor: usize,
}

impl Sfs {
    /// Create or load a filesystem on the disk image at `path`.
    ///
    /// With `fresh`, the image is reinitialized and formatted; otherwise an
    /// existing image is loaded and validated, refusing to mount on any
    /// failed invariant.
    pub fn mkfs<P: AsRef<Path>>(path: P, fresh: bool) -> Result<Sfs> {
        if fresh {
            Sfs::format(Disk::create(path, BSIZE, NBLOCKS)?)
        } else {
            Sfs::mount(Disk::open(path, BSIZE, NBLOCKS)?)
        }
    }

    /// `mkfs` against the default disk image name.
    pub fn mkfs_default(fresh: bool) -> Result<Sfs> {
        Sfs::mkfs(DISK_NAME, fresh)
    }

    /// Flush the image and release the disk.
    pub fn close(mut self) -> Result<()> {
        self.flush_all()?;
        self.disk.close()
    }

    fn format(disk: Disk) -> Result<Sfs> {
        let mut freemap = Bitmap::all_free();
        for b in 0..FIRST_DATA {
            freemap.clear(b);
        }
        for k in 0..MAXDIRS {
            freemap.clear(dir_block(k));
        }
        freemap.clear(FREEMAP_BLOCK);
        freemap.clear(WMASK_BLOCK);
        let wmask = freemap.clone();

        let mut fs = Sfs {
            disk,
            sb: Superblock::new(),
            ifile: Box::new([Dinode::free(); NINODES]),
            dirs: array![_ => Directory::new(); MAXDIRS],
            freemap,
            wmask,
            ftable: FileTable::new(),
            dir_cursor: 0,
        };
        fs.flush_all()?;
        log::debug!(
            "formatted: {} blocks, {} inodes, data region {}..={}",
            NBLOCKS,
            NINODES,
            FIRST_DATA,
            LAST_DATA
        );
        Ok(fs)
    }

    fn mount(mut disk: Disk) -> Result<Sfs> {
        let sb = Superblock::from_block(&disk.read_block(0)?)?;

        let mut ifile = Box::new([Dinode::free(); NINODES]);
        for iblk in 0..BLOCKS_IFILE {
            let b = disk.read_block(1 + iblk)?;
            let lo = iblk * IPB;
            let hi = cmp::min(lo + IPB, NINODES);
            for k in lo..hi {
                let off = (k - lo) * INODE_SIZE;
                ifile[k] = Dinode::read_from(&b[off..off + INODE_SIZE])
                    .ok_or(SfsError::Corrupted("short inode record"))?;
            }
        }

        let mut dirs = array![_ => Directory::new(); MAXDIRS];
        for (k, d) in dirs.iter_mut().enumerate() {
            *d = Directory::from_block(&disk.read_block(dir_block(k))?)?;
        }

        let freemap = Bitmap::from_block(disk.read_block(FREEMAP_BLOCK)?);
        let wmask = Bitmap::from_block(disk.read_block(WMASK_BLOCK)?);

        let mut fs = Sfs {
            disk,
            sb,
            ifile,
            dirs,
            freemap,
            wmask,
            ftable: FileTable::new(),
            dir_cursor: 0,
        };
        fs.check()?;
        log::debug!("mounted: {} live files", fs.dirs[0].iter_live().count());
        Ok(fs)
    }

    /// Invariant checks run at mount time. Any failure refuses the mount.
    fn check(&mut self) -> Result<()> {
        for b in 0..FIRST_DATA {
            if self.freemap.test(b) {
                return Err(SfsError::Corrupted("reserved block marked free"));
            }
        }
        for k in 0..MAXDIRS {
            if self.freemap.test(dir_block(k)) {
                return Err(SfsError::Corrupted("reserved block marked free"));
            }
        }
        if self.freemap.test(FREEMAP_BLOCK) || self.freemap.test(WMASK_BLOCK) {
            return Err(SfsError::Corrupted("reserved block marked free"));
        }

        for d in 0..MAXDIRS {
            for slot in 0..MAXFILES {
                let de = self.dirs[d].entries[slot];
                if de.is_empty() {
                    continue;
                }
                if de.file_name().is_none() {
                    return Err(SfsError::Corrupted("undecodable directory entry"));
                }
                let inum = de.inum.get() as usize;
                if inum >= NINODES {
                    return Err(SfsError::Corrupted("directory entry inode out of range"));
                }
                let ip = self.ifile[inum];
                if ip.is_free() || ip.size.get() < 0 {
                    return Err(SfsError::Corrupted("directory entry references free inode"));
                }

                let blocks = self.file_blocks(&ip)?;
                let ind = ip.addr_indirect.get() as usize;
                let referenced = blocks
                    .iter()
                    .map(|&b| b as usize)
                    .chain(if ind != 0 { Some(ind) } else { None });
                for b in referenced {
                    if b < FIRST_DATA || b > LAST_DATA {
                        return Err(SfsError::Corrupted("file block outside data region"));
                    }
                    if self.freemap.test(b) {
                        return Err(SfsError::Corrupted("file block marked free"));
                    }
                }

                let size = ip.size_bytes();
                let want = if size == 0 {
                    1
                } else {
                    (size + BSIZE - 1) / BSIZE
                };
                if blocks.len() != want {
                    return Err(SfsError::Corrupted("inode size inconsistent with block count"));
                }
            }
        }
        Ok(())
    }

    /// Blocks.
    /// Allocate a zeroed data block, first-fit within the data region.
    pub(crate) fn balloc(&mut self) -> Result<u32> {
        let b = self
            .freemap
            .first_free_in(FIRST_DATA, LAST_DATA)
            .ok_or(SfsError::NoFreeBlock)?;
        self.freemap.clear(b);
        self.wmask.clear(b);
        self.disk.write_block(b, &Block::zeroed())?;
        Ok(b as u32)
    }

    /// Free a data block.
    pub(crate) fn bfree(&mut self, b: u32) -> Result<()> {
        let b = b as usize;
        if b < FIRST_DATA || b > LAST_DATA {
            return Err(SfsError::Corrupted("freeing reserved block"));
        }
        if self.freemap.test(b) {
            return Err(SfsError::Corrupted("freeing free block"));
        }
        self.freemap.set(b);
        self.wmask.set(b);
        Ok(())
    }

    /// Allocate an inode: the first one whose pointer list is empty. An
    /// inode counts as in use from the moment its first data block is
    /// assigned, so there is nothing to mark here.
    pub(crate) fn ialloc(&mut self) -> Result<u32> {
        self.ifile
            .iter()
            .position(|ip| ip.is_free())
            .map(|i| i as u32)
            .ok_or(SfsError::InodeTableFull)
    }

    /// Create `name` in the live directory: claims one inode and one initial
    /// data block, then flushes the directory and the touched inode block.
    pub(crate) fn create_file(&mut self, name: &FileName) -> Result<u32> {
        if self.dirs[0].is_full() {
            return Err(SfsError::DirectoryFull);
        }
        let inum = self.ialloc()?;
        let b = self.balloc()?;
        let mut ip = Dinode::free();
        ip.size = I32::new(0);
        ip.addr_direct[0] = U32::new(b);
        self.ifile[inum as usize] = ip;
        self.dirs[0].link(name, inum)?;
        self.flush_dir(0)?;
        self.flush_ifile_block(inum as usize / IPB)?;
        Ok(inum)
    }

    /// Release every block of `inum` and reinitialize it to the canonical
    /// free state.
    pub(crate) fn free_inode(&mut self, inum: u32) -> Result<()> {
        let ip = self.ifile[inum as usize];
        for p in ip.addr_direct.iter() {
            let p = p.get();
            if p == 0 {
                break;
            }
            self.bfree(p)?;
        }
        let ind = ip.addr_indirect.get();
        if ind != 0 {
            let ib = IndirectBlock::from_block(self.disk.read_block(ind as usize)?);
            for i in 0..NINDIRECT {
                let p = ib.get(i);
                if p == 0 {
                    break;
                }
                self.bfree(p)?;
            }
            self.bfree(ind)?;
        }
        self.ifile[inum as usize] = Dinode::free();
        Ok(())
    }

    /// Release the file behind entry `slot` of directory `d` and clear the
    /// entry.
    pub(crate) fn free_file(&mut self, d: usize, slot: usize) -> Result<()> {
        let inum = self.dirs[d].entries[slot].inum.get();
        if inum as usize >= NINODES {
            return Err(SfsError::Corrupted("directory entry inode out of range"));
        }
        self.free_inode(inum)?;
        self.dirs[d].unlink(slot);
        Ok(())
    }

    /// Delete `name` from the live directory, releasing its inode and
    /// blocks. Open descriptors holding the name are force-closed.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let name = FileName::new(name)?;
        let (slot, _) = self.dirs[0].lookup(&name).ok_or(SfsError::NotFound)?;
        self.free_file(0, slot)?;
        self.flush_superblock()?;
        self.flush_ifile()?;
        for k in 0..MAXDIRS {
            self.flush_dir(k)?;
        }
        self.flush_bitmaps()?;
        self.ftable.close_name(&name);
        log::debug!("removed {:?}", name);
        Ok(())
    }

    /// Size in bytes of `name` in the live directory.
    pub fn file_size(&self, name: &str) -> Result<usize> {
        let name = FileName::new(name)?;
        let (_, inum) = self.dirs[0].lookup(&name).ok_or(SfsError::NotFound)?;
        Ok(self.ifile[inum as usize].size_bytes())
    }

    /// Stateful enumeration of the live directory. Each call yields the next
    /// name; `None` signals the cursor wrapped past the table and restarted.
    pub fn next_file_name(&mut self) -> Option<FileName> {
        while self.dir_cursor < MAXFILES {
            let de = &self.dirs[0].entries[self.dir_cursor];
            self.dir_cursor += 1;
            if let Some(name) = de.file_name() {
                return Some(name);
            }
        }
        self.dir_cursor = 0;
        None
    }

    /// Free blocks remaining in the data region.
    pub fn free_block_count(&self) -> usize {
        self.freemap.count_free_in(FIRST_DATA, LAST_DATA)
    }

    pub(crate) fn flush_superblock(&mut self) -> Result<()> {
        let b = self.sb.to_block();
        self.disk.write_block(0, &b)
    }

    pub(crate) fn flush_ifile_block(&mut self, iblk: usize) -> Result<()> {
        let mut b = Block::zeroed();
        let lo = iblk * IPB;
        let hi = cmp::min(lo + IPB, NINODES);
        for (k, ip) in self.ifile[lo..hi].iter().enumerate() {
            b[k * INODE_SIZE..(k + 1) * INODE_SIZE].copy_from_slice(ip.as_bytes());
        }
        self.disk.write_block(1 + iblk, &b)
    }

    pub(crate) fn flush_ifile(&mut self) -> Result<()> {
        for iblk in 0..BLOCKS_IFILE {
            self.flush_ifile_block(iblk)?;
        }
        Ok(())
    }

    pub(crate) fn flush_dir(&mut self, k: usize) -> Result<()> {
        let b = self.dirs[k].to_block();
        self.disk.write_block(dir_block(k), &b)
    }

    pub(crate) fn flush_bitmaps(&mut self) -> Result<()> {
        let b = self.freemap.as_block().clone();
        self.disk.write_block(FREEMAP_BLOCK, &b)?;
        let b = self.wmask.as_block().clone();
        self.disk.write_block(WMASK_BLOCK, &b)
    }

    #[cfg(test)]
    pub(crate) fn drain_free_blocks(&mut self, keep: usize) {
        while self.free_block_count() > keep {
            let b = self.freemap.first_free_in(FIRST_DATA, LAST_DATA).unwrap();
            self.freemap.clear(b);
            self.wmask.clear(b);
        }
    }

    pub(crate) fn flush_all(&mut self) -> Result<()> {
        self.flush_superblock()?;
        self.flush_ifile()?;
        for k in 0..MAXDIRS {
            self.flush_dir(k)?;
        }
        self.flush_bitmaps()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::path::PathBuf;

    pub(crate) fn fresh_fs(name: &str) -> (Sfs, PathBuf) {
        let mut p = std::env::temp_dir();
        p.push(format!("sfs-unit-{}-{}.img", name, std::process::id()));
        let fs = Sfs::mkfs(&p, true).unwrap();
        (fs, p)
    }

    #[test]
    fn format_reserves_regions() {
        let (fs, path) = fresh_fs("format_reserved");
        for b in 0..FIRST_DATA {
            assert!(!fs.freemap.test(b));
        }
        for b in FIRST_DATA..=LAST_DATA {
            assert!(fs.freemap.test(b));
        }
        for k in 0..MAXDIRS {
            assert!(!fs.freemap.test(dir_block(k)));
        }
        assert!(!fs.freemap.test(FREEMAP_BLOCK));
        assert!(!fs.freemap.test(WMASK_BLOCK));
        assert_eq!(fs.free_block_count(), LAST_DATA - FIRST_DATA + 1);
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn remount_round_trip() {
        let (fs, path) = fresh_fs("remount");
        fs.close().unwrap();
        let fs = Sfs::mkfs(&path, false).unwrap();
        assert_eq!(fs.dirs[0].iter_live().count(), 0);
        assert!(fs.ifile.iter().all(|ip| ip.is_free()));
        fs.close().unwrap();
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn refuses_corrupt_superblock() {
        let (fs, path) = fresh_fs("corrupt_sb");
        fs.close().unwrap();
        let mut disk = Disk::open(&path, BSIZE, NBLOCKS).unwrap();
        let mut b = disk.read_block(0).unwrap();
        b[0] ^= 0xff;
        disk.write_block(0, &b).unwrap();
        disk.close().unwrap();
        assert!(matches!(
            Sfs::mkfs(&path, false),
            Err(SfsError::Corrupted(_))
        ));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn refuses_inconsistent_bitmap() {
        let (fs, path) = fresh_fs("corrupt_bitmap");
        fs.close().unwrap();
        let mut disk = Disk::open(&path, BSIZE, NBLOCKS).unwrap();
        // Claim the superblock is free.
        let mut b = disk.read_block(FREEMAP_BLOCK).unwrap();
        b[0] |= 0x01;
        disk.write_block(FREEMAP_BLOCK, &b).unwrap();
        disk.close().unwrap();
        assert!(matches!(
            Sfs::mkfs(&path, false),
            Err(SfsError::Corrupted(_))
        ));
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn balloc_bfree_account() {
        let (mut fs, path) = fresh_fs("balloc");
        let before = fs.free_block_count();
        let b = fs.balloc().unwrap();
        assert_eq!(fs.free_block_count(), before - 1);
        assert!(!fs.freemap.test(b as usize));
        assert!(!fs.wmask.test(b as usize));
        fs.bfree(b).unwrap();
        assert_eq!(fs.free_block_count(), before);
        // Double free refused.
        assert!(fs.bfree(b).is_err());
        // Reserved block refused.
        assert!(fs.bfree(0).is_err());
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }
}
