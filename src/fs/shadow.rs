//! Shadow directories.
//!
//! A fixed FIFO of committed directory snapshots. Slot 0 is live; slot 1 is
//! the most recent snapshot, slot `NSHADOW` the oldest. Every slot owns its
//! inodes and data blocks outright: `commit` hands the live table to slot 1
//! and rebuilds slot 0 as a deep copy, so later edits of the live directory
//! allocate fresh blocks and never touch history. The price is that the
//! allocator must hold two copies of the committed set.

use crate::error::{Result, SfsError};
use crate::fs::dir::{Dirent, MAXFILES};
use crate::fs::inode::Dinode;
use crate::fs::Sfs;
use crate::param::{MAXDIRS, NINODES, NSHADOW};
use zerocopy::byteorder::I32;

impl Sfs {
    /// Snapshot the live directory.
    ///
    /// The oldest shadow is dropped, every slot ages by one, the committed
    /// table lands in slot 1, and slot 0 is repopulated as a deep copy of
    /// it. Everything is flushed at the end.
    pub fn commit(&mut self) -> Result<()> {
        // Drop the files aging out of the FIFO.
        self.free_dir_files(NSHADOW)?;

        // Age every slot by one; the emptied oldest table rotates around to
        // slot 0 and is cleared before the copy repopulates it.
        self.dirs.rotate_right(1);
        self.dirs[0].clear();

        let copied = self.copy_dir(1, 0);
        self.flush_all()?;
        copied?;
        log::debug!(
            "commit: {} files snapshotted",
            self.dirs[1].iter_live().count()
        );
        Ok(())
    }

    /// Replace the live directory with snapshot `k`.
    ///
    /// `k == 0` is a no-op; `k` beyond the FIFO is invalid. The live files
    /// are freed, then every entry of slot `k` is deep-copied into slot 0.
    pub fn restore(&mut self, k: usize) -> Result<()> {
        if k == 0 {
            return Ok(());
        }
        if k > NSHADOW {
            return Err(SfsError::InvalidArgument("snapshot index out of range"));
        }

        self.free_dir_files(0)?;
        self.dirs[0].clear();

        let copied = self.copy_dir(k, 0);
        self.flush_all()?;
        copied?;
        log::debug!(
            "restore({}): {} files",
            k,
            self.dirs[0].iter_live().count()
        );
        Ok(())
    }

    /// Free every file owned by directory slot `d`, clearing its table.
    fn free_dir_files(&mut self, d: usize) -> Result<()> {
        for slot in 0..MAXFILES {
            if !self.dirs[d].entries[slot].is_empty() {
                self.free_file(d, slot)?;
            }
        }
        Ok(())
    }

    /// Deep-copy every entry of slot `src` into slot `dst`: each file gets a
    /// freshly allocated inode and data blocks holding identical bytes.
    ///
    /// On failure, entries already created in `dst` are freed again, leaving
    /// the slot empty: the documented best-effort rollback.
    fn copy_dir(&mut self, src: usize, dst: usize) -> Result<()> {
        debug_assert!(src < MAXDIRS && dst < MAXDIRS && src != dst);
        for slot in 0..MAXFILES {
            let de = self.dirs[src].entries[slot];
            if de.is_empty() {
                continue;
            }
            if let Err(e) = self.copy_file(&de, dst) {
                log::warn!("snapshot copy failed ({}); emptying slot {}", e, dst);
                self.free_dir_files(dst)?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Clone the file behind `de` into directory slot `dst`.
    fn copy_file(&mut self, de: &Dirent, dst: usize) -> Result<()> {
        let name = de
            .file_name()
            .ok_or(SfsError::Corrupted("undecodable directory entry"))?;
        let src_inum = de.inum.get() as usize;
        if src_inum >= NINODES {
            return Err(SfsError::Corrupted("directory entry inode out of range"));
        }
        let src_ip = self.ifile[src_inum];
        let blocks = self.file_blocks(&src_ip)?;

        if self.dirs[dst].is_full() {
            return Err(SfsError::DirectoryFull);
        }
        let inum = self.ialloc()?;
        let mut ip = Dinode::free();
        ip.size = I32::new(0);
        self.ifile[inum as usize] = ip;

        for &src_blk in blocks.iter() {
            let nb = match self.append_block(inum) {
                Ok(nb) => nb,
                Err(e) => {
                    // Release the half-built clone; the caller then empties
                    // the whole destination slot.
                    self.free_inode(inum)?;
                    return Err(e);
                }
            };
            let data = self.disk.read_block(src_blk as usize)?;
            self.disk.write_block(nb as usize, &data)?;
        }

        let mut ip = self.ifile[inum as usize];
        ip.size = src_ip.size;
        self.ifile[inum as usize] = ip;
        self.dirs[dst].link(&name, inum)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tests::fresh_fs;
    use crate::param::BSIZE;

    fn write_file(fs: &mut Sfs, name: &str, data: &[u8]) {
        let fd = fs.fopen(name).unwrap();
        fs.fwseek(fd, 0).unwrap();
        assert_eq!(fs.fwrite(fd, data).unwrap(), data.len());
        fs.fclose(fd).unwrap();
    }

    fn read_file(fs: &mut Sfs, name: &str) -> Vec<u8> {
        let size = fs.file_size(name).unwrap();
        let fd = fs.fopen(name).unwrap();
        let mut buf = vec![0u8; size];
        fs.frseek(fd, 0).unwrap();
        assert_eq!(fs.fread(fd, &mut buf).unwrap(), size);
        fs.fclose(fd).unwrap();
        buf
    }

    #[test]
    fn committed_clone_owns_fresh_blocks() {
        let (mut fs, path) = fresh_fs("clone_blocks");
        write_file(&mut fs, "a", b"payload");
        let live_inum = fs.dirs[0].entries[0].inum.get();
        fs.commit().unwrap();

        // Post-commit, slot 1 holds the original inode and slot 0 a clone
        // with different block numbers but identical bytes.
        let shadow_inum = fs.dirs[1].entries[0].inum.get();
        let new_inum = fs.dirs[0].entries[0].inum.get();
        assert_eq!(shadow_inum, live_inum);
        assert_ne!(new_inum, shadow_inum);
        let shadow_b0 = fs.ifile[shadow_inum as usize].addr_direct[0].get();
        let live_b0 = fs.ifile[new_inum as usize].addr_direct[0].get();
        assert_ne!(shadow_b0, live_b0);
        assert_eq!(read_file(&mut fs, "a"), b"payload");
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn restore_rolls_back_edits() {
        let (mut fs, path) = fresh_fs("restore_edits");
        write_file(&mut fs, "x", b"v1");
        fs.commit().unwrap();
        let fd = fs.fopen("x").unwrap();
        fs.fwseek(fd, 0).unwrap();
        fs.fwrite(fd, b"v2").unwrap();
        fs.fclose(fd).unwrap();
        assert_eq!(read_file(&mut fs, "x"), b"v2");

        fs.restore(1).unwrap();
        assert_eq!(read_file(&mut fs, "x"), b"v1");
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn restore_bad_index() {
        let (mut fs, path) = fresh_fs("restore_index");
        fs.restore(0).unwrap();
        assert!(matches!(
            fs.restore(NSHADOW + 1),
            Err(SfsError::InvalidArgument(_))
        ));
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn restore_failure_empties_live_slot() {
        let (mut fs, path) = fresh_fs("restore_rollback");
        write_file(&mut fs, "big", &vec![3u8; 4 * BSIZE]);
        fs.commit().unwrap();
        // Drop the live clone so freeing slot 0 reclaims nothing, then
        // exhaust the allocator so the deep copy cannot complete.
        fs.remove("big").unwrap();
        fs.drain_free_blocks(0);
        assert!(fs.restore(1).is_err());
        // Best-effort rollback: the live slot ends empty, not half-built.
        assert_eq!(fs.dirs[0].iter_live().count(), 0);
        // History is intact.
        assert_eq!(fs.dirs[1].iter_live().count(), 1);
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }
}
