//! Open files.
//!
//! Each open file carries two independent cursors, one for reading and one
//! for writing; a cursor is a (block address, byte offset) pair. Opening an
//! existing file places the read cursor at the start and the write cursor at
//! end-of-file; a freshly created file starts both at the beginning.
//!
//! End-of-file handling snapshots `(last block, end byte)` when a read or
//! write begins: a read stops there, and a write grows the size by exactly
//! one byte for every byte laid down past it. Writing in the middle of a
//! file never changes its size.

use core::cmp;

use array_macro::array;

use crate::error::{Result, SfsError};
use crate::fs::dir::FileName;
use crate::fs::Sfs;
use crate::param::{BSIZE, NFD};

/// An open-file handle: an index into the open-file table.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Fd(usize);

/// A read or write position.
#[derive(Clone, Copy)]
pub(crate) struct Cursor {
    /// Block address the cursor sits in.
    pub blk: u32,
    /// Byte offset within that block; `BSIZE` means "past a full block".
    pub off: usize,
}

pub(crate) struct OpenFile {
    pub name: FileName,
    pub inum: u32,
    pub rpos: Cursor,
    pub wpos: Cursor,
}

/// The open-file table: at most one entry per file name.
pub(crate) struct FileTable {
    slots: [Option<OpenFile>; NFD],
}

impl FileTable {
    pub fn new() -> FileTable {
        FileTable {
            slots: array![_ => None; NFD],
        }
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(|s| s.is_some())
    }

    pub fn holds_name(&self, name: &FileName) -> bool {
        self.slots
            .iter()
            .flatten()
            .any(|of| of.name == *name)
    }

    pub fn alloc(&mut self, of: OpenFile) -> Result<Fd> {
        let fd = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or(SfsError::FdTableFull)?;
        self.slots[fd] = Some(of);
        Ok(Fd(fd))
    }

    pub fn get(&self, fd: Fd) -> Result<&OpenFile> {
        self.slots
            .get(fd.0)
            .and_then(|s| s.as_ref())
            .ok_or(SfsError::InvalidArgument("file descriptor is not open"))
    }

    pub fn get_mut(&mut self, fd: Fd) -> Result<&mut OpenFile> {
        self.slots
            .get_mut(fd.0)
            .and_then(|s| s.as_mut())
            .ok_or(SfsError::InvalidArgument("file descriptor is not open"))
    }

    pub fn release(&mut self, fd: Fd) -> Result<OpenFile> {
        self.slots
            .get_mut(fd.0)
            .and_then(|s| s.take())
            .ok_or(SfsError::InvalidArgument("file descriptor is not open"))
    }

    /// Force-close every descriptor holding `name` (used by `remove`).
    pub fn close_name(&mut self, name: &FileName) {
        for s in self.slots.iter_mut() {
            if s.as_ref().map_or(false, |of| of.name == *name) {
                *s = None;
            }
        }
    }
}

impl Sfs {
    /// Open `name`, creating it if absent.
    ///
    /// Fails if the table is full or the name is already open. An existing
    /// file opens with the read cursor at the start and the write cursor at
    /// end-of-file.
    pub fn fopen(&mut self, name: &str) -> Result<Fd> {
        let name = FileName::new(name)?;
        if self.ftable.is_full() {
            return Err(SfsError::FdTableFull);
        }
        if self.ftable.holds_name(&name) {
            return Err(SfsError::AlreadyOpen);
        }

        let (inum, rpos, wpos) = match self.dirs[0].lookup(&name) {
            Some((_, inum)) => {
                let ip = self.ifile[inum as usize];
                let last = self.last_block(&ip)?;
                let eob = self.end_byte(&ip)?;
                (
                    inum,
                    Cursor {
                        blk: ip.addr_direct[0].get(),
                        off: 0,
                    },
                    Cursor { blk: last, off: eob },
                )
            }
            None => {
                let inum = self.create_file(&name)?;
                let first = self.ifile[inum as usize].addr_direct[0].get();
                let start = Cursor { blk: first, off: 0 };
                (inum, start, start)
            }
        };
        self.ftable.alloc(OpenFile {
            name,
            inum,
            rpos,
            wpos,
        })
    }

    /// Close `fd`, flushing the superblock, inode file, live directory, and
    /// both bitmaps.
    pub fn fclose(&mut self, fd: Fd) -> Result<()> {
        let _ = self.ftable.release(fd)?;
        self.flush_superblock()?;
        self.flush_ifile()?;
        self.flush_dir(0)?;
        self.flush_bitmaps()
    }

    /// Read from the read cursor up to `buf.len()` bytes; returns the number
    /// of bytes actually read, stopping at end-of-file.
    pub fn fread(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let of = self.ftable.get(fd)?;
        let inum = of.inum;
        let mut cur = of.rpos;

        let ip = self.ifile[inum as usize];
        let last = self.last_block(&ip)?;
        let eob = self.end_byte(&ip)?;

        let mut pos = 0;
        while pos < buf.len() {
            if cur.blk == last && cur.off >= eob {
                break;
            }
            if cur.off == BSIZE {
                match self.next_block_after(&ip, cur.blk)? {
                    Some(nb) => {
                        cur.blk = nb;
                        cur.off = 0;
                    }
                    None => break,
                }
                continue;
            }
            let blk = self.disk.read_block(cur.blk as usize)?;
            let stop = if cur.blk == last { eob } else { BSIZE };
            let m = cmp::min(stop - cur.off, buf.len() - pos);
            buf[pos..pos + m].copy_from_slice(&blk[cur.off..cur.off + m]);
            pos += m;
            cur.off += m;
        }

        self.ftable.get_mut(fd)?.rpos = cur;
        Ok(pos)
    }

    /// Write `buf` at the write cursor, growing the file as needed; returns
    /// the number of bytes written. A short count means the file could not
    /// grow any further.
    pub fn fwrite(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let of = self.ftable.get(fd)?;
        let inum = of.inum;
        let mut cur = of.wpos;

        // End-of-file snapshot: growth is measured against the state at the
        // start of the call.
        let ip = self.ifile[inum as usize];
        let last = self.last_block(&ip)?;
        let eob = self.end_byte(&ip)?;

        let mut appending = false;
        let mut pos = 0;
        while pos < buf.len() {
            if cur.off == BSIZE {
                let ip = self.ifile[inum as usize];
                match self.next_block_after(&ip, cur.blk)? {
                    Some(nb) => {
                        cur.blk = nb;
                        cur.off = 0;
                    }
                    None => match self.append_block(inum) {
                        Ok(nb) => {
                            appending = true;
                            cur.blk = nb;
                            cur.off = 0;
                        }
                        Err(SfsError::NoFreeBlock) | Err(SfsError::PointerListExhausted) => {
                            log::debug!("write stopped short: file cannot grow");
                            break;
                        }
                        Err(e) => return Err(e),
                    },
                }
            }

            let mut blk = self.disk.read_block(cur.blk as usize)?;
            let m = cmp::min(BSIZE - cur.off, buf.len() - pos);
            blk[cur.off..cur.off + m].copy_from_slice(&buf[pos..pos + m]);
            self.disk.write_block(cur.blk as usize, &blk)?;

            let end = cur.off + m;
            let grown = if appending {
                m
            } else if cur.blk == last {
                end.saturating_sub(cmp::max(cur.off, eob))
            } else {
                0
            };
            if grown > 0 {
                let mut ip = self.ifile[inum as usize];
                ip.size = zerocopy::byteorder::I32::new(ip.size.get() + grown as i32);
                self.ifile[inum as usize] = ip;
            }

            pos += m;
            cur.off = end;
        }

        self.ftable.get_mut(fd)?.wpos = cur;
        self.flush_ifile()?;
        Ok(pos)
    }

    /// Move the read cursor to byte offset `loc`.
    pub fn frseek(&mut self, fd: Fd, loc: usize) -> Result<()> {
        let inum = self.ftable.get(fd)?.inum;
        let cur = self.seek_cursor(inum, loc)?;
        self.ftable.get_mut(fd)?.rpos = cur;
        Ok(())
    }

    /// Move the write cursor to byte offset `loc`.
    pub fn fwseek(&mut self, fd: Fd, loc: usize) -> Result<()> {
        let inum = self.ftable.get(fd)?.inum;
        let cur = self.seek_cursor(inum, loc)?;
        self.ftable.get_mut(fd)?.wpos = cur;
        Ok(())
    }

    /// Map a byte offset onto a cursor. Seeks are pure cursor moves: they
    /// never extend the file, and an offset past the end is invalid.
    fn seek_cursor(&mut self, inum: u32, loc: usize) -> Result<Cursor> {
        let ip = self.ifile[inum as usize];
        let size = ip.size_bytes();
        if loc > size {
            return Err(SfsError::InvalidArgument("seek past end of file"));
        }
        if loc == size && size > 0 && size % BSIZE == 0 {
            // The last block is exactly full: the cursor parks past it.
            return Ok(Cursor {
                blk: self.last_block(&ip)?,
                off: BSIZE,
            });
        }
        let blk = self
            .nth_block(&ip, loc / BSIZE)?
            .ok_or(SfsError::Corrupted("pointer chain inconsistent with size"))?;
        Ok(Cursor {
            blk,
            off: loc % BSIZE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tests::fresh_fs;

    #[test]
    fn table_rejects_duplicates_and_fills() {
        let (mut fs, path) = fresh_fs("ftable");
        let fd = fs.fopen("dup").unwrap();
        assert!(matches!(fs.fopen("dup"), Err(SfsError::AlreadyOpen)));
        fs.fclose(fd).unwrap();
        // Closed name opens again.
        let fd = fs.fopen("dup").unwrap();
        fs.fclose(fd).unwrap();

        let mut fds = Vec::new();
        for i in 0..NFD {
            fds.push(fs.fopen(&format!("f{}", i)).unwrap());
        }
        assert!(matches!(fs.fopen("straw"), Err(SfsError::FdTableFull)));
        for fd in fds {
            fs.fclose(fd).unwrap();
        }
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn closed_fd_rejected() {
        let (mut fs, path) = fresh_fs("closed_fd");
        let fd = fs.fopen("x").unwrap();
        fs.fclose(fd).unwrap();
        let mut buf = [0u8; 4];
        assert!(fs.fread(fd, &mut buf).is_err());
        assert!(fs.fwrite(fd, b"data").is_err());
        assert!(fs.frseek(fd, 0).is_err());
        assert!(fs.fclose(fd).is_err());
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn mid_file_write_keeps_size() {
        let (mut fs, path) = fresh_fs("mid_write");
        let fd = fs.fopen("x").unwrap();
        assert_eq!(fs.fwrite(fd, b"hello world").unwrap(), 11);
        assert_eq!(fs.file_size("x").unwrap(), 11);

        fs.fwseek(fd, 6).unwrap();
        assert_eq!(fs.fwrite(fd, b"earth").unwrap(), 5);
        assert_eq!(fs.file_size("x").unwrap(), 11);

        fs.frseek(fd, 0).unwrap();
        let mut buf = [0u8; 11];
        assert_eq!(fs.fread(fd, &mut buf).unwrap(), 11);
        assert_eq!(&buf, b"hello earth");
        fs.fclose(fd).unwrap();
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn overwrite_past_eof_grows() {
        let (mut fs, path) = fresh_fs("grow_write");
        let fd = fs.fopen("x").unwrap();
        fs.fwrite(fd, b"abcd").unwrap();
        // Overwrite the tail and run past it.
        fs.fwseek(fd, 2).unwrap();
        fs.fwrite(fd, b"xyzw").unwrap();
        assert_eq!(fs.file_size("x").unwrap(), 6);
        fs.frseek(fd, 0).unwrap();
        let mut buf = [0u8; 6];
        fs.fread(fd, &mut buf).unwrap();
        assert_eq!(&buf, b"abxyzw");
        fs.fclose(fd).unwrap();
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn seek_bounds() {
        let (mut fs, path) = fresh_fs("seek_bounds");
        let fd = fs.fopen("x").unwrap();
        fs.fwrite(fd, &[7u8; BSIZE]).unwrap();
        // Seeking to the very end of a block-aligned file is legal...
        fs.fwseek(fd, BSIZE).unwrap();
        fs.frseek(fd, BSIZE).unwrap();
        // ...but one byte past it is not.
        assert!(fs.fwseek(fd, BSIZE + 1).is_err());
        // A read from the parked cursor sees end-of-file.
        let mut buf = [0u8; 4];
        assert_eq!(fs.fread(fd, &mut buf).unwrap(), 0);
        fs.fclose(fd).unwrap();
        drop(fs);
        std::fs::remove_file(path).unwrap();
    }
}
