//! Inodes.
//!
//! An inode describes a single unnamed file: its size in bytes and the list
//! of blocks holding its content. The first `NDIRECT` block addresses are
//! stored in the inode itself; the rest live in a separately allocated
//! indirect block of packed addresses.
//!
//! Pointer lists are dense: addresses fill from index 0 and the first zero
//! terminates the list. A freshly formatted inode has `size == -1`; the
//! allocator treats `addr_direct[0] == 0` as "free", and `remove` restores
//! exactly that canonical state.
//!
//! The walker operations below take a copied-out `Dinode` and read the
//! indirect block through the disk adapter on demand. Mutations that touch
//! the indirect block flush it immediately; direct-pointer updates ride the
//! inode-file flush.

use arrayvec::ArrayVec;
use static_assertions::const_assert;
use zerocopy::byteorder::{LittleEndian as LE, I32, U32};
use zerocopy::{AsBytes, FromBytes};

use crate::disk::Block;
use crate::error::{Result, SfsError};
use crate::param::{BSIZE, INODE_SIZE, MAXFILEBLK, NDIRECT, NINDIRECT, PTR_SIZE};

use super::Sfs;

/// On-disk inode structure, pinned little-endian.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct Dinode {
    /// Size of file in bytes; -1 marks a free inode.
    pub size: I32<LE>,

    /// Direct data block addresses.
    pub addr_direct: [U32<LE>; NDIRECT],

    /// Indirect data block address; 0 if absent.
    pub addr_indirect: U32<LE>,
}

const_assert!(core::mem::size_of::<Dinode>() == INODE_SIZE);

impl Dinode {
    /// The canonical free state shared by format and `remove`.
    pub fn free() -> Dinode {
        Dinode {
            size: I32::new(-1),
            addr_direct: [U32::new(0); NDIRECT],
            addr_indirect: U32::new(0),
        }
    }

    pub fn is_free(&self) -> bool {
        self.addr_direct[0].get() == 0
    }

    /// File size in bytes; a free inode reads as zero.
    pub fn size_bytes(&self) -> usize {
        let size = self.size.get();
        if size < 0 {
            0
        } else {
            size as usize
        }
    }
}

/// An indirect pointer block: `NINDIRECT` little-endian block addresses,
/// densely packed, first zero terminates.
pub struct IndirectBlock(Block);

impl IndirectBlock {
    pub fn zeroed() -> IndirectBlock {
        IndirectBlock(Block::zeroed())
    }

    pub fn from_block(b: Block) -> IndirectBlock {
        IndirectBlock(b)
    }

    pub fn as_block(&self) -> &Block {
        &self.0
    }

    pub fn get(&self, i: usize) -> u32 {
        debug_assert!(i < NINDIRECT);
        let off = i * PTR_SIZE;
        let mut p = [0u8; PTR_SIZE];
        p.copy_from_slice(&self.0[off..off + PTR_SIZE]);
        u32::from_le_bytes(p)
    }

    pub fn set(&mut self, i: usize, v: u32) {
        debug_assert!(i < NINDIRECT);
        let off = i * PTR_SIZE;
        self.0[off..off + PTR_SIZE].copy_from_slice(&v.to_le_bytes());
    }
}

impl Sfs {
    /// Dense list of `ip`'s data blocks: direct pointers first, then the
    /// contents of the indirect block.
    pub(crate) fn file_blocks(&mut self, ip: &Dinode) -> Result<ArrayVec<u32, MAXFILEBLK>> {
        let mut out = ArrayVec::new();
        for p in ip.addr_direct.iter() {
            let p = p.get();
            if p == 0 {
                return Ok(out);
            }
            out.push(p);
        }
        let ind = ip.addr_indirect.get();
        if ind == 0 {
            return Ok(out);
        }
        let ib = IndirectBlock::from_block(self.disk.read_block(ind as usize)?);
        for i in 0..NINDIRECT {
            let p = ib.get(i);
            if p == 0 {
                break;
            }
            out.push(p);
        }
        Ok(out)
    }

    /// Number of data blocks `ip` holds.
    pub(crate) fn block_count(&mut self, ip: &Dinode) -> Result<usize> {
        Ok(self.file_blocks(ip)?.len())
    }

    /// Address of the `k`th data block, or `None` past the end of the list.
    pub(crate) fn nth_block(&mut self, ip: &Dinode, k: usize) -> Result<Option<u32>> {
        if k < NDIRECT {
            let p = ip.addr_direct[k].get();
            return Ok(if p == 0 { None } else { Some(p) });
        }
        if k >= MAXFILEBLK {
            return Ok(None);
        }
        let ind = ip.addr_indirect.get();
        if ind == 0 {
            return Ok(None);
        }
        let ib = IndirectBlock::from_block(self.disk.read_block(ind as usize)?);
        let p = ib.get(k - NDIRECT);
        Ok(if p == 0 { None } else { Some(p) })
    }

    /// Address of the last data block. Every live file holds at least one.
    pub(crate) fn last_block(&mut self, ip: &Dinode) -> Result<u32> {
        self.file_blocks(ip)?
            .last()
            .copied()
            .ok_or(SfsError::Corrupted("live inode has no data blocks"))
    }

    /// The block following `b` in `ip`'s chain, or `None` if `b` is last.
    pub(crate) fn next_block_after(&mut self, ip: &Dinode, b: u32) -> Result<Option<u32>> {
        let blocks = self.file_blocks(ip)?;
        match blocks.iter().position(|&p| p == b) {
            Some(i) => Ok(blocks.get(i + 1).copied()),
            None => Err(SfsError::Corrupted("cursor block not in file chain")),
        }
    }

    /// Byte offset within the last block at which the file's bytes end.
    ///
    /// When the size fills the block list exactly, the end byte is `BSIZE`:
    /// the last block is full and no new block has been appended yet.
    pub(crate) fn end_byte(&mut self, ip: &Dinode) -> Result<usize> {
        let size = ip.size_bytes();
        let n = self.block_count(ip)?;
        if size > 0 && size == n * BSIZE {
            Ok(BSIZE)
        } else {
            Ok(size % BSIZE)
        }
    }

    /// Grow the file at `inum` by one freshly allocated data block and
    /// return its address.
    ///
    /// The block lands in the first zero direct slot, else in the indirect
    /// block, allocating and persisting a fresh indirect block when the
    /// direct list is full. If the pointer list cannot take another entry,
    /// the claimed data block is released before the error returns.
    pub(crate) fn append_block(&mut self, inum: u32) -> Result<u32> {
        let mut ip = self.ifile[inum as usize];
        let b = self.balloc()?;

        if let Some(slot) = ip.addr_direct.iter().position(|p| p.get() == 0) {
            ip.addr_direct[slot] = U32::new(b);
            self.ifile[inum as usize] = ip;
            return Ok(b);
        }

        let ind = ip.addr_indirect.get();
        if ind == 0 {
            let ind = match self.balloc() {
                Ok(ind) => ind,
                Err(e) => {
                    self.bfree(b)?;
                    return Err(e);
                }
            };
            let mut ib = IndirectBlock::zeroed();
            ib.set(0, b);
            self.disk.write_block(ind as usize, ib.as_block())?;
            ip.addr_indirect = U32::new(ind);
            self.ifile[inum as usize] = ip;
            return Ok(b);
        }

        let mut ib = IndirectBlock::from_block(self.disk.read_block(ind as usize)?);
        match (0..NINDIRECT).find(|&i| ib.get(i) == 0) {
            Some(i) => {
                ib.set(i, b);
                self.disk.write_block(ind as usize, ib.as_block())?;
                Ok(b)
            }
            None => {
                self.bfree(b)?;
                Err(SfsError::PointerListExhausted)
            }
        }
    }
}
