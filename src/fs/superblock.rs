//! On-disk superblock.
//!
//! Disk layout:
//! [ superblock | inode file | data region |
//!     shadow dirs (oldest first) | live dir | free bitmap | write mask ]
//!
//! Besides the magic and geometry, the superblock carries one j-node per
//! directory slot: the root inode of that snapshot's view of the inode file.
//! All slots share the single inode file in this design, so the j-nodes are
//! written at format and round-tripped on mount but never consulted, the
//! same treatment the write mask gets.

use core::mem;

use static_assertions::const_assert;
use zerocopy::byteorder::{LittleEndian as LE, I32, U32};
use zerocopy::{AsBytes, FromBytes};

use crate::disk::Block;
use crate::error::{Result, SfsError};
use crate::param::{BLOCKS_IFILE, BSIZE, INODE_SIZE, MAXDIRS, NBLOCKS, NDIRECT, NINODES};

use super::inode::Dinode;

const FSMAGIC: u32 = 0x5346_5331;

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct Superblock {
    /// Must be FSMAGIC.
    magic: U32<LE>,

    /// Block size in bytes.
    block_size: U32<LE>,

    /// Size of the device in blocks.
    nblocks: U32<LE>,

    /// Number of inodes in the inode file.
    ninodes: U32<LE>,

    /// Root inode of each directory slot's inode file view.
    jnodes: [Dinode; MAXDIRS],
}

const_assert!(mem::size_of::<Superblock>() == 16 + MAXDIRS * INODE_SIZE);
const_assert!(mem::size_of::<Superblock>() <= BSIZE);
// The inode file must be reachable from a j-node's direct pointers alone.
const_assert!(BLOCKS_IFILE <= NDIRECT);

impl Superblock {
    /// Superblock for a freshly formatted disk.
    pub fn new() -> Superblock {
        let mut jnode = Dinode::free();
        jnode.size = I32::new((NINODES * INODE_SIZE) as i32);
        for i in 0..BLOCKS_IFILE {
            jnode.addr_direct[i] = U32::new((1 + i) as u32);
        }
        Superblock {
            magic: U32::new(FSMAGIC),
            block_size: U32::new(BSIZE as u32),
            nblocks: U32::new(NBLOCKS as u32),
            ninodes: U32::new(NINODES as u32),
            jnodes: [jnode; MAXDIRS],
        }
    }

    /// Decode block 0. Refuses a bad magic or a geometry that does not match
    /// the compiled layout.
    pub fn from_block(b: &Block) -> Result<Superblock> {
        let sb = Superblock::read_from(&b[..mem::size_of::<Superblock>()])
            .ok_or(SfsError::Corrupted("short superblock"))?;
        if sb.magic.get() != FSMAGIC {
            return Err(SfsError::Corrupted("bad superblock magic"));
        }
        if sb.block_size.get() != BSIZE as u32
            || sb.nblocks.get() != NBLOCKS as u32
            || sb.ninodes.get() != NINODES as u32
        {
            return Err(SfsError::Corrupted("superblock geometry does not match build"));
        }
        Ok(sb)
    }

    /// Encode into block 0.
    pub fn to_block(&self) -> Block {
        let mut b = Block::zeroed();
        b[..mem::size_of::<Superblock>()].copy_from_slice(self.as_bytes());
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let sb = Superblock::new();
        let b = sb.to_block();
        let sb2 = Superblock::from_block(&b).unwrap();
        assert_eq!(sb2.magic.get(), FSMAGIC);
        assert_eq!(sb2.block_size.get(), BSIZE as u32);
        assert_eq!(sb2.jnodes[0].size.get(), (NINODES * INODE_SIZE) as i32);
        assert_eq!(sb2.jnodes[0].addr_direct[0].get(), 1);
        assert_eq!(
            sb2.jnodes[0].addr_direct[BLOCKS_IFILE - 1].get(),
            BLOCKS_IFILE as u32
        );
    }

    #[test]
    fn rejects_bad_magic() {
        let mut b = Superblock::new().to_block();
        b[0] ^= 0xff;
        assert!(Superblock::from_block(&b).is_err());
    }

    #[test]
    fn rejects_foreign_geometry() {
        let mut b = Superblock::new().to_block();
        // Corrupt the recorded block size (1024 = 0x0400 little-endian).
        b[5] = 0;
        assert!(Superblock::from_block(&b).is_err());
    }
}
