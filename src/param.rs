//! Filesystem geometry.
//!
//! Every size in the on-disk format derives from the constants below. The
//! superblock records the four primary values so that a mounted image can be
//! checked against the compiled layout.

/// Block size in bytes.
pub const BSIZE: usize = 1024;

/// Number of blocks on the device.
pub const NBLOCKS: usize = 1024;

/// Number of shadow directory slots.
pub const NSHADOW: usize = 4;

/// Directory slots including the live slot 0.
pub const MAXDIRS: usize = NSHADOW + 1;

/// Number of inodes in the inode file.
pub const NINODES: usize = 200;

/// Direct block pointers per inode.
pub const NDIRECT: usize = 14;

/// Bytes per block pointer.
pub const PTR_SIZE: usize = 4;

/// On-disk inode size: size field, direct pointers, indirect pointer.
pub const INODE_SIZE: usize = (NDIRECT + 2) * PTR_SIZE;

/// Inodes per block.
pub const IPB: usize = BSIZE / INODE_SIZE;

/// Blocks occupied by the inode file.
pub const BLOCKS_IFILE: usize = (NINODES * INODE_SIZE + BSIZE - 1) / BSIZE;

/// First block of the data region.
pub const FIRST_DATA: usize = 1 + BLOCKS_IFILE;

/// Last block of the data region, inclusive. The directory slots start at
/// the next block.
pub const LAST_DATA: usize = NBLOCKS - 3 - MAXDIRS;

/// Block pointers per indirect block.
pub const NINDIRECT: usize = BSIZE / PTR_SIZE;

/// Maximum number of blocks a single file can hold.
pub const MAXFILEBLK: usize = NDIRECT + NINDIRECT;

/// Maximum file name length, terminating NUL not included.
pub const NAME_MAX: usize = 20;

/// Open-file table slots.
pub const NFD: usize = 32;

/// Block holding the free bitmap.
pub const FREEMAP_BLOCK: usize = NBLOCKS - 2;

/// Block holding the write mask.
pub const WMASK_BLOCK: usize = NBLOCKS - 1;

/// Default name of the emulated disk image.
pub const DISK_NAME: &str = "MyDisk";

/// Block holding directory slot `k`. Slot 0 is the live directory; higher
/// slots are older snapshots and live at lower block numbers.
pub const fn dir_block(k: usize) -> usize {
    NBLOCKS - 3 - k
}
