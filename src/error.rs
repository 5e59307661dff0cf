//! Error type shared by every fallible operation.
//!
//! Errors are reported, never retried. An operation that fails midway
//! releases whatever it already claimed before returning.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SfsError>;

#[derive(Debug, Error)]
pub enum SfsError {
    /// Name absent from the live directory.
    #[error("no such file")]
    NotFound,

    /// The name is already present in the open-file table.
    #[error("file is already open")]
    AlreadyOpen,

    /// Every open-file table slot is taken.
    #[error("open-file table is full")]
    FdTableFull,

    /// Every inode in the inode file is in use.
    #[error("no free inode")]
    InodeTableFull,

    /// Every entry of the live directory is taken.
    #[error("directory is full")]
    DirectoryFull,

    /// The data region has no free block left.
    #[error("no free data block")]
    NoFreeBlock,

    /// The file has exhausted its direct and indirect pointers.
    #[error("file reached the pointer list limit")]
    PointerListExhausted,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// An on-disk invariant does not hold. Fatal at mount time.
    #[error("filesystem corrupted: {0}")]
    Corrupted(&'static str),

    /// Propagated from the block device emulator.
    #[error("disk i/o failed")]
    Io(#[from] io::Error),
}
