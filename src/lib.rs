//! sfs: a shadowing file system on an emulated block device.
//!
//! A single virtual disk hosts a flat, single-directory filesystem whose
//! entire directory state can be committed into a small FIFO of snapshots
//! and rolled back again — a user-mode time machine. Files expose a
//! byte-oriented API with independent read and write cursors; `commit`
//! snapshots the live directory and `restore` brings a snapshot back.
//!
//! ```no_run
//! use sfs::Sfs;
//!
//! let mut fs = Sfs::mkfs("MyDisk", true)?;
//! let fd = fs.fopen("hello")?;
//! fs.fwrite(fd, b"hello, disk")?;
//! fs.fclose(fd)?;
//! fs.commit()?;
//! # Ok::<(), sfs::SfsError>(())
//! ```
//!
//! The filesystem is single-threaded and synchronous: every call mutates the
//! in-memory image and then flushes the affected blocks before returning.

#![deny(rust_2018_idioms)]
#![deny(unused_import_braces)]
#![deny(trivial_numeric_casts)]

pub mod bitmap;
pub mod disk;
pub mod error;
pub mod file;
pub mod fs;
pub mod param;

pub use crate::error::{Result, SfsError};
pub use crate::file::Fd;
pub use crate::fs::dir::FileName;
pub use crate::fs::Sfs;
