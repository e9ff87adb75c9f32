//! Storage bring-up for embedded devices.
//!
//! Takes a raw [`BlockDevice`] to a mounted [`FileSystem`] exactly once,
//! reformatting when the existing filesystem does not survive an
//! unmount/remount probe. Optionally splits the device into one or two MBR
//! partitions, each with its own filesystem, and writes that layout when it
//! is missing.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod block;
pub mod config;
pub mod error;
pub mod fs;
pub mod helper;
pub mod parse;
pub mod partition;

pub use crate::block::{BlockDevice, ErrorCode, HeapBlockDevice};
pub use crate::config::{PartitionSpec, StorageConfig};
pub use crate::error::{ConfigError, LayoutError, PartitionError, StorageError};
pub use crate::fs::{FileSystem, FileSystemFactory};
pub use crate::helper::StorageHelper;
pub use crate::partition::{Extent, MbrPartition, PartitionTable};

/// MBR sector size; partitioned devices need blocks at least this large.
pub const BLOCK_SIZE: usize = 512;
