use alloc::string::String;
use thiserror::Error;

use crate::block::ErrorCode;

/// Result type for storage bring-up operations
pub type Result<T> = core::result::Result<T, StorageError>;

/// Errors surfaced by [`StorageHelper`](crate::StorageHelper)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No block device was supplied
    #[error("no block device")]
    NoDevice,

    /// The underlying block device failed to initialise
    #[error("block device init failed: {0}")]
    DeviceInit(ErrorCode),

    /// A partition could not be located or initialised
    #[error("init of partition {partition} failed: {code}")]
    PartitionInit { partition: u8, code: ErrorCode },

    /// Writing a partition table entry failed
    #[error("creating partition {partition} failed: {code}")]
    PartitionCreate { partition: u8, code: ErrorCode },

    /// A partition has no filesystem yet, so it cannot be reformatted
    #[error("partition {partition} is not mounted")]
    NotMounted { partition: u8 },

    /// Unmount or remount during a probe failed
    #[error("filesystem probe failed")]
    Probe,

    /// The filesystem driver failed to reformat
    #[error("reformat failed: {0}")]
    Reformat(ErrorCode),

    /// Partition mode needs a filesystem factory
    #[error("no filesystem factory for partition mode")]
    NoFileSystemFactory,

    /// Configured layout cannot be realised
    #[error("invalid partition layout: {0}")]
    InvalidLayout(#[from] LayoutError),
}

impl StorageError {
    /// Integer status: the driver's code where one was propagated, otherwise -1.
    pub fn status(&self) -> i32 {
        match self {
            Self::PartitionInit { code, .. }
            | Self::PartitionCreate { code, .. }
            | Self::Reformat(code) => code.code(),
            _ => -1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("{0} partitions configured, at most 2 are supported")]
    TooManyPartitions(usize),

    #[error("partition number {0} is outside 1..=4")]
    InvalidNumber(u8),

    #[error("partition number {0} configured twice")]
    DuplicateNumber(u8),

    #[error("partitions {0} and {1} overlap")]
    Overlap(u8, u8),

    #[error("partition {0} has no usable blocks")]
    EmptyPartition(u8),

    #[error("storage holds {available} bytes, layout needs {required}")]
    InsufficientCapacity { required: u64, available: u64 },

    #[error("block size {0} is smaller than an MBR sector")]
    BlockSizeTooSmall(usize),

    #[error("partition {0} lies beyond 32-bit LBA range")]
    OffsetOverflow(u8),
}

/// Errors from parsing a textual configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid size `{0}`")]
    InvalidSize(String),

    #[error("invalid boolean `{0}`")]
    InvalidBool(String),

    #[error("invalid partition type `{0}`")]
    InvalidType(String),

    #[error("mount point `{0}` must start with '/'")]
    InvalidMountPoint(String),

    #[error("`{0}` set before its partition size")]
    MissingPartition(String),

    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Faults in reading or editing an MBR partition table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PartitionError {
    /// Failed to read or write the MBR sector
    #[error("MBR I/O failed: {0}")]
    Io(ErrorCode),
    /// Sector 0 carries no 0x55AA signature
    #[error("invalid MBR signature")]
    InvalidSignature,
    /// Sector 0 could not be parsed as an MBR
    #[error("invalid MBR data")]
    InvalidData,
    /// Disk carries a protective MBR
    #[error("disk uses a GPT partition table")]
    ProtectiveMbr,
    /// Entry absent or out of 1..=4
    #[error("partition not found")]
    PartitionNotFound,
    /// Entry extends past the end of the device
    #[error("partition exceeds device bounds")]
    OutOfBounds,
    /// Requested range overlaps another entry
    #[error("partition overlaps entry {0}")]
    Overlap(u8),
    /// Offset calculation overflow
    #[error("offset calculation overflow")]
    OffsetOverflow,
    /// Block size cannot hold an MBR sector
    #[error("unsupported block size")]
    UnsupportedBlockSize,
}

impl PartitionError {
    /// Status code reported through the block device contract.
    pub fn code(self) -> ErrorCode {
        match self {
            Self::Io(code) => code,
            Self::InvalidSignature | Self::InvalidData | Self::ProtectiveMbr => {
                ErrorCode::INVALID_MBR
            }
            Self::UnsupportedBlockSize => ErrorCode::DEVICE_ERROR,
            _ => ErrorCode::INVALID_PARTITION,
        }
    }
}

impl From<PartitionError> for ErrorCode {
    fn from(err: PartitionError) -> Self {
        err.code()
    }
}
