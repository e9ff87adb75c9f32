use alloc::string::{String, ToString};
use alloc::vec::Vec;
use log::debug;

use crate::error::LayoutError;
use crate::partition::{Extent, LINUX_NATIVE};
use crate::BLOCK_SIZE;

pub const MAX_PARTITIONS: usize = 2;
pub const PRIMARY_PARTITION_NUMBER: u8 = 1;
pub const SECONDARY_PARTITION_NUMBER: u8 = 2;
pub const MOUNT_POINT_PRIMARY: &str = "/fs";
pub const MOUNT_POINT_SECONDARY: &str = "/fs2";

/// One partition of the storage layout, in bytes of the base device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSpec {
    pub number: u8,
    pub start: u64,
    pub size: u64,
    pub part_type: u8,
    pub mount_point: String,
}

impl PartitionSpec {
    pub fn new(number: u8, start: u64, size: u64, mount_point: &str) -> Self {
        Self {
            number,
            start,
            size,
            part_type: LINUX_NATIVE,
            mount_point: mount_point.to_string(),
        }
    }

    /// Primary partition of `size` bytes at the start of the device
    pub fn primary(size: u64) -> Self {
        Self::new(PRIMARY_PARTITION_NUMBER, 0, size, MOUNT_POINT_PRIMARY)
    }

    /// Secondary partition of `size` bytes placed right after `primary`
    pub fn secondary(primary: &PartitionSpec, size: u64) -> Self {
        Self::new(
            SECONDARY_PARTITION_NUMBER,
            primary.end(),
            size,
            MOUNT_POINT_SECONDARY,
        )
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.size)
    }

    /// Mount point without its leading '/', as handed to the filesystem.
    pub fn mount_name(&self) -> &str {
        self.mount_point
            .strip_prefix('/')
            .unwrap_or(self.mount_point.as_str())
    }
}

/// Storage layout: no partitions (the whole device is one filesystem),
/// or one or two MBR partitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageConfig {
    pub(crate) partitions: Vec<PartitionSpec>,
    pub(crate) auto_partition: bool,
}

impl StorageConfig {
    /// Whole device, no partition table
    pub fn single() -> Self {
        Self::default()
    }

    pub fn partitioned(primary: PartitionSpec, secondary: Option<PartitionSpec>) -> Self {
        let mut config = Self::default().with_partition(primary);
        if let Some(secondary) = secondary {
            config = config.with_partition(secondary);
        }
        config
    }

    pub fn with_partition(mut self, spec: PartitionSpec) -> Self {
        self.partitions.push(spec);
        self
    }

    /// Write missing partitions into the MBR instead of failing bring-up.
    pub fn with_auto_partition(mut self, enabled: bool) -> Self {
        self.auto_partition = enabled;
        self
    }

    pub fn partitions(&self) -> &[PartitionSpec] {
        &self.partitions
    }

    pub fn auto_partition(&self) -> bool {
        self.auto_partition
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// Checks everything that does not depend on the device.
    pub fn validate(&self) -> Result<(), LayoutError> {
        if self.partitions.len() > MAX_PARTITIONS {
            return Err(LayoutError::TooManyPartitions(self.partitions.len()));
        }

        for (i, spec) in self.partitions.iter().enumerate() {
            if spec.number == 0 || spec.number > 4 {
                return Err(LayoutError::InvalidNumber(spec.number));
            }
            if spec.size == 0 {
                return Err(LayoutError::EmptyPartition(spec.number));
            }
            for other in &self.partitions[..i] {
                if other.number == spec.number {
                    return Err(LayoutError::DuplicateNumber(spec.number));
                }
                if spec.start < other.end() && other.start < spec.end() {
                    return Err(LayoutError::Overlap(other.number, spec.number));
                }
            }
        }
        Ok(())
    }

    /// Bytes the layout needs: the summed partition sizes, or the furthest
    /// partition end if that is larger.
    pub fn required_capacity(&self) -> u64 {
        let total = self
            .partitions
            .iter()
            .fold(0u64, |acc, spec| acc.saturating_add(spec.size));
        let furthest = self.partitions.iter().map(PartitionSpec::end).max().unwrap_or(0);
        total.max(furthest)
    }

    /// Block extents for every configured partition on a device of
    /// `capacity` bytes, in configured order.
    ///
    /// Starts are rounded up to a block and kept off block 0, where the
    /// table lives; ends are rounded down.
    pub fn layout(&self, capacity: u64, block_size: usize) -> Result<Vec<Extent>, LayoutError> {
        self.validate()?;

        if block_size < BLOCK_SIZE {
            return Err(LayoutError::BlockSizeTooSmall(block_size));
        }

        let required = self.required_capacity();
        if capacity < required {
            return Err(LayoutError::InsufficientCapacity {
                required,
                available: capacity,
            });
        }

        let block_size = block_size as u64;
        self.partitions
            .iter()
            .map(|spec| {
                let start_lba = spec.start.div_ceil(block_size).max(1);
                let end_lba = spec.end() / block_size;
                if end_lba <= start_lba {
                    return Err(LayoutError::EmptyPartition(spec.number));
                }
                if end_lba > u32::MAX as u64 {
                    return Err(LayoutError::OffsetOverflow(spec.number));
                }
                let extent = Extent {
                    start_lba,
                    blocks: end_lba - start_lba,
                };
                debug!("Partition {} laid out at {:?}", spec.number, extent);
                Ok(extent)
            })
            .collect()
    }
}
