//! One-time storage bring-up.
//!
//! [`StorageHelper`] turns a raw block device into a mounted filesystem:
//! it initialises the device, probes the filesystem by unmounting and
//! remounting it, and reformats when the probe fails. With a partitioned
//! [`StorageConfig`] the same is done per MBR partition, and a missing
//! layout can be written on the spot.

use alloc::boxed::Box;
use alloc::vec::Vec;
use log::{debug, info, warn};

use crate::block::{BlockDevice, ErrorCode};
use crate::config::{PartitionSpec, StorageConfig};
use crate::error::{Result, StorageError};
use crate::fs::{FileSystem, FileSystemFactory};
use crate::partition::{self, MbrPartition};

/// Per-partition state the helper creates lazily and keeps for its lifetime
struct PartitionSlot {
    spec: PartitionSpec,
    partition: Option<MbrPartition>,
    fs: Option<Box<dyn FileSystem>>,
}

impl PartitionSlot {
    fn new(spec: PartitionSpec) -> Self {
        Self {
            spec,
            partition: None,
            fs: None,
        }
    }
}

/// Storage bring-up manager.
///
/// The block device and the default filesystem are borrowed from the
/// caller and never replaced. Partition objects and their filesystems are
/// created here and owned by the helper.
pub struct StorageHelper<'a, B, F: ?Sized> {
    bd: Option<&'a mut B>,
    fs: &'a mut F,
    config: StorageConfig,
    slots: Vec<PartitionSlot>,
    factory: Option<Box<dyn FileSystemFactory + 'a>>,
    capacity: u64,
    init_done: bool,
}

impl<'a, B, F> StorageHelper<'a, B, F>
where
    B: BlockDevice,
    F: FileSystem + ?Sized,
{
    /// Rejects layouts that can never be brought up, such as more than two
    /// partitions, before any device is touched.
    pub fn new(bd: Option<&'a mut B>, fs: &'a mut F, config: StorageConfig) -> Result<Self> {
        config.validate().map_err(|err| {
            warn!("Invalid storage configuration: {}", err);
            StorageError::InvalidLayout(err)
        })?;

        let slots = config
            .partitions()
            .iter()
            .cloned()
            .map(PartitionSlot::new)
            .collect();

        Ok(Self {
            bd,
            fs,
            config,
            slots,
            factory: None,
            capacity: 0,
            init_done: false,
        })
    }

    /// Sets how partition filesystems are built. Required in partition mode.
    pub fn with_factory(mut self, factory: impl FileSystemFactory + 'a) -> Self {
        self.factory = Some(Box::new(factory));
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.init_done
    }

    /// Device capacity in bytes, recorded by the first successful device init.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn partition(&self, number: u8) -> Option<&MbrPartition> {
        self.slots
            .iter()
            .find(|slot| slot.spec.number == number)?
            .partition
            .as_ref()
    }

    /// Filesystem mounted on partition `number`, once brought up.
    pub fn partition_fs(&mut self, number: u8) -> Option<&mut dyn FileSystem> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.spec.number == number)?;
        match slot.fs.as_mut() {
            Some(fs) => Some(&mut **fs),
            None => None,
        }
    }

    /// Brings storage up. Only the first successful call does any work.
    pub fn init(&mut self) -> Result<()> {
        if self.init_done {
            info!("Storage init already done");
            return Ok(());
        }

        let Some(bd) = self.bd.as_deref_mut() else {
            warn!("Storage init without a block device");
            return Err(StorageError::NoDevice);
        };

        if let Err(code) = bd.init() {
            warn!("Block device init failed with {}", code);
            return Err(StorageError::DeviceInit(code));
        }
        self.capacity = bd.size();
        debug!("Block device ready, {} bytes", self.capacity);

        if self.config.is_partitioned() {
            self.bring_up_partitions()?;
        } else {
            self.bring_up_single()?;
        }

        self.init_done = true;
        info!("Storage init done");
        Ok(())
    }

    /// Wipes every configured partition, or the whole-device filesystem.
    ///
    /// Stops at the first failing partition. Bring-up state is kept, so a
    /// later `init` stays a no-op.
    pub fn reformat_storage(&mut self) -> Result<()> {
        let Some(bd) = self.bd.as_deref_mut() else {
            warn!("Cannot reformat storage without a block device");
            return Err(StorageError::NoDevice);
        };

        let result = if self.slots.is_empty() {
            self.fs.reformat(bd).map_err(StorageError::Reformat)
        } else {
            reformat_partitions(&mut self.slots, bd)
        };

        match &result {
            Ok(()) => info!("Storage reformatted"),
            Err(err) => warn!("Storage reformat failed: {}", err),
        }
        result
    }

    fn bring_up_single(&mut self) -> Result<()> {
        let bd = self.bd.as_deref_mut().ok_or(StorageError::NoDevice)?;

        // No second probe after this reformat: its own status is final.
        if test_filesystem(&mut *self.fs, &mut *bd).is_err() {
            info!("Formatting storage ...");
            reformat_partition(&mut *self.fs, bd)?;
        }
        Ok(())
    }

    fn bring_up_partitions(&mut self) -> Result<()> {
        let bd = self.bd.as_deref_mut().ok_or(StorageError::NoDevice)?;
        let factory = self
            .factory
            .as_deref_mut()
            .ok_or(StorageError::NoFileSystemFactory)?;

        for index in 0..self.slots.len() {
            let number = self.slots[index].spec.number;
            if let Err(err) = init_and_mount_partition(&mut self.slots[index], &mut *bd, &mut *factory) {
                if !self.config.auto_partition() {
                    warn!("Partition {} init failed: {}", number, err);
                    return Err(err);
                }
                info!("Partition {} unavailable ({}), creating partitions", number, err);
                return create_partitions(&self.config, self.capacity, &mut self.slots, bd, factory);
            }
        }
        Ok(())
    }
}

/// Locates, initialises and mounts one partition.
///
/// The first time through, the filesystem is built by the factory. On any
/// later pass the filesystem already exists and the partition is reformatted
/// unconditionally. Either way the result is probed and reformatted if the
/// probe fails.
fn init_and_mount_partition<B: BlockDevice>(
    slot: &mut PartitionSlot,
    base: &mut B,
    factory: &mut dyn FileSystemFactory,
) -> Result<()> {
    let number = slot.spec.number;
    let partition = slot
        .partition
        .get_or_insert_with(|| MbrPartition::new(number));

    if let Err(code) = partition.init(&mut *base) {
        partition.deinit();
        warn!("Init of partition {} failed: {}", number, code);
        return Err(StorageError::PartitionInit {
            partition: number,
            code,
        });
    }

    let Some(mut dev) = partition.device(base) else {
        return Err(StorageError::PartitionInit {
            partition: number,
            code: ErrorCode::INVALID_PARTITION,
        });
    };

    let fresh = slot.fs.is_none();
    let fs = slot
        .fs
        .get_or_insert_with(|| factory.create(slot.spec.mount_name(), &mut dev));

    if !fresh {
        info!("Formatting partition {} ...", number);
        reformat_partition(&mut **fs, &mut dev)?;
    }

    if test_filesystem(&mut **fs, &mut dev).is_err() {
        info!("Formatting partition {} ...", number);
        reformat_partition(&mut **fs, &mut dev)?;
    }
    Ok(())
}

/// Writes the configured layout into the MBR and brings every partition up.
///
/// Capacity is checked for the whole layout before the first entry is
/// written, so a device that is too small is left untouched.
fn create_partitions<B: BlockDevice>(
    config: &StorageConfig,
    capacity: u64,
    slots: &mut [PartitionSlot],
    base: &mut B,
    factory: &mut dyn FileSystemFactory,
) -> Result<()> {
    let layout = config
        .layout(capacity, base.block_size())
        .map_err(|err| {
            warn!("Cannot create partitions: {}", err);
            StorageError::InvalidLayout(err)
        })?;

    for (slot, extent) in slots.iter_mut().zip(layout) {
        let number = slot.spec.number;
        info!("Creating partition {} ...", number);

        partition::write_entry(&mut *base, number, slot.spec.part_type, extent).map_err(|err| {
            warn!("Creating partition {} failed: {}", number, err);
            StorageError::PartitionCreate {
                partition: number,
                code: err.code(),
            }
        })?;

        init_and_mount_partition(slot, &mut *base, &mut *factory)?;
    }
    Ok(())
}

fn reformat_partitions<B: BlockDevice>(slots: &mut [PartitionSlot], base: &mut B) -> Result<()> {
    for slot in slots.iter_mut() {
        let number = slot.spec.number;
        let (Some(partition), Some(fs)) = (slot.partition.as_ref(), slot.fs.as_mut()) else {
            warn!("Partition {} was never brought up", number);
            return Err(StorageError::NotMounted { partition: number });
        };
        let Some(mut dev) = partition.device(&mut *base) else {
            warn!("Partition {} is not initialised", number);
            return Err(StorageError::NotMounted { partition: number });
        };

        reformat_partition(&mut **fs, &mut dev).inspect_err(|_| {
            warn!("Formatting partition {} failed", number);
        })?;
    }
    Ok(())
}

fn reformat_partition<F: FileSystem + ?Sized>(fs: &mut F, dev: &mut dyn BlockDevice) -> Result<()> {
    debug!("Reformatting filesystem");
    fs.reformat(dev).map_err(|code| {
        warn!("Reformat failed with {}", code);
        StorageError::Reformat(code)
    })
}

/// Unmount then mount again; fails if the driver rejects either step.
fn test_filesystem<F: FileSystem + ?Sized>(fs: &mut F, dev: &mut dyn BlockDevice) -> Result<()> {
    if let Err(code) = fs.unmount() {
        warn!("Filesystem probe: unmount failed with {}", code);
        return Err(StorageError::Probe);
    }
    if let Err(code) = fs.mount(dev) {
        warn!("Filesystem probe: mount failed with {}", code);
        return Err(StorageError::Probe);
    }
    Ok(())
}
