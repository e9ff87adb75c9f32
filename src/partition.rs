use alloc::{fmt, vec, vec::Vec};
use log::{debug, info, warn};
use mbrs::Mbr;

use crate::block::{BlockDevice, ErrorCode};
use crate::error::PartitionError;
use crate::BLOCK_SIZE;

const TABLE_OFFSET: usize = 446;
const ENTRY_SIZE: usize = 16;
const MAX_ENTRIES: u8 = 4;
const SIGNATURE: [u8; 2] = [0x55, 0xAA];

/// Type byte of the single entry in a GPT protective MBR
pub const PROTECTIVE_TYPE: u8 = 0xEE;
/// Type byte for a Linux native partition
pub const LINUX_NATIVE: u8 = 0x83;

/// Contiguous block range, in units of the base device's blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub start_lba: u64,
    pub blocks: u64,
}

impl Extent {
    pub fn end_lba(&self) -> u64 {
        self.start_lba + self.blocks
    }

    pub fn overlaps(&self, other: &Extent) -> bool {
        self.start_lba < other.end_lba() && other.start_lba < self.end_lba()
    }
}

/// Sector 0 of a block device, viewed as an MBR partition table
#[derive(Clone)]
pub struct PartitionTable {
    sector: [u8; BLOCK_SIZE],
}

impl PartitionTable {
    /// A blank table carrying only the boot signature
    pub fn empty() -> Self {
        let mut sector = [0u8; BLOCK_SIZE];
        sector[510..].copy_from_slice(&SIGNATURE);
        Self { sector }
    }

    pub fn read<T: BlockDevice + ?Sized>(dev: &mut T) -> Result<Self, PartitionError> {
        let block = read_first_block(dev)?;
        let mut sector = [0u8; BLOCK_SIZE];
        sector.copy_from_slice(&block[..BLOCK_SIZE]);
        Ok(Self { sector })
    }

    /// Writes the table back, keeping any bytes past the first 512 of block 0.
    pub fn write<T: BlockDevice + ?Sized>(&self, dev: &mut T) -> Result<(), PartitionError> {
        let mut block = read_first_block(dev)?;
        block[..BLOCK_SIZE].copy_from_slice(&self.sector);
        dev.write_block(0, &block).map_err(|code| {
            warn!("Failed to write MBR: {}", code);
            PartitionError::Io(code)
        })
    }

    pub fn has_signature(&self) -> bool {
        self.sector[510..] == SIGNATURE
    }

    /// A GPT disk: some entry carries the protective type byte.
    pub fn is_protective(&self) -> bool {
        let Some(number) = (1..=MAX_ENTRIES).find(|&n| self.raw_type(n) == PROTECTIVE_TYPE) else {
            return false;
        };
        let used = (1..=MAX_ENTRIES).filter(|&n| self.raw_type(n) != 0).count();
        if used > 1 {
            warn!("Hybrid MBR: protective entry {} beside {} others", number, used - 1);
        }
        true
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.sector
    }

    /// Looks up entry `number` (1..=4)
    pub fn entry(&self, number: u8) -> Result<MbrEntry, PartitionError> {
        if number == 0 || number > MAX_ENTRIES {
            return Err(PartitionError::PartitionNotFound);
        }
        if !self.has_signature() {
            return Err(PartitionError::InvalidSignature);
        }
        if self.is_protective() {
            return Err(PartitionError::ProtectiveMbr);
        }

        let mbr = Mbr::try_from_bytes(&self.sector).map_err(|_| PartitionError::InvalidData)?;
        let part_type = self.raw_type(number);

        match &mbr.partition_table.entries[(number - 1) as usize] {
            Some(partinfo) if part_type != 0 => Ok(MbrEntry::new(
                number,
                part_type,
                Extent {
                    start_lba: partinfo.start_sector_lba() as u64,
                    blocks: partinfo.sector_count_lba() as u64,
                },
            )),
            _ => Err(PartitionError::PartitionNotFound),
        }
    }

    /// Gets all valid entries
    pub fn entries(&self) -> Vec<MbrEntry> {
        (1..=MAX_ENTRIES)
            .filter_map(|number| self.entry(number).ok())
            .collect()
    }

    /// Replaces entry `number`, refusing ranges that collide with another entry.
    pub fn set_entry(
        &mut self,
        number: u8,
        part_type: u8,
        extent: Extent,
    ) -> Result<(), PartitionError> {
        if number == 0 || number > MAX_ENTRIES {
            return Err(PartitionError::PartitionNotFound);
        }
        let last_lba = extent
            .end_lba()
            .checked_sub(1)
            .ok_or(PartitionError::OutOfBounds)?;
        let start = u32::try_from(extent.start_lba).map_err(|_| PartitionError::OffsetOverflow)?;
        let count = u32::try_from(extent.blocks).map_err(|_| PartitionError::OffsetOverflow)?;
        u32::try_from(last_lba).map_err(|_| PartitionError::OffsetOverflow)?;

        for other in (1..=MAX_ENTRIES).filter(|&n| n != number) {
            if self.raw_type(other) != 0 && self.raw_extent(other).overlaps(&extent) {
                warn!("Partition {} would overlap entry {}", number, other);
                return Err(PartitionError::Overlap(other));
            }
        }

        let offset = entry_offset(number);
        let entry = &mut self.sector[offset..offset + ENTRY_SIZE];
        entry[0] = 0x00;
        entry[1..4].copy_from_slice(&lba_to_chs(extent.start_lba));
        entry[4] = part_type;
        entry[5..8].copy_from_slice(&lba_to_chs(last_lba));
        entry[8..12].copy_from_slice(&start.to_le_bytes());
        entry[12..16].copy_from_slice(&count.to_le_bytes());
        Ok(())
    }

    fn raw_type(&self, number: u8) -> u8 {
        self.sector[entry_offset(number) + 4]
    }

    fn raw_extent(&self, number: u8) -> Extent {
        let offset = entry_offset(number);
        let field = |at: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&self.sector[offset + at..offset + at + 4]);
            u32::from_le_bytes(bytes) as u64
        };
        Extent {
            start_lba: field(8),
            blocks: field(12),
        }
    }
}

impl fmt::Debug for PartitionTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionTable")
            .field("signature", &self.has_signature())
            .field("entries", &self.entries())
            .finish()
    }
}

/// Writes MBR entry `number` covering the byte range `start..end` of `dev`.
///
/// `start` is rounded up to a block boundary and never lands on block 0,
/// which holds the table itself; `end` is rounded down. A device without
/// a boot signature gets a fresh table.
pub fn create_partition<T: BlockDevice + ?Sized>(
    dev: &mut T,
    number: u8,
    part_type: u8,
    start: u64,
    end: u64,
) -> Result<Extent, PartitionError> {
    let block_size = dev.block_size() as u64;
    if block_size < BLOCK_SIZE as u64 {
        return Err(PartitionError::UnsupportedBlockSize);
    }

    let start_lba = start.div_ceil(block_size).max(1);
    let end_lba = end / block_size;
    if end_lba <= start_lba || end_lba > dev.num_blocks() {
        warn!(
            "Partition {} range {:#x}..{:#x} does not fit {} blocks",
            number,
            start,
            end,
            dev.num_blocks()
        );
        return Err(PartitionError::OutOfBounds);
    }
    let extent = Extent {
        start_lba,
        blocks: end_lba - start_lba,
    };

    write_entry(dev, number, part_type, extent)?;
    Ok(extent)
}

/// Writes MBR entry `number` for an already block-aligned `extent`.
pub fn write_entry<T: BlockDevice + ?Sized>(
    dev: &mut T,
    number: u8,
    part_type: u8,
    extent: Extent,
) -> Result<(), PartitionError> {
    if extent.start_lba == 0 || extent.blocks == 0 || extent.end_lba() > dev.num_blocks() {
        return Err(PartitionError::OutOfBounds);
    }

    let mut table = PartitionTable::read(dev)?;
    if !table.has_signature() {
        info!("No MBR found, starting a fresh partition table");
        table = PartitionTable::empty();
    } else if table.is_protective() {
        warn!("Refusing to write MBR entry over a GPT disk");
        return Err(PartitionError::ProtectiveMbr);
    }

    table.set_entry(number, part_type, extent)?;
    table.write(dev)?;

    info!(
        "Created partition {} (type {:#04x}, LBA {}-{})",
        number,
        part_type,
        extent.start_lba,
        extent.end_lba() - 1
    );
    Ok(())
}

/// One partition of a base device, located through its MBR entry.
///
/// The extent is re-read from the table on every `init`, so a partition
/// object outlives changes to the layout.
#[derive(Debug)]
pub struct MbrPartition {
    number: u8,
    extent: Option<Extent>,
}

impl MbrPartition {
    pub fn new(number: u8) -> Self {
        MbrPartition {
            number,
            extent: None,
        }
    }

    pub fn number(&self) -> u8 {
        self.number
    }

    pub fn extent(&self) -> Option<Extent> {
        self.extent
    }

    pub fn init<B: BlockDevice + ?Sized>(&mut self, base: &mut B) -> Result<(), ErrorCode> {
        let entry = PartitionTable::read(base)?.entry(self.number)?;

        if entry.extent().end_lba() > base.num_blocks() {
            warn!(
                "Partition {} ends at LBA {} past device end {}",
                self.number,
                entry.extent().end_lba(),
                base.num_blocks()
            );
            return Err(PartitionError::OutOfBounds.code());
        }

        debug!("Partition {} initialised: {:?}", self.number, entry);
        self.extent = Some(entry.extent());
        Ok(())
    }

    /// Forgets the located extent; `device` returns `None` until the next `init`.
    pub fn deinit(&mut self) {
        self.extent = None;
    }

    /// Block view of the partition; `None` until `init` succeeds.
    pub fn device<'p, B: BlockDevice + ?Sized>(
        &self,
        base: &'p mut B,
    ) -> Option<PartitionDevice<'p, B>> {
        self.extent.map(|extent| PartitionDevice { base, extent })
    }
}

/// Bounds-checked window onto a base device
pub struct PartitionDevice<'p, B: ?Sized> {
    base: &'p mut B,
    extent: Extent,
}

impl<B: BlockDevice + ?Sized> PartitionDevice<'_, B> {
    fn translate(&self, block_id: u64) -> Result<u64, ErrorCode> {
        if block_id >= self.extent.blocks {
            return Err(ErrorCode::DEVICE_ERROR);
        }
        Ok(self.extent.start_lba + block_id)
    }
}

impl<B: BlockDevice + ?Sized> BlockDevice for PartitionDevice<'_, B> {
    fn init(&mut self) -> Result<(), ErrorCode> {
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), ErrorCode> {
        Ok(())
    }

    fn read_block(&mut self, block_id: u64, buf: &mut [u8]) -> Result<(), ErrorCode> {
        let lba = self.translate(block_id)?;
        self.base.read_block(lba, buf)
    }

    fn write_block(&mut self, block_id: u64, buf: &[u8]) -> Result<(), ErrorCode> {
        let lba = self.translate(block_id)?;
        self.base.write_block(lba, buf)
    }

    fn block_size(&self) -> usize {
        self.base.block_size()
    }

    fn num_blocks(&self) -> u64 {
        self.extent.blocks
    }
}

/// MBR entry structure
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MbrEntry {
    partition_index: u8,
    part_type: u8,
    extent: Extent,
}

impl MbrEntry {
    pub fn new(partition_index: u8, part_type: u8, extent: Extent) -> Self {
        MbrEntry {
            partition_index,
            part_type,
            extent,
        }
    }

    pub fn partition_index(&self) -> u8 {
        self.partition_index
    }

    pub fn part_type(&self) -> u8 {
        self.part_type
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }
}

impl fmt::Debug for MbrEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MbrEntry(index={}, type={:#04x}, start={}, size={})",
            self.partition_index, self.part_type, self.extent.start_lba, self.extent.blocks
        )
    }
}

fn entry_offset(number: u8) -> usize {
    TABLE_OFFSET + (number as usize - 1) * ENTRY_SIZE
}

fn read_first_block<T: BlockDevice + ?Sized>(dev: &mut T) -> Result<Vec<u8>, PartitionError> {
    let block_size = dev.block_size();
    if block_size < BLOCK_SIZE {
        return Err(PartitionError::UnsupportedBlockSize);
    }
    let mut block = vec![0u8; block_size];
    dev.read_block(0, &mut block).map_err(|code| {
        warn!("Failed to read MBR: {}", code);
        PartitionError::Io(code)
    })?;
    Ok(block)
}

/// CHS triple for `lba` on the conventional 255-head, 63-sector geometry.
/// Addresses past cylinder 1023 get the saturated 1023/254/63 marker.
fn lba_to_chs(lba: u64) -> [u8; 3] {
    const HEADS: u64 = 255;
    const SECTORS: u64 = 63;

    let cylinder = lba / (HEADS * SECTORS);
    if cylinder > 1023 {
        return [0xFE, 0xFF, 0xFF];
    }
    let head = (lba / SECTORS) % HEADS;
    let sector = lba % SECTORS + 1;
    [
        head as u8,
        sector as u8 | ((cylinder >> 2) & 0xC0) as u8,
        (cylinder & 0xFF) as u8,
    ]
}
