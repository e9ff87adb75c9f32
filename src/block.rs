use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

/// Raw status reported by a block device or filesystem driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const DEVICE_ERROR: ErrorCode = ErrorCode(-4001);
    pub const INVALID_PARTITION: ErrorCode = ErrorCode(-5001);
    pub const INVALID_MBR: ErrorCode = ErrorCode(-5002);

    pub const fn code(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#X})", self.0, self.0)
    }
}

pub trait BlockDevice {
    fn init(&mut self) -> Result<(), ErrorCode>;
    fn deinit(&mut self) -> Result<(), ErrorCode>;
    fn read_block(&mut self, block_id: u64, buf: &mut [u8]) -> Result<(), ErrorCode>;
    fn write_block(&mut self, block_id: u64, buf: &[u8]) -> Result<(), ErrorCode>;
    fn block_size(&self) -> usize;
    fn num_blocks(&self) -> u64;

    /// Capacity in bytes.
    fn size(&self) -> u64 {
        self.num_blocks() * self.block_size() as u64
    }
}

/// RAM-backed block device, zero-filled on creation.
#[derive(Debug, Clone)]
pub struct HeapBlockDevice {
    data: Vec<u8>,
    block_size: usize,
    initialized: bool,
}

impl HeapBlockDevice {
    pub fn new(block_size: usize, num_blocks: u64) -> Self {
        Self {
            data: vec![0u8; block_size * num_blocks as usize],
            block_size,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn range(&self, block_id: u64, len: usize) -> Result<core::ops::Range<usize>, ErrorCode> {
        if len != self.block_size || block_id >= self.num_blocks() {
            return Err(ErrorCode::DEVICE_ERROR);
        }
        let start = block_id as usize * self.block_size;
        Ok(start..start + len)
    }
}

impl BlockDevice for HeapBlockDevice {
    fn init(&mut self) -> Result<(), ErrorCode> {
        self.initialized = true;
        Ok(())
    }

    fn deinit(&mut self) -> Result<(), ErrorCode> {
        self.initialized = false;
        Ok(())
    }

    fn read_block(&mut self, block_id: u64, buf: &mut [u8]) -> Result<(), ErrorCode> {
        let range = self.range(block_id, buf.len())?;
        buf.copy_from_slice(&self.data[range]);
        Ok(())
    }

    fn write_block(&mut self, block_id: u64, buf: &[u8]) -> Result<(), ErrorCode> {
        let range = self.range(block_id, buf.len())?;
        self.data[range].copy_from_slice(buf);
        Ok(())
    }

    fn block_size(&self) -> usize {
        self.block_size
    }

    fn num_blocks(&self) -> u64 {
        self.data.len().checked_div(self.block_size).unwrap_or(0) as u64
    }
}
