//! Instrumented block devices and filesystems for bring-up tests

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use storage_helper::{BlockDevice, ErrorCode, FileSystem, HeapBlockDevice};

pub const MIB: u64 = 1024 * 1024;
pub const SECTOR: usize = 512;

/// Superblock marker written by [`SignatureFs::reformat`]
pub const MAGIC: &[u8; 8] = b"SIGFS001";

pub const ERR_NO_FS: ErrorCode = ErrorCode(-19);
pub const ERR_NOT_MOUNTED: ErrorCode = ErrorCode(-22);

#[derive(Debug, Default)]
pub struct DeviceStats {
    pub inits: Cell<u32>,
    pub deinits: Cell<u32>,
    pub reads: Cell<u32>,
    pub writes: Cell<u32>,
    pub table_writes: Cell<u32>,
}

impl DeviceStats {
    pub fn io(&self) -> u32 {
        self.reads.get() + self.writes.get()
    }
}

/// RAM disk that counts every call and can be told to fail `init`
pub struct TrackedDevice {
    pub inner: HeapBlockDevice,
    pub stats: Rc<DeviceStats>,
    pub fail_init: Option<ErrorCode>,
}

impl TrackedDevice {
    pub fn new(bytes: u64) -> Self {
        Self {
            inner: HeapBlockDevice::new(SECTOR, bytes / SECTOR as u64),
            stats: Rc::new(DeviceStats::default()),
            fail_init: None,
        }
    }

    /// Device already carrying a valid whole-disk filesystem
    pub fn formatted(bytes: u64) -> Self {
        let mut dev = Self::new(bytes);
        write_superblock(&mut dev.inner, 0);
        dev
    }

    pub fn block(&self, block_id: u64) -> &[u8] {
        let start = block_id as usize * SECTOR;
        &self.inner.as_bytes()[start..start + SECTOR]
    }
}

impl BlockDevice for TrackedDevice {
    fn init(&mut self) -> Result<(), ErrorCode> {
        self.stats.inits.set(self.stats.inits.get() + 1);
        match self.fail_init {
            Some(code) => Err(code),
            None => self.inner.init(),
        }
    }

    fn deinit(&mut self) -> Result<(), ErrorCode> {
        self.stats.deinits.set(self.stats.deinits.get() + 1);
        self.inner.deinit()
    }

    fn read_block(&mut self, block_id: u64, buf: &mut [u8]) -> Result<(), ErrorCode> {
        self.stats.reads.set(self.stats.reads.get() + 1);
        self.inner.read_block(block_id, buf)
    }

    fn write_block(&mut self, block_id: u64, buf: &[u8]) -> Result<(), ErrorCode> {
        self.stats.writes.set(self.stats.writes.get() + 1);
        if block_id == 0 {
            self.stats.table_writes.set(self.stats.table_writes.get() + 1);
        }
        self.inner.write_block(block_id, buf)
    }

    fn block_size(&self) -> usize {
        self.inner.block_size()
    }

    fn num_blocks(&self) -> u64 {
        self.inner.num_blocks()
    }
}

/// Writes the filesystem marker at `block_id` of a raw device.
pub fn write_superblock(dev: &mut dyn BlockDevice, block_id: u64) {
    let mut block = vec![0u8; dev.block_size()];
    block[..MAGIC.len()].copy_from_slice(MAGIC);
    dev.write_block(block_id, &block).expect("superblock write");
}

#[derive(Debug, Default)]
pub struct FsStats {
    pub mounts: Cell<u32>,
    pub failed_mounts: Cell<u32>,
    pub unmounts: Cell<u32>,
    pub reformats: Cell<u32>,
    pub created: RefCell<Vec<String>>,
}

impl FsStats {
    pub fn calls(&self) -> u32 {
        self.mounts.get() + self.failed_mounts.get() + self.unmounts.get() + self.reformats.get()
    }
}

/// Filesystem whose only structure is a magic superblock in block 0 and
/// a data block in block 1.
pub struct SignatureFs {
    pub name: String,
    pub mounted: bool,
    pub stats: Rc<FsStats>,
    pub fail_reformat: Option<ErrorCode>,
}

impl SignatureFs {
    pub fn new(name: &str) -> Self {
        Self::with_stats(name, Rc::new(FsStats::default()))
    }

    /// Builds the filesystem and tries to mount `dev`, keeping it unmounted
    /// if no superblock is found.
    pub fn mounted_on(name: &str, dev: &mut dyn BlockDevice) -> Self {
        let mut fs = Self::new(name);
        let _ = fs.mount(dev);
        fs
    }

    pub fn with_stats(name: &str, stats: Rc<FsStats>) -> Self {
        Self {
            name: name.to_string(),
            mounted: false,
            stats,
            fail_reformat: None,
        }
    }
}

impl FileSystem for SignatureFs {
    fn mount(&mut self, dev: &mut dyn BlockDevice) -> Result<(), ErrorCode> {
        let mut block = vec![0u8; dev.block_size()];
        dev.read_block(0, &mut block)?;
        if &block[..MAGIC.len()] != MAGIC {
            self.stats.failed_mounts.set(self.stats.failed_mounts.get() + 1);
            return Err(ERR_NO_FS);
        }
        self.stats.mounts.set(self.stats.mounts.get() + 1);
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), ErrorCode> {
        self.stats.unmounts.set(self.stats.unmounts.get() + 1);
        if !self.mounted {
            return Err(ERR_NOT_MOUNTED);
        }
        self.mounted = false;
        Ok(())
    }

    fn reformat(&mut self, dev: &mut dyn BlockDevice) -> Result<(), ErrorCode> {
        self.stats.reformats.set(self.stats.reformats.get() + 1);
        if let Some(code) = self.fail_reformat {
            return Err(code);
        }
        self.mounted = false;
        write_superblock(dev, 0);
        let blank = vec![0u8; dev.block_size()];
        dev.write_block(1, &blank)?;
        self.mounted = true;
        Ok(())
    }
}

/// Factory building a [`SignatureFs`] per partition, mounting on creation.
pub fn signature_factory(
    stats: Rc<FsStats>,
) -> impl FnMut(&str, &mut dyn BlockDevice) -> Box<dyn FileSystem> {
    move |name: &str, dev: &mut dyn BlockDevice| -> Box<dyn FileSystem> {
        stats.created.borrow_mut().push(name.to_string());
        let mut fs = SignatureFs::with_stats(name, stats.clone());
        let _ = fs.mount(dev);
        Box::new(fs)
    }
}

/// Like [`signature_factory`], but every filesystem built fails `reformat` with `code`.
pub fn failing_factory(
    stats: Rc<FsStats>,
    code: ErrorCode,
) -> impl FnMut(&str, &mut dyn BlockDevice) -> Box<dyn FileSystem> {
    move |name: &str, dev: &mut dyn BlockDevice| -> Box<dyn FileSystem> {
        stats.created.borrow_mut().push(name.to_string());
        let mut fs = SignatureFs::with_stats(name, stats.clone());
        fs.fail_reformat = Some(code);
        let _ = fs.mount(dev);
        Box::new(fs)
    }
}
