use alloc::boxed::Box;

use crate::block::{BlockDevice, ErrorCode};

/// Mountable filesystem driver.
///
/// The backing device is passed on every call that touches storage, so a
/// driver can be bound to a whole disk or to a partition view alike.
pub trait FileSystem {
    fn mount(&mut self, dev: &mut dyn BlockDevice) -> Result<(), ErrorCode>;
    fn unmount(&mut self) -> Result<(), ErrorCode>;
    /// Lay down a fresh, empty filesystem on `dev` and leave it mounted.
    fn reformat(&mut self, dev: &mut dyn BlockDevice) -> Result<(), ErrorCode>;
}

/// Builds the filesystem for a partition the first time it is brought up.
///
/// Construction is expected to attempt a mount on `dev`; whether it
/// succeeded is judged afterwards by an unmount/remount probe.
pub trait FileSystemFactory {
    fn create(&mut self, name: &str, dev: &mut dyn BlockDevice) -> Box<dyn FileSystem>;
}

impl<F> FileSystemFactory for F
where
    F: FnMut(&str, &mut dyn BlockDevice) -> Box<dyn FileSystem>,
{
    fn create(&mut self, name: &str, dev: &mut dyn BlockDevice) -> Box<dyn FileSystem> {
        self(name, dev)
    }
}
