//! Logical Units and their backing storage

use crate::sense::SenseCode;
use core::borrow::BorrowMut;

/// Linear, byte-addressable storage behind a single Logical Unit
///
/// Offsets are always `lba * block_size` of the owning [LogicalUnit], and every access
/// covers whole blocks or a part of a pipe buffer. Implementations are free to block.
pub trait BackingStore {
    type Error;

    /// Fills `dst` with bytes starting at `offset`
    fn read(&mut self, offset: u64, dst: &mut [u8]) -> Result<(), Self::Error>;

    /// Stores `src` starting at `offset`
    fn write(&mut self, offset: u64, src: &[u8]) -> Result<(), Self::Error>;

    /// Makes previous writes durable
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// An access beyond the end of a [RamDisk]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OutOfRange;

/// Memory backed storage
pub struct RamDisk<B: BorrowMut<[u8]>> {
    data: B,
}

impl<B: BorrowMut<[u8]>> RamDisk<B> {
    pub fn new(data: B) -> Self {
        Self { data }
    }

    /// Number of whole blocks of `block_size` bytes
    pub fn block_count(&self, block_size: u32) -> u32 {
        (self.data.borrow().len() / block_size as usize) as u32
    }

    pub fn as_slice(&self) -> &[u8] {
        self.data.borrow()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.data.borrow_mut()
    }

    fn range(&self, offset: u64, len: usize) -> Result<core::ops::Range<usize>, OutOfRange> {
        let start = usize::try_from(offset).map_err(|_| OutOfRange)?;
        let end = start.checked_add(len).ok_or(OutOfRange)?;
        if end > self.data.borrow().len() {
            return Err(OutOfRange);
        }
        Ok(start..end)
    }
}

impl<B: BorrowMut<[u8]>> BackingStore for RamDisk<B> {
    type Error = OutOfRange;

    fn read(&mut self, offset: u64, dst: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, dst.len())?;
        dst.copy_from_slice(&self.data.borrow()[range]);
        Ok(())
    }

    fn write(&mut self, offset: u64, src: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, src.len())?;
        self.data.borrow_mut()[range].copy_from_slice(src);
        Ok(())
    }
}

/// A single addressable storage unit
///
/// Geometry is fixed at creation. Media presence, the stopped flag and the last
/// sense are only changed by the transport worker.
pub struct LogicalUnit<S> {
    store: S,
    block_size: u32,
    block_count: u32,
    media_present: bool,
    stopped: bool,
    writable: bool,
    sense: SenseCode,
}

impl<S: BackingStore> LogicalUnit<S> {
    /// Creates a writable unit with media present
    ///
    /// The initial sense is [SenseCode::DeviceReset].
    pub fn new(store: S, block_size: u32, block_count: u32) -> Self {
        Self {
            store,
            block_size,
            block_count,
            media_present: true,
            stopped: false,
            writable: true,
            sense: SenseCode::DeviceReset,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn without_media(mut self) -> Self {
        self.media_present = false;
        self
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    /// Address of the last block or 0 for an empty unit
    pub fn last_lba(&self) -> u32 {
        self.block_count.saturating_sub(1)
    }

    pub fn is_media_present(&self) -> bool {
        self.media_present
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Media present and not stopped by the host
    pub fn is_ready(&self) -> bool {
        self.media_present && !self.stopped
    }

    pub fn last_sense(&self) -> SenseCode {
        self.sense
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Whether `count` blocks starting at `lba` fit into the unit
    pub fn contains(&self, lba: u32, count: u32) -> bool {
        lba as u64 + count as u64 <= self.block_count as u64
    }

    /// Byte offset of `lba` in the backing store
    pub fn offset_of(&self, lba: u32) -> u64 {
        lba as u64 * self.block_size as u64
    }

    pub(crate) fn set_sense(&mut self, sense: SenseCode) {
        self.sense = sense;
    }

    pub(crate) fn set_stopped(&mut self, stopped: bool) {
        self.stopped = stopped;
    }

    pub(crate) fn set_media_present(&mut self, present: bool) {
        self.media_present = present;
        self.sense = SenseCode::MediaChanged;
    }

    /// State after a bus reset or a new configuration
    pub(crate) fn power_on_reset(&mut self) {
        self.stopped = false;
        self.sense = SenseCode::DeviceReset;
    }
}

#[cfg(test)]
mod tests {
    use crate::lun::{BackingStore, LogicalUnit, OutOfRange, RamDisk};
    use crate::sense::SenseCode;

    #[test]
    fn ram_disk_bounds() {
        let mut disk = RamDisk::new([0u8; 1024]);
        assert_eq!(2, disk.block_count(512));
        assert_eq!(Ok(()), disk.write(1020, &[1, 2, 3, 4]));
        assert_eq!(Err(OutOfRange), disk.write(1021, &[1, 2, 3, 4]));
        assert_eq!(Err(OutOfRange), disk.read(u64::MAX, &mut [0u8; 1]));

        let mut dst = [0u8; 4];
        assert_eq!(Ok(()), disk.read(1020, &mut dst));
        assert_eq!([1, 2, 3, 4], dst);
    }

    #[test]
    fn geometry() {
        let lun = LogicalUnit::new(RamDisk::new([0u8; 2048]), 512, 4);
        assert_eq!(3, lun.last_lba());
        assert!(lun.contains(0, 4));
        assert!(lun.contains(3, 1));
        assert!(!lun.contains(3, 2));
        assert!(!lun.contains(u32::MAX, 1));
        assert_eq!(1536, lun.offset_of(3));
    }

    #[test]
    fn readiness() {
        let mut lun = LogicalUnit::new(RamDisk::new([0u8; 512]), 512, 1);
        assert!(lun.is_ready());
        assert_eq!(SenseCode::DeviceReset, lun.last_sense());

        lun.set_stopped(true);
        assert!(!lun.is_ready());

        lun.power_on_reset();
        assert!(lun.is_ready());

        lun.set_media_present(false);
        assert!(!lun.is_ready());
        assert_eq!(SenseCode::MediaChanged, lun.last_sense());

        let lun = LogicalUnit::new(RamDisk::new([0u8; 512]), 512, 1).without_media();
        assert!(!lun.is_ready());
    }
}
