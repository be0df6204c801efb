//! Block-device capability consumed by the circular log manager.
//!
//! The engine never talks to a file or a flash chip directly; it talks to
//! whatever implements [`BlockDevice`]. Two implementations ship here: a
//! file-backed one for desktop testing and recovery-by-scan scenarios, and
//! an in-memory one for fast unit tests and RAM-backed embedded targets.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// `read/write/erase/sync` over fixed-size pages.
///
/// All pages are `page_size()` bytes. `erase` may be a no-op on backends
/// that don't distinguish erase from overwrite (e.g. [`MemoryBlockDevice`]);
/// flash-like backends should zero (or set to their erased value) the given
/// page range.
pub trait BlockDevice {
    fn page_size(&self) -> u32;

    fn read_page(&mut self, page_id: u32, buf: &mut [u8]) -> Result<()>;

    fn write_page(&mut self, page_id: u32, buf: &[u8]) -> Result<()>;

    fn erase(&mut self, start_page_id: u32, count: u32) -> Result<()>;

    fn sync(&mut self) -> Result<()>;
}

/// A [`BlockDevice`] backed by a single `std::fs::File`, addressed by
/// `page_id * page_size` seeks.
pub struct FileBlockDevice {
    file: File,
    page_size: u32,
}

impl FileBlockDevice {
    pub fn create<P: AsRef<Path>>(path: P, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file, page_size })
    }

    pub fn open<P: AsRef<Path>>(path: P, page_size: u32) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file, page_size })
    }

    /// Create a fresh file and pre-fill it with `num_pages` all-`0xFF` pages,
    /// matching the erased state of NOR/NAND flash.
    ///
    /// A plain `create`d file is zero-filled (sparse) rather than erased, so
    /// `CircularLog::recover_by_scan`'s never-written check (logical id
    /// `0xFFFFFFFF`) would instead read a spurious logical id of `0` out of
    /// the holes. Use this constructor for any store whose regions will be
    /// scanned by a fresh `Engine::init` with no manifest.
    pub fn create_erased<P: AsRef<Path>>(path: P, page_size: u32, num_pages: u32) -> Result<Self> {
        let mut dev = Self::create(path, page_size)?;
        let page = vec![0xFFu8; page_size as usize];
        for page_id in 0..num_pages {
            dev.write_page(page_id, &page)?;
        }
        dev.sync()?;
        Ok(dev)
    }

    /// Number of whole pages currently present in the backing file.
    pub fn page_count(&self) -> Result<u32> {
        let len = self.file.metadata()?.len();
        Ok((len / self.page_size as u64) as u32)
    }
}

impl BlockDevice for FileBlockDevice {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&mut self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&mut self, page_id: u32, buf: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))?;
        self.file.write_all(buf)?;
        Ok(())
    }

    fn erase(&mut self, _start_page_id: u32, _count: u32) -> Result<()> {
        // A plain file has no distinct erase step; overwrite-on-write is
        // sufficient. Flash-backed implementations of this trait should
        // actually erase here.
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// A [`BlockDevice`] backed by an in-memory byte buffer.
///
/// Useful for tests and for targets where the store lives entirely in RAM.
/// Erasing sets the affected pages to `0xFF`, matching the erased state of
/// NOR/NAND flash, so page-codec code that relies on "erased = all ones"
/// for min-key sentinels behaves the same as on a real device.
pub struct MemoryBlockDevice {
    data: Vec<u8>,
    page_size: u32,
}

impl MemoryBlockDevice {
    pub fn new(page_size: u32, num_pages: u32) -> Self {
        Self {
            data: vec![0xFFu8; page_size as usize * num_pages as usize],
            page_size,
        }
    }

    pub fn page_count(&self) -> u32 {
        self.data.len() as u32 / self.page_size
    }
}

impl BlockDevice for MemoryBlockDevice {
    fn page_size(&self) -> u32 {
        self.page_size
    }

    fn read_page(&mut self, page_id: u32, buf: &mut [u8]) -> Result<()> {
        let start = page_id as usize * self.page_size as usize;
        let end = start + self.page_size as usize;
        let region = self
            .data
            .get(start..end)
            .ok_or_else(|| Error::Format(format!("page {page_id} out of range")))?;
        buf.copy_from_slice(region);
        Ok(())
    }

    fn write_page(&mut self, page_id: u32, buf: &[u8]) -> Result<()> {
        let start = page_id as usize * self.page_size as usize;
        let end = start + self.page_size as usize;
        let region = self
            .data
            .get_mut(start..end)
            .ok_or_else(|| Error::Format(format!("page {page_id} out of range")))?;
        region.copy_from_slice(buf);
        Ok(())
    }

    fn erase(&mut self, start_page_id: u32, count: u32) -> Result<()> {
        let start = start_page_id as usize * self.page_size as usize;
        let end = start + count as usize * self.page_size as usize;
        let region = self
            .data
            .get_mut(start..end)
            .ok_or_else(|| Error::Format("erase range out of bounds".into()))?;
        region.fill(0xFF);
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_device_roundtrip() {
        let mut dev = MemoryBlockDevice::new(64, 4);
        let page = vec![7u8; 64];
        dev.write_page(2, &page).unwrap();
        let mut out = vec![0u8; 64];
        dev.read_page(2, &mut out).unwrap();
        assert_eq!(page, out);
    }

    #[test]
    fn memory_device_erase_sets_0xff() {
        let mut dev = MemoryBlockDevice::new(64, 4);
        dev.write_page(0, &vec![1u8; 64]).unwrap();
        dev.erase(0, 1).unwrap();
        let mut out = vec![0u8; 64];
        dev.read_page(0, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn file_device_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut dev = FileBlockDevice::create(&path, 64).unwrap();
        let page = vec![9u8; 64];
        dev.write_page(0, &page).unwrap();
        dev.write_page(1, &page).unwrap();
        assert_eq!(dev.page_count().unwrap(), 2);

        let mut out = vec![0u8; 64];
        dev.read_page(1, &mut out).unwrap();
        assert_eq!(page, out);
    }

    #[test]
    fn file_device_create_erased_reads_back_0xff() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("erased.bin");
        let mut dev = FileBlockDevice::create_erased(&path, 32, 6).unwrap();
        assert_eq!(dev.page_count().unwrap(), 6);
        let mut out = vec![0u8; 32];
        dev.read_page(5, &mut out).unwrap();
        assert!(out.iter().all(|&b| b == 0xFF));
    }
}
