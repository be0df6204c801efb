//! Page codec: offset arithmetic and byte-level accessors for data and
//! index pages.
//!
//! Data page layout (spec.md §3), all integers little-endian:
//! ```text
//! offset 0   : u32  logical page id
//! offset 4   : u16  record count
//! offset 6   : byte[bitmap_size]  block-level bitmap summary
//! [if max/min]: key min, key max, data min, data max
//! then       : record[0..count)
//! ```
//! Index page layout:
//! ```text
//! offset 0  : u32 logical page id
//! offset 4  : u16 record count
//! offset 6  : u16 padding
//! offset 8  : u32 min data page id
//! offset 12 : u32 max data page id
//! offset 16 : bitmap[count]
//! ```
//! The 6- and 16-byte fixed prefixes are fixed-width regardless of schema
//! and are modeled with `binrw`; everything after them is addressed by
//! schema-derived offsets because key/data widths are only known at
//! runtime.

use binrw::{binrw, BinRead, BinWrite};
use std::io::Cursor;

use crate::config::{ParamFlags, StorageConfig};
use crate::error::{Error, Result};

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, Default)]
pub struct DataPageFixedHeader {
    pub logical_id: u32,
    pub record_count: u16,
}

impl DataPageFixedHeader {
    pub const SIZE: usize = 6;

    fn read_from(buf: &[u8]) -> Self {
        let mut cursor = Cursor::new(&buf[..Self::SIZE]);
        DataPageFixedHeader::read(&mut cursor).expect("fixed 6-byte header cannot fail to parse")
    }

    fn write_to(&self, buf: &mut [u8]) {
        let mut cursor = Cursor::new(&mut buf[..Self::SIZE]);
        self.write(&mut cursor)
            .expect("fixed 6-byte header cannot fail to serialize")
    }
}

#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexPageFixedHeader {
    pub logical_id: u32,
    pub record_count: u16,
    pub _pad: u16,
    pub min_data_page_id: u32,
    pub max_data_page_id: u32,
}

impl IndexPageFixedHeader {
    pub const SIZE: usize = 16;

    fn read_from(buf: &[u8]) -> Self {
        let mut cursor = Cursor::new(&buf[..Self::SIZE]);
        IndexPageFixedHeader::read(&mut cursor).expect("fixed 16-byte header cannot fail to parse")
    }

    fn write_to(&self, buf: &mut [u8]) {
        let mut cursor = Cursor::new(&mut buf[..Self::SIZE]);
        self.write(&mut cursor)
            .expect("fixed 16-byte header cannot fail to serialize")
    }
}

/// Precomputed byte offsets for a data page under a particular
/// [`StorageConfig`]. Computed once at `Engine::init` time and reused for
/// every page access.
#[derive(Debug, Clone, Copy)]
pub struct DataPageLayout {
    pub key_size: usize,
    pub data_size: usize,
    pub bitmap_size: usize,
    pub use_max_min: bool,
    pub use_vdata: bool,
    pub bitmap_off: usize,
    pub min_key_off: usize,
    pub max_key_off: usize,
    pub min_data_off: usize,
    pub max_data_off: usize,
    pub header_size: usize,
    pub record_size: usize,
    pub max_records_per_page: usize,
}

impl DataPageLayout {
    pub fn new(config: &StorageConfig) -> Self {
        let key_size = config.key_size as usize;
        let data_size = config.data_size as usize;
        let bitmap_size = config.bitmap_size as usize;
        let use_max_min = config.parameters.contains(ParamFlags::USE_MAX_MIN);
        let use_vdata = config.parameters.contains(ParamFlags::USE_VDATA);

        let bitmap_off = DataPageFixedHeader::SIZE;
        let min_key_off = bitmap_off + bitmap_size;
        let max_key_off = min_key_off + key_size;
        let min_data_off = max_key_off + key_size;
        let max_data_off = min_data_off + data_size;

        let header_size = if use_max_min {
            max_data_off + data_size
        } else {
            bitmap_off + bitmap_size
        };

        let record_size = key_size + data_size + if use_vdata { 4 } else { 0 };
        let max_records_per_page = (config.page_size as usize - header_size) / record_size;

        Self {
            key_size,
            data_size,
            bitmap_size,
            use_max_min,
            use_vdata,
            bitmap_off,
            min_key_off,
            max_key_off,
            min_data_off,
            max_data_off,
            header_size,
            record_size,
            max_records_per_page,
        }
    }

    fn record_off(&self, index: usize) -> usize {
        self.header_size + self.record_size * index
    }
}

/// Read-only view over a data page buffer.
pub struct DataPageView<'a> {
    buf: &'a [u8],
    layout: &'a DataPageLayout,
}

impl<'a> DataPageView<'a> {
    pub fn new(buf: &'a [u8], layout: &'a DataPageLayout) -> Self {
        Self { buf, layout }
    }

    pub fn logical_id(&self) -> u32 {
        DataPageFixedHeader::read_from(self.buf).logical_id
    }

    pub fn count(&self) -> u16 {
        DataPageFixedHeader::read_from(self.buf).record_count
    }

    /// Fails with [`Error::Format`] if the on-page record count exceeds
    /// what the schema allows — the one explicit integrity check the page
    /// codec performs (spec.md §4.A).
    pub fn check_count(&self) -> Result<()> {
        if self.count() as usize > self.layout.max_records_per_page {
            return Err(Error::Format(format!(
                "page {} claims {} records, max is {}",
                self.logical_id(),
                self.count(),
                self.layout.max_records_per_page
            )));
        }
        Ok(())
    }

    pub fn bitmap(&self) -> &[u8] {
        &self.buf[self.layout.bitmap_off..self.layout.bitmap_off + self.layout.bitmap_size]
    }

    pub fn min_key(&self) -> &[u8] {
        if self.layout.use_max_min {
            &self.buf[self.layout.min_key_off..self.layout.min_key_off + self.layout.key_size]
        } else {
            self.record_key(0)
        }
    }

    pub fn max_key(&self) -> &[u8] {
        if self.layout.use_max_min {
            &self.buf[self.layout.max_key_off..self.layout.max_key_off + self.layout.key_size]
        } else {
            self.record_key(self.count() as usize - 1)
        }
    }

    pub fn min_data(&self) -> &[u8] {
        &self.buf[self.layout.min_data_off..self.layout.min_data_off + self.layout.data_size]
    }

    pub fn max_data(&self) -> &[u8] {
        &self.buf[self.layout.max_data_off..self.layout.max_data_off + self.layout.data_size]
    }

    pub fn record_key(&self, index: usize) -> &[u8] {
        let off = self.layout.record_off(index);
        &self.buf[off..off + self.layout.key_size]
    }

    pub fn record_data(&self, index: usize) -> &[u8] {
        let off = self.layout.record_off(index) + self.layout.key_size;
        &self.buf[off..off + self.layout.data_size]
    }

    pub fn record_var_offset(&self, index: usize) -> Option<u32> {
        if !self.layout.use_vdata {
            return None;
        }
        let off = self.layout.record_off(index) + self.layout.key_size + self.layout.data_size;
        let mut b = [0u8; 4];
        b.copy_from_slice(&self.buf[off..off + 4]);
        Some(u32::from_le_bytes(b))
    }
}

/// Mutable view over a data page buffer, used while it is the active
/// write slot.
pub struct DataPageViewMut<'a> {
    buf: &'a mut [u8],
    layout: &'a DataPageLayout,
}

pub const NO_VAR_DATA: u32 = 0xFFFF_FFFF;

impl<'a> DataPageViewMut<'a> {
    pub fn new(buf: &'a mut [u8], layout: &'a DataPageLayout) -> Self {
        Self { buf, layout }
    }

    pub fn as_view(&self) -> DataPageView<'_> {
        DataPageView::new(self.buf, self.layout)
    }

    /// Zero the page body and, if using max/min tracking, set the min-key
    /// and min-data fields to all-`0xFF` bytes so the first insert always
    /// lowers them (spec.md §4.A).
    pub fn init_empty(&mut self) {
        self.buf.fill(0);
        if self.layout.use_max_min {
            let (key_size, data_size) = (self.layout.key_size, self.layout.data_size);
            self.buf[self.layout.min_key_off..self.layout.min_key_off + key_size].fill(0xFF);
            self.buf[self.layout.min_data_off..self.layout.min_data_off + data_size].fill(0xFF);
        }
    }

    pub fn set_logical_id(&mut self, id: u32) {
        let mut header = DataPageFixedHeader::read_from(self.buf);
        header.logical_id = id;
        header.write_to(self.buf);
    }

    pub fn count(&self) -> u16 {
        DataPageFixedHeader::read_from(self.buf).record_count
    }

    pub fn inc_count(&mut self) {
        let mut header = DataPageFixedHeader::read_from(self.buf);
        header.record_count += 1;
        header.write_to(self.buf);
    }

    pub fn bitmap_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.layout.bitmap_off..self.layout.bitmap_off + self.layout.bitmap_size]
    }

    pub fn set_min_key(&mut self, key: &[u8]) {
        let off = self.layout.min_key_off;
        self.buf[off..off + self.layout.key_size].copy_from_slice(key);
    }

    pub fn set_max_key(&mut self, key: &[u8]) {
        let off = self.layout.max_key_off;
        self.buf[off..off + self.layout.key_size].copy_from_slice(key);
    }

    pub fn min_data(&self) -> &[u8] {
        &self.buf[self.layout.min_data_off..self.layout.min_data_off + self.layout.data_size]
    }

    pub fn max_data(&self) -> &[u8] {
        &self.buf[self.layout.max_data_off..self.layout.max_data_off + self.layout.data_size]
    }

    pub fn set_min_data(&mut self, data: &[u8]) {
        let off = self.layout.min_data_off;
        self.buf[off..off + self.layout.data_size].copy_from_slice(data);
    }

    pub fn set_max_data(&mut self, data: &[u8]) {
        let off = self.layout.max_data_off;
        self.buf[off..off + self.layout.data_size].copy_from_slice(data);
    }

    /// Append `(key, data[, var_offset])` at the current count and bump the
    /// count. Caller must ensure the page is not already full.
    pub fn append_record(&mut self, key: &[u8], data: &[u8], var_offset: Option<u32>) {
        let index = self.count() as usize;
        let off = self.layout.record_off(index);
        self.buf[off..off + self.layout.key_size].copy_from_slice(key);
        self.buf[off + self.layout.key_size..off + self.layout.key_size + self.layout.data_size]
            .copy_from_slice(data);
        if self.layout.use_vdata {
            let voff = off + self.layout.key_size + self.layout.data_size;
            let value = var_offset.unwrap_or(NO_VAR_DATA);
            self.buf[voff..voff + 4].copy_from_slice(&value.to_le_bytes());
        }
        self.inc_count();
    }
}

/// Precomputed byte offsets for an index page.
#[derive(Debug, Clone, Copy)]
pub struct IndexPageLayout {
    pub bitmap_size: usize,
    pub max_records_per_page: usize,
}

impl IndexPageLayout {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            bitmap_size: config.bitmap_size as usize,
            max_records_per_page: config.max_idx_records_per_page() as usize,
        }
    }

    fn entry_off(&self, index: usize) -> usize {
        IndexPageFixedHeader::SIZE + self.bitmap_size * index
    }
}

pub struct IndexPageView<'a> {
    buf: &'a [u8],
    layout: &'a IndexPageLayout,
}

impl<'a> IndexPageView<'a> {
    pub fn new(buf: &'a [u8], layout: &'a IndexPageLayout) -> Self {
        Self { buf, layout }
    }

    pub fn logical_id(&self) -> u32 {
        IndexPageFixedHeader::read_from(self.buf).logical_id
    }

    pub fn count(&self) -> u16 {
        IndexPageFixedHeader::read_from(self.buf).record_count
    }

    pub fn min_data_page_id(&self) -> u32 {
        IndexPageFixedHeader::read_from(self.buf).min_data_page_id
    }

    pub fn bitmap_at(&self, index: usize) -> &[u8] {
        let off = self.layout.entry_off(index);
        &self.buf[off..off + self.layout.bitmap_size]
    }
}

pub struct IndexPageViewMut<'a> {
    buf: &'a mut [u8],
    layout: &'a IndexPageLayout,
}

impl<'a> IndexPageViewMut<'a> {
    pub fn new(buf: &'a mut [u8], layout: &'a IndexPageLayout) -> Self {
        Self { buf, layout }
    }

    pub fn init_empty(&mut self, min_data_page_id: u32) {
        self.buf.fill(0);
        let mut header = IndexPageFixedHeader::read_from(self.buf);
        header.min_data_page_id = min_data_page_id;
        header.write_to(self.buf);
    }

    pub fn set_logical_id(&mut self, id: u32) {
        let mut header = IndexPageFixedHeader::read_from(self.buf);
        header.logical_id = id;
        header.write_to(self.buf);
    }

    pub fn count(&self) -> u16 {
        IndexPageFixedHeader::read_from(self.buf).record_count
    }

    pub fn inc_count(&mut self) {
        let mut header = IndexPageFixedHeader::read_from(self.buf);
        header.record_count += 1;
        header.write_to(self.buf);
    }

    pub fn append_bitmap(&mut self, bitmap: &[u8]) {
        let index = self.count() as usize;
        let off = self.layout.entry_off(index);
        self.buf[off..off + self.layout.bitmap_size].copy_from_slice(bitmap);
        self.inc_count();
    }
}
