//! Configuration surface for an SBITS store.
//!
//! Mirrors the reference implementation's `SBITS_USE_*` flags and the
//! handful of size/address parameters that together determine page layout,
//! buffer pool shape, and the two circular-log address ranges.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Parameter flags, one bit per optional feature.
///
/// Bit layout matches the reference implementation's `SBITS_USE_*` defines
/// so that a manifest written by one version reads back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParamFlags(u8);

impl ParamFlags {
    pub const USE_MAX_MIN: ParamFlags = ParamFlags(0b0000_0001);
    pub const USE_BMAP: ParamFlags = ParamFlags(0b0000_0010);
    pub const USE_SUM: ParamFlags = ParamFlags(0b0000_0100);
    pub const USE_INDEX: ParamFlags = ParamFlags(0b0000_1000);
    pub const USE_VDATA: ParamFlags = ParamFlags(0b0001_0000);
    pub const RESET_DATA: ParamFlags = ParamFlags(0b0010_0000);

    pub const NONE: ParamFlags = ParamFlags(0);

    pub const fn contains(self, flag: ParamFlags) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub const fn union(self, other: ParamFlags) -> ParamFlags {
        ParamFlags(self.0 | other.0)
    }

    pub const fn remove(self, flag: ParamFlags) -> ParamFlags {
        ParamFlags(self.0 & !flag.0)
    }
}

impl std::ops::BitOr for ParamFlags {
    type Output = ParamFlags;
    fn bitor(self, rhs: ParamFlags) -> ParamFlags {
        self.union(rhs)
    }
}

/// The configuration surface of an SBITS store (spec.md §6).
///
/// Addresses are byte offsets into their respective backing region and must
/// be multiples of `page_size`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub key_size: u8,
    pub data_size: u32,
    pub page_size: u32,
    pub bitmap_size: u32,
    pub buffer_size_in_blocks: u16,
    pub erase_size_in_pages: u32,
    pub start_address: u64,
    pub end_address: u64,
    pub index_address_start: u64,
    pub index_address_end: u64,
    pub var_address_start: u64,
    pub var_address_end: u64,
    pub parameters: ParamFlags,
    pub index_max_error: u32,
    pub radix_bits: u8,
}

impl StorageConfig {
    pub fn record_size(&self) -> u32 {
        let mut size = self.key_size as u32 + self.data_size;
        if self.parameters.contains(ParamFlags::USE_VDATA) {
            size += 4;
        }
        size
    }

    pub fn data_header_size(&self) -> u32 {
        let mut size = 6 + self.bitmap_size;
        if self.parameters.contains(ParamFlags::USE_MAX_MIN) {
            size += 2 * self.key_size as u32 + 2 * self.data_size;
        }
        size
    }

    pub fn max_records_per_page(&self) -> u32 {
        (self.page_size - self.data_header_size()) / self.record_size()
    }

    /// `uint32 id | uint16 count | 2 pad | uint32 minDataPageId | uint32 maxDataPageId`
    pub const INDEX_HEADER_SIZE: u32 = 16;

    pub fn max_idx_records_per_page(&self) -> u32 {
        (self.page_size - Self::INDEX_HEADER_SIZE) / self.bitmap_size
    }

    pub fn num_var_pages(&self) -> u32 {
        ((self.var_address_end - self.var_address_start) / self.page_size as u64) as u32
    }

    pub fn num_index_pages(&self) -> u32 {
        ((self.index_address_end - self.index_address_start) / self.page_size as u64) as u32
    }

    /// Validate the configuration against the invariants of spec.md §6/§7.
    ///
    /// Returns `Error::Config` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.key_size == 0 || self.key_size > 8 {
            return Err(Error::Config(format!(
                "key_size must be in 1..=8, got {}",
                self.key_size
            )));
        }
        if self.start_address % self.page_size as u64 != 0
            || self.end_address % self.page_size as u64 != 0
        {
            return Err(Error::Config(
                "start_address/end_address must be page-aligned".into(),
            ));
        }
        if self.record_size() == 0 || self.record_size() > self.page_size {
            return Err(Error::Config("record_size exceeds page_size".into()));
        }
        if self.data_header_size() >= self.page_size {
            return Err(Error::Config("header_size exceeds page_size".into()));
        }

        let using_index = self.parameters.contains(ParamFlags::USE_INDEX);
        let using_var = self.parameters.contains(ParamFlags::USE_VDATA);

        let min_buffers = match (using_index, using_var) {
            (true, true) => 6,
            (true, false) => 4,
            (false, _) => 2,
        };
        if self.buffer_size_in_blocks < min_buffers {
            return Err(Error::Config(format!(
                "buffer_size_in_blocks ({}) must be at least {} for this configuration",
                self.buffer_size_in_blocks, min_buffers
            )));
        }

        let num_pages = (self.end_address - self.start_address) / self.page_size as u64;
        let required = 2 * self.erase_size_in_pages as u64;
        if num_pages < required {
            return Err(Error::Config(format!(
                "data region has {num_pages} pages, need at least {required} (2 * erase_size_in_pages)"
            )));
        }

        if using_index {
            if self.index_address_start % self.page_size as u64 != 0
                || self.index_address_end % self.page_size as u64 != 0
            {
                return Err(Error::Config(
                    "index_address_start/index_address_end must be page-aligned".into(),
                ));
            }
            let num_idx_pages = self.num_index_pages() as u64;
            if num_idx_pages < required {
                return Err(Error::Config(format!(
                    "index region has {num_idx_pages} pages, need at least {required} (2 * erase_size_in_pages)"
                )));
            }
        }

        if using_var {
            if self.var_address_start % self.page_size as u64 != 0
                || self.var_address_end % self.page_size as u64 != 0
            {
                return Err(Error::Config(
                    "var_address_start/var_address_end must be page-aligned".into(),
                ));
            }
            if self.var_address_end <= self.var_address_start {
                return Err(Error::Config(
                    "var_address_end must be greater than var_address_start".into(),
                ));
            }
        }

        Ok(())
    }
}
