//! On-disk manifest: a `serde_json` sidecar recording the store's
//! configuration and the circular logs' bookkeeping, written on every
//! successful `flush()`/`close()` so a reopen can skip the full
//! recovery-by-scan unless the manifest turns out to be stale.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::circular_log::CircularLog;
use crate::config::StorageConfig;
use crate::error::Result;
use crate::var_log::VarLog;

/// Snapshot of everything needed to resume a store without rescanning the
/// device, alongside the configuration it was opened with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub config: StorageConfig,

    pub data_next_logical_id: u32,
    pub data_next_physical_offset: u32,
    pub data_first_logical_page_id: u32,
    pub data_first_physical_offset: u32,
    pub data_wrapped: bool,

    pub index_next_logical_id: u32,
    pub index_next_physical_offset: u32,
    pub index_first_logical_page_id: u32,
    pub index_first_physical_offset: u32,
    pub index_wrapped: bool,

    pub var_next_page_index: u64,
    pub var_cursor_in_page: u32,
    pub var_min_page_index: u64,
    pub var_min_var_record_id: Option<Vec<u8>>,

    /// Raw bytes of the smallest key ever committed, recovered from the
    /// first live data page rather than left at a sentinel (see
    /// `Engine::init`'s recovery path).
    pub min_key: Option<Vec<u8>>,
}

impl Manifest {
    pub fn from_parts(
        config: StorageConfig,
        data_log: &CircularLog,
        index_log: &CircularLog,
        var_log: &VarLog,
        min_key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            config,
            data_next_logical_id: data_log.next_logical_id(),
            data_next_physical_offset: data_log.next_physical_offset(),
            data_first_logical_page_id: data_log.first_logical_page_id(),
            data_first_physical_offset: data_log.first_physical_offset(),
            data_wrapped: data_log.wrapped(),
            index_next_logical_id: index_log.next_logical_id(),
            index_next_physical_offset: index_log.next_physical_offset(),
            index_first_logical_page_id: index_log.first_logical_page_id(),
            index_first_physical_offset: index_log.first_physical_offset(),
            index_wrapped: index_log.wrapped(),
            var_next_page_index: var_log.next_page_index(),
            var_cursor_in_page: var_log.cursor_in_page(),
            var_min_page_index: var_log.min_page_index(),
            var_min_var_record_id: var_log.min_var_record_id().map(|b| b.to_vec()),
            min_key,
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = fs::File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = fs::File::open(path)?;
        let manifest = serde_json::from_reader(file)?;
        Ok(manifest)
    }

    pub fn data_log(&self, region_start_page: u32, capacity: u32) -> CircularLog {
        CircularLog::from_state(
            region_start_page,
            capacity,
            self.config.erase_size_in_pages,
            self.data_next_logical_id,
            self.data_next_physical_offset,
            self.data_first_logical_page_id,
            self.data_first_physical_offset,
            self.data_wrapped,
        )
    }

    pub fn index_log(&self, region_start_page: u32, capacity: u32) -> CircularLog {
        CircularLog::from_state(
            region_start_page,
            capacity,
            self.config.erase_size_in_pages,
            self.index_next_logical_id,
            self.index_next_physical_offset,
            self.index_first_logical_page_id,
            self.index_first_physical_offset,
            self.index_wrapped,
        )
    }

    pub fn var_log(&self, region_start_page: u32, capacity_pages: u32, page_size: u32) -> VarLog {
        VarLog::from_state(
            region_start_page,
            capacity_pages,
            page_size,
            self.config.key_size,
            self.var_next_page_index,
            self.var_cursor_in_page,
            self.var_min_page_index,
            self.var_min_var_record_id.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParamFlags;

    fn test_config() -> StorageConfig {
        StorageConfig {
            key_size: 4,
            data_size: 4,
            page_size: 64,
            bitmap_size: 2,
            buffer_size_in_blocks: 4,
            erase_size_in_pages: 4,
            start_address: 0,
            end_address: 64 * 16,
            index_address_start: 64 * 16,
            index_address_end: 64 * 24,
            var_address_start: 0,
            var_address_end: 0,
            parameters: ParamFlags::USE_INDEX,
            index_max_error: 4,
            radix_bits: 0,
        }
    }

    #[test]
    fn round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let data_log = CircularLog::new(0, 16, 4);
        let index_log = CircularLog::new(16, 16, 4);
        let var_log = VarLog::new(32, 8, 64, 4);
        let manifest = Manifest::from_parts(
            test_config(),
            &data_log,
            &index_log,
            &var_log,
            Some(vec![1, 0, 0, 0]),
        );
        manifest.save(&path).unwrap();

        let loaded = Manifest::load(&path).unwrap();
        assert_eq!(loaded.min_key, Some(vec![1, 0, 0, 0]));
        assert_eq!(loaded.config.page_size, 64);
        assert_eq!(loaded.data_next_logical_id, 0);
    }
}
