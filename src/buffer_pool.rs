//! Fixed set of page-sized scratch buffers the engine reads and writes
//! through.
//!
//! The reference implementation carves one shared buffer array into
//! `SBITS_DATA_WRITE_BUFFER` / `..._READ_BUFFER` / `SBITS_INDEX_WRITE_BUFFER`
//! / `..._READ_BUFFER` (plus two more when variable data is enabled) and
//! addresses them by raw offset. [`BufferPool`] keeps the same six named
//! slots but hands out safe, borrow-scoped `&[u8]`/`&mut [u8]` views instead
//! of pointer arithmetic, and tracks which logical page is currently cached
//! in each read slot so the engine can skip a redundant device read.

use crate::config::{ParamFlags, StorageConfig};

/// Identifies one of the six fixed buffer-pool slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRole {
    DataWrite,
    DataRead,
    IndexWrite,
    IndexRead,
    VarWrite,
    VarRead,
}

const ALL_ROLES: [SlotRole; 6] = [
    SlotRole::DataWrite,
    SlotRole::DataRead,
    SlotRole::IndexWrite,
    SlotRole::IndexRead,
    SlotRole::VarWrite,
    SlotRole::VarRead,
];

fn slot_index(role: SlotRole) -> usize {
    match role {
        SlotRole::DataWrite => 0,
        SlotRole::DataRead => 1,
        SlotRole::IndexWrite => 2,
        SlotRole::IndexRead => 3,
        SlotRole::VarWrite => 4,
        SlotRole::VarRead => 5,
    }
}

/// Page-sized scratch space for each active slot, plus the logical page id
/// currently held in each read slot (`None` means empty/unknown).
pub struct BufferPool {
    page_size: usize,
    slots: [Vec<u8>; 6],
    cached_logical_id: [Option<u32>; 6],
}

impl BufferPool {
    /// Allocate every slot at `config.page_size`, regardless of whether
    /// index/var support is enabled — unused slots simply stay empty. This
    /// mirrors the reference buffer array being sized by
    /// `buffer_size_in_blocks` up front rather than grown on demand.
    pub fn new(config: &StorageConfig) -> Self {
        let page_size = config.page_size as usize;
        Self {
            page_size,
            slots: ALL_ROLES.map(|_| vec![0u8; page_size]),
            cached_logical_id: [None; 6],
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn slot(&self, role: SlotRole) -> &[u8] {
        &self.slots[slot_index(role)]
    }

    pub fn slot_mut(&mut self, role: SlotRole) -> &mut [u8] {
        self.cached_logical_id[slot_index(role)] = None;
        &mut self.slots[slot_index(role)]
    }

    pub fn cached_logical_id(&self, role: SlotRole) -> Option<u32> {
        self.cached_logical_id[slot_index(role)]
    }

    /// Record which logical page a read slot now holds, after a successful
    /// device read, so the next lookup for the same page can reuse it.
    pub fn mark_cached(&mut self, role: SlotRole, logical_id: u32) {
        self.cached_logical_id[slot_index(role)] = Some(logical_id);
    }

    pub fn invalidate(&mut self, role: SlotRole) {
        self.cached_logical_id[slot_index(role)] = None;
    }

    /// Number of buffer-pool blocks this configuration actually needs, for
    /// cross-checking against `config.buffer_size_in_blocks` at init time.
    pub fn required_blocks(config: &StorageConfig) -> u16 {
        let using_index = config.parameters.contains(ParamFlags::USE_INDEX);
        let using_var = config.parameters.contains(ParamFlags::USE_VDATA);
        match (using_index, using_var) {
            (true, true) => 6,
            (true, false) => 4,
            (false, _) => 2,
        }
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
            buffer_size_in_blocks: 6,
            erase_size_in_pages: 4,
            start_address: 0,
            end_address: 64 * 1000,
            index_address_start: 64 * 1000,
            index_address_end: 64 * 1008,
            var_address_start: 64 * 1008,
            var_address_end: 64 * 2008,
            parameters: ParamFlags::USE_INDEX | ParamFlags::USE_VDATA,
            index_max_error: 1,
            radix_bits: 0,
        }
    }

    #[test]
    fn slots_are_independent() {
        let config = test_config();
        let mut pool = BufferPool::new(&config);
        pool.slot_mut(SlotRole::DataWrite)[0] = 1;
        pool.slot_mut(SlotRole::DataRead)[0] = 2;
        assert_eq!(pool.slot(SlotRole::DataWrite)[0], 1);
        assert_eq!(pool.slot(SlotRole::DataRead)[0], 2);
    }

    #[test]
    fn write_invalidates_cache_read_marks_it() {
        let config = test_config();
        let mut pool = BufferPool::new(&config);
        pool.mark_cached(SlotRole::DataRead, 7);
        assert_eq!(pool.cached_logical_id(SlotRole::DataRead), Some(7));
        pool.slot_mut(SlotRole::DataRead);
        assert_eq!(pool.cached_logical_id(SlotRole::DataRead), None);
    }

    #[test]
    fn required_blocks_matches_feature_set() {
        assert_eq!(BufferPool::required_blocks(&test_config()), 6);
    }
}
