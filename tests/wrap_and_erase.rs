//! End-to-end scenario 3: once the data region fills, the circular log wraps
//! and the oldest pages are reclaimed. Keys living on reclaimed pages become
//! unreachable; recent keys stay reachable.

use sbits::{Engine, FixedIntOps, MemoryBlockDevice, ParamFlags, StorageConfig};

fn config() -> StorageConfig {
    StorageConfig {
        key_size: 4,
        data_size: 4,
        page_size: 64,
        bitmap_size: 0,
        buffer_size_in_blocks: 2,
        erase_size_in_pages: 2,
        start_address: 0,
        end_address: 64 * 8,
        index_address_start: 0,
        index_address_end: 0,
        var_address_start: 0,
        var_address_end: 0,
        parameters: ParamFlags::USE_MAX_MIN,
        index_max_error: 0,
        radix_bits: 0,
    }
}

#[test]
fn old_keys_become_unreachable_after_wrap() {
    let device = MemoryBlockDevice::new(64, 8);
    let mut store = Engine::init(device, FixedIntOps::new(0, 10_000), config(), None).unwrap();

    const N: u32 = 200;
    for k in 0..N {
        store.put(&k.to_le_bytes(), &k.to_le_bytes()).unwrap();
    }

    assert!(store.is_data_wrapped(), "expected the data log to have wrapped by now");
    assert!(store.first_logical_page_id() > 0, "oldest pages should have been reclaimed");

    let err = store.get(&0u32.to_le_bytes()).unwrap_err();
    assert!(matches!(err, sbits::Error::NotFound), "key 0 should have been reclaimed");

    let recent = store.get(&(N - 1).to_le_bytes()).unwrap();
    assert_eq!(recent, (N - 1).to_le_bytes());
}
