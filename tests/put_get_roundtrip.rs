//! End-to-end scenario 1/round-trip: insert many keys, flush, and read them
//! back both before and after the flush.

use sbits::{Engine, FixedIntOps, MemoryBlockDevice, ParamFlags, StorageConfig};

fn config() -> StorageConfig {
    StorageConfig {
        key_size: 4,
        data_size: 4,
        page_size: 512,
        bitmap_size: 8,
        buffer_size_in_blocks: 4,
        erase_size_in_pages: 8,
        start_address: 0,
        end_address: 512 * 200,
        index_address_start: 512 * 200,
        index_address_end: 512 * 216,
        var_address_start: 0,
        var_address_end: 0,
        parameters: ParamFlags::USE_MAX_MIN.union(ParamFlags::USE_BMAP).union(ParamFlags::USE_INDEX),
        index_max_error: 4,
        radix_bits: 0,
    }
}

#[test]
fn put_then_get_before_flush_sees_own_write() {
    let device = MemoryBlockDevice::new(512, 220);
    let mut store = Engine::init(device, FixedIntOps::new(0, 10_000), config(), None).unwrap();

    store.put(&7u32.to_le_bytes(), &42u32.to_le_bytes()).unwrap();
    let got = store.get(&7u32.to_le_bytes()).unwrap();
    assert_eq!(got, 42u32.to_le_bytes());
}

#[test]
fn get_on_empty_store_is_not_found() {
    let device = MemoryBlockDevice::new(512, 220);
    let mut store = Engine::init(device, FixedIntOps::new(0, 10_000), config(), None).unwrap();
    let err = store.get(&0u32.to_le_bytes()).unwrap_err();
    assert!(matches!(err, sbits::Error::NotFound));
}

#[test]
fn large_insert_roundtrips_after_flush() {
    let device = MemoryBlockDevice::new(512, 220);
    let mut store = Engine::init(device, FixedIntOps::new(0, 10_000), config(), None).unwrap();

    const N: u32 = 2000;
    for k in 0..N {
        store.put(&k.to_le_bytes(), &(k % 100).to_le_bytes()).unwrap();
    }
    store.flush().unwrap();

    for k in (0..N).step_by(137) {
        let data = store.get(&k.to_le_bytes()).unwrap();
        assert_eq!(data, (k % 100).to_le_bytes());
    }
    let last = store.get(&(N - 1).to_le_bytes()).unwrap();
    assert_eq!(last, ((N - 1) % 100).to_le_bytes());

    assert!(store.stats().num_idx_writes >= 1);
    assert!(store.stats().num_writes >= 1);
}
