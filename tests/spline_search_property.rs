//! End-to-end scenario 5: the learned index (a monotone spline over each
//! data page's minimum key) must resolve every key to the right page, not
//! just an approximate neighborhood, across a large monotonic key range.

use sbits::{Engine, FixedIntOps, MemoryBlockDevice, ParamFlags, StorageConfig};

fn config() -> StorageConfig {
    StorageConfig {
        key_size: 4,
        data_size: 8,
        page_size: 512,
        bitmap_size: 8,
        buffer_size_in_blocks: 4,
        erase_size_in_pages: 8,
        start_address: 0,
        end_address: 512 * 200,
        index_address_start: 512 * 200,
        index_address_end: 512 * 200 + 512 * 16,
        var_address_start: 0,
        var_address_end: 0,
        parameters: ParamFlags::USE_MAX_MIN.union(ParamFlags::USE_BMAP).union(ParamFlags::USE_INDEX),
        index_max_error: 8,
        radix_bits: 0,
    }
}

#[test]
fn every_key_resolves_through_the_learned_index() {
    let device = MemoryBlockDevice::new(512, 220);
    let mut store = Engine::init(device, FixedIntOps::new(0, 1_000_000), config(), None).unwrap();

    const N: u32 = 5000;
    for k in 0..N {
        let data = (k as u64 * 2).to_le_bytes();
        store.put(&k.to_le_bytes(), &data).unwrap();
    }
    store.flush().unwrap();

    for k in (0..N).step_by(97) {
        let got = store.get(&k.to_le_bytes()).unwrap();
        assert_eq!(got, (k as u64 * 2).to_le_bytes(), "mismatch at key {k}");
    }
    let first = store.get(&0u32.to_le_bytes()).unwrap();
    assert_eq!(first, 0u64.to_le_bytes());
    let last = store.get(&(N - 1).to_le_bytes()).unwrap();
    assert_eq!(last, ((N - 1) as u64 * 2).to_le_bytes());
}
