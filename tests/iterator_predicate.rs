//! End-to-end scenario 6: a data-value range scan must emit exactly the
//! records whose data falls in range, using the per-page bitmap only to
//! skip pages rather than to decide membership.

use sbits::{Engine, FixedIntOps, MemoryBlockDevice, ParamFlags, RangeFilter, StorageConfig};

fn config() -> StorageConfig {
    StorageConfig {
        key_size: 4,
        data_size: 4,
        page_size: 512,
        bitmap_size: 16,
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
fn range_scan_emits_exactly_the_in_range_records() {
    let device = MemoryBlockDevice::new(512, 220);
    let mut store = Engine::init(device, FixedIntOps::new(0, 1000), config(), None).unwrap();

    const N: u32 = 3000;
    let mut expected_in_range = 0usize;
    for k in 0..N {
        let data = (k * 7 + 3) % 1000;
        if (200..=600).contains(&data) {
            expected_in_range += 1;
        }
        store.put(&k.to_le_bytes(), &data.to_le_bytes()).unwrap();
    }
    store.flush().unwrap();

    let filter = RangeFilter {
        min_key: None,
        max_key: None,
        min_data: Some(200u32.to_le_bytes().to_vec()),
        max_data: Some(600u32.to_le_bytes().to_vec()),
    };

    let mut count = 0usize;
    for item in store.iter(filter) {
        let (_, data) = item.unwrap();
        let value = u32::from_le_bytes(data.try_into().unwrap());
        assert!((200..=600).contains(&value), "value {value} outside requested range");
        count += 1;
    }

    assert_eq!(count, expected_in_range);
}
