//! End-to-end scenario 4: records each carry a small variable-length blob.
//! The blob stream has its own (smaller) circular capacity, so blobs for
//! the oldest keys go stale well before the owning records themselves are
//! reclaimed from the data stream.

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
        end_address: 64 * 32,
        index_address_start: 0,
        index_address_end: 0,
        var_address_start: 64 * 32,
        var_address_end: 64 * 32 + 64 * 4,
        parameters: ParamFlags::USE_MAX_MIN.union(ParamFlags::USE_VDATA),
        index_max_error: 0,
        radix_bits: 0,
    }
}

fn blob_for(k: u32) -> Vec<u8> {
    format!("blob-{k:04}").into_bytes()
}

#[test]
fn stale_blobs_are_reported_while_data_survives() {
    let device = MemoryBlockDevice::new(64, 36);
    let mut store = Engine::init(device, FixedIntOps::new(0, 10_000), config(), None).unwrap();

    const N: u32 = 40;
    for k in 0..N {
        store.put_var(&k.to_le_bytes(), &k.to_le_bytes(), &blob_for(k)).unwrap();
    }

    // The data stream never wrapped (40 records easily fit the 32-page
    // region), so every key's primary record is still reachable.
    for k in 0..N {
        let data = store.get(&k.to_le_bytes()).unwrap();
        assert_eq!(data, k.to_le_bytes());
    }

    // The var stream is much smaller and has wrapped several times over,
    // so the earliest blob is gone even though its owning record remains.
    let err = store.get_var(&0u32.to_le_bytes()).unwrap_err();
    assert!(matches!(err, sbits::Error::Stale), "oldest blob should have been reclaimed");

    // The most recent record's blob has not been touched by reclamation.
    let (data, blob) = store.get_var(&(N - 1).to_le_bytes()).unwrap().unwrap();
    assert_eq!(data, (N - 1).to_le_bytes());
    assert_eq!(blob, blob_for(N - 1));
}
