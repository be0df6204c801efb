//! End-to-end scenario 2: a clean-closed store reopens with identical `get`
//! answers, both via the persisted manifest and, if the manifest is missing
//! or stale, via a full physical scan.

use sbits::{Engine, FileBlockDevice, FixedIntOps, ParamFlags, StorageConfig};

fn config() -> StorageConfig {
    StorageConfig {
        key_size: 4,
        data_size: 4,
        page_size: 128,
        bitmap_size: 4,
        buffer_size_in_blocks: 4,
        erase_size_in_pages: 4,
        start_address: 0,
        end_address: 128 * 40,
        index_address_start: 128 * 40,
        index_address_end: 128 * 48,
        var_address_start: 0,
        var_address_end: 0,
        parameters: ParamFlags::USE_MAX_MIN.union(ParamFlags::USE_BMAP).union(ParamFlags::USE_INDEX),
        index_max_error: 2,
        radix_bits: 0,
    }
}

const N: u32 = 300;

#[test]
fn reopen_via_manifest_and_via_scan_agree_with_original() {
    let dir = tempfile::tempdir().unwrap();
    let data_path = dir.path().join("store.bin");
    let manifest_path = dir.path().join("store.manifest.json");

    {
        let device = FileBlockDevice::create_erased(&data_path, 128, 48).unwrap();
        let mut store = Engine::init(device, FixedIntOps::new(0, 1000), config(), Some(manifest_path.clone())).unwrap();
        for k in 0..N {
            store.put(&k.to_le_bytes(), &(k % 50).to_le_bytes()).unwrap();
        }
        store.close().unwrap();
    }

    {
        let device = FileBlockDevice::open(&data_path, 128).unwrap();
        let mut store = Engine::init(device, FixedIntOps::new(0, 1000), config(), Some(manifest_path.clone())).unwrap();
        for k in (0..N).step_by(13) {
            let data = store.get(&k.to_le_bytes()).unwrap();
            assert_eq!(data, (k % 50).to_le_bytes(), "manifest-based reopen mismatch at key {k}");
        }
        assert_eq!(store.min_key(), Some(0u32.to_le_bytes().as_slice()));
    }

    std::fs::remove_file(&manifest_path).unwrap();

    {
        let device = FileBlockDevice::open(&data_path, 128).unwrap();
        let mut store = Engine::init(device, FixedIntOps::new(0, 1000), config(), None).unwrap();
        for k in (0..N).step_by(13) {
            let data = store.get(&k.to_le_bytes()).unwrap();
            assert_eq!(data, (k % 50).to_le_bytes(), "scan-based reopen mismatch at key {k}");
        }
        assert_eq!(store.min_key(), Some(0u32.to_le_bytes().as_slice()));
    }
}
