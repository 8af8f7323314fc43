//! Integration coverage for the Extensible Array and Fixed Array public
//! handles: creation, growth, reopen, corruption detection, reference
//! counting around delete, and flush-dependency support.

use blkstore::cache::Cache;
use blkstore::class::TestU32Class;
use blkstore::ea::ExtensibleArray;
use blkstore::fa::header::FixedArrayParams;
use blkstore::fa::FixedArray;
use blkstore::layout::ExtensibleArrayParams;
use disk_driver::memory::MemoryFile;
use disk_driver::{BlockFile, MemType};

fn init_logging() {
    let _ = env_logger::try_init();
}

fn ea_cparam() -> ExtensibleArrayParams {
    ExtensibleArrayParams {
        idx_blk_elmts: 4,
        data_blk_min_elmts: 4,
        sup_blk_min_data_ptrs: 2,
        max_dblk_page_nelmts_bits: 2,
    }
}

#[test]
fn ea_basic_growth_and_fill() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let ea = ExtensibleArray::<TestU32Class>::create(&mut cache, &mut file, ea_cparam(), 20).unwrap();

    ea.set(&mut cache, &mut file, 0, 0xAA).unwrap();
    assert_eq!(ea.get(&mut cache, &mut file, 0).unwrap(), 0xAA);
    assert_eq!(ea.get(&mut cache, &mut file, 3).unwrap(), TestU32Class::fill());

    ea.set(&mut cache, &mut file, 10, 0xBB).unwrap();
    assert_eq!(ea.get(&mut cache, &mut file, 10).unwrap(), 0xBB);
    assert_eq!(ea.get(&mut cache, &mut file, 9).unwrap(), TestU32Class::fill());
    assert_eq!(ea.get_nelmts(&mut cache, &mut file).unwrap(), 11);

    ea.close(&mut cache, &mut file).unwrap();
}

#[test]
fn ea_reopen_by_address_preserves_state() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let ea = ExtensibleArray::<TestU32Class>::create(&mut cache, &mut file, ea_cparam(), 20).unwrap();
    ea.set(&mut cache, &mut file, 10, 0xBB).unwrap();
    let addr = ea.get_addr();
    ea.close(&mut cache, &mut file).unwrap();

    let reopened = ExtensibleArray::<TestU32Class>::open(&mut cache, &mut file, addr).unwrap();
    assert_eq!(reopened.get(&mut cache, &mut file, 10).unwrap(), 0xBB);
    assert_eq!(reopened.get_nelmts(&mut cache, &mut file).unwrap(), 11);
    reopened.close(&mut cache, &mut file).unwrap();
}

#[test]
fn fa_paged_array_tracks_page_init() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let cparam = FixedArrayParams { nelmts: 9, max_dblk_page_nelmts_bits: 2 };
    let fa = FixedArray::<TestU32Class>::create(&mut cache, &mut file, cparam).unwrap();

    for i in 0..9 {
        assert_eq!(fa.get(&mut cache, &mut file, i).unwrap(), TestU32Class::fill());
    }

    fa.set(&mut cache, &mut file, 5, 0x42).unwrap();
    assert_eq!(fa.get(&mut cache, &mut file, 5).unwrap(), 0x42);
    // page 1 (elements 4..8) is now initialized, but its other slots
    // still read as fill; pages 0 and 2 were never touched.
    assert_eq!(fa.get(&mut cache, &mut file, 4).unwrap(), TestU32Class::fill());
    assert_eq!(fa.get(&mut cache, &mut file, 0).unwrap(), TestU32Class::fill());
    assert_eq!(fa.get(&mut cache, &mut file, 8).unwrap(), TestU32Class::fill());

    fa.close(&mut cache, &mut file).unwrap();
}

#[test]
fn fa_out_of_range_set_is_rejected() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let cparam = FixedArrayParams { nelmts: 4, max_dblk_page_nelmts_bits: 2 };
    let fa = FixedArray::<TestU32Class>::create(&mut cache, &mut file, cparam).unwrap();
    assert!(fa.set(&mut cache, &mut file, 4, 0x1).is_err());
    fa.close(&mut cache, &mut file).unwrap();
}

#[test]
fn corrupted_data_block_is_detected_on_read() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let ea = ExtensibleArray::<TestU32Class>::create(&mut cache, &mut file, ea_cparam(), 20).unwrap();
    ea.set(&mut cache, &mut file, 10, 0xBB).unwrap();

    let dblk_addr = ea.locate_container(&mut cache, &mut file, 10).unwrap().unwrap();
    // Flip a byte inside the data block's payload region, past its
    // magic/version/class-id prefix, to corrupt an element without
    // touching the envelope.
    let mut one_byte = [0u8; 1];
    file.read_at(dblk_addr + 8, &mut one_byte).unwrap();
    one_byte[0] ^= 0xFF;
    file.write_at(dblk_addr + 8, &one_byte).unwrap();

    // Evict the cached (still-clean) copy so the next read is forced
    // back through `BlockFile`, where the corruption lives.
    cache.evict_unwritten(dblk_addr);
    let err = ea.get(&mut cache, &mut file, 10);
    assert!(err.is_err());

    ea.close(&mut cache, &mut file).unwrap();
}

#[test]
fn delete_is_deferred_until_last_handle_closes() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let h1 = ExtensibleArray::<TestU32Class>::create(&mut cache, &mut file, ea_cparam(), 20).unwrap();
    h1.set(&mut cache, &mut file, 0, 1).unwrap();
    let addr = h1.get_addr();
    let h2 = h1.reopen(&mut cache).unwrap();

    h2.delete(&mut cache, &mut file).unwrap();
    // h1 is still a live handle; closing it must not trip any "use
    // after delete" error, only decrement its own share of the count.
    h1.close(&mut cache, &mut file).unwrap();

    // h2 is the last handle; closing it performs the actual free.
    h2.close(&mut cache, &mut file).unwrap();

    assert!(ExtensibleArray::<TestU32Class>::open(&mut cache, &mut file, addr).is_err());
}

#[test]
fn support_and_unsupport_are_inverses() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let ea = ExtensibleArray::<TestU32Class>::create(&mut cache, &mut file, ea_cparam(), 20).unwrap();
    ea.set(&mut cache, &mut file, 10, 0xBB).unwrap();

    let child_addr = file.allocate(MemType::EaDataBlockPage, 8).unwrap();
    cache.insert_new(child_addr, MemType::EaDataBlockPage, vec![0u8; 8], false);

    ea.support(&mut cache, &mut file, 10, child_addr).unwrap();
    ea.unsupport(&mut cache, &mut file, 10, child_addr).unwrap();
    // A second unsupport with no remaining edge must fail rather than
    // silently succeed.
    assert!(ea.unsupport(&mut cache, &mut file, 10, child_addr).is_err());

    ea.close(&mut cache, &mut file).unwrap();
}

#[test]
fn support_creates_backing_block_on_a_never_written_index() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let ea = ExtensibleArray::<TestU32Class>::create(&mut cache, &mut file, ea_cparam(), 20).unwrap();

    // Nothing has been set yet, so there is no data block at index 10.
    assert!(ea.locate_container(&mut cache, &mut file, 10).unwrap().is_none());

    let child_addr = file.allocate(MemType::EaDataBlockPage, 8).unwrap();
    cache.insert_new(child_addr, MemType::EaDataBlockPage, vec![0u8; 8], false);
    ea.support(&mut cache, &mut file, 10, child_addr).unwrap();

    // `support` must have created the containing block for `unsupport`
    // (and `get`/`set`) to find afterward.
    assert!(ea.locate_container(&mut cache, &mut file, 10).unwrap().is_some());
    assert_eq!(ea.get(&mut cache, &mut file, 10).unwrap(), TestU32Class::fill());
    ea.unsupport(&mut cache, &mut file, 10, child_addr).unwrap();

    ea.close(&mut cache, &mut file).unwrap();
}

#[test]
fn flush_all_respects_header_and_dblock_ordering() {
    init_logging();
    let mut cache = Cache::new();
    let mut file = MemoryFile::new();
    let ea = ExtensibleArray::<TestU32Class>::create(&mut cache, &mut file, ea_cparam(), 20).unwrap();
    ea.set(&mut cache, &mut file, 10, 0xBB).unwrap();
    cache.flush_all(&mut file).unwrap();

    let addr = ea.get_addr();
    ea.close(&mut cache, &mut file).unwrap();

    let mut cache2 = Cache::new();
    let reopened = ExtensibleArray::<TestU32Class>::open(&mut cache2, &mut file, addr).unwrap();
    assert_eq!(reopened.get(&mut cache2, &mut file, 10).unwrap(), 0xBB);
    reopened.close(&mut cache2, &mut file).unwrap();
}
