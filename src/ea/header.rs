//! Extensible Array header (spec §3, §4.4): creation parameters,
//! derived super-block geometry, root address, and running statistics.
//! `rc`/`file_rc`/`pending_delete` are transient and are *not* part of
//! this image — they live alongside the cache entry (see
//! `crate::cache::Cache`'s header-aux table), which is what makes them
//! shared across every handle opened against the same address without
//! needing an `Rc<RefCell<_>>` here.

use crate::codec::{ByteReader, ByteWriter, EAHD_MAGIC, VERSION};
use crate::error::Result;
use crate::layout::{ExtensibleArrayParams, SuperBlockTable};
use disk_driver::{Addr, UNDEFINED_ADDR};

#[derive(Debug, Clone, Copy, Default)]
pub struct EaStats {
    pub max_idx_set: u64,
    pub nsuper_blks: u64,
    pub ndata_blks: u64,
    pub npages: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct EaHeaderImage {
    pub class_id: u8,
    pub cparam: ExtensibleArrayParams,
    /// log2 of the maximum array length; governs how far the
    /// super-block geometry table is built. Persisted so a reopened
    /// array rebuilds the identical table (spec §3: the table is a pure
    /// function of cparam, of which this is logically a part).
    pub max_nelmts_bits: u32,
    pub stats: EaStats,
    pub idx_blk_addr: Addr,
}

impl EaHeaderImage {
    pub fn new(class_id: u8, cparam: ExtensibleArrayParams, max_nelmts_bits: u32) -> Self {
        Self {
            class_id,
            cparam,
            max_nelmts_bits,
            stats: EaStats::default(),
            idx_blk_addr: UNDEFINED_ADDR,
        }
    }

    pub fn encoded_size() -> usize {
        // magic + version + class_id + 5 u32 (cparam + max_nelmts_bits) + 5 u64 (stats) + addr + checksum
        4 + 1 + 1 + (5 * 4) + (5 * 8) + 8 + 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::encoded_size());
        w.put_magic(EAHD_MAGIC);
        w.put_u8(VERSION);
        w.put_u8(self.class_id);
        w.put_u32(self.cparam.idx_blk_elmts);
        w.put_u32(self.cparam.data_blk_min_elmts);
        w.put_u32(self.cparam.sup_blk_min_data_ptrs);
        w.put_u32(self.cparam.max_dblk_page_nelmts_bits);
        w.put_u32(self.max_nelmts_bits);
        w.put_u64(self.stats.max_idx_set);
        w.put_u64(self.stats.nsuper_blks);
        w.put_u64(self.stats.ndata_blks);
        w.put_u64(self.stats.npages);
        w.put_u64(self.stats.total_bytes);
        w.put_addr(self.idx_blk_addr, 8);
        w.finish()
    }

    /// `expected_class_id` is the element class the caller is opening
    /// this header as (`C::CLASS_ID`) — a mismatch means the address
    /// points at an array of a different element type.
    pub fn decode(image: &[u8], addr: Addr, expected_class_id: u8) -> Result<Self> {
        let mut r = ByteReader::new(image, addr);
        r.expect_magic(EAHD_MAGIC)?;
        r.expect_version(VERSION)?;
        let class_id = r.get_class_id(expected_class_id)?;
        let cparam = ExtensibleArrayParams {
            idx_blk_elmts: r.get_u32()?,
            data_blk_min_elmts: r.get_u32()?,
            sup_blk_min_data_ptrs: r.get_u32()?,
            max_dblk_page_nelmts_bits: r.get_u32()?,
        };
        let max_nelmts_bits = r.get_u32()?;
        let stats = EaStats {
            max_idx_set: r.get_u64()?,
            nsuper_blks: r.get_u64()?,
            ndata_blks: r.get_u64()?,
            npages: r.get_u64()?,
            total_bytes: r.get_u64()?,
        };
        let idx_blk_addr = r.get_addr(8)?;
        r.verify_checksum()?;
        Ok(Self { class_id, cparam, max_nelmts_bits, stats, idx_blk_addr })
    }
}

pub fn build_table(cparam: &ExtensibleArrayParams, max_nelmts_bits: u32) -> SuperBlockTable {
    let max_nelmts = 1u64 << max_nelmts_bits;
    let beyond_idx = max_nelmts.saturating_sub(cparam.idx_blk_elmts as u64);
    SuperBlockTable::build(cparam, beyond_idx.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cparam() -> ExtensibleArrayParams {
        ExtensibleArrayParams {
            idx_blk_elmts: 4,
            data_blk_min_elmts: 4,
            sup_blk_min_data_ptrs: 2,
            max_dblk_page_nelmts_bits: 2,
        }
    }

    #[test]
    fn round_trips() {
        let mut hdr = EaHeaderImage::new(0, test_cparam(), 20);
        hdr.stats.max_idx_set = 11;
        hdr.idx_blk_addr = 128;
        let bytes = hdr.encode();
        let decoded = EaHeaderImage::decode(&bytes, 0, 0).unwrap();
        assert_eq!(decoded.stats.max_idx_set, 11);
        assert_eq!(decoded.idx_blk_addr, 128);
        assert_eq!(decoded.cparam.idx_blk_elmts, 4);
        assert_eq!(decoded.max_nelmts_bits, 20);
    }

    #[test]
    fn undefined_root_round_trips() {
        let hdr = EaHeaderImage::new(0, test_cparam(), 20);
        let bytes = hdr.encode();
        let decoded = EaHeaderImage::decode(&bytes, 0, 0).unwrap();
        assert_eq!(decoded.idx_blk_addr, UNDEFINED_ADDR);
    }

    #[test]
    fn wrong_class_id_is_rejected() {
        let hdr = EaHeaderImage::new(0, test_cparam(), 20);
        let bytes = hdr.encode();
        assert!(EaHeaderImage::decode(&bytes, 0, 1).is_err());
    }
}
