//! Fixed Array header (spec §3, §4.4): a fixed element count and the
//! address of its single (optionally paged) data block. Simpler than
//! the EA header since there is no super-block geometry to derive —
//! the whole array is one data block.

use crate::codec::{ByteReader, ByteWriter, FAHD_MAGIC, VERSION};
use crate::error::Result;
use disk_driver::{Addr, UNDEFINED_ADDR};

#[derive(Debug, Clone, Copy, Default)]
pub struct FaStats {
    pub dblk_size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct FixedArrayParams {
    pub nelmts: u64,
    pub max_dblk_page_nelmts_bits: u32,
}

#[derive(Debug, Clone)]
pub struct FaHeaderImage {
    pub class_id: u8,
    pub cparam: FixedArrayParams,
    pub stats: FaStats,
    pub dblk_addr: Addr,
}

impl FaHeaderImage {
    pub fn new(class_id: u8, cparam: FixedArrayParams) -> Self {
        Self { class_id, cparam, stats: FaStats::default(), dblk_addr: UNDEFINED_ADDR }
    }

    pub fn encoded_size() -> usize {
        4 + 1 + 1 + 8 + 4 + 8 + 8 + 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::encoded_size());
        w.put_magic(FAHD_MAGIC);
        w.put_u8(VERSION);
        w.put_u8(self.class_id);
        w.put_u64(self.cparam.nelmts);
        w.put_u32(self.cparam.max_dblk_page_nelmts_bits);
        w.put_u64(self.stats.dblk_size);
        w.put_addr(self.dblk_addr, 8);
        w.finish()
    }

    /// `expected_class_id` is the element class the caller is opening
    /// this header as (`C::CLASS_ID`) — a mismatch means the address
    /// points at an array of a different element type.
    pub fn decode(image: &[u8], addr: Addr, expected_class_id: u8) -> Result<Self> {
        let mut r = ByteReader::new(image, addr);
        r.expect_magic(FAHD_MAGIC)?;
        r.expect_version(VERSION)?;
        let class_id = r.get_class_id(expected_class_id)?;
        let cparam = FixedArrayParams { nelmts: r.get_u64()?, max_dblk_page_nelmts_bits: r.get_u32()? };
        let stats = FaStats { dblk_size: r.get_u64()? };
        let dblk_addr = r.get_addr(8)?;
        r.verify_checksum()?;
        Ok(Self { class_id, cparam, stats, dblk_addr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let cparam = FixedArrayParams { nelmts: 9, max_dblk_page_nelmts_bits: 2 };
        let mut hdr = FaHeaderImage::new(0, cparam);
        hdr.dblk_addr = 64;
        let bytes = hdr.encode();
        let decoded = FaHeaderImage::decode(&bytes, 0, 0).unwrap();
        assert_eq!(decoded.cparam.nelmts, 9);
        assert_eq!(decoded.dblk_addr, 64);
    }

    #[test]
    fn wrong_class_id_is_rejected() {
        let cparam = FixedArrayParams { nelmts: 9, max_dblk_page_nelmts_bits: 2 };
        let hdr = FaHeaderImage::new(0, cparam);
        let bytes = hdr.encode();
        assert!(FaHeaderImage::decode(&bytes, 0, 1).is_err());
    }
}
