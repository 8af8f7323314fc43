//! Super block (spec §3, §4.3): second-level indirection, one address
//! per data block in its group. The page-init bitmap spec §3 describes
//! as living in the super block is kept with each data block instead
//! (see `crate::dblock`), so EA and FA data blocks share one wire
//! format; this super block only ever holds addresses.

use crate::class::ElementClass;
use crate::codec::{ByteReader, ByteWriter, EASB_MAGIC, VERSION};
use crate::error::Result;
use disk_driver::{Addr, UNDEFINED_ADDR};
use std::marker::PhantomData;

pub struct SuperBlock<C: ElementClass> {
    pub owner_addr: Addr,
    pub sblk_idx: usize,
    pub dblk_addrs: Vec<Addr>,
    _class: PhantomData<C>,
}

impl<C: ElementClass> SuperBlock<C> {
    pub fn new_empty(owner_addr: Addr, sblk_idx: usize, ndblks: usize) -> Self {
        Self {
            owner_addr,
            sblk_idx,
            dblk_addrs: vec![UNDEFINED_ADDR; ndblks],
            _class: PhantomData,
        }
    }

    pub fn encoded_size(ndblks: usize) -> usize {
        4 + 1 + 1 + 8 + 8 + ndblks * 8 + 4
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::encoded_size(self.dblk_addrs.len()));
        w.put_magic(EASB_MAGIC);
        w.put_u8(VERSION);
        w.put_u8(C::CLASS_ID);
        w.put_addr(self.owner_addr, 8);
        w.put_u64(self.sblk_idx as u64);
        for addr in &self.dblk_addrs {
            w.put_addr(*addr, 8);
        }
        w.finish()
    }

    pub fn decode(image: &[u8], addr: Addr, ndblks: usize) -> Result<Self> {
        let mut r = ByteReader::new(image, addr);
        r.expect_magic(EASB_MAGIC)?;
        r.expect_version(VERSION)?;
        let _class_id = r.get_class_id(C::CLASS_ID)?;
        let owner_addr = r.get_addr(8)?;
        let sblk_idx = r.get_u64()? as usize;
        let mut dblk_addrs = Vec::with_capacity(ndblks);
        for _ in 0..ndblks {
            dblk_addrs.push(r.get_addr(8)?);
        }
        r.verify_checksum()?;
        Ok(Self { owner_addr, sblk_idx, dblk_addrs, _class: PhantomData })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::TestU32Class;

    #[test]
    fn round_trips() {
        let mut sb: SuperBlock<TestU32Class> = SuperBlock::new_empty(32, 2, 4);
        sb.dblk_addrs[0] = 512;
        let bytes = sb.encode();
        let decoded: SuperBlock<TestU32Class> = SuperBlock::decode(&bytes, 32, 4).unwrap();
        assert_eq!(decoded.owner_addr, 32);
        assert_eq!(decoded.sblk_idx, 2);
        assert_eq!(decoded.dblk_addrs[0], 512);
        assert_eq!(decoded.dblk_addrs[1], UNDEFINED_ADDR);
    }
}
