//! Data-block page (spec §4.6): the innermost container, holding a run
//! of raw elements with its own magic/version/class-id/checksum
//! envelope. Shared verbatim between EA and FA — the only difference
//! between the two is which magic they're encoded with.

use crate::class::ElementClass;
use crate::codec::{ByteReader, ByteWriter, CLASS_ID_SIZE, VERSION};
use crate::error::Result;
use disk_driver::Addr;
use std::marker::PhantomData;

pub struct DataBlockPage<C: ElementClass> {
    pub elmts: Vec<C::Elem>,
    _class: PhantomData<C>,
}

impl<C: ElementClass> DataBlockPage<C> {
    pub fn new_filled(nelmts: usize) -> Self {
        Self { elmts: vec![C::fill(); nelmts], _class: PhantomData }
    }

    pub fn encoded_size(nelmts: usize) -> usize {
        4 + 1 + CLASS_ID_SIZE + nelmts * C::RAW_ELMT_SIZE + 4
    }

    pub fn encode(&self, magic: [u8; 4]) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(Self::encoded_size(self.elmts.len()));
        w.put_magic(magic);
        w.put_u8(VERSION);
        w.put_u8(C::CLASS_ID);
        for elem in &self.elmts {
            let mut buf = vec![0u8; C::RAW_ELMT_SIZE];
            C::encode(elem, &mut buf);
            w.put_bytes(&buf);
        }
        w.finish()
    }

    pub fn decode(image: &[u8], addr: Addr, magic: [u8; 4], nelmts: usize) -> Result<Self> {
        let mut r = ByteReader::new(image, addr);
        r.expect_magic(magic)?;
        r.expect_version(VERSION)?;
        let _class_id = r.get_class_id(C::CLASS_ID)?;
        let mut elmts = Vec::with_capacity(nelmts);
        for _ in 0..nelmts {
            let buf = r.take(C::RAW_ELMT_SIZE)?;
            elmts.push(C::decode(buf));
        }
        r.verify_checksum()?;
        Ok(Self { elmts, _class: PhantomData })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::TestU32Class;
    use crate::codec::EADP_MAGIC;

    #[test]
    fn round_trips() {
        let mut page: DataBlockPage<TestU32Class> = DataBlockPage::new_filled(4);
        page.elmts[2] = 77;
        let bytes = page.encode(EADP_MAGIC);
        let decoded: DataBlockPage<TestU32Class> =
            DataBlockPage::decode(&bytes, 0, EADP_MAGIC, 4).unwrap();
        assert_eq!(decoded.elmts, vec![0xFFFF_FFFF, 0xFFFF_FFFF, 77, 0xFFFF_FFFF]);
    }

    #[test]
    fn wrong_magic_rejected() {
        let page: DataBlockPage<TestU32Class> = DataBlockPage::new_filled(2);
        let bytes = page.encode(EADP_MAGIC);
        assert!(DataBlockPage::<TestU32Class>::decode(
            &bytes,
            0,
            crate::codec::FADP_MAGIC,
            2
        )
        .is_err());
    }
}
