//! Data block (spec §4.5, §6.3): holds either its elements inline, or —
//! once `dblk_nelmts` exceeds `dblk_page_nelmts` — a page-init bitmap
//! plus a prefix, deferring the elements to separately protected
//! data-block pages (`dblk_page.rs`). Shared between EA and FA, which
//! differ only in how their parent points at a data block.
//!
//! Every data block carries the address of the header that owns it
//! (spec §4.1's "owner header address"), checked on decode against the
//! header currently in use — an address mismatch there means the block
//! was read through a stale or wrong header (spec §7). An Extensible
//! Array data block additionally carries its own starting element
//! offset within the array (`block_off`); a Fixed Array has exactly one
//! data block, always at offset zero, so it carries none (spec §4.1:
//! "block offset (EA) or none (FA)").

use crate::class::ElementClass;
use crate::codec::{ByteReader, ByteWriter, CLASS_ID_SIZE, VERSION};
use crate::error::{BlkError, Result};
use disk_driver::Addr;
use std::marker::PhantomData;

/// Who owns this data block's address slot (spec §9 Open Question (c)).
/// EA data blocks hang either directly off the index block or off a
/// super block; FA data blocks have exactly one owner, the FA header,
/// so they're constructed with `Index` by convention there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataBlockParent {
    Index,
    Super { sblk_idx: usize },
}

fn bitmap_bytes(npages: u64) -> usize {
    ((npages + 7) / 8) as usize
}

pub struct DataBlock<C: ElementClass> {
    pub parent: DataBlockParent,
    pub owner_addr: Addr,
    pub block_off: Option<u64>,
    pub nelmts: u64,
    pub paged: bool,
    pub page_nelmts: u64,
    pub npages: u64,
    pub page_init: Vec<bool>,
    pub elmts: Vec<C::Elem>,
    _class: PhantomData<C>,
}

impl<C: ElementClass> DataBlock<C> {
    pub fn new_unpaged_filled(
        nelmts: u64,
        parent: DataBlockParent,
        owner_addr: Addr,
        block_off: Option<u64>,
    ) -> Self {
        Self {
            parent,
            owner_addr,
            block_off,
            nelmts,
            paged: false,
            page_nelmts: 0,
            npages: 0,
            page_init: Vec::new(),
            elmts: vec![C::fill(); nelmts as usize],
            _class: PhantomData,
        }
    }

    pub fn new_paged(
        nelmts: u64,
        page_nelmts: u64,
        parent: DataBlockParent,
        owner_addr: Addr,
        block_off: Option<u64>,
    ) -> Self {
        let npages = (nelmts + page_nelmts - 1) / page_nelmts;
        Self {
            parent,
            owner_addr,
            block_off,
            nelmts,
            paged: true,
            page_nelmts,
            npages,
            page_init: vec![false; npages as usize],
            elmts: Vec::new(),
            _class: PhantomData,
        }
    }

    /// Number of elements the page at `page_idx` holds — `page_nelmts`
    /// for every page but the last, whose count is the residue.
    pub fn page_elmt_count(&self, page_idx: u64) -> u64 {
        if page_idx + 1 == self.npages {
            self.nelmts - page_idx * self.page_nelmts
        } else {
            self.page_nelmts
        }
    }

    pub fn encoded_size(&self) -> usize {
        let payload = if self.paged {
            bitmap_bytes(self.npages)
        } else {
            self.elmts.len() * C::RAW_ELMT_SIZE
        };
        let owner = 8;
        let block_off = if self.block_off.is_some() { 8 } else { 0 };
        4 + 1 + CLASS_ID_SIZE + owner + block_off + payload + 4
    }

    /// Byte length of one page slot, reserved uniformly at
    /// `page_nelmts` capacity even for the last (possibly shorter)
    /// page — the stride used by `page_addr`.
    pub fn page_slot_size(&self) -> usize {
        crate::dblk_page::DataBlockPage::<C>::encoded_size(self.page_nelmts as usize)
    }

    /// Total on-disk extent this data block occupies: just the encoded
    /// prefix when non-paged, or prefix + every reserved page slot when
    /// paged (spec §4.2 — "its size metadata still reports the full
    /// on-disk extent").
    pub fn on_disk_extent_size(&self) -> u64 {
        if self.paged {
            self.encoded_size() as u64 + self.npages * self.page_slot_size() as u64
        } else {
            self.encoded_size() as u64
        }
    }

    pub fn page_addr(&self, dblk_addr: Addr, page_idx: u64) -> Addr {
        dblk_addr + self.encoded_size() as u64 + page_idx * self.page_slot_size() as u64
    }

    pub fn encode(&self, magic: [u8; 4]) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(self.encoded_size());
        w.put_magic(magic);
        w.put_u8(VERSION);
        w.put_u8(C::CLASS_ID);
        w.put_addr(self.owner_addr, 8);
        if let Some(off) = self.block_off {
            w.put_u64(off);
        }
        if self.paged {
            let mut bitmap = vec![0u8; bitmap_bytes(self.npages)];
            for (i, init) in self.page_init.iter().enumerate() {
                if *init {
                    bitmap[i / 8] |= 1 << (i % 8);
                }
            }
            w.put_bytes(&bitmap);
        } else {
            for elem in &self.elmts {
                let mut buf = vec![0u8; C::RAW_ELMT_SIZE];
                C::encode(elem, &mut buf);
                w.put_bytes(&buf);
            }
        }
        w.finish()
    }

    /// `owner_addr` is the header address the caller is reading this
    /// block on behalf of; `has_block_off` tells the decoder whether an
    /// EA-style block-offset field follows the owner address (the
    /// caller already knows this from which array flavour it's
    /// decoding for, the same way it already knows `paged`).
    #[allow(clippy::too_many_arguments)]
    pub fn decode(
        image: &[u8],
        addr: Addr,
        magic: [u8; 4],
        parent: DataBlockParent,
        nelmts: u64,
        paged: bool,
        page_nelmts: u64,
        owner_addr: Addr,
        has_block_off: bool,
    ) -> Result<Self> {
        let mut r = ByteReader::new(image, addr);
        r.expect_magic(magic)?;
        r.expect_version(VERSION)?;
        let _class_id = r.get_class_id(C::CLASS_ID)?;

        let found_owner = r.get_addr(8)?;
        if found_owner != owner_addr {
            return Err(BlkError::BadValue {
                addr,
                detail: format!(
                    "data block owner mismatch: expected header at {:#x}, found {:#x}",
                    owner_addr, found_owner
                ),
            });
        }
        let block_off = if has_block_off { Some(r.get_u64()?) } else { None };

        if paged {
            let npages = (nelmts + page_nelmts - 1) / page_nelmts;
            let bitmap = r.take(bitmap_bytes(npages))?;
            let mut page_init = vec![false; npages as usize];
            for (i, slot) in page_init.iter_mut().enumerate() {
                *slot = bitmap[i / 8] & (1 << (i % 8)) != 0;
            }
            r.verify_checksum()?;
            Ok(Self {
                parent,
                owner_addr: found_owner,
                block_off,
                nelmts,
                paged: true,
                page_nelmts,
                npages,
                page_init,
                elmts: Vec::new(),
                _class: PhantomData,
            })
        } else {
            let mut elmts = Vec::with_capacity(nelmts as usize);
            for _ in 0..nelmts {
                let buf = r.take(C::RAW_ELMT_SIZE)?;
                elmts.push(C::decode(buf));
            }
            r.verify_checksum()?;
            Ok(Self {
                parent,
                owner_addr: found_owner,
                block_off,
                nelmts,
                paged: false,
                page_nelmts: 0,
                npages: 0,
                page_init: Vec::new(),
                elmts,
                _class: PhantomData,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::TestU32Class;
    use crate::codec::EADB_MAGIC;

    #[test]
    fn unpaged_round_trips() {
        let mut db: DataBlock<TestU32Class> =
            DataBlock::new_unpaged_filled(4, DataBlockParent::Index, 64, Some(12));
        db.elmts[1] = 42;
        let bytes = db.encode(EADB_MAGIC);
        let decoded: DataBlock<TestU32Class> =
            DataBlock::decode(&bytes, 0, EADB_MAGIC, DataBlockParent::Index, 4, false, 0, 64, true).unwrap();
        assert_eq!(decoded.elmts, vec![0xFFFF_FFFF, 42, 0xFFFF_FFFF, 0xFFFF_FFFF]);
        assert_eq!(decoded.owner_addr, 64);
        assert_eq!(decoded.block_off, Some(12));
    }

    #[test]
    fn paged_bitmap_round_trips() {
        let mut db: DataBlock<TestU32Class> =
            DataBlock::new_paged(10, 4, DataBlockParent::Super { sblk_idx: 2 }, 64, Some(0));
        db.page_init[1] = true;
        let bytes = db.encode(EADB_MAGIC);
        let decoded: DataBlock<TestU32Class> = DataBlock::decode(
            &bytes,
            0,
            EADB_MAGIC,
            DataBlockParent::Super { sblk_idx: 2 },
            10,
            true,
            4,
            64,
            true,
        )
        .unwrap();
        assert_eq!(decoded.npages, 3);
        assert_eq!(decoded.page_init, vec![false, true, false]);
        assert_eq!(decoded.page_elmt_count(2), 2);
    }

    #[test]
    fn fa_style_block_has_no_offset_field() {
        let db: DataBlock<TestU32Class> =
            DataBlock::new_unpaged_filled(2, DataBlockParent::Index, 128, None);
        let bytes = db.encode(EADB_MAGIC);
        let decoded: DataBlock<TestU32Class> =
            DataBlock::decode(&bytes, 0, EADB_MAGIC, DataBlockParent::Index, 2, false, 0, 128, false).unwrap();
        assert_eq!(decoded.block_off, None);
    }

    #[test]
    fn owner_mismatch_is_rejected() {
        let db: DataBlock<TestU32Class> =
            DataBlock::new_unpaged_filled(2, DataBlockParent::Index, 64, Some(0));
        let bytes = db.encode(EADB_MAGIC);
        let err = DataBlock::<TestU32Class>::decode(
            &bytes,
            0,
            EADB_MAGIC,
            DataBlockParent::Index,
            2,
            false,
            0,
            999,
            true,
        );
        assert!(err.is_err());
    }
}
