//! Extensible Array (spec §3, §4, §6.4): the public handle and the
//! addressing/lifecycle logic that drives it. `header`, `iblock`, and
//! `sblock` hold the three EA-specific block formats; data blocks and
//! pages are shared with the Fixed Array (`crate::dblock`,
//! `crate::dblk_page`).

pub mod header;
pub mod iblock;
pub mod sblock;

use crate::cache::{Cache, CacheFlags};
use crate::class::ElementClass;
use crate::codec::EADB_MAGIC;
use crate::dblk_page::DataBlockPage;
use crate::dblock::{DataBlock, DataBlockParent};
use crate::error::{BlkError, Result};
use crate::layout::{ExtensibleArrayParams, SuperBlockTable};
use disk_driver::{Addr, BlockFile, MemType, UNDEFINED_ADDR};
use header::{build_table, EaHeaderImage};
use iblock::IndexBlock;
use log::{debug, info};
use sblock::SuperBlock;
use std::marker::PhantomData;

/// A handle onto one Extensible Array. Thin by design: the mutable,
/// shared state (`rc`, `file_rc`, `pending_delete`, and every block
/// image) lives in the `Cache` passed to each call, not here — any two
/// handles that operate against the same `Cache` are the "open handles
/// sharing one header" of spec §3, with no `Rc<RefCell<_>>` required.
pub struct ExtensibleArray<C: ElementClass> {
    header_addr: Addr,
    cparam: ExtensibleArrayParams,
    max_nelmts_bits: u32,
    table: SuperBlockTable,
    page_limit: u64,
    _class: PhantomData<C>,
}

impl<C: ElementClass> ExtensibleArray<C> {
    pub fn header_addr(&self) -> Addr {
        self.header_addr
    }

    fn iblock_size(&self) -> usize {
        IndexBlock::<C>::encoded_size(self.cparam.idx_blk_elmts as usize, self.table.entries.len())
    }

    pub fn create(
        cache: &mut Cache,
        file: &mut dyn BlockFile,
        cparam: ExtensibleArrayParams,
        max_nelmts_bits: u32,
    ) -> Result<Self> {
        let table = build_table(&cparam, max_nelmts_bits);
        let page_limit = 1u64 << cparam.max_dblk_page_nelmts_bits;
        let image = EaHeaderImage::new(C::CLASS_ID, cparam, max_nelmts_bits);
        let bytes = image.encode();
        let addr = file
            .allocate(MemType::EaHeader, bytes.len() as u64)
            .map_err(BlkError::CantCreate)?;
        cache.insert_new(addr, MemType::EaHeader, bytes, true);
        cache.header_aux_init(addr);
        cache.header_incr(addr)?;
        cache.header_fuse_incr(addr)?;
        info!("created extensible array at {:#x} ({} super blocks)", addr, table.entries.len());
        Ok(Self { header_addr: addr, cparam, max_nelmts_bits, table, page_limit, _class: PhantomData })
    }

    pub fn open(cache: &mut Cache, file: &mut dyn BlockFile, addr: Addr) -> Result<Self> {
        let image = cache.protect(file, addr, MemType::EaHeader, EaHeaderImage::encoded_size() as u64, CacheFlags::NONE)?;
        let hdr = EaHeaderImage::decode(&image, addr, C::CLASS_ID)?;
        cache.unprotect(addr, image, CacheFlags::NONE)?;
        if cache.header_aux(addr).pending_delete {
            return Err(BlkError::CantOpenObj);
        }
        cache.header_incr(addr)?;
        cache.header_fuse_incr(addr)?;
        let table = build_table(&hdr.cparam, hdr.max_nelmts_bits);
        let page_limit = 1u64 << hdr.cparam.max_dblk_page_nelmts_bits;
        Ok(Self {
            header_addr: addr,
            cparam: hdr.cparam,
            max_nelmts_bits: hdr.max_nelmts_bits,
            table,
            page_limit,
            _class: PhantomData,
        })
    }

    /// A second handle onto the same header, the way an application
    /// would obtain a sibling handle without round-tripping through
    /// disk (spec §8 scenario 5's `H1`/`H2`).
    pub fn reopen(&self, cache: &mut Cache) -> Result<Self> {
        cache.header_incr(self.header_addr)?;
        cache.header_fuse_incr(self.header_addr)?;
        Ok(Self {
            header_addr: self.header_addr,
            cparam: self.cparam,
            max_nelmts_bits: self.max_nelmts_bits,
            table: self.table.clone(),
            page_limit: self.page_limit,
            _class: PhantomData,
        })
    }

    pub fn close(&self, cache: &mut Cache, file: &mut dyn BlockFile) -> Result<()> {
        cache.header_fuse_decr(self.header_addr)?;
        let aux = cache.header_aux(self.header_addr);
        if aux.file_rc == 0 && aux.pending_delete {
            cache.header_decr(self.header_addr)?;
            self.delete_now(cache, file)?;
        } else {
            cache.header_decr(self.header_addr)?;
        }
        Ok(())
    }

    /// Request deletion. If other handles still have the file open
    /// (`file_rc > 0`), defers by setting `pending_delete`; the actual
    /// free runs on the last matching `close` (spec §4.6).
    pub fn delete(&self, cache: &mut Cache, file: &mut dyn BlockFile) -> Result<()> {
        let aux = cache.header_aux(self.header_addr);
        if aux.file_rc > 0 {
            cache.set_pending_delete(self.header_addr, true);
            Ok(())
        } else {
            self.delete_now(cache, file)
        }
    }

    fn delete_now(&self, cache: &mut Cache, file: &mut dyn BlockFile) -> Result<()> {
        debug!("deleting extensible array at {:#x}", self.header_addr);
        let hdr_size = EaHeaderImage::encoded_size();
        let hdr_image = cache.protect(file, self.header_addr, MemType::EaHeader, hdr_size as u64, CacheFlags::NONE)?;
        let hdr = EaHeaderImage::decode(&hdr_image, self.header_addr, C::CLASS_ID)?;
        cache.unprotect(self.header_addr, hdr_image, CacheFlags::NONE)?;

        if hdr.idx_blk_addr != UNDEFINED_ADDR {
            let iblock_addr = hdr.idx_blk_addr;
            let iblock_size = self.iblock_size();
            let ib_image =
                cache.protect(file, iblock_addr, MemType::EaIndexBlock, iblock_size as u64, CacheFlags::NONE)?;
            let iblock = IndexBlock::<C>::decode(
                &ib_image,
                iblock_addr,
                self.cparam.idx_blk_elmts as usize,
                self.table.entries.len(),
            )?;
            cache.unprotect(iblock_addr, ib_image, CacheFlags::NONE)?;

            for (sblk_idx, &sblk_addr) in iblock.sblk_addrs.iter().enumerate() {
                if sblk_addr == UNDEFINED_ADDR {
                    continue;
                }
                let info = self.table.get(sblk_idx);
                let sb_size = SuperBlock::<C>::encoded_size(info.ndblks as usize);
                let sb_image =
                    cache.protect(file, sblk_addr, MemType::EaSuperBlock, sb_size as u64, CacheFlags::NONE)?;
                let sblock = SuperBlock::<C>::decode(&sb_image, sblk_addr, info.ndblks as usize)?;
                cache.unprotect(sblk_addr, sb_image, CacheFlags::NONE)?;

                for &dblk_addr in &sblock.dblk_addrs {
                    if dblk_addr == UNDEFINED_ADDR {
                        continue;
                    }
                    let paged = info.dblk_nelmts > self.page_limit;
                    let placeholder: DataBlock<C> = if paged {
                        DataBlock::new_paged(
                            info.dblk_nelmts,
                            self.page_limit,
                            DataBlockParent::Super { sblk_idx },
                            self.header_addr,
                            Some(0),
                        )
                    } else {
                        DataBlock::new_unpaged_filled(
                            info.dblk_nelmts,
                            DataBlockParent::Super { sblk_idx },
                            self.header_addr,
                            Some(0),
                        )
                    };
                    if paged {
                        for page_idx in 0..placeholder.npages {
                            cache.evict_unwritten(placeholder.page_addr(dblk_addr, page_idx));
                        }
                    }
                    let extent = placeholder.on_disk_extent_size();
                    cache.evict_unwritten(dblk_addr);
                    file.free(MemType::EaDataBlock, dblk_addr, extent).map_err(BlkError::CantCreate)?;
                }
                cache.evict_unwritten(sblk_addr);
                file.free(MemType::EaSuperBlock, sblk_addr, sb_size as u64).map_err(BlkError::CantCreate)?;
            }
            cache.evict_unwritten(iblock_addr);
            file.free(MemType::EaIndexBlock, iblock_addr, iblock_size as u64).map_err(BlkError::CantCreate)?;
        }

        cache.evict_unwritten(self.header_addr);
        file.free(MemType::EaHeader, self.header_addr, hdr_size as u64).map_err(BlkError::CantCreate)?;
        cache.forget_header_aux(self.header_addr);
        Ok(())
    }

    pub fn get_nelmts(&self, cache: &mut Cache, file: &mut dyn BlockFile) -> Result<u64> {
        Ok(self.read_header(cache, file)?.stats.max_idx_set)
    }

    pub fn get_addr(&self) -> Addr {
        self.header_addr
    }

    fn read_header(&self, cache: &mut Cache, file: &mut dyn BlockFile) -> Result<EaHeaderImage> {
        let image =
            cache.protect(file, self.header_addr, MemType::EaHeader, EaHeaderImage::encoded_size() as u64, CacheFlags::NONE)?;
        let hdr = EaHeaderImage::decode(&image, self.header_addr, C::CLASS_ID)?;
        cache.unprotect(self.header_addr, image, CacheFlags::NONE)?;
        Ok(hdr)
    }

    /// `parent` depends on this array's header: the header must flush
    /// before `parent` (spec §5's ordering guarantee, generalized to a
    /// caller-supplied parent).
    pub fn depend(&self, cache: &mut Cache, parent: Addr) -> Result<()> {
        cache.create_flush_depend(parent, self.header_addr)
    }

    pub fn undepend(&self, cache: &mut Cache, parent: Addr) -> Result<()> {
        cache.destroy_flush_depend(parent, self.header_addr)
    }

    /// `child` depends on the block backing element `i`, creating that
    /// block (and any index/super block on the path to it) if nothing
    /// backs it yet — mirrors `set`'s lazy-create walk rather than
    /// `locate_container`'s read-only one, since a caller asking to
    /// support an index it has never written still needs somewhere to
    /// attach the dependency.
    pub fn support(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64, child: Addr) -> Result<()> {
        let container = self.locate_or_create_container(cache, file, i)?;
        cache.create_flush_depend(container, child)
    }

    /// Read-only counterpart to `support`: an index with nothing backing
    /// it yet has no block to detach `child` from.
    pub fn unsupport(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64, child: Addr) -> Result<()> {
        let container = self
            .locate_container(cache, file, i)?
            .ok_or(BlkError::CantUndepend { parent: UNDEFINED_ADDR, child })?;
        cache.destroy_flush_depend(container, child)
    }

    /// Write-mode walk to the block backing element `i`, creating the
    /// index block, super block, and/or data block along the way if
    /// they don't exist yet. Never touches element values or page
    /// contents — it only ensures the *container* a flush dependency
    /// can attach to is present, at whole-block granularity (spec §9
    /// Open Question: support/unsupport operate per data block, not
    /// per page).
    fn locate_or_create_container(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64) -> Result<Addr> {
        let hdr_size = EaHeaderImage::encoded_size();
        let hdr_image = cache.protect(file, self.header_addr, MemType::EaHeader, hdr_size as u64, CacheFlags::NONE)?;
        let mut hdr = EaHeaderImage::decode(&hdr_image, self.header_addr, C::CLASS_ID)?;
        let mut hdr_dirty = false;

        if hdr.idx_blk_addr == UNDEFINED_ADDR {
            let ib: IndexBlock<C> = IndexBlock::new_empty(
                self.header_addr,
                self.cparam.idx_blk_elmts as usize,
                self.table.entries.len(),
            );
            let bytes = ib.encode();
            let ib_addr = file.allocate(MemType::EaIndexBlock, bytes.len() as u64).map_err(BlkError::CantCreate)?;
            cache.insert_new(ib_addr, MemType::EaIndexBlock, bytes, false);
            cache.create_flush_depend(self.header_addr, ib_addr)?;
            hdr.idx_blk_addr = ib_addr;
            hdr_dirty = true;
        }
        let iblock_addr = hdr.idx_blk_addr;

        let result: Result<Addr> = if i < self.cparam.idx_blk_elmts as u64 {
            Ok(iblock_addr)
        } else {
            let iblock_size = self.iblock_size();
            let ib_image =
                cache.protect(file, iblock_addr, MemType::EaIndexBlock, iblock_size as u64, CacheFlags::NONE)?;
            let mut iblock = IndexBlock::<C>::decode(
                &ib_image,
                iblock_addr,
                self.cparam.idx_blk_elmts as usize,
                self.table.entries.len(),
            )?;
            let mut ib_dirty = false;

            let inner = self.locate_or_create_dblk(cache, file, &mut iblock, &mut ib_dirty, i);

            let ib_bytes = iblock.encode();
            let ib_unprotect_result = cache.unprotect(
                iblock_addr,
                ib_bytes,
                if ib_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE },
            );
            ib_unprotect_result?;
            inner
        };

        let hdr_bytes = hdr.encode();
        let hdr_unprotect_result =
            cache.unprotect(self.header_addr, hdr_bytes, if hdr_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE });
        let container = result?;
        hdr_unprotect_result?;
        Ok(container)
    }

    fn locate_or_create_dblk(
        &self,
        cache: &mut Cache,
        file: &mut dyn BlockFile,
        iblock: &mut IndexBlock<C>,
        ib_dirty: &mut bool,
        i: u64,
    ) -> Result<Addr> {
        let rel = i - self.cparam.idx_blk_elmts as u64;
        let sblk_idx = self.table.sblk_idx_for_offset(rel);
        let info = self.table.get(sblk_idx);
        let elmt_off = rel - info.start_idx;

        if iblock.sblk_addrs[sblk_idx] == UNDEFINED_ADDR {
            let sb: SuperBlock<C> = SuperBlock::new_empty(self.header_addr, sblk_idx, info.ndblks as usize);
            let bytes = sb.encode();
            let addr = file.allocate(MemType::EaSuperBlock, bytes.len() as u64).map_err(BlkError::CantCreate)?;
            cache.insert_new(addr, MemType::EaSuperBlock, bytes, false);
            cache.create_flush_depend(self.header_addr, addr)?;
            iblock.sblk_addrs[sblk_idx] = addr;
            *ib_dirty = true;
        }
        let sblock_addr = iblock.sblk_addrs[sblk_idx];
        let sblock_size = SuperBlock::<C>::encoded_size(info.ndblks as usize);
        let sb_image =
            cache.protect(file, sblock_addr, MemType::EaSuperBlock, sblock_size as u64, CacheFlags::NONE)?;
        let mut sblock = SuperBlock::<C>::decode(&sb_image, sblock_addr, info.ndblks as usize)?;
        let mut sb_dirty = false;

        let dblk_idx = (elmt_off / info.dblk_nelmts) as usize;
        let block_off = self.cparam.idx_blk_elmts as u64 + info.start_idx + dblk_idx as u64 * info.dblk_nelmts;
        let result: Result<Addr> = (|| {
            if sblock.dblk_addrs[dblk_idx] == UNDEFINED_ADDR {
                let paged = info.dblk_nelmts > self.page_limit;
                let parent = DataBlockParent::Super { sblk_idx };
                let db: DataBlock<C> = if paged {
                    DataBlock::new_paged(info.dblk_nelmts, self.page_limit, parent, self.header_addr, Some(block_off))
                } else {
                    DataBlock::new_unpaged_filled(info.dblk_nelmts, parent, self.header_addr, Some(block_off))
                };
                let extent = db.on_disk_extent_size();
                let bytes = db.encode(EADB_MAGIC);
                let addr = file.allocate(MemType::EaDataBlock, extent).map_err(BlkError::CantCreate)?;
                cache.insert_new(addr, MemType::EaDataBlock, bytes, false);
                cache.create_flush_depend(self.header_addr, addr)?;
                sblock.dblk_addrs[dblk_idx] = addr;
                sb_dirty = true;
            }
            Ok(sblock.dblk_addrs[dblk_idx])
        })();

        let sb_bytes = sblock.encode();
        let sb_unprotect_result =
            cache.unprotect(sblock_addr, sb_bytes, if sb_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE });
        let dblk_addr = result?;
        sb_unprotect_result?;
        Ok(dblk_addr)
    }

    /// Read-only walk returning the address of the block that would
    /// hold element `i`, or `None` if nothing backs it yet. Used by
    /// `support`/`unsupport`, and exposed directly for callers that
    /// need to name a block's current address without attaching a
    /// flush dependency to it (e.g. diagnostics).
    pub fn locate_container(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64) -> Result<Option<Addr>> {
        let hdr = self.read_header(cache, file)?;
        if hdr.idx_blk_addr == UNDEFINED_ADDR {
            return Ok(None);
        }
        let iblock_addr = hdr.idx_blk_addr;
        let iblock_size = self.iblock_size();
        let ib_image =
            cache.protect(file, iblock_addr, MemType::EaIndexBlock, iblock_size as u64, CacheFlags::NONE)?;
        let iblock = IndexBlock::<C>::decode(
            &ib_image,
            iblock_addr,
            self.cparam.idx_blk_elmts as usize,
            self.table.entries.len(),
        )?;
        cache.unprotect(iblock_addr, ib_image, CacheFlags::NONE)?;

        if i < self.cparam.idx_blk_elmts as u64 {
            return Ok(Some(iblock_addr));
        }

        let rel = i - self.cparam.idx_blk_elmts as u64;
        let sblk_idx = self.table.sblk_idx_for_offset(rel);
        let info = self.table.get(sblk_idx);
        let sblk_addr = iblock.sblk_addrs[sblk_idx];
        if sblk_addr == UNDEFINED_ADDR {
            return Ok(None);
        }
        let sb_size = SuperBlock::<C>::encoded_size(info.ndblks as usize);
        let sb_image = cache.protect(file, sblk_addr, MemType::EaSuperBlock, sb_size as u64, CacheFlags::NONE)?;
        let sblock = SuperBlock::<C>::decode(&sb_image, sblk_addr, info.ndblks as usize)?;
        cache.unprotect(sblk_addr, sb_image, CacheFlags::NONE)?;

        let elmt_off = rel - info.start_idx;
        let dblk_idx = (elmt_off / info.dblk_nelmts) as usize;
        let dblk_addr = sblock.dblk_addrs[dblk_idx];
        if dblk_addr == UNDEFINED_ADDR {
            return Ok(None);
        }
        Ok(Some(dblk_addr))
    }

    pub fn get(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64) -> Result<C::Elem> {
        let hdr = self.read_header(cache, file)?;
        if hdr.idx_blk_addr == UNDEFINED_ADDR {
            return Ok(C::fill());
        }
        let iblock_addr = hdr.idx_blk_addr;
        let iblock_size = self.iblock_size();
        let ib_image =
            cache.protect(file, iblock_addr, MemType::EaIndexBlock, iblock_size as u64, CacheFlags::NONE)?;
        let iblock = IndexBlock::<C>::decode(
            &ib_image,
            iblock_addr,
            self.cparam.idx_blk_elmts as usize,
            self.table.entries.len(),
        )?;
        cache.unprotect(iblock_addr, ib_image, CacheFlags::NONE)?;

        if i < self.cparam.idx_blk_elmts as u64 {
            return Ok(iblock.elmts[i as usize]);
        }

        let rel = i - self.cparam.idx_blk_elmts as u64;
        let sblk_idx = self.table.sblk_idx_for_offset(rel);
        let info = self.table.get(sblk_idx);
        let sblk_addr = iblock.sblk_addrs[sblk_idx];
        if sblk_addr == UNDEFINED_ADDR {
            return Ok(C::fill());
        }
        let sb_size = SuperBlock::<C>::encoded_size(info.ndblks as usize);
        let sb_image = cache.protect(file, sblk_addr, MemType::EaSuperBlock, sb_size as u64, CacheFlags::NONE)?;
        let sblock = SuperBlock::<C>::decode(&sb_image, sblk_addr, info.ndblks as usize)?;
        cache.unprotect(sblk_addr, sb_image, CacheFlags::NONE)?;

        let elmt_off = rel - info.start_idx;
        let dblk_idx = (elmt_off / info.dblk_nelmts) as usize;
        let dblk_addr = sblock.dblk_addrs[dblk_idx];
        if dblk_addr == UNDEFINED_ADDR {
            return Ok(C::fill());
        }
        let local_off = elmt_off % info.dblk_nelmts;
        let block_off = self.cparam.idx_blk_elmts as u64 + info.start_idx + dblk_idx as u64 * info.dblk_nelmts;
        self.get_in_dblk(cache, file, dblk_addr, info.dblk_nelmts, local_off, sblk_idx, block_off)
    }

    #[allow(clippy::too_many_arguments)]
    fn get_in_dblk(
        &self,
        cache: &mut Cache,
        file: &mut dyn BlockFile,
        dblk_addr: Addr,
        dblk_nelmts: u64,
        local_off: u64,
        sblk_idx: usize,
        block_off: u64,
    ) -> Result<C::Elem> {
        let paged = dblk_nelmts > self.page_limit;
        let parent = DataBlockParent::Super { sblk_idx };
        if !paged {
            let size =
                DataBlock::<C>::new_unpaged_filled(dblk_nelmts, parent, self.header_addr, Some(block_off))
                    .encoded_size();
            let image = cache.protect(file, dblk_addr, MemType::EaDataBlock, size as u64, CacheFlags::NONE)?;
            let dblock = DataBlock::<C>::decode(
                &image, dblk_addr, EADB_MAGIC, parent, dblk_nelmts, false, 0, self.header_addr, true,
            )?;
            cache.unprotect(dblk_addr, image, CacheFlags::NONE)?;
            return Ok(dblock.elmts[local_off as usize]);
        }

        let prefix_size =
            DataBlock::<C>::new_paged(dblk_nelmts, self.page_limit, parent, self.header_addr, Some(block_off))
                .encoded_size();
        let image = cache.protect(file, dblk_addr, MemType::EaDataBlock, prefix_size as u64, CacheFlags::NONE)?;
        let dblock = DataBlock::<C>::decode(
            &image, dblk_addr, EADB_MAGIC, parent, dblk_nelmts, true, self.page_limit, self.header_addr, true,
        )?;
        cache.unprotect(dblk_addr, image, CacheFlags::NONE)?;

        let page_idx = local_off / self.page_limit;
        let page_local = local_off % self.page_limit;
        if !dblock.page_init[page_idx as usize] {
            return Ok(C::fill());
        }
        let page_nelmts = dblock.page_elmt_count(page_idx);
        let page_addr = dblock.page_addr(dblk_addr, page_idx);
        let page_size = DataBlockPage::<C>::encoded_size(page_nelmts as usize);
        let image = cache.protect(file, page_addr, MemType::EaDataBlockPage, page_size as u64, CacheFlags::NONE)?;
        let page = DataBlockPage::<C>::decode(&image, page_addr, crate::codec::EADP_MAGIC, page_nelmts as usize)?;
        cache.unprotect(page_addr, image, CacheFlags::NONE)?;
        Ok(page.elmts[page_local as usize])
    }

    pub fn set(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64, value: C::Elem) -> Result<()> {
        let hdr_size = EaHeaderImage::encoded_size();
        let hdr_image = cache.protect(file, self.header_addr, MemType::EaHeader, hdr_size as u64, CacheFlags::NONE)?;
        let mut hdr = EaHeaderImage::decode(&hdr_image, self.header_addr, C::CLASS_ID)?;
        let mut hdr_dirty = false;

        if hdr.idx_blk_addr == UNDEFINED_ADDR {
            let ib: IndexBlock<C> = IndexBlock::new_empty(
                self.header_addr,
                self.cparam.idx_blk_elmts as usize,
                self.table.entries.len(),
            );
            let bytes = ib.encode();
            let ib_addr = file.allocate(MemType::EaIndexBlock, bytes.len() as u64).map_err(BlkError::CantCreate)?;
            cache.insert_new(ib_addr, MemType::EaIndexBlock, bytes, false);
            cache.create_flush_depend(self.header_addr, ib_addr)?;
            hdr.idx_blk_addr = ib_addr;
            hdr_dirty = true;
        }
        let iblock_addr = hdr.idx_blk_addr;
        let iblock_size = self.iblock_size();
        let ib_image =
            cache.protect(file, iblock_addr, MemType::EaIndexBlock, iblock_size as u64, CacheFlags::NONE)?;
        let mut iblock = IndexBlock::<C>::decode(
            &ib_image,
            iblock_addr,
            self.cparam.idx_blk_elmts as usize,
            self.table.entries.len(),
        )?;
        let mut ib_dirty = false;

        let result = if i < self.cparam.idx_blk_elmts as u64 {
            iblock.elmts[i as usize] = value;
            ib_dirty = true;
            Ok(())
        } else {
            self.set_beyond_index(cache, file, &mut iblock, &mut ib_dirty, i, value)
        };

        let ib_bytes = iblock.encode();
        let ib_unprotect_result =
            cache.unprotect(iblock_addr, ib_bytes, if ib_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE });

        result?;
        ib_unprotect_result?;

        if i + 1 > hdr.stats.max_idx_set {
            hdr.stats.max_idx_set = i + 1;
            hdr_dirty = true;
        }
        let hdr_bytes = hdr.encode();
        cache.unprotect(self.header_addr, hdr_bytes, if hdr_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE })?;
        Ok(())
    }

    fn set_beyond_index(
        &self,
        cache: &mut Cache,
        file: &mut dyn BlockFile,
        iblock: &mut IndexBlock<C>,
        ib_dirty: &mut bool,
        i: u64,
        value: C::Elem,
    ) -> Result<()> {
        let rel = i - self.cparam.idx_blk_elmts as u64;
        let sblk_idx = self.table.sblk_idx_for_offset(rel);
        let info = self.table.get(sblk_idx);
        let elmt_off = rel - info.start_idx;

        if iblock.sblk_addrs[sblk_idx] == UNDEFINED_ADDR {
            let sb: SuperBlock<C> = SuperBlock::new_empty(self.header_addr, sblk_idx, info.ndblks as usize);
            let bytes = sb.encode();
            let addr = file.allocate(MemType::EaSuperBlock, bytes.len() as u64).map_err(BlkError::CantCreate)?;
            cache.insert_new(addr, MemType::EaSuperBlock, bytes, false);
            cache.create_flush_depend(self.header_addr, addr)?;
            iblock.sblk_addrs[sblk_idx] = addr;
            *ib_dirty = true;
        }
        let sblock_addr = iblock.sblk_addrs[sblk_idx];
        let sblock_size = SuperBlock::<C>::encoded_size(info.ndblks as usize);
        let sb_image =
            cache.protect(file, sblock_addr, MemType::EaSuperBlock, sblock_size as u64, CacheFlags::NONE)?;
        let mut sblock = SuperBlock::<C>::decode(&sb_image, sblock_addr, info.ndblks as usize)?;
        let mut sb_dirty = false;

        let dblk_idx = (elmt_off / info.dblk_nelmts) as usize;
        let local_off = elmt_off % info.dblk_nelmts;
        let block_off = self.cparam.idx_blk_elmts as u64 + info.start_idx + dblk_idx as u64 * info.dblk_nelmts;
        let result = self.set_in_dblk(
            cache,
            file,
            &mut sblock,
            &mut sb_dirty,
            dblk_idx,
            info.dblk_nelmts,
            local_off,
            value,
            sblk_idx,
            block_off,
        );

        let sb_bytes = sblock.encode();
        let sb_unprotect_result =
            cache.unprotect(sblock_addr, sb_bytes, if sb_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE });
        result?;
        sb_unprotect_result?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn set_in_dblk(
        &self,
        cache: &mut Cache,
        file: &mut dyn BlockFile,
        sblock: &mut SuperBlock<C>,
        sb_dirty: &mut bool,
        dblk_idx: usize,
        dblk_nelmts: u64,
        local_off: u64,
        value: C::Elem,
        sblk_idx: usize,
        block_off: u64,
    ) -> Result<()> {
        let paged = dblk_nelmts > self.page_limit;
        let parent = DataBlockParent::Super { sblk_idx };

        if sblock.dblk_addrs[dblk_idx] == UNDEFINED_ADDR {
            let db: DataBlock<C> = if paged {
                DataBlock::new_paged(dblk_nelmts, self.page_limit, parent, self.header_addr, Some(block_off))
            } else {
                DataBlock::new_unpaged_filled(dblk_nelmts, parent, self.header_addr, Some(block_off))
            };
            let extent = db.on_disk_extent_size();
            let bytes = db.encode(EADB_MAGIC);
            let addr = file.allocate(MemType::EaDataBlock, extent).map_err(BlkError::CantCreate)?;
            cache.insert_new(addr, MemType::EaDataBlock, bytes, false);
            cache.create_flush_depend(self.header_addr, addr)?;
            sblock.dblk_addrs[dblk_idx] = addr;
            *sb_dirty = true;
        }
        let dblk_addr = sblock.dblk_addrs[dblk_idx];

        if !paged {
            let size =
                DataBlock::<C>::new_unpaged_filled(dblk_nelmts, parent, self.header_addr, Some(block_off))
                    .encoded_size();
            let image = cache.protect(file, dblk_addr, MemType::EaDataBlock, size as u64, CacheFlags::NONE)?;
            let mut dblock = DataBlock::<C>::decode(
                &image, dblk_addr, EADB_MAGIC, parent, dblk_nelmts, false, 0, self.header_addr, true,
            )?;
            dblock.elmts[local_off as usize] = value;
            let bytes = dblock.encode(EADB_MAGIC);
            cache.unprotect(dblk_addr, bytes, CacheFlags::DIRTIED)?;
            return Ok(());
        }

        let prefix_size =
            DataBlock::<C>::new_paged(dblk_nelmts, self.page_limit, parent, self.header_addr, Some(block_off))
                .encoded_size();
        let image = cache.protect(file, dblk_addr, MemType::EaDataBlock, prefix_size as u64, CacheFlags::NONE)?;
        let mut dblock = DataBlock::<C>::decode(
            &image, dblk_addr, EADB_MAGIC, parent, dblk_nelmts, true, self.page_limit, self.header_addr, true,
        )?;

        let page_idx = local_off / self.page_limit;
        let page_local = local_off % self.page_limit;
        let page_nelmts = dblock.page_elmt_count(page_idx);
        let page_addr = dblock.page_addr(dblk_addr, page_idx);
        let page_size = DataBlockPage::<C>::encoded_size(page_nelmts as usize);
        let page_was_init = dblock.page_init[page_idx as usize];

        let result: Result<()> = (|| {
            if !page_was_init {
                let mut page: DataBlockPage<C> = DataBlockPage::new_filled(page_nelmts as usize);
                page.elmts[page_local as usize] = value;
                let bytes = page.encode(crate::codec::EADP_MAGIC);
                cache.insert_new(page_addr, MemType::EaDataBlockPage, bytes, false);
                cache.create_flush_depend(dblk_addr, page_addr)?;
                cache.create_flush_depend(self.header_addr, page_addr)?;
                dblock.page_init[page_idx as usize] = true;
                Ok(())
            } else {
                let page_image =
                    cache.protect(file, page_addr, MemType::EaDataBlockPage, page_size as u64, CacheFlags::NONE)?;
                match DataBlockPage::<C>::decode(&page_image, page_addr, crate::codec::EADP_MAGIC, page_nelmts as usize) {
                    Ok(mut page) => {
                        page.elmts[page_local as usize] = value;
                        let bytes = page.encode(crate::codec::EADP_MAGIC);
                        cache.unprotect(page_addr, bytes, CacheFlags::DIRTIED)
                    }
                    Err(e) => {
                        cache.unprotect(page_addr, page_image, CacheFlags::NONE)?;
                        Err(e)
                    }
                }
            }
        })();

        let dblock_bytes = dblock.encode(EADB_MAGIC);
        let dblock_unprotect_result = cache.unprotect(dblk_addr, dblock_bytes, CacheFlags::DIRTIED);
        result?;
        dblock_unprotect_result?;
        Ok(())
    }
}
