//! Fixed Array (spec §3, §4, §6.4): dense array of statically known
//! length, backed by one (optionally paged) data block. Shares its
//! data-block and data-block-page codecs with the Extensible Array;
//! the only structural difference is the absence of an index/super
//! block tier, since there is nothing to grow.

pub mod header;

use crate::cache::{Cache, CacheFlags};
use crate::class::ElementClass;
use crate::codec::{FADB_MAGIC, FADP_MAGIC};
use crate::dblk_page::DataBlockPage;
use crate::dblock::{DataBlock, DataBlockParent};
use crate::error::{BlkError, Result};
use disk_driver::{Addr, BlockFile, MemType, UNDEFINED_ADDR};
use header::{FaHeaderImage, FixedArrayParams};
use log::{debug, info};
use std::marker::PhantomData;

/// Data blocks have exactly one owner in a Fixed Array (the header), so
/// every Fixed Array data block is tagged `DataBlockParent::Index` by
/// convention — there is no super block to be a parent instead.
const FA_DBLK_PARENT: DataBlockParent = DataBlockParent::Index;

pub struct FixedArray<C: ElementClass> {
    header_addr: Addr,
    cparam: FixedArrayParams,
    page_limit: u64,
    _class: PhantomData<C>,
}

impl<C: ElementClass> FixedArray<C> {
    pub fn header_addr(&self) -> Addr {
        self.header_addr
    }

    pub fn get_nelmts(&self) -> u64 {
        self.cparam.nelmts
    }

    pub fn get_addr(&self) -> Addr {
        self.header_addr
    }

    fn paged(&self) -> bool {
        self.cparam.nelmts > self.page_limit
    }

    pub fn create(
        cache: &mut Cache,
        file: &mut dyn BlockFile,
        cparam: FixedArrayParams,
    ) -> Result<Self> {
        let page_limit = 1u64 << cparam.max_dblk_page_nelmts_bits;
        let image = FaHeaderImage::new(C::CLASS_ID, cparam);
        let bytes = image.encode();
        let addr = file.allocate(MemType::FaHeader, bytes.len() as u64).map_err(BlkError::CantCreate)?;
        cache.insert_new(addr, MemType::FaHeader, bytes, true);
        cache.header_aux_init(addr);
        cache.header_incr(addr)?;
        cache.header_fuse_incr(addr)?;
        info!("created fixed array at {:#x} ({} elements)", addr, cparam.nelmts);
        Ok(Self { header_addr: addr, cparam, page_limit, _class: PhantomData })
    }

    pub fn open(cache: &mut Cache, file: &mut dyn BlockFile, addr: Addr) -> Result<Self> {
        let image = cache.protect(file, addr, MemType::FaHeader, FaHeaderImage::encoded_size() as u64, CacheFlags::NONE)?;
        let hdr = FaHeaderImage::decode(&image, addr, C::CLASS_ID)?;
        cache.unprotect(addr, image, CacheFlags::NONE)?;
        if cache.header_aux(addr).pending_delete {
            return Err(BlkError::CantOpenObj);
        }
        cache.header_incr(addr)?;
        cache.header_fuse_incr(addr)?;
        let page_limit = 1u64 << hdr.cparam.max_dblk_page_nelmts_bits;
        Ok(Self { header_addr: addr, cparam: hdr.cparam, page_limit, _class: PhantomData })
    }

    pub fn reopen(&self, cache: &mut Cache) -> Result<Self> {
        cache.header_incr(self.header_addr)?;
        cache.header_fuse_incr(self.header_addr)?;
        Ok(Self { header_addr: self.header_addr, cparam: self.cparam, page_limit: self.page_limit, _class: PhantomData })
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
        debug!("deleting fixed array at {:#x}", self.header_addr);
        let hdr_size = FaHeaderImage::encoded_size();
        let hdr_image = cache.protect(file, self.header_addr, MemType::FaHeader, hdr_size as u64, CacheFlags::NONE)?;
        let hdr = FaHeaderImage::decode(&hdr_image, self.header_addr, C::CLASS_ID)?;
        cache.unprotect(self.header_addr, hdr_image, CacheFlags::NONE)?;

        if hdr.dblk_addr != UNDEFINED_ADDR {
            let placeholder = self.placeholder_dblock();
            if self.paged() {
                for page_idx in 0..placeholder.npages {
                    cache.evict_unwritten(placeholder.page_addr(hdr.dblk_addr, page_idx));
                }
            }
            let extent = placeholder.on_disk_extent_size();
            cache.evict_unwritten(hdr.dblk_addr);
            file.free(MemType::FaDataBlock, hdr.dblk_addr, extent).map_err(BlkError::CantCreate)?;
        }

        cache.evict_unwritten(self.header_addr);
        file.free(MemType::FaHeader, self.header_addr, hdr_size as u64).map_err(BlkError::CantCreate)?;
        cache.forget_header_aux(self.header_addr);
        Ok(())
    }

    fn placeholder_dblock(&self) -> DataBlock<C> {
        if self.paged() {
            DataBlock::new_paged(self.cparam.nelmts, self.page_limit, FA_DBLK_PARENT, self.header_addr, None)
        } else {
            DataBlock::new_unpaged_filled(self.cparam.nelmts, FA_DBLK_PARENT, self.header_addr, None)
        }
    }

    fn read_header(&self, cache: &mut Cache, file: &mut dyn BlockFile) -> Result<FaHeaderImage> {
        let image =
            cache.protect(file, self.header_addr, MemType::FaHeader, FaHeaderImage::encoded_size() as u64, CacheFlags::NONE)?;
        let hdr = FaHeaderImage::decode(&image, self.header_addr, C::CLASS_ID)?;
        cache.unprotect(self.header_addr, image, CacheFlags::NONE)?;
        Ok(hdr)
    }

    pub fn depend(&self, cache: &mut Cache, parent: Addr) -> Result<()> {
        cache.create_flush_depend(parent, self.header_addr)
    }

    pub fn undepend(&self, cache: &mut Cache, parent: Addr) -> Result<()> {
        cache.destroy_flush_depend(parent, self.header_addr)
    }

    /// `child` depends on the array's one data block, creating it (and
    /// the header's pointer to it) if nothing has been written yet —
    /// mirrors `set`'s lazy-create path rather than `locate_container`'s
    /// read-only one, the same asymmetry as `ExtensibleArray::support`.
    pub fn support(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64, child: Addr) -> Result<()> {
        if i >= self.cparam.nelmts {
            return Err(BlkError::BadValue {
                addr: self.header_addr,
                detail: format!("index {} out of range for fixed array of length {}", i, self.cparam.nelmts),
            });
        }
        let container = self.locate_or_create_dblk(cache, file)?;
        cache.create_flush_depend(container, child)
    }

    pub fn unsupport(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64, child: Addr) -> Result<()> {
        let container = self
            .locate_container(cache, file, i)?
            .ok_or(BlkError::CantUndepend { parent: UNDEFINED_ADDR, child })?;
        cache.destroy_flush_depend(container, child)
    }

    /// Ensure the header's data block exists, creating it with
    /// fill-valued elements if this is the first write to the array,
    /// and return its address.
    fn locate_or_create_dblk(&self, cache: &mut Cache, file: &mut dyn BlockFile) -> Result<Addr> {
        let hdr_size = FaHeaderImage::encoded_size();
        let hdr_image = cache.protect(file, self.header_addr, MemType::FaHeader, hdr_size as u64, CacheFlags::NONE)?;
        let mut hdr = FaHeaderImage::decode(&hdr_image, self.header_addr, C::CLASS_ID)?;
        let mut hdr_dirty = false;

        if hdr.dblk_addr == UNDEFINED_ADDR {
            let db = self.placeholder_dblock();
            let extent = db.on_disk_extent_size();
            let bytes = db.encode(FADB_MAGIC);
            let addr = file.allocate(MemType::FaDataBlock, extent).map_err(BlkError::CantCreate)?;
            cache.insert_new(addr, MemType::FaDataBlock, bytes, false);
            cache.create_flush_depend(self.header_addr, addr)?;
            hdr.dblk_addr = addr;
            hdr.stats.dblk_size = extent;
            hdr_dirty = true;
        }
        let dblk_addr = hdr.dblk_addr;

        let hdr_bytes = hdr.encode();
        cache.unprotect(self.header_addr, hdr_bytes, if hdr_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE })?;
        Ok(dblk_addr)
    }

    pub fn locate_container(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64) -> Result<Option<Addr>> {
        if i >= self.cparam.nelmts {
            return Ok(None);
        }
        let hdr = self.read_header(cache, file)?;
        if hdr.dblk_addr == UNDEFINED_ADDR {
            return Ok(None);
        }
        Ok(Some(hdr.dblk_addr))
    }

    pub fn get(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64) -> Result<C::Elem> {
        if i >= self.cparam.nelmts {
            return Ok(C::fill());
        }
        let hdr = self.read_header(cache, file)?;
        if hdr.dblk_addr == UNDEFINED_ADDR {
            return Ok(C::fill());
        }
        let dblk_addr = hdr.dblk_addr;

        if !self.paged() {
            let size = self.placeholder_dblock().encoded_size();
            let image = cache.protect(file, dblk_addr, MemType::FaDataBlock, size as u64, CacheFlags::NONE)?;
            let dblock = DataBlock::<C>::decode(
                &image, dblk_addr, FADB_MAGIC, FA_DBLK_PARENT, self.cparam.nelmts, false, 0, self.header_addr, false,
            )?;
            cache.unprotect(dblk_addr, image, CacheFlags::NONE)?;
            return Ok(dblock.elmts[i as usize]);
        }

        let prefix_size = self.placeholder_dblock().encoded_size();
        let image = cache.protect(file, dblk_addr, MemType::FaDataBlock, prefix_size as u64, CacheFlags::NONE)?;
        let dblock = DataBlock::<C>::decode(
            &image,
            dblk_addr,
            FADB_MAGIC,
            FA_DBLK_PARENT,
            self.cparam.nelmts,
            true,
            self.page_limit,
            self.header_addr,
            false,
        )?;
        cache.unprotect(dblk_addr, image, CacheFlags::NONE)?;

        let page_idx = i / self.page_limit;
        let page_local = i % self.page_limit;
        if !dblock.page_init[page_idx as usize] {
            return Ok(C::fill());
        }
        let page_nelmts = dblock.page_elmt_count(page_idx);
        let page_addr = dblock.page_addr(dblk_addr, page_idx);
        let page_size = DataBlockPage::<C>::encoded_size(page_nelmts as usize);
        let page_image = cache.protect(file, page_addr, MemType::FaDataBlockPage, page_size as u64, CacheFlags::NONE)?;
        let page = DataBlockPage::<C>::decode(&page_image, page_addr, FADP_MAGIC, page_nelmts as usize)?;
        cache.unprotect(page_addr, page_image, CacheFlags::NONE)?;
        Ok(page.elmts[page_local as usize])
    }

    pub fn set(&self, cache: &mut Cache, file: &mut dyn BlockFile, i: u64, value: C::Elem) -> Result<()> {
        if i >= self.cparam.nelmts {
            return Err(BlkError::BadValue {
                addr: self.header_addr,
                detail: format!("index {} out of range for fixed array of length {}", i, self.cparam.nelmts),
            });
        }
        let hdr_size = FaHeaderImage::encoded_size();
        let hdr_image = cache.protect(file, self.header_addr, MemType::FaHeader, hdr_size as u64, CacheFlags::NONE)?;
        let mut hdr = FaHeaderImage::decode(&hdr_image, self.header_addr, C::CLASS_ID)?;
        let mut hdr_dirty = false;

        if hdr.dblk_addr == UNDEFINED_ADDR {
            let db = self.placeholder_dblock();
            let extent = db.on_disk_extent_size();
            let bytes = db.encode(FADB_MAGIC);
            let addr = file.allocate(MemType::FaDataBlock, extent).map_err(BlkError::CantCreate)?;
            cache.insert_new(addr, MemType::FaDataBlock, bytes, false);
            cache.create_flush_depend(self.header_addr, addr)?;
            hdr.dblk_addr = addr;
            hdr.stats.dblk_size = extent;
            hdr_dirty = true;
        }
        let dblk_addr = hdr.dblk_addr;

        let result = self.set_in_dblk(cache, file, dblk_addr, i, value);

        let hdr_bytes = hdr.encode();
        let hdr_unprotect_result =
            cache.unprotect(self.header_addr, hdr_bytes, if hdr_dirty { CacheFlags::DIRTIED } else { CacheFlags::NONE });
        result?;
        hdr_unprotect_result?;
        Ok(())
    }

    fn set_in_dblk(&self, cache: &mut Cache, file: &mut dyn BlockFile, dblk_addr: Addr, i: u64, value: C::Elem) -> Result<()> {
        if !self.paged() {
            let size = self.placeholder_dblock().encoded_size();
            let image = cache.protect(file, dblk_addr, MemType::FaDataBlock, size as u64, CacheFlags::NONE)?;
            let mut dblock = DataBlock::<C>::decode(
                &image, dblk_addr, FADB_MAGIC, FA_DBLK_PARENT, self.cparam.nelmts, false, 0, self.header_addr, false,
            )?;
            dblock.elmts[i as usize] = value;
            let bytes = dblock.encode(FADB_MAGIC);
            cache.unprotect(dblk_addr, bytes, CacheFlags::DIRTIED)?;
            return Ok(());
        }

        let prefix_size = self.placeholder_dblock().encoded_size();
        let image = cache.protect(file, dblk_addr, MemType::FaDataBlock, prefix_size as u64, CacheFlags::NONE)?;
        let mut dblock = DataBlock::<C>::decode(
            &image,
            dblk_addr,
            FADB_MAGIC,
            FA_DBLK_PARENT,
            self.cparam.nelmts,
            true,
            self.page_limit,
            self.header_addr,
            false,
        )?;

        let page_idx = i / self.page_limit;
        let page_local = i % self.page_limit;
        let page_nelmts = dblock.page_elmt_count(page_idx);
        let page_addr = dblock.page_addr(dblk_addr, page_idx);
        let page_size = DataBlockPage::<C>::encoded_size(page_nelmts as usize);
        let page_was_init = dblock.page_init[page_idx as usize];

        let result: Result<()> = (|| {
            if !page_was_init {
                let mut page: DataBlockPage<C> = DataBlockPage::new_filled(page_nelmts as usize);
                page.elmts[page_local as usize] = value;
                let bytes = page.encode(FADP_MAGIC);
                cache.insert_new(page_addr, MemType::FaDataBlockPage, bytes, false);
                cache.create_flush_depend(dblk_addr, page_addr)?;
                cache.create_flush_depend(self.header_addr, page_addr)?;
                dblock.page_init[page_idx as usize] = true;
                Ok(())
            } else {
                let page_image =
                    cache.protect(file, page_addr, MemType::FaDataBlockPage, page_size as u64, CacheFlags::NONE)?;
                match DataBlockPage::<C>::decode(&page_image, page_addr, FADP_MAGIC, page_nelmts as usize) {
                    Ok(mut page) => {
                        page.elmts[page_local as usize] = value;
                        let bytes = page.encode(FADP_MAGIC);
                        cache.unprotect(page_addr, bytes, CacheFlags::DIRTIED)
                    }
                    Err(e) => {
                        cache.unprotect(page_addr, page_image, CacheFlags::NONE)?;
                        Err(e)
                    }
                }
            }
        })();

        let dblock_bytes = dblock.encode(FADB_MAGIC);
        let dblock_unprotect_result = cache.unprotect(dblk_addr, dblock_bytes, CacheFlags::DIRTIED);
        result?;
        dblock_unprotect_result?;
        Ok(())
    }
}
