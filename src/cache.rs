//! Minimal single-threaded metadata cache (spec §3): the protect/
//! unprotect protocol, pin/dirty accounting, and the flush-dependency
//! graph that orders writes. A real deployment's cache is a much larger
//! generic registry shared across unrelated client modules; this crate
//! only ever has the handful of EA/FA block kinds of a single open
//! store, so it keeps one typed entry table instead of reimplementing
//! that
//! registry — the real cache's contract (protect/unprotect,
//! get_entry_status, create_flush_depend/destroy_flush_depend) is kept
//! exactly, just scoped down. Grounded on the teacher's
//! `disk_driver::cache::CacheDiskDriver` decorator shape, generalized
//! from a transparent passthrough to one that actually pins, dirties,
//! and orders flushes.

use crate::error::{BlkError, Result};
use disk_driver::{Addr, BlockFile, MemType};
use log::{debug, trace};
use std::collections::{HashMap, HashSet};

bitflags::bitflags! {
    /// Flags passed to `unprotect` (and, for `PINNED`, to `protect`).
    /// Mirrors the flag set named in spec §6.1's cache primitives.
    pub struct CacheFlags: u32 {
        const NONE     = 0;
        const DIRTIED  = 1 << 0;
        const PINNED   = 1 << 1;
        const UNPIN    = 1 << 2;
        const READ_ONLY = 1 << 3;
    }
}

#[derive(Debug, Clone)]
pub struct EntryStatus {
    pub in_cache: bool,
    pub pinned: bool,
    pub protected: bool,
    pub dirty: bool,
}

/// Transient header counters (spec §3's "Transient" fields). These are
/// never part of a header's on-disk image; keeping them here, addressed
/// by the header's own address, is what lets every handle opened
/// against the same header share one `rc`/`file_rc`/`pending_delete`
/// without an `Rc<RefCell<_>>` — any two handles that were handed the
/// same `&mut Cache` see the same counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderAux {
    pub rc: u32,
    pub file_rc: u32,
    pub pending_delete: bool,
}

struct CacheEntry {
    memtype: MemType,
    image: Vec<u8>,
    dirty: bool,
    pin_count: u32,
    protected: bool,
}

/// Single-writer, single-reader metadata cache. Every protect/unprotect
/// pair brackets exactly one logical operation; a second `protect` on an
/// already-protected entry is the caller holding two borrows of the
/// same block at once, which spec §2 forbids, so it is rejected rather
/// than silently handed out.
#[derive(Default)]
pub struct Cache {
    entries: HashMap<Addr, CacheEntry>,
    /// parent -> children that must flush strictly before it.
    deps: HashMap<Addr, HashSet<Addr>>,
    /// child -> parents depending on it (inverse of `deps`, for destroy).
    rev_deps: HashMap<Addr, HashSet<Addr>>,
    header_aux: HashMap<Addr, HeaderAux>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header_aux(&self, addr: Addr) -> HeaderAux {
        self.header_aux.get(&addr).copied().unwrap_or_default()
    }

    pub fn header_aux_init(&mut self, addr: Addr) {
        self.header_aux.entry(addr).or_default();
    }

    pub fn header_incr(&mut self, addr: Addr) -> Result<()> {
        let aux = self.header_aux.entry(addr).or_default();
        aux.rc = aux.rc.checked_add(1).ok_or(BlkError::CantInc)?;
        Ok(())
    }

    /// Decrement `rc`. Returns `true` when the count reached zero while
    /// `pending_delete` was set, signalling the caller must now perform
    /// the actual recursive delete (spec §4.4).
    pub fn header_decr(&mut self, addr: Addr) -> Result<bool> {
        let aux = self.header_aux.entry(addr).or_default();
        if aux.rc == 0 {
            return Err(BlkError::CantDec);
        }
        aux.rc -= 1;
        Ok(aux.rc == 0 && aux.pending_delete)
    }

    pub fn header_fuse_incr(&mut self, addr: Addr) -> Result<()> {
        let aux = self.header_aux.entry(addr).or_default();
        aux.file_rc = aux.file_rc.checked_add(1).ok_or(BlkError::CantInc)?;
        Ok(())
    }

    pub fn header_fuse_decr(&mut self, addr: Addr) -> Result<()> {
        let aux = self.header_aux.entry(addr).or_default();
        if aux.file_rc == 0 {
            return Err(BlkError::CantDec);
        }
        aux.file_rc -= 1;
        Ok(())
    }

    pub fn set_pending_delete(&mut self, addr: Addr, pending: bool) {
        self.header_aux.entry(addr).or_default().pending_delete = pending;
    }

    pub fn forget_header_aux(&mut self, addr: Addr) {
        self.header_aux.remove(&addr);
    }

    /// Protect a block, loading it from `file` on first touch. Returns a
    /// copy of the block's current image; the caller mutates its own
    /// copy and hands it back through `unprotect`.
    pub fn protect(
        &mut self,
        file: &mut dyn BlockFile,
        addr: Addr,
        memtype: MemType,
        size: u64,
        flags: CacheFlags,
    ) -> Result<Vec<u8>> {
        if !self.entries.contains_key(&addr) {
            trace!("cache miss, loading {:?} at {:#x} ({} bytes)", memtype, addr, size);
            let mut image = vec![0u8; size as usize];
            file.read_at(addr, &mut image)
                .map_err(|source| BlkError::CantProtect { addr, source })?;
            self.entries.insert(
                addr,
                CacheEntry { memtype, image, dirty: false, pin_count: 0, protected: false },
            );
        }
        let entry = self.entries.get_mut(&addr).expect("just inserted");
        if entry.protected {
            return Err(BlkError::CantProtect {
                addr,
                source: anyhow::anyhow!("block already protected"),
            });
        }
        entry.protected = true;
        if flags.contains(CacheFlags::PINNED) {
            entry.pin_count += 1;
        }
        Ok(entry.image.clone())
    }

    /// Insert a freshly created block directly, bypassing a disk read.
    /// Used on the create path, where the image is built in memory and
    /// only needs to end up pinned/dirty in the cache, not round-tripped
    /// through the file first.
    pub fn insert_new(&mut self, addr: Addr, memtype: MemType, image: Vec<u8>, pinned: bool) {
        self.entries.insert(
            addr,
            CacheEntry {
                memtype,
                image,
                dirty: true,
                pin_count: if pinned { 1 } else { 0 },
                protected: false,
            },
        );
    }

    pub fn unprotect(&mut self, addr: Addr, image: Vec<u8>, flags: CacheFlags) -> Result<()> {
        let entry = self.entries.get_mut(&addr).ok_or_else(|| BlkError::CantUnprotect {
            addr,
            source: anyhow::anyhow!("block not in cache"),
        })?;
        if !entry.protected {
            return Err(BlkError::CantUnprotect {
                addr,
                source: anyhow::anyhow!("block not protected"),
            });
        }
        entry.image = image;
        entry.protected = false;
        if flags.contains(CacheFlags::DIRTIED) {
            entry.dirty = true;
        }
        if flags.contains(CacheFlags::UNPIN) {
            entry.pin_count = entry.pin_count.saturating_sub(1);
        }
        Ok(())
    }

    pub fn get_entry_status(&self, addr: Addr) -> EntryStatus {
        match self.entries.get(&addr) {
            Some(e) => EntryStatus {
                in_cache: true,
                pinned: e.pin_count > 0,
                protected: e.protected,
                dirty: e.dirty,
            },
            None => EntryStatus { in_cache: false, pinned: false, protected: false, dirty: false },
        }
    }

    /// Drop an entry without flushing it — used when a block's on-disk
    /// extent is being freed (EA/FA delete walk) rather than written
    /// back.
    pub fn evict_unwritten(&mut self, addr: Addr) {
        self.entries.remove(&addr);
        self.deps.remove(&addr);
        if let Some(parents) = self.rev_deps.remove(&addr) {
            for p in parents {
                if let Some(children) = self.deps.get_mut(&p) {
                    children.remove(&addr);
                }
            }
        }
    }

    /// `child` must flush strictly before `parent` (spec §4.2, §6.3).
    pub fn create_flush_depend(&mut self, parent: Addr, child: Addr) -> Result<()> {
        if !self.entries.contains_key(&parent) || !self.entries.contains_key(&child) {
            return Err(BlkError::CantDepend { parent, child });
        }
        self.deps.entry(parent).or_default().insert(child);
        self.rev_deps.entry(child).or_default().insert(parent);
        Ok(())
    }

    pub fn destroy_flush_depend(&mut self, parent: Addr, child: Addr) -> Result<()> {
        let removed = self.deps.get_mut(&parent).map(|c| c.remove(&child)).unwrap_or(false);
        if !removed {
            return Err(BlkError::CantUndepend { parent, child });
        }
        if let Some(parents) = self.rev_deps.get_mut(&child) {
            parents.remove(&parent);
        }
        Ok(())
    }

    /// Write every dirty entry to `file`, flushing each block's
    /// dependency children before the block itself.
    pub fn flush_all(&mut self, file: &mut dyn BlockFile) -> Result<()> {
        let addrs: Vec<Addr> = self.entries.keys().copied().collect();
        debug!("flushing {} cache entries", addrs.len());
        let mut flushed = HashSet::new();
        for addr in addrs {
            self.flush_one(file, addr, &mut flushed)?;
        }
        Ok(())
    }

    fn flush_one(
        &mut self,
        file: &mut dyn BlockFile,
        addr: Addr,
        flushed: &mut HashSet<Addr>,
    ) -> Result<()> {
        if flushed.contains(&addr) {
            return Ok(());
        }
        let children: Vec<Addr> = self.deps.get(&addr).map(|s| s.iter().copied().collect()).unwrap_or_default();
        for child in children {
            self.flush_one(file, child, flushed)?;
        }
        flushed.insert(addr);
        let (dirty, memtype, image_len) = match self.entries.get(&addr) {
            Some(e) if e.dirty => (true, e.memtype, e.image.len()),
            Some(e) => (false, e.memtype, e.image.len()),
            None => return Ok(()),
        };
        let _ = (memtype, image_len);
        if dirty {
            trace!("flushing dirty block at {:#x}", addr);
            let image = self.entries[&addr].image.clone();
            file.write_at(addr, &image)
                .map_err(|source| BlkError::CantUnprotect { addr, source })?;
            if let Some(e) = self.entries.get_mut(&addr) {
                e.dirty = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use disk_driver::memory::MemoryFile;

    #[test]
    fn protect_twice_fails() {
        let mut cache = Cache::new();
        let mut file = MemoryFile::new();
        let addr = file.allocate(MemType::EaHeader, 8).unwrap();
        cache.protect(&mut file, addr, MemType::EaHeader, 8, CacheFlags::NONE).unwrap();
        assert!(cache.protect(&mut file, addr, MemType::EaHeader, 8, CacheFlags::NONE).is_err());
    }

    #[test]
    fn flush_order_respects_dependencies() {
        let mut cache = Cache::new();
        let mut file = MemoryFile::new();
        let parent = file.allocate(MemType::EaHeader, 4).unwrap();
        let child = file.allocate(MemType::EaDataBlock, 4).unwrap();
        cache.insert_new(parent, MemType::EaHeader, vec![0xAA; 4], true);
        cache.insert_new(child, MemType::EaDataBlock, vec![0xBB; 4], false);
        cache.create_flush_depend(parent, child).unwrap();
        cache.flush_all(&mut file).unwrap();
        let mut buf = [0u8; 4];
        file.read_at(child, &mut buf).unwrap();
        assert_eq!(buf, [0xBB; 4]);
        file.read_at(parent, &mut buf).unwrap();
        assert_eq!(buf, [0xAA; 4]);
        assert!(!cache.get_entry_status(parent).dirty);
        assert!(!cache.get_entry_status(child).dirty);
    }

    #[test]
    fn destroy_missing_dependency_fails() {
        let mut cache = Cache::new();
        let mut file = MemoryFile::new();
        let a = file.allocate(MemType::EaHeader, 4).unwrap();
        let b = file.allocate(MemType::EaDataBlock, 4).unwrap();
        cache.insert_new(a, MemType::EaHeader, vec![0; 4], true);
        cache.insert_new(b, MemType::EaDataBlock, vec![0; 4], false);
        assert!(cache.destroy_flush_depend(a, b).is_err());
    }
}
