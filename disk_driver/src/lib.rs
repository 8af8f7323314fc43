//! Raw block-storage backend consumed by `blkstore`.
//!
//! Mirrors the shape of a disk driver: open a backing store, read/write
//! byte ranges at an absolute address, and hand out fresh extents on
//! request. `blkstore` treats this crate as the file-space allocator and
//! raw-I/O collaborator of its metadata cache (see spec §6.2) — it never
//! reaches past the `BlockFile` trait to know whether it's talking to a
//! `Vec<u8>` or a real file.

use anyhow::{anyhow, Result};
use log::trace;

pub mod file;
pub mod memory;

/// Tag distinguishing the kind of block an extent holds. Each array
/// flavour (extensible / fixed) keeps its own tags so usage stats never
/// mix the two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemType {
    EaHeader,
    EaIndexBlock,
    EaSuperBlock,
    EaDataBlock,
    EaDataBlockPage,
    FaHeader,
    FaDataBlock,
    FaDataBlockPage,
}

/// Address of a block within the backing store. All-ones means
/// "undefined" — no block allocated there yet.
pub type Addr = u64;

pub const UNDEFINED_ADDR: Addr = u64::MAX;

#[derive(Debug, Default, Clone, Copy)]
pub struct DriverStats {
    pub read_cnt: u64,
    pub write_cnt: u64,
    pub alloc_cnt: u64,
    pub free_cnt: u64,
}

/// Backing-store contract. Every call is synchronous; there is no
/// concurrent access to a single `BlockFile` (see spec §5).
pub trait BlockFile {
    /// Current high-water mark of allocated space, in bytes.
    fn size(&self) -> u64;

    fn read_at(&mut self, addr: Addr, buf: &mut [u8]) -> Result<()>;

    fn write_at(&mut self, addr: Addr, buf: &[u8]) -> Result<()>;

    /// Reserve `size` contiguous bytes for a block of kind `memtype` and
    /// return its address. Never returns `UNDEFINED_ADDR`.
    fn allocate(&mut self, memtype: MemType, size: u64) -> Result<Addr>;

    /// Release a previously allocated extent. The allocator used here is
    /// a bump allocator (see `BumpAllocator`) and does not reclaim freed
    /// space for reuse; `free` only tracks accounting.
    fn free(&mut self, memtype: MemType, addr: Addr, size: u64) -> Result<()>;

    fn stats(&self) -> DriverStats;
}

/// Never-reuse bump allocator shared by both backends. A real
/// file-space allocator (free-list, best-fit, ...) is out of scope for
/// this crate (spec §1); this is the simplest allocator that satisfies
/// the contract.
#[derive(Debug, Default)]
pub struct BumpAllocator {
    next_free: u64,
    stats: DriverStats,
}

impl BumpAllocator {
    pub fn new(start: u64) -> Self {
        Self { next_free: start, stats: DriverStats::default() }
    }

    pub fn high_water(&self) -> u64 {
        self.next_free
    }

    pub fn allocate(&mut self, memtype: MemType, size: u64) -> Result<Addr> {
        if size == 0 {
            return Err(anyhow!("cannot allocate a zero-sized block ({:?})", memtype));
        }
        let addr = self.next_free;
        self.next_free = self
            .next_free
            .checked_add(size)
            .ok_or_else(|| anyhow!("allocator exhausted address space"))?;
        self.stats.alloc_cnt += 1;
        trace!("allocate {:?}: {} bytes at {:#x}", memtype, size, addr);
        Ok(addr)
    }

    pub fn free(&mut self, memtype: MemType, addr: Addr, size: u64) -> Result<()> {
        self.stats.free_cnt += 1;
        trace!("free {:?}: {} bytes at {:#x}", memtype, size, addr);
        Ok(())
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }
}
