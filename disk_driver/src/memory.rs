//! `Vec<u8>`-backed store used by every test in this workspace.

use crate::{Addr, BlockFile, BumpAllocator, DriverStats, MemType};
use anyhow::{anyhow, Result};

pub struct MemoryFile {
    mem: Vec<u8>,
    alloc: BumpAllocator,
    read_cnt: u64,
    write_cnt: u64,
}

impl MemoryFile {
    pub fn new() -> Self {
        Self { mem: Vec::new(), alloc: BumpAllocator::new(0), read_cnt: 0, write_cnt: 0 }
    }
}

impl Default for MemoryFile {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockFile for MemoryFile {
    fn size(&self) -> u64 {
        self.mem.len() as u64
    }

    fn read_at(&mut self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        let start = addr as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| anyhow!("read range overflows"))?;
        if end > self.mem.len() {
            return Err(anyhow!(
                "read past end of backing store: {}..{} > {}",
                start,
                end,
                self.mem.len()
            ));
        }
        buf.copy_from_slice(&self.mem[start..end]);
        self.read_cnt += 1;
        Ok(())
    }

    fn write_at(&mut self, addr: Addr, buf: &[u8]) -> Result<()> {
        let start = addr as usize;
        let end = start
            .checked_add(buf.len())
            .ok_or_else(|| anyhow!("write range overflows"))?;
        if end > self.mem.len() {
            self.mem.resize(end, 0);
        }
        self.mem[start..end].copy_from_slice(buf);
        self.write_cnt += 1;
        Ok(())
    }

    fn allocate(&mut self, memtype: MemType, size: u64) -> Result<Addr> {
        let addr = self.alloc.allocate(memtype, size)?;
        let end = addr
            .checked_add(size)
            .ok_or_else(|| anyhow!("allocation overflows backing store"))?;
        if end as usize > self.mem.len() {
            self.mem.resize(end as usize, 0);
        }
        Ok(addr)
    }

    fn free(&mut self, memtype: MemType, addr: Addr, size: u64) -> Result<()> {
        self.alloc.free(memtype, addr, size)
    }

    fn stats(&self) -> DriverStats {
        let mut s = self.alloc.stats();
        s.read_cnt = self.read_cnt;
        s.write_cnt = self.write_cnt;
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocate_grows_backing_store() -> Result<()> {
        let mut f = MemoryFile::new();
        let a = f.allocate(MemType::EaHeader, 16)?;
        assert_eq!(a, 0);
        let b = f.allocate(MemType::EaIndexBlock, 32)?;
        assert_eq!(b, 16);
        assert_eq!(f.size(), 48);
        Ok(())
    }

    #[test]
    fn write_then_read_round_trips() -> Result<()> {
        let mut f = MemoryFile::new();
        let addr = f.allocate(MemType::EaDataBlock, 8)?;
        f.write_at(addr, &[1, 2, 3, 4, 5, 6, 7, 8])?;
        let mut buf = [0u8; 8];
        f.read_at(addr, &mut buf)?;
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
        Ok(())
    }

    #[test]
    fn read_past_end_fails() {
        let mut f = MemoryFile::new();
        let mut buf = [0u8; 4];
        assert!(f.read_at(0, &mut buf).is_err());
    }
}
