//! `std::fs::File`-backed store, for callers that want the array to
//! actually survive a process restart.

use crate::{Addr, BlockFile, BumpAllocator, DriverStats, MemType};
use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

pub struct FileBackedFile {
    file: File,
    alloc: BumpAllocator,
    read_cnt: u64,
    write_cnt: u64,
}

impl FileBackedFile {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Ok(Self { file, alloc: BumpAllocator::new(0), read_cnt: 0, write_cnt: 0 })
    }

    /// Reopen an existing store. `high_water` is the allocator's
    /// resume point — the caller (the array header) knows this from its
    /// own persisted `on_disk_size` statistic.
    pub fn open<P: AsRef<Path>>(path: P, high_water: u64) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file, alloc: BumpAllocator::new(high_water), read_cnt: 0, write_cnt: 0 })
    }
}

impl BlockFile for FileBackedFile {
    fn size(&self) -> u64 {
        self.alloc.high_water()
    }

    fn read_at(&mut self, addr: Addr, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.read_exact(buf)?;
        self.read_cnt += 1;
        Ok(())
    }

    fn write_at(&mut self, addr: Addr, buf: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(addr))?;
        self.file.write_all(buf)?;
        self.write_cnt += 1;
        Ok(())
    }

    fn allocate(&mut self, memtype: MemType, size: u64) -> Result<Addr> {
        let addr = self.alloc.allocate(memtype, size)?;
        self.file.set_len(self.alloc.high_water())?;
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
    use std::env;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_path(name: &str) -> std::path::PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        env::temp_dir().join(format!("blkstore-test-{}-{}", name, n))
    }

    #[test]
    fn write_then_reopen_round_trips() -> Result<()> {
        let path = temp_path("roundtrip");
        {
            let mut f = FileBackedFile::create(&path)?;
            let addr = f.allocate(MemType::EaHeader, 8)?;
            f.write_at(addr, &[9, 8, 7, 6, 5, 4, 3, 2])?;
        }
        {
            let mut f = FileBackedFile::open(&path, 8)?;
            let mut buf = [0u8; 8];
            f.read_at(0, &mut buf)?;
            assert_eq!(buf, [9, 8, 7, 6, 5, 4, 3, 2]);
        }
        std::fs::remove_file(&path).ok();
        Ok(())
    }
}
