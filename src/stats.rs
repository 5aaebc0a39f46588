// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `StatsEmitter` — per-shard accounting records (spec §4.F, §6).
//!
//! Modeled after the teacher's `run_status` in `main.rs`, which
//! formats accumulated counters into a fixed report; here the report
//! is the single-line `BackupPC_stats4` wire format instead of a
//! human table.

/// Accumulated counters for one `(compression class, shard)` pair.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ShardStats {
    pub file_cnt: i64,
    pub dir_cnt: i64,
    pub blk_cnt: i64,
    pub blk_cnt_rm: i64,
    pub file_cnt_rm: i64,
    pub file_cnt_rep: i64,
    pub file_rep_max: u32,
    pub file_link_max: i64,
    pub file_link_total: i64,
}

impl ShardStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one digest's contribution into the running stats
    /// (spec §4.D step 7): counts the object, tracks link totals/max
    /// (excluding `EmptyMD5`), and — for chained digests — tracks the
    /// chained-file count and max chain depth.
    pub fn observe(&mut self, digest: &[u8], count: i64) {
        self.file_cnt += 1;
        if !crate::digest::is_empty_md5(digest) {
            self.file_link_total += count;
            self.file_link_max = self.file_link_max.max(count);
        }
        if crate::digest::is_chained(digest) {
            self.file_cnt_rep += 1;
            self.file_rep_max = self.file_rep_max.max(crate::digest::ext(digest));
        }
    }
}

/// Rounds a block count to kilobytes with sign-aware rounding: positive
/// values round up at `.5`, negative values round down at `.5` — i.e.
/// round-half-away-from-zero on `blocks / 2`.
pub fn kb_from_blocks(blocks: i64) -> i64 {
    if blocks >= 0 {
        (blocks + 1) / 2
    } else {
        (blocks - 1) / 2
    }
}

/// Formats the `BackupPC_stats4` wire line for one shard.
pub fn format_stats_line(pool_name: &str, shard: u8, stats: &ShardStats) -> String {
    format!(
        "BackupPC_stats4 {shard} = {pool_name},{},{},{},{},{},{},{},{},{}",
        stats.file_cnt,
        stats.dir_cnt,
        kb_from_blocks(stats.blk_cnt),
        kb_from_blocks(stats.blk_cnt_rm),
        stats.file_cnt_rm,
        stats.file_cnt_rep,
        stats.file_rep_max,
        stats.file_link_max,
        stats.file_link_total,
    )
}

/// Emits shard stats lines to stdout, one per call (teacher-style
/// thin formatter, no buffering state of its own).
pub struct StatsEmitter {
    pub pool_name: String,
}

impl StatsEmitter {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
        }
    }

    pub fn emit(&self, shard: u8, stats: &ShardStats) {
        println!("{}", format_stats_line(&self.pool_name, shard, stats));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kb_rounding_is_sign_aware_half_away_from_zero() {
        assert_eq!(kb_from_blocks(4), 2);
        assert_eq!(kb_from_blocks(3), 2);
        assert_eq!(kb_from_blocks(2), 1);
        assert_eq!(kb_from_blocks(0), 0);
        assert_eq!(kb_from_blocks(-2), -1);
        assert_eq!(kb_from_blocks(-3), -2);
        assert_eq!(kb_from_blocks(-4), -2);
    }

    #[test]
    fn observe_excludes_empty_md5_from_link_accounting() {
        let mut stats = ShardStats::new();
        let empty = crate::digest::empty_md5();
        stats.observe(&empty, 5);
        assert_eq!(stats.file_cnt, 1);
        assert_eq!(stats.file_link_total, 0);
        assert_eq!(stats.file_link_max, 0);
    }

    #[test]
    fn observe_tracks_chain_depth() {
        let mut stats = ShardStats::new();
        let primary = vec![0x11u8; crate::digest::PRIMARY_LEN];
        let chained = crate::digest::with_ext(&primary, 3);
        stats.observe(&chained, 1);
        assert_eq!(stats.file_cnt_rep, 1);
        assert_eq!(stats.file_rep_max, 3);
    }

    #[test]
    fn format_stats_line_matches_wire_shape() {
        let mut stats = ShardStats::new();
        stats.file_cnt = 3;
        stats.dir_cnt = 2;
        stats.blk_cnt = 10;
        let line = format_stats_line("pool", 5, &stats);
        assert_eq!(line, "BackupPC_stats4 5 = pool,3,2,5,0,0,0,0,0,0");
    }
}
