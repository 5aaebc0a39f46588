// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `PoolCleaner` — the mark-then-sweep reclamation pass run only with
//! `-c` (spec §4.E). First pass over a zero-count object marks it
//! (`S_IXOTH`); a later pass over a still-zero, already-marked object
//! reclaims it, truncating chained objects to a zero-byte hole instead
//! of unlinking so the chain-scan lookup protocol keeps working.
//!
//! Grounded on the teacher's `PoolReadCounters`/`PoolReadGuard` RAII
//! pattern in `storage/chunk_pool.rs` for the lock-then-mutate shape.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::config::Conf;
use crate::context::MaintenanceContext;
use crate::count_map::CountMap;
use crate::digest;
use crate::error::{MaintError, Result};
use crate::lock;
use crate::stats::ShardStats;

const IXOTH: u32 = 0o001;
const MODE_LIVE: u32 = 0o444;
const MODE_MARKED: u32 = MODE_LIVE | IXOTH;
const MODE_CHAIN_HOLE: u32 = 0o644;

pub struct PoolCleaner<'a> {
    conf: &'a Conf,
    ctx: MaintenanceContext,
}

impl<'a> PoolCleaner<'a> {
    pub fn new(conf: &'a Conf, ctx: MaintenanceContext) -> Self {
        Self { conf, ctx }
    }

    /// Cleans one `(class, shard)` pair, returning stats derived from
    /// the shard's authoritative count file after reclamation. Lock
    /// failures and count-file corruption are recorded and yield an
    /// empty stats value rather than aborting the shard range.
    pub fn clean_shard(&self, class: u8, shard: u8) -> Result<ShardStats> {
        let where_ = format!("clean:{class}.{}", digest::shard_hex(shard));
        self.ctx
            .progress
            .state(&format!("clean {class}.{}", digest::shard_hex(shard)));

        let pool_root = self.conf.pool_root(class);
        let shard_dir = pool_root.join(class.to_string()).join(digest::shard_hex(shard));
        let lock_path = shard_dir.join("LOCK");

        let guard = match lock::acquire_exclusive_blocking(&lock_path) {
            Ok(g) => g,
            Err(e) => {
                self.ctx.record_error(&where_, &e);
                return Ok(ShardStats::new());
            }
        };

        let pool_cnt_path = shard_dir.join("poolCnt");
        let mut c = match CountMap::read_if_exists(&pool_cnt_path) {
            Ok(m) => m,
            Err(e) => {
                self.ctx.record_error(&where_, &e);
                return Ok(ShardStats::new());
            }
        };

        let mut stats = ShardStats::new();
        for (d, k) in c.iter() {
            stats.observe(d, k);
        }

        let zero_digests: Vec<Vec<u8>> = c
            .iter()
            .filter(|(_, k)| *k == 0)
            .map(|(d, _)| d.to_vec())
            .collect();

        let mut mutated = false;
        for d in zero_digests {
            let path = digest::object_path(pool_root, class, &d);
            let meta = match fs::metadata(&path) {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.len() == 0 {
                continue;
            }
            if is_marked(&meta) {
                self.reclaim(&mut c, &mut stats, pool_root, class, &d, &path, &meta, &where_);
                mutated = true;
            } else {
                self.mark(&path, &where_);
            }
        }

        if mutated {
            if let Err(e) = c.write(&pool_cnt_path) {
                self.ctx.record_error(&where_, &e);
            }
        }

        drop(guard);
        Ok(stats)
    }

    fn reclaim(
        &self,
        c: &mut CountMap,
        stats: &mut ShardStats,
        pool_root: &Path,
        class: u8,
        d: &[u8],
        path: &Path,
        meta: &fs::Metadata,
        where_: &str,
    ) {
        let (_next_digest, next_path) = digest::next_chain_link(pool_root, class, d);
        let blocks = meta.blocks() as i64;

        let result = if next_path.exists() {
            truncate_to_chain_hole(path)
        } else {
            fs::remove_file(path)
        };

        if let Err(e) = result {
            self.ctx.record_error(
                where_,
                &MaintError::UnlinkFailed {
                    path: path.display().to_string(),
                    source: e,
                },
            );
            return;
        }

        c.delete(d);
        stats.file_cnt -= 1;
        stats.blk_cnt -= blocks;
        stats.file_cnt_rm += 1;
        stats.blk_cnt_rm += blocks;
    }

    fn mark(&self, path: &Path, where_: &str) {
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(MODE_MARKED)) {
            self.ctx.record_error(
                where_,
                &MaintError::ChmodFailed {
                    path: path.display().to_string(),
                    source: e,
                },
            );
        }
    }
}

fn truncate_to_chain_hole(path: &Path) -> std::io::Result<()> {
    fs::OpenOptions::new().write(true).truncate(true).open(path)?;
    fs::set_permissions(path, fs::Permissions::from_mode(MODE_CHAIN_HOLE))
}

fn is_marked(meta: &fs::Metadata) -> bool {
    meta.permissions().mode() & IXOTH != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NullProgressSink;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_conf(root: &Path) -> Conf {
        Conf {
            top_dir: root.join("topdir"),
            pool_dir: root.join("pool"),
            cpool_dir: root.join("cpool"),
            pool_size_nightly_update_period: 1,
            xfer_log_level: 0,
            hosts: Vec::new(),
        }
    }

    fn ctx() -> MaintenanceContext {
        MaintenanceContext::new(Arc::new(NullProgressSink))
    }

    fn seed(conf: &Conf, class: u8, digest: &[u8], count: i64, mode: u32) -> PathBuf {
        let obj_path = digest::object_path(conf.pool_root(class), class, digest);
        fs::create_dir_all(obj_path.parent().unwrap()).unwrap();
        fs::write(&obj_path, b"x").unwrap();
        fs::set_permissions(&obj_path, fs::Permissions::from_mode(mode)).unwrap();

        let shard = digest::shard_of(digest);
        let pool_cnt_path = conf
            .pool_root(class)
            .join(class.to_string())
            .join(digest::shard_hex(shard))
            .join("poolCnt");
        fs::create_dir_all(pool_cnt_path.parent().unwrap()).unwrap();
        let mut map = CountMap::new();
        map.incr(digest, count);
        map.write(&pool_cnt_path).unwrap();
        obj_path
    }

    #[test]
    fn first_pass_marks_unmarked_zero_count_object() {
        let tmp = tempdir().unwrap();
        let conf = test_conf(tmp.path());
        let digest = vec![0x50u8; digest::PRIMARY_LEN];
        let shard = digest::shard_of(&digest);
        let obj_path = seed(&conf, 0, &digest, 0, MODE_LIVE);

        let cleaner = PoolCleaner::new(&conf, ctx());
        cleaner.clean_shard(0, shard).unwrap();

        let mode = fs::metadata(&obj_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, MODE_MARKED);
        assert!(obj_path.exists());
    }

    #[test]
    fn second_pass_unlinks_marked_object_with_no_next_chain_link() {
        let tmp = tempdir().unwrap();
        let conf = test_conf(tmp.path());
        let digest = vec![0x60u8; digest::PRIMARY_LEN];
        let shard = digest::shard_of(&digest);
        let obj_path = seed(&conf, 0, &digest, 0, MODE_MARKED);

        let ctx = ctx();
        let cleaner = PoolCleaner::new(&conf, ctx.clone());
        let stats = cleaner.clean_shard(0, shard).unwrap();

        assert!(!obj_path.exists());
        assert_eq!(stats.file_cnt_rm, 1);
        assert_eq!(ctx.error_count(), 0);
    }

    #[test]
    fn second_pass_truncates_chained_object_to_zero_byte_hole() {
        let tmp = tempdir().unwrap();
        let conf = test_conf(tmp.path());
        let primary = vec![0x70u8; digest::PRIMARY_LEN];
        let chained = digest::with_ext(&primary, 1);
        let shard = digest::shard_of(&chained);
        let obj_path = seed(&conf, 0, &chained, 0, MODE_MARKED);

        let next = digest::with_ext(&primary, 2);
        let next_path = digest::object_path(conf.pool_root(0), 0, &next);
        fs::create_dir_all(next_path.parent().unwrap()).unwrap();
        fs::write(&next_path, b"y").unwrap();

        let cleaner = PoolCleaner::new(&conf, ctx());
        cleaner.clean_shard(0, shard).unwrap();

        assert!(obj_path.exists());
        let meta = fs::metadata(&obj_path).unwrap();
        assert_eq!(meta.len(), 0);
        assert_eq!(meta.permissions().mode() & 0o777, MODE_CHAIN_HOLE);
    }

    #[test]
    fn zero_sized_object_is_left_alone() {
        let tmp = tempdir().unwrap();
        let conf = test_conf(tmp.path());
        let digest = vec![0x80u8; digest::PRIMARY_LEN];
        let shard = digest::shard_of(&digest);
        let obj_path = digest::object_path(conf.pool_root(0), 0, &digest);
        fs::create_dir_all(obj_path.parent().unwrap()).unwrap();
        fs::write(&obj_path, b"").unwrap();
        fs::set_permissions(&obj_path, fs::Permissions::from_mode(MODE_CHAIN_HOLE)).unwrap();

        let pool_cnt_path = conf
            .pool_root(0)
            .join("0")
            .join(digest::shard_hex(shard))
            .join("poolCnt");
        fs::create_dir_all(pool_cnt_path.parent().unwrap()).unwrap();
        let mut map = CountMap::new();
        map.incr(&digest, 0);
        map.write(&pool_cnt_path).unwrap();

        let cleaner = PoolCleaner::new(&conf, ctx());
        cleaner.clean_shard(0, shard).unwrap();

        let meta = fs::metadata(&obj_path).unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[test]
    fn lock_is_released_after_clean() {
        let tmp = tempdir().unwrap();
        let conf = test_conf(tmp.path());
        let cleaner = PoolCleaner::new(&conf, ctx());
        cleaner.clean_shard(0, 3).unwrap();

        let lock_path = conf.pool_root(0).join("0").join(digest::shard_hex(3)).join("LOCK");
        assert!(lock::try_acquire_exclusive(&lock_path).unwrap().is_some());
    }
}
