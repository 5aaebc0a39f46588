// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `PoolAggregator` — for one pool shard, sums every host's
//! contribution, cross-checks against on-disk pool objects, and writes
//! the authoritative pool-shard count (spec §4.D).
//!
//! Grounded on the teacher's `ChunkPool` scan/recovery pass in
//! `storage/chunk_pool.rs`: walk the filesystem, reconcile against an
//! in-memory index, repair drift, write back.

use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use crate::config::Conf;
use crate::context::MaintenanceContext;
use crate::count_map::CountMap;
use crate::digest;
use crate::error::{MaintError, Result};
use crate::stats::ShardStats;

const IXOTH: u32 = 0o001;
const MODE_LIVE: u32 = 0o444;

pub struct PoolAggregator<'a> {
    conf: &'a Conf,
    ctx: MaintenanceContext,
}

impl<'a> PoolAggregator<'a> {
    pub fn new(conf: &'a Conf, ctx: MaintenanceContext) -> Self {
        Self { conf, ctx }
    }

    /// Aggregates one `(class, shard)` pair, returning its derived
    /// stats. Callers gate this on `ctx.error_count() == 0` from any
    /// preceding host pass (spec §4.D preamble) — this method itself
    /// has no knowledge of that ordering.
    pub fn aggregate_shard(&self, class: u8, shard: u8, phase: u8) -> Result<ShardStats> {
        let where_ = format!("pool:{class}.{shard:02x}");
        self.ctx
            .progress
            .state(&format!("pool shard {class}.{}", digest::shard_hex(shard)));

        let pool_root = self.conf.pool_root(class);
        let shard_dir = shard_dir_path(pool_root, class, shard);
        let pool_cnt_path = shard_dir.join("poolCnt");

        let mut stats = ShardStats::new();
        stats.dir_cnt = self.census(&shard_dir);

        let original_curr = CountMap::read_if_exists(&pool_cnt_path)?;
        let mut curr = original_curr.clone();
        let mut c_new = CountMap::new();
        let mut c_copy = CountMap::new();

        for host in &self.conf.hosts {
            let host_path = host_shard_path(&self.conf.host_dir(host), class, shard);
            let hmap = match CountMap::read_if_exists(&host_path) {
                Ok(m) => m,
                Err(e) => {
                    self.ctx.record_error(&where_, &e);
                    continue;
                }
            };
            for (d, k) in hmap.iter() {
                let existing = curr.get(d);
                let was_new = existing.is_none();
                let was_zero = existing == Some(0);
                if was_new || was_zero {
                    let obj_path = digest::object_path(pool_root, class, d);
                    if let Ok(meta) = fs::metadata(&obj_path) {
                        if was_new {
                            stats.blk_cnt += meta.blocks() as i64;
                        }
                        if k > 0 && is_marked(&meta) {
                            self.unmark(&obj_path, &where_);
                        }
                    }
                }
                c_new.incr(d, k);
                c_copy.incr(d, k);
                curr.incr(d, k);
            }
        }

        for (d, _) in original_curr.iter() {
            if !c_new.contains(d) {
                c_new.incr(d, 0);
                c_copy.incr(d, 0);
            }
        }

        self.reconcile_filesystem(pool_root, class, shard, &mut c_new, &mut c_copy, &mut stats, &where_);

        if self.is_full_scan(shard, phase) {
            self.rescan_exact_blocks(pool_root, class, &c_new, &mut stats);
        }

        for (d, k) in c_new.iter() {
            stats.observe(d, k);
        }

        // spec §4.D step 8: C_copy holds every digest that ended up in
        // C_new but was never observed on disk during the filesystem
        // walk above — i.e. the object is gone. A zero count there was
        // only ever a bookkeeping placeholder, so it is dropped
        // entirely; a positive count means a live reference to an
        // object that no longer exists, reported as an error but left
        // in place (accumulate, never abort — spec §7).
        let missing_zero: Vec<Vec<u8>> = c_copy
            .iter()
            .filter(|(_, k)| *k == 0)
            .map(|(d, _)| d.to_vec())
            .collect();
        for d in missing_zero {
            c_new.delete(&d);
        }
        for (d, k) in c_copy.iter() {
            if k > 0 && !digest::is_empty_md5(d) {
                self.ctx.record_error(
                    &where_,
                    &MaintError::MissingPoolObject {
                        digest: digest::to_hex(d),
                        count: k,
                    },
                );
            }
        }

        if let Err(e) = c_new.write(&pool_cnt_path) {
            self.ctx.record_error(&where_, &e);
        }

        Ok(stats)
    }

    fn census(&self, shard_dir: &Path) -> i64 {
        let mut count = 0i64;
        if shard_dir.is_dir() {
            count += 1;
            for sub in 0u8..128 {
                let sub_dir = shard_dir.join(digest::shard_hex(sub));
                if sub_dir.is_dir() {
                    count += 1;
                }
            }
        }
        count
    }

    fn unmark(&self, path: &Path, where_: &str) {
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(MODE_LIVE)) {
            self.ctx.record_error(
                where_,
                &MaintError::ChmodFailed {
                    path: path.display().to_string(),
                    source: e,
                },
            );
        }
    }

    /// Spec §4.D step 5: walk every sub-shard directory, delete names
    /// that aren't valid pool objects or whose digest prefix doesn't
    /// match the directory it's filed under, insert zero-entries for
    /// objects found on disk but absent from `c_new`, and mark every
    /// digest found on disk as "seen" by removing it from `c_copy`.
    fn reconcile_filesystem(
        &self,
        pool_root: &Path,
        class: u8,
        shard: u8,
        c_new: &mut CountMap,
        c_copy: &mut CountMap,
        stats: &mut ShardStats,
        where_: &str,
    ) {
        for sub in 0u8..128 {
            let sub_dir = pool_root
                .join(class.to_string())
                .join(digest::shard_hex(shard))
                .join(digest::shard_hex(sub));
            let Ok(entries) = fs::read_dir(&sub_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                let Some(digest) = digest::validate_object_name(&name) else {
                    if name == "LOCK" {
                        continue;
                    }
                    self.remove_stray(&path, &name, where_, "Unknown pool file removed");
                    continue;
                };
                if digest::shard_of(&digest) != shard || digest::subshard_of(&digest) != sub {
                    self.remove_stray(&path, &name, where_, "Unexpected pool file removed");
                    continue;
                }
                if !c_new.contains(&digest) {
                    c_new.incr(&digest, 0);
                    c_copy.incr(&digest, 0);
                    if let Ok(meta) = entry.metadata() {
                        stats.blk_cnt += meta.blocks() as i64;
                    }
                } else {
                    c_copy.delete(&digest);
                }
            }
        }
    }

    fn remove_stray(&self, path: &Path, name: &str, where_: &str, reason: &str) {
        tracing::warn!(target: "poolcnt", path = %path.display(), reason, "{}", name);
        if let Err(e) = fs::remove_file(path) {
            self.ctx.record_error(
                where_,
                &MaintError::UnlinkFailed {
                    path: path.display().to_string(),
                    source: e,
                },
            );
        }
    }

    fn is_full_scan(&self, shard: u8, phase: u8) -> bool {
        let period = self.conf.pool_size_nightly_update_period;
        if period == 0 {
            return false;
        }
        (shard / 8) % period == phase % period
    }

    fn rescan_exact_blocks(&self, pool_root: &Path, class: u8, c_new: &CountMap, stats: &mut ShardStats) {
        let mut exact = 0i64;
        for (d, k) in c_new.iter() {
            if k <= 0 {
                continue;
            }
            if let Ok(meta) = fs::metadata(digest::object_path(pool_root, class, d)) {
                exact += meta.blocks() as i64;
            }
        }
        stats.blk_cnt = exact;
    }
}

fn is_marked(meta: &fs::Metadata) -> bool {
    meta.permissions().mode() & IXOTH != 0
}

fn shard_dir_path(pool_root: &Path, class: u8, shard: u8) -> PathBuf {
    pool_root.join(class.to_string()).join(digest::shard_hex(shard))
}

fn host_shard_path(host_dir: &Path, class: u8, shard: u8) -> PathBuf {
    host_dir.join(format!("poolCnt.{class}.{}", digest::shard_hex(shard)))
}
