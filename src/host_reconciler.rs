// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `HostReconciler` — folds one host's pending deltas into its 256
//! shard count files, or rebuilds them from scratch by walking the
//! host's backup trees (spec §4.C, §4.C.1).
//!
//! Grounded on the teacher's `storage::global_writer` write-loop shape
//! (stage into a scratch structure, then rename over the live file) and
//! `ChunkPool`'s scan-and-recover path for the rebuild branch.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::backup_walker::BackupWalker;
use crate::config::Conf;
use crate::context::MaintenanceContext;
use crate::count_map::CountMap;
use crate::delta_log::{self, DeltaFile};
use crate::digest;
use crate::error::MaintError;
use crate::lock;

const NEEDFSCK_PREFIX: &str = "needFsck";
const NEEDFSCK_UPDATE_MARKER: &str = "needFsck.refCountUpdate";
const NEW_SHARD_PREFIX: &str = "poolCntNew.";

pub struct HostReconciler<'a> {
    conf: &'a Conf,
    ctx: MaintenanceContext,
}

impl<'a> HostReconciler<'a> {
    pub fn new(conf: &'a Conf, ctx: MaintenanceContext) -> Self {
        Self { conf, ctx }
    }

    /// Reconciles one host. Never returns an error for host-local
    /// failures — those are accumulated into `ctx` per the "accumulate,
    /// never abort" policy (spec §7); a skipped host (lock unavailable)
    /// also just records and returns.
    pub fn reconcile(
        &self,
        host: &str,
        mut force_rebuild: bool,
        check_host_pool: bool,
        walker: &dyn BackupWalker,
    ) -> crate::error::Result<()> {
        let host_dir = self.conf.host_dir(host);
        let where_ = format!("host:{host}");
        self.ctx.progress.state(&format!("host {host}"));

        let lock_path = host_dir.join("refCnt").join("LOCK");
        let guard = match lock::acquire_exclusive(&lock_path, || {
            tracing::debug!(host, "waiting for host lock");
        }) {
            Ok(g) => g,
            Err(e) => {
                self.ctx.record_error(&where_, &e);
                return Ok(());
            }
        };

        let errors_before = self.ctx.error_count();

        self.clear_stale_new_files(&host_dir)?;

        let fsck_markers = list_needfsck_markers(&host_dir)?;
        if !force_rebuild && !fsck_markers.is_empty() {
            force_rebuild = true;
        }

        let mut created_update_marker = false;
        let mut walk_failed = false;
        if force_rebuild {
            for delta in delta_log::list_delta_files(&host_dir)? {
                if let Err(e) = delta_log::delete_delta(&delta) {
                    self.ctx.record_error(&where_, &e);
                }
            }
            if let Err(e) = self.rebuild_deltas(&host_dir, host, walker) {
                self.ctx.record_error(&where_, &e);
                walk_failed = true;
            }
        } else {
            std::fs::create_dir_all(&host_dir)?;
            std::fs::write(host_dir.join(NEEDFSCK_UPDATE_MARKER), b"")?;
            created_update_marker = true;
        }

        // §9 open question: a rebuild whose tree walk fails partway
        // treats the host as failed — fold what was produced into
        // scratch `poolCntNew` files as usual (so nothing is lost on a
        // later successful pass) but do not publish them, so a partial
        // walk can never corrupt this host's authoritative counts.
        self.merge_deltas(&host_dir, force_rebuild, check_host_pool, walk_failed, &where_)?;

        if walk_failed {
            // leave fsck markers and any existing poolCntNew.* in place
            // so the next pass retries the rebuild.
        } else if force_rebuild {
            for marker in &fsck_markers {
                let _ = std::fs::remove_file(marker);
            }
        } else if created_update_marker && self.ctx.error_count() == errors_before {
            let _ = std::fs::remove_file(host_dir.join(NEEDFSCK_UPDATE_MARKER));
        }

        drop(guard);
        Ok(())
    }

    fn clear_stale_new_files(&self, host_dir: &Path) -> crate::error::Result<()> {
        if !host_dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(host_dir)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(NEW_SHARD_PREFIX) {
                    let _ = std::fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }

    /// Rebuild path: walk the host's backups and write the resulting
    /// reference counts as fresh delta files (one per touched class),
    /// so the ordinary delta-merge step below applies them uniformly.
    fn rebuild_deltas(
        &self,
        host_dir: &Path,
        host: &str,
        walker: &dyn BackupWalker,
    ) -> crate::error::Result<()> {
        let refs = walker.walk_host(host)?;
        let mut by_class = [CountMap::new(), CountMap::new()];
        for r in refs {
            let idx = usize::from(r.class.min(1));
            by_class[idx].incr(&r.digest, 1);
        }
        for (class, map) in by_class.iter().enumerate() {
            if !map.is_empty() {
                delta_log::write_delta(host_dir, class as u8, "rebuild", map)?;
            }
        }
        Ok(())
    }

    fn merge_deltas(
        &self,
        host_dir: &Path,
        force_rebuild: bool,
        check_host_pool: bool,
        walk_failed: bool,
        where_: &str,
    ) -> crate::error::Result<()> {
        let deltas = delta_log::list_delta_files(host_dir)?;
        for delta in &deltas {
            self.apply_delta(host_dir, delta, !force_rebuild, where_);
        }
        for delta in &deltas {
            if let Err(e) = delta_log::delete_delta(delta) {
                self.ctx.record_error(where_, &e);
            }
        }

        if walk_failed {
            // Do not publish scratch shard files from a partial walk;
            // a failed host must not have its authoritative counts
            // mutated (spec §9).
            return Ok(());
        }

        for class in 0u8..=1 {
            for shard in 0u8..128 {
                self.finalize_shard(host_dir, class, shard, force_rebuild, check_host_pool, where_);
            }
        }
        Ok(())
    }

    /// spec §4.C.1: load delta, bucket by shard, fold each bucket into
    /// that shard's scratch `poolCntNew` file.
    fn apply_delta(&self, host_dir: &Path, delta: &DeltaFile, accumulate_current: bool, where_: &str) {
        let deltamap = match delta_log::read_delta(delta) {
            Ok(m) => m,
            Err(e) => {
                self.ctx.record_error(where_, &e);
                return;
            }
        };
        let mut buckets: BTreeMap<u8, Vec<(Vec<u8>, i64)>> = BTreeMap::new();
        for (d, count) in deltamap.iter() {
            buckets
                .entry(digest::shard_of(d))
                .or_default()
                .push((d.to_vec(), count));
        }
        for (shard, entries) in buckets {
            self.apply_delta_shard(host_dir, delta.class, shard, &entries, accumulate_current, where_);
        }
    }

    fn apply_delta_shard(
        &self,
        host_dir: &Path,
        class: u8,
        shard: u8,
        entries: &[(Vec<u8>, i64)],
        accumulate_current: bool,
        where_: &str,
    ) {
        let new_path = shard_new_path(host_dir, class, shard);
        let cur_path = shard_path(host_dir, class, shard);

        let mut w = if new_path.exists() {
            match CountMap::read(&new_path) {
                Ok(m) => m,
                Err(e) => {
                    self.ctx.record_error(where_, &e);
                    return;
                }
            }
        } else {
            let mut base = match CountMap::read_if_exists(&cur_path) {
                Ok(m) => m,
                Err(e) => {
                    self.ctx.record_error(where_, &e);
                    return;
                }
            };
            if !accumulate_current {
                strip_positive(&mut base);
            }
            base
        };

        for (d, delta) in entries {
            w.incr(d, *delta);
        }

        for (digest, from) in w.clamp_negative() {
            self.ctx.record_error(
                where_,
                &MaintError::CountUnderflow {
                    digest: digest::to_hex(&digest),
                    from,
                },
            );
        }

        self.sweep_zero_entries(&mut w, class);

        if let Err(e) = w.write(&new_path) {
            self.ctx.record_error(where_, &e);
        }
    }

    /// Zero-count entries whose pool object file is absent are dropped
    /// — they were never seen, or were already reclaimed.
    fn sweep_zero_entries(&self, map: &mut CountMap, class: u8) {
        let root = self.conf.pool_root(class);
        let zero: Vec<Vec<u8>> = map
            .iter()
            .filter(|(_, c)| *c == 0)
            .map(|(d, _)| d.to_vec())
            .collect();
        for d in zero {
            if !digest::object_path(root, class, &d).exists() {
                map.delete(&d);
            }
        }
    }

    fn finalize_shard(
        &self,
        host_dir: &Path,
        class: u8,
        shard: u8,
        force_rebuild: bool,
        check_host_pool: bool,
        where_: &str,
    ) {
        let new_path = shard_new_path(host_dir, class, shard);
        let cur_path = shard_path(host_dir, class, shard);

        if new_path.exists() {
            if force_rebuild && check_host_pool {
                self.compare_host_pool(&cur_path, &new_path, where_);
            }
            if let Err(e) = std::fs::rename(&new_path, &cur_path) {
                self.ctx.record_error(
                    where_,
                    &MaintError::RenameFailed {
                        from: new_path.display().to_string(),
                        to: cur_path.display().to_string(),
                        source: e,
                    },
                );
                let _ = std::fs::remove_file(&new_path);
            }
        } else if force_rebuild && cur_path.exists() {
            if let Err(e) = std::fs::remove_file(&cur_path) {
                self.ctx.record_error(
                    where_,
                    &MaintError::UnlinkFailed {
                        path: cur_path.display().to_string(),
                        source: e,
                    },
                );
            }
        }
    }

    fn compare_host_pool(&self, cur_path: &Path, new_path: &Path, where_: &str) {
        let old = match CountMap::read_if_exists(cur_path) {
            Ok(m) => m,
            Err(e) => {
                self.ctx.record_error(where_, &e);
                return;
            }
        };
        let new = match CountMap::read(new_path) {
            Ok(m) => m,
            Err(e) => {
                self.ctx.record_error(where_, &e);
                return;
            }
        };
        for (d, new_count) in new.iter() {
            if let Some(old_count) = old.get(d) {
                if old_count != new_count {
                    self.ctx.record_error(
                        where_,
                        &MaintError::CountMismatch {
                            digest: digest::to_hex(d),
                            rebuilt: new_count,
                            existing: old_count,
                        },
                    );
                }
            }
        }
    }
}

fn strip_positive(map: &mut CountMap) {
    let positive: Vec<Vec<u8>> = map
        .iter()
        .filter(|(_, c)| *c > 0)
        .map(|(d, _)| d.to_vec())
        .collect();
    for d in positive {
        map.delete(&d);
    }
}

fn shard_path(host_dir: &Path, class: u8, shard: u8) -> PathBuf {
    host_dir.join(format!("poolCnt.{class}.{}", digest::shard_hex(shard)))
}

fn shard_new_path(host_dir: &Path, class: u8, shard: u8) -> PathBuf {
    host_dir.join(format!("poolCntNew.{class}.{}", digest::shard_hex(shard)))
}

fn list_needfsck_markers(host_dir: &Path) -> crate::error::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    if !host_dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(host_dir)? {
        let entry = entry?;
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with(NEEDFSCK_PREFIX) {
                out.push(entry.path());
            }
        }
    }
    Ok(out)
}

/// Test-only walker that always fails, standing in for a post-v3 backup
/// tree whose walk breaks partway through (spec §9 open question).
#[cfg(test)]
struct FailingBackupWalker;

#[cfg(test)]
impl BackupWalker for FailingBackupWalker {
    fn walk_host(&self, _host: &str) -> crate::error::Result<Vec<crate::backup_walker::WalkedRef>> {
        Err(MaintError::Config("simulated tree-walk failure".to_string()))
    }
}
