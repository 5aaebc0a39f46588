//! End-to-end maintenance pass scenarios, run against a real temporary
//! filesystem tree: host rebuild, incremental merge, pool aggregation,
//! and the two-phase mark/sweep cycle (spec §8's scenario table).
//!
//! Run with: `cargo test`

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use tempfile::TempDir;

use poolcnt::backup_walker::{ListBackupWalker, NullBackupWalker};
use poolcnt::config::Conf;
use poolcnt::context::MaintenanceContext;
use poolcnt::count_map::CountMap;
use poolcnt::delta_log;
use poolcnt::digest;
use poolcnt::host_reconciler::HostReconciler;
use poolcnt::pool_aggregator::PoolAggregator;
use poolcnt::pool_cleaner::PoolCleaner;
use poolcnt::progress::NullProgressSink;

const MODE_LIVE: u32 = 0o444;

fn tmp_dir() -> TempDir {
    tempfile::tempdir().expect("create tempdir")
}

fn test_conf(root: &Path, hosts: &[&str]) -> Conf {
    Conf {
        top_dir: root.join("topdir"),
        pool_dir: root.join("pool"),
        cpool_dir: root.join("cpool"),
        pool_size_nightly_update_period: 1,
        xfer_log_level: 0,
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
    }
}

fn ctx() -> MaintenanceContext {
    MaintenanceContext::new(Arc::new(NullProgressSink))
}

fn pool_cnt_path(conf: &Conf, class: u8, shard: u8) -> std::path::PathBuf {
    conf.pool_root(class)
        .join(class.to_string())
        .join(digest::shard_hex(shard))
        .join("poolCnt")
}

fn place_object(conf: &Conf, class: u8, digest: &[u8], mode: u32) {
    let path = digest::object_path(conf.pool_root(class), class, digest);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"payload").unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(mode)).unwrap();
}

/// Scenario 1: `-h host -f` walks the host's backups and rebuilds its
/// shard count files from scratch.
#[test]
fn scenario_host_rebuild_via_force_flag() {
    let tmp = tmp_dir();
    let conf = test_conf(tmp.path(), &["h1"]);
    let host_dir = conf.host_dir("h1");
    std::fs::create_dir_all(host_dir.join("backups")).unwrap();
    let digest_hex = "aa".repeat(16);
    std::fs::write(
        host_dir.join("backups").join("full.refs"),
        format!("{digest_hex} 0\n"),
    )
    .unwrap();

    let reconciler = HostReconciler::new(&conf, ctx());
    let walker = ListBackupWalker::new(host_dir.clone());
    reconciler.reconcile("h1", true, false, &walker).unwrap();

    let digest = digest::from_hex(&digest_hex).unwrap();
    let shard = digest::shard_of(&digest);
    let shard_file = host_dir.join(format!("poolCnt.0.{}", digest::shard_hex(shard)));
    let map = CountMap::read(&shard_file).unwrap();
    assert_eq!(map.get(&digest), Some(1));
}

/// Scenario 2: a pending delta file is folded into the host's existing
/// shard count without a rebuild.
#[test]
fn scenario_incremental_delta_merge() {
    let tmp = tmp_dir();
    let conf = test_conf(tmp.path(), &["h1"]);
    let host_dir = conf.host_dir("h1");
    let digest = vec![0x11u8; digest::PRIMARY_LEN];
    let shard = digest::shard_of(&digest);

    let mut existing = CountMap::new();
    existing.incr(&digest, 1);
    std::fs::create_dir_all(&host_dir).unwrap();
    existing
        .write(&host_dir.join(format!("poolCnt.0.{}", digest::shard_hex(shard))))
        .unwrap();

    let mut delta = CountMap::new();
    delta.incr(&digest, 1);
    delta_log::write_delta(&host_dir, 0, "new-backup", &delta).unwrap();

    let ctx = ctx();
    let reconciler = HostReconciler::new(&conf, ctx.clone());
    reconciler
        .reconcile("h1", false, false, &NullBackupWalker)
        .unwrap();

    let shard_file = host_dir.join(format!("poolCnt.0.{}", digest::shard_hex(shard)));
    let map = CountMap::read(&shard_file).unwrap();
    assert_eq!(map.get(&digest), Some(2));
    assert_eq!(ctx.error_count(), 0);
}

/// Scenario 3: the first pool aggregation over a host's shard file
/// produces the authoritative `poolCnt` for that shard.
#[test]
fn scenario_first_pool_aggregation() {
    let tmp = tmp_dir();
    let conf = test_conf(tmp.path(), &["h1"]);
    let digest = vec![0x22u8; digest::PRIMARY_LEN];
    let shard = digest::shard_of(&digest);

    place_object(&conf, 0, &digest, MODE_LIVE);
    let mut hmap = CountMap::new();
    hmap.incr(&digest, 1);
    let host_shard = conf
        .host_dir("h1")
        .join(format!("poolCnt.0.{}", digest::shard_hex(shard)));
    fs::create_dir_all(host_shard.parent().unwrap()).unwrap();
    hmap.write(&host_shard).unwrap();

    let ctx = ctx();
    let aggregator = PoolAggregator::new(&conf, ctx.clone());
    let stats = aggregator.aggregate_shard(0, shard, 0).unwrap();

    assert_eq!(stats.file_cnt, 1);
    assert_eq!(ctx.error_count(), 0);
    let pool_map = CountMap::read(&pool_cnt_path(&conf, 0, shard)).unwrap();
    assert_eq!(pool_map.get(&digest), Some(1));
}

/// Scenario 4: the last host reference to an object is dropped; the
/// next aggregation carries it forward as a zero-count entry rather
/// than dropping it outright.
#[test]
fn scenario_reference_drop_yields_zero_count() {
    let tmp = tmp_dir();
    let conf = test_conf(tmp.path(), &["h1"]);
    let digest = vec![0x33u8; digest::PRIMARY_LEN];
    let shard = digest::shard_of(&digest);

    place_object(&conf, 0, &digest, MODE_LIVE);
    let mut prior_pool = CountMap::new();
    prior_pool.incr(&digest, 1);
    prior_pool.write(&pool_cnt_path(&conf, 0, shard)).unwrap();

    // Host no longer references it at all this pass.
    let ctx = ctx();
    let aggregator = PoolAggregator::new(&conf, ctx.clone());
    aggregator.aggregate_shard(0, shard, 0).unwrap();

    let pool_map = CountMap::read(&pool_cnt_path(&conf, 0, shard)).unwrap();
    assert_eq!(pool_map.get(&digest), Some(0));
    assert_eq!(ctx.error_count(), 0);
}

/// Scenario 5 + 6: the first `-c` pass over a zero-count object marks
/// it; a second pass with no intervening reference reclaims it.
#[test]
fn scenario_clean_marks_then_reclaims_across_two_passes() {
    let tmp = tmp_dir();
    let conf = test_conf(tmp.path(), &[]);
    let digest = vec![0x44u8; digest::PRIMARY_LEN];
    let shard = digest::shard_of(&digest);

    place_object(&conf, 0, &digest, MODE_LIVE);
    let mut pool = CountMap::new();
    pool.incr(&digest, 0);
    pool.write(&pool_cnt_path(&conf, 0, shard)).unwrap();

    let cleaner = PoolCleaner::new(&conf, ctx());
    cleaner.clean_shard(0, shard).unwrap();

    let obj_path = digest::object_path(conf.pool_root(0), 0, &digest);
    let mode_after_first = fs::metadata(&obj_path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode_after_first, MODE_LIVE | 0o001, "first pass should mark");
    assert!(obj_path.exists());

    let stats = cleaner.clean_shard(0, shard).unwrap();
    assert!(!obj_path.exists(), "second pass should reclaim");
    assert_eq!(stats.file_cnt_rm, 1);
}

/// Scenario 7: a host re-references a marked object before the sweep
/// pass runs; the mark must be cancelled rather than the object
/// reclaimed.
#[test]
fn scenario_re_reference_before_reclaim_cancels_mark() {
    let tmp = tmp_dir();
    let conf = test_conf(tmp.path(), &["h1"]);
    let digest = vec![0x55u8; digest::PRIMARY_LEN];
    let shard = digest::shard_of(&digest);

    // Marked from a previous clean pass, pool count currently 0.
    place_object(&conf, 0, &digest, MODE_LIVE | 0o001);
    let mut pool = CountMap::new();
    pool.incr(&digest, 0);
    pool.write(&pool_cnt_path(&conf, 0, shard)).unwrap();

    // Host re-references it this pass.
    let mut hmap = CountMap::new();
    hmap.incr(&digest, 1);
    let host_shard = conf
        .host_dir("h1")
        .join(format!("poolCnt.0.{}", digest::shard_hex(shard)));
    fs::create_dir_all(host_shard.parent().unwrap()).unwrap();
    hmap.write(&host_shard).unwrap();

    let ctx = ctx();
    let aggregator = PoolAggregator::new(&conf, ctx.clone());
    aggregator.aggregate_shard(0, shard, 0).unwrap();

    let obj_path = digest::object_path(conf.pool_root(0), 0, &digest);
    let mode = fs::metadata(&obj_path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, MODE_LIVE, "aggregation must clear the mark bit");

    // A clean pass afterwards must not touch the now-positive entry.
    let cleaner = PoolCleaner::new(&conf, ctx.clone());
    cleaner.clean_shard(0, shard).unwrap();
    assert!(obj_path.exists());
    assert_eq!(ctx.error_count(), 0);
}

/// Scenario 8: a file under a pool shard directory that isn't a valid
/// object name, or is filed under the wrong shard/sub-shard, is
/// deleted by the aggregator's filesystem reconciliation pass.
#[test]
fn scenario_stray_and_misplaced_pool_files_are_removed() {
    let tmp = tmp_dir();
    let conf = test_conf(tmp.path(), &[]);
    let shard = 7u8;

    let stray_dir = conf
        .pool_root(0)
        .join("0")
        .join(digest::shard_hex(shard))
        .join(digest::shard_hex(1));
    fs::create_dir_all(&stray_dir).unwrap();
    fs::write(stray_dir.join("garbage-name"), b"x").unwrap();

    // A real digest whose first byte's shard doesn't match this
    // directory (misplaced).
    let misplaced = vec![0x99u8; digest::PRIMARY_LEN];
    assert_ne!(digest::shard_of(&misplaced), shard);
    fs::write(stray_dir.join(digest::to_hex(&misplaced)), b"x").unwrap();

    let ctx = ctx();
    let aggregator = PoolAggregator::new(&conf, ctx.clone());
    aggregator.aggregate_shard(0, shard, 0).unwrap();

    assert!(!stray_dir.join("garbage-name").exists());
    assert!(!stray_dir.join(digest::to_hex(&misplaced)).exists());
}
