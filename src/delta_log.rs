//! `DeltaLog` — discovery, reading, and deletion of pending delta
//! files (spec §4.B), plus the rebuild path's writer half that
//! `BackupWalker` uses to emit fresh deltas in the same on-disk format
//! `CountMap` already speaks.

use std::path::{Path, PathBuf};

use crate::count_map::CountMap;
use crate::error::Result;

/// Filename prefix for delta files: `poolCntDelta_<class>_<suffix>`.
pub const DELTA_PREFIX: &str = "poolCntDelta_";

/// One delta file found in a host directory.
pub struct DeltaFile {
    pub path: PathBuf,
    pub class: u8,
}

/// Parses a delta filename, returning its compression class if it
/// matches `poolCntDelta_<c>_*`.
pub fn parse_delta_name(name: &str) -> Option<u8> {
    let rest = name.strip_prefix(DELTA_PREFIX)?;
    let (class_str, _suffix) = rest.split_once('_')?;
    class_str.parse::<u8>().ok().filter(|c| *c <= 1)
}

/// Lists pending delta files in a host directory, in directory-listing
/// order (spec §4.B: applied in the order the listing returns them —
/// no ordering requirement is imposed on correctness, only on
/// progress reporting).
pub fn list_delta_files(host_dir: &Path) -> Result<Vec<DeltaFile>> {
    let mut out = Vec::new();
    if !host_dir.exists() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(host_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(class) = parse_delta_name(name) {
            out.push(DeltaFile {
                path: entry.path(),
                class,
            });
        }
    }
    Ok(out)
}

/// Loads a delta file's contents as a `CountMap`.
pub fn read_delta(delta: &DeltaFile) -> Result<CountMap> {
    CountMap::read(&delta.path)
}

/// Deletes a delta file after it has been folded into the host's
/// shard files without error.
pub fn delete_delta(delta: &DeltaFile) -> Result<()> {
    std::fs::remove_file(&delta.path)?;
    Ok(())
}

/// Writes a fresh delta file for `class` under `host_dir`, used by the
/// rebuild path's `BackupWalker` to record the deltas it discovered
/// while walking backup trees. `suffix` distinguishes files within one
/// rebuild pass (e.g. a per-backup identifier).
pub fn write_delta(host_dir: &Path, class: u8, suffix: &str, deltas: &CountMap) -> Result<PathBuf> {
    std::fs::create_dir_all(host_dir)?;
    let path = host_dir.join(format!("{DELTA_PREFIX}{class}_{suffix}"));
    deltas.write(&path)?;
    Ok(path)
}
