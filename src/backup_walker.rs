//! `BackupWalker` — the rebuild path's tree-walk collaborator (spec
//! §4.C "Rebuild path"). For each referenced content object it emits
//! `(digest, +1, compression_class)`; the wire format of the backup
//! trees themselves is external to this spec (§1), so this module
//! defines only the trait the reconciler needs plus a concrete,
//! testable stand-in implementation.
//!
//! Grounded on the teacher's `CameraStream`/`supervised_connect`
//! shape in `camera.rs`: an injectable producer the core logic
//! consumes without knowing how frames are actually sourced.

use std::path::{Path, PathBuf};

use crate::error::Result;

/// One reference to a pool object discovered while walking a host's
/// backups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedRef {
    pub digest: Vec<u8>,
    pub class: u8,
}

pub trait BackupWalker: Send + Sync {
    /// Walks every post-v3 backup for `host` and returns every
    /// referenced `(digest, class)` pair, with duplicates for objects
    /// referenced by more than one file (the reconciler folds these
    /// into counts via `CountMap::incr`).
    fn walk_host(&self, host: &str) -> Result<Vec<WalkedRef>>;
}

/// A host with no post-v3 backups (or none at all): the rebuild path
/// simply produces empty shard files.
pub struct NullBackupWalker;

impl BackupWalker for NullBackupWalker {
    fn walk_host(&self, _host: &str) -> Result<Vec<WalkedRef>> {
        Ok(Vec::new())
    }
}

/// Reads one or more `<host_dir>/backups/*.refs` files, each a list of
/// newline-delimited `<hex-digest> <class>` pairs — a concrete stand-in
/// for the externally-specified post-v3 backup tree format. Blank
/// lines and `#`-prefixed comments are skipped.
pub struct ListBackupWalker {
    host_dir: PathBuf,
}

impl ListBackupWalker {
    pub fn new(host_dir: impl Into<PathBuf>) -> Self {
        Self {
            host_dir: host_dir.into(),
        }
    }

    fn backups_dir(&self) -> PathBuf {
        self.host_dir.join("backups")
    }
}

impl BackupWalker for ListBackupWalker {
    fn walk_host(&self, _host: &str) -> Result<Vec<WalkedRef>> {
        let mut refs = Vec::new();
        let dir = self.backups_dir();
        if !dir.exists() {
            return Ok(refs);
        }
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("refs"))
            .collect();
        entries.sort();
        for path in entries {
            refs.extend(parse_refs_file(&path)?);
        }
        Ok(refs)
    }
}

fn parse_refs_file(path: &Path) -> Result<Vec<WalkedRef>> {
    let content = std::fs::read_to_string(path)?;
    let mut refs = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(hex), Some(class_str)) = (parts.next(), parts.next()) else {
            continue;
        };
        let Some(digest) = crate::digest::from_hex(hex) else {
            continue;
        };
        let Ok(class) = class_str.parse::<u8>() else {
            continue;
        };
        refs.push(WalkedRef { digest, class });
    }
    Ok(refs)
}
