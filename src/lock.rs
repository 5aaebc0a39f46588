// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `PathLock` — exclusive advisory locking for the host lock
//! (`<host>/refCnt/LOCK`) and shard lock (`<pool>/<shard>/LOCK`)
//! namespaces described in spec §5.
//!
//! The spec's locks are byte-range locks over `[0,1)` of a dedicated
//! lock file; `fs2` only exposes whole-file advisory locks, which is
//! equivalent here since each lock file exists for exactly one range
//! (see DESIGN.md).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::{MaintError, Result};

/// A held exclusive lock. Released on drop.
pub struct LockGuard {
    _file: File,
    path: PathBuf,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Opens (creating if necessary) the lock file at `path` and acquires
/// an exclusive advisory lock.
///
/// First attempt is non-blocking. On contention, the caller gets
/// `Ok(None)`-shaped behavior via [`try_lock`]; this function performs
/// the documented retry policy: try non-blocking, and if that would
/// block, log via `waiting` and retry blocking.
pub fn acquire_exclusive(path: &Path, mut waiting: impl FnMut()) -> Result<LockGuard> {
    let file = open_lock_file(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(LockGuard {
            _file: file,
            path: path.to_path_buf(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
            waiting();
            file.lock_exclusive().map_err(|e| {
                MaintError::LockUnavailable(format!("{}: {e}", path.display()))
            })?;
            Ok(LockGuard {
                _file: file,
                path: path.to_path_buf(),
            })
        }
        Err(e) => Err(MaintError::LockUnavailable(format!("{}: {e}", path.display()))),
    }
}

/// Acquires the lock, blocking immediately (used by `PoolCleaner`,
/// which always blocks per spec §4.E step 1).
pub fn acquire_exclusive_blocking(path: &Path) -> Result<LockGuard> {
    let file = open_lock_file(path)?;
    file.lock_exclusive()
        .map_err(|e| MaintError::LockUnavailable(format!("{}: {e}", path.display())))?;
    Ok(LockGuard {
        _file: file,
        path: path.to_path_buf(),
    })
}

/// Non-blocking attempt only; `Ok(None)` means the lock is currently
/// held elsewhere.
pub fn try_acquire_exclusive(path: &Path) -> Result<Option<LockGuard>> {
    let file = open_lock_file(path)?;
    match file.try_lock_exclusive() {
        Ok(()) => Ok(Some(LockGuard {
            _file: file,
            path: path.to_path_buf(),
        })),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
        Err(e) => Err(MaintError::LockUnavailable(format!("{}: {e}", path.display()))),
    }
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .open(path)?)
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // fs2 releases the lock when the underlying file is closed;
        // an explicit unlock call keeps intent visible and surfaces
        // double-unlock bugs in debug builds rather than relying only
        // on the implicit close.
        let _ = FileExt::unlock(&self._file);
    }
}
