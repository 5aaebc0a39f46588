// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Error kinds for the maintenance engine (spec §7).
//!
//! All kinds here are non-fatal at the per-shard/per-host level; callers
//! accumulate them into a [`crate::context::ErrorCounter`] rather than
//! aborting. `BadArgs` is the one exception — it is reported by the CLI
//! before any pass begins and causes an immediate exit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaintError {
    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("corrupt count file {path}: {reason}")]
    CorruptCountFile { path: String, reason: String },

    #[error("rename failed {from} -> {to}: {source}")]
    RenameFailed {
        from: String,
        to: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unlink failed {path}: {source}")]
    UnlinkFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("chmod failed {path}: {source}")]
    ChmodFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write failed {path}: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing pool object {digest} (count {count})")]
    MissingPoolObject { digest: String, count: i64 },

    #[error("unknown pool file removed: {path}")]
    UnknownPoolObject { path: String },

    #[error("count mismatch for {digest}: rebuilt {rebuilt}, existing {existing}")]
    CountMismatch {
        digest: String,
        rebuilt: i64,
        existing: i64,
    },

    #[error("count underflow for {digest}: clamped {from} to 0")]
    CountUnderflow { digest: String, from: i64 },

    #[error("bad arguments: {0}")]
    BadArgs(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, MaintError>;
