// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! `CountMap` — digest → signed count, with ordered iteration and an
//! atomic on-disk binary format (spec §4.A).
//!
//! Layout: `b"PCNT"`, `u32` little-endian entry count, then per entry
//! `u8 digest_len`, `digest_len` raw bytes, `i64` little-endian count.
//! A `BTreeMap<Vec<u8>, i64>` backs the map: byte-wise `Ord` on the raw
//! digest matches the spec's "same object iff byte-equal" comparison,
//! and gives the required stable ordered iteration for free (spec §9).

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{MaintError, Result};

const MAGIC: &[u8; 4] = b"PCNT";

#[derive(Debug, Default, Clone)]
pub struct CountMap {
    entries: BTreeMap<Vec<u8>, i64>,
}

impl CountMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a count file. A missing file is an I/O error here —
    /// callers that want "absent file means empty map" should
    /// `stat`-guard first, or use [`Self::read_if_exists`].
    pub fn read(path: &Path) -> Result<Self> {
        let mut f = std::fs::File::open(path)?;
        let mut magic = [0u8; 4];
        f.read_exact(&mut magic).map_err(|e| corrupt(path, e))?;
        if &magic != MAGIC {
            return Err(MaintError::CorruptCountFile {
                path: path.display().to_string(),
                reason: "bad magic".to_string(),
            });
        }
        let n = f.read_u32::<LittleEndian>().map_err(|e| corrupt(path, e))?;
        let mut entries = BTreeMap::new();
        for _ in 0..n {
            let len = f.read_u8().map_err(|e| corrupt(path, e))? as usize;
            if len < 16 || len > 24 {
                return Err(MaintError::CorruptCountFile {
                    path: path.display().to_string(),
                    reason: format!("implausible digest length {len}"),
                });
            }
            let mut digest = vec![0u8; len];
            f.read_exact(&mut digest).map_err(|e| corrupt(path, e))?;
            let count = f.read_i64::<LittleEndian>().map_err(|e| corrupt(path, e))?;
            entries.insert(digest, count);
        }
        Ok(Self { entries })
    }

    /// Like [`Self::read`], but a non-existent file yields an empty map
    /// rather than an error — the common case throughout the pipeline,
    /// where most shard/host files simply haven't been created yet.
    pub fn read_if_exists(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        Self::read(path)
    }

    /// Serializes the map and atomically replaces `path` via a
    /// `<path>.tmp.<pid>` staging file + rename.
    pub fn write(&self, path: &Path) -> Result<()> {
        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        {
            let mut f = std::fs::File::create(&tmp).map_err(|e| MaintError::WriteFailed {
                path: tmp.display().to_string(),
                source: e,
            })?;
            f.write_all(MAGIC)?;
            f.write_u32::<LittleEndian>(self.entries.len() as u32)?;
            for (digest, count) in &self.entries {
                f.write_u8(digest.len() as u8)?;
                f.write_all(digest)?;
                f.write_i64::<LittleEndian>(*count)?;
            }
            f.flush()?;
        }
        std::fs::rename(&tmp, path).map_err(|e| MaintError::RenameFailed {
            from: tmp.display().to_string(),
            to: path.display().to_string(),
            source: e,
        })
    }

    /// `incr` on a missing key defines it to `delta`.
    pub fn incr(&mut self, digest: &[u8], delta: i64) {
        *self.entries.entry(digest.to_vec()).or_insert(0) += delta;
    }

    /// Absent keys return `None`, distinguishing "absent" from "zero".
    pub fn get(&self, digest: &[u8]) -> Option<i64> {
        self.entries.get(digest).copied()
    }

    pub fn delete(&mut self, digest: &[u8]) -> Option<i64> {
        self.entries.remove(digest)
    }

    pub fn contains(&self, digest: &[u8]) -> bool {
        self.entries.contains_key(digest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Stable ordered iteration (no insertion during iteration).
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], i64)> {
        self.entries.iter().map(|(d, c)| (d.as_slice(), *c))
    }

    /// Clamps every negative count to zero, returning the digests that
    /// were clamped together with their pre-clamp value. The spec
    /// forbids durable negative counts but does not prescribe the
    /// repair action (§9 Open Questions); this crate logs and clamps.
    pub fn clamp_negative(&mut self) -> Vec<(Vec<u8>, i64)> {
        let mut clamped = Vec::new();
        for (digest, count) in self.entries.iter_mut() {
            if *count < 0 {
                clamped.push((digest.clone(), *count));
                *count = 0;
            }
        }
        clamped
    }
}

fn corrupt(path: &Path, source: std::io::Error) -> MaintError {
    MaintError::CorruptCountFile {
        path: path.display().to_string(),
        reason: source.to_string(),
    }
}
