// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Digest representation, shard/sub-shard derivation, chain extension
//! semantics, and pool object path layout (spec §3, §9 "Digest
//! polymorphism").
//!
//! Digests are opaque byte slices. A "primary" digest is 16 bytes; a
//! "chained" digest appends 1 or more extension bytes encoding a chain
//! index `>= 1` as a big-endian integer. Everything here works on
//! `&[u8]` rather than a wrapper type, matching spec.md's "expose them
//! as opaque byte slices; do not embed the chaining scheme in the
//! core" guidance — the chaining scheme lives entirely in this module.

use std::path::{Path, PathBuf};

/// Length in bytes of a primary (non-chained) digest.
pub const PRIMARY_LEN: usize = 16;

/// The digest of the empty object: `d41d8cd98f00b204e9800998ecf8427e`.
/// Sentinel — excluded from link-max and missing-file diagnostics.
pub const EMPTY_MD5_HEX: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Returns the raw bytes of [`EMPTY_MD5_HEX`].
pub fn empty_md5() -> Vec<u8> {
    hex::decode(EMPTY_MD5_HEX).expect("EMPTY_MD5_HEX is valid hex")
}

/// Is `digest` the sentinel empty-object digest?
pub fn is_empty_md5(digest: &[u8]) -> bool {
    digest.len() == PRIMARY_LEN && digest == empty_md5().as_slice()
}

/// Top-shard id in `0..128`, derived from the digest's high byte with
/// its low bit discarded.
pub fn shard_of(digest: &[u8]) -> u8 {
    digest[0] >> 1
}

/// Sub-shard id in `0..128`, derived identically from the second byte.
pub fn subshard_of(digest: &[u8]) -> u8 {
    digest[1] >> 1
}

/// Renders a shard id as the two-hex-digit, even-valued suffix used in
/// `poolCnt.<c>.<ss>` filenames (`ss = shard*2`, zero-padded upper hex).
pub fn shard_hex(shard: u8) -> String {
    format!("{:02X}", (shard as u16) * 2)
}

/// Renders a digest as the lowercase hex string used for pool object
/// filenames and delta-file/digest-protocol payloads.
pub fn to_hex(digest: &[u8]) -> String {
    hex::encode(digest)
}

/// Parses a hex digest string back to raw bytes.
pub fn from_hex(s: &str) -> Option<Vec<u8>> {
    hex::decode(s).ok()
}

/// Is `digest` a chain extension (length > [`PRIMARY_LEN`])?
pub fn is_chained(digest: &[u8]) -> bool {
    digest.len() > PRIMARY_LEN
}

/// Decodes the trailing chain index of a chained digest as a
/// big-endian integer over the bytes after the primary 16. Returns 0
/// for a primary (non-chained) digest — "no extension" reads as chain
/// index 0, so `ext(primary) + 1 == 1` is the first chain link.
pub fn ext(digest: &[u8]) -> u32 {
    if digest.len() <= PRIMARY_LEN {
        return 0;
    }
    digest[PRIMARY_LEN..]
        .iter()
        .fold(0u32, |acc, b| (acc << 8) | (*b as u32))
}

/// Builds the chained digest for `primary` (which must be exactly
/// [`PRIMARY_LEN`] bytes, or already a primary slice) at chain index
/// `n`. `n == 0` returns the primary digest unextended.
pub fn with_ext(primary: &[u8], n: u32) -> Vec<u8> {
    let base = &primary[..PRIMARY_LEN.min(primary.len())];
    if n == 0 {
        return base.to_vec();
    }
    let mut out = base.to_vec();
    let bytes = n.to_be_bytes();
    let first_nonzero = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    out.extend_from_slice(&bytes[first_nonzero..]);
    out
}

/// `concat(d, ext(d)+1, class)` from spec §4.E: returns the digest and
/// on-disk path of the *next* chain link after `d`.
pub fn next_chain_link(pool_root: &Path, class: u8, digest: &[u8]) -> (Vec<u8>, PathBuf) {
    let next = with_ext(digest, ext(digest) + 1);
    let path = object_path(pool_root, class, &next);
    (next, path)
}

/// Full on-disk path of a pool object: `<root>/<class>/<shard-hex>/<subshard-hex>/<hex digest>`.
pub fn object_path(pool_root: &Path, class: u8, digest: &[u8]) -> PathBuf {
    pool_root
        .join(class.to_string())
        .join(shard_hex(shard_of(digest)))
        .join(shard_hex(subshard_of(digest)))
        .join(to_hex(digest))
}

/// Validates a directory entry name against the pool object naming
/// rule used by `PoolAggregator`'s filesystem reconciliation (spec
/// §4.D step 5): 32-48 lowercase hex characters (16-24 raw bytes), or
/// the literal lock-file name `LOCK`.
pub fn validate_object_name(name: &str) -> Option<Vec<u8>> {
    if name == "LOCK" {
        return None;
    }
    if !(32..=48).contains(&name.len()) || name.len() % 2 != 0 {
        return None;
    }
    if !name.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    from_hex(name)
}
